use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use callrun_core::config::LAST_SENDABLE_RUN;
use callrun_core::header::{cell, HeaderIndex};
use callrun_core::{Bucket, Result};
use callrun_storage::TableStore;

use crate::fields::first_number;

/// Live leads per run and rows per bucket tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeadCounts {
    /// Keyed by run number 1..=8; every run is present.
    pub runs: BTreeMap<u8, usize>,
    /// Keyed by bucket label.
    pub buckets: BTreeMap<String, usize>,
}

/// Count run markers on `lead_tab` and rows on each bucket tab.
pub async fn count_leads(
    outbound: &dyn TableStore,
    lead_tab: &str,
    results: &dyn TableStore,
) -> Result<LeadCounts> {
    let mut counts = LeadCounts {
        runs: (1..=LAST_SENDABLE_RUN).map(|r| (r, 0)).collect(),
        buckets: BTreeMap::new(),
    };

    if let Some(table) = outbound.read_table(lead_tab).await? {
        let run_col = HeaderIndex::compact(&table.headers).get("Run");
        if run_col.is_none() {
            warn!(tab = lead_tab, "No Run column, skipping run counts");
        }
        for row in &table.rows {
            let run = first_number(cell(row, run_col)).and_then(|n| n.parse::<u8>().ok());
            if let Some(slot) = run.and_then(|r| counts.runs.get_mut(&r)) {
                *slot += 1;
            }
        }
    }

    for bucket in Bucket::ALL {
        let rows = results
            .read_table(bucket.label())
            .await?
            .map(|t| t.len())
            .unwrap_or(0);
        counts.buckets.insert(bucket.label().to_string(), rows);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use callrun_storage::table::to_strings;
    use callrun_storage::{MemoryTableStore, Table};

    #[tokio::test]
    async fn counts_numeric_runs_and_bucket_rows() {
        let outbound = MemoryTableStore::new();
        let mut leads = Table::new(to_strings(&["Phone", "Run"]));
        leads.rows = vec![
            to_strings(&["1", ""]),
            to_strings(&["2", "1"]),
            to_strings(&["3", "Run 2"]),
            to_strings(&["4", "2"]),
            to_strings(&["5", "Bad Leads"]),
            to_strings(&["6", "9"]),
        ];
        outbound.put_table("Outbound Leads", leads).await;

        let results = MemoryTableStore::new();
        let mut good = Table::new(to_strings(&["Phone"]));
        good.rows = vec![to_strings(&["1"]), to_strings(&["2"])];
        results.put_table("Good Leads", good).await;

        let c = count_leads(&outbound, "Outbound Leads", &results).await.unwrap();
        assert_eq!(c.runs[&1], 1);
        assert_eq!(c.runs[&2], 2);
        assert_eq!(c.runs.len(), 8);
        assert_eq!(c.buckets["Good Leads"], 2);
        assert_eq!(c.buckets["Bad Leads"], 0);
    }
}
