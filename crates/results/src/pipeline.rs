//! One ingestion cycle: rotate the pending webhook batch, classify every row,
//! append bucket and archive rows, then write recall dates and close out
//! classified leads on the live lead tab.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use callrun_core::lead::tabs;
use callrun_core::{Bucket, Clock, Result};
use callrun_dispatch::locks::{LEAD_TAB_LOCK, LEAD_TAB_LOCK_WAIT};
use callrun_dispatch::{LeadSheet, ProcessLocks, SentIndex};
use callrun_storage::{OutcomeInbox, Settings, TableStore, Workbooks};

use crate::archive::MonthlyArchive;
use crate::classifier::{classify, ClassifierLists, Disposition};
use crate::fields::{layout_headers, Column, OutcomeBatch, OutcomeRow, ARCHIVE_LAYOUT, RESULTS_LAYOUT};
use crate::lease::{LeaseState, PollLease};
use crate::recall::{compute_next_call_date, RecallDays};

pub const NOTHING_PENDING: &str = "No new results to ingest.";

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub message: String,
    pub ingested: usize,
    /// Rows written per bucket label.
    pub placed: BTreeMap<String, usize>,
    pub unclassified: usize,
    pub recalls_scheduled: usize,
    pub closed_out: usize,
    pub polling_stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_tab: Option<String>,
}

impl IngestReport {
    fn nothing_pending(archived_to: Option<String>) -> Self {
        Self {
            message: NOTHING_PENDING.to_string(),
            archived_to,
            ..Default::default()
        }
    }
}

pub struct IngestionPipeline {
    inbox: OutcomeInbox,
    results: Arc<dyn TableStore>,
    archive: MonthlyArchive,
    leads: LeadSheet,
    sent_index: SentIndex,
    settings: Settings,
    lease: PollLease,
    clock: Arc<dyn Clock>,
    locks: Arc<ProcessLocks>,
    lead_tab: String,
    lease_minutes: u64,
}

impl IngestionPipeline {
    pub fn new(
        workbooks: &Workbooks,
        clock: Arc<dyn Clock>,
        locks: Arc<ProcessLocks>,
        lease_minutes: u64,
    ) -> Self {
        Self {
            inbox: workbooks.inbox.clone(),
            results: workbooks.results.clone(),
            archive: MonthlyArchive::new(workbooks.archive.clone()),
            leads: LeadSheet::new(workbooks.outbound.clone()),
            sent_index: SentIndex::new(workbooks.outbound.clone()),
            settings: Settings::new(workbooks.outbound.clone(), tabs::CREDIT_SETTINGS),
            lease: PollLease::new(workbooks.outbound.clone(), clock.clone(), lease_minutes),
            clock,
            locks,
            lead_tab: tabs::OUTBOUND_LEADS.to_string(),
            lease_minutes,
        }
    }

    pub fn lease(&self) -> &PollLease {
        &self.lease
    }

    pub async fn recall_days(&self) -> Result<RecallDays> {
        RecallDays::load(&self.settings).await
    }

    pub async fn set_recall_days(&self, no_answer: u32, answered: u32) -> Result<RecallDays> {
        RecallDays::save(&self.settings, no_answer, answered).await
    }

    /// Poller entry point: does nothing unless a polling lease is held.
    pub async fn poll(&self) -> Result<Option<IngestReport>> {
        if self.lease.state().await? == LeaseState::Inactive {
            return Ok(None);
        }
        self.run_cycle().await.map(Some)
    }

    /// Release an expired lease, otherwise drain the pending batch if any.
    pub async fn run_cycle(&self) -> Result<IngestReport> {
        if self.lease.state().await? == LeaseState::Expired {
            self.lease.release().await?;
            info!(limit_minutes = self.lease_minutes, "Result polling stopped");
            return Ok(IngestReport {
                message: format!("Polling stopped after {} minutes.", self.lease_minutes),
                polling_stopped: true,
                ..Default::default()
            });
        }

        let stamp = self.clock.local_now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let Some(pending) = self.inbox.take_pending(&stamp).await? else {
            debug!(path = %self.inbox.pending_path(), "No pending outcome batch");
            return Ok(IngestReport::nothing_pending(None));
        };

        let batch = OutcomeBatch::parse(&pending.bytes)?;
        if batch.is_empty() {
            info!(archived_to = %pending.archived_to, "Outcome batch had no data rows");
            return Ok(IngestReport::nothing_pending(Some(pending.archived_to)));
        }

        let mut report = self.ingest(&batch).await?;
        report.archived_to = Some(pending.archived_to);
        Ok(report)
    }

    /// Classify and write an already-parsed batch.
    pub async fn ingest(&self, batch: &OutcomeBatch) -> Result<IngestReport> {
        let sent = self.sent_index.lookup().await?;
        let lists = ClassifierLists::load(self.results.as_ref()).await?;
        let days = RecallDays::load(&self.settings).await?;
        let today = self.clock.today();

        let mut bucket_rows: BTreeMap<Bucket, Vec<Vec<String>>> = BTreeMap::new();
        let mut archive_rows = Vec::with_capacity(batch.len());
        let mut placed: HashMap<String, Bucket> = HashMap::new();
        let mut recall_candidates: Vec<(String, NaiveDate)> = Vec::new();
        let mut unclassified = 0;

        for row in batch.iter() {
            let phone = row.phone_key();
            let run = row.derive_run(sent.get(&phone).map(String::as_str));
            let next_call = compute_next_call_date(&row, days, today);

            match classify(&row, &lists) {
                Disposition::Terminal(bucket) => {
                    bucket_rows
                        .entry(bucket)
                        .or_default()
                        .push(render(&RESULTS_LAYOUT, &row, &phone, &run, None));
                    if !phone.is_empty() {
                        placed.insert(phone.clone(), bucket);
                    }
                }
                Disposition::Unclassified => unclassified += 1,
            }

            archive_rows.push(render(&ARCHIVE_LAYOUT, &row, &phone, &run, next_call));
            if let Some(date) = next_call.filter(|_| !phone.is_empty()) {
                recall_candidates.push((phone, date));
            }
        }

        let mut report = IngestReport {
            ingested: batch.len(),
            unclassified,
            ..Default::default()
        };

        let result_headers = layout_headers(&RESULTS_LAYOUT);
        for (bucket, rows) in &bucket_rows {
            self.results.ensure_headers(bucket.label(), &result_headers).await?;
            self.results.append_rows(bucket.label(), rows).await?;
            report.placed.insert(bucket.label().to_string(), rows.len());
            info!(bucket = %bucket, rows = rows.len(), "Results appended");
        }

        report.archive_tab = Some(self.archive.append(today, &archive_rows).await?);

        // Leads closed out in this cycle keep their bucket; no recall for them.
        let recalls: HashMap<String, NaiveDate> = recall_candidates
            .into_iter()
            .filter(|(phone, _)| !placed.contains_key(phone))
            .collect();
        {
            let _lead_tab = self.locks.acquire(LEAD_TAB_LOCK, LEAD_TAB_LOCK_WAIT).await?;
            report.recalls_scheduled = self.leads.set_next_call(&self.lead_tab, &recalls).await?;
            report.closed_out = self.leads.relabel_closed(&self.lead_tab, &placed).await?;
        }
        if report.recalls_scheduled < recalls.len() {
            warn!(
                wanted = recalls.len(),
                written = report.recalls_scheduled,
                "Some recalled phones have no lead row"
            );
        }

        report.message = format!("Successfully ingested {} results.", report.ingested);
        info!(
            ingested = report.ingested,
            unclassified,
            recalls = report.recalls_scheduled,
            closed_out = report.closed_out,
            "Ingestion cycle finished"
        );
        Ok(report)
    }
}

/// Lay one outcome row out in `layout` order.
fn render(
    layout: &[(&str, Column)],
    row: &OutcomeRow<'_>,
    phone: &str,
    run: &str,
    next_call: Option<NaiveDate>,
) -> Vec<String> {
    layout
        .iter()
        .map(|(_, column)| match column {
            Column::Field(field) => row.get(*field).to_string(),
            Column::Phone => phone.to_string(),
            Column::Run => run.to_string(),
            Column::NextCallDate => next_call
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            Column::Processed => String::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::OutcomeField;
    use callrun_core::header::HeaderIndex;

    #[test]
    fn render_follows_layout() {
        let headers = vec!["Date".to_string(), "Summary".to_string()];
        let cells = vec!["2024-01-10".to_string(), "hung up".to_string()];
        let index = HeaderIndex::normalized(&headers);
        let row = OutcomeRow::new(&cells, &index);
        let next = NaiveDate::from_ymd_opt(2024, 1, 15);

        let out = render(&ARCHIVE_LAYOUT, &row, "2145550182", "2", next);
        assert_eq!(out.len(), ARCHIVE_LAYOUT.len());
        assert_eq!(out[0], "2024-01-10");
        assert_eq!(out[3], "2145550182");
        assert_eq!(out[18], "hung up");
        assert_eq!(out[25], "2");
        assert_eq!(out[26], "2024-01-15");
        assert_eq!(out[27], "");
        assert_eq!(row.get(OutcomeField::Job), "");
    }
}
