use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use callrun_core::Result;
use callrun_storage::{Table, TableStore};

use crate::fields::{layout_headers, ARCHIVE_LAYOUT};

/// `"Archive - January 2024"`.
pub fn archive_tab_name(day: NaiveDate) -> String {
    format!("Archive - {}", day.format("%B %Y"))
}

/// Monthly archive tabs: every ingested row lands here exactly once.
#[derive(Clone)]
pub struct MonthlyArchive {
    store: Arc<dyn TableStore>,
}

impl MonthlyArchive {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Create the tab or add any missing archive headers, then read it back.
    pub async fn ensure(&self, tab: &str) -> Result<Table> {
        let added = self.store.ensure_headers(tab, &layout_headers(&ARCHIVE_LAYOUT)).await?;
        if !added.is_empty() {
            info!(tab, added = added.len(), "Archive headers ensured");
        }
        Ok(self.store.read_table(tab).await?.unwrap_or_default())
    }

    /// Append rows laid out as [`ARCHIVE_LAYOUT`].
    pub async fn append(&self, day: NaiveDate, rows: &[Vec<String>]) -> Result<String> {
        let tab = archive_tab_name(day);
        if rows.is_empty() {
            return Ok(tab);
        }
        self.ensure(&tab).await?;
        self.store.append_rows(&tab, rows).await?;
        info!(tab = %tab, rows = rows.len(), "Archive appended");
        Ok(tab)
    }
}
