use std::sync::Arc;

use tracing::debug;

use crate::error::StorageError;
use crate::table::{to_strings, TableStore};

pub const SETTINGS_HEADERS: [&str; 2] = ["Key", "Value"];

/// Key/value tab (`Key | Value`), e.g. the credit balance and recall-day overrides.
/// Keys compare case-insensitively; the first matching row wins.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn TableStore>,
    tab: String,
}

impl Settings {
    pub fn new(store: Arc<dyn TableStore>, tab: impl Into<String>) -> Self {
        Self { store, tab: tab.into() }
    }

    pub fn tab(&self) -> &str {
        &self.tab
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let Some(table) = self.store.read_table(&self.tab).await? else {
            return Ok(None);
        };
        Ok(table
            .rows
            .iter()
            .find(|r| r.first().map(|k| k.trim().eq_ignore_ascii_case(key)).unwrap_or(false))
            .map(|r| r.get(1).cloned().unwrap_or_default()))
    }

    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.get(key).await?.and_then(|v| v.trim().parse().ok()))
    }

    /// Overwrite the value for `key`, appending a row when the key is new.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.store
            .ensure_headers(&self.tab, &to_strings(&SETTINGS_HEADERS))
            .await?;
        let table = self.store.read_table(&self.tab).await?.unwrap_or_default();
        let existing = table
            .rows
            .iter()
            .position(|r| r.first().map(|k| k.trim().eq_ignore_ascii_case(key)).unwrap_or(false));
        match existing {
            Some(row) => self.store.write_cell(&self.tab, row, 1, value).await?,
            None => {
                self.store
                    .append_rows(&self.tab, &[vec![key.to_string(), value.to_string()]])
                    .await?
            }
        }
        debug!(tab = %self.tab, key, value, "Setting updated");
        Ok(())
    }

    /// Blank the value for `key` (the row is kept).
    pub async fn clear(&self, key: &str) -> Result<(), StorageError> {
        if self.get(key).await?.is_some() {
            self.set(key, "").await?;
        }
        Ok(())
    }
}
