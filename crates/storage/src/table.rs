use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Upper bound on rows per append call.
pub const APPEND_CHUNK_ROWS: usize = 1000;

/// One tab: a header row plus data rows. Row indices are 0-based data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers, rows: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    // ── In-place mutations shared by the backends ──

    pub(crate) fn ensure_headers(&mut self, wanted: &[String]) -> Vec<String> {
        let mut added = Vec::new();
        for h in wanted {
            let exists = self
                .headers
                .iter()
                .any(|e| e.trim().eq_ignore_ascii_case(h.trim()));
            if !exists {
                self.headers.push(h.clone());
                added.push(h.clone());
            }
        }
        added
    }

    pub(crate) fn insert_column(&mut self, header: &str) -> usize {
        self.headers.push(header.to_string());
        self.headers.len() - 1
    }

    pub(crate) fn set(&mut self, row: usize, col: usize, value: String) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let r = &mut self.rows[row];
        if r.len() <= col {
            r.resize(col + 1, String::new());
        }
        r[col] = value;
    }
}

/// Tabular storage behind the lead, results and archive workbooks.
///
/// Writes are per call: a block write either lands or errors, but a crash
/// between two calls leaves the earlier one applied.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Read a tab. Missing tabs read as `None`.
    async fn read_table(&self, tab: &str) -> Result<Option<Table>, StorageError>;

    /// Create the tab if needed and append any of `headers` not already present.
    /// Returns the headers that were added.
    async fn ensure_headers(&self, tab: &str, headers: &[String]) -> Result<Vec<String>, StorageError>;

    /// Append a new column with `header`; returns its index.
    async fn insert_column(&self, tab: &str, header: &str) -> Result<usize, StorageError>;

    /// Write `values` into column `col` starting at data row `start_row`.
    async fn write_column_block(
        &self,
        tab: &str,
        col: usize,
        start_row: usize,
        values: &[String],
    ) -> Result<(), StorageError>;

    /// Append rows after the last data row. Implementations write at most
    /// [`APPEND_CHUNK_ROWS`] per underlying call.
    async fn append_rows(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), StorageError>;

    async fn write_cell(&self, tab: &str, row: usize, col: usize, value: &str) -> Result<(), StorageError>;

    async fn list_tabs(&self) -> Result<Vec<String>, StorageError>;
}

pub fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_headers_is_case_insensitive() {
        let mut t = Table::new(to_strings(&["Phone", "Run"]));
        let added = t.ensure_headers(&to_strings(&["run", "Next Call"]));
        assert_eq!(added, vec!["Next Call".to_string()]);
        assert_eq!(t.headers, to_strings(&["Phone", "Run", "Next Call"]));
    }

    #[test]
    fn set_pads_short_rows() {
        let mut t = Table::new(to_strings(&["a", "b", "c"]));
        t.set(1, 2, "x".into());
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1], to_strings(&["", "", "x"]));
        assert!(t.rows[0].is_empty());
    }
}
