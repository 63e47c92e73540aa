use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::table::{Table, TableStore, APPEND_CHUNK_ROWS};

/// Process-local table store. Used by tests and the dry-run CLI paths.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tabs: RwLock<BTreeMap<String, Table>>,
    append_calls: AtomicUsize,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tab, replacing any existing contents.
    pub async fn put_table(&self, tab: &str, table: Table) {
        self.tabs.write().await.insert(tab.to_string(), table);
    }

    /// Number of chunked append writes issued so far.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn read_table(&self, tab: &str) -> Result<Option<Table>, StorageError> {
        Ok(self.tabs.read().await.get(tab).cloned())
    }

    async fn ensure_headers(&self, tab: &str, headers: &[String]) -> Result<Vec<String>, StorageError> {
        let mut tabs = self.tabs.write().await;
        Ok(tabs.entry(tab.to_string()).or_default().ensure_headers(headers))
    }

    async fn insert_column(&self, tab: &str, header: &str) -> Result<usize, StorageError> {
        let mut tabs = self.tabs.write().await;
        let table = tabs
            .get_mut(tab)
            .ok_or_else(|| StorageError::TabNotFound(tab.to_string()))?;
        Ok(table.insert_column(header))
    }

    async fn write_column_block(
        &self,
        tab: &str,
        col: usize,
        start_row: usize,
        values: &[String],
    ) -> Result<(), StorageError> {
        let mut tabs = self.tabs.write().await;
        let table = tabs
            .get_mut(tab)
            .ok_or_else(|| StorageError::TabNotFound(tab.to_string()))?;
        for (i, v) in values.iter().enumerate() {
            table.set(start_row + i, col, v.clone());
        }
        Ok(())
    }

    async fn append_rows(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        for chunk in rows.chunks(APPEND_CHUNK_ROWS) {
            let mut tabs = self.tabs.write().await;
            tabs.entry(tab.to_string())
                .or_default()
                .rows
                .extend(chunk.iter().cloned());
            self.append_calls.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn write_cell(&self, tab: &str, row: usize, col: usize, value: &str) -> Result<(), StorageError> {
        let mut tabs = self.tabs.write().await;
        let table = tabs
            .get_mut(tab)
            .ok_or_else(|| StorageError::TabNotFound(tab.to_string()))?;
        table.set(row, col, value.to_string());
        Ok(())
    }

    async fn list_tabs(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.tabs.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::to_strings;

    #[tokio::test]
    async fn append_is_chunked() {
        let store = MemoryTableStore::new();
        store.ensure_headers("t", &to_strings(&["a"])).await.unwrap();
        let rows: Vec<Vec<String>> = (0..2500).map(|i| vec![i.to_string()]).collect();
        store.append_rows("t", &rows).await.unwrap();

        assert_eq!(store.append_calls(), 3);
        let t = store.read_table("t").await.unwrap().unwrap();
        assert_eq!(t.len(), 2500);
        assert_eq!(t.rows[2499][0], "2499");
    }

    #[tokio::test]
    async fn block_write_on_missing_tab_fails() {
        let store = MemoryTableStore::new();
        let err = store
            .write_column_block("nope", 0, 0, &["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TabNotFound(_)));
    }
}
