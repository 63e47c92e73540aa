use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::table::{Table, TableStore, APPEND_CHUNK_ROWS};

/// On-disk form of one tab.
#[derive(Debug, Serialize, Deserialize)]
struct TabFile {
    name: String,
    #[serde(flatten)]
    table: Table,
}

/// Filesystem-backed workbook: one directory, one JSON file per tab.
///
/// ```text
/// outbound/
///   Outbound_Leads.json
///   Credit_Ledger.json
///   _Sent_Index.json
/// ```
///
/// All writes go through one async mutex, so tab updates within a process
/// never interleave.
pub struct JsonFileTableStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileTableStore {
    /// Open (and create if missing) a workbook directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn tab_path(&self, tab: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", tab_filename(tab)))
    }

    async fn load(&self, tab: &str) -> Result<Option<Table>, StorageError> {
        let path = self.tab_path(tab);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let file: TabFile = serde_json::from_str(&json)?;
                Ok(Some(file.table))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, tab: &str, table: Table) -> Result<(), StorageError> {
        let path = self.tab_path(tab);
        let file = TabFile { name: tab.to_string(), table };
        let json = serde_json::to_string_pretty(&file)?;
        // Write then rename so a crash never leaves a half-written tab.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(tab, path = %path.display(), "Saved tab");
        Ok(())
    }

    async fn load_existing(&self, tab: &str) -> Result<Table, StorageError> {
        self.load(tab)
            .await?
            .ok_or_else(|| StorageError::TabNotFound(tab.to_string()))
    }
}

/// Flatten a tab name into a safe filename: anything outside `[A-Za-z0-9_-]` becomes `_`.
fn tab_filename(tab: &str) -> String {
    tab.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl TableStore for JsonFileTableStore {
    async fn read_table(&self, tab: &str) -> Result<Option<Table>, StorageError> {
        self.load(tab).await
    }

    async fn ensure_headers(&self, tab: &str, headers: &[String]) -> Result<Vec<String>, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load(tab).await?.unwrap_or_default();
        let added = table.ensure_headers(headers);
        if !added.is_empty() || !self.tab_path(tab).exists() {
            self.save(tab, table).await?;
        }
        Ok(added)
    }

    async fn insert_column(&self, tab: &str, header: &str) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load_existing(tab).await?;
        let col = table.insert_column(header);
        self.save(tab, table).await?;
        Ok(col)
    }

    async fn write_column_block(
        &self,
        tab: &str,
        col: usize,
        start_row: usize,
        values: &[String],
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load_existing(tab).await?;
        for (i, v) in values.iter().enumerate() {
            table.set(start_row + i, col, v.clone());
        }
        self.save(tab, table).await
    }

    async fn append_rows(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        for chunk in rows.chunks(APPEND_CHUNK_ROWS) {
            let mut table = self.load(tab).await?.unwrap_or_default();
            table.rows.extend(chunk.iter().cloned());
            self.save(tab, table).await?;
        }
        Ok(())
    }

    async fn write_cell(&self, tab: &str, row: usize, col: usize, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load_existing(tab).await?;
        table.set(row, col, value.to_string());
        self.save(tab, table).await
    }

    async fn list_tabs(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let json = tokio::fs::read_to_string(&path).await?;
                let file: TabFile = serde_json::from_str(&json)?;
                names.push(file.name);
            }
        }
        names.sort();
        Ok(names)
    }
}
