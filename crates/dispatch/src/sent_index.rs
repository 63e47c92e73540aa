use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use callrun_core::lead::{run_tag, tabs};
use callrun_core::phone::to_ten_digit_key;
use callrun_core::{Result, SentIndexEntry};
use callrun_storage::table::to_strings;
use callrun_storage::TableStore;

/// Append-only record of which phone went out on which run.
#[derive(Clone)]
pub struct SentIndex {
    store: Arc<dyn TableStore>,
}

impl SentIndex {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Record `phones` as dispatched on `run` at `batch_time`.
    pub async fn append(&self, phones: &[String], run: u8, batch_time: &str) -> Result<usize> {
        let tag = run_tag(run);
        let rows: Vec<Vec<String>> = phones
            .iter()
            .map(|p| to_ten_digit_key(p))
            .filter(|p| !p.is_empty())
            .map(|phone| {
                SentIndexEntry {
                    phone,
                    run_tag: tag.clone(),
                    batch_time: batch_time.to_string(),
                }
                .to_row()
            })
            .collect();
        if rows.is_empty() {
            return Ok(0);
        }
        self.store
            .ensure_headers(tabs::SENT_INDEX, &to_strings(&SentIndexEntry::HEADERS))
            .await?;
        self.store.append_rows(tabs::SENT_INDEX, &rows).await?;
        debug!(count = rows.len(), run_tag = %tag, "Sent index appended");
        Ok(rows.len())
    }

    /// phone → run tag. Later rows overwrite earlier ones.
    pub async fn lookup(&self) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        let Some(table) = self.store.read_table(tabs::SENT_INDEX).await? else {
            return Ok(map);
        };
        for row in &table.rows {
            let phone = to_ten_digit_key(row.first().map(String::as_str).unwrap_or(""));
            if phone.is_empty() {
                continue;
            }
            map.insert(phone, row.get(1).cloned().unwrap_or_default());
        }
        Ok(map)
    }
}
