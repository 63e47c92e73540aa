use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use callrun_core::header::{cell, HeaderIndex};
use callrun_core::phone::to_ten_digit_key;
use callrun_core::{Bucket, CallRunError, Result};
use callrun_storage::{write_column_values, Table, TableStore};

/// Resolved column positions on a lead tab.
#[derive(Debug, Clone, Default)]
pub struct LeadColumns {
    pub first_name: Option<usize>,
    pub last_name: Option<usize>,
    pub phone: Option<usize>,
    pub address: Option<usize>,
    pub city: Option<usize>,
    pub state: Option<usize>,
    pub zip: Option<usize>,
    pub email: Option<usize>,
    pub run: Option<usize>,
    pub last_call: Option<usize>,
    pub next_call: Option<usize>,
}

impl LeadColumns {
    pub fn resolve(headers: &[String]) -> Self {
        let idx = HeaderIndex::compact(headers);
        Self {
            first_name: idx.first_of(&["First Name", "FirstName", "First"]),
            last_name: idx.first_of(&["Last Name", "LastName", "Last"]),
            phone: idx.first_of(&["Phone", "Phone Number"]),
            address: idx.get("Address"),
            city: idx.get("City"),
            state: idx.get("State"),
            zip: idx.first_of(&["Zip", "Zip Code"]),
            email: idx.get("Email"),
            run: idx.get("Run"),
            last_call: idx.get("Last Call"),
            next_call: idx.get("Next Call"),
        }
    }
}

/// Lead tab with its columns resolved.
#[derive(Debug, Clone)]
pub struct LeadTable {
    pub table: Table,
    pub cols: LeadColumns,
}

impl LeadTable {
    pub fn phone_key(&self, row: &[String]) -> String {
        to_ten_digit_key(cell(row, self.cols.phone))
    }

    /// 10-digit phone → data-row indices.
    pub fn rows_by_phone(&self) -> HashMap<String, Vec<usize>> {
        let mut map: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in self.table.rows.iter().enumerate() {
            let key = self.phone_key(row);
            if !key.is_empty() {
                map.entry(key).or_default().push(i);
            }
        }
        map
    }
}

/// Lead tab adapter over a [`TableStore`]: reads, and block-writes of the
/// `Run`, `Last Call` and `Next Call` columns.
#[derive(Clone)]
pub struct LeadSheet {
    store: Arc<dyn TableStore>,
}

impl LeadSheet {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Missing tabs read as empty.
    pub async fn read(&self, tab: &str) -> Result<LeadTable> {
        let table = self.store.read_table(tab).await?.unwrap_or_default();
        let cols = LeadColumns::resolve(&table.headers);
        Ok(LeadTable { table, cols })
    }

    /// Column index for `header`, appending the column when absent.
    async fn column(&self, tab: &str, existing: Option<usize>, header: &str) -> Result<usize> {
        if let Some(c) = existing {
            return Ok(c);
        }
        let col = self.store.insert_column(tab, header).await?;
        info!(tab, header, col, "Inserted missing column");
        Ok(col)
    }

    /// Write `value` into the run column of each row, one block per contiguous run of rows.
    pub async fn set_run_for_rows(&self, tab: &str, rows: &[usize], value: &str) -> Result<usize> {
        let leads = self.read(tab).await?;
        let col = leads.cols.run.ok_or_else(|| {
            CallRunError::Validation(format!("missing Run column in {tab}"))
        })?;
        let valid: Vec<usize> = rows
            .iter()
            .copied()
            .filter(|r| *r < leads.table.len())
            .collect();
        let updates: BTreeMap<usize, String> = valid.iter().map(|r| (*r, value.to_string())).collect();
        let blocks = write_column_values(self.store.as_ref(), tab, col, &updates).await?;
        debug!(tab, rows = valid.len(), blocks, value, "Run markers written");
        Ok(valid.len())
    }

    /// Write `value` into the run column of every row whose phone is in `phones`.
    pub async fn set_run_for_phones(&self, tab: &str, phones: &[String], value: &str) -> Result<usize> {
        let leads = self.read(tab).await?;
        let wanted: HashSet<String> = phones.iter().map(|p| to_ten_digit_key(p)).collect();
        let rows: Vec<usize> = leads
            .table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| wanted.contains(&leads.phone_key(r)))
            .map(|(i, _)| i)
            .collect();
        if rows.is_empty() {
            return Ok(0);
        }
        self.set_run_for_rows(tab, &rows, value).await
    }

    /// `Last Call = today`, `Next Call = ""` on every row matching `phones`.
    pub async fn stamp_last_call(&self, tab: &str, phones: &[String], today: NaiveDate) -> Result<usize> {
        let leads = self.read(tab).await?;
        if leads.table.headers.is_empty() {
            return Ok(0);
        }
        let last_col = self.column(tab, leads.cols.last_call, "Last Call").await?;
        let next_col = self.column(tab, leads.cols.next_call, "Next Call").await?;

        let wanted: HashSet<String> = phones.iter().map(|p| to_ten_digit_key(p)).collect();
        let rows: Vec<usize> = leads
            .table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| wanted.contains(&leads.phone_key(r)))
            .map(|(i, _)| i)
            .collect();

        let stamp = today.format("%Y-%m-%d").to_string();
        let last: BTreeMap<usize, String> = rows.iter().map(|r| (*r, stamp.clone())).collect();
        let next: BTreeMap<usize, String> = rows.iter().map(|r| (*r, String::new())).collect();
        write_column_values(self.store.as_ref(), tab, last_col, &last).await?;
        write_column_values(self.store.as_ref(), tab, next_col, &next).await?;
        debug!(tab, rows = rows.len(), "Last Call stamped");
        Ok(rows.len())
    }

    /// Set `Next Call` from a phone → date map. Rows not in the map are untouched.
    pub async fn set_next_call(&self, tab: &str, dates: &HashMap<String, NaiveDate>) -> Result<usize> {
        if dates.is_empty() {
            return Ok(0);
        }
        let leads = self.read(tab).await?;
        if leads.table.headers.is_empty() {
            return Ok(0);
        }
        let col = self.column(tab, leads.cols.next_call, "Next Call").await?;

        let mut updates = BTreeMap::new();
        for (i, row) in leads.table.rows.iter().enumerate() {
            if let Some(d) = dates.get(&leads.phone_key(row)) {
                updates.insert(i, d.format("%Y-%m-%d").to_string());
            }
        }
        write_column_values(self.store.as_ref(), tab, col, &updates).await?;
        debug!(tab, rows = updates.len(), "Next Call dates written");
        Ok(updates.len())
    }

    /// Relabel the run marker of closed-out leads with their bucket label.
    pub async fn relabel_closed(&self, tab: &str, placed: &HashMap<String, Bucket>) -> Result<usize> {
        if placed.is_empty() {
            return Ok(0);
        }
        let leads = self.read(tab).await?;
        let Some(col) = leads.cols.run else {
            return Ok(0);
        };
        let mut updates = BTreeMap::new();
        for (i, row) in leads.table.rows.iter().enumerate() {
            if let Some(bucket) = placed.get(&leads.phone_key(row)) {
                if cell(row, Some(col)) != bucket.label() {
                    updates.insert(i, bucket.label().to_string());
                }
            }
        }
        write_column_values(self.store.as_ref(), tab, col, &updates).await?;
        if !updates.is_empty() {
            info!(tab, rows = updates.len(), "Closed leads relabelled");
        }
        Ok(updates.len())
    }
}
