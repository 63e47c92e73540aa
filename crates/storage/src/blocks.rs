use std::collections::BTreeMap;

use crate::error::StorageError;
use crate::table::TableStore;

/// Group row indices into `(start, len)` runs of consecutive rows.
/// Input order and duplicates don't matter.
pub fn contiguous_runs(rows: &[usize]) -> Vec<(usize, usize)> {
    let mut sorted: Vec<usize> = rows.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut runs = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return runs;
    };
    let (mut start, mut end) = (first, first);
    for r in iter {
        if r == end + 1 {
            end = r;
        } else {
            runs.push((start, end - start + 1));
            start = r;
            end = r;
        }
    }
    runs.push((start, end - start + 1));
    runs
}

/// Write one value per row into `col`, issuing one block write per contiguous run.
/// Returns the number of block writes.
pub async fn write_column_values(
    store: &dyn TableStore,
    tab: &str,
    col: usize,
    updates: &BTreeMap<usize, String>,
) -> Result<usize, StorageError> {
    let rows: Vec<usize> = updates.keys().copied().collect();
    let runs = contiguous_runs(&rows);
    for (start, len) in &runs {
        let values: Vec<String> = (*start..start + len)
            .filter_map(|r| updates.get(&r).cloned())
            .collect();
        store.write_column_block(tab, col, *start, &values).await?;
    }
    Ok(runs.len())
}

/// Write the same value into `col` for every listed row.
pub async fn fill_column(
    store: &dyn TableStore,
    tab: &str,
    col: usize,
    rows: &[usize],
    value: &str,
) -> Result<usize, StorageError> {
    let updates: BTreeMap<usize, String> = rows.iter().map(|r| (*r, value.to_string())).collect();
    write_column_values(store, tab, col, &updates).await
}
