use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use callrun_core::config::MAX_PER_RUN_CEILING;
use callrun_core::header::cell;
use callrun_core::lead::run_tag;
use callrun_core::phone::{is_dialable, to_e164, to_ten_digit_key};
use callrun_core::{Result, RowRef, RunMarker, RunTask};

use crate::leads::{LeadSheet, LeadTable};

/// Tasks picked for one run, in row order, with the rows they came from.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub tasks: Vec<RunTask>,
    pub rows: Vec<RowRef>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Keep only the first `n`.
    pub fn truncate(&mut self, n: usize) {
        self.tasks.truncate(n);
        self.rows.truncate(n);
    }
}

/// Picks the rows eligible for a run number.
#[derive(Clone)]
pub struct RunSelector {
    leads: LeadSheet,
}

impl RunSelector {
    pub fn new(leads: LeadSheet) -> Self {
        Self { leads }
    }

    /// Scan `tab` top to bottom and collect at most `cap` tasks for `run`,
    /// one per phone. The cap is clamped to the hard per-run ceiling.
    pub async fn select(&self, tab: &str, run: u8, cap: usize, agent_id: &str) -> Result<Selection> {
        let leads = self.leads.read(tab).await?;
        let selection = select_from(&leads, run, cap, agent_id);
        debug!(tab, run, cap, selected = selection.len(), "Run selection");
        Ok(selection)
    }
}

/// Pure selection over an already-read lead tab.
pub fn select_from(leads: &LeadTable, run: u8, cap: usize, agent_id: &str) -> Selection {
    let cap = cap.min(MAX_PER_RUN_CEILING);
    let cols = &leads.cols;
    let mut out = Selection::default();
    let mut seen = HashSet::new();

    for (i, row) in leads.table.rows.iter().enumerate() {
        if out.len() >= cap {
            break;
        }
        let marker = RunMarker::parse(cell(row, cols.run));
        if !marker.eligible_for(run) {
            continue;
        }
        let raw_phone = cell(row, cols.phone);
        if !is_dialable(raw_phone) {
            continue;
        }
        let e164 = to_e164(raw_phone);
        if e164.is_empty() {
            continue;
        }
        let key = to_ten_digit_key(raw_phone);
        if !seen.insert(key.clone()) {
            continue;
        }

        let mut vars = BTreeMap::new();
        vars.insert("run".to_string(), run_tag(run));
        vars.insert("first_name".to_string(), cell(row, cols.first_name).to_string());
        vars.insert("last_name".to_string(), cell(row, cols.last_name).to_string());
        vars.insert("address".to_string(), cell(row, cols.address).to_string());
        vars.insert("city".to_string(), cell(row, cols.city).to_string());
        vars.insert("state".to_string(), cell(row, cols.state).to_string());
        vars.insert("zip".to_string(), cell(row, cols.zip).to_string());
        vars.insert("email".to_string(), cell(row, cols.email).to_string());

        out.tasks.push(RunTask {
            to_number: e164,
            agent_id: agent_id.to_string(),
            dynamic_variables: vars,
        });
        out.rows.push(RowRef {
            row: i,
            phone: key,
        });
    }
    out
}
