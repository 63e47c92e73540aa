//! Recall scheduling: when an unclassified lead should be called again, and
//! the daily sweep that moves due leads back into the `Recycle` tab.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info};

use callrun_core::header::{cell, HeaderIndex};
use callrun_core::lead::{next_run, run_tag, tabs};
use callrun_core::phone::to_ten_digit_key;
use callrun_core::{Clock, Result};
use callrun_storage::table::to_strings;
use callrun_storage::{write_column_values, Settings, TableStore};

use crate::archive::{archive_tab_name, MonthlyArchive};
use crate::fields::{first_number, OutcomeField, OutcomeRow};

pub const DEFAULT_NO_ANSWER_DAYS: i64 = 5;
pub const DEFAULT_ANSWERED_DAYS: i64 = 30;

const NO_ANSWER_DAYS_KEY: &str = "recall_no_answer_days";
const ANSWERED_DAYS_KEY: &str = "recall_answered_days";

const NO_ANSWER_KEYS: [&str; 8] = [
    "dial_no_answer",
    "no_answer",
    "busy",
    "voicemail",
    "vm",
    "ringout",
    "not_available",
    "ivr",
];

const LATER_KEYS: [&str; 7] = [
    "later",
    "call back",
    "follow up",
    "not now",
    "vacation",
    "busy later",
    "check back",
];

/// Column order of the `Recycle` tab.
pub const RECYCLE_HEADERS: [&str; 9] = [
    "First Name", "Last Name", "Phone", "Address", "City", "State", "Zip", "Email", "Run",
];

// ── Recall days ───────────────────────────────────────────────

/// Days until the next attempt, by outcome class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecallDays {
    pub no_answer: i64,
    pub answered: i64,
}

impl Default for RecallDays {
    fn default() -> Self {
        Self {
            no_answer: DEFAULT_NO_ANSWER_DAYS,
            answered: DEFAULT_ANSWERED_DAYS,
        }
    }
}

impl RecallDays {
    /// Read overrides from the settings tab. Each value falls back through
    /// primary → secondary → legacy → default; zero or unparsable values
    /// count as unset.
    pub async fn load(settings: &Settings) -> Result<Self> {
        Ok(Self {
            no_answer: first_positive(settings, NO_ANSWER_DAYS_KEY)
                .await?
                .unwrap_or(DEFAULT_NO_ANSWER_DAYS),
            answered: first_positive(settings, ANSWERED_DAYS_KEY)
                .await?
                .unwrap_or(DEFAULT_ANSWERED_DAYS),
        })
    }

    /// Write the primary overrides. Zero stores an unset value, so the next
    /// load falls back past it.
    pub async fn save(settings: &Settings, no_answer: u32, answered: u32) -> Result<Self> {
        settings.set(NO_ANSWER_DAYS_KEY, &no_answer.to_string()).await?;
        settings.set(ANSWERED_DAYS_KEY, &answered.to_string()).await?;
        let days = Self::load(settings).await?;
        info!(no_answer = days.no_answer, answered = days.answered, "Recall days updated");
        Ok(days)
    }
}

async fn first_positive(settings: &Settings, base: &str) -> Result<Option<i64>> {
    for key in [
        base.to_string(),
        format!("{base}_secondary"),
        format!("{base}_legacy"),
    ] {
        if let Some(v) = settings.get_i64(&key).await?.filter(|v| *v > 0) {
            return Ok(Some(v));
        }
    }
    Ok(None)
}

// ── Next call date ────────────────────────────────────────────

/// Dates as they show up in exports and archives.
pub fn parse_row_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(s, "%m/%d/%Y").ok()
}

/// When to call this lead again, or `None` for never (DNC).
///
/// `today` is the base when the row carries no usable date.
pub fn compute_next_call_date(row: &OutcomeRow<'_>, days: RecallDays, today: NaiveDate) -> Option<NaiveDate> {
    if row.get(OutcomeField::Dnc).eq_ignore_ascii_case("true") {
        return None;
    }
    let base = parse_row_date(row.get(OutcomeField::Date)).unwrap_or(today);
    let reason = row.get(OutcomeField::DisconnectionReason).to_lowercase();
    let status = row
        .first_of(&[OutcomeField::CorrectName, OutcomeField::Status])
        .to_lowercase();

    let wait = if NO_ANSWER_KEYS.iter().any(|k| reason.contains(k)) {
        days.no_answer
    } else if LATER_KEYS.iter().any(|k| status.contains(k)) {
        days.answered
    } else if row.call_seconds() > 0.0 {
        days.answered
    } else {
        days.no_answer
    };
    Some(base + Duration::days(wait))
}

// ── Sweep ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub tabs_scanned: Vec<String>,
    pub recycled: usize,
}

/// Moves archive rows whose recall date has come into `Recycle`.
pub struct RecallSweeper {
    archive: MonthlyArchive,
    outbound: Arc<dyn TableStore>,
    clock: Arc<dyn Clock>,
}

impl RecallSweeper {
    pub fn new(archive: Arc<dyn TableStore>, outbound: Arc<dyn TableStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            archive: MonthlyArchive::new(archive),
            outbound,
            clock,
        }
    }

    /// Sweep this month's and last month's archive tabs. Rows already marked
    /// processed are skipped, so a second sweep recycles nothing.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let today = self.clock.today();
        let mut report = SweepReport::default();
        for tab in sweep_tabs(today) {
            if self.archive.store().read_table(&tab).await?.is_none() {
                continue;
            }
            report.recycled += self.sweep_tab(&tab, today).await?;
            report.tabs_scanned.push(tab);
        }
        info!(
            recycled = report.recycled,
            tabs = report.tabs_scanned.len(),
            "Recall sweep finished"
        );
        Ok(report)
    }

    async fn sweep_tab(&self, tab: &str, today: NaiveDate) -> Result<usize> {
        let table = self.archive.ensure(tab).await?;
        let idx = HeaderIndex::normalized(&table.headers);
        let col = |name: &str| idx.get(name);
        let (next, processed) = (col("Next Call Date"), col("Processed"));
        let Some(processed_col) = processed else {
            return Ok(0);
        };

        let mut recycle = Vec::new();
        let mut marks = BTreeMap::new();
        let stamp = format!("Recycled {}", today.format("%Y-%m-%d"));
        for (i, row) in table.rows.iter().enumerate() {
            if !cell(row, processed).is_empty() {
                continue;
            }
            let Some(due) = parse_row_date(cell(row, next)) else {
                continue;
            };
            if due > today {
                continue;
            }
            let run = first_number(cell(row, col("Run")))
                .and_then(|n| n.parse::<u8>().ok())
                .unwrap_or(1);
            let state = match cell(row, col("State Given")) {
                "" => cell(row, col("Input State")),
                given => given,
            };
            recycle.push(vec![
                cell(row, col("First Name")).to_string(),
                cell(row, col("Last Name")).to_string(),
                to_ten_digit_key(cell(row, col("Phone"))),
                cell(row, col("Address")).to_string(),
                cell(row, col("City")).to_string(),
                state.to_string(),
                cell(row, col("Zip")).to_string(),
                cell(row, col("Input Email")).to_string(),
                run_tag(next_run(run)),
            ]);
            marks.insert(i, stamp.clone());
        }

        if recycle.is_empty() {
            debug!(tab, "No due recalls");
            return Ok(0);
        }
        self.outbound
            .ensure_headers(tabs::RECYCLE, &to_strings(&RECYCLE_HEADERS))
            .await?;
        self.outbound.append_rows(tabs::RECYCLE, &recycle).await?;
        write_column_values(self.archive.store().as_ref(), tab, processed_col, &marks).await?;
        info!(tab, recycled = recycle.len(), "Due recalls moved to Recycle");
        Ok(recycle.len())
    }
}

/// Current and previous month's archive tab names.
fn sweep_tabs(today: NaiveDate) -> Vec<String> {
    let first = today.with_day0(0).unwrap_or(today);
    let previous = first.pred_opt().unwrap_or(first);
    vec![archive_tab_name(today), archive_tab_name(previous)]
}
