use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest value a run marker can reach; leads parked here are never selected.
pub const MAX_RUN: u8 = 9;

/// Tab names shared across crates.
pub mod tabs {
    pub const OUTBOUND_LEADS: &str = "Outbound Leads";
    pub const RECYCLE: &str = "Recycle";
    pub const CREDIT_SETTINGS: &str = "Credit";
    pub const CREDIT_LEDGER: &str = "Credit Ledger";
    pub const SENT_INDEX: &str = "_Sent Index";
    pub const RATE_LIMIT: &str = "_RateLimit";
}

/// Column order for lead tabs (`Outbound Leads`).
pub const LEAD_HEADERS: [&str; 11] = [
    "First Name", "Last Name", "Phone", "Address", "City", "State", "Zip", "Email", "Run",
    "Last Call", "Next Call",
];

// ── Buckets ───────────────────────────────────────────────────

/// Terminal outcome classification; the label doubles as the results tab name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bucket {
    GoodLeads,
    GoodLeadsForLater,
    BadLeads,
    NotInterestedLeads,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::GoodLeads,
        Bucket::GoodLeadsForLater,
        Bucket::BadLeads,
        Bucket::NotInterestedLeads,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Bucket::GoodLeads => "Good Leads",
            Bucket::GoodLeadsForLater => "Good Leads For Later",
            Bucket::BadLeads => "Bad Leads",
            Bucket::NotInterestedLeads => "Not Interested Leads",
        }
    }

    pub fn from_label(s: &str) -> Option<Bucket> {
        let s = s.trim();
        Bucket::ALL
            .into_iter()
            .find(|b| b.label().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Run marker ────────────────────────────────────────────────

/// Value of a lead's `Run` cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMarker {
    Blank,
    Run(u8),
    Terminal(Bucket),
    /// Anything else; never eligible.
    Unknown(String),
}

impl RunMarker {
    /// Accepts `""`, `"3"`, `"Run 3"`, `"run3"` and bucket labels.
    pub fn parse(raw: &str) -> RunMarker {
        let s = raw.trim();
        if s.is_empty() {
            return RunMarker::Blank;
        }
        if let Some(b) = Bucket::from_label(s) {
            return RunMarker::Terminal(b);
        }
        let lower = s.to_ascii_lowercase();
        let num = lower.strip_prefix("run").map(str::trim).unwrap_or(&lower);
        match num.parse::<u8>() {
            Ok(n) if (1..=MAX_RUN).contains(&n) => RunMarker::Run(n),
            _ => RunMarker::Unknown(s.to_string()),
        }
    }

    /// Run 1 takes blank or 1; run N>1 takes exactly N.
    pub fn eligible_for(&self, run: u8) -> bool {
        match self {
            RunMarker::Blank => run == 1,
            RunMarker::Run(n) => *n == run,
            RunMarker::Terminal(_) | RunMarker::Unknown(_) => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunMarker::Terminal(_))
    }

    /// Numeric run, treating blank as run 1.
    pub fn as_run(&self) -> Option<u8> {
        match self {
            RunMarker::Blank => Some(1),
            RunMarker::Run(n) => Some(*n),
            _ => None,
        }
    }
}

/// Marker value after a successful attempt of `run`.
pub fn next_run(run: u8) -> u8 {
    run.saturating_add(1).min(MAX_RUN)
}

/// `"Run N"` tag used in the sent index, archives and the recycle tab.
pub fn run_tag(run: u8) -> String {
    format!("Run {run}")
}

// ── Dispatch task ─────────────────────────────────────────────

/// One call request handed to the dispatch endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTask {
    /// E.164.
    pub to_number: String,
    pub agent_id: String,
    #[serde(rename = "retell_llm_dynamic_variables")]
    pub dynamic_variables: BTreeMap<String, String>,
}

/// Lead row a task was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRef {
    /// 0-based data-row index in the source tab.
    pub row: usize,
    /// 10-digit key.
    pub phone: String,
}

// ── Audit records ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentIndexEntry {
    pub phone: String,
    pub run_tag: String,
    pub batch_time: String,
}

impl SentIndexEntry {
    pub const HEADERS: [&'static str; 3] = ["Phone", "Run", "BatchTime"];

    pub fn to_row(&self) -> Vec<String> {
        vec![self.phone.clone(), self.run_tag.clone(), self.batch_time.clone()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub date: String,
    pub calls_sent: u64,
    pub credits_refunded: u64,
}

impl CreditLedgerEntry {
    pub const HEADERS: [&'static str; 3] = ["Date", "Calls Sent", "Credits Refunded"];

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.date.clone(),
            self.calls_sent.to_string(),
            self.credits_refunded.to_string(),
        ]
    }
}

/// `yyyy-MM-dd HH:mm:ss` in campaign-local time, the stamp used on ledger and index rows.
pub fn format_stamp(at: DateTime<Utc>, offset: chrono::FixedOffset) -> String {
    at.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string()
}
