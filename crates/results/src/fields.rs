//! Outcome batch parsing and the canonical field → alias table.
//!
//! Webhook exports do not agree on column names (`Call Time`, `call_duration`,
//! `duration`, ...). Every consumer goes through [`OutcomeField`] instead of
//! looking headers up directly; aliases are compared in normalised form
//! (lowercase, `[a-z0-9]` only).

use callrun_core::header::HeaderIndex;
use callrun_core::phone::to_ten_digit_key;
use callrun_core::{CallRunError, Result};
use tracing::warn;

/// Canonical outcome fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeField {
    Date,
    FirstName,
    LastName,
    Phone,
    Address,
    City,
    InputState,
    StateGiven,
    Zip,
    InputEmail,
    EmailGiven,
    Accredited,
    Interested,
    NewInvestments,
    LiquidToInvest,
    PastExperience,
    Job,
    FollowUp,
    Summary,
    Quality,
    Recording,
    CallTime,
    CorrectName,
    /// Free-form call status; also carries `Run N` on some exports.
    Status,
    Dnc,
    DisconnectionReason,
    /// Run number as written by the caller, if any.
    Run,
}

impl OutcomeField {
    /// Accepted header spellings, most specific first.
    pub fn aliases(&self) -> &'static [&'static str] {
        use OutcomeField::*;
        match self {
            Date => &["date"],
            FirstName => &["firstname", "first"],
            LastName => &["lastname", "last"],
            Phone => &["phone", "phonenumber", "tonumber"],
            Address => &["address"],
            City => &["city"],
            InputState => &["inputstate", "stateinput"],
            StateGiven => &["stategiven", "state"],
            Zip => &["zip", "zipcode"],
            InputEmail => &["inputemail", "emailinput"],
            EmailGiven => &["emailgiven", "email", "emailprovided"],
            Accredited => &["accredited"],
            Interested => &["interested"],
            NewInvestments => &["newinvestments"],
            LiquidToInvest => &["liquidtoinvest", "liquid", "money"],
            PastExperience => &["pastexperience", "pastoil"],
            Job => &["job"],
            FollowUp => &["followup"],
            Summary => &["summary", "summery"],
            Quality => &["quality"],
            Recording => &["recording", "recordingurl"],
            CallTime => &["calltime", "callduration", "duration"],
            CorrectName => &["correctname"],
            Status => &["status"],
            Dnc => &["dnc", "donotcall"],
            DisconnectionReason => &["disconnectionreason", "reason"],
            Run => &["run", "runnumber"],
        }
    }
}

// ── Output layouts ────────────────────────────────────────────

/// What fills one column of a results or archive row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Field(OutcomeField),
    /// Canonical 10-digit phone.
    Phone,
    /// Run number, derived from the sent index first.
    Run,
    NextCallDate,
    Processed,
}

/// Header order of the bucket tabs.
pub const RESULTS_LAYOUT: [(&str, Column); 25] = [
    ("Date", Column::Field(OutcomeField::Date)),
    ("First Name", Column::Field(OutcomeField::FirstName)),
    ("Last Name", Column::Field(OutcomeField::LastName)),
    ("Phone", Column::Phone),
    ("Address", Column::Field(OutcomeField::Address)),
    ("City", Column::Field(OutcomeField::City)),
    ("Input State", Column::Field(OutcomeField::InputState)),
    ("State Given", Column::Field(OutcomeField::StateGiven)),
    ("Zip", Column::Field(OutcomeField::Zip)),
    ("Input Email", Column::Field(OutcomeField::InputEmail)),
    ("Email Given", Column::Field(OutcomeField::EmailGiven)),
    ("Accredited", Column::Field(OutcomeField::Accredited)),
    ("Interested", Column::Field(OutcomeField::Interested)),
    ("New Investments", Column::Field(OutcomeField::NewInvestments)),
    ("Liquid To Invest", Column::Field(OutcomeField::LiquidToInvest)),
    ("Job", Column::Field(OutcomeField::Job)),
    ("Follow Up", Column::Field(OutcomeField::FollowUp)),
    ("Summery", Column::Field(OutcomeField::Summary)),
    ("Quality", Column::Field(OutcomeField::Quality)),
    ("Recording", Column::Field(OutcomeField::Recording)),
    ("Call Time", Column::Field(OutcomeField::CallTime)),
    ("Correct Name", Column::Field(OutcomeField::CorrectName)),
    ("DNC", Column::Field(OutcomeField::Dnc)),
    ("Disconnection Reason", Column::Field(OutcomeField::DisconnectionReason)),
    ("Run", Column::Run),
];

/// Header order of the monthly archive tabs.
pub const ARCHIVE_LAYOUT: [(&str, Column); 28] = [
    ("Date", Column::Field(OutcomeField::Date)),
    ("First Name", Column::Field(OutcomeField::FirstName)),
    ("Last Name", Column::Field(OutcomeField::LastName)),
    ("Phone", Column::Phone),
    ("Address", Column::Field(OutcomeField::Address)),
    ("City", Column::Field(OutcomeField::City)),
    ("Input State", Column::Field(OutcomeField::InputState)),
    ("State Given", Column::Field(OutcomeField::StateGiven)),
    ("Zip", Column::Field(OutcomeField::Zip)),
    ("Input Email", Column::Field(OutcomeField::InputEmail)),
    ("Email Given", Column::Field(OutcomeField::EmailGiven)),
    ("Accredited", Column::Field(OutcomeField::Accredited)),
    ("Interested", Column::Field(OutcomeField::Interested)),
    ("New Investments", Column::Field(OutcomeField::NewInvestments)),
    ("Liquid To Invest", Column::Field(OutcomeField::LiquidToInvest)),
    ("Past Experience", Column::Field(OutcomeField::PastExperience)),
    ("Job", Column::Field(OutcomeField::Job)),
    ("Follow Up", Column::Field(OutcomeField::FollowUp)),
    ("Summary", Column::Field(OutcomeField::Summary)),
    ("Quality", Column::Field(OutcomeField::Quality)),
    ("Recording", Column::Field(OutcomeField::Recording)),
    ("Call Time", Column::Field(OutcomeField::CallTime)),
    ("Correct Name", Column::Field(OutcomeField::CorrectName)),
    ("DNC", Column::Field(OutcomeField::Dnc)),
    ("Disconnection Reason", Column::Field(OutcomeField::DisconnectionReason)),
    ("Run", Column::Run),
    ("Next Call Date", Column::NextCallDate),
    ("Processed", Column::Processed),
];

pub fn layout_headers(layout: &[(&str, Column)]) -> Vec<String> {
    layout.iter().map(|(h, _)| h.to_string()).collect()
}

// ── Batch ─────────────────────────────────────────────────────

/// Parsed outcome CSV.
#[derive(Debug, Clone, Default)]
pub struct OutcomeBatch {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    index: HeaderIndex,
}

impl OutcomeBatch {
    /// Parse a CSV export. Blank lines are dropped and a UTF-8 BOM on the
    /// first header is ignored; ragged rows are accepted. Fields that are not
    /// valid UTF-8 are decoded lossily and records the reader cannot split
    /// are skipped, so one bad row never costs the rest of the batch.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);
        let mut headers: Vec<String> = reader
            .byte_headers()
            .map_err(|e| CallRunError::Validation(format!("unreadable outcome header: {e}")))?
            .iter()
            .map(lossy)
            .collect();
        if let Some(first) = headers.first_mut() {
            *first = first.trim_start_matches('\u{feff}').to_string();
        }

        let mut rows = Vec::new();
        for (n, record) in reader.byte_records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(record = n + 1, error = %e, "Skipping unreadable outcome row");
                    continue;
                }
            };
            let row: Vec<String> = record.iter().map(lossy).collect();
            if row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            rows.push(row);
        }
        Ok(Self::new(headers, rows))
    }

    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let index = HeaderIndex::normalized(&headers);
        Self { headers, rows, index }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = OutcomeRow<'_>> {
        self.rows.iter().map(|row| OutcomeRow { row, index: &self.index })
    }
}

fn lossy(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

/// One outcome row viewed through the alias table.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeRow<'a> {
    row: &'a [String],
    index: &'a HeaderIndex,
}

impl<'a> OutcomeRow<'a> {
    pub fn new(row: &'a [String], index: &'a HeaderIndex) -> Self {
        Self { row, index }
    }

    /// First non-empty value among the field's aliases, trimmed; `""` when absent.
    pub fn get(&self, field: OutcomeField) -> &'a str {
        field
            .aliases()
            .iter()
            .filter_map(|alias| self.index.get(alias))
            .filter_map(|col| self.row.get(col))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .unwrap_or("")
    }

    /// First non-empty value across several fields.
    pub fn first_of(&self, fields: &[OutcomeField]) -> &'a str {
        fields.iter().map(|f| self.get(*f)).find(|v| !v.is_empty()).unwrap_or("")
    }

    pub fn phone_key(&self) -> String {
        to_ten_digit_key(self.get(OutcomeField::Phone))
    }

    /// Call duration in seconds; 0 when missing or unparsable.
    pub fn call_seconds(&self) -> f64 {
        self.get(OutcomeField::CallTime).parse::<f64>().unwrap_or(0.0)
    }

    /// Run number as digits: the sent-index tag first, then a run column,
    /// then a status reading `Run N`.
    pub fn derive_run(&self, sent_tag: Option<&str>) -> String {
        if let Some(n) = sent_tag.and_then(first_number) {
            return n;
        }
        let raw = self.get(OutcomeField::Run);
        if !raw.is_empty() {
            return first_number(raw).unwrap_or_else(|| raw.to_string());
        }
        run_from_status(self.get(OutcomeField::Status)).unwrap_or_default()
    }
}

/// First run of ASCII digits in `s`.
pub fn first_number(s: &str) -> Option<String> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let digits: String = s[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    Some(digits)
}

/// `"Run 3"`, `"run3"` → `"3"`.
fn run_from_status(status: &str) -> Option<String> {
    let lower = status.to_ascii_lowercase();
    let at = lower.find("run")?;
    let rest = lower[at + 3..].trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty()).then_some(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(csv: &str) -> OutcomeBatch {
        OutcomeBatch::parse(csv.as_bytes()).unwrap()
    }

    #[test]
    fn parses_quoted_cells_and_skips_blank_lines() {
        let b = batch("\u{feff}Phone,Summary\n2145550182,\"said no, twice\"\n,\n");
        assert_eq!(b.headers[0], "Phone");
        assert_eq!(b.len(), 1);
        let row = b.iter().next().unwrap();
        assert_eq!(row.get(OutcomeField::Summary), "said no, twice");
    }

    #[test]
    fn invalid_utf8_row_is_kept_lossily() {
        let mut bytes = b"to_number,summary\n2145550110,ok\n2145550111,caf".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"\n2145550112,fine\n");
        let b = OutcomeBatch::parse(&bytes).unwrap();
        assert_eq!(b.len(), 3);
        let phones: Vec<String> = b.iter().map(|r| r.phone_key()).collect();
        assert_eq!(phones, vec!["2145550110", "2145550111", "2145550112"]);
        assert!(b.rows[1][1].starts_with("caf"));
    }

    #[test]
    fn aliases_pick_first_non_empty() {
        let b = batch("call_duration,duration,to_number\n,45,+1 (214) 555-0182\n");
        let row = b.iter().next().unwrap();
        assert_eq!(row.get(OutcomeField::CallTime), "45");
        assert_eq!(row.call_seconds(), 45.0);
        assert_eq!(row.phone_key(), "2145550182");
        assert_eq!(row.get(OutcomeField::Job), "");
    }

    #[test]
    fn misspelled_summary_header_is_accepted() {
        let b = batch("Summery\nnot interested\n");
        let row = b.iter().next().unwrap();
        assert_eq!(row.get(OutcomeField::Summary), "not interested");
    }

    #[test]
    fn run_prefers_sent_index_then_column_then_status() {
        let b = batch("run_number,status,job\n4,Run 6,\n,run 7,\n,,clerk\n");
        let rows: Vec<_> = b.iter().collect();
        assert_eq!(rows[0].derive_run(Some("Run 2")), "2");
        assert_eq!(rows[0].derive_run(None), "4");
        assert_eq!(rows[1].derive_run(None), "7");
        assert_eq!(rows[2].derive_run(None), "");
    }

    #[test]
    fn layouts_end_with_run_and_processed() {
        assert_eq!(RESULTS_LAYOUT.last().unwrap().0, "Run");
        assert_eq!(ARCHIVE_LAYOUT.last().unwrap().0, "Processed");
        assert_eq!(layout_headers(&ARCHIVE_LAYOUT).len(), 28);
    }
}
