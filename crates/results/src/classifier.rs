use std::collections::HashSet;

use serde::Serialize;

use callrun_core::header::HeaderIndex;
use callrun_core::phone::to_ten_digit_key;
use callrun_core::{Bucket, Result};
use callrun_storage::TableStore;

use crate::fields::{OutcomeField, OutcomeRow};

const BAD_DISCONNECT_REASONS: [&str; 5] = [
    "max_duration_reached",
    "dial_failed",
    "error_no_audio_received",
    "dial_busy",
    "invalid_destination",
];

const BAD_NAME_PHRASES: [&str; 6] = [
    "wrong number",
    "phone directory / ivr",
    "gatekeeper",
    "fax line",
    "voicemail - wrong name",
    "disconnected number",
];

const POSITIVE_TOKENS: [&str; 4] = ["yes", "true", "y", "1"];

/// Liquidity answers that rule out "for later".
const LIQUID_TOKENS: [&str; 5] = ["yes", "true", "y", "1", "false"];

const PROSPECT_REACHED: &str = "prospect reached";

/// Result of classifying one outcome row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Disposition {
    Terminal(Bucket),
    /// Left for recall scheduling.
    Unclassified,
}

impl Disposition {
    pub fn bucket(&self) -> Option<Bucket> {
        match self {
            Disposition::Terminal(b) => Some(*b),
            Disposition::Unclassified => None,
        }
    }
}

/// Phones already sitting in the Bad and Not Interested tabs.
#[derive(Debug, Clone, Default)]
pub struct ClassifierLists {
    pub bad: HashSet<String>,
    pub not_interested: HashSet<String>,
}

impl ClassifierLists {
    pub async fn load(results: &dyn TableStore) -> Result<Self> {
        Ok(Self {
            bad: phone_set(results, Bucket::BadLeads.label()).await?,
            not_interested: phone_set(results, Bucket::NotInterestedLeads.label()).await?,
        })
    }
}

async fn phone_set(store: &dyn TableStore, tab: &str) -> Result<HashSet<String>> {
    let Some(table) = store.read_table(tab).await? else {
        return Ok(HashSet::new());
    };
    let Some(col) = HeaderIndex::normalized(&table.headers).get("phone") else {
        return Ok(HashSet::new());
    };
    Ok(table
        .rows
        .iter()
        .filter_map(|r| r.get(col))
        .map(|p| to_ten_digit_key(p))
        .filter(|p| !p.is_empty())
        .collect())
}

/// Trim, lowercase, collapse inner whitespace.
fn norm(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalised view of the fields the cascade looks at.
struct Signals {
    disconnection_reason: String,
    correct_name: String,
    call_seconds: f64,
    quality: String,
    interested: String,
    liquid_to_invest: String,
    new_investments: String,
    email_given: bool,
    summary: String,
}

impl Signals {
    fn from_row(row: &OutcomeRow<'_>) -> Self {
        Self {
            disconnection_reason: norm(row.get(OutcomeField::DisconnectionReason)),
            correct_name: norm(row.get(OutcomeField::CorrectName)),
            call_seconds: row.call_seconds(),
            quality: norm(row.get(OutcomeField::Quality)),
            interested: norm(row.get(OutcomeField::Interested)),
            liquid_to_invest: norm(row.get(OutcomeField::LiquidToInvest)),
            new_investments: norm(row.get(OutcomeField::NewInvestments)),
            email_given: !row.get(OutcomeField::EmailGiven).is_empty(),
            summary: norm(row.get(OutcomeField::Summary)),
        }
    }

    fn is_bad(&self) -> bool {
        BAD_DISCONNECT_REASONS.contains(&self.disconnection_reason.as_str())
            || BAD_NAME_PHRASES.iter().any(|p| self.correct_name.contains(p))
    }

    fn interested(&self) -> bool {
        POSITIVE_TOKENS.contains(&self.interested.as_str())
    }

    /// Prospect reached, talked over 30s, usable recording, said yes.
    fn qualified(&self) -> bool {
        self.correct_name.contains(PROSPECT_REACHED)
            && self.call_seconds > 30.0
            && matches!(self.quality.as_str(), "good" | "unsure")
            && self.interested()
    }
}

/// Place one row into exactly one disposition. First matching rule wins.
pub fn classify(row: &OutcomeRow<'_>, lists: &ClassifierLists) -> Disposition {
    let phone = row.phone_key();
    if !phone.is_empty() {
        if lists.bad.contains(&phone) {
            return Disposition::Terminal(Bucket::BadLeads);
        }
        if lists.not_interested.contains(&phone) {
            return Disposition::Terminal(Bucket::NotInterestedLeads);
        }
    }

    let s = Signals::from_row(row);
    if s.is_bad() {
        return Disposition::Terminal(Bucket::BadLeads);
    }
    if s.qualified()
        && !LIQUID_TOKENS.contains(&s.liquid_to_invest.as_str())
        && (s.new_investments.contains("later") || s.email_given)
    {
        return Disposition::Terminal(Bucket::GoodLeadsForLater);
    }
    if s.qualified() && (s.new_investments == "now" || s.email_given) {
        return Disposition::Terminal(Bucket::GoodLeads);
    }
    if s.call_seconds > 20.0
        && s.correct_name.contains(PROSPECT_REACHED)
        && !s.new_investments.contains("later")
        && !s.new_investments.contains("now")
        && !s.email_given
        && (!s.interested() || s.summary.contains("not interested"))
    {
        return Disposition::Terminal(Bucket::NotInterestedLeads);
    }
    Disposition::Unclassified
}
