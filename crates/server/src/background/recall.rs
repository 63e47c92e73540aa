//! Cron-driven recall sweep.
//!
//! Fire times are computed in the campaign's fixed UTC offset, so
//! `0 6 * * *` means 06:00 local.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tracing::{error, info, warn};

use callrun_core::Clock;
use callrun_results::RecallSweeper;

pub async fn run_recall_sweeps(sweeper: Arc<RecallSweeper>, clock: Arc<dyn Clock>, expr: String) {
    let schedule = match parse_cron(&expr) {
        Ok(s) => s,
        Err(e) => {
            error!(cron = %expr, error = %e, "Invalid recall sweep cron; sweeps disabled");
            return;
        }
    };
    info!(cron = %expr, "Recall sweep scheduler started");

    loop {
        let Some(next) = schedule.upcoming(clock.offset()).next() else {
            warn!(cron = %expr, "Recall sweep cron has no future fire time");
            return;
        };
        let wait = (next.with_timezone(&Utc) - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        match sweeper.sweep().await {
            Ok(report) => info!(
                recycled = report.recycled,
                tabs = ?report.tabs_scanned,
                "Recall sweep finished"
            ),
            Err(e) => warn!(error = %e, "Recall sweep failed"),
        }
    }
}

/// Parse a cron expression, accepting both 5-field and 6-field formats.
///
/// The `cron` crate expects 6+ fields (sec min hr dom mon dow), but users
/// typically write 5-field cron (min hr dom mon dow). We detect and adapt.
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};

    #[test]
    fn test_parse_cron_five_field_auto_prefix() {
        let schedule = parse_cron("0 6 * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn test_parse_cron_six_field() {
        let schedule = parse_cron("0 30 6 * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "06:30:00");
    }

    #[test]
    fn test_parse_cron_invalid() {
        assert!(parse_cron("every morning").is_err());
    }

    #[test]
    fn test_fire_time_is_local_to_offset() {
        let central = FixedOffset::west_opt(6 * 3600).unwrap();
        let next = parse_cron("0 6 * * *").unwrap().upcoming(central).next().unwrap();
        assert_eq!(next.hour(), 6);
        assert_eq!(next.with_timezone(&Utc).hour(), 12);
    }
}
