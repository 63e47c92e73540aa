use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, Timelike, Utc};

/// Source of "now" for everything that stamps dates or checks windows.
///
/// The campaign's calendar day is derived from a fixed UTC offset, so
/// `today()` can differ from the UTC date near midnight.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn offset(&self) -> FixedOffset;

    fn local_now(&self) -> NaiveDateTime {
        self.now().with_timezone(&self.offset()).naive_local()
    }

    fn today(&self) -> NaiveDate {
        self.local_now().date()
    }
}

fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| {
        tracing::warn!(minutes, "UTC offset out of range, using UTC");
        Utc.fix()
    })
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self { offset: offset_from_minutes(utc_offset_minutes) }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Clock pinned to an instant; `advance` moves it forward. Used by tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, utc_offset_minutes: i32) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
            offset: offset_from_minutes(utc_offset_minutes),
        }
    }

    /// Clock whose local wall time is `local` at the given offset.
    pub fn at_local(local: NaiveDateTime, utc_offset_minutes: i32) -> Self {
        let utc = local - Duration::minutes(utc_offset_minutes as i64);
        Self::new(DateTime::from_naive_utc_and_offset(utc, Utc), utc_offset_minutes)
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|p| *p.into_inner())
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

// ── Call window ───────────────────────────────────────────────

/// Local hours during which outbound runs may start: `[start_hour, end_hour)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for CallWindow {
    fn default() -> Self {
        Self { start_hour: 7, end_hour: 20 }
    }
}

impl CallWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self { start_hour, end_hour }
    }

    pub fn contains(&self, local: NaiveDateTime) -> bool {
        let h = local.hour();
        h >= self.start_hour && h < self.end_hour
    }

    /// Minutes until the window next opens; 0 when it is open now.
    pub fn minutes_until_open(&self, local: NaiveDateTime) -> i64 {
        if self.contains(local) {
            return 0;
        }
        let today_open = local
            .date()
            .and_hms_opt(self.start_hour, 0, 0)
            .unwrap_or(local);
        let next_open = if local < today_open {
            today_open
        } else {
            today_open + Duration::days(1)
        };
        let mins = (next_open - local).num_seconds().max(0);
        // Round partial minutes up so "0" only ever means open.
        (mins + 59) / 60
    }

    /// Time left before the window closes; `None` while it is closed.
    pub fn until_close(&self, local: NaiveDateTime) -> Option<std::time::Duration> {
        if !self.contains(local) {
            return None;
        }
        let close = local.date().and_hms_opt(0, 0, 0)? + Duration::hours(i64::from(self.end_hour));
        (close - local).to_std().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn today_follows_offset_not_utc() {
        // 03:00 UTC on the 11th is still the 10th at UTC-6.
        let utc = DateTime::parse_from_rfc3339("2024-01-11T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = FixedClock::new(utc, -360);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }

    #[test]
    fn at_local_round_trips() {
        let clock = FixedClock::at_local(local(2024, 3, 4, 9, 30), -360);
        assert_eq!(clock.local_now(), local(2024, 3, 4, 9, 30));
    }

    #[test]
    fn until_close_counts_down_to_end_hour() {
        let w = CallWindow::default();
        assert_eq!(
            w.until_close(local(2024, 1, 1, 19, 59)),
            Some(std::time::Duration::from_secs(60))
        );
        assert_eq!(w.until_close(local(2024, 1, 1, 20, 0)), None);
    }

    #[test]
    fn window_open_and_closed() {
        let w = CallWindow::default();
        assert!(w.contains(local(2024, 1, 1, 7, 0)));
        assert!(w.contains(local(2024, 1, 1, 19, 59)));
        assert!(!w.contains(local(2024, 1, 1, 20, 0)));
        assert!(!w.contains(local(2024, 1, 1, 6, 59)));
    }

    #[test]
    fn minutes_until_open() {
        let w = CallWindow::default();
        assert_eq!(w.minutes_until_open(local(2024, 1, 1, 12, 0)), 0);
        assert_eq!(w.minutes_until_open(local(2024, 1, 1, 6, 30)), 30);
        assert_eq!(w.minutes_until_open(local(2024, 1, 1, 21, 0)), 10 * 60);
    }
}
