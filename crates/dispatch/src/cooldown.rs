use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use callrun_core::lead::tabs;
use callrun_core::{CallRunError, Clock, Result};
use callrun_storage::{Settings, TableStore};

/// User-triggered actions that are rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownKind {
    Send,
    Ingest,
}

impl CooldownKind {
    fn key(&self) -> &'static str {
        match self {
            CooldownKind::Send => "send",
            CooldownKind::Ingest => "ingest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CooldownStatus {
    pub send_remaining_secs: u64,
    pub ingest_remaining_secs: u64,
}

/// Last-use timestamps kept in the `_RateLimit` tab.
#[derive(Clone)]
pub struct Cooldowns {
    settings: Settings,
    clock: Arc<dyn Clock>,
    send_minutes: u64,
    ingest_minutes: u64,
}

impl Cooldowns {
    pub fn new(
        store: Arc<dyn TableStore>,
        clock: Arc<dyn Clock>,
        send_minutes: u64,
        ingest_minutes: u64,
    ) -> Self {
        Self {
            settings: Settings::new(store, tabs::RATE_LIMIT),
            clock,
            send_minutes,
            ingest_minutes,
        }
    }

    fn window(&self, kind: CooldownKind) -> Duration {
        let minutes = match kind {
            CooldownKind::Send => self.send_minutes,
            CooldownKind::Ingest => self.ingest_minutes,
        };
        Duration::minutes(minutes as i64)
    }

    async fn last_used(&self, kind: CooldownKind) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .settings
            .get(kind.key())
            .await?
            .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    /// Seconds until `kind` may be used again; 0 when free.
    pub async fn remaining_secs(&self, kind: CooldownKind) -> Result<u64> {
        let Some(last) = self.last_used(kind).await? else {
            return Ok(0);
        };
        let ready_at = last + self.window(kind);
        let left = (ready_at - self.clock.now()).num_seconds();
        Ok(left.max(0) as u64)
    }

    pub async fn check(&self, kind: CooldownKind) -> Result<()> {
        let remaining_secs = self.remaining_secs(kind).await?;
        if remaining_secs > 0 {
            return Err(CallRunError::CoolingDown { remaining_secs });
        }
        Ok(())
    }

    pub async fn mark(&self, kind: CooldownKind) -> Result<()> {
        let now = self.clock.now().to_rfc3339();
        self.settings.set(kind.key(), &now).await?;
        debug!(kind = kind.key(), at = %now, "Cooldown marked");
        Ok(())
    }

    pub async fn status(&self) -> Result<CooldownStatus> {
        Ok(CooldownStatus {
            send_remaining_secs: self.remaining_secs(CooldownKind::Send).await?,
            ingest_remaining_secs: self.remaining_secs(CooldownKind::Ingest).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callrun_core::FixedClock;
    use callrun_storage::MemoryTableStore;

    #[tokio::test]
    async fn send_cooldown_expires() {
        let clock = Arc::new(FixedClock::new(Utc::now(), -360));
        let cd = Cooldowns::new(Arc::new(MemoryTableStore::new()), clock.clone(), 21, 20);

        cd.check(CooldownKind::Send).await.unwrap();
        cd.mark(CooldownKind::Send).await.unwrap();

        let err = cd.check(CooldownKind::Send).await.unwrap_err();
        assert!(matches!(err, CallRunError::CoolingDown { remaining_secs } if remaining_secs == 21 * 60));
        cd.check(CooldownKind::Ingest).await.unwrap();

        clock.advance(Duration::minutes(21));
        cd.check(CooldownKind::Send).await.unwrap();
    }

    #[tokio::test]
    async fn status_reports_both() {
        let clock = Arc::new(FixedClock::new(Utc::now(), -360));
        let cd = Cooldowns::new(Arc::new(MemoryTableStore::new()), clock.clone(), 21, 20);
        cd.mark(CooldownKind::Ingest).await.unwrap();
        clock.advance(Duration::minutes(5));

        let s = cd.status().await.unwrap();
        assert_eq!(s.send_remaining_secs, 0);
        assert_eq!(s.ingest_remaining_secs, 15 * 60);
    }
}
