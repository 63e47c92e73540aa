use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use callrun_core::lead::tabs;
use callrun_core::{Clock, Result};
use callrun_storage::{Settings, TableStore};

const STARTED_KEY: &str = "poll_started_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeaseState {
    Inactive,
    Active { remaining_secs: u64 },
    Expired,
}

/// Bounded lifetime for result polling after a send run.
///
/// `start` records the start time; the poller checks `state` on every tick
/// and releases the lease once it has been held longer than the limit.
#[derive(Clone)]
pub struct PollLease {
    settings: Settings,
    clock: Arc<dyn Clock>,
    limit: Duration,
}

impl PollLease {
    pub fn new(store: Arc<dyn TableStore>, clock: Arc<dyn Clock>, limit_minutes: u64) -> Self {
        Self {
            settings: Settings::new(store, tabs::RATE_LIMIT),
            clock,
            limit: Duration::minutes(limit_minutes as i64),
        }
    }

    /// Start (or restart) the lease from now.
    pub async fn start(&self) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        self.settings.set(STARTED_KEY, &now.to_rfc3339()).await?;
        info!(
            started_at = %now,
            limit_minutes = self.limit.num_minutes(),
            "Result polling lease started"
        );
        Ok(now)
    }

    async fn started_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .settings
            .get(STARTED_KEY)
            .await?
            .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    pub async fn state(&self) -> Result<LeaseState> {
        let Some(started) = self.started_at().await? else {
            return Ok(LeaseState::Inactive);
        };
        let held = self.clock.now() - started;
        if held > self.limit {
            return Ok(LeaseState::Expired);
        }
        Ok(LeaseState::Active {
            remaining_secs: (self.limit - held).num_seconds().max(0) as u64,
        })
    }

    pub async fn release(&self) -> Result<()> {
        self.settings.clear(STARTED_KEY).await?;
        info!("Result polling lease released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callrun_core::FixedClock;
    use callrun_storage::MemoryTableStore;

    #[tokio::test]
    async fn expires_after_limit_and_releases() {
        let clock = Arc::new(FixedClock::new(Utc::now(), 0));
        let lease = PollLease::new(Arc::new(MemoryTableStore::new()), clock.clone(), 90);
        assert_eq!(lease.state().await.unwrap(), LeaseState::Inactive);

        lease.start().await.unwrap();
        clock.advance(Duration::minutes(30));
        assert_eq!(
            lease.state().await.unwrap(),
            LeaseState::Active { remaining_secs: 3600 }
        );

        clock.advance(Duration::minutes(61));
        assert_eq!(lease.state().await.unwrap(), LeaseState::Expired);

        lease.release().await.unwrap();
        assert_eq!(lease.state().await.unwrap(), LeaseState::Inactive);
    }
}
