use std::sync::Arc;

use tracing::{info, warn};

use callrun_core::lead::{format_stamp, tabs};
use callrun_core::{CallRunError, Clock, CreditLedgerEntry, Result};
use callrun_storage::table::to_strings;
use callrun_storage::{Settings, TableStore};

use crate::locks::{ProcessLocks, CREDIT_LOCK, CREDIT_LOCK_WAIT};

pub const BALANCE_KEY: &str = "balance";

/// Prepaid call credits.
///
/// The balance scalar in the `Credit` settings tab is the source of truth; the
/// `Credit Ledger` tab is an append-only audit trail derived from it. Every
/// balance write happens under the process-wide credit lock.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn TableStore>,
    settings: Settings,
    locks: Arc<ProcessLocks>,
    clock: Arc<dyn Clock>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn TableStore>, locks: Arc<ProcessLocks>, clock: Arc<dyn Clock>) -> Self {
        let settings = Settings::new(store.clone(), tabs::CREDIT_SETTINGS);
        Self { store, settings, locks, clock }
    }

    /// Current balance; an unset or unparsable cell reads as 0.
    pub async fn balance(&self) -> Result<i64> {
        Ok(self.settings.get_i64(BALANCE_KEY).await?.unwrap_or(0))
    }

    pub async fn set_balance(&self, value: i64) -> Result<()> {
        let _lock = self.locks.acquire(CREDIT_LOCK, CREDIT_LOCK_WAIT).await?;
        self.write_balance(value).await
    }

    async fn write_balance(&self, value: i64) -> Result<()> {
        self.settings.set(BALANCE_KEY, &value.to_string()).await?;
        Ok(())
    }

    /// Read, apply `delta`, write, all under the credit lock. Returns the new balance.
    pub async fn update_balance(&self, delta: i64) -> Result<i64> {
        let _lock = self.locks.acquire(CREDIT_LOCK, CREDIT_LOCK_WAIT).await?;
        let current = self.balance().await?;
        let next = current + delta;
        self.write_balance(next).await?;
        info!(before = current, delta, after = next, "Credit balance updated");
        Ok(next)
    }

    /// Debit `n` only if the balance covers it. Returns the new balance.
    pub async fn reserve(&self, n: u64) -> Result<i64> {
        let _lock = self.locks.acquire(CREDIT_LOCK, CREDIT_LOCK_WAIT).await?;
        let current = self.balance().await?;
        if current < n as i64 {
            return Err(CallRunError::InsufficientCredits { need: n, have: current });
        }
        let next = current - n as i64;
        self.write_balance(next).await?;
        info!(before = current, reserved = n, after = next, "Credits reserved");
        Ok(next)
    }

    /// Give back a reservation.
    pub async fn refund(&self, n: u64) -> Result<i64> {
        self.update_balance(n as i64).await
    }

    /// Top up the balance.
    pub async fn add_credits(&self, n: u64) -> Result<i64> {
        let after = self.update_balance(n as i64).await?;
        info!(added = n, balance = after, "Credits added");
        Ok(after)
    }

    /// Append one audit row. Failures are logged, never propagated: the
    /// balance has already moved and the trail is secondary.
    pub async fn log_move(&self, calls_sent: u64, credits_refunded: u64) {
        let entry = CreditLedgerEntry {
            date: format_stamp(self.clock.now(), self.clock.offset()),
            calls_sent,
            credits_refunded,
        };
        if let Err(e) = self.append_entry(&entry).await {
            warn!(error = %e, calls_sent, credits_refunded, "Failed to write credit ledger row");
        }
    }

    async fn append_entry(&self, entry: &CreditLedgerEntry) -> Result<()> {
        self.store
            .ensure_headers(tabs::CREDIT_LEDGER, &to_strings(&CreditLedgerEntry::HEADERS))
            .await?;
        self.store
            .append_rows(tabs::CREDIT_LEDGER, &[entry.to_row()])
            .await?;
        Ok(())
    }

    /// All ledger rows, oldest first.
    pub async fn entries(&self) -> Result<Vec<CreditLedgerEntry>> {
        let Some(table) = self.store.read_table(tabs::CREDIT_LEDGER).await? else {
            return Ok(Vec::new());
        };
        Ok(table
            .rows
            .iter()
            .map(|r| CreditLedgerEntry {
                date: r.first().cloned().unwrap_or_default(),
                calls_sent: r.get(1).and_then(|v| v.trim().parse().ok()).unwrap_or(0),
                credits_refunded: r.get(2).and_then(|v| v.trim().parse().ok()).unwrap_or(0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callrun_core::FixedClock;
    use callrun_storage::MemoryTableStore;
    use chrono::Utc;

    fn ledger() -> CreditLedger {
        CreditLedger::new(
            Arc::new(MemoryTableStore::new()),
            Arc::new(ProcessLocks::new()),
            Arc::new(FixedClock::new(Utc::now(), -360)),
        )
    }

    #[tokio::test]
    async fn reserve_refuses_overdraft() {
        let l = ledger();
        l.set_balance(3).await.unwrap();

        let err = l.reserve(5).await.unwrap_err();
        assert!(matches!(err, CallRunError::InsufficientCredits { need: 5, have: 3 }));
        assert_eq!(l.balance().await.unwrap(), 3);

        assert_eq!(l.reserve(3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refund_restores_and_logs() {
        let l = ledger();
        l.add_credits(10).await.unwrap();
        l.reserve(4).await.unwrap();
        l.refund(4).await.unwrap();
        l.log_move(0, 4).await;

        assert_eq!(l.balance().await.unwrap(), 10);
        let entries = l.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].credits_refunded, 4);
        assert_eq!(entries[0].calls_sent, 0);
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let l = ledger();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let l = l.clone();
            handles.push(tokio::spawn(async move { l.update_balance(1).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(l.balance().await.unwrap(), 20);
    }
}
