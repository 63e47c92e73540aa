//! Resumable batch sender.
//!
//! A run goes `start_run` → repeated `tick`s → finalize. Each tick sends at
//! most one batch, persists the session, and reschedules itself through the
//! [`TickTrigger`]. A session is the only state that survives a restart; the
//! worker resumes from `processed_count` on the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use callrun_core::config::{DispatchConfig, LAST_SENDABLE_RUN, MAX_PER_RUN_CEILING};
use callrun_core::lead::{format_stamp, next_run, tabs};
use callrun_core::{CallRunError, CallWindow, Clock, Result};
use callrun_storage::{Settings, TableStore};

use crate::cooldown::{CooldownKind, Cooldowns};
use crate::endpoint::{BatchRequest, DispatchEndpoint};
use crate::ledger::CreditLedger;
use crate::leads::LeadSheet;
use crate::locks::{
    ProcessLocks, DISPATCH_LOCK, LEAD_TAB_LOCK, LEAD_TAB_LOCK_WAIT, STARTUP_LOCK_WAIT, TICK_LOCK_WAIT,
};
use crate::selector::RunSelector;
use crate::sent_index::SentIndex;
use crate::session::{PendingAck, RunSession, SessionStatus, SessionStore};
use crate::trigger::TickTrigger;

/// Settings key for the per-run limit chosen from the portal.
pub const RUN_LIMIT_KEY: &str = "default_run_limit";
pub const RUN_LIMIT_FLOOR: usize = 100;

// ── Public types ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SendRunRequest {
    pub source_tab: String,
    pub run: u8,
    /// Per-request cap; falls back to the configured default.
    pub limit: Option<usize>,
    pub user: Option<String>,
}

/// Acknowledgement returned by `start_run`; dispatch itself is asynchronous.
#[derive(Debug, Clone, Serialize)]
pub struct RunAccepted {
    pub run_id: Uuid,
    pub run: u8,
    pub to_send: usize,
    pub balance: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run: u8,
    pub total: usize,
    pub processed: usize,
    pub ok: usize,
    pub failed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum DispatchEvent {
    RunStarted { run_id: Uuid, run: u8, to_send: usize },
    BatchSent { run_id: Uuid, count: usize },
    BatchFailed { run_id: Uuid, count: usize, error: String },
    RunFinished(RunSummary),
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Another tick holds the dispatch lock.
    Skipped,
    /// No running session; the trigger was removed.
    Idle,
    Continued { run_id: Uuid, processed: usize, total: usize },
    Finished(RunSummary),
}

/// Everything the engine needs, wired by the caller.
pub struct EngineParts {
    pub config: DispatchConfig,
    pub call_window: Option<CallWindow>,
    pub outbound: Arc<dyn TableStore>,
    pub ledger: CreditLedger,
    pub cooldowns: Cooldowns,
    pub sessions: Arc<SessionStore>,
    pub endpoint: Arc<dyn DispatchEndpoint>,
    pub locks: Arc<ProcessLocks>,
    pub clock: Arc<dyn Clock>,
}

pub struct DispatchEngine {
    config: DispatchConfig,
    call_window: Option<CallWindow>,
    leads: LeadSheet,
    selector: RunSelector,
    ledger: CreditLedger,
    sent_index: SentIndex,
    settings: Settings,
    cooldowns: Cooldowns,
    sessions: Arc<SessionStore>,
    endpoint: Arc<dyn DispatchEndpoint>,
    locks: Arc<ProcessLocks>,
    clock: Arc<dyn Clock>,
    trigger: TickTrigger,
    events: broadcast::Sender<DispatchEvent>,
}

impl DispatchEngine {
    /// Build the engine. The receiver yields one item per scheduled tick and
    /// must be drained by a worker calling [`DispatchEngine::tick`].
    pub fn new(parts: EngineParts) -> (Self, mpsc::Receiver<()>) {
        let (trigger, ticks) = TickTrigger::new();
        let (events, _) = broadcast::channel(64);
        let leads = LeadSheet::new(parts.outbound.clone());
        let engine = Self {
            config: parts.config,
            call_window: parts.call_window,
            selector: RunSelector::new(leads.clone()),
            leads,
            ledger: parts.ledger,
            settings: Settings::new(parts.outbound.clone(), tabs::CREDIT_SETTINGS),
            sent_index: SentIndex::new(parts.outbound),
            cooldowns: parts.cooldowns,
            sessions: parts.sessions,
            endpoint: parts.endpoint,
            locks: parts.locks,
            clock: parts.clock,
            trigger,
            events,
        };
        (engine, ticks)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    fn limit_ceiling(&self) -> usize {
        self.config.max_per_run.min(MAX_PER_RUN_CEILING)
    }

    /// Per-run limit used when a request names none: the stored portal value,
    /// else the configured default.
    pub async fn run_limit(&self) -> Result<usize> {
        let stored = self
            .settings
            .get_i64(RUN_LIMIT_KEY)
            .await?
            .filter(|n| *n > 0)
            .map(|n| n as usize);
        Ok(stored.unwrap_or(self.config.default_run_limit).min(self.limit_ceiling()))
    }

    /// Store a new default per-run limit, clamped to `RUN_LIMIT_FLOOR..=max_per_run`.
    pub async fn set_run_limit(&self, requested: u64) -> Result<usize> {
        let ceiling = self.limit_ceiling();
        let limit = usize::try_from(requested)
            .unwrap_or(usize::MAX)
            .max(RUN_LIMIT_FLOOR)
            .min(ceiling);
        self.settings.set(RUN_LIMIT_KEY, &limit.to_string()).await?;
        info!(requested, limit, "Default run limit updated");
        Ok(limit)
    }

    fn emit(&self, event: DispatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Resume after a restart: if a session is still running, schedule a tick.
    pub fn resume(&self) -> Result<Option<Uuid>> {
        let active = self.sessions.active()?;
        if let Some(s) = &active {
            info!(
                run_id = %s.run_id,
                processed = s.processed_count,
                total = s.total_to_send,
                "Resuming dispatch run"
            );
            self.trigger.schedule_after(self.config.first_tick_delay());
        }
        Ok(active.map(|s| s.run_id))
    }

    // ── Start ──

    /// Validate, select, persist a session and schedule the first tick.
    pub async fn start_run(&self, req: SendRunRequest) -> Result<RunAccepted> {
        let run = req.run;
        if !(1..=LAST_SENDABLE_RUN).contains(&run) {
            return Err(CallRunError::Validation(format!(
                "run must be between 1 and {LAST_SENDABLE_RUN}, got {run}"
            )));
        }
        if let Some(window) = &self.call_window {
            let local = self.clock.local_now();
            if !window.contains(local) {
                return Err(CallRunError::OutsideCallWindow {
                    minutes_until_open: window.minutes_until_open(local),
                });
            }
        }
        self.cooldowns.check(CooldownKind::Send).await?;
        let agent_id = self
            .config
            .agent_for(run)
            .ok_or_else(|| CallRunError::Validation(format!("Missing AGENT for Run {run}")))?
            .to_string();
        if self.config.from_number_for(run).is_none() {
            return Err(CallRunError::Validation(format!("Missing FROM for Run {run}")));
        }

        let _lock = self
            .locks
            .acquire(DISPATCH_LOCK, STARTUP_LOCK_WAIT)
            .await
            .map_err(|_| CallRunError::ConcurrencyConflict("A run is already in progress. Please wait.".into()))?;

        let now = self.clock.now();
        let stale_after = ChronoDuration::minutes(self.config.stale_session_minutes as i64);
        self.sessions.reap(now, stale_after)?;
        if let Some(active) = self.sessions.active()? {
            return Err(CallRunError::ConcurrencyConflict(format!(
                "Run {} is still sending ({} of {}). Please wait.",
                active.run_number, active.processed_count, active.total_to_send
            )));
        }
        self.trigger.cancel();

        let cap = match req.limit.filter(|n| *n > 0) {
            Some(n) => n.min(self.limit_ceiling()),
            None => self.run_limit().await?,
        };
        let mut selection = self.selector.select(&req.source_tab, run, cap, &agent_id).await?;
        if selection.is_empty() {
            return Err(CallRunError::NoEligibleLeads { run });
        }

        let balance = self.ledger.balance().await?;
        let to_send = selection.len().min(balance.max(0) as usize);
        if to_send == 0 {
            return Err(CallRunError::InsufficientCredits {
                need: selection.len() as u64,
                have: balance,
            });
        }
        selection.truncate(to_send);

        let session = RunSession::new(
            &req.source_tab,
            run,
            selection.tasks,
            selection.rows,
            req.user.clone(),
            now,
        );
        self.sessions.begin(&session)?;
        self.trigger.schedule_after(self.config.first_tick_delay());

        info!(
            run_id = %session.run_id,
            run,
            tab = %req.source_tab,
            to_send,
            balance,
            user = req.user.as_deref().unwrap_or("-"),
            "Dispatch run started"
        );
        self.emit(DispatchEvent::RunStarted {
            run_id: session.run_id,
            run,
            to_send,
        });

        Ok(RunAccepted {
            run_id: session.run_id,
            run,
            to_send,
            balance,
            message: format!("Started processing {to_send} tasks for Run {run}."),
        })
    }

    // ── Tick ──

    /// One worker invocation. Never fails: errors escaping the batch logic
    /// finalize the run as aborted.
    pub async fn tick(&self) -> TickOutcome {
        let started = Instant::now();
        let Ok(_lock) = self.locks.acquire(DISPATCH_LOCK, TICK_LOCK_WAIT).await else {
            return TickOutcome::Skipped;
        };

        let session = match self.sessions.active() {
            Ok(Some(s)) => s,
            Ok(None) => {
                self.trigger.cancel();
                return TickOutcome::Idle;
            }
            Err(e) => {
                error!(error = %e, "Failed to load run session");
                self.trigger.cancel();
                return TickOutcome::Idle;
            }
        };

        let run_id = session.run_id;
        match self.run_tick(session, started).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Dispatch tick failed, aborting run");
                let session = self.sessions.get(run_id).ok().flatten();
                match session {
                    Some(s) => TickOutcome::Finished(self.finalize(s, Some(e.to_string())).await),
                    None => {
                        self.trigger.cancel();
                        TickOutcome::Idle
                    }
                }
            }
        }
    }

    /// Shrinks as the tick budget or the call window runs out.
    fn batch_size(&self, started: Instant) -> usize {
        let mut remaining = self.config.tick_budget().saturating_sub(started.elapsed());
        if let Some(left) = self
            .call_window
            .as_ref()
            .and_then(|w| w.until_close(self.clock.local_now()))
        {
            remaining = remaining.min(left);
        }
        if remaining < Duration::from_secs(30) {
            self.config.batch_size_min
        } else if remaining < Duration::from_secs(60) {
            self.config.batch_size_reduced
        } else {
            self.config.batch_size_full
        }
    }

    async fn run_tick(&self, mut session: RunSession, started: Instant) -> Result<TickOutcome> {
        if let Some(ack) = session.pending_ack.clone() {
            warn!(
                run_id = %session.run_id,
                start = ack.start,
                len = ack.len,
                "Applying row marks for an accepted batch left unmarked"
            );
            self.apply_marks(&session, &ack).await?;
            session.pending_ack = None;
            self.sessions.save(&session)?;
        }

        let start = session.processed_count;
        let size = self.batch_size(started).max(1);
        let end = (start + size).min(session.tasks.len()).min(session.total_to_send);
        if start >= end {
            return Ok(TickOutcome::Finished(self.finalize(session, None).await));
        }
        let count = end - start;

        // Pessimistic reservation before the external call.
        if let Err(e) = self.ledger.reserve(count as u64).await {
            if let CallRunError::InsufficientCredits { need, have } = &e {
                warn!(run_id = %session.run_id, need, have, "Balance no longer covers the next batch");
                return Ok(TickOutcome::Finished(self.finalize(session, Some(e.to_string())).await));
            }
            return Err(e);
        }

        let batch_time = format_stamp(self.clock.now(), self.clock.offset());
        let from_number = self
            .config
            .from_number_for(session.run_number)
            .unwrap_or_default()
            .to_string();
        let request = BatchRequest {
            from_number: &from_number,
            name: format!("Batch Run {} – {}", session.run_number, batch_time),
            trigger_timestamp: self.clock.now().timestamp_millis(),
            tasks: &session.tasks[start..end],
        };

        match self.endpoint.send_batch(&request).await {
            Ok(()) => {
                self.ledger.log_move(count as u64, 0).await;
                session.ok_count += count;
                session.processed_count = end;
                session.last_progress_at = self.clock.now();
                let ack = PendingAck { start, len: count, batch_time };
                session.pending_ack = Some(ack.clone());
                // Accepted rows are marked even if the run was cancelled meanwhile.
                let persisted = self.sessions.save(&session);
                self.apply_marks(&session, &ack).await?;
                persisted?;
                session.pending_ack = None;
                info!(
                    run_id = %session.run_id,
                    run = session.run_number,
                    sent = count,
                    processed = session.processed_count,
                    total = session.total_to_send,
                    "Batch accepted"
                );
                self.emit(DispatchEvent::BatchSent { run_id: session.run_id, count });
            }
            Err(e) => {
                self.ledger.refund(count as u64).await?;
                self.ledger.log_move(0, count as u64).await;
                session.fail_count += count;
                session.processed_count = end;
                session.last_progress_at = self.clock.now();
                warn!(
                    run_id = %session.run_id,
                    run = session.run_number,
                    refunded = count,
                    error = %e,
                    "Batch rejected, credits refunded"
                );
                self.emit(DispatchEvent::BatchFailed {
                    run_id: session.run_id,
                    count,
                    error: e.to_string(),
                });
            }
        }
        self.sessions.save(&session)?;

        if session.is_done() {
            return Ok(TickOutcome::Finished(self.finalize(session, None).await));
        }
        self.trigger.schedule_after(self.config.reschedule_delay());
        Ok(TickOutcome::Continued {
            run_id: session.run_id,
            processed: session.processed_count,
            total: session.total_to_send,
        })
    }

    /// Row-side effects of an accepted batch: sent index, Last Call, run bump.
    async fn apply_marks(&self, session: &RunSession, ack: &PendingAck) -> Result<()> {
        let end = (ack.start + ack.len).min(session.rows_used.len());
        let rows = &session.rows_used[ack.start.min(end)..end];
        let phones: Vec<String> = rows.iter().map(|r| r.phone.clone()).collect();
        let row_ids: Vec<usize> = rows.iter().map(|r| r.row).collect();

        self.sent_index
            .append(&phones, session.run_number, &ack.batch_time)
            .await?;

        let _lead_tab = self.locks.acquire(LEAD_TAB_LOCK, LEAD_TAB_LOCK_WAIT).await?;
        if let Err(e) = self
            .leads
            .stamp_last_call(&session.source_tab, &phones, self.clock.today())
            .await
        {
            warn!(run_id = %session.run_id, error = %e, "Last Call stamp failed");
        }

        let next = next_run(session.run_number).to_string();
        let written = self
            .leads
            .set_run_for_rows(&session.source_tab, &row_ids, &next)
            .await?;
        if written < row_ids.len() {
            // Rows moved since selection; fall back to matching by phone.
            let by_phone = self
                .leads
                .set_run_for_phones(&session.source_tab, &phones, &next)
                .await?;
            info!(run_id = %session.run_id, by_row = written, by_phone, next = %next, "Run bump fell back to phones");
        }
        Ok(())
    }

    // ── Finalize ──

    async fn finalize(&self, mut session: RunSession, error: Option<String>) -> RunSummary {
        self.trigger.cancel();
        session.status = SessionStatus::Finalizing;
        if let Err(e) = self.sessions.save(&session) {
            warn!(run_id = %session.run_id, error = %e, "Failed to persist finalizing state");
        }

        if session.ok_count > 0 {
            if let Err(e) = self.cooldowns.mark(CooldownKind::Send).await {
                warn!(run_id = %session.run_id, error = %e, "Failed to mark send cooldown");
            }
        }
        if let Err(e) = self.sessions.remove(session.run_id) {
            error!(run_id = %session.run_id, error = %e, "Failed to remove run session");
        }

        let summary = RunSummary {
            run_id: session.run_id,
            run: session.run_number,
            total: session.total_to_send,
            processed: session.processed_count,
            ok: session.ok_count,
            failed: session.fail_count,
            error,
        };
        match &summary.error {
            None => info!(
                run_id = %summary.run_id,
                run = summary.run,
                ok = summary.ok,
                failed = summary.failed,
                total = summary.total,
                "Dispatch run finished"
            ),
            Some(err) => warn!(
                run_id = %summary.run_id,
                run = summary.run,
                ok = summary.ok,
                failed = summary.failed,
                error = %err,
                "Dispatch run aborted"
            ),
        }
        self.emit(DispatchEvent::RunFinished(summary.clone()));
        summary
    }

    /// Drop every session and the pending tick (out-of-band cancellation).
    pub async fn cancel_all(&self) -> Result<usize> {
        let _lock = self.locks.acquire(DISPATCH_LOCK, TICK_LOCK_WAIT).await?;
        self.trigger.cancel();
        let sessions = self.sessions.clear()?;
        for s in &sessions {
            warn!(run_id = %s.run_id, run = s.run_number, "Run cancelled");
        }
        Ok(sessions.len())
    }
}
