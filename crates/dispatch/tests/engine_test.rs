//! End-to-end tests for the dispatch engine against in-memory storage and a
//! scripted endpoint.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use callrun_core::config::DispatchConfig;
use callrun_core::lead::tabs;
use callrun_core::{CallRunError, CallWindow, Clock, FixedClock, RowRef, LEAD_HEADERS};
use callrun_dispatch::*;
use callrun_storage::table::to_strings;
use callrun_storage::{MemoryTableStore, Table, TableStore};

// ── Harness ──────────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedEndpoint {
    /// Outcome per call; empty script means accept.
    script: Mutex<VecDeque<bool>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedEndpoint {
    fn with_script(outcomes: &[bool]) -> Self {
        Self {
            script: Mutex::new(outcomes.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DispatchEndpoint for ScriptedEndpoint {
    async fn send_batch(&self, request: &BatchRequest<'_>) -> callrun_core::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(request.tasks.iter().map(|t| t.to_number.clone()).collect());
        let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(CallRunError::ExternalDispatch("HTTP 500 - boom".into()))
        }
    }
}

struct Harness {
    engine: DispatchEngine,
    _ticks: tokio::sync::mpsc::Receiver<()>,
    outbound: Arc<MemoryTableStore>,
    endpoint: Arc<ScriptedEndpoint>,
    ledger: CreditLedger,
    cooldowns: Cooldowns,
    sessions: Arc<SessionStore>,
    clock: Arc<FixedClock>,
}

fn lead_row(phone: &str, run: &str) -> Vec<String> {
    to_strings(&["Ada", "Lovelace", phone, "1 Main", "Dallas", "TX", "75001", "a@x.io", run, "", ""])
}

fn phones(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("21455501{:02}", i + 10)).collect()
}

fn config(batch: usize) -> DispatchConfig {
    let mut cfg = DispatchConfig::default();
    for i in 0..2 {
        cfg.agents[i] = Some(format!("agent_{}", i + 1));
        cfg.from_numbers[i] = Some("+12145550000".to_string());
    }
    cfg.batch_size_full = batch;
    cfg
}

async fn harness(rows: Vec<Vec<String>>, balance: i64, endpoint: ScriptedEndpoint, cfg: DispatchConfig) -> Harness {
    let outbound = Arc::new(MemoryTableStore::new());
    let mut t = Table::new(to_strings(&LEAD_HEADERS));
    t.rows = rows;
    outbound.put_table(tabs::OUTBOUND_LEADS, t).await;

    let clock = Arc::new(FixedClock::at_local(
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap().and_hms_opt(12, 0, 0).unwrap(),
        -360,
    ));
    let store: Arc<dyn TableStore> = outbound.clone();
    let locks = Arc::new(ProcessLocks::new());
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let ledger = CreditLedger::new(store.clone(), locks.clone(), clock_dyn.clone());
    ledger.set_balance(balance).await.unwrap();
    let cooldowns = Cooldowns::new(store.clone(), clock_dyn.clone(), 21, 20);
    let sessions = Arc::new(SessionStore::in_memory());
    let endpoint = Arc::new(endpoint);

    let (engine, ticks) = DispatchEngine::new(EngineParts {
        config: cfg,
        call_window: Some(CallWindow::default()),
        outbound: store,
        ledger: ledger.clone(),
        cooldowns: cooldowns.clone(),
        sessions: sessions.clone(),
        endpoint: endpoint.clone(),
        locks,
        clock: clock_dyn,
    });
    Harness {
        engine,
        _ticks: ticks,
        outbound,
        endpoint,
        ledger,
        cooldowns,
        sessions,
        clock,
    }
}

fn request(run: u8, limit: Option<usize>) -> SendRunRequest {
    SendRunRequest {
        source_tab: tabs::OUTBOUND_LEADS.to_string(),
        run,
        limit,
        user: Some("ops@example.com".into()),
    }
}

async fn run_column(store: &MemoryTableStore) -> Vec<String> {
    let t = store.read_table(tabs::OUTBOUND_LEADS).await.unwrap().unwrap();
    t.rows.iter().map(|r| r[8].clone()).collect()
}

async fn drive(h: &Harness) -> RunSummary {
    for _ in 0..50 {
        if let TickOutcome::Finished(summary) = h.engine.tick().await {
            return summary;
        }
    }
    panic!("run did not finish");
}

// ── Admission ────────────────────────────────────────────────────────

#[tokio::test]
async fn balance_caps_run_size() {
    let rows = phones(5).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 3, ScriptedEndpoint::default(), config(100)).await;

    let accepted = h.engine.start_run(request(1, Some(10))).await.unwrap();
    assert_eq!(accepted.to_send, 3);

    let summary = drive(&h).await;
    assert_eq!(summary.ok, 3);
    assert_eq!(summary.error, None);
    assert_eq!(h.ledger.balance().await.unwrap(), 0);
    assert_eq!(run_column(&h.outbound).await, vec!["2", "2", "2", "", ""]);

    let t = h.outbound.read_table(tabs::OUTBOUND_LEADS).await.unwrap().unwrap();
    assert_eq!(t.rows[0][9], "2024-01-10");
    assert_eq!(t.rows[3][9], "");

    let sent = h.outbound.read_table(tabs::SENT_INDEX).await.unwrap().unwrap();
    assert_eq!(sent.rows.len(), 3);
    assert_eq!(sent.rows[0][1], "Run 1");

    let entries = h.ledger.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].calls_sent, 3);
    assert!(h.sessions.list().unwrap().is_empty());
}

#[tokio::test]
async fn refuses_without_leads_or_credits() {
    let h = harness(vec![lead_row("2145550110", "3")], 10, ScriptedEndpoint::default(), config(100)).await;
    let err = h.engine.start_run(request(1, None)).await.unwrap_err();
    assert!(matches!(err, CallRunError::NoEligibleLeads { run: 1 }));

    let h = harness(vec![lead_row("2145550110", "")], 0, ScriptedEndpoint::default(), config(100)).await;
    let err = h.engine.start_run(request(1, None)).await.unwrap_err();
    assert!(matches!(err, CallRunError::InsufficientCredits { need: 1, have: 0 }));
    assert!(h.sessions.list().unwrap().is_empty());
}

#[tokio::test]
async fn refuses_unconfigured_run_and_bad_numbers() {
    let h = harness(vec![lead_row("2145550110", "3")], 10, ScriptedEndpoint::default(), config(100)).await;
    let err = h.engine.start_run(request(3, None)).await.unwrap_err();
    assert!(matches!(err, CallRunError::Validation(_)));
    let err = h.engine.start_run(request(9, None)).await.unwrap_err();
    assert!(matches!(err, CallRunError::Validation(_)));
}

#[tokio::test]
async fn refuses_outside_call_window() {
    let h = harness(vec![lead_row("2145550110", "")], 10, ScriptedEndpoint::default(), config(100)).await;
    h.clock.advance(chrono::Duration::hours(9)); // 21:00 local
    let err = h.engine.start_run(request(1, None)).await.unwrap_err();
    assert!(matches!(err, CallRunError::OutsideCallWindow { minutes_until_open: 600 }));
}

#[tokio::test]
async fn second_start_rejected_while_running() {
    let rows = phones(4).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 10, ScriptedEndpoint::default(), config(2)).await;

    h.engine.start_run(request(1, None)).await.unwrap();
    let err = h.engine.start_run(request(1, None)).await.unwrap_err();
    assert!(matches!(err, CallRunError::ConcurrencyConflict(_)));
    assert!(err.is_retryable());
    assert_eq!(h.sessions.list().unwrap().len(), 1);
}

// ── Batches ──────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_batches_net_to_zero() {
    let rows = phones(5).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 10, ScriptedEndpoint::with_script(&[true, false, true]), config(2)).await;

    h.engine.start_run(request(1, None)).await.unwrap();
    assert!(matches!(h.engine.tick().await, TickOutcome::Continued { processed: 2, total: 5, .. }));
    assert!(matches!(h.engine.tick().await, TickOutcome::Continued { processed: 4, total: 5, .. }));
    let summary = match h.engine.tick().await {
        TickOutcome::Finished(s) => s,
        other => panic!("expected finish, got {other:?}"),
    };

    assert_eq!(summary.ok, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(h.endpoint.call_count(), 3);
    // 10 - (2 + 1) accepted
    assert_eq!(h.ledger.balance().await.unwrap(), 7);
    assert_eq!(run_column(&h.outbound).await, vec!["2", "2", "", "", "2"]);

    let refunds: u64 = h.ledger.entries().await.unwrap().iter().map(|e| e.credits_refunded).sum();
    assert_eq!(refunds, 2);
}

#[tokio::test]
async fn all_failed_run_sets_no_cooldown() {
    let rows = phones(2).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 10, ScriptedEndpoint::with_script(&[false]), config(100)).await;

    h.engine.start_run(request(1, None)).await.unwrap();
    let summary = drive(&h).await;
    assert_eq!(summary.failed, 2);
    assert_eq!(h.ledger.balance().await.unwrap(), 10);
    assert_eq!(h.cooldowns.status().await.unwrap().send_remaining_secs, 0);
    assert_eq!(run_column(&h.outbound).await, vec!["", ""]);
}

#[tokio::test]
async fn successful_run_starts_send_cooldown() {
    let rows = phones(2).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 10, ScriptedEndpoint::default(), config(100)).await;

    h.engine.start_run(request(1, None)).await.unwrap();
    drive(&h).await;

    let err = h.engine.start_run(request(2, None)).await.unwrap_err();
    assert!(matches!(err, CallRunError::CoolingDown { .. }));
}

#[tokio::test]
async fn idle_tick_without_session() {
    let h = harness(vec![], 10, ScriptedEndpoint::default(), config(100)).await;
    assert!(matches!(h.engine.tick().await, TickOutcome::Idle));
}

// ── Recovery ─────────────────────────────────────────────────────────

#[tokio::test]
async fn pending_ack_is_replayed_without_redispatch() {
    let rows = phones(2).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 10, ScriptedEndpoint::default(), config(100)).await;

    // A session whose batch was accepted but whose rows were never marked.
    let mut session = RunSession::new(
        tabs::OUTBOUND_LEADS,
        1,
        Vec::new(),
        phones(2)
            .into_iter()
            .enumerate()
            .map(|(row, phone)| RowRef { row, phone })
            .collect(),
        None,
        Utc::now(),
    );
    session.total_to_send = 2;
    session.processed_count = 2;
    session.ok_count = 2;
    session.pending_ack = Some(PendingAck {
        start: 0,
        len: 2,
        batch_time: "2024-01-10 12:00:00".into(),
    });
    h.sessions.begin(&session).unwrap();

    let summary = drive(&h).await;
    assert_eq!(summary.ok, 2);
    assert_eq!(h.endpoint.call_count(), 0);
    assert_eq!(run_column(&h.outbound).await, vec!["2", "2"]);
    let sent = h.outbound.read_table(tabs::SENT_INDEX).await.unwrap().unwrap();
    assert_eq!(sent.rows.len(), 2);
}

#[tokio::test]
async fn error_inside_tick_aborts_and_cleans_up() {
    // Lead tab without a Run column: selection treats markers as blank,
    // but the run bump cannot be written.
    let outbound_rows = vec![to_strings(&["2145550110"])];
    let h = harness(vec![], 10, ScriptedEndpoint::default(), config(100)).await;
    let mut t = Table::new(to_strings(&["Phone"]));
    t.rows = outbound_rows;
    h.outbound.put_table(tabs::OUTBOUND_LEADS, t).await;

    h.engine.start_run(request(1, None)).await.unwrap();
    let summary = drive(&h).await;
    assert!(summary.error.is_some());
    assert!(h.sessions.list().unwrap().is_empty());
    assert!(matches!(h.engine.tick().await, TickOutcome::Idle));
}

#[tokio::test]
async fn events_report_run_lifecycle() {
    let rows = phones(1).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 10, ScriptedEndpoint::default(), config(100)).await;
    let mut events = h.engine.subscribe();

    h.engine.start_run(request(1, None)).await.unwrap();
    drive(&h).await;

    assert!(matches!(events.recv().await.unwrap(), DispatchEvent::RunStarted { to_send: 1, .. }));
    assert!(matches!(events.recv().await.unwrap(), DispatchEvent::BatchSent { count: 1, .. }));
    assert!(matches!(events.recv().await.unwrap(), DispatchEvent::RunFinished(s) if s.ok == 1));
}

#[tokio::test]
async fn cancel_all_drops_the_running_session() {
    let rows = phones(3).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 10, ScriptedEndpoint::default(), config(100)).await;
    h.engine.start_run(request(1, None)).await.unwrap();

    assert_eq!(h.engine.cancel_all().await.unwrap(), 1);
    assert!(h.sessions.list().unwrap().is_empty());
    assert!(matches!(h.engine.tick().await, TickOutcome::Idle));
    assert_eq!(h.endpoint.call_count(), 0);
    assert_eq!(h.ledger.balance().await.unwrap(), 10);
}

#[tokio::test]
async fn session_cleared_elsewhere_stops_the_next_tick() {
    let rows = phones(3).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 10, ScriptedEndpoint::default(), config(100)).await;
    h.engine.start_run(request(1, None)).await.unwrap();

    // Another process holding the same store drops the run.
    assert_eq!(h.sessions.clear().unwrap().len(), 1);

    assert!(matches!(h.engine.tick().await, TickOutcome::Idle));
    assert_eq!(h.endpoint.call_count(), 0);
    assert!(h.sessions.list().unwrap().is_empty());
}

#[tokio::test]
async fn stored_run_limit_caps_requests_without_a_count() {
    let rows = (0..150).map(|i| lead_row(&format!("214555{:04}", 1000 + i), "")).collect();
    let h = harness(rows, 1000, ScriptedEndpoint::default(), config(100)).await;

    assert_eq!(h.engine.run_limit().await.unwrap(), 1000);
    assert_eq!(h.engine.set_run_limit(20).await.unwrap(), RUN_LIMIT_FLOOR);
    assert_eq!(h.engine.run_limit().await.unwrap(), 100);

    let accepted = h.engine.start_run(request(1, None)).await.unwrap();
    assert_eq!(accepted.to_send, 100);
}

#[tokio::test]
async fn batch_shrinks_as_the_call_window_closes() {
    let rows = phones(30).iter().map(|p| lead_row(p, "")).collect();
    let h = harness(rows, 100, ScriptedEndpoint::default(), config(100)).await;
    h.engine.start_run(request(1, None)).await.unwrap();

    // 19:59:40 local, twenty seconds before close.
    h.clock.advance(chrono::Duration::seconds(7 * 3600 + 59 * 60 + 40));
    h.engine.tick().await;
    let calls = h.endpoint.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), DispatchConfig::default().batch_size_min);
}
