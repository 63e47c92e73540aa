use std::sync::Arc;

use chrono::{Duration, NaiveDate};

use callrun_core::lead::tabs;
use callrun_core::{Clock, FixedClock, LEAD_HEADERS};
use callrun_dispatch::locks::{LEAD_TAB_LOCK, LEAD_TAB_LOCK_WAIT};
use callrun_dispatch::{ProcessLocks, SentIndex};
use callrun_results::{
    count_leads, IngestionPipeline, LeaseState, RecallSweeper, NOTHING_PENDING,
};
use callrun_storage::table::to_strings;
use callrun_storage::{Table, TableStore, Workbooks};

const OFFSET: i32 = -360;

const BATCH: &str = "\
date,first_name,last_name,to_number,correct_name,call_time,quality,interested,new_investments,email_given,disconnection_reason,dnc
2024-01-10,Ann,Lee,+12145550182,Prospect Reached,45,good,yes,now,,user_hangup,false
2024-01-10,Bo,Kim,+12145550183,,0,,,,,dial_no_answer,false
2024-01-10,Cy,Ng,+12145550184,Wrong Number,12,,,,,user_hangup,false
";

struct Harness {
    workbooks: Workbooks,
    clock: Arc<FixedClock>,
    locks: Arc<ProcessLocks>,
    pipeline: IngestionPipeline,
}

fn lead(first: &str, phone: &str, run: &str) -> Vec<String> {
    let mut row = vec![String::new(); LEAD_HEADERS.len()];
    row[0] = first.to_string();
    row[2] = phone.to_string();
    row[8] = run.to_string();
    row
}

async fn harness() -> Harness {
    let workbooks = Workbooks::in_memory();
    let local = NaiveDate::from_ymd_opt(2024, 1, 10)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let clock = Arc::new(FixedClock::at_local(local, OFFSET));

    let mut leads = Table::new(to_strings(&LEAD_HEADERS));
    leads.rows = vec![
        lead("Ann", "2145550182", "2"),
        lead("Bo", "2145550183", "2"),
        lead("Cy", "2145550184", "2"),
    ];
    seed(&workbooks.outbound, tabs::OUTBOUND_LEADS, leads).await;

    SentIndex::new(workbooks.outbound.clone())
        .append(
            &to_strings(&["2145550182", "2145550183", "2145550184"]),
            1,
            "2024-01-10 09:00:00",
        )
        .await
        .unwrap();

    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let locks = Arc::new(ProcessLocks::new());
    let pipeline = IngestionPipeline::new(&workbooks, dyn_clock, locks.clone(), 90);
    Harness { workbooks, clock, locks, pipeline }
}

async fn seed(store: &Arc<dyn TableStore>, tab: &str, table: Table) {
    store.ensure_headers(tab, &table.headers).await.unwrap();
    store.append_rows(tab, &table.rows).await.unwrap();
}

async fn read(store: &Arc<dyn TableStore>, tab: &str) -> Table {
    store.read_table(tab).await.unwrap().unwrap()
}

#[tokio::test]
async fn cycle_classifies_archives_and_schedules_recalls() {
    let h = harness().await;
    h.workbooks.inbox.put_pending(BATCH.as_bytes().to_vec()).await.unwrap();

    let report = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(report.message, "Successfully ingested 3 results.");
    assert_eq!(report.ingested, 3);
    assert_eq!(report.placed["Good Leads"], 1);
    assert_eq!(report.placed["Bad Leads"], 1);
    assert_eq!(report.unclassified, 1);
    assert_eq!(report.recalls_scheduled, 1);
    assert_eq!(report.closed_out, 2);
    assert!(report.archived_to.unwrap().starts_with("raw_leads/processed/inbound_webhook.csv_"));

    let good = read(&h.workbooks.results, "Good Leads").await;
    assert_eq!(good.headers.len(), 25);
    assert_eq!(good.rows[0][3], "2145550182");
    assert_eq!(good.rows[0][24], "1");

    let archive = read(&h.workbooks.archive, "Archive - January 2024").await;
    assert_eq!(archive.rows.len(), 3);
    assert_eq!(archive.rows[1][26], "2024-01-15");
    assert_eq!(archive.rows[1][27], "");

    let leads = read(&h.workbooks.outbound, tabs::OUTBOUND_LEADS).await;
    assert_eq!(leads.rows[0][8], "Good Leads");
    assert_eq!(leads.rows[0][10], "");
    assert_eq!(leads.rows[1][8], "2");
    assert_eq!(leads.rows[1][10], "2024-01-15");
    assert_eq!(leads.rows[2][8], "Bad Leads");

    let again = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(again.message, NOTHING_PENDING);
    assert_eq!(again.ingested, 0);
}

#[tokio::test]
async fn invalid_utf8_row_does_not_cost_the_batch() {
    let h = harness().await;
    let bytes: Vec<u8> = BATCH.replacen("Kim", "K\u{1}m", 1).into_bytes();
    let bytes: Vec<u8> = bytes.into_iter().map(|b| if b == 0x01 { 0xff } else { b }).collect();
    h.workbooks.inbox.put_pending(bytes).await.unwrap();

    let report = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(report.ingested, 3);
    assert_eq!(report.placed["Good Leads"], 1);
    assert_eq!(report.placed["Bad Leads"], 1);
    assert_eq!(report.recalls_scheduled, 1);

    let archive = read(&h.workbooks.archive, "Archive - January 2024").await;
    assert_eq!(archive.rows.len(), 3);
    let leads = read(&h.workbooks.outbound, tabs::OUTBOUND_LEADS).await;
    assert_eq!(leads.rows[1][10], "2024-01-15");
}

#[tokio::test]
async fn lead_tab_write_back_waits_for_the_lead_tab_lock() {
    let h = harness().await;
    h.workbooks.inbox.put_pending(BATCH.as_bytes().to_vec()).await.unwrap();
    let held = h.locks.acquire(LEAD_TAB_LOCK, LEAD_TAB_LOCK_WAIT).await.unwrap();

    let cycle = h.pipeline.run_cycle();
    tokio::pin!(cycle);
    let waited = tokio::time::timeout(std::time::Duration::from_millis(50), &mut cycle).await;
    assert!(waited.is_err());
    let leads = read(&h.workbooks.outbound, tabs::OUTBOUND_LEADS).await;
    assert_eq!(leads.rows[1][10], "");
    assert_eq!(leads.rows[0][8], "2");

    drop(held);
    let report = cycle.await.unwrap();
    assert_eq!(report.recalls_scheduled, 1);
    let leads = read(&h.workbooks.outbound, tabs::OUTBOUND_LEADS).await;
    assert_eq!(leads.rows[1][10], "2024-01-15");
}

#[tokio::test]
async fn bad_list_membership_overrides_later_outcomes() {
    let h = harness().await;
    h.workbooks.inbox.put_pending(BATCH.as_bytes().to_vec()).await.unwrap();
    h.pipeline.run_cycle().await.unwrap();

    let follow_up = "\
to_number,correct_name,call_time,quality,interested,new_investments
2145550184,Prospect Reached,60,good,yes,now
";
    h.workbooks.inbox.put_pending(follow_up.as_bytes().to_vec()).await.unwrap();
    let report = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(report.placed.get("Bad Leads"), Some(&1));
    assert_eq!(report.placed.get("Good Leads"), None);

    let bad = read(&h.workbooks.results, "Bad Leads").await;
    assert_eq!(bad.rows.len(), 2);
}

#[tokio::test]
async fn sweep_recycles_due_rows_once() {
    let h = harness().await;
    h.workbooks.inbox.put_pending(BATCH.as_bytes().to_vec()).await.unwrap();
    h.pipeline.run_cycle().await.unwrap();

    let dyn_clock: Arc<dyn Clock> = h.clock.clone();
    let sweeper = RecallSweeper::new(
        h.workbooks.archive.clone(),
        h.workbooks.outbound.clone(),
        dyn_clock,
    );

    let early = sweeper.sweep().await.unwrap();
    assert_eq!(early.recycled, 0);

    h.clock.advance(Duration::days(5));
    let first = sweeper.sweep().await.unwrap();
    assert_eq!(first.recycled, 1);
    assert_eq!(first.tabs_scanned, vec!["Archive - January 2024".to_string()]);

    let recycle = read(&h.workbooks.outbound, tabs::RECYCLE).await;
    assert_eq!(recycle.rows.len(), 1);
    assert_eq!(recycle.rows[0][0], "Bo");
    assert_eq!(recycle.rows[0][2], "2145550183");
    assert_eq!(recycle.rows[0][8], "Run 2");

    let archive = read(&h.workbooks.archive, "Archive - January 2024").await;
    assert_eq!(archive.rows[1][27], "Recycled 2024-01-15");

    let second = sweeper.sweep().await.unwrap();
    assert_eq!(second.recycled, 0);
    assert_eq!(read(&h.workbooks.outbound, tabs::RECYCLE).await.rows.len(), 1);
}

#[tokio::test]
async fn expired_lease_stops_polling_without_draining() {
    let h = harness().await;
    assert!(h.pipeline.poll().await.unwrap().is_none());

    h.pipeline.lease().start().await.unwrap();
    h.workbooks.inbox.put_pending(BATCH.as_bytes().to_vec()).await.unwrap();
    h.clock.advance(Duration::minutes(91));

    let report = h.pipeline.poll().await.unwrap().unwrap();
    assert!(report.polling_stopped);
    assert_eq!(report.message, "Polling stopped after 90 minutes.");
    assert_eq!(h.pipeline.lease().state().await.unwrap(), LeaseState::Inactive);

    let manual = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(manual.ingested, 3);
}

#[tokio::test]
async fn counts_follow_ingestion() {
    let h = harness().await;
    h.workbooks.inbox.put_pending(BATCH.as_bytes().to_vec()).await.unwrap();
    h.pipeline.run_cycle().await.unwrap();

    let counts = count_leads(
        h.workbooks.outbound.as_ref(),
        tabs::OUTBOUND_LEADS,
        h.workbooks.results.as_ref(),
    )
    .await
    .unwrap();
    assert_eq!(counts.runs[&2], 1);
    assert_eq!(counts.buckets["Good Leads"], 1);
    assert_eq!(counts.buckets["Bad Leads"], 1);
    assert_eq!(counts.buckets["Not Interested Leads"], 0);
}
