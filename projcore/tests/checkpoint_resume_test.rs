//! Crash/resume behavior of the projection checkpoint pipeline.
//!
//! Scenario: a projection copies `deposited` events into a ledger stream.
//! - A first catch-up run commits a checkpoint and stops.
//! - A second batch of source events is processed up to the order-stream
//!   write, then the process "crashes" before the emitted events and the
//!   checkpoint record are written.
//! - A reload resumes from the last durable checkpoint: events covered by it
//!   are not re-emitted, the interrupted batch is re-handled, and the new
//!   checkpoint commits against the order stream's advanced version.

use projcore::coordinator::{pump_subscription, ProjectionCoordinator};
use projcore::projection::WritePurpose;
use projcore::{
    CheckpointConfig, CheckpointRecord, CheckpointTag, CoreProjection, EmittedEvent, EventLog,
    EventRecord, EventType, ExpectedVersion, HandlerError, HandlerOutcome, NewEvent,
    ProjectionCommand, ProjectionHandler, ProjectionName, ProjectionReport, PositionTagger,
    ReaderSubscription, ReaderSubscriptionOptions, StreamId, SubscriptionId,
};
use projcore_memory::InMemoryLog;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Copies every handled event into the ledger stream and counts them in
/// state.
struct LedgerCopy;

impl ProjectionHandler for LedgerCopy {
    fn handle(
        &mut self,
        state: Option<&[u8]>,
        event: &EventRecord,
        _tag: &CheckpointTag,
    ) -> Result<HandlerOutcome, HandlerError> {
        let count: u64 = state
            .and_then(|s| std::str::from_utf8(s).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(HandlerOutcome {
            new_state: Some((count + 1).to_string().into_bytes()),
            emitted: vec![EmittedEvent {
                stream_id: StreamId::try_new("ledger").unwrap(),
                event_type: EventType::try_new("ledger-entry").unwrap(),
                is_json: event.is_json,
                data: event.data.clone(),
                metadata: Vec::new(),
            }],
        })
    }
}

fn deposited(data: &[u8]) -> NewEvent {
    NewEvent::json(EventType::try_new("deposited").unwrap(), data.to_vec())
}

fn tagger() -> PositionTagger {
    PositionTagger::event_type_index(
        std::iter::once(EventType::try_new("deposited").unwrap()).collect(),
    )
    .unwrap()
}

fn projection(threshold: u64) -> CoreProjection<LedgerCopy> {
    CoreProjection::new(
        ProjectionName::try_new("ledger-copy").unwrap(),
        tagger(),
        CheckpointConfig::new().with_handled_threshold(threshold),
        LedgerCopy,
    )
}

async fn ledger_entries(log: &InMemoryLog) -> Vec<Vec<u8>> {
    let read = log
        .read_stream_forward(&StreamId::try_new("ledger").unwrap(), 0, 1000, true)
        .await
        .unwrap();
    read.events
        .into_iter()
        .map(|(resolved, _)| resolved.record().data.clone())
        .collect()
}

async fn latest_checkpoint(log: &InMemoryLog) -> Option<CheckpointRecord> {
    let read = log
        .read_stream_backward(
            &StreamId::try_new("$projections-ledger-copy-checkpoint").unwrap(),
            -1,
            1,
            false,
        )
        .await
        .unwrap();
    read.events
        .first()
        .map(|(resolved, _)| serde_json::from_slice(&resolved.record().data).unwrap())
}

#[tokio::test]
async fn catch_up_run_commits_checkpoint_and_restart_does_not_reprocess() {
    let log = Arc::new(InMemoryLog::new());
    let source = StreamId::try_new("acct-1").unwrap();
    log.write_events(
        &source,
        ExpectedVersion::NoStream,
        vec![deposited(b"d1"), deposited(b"d2")],
    )
    .await
    .unwrap();

    let mut coordinator = ProjectionCoordinator::new(
        Arc::clone(&log),
        projection(100),
        ReaderSubscriptionOptions::new(),
    );
    let reports = coordinator.run_until_eof().await.unwrap();
    assert!(reports.contains(&ProjectionReport::Started));
    assert!(reports.contains(&ProjectionReport::Stopped { completed: true }));

    assert_eq!(ledger_entries(&log).await, vec![b"d1".to_vec(), b"d2".to_vec()]);
    let checkpoint = latest_checkpoint(&log).await.expect("checkpoint written");
    assert_eq!(checkpoint.state.as_deref(), Some(&b"2"[..]));

    // Restart over the same log: nothing new to process, nothing re-emitted.
    let mut coordinator = ProjectionCoordinator::new(
        Arc::clone(&log),
        projection(100),
        ReaderSubscriptionOptions::new(),
    );
    let reports = coordinator.run_until_eof().await.unwrap();
    assert!(reports.contains(&ProjectionReport::Stopped { completed: true }));
    assert_eq!(ledger_entries(&log).await.len(), 2);
}

#[tokio::test]
async fn crash_after_order_write_resumes_without_duplicates() {
    let log = Arc::new(InMemoryLog::new());
    let source = StreamId::try_new("acct-1").unwrap();
    log.write_events(
        &source,
        ExpectedVersion::NoStream,
        vec![deposited(b"d1"), deposited(b"d2")],
    )
    .await
    .unwrap();

    // First run commits a durable checkpoint covering d1 and d2.
    let mut coordinator = ProjectionCoordinator::new(
        Arc::clone(&log),
        projection(100),
        ReaderSubscriptionOptions::new(),
    );
    coordinator.run_until_eof().await.unwrap();
    assert_eq!(ledger_entries(&log).await.len(), 2);
    let checkpoint = latest_checkpoint(&log).await.unwrap();

    // More source events arrive.
    log.write_events(
        &source,
        ExpectedVersion::Exact(1),
        vec![deposited(b"d3"), deposited(b"d4")],
    )
    .await
    .unwrap();

    // Drive a second instance by hand up to the order write, then crash.
    let mut p = projection(2);
    p.handle_command(ProjectionCommand::Start).unwrap();
    let order_version = log
        .read_stream_backward(&p.order_stream(), -1, 1, false)
        .await
        .unwrap()
        .last_number;
    let checkpoint_version = log
        .read_stream_backward(&p.checkpoint_stream(), -1, 1, false)
        .await
        .unwrap()
        .last_number;
    p.on_checkpoint_loaded(Some(checkpoint), order_version, checkpoint_version)
        .unwrap();
    p.on_subscribed().unwrap();

    let mut subscription = ReaderSubscription::subscribe(
        SubscriptionId::new(),
        p.tagger().clone(),
        p.subscribe_from().clone(),
        ReaderSubscriptionOptions::new().with_stop_on_eof(),
    )
    .unwrap();
    subscription.request_events().unwrap();
    let mut notifications = Vec::new();
    pump_subscription(&*log, &mut subscription, |n| {
        notifications.push(n);
        ControlFlow::Continue(())
    })
    .await
    .unwrap();
    for notification in notifications {
        p.handle_notification(notification).unwrap();
    }

    // The handled-threshold checkpoint begins: the order record goes out
    // first and becomes durable.
    let order = p.take_write().expect("order write queued");
    assert_eq!(order.purpose, WritePurpose::Order);
    log.write_events(&order.stream_id, order.expected_version, order.events)
        .await
        .unwrap();
    // Crash here: neither the emitted events nor the checkpoint were
    // written; the order record is the only evidence.
    drop(p);

    assert_eq!(ledger_entries(&log).await.len(), 2);

    // Reload: resumes from the last durable checkpoint, re-handles only the
    // interrupted batch, and commits against the advanced order stream.
    let mut coordinator = ProjectionCoordinator::new(
        Arc::clone(&log),
        projection(100),
        ReaderSubscriptionOptions::new(),
    );
    let reports = coordinator.run_until_eof().await.unwrap();
    assert!(reports.contains(&ProjectionReport::Stopped { completed: true }));
    assert!(!reports
        .iter()
        .any(|r| matches!(r, ProjectionReport::Faulted { .. })));

    assert_eq!(
        ledger_entries(&log).await,
        vec![b"d1".to_vec(), b"d2".to_vec(), b"d3".to_vec(), b"d4".to_vec()]
    );
    let checkpoint = latest_checkpoint(&log).await.unwrap();
    assert_eq!(checkpoint.state.as_deref(), Some(&b"4"[..]));
}

#[tokio::test]
async fn concurrent_order_stream_writer_faults_the_projection() {
    let log = Arc::new(InMemoryLog::new());
    let source = StreamId::try_new("acct-1").unwrap();
    log.write_events(&source, ExpectedVersion::NoStream, vec![deposited(b"d1")])
        .await
        .unwrap();

    // Another writer owns the order stream already.
    log.write_events(
        &StreamId::try_new("$projections-ledger-copy-order").unwrap(),
        ExpectedVersion::Any,
        vec![NewEvent::json(
            EventType::try_new("$ProjectionOrder").unwrap(),
            b"{}".to_vec(),
        )],
    )
    .await
    .unwrap();

    // The projection learned an empty order stream before the concurrent
    // writer appeared; its first order write must conflict and fault.
    let mut p = projection(1);
    p.handle_command(ProjectionCommand::Start).unwrap();
    p.on_checkpoint_loaded(None, -1, -1).unwrap();
    p.on_subscribed().unwrap();

    let mut subscription = ReaderSubscription::subscribe(
        SubscriptionId::new(),
        p.tagger().clone(),
        p.subscribe_from().clone(),
        ReaderSubscriptionOptions::new().with_stop_on_eof(),
    )
    .unwrap();
    subscription.request_events().unwrap();
    let mut notifications = Vec::new();
    pump_subscription(&*log, &mut subscription, |n| {
        notifications.push(n);
        ControlFlow::Continue(())
    })
    .await
    .unwrap();
    for notification in notifications {
        p.handle_notification(notification).unwrap();
    }

    let order = p.take_write().expect("order write queued");
    let completed = log
        .write_events(&order.stream_id, order.expected_version, order.events)
        .await
        .unwrap();
    let result = p.handle_write_completed(completed);
    assert!(matches!(
        result,
        Err(projcore::ProjectionError::ConcurrentWriter { .. })
    ));
    // No blind retry, no checkpoint write.
    assert!(p.take_write().is_none());
    assert!(latest_checkpoint(&log).await.is_none());
}
