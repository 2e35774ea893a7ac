//! Async drivers that cross the I/O boundary on behalf of the synchronous
//! state machines.
//!
//! A read request and a checkpoint write are the only operations that cross
//! an asynchronous boundary; everything else happens one message at a time
//! inside the reader, subscription and projection state machines. The
//! drivers here execute at most one read per reader and one projection write
//! at a time, so completions are observed in issue order by construction.

use crate::errors::{LogResult, ProjectionError, ProjectionResult};
use crate::log::EventLog;
use crate::messages::{ProjectionCommand, ProjectionReport, ReadRequest, SubscriptionNotification};
use crate::projection::{CheckpointRecord, CoreProjection, ProjectionHandler, ProjectionPhase};
use crate::reader::{ReadCompleted, CATCH_UP_DELAY};
use crate::subscription::{ReaderSubscription, ReaderSubscriptionOptions};
use crate::types::SubscriptionId;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Executes one bounded read request against the log.
pub async fn execute_read<L: EventLog + ?Sized>(
    log: &L,
    request: ReadRequest,
) -> LogResult<ReadCompleted> {
    match request {
        ReadRequest::All {
            from,
            max_count,
            resolve_links,
        } => log
            .read_all_forward(from, max_count, resolve_links)
            .await
            .map(ReadCompleted::All),
        ReadRequest::Stream {
            stream_id,
            from_number,
            max_count,
            resolve_links,
        } => log
            .read_stream_forward(&stream_id, from_number, max_count, resolve_links)
            .await
            .map(ReadCompleted::Stream),
    }
}

/// Pumps a subscription's readers against the log, delivering notifications
/// to `sink` until it breaks, the readers all dispose, or a fault occurs.
///
/// Delayed re-requests honor the catch-up delay, so a live subscription
/// never busy-polls the log tail.
pub async fn pump_subscription<L, F>(
    log: &L,
    subscription: &mut ReaderSubscription,
    mut sink: F,
) -> ProjectionResult<()>
where
    L: EventLog + ?Sized,
    F: FnMut(SubscriptionNotification) -> ControlFlow<()>,
{
    loop {
        let pending = subscription.take_pending_reads();
        if pending.is_empty() {
            // All readers disposed or paused: nothing left to drive.
            return Ok(());
        }
        for (reader_id, read) in pending {
            if read.delay {
                tokio::time::sleep(CATCH_UP_DELAY).await;
            }
            let completed = execute_read(log, read.request).await?;
            let notifications = subscription.handle_read_completed(reader_id, completed)?;
            for notification in notifications {
                if sink(notification) == ControlFlow::Break(()) {
                    subscription.unsubscribe();
                    return Ok(());
                }
            }
        }
    }
}

/// Owns a projection, its subscription and the log connection, and drives
/// the whole pipeline: checkpoint load, subscription, event handling, and
/// the ordered write protocol.
pub struct ProjectionCoordinator<L, H>
where
    L: EventLog,
    H: ProjectionHandler,
{
    log: Arc<L>,
    projection: CoreProjection<H>,
    subscription_options: ReaderSubscriptionOptions,
}

impl<L, H> ProjectionCoordinator<L, H>
where
    L: EventLog,
    H: ProjectionHandler,
{
    /// Creates a coordinator for `projection` over `log`.
    pub fn new(
        log: Arc<L>,
        projection: CoreProjection<H>,
        subscription_options: ReaderSubscriptionOptions,
    ) -> Self {
        Self {
            log,
            projection,
            subscription_options,
        }
    }

    /// The driven projection.
    pub const fn projection(&self) -> &CoreProjection<H> {
        &self.projection
    }

    /// Runs the projection until its input is exhausted, then commits a
    /// final checkpoint and stops.
    ///
    /// Returns all lifecycle reports emitted along the way. The subscription
    /// uses stop-on-eof readers, so this is a catch-up run: it processes the
    /// log as of now and terminates rather than tailing forever.
    #[instrument(skip(self), fields(projection = %self.projection.name()))]
    pub async fn run_until_eof(&mut self) -> ProjectionResult<Vec<ProjectionReport>> {
        let mut reports = Vec::new();

        self.projection.handle_command(ProjectionCommand::Start)?;
        let record = self.load_checkpoint_record().await?;
        let order_version = self
            .last_event_number(&self.projection.order_stream())
            .await?;
        let checkpoint_version = self
            .last_event_number(&self.projection.checkpoint_stream())
            .await?;
        reports.extend(self.projection.on_checkpoint_loaded(
            record,
            order_version,
            checkpoint_version,
        )?);

        let mut subscription = ReaderSubscription::subscribe(
            SubscriptionId::new(),
            self.projection.tagger().clone(),
            self.projection.subscribe_from().clone(),
            self.subscription_options.clone().with_stop_on_eof(),
        )?;
        subscription.request_events()?;
        reports.extend(self.projection.on_subscribed()?);

        loop {
            let pending = subscription.take_pending_reads();
            if pending.is_empty() {
                break;
            }
            for (reader_id, read) in pending {
                if read.delay {
                    tokio::time::sleep(CATCH_UP_DELAY).await;
                }
                let completed = execute_read(&*self.log, read.request).await?;
                let notifications = subscription.handle_read_completed(reader_id, completed)?;
                for notification in notifications {
                    reports.extend(self.projection.handle_notification(notification)?);
                    self.flush_writes(&mut reports).await?;
                    if self.projection.phase() == ProjectionPhase::Faulted {
                        subscription.unsubscribe();
                        return Ok(reports);
                    }
                }
            }
        }
        subscription.unsubscribe();

        reports.extend(self.projection.handle_command(ProjectionCommand::Stop)?);
        self.flush_writes(&mut reports).await?;
        debug!(projection = %self.projection.name(), "catch-up run finished");
        Ok(reports)
    }

    /// Issues queued projection writes one at a time, in issue order.
    async fn flush_writes(&mut self, reports: &mut Vec<ProjectionReport>) -> ProjectionResult<()> {
        while let Some(write) = self.projection.take_write() {
            let completed = self
                .log
                .write_events(&write.stream_id, write.expected_version, write.events)
                .await?;
            reports.extend(self.projection.handle_write_completed(completed)?);
        }
        Ok(())
    }

    async fn load_checkpoint_record(&self) -> ProjectionResult<Option<CheckpointRecord>> {
        let completed = self
            .log
            .read_stream_backward(&self.projection.checkpoint_stream(), -1, 1, false)
            .await?;
        let Some((resolved, _)) = completed.events.first() else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&resolved.record().data)
            .map_err(|e| ProjectionError::Codec(e.to_string()))?;
        Ok(Some(record))
    }

    async fn last_event_number(&self, stream: &crate::types::StreamId) -> ProjectionResult<i64> {
        let completed = self.log.read_stream_backward(stream, -1, 1, false).await?;
        Ok(completed.last_number)
    }
}
