//! The projection checkpoint/write pipeline.
//!
//! A [`CoreProjection`] consumes its subscription's event and checkpoint
//! boundary stream, invokes the user handler, buffers emitted events, and
//! commits checkpoints through a two-stream write protocol: an order record
//! first (the idempotency token), then the buffered emitted events and the
//! checkpoint record. A crash between the two writes leaves the order record
//! as detectable, replayable evidence instead of a silently lost checkpoint.
//!
//! The projection is a synchronous message-handling state machine; an async
//! coordinator feeds it subscription notifications and write completions and
//! executes its queued writes one at a time, in issue order.

use crate::errors::{ProjectionError, ProjectionResult};
use crate::event::EventRecord;
use crate::log::{ExpectedVersion, NewEvent, WriteEventsCompleted};
use crate::messages::{ProjectionCommand, ProjectionReport, SubscriptionNotification};
use crate::tag::CheckpointTag;
use crate::tagger::PositionTagger;
use crate::types::{EventType, ProjectionName, StreamId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Event type of order records.
pub const ORDER_EVENT_TYPE: &str = "$ProjectionOrder";

/// Event type of checkpoint records.
pub const CHECKPOINT_EVENT_TYPE: &str = "$ProjectionCheckpoint";

const DEBUG_EVENTS_KEPT: usize = 10;

/// Configuration of a projection's checkpointing behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Commit a checkpoint after this many handled events.
    pub checkpoint_handled_threshold: u64,
}

impl CheckpointConfig {
    /// Creates the default configuration.
    pub const fn new() -> Self {
        Self {
            checkpoint_handled_threshold: 4000,
        }
    }

    /// Sets the handled-events threshold.
    #[must_use]
    pub const fn with_handled_threshold(mut self, threshold: u64) -> Self {
        self.checkpoint_handled_threshold = threshold;
        self
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// An event a handler asks to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedEvent {
    /// Target stream.
    pub stream_id: StreamId,
    /// The event type.
    pub event_type: EventType,
    /// Whether the payload is JSON.
    pub is_json: bool,
    /// The event payload.
    pub data: Vec<u8>,
    /// Opaque metadata.
    pub metadata: Vec<u8>,
}

/// The result of handling one event.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    /// Updated projection state, `None` to keep the current state.
    pub new_state: Option<Vec<u8>>,
    /// Events to append once the next checkpoint commits.
    pub emitted: Vec<EmittedEvent>,
}

/// Failure of user projection code, captured at the handler boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// The capability interface to the user's projection code.
///
/// The runtime that executes user scripts is out of scope; the engine only
/// requires "given state and raw event bytes, produce emitted events and
/// updated state".
pub trait ProjectionHandler: Send {
    /// Handles one event against the current state.
    fn handle(
        &mut self,
        state: Option<&[u8]>,
        event: &EventRecord,
        tag: &CheckpointTag,
    ) -> Result<HandlerOutcome, HandlerError>;
}

/// Lifecycle phase of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionPhase {
    /// Not started, or cleanly stopped.
    Stopped,
    /// Loading the persisted checkpoint.
    Starting,
    /// Checkpoint loaded, subscription being established.
    Subscribed,
    /// Processing events.
    Running,
    /// Committing a final checkpoint before stopping.
    Stopping,
    /// Terminally failed; must be disposed before any restart.
    Faulted,
    /// Killed; no further writes are issued.
    Killed,
}

/// Statistics snapshot reported to management.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionStatistics {
    /// Current phase.
    pub phase: ProjectionPhase,
    /// Events handled since start.
    pub events_processed: u64,
    /// Events handled since the last committed checkpoint.
    pub events_since_checkpoint: u64,
    /// Checkpoints committed since start.
    pub checkpoints_completed: u64,
    /// Writes queued but not yet issued.
    pub pending_writes: usize,
    /// Progress estimate (0–100).
    pub progress: f32,
}

/// A recently handled event, for debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEvent {
    /// Originating stream.
    pub stream_id: String,
    /// Sequence number in the originating stream.
    pub sequence: i64,
    /// The event type.
    pub event_type: String,
    /// Prepare offset at which the event was observed.
    pub log_position: i64,
    /// Raw payload bytes.
    pub body: Vec<u8>,
}

/// The persisted checkpoint record: the resumable tag plus the state
/// snapshot. Serialized as JSON; must round-trip exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The position the projection had fully processed.
    pub tag: CheckpointTag,
    /// The state snapshot at that position.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<Vec<u8>>,
}

/// The order record written ahead of each checkpoint: an idempotency token
/// covering the tag and the number of pending emitted events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// The tag the upcoming checkpoint commits at.
    pub tag: CheckpointTag,
    /// How many buffered emitted events the checkpoint carries.
    pub pending_events: u64,
}

/// What a queued write is part of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePurpose {
    /// The order record ahead of a checkpoint.
    Order,
    /// One batch of buffered emitted events.
    EmittedEvents,
    /// The checkpoint record itself.
    Checkpoint,
}

/// A write queued by the projection for its driver to execute.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// Target stream.
    pub stream_id: StreamId,
    /// Optimistic concurrency check.
    pub expected_version: ExpectedVersion,
    /// Events to append.
    pub events: Vec<NewEvent>,
    /// What this write is part of.
    pub purpose: WritePurpose,
}

#[derive(Debug)]
struct InProgressCheckpoint {
    tag: CheckpointTag,
    state: Option<Vec<u8>>,
    emit_batches_remaining: usize,
}

/// The projection state machine.
pub struct CoreProjection<H: ProjectionHandler> {
    name: ProjectionName,
    tagger: PositionTagger,
    config: CheckpointConfig,
    handler: H,

    phase: ProjectionPhase,
    state: Option<Vec<u8>>,
    last_checkpoint_tag: CheckpointTag,
    last_processed_tag: CheckpointTag,
    events_processed: u64,
    events_since_checkpoint: u64,
    checkpoints_completed: u64,
    progress: f32,
    eof_reached: bool,
    expected_sequence: Option<u64>,

    pending_emits: Vec<EmittedEvent>,
    outbox: VecDeque<WriteRequest>,
    in_flight: Option<WriteRequest>,
    checkpoint_in_progress: Option<InProgressCheckpoint>,

    order_stream_version: i64,
    checkpoint_stream_version: i64,
    recent_events: VecDeque<DebugEvent>,
}

impl<H: ProjectionHandler> CoreProjection<H> {
    /// Creates a stopped projection.
    pub fn new(
        name: ProjectionName,
        tagger: PositionTagger,
        config: CheckpointConfig,
        handler: H,
    ) -> Self {
        let zero = tagger.make_zero_checkpoint_tag();
        Self {
            name,
            tagger,
            config,
            handler,
            phase: ProjectionPhase::Stopped,
            state: None,
            last_checkpoint_tag: zero.clone(),
            last_processed_tag: zero,
            events_processed: 0,
            events_since_checkpoint: 0,
            checkpoints_completed: 0,
            progress: 0.0,
            eof_reached: false,
            expected_sequence: None,
            pending_emits: Vec::new(),
            outbox: VecDeque::new(),
            in_flight: None,
            checkpoint_in_progress: None,
            order_stream_version: -1,
            checkpoint_stream_version: -1,
            recent_events: VecDeque::new(),
        }
    }

    /// The projection's private order stream.
    pub fn order_stream(&self) -> StreamId {
        StreamId::try_new(format!("$projections-{}-order", self.name))
            .expect("projection stream names derived from a valid name are valid")
    }

    /// The projection's private checkpoint stream.
    pub fn checkpoint_stream(&self) -> StreamId {
        StreamId::try_new(format!("$projections-{}-checkpoint", self.name))
            .expect("projection stream names derived from a valid name are valid")
    }

    /// The projection's name.
    pub const fn name(&self) -> &ProjectionName {
        &self.name
    }

    /// The current phase.
    pub const fn phase(&self) -> ProjectionPhase {
        self.phase
    }

    /// The tagger this projection subscribes with.
    pub const fn tagger(&self) -> &PositionTagger {
        &self.tagger
    }

    /// The tag to subscribe from: the last committed checkpoint, or the zero
    /// tag for a fresh projection.
    pub const fn subscribe_from(&self) -> &CheckpointTag {
        &self.last_checkpoint_tag
    }

    /// Handles a management command.
    pub fn handle_command(
        &mut self,
        command: ProjectionCommand,
    ) -> ProjectionResult<Vec<ProjectionReport>> {
        match command {
            ProjectionCommand::Start => self.start(),
            ProjectionCommand::Stop => self.stop(),
            ProjectionCommand::Kill => {
                self.kill();
                Ok(Vec::new())
            }
            ProjectionCommand::GetState { partition } => Ok(vec![ProjectionReport::StateReport {
                partition,
                state: self.state.clone(),
            }]),
            ProjectionCommand::GetDebugState => Ok(vec![ProjectionReport::DebugStateReport {
                events: self.recent_events.iter().cloned().collect(),
            }]),
            ProjectionCommand::UpdateStatistics => Ok(vec![ProjectionReport::StatisticsReport {
                statistics: self.statistics(),
            }]),
        }
    }

    fn start(&mut self) -> ProjectionResult<Vec<ProjectionReport>> {
        if self.phase != ProjectionPhase::Stopped {
            return Err(ProjectionError::InvalidTransition(
                "start is only legal from the stopped phase",
            ));
        }
        info!(projection = %self.name, "starting projection");
        self.phase = ProjectionPhase::Starting;
        Ok(Vec::new())
    }

    /// Feeds the loaded checkpoint in, completing the starting phase.
    ///
    /// `record` is the newest persisted checkpoint, if any; the stream
    /// versions are the current last event numbers of the order and
    /// checkpoint streams (`-1` when absent).
    pub fn on_checkpoint_loaded(
        &mut self,
        record: Option<CheckpointRecord>,
        order_stream_version: i64,
        checkpoint_stream_version: i64,
    ) -> ProjectionResult<Vec<ProjectionReport>> {
        if self.phase != ProjectionPhase::Starting {
            return Err(ProjectionError::InvalidTransition(
                "checkpoint load completion outside the starting phase",
            ));
        }
        if let Some(record) = record {
            if !self.tagger.is_compatible(&record.tag) {
                self.phase = ProjectionPhase::Faulted;
                return Err(ProjectionError::IncompatibleCheckpoint { tag: record.tag });
            }
            debug!(projection = %self.name, tag = %record.tag, "resuming from checkpoint");
            self.last_checkpoint_tag = record.tag.clone();
            self.last_processed_tag = record.tag;
            self.state = record.state;
        } else {
            debug!(projection = %self.name, "no checkpoint found, starting from zero");
        }
        self.order_stream_version = order_stream_version;
        self.checkpoint_stream_version = checkpoint_stream_version;
        self.phase = ProjectionPhase::Subscribed;
        Ok(Vec::new())
    }

    /// Marks the subscription as established; the projection starts running.
    pub fn on_subscribed(&mut self) -> ProjectionResult<Vec<ProjectionReport>> {
        if self.phase != ProjectionPhase::Subscribed {
            return Err(ProjectionError::InvalidTransition(
                "subscription confirmation outside the subscribed phase",
            ));
        }
        self.phase = ProjectionPhase::Running;
        info!(projection = %self.name, "projection started");
        Ok(vec![ProjectionReport::Started])
    }

    /// Handles a subscription notification.
    pub fn handle_notification(
        &mut self,
        notification: SubscriptionNotification,
    ) -> ProjectionResult<Vec<ProjectionReport>> {
        match notification {
            SubscriptionNotification::EventReceived {
                event,
                tag,
                sequence,
                progress,
                ..
            } => {
                self.progress = progress;
                self.on_event(&event.resolved.record().clone(), tag, sequence)
            }
            SubscriptionNotification::CheckpointSuggested { tag, progress, .. } => {
                self.progress = progress;
                if self.phase == ProjectionPhase::Running {
                    self.begin_checkpoint(tag);
                }
                Ok(Vec::new())
            }
            SubscriptionNotification::EofReached { .. } => {
                self.eof_reached = true;
                Ok(Vec::new())
            }
        }
    }

    fn on_event(
        &mut self,
        record: &EventRecord,
        tag: CheckpointTag,
        sequence: u64,
    ) -> ProjectionResult<Vec<ProjectionReport>> {
        if !matches!(self.phase, ProjectionPhase::Running) {
            // Deliveries racing a stop/kill are discarded, not errors.
            return Ok(Vec::new());
        }
        if let Some(expected) = self.expected_sequence {
            if sequence != expected {
                return self.fault(format!(
                    "subscription delivered sequence {sequence}, expected {expected}"
                ));
            }
        }
        self.expected_sequence = Some(sequence + 1);

        let outcome = match self.handler.handle(self.state.as_deref(), record, &tag) {
            Ok(outcome) => outcome,
            Err(error) => return self.fault(error.to_string()),
        };
        if let Some(new_state) = outcome.new_state {
            self.state = Some(new_state);
        }
        self.pending_emits.extend(outcome.emitted);
        self.events_processed += 1;
        self.events_since_checkpoint += 1;
        self.last_processed_tag = tag.clone();

        self.recent_events.push_back(DebugEvent {
            stream_id: record.stream_id.to_string(),
            sequence: record.event_number,
            event_type: record.event_type.to_string(),
            log_position: tag.position().map_or(-1, |p| p.prepare),
            body: record.data.clone(),
        });
        if self.recent_events.len() > DEBUG_EVENTS_KEPT {
            self.recent_events.pop_front();
        }

        if self.events_since_checkpoint >= self.config.checkpoint_handled_threshold {
            self.begin_checkpoint(tag);
        }
        Ok(Vec::new())
    }

    /// Starts the two-write checkpoint commit at `tag`, unless one is
    /// already in flight or the tag has not advanced.
    fn begin_checkpoint(&mut self, tag: CheckpointTag) {
        if self.checkpoint_in_progress.is_some() {
            return;
        }
        if !matches!(
            self.phase,
            ProjectionPhase::Running | ProjectionPhase::Stopping
        ) {
            return;
        }
        if tag.partial_cmp(&self.last_checkpoint_tag) != Some(std::cmp::Ordering::Greater) {
            return;
        }

        let emits = std::mem::take(&mut self.pending_emits);
        let order = OrderRecord {
            tag: tag.clone(),
            pending_events: emits.len() as u64,
        };
        let body = serde_json::to_vec(&order).unwrap_or_default();
        let expected = if self.order_stream_version < 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(self.order_stream_version)
        };
        debug!(
            projection = %self.name,
            tag = %tag,
            pending = emits.len(),
            "committing checkpoint: order record first"
        );
        self.outbox.push_back(WriteRequest {
            stream_id: self.order_stream(),
            expected_version: expected,
            events: vec![NewEvent {
                event_id: crate::types::EventId::new(),
                event_type: EventType::try_new(ORDER_EVENT_TYPE)
                    .expect("constant event type is valid"),
                is_json: true,
                data: body,
                metadata: Vec::new(),
            }],
            purpose: WritePurpose::Order,
        });

        let emit_batches: Vec<WriteRequest> = Self::emit_batches(emits);
        self.checkpoint_in_progress = Some(InProgressCheckpoint {
            tag,
            state: self.state.clone(),
            emit_batches_remaining: emit_batches.len(),
        });
        // Queued behind the order write; dropped wholesale if it conflicts.
        for batch in emit_batches {
            self.outbox.push_back(batch);
        }
        self.events_since_checkpoint = 0;
    }

    fn emit_batches(emits: Vec<EmittedEvent>) -> Vec<WriteRequest> {
        let mut batches: Vec<WriteRequest> = Vec::new();
        for emit in emits {
            // Preserve emission order: append to the last batch only while
            // it targets the same stream.
            if let Some(last) = batches.last_mut() {
                if last.stream_id == emit.stream_id {
                    last.events.push(NewEvent {
                        event_id: crate::types::EventId::new(),
                        event_type: emit.event_type,
                        is_json: emit.is_json,
                        data: emit.data,
                        metadata: emit.metadata,
                    });
                    continue;
                }
            }
            batches.push(WriteRequest {
                stream_id: emit.stream_id,
                expected_version: ExpectedVersion::Any,
                events: vec![NewEvent {
                    event_id: crate::types::EventId::new(),
                    event_type: emit.event_type,
                    is_json: emit.is_json,
                    data: emit.data,
                    metadata: emit.metadata,
                }],
                purpose: WritePurpose::EmittedEvents,
            });
        }
        batches
    }

    fn queue_checkpoint_write(&mut self, tag: &CheckpointTag, state: Option<Vec<u8>>) {
        let record = CheckpointRecord {
            tag: tag.clone(),
            state,
        };
        let body = serde_json::to_vec(&record).unwrap_or_default();
        let expected = if self.checkpoint_stream_version < 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(self.checkpoint_stream_version)
        };
        self.outbox.push_back(WriteRequest {
            stream_id: self.checkpoint_stream(),
            expected_version: expected,
            events: vec![NewEvent {
                event_id: crate::types::EventId::new(),
                event_type: EventType::try_new(CHECKPOINT_EVENT_TYPE)
                    .expect("constant event type is valid"),
                is_json: true,
                data: body,
                metadata: Vec::new(),
            }],
            purpose: WritePurpose::Checkpoint,
        });
    }

    /// Takes the next write to execute, if one may be issued.
    ///
    /// At most one write is in flight at a time, and nothing is issued after
    /// a kill.
    pub fn take_write(&mut self) -> Option<WriteRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        if matches!(self.phase, ProjectionPhase::Killed | ProjectionPhase::Faulted) {
            return None;
        }
        let request = self.outbox.pop_front()?;
        self.in_flight = Some(request.clone());
        Some(request)
    }

    /// Feeds back the completion of the in-flight write.
    pub fn handle_write_completed(
        &mut self,
        completed: WriteEventsCompleted,
    ) -> ProjectionResult<Vec<ProjectionReport>> {
        let Some(request) = self.in_flight.take() else {
            return Err(ProjectionError::InvalidTransition(
                "write completion without an in-flight write",
            ));
        };
        if matches!(self.phase, ProjectionPhase::Killed) {
            // Draining after kill: observe and discard.
            return Ok(Vec::new());
        }

        match (request.purpose, completed) {
            (WritePurpose::Order, WriteEventsCompleted::Success { last_number, .. }) => {
                self.order_stream_version = last_number;
                let Some(in_progress) = self.checkpoint_in_progress.as_ref() else {
                    return Err(ProjectionError::InvalidTransition(
                        "order write completed without a checkpoint in progress",
                    ));
                };
                if in_progress.emit_batches_remaining == 0 {
                    let tag = in_progress.tag.clone();
                    let state = in_progress.state.clone();
                    self.queue_checkpoint_write(&tag, state);
                }
                Ok(Vec::new())
            }
            (WritePurpose::Order, WriteEventsCompleted::WrongExpectedVersion { current }) => {
                // Another writer owns the order stream now. Reloading is the
                // management layer's decision; never retried here.
                let stream = request.stream_id;
                self.outbox.clear();
                self.checkpoint_in_progress = None;
                self.phase = ProjectionPhase::Faulted;
                warn!(projection = %self.name, %stream, current, "order stream write conflict");
                Err(ProjectionError::ConcurrentWriter { stream, current })
            }
            (
                WritePurpose::Order | WritePurpose::EmittedEvents | WritePurpose::Checkpoint,
                WriteEventsCompleted::StreamDeleted,
            ) => {
                let stream = request.stream_id;
                self.outbox.clear();
                self.checkpoint_in_progress = None;
                self.phase = ProjectionPhase::Faulted;
                Err(ProjectionError::StreamDeleted(stream))
            }
            (WritePurpose::EmittedEvents, WriteEventsCompleted::Success { .. }) => {
                let Some(in_progress) = self.checkpoint_in_progress.as_mut() else {
                    return Err(ProjectionError::InvalidTransition(
                        "emit write completed without a checkpoint in progress",
                    ));
                };
                in_progress.emit_batches_remaining -= 1;
                if in_progress.emit_batches_remaining == 0 {
                    let tag = in_progress.tag.clone();
                    let state = in_progress.state.clone();
                    self.queue_checkpoint_write(&tag, state);
                }
                Ok(Vec::new())
            }
            (WritePurpose::EmittedEvents, WriteEventsCompleted::WrongExpectedVersion { current }) => {
                let stream = request.stream_id;
                self.outbox.clear();
                self.checkpoint_in_progress = None;
                self.phase = ProjectionPhase::Faulted;
                Err(ProjectionError::ConcurrentWriter { stream, current })
            }
            (WritePurpose::Checkpoint, WriteEventsCompleted::Success { last_number, .. }) => {
                self.checkpoint_stream_version = last_number;
                let Some(in_progress) = self.checkpoint_in_progress.take() else {
                    return Err(ProjectionError::InvalidTransition(
                        "checkpoint write completed without a checkpoint in progress",
                    ));
                };
                self.last_checkpoint_tag = in_progress.tag;
                self.checkpoints_completed += 1;
                debug!(
                    projection = %self.name,
                    tag = %self.last_checkpoint_tag,
                    "checkpoint committed"
                );
                if self.phase == ProjectionPhase::Stopping {
                    // Events handled while this checkpoint was in flight
                    // still need flushing before the stop completes.
                    let tag = self.last_processed_tag.clone();
                    self.begin_checkpoint(tag);
                    if self.checkpoint_in_progress.is_none() && self.outbox.is_empty() {
                        return Ok(self.finish_stop());
                    }
                }
                Ok(Vec::new())
            }
            (WritePurpose::Checkpoint, WriteEventsCompleted::WrongExpectedVersion { current }) => {
                let stream = request.stream_id;
                self.outbox.clear();
                self.checkpoint_in_progress = None;
                self.phase = ProjectionPhase::Faulted;
                Err(ProjectionError::ConcurrentWriter { stream, current })
            }
        }
    }

    fn stop(&mut self) -> ProjectionResult<Vec<ProjectionReport>> {
        match self.phase {
            ProjectionPhase::Running => {
                info!(projection = %self.name, "stopping projection");
                self.phase = ProjectionPhase::Stopping;
                let tag = self.last_processed_tag.clone();
                self.begin_checkpoint(tag);
                if self.checkpoint_in_progress.is_none() && self.outbox.is_empty() {
                    // Nothing to flush.
                    return Ok(self.finish_stop());
                }
                Ok(Vec::new())
            }
            ProjectionPhase::Starting | ProjectionPhase::Subscribed => Ok(self.finish_stop()),
            ProjectionPhase::Stopped | ProjectionPhase::Stopping => Ok(Vec::new()),
            ProjectionPhase::Faulted | ProjectionPhase::Killed => {
                Err(ProjectionError::InvalidTransition(
                    "a faulted or killed projection must be disposed, not stopped",
                ))
            }
        }
    }

    fn finish_stop(&mut self) -> Vec<ProjectionReport> {
        self.phase = ProjectionPhase::Stopped;
        self.expected_sequence = None;
        info!(projection = %self.name, completed = self.eof_reached, "projection stopped");
        vec![ProjectionReport::Stopped {
            completed: self.eof_reached,
        }]
    }

    /// Kills the projection: no further writes are issued, queued writes are
    /// dropped, and in-flight completions are drained and discarded.
    fn kill(&mut self) {
        info!(projection = %self.name, "projection killed");
        self.phase = ProjectionPhase::Killed;
        self.outbox.clear();
        self.checkpoint_in_progress = None;
        self.pending_emits.clear();
    }

    fn fault(&mut self, reason: String) -> ProjectionResult<Vec<ProjectionReport>> {
        warn!(projection = %self.name, reason = %reason, "projection faulted");
        self.phase = ProjectionPhase::Faulted;
        self.outbox.clear();
        self.checkpoint_in_progress = None;
        Ok(vec![ProjectionReport::Faulted { reason }])
    }

    /// Current statistics snapshot.
    pub fn statistics(&self) -> ProjectionStatistics {
        ProjectionStatistics {
            phase: self.phase,
            events_processed: self.events_processed,
            events_since_checkpoint: self.events_since_checkpoint,
            checkpoints_completed: self.checkpoints_completed,
            pending_writes: self.outbox.len() + usize::from(self.in_flight.is_some()),
            progress: self.progress,
        }
    }

    /// The last committed checkpoint tag.
    pub const fn last_checkpoint_tag(&self) -> &CheckpointTag {
        &self.last_checkpoint_tag
    }
}
