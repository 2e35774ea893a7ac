//! Messages exchanged between the engine's components.
//!
//! Components communicate exclusively through these closed tagged unions;
//! each component handles one message to completion before the next. There is
//! no shared mutable state between a reader and its subscription, or between
//! a subscription and its projection, beyond the messages exchanged.

use crate::event::DistributedEvent;
use crate::tag::{CheckpointTag, TfPosition};
use crate::types::{ReaderId, StreamId, SubscriptionId, Timestamp};

/// A bounded read request a reader asks its driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadRequest {
    /// Read the whole log forward from a position.
    All {
        /// Position to read from.
        from: TfPosition,
        /// Page size bound.
        max_count: usize,
        /// Whether to resolve link events.
        resolve_links: bool,
    },
    /// Read one stream forward from an event number.
    Stream {
        /// Stream to read.
        stream_id: StreamId,
        /// Event number to read from.
        from_number: i64,
        /// Page size bound.
        max_count: usize,
        /// Whether to resolve link events.
        resolve_links: bool,
    },
}

/// A queued read request, possibly deferred by the catch-up delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRead {
    /// The read to perform.
    pub request: ReadRequest,
    /// Whether the driver should wait the catch-up delay first (set after
    /// observing the end of the log, to avoid busy-polling the tail).
    pub delay: bool,
}

/// Low-level notifications published by an event reader.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderNotification {
    /// A committed event was observed.
    Committed(DistributedEvent),
    /// A position-only delivery: the reader reached this position without an
    /// event to deliver (e.g. the end of the log).
    ProgressMarker {
        /// The publishing reader.
        reader_id: ReaderId,
        /// The position reached.
        position: TfPosition,
        /// Progress estimate (0–100).
        progress: f32,
    },
    /// The reader found no new events and will retry after the catch-up
    /// delay; live subscribers may join.
    Idle {
        /// The publishing reader.
        reader_id: ReaderId,
        /// When the reader went idle.
        at: Timestamp,
    },
    /// The reader reached its end condition and disposed itself.
    Eof {
        /// The publishing reader.
        reader_id: ReaderId,
    },
}

impl ReaderNotification {
    /// The reader this notification originated from.
    pub const fn reader_id(&self) -> ReaderId {
        match self {
            Self::Committed(event) => event.reader_id,
            Self::ProgressMarker { reader_id, .. }
            | Self::Idle { reader_id, .. }
            | Self::Eof { reader_id } => *reader_id,
        }
    }
}

/// Subscription-level notifications consumed by a projection.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionNotification {
    /// An event passed the subscription's ordering and dedup filters.
    EventReceived {
        /// The owning subscription.
        subscription_id: SubscriptionId,
        /// The delivered event.
        event: DistributedEvent,
        /// The checkpoint tag at which the event was observed.
        tag: CheckpointTag,
        /// Per-subscription delivery sequence number.
        sequence: u64,
        /// Progress estimate (0–100).
        progress: f32,
    },
    /// A safe point to commit a checkpoint.
    CheckpointSuggested {
        /// The owning subscription.
        subscription_id: SubscriptionId,
        /// The tag to checkpoint at.
        tag: CheckpointTag,
        /// Progress estimate (0–100).
        progress: f32,
    },
    /// All readers reached their end conditions.
    EofReached {
        /// The owning subscription.
        subscription_id: SubscriptionId,
        /// The final tag.
        tag: CheckpointTag,
    },
}

impl SubscriptionNotification {
    /// The subscription this notification belongs to.
    pub const fn subscription_id(&self) -> SubscriptionId {
        match self {
            Self::EventReceived {
                subscription_id, ..
            }
            | Self::CheckpointSuggested {
                subscription_id, ..
            }
            | Self::EofReached {
                subscription_id, ..
            } => *subscription_id,
        }
    }

    /// The checkpoint tag carried by this notification.
    pub const fn tag(&self) -> &CheckpointTag {
        match self {
            Self::EventReceived { tag, .. }
            | Self::CheckpointSuggested { tag, .. }
            | Self::EofReached { tag, .. } => tag,
        }
    }
}

/// Lifecycle commands accepted by a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionCommand {
    /// Load the checkpoint and begin processing.
    Start,
    /// Commit a final checkpoint and stop.
    Stop,
    /// Stop immediately; issue no further writes.
    Kill,
    /// Report the current state for a partition.
    GetState {
        /// The partition to report (empty string for the root partition).
        partition: String,
    },
    /// Report recently handled events.
    GetDebugState,
    /// Report current statistics.
    UpdateStatistics,
}

/// Lifecycle reports emitted by a projection.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionReport {
    /// The projection subscribed and is running.
    Started,
    /// The projection stopped; `completed` is true when it had reached the
    /// end of its input.
    Stopped {
        /// Whether the projection had reached EOF when stopped.
        completed: bool,
    },
    /// The projection faulted and will process no further events.
    Faulted {
        /// Human-readable fault reason.
        reason: String,
    },
    /// Response to [`ProjectionCommand::GetState`].
    StateReport {
        /// The partition the state belongs to.
        partition: String,
        /// The current state bytes, if any.
        state: Option<Vec<u8>>,
    },
    /// Response to [`ProjectionCommand::GetDebugState`].
    DebugStateReport {
        /// Recently handled events, newest last.
        events: Vec<crate::projection::DebugEvent>,
    },
    /// Response to [`ProjectionCommand::UpdateStatistics`].
    StatisticsReport {
        /// Current statistics snapshot.
        statistics: crate::projection::ProjectionStatistics,
    },
}
