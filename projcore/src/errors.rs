//! Error types for `ProjCore`.
//!
//! The taxonomy mirrors how each failure is owned and handled:
//!
//! - **Configuration errors** ([`TagError`], checkpoint incompatibility) are
//!   fatal at construction or load time and never silently defaulted.
//! - **Ordering violations** ([`ReaderFault::OrderingViolation`],
//!   [`SubscriptionFault::TagRegression`]) signal a breach of the log-read
//!   contract and terminate the affected reader or subscription; they are
//!   never "fixed" by reordering.
//! - **Write conflicts** are *statuses* on the log port
//!   ([`crate::log::WriteEventsCompleted`]), recoverable only by the
//!   projection that owns the stream, never retried blindly by the write
//!   path ([`ProjectionError::ConcurrentWriter`]).
//! - **Handler faults** are caught at the handler boundary and transition the
//!   projection to `Faulted`.
//! - **Backpressure** (EOF, no data yet) is not an error at all; it is
//!   modeled as a timed catch-up retry plus an idle notification.
//!
//! A fault terminates only the affected projection or subscription; nothing
//! in this crate escalates to a process-level failure.

use crate::tag::{CheckpointTag, TfPosition};
use crate::types::StreamId;
use thiserror::Error;

/// Errors in the position algebra and tagger configuration.
#[derive(Debug, Clone, Error)]
pub enum TagError {
    /// A keyed tagger was constructed with no tracked keys.
    #[error("a position tagger requires at least one tracked key")]
    EmptyKeySet,
}

/// Fatal faults of an event reader.
///
/// A faulted reader is unusable; the owning subscription must be disposed.
#[derive(Debug, Clone, Error)]
pub enum ReaderFault {
    /// A reader operation was invoked from an illegal state. This is a logic
    /// error in the driving code, not a recoverable runtime condition.
    #[error("illegal reader operation: {0}")]
    InvalidOperation(&'static str),

    /// The log returned events behind the reader's cursor.
    #[error("log returned events out of order: last known position {last}, received {received}")]
    OrderingViolation {
        /// The cursor position before the read was issued.
        last: TfPosition,
        /// The regressed position that was delivered.
        received: TfPosition,
    },

    /// A per-stream reader observed a sequence number regression.
    #[error(
        "stream '{stream}' returned events out of order: last number {last}, received {received}"
    )]
    SequenceRegression {
        /// The stream being read.
        stream: StreamId,
        /// The last delivered event number.
        last: i64,
        /// The regressed event number.
        received: i64,
    },

    /// The stream a reader was attached to has been deleted.
    #[error("stream '{0}' was deleted while being read")]
    StreamDeleted(StreamId),
}

/// Fatal faults of a reader subscription.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionFault {
    /// The last-emitted checkpoint tag moved backwards, which breaches the
    /// subscription ordering contract.
    #[error("checkpoint tag regression: last emitted {last}, attempted {attempted}")]
    TagRegression {
        /// The tag most recently emitted by the subscription.
        last: CheckpointTag,
        /// The older tag that was about to be emitted.
        attempted: CheckpointTag,
    },

    /// A reader owned by the subscription faulted.
    #[error("reader fault: {0}")]
    Reader(#[from] ReaderFault),

    /// A notification arrived for a reader the subscription does not own.
    #[error("notification from unknown reader {0}")]
    UnknownReader(crate::types::ReaderId),

    /// A subscription was asked to start from a tag its tagger cannot
    /// resume (different strategy or tracked key set).
    #[error("start tag {tag} is incompatible with the subscription's position tagger")]
    IncompatibleTag {
        /// The offending start tag.
        tag: CheckpointTag,
    },
}

/// Errors of the projection checkpoint/write pipeline.
#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    /// The persisted checkpoint tag cannot be resumed by the configured
    /// tagger (different strategy or tracked key set).
    #[error("persisted checkpoint {tag} is incompatible with this projection's position tagger")]
    IncompatibleCheckpoint {
        /// The offending persisted tag.
        tag: CheckpointTag,
    },

    /// A concurrent writer appended to this projection's order stream. The
    /// projection must be reloaded; the write is never retried blindly.
    #[error("concurrent writer detected on order stream '{stream}' (current version {current})")]
    ConcurrentWriter {
        /// The order stream that conflicted.
        stream: StreamId,
        /// The version the stream actually had.
        current: i64,
    },

    /// A private projection stream was deleted out from under the projection.
    #[error("projection stream '{0}' was deleted")]
    StreamDeleted(StreamId),

    /// The user projection handler failed.
    #[error("projection handler fault: {0}")]
    HandlerFault(String),

    /// A lifecycle command arrived in a phase where it is not legal.
    #[error("invalid phase transition: {0}")]
    InvalidTransition(&'static str),

    /// The subscription feeding this projection faulted.
    #[error("subscription fault: {0}")]
    Subscription(#[from] SubscriptionFault),

    /// A checkpoint or order record could not be encoded or decoded.
    #[error("checkpoint record codec failure: {0}")]
    Codec(String),

    /// The underlying log failed.
    #[error("log error: {0}")]
    Log(#[from] LogError),
}

/// Infrastructure failures of the log port.
///
/// Protocol-level outcomes (wrong expected version, stream deleted, no
/// stream) are statuses on the completion types, not errors; `LogError` is
/// reserved for conditions where no meaningful completion exists.
#[derive(Debug, Clone, Error)]
pub enum LogError {
    /// The log is unavailable or the request could not be executed.
    #[error("log unavailable: {0}")]
    Unavailable(String),

    /// The log reported an internal failure.
    #[error("internal log error: {0}")]
    Internal(String),
}

/// Result alias for log-port operations.
pub type LogResult<T> = Result<T, LogError>;

/// Result alias for projection pipeline operations.
pub type ProjectionResult<T> = Result<T, ProjectionError>;
