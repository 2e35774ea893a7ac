//! The abstract transaction-log port.
//!
//! The storage engine itself is out of scope; this crate consumes it only
//! through [`EventLog`]: bounded forward/backward reads and optimistically
//! concurrent writes. Protocol-level outcomes (no stream, wrong expected
//! version, stream deleted) are *statuses* on the completion types so that
//! the owner of the relevant state decides how to react;
//! [`crate::errors::LogError`] is reserved for infrastructure failure.

use crate::errors::LogResult;
use crate::event::ResolvedEvent;
use crate::tag::TfPosition;
use crate::types::{EventId, EventType, StreamId};
use async_trait::async_trait;

/// Expected stream version for optimistic concurrency control.
///
/// The expected-version check is the sole mutual-exclusion mechanism for
/// concurrent writers to the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Any version is acceptable (no concurrency control).
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event number must be exactly this.
    Exact(i64),
}

/// Outcome status of reading a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamReadStatus {
    /// The stream exists and the page (possibly empty) is valid.
    Success,
    /// The stream does not exist.
    NoStream,
    /// The stream has been deleted.
    StreamDeleted,
}

/// Completion of a forward read over the whole log.
#[derive(Debug, Clone)]
pub struct ReadAllCompleted {
    /// Events paired with the position at which each was observed, in
    /// non-decreasing position order.
    pub events: Vec<(ResolvedEvent, TfPosition)>,
    /// The position from which the next read should continue.
    pub next_position: TfPosition,
    /// The commit offset of the current end of the log, for progress
    /// estimates.
    pub tf_eof_position: i64,
    /// Whether this page reached the end of the log.
    pub is_end_of_log: bool,
}

/// Completion of a stream read (forward or backward).
#[derive(Debug, Clone)]
pub struct ReadStreamCompleted {
    /// The stream that was read.
    pub stream_id: StreamId,
    /// Outcome status; `events` is empty unless `Success`.
    pub result: StreamReadStatus,
    /// Events paired with their global log positions.
    pub events: Vec<(ResolvedEvent, TfPosition)>,
    /// The event number from which the next page continues.
    pub next_number: i64,
    /// The stream's current last event number, `-1` when the stream is
    /// empty or absent.
    pub last_number: i64,
    /// Whether this page reached the end (or, backward, the beginning) of
    /// the stream.
    pub is_end_of_stream: bool,
}

impl ReadStreamCompleted {
    /// A completion for a stream that does not exist.
    pub const fn no_stream(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            result: StreamReadStatus::NoStream,
            events: Vec::new(),
            next_number: 0,
            last_number: -1,
            is_end_of_stream: true,
        }
    }
}

/// Completion of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEventsCompleted {
    /// The events were appended.
    Success {
        /// Event number assigned to the first appended event.
        first_number: i64,
        /// Event number assigned to the last appended event.
        last_number: i64,
        /// Log position of the last appended event.
        position: TfPosition,
    },
    /// The expected version did not match; nothing was written.
    WrongExpectedVersion {
        /// The stream's actual last event number.
        current: i64,
    },
    /// The target stream has been deleted; nothing was written.
    StreamDeleted,
}

/// Completion of a stream deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStreamCompleted {
    /// The stream was deleted.
    Success,
    /// The expected version did not match; the stream was not deleted.
    WrongExpectedVersion {
        /// The stream's actual last event number.
        current: i64,
    },
    /// The stream was already deleted.
    StreamDeleted,
}

/// An event to append.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Unique identifier (UUIDv7).
    pub event_id: EventId,
    /// The event type.
    pub event_type: EventType,
    /// Whether the payload is JSON.
    pub is_json: bool,
    /// The event payload.
    pub data: Vec<u8>,
    /// Opaque metadata.
    pub metadata: Vec<u8>,
}

impl NewEvent {
    /// Creates a new JSON event with empty metadata.
    pub fn json(event_type: EventType, data: Vec<u8>) -> Self {
        Self {
            event_id: EventId::new(),
            event_type,
            is_json: true,
            data,
            metadata: Vec::new(),
        }
    }
}

/// The transaction-log read/write surface consumed by readers and
/// projections.
///
/// All reads are bounded (`max_count`); at most one read is outstanding per
/// reader by construction of the reader state machine.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Reads up to `max_count` events forward from `from` across the whole
    /// log, in position order.
    async fn read_all_forward(
        &self,
        from: TfPosition,
        max_count: usize,
        resolve_links: bool,
    ) -> LogResult<ReadAllCompleted>;

    /// Reads up to `max_count` events of one stream forward from
    /// `from_number`.
    async fn read_stream_forward(
        &self,
        stream_id: &StreamId,
        from_number: i64,
        max_count: usize,
        resolve_links: bool,
    ) -> LogResult<ReadStreamCompleted>;

    /// Reads up to `max_count` events of one stream backward from
    /// `from_number` (`-1` means "from the current end").
    ///
    /// Reading backward from a position at or before the stream's lowest
    /// retained event yields an empty successful page with
    /// `is_end_of_stream = true`.
    async fn read_stream_backward(
        &self,
        stream_id: &StreamId,
        from_number: i64,
        max_count: usize,
        resolve_links: bool,
    ) -> LogResult<ReadStreamCompleted>;

    /// Appends `events` to `stream_id` under the expected-version check.
    async fn write_events(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> LogResult<WriteEventsCompleted>;

    /// Deletes `stream_id` under the expected-version check.
    async fn delete_stream(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
    ) -> LogResult<DeleteStreamCompleted>;
}
