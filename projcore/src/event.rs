//! Event records and reader deliveries.

use crate::tag::TfPosition;
use crate::types::{EventId, EventType, ReaderId, StreamId, Timestamp};
use serde::{Deserialize, Serialize};

/// An event as it exists in the log.
///
/// `event_number` is `-1` when the event is identified by its log position
/// rather than a stream sequence (e.g. category pseudo-streams observed
/// through the transaction-file reader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// The stream this record was read from.
    pub stream_id: StreamId,
    /// Sequence number within the stream, `-1` when not applicable.
    pub event_number: i64,
    /// Globally unique event id.
    pub event_id: EventId,
    /// The event type.
    pub event_type: EventType,
    /// Whether the payload is JSON.
    pub is_json: bool,
    /// The event payload.
    pub data: Vec<u8>,
    /// Opaque event metadata.
    pub metadata: Vec<u8>,
    /// When the event was written.
    pub timestamp: Timestamp,
}

/// A read result with link events resolved eagerly by the reader.
///
/// A `$>` link event references another event by stream and number; the log
/// resolves it at read time so downstream code never inspects payloads to
/// discover indirection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolvedEvent {
    /// An ordinary event.
    Direct(EventRecord),
    /// A link event together with its resolved target.
    ResolvedLink {
        /// The link record; its stream and number define the read position.
        link: EventRecord,
        /// The event the link points at.
        event: EventRecord,
    },
}

impl ResolvedEvent {
    /// The record that carries this delivery's position: the link when
    /// present, otherwise the event itself.
    pub const fn position_record(&self) -> &EventRecord {
        match self {
            Self::Direct(event) => event,
            Self::ResolvedLink { link, .. } => link,
        }
    }

    /// The target event record.
    pub const fn record(&self) -> &EventRecord {
        match self {
            Self::Direct(event) | Self::ResolvedLink { event, .. } => event,
        }
    }

    /// Whether this delivery came through a link event.
    pub const fn is_link(&self) -> bool {
        matches!(self, Self::ResolvedLink { .. })
    }
}

/// A delivered occurrence published by an event reader.
///
/// Immutable once published; the subscription layer only reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedEvent {
    /// Correlation id of the reader that observed the event.
    pub reader_id: ReaderId,
    /// The resolved event.
    pub resolved: ResolvedEvent,
    /// The log position at which the event was observed.
    pub position: TfPosition,
    /// Progress estimate (0–100) relative to the tail of the log.
    pub progress: f32,
}

impl DistributedEvent {
    /// Creates a new delivery.
    pub const fn new(
        reader_id: ReaderId,
        resolved: ResolvedEvent,
        position: TfPosition,
        progress: f32,
    ) -> Self {
        Self {
            reader_id,
            resolved,
            position,
            progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn record(stream: &str, number: i64, event_type: &str) -> EventRecord {
        EventRecord {
            stream_id: StreamId::try_new(stream).unwrap(),
            event_number: number,
            event_id: EventId::new(),
            event_type: EventType::try_new(event_type).unwrap(),
            is_json: true,
            data: b"{}".to_vec(),
            metadata: Vec::new(),
            timestamp: Timestamp::now(),
        }
    }

    #[test]
    fn direct_event_is_its_own_position_record() {
        let event = ResolvedEvent::Direct(record("stream1", 3, "type1"));
        assert_eq!(event.position_record(), event.record());
        assert!(!event.is_link());
    }

    #[test]
    fn link_event_positions_by_the_link() {
        let resolved = ResolvedEvent::ResolvedLink {
            link: record("$et-type1", 0, "$>"),
            event: record("stream1", 5, "type1"),
        };
        assert_eq!(resolved.position_record().stream_id.as_ref(), "$et-type1");
        assert_eq!(resolved.record().stream_id.as_ref(), "stream1");
        assert_eq!(resolved.record().event_number, 5);
        assert!(resolved.is_link());
    }
}
