//! In-memory transaction log adapter for `ProjCore`.
//!
//! This crate provides an in-memory implementation of the `EventLog` port
//! from the projcore crate, useful for testing and development scenarios
//! where persistence is not required.
//!
//! Besides plain streams, the log maintains `$et-{type}` index streams: every
//! appended event is indexed by its type, and reading an index stream yields
//! link-resolved deliveries, which is what event-type-index subscriptions
//! consume.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use projcore::errors::{LogError, LogResult};
use projcore::event::{EventRecord, ResolvedEvent};
use projcore::log::{
    DeleteStreamCompleted, EventLog, ExpectedVersion, NewEvent, ReadAllCompleted,
    ReadStreamCompleted, StreamReadStatus, WriteEventsCompleted,
};
use projcore::tag::TfPosition;
use projcore::types::{EventType, StreamId, Timestamp};
use tracing::trace;

const POSITION_STRIDE: i64 = 20;

#[derive(Debug, Clone)]
struct LogEntry {
    record: EventRecord,
    position: TfPosition,
}

#[derive(Default)]
struct Inner {
    // The global log, in append order.
    entries: Vec<LogEntry>,
    // Stream id -> indices into `entries`.
    streams: HashMap<StreamId, Vec<usize>>,
    // `$et-{type}` index stream -> indices into `entries`.
    indexes: HashMap<StreamId, Vec<usize>>,
    deleted: HashSet<StreamId>,
}

impl Inner {
    fn last_number(&self, stream_id: &StreamId) -> i64 {
        self.streams
            .get(stream_id)
            .and_then(|indices| indices.last())
            .map_or(-1, |&i| self.entries[i].record.event_number)
    }

    fn check_expected_version(
        &self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
    ) -> Option<i64> {
        let current = self.last_number(stream_id);
        let matches = match expected {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => !self.streams.contains_key(stream_id),
            ExpectedVersion::Exact(version) => current == version,
        };
        if matches {
            None
        } else {
            Some(current)
        }
    }
}

/// Thread-safe in-memory event log for testing.
#[derive(Clone, Default)]
pub struct InMemoryLog {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryLog {
    /// Creates a new empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LogResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| LogError::Internal(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> LogResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| LogError::Internal(format!("lock poisoned: {e}")))
    }

    fn resolve_index_entry(
        index_stream: &StreamId,
        index_sequence: i64,
        entry: &LogEntry,
    ) -> ResolvedEvent {
        let link = EventRecord {
            stream_id: index_stream.clone(),
            event_number: index_sequence,
            event_id: projcore::types::EventId::new(),
            event_type: EventType::try_new("$>").expect("link event type is valid"),
            is_json: false,
            data: format!("{}@{}", entry.record.event_number, entry.record.stream_id)
                .into_bytes(),
            metadata: Vec::new(),
            timestamp: entry.record.timestamp,
        };
        ResolvedEvent::ResolvedLink {
            link,
            event: entry.record.clone(),
        }
    }
}

#[async_trait]
impl EventLog for InMemoryLog {
    async fn read_all_forward(
        &self,
        from: TfPosition,
        max_count: usize,
        _resolve_links: bool,
    ) -> LogResult<ReadAllCompleted> {
        let inner = self.read()?;
        let tf_eof_position = inner.entries.last().map_or(0, |e| e.position.commit);

        let events: Vec<(ResolvedEvent, TfPosition)> = inner
            .entries
            .iter()
            .filter(|entry| entry.position >= from)
            .take(max_count)
            .map(|entry| (ResolvedEvent::Direct(entry.record.clone()), entry.position))
            .collect();

        let next_position = events.last().map_or(from, |(_, position)| {
            TfPosition::new(position.commit, position.prepare + 1)
        });
        let is_end_of_log = events.is_empty()
            || inner
                .entries
                .iter()
                .filter(|entry| entry.position >= next_position)
                .count()
                == 0;
        Ok(ReadAllCompleted {
            events,
            next_position,
            tf_eof_position,
            is_end_of_log,
        })
    }

    async fn read_stream_forward(
        &self,
        stream_id: &StreamId,
        from_number: i64,
        max_count: usize,
        _resolve_links: bool,
    ) -> LogResult<ReadStreamCompleted> {
        let inner = self.read()?;
        if inner.deleted.contains(stream_id) {
            return Ok(ReadStreamCompleted {
                stream_id: stream_id.clone(),
                result: StreamReadStatus::StreamDeleted,
                events: Vec::new(),
                next_number: from_number,
                last_number: -1,
                is_end_of_stream: true,
            });
        }

        // Index streams are served from the type index with link resolution;
        // a real stream of the same name takes precedence.
        if let Some(indices) = inner
            .indexes
            .get(stream_id)
            .filter(|_| !inner.streams.contains_key(stream_id))
        {
            let events: Vec<(ResolvedEvent, TfPosition)> = indices
                .iter()
                .enumerate()
                .skip(usize::try_from(from_number.max(0)).unwrap_or(0))
                .take(max_count)
                .map(|(sequence, &i)| {
                    let entry = &inner.entries[i];
                    (
                        Self::resolve_index_entry(stream_id, sequence as i64, entry),
                        entry.position,
                    )
                })
                .collect();
            let last_number = indices.len() as i64 - 1;
            let next_number = events
                .last()
                .map_or(from_number.max(0), |(resolved, _)| {
                    resolved.position_record().event_number + 1
                });
            return Ok(ReadStreamCompleted {
                stream_id: stream_id.clone(),
                result: StreamReadStatus::Success,
                events,
                next_number,
                last_number,
                is_end_of_stream: next_number > last_number,
            });
        }

        let Some(indices) = inner.streams.get(stream_id) else {
            return Ok(ReadStreamCompleted::no_stream(stream_id.clone()));
        };
        let events: Vec<(ResolvedEvent, TfPosition)> = indices
            .iter()
            .map(|&i| &inner.entries[i])
            .filter(|entry| entry.record.event_number >= from_number.max(0))
            .take(max_count)
            .map(|entry| (ResolvedEvent::Direct(entry.record.clone()), entry.position))
            .collect();
        let last_number = inner.last_number(stream_id);
        let next_number = events.last().map_or(from_number.max(0), |(resolved, _)| {
            resolved.position_record().event_number + 1
        });
        Ok(ReadStreamCompleted {
            stream_id: stream_id.clone(),
            result: StreamReadStatus::Success,
            events,
            next_number,
            last_number,
            is_end_of_stream: next_number > last_number,
        })
    }

    async fn read_stream_backward(
        &self,
        stream_id: &StreamId,
        from_number: i64,
        max_count: usize,
        _resolve_links: bool,
    ) -> LogResult<ReadStreamCompleted> {
        let inner = self.read()?;
        if inner.deleted.contains(stream_id) {
            return Ok(ReadStreamCompleted {
                stream_id: stream_id.clone(),
                result: StreamReadStatus::StreamDeleted,
                events: Vec::new(),
                next_number: from_number,
                last_number: -1,
                is_end_of_stream: true,
            });
        }
        let Some(indices) = inner.streams.get(stream_id) else {
            return Ok(ReadStreamCompleted::no_stream(stream_id.clone()));
        };
        let last_number = inner.last_number(stream_id);
        let start = if from_number < 0 {
            last_number
        } else {
            from_number
        };
        let first_retained = indices
            .first()
            .map_or(0, |&i| inner.entries[i].record.event_number);
        // Reading backward from before the lowest retained event terminates
        // cleanly with an empty page.
        if start < first_retained {
            return Ok(ReadStreamCompleted {
                stream_id: stream_id.clone(),
                result: StreamReadStatus::Success,
                events: Vec::new(),
                next_number: -1,
                last_number,
                is_end_of_stream: true,
            });
        }
        let events: Vec<(ResolvedEvent, TfPosition)> = indices
            .iter()
            .map(|&i| &inner.entries[i])
            .filter(|entry| entry.record.event_number <= start)
            .rev()
            .take(max_count)
            .map(|entry| (ResolvedEvent::Direct(entry.record.clone()), entry.position))
            .collect();
        let next_number = events.last().map_or(-1, |(resolved, _)| {
            resolved.position_record().event_number - 1
        });
        Ok(ReadStreamCompleted {
            stream_id: stream_id.clone(),
            result: StreamReadStatus::Success,
            events,
            next_number,
            last_number,
            is_end_of_stream: next_number < 0,
        })
    }

    async fn write_events(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> LogResult<WriteEventsCompleted> {
        let mut inner = self.write()?;
        if inner.deleted.contains(stream_id) {
            return Ok(WriteEventsCompleted::StreamDeleted);
        }
        if let Some(current) = inner.check_expected_version(stream_id, expected_version) {
            return Ok(WriteEventsCompleted::WrongExpectedVersion { current });
        }

        let mut number = inner.last_number(stream_id);
        let first_number = number + 1;
        let mut position = TfPosition::zero();
        for event in events {
            number += 1;
            let offset = inner.entries.len() as i64 * POSITION_STRIDE;
            position = TfPosition::new(offset + POSITION_STRIDE, offset + POSITION_STRIDE / 2);
            let record = EventRecord {
                stream_id: stream_id.clone(),
                event_number: number,
                event_id: event.event_id,
                event_type: event.event_type,
                is_json: event.is_json,
                data: event.data,
                metadata: event.metadata,
                timestamp: Timestamp::now(),
            };
            let index_stream = StreamId::event_type_index(&record.event_type);
            let entry_index = inner.entries.len();
            inner.entries.push(LogEntry { record, position });
            inner
                .streams
                .entry(stream_id.clone())
                .or_default()
                .push(entry_index);
            inner
                .indexes
                .entry(index_stream)
                .or_default()
                .push(entry_index);
        }
        trace!(stream = %stream_id, last_number = number, "events appended");
        Ok(WriteEventsCompleted::Success {
            first_number,
            last_number: number,
            position,
        })
    }

    async fn delete_stream(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
    ) -> LogResult<DeleteStreamCompleted> {
        let mut inner = self.write()?;
        if inner.deleted.contains(stream_id) {
            return Ok(DeleteStreamCompleted::StreamDeleted);
        }
        if let Some(current) = inner.check_expected_version(stream_id, expected_version) {
            return Ok(DeleteStreamCompleted::WrongExpectedVersion { current });
        }
        inner.deleted.insert(stream_id.clone());
        inner.streams.remove(stream_id);
        Ok(DeleteStreamCompleted::Success)
    }
}
