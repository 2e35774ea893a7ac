//! Event readers: bounded, pausable cursors over the transaction log.
//!
//! A reader is a synchronous state machine owned by exactly one subscription.
//! It queues at most one read request at a time; an async driver executes the
//! request against the [`crate::log::EventLog`] and feeds the completion back
//! in as a message. Faults ([`ReaderFault`]) are fatal to the reader and are
//! never recovered internally.
//!
//! State machine: `Idle → RequestPending → {DeliveringBatch → Idle |
//! CatchingUp(delayed) → RequestPending}; Paused; Disposed`. Pause is
//! deferred: with a read in flight it takes effect only once the completion
//! has been processed.

use crate::errors::ReaderFault;
use crate::event::DistributedEvent;
use crate::log::{ReadAllCompleted, ReadStreamCompleted, StreamReadStatus};
use crate::messages::{PendingRead, ReadRequest, ReaderNotification};
use crate::tag::TfPosition;
use crate::types::{ReaderId, StreamId, Timestamp};
use std::time::Duration;
use tracing::{debug, trace};

/// Wait before re-polling the log tail after observing no new events.
pub const CATCH_UP_DELAY: Duration = Duration::from_millis(250);

/// Default bound on events per read request.
pub const DEFAULT_MAX_READ_COUNT: usize = 250;

/// Flags and counters shared by every reader strategy.
#[derive(Debug)]
struct ReaderCore {
    reader_id: ReaderId,
    events_requested: bool,
    paused: bool,
    pause_requested: bool,
    disposed: bool,
    delivered_events: u64,
    stop_on_eof: bool,
    stop_after_n_events: Option<u64>,
    pending: Option<PendingRead>,
}

impl ReaderCore {
    fn new(reader_id: ReaderId, stop_on_eof: bool, stop_after_n_events: Option<u64>) -> Self {
        Self {
            reader_id,
            events_requested: false,
            paused: false,
            pause_requested: false,
            disposed: false,
            delivered_events: 0,
            stop_on_eof,
            stop_after_n_events,
            pending: None,
        }
    }

    fn enqueue_request(&mut self, request: ReadRequest, delay: bool) -> Result<(), ReaderFault> {
        if self.disposed {
            return Err(ReaderFault::InvalidOperation("reader is disposed"));
        }
        if self.events_requested {
            return Err(ReaderFault::InvalidOperation(
                "a read operation is already in progress",
            ));
        }
        if self.paused || self.pause_requested {
            return Err(ReaderFault::InvalidOperation("reader is paused"));
        }
        self.events_requested = true;
        self.pending = Some(PendingRead { request, delay });
        Ok(())
    }

    fn begin_completion(&mut self) -> Result<bool, ReaderFault> {
        if self.disposed {
            // Completions for cancelled work are drained and discarded.
            return Ok(false);
        }
        if !self.events_requested {
            return Err(ReaderFault::InvalidOperation(
                "read events has not been requested",
            ));
        }
        if self.paused {
            return Err(ReaderFault::InvalidOperation("reader is paused"));
        }
        self.events_requested = false;
        Ok(true)
    }

    /// True when the configured delivery cap has been reached.
    fn enough(&self) -> bool {
        self.stop_after_n_events
            .is_some_and(|cap| self.delivered_events >= cap)
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.pending = None;
        self.events_requested = false;
    }
}

/// Reads the whole transaction log forward from a position cursor.
#[derive(Debug)]
pub struct TransactionLogEventReader {
    core: ReaderCore,
    from: TfPosition,
    max_read_count: usize,
    deliver_end_of_tf_position: bool,
    resolve_links: bool,
}

impl TransactionLogEventReader {
    /// Creates a reader starting at `from`.
    pub fn new(
        reader_id: ReaderId,
        from: TfPosition,
        stop_on_eof: bool,
        stop_after_n_events: Option<u64>,
    ) -> Self {
        Self {
            core: ReaderCore::new(reader_id, stop_on_eof, stop_after_n_events),
            from,
            max_read_count: DEFAULT_MAX_READ_COUNT,
            deliver_end_of_tf_position: true,
            resolve_links: true,
        }
    }

    fn read_request(&self) -> ReadRequest {
        ReadRequest::All {
            from: self.from,
            max_count: self.max_read_count,
            resolve_links: self.resolve_links,
        }
    }

    fn handle_completed(
        &mut self,
        completed: ReadAllCompleted,
    ) -> Result<Vec<ReaderNotification>, ReaderFault> {
        if !self.core.begin_completion()? {
            return Ok(Vec::new());
        }

        let eof = completed.events.is_empty();
        let will_dispose = self.core.stop_on_eof && eof;
        let old_from = self.from;
        self.from = completed.next_position;

        if !will_dispose {
            if self.core.pause_requested {
                self.core.pause_requested = false;
                self.core.paused = true;
                debug!(reader_id = %self.core.reader_id, "reader paused");
            } else {
                self.core.enqueue_request(self.read_request(), eof)?;
            }
        }

        let mut out = Vec::new();
        if eof {
            trace!(reader_id = %self.core.reader_id, position = %self.from, "log tail reached");
            if self.deliver_end_of_tf_position && !self.core.stop_on_eof {
                out.push(ReaderNotification::ProgressMarker {
                    reader_id: self.core.reader_id,
                    position: self.from,
                    progress: 100.0,
                });
            }
            // Allow joining live distribution before the delayed re-request.
            out.push(ReaderNotification::Idle {
                reader_id: self.core.reader_id,
                at: Timestamp::now(),
            });
            if self.core.stop_on_eof {
                out.push(ReaderNotification::Eof {
                    reader_id: self.core.reader_id,
                });
                self.core.dispose();
            }
            return Ok(out);
        }

        let mut last_position = old_from;
        for (resolved, position) in completed.events {
            if position < last_position {
                return Err(ReaderFault::OrderingViolation {
                    last: last_position,
                    received: position,
                });
            }
            last_position = position;
            self.core.delivered_events += 1;
            let progress = if completed.tf_eof_position > 0 {
                (position.commit as f64 / completed.tf_eof_position as f64 * 100.0) as f32
            } else {
                100.0
            };
            out.push(ReaderNotification::Committed(DistributedEvent::new(
                self.core.reader_id,
                resolved,
                position,
                progress.clamp(0.0, 100.0),
            )));
            if self.core.enough() {
                // Cap reached mid-batch: the remainder is discarded.
                out.push(ReaderNotification::Eof {
                    reader_id: self.core.reader_id,
                });
                self.core.dispose();
                return Ok(out);
            }
        }
        Ok(out)
    }
}

/// Reads one stream forward by event number.
///
/// Also serves as the building block of the event-type-index strategy: one
/// stream reader per `$et-{type}` index stream, merged by the subscription.
#[derive(Debug)]
pub struct StreamEventReader {
    core: ReaderCore,
    stream_id: StreamId,
    from_number: i64,
    max_read_count: usize,
    resolve_links: bool,
}

impl StreamEventReader {
    /// Creates a reader over `stream_id` starting at `from_number`.
    pub fn new(
        reader_id: ReaderId,
        stream_id: StreamId,
        from_number: i64,
        stop_on_eof: bool,
        stop_after_n_events: Option<u64>,
    ) -> Self {
        Self {
            core: ReaderCore::new(reader_id, stop_on_eof, stop_after_n_events),
            stream_id,
            from_number: from_number.max(0),
            max_read_count: DEFAULT_MAX_READ_COUNT,
            resolve_links: true,
        }
    }

    fn read_request(&self) -> ReadRequest {
        ReadRequest::Stream {
            stream_id: self.stream_id.clone(),
            from_number: self.from_number,
            max_count: self.max_read_count,
            resolve_links: self.resolve_links,
        }
    }

    fn handle_completed(
        &mut self,
        completed: ReadStreamCompleted,
    ) -> Result<Vec<ReaderNotification>, ReaderFault> {
        if !self.core.begin_completion()? {
            return Ok(Vec::new());
        }

        if completed.result == StreamReadStatus::StreamDeleted {
            return Err(ReaderFault::StreamDeleted(self.stream_id.clone()));
        }

        // A stream that does not exist yet is backpressure, not an error.
        let eof = completed.events.is_empty();
        let will_dispose = self.core.stop_on_eof && eof;
        let old_from = self.from_number;
        if completed.result == StreamReadStatus::Success {
            self.from_number = completed.next_number;
        }

        if !will_dispose {
            if self.core.pause_requested {
                self.core.pause_requested = false;
                self.core.paused = true;
                debug!(reader_id = %self.core.reader_id, stream = %self.stream_id, "reader paused");
            } else {
                self.core.enqueue_request(self.read_request(), eof)?;
            }
        }

        let mut out = Vec::new();
        if eof {
            out.push(ReaderNotification::Idle {
                reader_id: self.core.reader_id,
                at: Timestamp::now(),
            });
            if self.core.stop_on_eof {
                out.push(ReaderNotification::Eof {
                    reader_id: self.core.reader_id,
                });
                self.core.dispose();
            }
            return Ok(out);
        }

        let mut last_number = old_from - 1;
        for (resolved, position) in completed.events {
            let number = resolved.position_record().event_number;
            if number <= last_number {
                return Err(ReaderFault::SequenceRegression {
                    stream: self.stream_id.clone(),
                    last: last_number,
                    received: number,
                });
            }
            last_number = number;
            self.core.delivered_events += 1;
            let progress = if completed.last_number >= 0 {
                (number as f64 / (completed.last_number + 1) as f64 * 100.0) as f32
            } else {
                100.0
            };
            out.push(ReaderNotification::Committed(DistributedEvent::new(
                self.core.reader_id,
                resolved,
                position,
                progress.clamp(0.0, 100.0),
            )));
            if self.core.enough() {
                out.push(ReaderNotification::Eof {
                    reader_id: self.core.reader_id,
                });
                self.core.dispose();
                return Ok(out);
            }
        }
        Ok(out)
    }
}

/// A read completion fed back into a reader by its driver.
#[derive(Debug, Clone)]
pub enum ReadCompleted {
    /// Completion of a whole-log read.
    All(ReadAllCompleted),
    /// Completion of a stream read.
    Stream(ReadStreamCompleted),
}

/// The closed set of reader strategies.
///
/// Dispatch is an explicit match per message; completions of the wrong kind
/// are a logic error in the driving code.
#[derive(Debug)]
pub enum EventReader {
    /// Whole-log reader.
    TransactionLog(TransactionLogEventReader),
    /// Single-stream reader.
    Stream(StreamEventReader),
}

impl EventReader {
    /// The reader's correlation id.
    pub const fn reader_id(&self) -> ReaderId {
        match self {
            Self::TransactionLog(r) => r.core.reader_id,
            Self::Stream(r) => r.core.reader_id,
        }
    }

    /// Requests the next batch of events.
    ///
    /// Legal only from the idle state: not while a request is pending, not
    /// while paused or pause-requested, and never after dispose.
    pub fn request_events(&mut self) -> Result<(), ReaderFault> {
        match self {
            Self::TransactionLog(r) => {
                let request = r.read_request();
                r.core.enqueue_request(request, false)
            }
            Self::Stream(r) => {
                let request = r.read_request();
                r.core.enqueue_request(request, false)
            }
        }
    }

    /// Takes the queued read request for execution, if any.
    pub fn take_pending(&mut self) -> Option<PendingRead> {
        self.core_mut().pending.take()
    }

    /// Feeds a read completion into the state machine, producing the
    /// notifications to publish.
    pub fn handle_read_completed(
        &mut self,
        completed: ReadCompleted,
    ) -> Result<Vec<ReaderNotification>, ReaderFault> {
        match (self, completed) {
            (Self::TransactionLog(r), ReadCompleted::All(completed)) => {
                r.handle_completed(completed)
            }
            (Self::Stream(r), ReadCompleted::Stream(completed)) => r.handle_completed(completed),
            _ => Err(ReaderFault::InvalidOperation(
                "read completion does not match the reader strategy",
            )),
        }
    }

    /// Requests a pause. Takes effect immediately when idle; otherwise once
    /// the in-flight completion has been processed.
    pub fn pause(&mut self) {
        let core = self.core_mut();
        if core.disposed || core.paused || core.pause_requested {
            return;
        }
        if core.events_requested && core.pending.is_none() {
            // A read is in flight: defer until its completion is processed.
            core.pause_requested = true;
        } else {
            core.pending = None;
            core.events_requested = false;
            core.paused = true;
        }
    }

    /// Resumes a paused reader, re-entering the request-pending state
    /// immediately.
    pub fn resume(&mut self) -> Result<(), ReaderFault> {
        let core = self.core_mut();
        if core.disposed {
            return Err(ReaderFault::InvalidOperation("reader is disposed"));
        }
        core.pause_requested = false;
        if core.paused {
            core.paused = false;
            self.request_events()?;
        }
        Ok(())
    }

    /// Disposes the reader. Further completions are drained and discarded.
    pub fn dispose(&mut self) {
        self.core_mut().dispose();
    }

    /// Whether the reader has been disposed.
    pub const fn is_disposed(&self) -> bool {
        self.core_ref().disposed
    }

    /// Whether the reader is paused.
    pub const fn is_paused(&self) -> bool {
        self.core_ref().paused
    }

    /// Number of events delivered so far.
    pub const fn delivered_events(&self) -> u64 {
        self.core_ref().delivered_events
    }

    const fn core_ref(&self) -> &ReaderCore {
        match self {
            Self::TransactionLog(r) => &r.core,
            Self::Stream(r) => &r.core,
        }
    }

    fn core_mut(&mut self) -> &mut ReaderCore {
        match self {
            Self::TransactionLog(r) => &mut r.core,
            Self::Stream(r) => &mut r.core,
        }
    }
}
