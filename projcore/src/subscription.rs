//! Reader subscriptions: tag-ordered fan-in of one or more event readers.
//!
//! A subscription owns its readers, the active position tagger and the
//! last-emitted checkpoint tag. It filters events the readers re-observe
//! after a resume (at-least-once delivery between log and reader), enforces
//! that the emitted tag never regresses, merges multiple readers into one
//! tag-ordered stream, and translates low-level reader signals into
//! checkpoint suggestions and EOF notifications for the consuming
//! projection.

use crate::errors::SubscriptionFault;
use crate::event::DistributedEvent;
use crate::messages::{PendingRead, ReaderNotification, SubscriptionNotification};
use crate::reader::{EventReader, ReadCompleted, StreamEventReader, TransactionLogEventReader};
use crate::tag::{CheckpointTag, TfPosition};
use crate::tagger::PositionTagger;
use crate::types::{ReaderId, SubscriptionId};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, instrument, trace, warn};

/// Options controlling a reader subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSubscriptionOptions {
    /// Emit a checkpoint suggestion after this many delivered events.
    pub checkpoint_processed_events_threshold: u64,
    /// Dispose the readers when they reach the end of their input.
    pub stop_on_eof: bool,
    /// Cap on events delivered per reader before it self-disposes.
    pub stop_after_n_events: Option<u64>,
}

impl ReaderSubscriptionOptions {
    /// Creates options with default values.
    pub const fn new() -> Self {
        Self {
            checkpoint_processed_events_threshold: 100,
            stop_on_eof: false,
            stop_after_n_events: None,
        }
    }

    /// Sets the checkpoint suggestion threshold.
    #[must_use]
    pub const fn with_checkpoint_threshold(mut self, threshold: u64) -> Self {
        self.checkpoint_processed_events_threshold = threshold;
        self
    }

    /// Makes the readers stop at the end of their input.
    #[must_use]
    pub const fn with_stop_on_eof(mut self) -> Self {
        self.stop_on_eof = true;
        self
    }

    /// Caps the number of delivered events per reader.
    #[must_use]
    pub const fn with_stop_after_n_events(mut self, cap: u64) -> Self {
        self.stop_after_n_events = Some(cap);
        self
    }
}

impl Default for ReaderSubscriptionOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the last-emitted checkpoint tag and enforces monotonicity.
///
/// A regression of the emitted tag is a fatal consistency error, never a
/// silent skip.
#[derive(Debug)]
pub struct PositionTracker {
    last_tag: CheckpointTag,
}

impl PositionTracker {
    /// Creates a tracker starting at `tag`.
    pub const fn new(tag: CheckpointTag) -> Self {
        Self { last_tag: tag }
    }

    /// The last tag the subscription emitted.
    pub const fn last_tag(&self) -> &CheckpointTag {
        &self.last_tag
    }

    /// Advances to `tag`, which must not be behind the current tag.
    pub fn advance(&mut self, tag: CheckpointTag) -> Result<(), SubscriptionFault> {
        match tag.partial_cmp(&self.last_tag) {
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal) => {
                self.last_tag = tag;
                Ok(())
            }
            _ => Err(SubscriptionFault::TagRegression {
                last: self.last_tag.clone(),
                attempted: tag,
            }),
        }
    }
}

struct ReaderSlot {
    reader: EventReader,
    buffer: VecDeque<DistributedEvent>,
    eof: bool,
}

/// One logical subscription fanning one or more readers into a tag-ordered
/// stream.
pub struct ReaderSubscription {
    subscription_id: SubscriptionId,
    tagger: PositionTagger,
    tracker: PositionTracker,
    options: ReaderSubscriptionOptions,
    readers: BTreeMap<ReaderId, ReaderSlot>,
    sequence: u64,
    events_since_suggestion: u64,
    last_suggested_tag: Option<CheckpointTag>,
    progress: f32,
    unsubscribed: bool,
}

impl ReaderSubscription {
    /// Creates a subscription reading from `from_tag` with the readers the
    /// tagger's shape calls for.
    ///
    /// `from_tag` must be compatible with `tagger`
    /// ([`SubscriptionFault::IncompatibleTag`] otherwise): a subscription can
    /// never resume from a checkpoint written by a different strategy.
    pub fn subscribe(
        subscription_id: SubscriptionId,
        tagger: PositionTagger,
        from_tag: CheckpointTag,
        options: ReaderSubscriptionOptions,
    ) -> Result<Self, SubscriptionFault> {
        if !tagger.is_compatible(&from_tag) {
            return Err(SubscriptionFault::IncompatibleTag { tag: from_tag });
        }

        let readers = Self::create_readers(&tagger, &from_tag, &options);
        debug!(
            subscription_id = %subscription_id,
            readers = readers.len(),
            from = %from_tag,
            "subscription created"
        );
        Ok(Self {
            subscription_id,
            tagger,
            last_suggested_tag: Some(from_tag.clone()),
            tracker: PositionTracker::new(from_tag),
            options,
            readers: readers
                .into_iter()
                .map(|reader| {
                    (
                        reader.reader_id(),
                        ReaderSlot {
                            reader,
                            buffer: VecDeque::new(),
                            eof: false,
                        },
                    )
                })
                .collect(),
            sequence: 0,
            events_since_suggestion: 0,
            progress: 0.0,
            unsubscribed: false,
        })
    }

    fn create_readers(
        tagger: &PositionTagger,
        from_tag: &CheckpointTag,
        options: &ReaderSubscriptionOptions,
    ) -> Vec<EventReader> {
        match tagger {
            PositionTagger::TransactionFile => {
                let from = from_tag.position().unwrap_or_else(TfPosition::zero);
                vec![EventReader::TransactionLog(TransactionLogEventReader::new(
                    ReaderId::new(),
                    from,
                    options.stop_on_eof,
                    options.stop_after_n_events,
                ))]
            }
            // Keyed readers resume AT the checkpointed sequence, deliberately
            // re-observing the last event; the dedup filter drops it. The
            // log's delivery guarantee between log and reader is
            // at-least-once, so the overlap exists either way.
            PositionTagger::Stream { .. } | PositionTagger::MultiStream { .. } => from_tag
                .streams()
                .iter()
                .filter_map(|(stream, last)| {
                    crate::types::StreamId::try_new(stream.clone()).ok().map(|stream_id| {
                        EventReader::Stream(StreamEventReader::new(
                            ReaderId::new(),
                            stream_id,
                            (*last).max(0),
                            options.stop_on_eof,
                            options.stop_after_n_events,
                        ))
                    })
                })
                .collect(),
            PositionTagger::EventTypeIndex { .. } => tagger
                .index_streams()
                .into_iter()
                .map(|stream_id| {
                    let last = from_tag
                        .sequence_for(stream_id.as_ref().trim_start_matches("$et-"))
                        .unwrap_or(-1);
                    EventReader::Stream(StreamEventReader::new(
                        ReaderId::new(),
                        stream_id,
                        last.max(0),
                        options.stop_on_eof,
                        options.stop_after_n_events,
                    ))
                })
                .collect(),
        }
    }

    /// The subscription's correlation id.
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// The last tag emitted by this subscription.
    pub const fn last_tag(&self) -> &CheckpointTag {
        self.tracker.last_tag()
    }

    /// The reader ids owned by this subscription.
    pub fn reader_ids(&self) -> Vec<ReaderId> {
        self.readers.keys().copied().collect()
    }

    /// Whether the subscription has been cancelled.
    pub const fn is_unsubscribed(&self) -> bool {
        self.unsubscribed
    }

    /// Asks every idle reader to request its next batch.
    pub fn request_events(&mut self) -> Result<(), SubscriptionFault> {
        for slot in self.readers.values_mut() {
            if !slot.reader.is_disposed() && !slot.reader.is_paused() {
                slot.reader.request_events()?;
            }
        }
        Ok(())
    }

    /// Collects queued read requests for the driver to execute.
    pub fn take_pending_reads(&mut self) -> Vec<(ReaderId, PendingRead)> {
        self.readers
            .iter_mut()
            .filter_map(|(id, slot)| slot.reader.take_pending().map(|p| (*id, p)))
            .collect()
    }

    /// Feeds a read completion to the owning reader and routes the resulting
    /// notifications through the merge and dedup pipeline.
    #[instrument(skip(self, completed), fields(subscription_id = %self.subscription_id))]
    pub fn handle_read_completed(
        &mut self,
        reader_id: ReaderId,
        completed: ReadCompleted,
    ) -> Result<Vec<SubscriptionNotification>, SubscriptionFault> {
        if self.unsubscribed {
            // Cancelled: completions are drained and discarded.
            return Ok(Vec::new());
        }
        let slot = self
            .readers
            .get_mut(&reader_id)
            .ok_or(SubscriptionFault::UnknownReader(reader_id))?;
        let notifications = slot.reader.handle_read_completed(completed)?;

        let mut out = Vec::new();
        for notification in notifications {
            self.handle_reader_notification(notification, &mut out)?;
        }
        Ok(out)
    }

    fn handle_reader_notification(
        &mut self,
        notification: ReaderNotification,
        out: &mut Vec<SubscriptionNotification>,
    ) -> Result<(), SubscriptionFault> {
        match notification {
            ReaderNotification::Committed(event) => {
                let reader_id = event.reader_id;
                let slot = self
                    .readers
                    .get_mut(&reader_id)
                    .ok_or(SubscriptionFault::UnknownReader(reader_id))?;
                slot.buffer.push_back(event);
                self.release_merged(out)?;
            }
            ReaderNotification::ProgressMarker {
                position, progress, ..
            } => {
                self.progress = progress;
                self.advance_to_position(position, out)?;
            }
            ReaderNotification::Idle { .. } => {
                if self.tag_advanced_since_suggestion() {
                    self.suggest_checkpoint(out);
                }
            }
            ReaderNotification::Eof { reader_id } => {
                if let Some(slot) = self.readers.get_mut(&reader_id) {
                    slot.eof = true;
                }
                // An EOF reader no longer gates the merge.
                self.release_merged(out)?;
                if self.readers.values().all(|slot| slot.eof) {
                    trace!(subscription_id = %self.subscription_id, "all readers at eof");
                    out.push(SubscriptionNotification::EofReached {
                        subscription_id: self.subscription_id,
                        tag: self.tracker.last_tag().clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Releases buffered events in global tag order.
    ///
    /// An event is released only while every other live reader has a
    /// buffered head; a reader that falls behind withholds later events from
    /// the rest, bounding skew.
    fn release_merged(
        &mut self,
        out: &mut Vec<SubscriptionNotification>,
    ) -> Result<(), SubscriptionFault> {
        loop {
            let gated = self
                .readers
                .values()
                .any(|slot| !slot.eof && slot.buffer.is_empty());
            if gated && self.readers.len() > 1 {
                return Ok(());
            }
            let Some(earliest) = self
                .readers
                .iter()
                .filter(|(_, slot)| !slot.buffer.is_empty())
                .min_by_key(|(_, slot)| {
                    slot.buffer
                        .front()
                        .map_or(TfPosition::new(i64::MAX, i64::MAX), |e| e.position)
                })
                .map(|(id, _)| *id)
            else {
                return Ok(());
            };
            let event = self
                .readers
                .get_mut(&earliest)
                .and_then(|slot| slot.buffer.pop_front())
                .ok_or(SubscriptionFault::UnknownReader(earliest))?;
            self.process_event(event, out)?;
        }
    }

    fn process_event(
        &mut self,
        event: DistributedEvent,
        out: &mut Vec<SubscriptionNotification>,
    ) -> Result<(), SubscriptionFault> {
        self.progress = event.progress;
        if !self
            .tagger
            .is_message_after_checkpoint_tag(self.tracker.last_tag(), &event)
        {
            // Re-observed after a resume: drop, keeping the progress update.
            trace!(
                subscription_id = %self.subscription_id,
                position = %event.position,
                "dropping event at or before the current tag"
            );
            return Ok(());
        }
        let tag = self
            .tagger
            .make_checkpoint_tag(self.tracker.last_tag(), &event);
        self.tracker.advance(tag.clone())?;
        self.sequence += 1;
        self.events_since_suggestion += 1;
        out.push(SubscriptionNotification::EventReceived {
            subscription_id: self.subscription_id,
            event,
            tag,
            sequence: self.sequence,
            progress: self.progress,
        });
        if self.events_since_suggestion >= self.options.checkpoint_processed_events_threshold {
            self.suggest_checkpoint(out);
        }
        Ok(())
    }

    fn advance_to_position(
        &mut self,
        position: TfPosition,
        out: &mut Vec<SubscriptionNotification>,
    ) -> Result<(), SubscriptionFault> {
        let candidate = self.tracker.last_tag().with_position(position);
        if candidate.partial_cmp(self.tracker.last_tag()) == Some(std::cmp::Ordering::Greater) {
            self.tracker.advance(candidate)?;
            self.suggest_checkpoint(out);
        }
        Ok(())
    }

    fn tag_advanced_since_suggestion(&self) -> bool {
        self.last_suggested_tag
            .as_ref()
            .map_or(true, |suggested| {
                self.tracker.last_tag().partial_cmp(suggested)
                    == Some(std::cmp::Ordering::Greater)
            })
    }

    fn suggest_checkpoint(&mut self, out: &mut Vec<SubscriptionNotification>) {
        let tag = self.tracker.last_tag().clone();
        self.events_since_suggestion = 0;
        self.last_suggested_tag = Some(tag.clone());
        out.push(SubscriptionNotification::CheckpointSuggested {
            subscription_id: self.subscription_id,
            tag,
            progress: self.progress,
        });
    }

    /// Pauses all owned readers (deferred while reads are in flight).
    pub fn pause(&mut self) {
        for slot in self.readers.values_mut() {
            slot.reader.pause();
        }
    }

    /// Resumes all owned readers.
    pub fn resume(&mut self) -> Result<(), SubscriptionFault> {
        for slot in self.readers.values_mut() {
            if !slot.reader.is_disposed() {
                slot.reader.resume()?;
            }
        }
        Ok(())
    }

    /// Cancels the subscription, disposing all owned readers. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.unsubscribed {
            return;
        }
        self.unsubscribed = true;
        for slot in self.readers.values_mut() {
            slot.reader.dispose();
            slot.buffer.clear();
        }
        debug!(subscription_id = %self.subscription_id, "unsubscribed");
    }
}

/// Routes reader completions to subscriptions by correlation id and serves
/// subscription management commands.
#[derive(Default)]
pub struct SubscriptionDispatcher {
    subscriptions: BTreeMap<SubscriptionId, ReaderSubscription>,
    reader_index: BTreeMap<ReaderId, SubscriptionId>,
}

impl SubscriptionDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription and kicks its readers.
    pub fn subscribe(
        &mut self,
        mut subscription: ReaderSubscription,
    ) -> Result<SubscriptionId, SubscriptionFault> {
        let id = subscription.subscription_id();
        subscription.request_events()?;
        for reader_id in subscription.reader_ids() {
            self.reader_index.insert(reader_id, id);
        }
        self.subscriptions.insert(id, subscription);
        Ok(id)
    }

    /// Cancels a subscription. Idempotent: unknown ids are ignored.
    pub fn unsubscribe(&mut self, subscription_id: SubscriptionId) {
        if let Some(mut subscription) = self.subscriptions.remove(&subscription_id) {
            subscription.unsubscribe();
            self.reader_index
                .retain(|_, owner| *owner != subscription_id);
        } else {
            warn!(%subscription_id, "unsubscribe for unknown subscription ignored");
        }
    }

    /// Pauses a subscription's readers.
    pub fn pause(&mut self, subscription_id: SubscriptionId) {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.pause();
        }
    }

    /// Resumes a subscription's readers.
    pub fn resume(&mut self, subscription_id: SubscriptionId) -> Result<(), SubscriptionFault> {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.resume()?;
        }
        Ok(())
    }

    /// Access to a registered subscription.
    pub fn subscription(&self, subscription_id: SubscriptionId) -> Option<&ReaderSubscription> {
        self.subscriptions.get(&subscription_id)
    }

    /// Collects queued read requests across all subscriptions.
    pub fn take_pending_reads(&mut self) -> Vec<(SubscriptionId, ReaderId, PendingRead)> {
        self.subscriptions
            .iter_mut()
            .flat_map(|(sub_id, subscription)| {
                let sub_id = *sub_id;
                subscription
                    .take_pending_reads()
                    .into_iter()
                    .map(move |(reader_id, pending)| (sub_id, reader_id, pending))
            })
            .collect()
    }

    /// Routes a read completion to the subscription owning `reader_id`.
    ///
    /// Completions for readers of cancelled subscriptions are discarded.
    pub fn handle_read_completed(
        &mut self,
        reader_id: ReaderId,
        completed: ReadCompleted,
    ) -> Result<Vec<SubscriptionNotification>, SubscriptionFault> {
        let Some(subscription_id) = self.reader_index.get(&reader_id).copied() else {
            return Ok(Vec::new());
        };
        let Some(subscription) = self.subscriptions.get_mut(&subscription_id) else {
            return Ok(Vec::new());
        };
        subscription.handle_read_completed(reader_id, completed)
    }
}
