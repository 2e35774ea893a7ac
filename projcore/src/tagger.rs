//! Position taggers: strategies that convert delivered events into
//! checkpoint tags.
//!
//! Each subscription shape has one tagger. The tagger decides which tags are
//! compatible with it (so that a subscription can never resume from a
//! checkpoint written by a different strategy), produces the zero tag that
//! precedes all events, and advances tags as events are delivered.

use crate::errors::TagError;
use crate::event::DistributedEvent;
use crate::tag::{CheckpointTag, TagMode, TfPosition};
use crate::types::{EventType, StreamId};
use std::collections::BTreeSet;

/// A strategy for tagging delivered events with comparable positions.
///
/// Closed set of strategies; dispatch is an explicit `match`, one message at
/// a time, with no virtual handler machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionTagger {
    /// Tags events with their raw transaction-log position.
    TransactionFile,
    /// Tags events with the sequence number of a single stream.
    Stream {
        /// The tracked stream.
        stream: StreamId,
    },
    /// Tags events with per-stream sequence numbers across a fixed set.
    MultiStream {
        /// The tracked streams.
        streams: BTreeSet<StreamId>,
    },
    /// Tags events with the log position plus per-event-type index counters.
    EventTypeIndex {
        /// The tracked event types.
        event_types: BTreeSet<EventType>,
    },
}

impl PositionTagger {
    /// Strategy tracking raw log positions.
    pub const fn transaction_file() -> Self {
        Self::TransactionFile
    }

    /// Strategy tracking a single stream's sequence numbers.
    pub const fn stream(stream: StreamId) -> Self {
        Self::Stream { stream }
    }

    /// Strategy tracking a set of streams.
    ///
    /// An empty set is a configuration error.
    pub fn multi_stream(streams: BTreeSet<StreamId>) -> Result<Self, TagError> {
        if streams.is_empty() {
            return Err(TagError::EmptyKeySet);
        }
        Ok(Self::MultiStream { streams })
    }

    /// Strategy tracking a set of event types through their index streams.
    ///
    /// An empty set is a configuration error.
    pub fn event_type_index(event_types: BTreeSet<EventType>) -> Result<Self, TagError> {
        if event_types.is_empty() {
            return Err(TagError::EmptyKeySet);
        }
        Ok(Self::EventTypeIndex { event_types })
    }

    /// The tag preceding any real event for this strategy's key set.
    pub fn make_zero_checkpoint_tag(&self) -> CheckpointTag {
        match self {
            Self::TransactionFile => CheckpointTag::from_position(0, -1),
            Self::Stream { stream } => CheckpointTag::from_stream_positions(
                std::iter::once((stream.to_string(), -1)).collect(),
            ),
            Self::MultiStream { streams } => CheckpointTag::from_stream_positions(
                streams.iter().map(|s| (s.to_string(), -1)).collect(),
            ),
            Self::EventTypeIndex { event_types } => CheckpointTag::from_event_type_positions(
                TfPosition::zero(),
                event_types.iter().map(|t| (t.to_string(), -1)).collect(),
            ),
        }
    }

    /// Advances `previous` by `event`.
    ///
    /// Produces a tag strictly greater than `previous` when the event carries
    /// position information for a tracked key; otherwise returns `previous`
    /// unchanged (idempotent skip). The result is never behind `previous`.
    pub fn make_checkpoint_tag(
        &self,
        previous: &CheckpointTag,
        event: &DistributedEvent,
    ) -> CheckpointTag {
        let candidate = match self {
            Self::TransactionFile => {
                CheckpointTag::from_position(event.position.commit, event.position.prepare)
            }
            Self::Stream { .. } | Self::MultiStream { .. } => {
                let record = event.resolved.position_record();
                if self.tracks_stream(&record.stream_id) {
                    previous.with_sequence(record.stream_id.as_ref(), record.event_number)
                } else {
                    return previous.clone();
                }
            }
            Self::EventTypeIndex { event_types } => {
                let event_type = &event.resolved.record().event_type;
                if event_types.contains(event_type) {
                    previous.with_position_and_sequence(
                        event.position,
                        event_type.as_ref(),
                        event.resolved.position_record().event_number,
                    )
                } else {
                    return previous.clone();
                }
            }
        };
        // A re-observed event must not move the tag backwards.
        if candidate.partial_cmp(previous) == Some(std::cmp::Ordering::Greater) {
            candidate
        } else {
            previous.clone()
        }
    }

    /// Whether `event` lies strictly after `tag` in this strategy's order.
    ///
    /// Returns `false` for incompatible tags; used to drop events that a
    /// resumed reader re-observes under at-least-once delivery.
    pub fn is_message_after_checkpoint_tag(
        &self,
        tag: &CheckpointTag,
        event: &DistributedEvent,
    ) -> bool {
        if !self.is_compatible(tag) {
            return false;
        }
        match self {
            // Strong order by TF position for both raw and index strategies.
            Self::TransactionFile | Self::EventTypeIndex { .. } => tag
                .position()
                .is_some_and(|position| event.position > position),
            Self::Stream { .. } | Self::MultiStream { .. } => {
                let record = event.resolved.position_record();
                tag.sequence_for(record.stream_id.as_ref())
                    .is_some_and(|last| record.event_number > last)
            }
        }
    }

    /// Whether `tag` was produced by a strategy with this shape and key set.
    pub fn is_compatible(&self, tag: &CheckpointTag) -> bool {
        match self {
            Self::TransactionFile => tag.mode() == TagMode::Position,
            Self::Stream { stream } => {
                tag.mode() == TagMode::Streams
                    && tag.streams().len() == 1
                    && tag.streams().contains_key(stream.as_ref())
            }
            Self::MultiStream { streams } => {
                tag.mode() == TagMode::Streams
                    && tag.streams().len() == streams.len()
                    && streams
                        .iter()
                        .all(|s| tag.streams().contains_key(s.as_ref()))
            }
            Self::EventTypeIndex { event_types } => {
                tag.mode() == TagMode::EventTypeIndex
                    && tag.streams().len() == event_types.len()
                    && event_types
                        .iter()
                        .all(|t| tag.streams().contains_key(t.as_ref()))
            }
        }
    }

    /// The index streams an event-type-index subscription reads from, one
    /// per tracked type.
    pub fn index_streams(&self) -> Vec<StreamId> {
        match self {
            Self::EventTypeIndex { event_types } => event_types
                .iter()
                .map(StreamId::event_type_index)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn tracks_stream(&self, stream: &StreamId) -> bool {
        match self {
            Self::Stream { stream: tracked } => tracked == stream,
            Self::MultiStream { streams } => streams.contains(stream),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventRecord, ResolvedEvent};
    use crate::types::{EventId, ReaderId, Timestamp};
    use std::collections::BTreeMap;

    fn index_event(
        position: TfPosition,
        index_stream: &str,
        index_sequence: i64,
        source_stream: &str,
        source_sequence: i64,
        event_type: &str,
        progress: f32,
    ) -> DistributedEvent {
        let event = EventRecord {
            stream_id: StreamId::try_new(source_stream).unwrap(),
            event_number: source_sequence,
            event_id: EventId::new(),
            event_type: EventType::try_new(event_type).unwrap(),
            is_json: true,
            data: b"{}".to_vec(),
            metadata: Vec::new(),
            timestamp: Timestamp::now(),
        };
        let link = EventRecord {
            stream_id: StreamId::try_new(index_stream).unwrap(),
            event_number: index_sequence,
            event_id: EventId::new(),
            event_type: EventType::try_new("$>").unwrap(),
            is_json: false,
            data: Vec::new(),
            metadata: Vec::new(),
            timestamp: Timestamp::now(),
        };
        DistributedEvent::new(
            ReaderId::new(),
            ResolvedEvent::ResolvedLink { link, event },
            position,
            progress,
        )
    }

    fn stream_event(stream: &str, sequence: i64, position: TfPosition) -> DistributedEvent {
        let event = EventRecord {
            stream_id: StreamId::try_new(stream).unwrap(),
            event_number: sequence,
            event_id: EventId::new(),
            event_type: EventType::try_new("some-type").unwrap(),
            is_json: true,
            data: b"{}".to_vec(),
            metadata: Vec::new(),
            timestamp: Timestamp::now(),
        };
        DistributedEvent::new(ReaderId::new(), ResolvedEvent::Direct(event), position, 0.0)
    }

    fn type_index_tagger() -> PositionTagger {
        PositionTagger::event_type_index(
            ["type1", "type2"]
                .iter()
                .map(|t| EventType::try_new(*t).unwrap())
                .collect(),
        )
        .unwrap()
    }

    fn index_tag(commit: i64, prepare: i64, counters: &[(&str, i64)]) -> CheckpointTag {
        CheckpointTag::from_event_type_positions(
            TfPosition::new(commit, prepare),
            counters
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    // The four sample deliveries used throughout, matching the index stream
    // layout: type1 at (20,10) and (50,40), type2 at (30,20) and (70,60).
    fn zero_event() -> DistributedEvent {
        index_event(TfPosition::new(20, 10), "$et-type1", 0, "stream1", 0, "type1", 10.0)
    }
    fn first_event() -> DistributedEvent {
        index_event(TfPosition::new(30, 20), "$et-type2", 0, "stream1", 1, "type2", 20.0)
    }
    fn second_event() -> DistributedEvent {
        index_event(TfPosition::new(50, 40), "$et-type1", 1, "stream2", 0, "type1", 30.0)
    }
    fn third_event() -> DistributedEvent {
        index_event(TfPosition::new(70, 60), "$et-type2", 1, "stream2", 1, "type2", 40.0)
    }

    #[test]
    fn empty_key_set_is_rejected() {
        assert!(matches!(
            PositionTagger::event_type_index(BTreeSet::new()),
            Err(TagError::EmptyKeySet)
        ));
        assert!(matches!(
            PositionTagger::multi_stream(BTreeSet::new()),
            Err(TagError::EmptyKeySet)
        ));
    }

    #[test]
    fn is_message_after_checkpoint_tag_after_case() {
        let t = type_index_tagger();
        let tag = index_tag(10, 5, &[("type1", 0), ("type2", -1)]);
        assert!(t.is_message_after_checkpoint_tag(&tag, &first_event()));
    }

    #[test]
    fn is_message_after_checkpoint_tag_tf_only_after_case() {
        let t = type_index_tagger();
        let tag = index_tag(10, 5, &[("type1", 0), ("type2", 0)]);
        assert!(t.is_message_after_checkpoint_tag(&tag, &first_event()));
    }

    #[test]
    fn is_message_after_checkpoint_tag_before_case() {
        let t = type_index_tagger();
        let tag = index_tag(40, 35, &[("type1", 2), ("type2", 2)]);
        assert!(!t.is_message_after_checkpoint_tag(&tag, &first_event()));
    }

    #[test]
    fn is_message_after_checkpoint_tag_tf_only_before_case() {
        let t = type_index_tagger();
        let tag = index_tag(40, 35, &[("type1", 0), ("type2", 0)]);
        assert!(!t.is_message_after_checkpoint_tag(&tag, &first_event()));
    }

    #[test]
    fn is_message_after_checkpoint_tag_equal_case() {
        let t = type_index_tagger();
        let tag = index_tag(30, 20, &[("type1", 0), ("type2", 0)]);
        assert!(!t.is_message_after_checkpoint_tag(&tag, &first_event()));
    }

    #[test]
    fn is_message_after_checkpoint_tag_incompatible_keys_case() {
        let t = type_index_tagger();
        let tag = index_tag(30, 20, &[("type1", -1), ("type3", -1)]);
        assert!(!t.is_message_after_checkpoint_tag(&tag, &first_event()));
    }

    #[test]
    fn position_checkpoint_tag_is_incompatible() {
        let t = type_index_tagger();
        assert!(!t.is_compatible(&CheckpointTag::from_position(1000, 500)));
    }

    #[test]
    fn streams_checkpoint_tag_is_incompatible() {
        let t = type_index_tagger();
        let tag = CheckpointTag::from_stream_positions(
            [("$et-type1".to_string(), 100), ("$et-type2".to_string(), 150)]
                .into_iter()
                .collect(),
        );
        assert!(!t.is_compatible(&tag));
    }

    #[test]
    fn different_type_set_checkpoint_tag_is_incompatible() {
        let t = type_index_tagger();
        assert!(!t.is_compatible(&index_tag(100, 50, &[("type1", 100), ("type3", 150)])));
    }

    #[test]
    fn same_type_set_checkpoint_tag_is_compatible() {
        let t = type_index_tagger();
        assert!(t.is_compatible(&index_tag(100, 50, &[("type1", 100), ("type2", 150)])));
    }

    #[test]
    fn zero_position_tag_is_before_first_event_possible() {
        let t = type_index_tagger();
        let zero = t.make_zero_checkpoint_tag();
        let zero_from_event = t.make_checkpoint_tag(&zero, &zero_event());
        assert!(zero_from_event > zero);
    }

    #[test]
    fn produced_checkpoint_tags_are_correctly_ordered() {
        let t = type_index_tagger();
        let zero = t.make_zero_checkpoint_tag();

        let zero_event_tag = t.make_checkpoint_tag(&zero, &zero_event());
        let zero_event_tag2 = t.make_checkpoint_tag(&zero_event_tag, &zero_event());
        let first = t.make_checkpoint_tag(&zero_event_tag2, &first_event());
        let second = t.make_checkpoint_tag(&first, &second_event());
        let second2 = t.make_checkpoint_tag(&zero_event_tag, &second_event());
        let third = t.make_checkpoint_tag(&second, &third_event());

        assert!(zero_event_tag > zero);
        assert!(first > zero);
        assert!(second > first);

        assert_eq!(zero_event_tag2, zero_event_tag);
        // Strong order by TF: equal positions compare equal even though the
        // two tags saw different counter histories.
        assert_eq!(second, second2);
        assert!(second2 > zero_event_tag);
        assert!(second2 > first);

        assert!(third > second);
        assert!(third > first);
        assert!(third > zero_event_tag);
        assert!(third > zero);
    }

    #[test]
    fn untracked_event_type_leaves_tag_unchanged() {
        let t = type_index_tagger();
        let zero = t.make_zero_checkpoint_tag();
        let unrelated =
            index_event(TfPosition::new(90, 80), "$et-type9", 0, "stream9", 0, "type9", 50.0);
        let tag = t.make_checkpoint_tag(&zero, &unrelated);
        assert_eq!(tag, zero);
    }

    #[test]
    fn stream_tagger_advances_only_tracked_streams() {
        let a = StreamId::try_new("account-1").unwrap();
        let b = StreamId::try_new("account-2").unwrap();
        let t = PositionTagger::multi_stream([a.clone(), b].into_iter().collect()).unwrap();
        let zero = t.make_zero_checkpoint_tag();

        let tagged = t.make_checkpoint_tag(&zero, &stream_event("account-1", 0, TfPosition::new(10, 5)));
        assert!(tagged > zero);
        assert_eq!(tagged.sequence_for("account-1"), Some(0));
        assert_eq!(tagged.sequence_for("account-2"), Some(-1));

        let untracked =
            t.make_checkpoint_tag(&tagged, &stream_event("elsewhere", 7, TfPosition::new(20, 15)));
        assert_eq!(untracked, tagged);
    }

    #[test]
    fn stream_tagger_filters_reobserved_events() {
        let a = StreamId::try_new("account-1").unwrap();
        let t = PositionTagger::stream(a);
        let zero = t.make_zero_checkpoint_tag();
        let event = stream_event("account-1", 0, TfPosition::new(10, 5));
        let tag = t.make_checkpoint_tag(&zero, &event);

        assert!(t.is_message_after_checkpoint_tag(&zero, &event));
        assert!(!t.is_message_after_checkpoint_tag(&tag, &event));
        assert!(t.is_message_after_checkpoint_tag(
            &tag,
            &stream_event("account-1", 1, TfPosition::new(20, 15))
        ));
    }

    #[test]
    fn make_checkpoint_tag_never_regresses() {
        let t = PositionTagger::transaction_file();
        let ahead = CheckpointTag::from_position(100, 90);
        let behind = stream_event("any", 0, TfPosition::new(40, 30));
        assert_eq!(t.make_checkpoint_tag(&ahead, &behind), ahead);
    }

    #[test]
    fn transaction_file_tagger_tracks_raw_positions() {
        let t = PositionTagger::transaction_file();
        let zero = t.make_zero_checkpoint_tag();
        let event = stream_event("any", 0, TfPosition::new(40, 30));
        let tag = t.make_checkpoint_tag(&zero, &event);
        assert_eq!(tag, CheckpointTag::from_position(40, 30));
        assert!(t.is_message_after_checkpoint_tag(&zero, &event));
        assert!(!t.is_message_after_checkpoint_tag(&tag, &event));
    }

    #[test]
    fn index_streams_are_derived_from_types() {
        let t = type_index_tagger();
        let streams: Vec<String> = t
            .index_streams()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(streams, vec!["$et-type1".to_string(), "$et-type2".to_string()]);
    }
}
