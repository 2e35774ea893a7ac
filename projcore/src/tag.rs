//! Checkpoint tags: comparable positions in the transaction log.
//!
//! A [`CheckpointTag`] marks how far a subscription has progressed. Depending
//! on the tagger strategy that produced it, a tag carries a raw log position,
//! a set of per-key sequence counters, or both. Tags produced by the same
//! strategy are totally ordered; tags from different strategies (or different
//! tracked key sets) are incomparable and `partial_cmp` returns `None` rather
//! than guessing.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A position in the transaction log: commit offset and prepare offset.
///
/// Totally ordered by commit offset, then prepare offset. The prepare offset
/// `-1` is a valid sentinel used by zero tags, which precede every real log
/// record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TfPosition {
    /// Commit offset in the transaction log.
    pub commit: i64,
    /// Prepare offset in the transaction log.
    pub prepare: i64,
}

impl TfPosition {
    /// Creates a new log position.
    pub const fn new(commit: i64, prepare: i64) -> Self {
        Self { commit, prepare }
    }

    /// The position preceding every real log record.
    pub const fn zero() -> Self {
        Self {
            commit: 0,
            prepare: -1,
        }
    }
}

impl std::fmt::Display for TfPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C:{}/P:{}", self.commit, self.prepare)
    }
}

/// The shape of a checkpoint tag, derived from which fields it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMode {
    /// Raw transaction-log position only.
    Position,
    /// Per-stream sequence counters only.
    Streams,
    /// Log position plus per-event-type counters.
    EventTypeIndex,
}

/// An immutable, comparable read position.
///
/// Counters use `-1` to mean "before the first event" for that key. Advancing
/// a tag always produces a new value; existing tags are never mutated.
///
/// Two tags are comparable only when their [`TagMode`]s match and, for keyed
/// modes, their key sets match exactly. When both tags carry a log position
/// the position alone decides ordering *and equality* (the counters are an
/// auxiliary record); without positions the counters compare pointwise and
/// diverging counter sets are unordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTag {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    position: Option<TfPosition>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    streams: BTreeMap<String, i64>,
}

impl CheckpointTag {
    /// Tag carrying a raw log position.
    pub const fn from_position(commit: i64, prepare: i64) -> Self {
        Self {
            position: Some(TfPosition::new(commit, prepare)),
            streams: BTreeMap::new(),
        }
    }

    /// Tag carrying per-stream sequence counters.
    pub const fn from_stream_positions(streams: BTreeMap<String, i64>) -> Self {
        Self {
            position: None,
            streams,
        }
    }

    /// Tag carrying a log position plus per-event-type counters.
    pub const fn from_event_type_positions(
        position: TfPosition,
        types: BTreeMap<String, i64>,
    ) -> Self {
        Self {
            position: Some(position),
            streams: types,
        }
    }

    /// The raw log position, if this tag carries one.
    pub const fn position(&self) -> Option<TfPosition> {
        self.position
    }

    /// The per-key sequence counters.
    pub const fn streams(&self) -> &BTreeMap<String, i64> {
        &self.streams
    }

    /// The last-seen sequence number for `key`, if tracked.
    pub fn sequence_for(&self, key: &str) -> Option<i64> {
        self.streams.get(key).copied()
    }

    /// The shape of this tag.
    pub fn mode(&self) -> TagMode {
        match (&self.position, self.streams.is_empty()) {
            (Some(_), true) => TagMode::Position,
            (Some(_), false) => TagMode::EventTypeIndex,
            (None, _) => TagMode::Streams,
        }
    }

    /// Whether `other` can be meaningfully compared with this tag: same mode
    /// and, for keyed modes, the same tracked key set.
    pub fn is_comparable_with(&self, other: &Self) -> bool {
        if self.mode() != other.mode() {
            return false;
        }
        match self.mode() {
            TagMode::Position => true,
            TagMode::Streams | TagMode::EventTypeIndex => {
                self.streams.len() == other.streams.len()
                    && self.streams.keys().eq(other.streams.keys())
            }
        }
    }

    /// Returns a copy of this tag with `key` advanced to `sequence`.
    #[must_use]
    pub fn with_sequence(&self, key: &str, sequence: i64) -> Self {
        let mut streams = self.streams.clone();
        streams.insert(key.to_string(), sequence);
        Self {
            position: self.position,
            streams,
        }
    }

    /// Returns a copy of this tag moved to `position`, with `key` advanced to
    /// `sequence`.
    #[must_use]
    pub fn with_position_and_sequence(
        &self,
        position: TfPosition,
        key: &str,
        sequence: i64,
    ) -> Self {
        let mut streams = self.streams.clone();
        streams.insert(key.to_string(), sequence);
        Self {
            position: Some(position),
            streams,
        }
    }

    /// Returns a copy of this tag moved to `position`, counters unchanged.
    #[must_use]
    pub fn with_position(&self, position: TfPosition) -> Self {
        Self {
            position: Some(position),
            streams: self.streams.clone(),
        }
    }

    fn compare_streams(&self, other: &Self) -> Option<Ordering> {
        let mut any_less = false;
        let mut any_greater = false;
        for (key, ours) in &self.streams {
            let theirs = other.streams.get(key)?;
            match ours.cmp(theirs) {
                Ordering::Less => any_less = true,
                Ordering::Greater => any_greater = true,
                Ordering::Equal => {}
            }
        }
        match (any_less, any_greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            // Counters diverge in both directions: no defined order.
            (true, true) => None,
        }
    }
}

impl PartialEq for CheckpointTag {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for CheckpointTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.is_comparable_with(other) {
            return None;
        }
        match (self.position, other.position) {
            // The log position takes precedence: strong order by TF.
            (Some(ours), Some(theirs)) => Some(ours.cmp(&theirs)),
            (None, None) => self.compare_streams(other),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckpointTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode() {
            TagMode::Position => write!(f, "{}", self.position.unwrap_or_else(TfPosition::zero)),
            TagMode::Streams => write!(f, "{:?}", self.streams),
            TagMode::EventTypeIndex => write!(
                f,
                "{} {:?}",
                self.position.unwrap_or_else(TfPosition::zero),
                self.streams
            ),
        }
    }
}
