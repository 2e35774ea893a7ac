//! `ProjCore` - checkpoint, ordering and reading engine for event-sourced
//! projections.
//!
//! This crate re-reads an append-only transaction log through an abstract
//! port and drives user-defined stateful projections that emit new events
//! and persist resumable checkpoints. It provides:
//!
//! - the algebra of comparable read positions ([`tag::CheckpointTag`] and
//!   the [`tagger::PositionTagger`] strategies);
//! - the [`reader`] state machines that pull events from the log under
//!   backpressure and catch-up conditions;
//! - the [`subscription`] layer that fans readers into one tag-ordered
//!   stream per logical subscription;
//! - the [`projection`] checkpoint/write pipeline that makes progress
//!   crash-resumable and exactly-once from the consumer's point of view;
//! - the async [`coordinator`] drivers and the one-shot [`feed`] reader.
//!
//! The log storage engine, network surface and projection scripting runtime
//! are external collaborators consumed through the [`log::EventLog`] port
//! and the [`projection::ProjectionHandler`] capability interface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod coordinator;
pub mod errors;
pub mod event;
pub mod feed;
pub mod log;
pub mod messages;
pub mod projection;
pub mod reader;
pub mod subscription;
pub mod tag;
pub mod tagger;
pub mod types;

pub use coordinator::ProjectionCoordinator;
pub use errors::{LogError, ProjectionError, ReaderFault, SubscriptionFault, TagError};
pub use event::{DistributedEvent, EventRecord, ResolvedEvent};
pub use feed::{FeedPage, FeedReader, TaggedEvent};
pub use log::{
    DeleteStreamCompleted, EventLog, ExpectedVersion, NewEvent, ReadAllCompleted,
    ReadStreamCompleted, StreamReadStatus, WriteEventsCompleted,
};
pub use messages::{
    ProjectionCommand, ProjectionReport, ReaderNotification, SubscriptionNotification,
};
pub use projection::{
    CheckpointConfig, CheckpointRecord, CoreProjection, EmittedEvent, HandlerError,
    HandlerOutcome, ProjectionHandler, ProjectionPhase, ProjectionStatistics,
};
pub use reader::{EventReader, StreamEventReader, TransactionLogEventReader};
pub use subscription::{
    PositionTracker, ReaderSubscription, ReaderSubscriptionOptions, SubscriptionDispatcher,
};
pub use tag::{CheckpointTag, TagMode, TfPosition};
pub use tagger::PositionTagger;
pub use types::{
    EventId, EventType, ProjectionName, ReaderId, StreamId, SubscriptionId, Timestamp,
};
