//! One-shot batch reads over a scoped subscription (feed-style pagination).

use crate::coordinator::pump_subscription;
use crate::errors::ProjectionResult;
use crate::event::ResolvedEvent;
use crate::log::EventLog;
use crate::messages::SubscriptionNotification;
use crate::subscription::{ReaderSubscription, ReaderSubscriptionOptions};
use crate::tag::CheckpointTag;
use crate::tagger::PositionTagger;
use crate::types::SubscriptionId;
use std::ops::ControlFlow;

/// An event together with the tag at which it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    /// The delivered event.
    pub event: ResolvedEvent,
    /// The checkpoint tag at which the event was observed.
    pub tag: CheckpointTag,
}

/// One page of a feed read.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    /// The events of the page, in tag order.
    pub events: Vec<TaggedEvent>,
    /// The position the read stopped at; pass it back as the next page's
    /// `from` tag.
    pub last_position: CheckpointTag,
}

/// Reads one bounded page of events by driving a scoped subscription to its
/// first EOF or checkpoint boundary, then unsubscribing.
pub struct FeedReader;

impl FeedReader {
    /// Reads up to `max_events` events after `from` in `tagger`'s order.
    pub async fn read_page<L: EventLog + ?Sized>(
        log: &L,
        tagger: PositionTagger,
        from: CheckpointTag,
        max_events: u64,
    ) -> ProjectionResult<FeedPage> {
        let options = ReaderSubscriptionOptions::new()
            .with_checkpoint_threshold(max_events + 1)
            .with_stop_on_eof()
            .with_stop_after_n_events(max_events);
        let mut subscription =
            ReaderSubscription::subscribe(SubscriptionId::new(), tagger, from.clone(), options)?;
        subscription.request_events()?;

        let mut events = Vec::new();
        let mut last_position = from;
        pump_subscription(log, &mut subscription, |notification| match notification {
            SubscriptionNotification::EventReceived { event, tag, .. } => {
                last_position = tag.clone();
                events.push(TaggedEvent {
                    event: event.resolved,
                    tag,
                });
                ControlFlow::Continue(())
            }
            SubscriptionNotification::CheckpointSuggested { tag, .. }
            | SubscriptionNotification::EofReached { tag, .. } => {
                last_position = tag;
                ControlFlow::Break(())
            }
        })
        .await?;
        subscription.unsubscribe();

        Ok(FeedPage {
            events,
            last_position,
        })
    }
}
