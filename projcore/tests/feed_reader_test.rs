//! Feed-style pagination over scoped subscriptions.

use projcore::{
    CheckpointTag, EventLog, EventType, ExpectedVersion, FeedReader, NewEvent, PositionTagger,
    StreamId,
};
use projcore_memory::InMemoryLog;

fn ordered(data: &[u8]) -> NewEvent {
    NewEvent::json(EventType::try_new("ordered").unwrap(), data.to_vec())
}

async fn seeded_log() -> InMemoryLog {
    let log = InMemoryLog::new();
    log.write_events(
        &StreamId::try_new("orders-1").unwrap(),
        ExpectedVersion::NoStream,
        vec![ordered(b"1"), ordered(b"2"), ordered(b"3")],
    )
    .await
    .unwrap();
    log.write_events(
        &StreamId::try_new("orders-2").unwrap(),
        ExpectedVersion::NoStream,
        vec![ordered(b"4"), ordered(b"5")],
    )
    .await
    .unwrap();
    log
}

fn index_tagger() -> PositionTagger {
    PositionTagger::event_type_index(
        std::iter::once(EventType::try_new("ordered").unwrap()).collect(),
    )
    .unwrap()
}

#[tokio::test]
async fn feed_pages_through_an_event_type_index() {
    let log = seeded_log().await;
    let tagger = index_tagger();
    let zero = tagger.make_zero_checkpoint_tag();

    let page1 = FeedReader::read_page(&log, tagger.clone(), zero, 3)
        .await
        .unwrap();
    assert_eq!(page1.events.len(), 3);
    let data: Vec<&[u8]> = page1
        .events
        .iter()
        .map(|tagged| tagged.event.record().data.as_slice())
        .collect();
    assert_eq!(data, vec![&b"1"[..], &b"2"[..], &b"3"[..]]);
    assert_eq!(page1.last_position.sequence_for("ordered"), Some(2));

    let page2 = FeedReader::read_page(&log, tagger.clone(), page1.last_position, 3)
        .await
        .unwrap();
    assert_eq!(page2.events.len(), 2);
    let data: Vec<&[u8]> = page2
        .events
        .iter()
        .map(|tagged| tagged.event.record().data.as_slice())
        .collect();
    assert_eq!(data, vec![&b"4"[..], &b"5"[..]]);

    let page3 = FeedReader::read_page(&log, tagger, page2.last_position.clone(), 3)
        .await
        .unwrap();
    assert!(page3.events.is_empty());
    assert_eq!(page3.last_position, page2.last_position);
}

#[tokio::test]
async fn feed_pages_through_the_raw_log() {
    let log = seeded_log().await;
    let tagger = PositionTagger::transaction_file();
    let zero = tagger.make_zero_checkpoint_tag();

    let page = FeedReader::read_page(&log, tagger.clone(), zero, 100)
        .await
        .unwrap();
    assert_eq!(page.events.len(), 5);
    // Tags are raw positions, strictly increasing along the page.
    let mut last: Option<CheckpointTag> = None;
    for tagged in &page.events {
        if let Some(previous) = &last {
            assert!(tagged.tag > *previous);
        }
        last = Some(tagged.tag.clone());
    }

    let next = FeedReader::read_page(&log, tagger, page.last_position, 100)
        .await
        .unwrap();
    assert!(next.events.is_empty());
}

#[tokio::test]
async fn feed_over_an_empty_index_returns_an_empty_page() {
    let log = InMemoryLog::new();
    let tagger = index_tagger();
    let zero = tagger.make_zero_checkpoint_tag();

    let page = FeedReader::read_page(&log, tagger, zero.clone(), 10)
        .await
        .unwrap();
    assert!(page.events.is_empty());
    assert_eq!(page.last_position, zero);
}
