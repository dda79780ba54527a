use std::{collections::BTreeMap, time::Duration};

use serde_json::json;
use time::macros::datetime;
use tokio_util::sync::CancellationToken;

use peghub::{
    bus::EventBus,
    sensors::{Feed, SensorIngestor},
    types::SensorReading,
};

use crate::support::{
    Connection, PullStep, ScriptedPullFeed, ScriptedPushFeed, next_reading, readings, sample,
    sensors_config,
};

fn reading(source_id: &str, value: f64, at: time::OffsetDateTime) -> SensorReading {
    SensorReading::new(source_id, BTreeMap::from([("value".to_string(), value)]), at)
}

#[tokio::test]
async fn same_source_within_window_collapses_to_latest() {
    let bus = EventBus::new();
    let mut rx = readings(&bus);
    let ingestor = SensorIngestor::start(
        &sensors_config(150),
        bus.clone(),
        Vec::new(),
        CancellationToken::new(),
    );

    ingestor
        .submit_reading(reading("iot", 1.0, datetime!(2026-03-01 10:00:00 UTC)))
        .await
        .expect("submit");
    ingestor
        .submit_reading(reading("iot", 2.0, datetime!(2026-03-01 10:00:01 UTC)))
        .await
        .expect("submit");
    ingestor
        .submit_reading(reading("market", 9.0, datetime!(2026-03-01 10:00:00 UTC)))
        .await
        .expect("submit");

    let mut released = vec![next_reading(&mut rx).await, next_reading(&mut rx).await];
    released.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    assert_eq!(released[0].source_id, "iot");
    assert_eq!(released[0].field("value"), Some(2.0));
    assert_eq!(released[1].source_id, "market");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err(), "the older iot reading must not be emitted");

    let cached = ingestor.cache().get("iot").expect("latest reading is cached");
    assert_eq!(cached.field("value"), Some(2.0));
    assert!(ingestor.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn older_observation_does_not_replace_newer_one() {
    let bus = EventBus::new();
    let mut rx = readings(&bus);
    let ingestor = SensorIngestor::start(
        &sensors_config(100),
        bus.clone(),
        Vec::new(),
        CancellationToken::new(),
    );

    ingestor
        .submit_reading(reading("iot", 5.0, datetime!(2026-03-01 10:00:05 UTC)))
        .await
        .expect("submit");
    ingestor
        .submit_reading(reading("iot", 1.0, datetime!(2026-03-01 10:00:00 UTC)))
        .await
        .expect("submit");

    assert_eq!(next_reading(&mut rx).await.field("value"), Some(5.0));
    ingestor.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn failing_pull_feed_does_not_stop_other_feeds() {
    let bus = EventBus::new();
    let mut rx = readings(&bus);
    let flaky = ScriptedPullFeed::new(
        "flaky",
        vec![PullStep::Fail, PullStep::Panic, PullStep::Hang, PullStep::Fail],
        42.0,
    );
    let steady = ScriptedPullFeed::new("steady", Vec::new(), 7.0);

    let ingestor = SensorIngestor::start(
        &sensors_config(0),
        bus.clone(),
        vec![
            Feed::pull(flaky.clone(), Duration::from_millis(20)),
            Feed::pull(steady.clone(), Duration::from_millis(20)),
        ],
        CancellationToken::new(),
    );

    let mut flaky_seen = false;
    let mut steady_seen = false;
    while !(flaky_seen && steady_seen) {
        let reading = next_reading(&mut rx).await;
        match reading.source_id.as_str() {
            "flaky" => {
                assert_eq!(reading.field("value"), Some(42.0));
                flaky_seen = true;
            }
            "steady" => steady_seen = true,
            other => panic!("unexpected source {other}"),
        }
    }
    assert!(flaky.calls() >= 5, "flaky feed must be retried on later ticks");
    assert!(ingestor.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn push_feed_reconnects_after_refusal_and_disconnect() {
    let bus = EventBus::new();
    let mut rx = readings(&bus);
    let feed = ScriptedPushFeed::new(
        "stream",
        vec![
            Connection::Refuse,
            Connection::Deliver(vec![1.0]),
            Connection::Refuse,
            Connection::DeliverAndHold(vec![2.0]),
        ],
    );

    let ingestor = SensorIngestor::start(
        &sensors_config(0),
        bus.clone(),
        vec![Feed::push(feed.clone())],
        CancellationToken::new(),
    );

    assert_eq!(next_reading(&mut rx).await.field("value"), Some(1.0));
    assert_eq!(next_reading(&mut rx).await.field("value"), Some(2.0));
    assert_eq!(feed.connects(), 4);
    assert!(ingestor.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn malformed_samples_are_rejected_at_submit() {
    let bus = EventBus::new();
    let ingestor = SensorIngestor::start(
        &sensors_config(0),
        bus,
        Vec::new(),
        CancellationToken::new(),
    );

    let err = ingestor
        .submit("iot", sample(json!({ "status": "offline" })))
        .await
        .expect_err("sample without numbers is malformed");
    assert_eq!(err.kind, peghub::HubErrorKind::InvalidInput);
    ingestor.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn stop_flushes_readings_held_in_the_window() {
    let bus = EventBus::new();
    let mut rx = readings(&bus);
    let shutdown = CancellationToken::new();
    let ingestor = SensorIngestor::start(
        &sensors_config(60_000),
        bus.clone(),
        Vec::new(),
        shutdown.clone(),
    );

    ingestor
        .submit("iot", sample(json!({ "energy_price": 60 })))
        .await
        .expect("submit");
    assert!(ingestor.stop(Duration::from_secs(1)).await);

    let flushed = next_reading(&mut rx).await;
    assert_eq!(flushed.field("energy_price"), Some(60.0));
    assert!(!shutdown.is_cancelled(), "stopping the ingestor leaves the parent token alone");
}
