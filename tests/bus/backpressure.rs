use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use time::OffsetDateTime;
use tokio::{sync::Semaphore, time::timeout};

use peghub::bus::{EventBus, HubEvent, PegChange, Topic};

fn peg_event(new_value: f64) -> HubEvent {
    HubEvent::PegChanged(PegChange {
        old_value: new_value - 1.0,
        new_value,
        changed_at: OffsetDateTime::now_utc(),
    })
}

/// Subscribes a handler that holds each event until the gate hands out a permit.
fn gated_subscriber(bus: &EventBus, gate: &Arc<Semaphore>) -> Arc<AtomicUsize> {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    let gate = Arc::clone(gate);
    bus.subscribe_fn(Topic::PegChanged, "gated", move |_event| {
        let gate = Arc::clone(&gate);
        let counter = Arc::clone(&counter);
        async move {
            let permit = gate.acquire().await.expect("gate stays open");
            permit.forget();
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .expect("subscribe should succeed");
    handled
}

#[tokio::test]
async fn full_queue_sheds_and_counts_events() {
    let bus = EventBus::with_capacity(1);
    let gate = Arc::new(Semaphore::new(0));
    let handled = gated_subscriber(&bus, &gate);

    let delivered: Vec<usize> = (0..5).map(|n| bus.publish(peg_event(n as f64))).collect();
    assert_eq!(delivered, vec![1, 0, 0, 0, 0]);
    assert_eq!(bus.shed_count(), 4);
    assert_eq!(bus.published_count(), 5);

    gate.add_permits(8);
    let outcome = bus.close().wait(Duration::from_secs(2)).await;
    assert_eq!(outcome.completed, 1);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn waiting_publish_blocks_until_the_subscriber_makes_room() {
    let bus = EventBus::with_capacity(1);
    let gate = Arc::new(Semaphore::new(0));
    let handled = gated_subscriber(&bus, &gate);

    // One event sits in the stalled handler, one in the queue.
    let mut accepted = 0;
    for n in 0..4 {
        match timeout(Duration::from_millis(100), bus.publish_wait(peg_event(n as f64))).await {
            Ok(delivered) => {
                assert_eq!(delivered, 1);
                accepted += 1;
            }
            Err(_) => break,
        }
    }
    assert_eq!(accepted, 2);
    assert_eq!(bus.shed_count(), 0);

    gate.add_permits(8);
    let delivered = timeout(Duration::from_secs(2), bus.publish_wait(peg_event(10.0)))
        .await
        .expect("publish should go through once the handler moves");
    assert_eq!(delivered, 1);

    let outcome = bus.close().wait(Duration::from_secs(2)).await;
    assert_eq!(outcome.completed, 1);
    assert_eq!(handled.load(Ordering::SeqCst), 3);
}
