use std::{sync::Arc, time::Duration};

use serde_json::json;

use peghub::{
    Hub, HubPhase,
    error::HubErrorKind,
    sensors::RawSample,
};

use crate::support::{
    EnergyModelLoader, INITIAL_PEG, MemoryStore, dependencies, energy_reading, hub_config,
    peg_changes, recv_within, training_notices, wait_for_idle,
};

#[tokio::test]
async fn reading_drives_prediction_into_a_peg_change() {
    let loader = EnergyModelLoader::working();
    let hub = Hub::start(
        hub_config(),
        dependencies(loader.clone(), Arc::new(MemoryStore::default()), None),
    )
    .expect("hub should start");
    let mut changes = peg_changes(&hub);
    assert!(!hub.status().model_loaded);

    hub.submit_reading(energy_reading(50.0))
        .await
        .expect("reading should be accepted");

    let change = recv_within(&mut changes).await;
    assert_eq!(change.old_value, INITIAL_PEG);
    assert_eq!(change.new_value, 3_191_590_000_000.0);

    wait_for_idle(&hub).await;
    let status = hub.status();
    assert!(status.model_loaded);
    assert_eq!(status.phase, HubPhase::Idle);
    assert_eq!(status.last_peg.current_value, 3_191_590_000_000.0);
    assert_eq!(
        status.cached_readings.get("iot").and_then(|r| r.field("energy_price")),
        Some(50.0)
    );
    assert_eq!(loader.calls(), 1);
    assert_eq!(hub.trigger().stored_count(), 0, "50 is not above the gate");

    let report = hub.shutdown().await;
    assert!(report.feeds_stopped);
    assert!(report.aborted_handlers.is_empty());
    assert_eq!(report.aborted_stores, 0);
    assert!(!report.peg_persisted);
    assert_eq!(report.final_peg.current_value, 3_191_590_000_000.0);
}

#[tokio::test]
async fn high_energy_price_also_reaches_the_content_store() {
    let store = Arc::new(MemoryStore::default());
    let hub = Hub::start(
        hub_config(),
        dependencies(EnergyModelLoader::working(), store.clone(), None),
    )
    .expect("hub should start");
    let mut notices = training_notices(&hub);

    hub.submit_sample(
        "iot",
        RawSample::new(
            json!({"energy_price": "60", "label": "spot"})
                .as_object()
                .cloned()
                .expect("object"),
        ),
    )
    .await
    .expect("sample should be accepted");

    let notice = recv_within(&mut notices).await;
    assert_eq!(notice.source_id, "iot");
    assert_eq!(hub.trigger().stored_count(), 1);
    assert_eq!(store.payloads.lock().expect("lock poisoned").len(), 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn malformed_sample_is_rejected_before_the_bus() {
    let hub = Hub::start(
        hub_config(),
        dependencies(EnergyModelLoader::working(), Arc::new(MemoryStore::default()), None),
    )
    .expect("hub should start");

    let err = hub
        .submit_sample(
            "iot",
            RawSample::new(json!({"status": "down"}).as_object().cloned().expect("object")),
        )
        .await
        .expect_err("sample without numbers must fail");
    assert_eq!(err.kind, HubErrorKind::InvalidInput);
    assert!(hub.status().cached_readings.is_empty());

    hub.shutdown().await;
}

#[tokio::test]
async fn unavailable_model_leaves_the_peg_alone() {
    let loader = EnergyModelLoader::broken();
    let hub = Hub::start(
        hub_config(),
        dependencies(loader.clone(), Arc::new(MemoryStore::default()), None),
    )
    .expect("hub should start");

    hub.submit_reading(energy_reading(40.0))
        .await
        .expect("reading should be accepted");

    tokio::time::timeout(Duration::from_secs(3), async {
        while hub.bus().handler_failures() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("predictor failure should be recorded");

    let status = hub.status();
    assert!(!status.model_loaded);
    assert_eq!(status.last_peg.current_value, INITIAL_PEG);
    assert!(status.last_peg.last_adjustment.is_none());
    assert_eq!(loader.calls(), 1);

    let report = hub.shutdown().await;
    assert_eq!(report.final_peg.current_value, INITIAL_PEG);
}
