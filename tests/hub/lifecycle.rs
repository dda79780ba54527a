use std::sync::Arc;

use peghub::{Hub, error::HubErrorKind, secure_store::SecretKey};

use crate::support::{
    EnergyModelLoader, INITIAL_PEG, MemoryStore, dependencies, energy_reading, hub_config,
    peg_changes, recv_within, temp_dir,
};

fn persistent_config(state_dir: &std::path::Path) -> peghub::config::Config {
    let mut config = hub_config();
    config.secure_store.persist_peg = true;
    config.secure_store.state_path = state_dir.join("peg.sealed");
    config
}

#[tokio::test]
async fn sealed_peg_survives_a_restart() {
    let state_dir = temp_dir("hub-state");
    let key = SecretKey::generate();

    let hub = Hub::start(
        persistent_config(&state_dir),
        dependencies(
            EnergyModelLoader::working(),
            Arc::new(MemoryStore::default()),
            Some(key.clone()),
        ),
    )
    .expect("hub should start");
    let mut changes = peg_changes(&hub);
    hub.submit_reading(energy_reading(20.0))
        .await
        .expect("reading should be accepted");
    let change = recv_within(&mut changes).await;
    assert_eq!(change.new_value, INITIAL_PEG + 2.0e10);

    let report = hub.shutdown().await;
    assert!(report.peg_persisted);

    let sealed = std::fs::read_to_string(state_dir.join("peg.sealed")).expect("state file");
    assert!(!sealed.contains("current_value"));

    let restarted = Hub::start(
        persistent_config(&state_dir),
        dependencies(
            EnergyModelLoader::working(),
            Arc::new(MemoryStore::default()),
            Some(key),
        ),
    )
    .expect("hub should restart");
    assert_eq!(restarted.controller().current_value(), INITIAL_PEG + 2.0e10);
    restarted.shutdown().await;

    let _ = std::fs::remove_dir_all(&state_dir);
}

#[tokio::test]
async fn state_sealed_with_another_key_refuses_to_start() {
    let state_dir = temp_dir("hub-foreign-key");

    let first = Hub::start(
        persistent_config(&state_dir),
        dependencies(
            EnergyModelLoader::working(),
            Arc::new(MemoryStore::default()),
            Some(SecretKey::generate()),
        ),
    )
    .expect("hub should start");
    assert!(first.shutdown().await.peg_persisted);

    let err = Hub::start(
        persistent_config(&state_dir),
        dependencies(
            EnergyModelLoader::working(),
            Arc::new(MemoryStore::default()),
            Some(SecretKey::generate()),
        ),
    )
    .err()
    .expect("foreign key must be rejected");
    assert_eq!(err.kind, HubErrorKind::Integrity);

    let _ = std::fs::remove_dir_all(&state_dir);
}

#[tokio::test]
async fn persistence_without_key_is_a_startup_error() {
    let state_dir = temp_dir("hub-no-key");
    let err = Hub::start(
        persistent_config(&state_dir),
        dependencies(
            EnergyModelLoader::working(),
            Arc::new(MemoryStore::default()),
            None,
        ),
    )
    .err()
    .expect("missing key must be rejected");
    assert_eq!(err.kind, HubErrorKind::InvalidInput);
}

#[tokio::test]
async fn shutdown_without_traffic_reports_initial_peg() {
    let hub = Hub::start(
        hub_config(),
        dependencies(
            EnergyModelLoader::working(),
            Arc::new(MemoryStore::default()),
            None,
        ),
    )
    .expect("hub should start");

    let report = hub.shutdown().await;
    assert!(report.feeds_stopped);
    assert_eq!(report.aborted_stores, 0);
    assert!(report.aborted_handlers.is_empty());
    assert_eq!(report.final_peg.current_value, INITIAL_PEG);
}
