use uuid::Uuid;

use peghub::{
    error::HubErrorKind,
    training::{ContentStore, FileContentStore},
};

fn temp_store() -> FileContentStore {
    FileContentStore::new(
        std::env::temp_dir().join(format!("peghub-contributions-{}", Uuid::now_v7().simple())),
    )
}

#[tokio::test]
async fn stored_bytes_load_back_by_fingerprint() {
    let store = temp_store();
    let payload = br#"{"reading":{"energy_price":60}}"#.to_vec();

    let fingerprint = store.store(payload.clone()).await.expect("store should succeed");
    assert_eq!(fingerprint, FileContentStore::fingerprint_of(&payload));
    assert_eq!(store.load(&fingerprint).await.expect("load should succeed"), payload);

    let again = store.store(payload.clone()).await.expect("second store should succeed");
    assert_eq!(again, fingerprint);
    let files = std::fs::read_dir(store.dir()).expect("store dir exists").count();
    assert_eq!(files, 1, "identical content is stored once");

    let _ = std::fs::remove_dir_all(store.dir());
}

#[tokio::test]
async fn malformed_fingerprint_is_invalid_input() {
    let store = temp_store();
    for fingerprint in ["md5:abc", "sha256:xyz", "sha256:../../etc/passwd"] {
        let err = store
            .load(fingerprint)
            .await
            .expect_err("malformed fingerprint must fail");
        assert_eq!(err.kind, HubErrorKind::InvalidInput, "fingerprint {fingerprint}");
    }
}

#[tokio::test]
async fn unknown_fingerprint_is_storage_unavailable() {
    let store = temp_store();
    let missing = FileContentStore::fingerprint_of(b"never stored");
    let err = store.load(&missing).await.expect_err("missing content must fail");
    assert_eq!(err.kind, HubErrorKind::StorageUnavailable);
}
