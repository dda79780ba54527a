use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{
    error::{HubError, invalid_input, storage_unavailable},
    secure_store::persistence::write_atomically,
    training::ports::ContentStore,
    types::Fingerprint,
};

const FINGERPRINT_PREFIX: &str = "sha256:";

/// Local content-addressed store: one file per distinct payload, named by
/// its SHA-256 digest.
#[derive(Debug, Clone)]
pub struct FileContentStore {
    dir: PathBuf,
}

impl FileContentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fingerprint_of(bytes: &[u8]) -> Fingerprint {
        format!("{FINGERPRINT_PREFIX}{}", hex::encode(Sha256::digest(bytes)))
    }

    pub async fn load(&self, fingerprint: &str) -> Result<Vec<u8>, HubError> {
        let path = self.path_for(fingerprint)?;
        tokio::fs::read(&path).await.map_err(|err| {
            storage_unavailable(format!(
                "failed to read contribution '{}': {err}",
                path.display()
            ))
        })
    }

    fn path_for(&self, fingerprint: &str) -> Result<PathBuf, HubError> {
        let digest = fingerprint
            .strip_prefix(FINGERPRINT_PREFIX)
            .filter(|digest| digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| invalid_input(format!("not a sha256 fingerprint: '{fingerprint}'")))?;
        Ok(self.dir.join(format!("{digest}.bin")))
    }
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn store(&self, bytes: Vec<u8>) -> Result<Fingerprint, HubError> {
        let fingerprint = Self::fingerprint_of(&bytes);
        let path = self.path_for(&fingerprint)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(fingerprint);
        }

        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|err| storage_unavailable(format!("store task failed: {err}")))?
            .map_err(|err| storage_unavailable(err.message))?;
        Ok(fingerprint)
    }
}
