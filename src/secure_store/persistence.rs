use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    error::{HubError, format_error, internal_error},
    secure_store::{cipher::SecureStore, key::SecretKey},
};

const PERSISTENCE_VERSION: u64 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u64,
    state: T,
}

/// One file holding a single sealed (`hex|hex`) JSON document.
#[derive(Debug, Clone)]
pub struct SealedStateFile {
    path: PathBuf,
    store: SecureStore,
    key: SecretKey,
}

impl SealedStateFile {
    pub fn new(path: PathBuf, key: SecretKey) -> Self {
        Self {
            path,
            store: SecureStore::new(),
            key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, HubError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(internal_error(format!(
                    "failed to read sealed state '{}': {err}",
                    self.path.display()
                )));
            }
        };

        let plaintext = self.store.open(&content, &self.key)?;
        let envelope: Envelope<T> = serde_json::from_slice(&plaintext).map_err(|err| {
            format_error(format!(
                "failed to parse sealed state '{}': {err}",
                self.path.display()
            ))
        })?;
        if envelope.version != PERSISTENCE_VERSION {
            return Err(format_error(format!(
                "unsupported sealed state version {} at '{}'",
                envelope.version,
                self.path.display()
            )));
        }

        Ok(Some(envelope.state))
    }

    pub fn save<T: Serialize>(&self, state: &T) -> Result<(), HubError> {
        let plaintext = serde_json::to_vec(&Envelope {
            version: PERSISTENCE_VERSION,
            state,
        })
        .map_err(|err| internal_error(format!("failed to serialize sealed state: {err}")))?;
        let sealed = self.store.seal(&plaintext, &self.key)?;
        write_atomically(&self.path, sealed.as_bytes())
    }
}

pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), HubError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| {
        internal_error(format!(
            "failed to create directory '{}': {err}",
            parent.display()
        ))
    })?;

    let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let file = fs::File::create(&tmp_path).map_err(|err| {
        internal_error(format!(
            "failed to create temp file '{}': {err}",
            tmp_path.display()
        ))
    })?;
    {
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes).map_err(|err| {
            internal_error(format!("failed to write '{}': {err}", tmp_path.display()))
        })?;
        writer.flush().map_err(|err| {
            internal_error(format!("failed to flush '{}': {err}", tmp_path.display()))
        })?;
        writer.get_ref().sync_all().map_err(|err| {
            internal_error(format!("failed to sync '{}': {err}", tmp_path.display()))
        })?;
    }

    fs::rename(&tmp_path, path).map_err(|err| {
        internal_error(format!(
            "failed to replace '{}' from '{}': {err}",
            path.display(),
            tmp_path.display()
        ))
    })?;

    if let Ok(parent_file) = fs::File::open(parent) {
        let _ = parent_file.sync_all();
    }

    Ok(())
}
