use async_trait::async_trait;

use crate::{error::HubError, types::Fingerprint};

/// External content-addressed storage for training contributions.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn store(&self, bytes: Vec<u8>) -> Result<Fingerprint, HubError>;
}
