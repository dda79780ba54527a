use std::fmt;

use rand::{RngCore, rngs::OsRng};
use zeroize::Zeroize;

use crate::error::{HubError, invalid_input};

pub const KEY_LEN: usize = 32;

/// Symmetric key for the secure store. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, HubError> {
        let mut decoded = hex::decode(encoded.trim())
            .map_err(|err| invalid_input(format!("secret key is not valid hex: {err}")))?;
        if decoded.len() != KEY_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(invalid_input(format!(
                "secret key must be {KEY_LEN} bytes, got {len}"
            )));
        }

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    pub fn from_env(var: &str) -> Result<Self, HubError> {
        let raw = std::env::var(var)
            .map_err(|_| invalid_input(format!("environment variable {var} is not set")))?;
        Self::from_hex(&raw)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}
