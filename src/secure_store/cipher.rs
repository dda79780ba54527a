use chacha20poly1305::{
    Key, KeyInit, Tag, XChaCha20Poly1305, XNonce,
    aead::AeadInPlace,
};
use rand::{RngCore, rngs::OsRng};

use crate::{
    error::{HubError, format_error, integrity_error},
    secure_store::{blob::EncryptedBlob, key::SecretKey},
};

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Stateless authenticated encryption of byte payloads (XChaCha20-Poly1305).
///
/// Every call draws a fresh random 192-bit nonce.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureStore;

impl SecureStore {
    pub fn new() -> Self {
        Self
    }

    pub fn encrypt(&self, plaintext: &[u8], key: &SecretKey) -> Result<EncryptedBlob, HubError> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(XNonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| format_error("payload is too large to encrypt"))?;

        let mut ciphertext = Vec::with_capacity(NONCE_LEN + buffer.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&buffer);

        Ok(EncryptedBlob {
            ciphertext,
            tag: tag.to_vec(),
        })
    }

    /// Returns plaintext only after the tag authenticates the ciphertext.
    pub fn decrypt(&self, blob: &EncryptedBlob, key: &SecretKey) -> Result<Vec<u8>, HubError> {
        if blob.ciphertext.len() < NONCE_LEN {
            return Err(format_error(format!(
                "ciphertext segment must hold a {NONCE_LEN}-byte nonce, got {} bytes",
                blob.ciphertext.len()
            )));
        }
        if blob.tag.len() != TAG_LEN {
            return Err(format_error(format!(
                "tag segment must be {TAG_LEN} bytes, got {}",
                blob.tag.len()
            )));
        }

        let (nonce, sealed) = blob.ciphertext.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let mut buffer = sealed.to_vec();
        cipher
            .decrypt_in_place_detached(
                XNonce::from_slice(nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&blob.tag),
            )
            .map_err(|_| integrity_error("authentication tag does not match ciphertext"))?;

        Ok(buffer)
    }

    pub fn seal(&self, plaintext: &[u8], key: &SecretKey) -> Result<String, HubError> {
        Ok(self.encrypt(plaintext, key)?.encode())
    }

    pub fn open(&self, encoded: &str, key: &SecretKey) -> Result<Vec<u8>, HubError> {
        let blob = EncryptedBlob::parse(encoded)?;
        self.decrypt(&blob, key)
    }
}
