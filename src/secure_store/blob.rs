use std::{fmt, str::FromStr};

use crate::error::{HubError, format_error};

const SEGMENT_SEPARATOR: char = '|';

/// Output of [`super::SecureStore::encrypt`].
///
/// `ciphertext` carries the per-call nonce as its prefix, so the persisted
/// form stays `hex(ciphertext)|hex(tag)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl EncryptedBlob {
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            hex::encode(&self.ciphertext),
            SEGMENT_SEPARATOR,
            hex::encode(&self.tag)
        )
    }

    pub fn parse(encoded: &str) -> Result<Self, HubError> {
        let encoded = encoded.trim();
        let separators = encoded.matches(SEGMENT_SEPARATOR).count();
        if separators != 1 {
            return Err(format_error(format!(
                "sealed blob must contain exactly one '{SEGMENT_SEPARATOR}' separator, found {separators}"
            )));
        }

        let (ciphertext_hex, tag_hex) = encoded
            .split_once(SEGMENT_SEPARATOR)
            .ok_or_else(|| format_error("sealed blob separator is missing"))?;
        if ciphertext_hex.is_empty() {
            return Err(format_error("sealed blob is missing its ciphertext segment"));
        }
        if tag_hex.is_empty() {
            return Err(format_error("sealed blob is missing its tag segment"));
        }

        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|err| format_error(format!("ciphertext segment is not valid hex: {err}")))?;
        let tag = hex::decode(tag_hex)
            .map_err(|err| format_error(format!("tag segment is not valid hex: {err}")))?;

        Ok(Self { ciphertext, tag })
    }
}

impl fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for EncryptedBlob {
    type Err = HubError;

    fn from_str(encoded: &str) -> Result<Self, Self::Err> {
        Self::parse(encoded)
    }
}
