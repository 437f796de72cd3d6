//! # Key Derivation
//!
//! Turns user key material plus a container header into the AES key and
//! IV for one decode.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    PER-GENERATION DERIVATION                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  crypt12   key = key_file[126..158]          (no KDF)                  │
//! │            iv  = header[51..67]                                        │
//! │                                                                         │
//! │  crypt14   t   = HMAC-SHA256(key_file, header[15..47])                 │
//! │            key = HMAC-SHA256(t, "backup encryption" || 0x01)           │
//! │            iv  = header[67..83]                                        │
//! │                                                                         │
//! │  crypt15   t   = HMAC-SHA256(0x00 * 32, key_stream)                    │
//! │            key = HMAC-SHA256(t, "backup encryption" || 0x01)           │
//! │            iv  = header[8..24]  (base IV, per-frame counter applied    │
//! │                                  at decrypt time)                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Derivation never validates the key: a wrong key only shows up as an
//! authentication failure in the decryptor.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::format::{ContainerHeader, FormatGeneration, IV_SIZE};
use super::key_material::KeyMaterial;
use crate::error::{Error, Result};
use crate::logging::Redacted;

type HmacSha256 = Hmac<Sha256>;

/// Size of the derived AES-256 key
pub const KEY_SIZE: usize = 32;

/// Message of the second expansion round
pub const BACKUP_ENCRYPTION_INFO: &[u8] = b"backup encryption\x01";

/// AES key + IV for one container
///
/// Wiped on drop; `Debug` never prints the key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
    #[zeroize(skip)]
    generation: FormatGeneration,
}

impl DerivedKey {
    /// Key bytes
    pub(crate) fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// IV (base IV for crypt15)
    pub(crate) fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Generation this key was derived for
    pub fn generation(&self) -> FormatGeneration {
        self.generation
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &Redacted(()))
            .field("iv", &Redacted(()))
            .field("generation", &self.generation)
            .finish()
    }
}

/// Derive the key for a parsed container header
pub fn derive_key(material: &KeyMaterial, header: &ContainerHeader) -> Result<DerivedKey> {
    let generation = header.generation;
    let key = match (generation, material) {
        (FormatGeneration::Crypt12, KeyMaterial::KeyFile(key_file)) => {
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(key_file.aes_key());
            key
        }
        (FormatGeneration::Crypt14, KeyMaterial::KeyFile(key_file)) => {
            let salt = header.signature.ok_or_else(|| {
                Error::Internal("crypt14 header parsed without a salt".into())
            })?;
            two_round_expand(key_file.as_bytes(), &salt)?
        }
        (FormatGeneration::Crypt15, KeyMaterial::KeyStream(stream)) => {
            two_round_expand(&[0u8; 32], stream.as_bytes())?
        }
        (FormatGeneration::Crypt15, KeyMaterial::KeyFile(_)) => {
            return Err(Error::MalformedKeyMaterial(
                "crypt15 backups need the 64-digit key or the exported key file, not a 158-byte key".into(),
            ))
        }
        (generation, KeyMaterial::KeyStream(_)) => {
            return Err(Error::MalformedKeyMaterial(format!(
                "{} backups need the 158-byte key file",
                generation
            )))
        }
    };

    tracing::debug!(generation = %generation, "Derived container key");

    Ok(DerivedKey {
        key,
        iv: header.iv,
        generation,
    })
}

/// `HMAC(HMAC(hmac_key, message), "backup encryption\x01")`
fn two_round_expand(hmac_key: &[u8], message: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let intermediate = Zeroizing::new(hmac_sha256(hmac_key, message)?);
    hmac_sha256(intermediate.as_slice(), BACKUP_ENCRYPTION_INFO)
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(message);
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
