//! # Cryptography Module
//!
//! Detection, key derivation and authenticated decryption of encrypted
//! Android backup containers.
//!
//! ## Decode Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CONTAINER DECODE                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  key file / hex / exported key ──► KeyMaterial      (key_material)     │
//! │                                        │                                │
//! │  container bytes ──► detect ──► ContainerHeader      (format)          │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                                   DerivedKey         (kdf)             │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                                 DecryptSession       (decrypt)         │
//! │                                        │                                │
//! │                       verified SQLite bytes ──► schema extraction      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Integrity | No plaintext byte is released before its GCM tag verifies |
//! | Atomicity | Output files appear only after the whole container verified |
//! | Key hygiene | Key material and derived keys are zeroized on drop |
//! | Logging | Keys have redacted `Debug` output |

mod decrypt;
mod format;
mod kdf;
mod key_material;

pub use decrypt::{DecryptOptions, DecryptSession, SQLITE_MAGIC};
pub use format::{
    detect, BackupContainer, ContainerHeader, DatabaseKind, FormatGeneration, IV_SIZE,
    SIGNATURE_SIZE, TAG_SIZE,
};
pub use kdf::{derive_key, DerivedKey, BACKUP_ENCRYPTION_INFO, KEY_SIZE};
pub use key_material::{KeyFile, KeyMaterial, KeyStream, KEY_FILE_LEN, KEY_STREAM_LEN};

#[cfg(test)]
pub(crate) use decrypt::{frame_aad, frame_nonce};
