//! # Container Formats
//!
//! Header layouts for the three encrypted-container generations and the
//! detection logic that picks one of them.
//!
//! ## Layouts
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CONTAINER LAYOUTS                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Generation 12                                                         │
//! │  ┌────────┬───────────┬────────┬──────┬──────────────┬──────┬───────┐  │
//! │  │ 0..3   │ 3..35     │ 35..51 │51..67│ 67..len-20   │ tag  │ 4 B   │  │
//! │  │ ?      │ signature │ ?      │ IV   │ ciphertext   │ 16 B │ trail │  │
//! │  └────────┴───────────┴────────┴──────┴──────────────┴──────┴───────┘  │
//! │                                                                         │
//! │  Generation 14                                                         │
//! │  ┌────────┬───────────┬────────┬──────┬────────┬──────────────┬─────┐  │
//! │  │ 0..15  │ 15..47    │ 47..67 │67..83│ 83..191│ 191..len-16  │ tag │  │
//! │  │ ?      │ sig/salt  │ ?      │ IV   │ ?      │ ciphertext   │ 16B │  │
//! │  └────────┴───────────┴────────┴──────┴────────┴──────────────┴─────┘  │
//! │                                                                         │
//! │  Generation 15                                                         │
//! │  ┌───┬──────┬─────────────────────────────┬─────────┬─────────┬─────┐  │
//! │  │ N │ kind │ header block (N bytes)      │ frame 0 │ frame 1 │ ... │  │
//! │  │   │      │ "crypt\x0f" | IV(16) | ...  │         │         │     │  │
//! │  └───┴──────┴─────────────────────────────┴─────────┴─────────┴─────┘  │
//! │                                                                         │
//! │  frame: u32 BE len | u8 flags | ciphertext | 16-byte tag               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Detection Order
//!
//! 1. An explicit hint wins.
//! 2. The key file's signature repeated at `[3..35]` (12) or `[15..47]` (14).
//! 3. The generation-15 magic at the start of the header block.
//! 4. Otherwise the container is rejected as unsupported.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;

use super::key_material::KeyMaterial;
use crate::error::{Error, Result};
use crate::logging::RedactedBytes;

/// Size of the AES-GCM IV stored in every header
pub const IV_SIZE: usize = 16;

/// Size of the backup signature / salt
pub const SIGNATURE_SIZE: usize = 32;

/// Size of the GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Generation-12 layout constants
pub mod gen12 {
    /// Bytes before the ciphertext
    pub const HEADER_LEN: usize = 67;
    /// Backup signature position
    pub const SIGNATURE: std::ops::Range<usize> = 3..35;
    /// IV position
    pub const IV: std::ops::Range<usize> = 51..67;
    /// Tag plus 4-byte account trailer
    pub const FOOTER_LEN: usize = 20;
}

/// Generation-14 layout constants
pub mod gen14 {
    /// Bytes before the ciphertext
    pub const HEADER_LEN: usize = 191;
    /// Backup signature / salt position
    pub const SIGNATURE: std::ops::Range<usize> = 15..47;
    /// IV position
    pub const IV: std::ops::Range<usize> = 67..83;
    /// Trailing tag only
    pub const FOOTER_LEN: usize = 16;
}

/// Generation-15 layout constants
pub mod gen15 {
    /// Magic at the start of the header block
    pub const MAGIC: &[u8; 6] = b"crypt\x0f";
    /// Header block starts after the length and kind bytes
    pub const BLOCK_START: usize = 2;
    /// Magic plus base IV
    pub const MIN_BLOCK_LEN: usize = 22;
    /// Base IV position (absolute)
    pub const IV: std::ops::Range<usize> = 8..24;
    /// Frame prefix: u32 length + flags byte
    pub const FRAME_PREFIX_LEN: usize = 5;
    /// Frame payload is zlib-compressed
    pub const FLAG_COMPRESSED: u8 = 0x01;
    /// Last frame of the stream
    pub const FLAG_FINAL: u8 = 0x02;
    /// Largest frame payload accepted (64 MiB)
    pub const MAX_FRAME_LEN: u64 = 64 << 20;
}

/// Largest header any generation can have (gen15: 2 + 255)
const MAX_HEADER_PREFIX: usize = 2 + 255;

/// Encrypted container generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FormatGeneration {
    /// Single-tag container, raw key
    Crypt12,
    /// Single-tag container, HMAC-expanded key
    Crypt14,
    /// Framed container, key stream from an exported key
    Crypt15,
}

impl FormatGeneration {
    /// Generation hint from a file name suffix (`.crypt12` etc.)
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".crypt12") {
            Some(Self::Crypt12)
        } else if lower.ends_with(".crypt14") {
            Some(Self::Crypt14)
        } else if lower.ends_with(".crypt15") {
            Some(Self::Crypt15)
        } else {
            None
        }
    }

    /// Numeric generation
    pub fn number(&self) -> u8 {
        match self {
            Self::Crypt12 => 12,
            Self::Crypt14 => 14,
            Self::Crypt15 => 15,
        }
    }
}

impl std::fmt::Display for FormatGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "crypt{}", self.number())
    }
}

/// Which database a generation-15 container holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatabaseKind {
    /// Message store
    Messages,
    /// Contacts
    Contacts,
    /// Any other kind byte
    Other(u8),
}

impl From<u8> for DatabaseKind {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => Self::Messages,
            0x02 => Self::Contacts,
            other => Self::Other(other),
        }
    }
}

/// Parsed container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Detected generation
    pub generation: FormatGeneration,
    /// IV (gen 12/14) or base IV (gen 15)
    pub iv: [u8; IV_SIZE],
    /// Backup signature; doubles as the salt for gen 14
    pub signature: Option<[u8; SIGNATURE_SIZE]>,
    /// Database kind (gen 15), `Messages` otherwise
    pub database: DatabaseKind,
    /// First ciphertext (gen 12/14) or frame (gen 15) byte
    pub body_start: u64,
    /// End of ciphertext (gen 12/14) or of the file (gen 15)
    pub body_end: u64,
}

impl ContainerHeader {
    /// Parse the header of a container of known generation
    ///
    /// `head` holds the leading bytes of the container, `len` its full size.
    pub fn parse(generation: FormatGeneration, head: &[u8], len: u64) -> Result<Self> {
        match generation {
            FormatGeneration::Crypt12 => {
                Self::parse_single_tag(generation, head, len, gen12::HEADER_LEN, gen12::SIGNATURE, gen12::IV, gen12::FOOTER_LEN)
            }
            FormatGeneration::Crypt14 => {
                Self::parse_single_tag(generation, head, len, gen14::HEADER_LEN, gen14::SIGNATURE, gen14::IV, gen14::FOOTER_LEN)
            }
            FormatGeneration::Crypt15 => Self::parse_framed(head, len),
        }
    }

    fn parse_single_tag(
        generation: FormatGeneration,
        head: &[u8],
        len: u64,
        header_len: usize,
        signature: std::ops::Range<usize>,
        iv: std::ops::Range<usize>,
        footer_len: usize,
    ) -> Result<Self> {
        if head.len() < header_len || len < (header_len + footer_len) as u64 {
            return Err(Error::UnsupportedFormat(format!(
                "{} container is shorter than its {}-byte header and footer",
                generation,
                header_len + footer_len
            )));
        }

        let body_start = header_len as u64;
        let body_end = len - footer_len as u64;
        if body_end == body_start {
            return Err(Error::EmptyBackup);
        }

        Ok(Self {
            generation,
            iv: copy_array(&head[iv]),
            signature: Some(copy_array(&head[signature])),
            database: DatabaseKind::Messages,
            body_start,
            body_end,
        })
    }

    fn parse_framed(head: &[u8], len: u64) -> Result<Self> {
        if !is_framed_header(head) {
            return Err(Error::UnsupportedFormat(
                "crypt15 header block is missing or truncated".into(),
            ));
        }
        let block_len = head[0] as usize;
        let body_start = (gen15::BLOCK_START + block_len) as u64;
        if len < body_start {
            return Err(Error::UnsupportedFormat("crypt15 header block is truncated".into()));
        }

        Ok(Self {
            generation: FormatGeneration::Crypt15,
            iv: copy_array(&head[gen15::IV]),
            signature: None,
            database: DatabaseKind::from(head[1]),
            body_start,
            body_end: len,
        })
    }

    /// Length of the ciphertext region (gen 12/14) or frame region (gen 15)
    pub fn body_len(&self) -> u64 {
        self.body_end - self.body_start
    }
}

/// Whether `head` starts with a complete generation-15 header block
fn is_framed_header(head: &[u8]) -> bool {
    if head.len() < gen15::BLOCK_START + gen15::MIN_BLOCK_LEN {
        return false;
    }
    let block_len = head[0] as usize;
    block_len >= gen15::MIN_BLOCK_LEN
        && head.len() >= gen15::BLOCK_START + block_len
        && &head[gen15::BLOCK_START..gen15::BLOCK_START + gen15::MAGIC.len()] == gen15::MAGIC
}

/// Pick the container generation from its leading bytes and the key material
pub fn detect(
    head: &[u8],
    key: &KeyMaterial,
    hint: Option<FormatGeneration>,
) -> Result<FormatGeneration> {
    if let Some(generation) = hint {
        return Ok(generation);
    }

    if let KeyMaterial::KeyFile(key_file) = key {
        let signature = key_file.signature();
        if head.get(gen12::SIGNATURE) == Some(signature) {
            return Ok(FormatGeneration::Crypt12);
        }
        if head.get(gen14::SIGNATURE) == Some(signature) {
            return Ok(FormatGeneration::Crypt14);
        }
    }

    if is_framed_header(head) {
        return Ok(FormatGeneration::Crypt15);
    }

    Err(Error::UnsupportedFormat(
        "header matches neither the key signature nor the crypt15 magic".into(),
    ))
}

/// An encrypted container opened for one decode
///
/// Owns the ciphertext stream; owns no key material.
pub struct BackupContainer<R> {
    header: ContainerHeader,
    reader: R,
}

impl BackupContainer<File> {
    /// Open a container file and detect its generation
    ///
    /// A `.crypt12/14/15` suffix on the file name is used as the hint when
    /// `hint` is `None`.
    pub fn open(path: &Path, key: &KeyMaterial, hint: Option<FormatGeneration>) -> Result<Self> {
        let hint = hint.or_else(|| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(FormatGeneration::from_file_name)
        });
        let file = File::open(path)?;
        Self::from_reader(file, key, hint)
    }
}

impl<R: Read + Seek> BackupContainer<R> {
    /// Detect and parse the header of any seekable stream
    pub fn from_reader(mut reader: R, key: &KeyMaterial, hint: Option<FormatGeneration>) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut head = Vec::with_capacity(MAX_HEADER_PREFIX);
        (&mut reader)
            .take(MAX_HEADER_PREFIX as u64)
            .read_to_end(&mut head)?;

        let generation = detect(&head, key, hint)?;
        let header = ContainerHeader::parse(generation, &head, len)?;
        tracing::debug!(
            generation = %header.generation,
            body_len = header.body_len(),
            iv = %RedactedBytes(&header.iv),
            "Parsed container header"
        );

        Ok(Self { header, reader })
    }

    /// Parsed header
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Detected generation
    pub fn generation(&self) -> FormatGeneration {
        self.header.generation
    }

    pub(crate) fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

fn copy_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}
