//! # Key Material
//!
//! Parsing of the three accepted key forms.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ACCEPTED KEY FORMS                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  158-byte key file ──────────────► KeyFile                             │
//! │    [30..62]   backup signature (repeated in the container header)      │
//! │    [126..158] AES key                                                  │
//! │                                                                         │
//! │  64 hex characters ──────────────► KeyStream (32 bytes)                │
//! │                                                                         │
//! │  Serialized key wrapper ─────────► KeyStream (32 bytes)                │
//! │    AC ED 00 05                      stream magic + version             │
//! │    75                               TC_ARRAY                           │
//! │    72 00 02 "[B" <suid:8> 02        TC_CLASSDESC for byte[]            │
//! │    00 00 78 70                      no fields, end block, no super     │
//! │    <len:i32> <bytes>                array payload                      │
//! │                                                                         │
//! │  Bare 32 bytes ──────────────────► KeyStream                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Key files go with generations 12 and 14, key streams with generation 15.

use std::path::Path;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Size of the raw key file
pub const KEY_FILE_LEN: usize = 158;

/// Size of a generation-15 key stream
pub const KEY_STREAM_LEN: usize = 32;

const KEY_FILE_SIGNATURE: std::ops::Range<usize> = 30..62;
const KEY_FILE_AES_KEY: std::ops::Range<usize> = 126..158;

/// Java object-serialization constants used by the key wrapper
mod java {
    pub const STREAM_MAGIC: [u8; 2] = [0xAC, 0xED];
    pub const STREAM_VERSION: [u8; 2] = [0x00, 0x05];
    pub const TC_NULL: u8 = 0x70;
    pub const TC_REFERENCE: u8 = 0x71;
    pub const TC_CLASSDESC: u8 = 0x72;
    pub const TC_ARRAY: u8 = 0x75;
    pub const TC_ENDBLOCKDATA: u8 = 0x78;
    pub const SC_SERIALIZABLE: u8 = 0x02;
    pub const BYTE_ARRAY_CLASS: &[u8] = b"[B";
}

/// The 158-byte key file used by generations 12 and 14
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyFile {
    bytes: [u8; KEY_FILE_LEN],
}

impl KeyFile {
    /// The backup signature the container header repeats
    pub fn signature(&self) -> &[u8] {
        &self.bytes[KEY_FILE_SIGNATURE]
    }

    /// The embedded AES key
    pub fn aes_key(&self) -> &[u8] {
        &self.bytes[KEY_FILE_AES_KEY]
    }

    /// The whole blob (HMAC key for generation 14)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A 32-byte key stream used by generation 15
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyStream([u8; KEY_STREAM_LEN]);

impl KeyStream {
    /// Raw stream bytes
    pub fn as_bytes(&self) -> &[u8; KEY_STREAM_LEN] {
        &self.0
    }
}

/// Key material supplied by the user
pub enum KeyMaterial {
    /// Raw key file
    KeyFile(KeyFile),
    /// Key stream (hex, serialized wrapper, or bare bytes)
    KeyStream(KeyStream),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::KeyFile(_) => write!(f, "KeyMaterial::KeyFile([REDACTED])"),
            KeyMaterial::KeyStream(_) => write!(f, "KeyMaterial::KeyStream([REDACTED])"),
        }
    }
}

impl KeyMaterial {
    /// Interpret raw bytes read from a key file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() == KEY_FILE_LEN {
            let mut raw = [0u8; KEY_FILE_LEN];
            raw.copy_from_slice(bytes);
            return Ok(KeyMaterial::KeyFile(KeyFile { bytes: raw }));
        }

        if bytes.starts_with(&java::STREAM_MAGIC) {
            let payload = Zeroizing::new(parse_java_byte_array(bytes)?);
            return Self::stream_from_slice(&payload);
        }

        if bytes.len() == KEY_STREAM_LEN {
            return Self::stream_from_slice(bytes);
        }

        // A key file may also hold the hex form as text
        if let Ok(text) = std::str::from_utf8(bytes) {
            if looks_like_hex_key(text) {
                return Self::from_hex(text);
            }
        }

        Err(Error::MalformedKeyMaterial(format!(
            "{} bytes is not a key file, key stream or serialized key",
            bytes.len()
        )))
    }

    /// Parse a 64-character hex key (whitespace ignored)
    pub fn from_hex(text: &str) -> Result<Self> {
        let compact: Zeroizing<String> =
            Zeroizing::new(text.chars().filter(|c| !c.is_whitespace()).collect());
        if compact.len() != KEY_STREAM_LEN * 2 {
            return Err(Error::MalformedKeyMaterial(format!(
                "hex key must be {} characters, got {}",
                KEY_STREAM_LEN * 2,
                compact.len()
            )));
        }
        let decoded = Zeroizing::new(
            hex::decode(compact.as_str())
                .map_err(|e| Error::MalformedKeyMaterial(format!("invalid hex key: {}", e)))?,
        );
        Self::stream_from_slice(&decoded)
    }

    /// Read key material from a path
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = Zeroizing::new(std::fs::read(path)?);
        Self::from_bytes(&bytes)
    }

    /// Accept either a hex key or a path to a key file
    pub fn parse(input: &str) -> Result<Self> {
        if looks_like_hex_key(input) {
            Self::from_hex(input)
        } else {
            Self::from_path(Path::new(input))
        }
    }

    fn stream_from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_STREAM_LEN {
            return Err(Error::MalformedKeyMaterial(format!(
                "key stream must be {} bytes, got {}",
                KEY_STREAM_LEN,
                bytes.len()
            )));
        }
        let mut raw = [0u8; KEY_STREAM_LEN];
        raw.copy_from_slice(bytes);
        Ok(KeyMaterial::KeyStream(KeyStream(raw)))
    }
}

fn looks_like_hex_key(text: &str) -> bool {
    let mut count = 0;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        if !c.is_ascii_hexdigit() {
            return false;
        }
        count += 1;
    }
    count == KEY_STREAM_LEN * 2
}

// ============================================================================
// SERIALIZED KEY WRAPPER
// ============================================================================

struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::MalformedKeyMaterial(format!("serialized key truncated reading {}", what))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        let b = self.take(4, what)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn expect(&mut self, byte: u8, what: &str) -> Result<()> {
        let found = self.u8(what)?;
        if found != byte {
            return Err(Error::MalformedKeyMaterial(format!(
                "serialized key: expected {} (0x{:02x}), found 0x{:02x}",
                what, byte, found
            )));
        }
        Ok(())
    }
}

/// Decode a Java-serialized `byte[]` and return its contents
fn parse_java_byte_array(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut cur = ByteCursor { data: bytes, pos: 0 };

    if cur.take(2, "stream magic")? != java::STREAM_MAGIC {
        return Err(Error::MalformedKeyMaterial("not a serialized object stream".into()));
    }
    if cur.take(2, "stream version")? != java::STREAM_VERSION {
        return Err(Error::MalformedKeyMaterial("unsupported serialization version".into()));
    }

    cur.expect(java::TC_ARRAY, "TC_ARRAY")?;

    match cur.u8("class descriptor")? {
        java::TC_CLASSDESC => {}
        java::TC_REFERENCE => {
            return Err(Error::MalformedKeyMaterial(
                "serialized key uses a class back-reference".into(),
            ))
        }
        other => {
            return Err(Error::MalformedKeyMaterial(format!(
                "serialized key: unexpected class descriptor tag 0x{:02x}",
                other
            )))
        }
    }

    let name_len = cur.u16("class name length")? as usize;
    if cur.take(name_len, "class name")? != java::BYTE_ARRAY_CLASS {
        return Err(Error::MalformedKeyMaterial("serialized key is not a byte[]".into()));
    }
    cur.take(8, "serialVersionUID")?;
    let flags = cur.u8("class flags")?;
    if flags & java::SC_SERIALIZABLE == 0 {
        return Err(Error::MalformedKeyMaterial("serialized key class is not serializable".into()));
    }
    if cur.u16("field count")? != 0 {
        return Err(Error::MalformedKeyMaterial("byte[] descriptor declares fields".into()));
    }
    cur.expect(java::TC_ENDBLOCKDATA, "TC_ENDBLOCKDATA")?;
    cur.expect(java::TC_NULL, "TC_NULL superclass")?;

    let len = cur.i32("array length")?;
    let len = usize::try_from(len)
        .map_err(|_| Error::MalformedKeyMaterial("negative array length".into()))?;
    let payload = cur.take(len, "array payload")?.to_vec();

    if cur.pos != bytes.len() {
        return Err(Error::MalformedKeyMaterial(format!(
            "{} trailing bytes after serialized key",
            bytes.len() - cur.pos
        )));
    }

    Ok(payload)
}
