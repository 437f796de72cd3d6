//! # Binary Property Lists
//!
//! A bounds-checked decoder for Apple's `bplist00` container, used for the iOS
//! backup's `Manifest.plist`, `Info.plist` and the per-file metadata blobs
//! inside `Manifest.db`.
//!
//! ## Container Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          BPLIST00 LAYOUT                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────┬─────────────────────┬──────────────┬──────────────────┐  │
//! │  │ bplist00 │ object table        │ offset table │ trailer (32 B)   │  │
//! │  │ (magic)  │ marker|payload ...  │ N × off_size │                  │  │
//! │  └──────────┴─────────────────────┴──────────────┴──────────────────┘  │
//! │                                                                         │
//! │  trailer: 6 unused | off_size:u8 | ref_size:u8 | count:u64 |           │
//! │           root:u64 | offset_table_start:u64        (all big-endian)    │
//! │                                                                         │
//! │  marker high nibble:                                                   │
//! │    0x0 null/bool/fill   0x1 int     0x2 real    0x3 date               │
//! │    0x4 data             0x5 ascii   0x6 utf16   0x8 uid                │
//! │    0xA array            0xC set     0xD dict                           │
//! │                                                                         │
//! │  low nibble 0xF on data/string/array/set/dict: an int object follows   │
//! │  with the real length                                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Object Arena
//!
//! Containers refer to children by index into the object table. Decoding
//! mirrors that: [`PlistDocument`] holds one lazily-filled cell per index,
//! arrays and dicts keep child *indices*, and nothing recurses. Shared
//! references decode once; reference cycles are harmless.
//!
//! Every offset, length and reference is bounds-checked. Any violation is
//! [`Error::CorruptPlist`]; the decoder never panics on input bytes.

use std::cell::Cell;

use once_cell::unsync::OnceCell;

use crate::error::{Error, Result};

/// Magic at the start of every binary plist
pub const MAGIC: &[u8; 8] = b"bplist00";

const TRAILER_LEN: usize = 32;

/// Whether `data` looks like a binary plist
pub fn is_binary_plist(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Whether `data` looks like an XML plist
pub fn is_xml_plist(data: &[u8]) -> bool {
    let trimmed = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| &data[start..])
        .unwrap_or(&[]);
    trimmed.starts_with(b"<?xml") || trimmed.starts_with(b"<plist")
}

/// One decoded object
///
/// Containers hold indices into the document's object table.
#[derive(Debug, Clone, PartialEq)]
pub enum PlistValue {
    /// `0x00` (and the `0x0F` fill byte)
    Null,
    /// `0x08` / `0x09`
    Bool(bool),
    /// Integer with its encoded width in bytes
    Int {
        /// Decoded value
        value: i128,
        /// Encoded width (1, 2, 4, 8 or 16)
        width: u8,
    },
    /// IEEE-754 real with its encoded width (4 or 8)
    Real {
        /// Decoded value
        value: f64,
        /// Encoded width
        width: u8,
    },
    /// Seconds since 2001-01-01T00:00:00Z
    Date(f64),
    /// Raw bytes
    Data(Vec<u8>),
    /// ASCII string
    AsciiString(String),
    /// UTF-16BE string
    Utf16String(String),
    /// Keyed-archiver object reference
    Uid(u64),
    /// Array (or set) of object indices
    Array(Vec<usize>),
    /// Key/value index pairs, in encoded order
    Dict(Vec<(usize, usize)>),
}

impl PlistValue {
    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            PlistValue::Null => "null",
            PlistValue::Bool(_) => "bool",
            PlistValue::Int { .. } => "int",
            PlistValue::Real { .. } => "real",
            PlistValue::Date(_) => "date",
            PlistValue::Data(_) => "data",
            PlistValue::AsciiString(_) => "ascii string",
            PlistValue::Utf16String(_) => "utf16 string",
            PlistValue::Uid(_) => "uid",
            PlistValue::Array(_) => "array",
            PlistValue::Dict(_) => "dict",
        }
    }

    /// String contents of either string kind
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::AsciiString(s) | PlistValue::Utf16String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value, if it fits in an `i64`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PlistValue::Int { value, .. } => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlistValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Parsed trailer fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Width of each offset-table entry
    pub offset_size: u8,
    /// Width of each object reference
    pub ref_size: u8,
    /// Number of objects
    pub object_count: usize,
    /// Index of the root object
    pub root: usize,
    /// Byte offset of the offset table
    pub offset_table_start: usize,
}

/// A parsed binary plist with a lazily decoded object table
pub struct PlistDocument {
    data: Vec<u8>,
    trailer: Trailer,
    offsets: Vec<usize>,
    objects: Vec<OnceCell<PlistValue>>,
    decodes: Cell<usize>,
}

impl std::fmt::Debug for PlistDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlistDocument")
            .field("bytes", &self.data.len())
            .field("trailer", &self.trailer)
            .finish()
    }
}

impl PlistDocument {
    /// Validate the trailer and offset table
    ///
    /// Objects are decoded on first access.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if !is_binary_plist(&data) {
            return Err(corrupt("missing bplist00 magic"));
        }
        if data.len() < MAGIC.len() + TRAILER_LEN {
            return Err(corrupt("too short for a trailer"));
        }

        let trailer_start = data.len() - TRAILER_LEN;
        let t = &data[trailer_start..];
        let offset_size = t[6];
        let ref_size = t[7];
        let object_count = be_u64(&t[8..16]);
        let root = be_u64(&t[16..24]);
        let offset_table_start = be_u64(&t[24..32]);

        if !(1..=8).contains(&offset_size) || !(1..=8).contains(&ref_size) {
            return Err(corrupt(format!(
                "invalid trailer widths (offset {}, ref {})",
                offset_size, ref_size
            )));
        }

        let object_count = to_usize(object_count, "object count")?;
        let root = to_usize(root, "root index")?;
        let offset_table_start = to_usize(offset_table_start, "offset table start")?;

        if object_count == 0 {
            return Err(corrupt("no objects"));
        }
        if root >= object_count {
            return Err(corrupt(format!("root index {} out of {} objects", root, object_count)));
        }
        let table_len = object_count
            .checked_mul(offset_size as usize)
            .ok_or_else(|| corrupt("offset table size overflows"))?;
        let table_end = offset_table_start
            .checked_add(table_len)
            .ok_or_else(|| corrupt("offset table end overflows"))?;
        if offset_table_start < MAGIC.len() || table_end > trailer_start {
            return Err(corrupt("offset table outside the buffer"));
        }

        let mut offsets = Vec::with_capacity(object_count);
        for entry in data[offset_table_start..table_end].chunks_exact(offset_size as usize) {
            let offset = to_usize(be_uint(entry), "object offset")?;
            if offset < MAGIC.len() || offset >= offset_table_start {
                return Err(corrupt(format!("object offset {} outside the object table", offset)));
            }
            offsets.push(offset);
        }

        let trailer = Trailer {
            offset_size,
            ref_size,
            object_count,
            root,
            offset_table_start,
        };

        let objects = (0..object_count).map(|_| OnceCell::new()).collect();
        Ok(Self {
            data,
            trailer,
            offsets,
            objects,
            decodes: Cell::new(0),
        })
    }

    /// Trailer fields
    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Number of objects in the table
    pub fn len(&self) -> usize {
        self.trailer.object_count
    }

    /// Always false: a parsed document has at least its root
    pub fn is_empty(&self) -> bool {
        self.trailer.object_count == 0
    }

    /// Index of the root object
    pub fn root_index(&self) -> usize {
        self.trailer.root
    }

    /// Decoded root object
    pub fn root(&self) -> Result<&PlistValue> {
        self.get(self.trailer.root)
    }

    /// Decoded object at `index`, decoding it on first access
    pub fn get(&self, index: usize) -> Result<&PlistValue> {
        let cell = self
            .objects
            .get(index)
            .ok_or_else(|| corrupt(format!("object index {} out of {}", index, self.len())))?;
        cell.get_or_try_init(|| self.decode(index))
    }

    /// How many objects have actually been decoded
    pub fn decode_count(&self) -> usize {
        self.decodes.get()
    }

    // ------------------------------------------------------------------------
    // Walkers
    // ------------------------------------------------------------------------

    /// Value index stored under `key` in the dict at `dict_index`
    pub fn dict_get(&self, dict_index: usize, key: &str) -> Result<Option<usize>> {
        let pairs = match self.get(dict_index)? {
            PlistValue::Dict(pairs) => pairs,
            other => {
                return Err(corrupt(format!("expected dict, found {}", other.type_name())))
            }
        };
        for &(k, v) in pairs {
            if self.get(k)?.as_str() == Some(key) {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// Value stored under `key` in the root dict
    pub fn root_get(&self, key: &str) -> Result<Option<&PlistValue>> {
        match self.dict_get(self.trailer.root, key)? {
            Some(index) => self.get(index).map(Some),
            None => Ok(None),
        }
    }

    /// String at `index`, if it is one
    pub fn string_at(&self, index: usize) -> Result<Option<&str>> {
        Ok(self.get(index)?.as_str())
    }

    /// Index of the archived root object of an `NSKeyedArchiver` document
    ///
    /// Follows `$top.root` (a UID) into `$objects`.
    pub fn keyed_archive_root(&self) -> Result<usize> {
        let top = self
            .dict_get(self.trailer.root, "$top")?
            .ok_or_else(|| corrupt("keyed archive has no $top"))?;
        let root_ref = self
            .dict_get(top, "root")?
            .ok_or_else(|| corrupt("keyed archive has no $top.root"))?;
        self.keyed_archive_resolve(root_ref)
    }

    /// Follow a UID at `index` into the `$objects` array
    ///
    /// Non-UID values resolve to themselves.
    pub fn keyed_archive_resolve(&self, index: usize) -> Result<usize> {
        let uid = match self.get(index)? {
            PlistValue::Uid(uid) => *uid,
            _ => return Ok(index),
        };
        let objects_index = self
            .dict_get(self.trailer.root, "$objects")?
            .ok_or_else(|| corrupt("keyed archive has no $objects"))?;
        let objects = match self.get(objects_index)? {
            PlistValue::Array(items) => items,
            other => {
                return Err(corrupt(format!("$objects is a {}", other.type_name())))
            }
        };
        let position = usize::try_from(uid).map_err(|_| corrupt("uid overflows"))?;
        objects
            .get(position)
            .copied()
            .ok_or_else(|| corrupt(format!("uid {} outside $objects ({})", uid, objects.len())))
    }

    // ------------------------------------------------------------------------
    // Object decoding
    // ------------------------------------------------------------------------

    fn decode(&self, index: usize) -> Result<PlistValue> {
        self.decodes.set(self.decodes.get() + 1);

        let offset = self.offsets[index];
        let marker = *self
            .data
            .get(offset)
            .ok_or_else(|| corrupt(format!("object {} offset past end", index)))?;
        let kind = marker >> 4;
        let info = marker & 0x0F;

        match kind {
            0x0 => match info {
                0x0 | 0xF => Ok(PlistValue::Null),
                0x8 => Ok(PlistValue::Bool(false)),
                0x9 => Ok(PlistValue::Bool(true)),
                _ => Err(corrupt(format!("unknown simple marker 0x{:02x}", marker))),
            },
            0x1 => {
                let (value, width) = self.read_int(offset)?;
                Ok(PlistValue::Int { value, width })
            }
            0x2 => {
                let width = match info {
                    2 => 4,
                    3 => 8,
                    _ => return Err(corrupt(format!("real width nibble {}", info))),
                };
                let bytes = self.slice(offset + 1, width)?;
                let value = if width == 4 {
                    f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
                } else {
                    f64::from_bits(be_u64(bytes))
                };
                Ok(PlistValue::Real { value, width: width as u8 })
            }
            0x3 => {
                if info != 0x3 {
                    return Err(corrupt(format!("date marker 0x{:02x}", marker)));
                }
                let bytes = self.slice(offset + 1, 8)?;
                Ok(PlistValue::Date(f64::from_bits(be_u64(bytes))))
            }
            0x4 => {
                let (len, start) = self.read_length(offset, info)?;
                Ok(PlistValue::Data(self.slice(start, len)?.to_vec()))
            }
            0x5 => {
                let (len, start) = self.read_length(offset, info)?;
                let bytes = self.slice(start, len)?;
                if !bytes.is_ascii() {
                    return Err(corrupt(format!("object {} is not ASCII", index)));
                }
                Ok(PlistValue::AsciiString(String::from_utf8_lossy(bytes).into_owned()))
            }
            0x6 => {
                let (chars, start) = self.read_length(offset, info)?;
                let byte_len = chars
                    .checked_mul(2)
                    .ok_or_else(|| corrupt("utf16 length overflows"))?;
                let bytes = self.slice(start, byte_len)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                let text = String::from_utf16(&units)
                    .map_err(|_| corrupt(format!("object {} is not valid UTF-16", index)))?;
                Ok(PlistValue::Utf16String(text))
            }
            0x8 => {
                let width = info as usize + 1;
                if width > 8 {
                    return Err(corrupt(format!("uid width {}", width)));
                }
                Ok(PlistValue::Uid(be_uint(self.slice(offset + 1, width)?)))
            }
            // Sets carry no ordering guarantee; they are exposed as arrays.
            0xA | 0xC => {
                let (count, start) = self.read_length(offset, info)?;
                Ok(PlistValue::Array(self.read_refs(start, count)?))
            }
            0xD => {
                let (count, start) = self.read_length(offset, info)?;
                let keys = self.read_refs(start, count)?;
                let values_start = start
                    .checked_add(count * self.trailer.ref_size as usize)
                    .ok_or_else(|| corrupt("dict values offset overflows"))?;
                let values = self.read_refs(values_start, count)?;
                Ok(PlistValue::Dict(keys.into_iter().zip(values).collect()))
            }
            _ => Err(corrupt(format!("unknown marker 0x{:02x} at object {}", marker, index))),
        }
    }

    /// Integer object at `offset`: (value, width)
    fn read_int(&self, offset: usize) -> Result<(i128, u8)> {
        let marker = *self
            .data
            .get(offset)
            .ok_or_else(|| corrupt("integer marker past end"))?;
        if marker >> 4 != 0x1 {
            return Err(corrupt(format!("expected int marker, found 0x{:02x}", marker)));
        }
        let width = match marker & 0x0F {
            0 => 1,
            1 => 2,
            2 => 4,
            3 => 8,
            4 => 16,
            other => return Err(corrupt(format!("int width nibble {}", other))),
        };
        let bytes = self.slice(offset + 1, width)?;
        let value = match width {
            // 1/2/4-byte integers are unsigned
            1 | 2 | 4 => be_uint(bytes) as i128,
            8 => be_u64(bytes) as i64 as i128,
            _ => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(bytes);
                i128::from_be_bytes(raw)
            }
        };
        Ok((value, width as u8))
    }

    /// Length for data/string/array/dict objects: (length, payload start)
    fn read_length(&self, offset: usize, info: u8) -> Result<(usize, usize)> {
        if info != 0x0F {
            return Ok((info as usize, offset + 1));
        }
        let (value, width) = self
            .read_int(offset + 1)
            .map_err(|e| corrupt(format!("truncated extended length: {}", e)))?;
        let len = usize::try_from(value)
            .map_err(|_| corrupt(format!("extended length {} out of range", value)))?;
        Ok((len, offset + 2 + width as usize))
    }

    /// `count` object references starting at `start`, each bounds-checked
    fn read_refs(&self, start: usize, count: usize) -> Result<Vec<usize>> {
        let ref_size = self.trailer.ref_size as usize;
        let total = count
            .checked_mul(ref_size)
            .ok_or_else(|| corrupt("reference list size overflows"))?;
        let bytes = self.slice(start, total)?;

        let mut refs = Vec::with_capacity(count);
        for chunk in bytes.chunks_exact(ref_size) {
            let reference = be_uint(chunk);
            if reference >= self.len() as u64 {
                return Err(corrupt(format!(
                    "reference {} out of {} objects",
                    reference,
                    self.len()
                )));
            }
            refs.push(reference as usize);
        }
        Ok(refs)
    }

    /// `len` bytes at `start`, which must end before the offset table
    fn slice(&self, start: usize, len: usize) -> Result<&[u8]> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| corrupt("object length overflows"))?;
        if end > self.trailer.offset_table_start {
            return Err(corrupt(format!("object at {} runs {} bytes past the end", start, len)));
        }
        Ok(&self.data[start..end])
    }
}

fn corrupt(detail: impl Into<String>) -> Error {
    Error::CorruptPlist(detail.into())
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(raw)
}

/// Big-endian unsigned integer of 1..=8 bytes
fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| corrupt(format!("{} {} does not fit in memory", what, value)))
}
