//! Test fixtures: key material, encrypted containers, property lists and
//! small message databases for both platforms.
//!
//! Everything is built in code so tests never depend on files checked into
//! the repository. Containers are produced with the same primitives the
//! decryptor uses, but the layout is assembled byte by byte here.

use std::path::Path;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{Aes256Gcm, AesGcm};
use hmac::{Hmac, Mac};
use rusqlite::{params, Connection};
use sha2::Sha256;

use crate::config::AppVariant;
use crate::crypto::{frame_aad, frame_nonce, BACKUP_ENCRYPTION_INFO, SQLITE_MAGIC};
use crate::manifest::{identifiers, INFO_PLIST, MANIFEST_DB, MANIFEST_PLIST};

type Aes256Gcm16 = AesGcm<Aes256, U16>;
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// KEY MATERIAL
// ============================================================================

/// Backup signature stored in the key file and repeated in crypt12/14 headers
pub const SIGNATURE: [u8; 32] = [
    0x3d, 0x91, 0x07, 0xc2, 0x5a, 0xe8, 0x14, 0x6f, 0xb0, 0x29, 0x83, 0xd4, 0x71, 0x0e, 0x9a, 0x45,
    0xcc, 0x18, 0x62, 0xf7, 0x3b, 0xa6, 0x5d, 0x09, 0x94, 0xe1, 0x2f, 0x78, 0xbd, 0x50, 0x86, 0x1c,
];

/// AES key at the end of the key file (crypt12 uses it directly)
pub const RAW_AES_KEY: [u8; 32] = [
    0x8e, 0x42, 0xd7, 0x19, 0x6b, 0xf0, 0x25, 0xa3, 0x5c, 0x97, 0x0a, 0xe6, 0x31, 0xbf, 0x74, 0x08,
    0xd2, 0x4d, 0x96, 0x1f, 0xa8, 0x63, 0x3e, 0xc5, 0x7a, 0x01, 0xeb, 0x56, 0x9c, 0x2b, 0xf4, 0x87,
];

/// 32-byte root key of a crypt15 backup
pub const KEY_STREAM: [u8; 32] = [
    0x5f, 0x0c, 0xa9, 0x36, 0xe2, 0x7b, 0x14, 0xd8, 0x41, 0x9e, 0x63, 0x2a, 0xf7, 0x80, 0x1d, 0xc4,
    0x6e, 0xb3, 0x08, 0x95, 0x2c, 0xd1, 0x7f, 0x4a, 0xe9, 0x12, 0xa5, 0x58, 0x03, 0xbe, 0x67, 0xf0,
];

/// Base IV in the crypt15 header block
pub const BASE_IV: [u8; 16] = [
    0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x07, 0x18, 0x29, 0x3a, 0x4b, 0x5c, 0x6d, 0x7e, 0x8f, 0x90,
];

const CRYPT12_IV: [u8; 16] = [
    0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x01,
];

const CRYPT14_IV: [u8; 16] = [
    0x0f, 0x1e, 0x2d, 0x3c, 0x4b, 0x5a, 0x69, 0x78, 0x87, 0x96, 0xa5, 0xb4, 0xc3, 0xd2, 0xe1, 0xf0,
];

/// Size of the crypt15 header block
const CRYPT15_BLOCK_LEN: usize = 48;

/// Bytes before the first crypt15 frame
pub const CRYPT15_HEADER_LEN: usize = 2 + CRYPT15_BLOCK_LEN;

/// A 158-byte key file: signature at `[30..62]`, AES key at `[126..158]`
pub fn key_file_bytes() -> Vec<u8> {
    let mut raw = vec![0u8; 158];
    // Leading bytes must not look like a serialized object stream.
    for (i, byte) in raw.iter_mut().enumerate().take(30) {
        *byte = (i as u8).wrapping_mul(13).wrapping_add(1);
    }
    raw[30..62].copy_from_slice(&SIGNATURE);
    for (i, byte) in raw[62..126].iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(29) ^ 0x5a;
    }
    raw[126..158].copy_from_slice(&RAW_AES_KEY);
    raw
}

/// `key_stream` wrapped as a serialized Java `byte[]`
pub fn serialized_key_stream(key_stream: &[u8; 32]) -> Vec<u8> {
    let mut blob = vec![0xAC, 0xED, 0x00, 0x05, 0x75, 0x72, 0x00, 0x02, b'[', b'B'];
    blob.extend_from_slice(&[0xAC, 0xF3, 0x17, 0xF8, 0x06, 0x08, 0x54, 0xE0]);
    blob.extend_from_slice(&[0x02, 0x00, 0x00, 0x78, 0x70]);
    blob.extend_from_slice(&32i32.to_be_bytes());
    blob.extend_from_slice(key_stream);
    blob
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).unwrap();
    mac.update(message);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Expected crypt15 AES key for [`KEY_STREAM`]
pub fn crypt15_aes_key() -> [u8; 32] {
    let intermediate = hmac_sha256(&[0u8; 32], &KEY_STREAM);
    hmac_sha256(&intermediate, BACKUP_ENCRYPTION_INFO)
}

fn crypt14_aes_key() -> [u8; 32] {
    let intermediate = hmac_sha256(&key_file_bytes(), &SIGNATURE);
    hmac_sha256(&intermediate, BACKUP_ENCRYPTION_INFO)
}

// ============================================================================
// CONTAINERS
// ============================================================================

/// A small buffer that passes the SQLite magic check
pub fn sqlite_payload() -> Vec<u8> {
    let mut payload = SQLITE_MAGIC.to_vec();
    payload.extend((0..480u32).map(|i| (i.wrapping_mul(37) % 251) as u8));
    payload
}

fn seal_single_tag(key: &[u8; 32], iv: &[u8; 16], payload: &[u8]) -> (Vec<u8>, [u8; 16]) {
    let mut body = miniz_oxide::deflate::compress_to_vec_zlib(payload, 6);
    let cipher = Aes256Gcm16::new_from_slice(key).unwrap();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(iv), b"", &mut body)
        .unwrap();
    let mut raw_tag = [0u8; 16];
    raw_tag.copy_from_slice(&tag);
    (body, raw_tag)
}

/// Generation-12 container: 67-byte header, body, tag, 4-byte trailer
pub fn crypt12_container(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00, 0x01, 0x01];
    out.extend_from_slice(&SIGNATURE);
    out.extend((0..16u8).map(|i| 0xC0 | i));
    out.extend_from_slice(&CRYPT12_IV);
    assert_eq!(out.len(), 67);

    let (body, tag) = seal_single_tag(&RAW_AES_KEY, &CRYPT12_IV, payload);
    out.extend_from_slice(&body);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&[0x34, 0x39, 0x31, 0x35]);
    out
}

/// Generation-14 container: 191-byte header, body, tag
pub fn crypt14_container(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 191];
    out[..15].copy_from_slice(&[0x00, 0x01, 0x02, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15]);
    out[15..47].copy_from_slice(&SIGNATURE);
    out[67..83].copy_from_slice(&CRYPT14_IV);
    for (i, byte) in out[83..191].iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(7);
    }

    let (body, tag) = seal_single_tag(&crypt14_aes_key(), &CRYPT14_IV, payload);
    out.extend_from_slice(&body);
    out.extend_from_slice(&tag);
    out
}

/// Generation-15 container splitting `payload` into `frame_size` frames
pub fn crypt15_container(payload: &[u8], frame_size: usize) -> Vec<u8> {
    crypt15_container_with(payload, frame_size, true)
}

/// Generation-15 container whose header marks it as a contacts database
pub fn crypt15_contacts_container(payload: &[u8], frame_size: usize) -> Vec<u8> {
    crypt15_build(payload, frame_size, true, 0x02)
}

/// Like [`crypt15_container`]; `final_flag` controls whether the last frame
/// is marked final. Even-numbered frames are compressed.
pub fn crypt15_container_with(payload: &[u8], frame_size: usize, final_flag: bool) -> Vec<u8> {
    crypt15_build(payload, frame_size, final_flag, 0x01)
}

fn crypt15_build(payload: &[u8], frame_size: usize, final_flag: bool, kind: u8) -> Vec<u8> {
    let mut out = vec![CRYPT15_BLOCK_LEN as u8, kind];
    out.extend_from_slice(b"crypt\x0f");
    out.extend_from_slice(&BASE_IV);
    out.extend((0..(CRYPT15_BLOCK_LEN - 6 - 16) as u8).map(|i| 0x40 + i));
    assert_eq!(out.len(), CRYPT15_HEADER_LEN);

    let cipher = Aes256Gcm::new_from_slice(&crypt15_aes_key()).unwrap();
    let chunks: Vec<&[u8]> = payload.chunks(frame_size.max(1)).collect();
    let last = chunks.len().saturating_sub(1);

    for (counter, chunk) in chunks.into_iter().enumerate() {
        let counter = counter as u32;
        let mut flags = 0u8;
        let mut frame = if counter % 2 == 0 {
            flags |= 0x01;
            miniz_oxide::deflate::compress_to_vec_zlib(chunk, 6)
        } else {
            chunk.to_vec()
        };
        if final_flag && counter as usize == last {
            flags |= 0x02;
        }

        let nonce = frame_nonce(&BASE_IV, counter);
        let tag = cipher
            .encrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                &frame_aad(counter, flags),
                &mut frame,
            )
            .unwrap();

        out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        out.push(flags);
        out.extend_from_slice(&frame);
        out.extend_from_slice(&tag);
    }
    out
}

// ============================================================================
// PROPERTY LISTS
// ============================================================================

/// Minimal binary plist writer
///
/// Objects are appended in call order; each call returns the object's index.
pub struct PlistBuilder {
    ref_size: usize,
    objects: Vec<Vec<u8>>,
}

impl PlistBuilder {
    /// Builder writing object references `ref_size` bytes wide
    pub fn new(ref_size: usize) -> Self {
        Self {
            ref_size,
            objects: Vec::new(),
        }
    }

    /// Append pre-encoded object bytes (marker included)
    pub fn raw(&mut self, bytes: Vec<u8>) -> usize {
        self.objects.push(bytes);
        self.objects.len() - 1
    }

    /// Data object
    pub fn data(&mut self, bytes: &[u8]) -> usize {
        let mut out = length_header(0x4, bytes.len());
        out.extend_from_slice(bytes);
        self.raw(out)
    }

    /// ASCII string object
    pub fn ascii(&mut self, text: &str) -> usize {
        let mut out = length_header(0x5, text.len());
        out.extend_from_slice(text.as_bytes());
        self.raw(out)
    }

    /// UTF-16 string object
    pub fn utf16(&mut self, text: &str) -> usize {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut out = length_header(0x6, units.len());
        for unit in units {
            out.extend_from_slice(&unit.to_be_bytes());
        }
        self.raw(out)
    }

    /// Integer object; negatives take eight bytes
    pub fn int(&mut self, value: i64) -> usize {
        self.raw(int_bytes(value))
    }

    /// Boolean object
    pub fn bool(&mut self, value: bool) -> usize {
        self.raw(vec![if value { 0x09 } else { 0x08 }])
    }

    /// Date object (seconds since 2001-01-01)
    pub fn date(&mut self, seconds: f64) -> usize {
        let mut out = vec![0x33];
        out.extend_from_slice(&seconds.to_be_bytes());
        self.raw(out)
    }

    /// UID object
    pub fn uid(&mut self, value: u64) -> usize {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take(7).take_while(|&&b| b == 0).count();
        let mut out = vec![0x80 | (8 - skip - 1) as u8];
        out.extend_from_slice(&bytes[skip..]);
        self.raw(out)
    }

    /// Array object
    pub fn array(&mut self, items: &[usize]) -> usize {
        let mut out = length_header(0xA, items.len());
        for &item in items {
            self.push_ref(&mut out, item);
        }
        self.raw(out)
    }

    /// Dictionary object
    pub fn dict(&mut self, entries: &[(usize, usize)]) -> usize {
        let mut out = length_header(0xD, entries.len());
        for &(key, _) in entries {
            self.push_ref(&mut out, key);
        }
        for &(_, value) in entries {
            self.push_ref(&mut out, value);
        }
        self.raw(out)
    }

    fn push_ref(&self, out: &mut Vec<u8>, index: usize) {
        let bytes = (index as u64).to_be_bytes();
        out.extend_from_slice(&bytes[8 - self.ref_size..]);
    }

    /// Serialize with `root` as the top object
    pub fn finish(self, root: usize) -> Vec<u8> {
        let mut out = b"bplist00".to_vec();
        let mut offsets = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            offsets.push(out.len() as u64);
            out.extend_from_slice(object);
        }

        let table_start = out.len() as u64;
        let largest = offsets.iter().copied().max().unwrap_or(0);
        let offset_size = (1..=8).find(|&n| n == 8 || largest < 1u64 << (8 * n)).unwrap();
        for offset in offsets {
            out.extend_from_slice(&offset.to_be_bytes()[8 - offset_size..]);
        }

        out.extend_from_slice(&[0u8; 6]);
        out.push(offset_size as u8);
        out.push(self.ref_size as u8);
        out.extend_from_slice(&(self.objects.len() as u64).to_be_bytes());
        out.extend_from_slice(&(root as u64).to_be_bytes());
        out.extend_from_slice(&table_start.to_be_bytes());
        out
    }
}

fn length_header(kind: u8, len: usize) -> Vec<u8> {
    if len < 15 {
        vec![(kind << 4) | len as u8]
    } else {
        let mut out = vec![(kind << 4) | 0x0F];
        out.extend(int_bytes(len as i64));
        out
    }
}

fn int_bytes(value: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    if value < 0 || value > u32::MAX as i64 {
        out.push(0x13);
        out.extend_from_slice(&value.to_be_bytes());
    } else if value > u16::MAX as i64 {
        out.push(0x12);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else if value > u8::MAX as i64 {
        out.push(0x11);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else {
        out.push(0x10);
        out.push(value as u8);
    }
    out
}

/// `NSKeyedArchiver` blob of an `MBFile` with size and timestamps
fn mbfile_archive(size: i64, mtime: i64) -> Vec<u8> {
    let mut b = PlistBuilder::new(1);
    let null = b.ascii("$null");
    let size_key = b.ascii("Size");
    let size = b.int(size);
    let mtime_key = b.ascii("LastModified");
    let mtime_value = b.int(mtime);
    let birth_key = b.ascii("Birth");
    let birth = b.int(mtime - 3600);
    let class_key = b.ascii("$class");
    let class_uid = b.uid(2);
    let file = b.dict(&[
        (size_key, size),
        (mtime_key, mtime_value),
        (birth_key, birth),
        (class_key, class_uid),
    ]);
    let classname_key = b.ascii("$classname");
    let classname = b.ascii("MBFile");
    let class = b.dict(&[(classname_key, classname)]);
    let objects = b.array(&[null, file, class]);

    let root_key = b.ascii("root");
    let root_uid = b.uid(1);
    let top = b.dict(&[(root_key, root_uid)]);
    let archiver_key = b.ascii("$archiver");
    let archiver = b.ascii("NSKeyedArchiver");
    let objects_key = b.ascii("$objects");
    let top_key = b.ascii("$top");
    let root = b.dict(&[(archiver_key, archiver), (objects_key, objects), (top_key, top)]);
    b.finish(root)
}

// ============================================================================
// ANDROID FIXTURES
// ============================================================================

/// One-to-one chat partner
pub const ALICE_JID: &str = "4915550100@s.whatsapp.net";
/// Group chat
pub const GROUP_JID: &str = "120363041234567890@g.us";
/// Subject of [`GROUP_JID`]
pub const GROUP_SUBJECT: &str = "Climbing Crew";
/// Group member who sends the photo
pub const MEMBER_JID: &str = "4915550200@s.whatsapp.net";
/// Recorded path of the photo; [`android_media`] creates it
pub const PHOTO_PATH: &str = "Media/WhatsApp Images/IMG-20240301-WA0001.jpg";
/// Recorded path of the voice note; never created
const VOICE_PATH: &str = "Media/WhatsApp Voice Notes/PTT-20240301-WA0002.opus";

/// One fixture message, stored identically by both Android layouts
#[derive(Debug, Clone, Copy)]
pub struct FixtureMessage {
    /// Primary key
    pub row_id: i64,
    /// Chat JID
    pub chat: &'static str,
    /// Sent by the owner
    pub from_me: bool,
    /// Message key
    pub key_id: &'static str,
    /// Group sender
    pub sender: Option<&'static str>,
    /// Raw status code
    pub status: i64,
    /// Unix milliseconds
    pub timestamp: i64,
    /// Raw type code
    pub message_type: i64,
    /// Body
    pub text: Option<&'static str>,
    /// (path, mime type)
    pub media: Option<(&'static str, &'static str)>,
    /// Key of the quoted message
    pub quotes: Option<&'static str>,
}

/// Messages written by [`android_modern_db`] and [`android_legacy_db`]
pub const FIXTURE_MESSAGES: &[FixtureMessage] = &[
    FixtureMessage {
        row_id: 1,
        chat: ALICE_JID,
        from_me: false,
        key_id: "K1",
        sender: None,
        status: 0,
        timestamp: 1_709_280_000_000,
        message_type: 0,
        text: Some("Are we still on for Saturday?"),
        media: None,
        quotes: None,
    },
    FixtureMessage {
        row_id: 2,
        chat: ALICE_JID,
        from_me: true,
        key_id: "K2",
        sender: None,
        status: 13,
        timestamp: 1_709_280_060_000,
        message_type: 0,
        text: Some("Yes, 9am at the gym"),
        media: None,
        quotes: Some("K1"),
    },
    FixtureMessage {
        row_id: 3,
        chat: GROUP_JID,
        from_me: false,
        key_id: "K3",
        sender: Some(MEMBER_JID),
        status: 0,
        timestamp: 1_709_281_000_000,
        message_type: 1,
        text: Some("Route beta"),
        media: Some((PHOTO_PATH, "image/jpeg")),
        quotes: None,
    },
    FixtureMessage {
        row_id: 4,
        chat: GROUP_JID,
        from_me: false,
        key_id: "K4",
        sender: Some(MEMBER_JID),
        status: 0,
        timestamp: 1_709_281_100_000,
        message_type: 99,
        text: None,
        media: None,
        quotes: None,
    },
    FixtureMessage {
        row_id: 5,
        chat: ALICE_JID,
        from_me: true,
        key_id: "K5",
        sender: None,
        status: 77,
        timestamp: 1_709_200_000_000,
        message_type: 0,
        text: Some("see you there"),
        media: None,
        quotes: None,
    },
    FixtureMessage {
        row_id: 6,
        chat: GROUP_JID,
        from_me: false,
        key_id: "K6",
        sender: None,
        status: 6,
        timestamp: 1_709_281_200_000,
        message_type: 0,
        text: None,
        media: None,
        quotes: None,
    },
    FixtureMessage {
        row_id: 7,
        chat: ALICE_JID,
        from_me: false,
        key_id: "K7",
        sender: None,
        status: 0,
        timestamp: 1_709_282_000_000,
        message_type: 2,
        text: None,
        media: Some((VOICE_PATH, "audio/ogg; codecs=opus")),
        quotes: None,
    },
];

fn write_media_table(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE message_media (message_row_id INTEGER PRIMARY KEY, chat_row_id INTEGER,
             file_path TEXT, file_size INTEGER, mime_type TEXT);",
    )
    .unwrap();
    for m in FIXTURE_MESSAGES {
        if let Some((path, mime)) = m.media {
            conn.execute(
                "INSERT INTO message_media (message_row_id, file_path, file_size, mime_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![m.row_id, path, 2048i64, mime],
            )
            .unwrap();
        }
    }
}

/// Message store with the normalized `message` / `chat` / `jid` layout
pub fn android_modern_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE jid (_id INTEGER PRIMARY KEY, user TEXT, server TEXT, raw_string TEXT);
         CREATE TABLE chat (_id INTEGER PRIMARY KEY, jid_row_id INTEGER UNIQUE, subject TEXT,
             archived INTEGER);
         CREATE TABLE message (_id INTEGER PRIMARY KEY, chat_row_id INTEGER, from_me INTEGER,
             key_id TEXT, sender_jid_row_id INTEGER, status INTEGER, timestamp INTEGER,
             received_timestamp INTEGER, message_type INTEGER, text_data TEXT);
         CREATE TABLE message_quoted (message_row_id INTEGER PRIMARY KEY, chat_row_id INTEGER,
             from_me INTEGER, key_id TEXT);",
    )
    .unwrap();

    let jids = [(1i64, ALICE_JID), (2, GROUP_JID), (3, MEMBER_JID)];
    for (id, jid) in jids {
        let (user, server) = jid.split_once('@').unwrap();
        conn.execute(
            "INSERT INTO jid (_id, user, server, raw_string) VALUES (?1, ?2, ?3, ?4)",
            params![id, user, server, jid],
        )
        .unwrap();
    }
    conn.execute("INSERT INTO chat (_id, jid_row_id, subject) VALUES (10, 1, NULL)", [])
        .unwrap();
    conn.execute(
        "INSERT INTO chat (_id, jid_row_id, subject) VALUES (11, 2, ?1)",
        params![GROUP_SUBJECT],
    )
    .unwrap();

    let jid_row = |jid: &str| jids.iter().find(|(_, j)| *j == jid).map(|(id, _)| *id);
    let chat_row = |jid: &str| if jid == GROUP_JID { 11i64 } else { 10 };

    for m in FIXTURE_MESSAGES {
        conn.execute(
            "INSERT INTO message (_id, chat_row_id, from_me, key_id, sender_jid_row_id, status,
                 timestamp, received_timestamp, message_type, text_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9)",
            params![
                m.row_id,
                chat_row(m.chat),
                m.from_me as i64,
                m.key_id,
                m.sender.and_then(jid_row),
                m.status,
                m.timestamp,
                m.message_type,
                m.text,
            ],
        )
        .unwrap();
        if let Some(quoted) = m.quotes {
            conn.execute(
                "INSERT INTO message_quoted (message_row_id, chat_row_id, from_me, key_id)
                 VALUES (?1, ?2, 0, ?3)",
                params![m.row_id, chat_row(m.chat), quoted],
            )
            .unwrap();
        }
    }
    write_media_table(&conn);
}

/// Message store with the single `messages` table layout
pub fn android_legacy_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE messages (_id INTEGER PRIMARY KEY AUTOINCREMENT, key_remote_jid TEXT NOT NULL,
             key_from_me INTEGER, key_id TEXT NOT NULL, status INTEGER, data TEXT,
             timestamp INTEGER, media_wa_type TEXT, remote_resource TEXT, quoted_row_id INTEGER);
         CREATE TABLE chat_list (_id INTEGER PRIMARY KEY AUTOINCREMENT, key_remote_jid TEXT UNIQUE,
             subject TEXT);
         CREATE TABLE messages_quotes (_id INTEGER PRIMARY KEY AUTOINCREMENT,
             key_remote_jid TEXT, key_from_me INTEGER, key_id TEXT);",
    )
    .unwrap();

    conn.execute(
        "INSERT INTO chat_list (key_remote_jid, subject) VALUES (?1, NULL)",
        params![ALICE_JID],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO chat_list (key_remote_jid, subject) VALUES (?1, ?2)",
        params![GROUP_JID, GROUP_SUBJECT],
    )
    .unwrap();

    for m in FIXTURE_MESSAGES {
        let quoted_row = match m.quotes {
            Some(key) => {
                conn.execute(
                    "INSERT INTO messages_quotes (key_remote_jid, key_from_me, key_id) VALUES (?1, 0, ?2)",
                    params![m.chat, key],
                )
                .unwrap();
                Some(conn.last_insert_rowid())
            }
            None => None,
        };
        conn.execute(
            "INSERT INTO messages (_id, key_remote_jid, key_from_me, key_id, status, data,
                 timestamp, media_wa_type, remote_resource, quoted_row_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                m.row_id,
                m.chat,
                m.from_me as i64,
                m.key_id,
                m.status,
                m.text,
                m.timestamp,
                // older builds stored the type as text
                m.message_type.to_string(),
                m.sender.unwrap_or(""),
                quoted_row,
            ],
        )
        .unwrap();
    }
    write_media_table(&conn);
}

/// Number of rows [`android_call_log`] writes
pub const FIXTURE_CALLS: usize = 3;

/// Add a `call_log` table to a message store built by [`android_modern_db`]
///
/// An answered incoming call from Alice, an unanswered outgoing video call
/// to her, and a missed group call without a call id.
pub fn android_call_log(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE call_log (_id INTEGER PRIMARY KEY, jid_row_id INTEGER, from_me INTEGER,
             call_id TEXT, transaction_id INTEGER, timestamp INTEGER, video_call INTEGER,
             duration INTEGER, call_result INTEGER, bytes_transferred INTEGER);
         INSERT INTO call_log VALUES (1, 1, 0, 'C1', 11, 1709283000000, 0, 65, 5, 120000);
         INSERT INTO call_log VALUES (2, 1, 1, 'C2', 12, 1709284000000, 1, 0, 2, 0);
         INSERT INTO call_log VALUES (3, 2, 0, NULL, 13, 1709285000000, 0, 0, 0, 0);",
    )
    .unwrap();
}

/// `wa.db` naming Alice and the group member
pub fn android_contacts_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE wa_contacts (_id INTEGER PRIMARY KEY, jid TEXT, display_name TEXT,
             wa_name TEXT, status TEXT);",
    )
    .unwrap();
    conn.execute(
        "INSERT INTO wa_contacts (jid, display_name, wa_name) VALUES (?1, 'Alice Liddell', NULL)",
        params![ALICE_JID],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO wa_contacts (jid, display_name, wa_name) VALUES (?1, NULL, 'Bob')",
        params![MEMBER_JID],
    )
    .unwrap();
}

/// Create the photo under `root/Media`; the voice note stays missing
pub fn android_media(root: &Path) {
    let photo = root.join(PHOTO_PATH);
    std::fs::create_dir_all(photo.parent().unwrap()).unwrap();
    std::fs::write(photo, [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F']).unwrap();
}

// ============================================================================
// IOS FIXTURES
// ============================================================================

/// Manifest identifier of the photo attachment
pub const IOS_PHOTO_ID: &str = "4f2d1c0b9a8e7f6d5c4b3a29180716f5e4d3c2b1";
/// Manifest path of the photo attachment
pub const IOS_PHOTO_MANIFEST_PATH: &str = "Message/Media/4915550100@s.whatsapp.net/a/b/photo-1.jpg";
/// Manifest entry whose metadata blob is garbage
pub const IOS_BROKEN_METADATA_ID: &str = "0123456789abcdef0123456789abcdef01234567";
/// Archived size of the message database entry
pub const MANIFEST_DB_SIZE: i64 = 81_920;
/// Archived modification time of the message database entry
pub const MANIFEST_MTIME: i64 = 1_709_290_000;
/// Device name in both property lists
pub const DEVICE_NAME: &str = "Test iPhone";

const IOS_PHOTO_PATH: &str = "Media/4915550100@s.whatsapp.net/a/b/photo-1.jpg";
const IOS_STICKER_PATH: &str = "Media/4915550100@s.whatsapp.net/c/d/sticker-1.webp";

/// `ChatStorage.sqlite` with one chat of three messages
///
/// The text message has no media, the photo and the sticker do.
pub fn ios_chat_storage_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE ZWACHATSESSION (Z_PK INTEGER PRIMARY KEY, Z_ENT INTEGER, ZCONTACTJID VARCHAR,
             ZPARTNERNAME VARCHAR, ZLASTMESSAGEDATE TIMESTAMP);
         CREATE TABLE ZWAMESSAGE (Z_PK INTEGER PRIMARY KEY, ZCHATSESSION INTEGER,
             ZISFROMME INTEGER, ZMESSAGEDATE TIMESTAMP, ZTEXT VARCHAR, ZMESSAGESTATUS INTEGER,
             ZMESSAGETYPE INTEGER, ZSTANZAID VARCHAR, ZGROUPMEMBER INTEGER, ZMEDIAITEM INTEGER);
         CREATE TABLE ZWAMEDIAITEM (Z_PK INTEGER PRIMARY KEY, ZMESSAGE INTEGER,
             ZMEDIALOCALPATH VARCHAR, ZFILESIZE INTEGER);
         CREATE TABLE ZWAGROUPMEMBER (Z_PK INTEGER PRIMARY KEY, ZCHATSESSION INTEGER,
             ZMEMBERJID VARCHAR, ZCONTACTNAME VARCHAR);",
    )
    .unwrap();

    conn.execute(
        "INSERT INTO ZWACHATSESSION (Z_PK, Z_ENT, ZCONTACTJID, ZPARTNERNAME, ZLASTMESSAGEDATE)
         VALUES (1, 4, ?1, 'Alice', 731000300.0)",
        params![ALICE_JID],
    )
    .unwrap();

    let messages: [(i64, i64, f64, Option<&str>, i64, i64, &str); 3] = [
        (1, 0, 731_000_000.25, Some("Lunch tomorrow?"), 6, 0, "I1"),
        (2, 1, 731_000_120.5, None, 3, 1, "I2"),
        (3, 0, 731_000_240.75, None, 6, 15, "I3"),
    ];
    for (pk, from_me, date, text, status, kind, stanza) in messages {
        conn.execute(
            "INSERT INTO ZWAMESSAGE (Z_PK, ZCHATSESSION, ZISFROMME, ZMESSAGEDATE, ZTEXT,
                 ZMESSAGESTATUS, ZMESSAGETYPE, ZSTANZAID, ZGROUPMEMBER)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
            params![pk, from_me, date, text, status, kind, stanza],
        )
        .unwrap();
    }
    for (pk, message, local_path) in [(1i64, 2i64, IOS_PHOTO_PATH), (2, 3, IOS_STICKER_PATH)] {
        conn.execute(
            "INSERT INTO ZWAMEDIAITEM (Z_PK, ZMESSAGE, ZMEDIALOCALPATH, ZFILESIZE) VALUES (?1, ?2, ?3, 4096)",
            params![pk, message, local_path],
        )
        .unwrap();
        conn.execute("UPDATE ZWAMESSAGE SET ZMEDIAITEM = ?1 WHERE Z_PK = ?2", params![pk, message])
            .unwrap();
    }
}

/// Messages of [`ios_message_only_db`]; the last two carry no chat JID
pub const IOS_MESSAGE_ONLY_ROWS: usize = 5;

/// Older `ChatStorage.sqlite` layout without chat sessions
///
/// Each message names its chat JID inline.
pub fn ios_message_only_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE ZWAMESSAGE (Z_PK INTEGER PRIMARY KEY, ZCONTACTJID VARCHAR,
             ZISFROMME INTEGER, ZMESSAGEDATE TIMESTAMP, ZTEXT VARCHAR, ZMESSAGESTATUS INTEGER,
             ZMESSAGETYPE INTEGER, ZSTANZAID VARCHAR);
         CREATE TABLE ZWAMEDIAITEM (Z_PK INTEGER PRIMARY KEY, ZMESSAGE INTEGER,
             ZMEDIALOCALPATH VARCHAR);",
    )
    .unwrap();

    let messages: [(i64, Option<&str>, i64, f64, Option<&str>, i64, &str); IOS_MESSAGE_ONLY_ROWS] = [
        (1, Some(ALICE_JID), 0, 731_000_000.0, Some("hi"), 6, "M1"),
        (2, Some(ALICE_JID), 1, 731_000_060.0, Some("hello"), 2, "M2"),
        (3, Some(GROUP_JID), 0, 731_000_120.0, None, 6, "M3"),
        (4, None, 0, 731_000_180.0, Some("lost"), 6, "M4"),
        (5, None, 0, 731_000_240.0, Some("lost too"), 6, "M5"),
    ];
    for (pk, jid, from_me, date, text, status, stanza) in messages {
        let kind = if pk == 3 { 1i64 } else { 0 };
        conn.execute(
            "INSERT INTO ZWAMESSAGE (Z_PK, ZCONTACTJID, ZISFROMME, ZMESSAGEDATE, ZTEXT,
                 ZMESSAGESTATUS, ZMESSAGETYPE, ZSTANZAID)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![pk, jid, from_me, date, text, status, kind, stanza],
        )
        .unwrap();
    }
    conn.execute(
        "INSERT INTO ZWAMEDIAITEM (Z_PK, ZMESSAGE, ZMEDIALOCALPATH) VALUES (1, 3, ?1)",
        params![IOS_PHOTO_PATH],
    )
    .unwrap();
}

/// `ContactsV2.sqlite` naming Alice by her bare number
pub fn ios_contacts_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE ZWAADDRESSBOOKCONTACT (Z_PK INTEGER PRIMARY KEY, ZWHATSAPPID VARCHAR,
             ZFULLNAME VARCHAR);
         INSERT INTO ZWAADDRESSBOOKCONTACT VALUES (1, '4915550100', 'Alice Contact');",
    )
    .unwrap();
}

/// `CallHistory.sqlite` with an answered incoming call and an unanswered
/// outgoing video call, both with Alice
pub fn ios_call_history_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE ZWACDCALLEVENT (Z_PK INTEGER PRIMARY KEY, ZCALLIDSTRING VARCHAR,
             ZGROUPCALLCREATORUSERJIDSTRING VARCHAR, ZGROUPJIDSTRING VARCHAR, ZDATE TIMESTAMP,
             ZOUTCOME INTEGER, ZBYTESRECEIVED INTEGER, ZBYTESSENT INTEGER, ZDURATION FLOAT,
             ZVIDEO INTEGER, ZINCOMING INTEGER);",
    )
    .unwrap();
    conn.execute(
        "INSERT INTO ZWACDCALLEVENT VALUES (1, 'IC1', ?1, NULL, 731000500.0, 0, 1000, 500, 30.5, 0, 1)",
        params![ALICE_JID],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO ZWACDCALLEVENT VALUES (2, 'IC2', ?1, NULL, 731000600.0, 1, NULL, NULL, 0.0, 1, 0)",
        params![ALICE_JID],
    )
    .unwrap();
}

fn content_path(root: &Path, file_id: &str) -> std::path::PathBuf {
    let dir = root.join(&file_id[..2]);
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(file_id)
}

/// An unencrypted-layout backup directory for the standard app
///
/// With `encrypted` set only `Manifest.plist` changes: it claims
/// `IsEncrypted = true`.
pub fn ios_backup(root: &Path, encrypted: bool) {
    std::fs::create_dir_all(root).unwrap();
    let ids = identifiers(AppVariant::Standard);

    ios_chat_storage_db(&content_path(root, ids.messages));
    std::fs::write(content_path(root, IOS_PHOTO_ID), [0xFF, 0xD8, 0xFF, 0xE1]).unwrap();

    let conn = Connection::open(root.join(MANIFEST_DB)).unwrap();
    conn.execute_batch(
        "CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT,
             flags INTEGER, file BLOB);
         CREATE TABLE Properties (key TEXT PRIMARY KEY, value BLOB);",
    )
    .unwrap();

    let rows: [(&str, &str, i64, Option<Vec<u8>>); 4] = [
        (
            ids.messages,
            "ChatStorage.sqlite",
            1,
            Some(mbfile_archive(MANIFEST_DB_SIZE, MANIFEST_MTIME)),
        ),
        ("a1b2c3d4e5f60718293a4b5c6d7e8f9012345678", "Message/Media", 2, None),
        (IOS_PHOTO_ID, IOS_PHOTO_MANIFEST_PATH, 1, Some(mbfile_archive(4, MANIFEST_MTIME))),
        (
            IOS_BROKEN_METADATA_ID,
            "Message/Media/broken.bin",
            1,
            Some(b"bplist00garbage".to_vec()),
        ),
    ];
    for (file_id, relative_path, flags, blob) in rows {
        conn.execute(
            "INSERT INTO Files (fileID, domain, relativePath, flags, file) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![file_id, ids.domain, relative_path, flags, blob],
        )
        .unwrap();
    }
    drop(conn);

    let mut b = PlistBuilder::new(1);
    let encrypted_key = b.ascii("IsEncrypted");
    let encrypted_value = b.bool(encrypted);
    let version_key = b.ascii("Version");
    let version = b.ascii("10.0");
    let name_key = b.ascii("DeviceName");
    let name = b.ascii(DEVICE_NAME);
    let product_key = b.ascii("ProductVersion");
    let product = b.ascii("17.4");
    let lockdown = b.dict(&[(name_key, name), (product_key, product)]);
    let lockdown_key = b.ascii("Lockdown");
    let manifest_root = b.dict(&[
        (encrypted_key, encrypted_value),
        (version_key, version),
        (lockdown_key, lockdown),
    ]);
    std::fs::write(root.join(MANIFEST_PLIST), b.finish(manifest_root)).unwrap();

    let mut b = PlistBuilder::new(1);
    let name_key = b.ascii("Device Name");
    let name = b.ascii(DEVICE_NAME);
    let product_key = b.ascii("Product Version");
    let product = b.ascii("17.4");
    let date_key = b.ascii("Last Backup Date");
    let date = b.date(731_001_000.0);
    let info_root = b.dict(&[(name_key, name), (product_key, product), (date_key, date)]);
    std::fs::write(root.join(INFO_PLIST), b.finish(info_root)).unwrap();
}
