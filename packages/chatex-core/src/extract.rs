//! # Row Extraction
//!
//! Pulls raw message rows out of a resolved database without N+1 queries.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         EXTRACTION FLOW                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Preload (one query each, only if the feature is present)           │
//! │     jid / chat sessions ──► HashMap<row, jid>                          │
//! │     chat subjects       ──► HashMap<jid, name>                         │
//! │     media               ──► HashMap<message row, RawMedia>             │
//! │     quotes              ──► HashMap<row, key>                          │
//! │     group members       ──► HashMap<row, jid>                          │
//! │                                                                         │
//! │  2. One ordered pass over the message table                            │
//! │     each row joined against the maps in memory ──► RawMessageRow      │
//! │     cancel check per row, progress every ROW_PROGRESS_INTERVAL         │
//! │                                                                         │
//! │  3. Call history, when its descriptor matches: same pass ──► RawCallRow│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Columns behind a missing [`Feature`] are selected as `NULL`, so every
//! family produces the same row shape. Values are read leniently: a text
//! column holding a blob, or an integer column holding text, is coerced
//! rather than failing the whole source.

use std::collections::HashMap;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row};

use crate::error::{Error, Result};
use crate::model::Platform;
use crate::progress::{CancelToken, Progress, ProgressSink, Stage};
use crate::schema::{Feature, ResolvedSchema, SchemaFamily};

/// Rows between progress reports
pub const ROW_PROGRESS_INTERVAL: u64 = 500;

/// Chat JID some databases use for internal bookkeeping rows
const PLACEHOLDER_JID: &str = "-1";

/// Chat reference shared by rows that carry no chat of their own
///
/// Families keyed by an inline JID have no chat table to point into, so
/// every row missing its JID lands in one orphan chat.
pub const ORPHAN_CHAT_REF: i64 = 0;

/// Timestamp exactly as stored
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawTimestamp {
    /// Unix seconds or milliseconds (Android)
    Unix(i64),
    /// Seconds since 2001-01-01 (iOS)
    Apple(f64),
    /// Column was NULL or unreadable
    Missing,
}

/// Media columns for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMedia {
    /// Path as recorded
    pub path: String,
    /// MIME type, when recorded
    pub mime_type: Option<String>,
}

/// One message row with its lookups already joined
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessageRow {
    /// Primary key
    pub row_id: i64,
    /// Chat JID; `None` when the chat reference does not resolve
    pub chat_jid: Option<String>,
    /// Raw chat reference, used to key orphaned rows
    pub chat_ref: i64,
    /// Sent by the backup owner
    pub from_me: bool,
    /// Stored timestamp
    pub timestamp: RawTimestamp,
    /// Body text
    pub text: Option<String>,
    /// Raw status code
    pub status: Option<i64>,
    /// Raw message type code
    pub type_code: Option<i64>,
    /// App message key
    pub key_id: Option<String>,
    /// Group sender JID
    pub sender_jid: Option<String>,
    /// Key of the quoted message
    pub quoted_key: Option<String>,
    /// Attached media
    pub media: Option<RawMedia>,
}

/// One call-history row
#[derive(Debug, Clone, PartialEq)]
pub struct RawCallRow {
    /// Primary key
    pub row_id: i64,
    /// Other party (or group call creator)
    pub peer_jid: Option<String>,
    /// Group the call was placed in
    pub group_jid: Option<String>,
    /// Placed by the backup owner
    pub from_me: bool,
    /// Stored timestamp
    pub timestamp: RawTimestamp,
    /// Video rather than voice
    pub video: bool,
    /// Seconds connected
    pub duration: Option<i64>,
    /// Raw outcome code
    pub result: Option<i64>,
    /// Bytes sent plus received
    pub bytes: Option<i64>,
    /// App call identifier
    pub call_id: Option<String>,
}

/// Everything pulled from one message database
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Platform of the database
    pub platform: Platform,
    /// Matched schema family
    pub family: SchemaFamily,
    /// Message rows in primary-key order
    pub rows: Vec<RawMessageRow>,
    /// Chat subject / partner name by JID
    pub chat_names: HashMap<String, String>,
    /// Call-history rows, empty when the backup has none
    pub calls: Vec<RawCallRow>,
}

/// Per-pass cancellation and progress hooks
pub struct ExtractOptions<'a> {
    /// Polled once per row
    pub cancel: &'a CancelToken,
    /// Receives `Stage::Extract` events
    pub progress: &'a dyn ProgressSink,
}

/// Extract all message rows for a resolved schema
pub fn extract_messages(
    conn: &Connection,
    schema: &ResolvedSchema,
    opts: &ExtractOptions<'_>,
) -> Result<Extraction> {
    let family = schema.family();
    let (platform, chat_names, rows) = match family {
        SchemaFamily::AndroidModern => {
            let (names, rows) = android_modern(conn, schema, opts)?;
            (Platform::Android, names, rows)
        }
        SchemaFamily::AndroidLegacy => {
            let (names, rows) = android_legacy(conn, schema, opts)?;
            (Platform::Android, names, rows)
        }
        SchemaFamily::IosChatStorage => {
            let (names, rows) = ios_chat_storage(conn, schema, opts)?;
            (Platform::Ios, names, rows)
        }
        SchemaFamily::IosMessageOnly => (Platform::Ios, HashMap::new(), ios_message_only(conn, schema, opts)?),
        SchemaFamily::AndroidContacts
        | SchemaFamily::IosContacts
        | SchemaFamily::AndroidCalls
        | SchemaFamily::IosCalls => {
            return Err(Error::Internal(format!(
                "{} is not a message schema",
                schema.descriptor.name
            )))
        }
    };

    tracing::info!(
        descriptor = schema.descriptor.name,
        rows = rows.len(),
        chats_named = chat_names.len(),
        "Extracted message rows"
    );

    Ok(Extraction {
        platform,
        family,
        rows,
        chat_names,
        calls: Vec::new(),
    })
}

/// Extract call-history rows for a resolved call schema
pub fn extract_calls(
    conn: &Connection,
    schema: &ResolvedSchema,
    opts: &ExtractOptions<'_>,
) -> Result<Vec<RawCallRow>> {
    let calls = match schema.family() {
        SchemaFamily::AndroidCalls => android_calls(conn, schema, opts)?,
        SchemaFamily::IosCalls => ios_calls(conn, schema, opts)?,
        _ => {
            return Err(Error::Internal(format!(
                "{} is not a call schema",
                schema.descriptor.name
            )))
        }
    };

    tracing::info!(descriptor = schema.descriptor.name, calls = calls.len(), "Extracted call rows");
    Ok(calls)
}

/// Load a `jid → display name` map from a contacts database
pub fn extract_contacts(conn: &Connection, schema: &ResolvedSchema) -> Result<HashMap<String, String>> {
    let contacts = match schema.family() {
        SchemaFamily::AndroidContacts => {
            let alt = column_or_null(schema, Feature::AltNames, "wa_name");
            let sql = format!("SELECT jid, display_name, {} FROM wa_contacts", alt);
            preload(conn, &sql, "contacts", |row| {
                let jid = text_at(row, 0)?;
                let name = non_empty(text_at(row, 1)?).or(non_empty(text_at(row, 2)?));
                Ok(jid.zip(name))
            })?
        }
        SchemaFamily::IosContacts => preload(
            conn,
            "SELECT ZWHATSAPPID, ZFULLNAME FROM ZWAADDRESSBOOKCONTACT",
            "contacts",
            |row| {
                let jid = non_empty(text_at(row, 0)?).map(|id| {
                    if id.contains('@') {
                        id
                    } else {
                        format!("{}@s.whatsapp.net", id)
                    }
                });
                Ok(jid.zip(non_empty(text_at(row, 1)?)))
            },
        )?,
        _ => {
            return Err(Error::Internal(format!(
                "{} is not a contacts schema",
                schema.descriptor.name
            )))
        }
    };

    tracing::debug!(contacts = contacts.len(), "Loaded contact names");
    Ok(contacts)
}

// ============================================================================
// ANDROID
// ============================================================================

type Named = (HashMap<String, String>, Vec<RawMessageRow>);

fn android_modern(conn: &Connection, schema: &ResolvedSchema, opts: &ExtractOptions<'_>) -> Result<Named> {
    let jids: HashMap<i64, String> = preload(conn, "SELECT _id, raw_string FROM jid", "jids", |row| {
        Ok(int_at(row, 0)?.zip(text_at(row, 1)?))
    })?;

    let subject = column_or_null(schema, Feature::ChatNames, "subject");
    let chats: HashMap<i64, (i64, Option<String>)> = preload(
        conn,
        &format!("SELECT _id, jid_row_id, {} FROM chat", subject),
        "chats",
        |row| {
            let id = int_at(row, 0)?;
            let jid_row = int_at(row, 1)?;
            let name = non_empty(text_at(row, 2)?);
            Ok(id.zip(jid_row).map(|(id, jid_row)| (id, (jid_row, name))))
        },
    )?;

    let mut chat_jids = HashMap::with_capacity(chats.len());
    let mut chat_names = HashMap::new();
    for (chat_id, (jid_row, name)) in chats {
        if let Some(jid) = jids.get(&jid_row) {
            if let Some(name) = name {
                chat_names.insert(jid.clone(), name);
            }
            chat_jids.insert(chat_id, jid.clone());
        }
    }

    let media = preload_android_media(conn, schema)?;
    let quotes: HashMap<i64, String> = if schema.has(Feature::Quotes) {
        preload(conn, "SELECT message_row_id, key_id FROM message_quoted", "quotes", |row| {
            Ok(int_at(row, 0)?.zip(non_empty(text_at(row, 1)?)))
        })?
    } else {
        HashMap::new()
    };

    let sql = format!(
        "SELECT _id, chat_row_id, from_me, timestamp, text_data, {}, message_type, {}, {} \
         FROM message ORDER BY _id",
        column_or_null(schema, Feature::Status, "status"),
        column_or_null(schema, Feature::MessageKeys, "key_id"),
        column_or_null(schema, Feature::GroupSender, "sender_jid_row_id"),
    );

    let rows = iterate(conn, &sql, "message", opts, |row| {
        let Some(row_id) = int_at(row, 0)? else { return Ok(None) };
        let chat_ref = int_at(row, 1)?.unwrap_or_default();
        let chat_jid = chat_jids.get(&chat_ref).cloned();
        if chat_jid.as_deref() == Some(PLACEHOLDER_JID) {
            return Ok(None);
        }
        let sender_jid = int_at(row, 8)?.and_then(|r| jids.get(&r).cloned());

        Ok(Some(RawMessageRow {
            row_id,
            chat_jid,
            chat_ref,
            from_me: int_at(row, 2)?.unwrap_or_default() != 0,
            timestamp: int_at(row, 3)?.map_or(RawTimestamp::Missing, RawTimestamp::Unix),
            text: text_at(row, 4)?,
            status: int_at(row, 5)?,
            type_code: int_at(row, 6)?,
            key_id: non_empty(text_at(row, 7)?),
            sender_jid: non_empty(sender_jid),
            quoted_key: quotes.get(&row_id).cloned(),
            media: media.get(&row_id).cloned(),
        }))
    })?;

    Ok((chat_names, rows))
}

fn android_legacy(conn: &Connection, schema: &ResolvedSchema, opts: &ExtractOptions<'_>) -> Result<Named> {
    let chat_names: HashMap<String, String> = if schema.has(Feature::ChatNames) {
        preload(conn, "SELECT key_remote_jid, subject FROM chat_list", "chat names", |row| {
            Ok(text_at(row, 0)?.zip(non_empty(text_at(row, 1)?)))
        })?
    } else {
        HashMap::new()
    };

    let media = preload_android_media(conn, schema)?;
    let quotes: HashMap<i64, String> = if schema.has(Feature::Quotes) {
        preload(conn, "SELECT _id, key_id FROM messages_quotes", "quotes", |row| {
            Ok(int_at(row, 0)?.zip(non_empty(text_at(row, 1)?)))
        })?
    } else {
        HashMap::new()
    };

    let sql = format!(
        "SELECT _id, key_remote_jid, key_from_me, timestamp, data, {}, media_wa_type, {}, {}, {} \
         FROM messages ORDER BY _id",
        column_or_null(schema, Feature::Status, "status"),
        column_or_null(schema, Feature::MessageKeys, "key_id"),
        column_or_null(schema, Feature::GroupSender, "remote_resource"),
        column_or_null(schema, Feature::Quotes, "quoted_row_id"),
    );

    let rows = iterate(conn, &sql, "messages", opts, |row| {
        let Some(row_id) = int_at(row, 0)? else { return Ok(None) };
        let chat_jid = non_empty(text_at(row, 1)?);
        if chat_jid.as_deref() == Some(PLACEHOLDER_JID) {
            return Ok(None);
        }

        Ok(Some(RawMessageRow {
            row_id,
            chat_jid,
            chat_ref: ORPHAN_CHAT_REF,
            from_me: int_at(row, 2)?.unwrap_or_default() != 0,
            timestamp: int_at(row, 3)?.map_or(RawTimestamp::Missing, RawTimestamp::Unix),
            text: text_at(row, 4)?,
            status: int_at(row, 5)?,
            type_code: int_at(row, 6)?,
            key_id: non_empty(text_at(row, 7)?),
            sender_jid: non_empty(text_at(row, 8)?),
            quoted_key: int_at(row, 9)?.and_then(|q| quotes.get(&q).cloned()),
            media: media.get(&row_id).cloned(),
        }))
    })?;

    Ok((chat_names, rows))
}

fn preload_android_media(conn: &Connection, schema: &ResolvedSchema) -> Result<HashMap<i64, RawMedia>> {
    if !schema.has(Feature::Media) {
        return Ok(HashMap::new());
    }
    preload(
        conn,
        "SELECT message_row_id, file_path, mime_type FROM message_media",
        "media",
        |row| {
            let mime_type = non_empty(text_at(row, 2)?);
            let media = non_empty(text_at(row, 1)?).map(|path| RawMedia { path, mime_type });
            Ok(int_at(row, 0)?.zip(media))
        },
    )
}

// ============================================================================
// IOS
// ============================================================================

fn ios_chat_storage(conn: &Connection, schema: &ResolvedSchema, opts: &ExtractOptions<'_>) -> Result<Named> {
    let partner = column_or_null(schema, Feature::ChatNames, "ZPARTNERNAME");
    let sessions: HashMap<i64, (String, Option<String>)> = preload(
        conn,
        &format!("SELECT Z_PK, ZCONTACTJID, {} FROM ZWACHATSESSION", partner),
        "chat sessions",
        |row| {
            let key = int_at(row, 0)?;
            let jid = non_empty(text_at(row, 1)?);
            let name = non_empty(text_at(row, 2)?);
            Ok(key.zip(jid).map(|(k, j)| (k, (j, name))))
        },
    )?;

    let mut chat_jids = HashMap::with_capacity(sessions.len());
    let mut chat_names = HashMap::new();
    for (key, (jid, name)) in sessions {
        if let Some(name) = name {
            chat_names.insert(jid.clone(), name);
        }
        chat_jids.insert(key, jid);
    }

    let members: HashMap<i64, String> = if schema.has(Feature::GroupSender) {
        preload(conn, "SELECT Z_PK, ZMEMBERJID FROM ZWAGROUPMEMBER", "group members", |row| {
            Ok(int_at(row, 0)?.zip(non_empty(text_at(row, 1)?)))
        })?
    } else {
        HashMap::new()
    };
    let media = preload_ios_media(conn, schema)?;

    let sql = format!(
        "SELECT Z_PK, ZCHATSESSION, ZISFROMME, ZMESSAGEDATE, ZTEXT, {}, ZMESSAGETYPE, {}, {} \
         FROM ZWAMESSAGE ORDER BY Z_PK",
        column_or_null(schema, Feature::Status, "ZMESSAGESTATUS"),
        column_or_null(schema, Feature::MessageKeys, "ZSTANZAID"),
        column_or_null(schema, Feature::GroupSender, "ZGROUPMEMBER"),
    );

    let rows = iterate(conn, &sql, "ZWAMESSAGE", opts, |row| {
        let Some(row_id) = int_at(row, 0)? else { return Ok(None) };
        let chat_ref = int_at(row, 1)?.unwrap_or_default();

        Ok(Some(RawMessageRow {
            row_id,
            chat_jid: chat_jids.get(&chat_ref).cloned(),
            chat_ref,
            from_me: int_at(row, 2)?.unwrap_or_default() != 0,
            timestamp: real_at(row, 3)?.map_or(RawTimestamp::Missing, RawTimestamp::Apple),
            text: text_at(row, 4)?,
            status: int_at(row, 5)?,
            type_code: int_at(row, 6)?,
            key_id: non_empty(text_at(row, 7)?),
            sender_jid: int_at(row, 8)?.and_then(|m| members.get(&m).cloned()),
            quoted_key: None,
            media: media.get(&row_id).cloned(),
        }))
    })?;

    Ok((chat_names, rows))
}

fn ios_message_only(
    conn: &Connection,
    schema: &ResolvedSchema,
    opts: &ExtractOptions<'_>,
) -> Result<Vec<RawMessageRow>> {
    let media = preload_ios_media(conn, schema)?;
    let sql = format!(
        "SELECT Z_PK, ZCONTACTJID, ZISFROMME, ZMESSAGEDATE, ZTEXT, {}, ZMESSAGETYPE, {} \
         FROM ZWAMESSAGE ORDER BY Z_PK",
        column_or_null(schema, Feature::Status, "ZMESSAGESTATUS"),
        column_or_null(schema, Feature::MessageKeys, "ZSTANZAID"),
    );

    iterate(conn, &sql, "ZWAMESSAGE", opts, |row| {
        let Some(row_id) = int_at(row, 0)? else { return Ok(None) };

        Ok(Some(RawMessageRow {
            row_id,
            chat_jid: non_empty(text_at(row, 1)?),
            chat_ref: ORPHAN_CHAT_REF,
            from_me: int_at(row, 2)?.unwrap_or_default() != 0,
            timestamp: real_at(row, 3)?.map_or(RawTimestamp::Missing, RawTimestamp::Apple),
            text: text_at(row, 4)?,
            status: int_at(row, 5)?,
            type_code: int_at(row, 6)?,
            key_id: non_empty(text_at(row, 7)?),
            sender_jid: None,
            quoted_key: None,
            media: media.get(&row_id).cloned(),
        }))
    })
}

fn preload_ios_media(conn: &Connection, schema: &ResolvedSchema) -> Result<HashMap<i64, RawMedia>> {
    if !schema.has(Feature::Media) {
        return Ok(HashMap::new());
    }
    preload(conn, "SELECT ZMESSAGE, ZMEDIALOCALPATH FROM ZWAMEDIAITEM", "media", |row| {
        let media = non_empty(text_at(row, 1)?).map(|path| RawMedia {
            path,
            mime_type: None,
        });
        Ok(int_at(row, 0)?.zip(media))
    })
}

// ============================================================================
// CALLS
// ============================================================================

fn android_calls(
    conn: &Connection,
    schema: &ResolvedSchema,
    opts: &ExtractOptions<'_>,
) -> Result<Vec<RawCallRow>> {
    let jids: HashMap<i64, String> = preload(conn, "SELECT _id, raw_string FROM jid", "jids", |row| {
        Ok(int_at(row, 0)?.zip(non_empty(text_at(row, 1)?)))
    })?;

    let sql = format!(
        "SELECT _id, jid_row_id, from_me, timestamp, video_call, duration, call_result, {}, {} \
         FROM call_log ORDER BY _id",
        column_or_null(schema, Feature::TransferSize, "bytes_transferred"),
        column_or_null(schema, Feature::MessageKeys, "call_id"),
    );

    iterate(conn, &sql, "call_log", opts, |row| {
        let Some(row_id) = int_at(row, 0)? else { return Ok(None) };
        let peer_jid = int_at(row, 1)?.and_then(|r| jids.get(&r).cloned());
        let (peer_jid, group_jid) = match peer_jid {
            Some(jid) if jid.ends_with("@g.us") => (None, Some(jid)),
            other => (other, None),
        };

        Ok(Some(RawCallRow {
            row_id,
            peer_jid,
            group_jid,
            from_me: int_at(row, 2)?.unwrap_or_default() != 0,
            timestamp: int_at(row, 3)?.map_or(RawTimestamp::Missing, RawTimestamp::Unix),
            video: int_at(row, 4)?.unwrap_or_default() != 0,
            duration: int_at(row, 5)?,
            result: int_at(row, 6)?,
            bytes: int_at(row, 7)?,
            call_id: non_empty(text_at(row, 8)?),
        }))
    })
}

fn ios_calls(conn: &Connection, schema: &ResolvedSchema, opts: &ExtractOptions<'_>) -> Result<Vec<RawCallRow>> {
    let (creator, group) = if schema.has(Feature::CallParties) {
        ("ZGROUPCALLCREATORUSERJIDSTRING", "ZGROUPJIDSTRING")
    } else {
        ("NULL", "NULL")
    };
    let bytes = if schema.has(Feature::TransferSize) {
        "COALESCE(ZBYTESRECEIVED, 0) + COALESCE(ZBYTESSENT, 0)"
    } else {
        "NULL"
    };
    let sql = format!(
        "SELECT Z_PK, {}, {}, ZINCOMING, ZDATE, ZVIDEO, ZDURATION, ZOUTCOME, {}, {} \
         FROM ZWACDCALLEVENT ORDER BY Z_PK",
        creator,
        group,
        bytes,
        column_or_null(schema, Feature::MessageKeys, "ZCALLIDSTRING"),
    );

    iterate(conn, &sql, "ZWACDCALLEVENT", opts, |row| {
        let Some(row_id) = int_at(row, 0)? else { return Ok(None) };

        Ok(Some(RawCallRow {
            row_id,
            peer_jid: non_empty(text_at(row, 1)?),
            group_jid: non_empty(text_at(row, 2)?),
            from_me: int_at(row, 3)?.unwrap_or_default() == 0,
            timestamp: real_at(row, 4)?.map_or(RawTimestamp::Missing, RawTimestamp::Apple),
            video: int_at(row, 5)?.unwrap_or_default() != 0,
            duration: real_at(row, 6)?.map(|d| d as i64),
            result: int_at(row, 7)?,
            bytes: int_at(row, 8)?,
            call_id: non_empty(text_at(row, 9)?),
        }))
    })
}

// ============================================================================
// QUERY HELPERS
// ============================================================================

fn column_or_null(schema: &ResolvedSchema, feature: Feature, column: &'static str) -> &'static str {
    if schema.has(feature) {
        column
    } else {
        "NULL"
    }
}

/// Run a lookup query into a map; rows mapped to `None` are skipped
fn preload<K, V, F>(conn: &Connection, sql: &str, what: &str, mut map: F) -> Result<HashMap<K, V>>
where
    K: std::hash::Hash + Eq,
    F: FnMut(&Row<'_>) -> rusqlite::Result<Option<(K, V)>>,
{
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Database(format!("Failed to prepare {} query: {}", what, e)))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| Error::Database(format!("Failed to query {}: {}", what, e)))?;

    let mut out = HashMap::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| Error::Database(format!("Failed to read {}: {}", what, e)))?
    {
        if let Some((key, value)) =
            map(row).map_err(|e| Error::Database(format!("Failed to decode {}: {}", what, e)))?
        {
            out.insert(key, value);
        }
    }

    tracing::debug!(lookup = what, entries = out.len(), "Preloaded lookup");
    Ok(out)
}

/// Ordered pass over a row table with cancellation and progress
fn iterate<T, F>(
    conn: &Connection,
    sql: &str,
    table: &str,
    opts: &ExtractOptions<'_>,
    mut map: F,
) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<Option<T>>,
{
    let total = conn
        .query_row(&format!("SELECT count(*) FROM {}", table), [], |row| row.get::<_, i64>(0))
        .map_err(|e| Error::Database(format!("Failed to count {}: {}", table, e)))?;
    let total = u64::try_from(total).ok();

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Database(format!("Failed to prepare {} query: {}", table, e)))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| Error::Database(format!("Failed to query {}: {}", table, e)))?;

    let mut out = Vec::with_capacity(total.unwrap_or_default() as usize);
    let mut seen = 0u64;
    while let Some(row) = rows
        .next()
        .map_err(|e| Error::Database(format!("Failed to read {} row: {}", table, e)))?
    {
        opts.cancel.check()?;
        if let Some(raw) =
            map(row).map_err(|e| Error::Database(format!("Failed to decode {} row: {}", table, e)))?
        {
            out.push(raw);
        }
        seen += 1;
        if seen % ROW_PROGRESS_INTERVAL == 0 {
            opts.progress.report(Progress {
                stage: Stage::Extract,
                done: seen,
                total,
            });
        }
    }

    opts.progress.report(Progress {
        stage: Stage::Extract,
        done: seen,
        total,
    });
    Ok(out)
}

fn int_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<i64>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(v) => Some(v),
        ValueRef::Real(v) if v.is_finite() => Some(v as i64),
        ValueRef::Real(_) => None,
        ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(|s| s.trim().parse().ok()),
    })
}

fn real_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<f64>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(v) => Some(v as f64),
        ValueRef::Real(v) => Some(v),
        ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(|s| s.trim().parse().ok()),
    })
}

fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// TESTS
// ============================================================================
