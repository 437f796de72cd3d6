//! # Schema Probing
//!
//! Matches a database's catalog against declarative descriptors instead of
//! trying queries and catching failures.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SCHEMA RESOLUTION                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  sqlite_master + pragma_table_info ──► Catalog { table → columns }     │
//! │                                              │                          │
//! │  candidates(platform, role) ─────────────────┤                          │
//! │    [AndroidModern, AndroidLegacy]            │ first descriptor whose   │
//! │    [IosChatStorage, IosMessageOnly]          │ required set is present  │
//! │    [AndroidCalls] / [IosCalls]               │                          │
//! │                                              ▼                          │
//! │                                  ResolvedSchema { family, features }   │
//! │                                              │                          │
//! │                         SchemaCache (once per database per session)    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Optional table groups (chat names, media, quotes, group senders, status)
//! are recorded as [`Feature`]s; extraction substitutes `NULL` for any
//! feature the database lacks.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OpenFlags};

use crate::error::{Error, Result};
use crate::model::Platform;

/// What a database is expected to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseRole {
    /// Chats and messages
    Messages,
    /// Address book names
    Contacts,
    /// Voice and video call history
    Calls,
}

/// Application-version family a descriptor describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaFamily {
    /// `message` / `chat` / `jid`
    AndroidModern,
    /// `messages` keyed by `key_remote_jid`
    AndroidLegacy,
    /// `ZWAMESSAGE` / `ZWACHATSESSION`
    IosChatStorage,
    /// `ZWAMESSAGE` carrying `ZCONTACTJID` directly
    IosMessageOnly,
    /// `wa_contacts`
    AndroidContacts,
    /// `ZWAADDRESSBOOKCONTACT`
    IosContacts,
    /// `call_log` inside the message database
    AndroidCalls,
    /// `ZWACDCALLEVENT` in `CallHistory.sqlite`
    IosCalls,
}

/// Optional capability of a matched schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Chat subjects / partner names
    ChatNames,
    /// Media file paths
    Media,
    /// Quoted-message keys
    Quotes,
    /// Sender of incoming group messages
    GroupSender,
    /// Delivery status codes
    Status,
    /// App message keys
    MessageKeys,
    /// Secondary display name column (`wa_name`)
    AltNames,
    /// Bytes moved during a call
    TransferSize,
    /// Group call creator and group JID
    CallParties,
}

/// A table and the columns it must have
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Table name
    pub table: &'static str,
    /// Column names
    pub columns: &'static [&'static str],
}

const fn table(table: &'static str, columns: &'static [&'static str]) -> TableSpec {
    TableSpec { table, columns }
}

/// Expected layout of one application-version family
#[derive(Debug)]
pub struct SchemaDescriptor {
    /// Family tag
    pub family: SchemaFamily,
    /// Name for diagnostics
    pub name: &'static str,
    /// Must all be present for the descriptor to match
    pub required: &'static [TableSpec],
    /// Enabled per feature when every listed table/column is present
    pub optional: &'static [(Feature, &'static [TableSpec])],
}

// ============================================================================
// DESCRIPTORS
// ============================================================================

static ANDROID_MODERN: SchemaDescriptor = SchemaDescriptor {
    family: SchemaFamily::AndroidModern,
    name: "android-modern",
    required: &[
        table(
            "message",
            &["_id", "chat_row_id", "from_me", "timestamp", "text_data", "message_type"],
        ),
        table("chat", &["_id", "jid_row_id"]),
        table("jid", &["_id", "raw_string"]),
    ],
    optional: &[
        (Feature::ChatNames, &[table("chat", &["subject"])]),
        (Feature::Status, &[table("message", &["status"])]),
        (Feature::MessageKeys, &[table("message", &["key_id"])]),
        (Feature::GroupSender, &[table("message", &["sender_jid_row_id"])]),
        (
            Feature::Media,
            &[table("message_media", &["message_row_id", "file_path", "mime_type"])],
        ),
        (Feature::Quotes, &[table("message_quoted", &["message_row_id", "key_id"])]),
    ],
};

static ANDROID_LEGACY: SchemaDescriptor = SchemaDescriptor {
    family: SchemaFamily::AndroidLegacy,
    name: "android-legacy",
    required: &[table(
        "messages",
        &["_id", "key_remote_jid", "key_from_me", "timestamp", "data", "media_wa_type"],
    )],
    optional: &[
        (Feature::ChatNames, &[table("chat_list", &["key_remote_jid", "subject"])]),
        (Feature::Status, &[table("messages", &["status"])]),
        (Feature::MessageKeys, &[table("messages", &["key_id"])]),
        (Feature::GroupSender, &[table("messages", &["remote_resource"])]),
        (
            Feature::Media,
            &[table("message_media", &["message_row_id", "file_path", "mime_type"])],
        ),
        (
            Feature::Quotes,
            &[
                table("messages", &["quoted_row_id"]),
                table("messages_quotes", &["_id", "key_id"]),
            ],
        ),
    ],
};

static IOS_CHAT_STORAGE: SchemaDescriptor = SchemaDescriptor {
    family: SchemaFamily::IosChatStorage,
    name: "ios-chatstorage",
    required: &[
        table(
            "ZWAMESSAGE",
            &["Z_PK", "ZCHATSESSION", "ZISFROMME", "ZMESSAGEDATE", "ZTEXT", "ZMESSAGETYPE"],
        ),
        table("ZWACHATSESSION", &["Z_PK", "ZCONTACTJID"]),
    ],
    optional: &[
        (Feature::ChatNames, &[table("ZWACHATSESSION", &["ZPARTNERNAME"])]),
        (Feature::Status, &[table("ZWAMESSAGE", &["ZMESSAGESTATUS"])]),
        (Feature::MessageKeys, &[table("ZWAMESSAGE", &["ZSTANZAID"])]),
        (
            Feature::GroupSender,
            &[
                table("ZWAMESSAGE", &["ZGROUPMEMBER"]),
                table("ZWAGROUPMEMBER", &["Z_PK", "ZMEMBERJID"]),
            ],
        ),
        (Feature::Media, &[table("ZWAMEDIAITEM", &["ZMESSAGE", "ZMEDIALOCALPATH"])]),
    ],
};

static IOS_MESSAGE_ONLY: SchemaDescriptor = SchemaDescriptor {
    family: SchemaFamily::IosMessageOnly,
    name: "ios-message-only",
    required: &[table(
        "ZWAMESSAGE",
        &["Z_PK", "ZCONTACTJID", "ZISFROMME", "ZMESSAGEDATE", "ZTEXT", "ZMESSAGETYPE"],
    )],
    optional: &[
        (Feature::Status, &[table("ZWAMESSAGE", &["ZMESSAGESTATUS"])]),
        (Feature::MessageKeys, &[table("ZWAMESSAGE", &["ZSTANZAID"])]),
        (Feature::Media, &[table("ZWAMEDIAITEM", &["ZMESSAGE", "ZMEDIALOCALPATH"])]),
    ],
};

static ANDROID_CONTACTS: SchemaDescriptor = SchemaDescriptor {
    family: SchemaFamily::AndroidContacts,
    name: "android-contacts",
    required: &[table("wa_contacts", &["jid", "display_name"])],
    optional: &[(Feature::AltNames, &[table("wa_contacts", &["wa_name"])])],
};

static IOS_CONTACTS: SchemaDescriptor = SchemaDescriptor {
    family: SchemaFamily::IosContacts,
    name: "ios-contacts",
    required: &[table("ZWAADDRESSBOOKCONTACT", &["ZWHATSAPPID", "ZFULLNAME"])],
    optional: &[],
};

static ANDROID_CALLS: SchemaDescriptor = SchemaDescriptor {
    family: SchemaFamily::AndroidCalls,
    name: "android-calls",
    required: &[
        table(
            "call_log",
            &["_id", "jid_row_id", "from_me", "timestamp", "video_call", "duration", "call_result"],
        ),
        table("jid", &["_id", "raw_string"]),
    ],
    optional: &[
        (Feature::MessageKeys, &[table("call_log", &["call_id"])]),
        (Feature::TransferSize, &[table("call_log", &["bytes_transferred"])]),
    ],
};

static IOS_CALLS: SchemaDescriptor = SchemaDescriptor {
    family: SchemaFamily::IosCalls,
    name: "ios-calls",
    required: &[table(
        "ZWACDCALLEVENT",
        &["Z_PK", "ZDATE", "ZOUTCOME", "ZDURATION", "ZVIDEO", "ZINCOMING"],
    )],
    optional: &[
        (Feature::MessageKeys, &[table("ZWACDCALLEVENT", &["ZCALLIDSTRING"])]),
        (
            Feature::CallParties,
            &[table("ZWACDCALLEVENT", &["ZGROUPCALLCREATORUSERJIDSTRING", "ZGROUPJIDSTRING"])],
        ),
        (
            Feature::TransferSize,
            &[table("ZWACDCALLEVENT", &["ZBYTESRECEIVED", "ZBYTESSENT"])],
        ),
    ],
};

static ANDROID_MESSAGE_CANDIDATES: [&SchemaDescriptor; 2] = [&ANDROID_MODERN, &ANDROID_LEGACY];
static IOS_MESSAGE_CANDIDATES: [&SchemaDescriptor; 2] = [&IOS_CHAT_STORAGE, &IOS_MESSAGE_ONLY];
static ANDROID_CONTACT_CANDIDATES: [&SchemaDescriptor; 1] = [&ANDROID_CONTACTS];
static IOS_CONTACT_CANDIDATES: [&SchemaDescriptor; 1] = [&IOS_CONTACTS];
static ANDROID_CALL_CANDIDATES: [&SchemaDescriptor; 1] = [&ANDROID_CALLS];
static IOS_CALL_CANDIDATES: [&SchemaDescriptor; 1] = [&IOS_CALLS];

/// Ordered descriptor candidates for a platform and database role
pub fn candidates(platform: Platform, role: DatabaseRole) -> &'static [&'static SchemaDescriptor] {
    match (platform, role) {
        (Platform::Android, DatabaseRole::Messages) => &ANDROID_MESSAGE_CANDIDATES,
        (Platform::Ios, DatabaseRole::Messages) => &IOS_MESSAGE_CANDIDATES,
        (Platform::Android, DatabaseRole::Contacts) => &ANDROID_CONTACT_CANDIDATES,
        (Platform::Ios, DatabaseRole::Contacts) => &IOS_CONTACT_CANDIDATES,
        (Platform::Android, DatabaseRole::Calls) => &ANDROID_CALL_CANDIDATES,
        (Platform::Ios, DatabaseRole::Calls) => &IOS_CALL_CANDIDATES,
    }
}

// ============================================================================
// CATALOG
// ============================================================================

/// Open a plaintext SQLite file for reading
///
/// The file is checked up front so garbage surfaces as `NotADatabase`
/// rather than a generic SQLite error on the first query.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::Database(format!("Failed to open {}: {}", path.display(), e)))?;

    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .map_err(classify_open_error)?;

    Ok(conn)
}

fn classify_open_error(error: rusqlite::Error) -> Error {
    match error.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) => Error::NotADatabase,
        _ => Error::Database(format!("Failed to read catalog: {}", error)),
    }
}

/// Table and column names present in a database (case-insensitive)
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, HashSet<String>>,
}

impl Catalog {
    /// Introspect `sqlite_master` and `pragma_table_info`
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view')")
            .map_err(|e| Error::Database(format!("Failed to prepare catalog query: {}", e)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(classify_open_error)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| Error::Database(format!("Failed to read table name: {}", e)))?;

        let mut columns_stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1)")
            .map_err(|e| Error::Database(format!("Failed to prepare column query: {}", e)))?;

        let mut tables = HashMap::with_capacity(names.len());
        for name in names {
            let columns = columns_stmt
                .query_map([&name], |row| row.get::<_, String>(0))
                .map_err(|e| Error::Database(format!("Failed to list columns of {}: {}", name, e)))?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(|e| Error::Database(format!("Failed to read column of {}: {}", name, e)))?;
            tables.insert(
                name.to_ascii_lowercase(),
                columns.into_iter().map(|c| c.to_ascii_lowercase()).collect(),
            );
        }

        Ok(Self { tables })
    }

    /// Whether a table exists
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(&table.to_ascii_lowercase())
    }

    /// Whether a table exists and has a column
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(&table.to_ascii_lowercase())
            .map_or(false, |cols| cols.contains(&column.to_ascii_lowercase()))
    }

    /// `table.column` entries of `specs` absent from the catalog
    pub fn missing(&self, specs: &[TableSpec]) -> Vec<String> {
        let mut missing = Vec::new();
        for spec in specs {
            if !self.has_table(spec.table) {
                missing.push(spec.table.to_string());
                continue;
            }
            for column in spec.columns {
                if !self.has_column(spec.table, column) {
                    missing.push(format!("{}.{}", spec.table, column));
                }
            }
        }
        missing
    }

    /// Number of tables and views
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the database has no tables
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// The descriptor chosen for a database and the features it supports
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    /// Matched descriptor
    pub descriptor: &'static SchemaDescriptor,
    features: HashSet<Feature>,
}

impl ResolvedSchema {
    /// Family of the matched descriptor
    pub fn family(&self) -> SchemaFamily {
        self.descriptor.family
    }

    /// Whether an optional feature is available
    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// Pick the first candidate whose required tables/columns are all present
pub fn resolve(
    catalog: &Catalog,
    candidates: &'static [&'static SchemaDescriptor],
    database: &str,
) -> Result<ResolvedSchema> {
    let mut rejected = Vec::with_capacity(candidates.len());

    for descriptor in candidates {
        let missing = catalog.missing(descriptor.required);
        if !missing.is_empty() {
            tracing::debug!(
                database,
                descriptor = descriptor.name,
                missing = %missing.join(", "),
                "Descriptor rejected"
            );
            rejected.push(format!("{} (missing {})", descriptor.name, missing.join(", ")));
            continue;
        }

        let features = descriptor
            .optional
            .iter()
            .filter(|(_, specs)| catalog.missing(specs).is_empty())
            .map(|(feature, _)| *feature)
            .collect();

        tracing::debug!(database, descriptor = descriptor.name, "Schema matched");
        return Ok(ResolvedSchema { descriptor, features });
    }

    Err(Error::SchemaUnsupported {
        database: database.to_string(),
        detail: if rejected.is_empty() {
            "no candidate descriptors".to_string()
        } else {
            rejected.join("; ")
        },
    })
}

/// Per-session memo of schema resolutions, keyed by database identity
#[derive(Debug, Default)]
pub struct SchemaCache {
    resolved: Mutex<HashMap<String, Result<ResolvedSchema>>>,
    loads: AtomicUsize,
}

impl SchemaCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve once per key; later calls reuse the first answer
    ///
    /// A database no descriptor matched stays unmatched for the session.
    /// Catalog read failures are not remembered.
    pub fn resolve(
        &self,
        key: &str,
        conn: &Connection,
        candidates: &'static [&'static SchemaDescriptor],
    ) -> Result<ResolvedSchema> {
        if let Some(hit) = self.resolved.lock().get(key) {
            return hit.clone();
        }

        self.loads.fetch_add(1, Ordering::Relaxed);
        let catalog = Catalog::load(conn)?;
        let schema = resolve(&catalog, candidates, key);
        self.resolved.lock().insert(key.to_string(), schema.clone());
        schema
    }

    /// Number of catalogs read so far
    pub fn catalog_loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
