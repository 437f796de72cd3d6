//! # Canonical Data Model
//!
//! What every backup source is normalized into.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CANONICAL MODEL                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ChatCollection (append-only, insertion ordered)                       │
//! │  │                                                                      │
//! │  ├── Chat { id: JID, name }                                            │
//! │  │   ├── Message { id, timestamp, from_me, body, status, kind, ... }   │
//! │  │   │   ├── MediaRef { relative, path | missing }                     │
//! │  │   │   └── CallDetails (call-log entries only)                       │
//! │  │   └── ... (timestamp ascending, ties in source row order)           │
//! │  │                                                                      │
//! │  └── Chat ...                                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Status and type codes that are not in the lookup tables survive as
//! `Unknown(code)` and mark the message `is_supported = false`; the message
//! itself is always kept.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// Which app platform produced a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Android (`msgstore.db`)
    Android,
    /// iOS (`ChatStorage.sqlite`)
    Ios,
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Incoming message
    Received,
    /// Outgoing, not yet accepted by the server
    Pending,
    /// Outgoing, accepted by the server
    Sent,
    /// Delivered to the recipient's device
    Delivered,
    /// Read by the recipient
    Read,
    /// Voice note played by the recipient
    Played,
    /// Control/system entry rather than a user message
    System,
    /// Code outside the lookup table, kept verbatim
    Unknown(i64),
}

impl MessageStatus {
    /// Map a raw status code
    pub fn from_code(platform: Platform, code: i64) -> Self {
        match platform {
            Platform::Android => match code {
                0 => Self::Received,
                4 => Self::Pending,
                5 => Self::Sent,
                6 => Self::System,
                8 => Self::Played,
                9 => Self::Delivered,
                13 => Self::Read,
                other => Self::Unknown(other),
            },
            Platform::Ios => match code {
                0 => Self::Pending,
                1 => Self::Sent,
                2 => Self::Delivered,
                3 => Self::Read,
                4 => Self::Played,
                6 => Self::Received,
                other => Self::Unknown(other),
            },
        }
    }

    /// Whether the code was in the lookup table
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// Content kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text
    Text,
    /// Photo
    Image,
    /// Voice note or audio file
    Audio,
    /// Video
    Video,
    /// Shared contact card
    Contact,
    /// Shared location
    Location,
    /// Link preview
    Link,
    /// Document attachment
    Document,
    /// Animated GIF
    Gif,
    /// Sticker
    Sticker,
    /// Message deleted by its sender
    Deleted,
    /// Group event or other system entry
    System,
    /// Voice or video call from the call history
    Call,
    /// Code outside the lookup table, kept verbatim
    Unknown(i64),
}

impl MessageKind {
    /// Map a raw message type code
    pub fn from_code(platform: Platform, code: i64) -> Self {
        match platform {
            Platform::Android => match code {
                0 => Self::Text,
                1 => Self::Image,
                2 => Self::Audio,
                3 => Self::Video,
                4 => Self::Contact,
                5 => Self::Location,
                7 => Self::System,
                9 => Self::Document,
                13 => Self::Gif,
                15 => Self::Deleted,
                20 => Self::Sticker,
                other => Self::Unknown(other),
            },
            Platform::Ios => match code {
                0 => Self::Text,
                1 => Self::Image,
                2 => Self::Video,
                3 => Self::Audio,
                4 => Self::Contact,
                5 => Self::Location,
                6 => Self::System,
                7 => Self::Link,
                8 => Self::Document,
                11 => Self::Gif,
                14 => Self::Deleted,
                15 => Self::Sticker,
                other => Self::Unknown(other),
            },
        }
    }

    /// Whether the code was in the lookup table
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// Chat that collects a source's call history
pub const CALL_LOG_CHAT_ID: &str = "call-log";
/// Display name of [`CALL_LOG_CHAT_ID`]
pub const CALL_LOG_CHAT_NAME: &str = "Calls";

/// How a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Answered and connected
    Connected,
    /// Incoming call that was not picked up
    Missed,
    /// Outgoing call hung up before it connected
    Cancelled,
    /// Outgoing call nobody answered
    NotAnswered,
    /// Callee could not be reached
    Unavailable,
    /// Call setup failed
    Failed,
    /// Code outside the lookup table, kept verbatim
    Unknown(i64),
}

impl CallOutcome {
    /// Map a raw outcome code; direction matters for unanswered calls
    pub fn from_code(platform: Platform, code: i64, from_me: bool) -> Self {
        let unanswered = if from_me { Self::NotAnswered } else { Self::Missed };
        match platform {
            Platform::Android => match code {
                0 | 4 | 7 if from_me => Self::Cancelled,
                0 | 4 | 7 => Self::Missed,
                2 => unanswered,
                3 => Self::Unavailable,
                5 => Self::Connected,
                other => Self::Unknown(other),
            },
            Platform::Ios => match code {
                0 => Self::Connected,
                1 | 4 => unanswered,
                2 => Self::Failed,
                other => Self::Unknown(other),
            },
        }
    }

    /// Whether the code was in the lookup table
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// Call-history fields carried by [`MessageKind::Call`] messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallDetails {
    /// Other party, or the creator of a group call
    pub peer: Option<String>,
    /// Group the call was placed in
    pub group: Option<String>,
    /// Video rather than voice
    pub video: bool,
    /// How the call ended
    pub outcome: CallOutcome,
    /// Seconds connected
    pub duration_secs: Option<i64>,
    /// Bytes sent plus received
    pub bytes_transferred: Option<i64>,
}

/// Media attached to a message
///
/// Resolution never fails: a reference without a backing file is kept with
/// `missing = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    /// Path as recorded in the message database
    pub relative: String,
    /// Resolved on-disk path
    pub path: Option<PathBuf>,
    /// MIME type, when recorded
    pub mime_type: Option<String>,
    /// No backing file was found
    pub missing: bool,
}

impl MediaRef {
    /// A reference that resolved to a file
    pub fn found(relative: impl Into<String>, path: PathBuf, mime_type: Option<String>) -> Self {
        Self {
            relative: relative.into(),
            path: Some(path),
            mime_type,
            missing: false,
        }
    }

    /// A reference without a backing file
    pub fn missing(relative: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            relative: relative.into(),
            path: None,
            mime_type,
            missing: true,
        }
    }
}

/// One normalized message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// App message key, or `row:<id>` when the row has none
    pub id: String,
    /// Owning chat's JID
    pub chat_id: String,
    /// Send time in the configured offset
    pub timestamp: DateTime<FixedOffset>,
    /// Sent by the backup owner
    pub from_me: bool,
    /// Text or caption
    pub body: Option<String>,
    /// Attached media
    pub media_ref: Option<MediaRef>,
    /// Key of the quoted message; may not exist in the collection
    pub reply_to_id: Option<String>,
    /// Delivery status
    pub status: MessageStatus,
    /// Content kind
    pub kind: MessageKind,
    /// Both status and kind were recognized
    pub is_supported: bool,
    /// Sender JID for incoming group messages
    pub sender: Option<String>,
    /// Present on call-history entries
    pub call: Option<CallDetails>,
    /// Row id in the source database
    pub source_row: i64,
}

/// A conversation and its messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chat {
    /// Canonical chat key (JID)
    pub id: String,
    /// Subject, partner name or contact name
    pub name: Option<String>,
    messages: Vec<Message>,
}

impl Chat {
    /// Empty chat
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            messages: Vec::new(),
        }
    }

    /// Messages, timestamp ascending
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the chat has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Timestamp of the newest message
    pub fn last_activity(&self) -> Option<DateTime<FixedOffset>> {
        self.messages.last().map(|m| m.timestamp)
    }

    /// Whether this is a group chat
    pub fn is_group(&self) -> bool {
        self.id.ends_with("@g.us")
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Stable sort: equal timestamps keep their insertion (row) order
    pub(crate) fn sort_messages(&mut self) {
        self.messages.sort_by_key(|m| m.timestamp);
    }

    /// Merge another chat's messages into this one
    ///
    /// Every message is kept unless an identical copy (same id and content,
    /// source row aside) is already held; the ids of those collapsed copies
    /// are returned.
    fn absorb(&mut self, other: Chat) -> Vec<String> {
        if self.name.is_none() {
            self.name = other.name;
        }

        let mut held: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, message) in self.messages.iter().enumerate() {
            held.entry(message.id.clone()).or_default().push(position);
        }
        let original = self.messages.len();

        let mut collapsed = Vec::new();
        for message in other.messages {
            let duplicate = held.get(&message.id).map_or(false, |positions| {
                positions
                    .iter()
                    .any(|&p| p < original && self.messages[p].same_content(&message))
            });
            if duplicate {
                collapsed.push(message.id);
            } else {
                self.messages.push(message);
            }
        }

        self.sort_messages();
        collapsed
    }
}

impl Message {
    /// Equal in everything but the source row and where the media resolved
    pub fn same_content(&self, other: &Message) -> bool {
        let recorded = |m: &Message| {
            m.media_ref
                .as_ref()
                .map(|r| (r.relative.clone(), r.mime_type.clone()))
        };
        self.id == other.id
            && self.chat_id == other.chat_id
            && self.timestamp == other.timestamp
            && self.from_me == other.from_me
            && self.body == other.body
            && recorded(self) == recorded(other)
            && self.reply_to_id == other.reply_to_id
            && self.status == other.status
            && self.kind == other.kind
            && self.is_supported == other.is_supported
            && self.sender == other.sender
            && self.call == other.call
    }
}

/// A message dropped on merge because an identical copy was already held
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collapsed {
    /// Chat the message belonged to
    pub chat_id: String,
    /// Id of the dropped copy
    pub message_id: String,
}

/// Ordered set of chats
///
/// Append-only: chats are never removed and keep insertion order. Inserting
/// a chat whose id already exists merges into the existing one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatCollection {
    chats: Vec<Chat>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ChatCollection {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a chat, returning messages collapsed by the merge
    pub fn insert(&mut self, chat: Chat) -> Vec<Collapsed> {
        match self.index.get(&chat.id) {
            Some(&position) => {
                let chat_id = chat.id.clone();
                self.chats[position]
                    .absorb(chat)
                    .into_iter()
                    .map(|message_id| Collapsed {
                        chat_id: chat_id.clone(),
                        message_id,
                    })
                    .collect()
            }
            None => {
                self.index.insert(chat.id.clone(), self.chats.len());
                self.chats.push(chat);
                Vec::new()
            }
        }
    }

    /// Insert every chat of another collection, in its order
    pub fn extend(&mut self, other: ChatCollection) -> Vec<Collapsed> {
        let mut collapsed = Vec::new();
        for chat in other.chats {
            collapsed.extend(self.insert(chat));
        }
        collapsed
    }

    /// Chat by id
    pub fn get(&self, id: &str) -> Option<&Chat> {
        self.index.get(id).map(|&i| &self.chats[i])
    }

    /// Chats in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Chat> {
        self.chats.iter()
    }

    /// Number of chats
    pub fn len(&self) -> usize {
        self.chats.len()
    }

    /// Whether there are no chats
    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Total messages across all chats
    pub fn message_count(&self) -> usize {
        self.chats.iter().map(Chat::len).sum()
    }

    /// Every media reference, in chat then message order
    pub fn media_refs(&self) -> impl Iterator<Item = &MediaRef> {
        self.chats
            .iter()
            .flat_map(|c| c.messages.iter())
            .filter_map(|m| m.media_ref.as_ref())
    }
}

impl<'a> IntoIterator for &'a ChatCollection {
    type Item = &'a Chat;
    type IntoIter = std::slice::Iter<'a, Chat>;

    fn into_iter(self) -> Self::IntoIter {
        self.chats.iter()
    }
}
