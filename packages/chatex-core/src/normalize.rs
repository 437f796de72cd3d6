//! Raw rows to the canonical model.
//!
//! Everything here is in-memory: lookups were joined during extraction and
//! media resolution goes through a [`MediaResolver`]. Output depends only on
//! the input rows, so normalizing the same extraction twice yields identical
//! chats.
//!
//! Call-history rows become [`MessageKind::Call`] messages in one
//! [`CALL_LOG_CHAT_ID`] chat per source, placed after the message chats.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::diagnostics::Diagnostic;
use crate::error::{Error, ErrorKind};
use crate::extract::{Extraction, RawCallRow, RawMessageRow, RawTimestamp};
use crate::logging::RedactedJid;
use crate::media::{MediaLookup, MediaResolver};
use crate::model::{
    CallDetails, CallOutcome, Chat, ChatCollection, MediaRef, Message, MessageKind, MessageStatus,
    Platform, CALL_LOG_CHAT_ID, CALL_LOG_CHAT_NAME,
};
use crate::progress::Stage;
use crate::time;

/// Android status code for protocol/system rows
const ANDROID_SYSTEM_STATUS: i64 = 6;

/// Outcome recorded for a call row whose outcome column is NULL
const MISSING_CALL_OUTCOME: i64 = -1;

/// Inputs shared by every row of one source
pub struct NormalizeContext<'a> {
    /// Source identifier for diagnostics
    pub source: &'a str,
    /// Offset applied to timestamps (`None` = UTC)
    pub offset_minutes: Option<i32>,
    /// Media path resolution
    pub media: &'a dyn MediaResolver,
    /// Contact names by JID, used when a chat has no name of its own
    pub contacts: &'a HashMap<String, String>,
}

/// Normalize an extraction into chats, appending warnings to `diagnostics`
///
/// Chats appear in order of their first message row; messages within a chat
/// are sorted by timestamp, ties keeping row order.
pub fn normalize(
    extraction: Extraction,
    ctx: &NormalizeContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) -> ChatCollection {
    let platform = extraction.platform;
    let mut chats: Vec<Chat> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unsupported: BTreeMap<(&'static str, i64), usize> = BTreeMap::new();
    let mut orphans: BTreeSet<i64> = BTreeSet::new();
    let mut bad_timestamps = 0usize;

    for row in extraction.rows {
        let chat_id = match &row.chat_jid {
            Some(jid) => jid.clone(),
            None => {
                orphans.insert(row.chat_ref);
                format!("unknown:{}", row.chat_ref)
            }
        };

        let message = normalize_row(row, platform, chat_id.clone(), ctx, diagnostics, &mut bad_timestamps);
        if let MessageStatus::Unknown(code) = message.status {
            *unsupported.entry(("status", code)).or_default() += 1;
        }
        if let MessageKind::Unknown(code) = message.kind {
            *unsupported.entry(("type", code)).or_default() += 1;
        }

        let position = *positions.entry(chat_id.clone()).or_insert_with(|| {
            let name = extraction
                .chat_names
                .get(&chat_id)
                .or_else(|| ctx.contacts.get(&chat_id))
                .cloned();
            tracing::debug!(chat = %RedactedJid(&chat_id), named = name.is_some(), "New chat");
            chats.push(Chat::new(chat_id.clone(), name));
            chats.len() - 1
        });
        chats[position].push(message);
    }

    if !extraction.calls.is_empty() {
        let mut log = Chat::new(CALL_LOG_CHAT_ID, Some(CALL_LOG_CHAT_NAME.to_string()));
        for call in extraction.calls {
            let message = normalize_call(call, platform, ctx, &mut bad_timestamps);
            if let Some(CallDetails {
                outcome: CallOutcome::Unknown(code),
                ..
            }) = message.call
            {
                *unsupported.entry(("call outcome", code)).or_default() += 1;
            }
            log.push(message);
        }
        tracing::debug!(source = ctx.source, calls = log.len(), "Normalized call history");
        chats.push(log);
    }

    for ((field, code), count) in unsupported {
        diagnostics.push(Diagnostic::warning(
            ctx.source,
            Stage::Normalize,
            ErrorKind::UnsupportedMessageType,
            format!("{} message(s) with unrecognized {} code {}", count, field, code),
        ));
    }
    if !orphans.is_empty() {
        tracing::debug!(source = ctx.source, chats = orphans.len(), "Rows reference unknown chats");
    }
    if bad_timestamps > 0 {
        tracing::debug!(
            source = ctx.source,
            rows = bad_timestamps,
            "Rows without a usable timestamp placed at the epoch"
        );
    }

    let mut collection = ChatCollection::new();
    for mut chat in chats {
        chat.sort_messages();
        collection.insert(chat);
    }

    tracing::info!(
        source = ctx.source,
        chats = collection.len(),
        messages = collection.message_count(),
        "Normalized chats"
    );
    collection
}

fn normalize_row(
    row: RawMessageRow,
    platform: Platform,
    chat_id: String,
    ctx: &NormalizeContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
    bad_timestamps: &mut usize,
) -> Message {
    let instant = instant_of(row.timestamp, bad_timestamps);

    let status = match row.status {
        Some(code) => MessageStatus::from_code(platform, code),
        None if row.from_me => MessageStatus::Sent,
        None => MessageStatus::Received,
    };
    let kind = if platform == Platform::Android && row.status == Some(ANDROID_SYSTEM_STATUS) {
        MessageKind::System
    } else {
        row.type_code
            .map_or(MessageKind::Text, |code| MessageKind::from_code(platform, code))
    };

    let media_ref = row.media.map(|raw| match ctx.media.resolve(&raw.path) {
        MediaLookup::Found(path) => MediaRef::found(raw.path, path, raw.mime_type),
        MediaLookup::Missing(reason) => {
            diagnostics.push(Diagnostic::from_error(
                ctx.source,
                Stage::Normalize,
                &Error::MissingMedia(format!("{}: {}", raw.path, reason)),
            ));
            MediaRef::missing(raw.path, raw.mime_type)
        }
    });

    Message {
        id: row.key_id.unwrap_or_else(|| format!("row:{}", row.row_id)),
        chat_id,
        timestamp: time::localize(instant, ctx.offset_minutes),
        from_me: row.from_me,
        body: row.text,
        media_ref,
        reply_to_id: row.quoted_key,
        is_supported: status.is_known() && kind.is_known(),
        status,
        kind,
        sender: if row.from_me { None } else { row.sender_jid },
        call: None,
        source_row: row.row_id,
    }
}

fn normalize_call(
    call: RawCallRow,
    platform: Platform,
    ctx: &NormalizeContext<'_>,
    bad_timestamps: &mut usize,
) -> Message {
    let instant = instant_of(call.timestamp, bad_timestamps);
    let outcome = CallOutcome::from_code(
        platform,
        call.result.unwrap_or(MISSING_CALL_OUTCOME),
        call.from_me,
    );

    Message {
        id: call.call_id.unwrap_or_else(|| format!("call:{}", call.row_id)),
        chat_id: CALL_LOG_CHAT_ID.to_string(),
        timestamp: time::localize(instant, ctx.offset_minutes),
        from_me: call.from_me,
        body: None,
        media_ref: None,
        reply_to_id: None,
        status: if call.from_me {
            MessageStatus::Sent
        } else {
            MessageStatus::Received
        },
        kind: MessageKind::Call,
        is_supported: outcome.is_known(),
        sender: if call.from_me { None } else { call.peer_jid.clone() },
        call: Some(CallDetails {
            peer: call.peer_jid,
            group: call.group_jid,
            video: call.video,
            outcome,
            duration_secs: call.duration,
            bytes_transferred: call.bytes,
        }),
        source_row: call.row_id,
    }
}

/// Stored timestamp to an instant; unusable values count and fall to the epoch
fn instant_of(raw: RawTimestamp, bad_timestamps: &mut usize) -> DateTime<Utc> {
    match raw {
        RawTimestamp::Unix(raw) => time::from_android(raw),
        RawTimestamp::Apple(seconds) => time::from_apple(seconds),
        RawTimestamp::Missing => None,
    }
    .unwrap_or_else(|| {
        *bad_timestamps += 1;
        time::epoch()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RawMedia;
    use crate::media::Unresolvable;
    use crate::schema::SchemaFamily;

    fn row(row_id: i64, chat: Option<&str>, millis: i64) -> RawMessageRow {
        RawMessageRow {
            row_id,
            chat_jid: chat.map(str::to_string),
            chat_ref: 40 + row_id,
            from_me: false,
            timestamp: RawTimestamp::Unix(millis),
            text: Some(format!("m{}", row_id)),
            status: Some(0),
            type_code: Some(0),
            key_id: Some(format!("K{}", row_id)),
            sender_jid: None,
            quoted_key: None,
            media: None,
        }
    }

    fn extraction(rows: Vec<RawMessageRow>) -> Extraction {
        Extraction {
            platform: Platform::Android,
            family: SchemaFamily::AndroidModern,
            rows,
            chat_names: HashMap::from([("a@s.whatsapp.net".to_string(), "Alpha".to_string())]),
            calls: Vec::new(),
        }
    }

    fn run(rows: Vec<RawMessageRow>, contacts: &HashMap<String, String>) -> (ChatCollection, Vec<Diagnostic>) {
        let ctx = NormalizeContext {
            source: "test",
            offset_minutes: None,
            media: &Unresolvable,
            contacts,
        };
        let mut diagnostics = Vec::new();
        let chats = normalize(extraction(rows), &ctx, &mut diagnostics);
        (chats, diagnostics)
    }

    #[test]
    fn test_unknown_codes_keep_the_message() {
        let mut odd = row(1, Some("a@s.whatsapp.net"), 1_600_000_000_000);
        odd.type_code = Some(99);
        let mut odd_again = row(2, Some("a@s.whatsapp.net"), 1_600_000_001_000);
        odd_again.type_code = Some(99);

        let (chats, diagnostics) = run(vec![odd, odd_again], &HashMap::new());
        let messages = chats.get("a@s.whatsapp.net").unwrap().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::Unknown(99));
        assert!(!messages[0].is_supported);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, ErrorKind::UnsupportedMessageType);
        assert!(diagnostics[0].detail.starts_with("2 message(s)"));
    }

    #[test]
    fn test_names_fall_back_to_contacts() {
        let contacts = HashMap::from([
            ("a@s.whatsapp.net".to_string(), "Contact A".to_string()),
            ("b@s.whatsapp.net".to_string(), "Contact B".to_string()),
        ]);
        let (chats, _) = run(
            vec![
                row(1, Some("a@s.whatsapp.net"), 1_600_000_000_000),
                row(2, Some("b@s.whatsapp.net"), 1_600_000_000_000),
            ],
            &contacts,
        );

        assert_eq!(chats.get("a@s.whatsapp.net").unwrap().name.as_deref(), Some("Alpha"));
        assert_eq!(chats.get("b@s.whatsapp.net").unwrap().name.as_deref(), Some("Contact B"));
    }

    #[test]
    fn test_orphans_and_missing_keys() {
        let mut keyless = row(7, None, 1_600_000_000_000);
        keyless.key_id = None;

        let (chats, _) = run(vec![keyless], &HashMap::new());
        let chat = chats.get("unknown:47").unwrap();
        assert_eq!(chat.messages()[0].id, "row:7");
    }

    #[test]
    fn test_rows_without_a_chat_share_one_orphan_chat() {
        let mut first = row(1, None, 1_600_000_000_000);
        first.chat_ref = crate::extract::ORPHAN_CHAT_REF;
        let mut second = row(2, None, 1_600_000_001_000);
        second.chat_ref = crate::extract::ORPHAN_CHAT_REF;

        let (chats, _) = run(vec![first, second], &HashMap::new());
        assert_eq!(chats.len(), 1);
        assert_eq!(chats.get("unknown:0").unwrap().len(), 2);
    }

    #[test]
    fn test_calls_land_in_the_call_log_chat() {
        let call = |row_id: i64, from_me: bool, result: i64| RawCallRow {
            row_id,
            peer_jid: Some("a@s.whatsapp.net".to_string()),
            group_jid: None,
            from_me,
            timestamp: RawTimestamp::Unix(1_600_000_000_000 + row_id * 1000),
            video: row_id % 2 == 0,
            duration: Some(42),
            result: Some(result),
            bytes: Some(2048),
            call_id: if row_id == 1 { Some("CALL-1".to_string()) } else { None },
        };
        let mut input = extraction(vec![row(1, Some("a@s.whatsapp.net"), 1_600_000_000_000)]);
        input.calls = vec![call(1, false, 5), call(2, true, 2), call(3, false, 42)];

        let contacts = HashMap::new();
        let ctx = NormalizeContext {
            source: "test",
            offset_minutes: None,
            media: &Unresolvable,
            contacts: &contacts,
        };
        let mut diagnostics = Vec::new();
        let chats = normalize(input, &ctx, &mut diagnostics);

        assert_eq!(chats.iter().last().unwrap().id, CALL_LOG_CHAT_ID);
        let log = chats.get(CALL_LOG_CHAT_ID).unwrap();
        assert_eq!(log.name.as_deref(), Some(CALL_LOG_CHAT_NAME));
        let ids: Vec<_> = log.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["CALL-1", "call:2", "call:3"]);

        let answered = &log.messages()[0];
        assert_eq!(answered.kind, MessageKind::Call);
        assert_eq!(answered.sender.as_deref(), Some("a@s.whatsapp.net"));
        let details = answered.call.as_ref().unwrap();
        assert_eq!(details.outcome, CallOutcome::Connected);
        assert_eq!(details.duration_secs, Some(42));

        let outgoing = &log.messages()[1];
        assert_eq!(outgoing.status, MessageStatus::Sent);
        assert_eq!(outgoing.call.as_ref().unwrap().outcome, CallOutcome::NotAnswered);
        assert!(outgoing.call.as_ref().unwrap().video);

        assert!(!log.messages()[2].is_supported);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].detail.contains("call outcome code 42"));
    }

    #[test]
    fn test_missing_media_is_a_warning() {
        let mut photo = row(1, Some("a@s.whatsapp.net"), 1_600_000_000_000);
        photo.type_code = Some(1);
        photo.media = Some(RawMedia {
            path: "Media/x.jpg".into(),
            mime_type: Some("image/jpeg".into()),
        });

        let (chats, diagnostics) = run(vec![photo], &HashMap::new());
        let media = chats.get("a@s.whatsapp.net").unwrap().messages()[0]
            .media_ref
            .clone()
            .unwrap();
        assert!(media.missing);
        assert_eq!(media.mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(diagnostics[0].kind, ErrorKind::MissingMedia);
        assert!(!diagnostics[0].fatal);
    }

    #[test]
    fn test_system_status_overrides_type() {
        let mut system = row(1, Some("g@g.us"), 1_600_000_000_000);
        system.status = Some(6);
        system.type_code = Some(0);

        let (chats, diagnostics) = run(vec![system], &HashMap::new());
        let message = &chats.get("g@g.us").unwrap().messages()[0];
        assert_eq!(message.kind, MessageKind::System);
        assert_eq!(message.status, MessageStatus::System);
        assert!(message.is_supported);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_timezone_offset_applies() {
        let contacts = HashMap::new();
        let ctx = NormalizeContext {
            source: "test",
            offset_minutes: Some(120),
            media: &Unresolvable,
            contacts: &contacts,
        };
        let chats = normalize(
            extraction(vec![row(1, Some("a@s.whatsapp.net"), 1_600_000_000_000)]),
            &ctx,
            &mut Vec::new(),
        );
        let ts = chats.get("a@s.whatsapp.net").unwrap().messages()[0].timestamp;
        assert_eq!(ts.offset().local_minus_utc(), 7200);
        assert_eq!(ts.timestamp(), 1_600_000_000);
    }
}
