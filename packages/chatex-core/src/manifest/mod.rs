//! # iOS Backup Manifest
//!
//! Maps the content-hash file names of an iTunes/Finder backup back to
//! logical domains and paths.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         iOS BACKUP LAYOUT                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  <backup>/                                                              │
//! │  ├── Manifest.plist    bplist00: IsEncrypted, Lockdown   (properties)  │
//! │  ├── Info.plist        bplist00: device name, version    (properties)  │
//! │  ├── Manifest.db       Files(fileID, domain, relativePath,             │
//! │  │                           flags, file=NSKeyedArchiver) (database)   │
//! │  ├── 7c/7c7fba66...    ChatStorage.sqlite                              │
//! │  ├── b8/b8548dc3...    ContactsV2.sqlite                               │
//! │  └── ab/ab12...        media files                                     │
//! │                                                                         │
//! │  content path = <backup>/<fileID[0..2]>/<fileID>                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod database;
mod properties;

pub use database::{EntryKind, FileMetadata, Manifest, ManifestEntry, MANIFEST_DB};
pub use properties::{read_backup_properties, BackupProperties, INFO_PLIST, MANIFEST_PLIST};

use crate::config::AppVariant;

/// Content-hash identifiers and backup domain of one app flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppIdentifiers {
    /// `ChatStorage.sqlite`
    pub messages: &'static str,
    /// `ContactsV2.sqlite`
    pub contacts: &'static str,
    /// `CallHistory.sqlite`
    pub calls: &'static str,
    /// Shared app-group domain
    pub domain: &'static str,
}

/// Well-known identifiers for an app flavour
pub fn identifiers(app: AppVariant) -> AppIdentifiers {
    match app {
        AppVariant::Standard => AppIdentifiers {
            messages: "7c7fba66680ef796b916b067077cc246adacf01d",
            contacts: "b8548dc30aa1030df0ce18ef08b882cf7ab5212f",
            calls: "1b432994e958845fffe8e2f190f26d1511534088",
            domain: "AppDomainGroup-group.net.whatsapp.WhatsApp.shared",
        },
        AppVariant::Business => AppIdentifiers {
            messages: "724bd3b98b18518b455a87c1f3ac3a0d189c4466",
            contacts: "d7246a707f51ddf8b17ee2dddabd9e0a4da5c552",
            calls: "b463f7c4365eefc5a8723930d97928d4e907c603",
            domain: "AppDomainGroup-group.net.whatsapp.WhatsAppSMB.shared",
        },
    }
}

/// Whether `id` looks like a content-hash file name (40 lowercase hex)
pub fn is_content_id(id: &str) -> bool {
    id.len() == 40 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
