//! `Manifest.db` loading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

use crate::diagnostics::Diagnostic;
use crate::error::{Error, ErrorKind, Result};
use crate::plist::PlistDocument;
use crate::progress::Stage;
use crate::schema::{open_read_only, Catalog, TableSpec};

use super::is_content_id;

/// File name of the manifest database
pub const MANIFEST_DB: &str = "Manifest.db";

const FILES_TABLE: TableSpec = TableSpec {
    table: "Files",
    columns: &["fileID", "domain", "relativePath", "flags", "file"],
};

/// What a manifest entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file with content on disk
    File,
    /// Directory (no content)
    Directory,
    /// Symbolic link
    Symlink,
    /// Unrecognized flags value
    Other(i64),
}

impl EntryKind {
    fn from_flags(flags: i64) -> Self {
        match flags {
            1 => Self::File,
            2 => Self::Directory,
            4 => Self::Symlink,
            other => Self::Other(other),
        }
    }
}

/// Attributes archived in the `file` column
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileMetadata {
    /// Size in bytes
    pub size: Option<i64>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// Creation time
    pub birth: Option<DateTime<Utc>>,
}

impl FileMetadata {
    /// Decode the `MBFile` object of an `NSKeyedArchiver` blob
    pub fn from_archive(blob: &[u8]) -> Result<Self> {
        let doc = PlistDocument::parse(blob.to_vec())?;
        let root = doc.keyed_archive_root()?;

        let int_field = |key: &str| -> Result<Option<i64>> {
            match doc.dict_get(root, key)? {
                Some(index) => {
                    let resolved = doc.keyed_archive_resolve(index)?;
                    Ok(doc.get(resolved)?.as_i64())
                }
                None => Ok(None),
            }
        };
        let time_field = |key: &str| -> Result<Option<DateTime<Utc>>> {
            Ok(int_field(key)?.and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
        };

        Ok(Self {
            size: int_field("Size")?,
            last_modified: time_field("LastModified")?,
            birth: time_field("Birth")?,
        })
    }
}

/// One row of the `Files` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Content-hash identifier (40 hex)
    pub file_id: String,
    /// Logical domain
    pub domain: String,
    /// Path within the domain
    pub relative_path: String,
    /// Entry type
    pub kind: EntryKind,
    /// Archived attributes, when decodable
    pub metadata: Option<FileMetadata>,
}

impl ManifestEntry {
    /// `<backup>/<id[0..2]>/<id>`
    pub fn content_path(&self, backup_root: &Path) -> PathBuf {
        backup_root.join(&self.file_id[..2]).join(&self.file_id)
    }
}

/// Read-only index over `Manifest.db`
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    by_id: HashMap<String, usize>,
    by_path: HashMap<(String, String), usize>,
}

impl Manifest {
    /// Load `<backup>/Manifest.db`
    ///
    /// Entries whose identifier is not a content hash are skipped, and
    /// metadata that fails to decode is dropped; both are reported once as
    /// warnings. An unreadable manifest fails the source.
    pub fn load(backup_root: &Path, source: &str, diagnostics: &mut Vec<Diagnostic>) -> Result<Self> {
        let path = backup_root.join(MANIFEST_DB);
        if !path.is_file() {
            return Err(Error::UnsupportedFormat(format!(
                "{} not found in {}",
                MANIFEST_DB,
                backup_root.display()
            )));
        }

        let conn = open_read_only(&path).map_err(|e| match e {
            Error::NotADatabase => Error::UnsupportedFormat(
                "Manifest.db is not readable SQLite; encrypted iOS backups are not supported".into(),
            ),
            other => other,
        })?;

        let missing = Catalog::load(&conn)?.missing(&[FILES_TABLE]);
        if !missing.is_empty() {
            return Err(Error::SchemaUnsupported {
                database: MANIFEST_DB.to_string(),
                detail: format!("missing {}", missing.join(", ")),
            });
        }

        let mut stmt = conn
            .prepare("SELECT fileID, domain, relativePath, flags, file FROM Files ORDER BY rowid")
            .map_err(|e| Error::Database(format!("Failed to prepare manifest query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<Vec<u8>>>(4)?,
                ))
            })
            .map_err(|e| Error::Database(format!("Failed to query manifest: {}", e)))?;

        let mut manifest = Manifest::default();
        let mut bad_ids = 0usize;
        let mut bad_metadata = 0usize;
        let mut first_metadata_error = None;

        for row in rows {
            let (file_id, domain, relative_path, flags, blob) =
                row.map_err(|e| Error::Database(format!("Failed to read manifest row: {}", e)))?;

            let Some(file_id) = file_id.filter(|id| is_content_id(id)) else {
                bad_ids += 1;
                continue;
            };

            let metadata = match blob.filter(|b| !b.is_empty()) {
                Some(blob) => match FileMetadata::from_archive(&blob) {
                    Ok(metadata) => Some(metadata),
                    Err(e) => {
                        bad_metadata += 1;
                        first_metadata_error.get_or_insert_with(|| format!("{}: {}", file_id, e));
                        None
                    }
                },
                None => None,
            };

            manifest.push(ManifestEntry {
                file_id,
                domain: domain.unwrap_or_default(),
                relative_path: relative_path.unwrap_or_default(),
                kind: EntryKind::from_flags(flags.unwrap_or_default()),
                metadata,
            });
        }

        if bad_ids > 0 {
            diagnostics.push(Diagnostic::warning(
                source,
                Stage::Manifest,
                ErrorKind::CorruptBackup,
                format!("{} manifest entries with invalid file identifiers skipped", bad_ids),
            ));
        }
        if let Some(first) = first_metadata_error {
            diagnostics.push(Diagnostic::warning(
                source,
                Stage::Manifest,
                ErrorKind::CorruptPlist,
                format!("{} manifest entries with undecodable metadata (first: {})", bad_metadata, first),
            ));
        }

        tracing::info!(entries = manifest.len(), "Loaded backup manifest");
        Ok(manifest)
    }

    fn push(&mut self, entry: ManifestEntry) {
        let index = self.entries.len();
        self.by_id.insert(entry.file_id.clone(), index);
        self.by_path
            .insert((entry.domain.clone(), entry.relative_path.clone()), index);
        self.entries.push(entry);
    }

    /// Entry by content-hash identifier
    pub fn get(&self, file_id: &str) -> Option<&ManifestEntry> {
        self.by_id.get(file_id).map(|&i| &self.entries[i])
    }

    /// Entry by domain and relative path
    pub fn find(&self, domain: &str, relative_path: &str) -> Option<&ManifestEntry> {
        self.by_path
            .get(&(domain.to_string(), relative_path.to_string()))
            .map(|&i| &self.entries[i])
    }

    /// All entries in table order
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
