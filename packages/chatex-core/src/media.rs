//! # Media
//!
//! Resolution of recorded media paths to files on disk, and a bounded copy
//! pool that exports resolved files.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MEDIA RESOLUTION                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Android   "Media/WhatsApp Images/IMG-1.jpg"                           │
//! │            ──► <media root>/Media/WhatsApp Images/IMG-1.jpg            │
//! │                                                                         │
//! │  iOS       "Media/123@s.whatsapp.net/a/b/photo.jpg"                    │
//! │            ──► Manifest.find(domain, path | "Message/" + path)         │
//! │            ──► <backup>/<id[0..2]>/<id>                                │
//! │                                                                         │
//! │  miss ──► MediaRef { missing: true } + MissingMedia warning            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Recorded paths come from the backup and are untrusted: absolute paths and
//! `..` components never reach the filesystem.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::diagnostics::Diagnostic;
use crate::error::{Error, ErrorKind};
use crate::manifest::Manifest;
use crate::model::MediaRef;
use crate::progress::Stage;

/// Outcome of resolving one recorded path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLookup {
    /// Backing file exists here
    Found(PathBuf),
    /// No backing file; the reason goes into the warning
    Missing(String),
}

/// Maps recorded media paths to files
pub trait MediaResolver: Send + Sync {
    /// Resolve one recorded path
    fn resolve(&self, recorded: &str) -> MediaLookup;
}

/// Resolver for sources without any media location
#[derive(Debug, Clone, Copy, Default)]
pub struct Unresolvable;

impl MediaResolver for Unresolvable {
    fn resolve(&self, _recorded: &str) -> MediaLookup {
        MediaLookup::Missing("no media directory for this source".into())
    }
}

/// Android media under the app's storage directory
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    /// Resolve against `root` (the directory holding `Media/`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MediaResolver for DirectoryResolver {
    fn resolve(&self, recorded: &str) -> MediaLookup {
        let Some(relative) = android_relative(recorded) else {
            return MediaLookup::Missing(format!("unsafe media path {:?}", recorded));
        };
        let path = self.root.join(relative);
        if path.is_file() {
            MediaLookup::Found(path)
        } else {
            MediaLookup::Missing(format!("{} not found", path.display()))
        }
    }
}

/// iOS media via the backup manifest
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    manifest: Arc<Manifest>,
    backup_root: PathBuf,
    domain: String,
}

impl ManifestResolver {
    /// Resolve within `domain` of the manifest at `backup_root`
    pub fn new(manifest: Arc<Manifest>, backup_root: impl Into<PathBuf>, domain: impl Into<String>) -> Self {
        Self {
            manifest,
            backup_root: backup_root.into(),
            domain: domain.into(),
        }
    }
}

impl MediaResolver for ManifestResolver {
    fn resolve(&self, recorded: &str) -> MediaLookup {
        let trimmed = recorded.trim_start_matches('/');
        let entry = self
            .manifest
            .find(&self.domain, trimmed)
            .or_else(|| self.manifest.find(&self.domain, &format!("Message/{}", trimmed)));

        match entry {
            Some(entry) => {
                let path = entry.content_path(&self.backup_root);
                if path.is_file() {
                    MediaLookup::Found(path)
                } else {
                    MediaLookup::Missing(format!(
                        "manifest entry {} has no content file",
                        entry.file_id
                    ))
                }
            }
            None => MediaLookup::Missing(format!("{} is not in the manifest", trimmed)),
        }
    }
}

/// Normalize a recorded path into a relative path with no escapes
///
/// Returns `None` for empty, absolute or `..`-containing paths.
pub fn safe_relative(recorded: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(recorded).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Android paths are sometimes recorded absolute (`/storage/.../Media/x`);
/// those are re-rooted at their `Media` component.
fn android_relative(recorded: &str) -> Option<PathBuf> {
    if !recorded.starts_with('/') {
        return safe_relative(recorded);
    }
    let start = recorded.find("/Media/")?;
    safe_relative(&recorded[start + 1..])
}

// ============================================================================
// COPY POOL
// ============================================================================

/// A media file written to the export directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedMedia {
    /// Recorded path
    pub relative: String,
    /// Where it was written
    pub destination: PathBuf,
    /// Bytes copied
    pub bytes: u64,
}

/// Copy resolved media into `dest` with at most `workers` copies in flight
///
/// `dest` should be private to one source: recorded paths are only unique
/// within the backup that recorded them. Missing references are skipped
/// (they were reported when resolved). A recorded path is copied once; a
/// second, different file landing on the same destination is skipped with a
/// warning. Copies and diagnostics come back in reference order, whatever
/// order the copies finish in.
pub async fn copy_media<'a, I>(
    refs: I,
    dest: &Path,
    workers: usize,
    source: &str,
) -> (Vec<CopiedMedia>, Vec<Diagnostic>)
where
    I: IntoIterator<Item = &'a MediaRef>,
{
    let mut seen: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut jobs = Vec::new();
    let mut diagnostics = Vec::new();

    for media in refs {
        let Some(from) = media.path.clone().filter(|_| !media.missing) else {
            continue;
        };
        let Some(relative) = android_relative(&media.relative) else {
            diagnostics.push(Diagnostic::warning(
                source,
                Stage::Media,
                ErrorKind::Io,
                format!("refusing to export unsafe media path {:?}", media.relative),
            ));
            continue;
        };
        match seen.get(&relative) {
            Some(previous) if *previous == from => continue,
            Some(previous) => {
                diagnostics.push(Diagnostic::warning(
                    source,
                    Stage::Media,
                    ErrorKind::Io,
                    format!(
                        "{} and {} both export to {}; kept the first",
                        previous.display(),
                        from.display(),
                        relative.display()
                    ),
                ));
                continue;
            }
            None => {
                seen.insert(relative.clone(), from.clone());
            }
        }
        jobs.push((media.relative.clone(), from, dest.join(relative)));
    }

    let total = jobs.len();
    let mut results: Vec<_> = stream::iter(jobs.into_iter().enumerate())
        .map(|(order, (relative, from, to))| async move {
            let outcome = copy_one(&from, &to).await;
            (order, relative, to, outcome)
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;
    results.sort_by_key(|(order, ..)| *order);

    let mut copied = Vec::with_capacity(total);
    for (_, relative, destination, outcome) in results {
        match outcome {
            Ok(bytes) => copied.push(CopiedMedia {
                relative,
                destination,
                bytes,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => diagnostics.push(
                Diagnostic::from_error(
                    source,
                    Stage::Media,
                    &Error::MissingMedia(format!("{} vanished before it was copied", relative)),
                ),
            ),
            Err(e) => diagnostics.push(Diagnostic::warning(
                source,
                Stage::Media,
                ErrorKind::Io,
                format!("failed to copy {}: {}", relative, e),
            )),
        }
    }

    tracing::info!(copied = copied.len(), requested = total, dest = %dest.display(), "Media copy finished");
    (copied, diagnostics)
}

async fn copy_one(from: &Path, to: &Path) -> std::io::Result<u64> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_relative_rejects_escapes() {
        assert_eq!(
            safe_relative("Media/./a.jpg"),
            Some(PathBuf::from("Media/a.jpg"))
        );
        assert_eq!(safe_relative("../secret"), None);
        assert_eq!(safe_relative("Media/../../x"), None);
        assert_eq!(safe_relative("/etc/passwd"), None);
        assert_eq!(safe_relative(""), None);
    }

    #[test]
    fn test_absolute_android_paths_are_rerooted() {
        assert_eq!(
            android_relative("/storage/emulated/0/WhatsApp/Media/WhatsApp Images/a.jpg"),
            Some(PathBuf::from("Media/WhatsApp Images/a.jpg"))
        );
        assert_eq!(android_relative("/etc/passwd"), None);
    }

    #[test]
    fn test_directory_resolver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Media/Images")).unwrap();
        std::fs::write(dir.path().join("Media/Images/a.jpg"), b"jpeg").unwrap();

        let resolver = DirectoryResolver::new(dir.path());
        assert_eq!(
            resolver.resolve("Media/Images/a.jpg"),
            MediaLookup::Found(dir.path().join("Media/Images/a.jpg"))
        );
        assert!(matches!(resolver.resolve("Media/Images/b.jpg"), MediaLookup::Missing(_)));
        assert!(matches!(resolver.resolve("../a.jpg"), MediaLookup::Missing(_)));
    }

    #[tokio::test]
    async fn test_copy_pool_copies_once_and_reports_failures() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let a = src.path().join("a.jpg");
        std::fs::write(&a, b"first").unwrap();

        let refs = vec![
            MediaRef::found("Media/a.jpg", a.clone(), None),
            MediaRef::found("Media/a.jpg", a, None),
            MediaRef::found("Media/gone.jpg", src.path().join("gone.jpg"), None),
            MediaRef::missing("Media/never.jpg", None),
        ];

        let (copied, diagnostics) = copy_media(&refs, out.path(), 2, "msgstore.db").await;

        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].bytes, 5);
        assert_eq!(std::fs::read(out.path().join("Media/a.jpg")).unwrap(), b"first");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, ErrorKind::MissingMedia);
        assert_eq!(diagnostics[0].stage, Stage::Media);
        assert_eq!(diagnostics[0].source, "msgstore.db");
        assert!(!diagnostics[0].fatal);
    }

    #[tokio::test]
    async fn test_copy_pool_keeps_reference_order() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let mut refs = Vec::new();
        for i in 0..12 {
            let name = format!("z-{:02}.jpg", 12 - i);
            let path = src.path().join(&name);
            if i % 3 != 0 {
                std::fs::write(&path, vec![0u8; 64 * (12 - i)]).unwrap();
            }
            refs.push(MediaRef::found(format!("Media/{}", name), path, None));
        }

        let (copied, diagnostics) = copy_media(&refs, out.path(), 4, "src").await;

        let expected_copies: Vec<String> = (0..12)
            .filter(|i| i % 3 != 0)
            .map(|i| format!("Media/z-{:02}.jpg", 12 - i))
            .collect();
        let got: Vec<String> = copied.iter().map(|c| c.relative.clone()).collect();
        assert_eq!(got, expected_copies);

        let expected_failures: Vec<String> = (0..12)
            .filter(|i| i % 3 == 0)
            .map(|i| format!("Media/z-{:02}.jpg vanished", 12 - i))
            .collect();
        assert_eq!(diagnostics.len(), expected_failures.len());
        for (diagnostic, expected) in diagnostics.iter().zip(&expected_failures) {
            assert!(diagnostic.detail.contains(expected.as_str()), "{}", diagnostic.detail);
        }
    }

    #[tokio::test]
    async fn test_conflicting_files_for_one_path_keep_the_first() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let first = src.path().join("first.jpg");
        let second = src.path().join("second.jpg");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second").unwrap();

        let refs = vec![
            MediaRef::found("Media/a.jpg", first, None),
            MediaRef::found("/storage/emulated/0/WhatsApp/Media/a.jpg", second, None),
        ];
        let (copied, diagnostics) = copy_media(&refs, out.path(), 2, "src").await;

        assert_eq!(copied.len(), 1);
        assert_eq!(std::fs::read(out.path().join("Media/a.jpg")).unwrap(), b"first");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, ErrorKind::Io);
        assert!(diagnostics[0].detail.contains("kept the first"));
    }
}
