//! # Ingest Pipeline
//!
//! Drives one backup source from detection to normalized chats, and runs
//! batches of sources in parallel.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PER-SOURCE PIPELINE                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Android (encrypted)                                                   │
//! │    detect ─► derive key ─► decrypt to scratch ─┐                       │
//! │              (wa.db.cryptNN decrypted too)     │                       │
//! │  Android / iOS (plaintext db)                  │                       │
//! │    ────────────────────────────────────────────┼─► schema ─► extract   │
//! │  iOS backup dir                                │        ─► normalize   │
//! │    properties ─► manifest ─► content file ─────┘                       │
//! │                                                                         │
//! │  Call history: call_log in msgstore.db, CallHistory.sqlite on iOS     │
//! │  Failure anywhere: the source yields no chats, one fatal diagnostic   │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            BATCH RUN                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  source 0 ─► spawn_blocking ─┐                                         │
//! │  source 1 ─► spawn_blocking ─┼─► mpsc ─► single writer ─► report       │
//! │  source 2 ─► (waits permit) ─┘           (merges in input order)       │
//! │                                                                         │
//! │  Writer, per source: copy media to <dest>/<index>-<name>, then merge   │
//! │  (a message identical to one already held is collapsed)                │
//! │                                                                         │
//! │  Semaphore(max_parallel_sources) bounds concurrent decodes             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::config::IngestConfig;
use rusqlite::Connection;

use crate::crypto::{
    derive_key, BackupContainer, DatabaseKind, DecryptOptions, DecryptSession, FormatGeneration,
    KeyMaterial,
};
use crate::diagnostics::{Diagnostic, IngestReport, SourceReport, SourceStatus};
use crate::error::{Error, ErrorKind, Result};
use crate::extract::{extract_calls, extract_contacts, extract_messages, ExtractOptions, RawCallRow};
use crate::logging::RedactedJid;
use crate::manifest::{identifiers, read_backup_properties, Manifest, MANIFEST_DB};
use crate::media::{copy_media, DirectoryResolver, ManifestResolver, MediaResolver, Unresolvable};
use crate::model::{ChatCollection, Platform};
use crate::normalize::{normalize, NormalizeContext};
use crate::progress::{CancelToken, NoProgress, ProgressSink, Stage};
use crate::schema::{candidates, open_read_only, DatabaseRole, SchemaCache};

/// Android message database file name
pub const ANDROID_MESSAGES_DB: &str = "msgstore.db";
/// Android contacts database file name
pub const ANDROID_CONTACTS_DB: &str = "wa.db";
/// iOS message database file name
pub const IOS_MESSAGES_DB: &str = "ChatStorage.sqlite";
/// iOS contacts database file name
pub const IOS_CONTACTS_DB: &str = "ContactsV2.sqlite";
/// iOS call history database file name
pub const IOS_CALLS_DB: &str = "CallHistory.sqlite";

/// Encrypted contacts containers, newest generation first
const ANDROID_CONTACTS_CONTAINERS: [&str; 3] = ["wa.db.crypt15", "wa.db.crypt14", "wa.db.crypt12"];

// ============================================================================
// SOURCES
// ============================================================================

/// One backup to ingest
#[derive(Debug)]
pub enum BackupSource {
    /// Encrypted Android container plus its key
    AndroidEncrypted {
        /// `msgstore.db.cryptNN`
        container: PathBuf,
        /// Key material; dropped (and wiped) right after derivation
        key: KeyMaterial,
        /// Generation override
        hint: Option<FormatGeneration>,
        /// `wa.db`, or `wa.db.cryptNN` decrypted with the same key
        contacts: Option<PathBuf>,
        /// Directory holding `Media/`
        media_root: Option<PathBuf>,
    },
    /// Plaintext Android database
    AndroidDatabase {
        /// `msgstore.db`
        messages: PathBuf,
        /// `wa.db`
        contacts: Option<PathBuf>,
        /// Directory holding `Media/`
        media_root: Option<PathBuf>,
    },
    /// Unencrypted iTunes/Finder backup directory
    IosBackup {
        /// Directory holding `Manifest.db`
        root: PathBuf,
    },
    /// Plaintext iOS database copied out of the app container
    IosDatabase {
        /// `ChatStorage.sqlite`
        messages: PathBuf,
        /// `ContactsV2.sqlite`
        contacts: Option<PathBuf>,
        /// `CallHistory.sqlite`
        calls: Option<PathBuf>,
        /// Directory holding `Media/`
        media_root: Option<PathBuf>,
    },
}

impl BackupSource {
    /// Work out what `path` is
    ///
    /// Encrypted containers need `key`; other sources ignore it.
    pub fn detect(path: &Path, key: Option<KeyMaterial>) -> Result<Self> {
        if path.is_dir() {
            if path.join(MANIFEST_DB).is_file() {
                return Ok(Self::IosBackup {
                    root: path.to_path_buf(),
                });
            }
            for candidate in [
                ANDROID_MESSAGES_DB,
                "msgstore.db.crypt15",
                "msgstore.db.crypt14",
                "msgstore.db.crypt12",
                IOS_MESSAGES_DB,
            ] {
                let file = path.join(candidate);
                if file.is_file() {
                    return Self::detect_file(&file, key);
                }
            }
            return Err(Error::UnsupportedFormat(format!(
                "{} holds no recognizable backup",
                path.display()
            )));
        }

        if path.is_file() {
            return Self::detect_file(path, key);
        }
        Err(Error::Io(format!("{} does not exist", path.display())))
    }

    fn detect_file(path: &Path, key: Option<KeyMaterial>) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let sibling = |file: &str| Some(dir.join(file)).filter(|p| p.is_file());

        if let Some(generation) = FormatGeneration::from_file_name(&name) {
            let key = key.ok_or_else(|| {
                Error::MalformedKeyMaterial(format!("{} is encrypted and no key was given", name))
            })?;
            let contacts = sibling(ANDROID_CONTACTS_DB)
                .or_else(|| ANDROID_CONTACTS_CONTAINERS.iter().find_map(|name| sibling(name)));
            return Ok(Self::AndroidEncrypted {
                container: path.to_path_buf(),
                key,
                hint: Some(generation),
                contacts,
                media_root: Some(android_media_root(dir)),
            });
        }
        if name.eq_ignore_ascii_case(ANDROID_MESSAGES_DB) {
            return Ok(Self::AndroidDatabase {
                messages: path.to_path_buf(),
                contacts: sibling(ANDROID_CONTACTS_DB),
                media_root: Some(android_media_root(dir)),
            });
        }
        if name.eq_ignore_ascii_case(IOS_MESSAGES_DB) {
            let message_dir = dir.join("Message");
            return Ok(Self::IosDatabase {
                messages: path.to_path_buf(),
                contacts: sibling(IOS_CONTACTS_DB),
                calls: sibling(IOS_CALLS_DB),
                media_root: Some(if message_dir.is_dir() { message_dir } else { dir.to_path_buf() }),
            });
        }
        Err(Error::UnsupportedFormat(format!("{} is not a known backup file", name)))
    }

    /// Identifier used in diagnostics
    pub fn identifier(&self) -> String {
        let path = match self {
            Self::AndroidEncrypted { container, .. } => container,
            Self::AndroidDatabase { messages, .. } | Self::IosDatabase { messages, .. } => messages,
            Self::IosBackup { root } => root,
        };
        path.display().to_string()
    }

    /// Platform of the source
    pub fn platform(&self) -> Platform {
        match self {
            Self::AndroidEncrypted { .. } | Self::AndroidDatabase { .. } => Platform::Android,
            Self::IosBackup { .. } | Self::IosDatabase { .. } => Platform::Ios,
        }
    }
}

/// `WhatsApp/Databases/msgstore.db` keeps media in `WhatsApp/Media`
fn android_media_root(db_dir: &Path) -> PathBuf {
    match (db_dir.file_name(), db_dir.parent()) {
        (Some(name), Some(parent)) if name == "Databases" => parent.to_path_buf(),
        _ => db_dir.to_path_buf(),
    }
}

// ============================================================================
// INGESTOR
// ============================================================================

/// What one source produced
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    /// Normalized chats; empty when the source failed
    pub chats: ChatCollection,
    /// Warnings, plus the fatal error if any
    pub diagnostics: Vec<Diagnostic>,
    /// Summary
    pub report: SourceReport,
}

impl SourceOutcome {
    fn failed(source: &str, stage: Stage, error: &Error, mut diagnostics: Vec<Diagnostic>) -> Self {
        let mut diagnostic = Diagnostic::from_error(source, stage, error);
        diagnostic.fatal = true;
        diagnostics.push(diagnostic);
        Self {
            chats: ChatCollection::new(),
            report: SourceReport {
                source: source.to_string(),
                status: SourceStatus::Failed,
                generation: None,
                chats: 0,
                messages: 0,
                warnings: diagnostics.iter().filter(|d| !d.fatal).count(),
            },
            diagnostics,
        }
    }
}

type Staged<T> = std::result::Result<T, (Stage, Error)>;

trait AtStage<T> {
    fn at(self, stage: Stage) -> Staged<T>;
}

impl<T, E: Into<Error>> AtStage<T> for std::result::Result<T, E> {
    fn at(self, stage: Stage) -> Staged<T> {
        self.map_err(|e| (stage, e.into()))
    }
}

/// A configured ingest session
///
/// Holds the schema cache, so databases seen twice in one session are
/// inspected once.
pub struct Ingestor {
    config: IngestConfig,
    cache: SchemaCache,
    cancel: CancelToken,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Ingestor {
    /// Validate the config and start a session
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: SchemaCache::new(),
            cancel: CancelToken::new(),
            progress: Arc::new(NoProgress),
        })
    }

    /// Report progress to `sink`
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this session
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Session configuration
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Schema cache of this session
    pub fn schema_cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Decode one source; never fails, failures become diagnostics
    pub fn ingest_source(&self, source: BackupSource) -> SourceOutcome {
        let identifier = source.identifier();
        let mut diagnostics = Vec::new();
        tracing::info!(source = %identifier, platform = ?source.platform(), "Ingesting source");

        match self.run(source, &identifier, &mut diagnostics) {
            Ok((chats, generation)) => {
                let report = SourceReport {
                    source: identifier,
                    status: SourceStatus::Completed,
                    generation,
                    chats: chats.len(),
                    messages: chats.message_count(),
                    warnings: diagnostics.len(),
                };
                tracing::info!(
                    source = %report.source,
                    chats = report.chats,
                    messages = report.messages,
                    warnings = report.warnings,
                    "Source complete"
                );
                SourceOutcome {
                    chats,
                    diagnostics,
                    report,
                }
            }
            Err((stage, error)) => SourceOutcome::failed(&identifier, stage, &error, diagnostics),
        }
    }

    fn run(
        &self,
        source: BackupSource,
        identifier: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Staged<(ChatCollection, Option<FormatGeneration>)> {
        match source {
            BackupSource::AndroidEncrypted {
                container,
                key,
                hint,
                contacts,
                media_root,
            } => {
                let mut container = BackupContainer::open(&container, &key, hint).at(Stage::Detect)?;
                let generation = container.generation();
                tracing::info!(generation = %generation, "Detected container");
                if container.header().database != DatabaseKind::Messages {
                    return Err((
                        Stage::Detect,
                        Error::UnsupportedFormat(format!(
                            "container holds a {:?} database, not messages",
                            container.header().database
                        )),
                    ));
                }

                let derived = derive_key(&key, container.header()).at(Stage::KeyDerivation)?;

                let scratch = tempfile::tempdir().at(Stage::Decrypt)?;
                let plain = scratch.path().join(ANDROID_MESSAGES_DB);
                DecryptSession::new(derived)
                    .decrypt_to_file(&mut container, &plain, &self.decrypt_options(&*self.progress))
                    .at(Stage::Decrypt)?;

                let contacts = match contacts {
                    Some(path) if is_container(&path) => {
                        match self.decrypt_contacts(&path, &key, scratch.path()) {
                            Ok(plain) => Some(plain),
                            Err(Error::Cancelled) => return Err((Stage::Decrypt, Error::Cancelled)),
                            Err(error) => {
                                diagnostics.push(Diagnostic::warning(
                                    identifier,
                                    Stage::Decrypt,
                                    error.kind(),
                                    format!("contacts container {} ignored: {}", path.display(), error),
                                ));
                                None
                            }
                        }
                    }
                    other => other,
                };
                drop(key);

                let resolver = resolver_for(media_root);
                let chats = self.ingest_database(
                    Platform::Android,
                    &plain,
                    contacts.as_deref(),
                    None,
                    resolver.as_ref(),
                    identifier,
                    diagnostics,
                )?;
                Ok((chats, Some(generation)))
            }
            BackupSource::AndroidDatabase {
                messages,
                contacts,
                media_root,
            } => {
                let resolver = resolver_for(media_root);
                let chats = self.ingest_database(
                    Platform::Android,
                    &messages,
                    contacts.as_deref(),
                    None,
                    resolver.as_ref(),
                    identifier,
                    diagnostics,
                )?;
                Ok((chats, None))
            }
            BackupSource::IosDatabase {
                messages,
                contacts,
                calls,
                media_root,
            } => {
                let resolver = resolver_for(media_root);
                let chats = self.ingest_database(
                    Platform::Ios,
                    &messages,
                    contacts.as_deref(),
                    calls.as_deref(),
                    resolver.as_ref(),
                    identifier,
                    diagnostics,
                )?;
                Ok((chats, None))
            }
            BackupSource::IosBackup { root } => {
                let chats = self.ingest_ios_backup(&root, identifier, diagnostics)?;
                Ok((chats, None))
            }
        }
    }

    fn ingest_ios_backup(
        &self,
        root: &Path,
        identifier: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Staged<ChatCollection> {
        let props = read_backup_properties(root, identifier, diagnostics).at(Stage::Manifest)?;
        if props.is_encrypted == Some(true) {
            return Err((
                Stage::Detect,
                Error::UnsupportedFormat("encrypted iOS backups are not supported".into()),
            ));
        }

        let manifest = Arc::new(Manifest::load(root, identifier, diagnostics).at(Stage::Manifest)?);
        let ids = identifiers(self.config.app);

        let messages = manifest
            .get(ids.messages)
            .map(|entry| entry.content_path(root))
            .filter(|path| path.is_file())
            .ok_or_else(|| {
                (
                    Stage::Manifest,
                    Error::UnsupportedFormat(format!(
                        "backup has no message database for {}",
                        ids.domain
                    )),
                )
            })?;
        let content = |file_id: &str| {
            manifest
                .get(file_id)
                .map(|entry| entry.content_path(root))
                .filter(|path| path.is_file())
        };
        let contacts = content(ids.contacts);
        let calls = content(ids.calls);

        let resolver = ManifestResolver::new(Arc::clone(&manifest), root, ids.domain);
        self.ingest_database(
            Platform::Ios,
            &messages,
            contacts.as_deref(),
            calls.as_deref(),
            &resolver,
            identifier,
            diagnostics,
        )
    }

    /// Android keeps calls in the message store; iOS passes `calls`
    #[allow(clippy::too_many_arguments)]
    fn ingest_database(
        &self,
        platform: Platform,
        messages: &Path,
        contacts: Option<&Path>,
        calls: Option<&Path>,
        media: &dyn MediaResolver,
        identifier: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Staged<ChatCollection> {
        self.cancel.check().at(Stage::Extract)?;
        let conn = open_read_only(messages).at(Stage::Extract)?;

        let schema = self
            .cache
            .resolve(
                &format!("{}#messages", identifier),
                &conn,
                candidates(platform, DatabaseRole::Messages),
            )
            .at(Stage::Extract)?;

        let options = ExtractOptions {
            cancel: &self.cancel,
            progress: &*self.progress,
        };
        let mut extraction = extract_messages(&conn, &schema, &options).at(Stage::Extract)?;
        extraction.calls = match (platform, calls) {
            (Platform::Android, _) => self.load_calls(platform, &conn, identifier, diagnostics)?,
            (Platform::Ios, Some(path)) => match open_read_only(path) {
                Ok(calls_conn) => self.load_calls(platform, &calls_conn, identifier, diagnostics)?,
                Err(error) => {
                    diagnostics.push(Diagnostic::warning(
                        identifier,
                        Stage::Extract,
                        error.kind(),
                        format!("call history {} ignored: {}", path.display(), error),
                    ));
                    Vec::new()
                }
            },
            (Platform::Ios, None) => Vec::new(),
        };
        drop(conn);

        let contacts = match contacts {
            Some(path) => self.load_contacts(platform, path, identifier, diagnostics),
            None => HashMap::new(),
        };

        let ctx = NormalizeContext {
            source: identifier,
            offset_minutes: self.config.timezone_offset_minutes,
            media,
            contacts: &contacts,
        };
        Ok(normalize(extraction, &ctx, diagnostics))
    }

    /// Call history is optional; only cancellation fails the source
    ///
    /// A message store without a call table is normal and stays quiet.
    fn load_calls(
        &self,
        platform: Platform,
        conn: &Connection,
        identifier: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Staged<Vec<RawCallRow>> {
        let options = ExtractOptions {
            cancel: &self.cancel,
            progress: &*self.progress,
        };
        let loaded = self
            .cache
            .resolve(
                &format!("{}#calls", identifier),
                conn,
                candidates(platform, DatabaseRole::Calls),
            )
            .and_then(|schema| extract_calls(conn, &schema, &options));

        match loaded {
            Ok(calls) => Ok(calls),
            Err(Error::Cancelled) => Err((Stage::Extract, Error::Cancelled)),
            Err(Error::SchemaUnsupported { .. }) if platform == Platform::Android => {
                tracing::debug!(source = identifier, "Message store has no call history");
                Ok(Vec::new())
            }
            Err(error) => {
                diagnostics.push(Diagnostic::warning(
                    identifier,
                    Stage::Extract,
                    error.kind(),
                    format!("call history ignored: {}", error),
                ));
                Ok(Vec::new())
            }
        }
    }

    /// Decrypt `wa.db.cryptNN` into `scratch` with the message key
    fn decrypt_contacts(&self, path: &Path, key: &KeyMaterial, scratch: &Path) -> Result<PathBuf> {
        let mut container = BackupContainer::open(path, key, None)?;
        let database = container.header().database;
        if container.generation() == FormatGeneration::Crypt15 && database != DatabaseKind::Contacts {
            return Err(Error::UnsupportedFormat(format!(
                "header marks a {:?} database, not contacts",
                database
            )));
        }

        let derived = derive_key(key, container.header())?;
        let plain = scratch.join(ANDROID_CONTACTS_DB);
        DecryptSession::new(derived).decrypt_to_file(
            &mut container,
            &plain,
            &self.decrypt_options(&NoProgress),
        )?;
        tracing::debug!(generation = %container.generation(), "Decrypted contacts container");
        Ok(plain)
    }

    fn decrypt_options<'a>(&'a self, progress: &'a dyn ProgressSink) -> DecryptOptions<'a> {
        DecryptOptions {
            chunk_size: self.config.chunk_size,
            progress,
            cancel: &self.cancel,
            max_output: self.config.max_decrypted_bytes,
        }
    }

    /// Contacts only enrich names; any failure is a warning
    fn load_contacts(
        &self,
        platform: Platform,
        path: &Path,
        identifier: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> HashMap<String, String> {
        let loaded = open_read_only(path).and_then(|conn| {
            let schema = self.cache.resolve(
                &format!("{}#contacts", identifier),
                &conn,
                candidates(platform, DatabaseRole::Contacts),
            )?;
            extract_contacts(&conn, &schema)
        });

        match loaded {
            Ok(contacts) => contacts,
            Err(error) => {
                diagnostics.push(Diagnostic::warning(
                    identifier,
                    Stage::Extract,
                    error.kind(),
                    format!("contacts database {} ignored: {}", path.display(), error),
                ));
                HashMap::new()
            }
        }
    }

    /// Decode `sources` in parallel and merge them into one report
    ///
    /// At most `max_parallel_sources` decode at once. Finished sources go
    /// through a channel to this task, the only writer of the merged
    /// collection, which merges them in input order so the result does not
    /// depend on scheduling. With `copy_media_to` set, each source's media is
    /// exported to its own `<index>-<name>` directory before the merge.
    pub async fn ingest_batch(self: Arc<Self>, sources: Vec<BackupSource>) -> IngestReport {
        let permits = Arc::new(Semaphore::new(self.config.max_parallel_sources));
        let (tx, mut rx) = mpsc::channel::<(usize, SourceOutcome)>(self.config.max_parallel_sources);
        let total = sources.len();

        for (index, source) in sources.into_iter().enumerate() {
            let ingestor = Arc::clone(&self);
            let permits = Arc::clone(&permits);
            let tx = tx.clone();
            tokio::spawn(async move {
                let identifier = source.identifier();
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        match tokio::task::spawn_blocking(move || ingestor.ingest_source(source)).await {
                            Ok(outcome) => outcome,
                            Err(e) => SourceOutcome::failed(
                                &identifier,
                                Stage::Detect,
                                &Error::Internal(format!("source task failed: {}", e)),
                                Vec::new(),
                            ),
                        }
                    }
                    Err(_) => SourceOutcome::failed(&identifier, Stage::Detect, &Error::Cancelled, Vec::new()),
                };
                // Receiver only goes away if the batch future was dropped.
                let _ = tx.send((index, outcome)).await;
            });
        }
        drop(tx);

        let mut chats = ChatCollection::new();
        let mut diagnostics = Vec::new();
        let mut reports = Vec::with_capacity(total);
        let mut pending = BTreeMap::new();
        let mut next = 0usize;

        while let Some((index, outcome)) = rx.recv().await {
            pending.insert(index, outcome);
            while let Some(outcome) = pending.remove(&next) {
                diagnostics.extend(outcome.diagnostics);
                if let Some(dest) = &self.config.copy_media_to {
                    let dest = dest.join(export_dir_name(next, &outcome.report.source));
                    let (copied, media_diagnostics) = copy_media(
                        outcome.chats.media_refs(),
                        &dest,
                        self.config.media_workers,
                        &outcome.report.source,
                    )
                    .await;
                    if !copied.is_empty() {
                        tracing::info!(files = copied.len(), dest = %dest.display(), "Exported media");
                    }
                    diagnostics.extend(media_diagnostics);
                }

                let collapsed = chats.extend(outcome.chats);
                for duplicate in &collapsed {
                    tracing::debug!(
                        chat = %RedactedJid(&duplicate.chat_id),
                        message = %duplicate.message_id,
                        "Collapsed duplicate message"
                    );
                }
                if !collapsed.is_empty() {
                    diagnostics.push(Diagnostic::warning(
                        &outcome.report.source,
                        Stage::Merge,
                        ErrorKind::DuplicateMessage,
                        format!(
                            "{} message(s) already merged from an earlier source were collapsed",
                            collapsed.len()
                        ),
                    ));
                }
                reports.push(outcome.report);
                next += 1;
            }
        }

        let report = IngestReport::new(chats, diagnostics, reports);
        tracing::info!(status = ?report.status, sources = total, "Batch complete");
        report
    }
}

/// `<input index>-<file name>`; the index keeps same-named sources apart
fn export_dir_name(index: usize, source: &str) -> String {
    let name = Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    format!("{}-{}", index, name)
}

fn is_container(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(FormatGeneration::from_file_name)
        .is_some()
}

fn resolver_for(media_root: Option<PathBuf>) -> Box<dyn MediaResolver> {
    match media_root {
        Some(root) => Box::new(DirectoryResolver::new(root)),
        None => Box::new(Unresolvable),
    }
}

/// Ingest one source with a fresh session
///
/// Installs the `tracing` subscriber first, honoring `verbose_logging`.
pub fn ingest_source(source: BackupSource, config: IngestConfig) -> Result<IngestReport> {
    crate::logging::init(config.verbose_logging);
    let ingestor = Ingestor::new(config)?;
    let outcome = ingestor.ingest_source(source);
    Ok(IngestReport::new(
        outcome.chats,
        outcome.diagnostics,
        vec![outcome.report],
    ))
}

/// Ingest several sources with a fresh session
///
/// Installs the `tracing` subscriber first, honoring `verbose_logging`.
pub async fn ingest_batch(sources: Vec<BackupSource>, config: IngestConfig) -> Result<IngestReport> {
    crate::logging::init(config.verbose_logging);
    let ingestor = Arc::new(Ingestor::new(config)?);
    Ok(ingestor.ingest_batch(sources).await)
}

// ============================================================================
// TESTS
// ============================================================================
