//! # Authenticated Decryption
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     VERIFY BEFORE TRUST                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  crypt12 / crypt14 (one tag for the whole container)                   │
//! │  ───────────────────────────────────────────────────                    │
//! │   pass 1: read chunk ─► GHASH ─► ... ─► read tag                       │
//! │           E(J0) ^ GHASH == tag?  no ─► AuthenticationError             │
//! │   pass 2: seek back, read chunk ─► CTR keystream ─► zlib stream ─► out │
//! │           GHASH again; the container must not change between passes   │
//! │                                                                         │
//! │   Memory stays at one chunk plus one inflate window.                   │
//! │                                                                         │
//! │  crypt15 (framed)                                                      │
//! │  ────────────────                                                       │
//! │   frame n: nonce = IV[0..12] ^ n, AAD = n || flags                     │
//! │        verify+decrypt ─► inflate if flagged ─► append                  │
//! │   frames longer than MAX_FRAME_LEN are rejected before allocation      │
//! │   final flag must be present and last; otherwise AuthenticationError   │
//! │                                                                         │
//! │  Output is staged in a temp file and persisted only on success.        │
//! │  Inflated output beyond `max_output` bytes is CorruptBackup.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::cipher::BlockEncrypt;
use aes_gcm::aes::Aes256;
use aes_gcm::Aes256Gcm;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use miniz_oxide::inflate::stream::{inflate, InflateState};
use miniz_oxide::{DataFormat, MZError, MZFlush, MZStatus};
use zeroize::Zeroizing;

use super::format::{gen15, BackupContainer, FormatGeneration, TAG_SIZE};
use super::kdf::DerivedKey;
use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_DECRYPTED_BYTES};
use crate::error::{Error, Result};
use crate::progress::{CancelToken, NoProgress, Progress, ProgressSink, Stage};

/// Keystream of GCM with a 16-byte IV: AES-256 in 32-bit big-endian counter mode
type Aes256Ctr32 = ctr::Ctr32BE<Aes256>;

/// GCM block size
const BLOCK: usize = 16;

/// Inflate output window
const INFLATE_WINDOW: usize = 64 * 1024;

/// First bytes of every SQLite database file
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Knobs for one decode
pub struct DecryptOptions<'a> {
    /// Ciphertext read size for single-tag containers
    pub chunk_size: usize,
    /// Progress receiver
    pub progress: &'a dyn ProgressSink,
    /// Cancellation flag, checked at every chunk/frame
    pub cancel: &'a CancelToken,
    /// Most plaintext bytes a container may inflate to
    pub max_output: u64,
}

static NO_PROGRESS: NoProgress = NoProgress;

impl<'a> DecryptOptions<'a> {
    /// Default chunk size, no progress reporting
    pub fn new(cancel: &'a CancelToken) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: &NO_PROGRESS,
            cancel,
            max_output: DEFAULT_MAX_DECRYPTED_BYTES,
        }
    }
}

/// One decode: owns the derived key until the container is processed
///
/// The key is wiped when the session is consumed or dropped.
#[derive(Debug)]
pub struct DecryptSession {
    key: DerivedKey,
}

impl DecryptSession {
    /// Start a session for a derived key
    pub fn new(key: DerivedKey) -> Self {
        Self { key }
    }

    /// Decrypt into memory
    pub fn decrypt_to_vec<R: Read + Seek>(
        self,
        container: &mut BackupContainer<R>,
        options: &DecryptOptions<'_>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.decrypt_into(container, &mut out, options)?;
        Ok(out)
    }

    /// Decrypt to `dest`, which only appears once the container verified
    pub fn decrypt_to_file<R: Read + Seek>(
        self,
        container: &mut BackupContainer<R>,
        dest: &Path,
        options: &DecryptOptions<'_>,
    ) -> Result<u64> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        let written = self.decrypt_into(container, staged.as_file_mut(), options)?;
        staged.as_file_mut().sync_all()?;
        staged
            .persist(dest)
            .map_err(|e| Error::Io(format!("Failed to persist {}: {}", dest.display(), e.error)))?;

        tracing::info!(bytes = written, path = %dest.display(), "Wrote decrypted database");
        Ok(written)
    }

    fn decrypt_into<R: Read + Seek, W: Write>(
        self,
        container: &mut BackupContainer<R>,
        out: &mut W,
        options: &DecryptOptions<'_>,
    ) -> Result<u64> {
        if self.key.generation() != container.generation() {
            return Err(Error::Internal(format!(
                "key derived for {} used on a {} container",
                self.key.generation(),
                container.generation()
            )));
        }

        tracing::info!(generation = %container.generation(), "Decrypting container");
        match container.generation() {
            FormatGeneration::Crypt12 | FormatGeneration::Crypt14 => {
                self.decrypt_single_tag(container, out, options)
            }
            FormatGeneration::Crypt15 => self.decrypt_framed(container, out, options),
        }
    }

    fn decrypt_single_tag<R: Read + Seek, W: Write>(
        &self,
        container: &mut BackupContainer<R>,
        out: &mut W,
        options: &DecryptOptions<'_>,
    ) -> Result<u64> {
        let header = container.header().clone();
        let total = header.body_len();
        let chunk_size = options.chunk_size.max(1);

        let aes = Aes256::new_from_slice(self.key.key())
            .map_err(|e| Error::Internal(format!("AES key rejected: {}", e)))?;
        let mut hash_key = GenericArray::default();
        aes.encrypt_block(&mut hash_key);
        let ghash = GHash::new(&hash_key);
        let j0 = counter_block(&ghash, self.key.iv());

        let reader = container.reader_mut();
        let mut chunk = Zeroizing::new(vec![0u8; chunk_size]);

        // Pass 1: authenticate without producing any plaintext.
        reader.seek(SeekFrom::Start(header.body_start))?;
        let mut auth = GhashStream::new(ghash.clone());
        let mut done: u64 = 0;
        while done < total {
            options.cancel.check()?;
            let want = chunk_size.min((total - done) as usize);
            reader.read_exact(&mut chunk[..want])?;
            auth.update(&chunk[..want]);
            done += want as u64;
            options.progress.report(Progress {
                stage: Stage::Decrypt,
                done,
                total: Some(total * 2),
            });
        }

        let mut tag = [0u8; TAG_SIZE];
        reader.read_exact(&mut tag)?;
        options.cancel.check()?;

        let mut keystream = Aes256Ctr32::new(
            GenericArray::from_slice(self.key.key()),
            GenericArray::from_slice(&j0),
        );
        let mut mask = [0u8; BLOCK];
        keystream.apply_keystream(&mut mask);
        let expected = auth.finalize(&mask);
        if !tags_match(&expected, &tag) {
            return Err(Error::AuthenticationError(format!(
                "{} container tag mismatch",
                header.generation
            )));
        }
        tracing::debug!(bytes = total, "Container tag verified");

        // Pass 2: decrypt and inflate, re-hashing what is read. An inflate
        // failure only wins once the re-hash agrees with the tag.
        reader.seek(SeekFrom::Start(header.body_start))?;
        let mut recheck = GhashStream::new(ghash);
        let mut plain = PlainSink::new(out, options.max_output);
        let mut inflater = Inflater::new();
        let mut failure = None;
        let mut done: u64 = 0;
        while done < total {
            options.cancel.check()?;
            let want = chunk_size.min((total - done) as usize);
            let piece = &mut chunk[..want];
            reader.read_exact(piece)?;
            recheck.update(piece);
            if failure.is_none() {
                keystream.apply_keystream(piece);
                if let Err(error) = inflater.feed(piece, &mut plain) {
                    failure = Some(error);
                }
            }
            done += want as u64;
            options.progress.report(Progress {
                stage: Stage::Decrypt,
                done: total + done,
                total: Some(total * 2),
            });
        }

        if !tags_match(&recheck.finalize(&mask), &tag) {
            return Err(Error::AuthenticationError(
                "container changed while it was being decrypted".into(),
            ));
        }
        if let Some(error) = failure {
            return Err(error);
        }
        inflater.finish()?;
        plain.ensure_sqlite()?;
        Ok(plain.written)
    }

    fn decrypt_framed<R: Read + Seek, W: Write>(
        &self,
        container: &mut BackupContainer<R>,
        out: &mut W,
        options: &DecryptOptions<'_>,
    ) -> Result<u64> {
        let header = container.header().clone();
        let total = header.body_len();

        let reader = container.reader_mut();
        reader.seek(SeekFrom::Start(header.body_start))?;

        let cipher = Aes256Gcm::new_from_slice(self.key.key())
            .map_err(|e| Error::Internal(format!("AES key rejected: {}", e)))?;

        let mut consumed: u64 = 0;
        let mut counter: u32 = 0;
        let mut plain = PlainSink::new(out, options.max_output);
        let mut inflater = Inflater::new();

        loop {
            options.cancel.check()?;
            let remaining = total - consumed;

            if remaining == 0 {
                if counter == 0 {
                    return Err(Error::EmptyBackup);
                }
                return Err(Error::AuthenticationError(
                    "frame stream ended without a final frame".into(),
                ));
            }
            if remaining < (gen15::FRAME_PREFIX_LEN + TAG_SIZE) as u64 {
                return Err(Error::AuthenticationError("truncated frame".into()));
            }

            let mut prefix = [0u8; gen15::FRAME_PREFIX_LEN];
            reader.read_exact(&mut prefix)?;
            let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as u64;
            let flags = prefix[4];

            if flags & !(gen15::FLAG_COMPRESSED | gen15::FLAG_FINAL) != 0 {
                return Err(Error::AuthenticationError(format!(
                    "frame {} has reserved flag bits set",
                    counter
                )));
            }
            if len > gen15::MAX_FRAME_LEN {
                return Err(Error::AuthenticationError(format!(
                    "frame {} declares {} bytes, more than the {} byte limit",
                    counter,
                    len,
                    gen15::MAX_FRAME_LEN
                )));
            }
            let frame_len = gen15::FRAME_PREFIX_LEN as u64 + len + TAG_SIZE as u64;
            if frame_len > remaining {
                return Err(Error::AuthenticationError(format!(
                    "frame {} extends past the end of the container",
                    counter
                )));
            }

            let mut frame = Zeroizing::new(vec![0u8; len as usize]);
            reader.read_exact(&mut frame)?;
            let mut tag = [0u8; TAG_SIZE];
            reader.read_exact(&mut tag)?;

            let nonce = frame_nonce(self.key.iv(), counter);
            let aad = frame_aad(counter, flags);
            cipher
                .decrypt_in_place_detached(
                    GenericArray::from_slice(&nonce),
                    &aad,
                    &mut frame,
                    GenericArray::from_slice(&tag),
                )
                .map_err(|_| Error::AuthenticationError(format!("frame {} tag mismatch", counter)))?;

            let before = plain.written;
            if flags & gen15::FLAG_COMPRESSED != 0 {
                inflater.reset();
                inflater
                    .feed(&frame, &mut plain)
                    .and_then(|()| inflater.finish())
                    .map_err(|e| match e {
                        Error::CorruptBackup(detail) => {
                            Error::CorruptBackup(format!("frame {}: {}", counter, detail))
                        }
                        other => other,
                    })?;
            } else {
                plain.write(&frame)?;
            }
            consumed += frame_len;
            options.progress.report(Progress {
                stage: Stage::Decrypt,
                done: consumed,
                total: Some(total),
            });
            tracing::debug!(frame = counter, bytes = plain.written - before, "Frame verified");

            if flags & gen15::FLAG_FINAL != 0 {
                if consumed != total {
                    return Err(Error::AuthenticationError(format!(
                        "{} bytes follow the final frame",
                        total - consumed
                    )));
                }
                break;
            }

            counter = counter
                .checked_add(1)
                .ok_or_else(|| Error::AuthenticationError("frame counter overflow".into()))?;
        }

        plain.ensure_sqlite()?;
        Ok(plain.written)
    }
}

// ============================================================================
// STREAMING HELPERS
// ============================================================================

/// Pre-counter block for a 16-byte IV: `GHASH(IV || 0^64 || [128]_64)`
fn counter_block(ghash: &GHash, iv: &[u8; 16]) -> [u8; BLOCK] {
    let mut ghash = ghash.clone();
    let mut length = GenericArray::default();
    length[8..].copy_from_slice(&((iv.len() as u64) * 8).to_be_bytes());
    ghash.update(&[*GenericArray::from_slice(iv), length]);
    let mut j0 = [0u8; BLOCK];
    j0.copy_from_slice(&ghash.finalize());
    j0
}

/// GHASH over a ciphertext that arrives in arbitrary-sized pieces (no AAD)
struct GhashStream {
    ghash: GHash,
    pending: [u8; BLOCK],
    filled: usize,
    len: u64,
}

impl GhashStream {
    fn new(ghash: GHash) -> Self {
        Self {
            ghash,
            pending: [0u8; BLOCK],
            filled: 0,
            len: 0,
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        self.len += data.len() as u64;

        if self.filled > 0 {
            let take = (BLOCK - self.filled).min(data.len());
            self.pending[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];
            if self.filled < BLOCK {
                return;
            }
            self.ghash.update(&[*GenericArray::from_slice(&self.pending)]);
            self.filled = 0;
        }

        let whole = data.len() - data.len() % BLOCK;
        for block in data[..whole].chunks_exact(BLOCK) {
            self.ghash.update(&[*GenericArray::from_slice(block)]);
        }
        let rest = &data[whole..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.filled = rest.len();
    }

    /// Tag for the bytes seen so far, masked with `E(J0)`
    fn finalize(mut self, mask: &[u8; BLOCK]) -> [u8; BLOCK] {
        if self.filled > 0 {
            self.ghash.update_padded(&self.pending[..self.filled]);
        }
        let mut lengths = GenericArray::default();
        lengths[8..].copy_from_slice(&(self.len * 8).to_be_bytes());
        self.ghash.update(&[lengths]);

        let mut tag = [0u8; BLOCK];
        tag.copy_from_slice(&self.ghash.finalize());
        for (t, m) in tag.iter_mut().zip(mask) {
            *t ^= m;
        }
        tag
    }
}

/// Compare tags without an early exit
fn tags_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Plaintext writer: enforces the output cap and keeps the first bytes for the magic check
struct PlainSink<'w, W: Write> {
    out: &'w mut W,
    written: u64,
    limit: u64,
    head: Vec<u8>,
}

impl<'w, W: Write> PlainSink<'w, W> {
    fn new(out: &'w mut W, limit: u64) -> Self {
        Self {
            out,
            written: 0,
            limit,
            head: Vec::with_capacity(SQLITE_MAGIC.len()),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.written + bytes.len() as u64 > self.limit {
            return Err(Error::CorruptBackup(format!(
                "decrypted output exceeds the {} byte limit",
                self.limit
            )));
        }
        if self.head.len() < SQLITE_MAGIC.len() {
            let take = (SQLITE_MAGIC.len() - self.head.len()).min(bytes.len());
            self.head.extend_from_slice(&bytes[..take]);
        }
        self.out.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn ensure_sqlite(&self) -> Result<()> {
        ensure_sqlite(&self.head)
    }
}

/// Incremental zlib decoder writing through a [`PlainSink`]
struct Inflater {
    state: Box<InflateState>,
    window: Zeroizing<Vec<u8>>,
    finished: bool,
}

impl Inflater {
    fn new() -> Self {
        Self {
            state: InflateState::new_boxed(DataFormat::Zlib),
            window: Zeroizing::new(vec![0u8; INFLATE_WINDOW]),
            finished: false,
        }
    }

    fn reset(&mut self) {
        self.state.reset(DataFormat::Zlib);
        self.finished = false;
    }

    fn feed<W: Write>(&mut self, mut input: &[u8], plain: &mut PlainSink<'_, W>) -> Result<()> {
        while !self.finished {
            let result = inflate(&mut self.state, input, &mut self.window, MZFlush::None);
            plain.write(&self.window[..result.bytes_written])?;
            input = &input[result.bytes_consumed..];

            match result.status {
                Ok(MZStatus::StreamEnd) => self.finished = true,
                Ok(MZStatus::Ok) | Err(MZError::Buf) => {}
                Ok(other) => {
                    return Err(Error::CorruptBackup(format!("inflate stopped: {:?}", other)))
                }
                Err(e) => return Err(Error::CorruptBackup(format!("inflate failed: {:?}", e))),
            }
            if result.bytes_consumed == 0 && result.bytes_written == 0 {
                break;
            }
        }
        if self.finished && !input.is_empty() {
            tracing::debug!(bytes = input.len(), "Ignoring data after the compressed stream");
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.finished {
            Ok(())
        } else {
            Err(Error::CorruptBackup("compressed stream is truncated".into()))
        }
    }
}

/// `base_iv[0..12]` with the big-endian counter XOR-ed into the last 4 bytes
pub(crate) fn frame_nonce(base_iv: &[u8; 16], counter: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&base_iv[..12]);
    for (byte, c) in nonce[8..].iter_mut().zip(counter.to_be_bytes()) {
        *byte ^= c;
    }
    nonce
}

/// Frame associated data: counter (BE) followed by the flags byte
pub(crate) fn frame_aad(counter: u32, flags: u8) -> [u8; 5] {
    let c = counter.to_be_bytes();
    [c[0], c[1], c[2], c[3], flags]
}

fn ensure_sqlite(plaintext: &[u8]) -> Result<()> {
    if plaintext.starts_with(SQLITE_MAGIC) {
        Ok(())
    } else {
        Err(Error::NotADatabase)
    }
}
