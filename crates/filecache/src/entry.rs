//! On-disk cache entry format
//!
//! Every cache entry is a single file with a fixed 84-byte header followed by
//! the payload:
//!
//! ```text
//! +----------------+-----------------------+-----------------+------------+
//! | Signature 0..7 |    Meta Data 8..63    | DataSHA1 64..83 | Data 84..n |
//! +----------------+-----------------------+-----------------+------------+
//! |                | ExpiresAtUnixMs 8..15 |                 |            |
//! +----------------+-----------------------+-----------------+------------+
//! |                |    RESERVED 16..63    |                 |            |
//! +----------------+-----------------------+-----------------+------------+
//! ```
//!
//! The expiration is a little-endian `u64` of milliseconds since the Unix
//! epoch, where `0` means "not set". The checksum is the SHA-1 digest of the
//! payload bytes only. Fields are read and written in place; nothing is
//! validated on open.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Offset of the signature field
pub const SIGNATURE_OFFSET: u64 = 0;
/// Length of the signature field
pub const SIGNATURE_LEN: usize = 8;
/// Offset of the expiration timestamp field
pub const EXPIRES_AT_OFFSET: u64 = 8;
/// Length of the expiration timestamp field
pub const EXPIRES_AT_LEN: usize = 8;
/// Offset of the payload checksum field
pub const CHECKSUM_OFFSET: u64 = 64;
/// Length of the payload checksum field (SHA-1)
pub const CHECKSUM_LEN: usize = 20;
/// Offset of the first payload byte
pub const DATA_OFFSET: u64 = 84;

/// Default read/write chunk size for payload streaming
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
/// Default permissions for newly created entry files (Unix only)
pub const DEFAULT_FILE_MODE: u32 = 0o664;

/// Magic bytes identifying files created by this crate
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// The default signature, `"#/CACHE "`
    pub const DEFAULT: Self = Self(*b"#/CACHE ");

    /// Create a signature from exactly [`SIGNATURE_LEN`] bytes
    #[must_use]
    pub const fn new(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw signature bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(\"{}\")", self.0.escape_ascii())
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let array: [u8; SIGNATURE_LEN] =
            bytes.try_into().map_err(|_| Error::InvalidLength {
                field: "signature",
                expected: SIGNATURE_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }
}

/// Access mode for [`Entry::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Read-only handle; every write fails with an I/O error
    ReadOnly,
    /// Read/write handle
    #[default]
    ReadWrite,
}

/// An open cache entry file
#[derive(Debug)]
pub struct Entry {
    file: File,
    path: PathBuf,
    signature: Signature,
    chunk_size: usize,
    dirty: bool,
}

impl Entry {
    /// Create or truncate the entry file at `path`.
    ///
    /// The signature and the checksum of an empty payload are written
    /// immediately, so a fresh entry is always well-formed. `mode` sets the
    /// file permissions on Unix when the file is newly created.
    pub fn create(
        path: impl AsRef<Path>,
        mode: u32,
        signature: Option<Signature>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options
            .open(path)
            .map_err(|e| Error::io(e, path, "create"))?;
        let mut entry = Self::from_file(file, path, signature);

        let signature = entry.signature;
        entry.write_field(SIGNATURE_OFFSET, signature.as_bytes(), "write signature")?;
        entry.set_data(std::io::empty())?;

        tracing::debug!(path = %path.display(), "Created cache entry");
        Ok(entry)
    }

    /// Open an existing entry file without modifying or validating it
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        signature: Option<Signature>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .open(path)
            .map_err(|e| Error::io(e, path, "open"))?;
        Ok(Self::from_file(file, path, signature))
    }

    /// Open an existing entry file for reading only
    pub fn open_read(path: impl AsRef<Path>, signature: Option<Signature>) -> Result<Self> {
        Self::open(path, OpenMode::ReadOnly, signature)
    }

    fn from_file(file: File, path: &Path, signature: Option<Signature>) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            signature: signature.unwrap_or_default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            dirty: false,
        }
    }

    /// Use `chunk_size` bytes per read/write when streaming the payload.
    /// Zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Path the entry was opened with
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The signature this entry is expected to carry
    #[must_use]
    pub const fn expected_signature(&self) -> Signature {
        self.signature
    }

    /// Raw signature field. Shorter than [`SIGNATURE_LEN`] when the file is
    /// truncated.
    pub fn signature(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; SIGNATURE_LEN];
        let n = self.read_field(SIGNATURE_OFFSET, &mut buf, "read signature")?;
        Ok(buf[..n].to_vec())
    }

    /// Overwrite the signature field
    pub fn set_signature(&mut self, signature: &[u8]) -> Result<()> {
        let signature = Signature::try_from(signature)?;
        self.write_field(SIGNATURE_OFFSET, signature.as_bytes(), "write signature")
    }

    /// Whether the stored signature equals the expected one. A short file
    /// is a mismatch, not an error.
    pub fn signature_matches(&mut self) -> Result<bool> {
        let stored = self.signature()?;
        Ok(stored.as_slice() == self.signature.as_bytes())
    }

    /// Raw expiration field in milliseconds since the epoch; `0` is unset
    pub fn expires_at_millis(&mut self) -> Result<u64> {
        let mut buf = [0u8; EXPIRES_AT_LEN];
        self.read_field(EXPIRES_AT_OFFSET, &mut buf, "read expiration")?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Expiration instant, failing with [`Error::ExpirationNotSet`] when the
    /// field holds the unset sentinel
    pub fn expires_at(&mut self) -> Result<DateTime<Utc>> {
        let millis = self.expires_at_millis()?;
        if millis == 0 {
            return Err(Error::ExpirationNotSet {
                path: self.path.as_path().into(),
            });
        }
        i64::try_from(millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or(Error::InvalidExpiration {
                millis: i128::from(millis),
            })
    }

    /// Store the expiration instant, truncated to milliseconds.
    ///
    /// The Unix epoch itself encodes as `0` and therefore reads back as unset.
    pub fn set_expires_at(&mut self, when: DateTime<Utc>) -> Result<()> {
        let millis = when.timestamp_millis();
        let millis = u64::try_from(millis).map_err(|_| Error::InvalidExpiration {
            millis: i128::from(millis),
        })?;
        self.set_expires_at_millis(millis)
    }

    /// Store the raw expiration field
    pub fn set_expires_at_millis(&mut self, millis: u64) -> Result<()> {
        self.write_field(EXPIRES_AT_OFFSET, &millis.to_le_bytes(), "write expiration")
    }

    /// Stored payload checksum. Missing bytes of a truncated header read as
    /// zero.
    pub fn data_checksum(&mut self) -> Result<[u8; CHECKSUM_LEN]> {
        let mut buf = [0u8; CHECKSUM_LEN];
        self.read_field(CHECKSUM_OFFSET, &mut buf, "read checksum")?;
        Ok(buf)
    }

    fn set_data_checksum(&mut self, checksum: &[u8]) -> Result<()> {
        if checksum.len() != CHECKSUM_LEN {
            return Err(Error::InvalidLength {
                field: "checksum",
                expected: CHECKSUM_LEN,
                actual: checksum.len(),
            });
        }
        self.write_field(CHECKSUM_OFFSET, checksum, "write checksum")
    }

    /// Replace the payload with everything `source` yields, then store its
    /// checksum. Returns the number of payload bytes written.
    pub fn set_data(&mut self, mut source: impl Read) -> Result<u64> {
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;

        self.seek(DATA_OFFSET)?;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(e, &self.path, "read source")),
            };
            let chunk = &buf[..n];
            self.file
                .write_all(chunk)
                .map_err(|e| Error::io(e, &self.path, "write data"))?;
            hasher.update(chunk);
            written += n as u64;
        }
        self.dirty = true;

        // drop whatever an older, longer payload left behind
        self.file
            .set_len(DATA_OFFSET + written)
            .map_err(|e| Error::io(e, &self.path, "truncate"))?;
        self.set_data_checksum(hasher.finalize().as_slice())?;

        tracing::trace!(path = %self.path.display(), bytes = written, "Wrote entry data");
        Ok(written)
    }

    /// Stream the payload into `sink`, then verify it against the stored
    /// checksum.
    ///
    /// On [`Error::ChecksumMismatch`] the sink has already received every
    /// byte; the caller must discard it.
    pub fn get_data(&mut self, mut sink: impl Write) -> Result<u64> {
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut read = 0u64;

        self.seek(DATA_OFFSET)?;
        loop {
            let n = match self.file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(e, &self.path, "read data")),
            };
            let chunk = &buf[..n];
            sink.write_all(chunk)
                .map_err(|e| Error::io(e, &self.path, "write sink"))?;
            hasher.update(chunk);
            read += n as u64;
        }
        sink.flush()
            .map_err(|e| Error::io(e, &self.path, "flush sink"))?;

        let computed = hasher.finalize();
        let stored = self.data_checksum()?;
        if computed.as_slice() != stored.as_slice() {
            return Err(Error::ChecksumMismatch {
                path: self.path.as_path().into(),
                expected: hex::encode(stored),
                actual: hex::encode(computed),
            });
        }

        tracing::trace!(path = %self.path.display(), bytes = read, "Read entry data");
        Ok(read)
    }

    /// Release the file handle, syncing written data to disk first
    pub fn close(self) -> Result<()> {
        if self.dirty {
            self.file
                .sync_data()
                .map_err(|e| Error::io(e, &self.path, "sync"))?;
        }
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(e, &self.path, "seek"))?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `offset`, stopping early at EOF
    fn read_field(&mut self, offset: u64, buf: &mut [u8], operation: &str) -> Result<usize> {
        self.seek(offset)?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::io(e, &self.path, operation)),
            }
        }
        Ok(filled)
    }

    fn write_field(&mut self, offset: u64, bytes: &[u8], operation: &str) -> Result<()> {
        self.seek(offset)?;
        self.file
            .write_all(bytes)
            .map_err(|e| Error::io(e, &self.path, operation))?;
        self.dirty = true;
        Ok(())
    }
}
