//! Cache item: one key's handle onto its entry file

use crate::config::EntrySettings;
use crate::entry::{Entry, OpenMode};
use crate::lock::FileLock;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::MutexGuard;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single cache key and its entry file.
///
/// Every public method holds the item's lock for its whole duration,
/// filesystem open and close included. Items handed out by the same
/// [`crate::Pool`] for the same key share one lock, as do clones of an item.
#[derive(Debug, Clone)]
pub struct Item {
    key: Vec<u8>,
    path: PathBuf,
    settings: Arc<EntrySettings>,
    lock: FileLock,
}

impl Item {
    pub(crate) fn new(
        key: Vec<u8>,
        path: PathBuf,
        settings: Arc<EntrySettings>,
        lock: FileLock,
    ) -> Self {
        Self {
            key,
            path,
            settings,
            lock,
        }
    }

    /// The key this item was created for
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Path of the associated entry file
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Whether a regular file exists for this item. The file is neither
    /// opened nor verified.
    #[must_use]
    pub fn is_hit(&self) -> bool {
        let _guard = self.lock();
        self.is_hit_locked()
    }

    /// Stream the cached value into `sink`, returning the number of bytes.
    ///
    /// A checksum failure surfaces as [`Error::FileRead`] after `sink` has
    /// received the bytes; see [`Error::is_checksum_mismatch`].
    pub fn get(&self, sink: impl Write) -> Result<u64> {
        let _guard = self.lock();
        self.get_locked(sink)
    }

    /// Store everything `source` yields as the cached value.
    ///
    /// An existing entry keeps its expiration.
    pub fn set(&self, source: impl Read) -> Result<u64> {
        let _guard = self.lock();
        self.set_locked(source)
    }

    /// Whether the expiration instant lies strictly in the past.
    ///
    /// Fails with [`Error::ExpirationDataNotAvailable`] when there is no
    /// expiration to compare, which is different from "never expires".
    pub fn is_expired(&self) -> Result<bool> {
        let _guard = self.lock();
        self.is_expired_locked()
    }

    /// Expiration instant with millisecond precision, or `None` when it is
    /// unset or cannot be read
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let _guard = self.lock();
        self.expires_at_locked().ok()
    }

    /// Set the expiration instant, creating the entry if needed.
    ///
    /// Sub-millisecond precision is dropped.
    pub fn set_expires_at(&self, when: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock();
        self.set_expires_at_locked(when)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    #[cfg(test)]
    pub(crate) fn shares_lock_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }

    pub(crate) fn is_hit_locked(&self) -> bool {
        std::fs::metadata(&self.path).is_ok_and(|meta| meta.is_file())
    }

    fn get_locked(&self, sink: impl Write) -> Result<u64> {
        let mut entry = Entry::open_read(&self.path, Some(self.settings.signature))
            .map_err(|e| Error::file_open(&self.path, e))?
            .with_chunk_size(self.settings.chunk_size);

        let read = entry
            .get_data(sink)
            .map_err(|e| Error::file_read(&self.path, e))?;
        entry
            .close()
            .map_err(|e| Error::file_read(&self.path, e))?;
        Ok(read)
    }

    pub(crate) fn set_locked(&self, source: impl Read) -> Result<u64> {
        let entry = self.open_or_create()?;
        self.write_data(entry, source)
    }

    /// Replace the entry with a fresh one holding only `source`'s bytes
    pub(crate) fn replace_locked(&self, source: impl Read) -> Result<u64> {
        let entry = self.create()?;
        self.write_data(entry, source)
    }

    fn write_data(&self, mut entry: Entry, source: impl Read) -> Result<u64> {
        let written = entry
            .set_data(source)
            .map_err(|e| Error::file_write(&self.path, e))?;
        entry
            .close()
            .map_err(|e| Error::file_write(&self.path, e))?;
        Ok(written)
    }

    pub(crate) fn is_expired_locked(&self) -> Result<bool> {
        match self.expires_at_locked() {
            Ok(when) => Ok(when < Utc::now()),
            Err(e) => Err(Error::expiration_unavailable(&self.path, e)),
        }
    }

    fn expires_at_locked(&self) -> Result<DateTime<Utc>> {
        let mut entry = Entry::open_read(&self.path, Some(self.settings.signature))?;
        entry.expires_at()
    }

    pub(crate) fn set_expires_at_locked(&self, when: DateTime<Utc>) -> Result<()> {
        let mut entry = self.open_or_create()?;
        entry
            .set_expires_at(when)
            .map_err(|e| Error::file_write(&self.path, e))?;
        entry
            .close()
            .map_err(|e| Error::file_write(&self.path, e))
    }

    fn open_or_create(&self) -> Result<Entry> {
        if self.is_hit_locked() {
            let signature = Some(self.settings.signature);
            let entry = Entry::open(&self.path, OpenMode::ReadWrite, signature)
                .map_err(|e| Error::file_open(&self.path, e))?;
            return Ok(entry.with_chunk_size(self.settings.chunk_size));
        }
        self.create()
    }

    fn create(&self) -> Result<Entry> {
        let entry = Entry::create(
            &self.path,
            self.settings.file_mode,
            Some(self.settings.signature),
        )
        .map_err(|e| Error::file_write(&self.path, e))?;
        Ok(entry.with_chunk_size(self.settings.chunk_size))
    }
}
