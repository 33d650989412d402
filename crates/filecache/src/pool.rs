//! Cache pool: a directory of entry files
//!
//! The pool keeps no index of keys. Every lookup, listing and clear goes to
//! the filesystem, so the directory itself is the index and survives process
//! restarts. A file belongs to the pool only if it is a regular file whose
//! first bytes equal the pool's signature; anything else in the directory is
//! never reported, listed or deleted.

use crate::config::{EntrySettings, PoolBuilder};
use crate::entry::{Entry, Signature};
use crate::item::Item;
use crate::key::file_name_for_key;
use crate::lock::LockRegistry;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Directory-scoped cache.
///
/// Cloning is cheap and clones share the per-key locks, so at most one
/// operation runs against a given key's file at a time across all clones.
/// There is no locking across processes.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    dir: PathBuf,
    settings: Arc<EntrySettings>,
    locks: LockRegistry,
}

impl Pool {
    /// Create a pool over `dir` with default settings. Nothing is touched on
    /// disk.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_settings(dir.into(), EntrySettings::default())
    }

    /// Create a builder
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    pub(crate) fn with_settings(dir: PathBuf, settings: EntrySettings) -> Self {
        tracing::debug!(
            dir = %dir.display(),
            signature = ?settings.signature,
            "Opened cache pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                dir,
                settings: Arc::new(settings),
                locks: LockRegistry::default(),
            }),
        }
    }

    /// Cache directory path
    #[must_use]
    pub fn dir_path(&self) -> &Path {
        &self.inner.dir
    }

    /// Signature of this pool's entry files
    #[must_use]
    pub fn signature(&self) -> Signature {
        self.inner.settings.signature
    }

    fn new_item(&self, key: &[u8]) -> Item {
        let file_name = file_name_for_key(key);
        let lock = self.inner.locks.lock_for(&file_name);
        Item::new(
            key.to_vec(),
            self.inner.dir.join(file_name),
            Arc::clone(&self.inner.settings),
            lock,
        )
    }

    /// The item for `key`.
    ///
    /// Not a pure read: an existing entry whose expiration has passed is
    /// deleted before the item is returned.
    #[must_use]
    pub fn item(&self, key: impl AsRef<[u8]>) -> Item {
        let item = self.new_item(key.as_ref());
        {
            let _guard = item.lock();
            if item.is_hit_locked() && matches!(item.is_expired_locked(), Ok(true)) {
                match fs::remove_file(item.file_path()) {
                    Ok(()) => {
                        tracing::debug!(
                            path = %item.file_path().display(),
                            "Evicted expired cache entry"
                        );
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(
                            path = %item.file_path().display(),
                            "Failed to evict expired cache entry: {e}"
                        );
                    }
                }
            }
        }
        item
    }

    /// Whether the cache holds `key`. Evicts the entry first if it has
    /// expired.
    #[must_use]
    pub fn has_item(&self, key: impl AsRef<[u8]>) -> bool {
        self.item(key).is_hit()
    }

    /// Stream the value for `key` into `sink`
    ///
    /// # Errors
    ///
    /// Same as [`Item::get`]
    pub fn get(&self, key: impl AsRef<[u8]>, sink: impl Write) -> Result<u64> {
        self.item(key).get(sink)
    }

    /// Store `source` under `key`, expiring at `expires_at`.
    ///
    /// Any previous entry is replaced. The data is written first: if
    /// storing the expiration then fails, the error is returned but the new
    /// data stays on disk without an expiration.
    ///
    /// # Errors
    ///
    /// [`Error::FileWrite`] or [`Error::FileOpen`] with the underlying cause.
    /// The previous value is truncated before `source` is read, so a failed
    /// read leaves a partial payload behind and later reads of the key fail
    /// with [`Error::FileRead`] until it is stored again.
    pub fn put(
        &self,
        key: impl AsRef<[u8]>,
        source: impl Read,
        expires_at: DateTime<Utc>,
    ) -> Result<Item> {
        let item = self.new_item(key.as_ref());
        {
            let _guard = item.lock();
            let written = item.replace_locked(source)?;
            item.set_expires_at_locked(expires_at)?;
            tracing::debug!(
                path = %item.file_path().display(),
                bytes = written,
                expires_at = %expires_at,
                "Stored cache entry"
            );
        }
        Ok(item)
    }

    /// Store `source` under `key` with no expiration
    ///
    /// # Errors
    ///
    /// [`Error::FileWrite`] with the underlying cause. As with [`Self::put`],
    /// a failure while reading `source` destroys the previous value.
    pub fn put_forever(&self, key: impl AsRef<[u8]>, source: impl Read) -> Result<Item> {
        let item = self.new_item(key.as_ref());
        {
            let _guard = item.lock();
            let written = item.replace_locked(source)?;
            tracing::debug!(
                path = %item.file_path().display(),
                bytes = written,
                "Stored cache entry without expiration"
            );
        }
        Ok(item)
    }

    /// Remove the entry for `key`. Always `Ok(true)` on success.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the file does not exist or cannot be removed
    pub fn delete_item(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let item = self.new_item(key.as_ref());
        let _guard = item.lock();
        fs::remove_file(item.file_path())
            .map_err(|e| Error::io(e, item.file_path(), "remove"))?;
        tracing::debug!(path = %item.file_path().display(), "Deleted cache entry");
        Ok(true)
    }

    /// Delete every entry file in the directory, leaving foreign files alone.
    ///
    /// Best effort and not atomic: a failed delete does not stop the walk,
    /// and the last such failure is returned once it finishes.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the directory cannot be read or a delete failed
    pub fn clear(&self) -> Result<bool> {
        self.clear_with(|path| fs::remove_file(path))
    }

    /// [`Self::clear`] with the per-file delete supplied by the caller
    pub(crate) fn clear_with<F>(&self, mut remove: F) -> Result<bool>
    where
        F: FnMut(&Path) -> std::io::Result<()>,
    {
        let mut removed = 0usize;
        let mut last_err = None;

        for path in self.regular_files()? {
            let lock = self.inner.locks.lock_for(&lock_name(&path));
            let _guard = lock.lock();

            if !self.is_member(&path) {
                continue;
            }
            match remove(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to delete cache entry: {e}");
                    last_err = Some(Error::io(e, &path, "remove"));
                }
            }
        }

        tracing::debug!(dir = %self.inner.dir.display(), removed, "Cleared cache pool");
        last_err.map_or(Ok(true), Err)
    }

    /// Paths of every entry file currently in the directory
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the directory cannot be read
    pub fn cache_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = self.regular_files()?;
        files.retain(|path| self.is_member(path));
        files.sort();
        Ok(files)
    }

    /// Regular files directly inside the pool directory
    fn regular_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.inner.dir;
        let meta = fs::metadata(dir).map_err(|e| Error::io(e, dir, "read_dir"))?;
        if !meta.is_dir() {
            return Err(Error::io(
                std::io::Error::new(ErrorKind::NotADirectory, "cache path is not a directory"),
                dir,
                "read_dir",
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(Error::io(e.into(), dir, "read_dir"));
                }
                Err(e) => {
                    tracing::trace!("Skipping unreadable directory entry: {e}");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Whether `path` carries this pool's signature. Unreadable files are
    /// not members.
    fn is_member(&self, path: &Path) -> bool {
        let result = Entry::open_read(path, Some(self.inner.settings.signature))
            .and_then(|mut entry| entry.signature_matches());
        match result {
            Ok(matched) => matched,
            Err(e) => {
                tracing::trace!(path = %path.display(), "Skipping unreadable file: {e}");
                false
            }
        }
    }
}

fn lock_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_new_pool() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        assert_eq!(pool.dir_path(), temp.path());
        assert_eq!(pool.signature(), Signature::DEFAULT);
    }

    #[test]
    fn test_items_for_same_key_share_lock() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        let a = pool.item("foo");
        let b = pool.clone().item("foo");
        let other = pool.item("bar");

        assert!(a.shares_lock_with(&b));
        assert!(!a.shares_lock_with(&other));
    }

    #[test]
    fn test_separate_pools_do_not_share_locks() {
        let temp = TempDir::new().unwrap();
        let a = Pool::new(temp.path()).item("foo");
        let b = Pool::new(temp.path()).item("foo");
        assert!(!a.shares_lock_with(&b));
    }

    #[test]
    fn test_item_path_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        assert_eq!(pool.item("foo").file_path(), pool.item("foo").file_path());
        assert_ne!(pool.item("foo").file_path(), pool.item("bar").file_path());
        assert_eq!(
            pool.item("foo").file_path(),
            temp.path().join(file_name_for_key(b"foo"))
        );
    }

    #[test]
    fn test_put_replaces_previous_expiration() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        pool.put("k", &b"one"[..], Utc::now() + TimeDelta::seconds(60))
            .unwrap();

        let item = pool.put_forever("k", &b"two"[..]).unwrap();
        assert!(item.expires_at().is_none());

        let mut out = Vec::new();
        pool.get("k", &mut out).unwrap();
        assert_eq!(out, b"two");
    }

    #[test]
    fn test_item_evicts_expired_entry() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        let item = pool
            .put("short", &b"v"[..], Utc::now() + TimeDelta::milliseconds(5))
            .unwrap();
        let path = item.file_path().to_path_buf();
        drop(item);

        std::thread::sleep(Duration::from_millis(20));
        assert!(path.exists());
        assert!(!pool.item("short").is_hit());
        assert!(!path.exists());
    }

    #[test]
    fn test_delete_item() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        pool.put_forever("gone", &b"v"[..]).unwrap();

        assert!(pool.delete_item("gone").unwrap());
        assert!(!pool.has_item("gone"));

        let err = pool.delete_item("gone").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_clear_skips_foreign_files_and_dirs() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        pool.put_forever("a", &b"1"[..]).unwrap();
        pool.put_forever("b", &b"2"[..]).unwrap();
        fs::write(temp.path().join("stray.txt"), b"not a cache file").unwrap();
        fs::write(temp.path().join("tiny"), b"#/").unwrap();
        fs::create_dir(temp.path().join("subdir")).unwrap();

        assert_eq!(pool.cache_files().unwrap().len(), 2);
        assert!(pool.clear().unwrap());

        assert!(pool.cache_files().unwrap().is_empty());
        assert!(temp.path().join("stray.txt").exists());
        assert!(temp.path().join("tiny").exists());
        assert!(temp.path().join("subdir").is_dir());
    }

    #[test]
    fn test_clear_respects_custom_signature() {
        let temp = TempDir::new().unwrap();
        let default_pool = Pool::new(temp.path());
        let custom_pool = Pool::builder()
            .dir(temp.path())
            .signature(Signature::new(*b"OTHERSIG"))
            .build()
            .unwrap();

        default_pool.put_forever("a", &b"1"[..]).unwrap();
        custom_pool.put_forever("b", &b"2"[..]).unwrap();

        assert!(custom_pool.clear().unwrap());
        assert!(default_pool.has_item("a"));
        assert!(!custom_pool.has_item("b"));
    }

    #[test]
    fn test_clear_continues_after_failed_delete() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        let kept = pool.put_forever("kept", &b"1"[..]).unwrap();
        let gone = pool.put_forever("gone", &b"2"[..]).unwrap();
        let failing = kept.file_path().to_path_buf();

        let mut attempted = Vec::new();
        let err = pool
            .clear_with(|path| {
                attempted.push(path.to_path_buf());
                if path == failing {
                    Err(std::io::Error::from(ErrorKind::PermissionDenied))
                } else {
                    fs::remove_file(path)
                }
            })
            .unwrap_err();

        assert_eq!(attempted.len(), 2);
        assert!(!gone.file_path().exists());
        assert!(kept.file_path().exists());
        match err {
            Error::Io {
                operation, path, ..
            } => {
                assert_eq!(operation, "remove");
                assert_eq!(path.as_deref(), Some(failing.as_path()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clear_returns_last_failed_delete() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        for key in ["a", "b", "c"] {
            pool.put_forever(key, key.as_bytes()).unwrap();
        }

        let mut failed = Vec::new();
        let err = pool
            .clear_with(|path| {
                failed.push(path.to_path_buf());
                Err(std::io::Error::other("read-only"))
            })
            .unwrap_err();

        assert_eq!(failed.len(), 3);
        assert_eq!(pool.cache_files().unwrap().len(), 3);
        match err {
            Error::Io { path, .. } => {
                assert_eq!(path.as_deref(), failed.last().map(PathBuf::as_path));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clear_ignores_entries_removed_concurrently() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path());
        pool.put_forever("a", &b"1"[..]).unwrap();

        let result = pool.clear_with(|path| {
            fs::remove_file(path)?;
            Err(std::io::Error::from(ErrorKind::NotFound))
        });
        assert!(result.unwrap());
        assert!(pool.cache_files().unwrap().is_empty());
    }

    #[test]
    fn test_clear_missing_dir_fails() {
        let temp = TempDir::new().unwrap();
        let pool = Pool::new(temp.path().join("missing"));
        let err = pool.clear().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_clear_on_file_path_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, b"x").unwrap();
        let pool = Pool::new(&file);
        assert!(matches!(pool.clear(), Err(Error::Io { .. })));
    }
}
