//! Pool configuration

use crate::entry::{DEFAULT_CHUNK_SIZE, DEFAULT_FILE_MODE, Signature};
use crate::pool::Pool;
use crate::{Error, Result};
use std::path::PathBuf;

/// Environment variable overriding the default cache directory
pub const CACHE_DIR_ENV: &str = "FILECACHE_DIR";

/// Settings applied to every entry file a pool opens or creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntrySettings {
    pub(crate) signature: Signature,
    pub(crate) file_mode: u32,
    pub(crate) chunk_size: usize,
}

impl Default for EntrySettings {
    fn default() -> Self {
        Self {
            signature: Signature::DEFAULT,
            file_mode: DEFAULT_FILE_MODE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Configuration builder for [`Pool`]
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    dir: Option<PathBuf>,
    settings: EntrySettings,
    create_dir: bool,
}

impl PoolBuilder {
    /// Creates a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache directory. When unset, [`default_cache_dir`] is used.
    #[must_use]
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Signature written to and expected from every entry file
    #[must_use]
    pub fn signature(mut self, signature: Signature) -> Self {
        self.settings.signature = signature;
        self
    }

    /// Permissions for newly created entry files (Unix only)
    #[must_use]
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.settings.file_mode = mode;
        self
    }

    /// Bytes per read/write when streaming payloads
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.settings.chunk_size = chunk_size;
        self
    }

    /// Create the directory given to [`Self::dir`] if it does not exist
    #[must_use]
    pub fn create_dir(mut self, create: bool) -> Self {
        self.create_dir = create;
        self
    }

    /// Build the pool
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk size is zero, the directory cannot be
    /// created, or no default directory is usable
    pub fn build(self) -> Result<Pool> {
        if self.settings.chunk_size == 0 {
            return Err(Error::configuration("chunk size must be non-zero"));
        }

        let dir = match self.dir {
            Some(dir) => {
                if self.create_dir {
                    std::fs::create_dir_all(&dir)
                        .map_err(|e| Error::io(e, &dir, "create_dir_all"))?;
                }
                dir
            }
            None => default_cache_dir()?,
        };

        Ok(Pool::with_settings(dir, self.settings))
    }
}

/// Inputs for determining the default cache directory
#[derive(Debug, Clone)]
struct DirInputs {
    override_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn default_dir_from_inputs(inputs: DirInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) FILECACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/filecache
    // 3) OS cache dir/filecache
    // 4) TMPDIR/filecache (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.override_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("filecache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("filecache"));
    }
    candidates.push(inputs.temp_dir.join("filecache"));

    for path in candidates {
        if path.exists() {
            let probe = path.join(".write_probe");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Cache directory not writable: {e}");
                    continue;
                }
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

fn non_empty_env(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Resolve (and create) the default cache directory
///
/// # Errors
///
/// Returns an error if none of the candidate directories is writable
pub fn default_cache_dir() -> Result<PathBuf> {
    let inputs = DirInputs {
        override_dir: non_empty_env(CACHE_DIR_ENV),
        xdg_cache_home: non_empty_env("XDG_CACHE_HOME"),
        os_cache_dir: dirs::cache_dir(),
        temp_dir: std::env::temp_dir(),
    };
    default_dir_from_inputs(inputs)
}
