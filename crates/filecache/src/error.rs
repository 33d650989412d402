//! Error types for the filecache crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error against an entry file or the cache directory
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(filecache::io),
        help("Check file permissions and ensure the cache directory exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "open", "read", "write")
        operation: String,
    },

    /// A fixed-size header field was given the wrong number of bytes
    #[error("Wrong {field} length: required {expected} bytes, passed {actual}")]
    #[diagnostic(code(filecache::entry::invalid_length))]
    InvalidLength {
        /// Name of the header field
        field: &'static str,
        /// Length the field requires
        expected: usize,
        /// Length that was passed
        actual: usize,
    },

    /// The stored payload does not hash to the stored checksum
    #[error("Data checksum mismatch in {}: stored {expected}, computed {actual}", path.display())]
    #[diagnostic(
        code(filecache::entry::checksum_mismatch),
        help("The entry is corrupted or was rewritten during the read; discard delivered bytes")
    )]
    ChecksumMismatch {
        /// Entry file path
        path: Box<Path>,
        /// Hex digest stored in the header
        expected: String,
        /// Hex digest computed over the payload
        actual: String,
    },

    /// The expiration field holds the "unset" sentinel
    #[error("Expiration is not set for {}", path.display())]
    #[diagnostic(code(filecache::entry::expiration_not_set))]
    ExpirationNotSet {
        /// Entry file path
        path: Box<Path>,
    },

    /// An expiration instant that the entry format cannot store or return
    #[error("Expiration timestamp {millis}ms is out of range")]
    #[diagnostic(
        code(filecache::entry::invalid_expiration),
        help("Expiration must be after the Unix epoch")
    )]
    InvalidExpiration {
        /// Milliseconds since the Unix epoch
        millis: i128,
    },

    /// The entry file for an item could not be opened
    #[error("File [{}] cannot be opened", path.display())]
    #[diagnostic(code(filecache::item::open))]
    FileOpen {
        /// Entry file path
        path: Box<Path>,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The payload of an item could not be read or verified
    #[error("File [{}] read error", path.display())]
    #[diagnostic(code(filecache::item::read))]
    FileRead {
        /// Entry file path
        path: Box<Path>,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The entry file for an item could not be created or written
    #[error("Cannot write into file [{}]", path.display())]
    #[diagnostic(code(filecache::item::write))]
    FileWrite {
        /// Entry file path
        path: Box<Path>,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Expiration could not be determined; this is not "never expires"
    #[error("Expiration data is not available for {}", path.display())]
    #[diagnostic(
        code(filecache::item::expiration_unavailable),
        help("The entry is missing, unreadable, or was stored without an expiration")
    )]
    ExpirationDataNotAvailable {
        /// Entry file path
        path: Box<Path>,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(filecache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub(crate) fn file_open(path: &Path, source: Self) -> Self {
        Self::FileOpen {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn file_read(path: &Path, source: Self) -> Self {
        Self::FileRead {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn file_write(path: &Path, source: Self) -> Self {
        Self::FileWrite {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn expiration_unavailable(path: &Path, source: Self) -> Self {
        Self::ExpirationDataNotAvailable {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping the item-level wrappers
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::FileOpen { source, .. }
            | Self::FileRead { source, .. }
            | Self::FileWrite { source, .. }
            | Self::ExpirationDataNotAvailable { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error (or its wrapped cause) is a payload checksum mismatch
    #[must_use]
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self.root_cause(), Self::ChecksumMismatch { .. })
    }

    /// Whether this error (or its wrapped cause) reports an unset expiration
    #[must_use]
    pub fn is_expiration_not_set(&self) -> bool {
        matches!(self.root_cause(), Self::ExpirationNotSet { .. })
    }

    /// Whether this error (or its wrapped cause) is an I/O "not found"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
