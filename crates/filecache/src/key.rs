//! Cache key to file name mapping

use sha2::{Digest, Sha256};

/// Extension of every entry file name
pub const FILE_EXTENSION: &str = "cache";

/// Length of every entry file name, extension included
pub const FILE_NAME_LEN: usize = 64 + 1 + FILE_EXTENSION.len();

/// Map an arbitrary key to its entry file name.
///
/// The name is the lowercase hex SHA-256 of the key plus `.cache`, so it is
/// filesystem-safe and has the same length for every key.
#[must_use]
pub fn file_name_for_key(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    format!("{}.{FILE_EXTENSION}", hex::encode(digest))
}
