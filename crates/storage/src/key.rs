//! Storage key validation.
//!
//! Keys end up as file names for [`FileStore`](crate::backend::FileStore), so
//! they are restricted to a conservative character set that can never escape
//! the storage root.

use crate::error::{ErrorKind, Result};

const MAX_KEY_LENGTH: usize = 128;

/// Validates a storage key.
///
/// A valid key is 1 to 128 characters from `[A-Za-z0-9._-]` and does not start
/// with a dot (no hidden files, no `.` or `..`).
///
/// # Examples
///
/// ```
/// use moim_storage::validate_key;
/// assert!(validate_key("favorites").is_ok());
/// assert!(validate_key("auth-store").is_ok());
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key(".hidden").is_err());
/// assert!(validate_key("").is_err());
/// ```
pub fn validate(key: &str) -> Result<&str> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if key.is_empty() || key.len() > MAX_KEY_LENGTH || key.starts_with('.') || !key.chars().all(allowed) {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    Ok(key)
}
