//! Slug allocation primitives
//!
//! Random slugs are 7 characters of URL-safe base64 drawn from the thread-local
//! CSPRNG. Custom slugs are normalised to lower case and checked against the
//! allowed alphabet, the length bounds and the reserved word list.

use base64::prelude::*;
use thiserror::Error;

pub const RANDOM_SLUG_LEN: usize = 7;
pub const MIN_CUSTOM_SLUG_LEN: usize = 3;
pub const MAX_CUSTOM_SLUG_LEN: usize = 30;

/// Paths owned by the application itself; anonymous callers cannot claim them.
pub const RESERVED_SLUGS: &[&str] = &[
    "admin",
    "adminek",
    "not-found",
    "kinter",
    "me",
    "my",
    "api",
    "health",
    "expired",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("Custom slug must be between 3 and 30 characters")]
    InvalidLength,
    #[error("Custom slug can only contain letters, numbers, hyphens and underscores")]
    InvalidCharacters,
    #[error("This slug is reserved")]
    Reserved,
}

pub fn is_reserved(slug: &str) -> bool {
    RESERVED_SLUGS.contains(&slug)
}

/// Generate a random 7 character slug that is not a reserved word.
///
/// Uniqueness is not checked here; the store's unique constraint decides.
pub fn generate_slug() -> String {
    loop {
        let bytes: [u8; 6] = rand::random();
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(bytes);
        let slug: String = encoded
            .chars()
            .filter(|c| !matches!(c, '+' | '/' | '='))
            .take(RANDOM_SLUG_LEN)
            .collect();

        if slug.len() == RANDOM_SLUG_LEN && !is_reserved(&slug) {
            return slug;
        }
    }
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Lower-case, trim and validate a caller-supplied slug.
///
/// Admins may claim reserved words; everything else applies to both caller classes.
pub fn normalize_custom_slug(raw: &str, is_admin: bool) -> Result<String, SlugError> {
    let slug = raw.trim().to_lowercase();

    let len = slug.chars().count();
    if !(MIN_CUSTOM_SLUG_LEN..=MAX_CUSTOM_SLUG_LEN).contains(&len) {
        return Err(SlugError::InvalidLength);
    }

    if !slug.chars().all(is_slug_char) {
        return Err(SlugError::InvalidCharacters);
    }

    if !is_admin && is_reserved(&slug) {
        return Err(SlugError::Reserved);
    }

    Ok(slug)
}
