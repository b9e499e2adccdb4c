//! Deterministic identifiers derived from command text.
//!
//! A command's UID is the SHA-256 hex digest of its bytes. It is stable
//! across hosts and reboots and doubles as the filename stem for a
//! command's `.out`/`.err` logs (spec invariant: no two distinct commands
//! ever share a log).

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `text`.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// UID of a concrete (already unfolded) command.
pub fn command_uid(command: &str) -> String {
    sha256_hex(command)
}

/// Lowercase, ASCII-only slug of `text`: non-word characters dropped,
/// runs of whitespace/dashes collapsed to a single underscore. Mirrors
/// `original_source/smartdispatch/utils.py::slugify`.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut cleaned = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c.is_whitespace() {
            cleaned.push(c);
        }
    }

    let mut slug = String::with_capacity(cleaned.len());
    let mut last_was_sep = false;
    for c in cleaned.trim().chars() {
        if c.is_whitespace() || c == '-' {
            if !last_was_sep {
                slug.push('_');
                last_was_sep = true;
            }
        } else {
            slug.push(c);
            last_was_sep = false;
        }
    }
    slug
}

/// Batch-UID for a freshly launched batch: an invocation timestamp followed
/// by a slugified digest of the folded command, truncated so the whole
/// name never exceeds `max_length` characters (ground truth:
/// `generate_name_from_command(command, max_length=235)`).
pub fn batch_uid(timestamp: &str, command: &str, max_length: usize) -> String {
    let slug = slugify(command);
    let mut name = format!("{timestamp}_{slug}");
    if name.chars().count() > max_length {
        name = name.chars().take(max_length).collect();
    }
    name
}
