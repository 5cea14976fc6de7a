use anyhow::anyhow;

use crate::error::{LibError, Result};

pub const NICKNAME_MIN_CHARS: usize = 2;
pub const NICKNAME_MAX_CHARS: usize = 12;

/// A nickname reduced to its canonical forms: the display form with
/// surrounding and internal whitespace removed, and the lowercase form used
/// for case-insensitive directory matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedNickname {
    pub display: String,
    pub lower: String,
}

/// Canonicalizes a raw nickname without validating it. Whitespace is removed
/// everywhere, not just at the ends, so `"김 민수"` and `"김민수"` collide in
/// the directory.
pub fn normalize(raw: &str) -> NormalizedNickname {
    let display: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let lower = display.to_lowercase();
    NormalizedNickname { display, lower }
}

/// Normalizes and checks the nickname pattern: 2 to 12 characters, each an
/// ASCII letter, ASCII digit, or Korean syllable.
pub fn validate(raw: &str) -> Result<NormalizedNickname> {
    let normalized = normalize(raw);
    let char_count = normalized.display.chars().count();
    if !(NICKNAME_MIN_CHARS..=NICKNAME_MAX_CHARS).contains(&char_count) {
        return Err(LibError::invalid_with_code(
            "nickname_invalid",
            "Nickname must be 2 to 12 letters, digits, or Korean characters",
            anyhow!("nickname length {} outside allowed range", char_count),
        ));
    }

    if let Some(bad) = normalized.display.chars().find(|c| !is_allowed_char(*c)) {
        return Err(LibError::invalid_with_code(
            "nickname_invalid",
            "Nickname must be 2 to 12 letters, digits, or Korean characters",
            anyhow!("nickname contains disallowed character {:?}", bad),
        ));
    }

    Ok(normalized)
}

/// Uppercase-normalizes a friend invite code. Codes are issued out-of-core;
/// the only local requirement is that something was supplied.
pub fn normalize_invite_code(raw: &str) -> Result<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(LibError::invalid(
            "Invite code is required",
            anyhow!("empty invite code"),
        ));
    }
    Ok(code)
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('\u{AC00}'..='\u{D7A3}').contains(&c)
}
