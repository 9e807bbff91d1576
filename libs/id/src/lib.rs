//! # nodeshare-id
//!
//! Names and identifiers shared by the orchestrator and its client parties.
//!
//! ## Design Principles
//!
//! - Names come from a version-controlled repository and end up in URLs,
//!   log lines and resource names, so every name passes a strict safe
//!   identifier check before a typed value exists
//! - Names are typed to prevent mixing node names with party names
//! - Reservation identifiers are plain monotonic integers, matching the
//!   numeric run ids carried by the protocol
//!
//! ## Safe identifiers
//!
//! A safe identifier is non-empty, has no leading or trailing whitespace, is
//! not `.` or `..`, and contains none of `?*/\%!@#$^&|<>[]:;` nor control
//! characters. Examples:
//! - `win1.acme.com` is accepted
//! - `Robert'; drop table STUDENTS;--` is rejected

mod error;
mod macros;
mod types;

pub use error::{IdError, NameError};
pub use types::*;

/// Characters that may never appear in a safe identifier.
pub const UNSAFE_CHARACTERS: &str = "?*/\\%!@#$^&|<>[]:;";

/// Check a candidate name against the safe identifier rules.
pub fn check_safe_name(name: &str) -> Result<(), NameError> {
    if name.trim().is_empty() {
        return Err(NameError::Empty);
    }

    if name.trim() != name {
        return Err(NameError::SurroundingWhitespace(name.to_string()));
    }

    if name == "." || name == ".." {
        return Err(NameError::Reserved(name.to_string()));
    }

    if let Some(ch) = name
        .chars()
        .find(|c| UNSAFE_CHARACTERS.contains(*c) || c.is_control())
    {
        return Err(NameError::UnsafeCharacter {
            name: name.to_string(),
            ch,
        });
    }

    Ok(())
}
