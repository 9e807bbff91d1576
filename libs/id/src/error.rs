//! Error types for name and identifier validation.

use thiserror::Error;

/// Errors produced by the safe identifier check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name is empty or whitespace only.
    #[error("name cannot be empty")]
    Empty,

    /// The name is padded with whitespace.
    #[error("name '{0}' has leading or trailing whitespace")]
    SurroundingWhitespace(String),

    /// The name is reserved by the filesystem.
    #[error("name '{0}' is reserved")]
    Reserved(String),

    /// The name contains a character that is never allowed.
    #[error("name '{name}' contains unsafe character '{ch}'")]
    UnsafeCharacter { name: String, ch: char },
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID is not a non-negative integer.
    #[error("invalid id value '{0}'")]
    NotNumeric(String),
}
