//! Parsing of the `inject` annotation value.

use thiserror::Error;

/// Accepted spellings of the inject flag and the value each one means
const INJECT_FLAG_LITERALS: &[(&str, bool)] = &[
    ("1", true),
    ("t", true),
    ("T", true),
    ("TRUE", true),
    ("true", true),
    ("True", true),
    ("0", false),
    ("f", false),
    ("F", false),
    ("FALSE", false),
    ("false", false),
    ("False", false),
];

/// The inject annotation held something other than a boolean literal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InjectFlagError {
    #[error("invalid inject flag {0:?}: expected one of 1, t, T, TRUE, true, True, 0, f, F, FALSE, false, False")]
    Invalid(String),
}

/// Parse the inject annotation value against the literal table
pub fn parse_inject_flag(value: &str) -> Result<bool, InjectFlagError> {
    INJECT_FLAG_LITERALS
        .iter()
        .find(|(literal, _)| *literal == value)
        .map(|(_, flag)| *flag)
        .ok_or_else(|| InjectFlagError::Invalid(value.to_string()))
}
