//! Grammar for the `process-image` annotation value.
//!
//! A value is zero or more `process=image` pairs separated by commas, with an
//! optional trailing comma. Neither side of a pair may contain `=` or `,`.
//! The empty string is a valid value (no processes).

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// `(pair,)*pair?` where `pair = [^=,]+=[^=,]+`
const PROCESS_IMAGE_PATTERN: &str = r"^(?:[^=,]+=[^=,]+,)*(?:[^=,]+=[^=,]+)?$";

static PROCESS_IMAGE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(PROCESS_IMAGE_PATTERN).ok());

/// Compile the grammar ahead of the first request.
///
/// Returns false if the pattern failed to compile, in which case every
/// value is treated as malformed.
pub fn init() -> bool {
    PROCESS_IMAGE_RE.is_some()
}

/// Check whether `value` is a well-formed `process-image` annotation value
pub fn matches_process_image(value: &str) -> bool {
    PROCESS_IMAGE_RE
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

/// A single `process=image` entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessImage {
    /// Name of the monitored process
    pub process: String,
    /// Image the process runs from
    pub image: String,
}

/// Split a `process-image` value into its pairs, in order.
///
/// Callers are expected to have validated the value with
/// [`matches_process_image`]; segments without `=` are skipped.
pub fn parse_process_images(value: &str) -> Vec<ProcessImage> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(process, image)| ProcessImage {
            process: process.to_string(),
            image: image.to_string(),
        })
        .collect()
}
