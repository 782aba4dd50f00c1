//! Tool output parsing and correlation.
//!
//! Parsers turn raw scanner output into records; the [`Correlator`] matches
//! each record to the target it describes and commits the whole batch in
//! one go. Nothing here aborts a batch over a single bad artifact or line
//! unless [`MalformedLinePolicy::FailFast`] asks for it: missing markers,
//! unrecognised artifact names and skipped lines are collected as
//! [`ParseAnomaly`] values and logged.

mod correlate;
pub mod exploit;
pub mod service_scan;

pub use correlate::{CorrelationError, CorrelationReport, Correlator};
pub use exploit::{ExploitParse, parse_exploit_line, parse_exploit_output};
pub use service_scan::{ArtifactName, ServiceBody, extract_service_body};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to do with an exploit line that fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedLinePolicy {
    /// Log a [`ParseAnomaly`] and continue with the next line.
    #[default]
    Skip,
    /// Fail the whole instance on the first malformed line.
    FailFast,
}

/// A record that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A required field is absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// The line does not follow the key:value record grammar.
    #[error("syntax error at column {column}: {reason}")]
    Syntax { column: usize, reason: String },
}

impl ParseError {
    pub(crate) fn syntax(column: usize, reason: impl Into<String>) -> Self {
        ParseError::Syntax {
            column,
            reason: reason.into(),
        }
    }
}

/// Non-fatal irregularity found while parsing tool output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAnomaly {
    /// No header line; the stored body is empty.
    #[error("{artifact}: start marker not found, storing empty body")]
    MissingStartMarker { artifact: String },

    /// Header found but no footer; the body runs to end of file.
    #[error("{artifact}: end marker not found, body runs to end of file")]
    MissingEndMarker { artifact: String },

    /// Bytes that are not UTF-8 were replaced while decoding.
    #[error("{artifact}: invalid UTF-8 replaced with U+FFFD")]
    InvalidEncoding { artifact: String },

    /// The artifact name does not carry an address and protocol.
    #[error("{artifact}: name does not match <prefix>.<address>-<protocol>.<ext>")]
    UnrecognisedArtifactName { artifact: String },

    /// A candidate line was skipped.
    #[error("{origin}: skipped malformed line ({error}): {line}")]
    MalformedLine {
        origin: String,
        line: String,
        error: ParseError,
    },
}
