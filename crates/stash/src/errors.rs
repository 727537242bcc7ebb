//! 🏷️ Typed errors — the ones callers are expected to `downcast_ref` and act on.
//!
//! Everything else in stash travels as `anyhow::Error` with a context chain.
//! These few get names because somebody upstream needs to make a decision about them:
//! "is the cluster too old?", "did this single record just not encode?".
//! Ancient proverb: "He who matches on error strings, greps in production." 🦆

use thiserror::Error;

/// 💀 The cluster answered, but it is from a previous era.
///
/// Returned by [`crate::backends::BulkWriter::new`] instead of killing the process.
/// The binary sees this, logs it, and exits. Libraries report. Binaries decide.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "💀 Elasticsearch version {found} is not supported, only >= {minimum} is. \
     Typed documents are so last major version."
)]
pub struct UnsupportedVersionError {
    /// 📡 What the cluster reported.
    pub found: String,
    /// 🎯 What we need.
    pub minimum: String,
}

/// 🔢 The version token could not be read as dotted numbers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("💀 The node listing came back empty. No version. No nodes. No vibes.")]
    Empty,
    #[error("💀 Version segment '{segment}' in '{version}' is not a number")]
    InvalidSegment { version: String, segment: String },
}

/// 📝 One record could not be turned into its two bulk lines.
///
/// Per-record and recoverable: the composer logs it, skips the record, and keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BulkEncodeError {
    #[error("💀 Index name '{index}' is not a valid Elasticsearch index name: {reason}")]
    InvalidIndexName { index: String, reason: &'static str },
    #[error("💀 Document body is empty. Elasticsearch does not index silence.")]
    EmptyBody,
    #[error("💀 Document body spans multiple lines, which would break NDJSON framing")]
    MultiLineBody,
    #[error("💀 Failed to serialize bulk action metadata: {0}")]
    Serialize(String),
}
