//! 🔌 Backends — where the real I/O happens.
//!
//! 📂 The file source pours documents in. 📡 Elasticsearch slurps them up.
//! And in between, we batch! (and we use anyhow, not panic)
//!
//! 🦆 The duck is here because every file must have one. This is law. Do not question the duck.

pub(crate) mod elasticsearch;
pub(crate) mod file_source;

// 🎯 Re-export so callers can do `backends::BulkWriter`
// instead of spelunking into `backends::elasticsearch::bulk_writer::BulkWriter`.
pub use elasticsearch::bulk_writer::{BulkWriter, FlushOutcome, FlushPolicy};
pub use elasticsearch::version_probe::{
    MINIMUM_SUPPORTED_VERSION, compare_versions, is_supported_version, parse_version,
};
pub use elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
pub use file_source::InputConfig;
