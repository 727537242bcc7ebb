//! 📦 Common data structures — the building blocks of stash
//!
//! 🎬 COLD OPEN — INT. LOG PIPELINE — 3:47 AM
//!
//! A log line arrives. It knows which index it wants to live in. It knows what
//! it wants to say. It does not know it will spend the next 900 milliseconds in
//! a buffer, waiting for enough friends to show up to justify a bulk request.
//! Nobody tells the log line. The log line would not understand. 🦆
//!
//! This module holds the one struct that rides the whole pipeline: [`Document`].

/// 🎯 A single record on its way to the cluster: which index, and what body.
///
/// The body is already-serialized JSON. We never parse it. We never pretty-print it.
/// We staple an action line on top and ship it, like a postal worker who delivers
/// the mail without reading it. (Unlike your actual postal worker, Kevin.)
///
/// Immutable once built. Lives only between `write()` and the flush that eats it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// 📡 Destination index name.
    pub index: String,
    /// 📦 The raw JSON body, passed through byte-for-byte.
    pub body: String,
}

impl Document {
    pub fn new(index: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            body: body.into(),
        }
    }

    /// ⚖️ Weight of this document in the chunk buffer. The body length, same as the
    /// bulk request will feel it. The action line is a rounding error, so we ignore it.
    pub fn weight(&self) -> usize {
        self.body.len()
    }
}
