//! 🎬 *[the buffer is full. the flush is near. the bulk API hungers.]*
//! *["Compose me," whispers the payload. "Two lines per document. Always two."]*
//!
//! 🎼 The Composers module — turning a chunk of [`Document`]s into one `_bulk` body.
//!
//! The bulk API has rules:
//! 1. Two lines per document. Action metadata, then document source. Always.
//! 2. Newline-delimited. Not comma-separated. Not XML. NEWLINES.
//! 3. The trailing newline on the whole body matters. It MATTERS.
//!
//! ```text
//! {"index":{"_index":"logs-a"}}
//! {"msg":"first"}
//! {"index":{"_index":"logs-b"}}
//! {"msg":"second"}
//! ```
//!
//! 🧠 Knowledge graph:
//! - Input: `&[Document]` in enqueue order
//! - Output: [`BulkPayload`] with the body plus how many docs made it in and how many got skipped
//! - A record that fails to encode is skipped with a `warn!`, never fatal to the batch
//!
//! 🦆 (the duck composes... symphonies? payloads? both? the duck has no comment.)

use serde_json::json;
use tracing::warn;

use crate::common::Document;
use crate::errors::BulkEncodeError;

// 📏 Elasticsearch refuses index names longer than 255 bytes. We refuse them first.
const MAX_INDEX_NAME_BYTES: usize = 255;

// 🚫 Characters the cluster will reject in an index name. We save it the trouble.
const FORBIDDEN_INDEX_CHARS: &[char] = &[
    '\\', '/', '*', '?', '"', '<', '>', '|', ',', '#', ':', ' ',
];

/// 📦 The assembled bulk body plus a small receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkPayload {
    /// 📡 NDJSON body, trailing `\n` included.
    pub body: String,
    /// ✅ Documents that made it into the body.
    pub documents: usize,
    /// 🗑️ Documents skipped because they could not be encoded.
    pub skipped: usize,
}

impl BulkPayload {
    pub fn is_empty(&self) -> bool {
        self.documents == 0
    }
}

/// 🔒 Checks an index name against the rules Elasticsearch enforces at index creation.
fn validate_index_name(index: &str) -> Result<(), BulkEncodeError> {
    let invalid = |reason| {
        Err(BulkEncodeError::InvalidIndexName {
            index: index.to_string(),
            reason,
        })
    };

    if index.is_empty() {
        return invalid("must not be empty");
    }
    if index.len() > MAX_INDEX_NAME_BYTES {
        return invalid("must be at most 255 bytes");
    }
    // 📅 `<logs-{now/d}>` is date math: the cluster resolves it, so only the wrapper gets checked
    if let Some(expression) = index.strip_prefix('<').and_then(|rest| rest.strip_suffix('>')) {
        if expression.is_empty() || expression.contains(['<', '>']) {
            return invalid("date math must be a single non-empty <...> expression");
        }
        return Ok(());
    }
    if index == "." || index == ".." {
        return invalid("must not be '.' or '..'");
    }
    if index.starts_with(['-', '_', '+']) {
        return invalid("must not start with '-', '_' or '+'");
    }
    if index.chars().any(|c| c.is_uppercase()) {
        return invalid("must be lowercase");
    }
    if index.contains(FORBIDDEN_INDEX_CHARS) {
        return invalid("must not contain \\ / * ? \" < > | , # : or spaces");
    }
    Ok(())
}

/// 📎 Builds the action line `{"index":{"_index":"<name>"}}` for one document.
///
/// No `_type`. The clusters we talk to are 8.x and up, and they stopped caring
/// about types around the same time everyone stopped caring about types.
pub fn encode_action_line(index: &str) -> Result<String, BulkEncodeError> {
    validate_index_name(index)?;
    let the_action_line = json!({ "index": { "_index": index } });
    serde_json::to_string(&the_action_line).map_err(|e| BulkEncodeError::Serialize(e.to_string()))
}

/// 📦 Normalizes a body for NDJSON: one trailing line terminator is forgiven,
/// anything multi-line is not.
pub fn encode_body_line(body: &str) -> Result<&str, BulkEncodeError> {
    let trimmed = body
        .strip_suffix('\n')
        .map(|b| b.strip_suffix('\r').unwrap_or(b))
        .unwrap_or(body);
    if trimmed.trim().is_empty() {
        return Err(BulkEncodeError::EmptyBody);
    }
    if trimmed.contains('\n') {
        return Err(BulkEncodeError::MultiLineBody);
    }
    Ok(trimmed)
}

/// 🎼 Composes a whole chunk into one `_bulk` body, in order, skipping the broken ones.
pub fn compose_bulk_payload(documents: &[Document]) -> BulkPayload {
    // 🧮 Pre-allocate: body bytes plus a generous guess for each action line
    let estimated_size: usize = documents.iter().map(|d| d.body.len() + d.index.len() + 32).sum();
    let mut payload = BulkPayload {
        body: String::with_capacity(estimated_size),
        ..BulkPayload::default()
    };

    for document in documents {
        let encoded = encode_action_line(&document.index)
            .and_then(|action| encode_body_line(&document.body).map(|body| (action, body)));
        match encoded {
            Ok((action, body)) => {
                payload.body.push_str(&action);
                payload.body.push('\n');
                payload.body.push_str(body);
                payload.body.push('\n');
                payload.documents += 1;
            }
            Err(err) => {
                // ⚠️ One bad apple does not spoil the bulk request
                warn!(index = %document.index, "🗑️ Skipping document that cannot be encoded: {err}");
                payload.skipped += 1;
            }
        }
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn the_one_where_n_documents_become_2n_lines_in_order() -> Result<()> {
        let the_docs = vec![
            Document::new("logs-a", r#"{"msg":"first"}"#),
            Document::new("logs-b", r#"{"msg":"second"}"#),
            Document::new("logs-a", r#"{"msg":"third"}"#),
        ];

        let the_payload = compose_bulk_payload(&the_docs);
        assert_eq!(the_payload.documents, 3);
        assert_eq!(the_payload.skipped, 0);
        assert!(the_payload.body.ends_with('\n'), "trailing newline is sacred");

        let the_lines: Vec<&str> = the_payload.body.lines().collect();
        assert_eq!(the_lines.len(), 6);
        for (i, doc) in the_docs.iter().enumerate() {
            let the_action: serde_json::Value = serde_json::from_str(the_lines[2 * i])?;
            assert_eq!(the_action["index"]["_index"], doc.index.as_str());
            assert_eq!(the_lines[2 * i + 1], doc.body);
        }
        Ok(())
    }

    #[test]
    fn the_one_where_a_broken_index_name_gets_skipped_not_the_batch() {
        let the_docs = vec![
            Document::new("logs", r#"{"n":1}"#),
            Document::new("Logs/NOPE", r#"{"n":2}"#),
            Document::new("logs", r#"{"n":3}"#),
        ];

        let the_payload = compose_bulk_payload(&the_docs);
        assert_eq!(the_payload.documents, 2);
        assert_eq!(the_payload.skipped, 1);
        assert_eq!(
            the_payload.body,
            "{\"index\":{\"_index\":\"logs\"}}\n{\"n\":1}\n{\"index\":{\"_index\":\"logs\"}}\n{\"n\":3}\n"
        );
    }

    #[test]
    fn the_one_where_multiline_and_empty_bodies_are_turned_away() {
        let the_docs = vec![
            Document::new("logs", "{\n\"pretty\": true\n}"),
            Document::new("logs", "   "),
            Document::new("logs", "{\"ok\":true}\r\n"),
        ];

        let the_payload = compose_bulk_payload(&the_docs);
        assert_eq!(the_payload.documents, 1);
        assert_eq!(the_payload.skipped, 2);
        assert_eq!(the_payload.body, "{\"index\":{\"_index\":\"logs\"}}\n{\"ok\":true}\n");
    }

    #[test]
    fn the_one_where_index_names_meet_the_bouncer() {
        assert!(encode_action_line("logs-2024.01.01").is_ok());
        assert!(encode_action_line("").is_err());
        assert!(encode_action_line("..").is_err());
        assert!(encode_action_line("_internal").is_err());
        assert!(encode_action_line("has space").is_err());
        assert!(encode_action_line("UPPER").is_err());
        assert!(encode_action_line(&"a".repeat(256)).is_err());
        assert!(encode_action_line(&"a".repeat(255)).is_ok());
        assert!(encode_action_line("logs:2024").is_err());
        assert!(encode_action_line("logs<2024").is_err());
    }

    #[test]
    fn the_one_where_date_math_gets_waved_through() {
        let the_action_line = encode_action_line("<logs-{now/d}>").expect("💀 date math is a real target");
        assert_eq!(the_action_line, r#"{"index":{"_index":"<logs-{now/d}>"}}"#);
        assert!(encode_action_line("<logs-{now/d{yyyy.MM.dd}}>").is_ok());
        assert!(encode_action_line("<>").is_err());
        assert!(encode_action_line("<logs-{now/d}").is_err());
        assert!(encode_action_line("<a><b>").is_err());
    }

    #[test]
    fn the_one_where_an_empty_chunk_composes_to_nothing() {
        let the_payload = compose_bulk_payload(&[]);
        assert!(the_payload.is_empty());
        assert_eq!(the_payload.body, "");
    }
}
