//! 📮 stash — chunked, version-gated bulk indexing into Elasticsearch.
//!
//! ```text
//! FileSource ──lines──▶ BulkWriter::write ──▶ ChunkExecutor<Document> ──chunk──▶ POST /_bulk
//! ```
//!
//! The library never exits the process. An unsupported cluster comes back as
//! [`errors::UnsupportedVersionError`] and the binary decides what to do about it. 🦆

pub mod app_config;
pub mod backends;
pub mod common;
pub mod composers;
pub mod errors;
pub mod executors;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::BulkWriter;
use crate::backends::file_source::FileSource;

/// 🚀 Reads every document from the configured input and hands it to a [`BulkWriter`].
///
/// Returns once the input is exhausted and the last chunk has been flushed.
pub async fn run(app_config: AppConfig) -> Result<()> {
    let writer = BulkWriter::new(
        &app_config.elasticsearch,
        app_config.chunking.clone(),
        app_config.flush_policy,
    )
    .await
    .context("💀 Could not set up the bulk writer")?;

    let mut source = FileSource::open(&app_config.input.file_name).await?;
    let mut documents_written = 0u64;
    let feed_result: Result<()> = async {
        while let Some(document) = source.next_document().await? {
            writer
                .write(app_config.input.index.as_str(), document)
                .await
                .context("💀 The bulk writer stopped accepting documents")?;
            documents_written += 1;
        }
        Ok(())
    }
    .await;

    // 🗑️ close no matter what, so buffered documents get their shot and the task gets joined
    let close_result = writer.close().await;
    match (feed_result, close_result) {
        // 🧯 an aborted flush closes the writer first; the flush error is the cause, the feed error is the symptom
        (Err(feed_err), Err(close_err)) => {
            return Err(close_err.context(format!(
                "💀 The bulk writer failed while flushing, and the feed stopped with: {feed_err:#}"
            )));
        }
        (Err(feed_err), Ok(())) => return Err(feed_err),
        (Ok(()), close_result) => {
            close_result.context("💀 The bulk writer failed while flushing")?;
        }
    }

    info!(
        documents_written,
        lines_read = source.lines_read(),
        index = %app_config.input.index,
        "✅ Input exhausted, all chunks flushed"
    );
    Ok(())
}
