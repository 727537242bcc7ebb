use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};
use tracing::trace;

// -- 📂 InputConfig — "It's just a file", said no sysadmin ever before the disk filled up.
// -- Lives here, close to the FileSource that actually uses it.
#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// 📂 Newline-delimited JSON, one document per line.
    pub file_name: String,
    /// 📡 Every document from this file lands in this index.
    pub index: String,
}

/// 📂 FileSource — reads an NDJSON file one line at a time.
///
/// Blank lines are skipped. Everything else is handed back untouched, minus its
/// line terminator. No parsing. The composer decides later whether a line is fit to ship.
#[derive(Debug)]
pub(crate) struct FileSource {
    lines: tokio::io::Lines<BufReader<File>>,
    lines_read: u64,
}

impl FileSource {
    /// 🚀 Opens the file. If it doesn't exist, anyhow will tell you with *theatrical flair*.
    pub(crate) async fn open(file_name: &str) -> Result<Self> {
        let file = File::open(file_name)
            .await
            .with_context(|| format!("💀 Could not open input file '{file_name}'. It exists in our hearts, but apparently not on disk."))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            lines_read: 0,
        })
    }

    /// 📦 Next non-blank line, or `None` once the file runs dry.
    pub(crate) async fn next_document(&mut self) -> Result<Option<String>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .context("💀 Failed to read a line from the input file")?
        {
            self.lines_read += 1;
            if line.trim().is_empty() {
                trace!(line = self.lines_read, "⏭️ Skipping blank line");
                continue;
            }
            return Ok(Some(line));
        }
        Ok(None)
    }

    pub(crate) fn lines_read(&self) -> u64 {
        self.lines_read
    }
}
