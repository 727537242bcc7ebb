//! 🎬 *[a channel fills with documents. somewhere, a buffer grows heavier.]*
//! *[the clock on the wall reads 2:47am. the ticker ticks anyway.]*
//!
//! ⏱️ The Executors module — home of [`ChunkExecutor`], the size-weighted batching primitive.
//!
//! Producers call [`ChunkExecutor::add`] with an item and its weight. A single background
//! task accumulates items until one of three things happens:
//! 1. the accumulated weight reaches `max_chunk_bytes` (checked right after each add),
//! 2. the `flush_interval` ticker fires while the buffer is non-empty,
//! 3. somebody calls [`ChunkExecutor::close`].
//!
//! Then the whole buffer is handed to the [`ChunkHandler`] in one piece, in arrival order.
//!
//! 🧠 Knowledge graph:
//! - Generic over `T`. No `Box<dyn Any>`, no runtime casts, no surprises.
//! - Flushes run one at a time on the background task. The channel is bounded,
//!   so a slow handler pushes back on producers instead of eating all the RAM.
//! - A handler `Err` stops the executor: the channel closes, later `add`s fail,
//!   and `close()` hands the error back. Whoever owns the handler decides whether
//!   an error is worth that.
//!
//! ⚠️ The singularity will batch its own writes. Until then, we have this module. 🦆

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace};

/// 🔧 Knobs for the chunk executor.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ChunkExecutorConfig {
    /// 📦 Flush once the buffered weight reaches this many bytes.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    /// ⏱️ Flush a non-empty buffer at least this often, in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// 🚰 How many items may wait in the channel before producers start waiting too.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// 📦 1MB — the chunk size that has been "good enough" since before this crate existed
fn default_max_chunk_bytes() -> usize {
    1024 * 1024
}

// ⏱️ one second. long enough to batch, short enough that nobody files a ticket about lag.
fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for ChunkExecutorConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: default_max_chunk_bytes(),
            flush_interval_ms: default_flush_interval_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ChunkExecutorConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_chunk_bytes == 0 {
            bail!("💀 max_chunk_bytes must be greater than zero. A zero-byte chunk is just a flush with extra steps.");
        }
        if self.flush_interval_ms == 0 {
            bail!("💀 flush_interval_ms must be greater than zero. The ticker refuses to spin infinitely fast.");
        }
        if self.queue_capacity == 0 {
            bail!("💀 queue_capacity must be greater than zero. A channel with no room is a wall.");
        }
        Ok(())
    }
}

/// 🚽 Whatever gets the buffered chunk when it is time to flush.
#[async_trait]
pub trait ChunkHandler<T>: Send + Sync + 'static {
    /// 📥 Consume one chunk. Items arrive in the order they were added.
    /// Returning `Err` stops the executor for good.
    async fn execute(&self, chunk: Vec<T>) -> Result<()>;
}

/// ⏱️ A size-weighted, interval-flushed batching buffer in front of a [`ChunkHandler`].
///
/// Cheap to clone: every clone feeds the same background task.
pub struct ChunkExecutor<T> {
    tx: Sender<(T, usize)>,
    task: Arc<Mutex<Option<JoinHandle<Result<()>>>>>,
}

impl<T> Clone for ChunkExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            task: Arc::clone(&self.task),
        }
    }
}

impl<T> std::fmt::Debug for ChunkExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkExecutor")
            .field("queued", &self.tx.len())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T: Send + 'static> ChunkExecutor<T> {
    /// 🚀 Spawns the background task and returns the handle producers write into.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<H: ChunkHandler<T>>(config: ChunkExecutorConfig, handler: H) -> Result<Self> {
        config.validate().context("💀 Refusing to start a chunk executor with a broken config")?;
        let (tx, rx) = async_channel::bounded(config.queue_capacity);
        let task = tokio::spawn(run_executor(rx, handler, config));
        Ok(Self {
            tx,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// 📥 Enqueue one item with its weight.
    ///
    /// Only fails if the executor is closed, either by `close()` or because the handler failed.
    pub async fn add(&self, item: T, weight: usize) -> Result<()> {
        self.tx
            .send((item, weight))
            .await
            .map_err(|_| anyhow!("💀 The chunk executor is closed. The buffer has left the building."))
    }

    /// 🗑️ Stops intake, flushes what is buffered, and waits for the background task.
    ///
    /// The first caller gets the task's result; later callers get `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        self.tx.close();
        let task = self.task.lock().await.take();
        match task {
            Some(task) => task
                .await
                .context("💀 The chunk executor task panicked or was cancelled")?,
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 🔄 The background loop: accumulate, flush on weight or tick, drain on close.
async fn run_executor<T, H: ChunkHandler<T>>(
    rx: Receiver<(T, usize)>,
    handler: H,
    config: ChunkExecutorConfig,
) -> Result<()> {
    let mut buffer: Vec<T> = Vec::new();
    let mut buffered_weight = 0usize;
    let mut ticker = tokio::time::interval(config.flush_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // -- the first tick completes immediately. we eat it so the first real flush waits a full interval.
    ticker.tick().await;

    debug!(?config, "⏱️ Chunk executor started");
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok((item, weight)) => {
                    buffer.push(item);
                    buffered_weight = buffered_weight.saturating_add(weight);
                    if buffered_weight >= config.max_chunk_bytes {
                        trace!(buffered_weight, "📦 Chunk is heavy enough, flushing");
                        flush(&handler, &rx, &mut buffer, &mut buffered_weight).await?;
                        ticker.reset();
                    }
                }
                Err(_) => {
                    // 🏁 channel closed and drained
                    flush(&handler, &rx, &mut buffer, &mut buffered_weight).await?;
                    debug!("🏁 Chunk executor drained and stopped");
                    return Ok(());
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    trace!(items = buffer.len(), "⏱️ Flush interval elapsed, flushing");
                    flush(&handler, &rx, &mut buffer, &mut buffered_weight).await?;
                }
            }
        }
    }
}

async fn flush<T, H: ChunkHandler<T>>(
    handler: &H,
    rx: &Receiver<(T, usize)>,
    buffer: &mut Vec<T>,
    buffered_weight: &mut usize,
) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    let chunk = std::mem::take(buffer);
    *buffered_weight = 0;
    if let Err(err) = handler.execute(chunk).await {
        // 💀 the handler said stop. we stop. producers find out on their next add.
        rx.close();
        error!(
            dropped = rx.len(),
            "💀 Chunk handler failed, chunk executor is shutting down: {err:#}"
        );
        return Err(err.context("💀 The chunk handler failed, so the chunk executor stopped"));
    }
    Ok(())
}
