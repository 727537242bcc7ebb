//! 🎬 *[documents pile up in a buffer. a ticker ticks. a threshold looms.]*
//! *["one more log line," says the producer. the buffer sighs and makes room.]*
//!
//! 📮 The BulkWriter — version-gated, chunked, fire-and-forget bulk indexing.
//!
//! ```text
//! write(index, body) → ChunkExecutor<Document> → BulkFlusher::execute_chunk → POST /_bulk
//!        ↑ errors only if the buffer is closed        ↓ FlushOutcome, logged, policy applied
//! ```
//!
//! 🧠 Knowledge graph:
//! - Construction probes `_cat/nodes` and refuses clusters older than 8.0.0 with
//!   [`crate::errors::UnsupportedVersionError`]. The library reports. The binary decides whether to die.
//! - Each flush produces a typed [`FlushOutcome`]: indexed, partial failure, or transport error.
//! - Partial failures (`"errors": true`) are logged in full and never retried.
//! - Transport errors are logged; under [`FlushPolicy::Abort`] they also stop the writer.
//! - Delivery is at-most-once. `write` never learns what happened to its document. 🦆

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::version_probe::{ensure_supported, probe_version};
use super::{ElasticsearchClient, ElasticsearchConfig};
use crate::common::Document;
use crate::composers::compose_bulk_payload;
use crate::executors::{ChunkExecutor, ChunkExecutorConfig, ChunkHandler};

/// 🚦 What a failed flush means for the rest of the run.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// 📝 Log transport errors and keep accepting writes. Best effort, as advertised.
    #[default]
    Continue,
    /// 💀 The first transport error stops the writer. `close()` returns it.
    Abort,
}

/// 🧾 The receipt for one flush attempt.
#[derive(Debug)]
pub enum FlushOutcome {
    /// 🗑️ Every document in the chunk failed to encode, so no request was sent.
    NothingToSend { skipped: usize },
    /// ✅ The cluster took everything it was sent.
    Indexed { documents: usize, skipped: usize },
    /// ⚠️ The request landed but the cluster reported `"errors": true`.
    PartialFailure {
        documents: usize,
        skipped: usize,
        response: serde_json::Value,
    },
    /// 💀 The request failed, got a non-2xx status, or came back undecodable.
    TransportError {
        documents: usize,
        skipped: usize,
        error: anyhow::Error,
    },
}

impl FlushOutcome {
    pub fn is_transport_error(&self) -> bool {
        matches!(self, FlushOutcome::TransportError { .. })
    }
}

/// 🚽 The flush callback: encode a chunk, send it, read the verdict.
#[derive(Debug)]
pub(crate) struct BulkFlusher {
    client: ElasticsearchClient,
    policy: FlushPolicy,
}

impl BulkFlusher {
    pub(crate) fn new(client: ElasticsearchClient, policy: FlushPolicy) -> Self {
        Self { client, policy }
    }

    /// 📡 One chunk in, one bulk request out, one [`FlushOutcome`] back.
    pub(crate) async fn execute_chunk(&self, chunk: Vec<Document>) -> FlushOutcome {
        let payload = compose_bulk_payload(&chunk);
        let (documents, skipped) = (payload.documents, payload.skipped);
        if payload.is_empty() {
            return FlushOutcome::NothingToSend { skipped };
        }

        debug!(documents, skipped, bytes = payload.body.len(), "📡 Flushing chunk to /_bulk");
        match self.client.bulk(payload.body).await {
            // -- only the top-level flag matters. missing means "no errors", anything but a bool is a decode failure.
            Ok(response) => match response.get("errors") {
                Some(serde_json::Value::Bool(true)) => FlushOutcome::PartialFailure {
                    documents,
                    skipped,
                    response,
                },
                None | Some(serde_json::Value::Bool(false)) => {
                    FlushOutcome::Indexed { documents, skipped }
                }
                Some(not_a_flag) => FlushOutcome::TransportError {
                    documents,
                    skipped,
                    error: anyhow!(
                        "💀 The bulk response has an 'errors' field, but it is {not_a_flag} instead of true or false"
                    ),
                },
            },
            Err(error) => FlushOutcome::TransportError {
                documents,
                skipped,
                error,
            },
        }
    }
}

#[async_trait]
impl ChunkHandler<Document> for Arc<BulkFlusher> {
    async fn execute(&self, chunk: Vec<Document>) -> Result<()> {
        match self.execute_chunk(chunk).await {
            FlushOutcome::NothingToSend { skipped } => {
                warn!(skipped, "🗑️ Every document in the chunk failed to encode, nothing sent");
                Ok(())
            }
            FlushOutcome::Indexed { documents, skipped } => {
                debug!(documents, skipped, "✅ Chunk indexed");
                Ok(())
            }
            FlushOutcome::PartialFailure {
                documents,
                skipped,
                response,
            } => {
                // ⚠️ logged for the humans, never retried, never surfaced to writers
                error!(documents, skipped, "⚠️ Bulk request reported errors: {response}");
                Ok(())
            }
            FlushOutcome::TransportError {
                documents,
                skipped,
                error,
            } => {
                error!(documents, skipped, "💀 Bulk request failed: {error:#}");
                match self.policy {
                    FlushPolicy::Continue => Ok(()),
                    FlushPolicy::Abort => Err(error.context(format!(
                        "💀 Flush policy is abort and a bulk request of {documents} documents failed"
                    ))),
                }
            }
        }
    }
}

/// 📮 The writer producers hold. Clone it freely, every clone feeds the same buffer.
#[derive(Debug, Clone)]
pub struct BulkWriter {
    inserter: ChunkExecutor<Document>,
    flusher: Arc<BulkFlusher>,
    version: String,
    doc_type: Option<String>,
}

impl BulkWriter {
    /// 🚀 Connect, check the cluster's age, and start the chunk executor.
    ///
    /// # Errors
    /// - the client cannot be built (no hosts, unreadable CA certificate)
    /// - the version probe fails (network, status, or an unparseable version)
    /// - the cluster is older than 8.0.0, as [`crate::errors::UnsupportedVersionError`]
    pub async fn new(
        config: &ElasticsearchConfig,
        chunk_config: ChunkExecutorConfig,
        policy: FlushPolicy,
    ) -> Result<Self> {
        let client = ElasticsearchClient::new(config)?;
        let version = probe_version(&client).await?;
        ensure_supported(&version).map_err(|unsupported| {
            error!(%version, "💀 {unsupported}");
            anyhow::Error::new(unsupported)
        })?;

        if let Some(ref doc_type) = config.doc_type {
            warn!(%doc_type, %version, "🏚️ doc_type is ignored, Elasticsearch 8+ has no mapping types");
        }

        let flusher = Arc::new(BulkFlusher::new(client, policy));
        let inserter = ChunkExecutor::start(chunk_config.clone(), Arc::clone(&flusher))?;
        info!(
            %version,
            max_chunk_bytes = chunk_config.max_chunk_bytes,
            ?policy,
            "📮 Bulk writer ready"
        );

        Ok(Self {
            inserter,
            flusher,
            version,
            doc_type: config.doc_type.clone(),
        })
    }

    /// 📥 Queue one document for `index`. Weighted by body length.
    ///
    /// Fails only if the writer is closed. Says nothing about whether the document
    /// will actually be indexed. That's between the flush and the cluster.
    pub async fn write(&self, index: impl Into<String>, body: impl Into<String>) -> Result<()> {
        let document = Document::new(index, body);
        let weight = document.weight();
        self.inserter.add(document, weight).await
    }

    /// 📡 Encode and send a chunk right now, bypassing the buffer. Returns the raw outcome
    /// so callers can pick their own retry, dead-letter, or abort story.
    pub async fn execute_chunk(&self, chunk: Vec<Document>) -> FlushOutcome {
        self.flusher.execute_chunk(chunk).await
    }

    /// 🗑️ Flush what's buffered and stop. Returns the flush error that stopped the writer,
    /// if the policy is [`FlushPolicy::Abort`] and one did.
    pub async fn close(&self) -> Result<()> {
        self.inserter.close().await
    }

    /// 🔢 The version the cluster reported at construction.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// 🏚️ The configured legacy doc type, never sent.
    pub fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    /// ✅ Whether bulk actions are sent without `_type`. Always true past the version gate.
    pub fn supports_typeless(&self) -> bool {
        super::version_probe::is_supported_version(&self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::errors::UnsupportedVersionError;

    async fn mock_cluster(version: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cat/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{version}\n")))
            .mount(&server)
            .await;
        server
    }

    fn plain_config(server: &MockServer) -> ElasticsearchConfig {
        let mut config = ElasticsearchConfig::new(vec![server.uri()]);
        config.compress_request_body = false;
        config
    }

    fn patient_chunks() -> ChunkExecutorConfig {
        // -- huge chunk, huge interval: only close() flushes
        ChunkExecutorConfig {
            max_chunk_bytes: 1024 * 1024,
            flush_interval_ms: 3_600_000,
            queue_capacity: 64,
        }
    }

    /// 🎙️ Records every event as (level, message) so a test can read the logs back.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<std::sync::Mutex<Vec<(tracing::Level, String)>>>);

    impl CapturedEvents {
        fn errors(&self) -> Vec<String> {
            self.0
                .lock()
                .map(|events| {
                    events
                        .iter()
                        .filter(|(level, _)| *level == tracing::Level::ERROR)
                        .map(|(_, message)| message.clone())
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CapturedEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut message = MessageField::default();
            event.record(&mut message);
            if let Ok(mut events) = self.0.lock() {
                events.push((*event.metadata().level(), message.0));
            }
        }
    }

    #[derive(Default)]
    struct MessageField(String);

    impl tracing::field::Visit for MessageField {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    /// 🎧 Routes this thread's events into a fresh [`CapturedEvents`] until the guard drops.
    fn capture_logs() -> (CapturedEvents, tracing::subscriber::DefaultGuard) {
        use tracing_subscriber::layer::SubscriberExt;

        let captured = CapturedEvents::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        (captured, tracing::subscriber::set_default(subscriber))
    }

    async fn bulk_bodies(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == "/_bulk")
            .map(|request| String::from_utf8_lossy(&request.body).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn the_one_where_a_7x_cluster_is_turned_away_before_any_write() -> Result<()> {
        let server = mock_cluster("7.10.0").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false})))
            .expect(0)
            .mount(&server)
            .await;

        let err = BulkWriter::new(&plain_config(&server), patient_chunks(), FlushPolicy::Continue)
            .await
            .expect_err("💀 a 7.x cluster must not get a writer");
        let unsupported = err
            .downcast_ref::<UnsupportedVersionError>()
            .expect("💀 the error should be the typed unsupported-version error");
        assert_eq!(unsupported.found, "7.10.0");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unreachable_cluster_fails_construction() {
        // -- port 1: reserved, closed, and deeply uninterested in our documents
        let config = ElasticsearchConfig::new(vec!["http://127.0.0.1:1".to_string()]);
        let result = BulkWriter::new(&config, patient_chunks(), FlushPolicy::Continue).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn the_one_where_writes_arrive_as_one_ordered_bulk_request() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = plain_config(&server);
        config.doc_type = Some("_doc".to_string());
        let writer = BulkWriter::new(&config, patient_chunks(), FlushPolicy::Continue).await?;
        assert_eq!(writer.version(), "8.3.1");
        assert!(writer.supports_typeless());
        assert_eq!(writer.doc_type(), Some("_doc"));

        writer.write("logs-a", r#"{"n":1}"#).await?;
        writer.write("logs-b", r#"{"n":2}"#).await?;
        writer.write("logs-a", r#"{"n":3}"#).await?;
        writer.close().await?;

        let bodies = bulk_bodies(&server).await;
        assert_eq!(bodies.len(), 1);
        assert_eq!(
            bodies[0],
            concat!(
                "{\"index\":{\"_index\":\"logs-a\"}}\n{\"n\":1}\n",
                "{\"index\":{\"_index\":\"logs-b\"}}\n{\"n\":2}\n",
                "{\"index\":{\"_index\":\"logs-a\"}}\n{\"n\":3}\n",
            )
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_chunk_threshold_splits_requests() -> Result<()> {
        let server = mock_cluster("8.12.0").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false})))
            .expect(2)
            .mount(&server)
            .await;

        let chunks = ChunkExecutorConfig {
            max_chunk_bytes: 16,
            ..patient_chunks()
        };
        let writer = BulkWriter::new(&plain_config(&server), chunks, FlushPolicy::Continue).await?;
        // -- 10 + 10 bytes crosses 16, the third document waits for close()
        writer.write("logs", r#"{"n":"aa"}"#).await?;
        writer.write("logs", r#"{"n":"bb"}"#).await?;
        writer.write("logs", r#"{"n":"cc"}"#).await?;
        writer.close().await?;

        let bodies = bulk_bodies(&server).await;
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0].lines().count(), 4);
        assert_eq!(bodies[1].lines().count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_bulk_body_gets_gzipped() -> Result<()> {
        let server = mock_cluster("8.0.0").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-encoding", "gzip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false})))
            .expect(1)
            .mount(&server)
            .await;

        let config = ElasticsearchConfig::new(vec![server.uri()]);
        let writer = BulkWriter::new(&config, patient_chunks(), FlushPolicy::Continue).await?;
        writer.write("logs", r#"{"squished":true}"#).await?;
        writer.close().await?;

        let requests = server.received_requests().await.unwrap_or_default();
        let bulk = requests
            .iter()
            .find(|request| request.url.path() == "/_bulk")
            .expect("💀 the bulk request never arrived");
        let mut unsquished = String::new();
        flate2::read::GzDecoder::new(bulk.body.as_slice()).read_to_string(&mut unsquished)?;
        assert_eq!(unsquished, "{\"index\":{\"_index\":\"logs\"}}\n{\"squished\":true}\n");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_errors_true_is_a_partial_failure_not_an_error() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [{"index": {"status": 400, "error": {"type": "mapper_parsing_exception"}}}]
            })))
            .mount(&server)
            .await;

        let writer = BulkWriter::new(&plain_config(&server), patient_chunks(), FlushPolicy::Abort).await?;
        let outcome = writer
            .execute_chunk(vec![Document::new("logs", r#"{"n":1}"#)])
            .await;
        match outcome {
            FlushOutcome::PartialFailure { documents, response, .. } => {
                assert_eq!(documents, 1);
                assert_eq!(response["items"][0]["index"]["status"], 400);
            }
            other => panic!("💀 expected a partial failure, got {other:?}"),
        }

        // -- even under Abort, a partial failure never stops the writer
        writer.write("logs", r#"{"n":2}"#).await?;
        writer.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_errors_false_is_just_indexed() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false})))
            .mount(&server)
            .await;

        let writer = BulkWriter::new(&plain_config(&server), patient_chunks(), FlushPolicy::Continue).await?;
        let outcome = writer
            .execute_chunk(vec![
                Document::new("logs", r#"{"n":1}"#),
                Document::new("NOT VALID", r#"{"n":2}"#),
            ])
            .await;
        assert!(matches!(outcome, FlushOutcome::Indexed { documents: 1, skipped: 1 }));
        writer.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_all_broken_chunk_sends_nothing() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false})))
            .expect(0)
            .mount(&server)
            .await;

        let writer = BulkWriter::new(&plain_config(&server), patient_chunks(), FlushPolicy::Continue).await?;
        let outcome = writer.execute_chunk(vec![Document::new("", "{}")]).await;
        assert!(matches!(outcome, FlushOutcome::NothingToSend { skipped: 1 }));
        writer.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_abort_policy_turns_a_500_into_a_stop() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(500).set_body_string("cluster is on fire"))
            .mount(&server)
            .await;

        let writer = BulkWriter::new(&plain_config(&server), patient_chunks(), FlushPolicy::Abort).await?;
        let outcome = writer
            .execute_chunk(vec![Document::new("logs", r#"{"n":1}"#)])
            .await;
        assert!(outcome.is_transport_error());

        writer.write("logs", r#"{"n":1}"#).await?;
        let err = writer.close().await.expect_err("💀 abort policy should surface the failure");
        assert!(format!("{err:#}").contains("cluster is on fire"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_continue_policy_shrugs_off_a_500() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(500).set_body_string("cluster is on fire"))
            .mount(&server)
            .await;

        let writer = BulkWriter::new(&plain_config(&server), patient_chunks(), FlushPolicy::Continue).await?;
        writer.write("logs", r#"{"n":1}"#).await?;
        writer.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_non_json_response_is_a_transport_error() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy says hi</html>"))
            .mount(&server)
            .await;

        let writer = BulkWriter::new(&plain_config(&server), patient_chunks(), FlushPolicy::Continue).await?;
        let outcome = writer
            .execute_chunk(vec![Document::new("logs", r#"{"n":1}"#)])
            .await;
        assert!(outcome.is_transport_error());
        writer.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_non_bool_errors_field_is_not_a_success() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": "maybe"})))
            .mount(&server)
            .await;

        let writer = BulkWriter::new(&plain_config(&server), patient_chunks(), FlushPolicy::Continue).await?;
        let outcome = writer
            .execute_chunk(vec![Document::new("logs", r#"{"n":1}"#)])
            .await;
        match outcome {
            FlushOutcome::TransportError { documents, error, .. } => {
                assert_eq!(documents, 1);
                assert!(format!("{error:#}").contains("\"maybe\""));
            }
            other => panic!("💀 expected a decode failure, got {other:?}"),
        }
        writer.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_errors_true_puts_the_whole_response_in_the_logs() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [{"index": {"status": 400, "error": {"type": "mapper_parsing_exception"}}}]
            })))
            .mount(&server)
            .await;

        let client = ElasticsearchClient::new(&plain_config(&server))?;
        let flusher = Arc::new(BulkFlusher::new(client, FlushPolicy::Continue));

        let (captured, _guard) = capture_logs();
        ChunkHandler::execute(&flusher, vec![Document::new("logs", r#"{"n":1}"#)]).await?;

        let errors = captured.errors();
        assert_eq!(errors.len(), 1, "one partial failure, one error line: {errors:?}");
        assert!(errors[0].contains(r#""errors":true"#));
        assert!(errors[0].contains(r#""status":400"#));
        assert!(errors[0].contains("mapper_parsing_exception"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_errors_false_keeps_the_error_log_quiet() -> Result<()> {
        let server = mock_cluster("8.3.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ElasticsearchClient::new(&plain_config(&server))?;
        let flusher = Arc::new(BulkFlusher::new(client, FlushPolicy::Continue));

        let (captured, _guard) = capture_logs();
        ChunkHandler::execute(&flusher, vec![Document::new("logs", r#"{"n":1}"#)]).await?;

        assert!(captured.errors().is_empty(), "🤫 {:?}", captured.errors());
        Ok(())
    }
}
