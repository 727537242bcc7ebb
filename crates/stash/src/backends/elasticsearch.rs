//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The log shipper has been up all night. So has the cluster. Only one of them
//! is allowed to complain about it, and it's the one with the 429 status codes.
//!
//! 🚀 This module is the HTTP muscle: which host to talk to, how to prove who we are,
//! how to squish the bytes, and the two calls we ever make — `_cat/nodes` to ask how old
//! the cluster is, and `_bulk` to hand it a chunk of documents.
//!
//! 🧠 Knowledge graph:
//! - [`ElasticsearchConfig`]: hosts, auth, CA cert, compression, legacy doc type
//! - [`ElasticsearchClient`]: shared `reqwest::Client` + round-robin over hosts
//! - [`version_probe`]: is this cluster new enough?
//! - [`bulk_writer`]: the chunked writer that glues the executor to `_bulk`
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

pub(crate) mod bulk_writer;
pub(crate) mod version_probe;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, trace};

/// 📡 Everything we need to find and talk to the cluster.
///
/// 🔒 Auth is tri-modal: username+password, api_key, or "I hope anonymous works".
/// API key wins if both are set. This is not a democracy.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    /// 📡 One or more base URLs, scheme and port included. Requests rotate through them.
    pub hosts: Vec<String>,
    /// 🔒 Username. The bouncer at the club. Except the club is a database.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key — the velvet rope variant of authentication.
    #[serde(default)]
    pub api_key: Option<String>,
    /// 🔐 Path to a PEM file with the CA that signed the cluster's certificate.
    #[serde(default)]
    pub certs: Option<PathBuf>,
    /// 🏚️ Legacy document type. 8.x clusters don't do types, so this is logged and ignored.
    #[serde(default)]
    pub doc_type: Option<String>,
    /// 🫁 Gzip bulk bodies before sending.
    #[serde(default = "default_compress_request_body")]
    pub compress_request_body: bool,
    /// ⏱️ How long to wait for a TCP handshake before giving up on a host.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_compress_request_body() -> bool {
    true
}

// ⏱️ 10 seconds. if ES can't handshake in 10 seconds, it's not having a good time and neither are we.
fn default_connect_timeout_secs() -> u64 {
    10
}

impl ElasticsearchConfig {
    /// 🏗️ Minimal config pointing at the given hosts, everything else defaulted.
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            username: None,
            password: None,
            api_key: None,
            certs: None,
            doc_type: None,
            compress_request_body: default_compress_request_body(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// 📡 The HTTP side of the cluster. Cheap to clone, safe to share across tasks.
///
/// No overall request timeout on purpose: a bulk request runs until the cluster
/// answers or the connection dies. Only the connect phase is bounded.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    http: reqwest::Client,
    hosts: Arc<[String]>,
    next_host: Arc<AtomicUsize>,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
    compress_request_body: bool,
}

impl ElasticsearchClient {
    /// 🚀 Builds the client. Reads the CA certificate if one is configured.
    ///
    /// ⚠️ A configured certificate that cannot be read or parsed is an error, not a shrug.
    /// Quietly falling back to the default roots would be a security downgrade wearing a fake mustache.
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let hosts: Vec<String> = config
            .hosts
            .iter()
            .map(|host| host.trim().trim_end_matches('/').to_string())
            .filter(|host| !host.is_empty())
            .collect();
        if hosts.is_empty() {
            bail!("💀 No Elasticsearch hosts configured. We can't send documents to the void. We tried.");
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        if let Some(ref cert_path) = config.certs {
            let pem = std::fs::read(cert_path).with_context(|| {
                format!(
                    "💀 Unable to read CA certificate from '{}'. Refusing to continue without it, \
                     because 'TLS but trust whoever' is not a security posture.",
                    cert_path.display()
                )
            })?;
            let certificates = reqwest::Certificate::from_pem_bundle(&pem).with_context(|| {
                format!(
                    "💀 '{}' does not look like a PEM certificate bundle",
                    cert_path.display()
                )
            })?;
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
            debug!(path = %cert_path.display(), "🔐 Loaded CA certificate");
        }

        let http = builder
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a cursed certificate.")?;

        Ok(Self {
            http,
            hosts: hosts.into(),
            next_host: Arc::new(AtomicUsize::new(0)),
            username: config.username.clone(),
            password: config.password.clone(),
            api_key: config.api_key.clone(),
            compress_request_body: config.compress_request_body,
        })
    }

    /// 🔄 Round-robin over the configured hosts.
    fn next_host(&self) -> &str {
        let slot = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        &self.hosts[slot]
    }

    /// 🔒 Auth priority: API key wins over basic auth.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.api_key {
            request.header(AUTHORIZATION, format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.username {
            request.basic_auth(username, self.password.as_ref())
        } else {
            request
        }
    }

    /// 📋 `GET /_cat/nodes?h=version` — one version per line, one line per node.
    pub async fn cat_nodes_versions(&self) -> Result<String> {
        let url = format!("{}/_cat/nodes?h=version", self.next_host());
        let response = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("💀 Could not reach '{url}' to ask the cluster its age"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("💀 The node listing started answering and then trailed off mid-sentence")?;
        if !status.is_success() {
            bail!("💀 The node listing at '{url}' answered {status}: '{body}'");
        }
        trace!(%body, "📋 Node listing received");
        Ok(body)
    }

    /// 📡 `POST /_bulk` with an NDJSON body. Returns the decoded response JSON.
    ///
    /// Non-2xx statuses and undecodable bodies are errors. A 200 with `"errors": true`
    /// is NOT an error here; the caller reads the JSON and decides how sad to be.
    pub async fn bulk(&self, payload: String) -> Result<serde_json::Value> {
        let url = format!("{}/_bulk", self.next_host());
        let mut request = self
            .authorize(self.http.post(&url))
            // ⚠️ application/x-ndjson — not application/json. VERY important.
            .header(CONTENT_TYPE, "application/x-ndjson");

        let payload_len = payload.len();
        request = if self.compress_request_body {
            let compressed = gzip(payload.as_bytes())?;
            trace!(raw = payload_len, compressed = compressed.len(), "🫁 Squished the bulk body");
            request.header(CONTENT_ENCODING, "gzip").body(compressed)
        } else {
            request.body(payload)
        };

        let response = request
            .send()
            .await
            .with_context(|| format!("💀 The bulk request to '{url}' never made it. The network was not vibing with it."))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("💀 The bulk response started arriving and then ghosted us")?;
        if !status.is_success() {
            bail!("💀 The bulk request arrived, but Elasticsearch answered {status}: '{body}'");
        }

        serde_json::from_str(&body)
            .with_context(|| format!("💀 The bulk response is not JSON. It said: '{body}'"))
    }
}

/// 🫁 Gzip a byte slice. Default compression level, because we have opinions but not that many.
fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), Compression::default());
    encoder
        .write_all(bytes)
        .context("💀 Gzip refused the bytes")?;
    encoder.finish().context("💀 Gzip could not finish the job")
}
