//! Embedding provider and vector helpers.
//!
//! The chunker and the course index both go through the [`Embedder`]
//! trait, so tests can substitute a deterministic provider and the HTTP
//! client stays in one place.

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::config::EmbeddingConfig;

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn dimensions_hint(&self) -> Option<usize> {
        None
    }
}

/// OpenAI-compatible `/v1/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("building embedding HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v1/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "input": texts,
        });

        let mut attempt: u32 = 0;
        let resp = loop {
            attempt += 1;
            let result = self.client.post(&url).json(&body).send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        break resp;
                    }
                    // Retry rate limits and server errors, fail fast on
                    // everything else (bad request, auth).
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt >= self.config.max_retries {
                        let text = resp.text().await.unwrap_or_default();
                        bail!("embedding API error {}: {}", status, text);
                    }
                    tracing::warn!(status = %status, attempt, "embedding request failed, retrying");
                }
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        return Err(e).context("embedding request failed");
                    }
                    tracing::warn!(error = %e, attempt, "embedding request errored, retrying");
                }
            }
            let backoff = std::time::Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(backoff).await;
        };

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .context("parsing embedding API response")?;
        if parsed.data.len() != texts.len() {
            bail!(
                "embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            );
        }
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Serialize an f32 vector as little-endian bytes for BLOB storage.
pub fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Cosine distance, the breakpoint signal used by the semantic chunker.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
