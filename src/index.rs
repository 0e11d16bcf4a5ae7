//! Per-course vector index.
//!
//! Each course gets its own SQLite database under the index directory,
//! holding the ingested documents and their embedded chunks. Building is
//! idempotent: an existing populated index is reused as-is, and content
//! generation paths require the index to exist up front rather than
//! building one implicitly.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::{Error, Result};
use crate::ingest::ingest_documents;
use crate::models::{Chunk, ChunkMethod};

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

pub struct CourseIndex {
    course_id: String,
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for CourseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourseIndex")
            .field("course_id", &self.course_id)
            .finish_non_exhaustive()
    }
}

fn index_path(index_dir: &Path, course_id: &str) -> PathBuf {
    index_dir.join(course_id).join("index.sqlite")
}

/// Whether a persisted index exists for the course.
pub fn index_exists(index_dir: &Path, course_id: &str) -> bool {
    index_path(index_dir, course_id).is_file()
}

async fn open_pool(path: &Path, create: bool) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(Error::Store)?
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            doc_id       TEXT PRIMARY KEY,
            filename     TEXT NOT NULL,
            file_type    TEXT NOT NULL,
            word_count   INTEGER NOT NULL,
            char_count   INTEGER NOT NULL,
            processed_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id     TEXT PRIMARY KEY,
            doc_id       TEXT NOT NULL REFERENCES documents(doc_id),
            chunk_index  INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            source       TEXT NOT NULL,
            file_type    TEXT NOT NULL,
            method       TEXT NOT NULL,
            text         TEXT NOT NULL,
            embedding    BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id);
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

impl CourseIndex {
    /// Open an existing course index. Fails with [`Error::IndexMissing`]
    /// when no index has been built for the course.
    pub async fn open(
        config: &Config,
        course_id: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let path = index_path(&config.paths.index_dir, course_id);
        if !path.is_file() {
            return Err(Error::IndexMissing {
                course_id: course_id.to_string(),
                path,
            });
        }
        let pool = open_pool(&path, false).await?;
        Ok(Self {
            course_id: course_id.to_string(),
            pool,
            embedder,
        })
    }

    /// Open the course index, building it from the course's document
    /// directory when it does not exist yet. Building is all-or-nothing:
    /// a partially written index is removed on failure.
    pub async fn open_or_build(
        config: &Config,
        course_id: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let path = index_path(&config.paths.index_dir, course_id);
        if path.is_file() {
            let index = Self::open(config, course_id, embedder.clone()).await?;
            if index.chunk_count().await? > 0 {
                tracing::debug!(course_id, "reusing existing index");
                return Ok(index);
            }
            // Empty database left behind by an interrupted build.
            index.pool.close().await;
            std::fs::remove_file(&path)?;
        }

        let docs_dir = config.paths.docs_dir.join(course_id);
        match Self::build(config, course_id, &path, &docs_dir, embedder).await {
            Ok(index) => Ok(index),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }

    async fn build(
        config: &Config,
        course_id: &str,
        path: &Path,
        docs_dir: &Path,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        tracing::info!(course_id, docs_dir = %docs_dir.display(), "building course index");
        let docs = ingest_documents(docs_dir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pool = open_pool(path, true).await?;
        init_schema(&pool).await?;

        let mut total_chunks = 0usize;
        for doc in &docs {
            let chunks = chunk_document(doc, &config.chunking, embedder.as_ref()).await;
            if chunks.is_empty() {
                tracing::warn!(doc = %doc.filename, "document produced no chunks");
                continue;
            }

            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let mut embeddings = Vec::with_capacity(texts.len());
            for batch in texts.chunks(config.embedding.batch_size) {
                let vectors = embedder.embed(batch).await.map_err(|e| Error::IndexBuild {
                    course_id: course_id.to_string(),
                    reason: format!("embedding chunks of {}: {}", doc.filename, e),
                })?;
                embeddings.extend(vectors);
            }

            sqlx::query(
                "INSERT OR REPLACE INTO documents \
                 (doc_id, filename, file_type, word_count, char_count, processed_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&doc.doc_id)
            .bind(&doc.filename)
            .bind(&doc.file_type)
            .bind(doc.word_count)
            .bind(doc.char_count)
            .bind(doc.processed_at.to_rfc3339())
            .execute(&pool)
            .await?;

            for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
                sqlx::query(
                    "INSERT OR REPLACE INTO chunks \
                     (chunk_id, doc_id, chunk_index, total_chunks, source, file_type, method, text, embedding) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&chunk.chunk_id)
                .bind(&doc.doc_id)
                .bind(chunk.chunk_index)
                .bind(chunk.total_chunks)
                .bind(&chunk.source)
                .bind(&chunk.file_type)
                .bind(chunk.method.as_str())
                .bind(&chunk.text)
                .bind(vec_to_blob(embedding))
                .execute(&pool)
                .await?;
            }
            total_chunks += chunks.len();
        }

        if total_chunks == 0 {
            pool.close().await;
            return Err(Error::IndexBuild {
                course_id: course_id.to_string(),
                reason: "no chunks produced from course documents".into(),
            });
        }
        tracing::info!(course_id, documents = docs.len(), chunks = total_chunks, "index built");
        Ok(Self {
            course_id: course_id.to_string(),
            pool,
            embedder,
        })
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Retrieve the `top_k` chunks most similar to `text`, highest
    /// similarity first. Ties break on chunk index so results are stable.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed(std::slice::from_ref(&text.to_string()))
            .await
            .map_err(|e| Error::Inference(format!("embedding query: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Inference("embedder returned no vector for query".into()))?;

        let mut scored: Vec<ScoredChunk> = self
            .all_rows()
            .await?
            .into_iter()
            .map(|(chunk, embedding)| {
                let score = cosine_similarity(&query_vec, &embedding);
                ScoredChunk { chunk, score }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// All chunks without scores. Used by keyword-overlap fallback
    /// retrieval when embedding-based search is unavailable.
    pub async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self
            .all_rows()
            .await?
            .into_iter()
            .map(|(chunk, _)| chunk)
            .collect())
    }

    async fn all_rows(&self) -> Result<Vec<(Chunk, Vec<f32>)>> {
        let rows = sqlx::query(
            "SELECT chunk_id, chunk_index, total_chunks, source, file_type, method, text, embedding \
             FROM chunks ORDER BY source, chunk_index",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let method = row
                    .get::<String, _>("method")
                    .parse::<ChunkMethod>()
                    .unwrap_or(ChunkMethod::CharacterFallback);
                let chunk = Chunk {
                    chunk_id: row.get("chunk_id"),
                    text: row.get("text"),
                    source: row.get("source"),
                    file_type: row.get("file_type"),
                    chunk_index: row.get("chunk_index"),
                    total_chunks: row.get("total_chunks"),
                    method,
                };
                let embedding = blob_to_vec(&row.get::<Vec<u8>, _>("embedding"));
                (chunk, embedding)
            })
            .collect())
    }
}
