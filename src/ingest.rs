//! Course document ingestion.
//!
//! Walks a course's document directory, extracts text from every
//! supported file, normalizes whitespace, and produces one
//! [`DocumentRecord`] per readable file. Individual file failures are
//! logged and skipped; ingestion only fails when a directory yields no
//! usable documents at all.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::extract::loaders_for_extension;
use crate::models::DocumentRecord;

/// Ingest every supported document under `dir`, recursively.
pub fn ingest_documents(dir: &Path) -> Result<Vec<DocumentRecord>> {
    if !dir.is_dir() {
        return Err(Error::Ingestion {
            dir: dir.to_path_buf(),
            reason: "not a directory".into(),
        });
    }

    let mut docs = Vec::new();
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for entry in walkdir::WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_ascii_lowercase(),
            None => {
                skipped += 1;
                continue;
            }
        };
        let Some(loaders) = loaders_for_extension(&ext) else {
            tracing::debug!(path = %path.display(), "unsupported extension, skipping");
            skipped += 1;
            continue;
        };

        match load_one(path, &ext, &loaders) {
            Some(doc) => docs.push(doc),
            None => failed += 1,
        }
    }

    if docs.is_empty() {
        return Err(Error::Ingestion {
            dir: dir.to_path_buf(),
            reason: format!(
                "no readable documents ({} skipped, {} failed)",
                skipped, failed
            ),
        });
    }
    tracing::info!(
        dir = %dir.display(),
        documents = docs.len(),
        skipped,
        failed,
        "ingestion complete"
    );
    Ok(docs)
}

fn load_one(path: &Path, ext: &str, loaders: &[crate::extract::Loader]) -> Option<DocumentRecord> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read file");
            return None;
        }
    };

    // Try each loader in order until one yields non-empty text.
    let mut body = None;
    for (name, load) in loaders {
        match load(&bytes) {
            Ok(text) if !text.trim().is_empty() => {
                body = Some(text);
                break;
            }
            Ok(_) => {
                tracing::debug!(path = %path.display(), loader = name, "loader yielded no text");
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), loader = name, error = %e, "loader failed");
            }
        }
    }
    let Some(body) = body else {
        tracing::warn!(path = %path.display(), "all loaders failed, skipping file");
        return None;
    };

    let body = normalize_whitespace(&body);
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(body.len().to_le_bytes());
    let doc_id = format!("{:x}", hasher.finalize());

    Some(DocumentRecord {
        doc_id,
        filename,
        file_type: ext.to_string(),
        word_count: body.split_whitespace().count() as i64,
        char_count: body.chars().count() as i64,
        body,
        processed_at: chrono::Utc::now(),
    })
}

/// Collapse runs of spaces and tabs, and cap blank-line runs at one.
pub fn normalize_whitespace(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"[ \t]+").unwrap());
    let blanks = BLANKS.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    let text = spaces.replace_all(text, " ");
    let text = blanks.replace_all(&text, "\n\n");
    text.trim().to_string()
}
