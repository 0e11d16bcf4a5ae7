//! Document chunking.
//!
//! The primary strategy is semantic: sentences are embedded, adjacent
//! cosine distances are computed, and a chunk boundary is placed wherever
//! the distance exceeds the configured percentile of all distances. When
//! embedding fails or the document is too short to segment, chunking
//! falls back to fixed-size character windows with overlap. Oversized
//! semantic chunks are re-split with the character strategy so no chunk
//! exceeds `max_chunk_chars`.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::embedding::{cosine_distance, Embedder};
use crate::models::{Chunk, ChunkMethod, DocumentRecord};

/// Chunk a document, preferring semantic segmentation.
///
/// Never returns an error: embedding failures downgrade to the character
/// strategy. An empty or whitespace-only body yields no chunks.
pub async fn chunk_document(
    doc: &DocumentRecord,
    config: &ChunkingConfig,
    embedder: &dyn Embedder,
) -> Vec<Chunk> {
    let body = doc.body.trim();
    if body.is_empty() {
        return Vec::new();
    }

    let (pieces, method) = match semantic_split(body, config, embedder).await {
        Ok(pieces) if !pieces.is_empty() => (pieces, ChunkMethod::Semantic),
        Ok(_) => (character_split(body, config), ChunkMethod::CharacterFallback),
        Err(e) => {
            tracing::warn!(
                doc = %doc.filename,
                error = %e,
                "semantic chunking failed, using character fallback"
            );
            (character_split(body, config), ChunkMethod::CharacterFallback)
        }
    };

    let total = pieces.len() as i64;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(doc, text, i as i64, total, method))
        .collect()
}

fn make_chunk(
    doc: &DocumentRecord,
    text: String,
    index: i64,
    total: i64,
    method: ChunkMethod,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(doc.doc_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    let chunk_id = format!("{:x}", hasher.finalize());
    Chunk {
        chunk_id,
        text,
        source: doc.filename.clone(),
        file_type: doc.file_type.clone(),
        chunk_index: index,
        total_chunks: total,
        method,
    }
}

async fn semantic_split(
    body: &str,
    config: &ChunkingConfig,
    embedder: &dyn Embedder,
) -> anyhow::Result<Vec<String>> {
    let sentences = split_sentences(body);
    if sentences.len() < 2 {
        // Nothing to segment; a single sentence goes through the
        // character splitter so the size cap still applies.
        return Ok(Vec::new());
    }

    let owned: Vec<String> = sentences.iter().map(|s| s.to_string()).collect();
    let mut embeddings = Vec::with_capacity(owned.len());
    for batch in owned.chunks(64) {
        embeddings.extend(embedder.embed(batch).await?);
    }

    let distances: Vec<f64> = embeddings
        .windows(2)
        .map(|w| cosine_distance(&w[0], &w[1]) as f64)
        .collect();
    let threshold = percentile(&distances, config.breakpoint_percentile);

    let mut groups: Vec<String> = Vec::new();
    let mut current = String::new();
    for (i, sentence) in sentences.iter().enumerate() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
        let boundary = i < distances.len() && distances[i] > threshold;
        if boundary {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    // Re-split any group that blew past the size cap.
    let mut out = Vec::new();
    for group in groups {
        if group.chars().count() > config.max_chunk_chars {
            out.extend(character_split(&group, config));
        } else {
            out.push(group);
        }
    }
    Ok(out)
}

/// Fixed-size character windows with overlap, preferring to break at
/// whitespace near the window edge.
pub fn character_split(body: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let size = config.char_chunk_size.max(1);
    let overlap = config.overlap_chars.min(size.saturating_sub(1));
    let step = size - overlap;

    let mut out = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            // Walk back to the nearest whitespace within the last 20% of
            // the window so words are not cut mid-way.
            let floor = start + size * 4 / 5;
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws;
            }
        }
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim().to_string();
        if !piece.is_empty() {
            out.push(piece);
        }
        if end >= chars.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { start + step };
    }
    out
}

/// Split on sentence-ending punctuation followed by whitespace, and on
/// blank lines. Short fragments are glued to their neighbor.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        let end_of_sentence = matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).map_or(true, |n| n.is_ascii_whitespace());
        let para_break = b == b'\n' && bytes.get(i + 1) == Some(&b'\n');
        if end_of_sentence || para_break {
            let slice = text[start..=i].trim();
            if !slice.is_empty() {
                out.push(slice);
            }
            start = i + 1;
        }
        i += 1;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Linear-interpolated percentile of an unsorted sample. `p` in 0..=100.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

    fn test_config() -> ChunkingConfig {
        ChunkingConfig {
            max_chunk_chars: 2000,
            char_chunk_size: 100,
            overlap_chars: 20,
            breakpoint_percentile: 85.0,
        }
    }

    struct FixedEmbedder {
        vectors: Vec<Vec<f32>>,
    }

    #[async_trait::async_trait]
    impl crate::embedding::Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            assert!(texts.len() <= self.vectors.len());
            Ok(self.vectors[..texts.len()].to_vec())
        }
    }

    struct FailingEmbedder;

    #[async_trait::async_trait]
    impl crate::embedding::Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding backend down")
        }
    }

    fn doc(body: &str) -> crate::models::DocumentRecord {
        crate::models::DocumentRecord {
            doc_id: "d1".into(),
            filename: "notes.txt".into(),
            file_type: "txt".into(),
            body: body.into(),
            word_count: body.split_whitespace().count() as i64,
            char_count: body.chars().count() as i64,
            processed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn sentence_split_on_punctuation_and_paragraphs() {
        let s = split_sentences("First sentence. Second one! Third?\n\nNew paragraph");
        assert_eq!(
            s,
            vec!["First sentence.", "Second one!", "Third?", "New paragraph"]
        );
    }

    #[test]
    fn percentile_interpolates() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&v, 50.0) - 2.5).abs() < 1e-9);
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 100.0), 4.0);
        assert_eq!(percentile(&[], 85.0), 0.0);
    }

    #[test]
    fn character_split_respects_size_and_overlap() {
        let cfg = test_config();
        let body = "word ".repeat(100);
        let pieces = character_split(&body, &cfg);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= cfg.char_chunk_size);
        }
        // Overlap means consecutive pieces share text.
        let first_tail: String = pieces[0].chars().rev().take(4).collect();
        assert!(!first_tail.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_falls_back_to_character_chunks() {
        let cfg = test_config();
        let d = doc(&"sentence one. sentence two. ".repeat(20));
        let chunks = chunk_document(&d, &cfg, &FailingEmbedder).await;
        assert!(!chunks.is_empty());
        assert!(chunks
            .iter()
            .all(|c| c.method == ChunkMethod::CharacterFallback));
    }

    #[tokio::test]
    async fn distinct_embeddings_create_semantic_boundaries() {
        let cfg = test_config();
        // Five near-identical vectors then one orthogonal outlier: the
        // single large adjacent distance sits above the 85th percentile,
        // so exactly one boundary is placed before the last sentence.
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let emb = FixedEmbedder {
            vectors: vec![a.clone(), a.clone(), a.clone(), a.clone(), a.clone(), b],
        };
        let d = doc("Alpha is first. Alpha continues here. Alpha goes on. Alpha again now. Alpha keeps going. Beta changes topic.");
        let chunks = chunk_document(&d, &cfg, &emb).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.contains("Beta"));
        assert!(chunks.iter().all(|c| c.method == ChunkMethod::Semantic));
        let total = chunks.len() as i64;
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.total_chunks, total);
        }
    }

    #[tokio::test]
    async fn empty_body_yields_no_chunks() {
        let cfg = test_config();
        let d = doc("   \n  ");
        let chunks = chunk_document(&d, &cfg, &FailingEmbedder).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn chunk_ids_are_unique() {
        let cfg = test_config();
        let d = doc(&"repeat me. ".repeat(50));
        let chunks = chunk_document(&d, &cfg, &FailingEmbedder).await;
        let mut ids: Vec<_> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), chunks.len());
    }
}
