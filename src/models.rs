//! Core data types that flow through the ingestion and generation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a chunk was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMethod {
    Semantic,
    CharacterFallback,
}

impl ChunkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkMethod::Semantic => "semantic",
            ChunkMethod::CharacterFallback => "character_fallback",
        }
    }
}

impl std::str::FromStr for ChunkMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(ChunkMethod::Semantic),
            "character_fallback" => Ok(ChunkMethod::CharacterFallback),
            other => Err(format!("unknown chunk method: {other}")),
        }
    }
}

/// A normalized document read from a course docs directory. Lives only
/// during index construction; discarded after chunking.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Deterministic id: SHA-256 of source path + content length.
    pub doc_id: String,
    pub filename: String,
    pub file_type: String,
    pub body: String,
    pub word_count: i64,
    pub char_count: i64,
    pub processed_at: DateTime<Utc>,
}

/// The unit of retrieval: a bounded span of normalized text with enough
/// provenance to cite its source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from the document id and chunk position.
    pub chunk_id: String,
    pub text: String,
    /// Source filename, kept for citation.
    pub source: String,
    pub file_type: String,
    /// Position among the chunks of the same document, starting at 0.
    pub chunk_index: i64,
    /// Total chunks produced from the same document.
    pub total_chunks: i64,
    pub method: ChunkMethod,
}

/// A validated learning objective for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningObjective {
    pub text: String,
    pub order: usize,
    pub module: String,
    /// False once a human edits the objective downstream.
    pub model_generated: bool,
}

/// One parsed section of generated module content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub body: String,
}

/// Generated content for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleContent {
    pub module_name: String,
    pub markdown: String,
    pub sections: Vec<Section>,
    pub learning_objectives: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Learner preference axes. Unknown values fall back to the documented
/// defaults at the serde boundary rather than failing deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DetailLevel {
    Detailed,
    #[default]
    Moderate,
    Brief,
}

impl From<String> for DetailLevel {
    fn from(s: String) -> Self {
        match s.as_str() {
            "detailed" => DetailLevel::Detailed,
            "brief" => DetailLevel::Brief,
            _ => DetailLevel::Moderate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", from = "String")]
pub enum ExplanationStyle {
    ExamplesHeavy,
    #[default]
    Conceptual,
    Practical,
    Visual,
}

impl From<String> for ExplanationStyle {
    fn from(s: String) -> Self {
        match s.as_str() {
            "examples-heavy" => ExplanationStyle::ExamplesHeavy,
            "practical" => ExplanationStyle::Practical,
            "visual" => ExplanationStyle::Visual,
            _ => ExplanationStyle::Conceptual,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Language {
    Simple,
    Technical,
    #[default]
    Balanced,
}

impl From<String> for Language {
    fn from(s: String) -> Self {
        match s.as_str() {
            "simple" => Language::Simple,
            "technical" => Language::Technical,
            _ => Language::Balanced,
        }
    }
}

/// The three preference axes read from the learner profile store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PreferenceSet {
    #[serde(default, rename = "DetailLevel")]
    pub detail_level: DetailLevel,
    #[serde(default, rename = "ExplanationStyle")]
    pub explanation_style: ExplanationStyle,
    #[serde(default, rename = "Language")]
    pub language: Language,
}

/// A single multiple-choice question in the schema-constrained quiz output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    /// 1-based, contiguous across the quiz.
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: String,
    pub question: String,
    /// Labeled option strings, e.g. `"A) Heap allocation"`.
    pub options: Vec<String>,
    /// Label of the correct option, e.g. `"A"`.
    pub correct_answer: String,
    pub explanation: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizMetadata {
    pub module_name: String,
    pub total_questions: usize,
    pub generated_at: DateTime<Utc>,
    pub num_questions_requested: usize,
    pub temperature: f64,
}

/// The packaged quiz artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_metadata: QuizMetadata,
    pub questions: Vec<QuizQuestion>,
}

/// Answer to a grounded chat query plus deduplicated source citations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<String>,
}
