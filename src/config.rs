use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration. Each component receives its own immutable
/// section; course ids are call parameters everywhere, never config fields.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub inference: InferenceConfig,
    #[serde(default)]
    pub objectives: ObjectivesConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub quiz: QuizConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Where course documents live and where per-course indexes are persisted.
/// Both directories contain one subdirectory per course id.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub docs_dir: PathBuf,
    pub index_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./outputs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Ceiling for any chunk; semantic segments above this are re-split.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Target size for the character-window fallback splitter.
    #[serde(default = "default_char_chunk_size")]
    pub char_chunk_size: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Percentile of adjacent-sentence embedding distances above which a
    /// topic boundary is declared.
    #[serde(default = "default_breakpoint_percentile")]
    pub breakpoint_percentile: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            char_chunk_size: default_char_chunk_size(),
            overlap_chars: default_overlap_chars(),
            breakpoint_percentile: default_breakpoint_percentile(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    2000
}
fn default_char_chunk_size() -> usize {
    1500
}
fn default_overlap_chars() -> usize {
    200
}
fn default_breakpoint_percentile() -> f64 {
    85.0
}

/// Remote embedding endpoint (OpenAI-compatible `/embeddings`).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_emb_retries")]
    pub max_retries: u32,
    #[serde(default = "default_emb_timeout")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_emb_retries() -> u32 {
    5
}
fn default_emb_timeout() -> u64 {
    30
}

/// Chat-completion inference backend (OpenAI-compatible shape).
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_inf_timeout")]
    pub timeout_secs: u64,
    /// Retry budget for timeouts only; HTTP errors are never retried.
    #[serde(default = "default_inf_retries")]
    pub max_retries: u32,
    /// Model context window, used for the dynamic output-token budget.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_inf_timeout() -> u64 {
    300
}
fn default_inf_retries() -> u32 {
    2
}
fn default_context_window() -> usize {
    8192
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObjectivesConfig {
    #[serde(default = "default_n_los")]
    pub default_n_los: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_main_attempts")]
    pub max_main_attempts: u32,
    #[serde(default = "default_diversify_attempts")]
    pub max_diversify_attempts: u32,
    /// Consecutive zero-progress diversification attempts tolerated before
    /// the phase stops early.
    #[serde(default = "default_stall_limit")]
    pub stall_limit: u32,
    /// Token-overlap ratio above which two objectives count as duplicates.
    /// Kept configurable; 0.6 is inherited, not tuned.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,
    #[serde(default = "default_gen_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_gen_temperature")]
    pub temperature: f64,
}

impl Default for ObjectivesConfig {
    fn default() -> Self {
        Self {
            default_n_los: default_n_los(),
            top_k: default_top_k(),
            max_main_attempts: default_main_attempts(),
            max_diversify_attempts: default_diversify_attempts(),
            stall_limit: default_stall_limit(),
            overlap_threshold: default_overlap_threshold(),
            max_tokens: default_gen_max_tokens(),
            temperature: default_gen_temperature(),
        }
    }
}

fn default_n_los() -> usize {
    6
}
fn default_top_k() -> usize {
    5
}
fn default_main_attempts() -> u32 {
    10
}
fn default_diversify_attempts() -> u32 {
    15
}
fn default_stall_limit() -> u32 {
    3
}
fn default_overlap_threshold() -> f64 {
    0.6
}
fn default_gen_max_tokens() -> usize {
    800
}
fn default_gen_temperature() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_top_k_per_objective")]
    pub top_k_per_objective: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summarization_max_tokens: usize,
    #[serde(default = "default_summary_temperature")]
    pub summarization_temperature: f64,
    #[serde(default = "default_content_temperature")]
    pub generation_temperature: f64,
    /// Subtracted from the remaining window when budgeting output tokens.
    #[serde(default = "default_token_buffer")]
    pub token_buffer: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            top_k_per_objective: default_top_k_per_objective(),
            summarization_max_tokens: default_summary_max_tokens(),
            summarization_temperature: default_summary_temperature(),
            generation_temperature: default_content_temperature(),
            token_buffer: default_token_buffer(),
        }
    }
}

fn default_top_k_per_objective() -> usize {
    3
}
fn default_summary_max_tokens() -> usize {
    400
}
fn default_summary_temperature() -> f64 {
    0.3
}
fn default_content_temperature() -> f64 {
    0.5
}
fn default_token_buffer() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuizConfig {
    #[serde(default = "default_num_questions")]
    pub num_questions: usize,
    #[serde(default = "default_num_options")]
    pub num_options: usize,
    #[serde(default = "default_quiz_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_quiz_temperature")]
    pub temperature: f64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            num_questions: default_num_questions(),
            num_options: default_num_options(),
            retrieval_top_k: default_quiz_top_k(),
            temperature: default_quiz_temperature(),
        }
    }
}

fn default_num_questions() -> usize {
    10
}
fn default_num_options() -> usize {
    4
}
fn default_quiz_top_k() -> usize {
    3
}
fn default_quiz_temperature() -> f64 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chat_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_chat_temperature")]
    pub temperature: f64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            top_k: default_chat_top_k(),
            max_tokens: default_chat_max_tokens(),
            temperature: default_chat_temperature(),
        }
    }
}

fn default_chat_top_k() -> usize {
    4
}
fn default_chat_max_tokens() -> usize {
    2048
}
fn default_chat_temperature() -> f64 {
    0.3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chunk_chars == 0 {
        anyhow::bail!("chunking.max_chunk_chars must be > 0");
    }
    if config.chunking.char_chunk_size > config.chunking.max_chunk_chars {
        anyhow::bail!("chunking.char_chunk_size must not exceed chunking.max_chunk_chars");
    }
    if config.chunking.overlap_chars >= config.chunking.char_chunk_size {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.char_chunk_size");
    }
    if !(0.0..=100.0).contains(&config.chunking.breakpoint_percentile) {
        anyhow::bail!("chunking.breakpoint_percentile must be in [0, 100]");
    }
    if !(0.0..=1.0).contains(&config.objectives.overlap_threshold) {
        anyhow::bail!("objectives.overlap_threshold must be in [0.0, 1.0]");
    }
    if config.objectives.stall_limit == 0 {
        anyhow::bail!("objectives.stall_limit must be >= 1");
    }
    if config.quiz.num_questions == 0 {
        anyhow::bail!("quiz.num_questions must be >= 1");
    }
    if config.quiz.num_options < 2 {
        anyhow::bail!("quiz.num_options must be >= 2");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[paths]
docs_dir = "./data/docs"
index_dir = "./data/index"

[embedding]
base_url = "http://localhost:8002/v1"
model = "all-MiniLM-L6-v2"

[inference]
base_url = "http://localhost:8001/v1"
model = "qwen3-4b"
"#;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config(MINIMAL);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.max_chunk_chars, 2000);
        assert_eq!(cfg.objectives.default_n_los, 6);
        assert_eq!(cfg.objectives.max_main_attempts, 10);
        assert_eq!(cfg.objectives.max_diversify_attempts, 15);
        assert!((cfg.objectives.overlap_threshold - 0.6).abs() < 1e-9);
        assert_eq!(cfg.inference.context_window, 8192);
        assert_eq!(cfg.quiz.num_options, 4);
    }

    #[test]
    fn rejects_bad_overlap_threshold() {
        let body = format!("{MINIMAL}\n[objectives]\noverlap_threshold = 1.5\n");
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_overlap_larger_than_chunk() {
        let body = format!("{MINIMAL}\n[chunking]\nchar_chunk_size = 100\noverlap_chars = 100\n");
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }
}
