//! coursesmith: retrieval-grounded course content generation.
//!
//! Course documents are ingested, chunked, embedded, and persisted into a
//! per-course vector index; learning objectives, module content, quizzes,
//! and chat answers are then generated against retrieved context through
//! an OpenAI-compatible inference backend.
//!
//! | module      | responsibility                                        |
//! |-------------|-------------------------------------------------------|
//! | `config`    | TOML configuration with per-component sections        |
//! | `error`     | error taxonomy shared across the pipeline             |
//! | `models`    | records exchanged between components                  |
//! | `extract`   | per-format text extraction (PDF, OOXML, markup, ...)  |
//! | `ingest`    | directory scan, loader cascade, normalization         |
//! | `chunk`     | semantic chunking with character fallback             |
//! | `embedding` | embedding provider trait, HTTP client, vector math    |
//! | `index`     | per-course SQLite vector index and retrieval          |
//! | `infer`     | completion/streaming client with timeout retries      |
//! | `parse`     | strategy-cascade parsing of model output              |
//! | `validate`  | objective validation and dedup                        |
//! | `logen`     | learning-objective generation                         |
//! | `modulegen` | module content generation                             |
//! | `quiz`      | quiz pipeline (generate, aggregate, save)             |
//! | `chat`      | grounded streaming chat                               |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod infer;
pub mod ingest;
pub mod logen;
pub mod models;
pub mod modulegen;
pub mod parse;
pub mod quiz;
pub mod validate;

pub use error::{Error, Result};
