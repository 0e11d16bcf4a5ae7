//! Error taxonomy for the generation pipeline.
//!
//! Recoverable conditions (an empty retrieval, one parse strategy failing)
//! are handled locally with fallbacks and never reach this enum. What does
//! reach it is surfaced to the immediate caller of the operation: every
//! retry loop in the crate is bounded and has a defined behavior at
//! exhaustion (return partial for objectives, error for quizzes).

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No documents or no chunks could be produced for a course. Fatal to
    /// any operation that needs retrieval context.
    #[error("ingestion produced nothing from {dir:?}: {reason}")]
    Ingestion { dir: PathBuf, reason: String },

    /// An operation required a pre-built index that does not exist. Content
    /// and quiz generation never build implicitly; callers should surface
    /// this as "upload and index documents first".
    #[error("no vector index for course '{course_id}' at {path:?}; build it first")]
    IndexMissing { course_id: String, path: PathBuf },

    /// Index construction failed (ingestion yielded no chunks, or the store
    /// could not be written).
    #[error("failed to build index for course '{course_id}': {reason}")]
    IndexBuild { course_id: String, reason: String },

    /// Backend unreachable, a non-timeout HTTP error, or a malformed
    /// response. Aborts the current unit of work (one module).
    #[error("inference backend failure: {0}")]
    Inference(String),

    /// Model output could not be coerced into the expected structure after
    /// all parsing strategies. Re-attempts belong at the generator level.
    #[error("could not parse model output: {0}")]
    Parse(String),

    /// The schema-constrained quiz call failed or returned fewer questions
    /// than requested (including zero). Quizzes are all-or-nothing.
    #[error("quiz generation for '{module}' failed: {reason}")]
    Quiz { module: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

impl Error {
    pub fn inference(msg: impl Into<String>) -> Self {
        Error::Inference(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }
}
