//! Quiz generation.
//!
//! A quiz is produced by a fixed sequence of stages sharing one mutable
//! state: generate questions, aggregate the quiz artifact, save it to
//! disk. A failing stage poisons the state and every later stage becomes
//! a no-op, so a quiz is either fully generated and saved or not
//! produced at all. Question generation is schema-constrained; output
//! that still fails to parse is a hard error, not something to retry
//! into shape.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::CourseIndex;
use crate::infer::{CompletionRequest, Generator};
use crate::logen::retrieve_context;
use crate::models::{Quiz, QuizMetadata, QuizQuestion};
use crate::parse::parse_quiz_questions;

struct QuizState {
    module_name: String,
    context: Vec<String>,
    questions: Vec<QuizQuestion>,
    quiz: Option<Quiz>,
    saved_to: Option<PathBuf>,
    error: Option<Error>,
}

impl QuizState {
    fn new(module_name: &str, context: Vec<String>) -> Self {
        Self {
            module_name: module_name.to_string(),
            context,
            questions: Vec::new(),
            quiz: None,
            saved_to: None,
            error: None,
        }
    }

    fn fail(&mut self, stage: &str, reason: impl std::fmt::Display) {
        tracing::error!(module = %self.module_name, stage, %reason, "quiz stage failed");
        self.error = Some(Error::Quiz {
            module: self.module_name.clone(),
            reason: format!("{}: {}", stage, reason),
        });
    }
}

/// JSON schema enforced on the question-generation call.
fn question_schema(num_questions: usize, num_options: usize) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "questions": {
                "type": "array",
                "minItems": num_questions,
                "maxItems": num_questions,
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer"},
                        "type": {"type": "string", "enum": ["multiple_choice"]},
                        "question": {"type": "string"},
                        "options": {
                            "type": "array",
                            "items": {"type": "string"},
                            "minItems": num_options,
                            "maxItems": num_options
                        },
                        "correct_answer": {"type": "string"},
                        "explanation": {"type": "string"},
                        "topic": {"type": "string"}
                    },
                    "required": ["id", "type", "question", "options",
                                 "correct_answer", "explanation", "topic"]
                }
            }
        },
        "required": ["questions"]
    })
}

/// Run the full quiz pipeline for one module. The quiz is written under
/// `output_dir/<course_id>/` on success.
pub async fn generate_quiz(
    config: &Config,
    index: &CourseIndex,
    generator: &dyn Generator,
    course_id: &str,
    module_name: &str,
) -> Result<Quiz> {
    let context = retrieve_context(index, module_name, config.quiz.retrieval_top_k).await;
    let mut state = QuizState::new(module_name, context);

    generate_questions(config, generator, &mut state).await;
    aggregate_quiz(config, &mut state);
    save_quiz(config, course_id, &mut state);

    if let Some(err) = state.error.take() {
        return Err(err);
    }
    let quiz = state
        .quiz
        .ok_or_else(|| Error::Quiz {
            module: module_name.to_string(),
            reason: "pipeline finished without producing a quiz".into(),
        })?;
    tracing::info!(
        module = module_name,
        questions = quiz.questions.len(),
        path = ?state.saved_to,
        "quiz generated"
    );
    Ok(quiz)
}

async fn generate_questions(config: &Config, generator: &dyn Generator, state: &mut QuizState) {
    if state.error.is_some() {
        return;
    }
    let n = config.quiz.num_questions;
    let prompt = format!(
        "Create a {n}-question multiple-choice quiz for the course module {module:?}.\n\n\
         Course material:\n{context}\n\n\
         Each question has {opts} options labeled \"A)\" through \"{last})\", a \
         correct_answer holding just the letter, a one-sentence explanation, and a \
         short topic tag. Base every question on the material above.\n\n\
         Respond with a JSON object: {{\"questions\": [...]}}.",
        module = state.module_name,
        context = if state.context.is_empty() {
            "No material retrieved; use the module title.".to_string()
        } else {
            state.context.join("\n---\n")
        },
        opts = config.quiz.num_options,
        last = option_label(config.quiz.num_options - 1),
    );
    let req = CompletionRequest::new(prompt, 4096, config.quiz.temperature)
        .no_think()
        .guided(question_schema(n, config.quiz.num_options));

    match generator.complete(&req).await {
        Ok(completion) => match parse_quiz_questions(&completion.text) {
            // All-or-nothing: a short set means the schema constraint was
            // not honored, and a partial quiz must never be saved.
            Ok(questions) if questions.len() != n => {
                state.fail(
                    "generate_questions",
                    format!("backend returned {} of {} questions", questions.len(), n),
                );
            }
            Ok(questions) => state.questions = questions,
            Err(e) => state.fail("generate_questions", e),
        },
        Err(e) => state.fail("generate_questions", e),
    }
}

fn option_label(index: usize) -> char {
    (b'A' + (index as u8).min(25)) as char
}

fn aggregate_quiz(config: &Config, state: &mut QuizState) {
    if state.error.is_some() {
        return;
    }
    state.quiz = Some(Quiz {
        quiz_metadata: QuizMetadata {
            module_name: state.module_name.clone(),
            total_questions: state.questions.len(),
            generated_at: Utc::now(),
            num_questions_requested: config.quiz.num_questions,
            temperature: config.quiz.temperature,
        },
        questions: std::mem::take(&mut state.questions),
    });
}

fn save_quiz(config: &Config, course_id: &str, state: &mut QuizState) {
    if state.error.is_some() {
        return;
    }
    let Some(quiz) = &state.quiz else {
        state.fail("save_quiz", "no quiz to save");
        return;
    };
    let dir = config.paths.output_dir.join(course_id);
    let path = dir.join(format!("{}_quiz.json", slugify(&state.module_name)));
    let result = std::fs::create_dir_all(&dir)
        .map_err(anyhow::Error::from)
        .and_then(|_| Ok(serde_json::to_string_pretty(quiz)?))
        .and_then(|body| Ok(std::fs::write(&path, body)?));
    match result {
        Ok(()) => state.saved_to = Some(path),
        Err(e) => state.fail("save_quiz", e),
    }
}

fn slugify(name: &str) -> String {
    let mut out: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_stream::wrappers::ReceiverStream;

    use crate::embedding::Embedder;
    use crate::infer::Completion;

    struct ScriptedGenerator {
        responses: Vec<Result<String>>,
        calls: AtomicUsize,
        saw_guided: std::sync::Mutex<bool>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
                saw_guided: std::sync::Mutex::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Generator for ScriptedGenerator {
        async fn complete(&self, req: &CompletionRequest) -> Result<Completion> {
            if req.guided_json.is_some() && req.suppress_reasoning {
                *self.saw_guided.lock().unwrap() = true;
            }
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            let idx = i.min(self.responses.len() - 1);
            match &self.responses[idx] {
                Ok(text) => Ok(Completion { text: text.clone() }),
                Err(_) => Err(Error::Inference("scripted failure".into())),
            }
        }

        async fn stream(&self, _req: &CompletionRequest) -> Result<ReceiverStream<String>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(ReceiverStream::new(rx))
        }
    }

    struct UnitEmbedder;

    #[async_trait::async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn test_fixture(root: &std::path::Path) -> (Config, CourseIndex) {
        let toml = format!(
            r#"
            [paths]
            docs_dir = "{root}/docs"
            index_dir = "{root}/index"
            output_dir = "{root}/out"

            [embedding]
            base_url = "http://localhost:9999"
            model = "test-embed"

            [inference]
            base_url = "http://localhost:9999"
            model = "test-model"

            [quiz]
            num_questions = 2
            "#,
            root = root.display()
        );
        let config: Config = toml::from_str(&toml).unwrap();
        let dir = config.paths.docs_dir.join("c1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("notes.txt"), "Rust ownership prevents data races.").unwrap();
        let index = CourseIndex::open_or_build(&config, "c1", Arc::new(UnitEmbedder))
            .await
            .unwrap();
        (config, index)
    }

    fn questions_json(n: usize) -> String {
        let qs: Vec<String> = (1..=n)
            .map(|id| {
                format!(
                    r#"{{"id": {id}, "type": "multiple_choice",
                        "question": "What does ownership prevent?",
                        "options": ["A) Data races", "B) Compilation", "C) Borrowing", "D) Lifetimes"],
                        "correct_answer": "A",
                        "explanation": "Ownership rules out shared mutable access.",
                        "topic": "ownership"}}"#
                )
            })
            .collect();
        format!(r#"{{"questions": [{}]}}"#, qs.join(","))
    }

    #[tokio::test]
    async fn successful_pipeline_saves_the_quiz() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = ScriptedGenerator::new(vec![Ok(questions_json(2))]);
        let quiz = generate_quiz(&config, &index, &gen, "c1", "Rust Ownership")
            .await
            .unwrap();
        assert_eq!(quiz.questions.len(), 2);
        assert_eq!(quiz.quiz_metadata.total_questions, 2);
        assert_eq!(quiz.quiz_metadata.num_questions_requested, 2);
        assert!(*gen.saw_guided.lock().unwrap());

        let saved = config
            .paths
            .output_dir
            .join("c1")
            .join("rust_ownership_quiz.json");
        let body = std::fs::read_to_string(saved).unwrap();
        let reloaded: Quiz = serde_json::from_str(&body).unwrap();
        assert_eq!(reloaded.questions.len(), 2);
    }

    #[tokio::test]
    async fn inference_failure_saves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = ScriptedGenerator::new(vec![Err(Error::Inference("down".into()))]);
        let err = generate_quiz(&config, &index, &gen, "c1", "Rust Ownership")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Quiz { .. }));
        assert!(!config.paths.output_dir.join("c1").exists());
    }

    #[tokio::test]
    async fn prose_output_is_a_hard_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen =
            ScriptedGenerator::new(vec![Ok("Sure, here is a quiz about ownership!".to_string())]);
        let err = generate_quiz(&config, &index, &gen, "c1", "Rust Ownership")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Quiz { .. }));
    }

    #[tokio::test]
    async fn short_question_set_saves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        // Requested 2, backend delivers 1.
        let gen = ScriptedGenerator::new(vec![Ok(questions_json(1))]);
        let err = generate_quiz(&config, &index, &gen, "c1", "Rust Ownership")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Quiz { .. }));
        assert!(err.to_string().contains("1 of 2"));
        assert!(!config.paths.output_dir.join("c1").exists());
    }

    #[tokio::test]
    async fn zero_questions_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = ScriptedGenerator::new(vec![Ok(r#"{"questions": []}"#.to_string())]);
        let err = generate_quiz(&config, &index, &gen, "c1", "Rust Ownership")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Quiz { .. }));
        assert!(!config.paths.output_dir.join("c1").exists());
    }

    #[test]
    fn slugify_flattens_names() {
        assert_eq!(slugify("Rust Ownership"), "rust_ownership");
        assert_eq!(slugify("  Module: 1 / Intro!  "), "module_1_intro");
        assert_eq!(slugify("simple"), "simple");
    }
}
