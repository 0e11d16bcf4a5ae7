//! Learning-objective generation.
//!
//! Objectives are generated against retrieved course context in two
//! phases driven by one retry loop: a main phase that asks for the full
//! set, then a diversification phase that rotates focus areas and steers
//! the model away from verbs it has already used. Parse failures burn an
//! attempt; inference failures abort. Ending up with fewer objectives
//! than requested, even none, is a normal terminal state.

use crate::config::Config;
use crate::error::Result;
use crate::index::CourseIndex;
use crate::infer::{CompletionRequest, Generator};
use crate::models::LearningObjective;
use crate::parse::parse_objectives;
use crate::validate::{token_overlap, ObjectiveValidator};

/// Topic angles cycled through during diversification.
const FOCUS_AREAS: &[&str] = &[
    "theoretical foundations and principles",
    "mathematical analysis and derivations",
    "conceptual understanding and interpretation",
    "comparison and evaluation of different approaches",
    "application of theories and methods",
];

struct Phase {
    name: &'static str,
    max_attempts: u32,
    diversify: bool,
    stall_limit: Option<u32>,
}

pub async fn generate_objectives(
    config: &Config,
    index: &CourseIndex,
    generator: &dyn Generator,
    module_name: &str,
    n_objectives: usize,
) -> Result<Vec<LearningObjective>> {
    let n = if n_objectives == 0 {
        config.objectives.default_n_los
    } else {
        n_objectives
    };
    let context = retrieve_context(index, module_name, config.objectives.top_k).await;
    let validator = ObjectiveValidator::new(config.objectives.overlap_threshold);

    let phases = [
        Phase {
            name: "main",
            max_attempts: config.objectives.max_main_attempts,
            diversify: false,
            stall_limit: None,
        },
        Phase {
            name: "diversify",
            max_attempts: config.objectives.max_diversify_attempts,
            diversify: true,
            stall_limit: Some(config.objectives.stall_limit),
        },
    ];

    let mut kept: Vec<String> = Vec::new();
    'phases: for phase in &phases {
        if kept.len() >= n {
            break;
        }
        let mut stalls = 0u32;
        for attempt in 1..=phase.max_attempts {
            let missing = n - kept.len();
            let prompt = if phase.diversify {
                let focus = FOCUS_AREAS[(attempt as usize - 1) % FOCUS_AREAS.len()];
                diversify_prompt(module_name, &context, missing, focus, &kept)
            } else {
                main_prompt(module_name, &context, missing)
            };

            let req = CompletionRequest::new(
                prompt,
                config.objectives.max_tokens,
                config.objectives.temperature,
            )
            .no_think();
            // Inference failures abort; a parse failure just burns the
            // attempt.
            let completion = generator.complete(&req).await?;
            let added = match parse_objectives(&completion.text) {
                Ok(candidates) => {
                    let new = validator.filter_new(&candidates, &kept);
                    let count = new.len();
                    kept.extend(new);
                    count
                }
                Err(e) => {
                    tracing::warn!(
                        phase = phase.name,
                        attempt,
                        error = %e,
                        "attempt produced unparseable output"
                    );
                    0
                }
            };
            tracing::debug!(
                phase = phase.name,
                attempt,
                added,
                total = kept.len(),
                "objective generation attempt"
            );

            if kept.len() >= n {
                break 'phases;
            }
            if added == 0 {
                stalls += 1;
                if phase.stall_limit.is_some_and(|limit| stalls >= limit) {
                    tracing::info!(
                        phase = phase.name,
                        stalls,
                        "no progress, stopping phase early"
                    );
                    break;
                }
            } else {
                stalls = 0;
            }
        }
    }

    // Exhaustion with fewer than requested, even zero, is a normal
    // terminal state; callers decide what an empty set means for them.
    if kept.len() < n {
        tracing::warn!(
            module = module_name,
            produced = kept.len(),
            requested = n,
            "returning partial objective set"
        );
    }
    kept.truncate(n);
    Ok(kept
        .into_iter()
        .enumerate()
        .map(|(i, text)| LearningObjective {
            text,
            order: i + 1,
            module: module_name.to_string(),
            model_generated: true,
        })
        .collect())
}

/// Retrieve module context, falling back to a keyword-overlap scan over
/// all chunks when embedding-based search fails. Retrieval problems are
/// never fatal; an empty context just produces a weaker prompt.
pub async fn retrieve_context(index: &CourseIndex, query: &str, top_k: usize) -> Vec<String> {
    match index.query(query, top_k).await {
        Ok(hits) => hits.into_iter().map(|h| h.chunk.text).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "vector retrieval failed, using keyword fallback");
            match index.all_chunks().await {
                Ok(chunks) => {
                    let mut scored: Vec<(f64, String)> = chunks
                        .into_iter()
                        .map(|c| (token_overlap(query, &c.text), c.text))
                        .filter(|(score, _)| *score > 0.0)
                        .collect();
                    scored.sort_by(|a, b| {
                        b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    scored.truncate(top_k);
                    scored.into_iter().map(|(_, text)| text).collect()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "keyword fallback failed, proceeding without context");
                    Vec::new()
                }
            }
        }
    }
}

fn context_block(context: &[String]) -> String {
    if context.is_empty() {
        "No course material was retrieved; rely on the module name.".to_string()
    } else {
        context.join("\n---\n")
    }
}

fn main_prompt(module_name: &str, context: &[String], n: usize) -> String {
    format!(
        "You are designing a course module titled {module_name:?}.\n\
         Course material:\n{context}\n\n\
         Write exactly {n} learning objectives for this module. Each objective must:\n\
         - start with an action verb (explain, describe, analyze, compare, apply, ...)\n\
         - be 6 to 20 words long\n\
         - be specific to the material above\n\n\
         Respond with only a JSON array of {n} strings.",
        context = context_block(context),
    )
}

fn diversify_prompt(
    module_name: &str,
    context: &[String],
    n: usize,
    focus: &str,
    kept: &[String],
) -> String {
    let covered: Vec<String> = kept
        .iter()
        .filter_map(|o| o.split_whitespace().next())
        .map(|w| w.to_lowercase())
        .collect();
    let existing = kept
        .iter()
        .map(|o| format!("- {o}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are designing a course module titled {module_name:?}.\n\
         Course material:\n{context}\n\n\
         These objectives already exist:\n{existing}\n\n\
         Write {n} NEW learning objectives focused on {focus}.\n\
         Do not repeat or rephrase the existing objectives, and avoid starting \
         with these verbs: {verbs}.\n\
         Each objective starts with an action verb and is 6 to 20 words long.\n\n\
         Respond with only a JSON array of {n} strings.",
        context = context_block(context),
        verbs = covered.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_stream::wrappers::ReceiverStream;

    use crate::embedding::Embedder;
    use crate::error::Error;
    use crate::infer::Completion;

    /// Returns each scripted response once, in order, then repeats the
    /// last one.
    struct ScriptedGenerator {
        responses: Vec<Result<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Generator for ScriptedGenerator {
        async fn complete(&self, _req: &CompletionRequest) -> Result<Completion> {
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

            [objectives]
            max_main_attempts = 3
            max_diversify_attempts = 4
            "#,
            root = root.display()
        );
        let config: Config = toml::from_str(&toml).unwrap();
        let dir = config.paths.docs_dir.join("c1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("notes.txt"),
            "Thermodynamics studies heat and energy. Entropy measures disorder.",
        )
        .unwrap();
        let index = CourseIndex::open_or_build(&config, "c1", Arc::new(UnitEmbedder))
            .await
            .unwrap();
        (config, index)
    }

    fn objectives_json(items: &[&str]) -> String {
        serde_json::to_string(&items).unwrap()
    }

    #[tokio::test]
    async fn single_clean_response_fills_the_request() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = ScriptedGenerator::new(vec![Ok(objectives_json(&[
            "Explain the first law of thermodynamics with concrete examples",
            "Describe how entropy changes in irreversible physical processes",
        ]))]);
        let los = generate_objectives(&config, &index, &gen, "Thermodynamics", 2)
            .await
            .unwrap();
        assert_eq!(los.len(), 2);
        assert_eq!(los[0].order, 1);
        assert_eq!(los[1].order, 2);
        assert!(los.iter().all(|o| o.model_generated));
        assert!(los.iter().all(|o| o.module == "Thermodynamics"));
        assert_eq!(gen.call_count(), 1);
    }

    #[tokio::test]
    async fn unparseable_attempts_are_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = ScriptedGenerator::new(vec![
            Ok("no list here at all".to_string()),
            Ok(objectives_json(&[
                "Analyze energy transfer between systems in thermal contact",
            ])),
        ]);
        let los = generate_objectives(&config, &index, &gen, "Thermodynamics", 1)
            .await
            .unwrap();
        assert_eq!(los.len(), 1);
        assert_eq!(gen.call_count(), 2);
    }

    #[tokio::test]
    async fn inference_failure_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = ScriptedGenerator::new(vec![Err(Error::Inference("down".into()))]);
        let err = generate_objectives(&config, &index, &gen, "Thermodynamics", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }

    #[tokio::test]
    async fn duplicates_trigger_diversification_and_partial_result() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        // Every response repeats the same objective; only one survives
        // dedup and the stall limit ends diversification early.
        let gen = ScriptedGenerator::new(vec![Ok(objectives_json(&[
            "Explain the first law of thermodynamics with concrete examples",
        ]))]);
        let los = generate_objectives(&config, &index, &gen, "Thermodynamics", 4)
            .await
            .unwrap();
        assert_eq!(los.len(), 1);
        // 3 main attempts, then diversify attempts capped by the stall
        // limit rather than max_diversify_attempts.
        assert_eq!(
            gen.call_count(),
            3 + config.objectives.stall_limit as usize
        );
    }

    #[tokio::test]
    async fn all_placeholder_output_exhausts_into_an_empty_set() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        // Filler like "LO1" never validates, so every attempt adds
        // nothing; exhaustion yields an empty set, not an error.
        let gen = ScriptedGenerator::new(vec![Ok("[\"LO1\", \"LO2\"]".to_string())]);
        let los = generate_objectives(&config, &index, &gen, "Thermodynamics", 2)
            .await
            .unwrap();
        assert!(los.is_empty());
    }

    #[tokio::test]
    async fn requesting_zero_uses_the_configured_default() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = ScriptedGenerator::new(vec![Ok(objectives_json(&[
            "Explain how entropy quantifies disorder in closed systems",
            "Describe the operation of an ideal Carnot heat engine",
            "Analyze adiabatic compression processes in ideal gas mixtures",
            "Compare reversible and irreversible work done by expanding gases",
            "Apply conservation principles to everyday energy conversion devices",
            "Evaluate efficiency limits imposed by the second law statement",
        ]))]);
        let los = generate_objectives(&config, &index, &gen, "Thermodynamics", 0)
            .await
            .unwrap();
        assert_eq!(los.len(), config.objectives.default_n_los);
    }
}
