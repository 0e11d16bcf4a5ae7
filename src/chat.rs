//! Grounded course chat.
//!
//! Questions are answered strictly from retrieved course material. The
//! caller opens the course index first, so a course that was never
//! indexed fails before any inference happens. Answers stream token by
//! token; dropping the stream cancels the backend request.

use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::config::Config;
use crate::error::Result;
use crate::index::CourseIndex;
use crate::infer::{CompletionRequest, Generator};
use crate::models::ChatReply;

/// Answer a question with a token stream plus the source citations for
/// the retrieved context.
pub async fn chat_stream(
    config: &Config,
    index: &CourseIndex,
    generator: &dyn Generator,
    question: &str,
) -> Result<(ReceiverStream<String>, Vec<String>)> {
    let hits = index.query(question, config.chat.top_k).await?;
    let sources = format_sources(hits.iter().map(|h| h.chunk.source.as_str()));
    let context: Vec<String> = hits.into_iter().map(|h| h.chunk.text).collect();

    let prompt = format!(
        "Answer the student's question using only the course material below. \
         If the material does not cover the question, say so briefly instead \
         of guessing.\n\n\
         Course material:\n{context}\n\n\
         Question: {question}\n\n\
         Give a concise, direct answer.",
        context = if context.is_empty() {
            "(no relevant material found)".to_string()
        } else {
            context.join("\n---\n")
        },
    );
    let req = CompletionRequest::new(prompt, config.chat.max_tokens, config.chat.temperature)
        .no_think();
    let stream = generator.stream(&req).await?;
    Ok((stream, sources))
}

/// Non-streaming convenience wrapper: accumulate the whole answer.
pub async fn chat(
    config: &Config,
    index: &CourseIndex,
    generator: &dyn Generator,
    question: &str,
) -> Result<ChatReply> {
    let (mut stream, sources) = chat_stream(config, index, generator, question).await?;
    let mut answer = String::new();
    while let Some(token) = stream.next().await {
        answer.push_str(&token);
    }
    Ok(ChatReply {
        answer: answer.trim().to_string(),
        sources,
    })
}

/// Deduplicate source filenames preserving first-seen order.
pub fn format_sources<'a>(sources: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for s in sources {
        if seen.insert(s.to_string()) {
            out.push(s.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::embedding::Embedder;
    use crate::error::Error;
    use crate::infer::Completion;

    struct StreamingGenerator {
        tokens: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl Generator for StreamingGenerator {
        async fn complete(&self, _req: &CompletionRequest) -> Result<Completion> {
            Ok(Completion {
                text: self.tokens.concat(),
            })
        }

        async fn stream(&self, req: &CompletionRequest) -> Result<ReceiverStream<String>> {
            assert!(req.suppress_reasoning);
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            let tokens: Vec<String> = self.tokens.iter().map(|s| s.to_string()).collect();
            tokio::spawn(async move {
                for t in tokens {
                    if tx.send(t).await.is_err() {
                        break;
                    }
                }
            });
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
            "#,
            root = root.display()
        );
        let config: Config = toml::from_str(&toml).unwrap();
        let dir = config.paths.docs_dir.join("c1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("borrowing.txt"), "The borrow checker enforces aliasing rules.").unwrap();
        std::fs::write(dir.join("lifetimes.txt"), "Lifetimes bound how long references live.").unwrap();
        let index = CourseIndex::open_or_build(&config, "c1", Arc::new(UnitEmbedder))
            .await
            .unwrap();
        (config, index)
    }

    #[tokio::test]
    async fn chat_accumulates_streamed_answer_with_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = StreamingGenerator {
            tokens: vec!["The borrow checker ", "enforces aliasing rules."],
        };
        let reply = chat(&config, &index, &gen, "what does the borrow checker do?")
            .await
            .unwrap();
        assert_eq!(reply.answer, "The borrow checker enforces aliasing rules.");
        assert!(!reply.sources.is_empty());
        assert!(reply.sources.contains(&"borrowing.txt".to_string()));
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_consumption() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, index) = test_fixture(tmp.path()).await;
        let gen = StreamingGenerator {
            tokens: vec!["first ", "second ", "third"],
        };
        let (mut stream, _sources) = chat_stream(&config, &index, &gen, "anything")
            .await
            .unwrap();
        let first = stream.next().await;
        assert_eq!(first.as_deref(), Some("first "));
        drop(stream);
        // The producer task observes the closed channel and exits; nothing
        // to assert beyond not hanging.
    }

    #[tokio::test]
    async fn missing_index_fails_before_inference() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, _index) = test_fixture(tmp.path()).await;
        let err = CourseIndex::open(&config, "never-indexed", Arc::new(UnitEmbedder))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IndexMissing { .. }));
        assert!(err.to_string().contains("build it first"));
    }

    #[test]
    fn sources_are_deduplicated_in_order() {
        let sources = ["b.txt", "a.txt", "b.txt", "c.txt", "a.txt"];
        assert_eq!(
            format_sources(sources.iter().copied()),
            vec!["b.txt", "a.txt", "c.txt"]
        );
    }
}
