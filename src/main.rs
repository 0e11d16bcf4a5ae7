//! `smith`: command-line front end for coursesmith.
//!
//!     smith index --course cs101
//!     smith objectives --course cs101 --module "Memory Safety" -n 6
//!     smith module-content --course cs101 --module "Memory Safety" --objectives los.json
//!     smith quiz --course cs101 --module "Memory Safety"
//!     smith chat --course cs101 "what is the borrow checker?"

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;

use coursesmith::chat::chat_stream;
use coursesmith::config::load_config;
use coursesmith::embedding::HttpEmbedder;
use coursesmith::index::CourseIndex;
use coursesmith::infer::InferenceClient;
use coursesmith::logen::generate_objectives;
use coursesmith::models::{LearningObjective, PreferenceSet};
use coursesmith::modulegen::generate_module_content;
use coursesmith::quiz::generate_quiz;

#[derive(Parser)]
#[command(name = "smith", version, about = "Retrieval-grounded course content generation")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "./config/smith.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build (or reuse) the vector index for a course.
    Index {
        #[arg(long)]
        course: String,
    },
    /// Generate learning objectives for a module.
    Objectives {
        #[arg(long)]
        course: String,
        #[arg(long)]
        module: String,
        /// How many objectives to generate; 0 uses the configured default.
        #[arg(short, default_value_t = 0)]
        n: usize,
    },
    /// Generate module content from learning objectives.
    ModuleContent {
        #[arg(long)]
        course: String,
        #[arg(long)]
        module: String,
        /// JSON file holding the objectives (array of strings, or the
        /// output of `smith objectives`).
        #[arg(long)]
        objectives: PathBuf,
        /// JSON file with learner preferences; defaults apply if omitted.
        #[arg(long)]
        preferences: Option<PathBuf>,
    },
    /// Generate and save a quiz for a module.
    Quiz {
        #[arg(long)]
        course: String,
        #[arg(long)]
        module: String,
    },
    /// Ask a question grounded in course material.
    Chat {
        #[arg(long)]
        course: String,
        question: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursesmith=info,smith=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let embedder = Arc::new(HttpEmbedder::new(config.embedding.clone())?);
    let generator = InferenceClient::new(config.inference.clone())?;

    match cli.command {
        Command::Index { course } => {
            let index = CourseIndex::open_or_build(&config, &course, embedder).await?;
            println!("index ready: {} chunks", index.chunk_count().await?);
        }
        Command::Objectives { course, module, n } => {
            let index = CourseIndex::open_or_build(&config, &course, embedder).await?;
            let objectives = generate_objectives(&config, &index, &generator, &module, n).await?;
            println!("{}", serde_json::to_string_pretty(&objectives)?);
        }
        Command::ModuleContent {
            course,
            module,
            objectives,
            preferences,
        } => {
            let index = CourseIndex::open(&config, &course, embedder).await?;
            let objectives = read_objectives(&objectives)?;
            let prefs = match preferences {
                Some(path) => {
                    let body = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading preferences {}", path.display()))?;
                    serde_json::from_str::<PreferenceSet>(&body)
                        .with_context(|| format!("parsing preferences {}", path.display()))?
                }
                None => PreferenceSet::default(),
            };
            let content =
                generate_module_content(&config, &index, &generator, &module, &objectives, &prefs)
                    .await?;
            println!("{}", content.markdown);
        }
        Command::Quiz { course, module } => {
            let index = CourseIndex::open(&config, &course, embedder).await?;
            let quiz = generate_quiz(&config, &index, &generator, &course, &module).await?;
            println!("{}", serde_json::to_string_pretty(&quiz)?);
        }
        Command::Chat { course, question } => {
            let index = CourseIndex::open(&config, &course, embedder).await?;
            let (mut stream, sources) =
                chat_stream(&config, &index, &generator, &question).await?;
            use std::io::Write;
            let mut stdout = std::io::stdout();
            while let Some(token) = stream.next().await {
                print!("{token}");
                stdout.flush()?;
            }
            println!();
            if !sources.is_empty() {
                println!("\nSources: {}", sources.join(", "));
            }
        }
    }
    Ok(())
}

/// Accept either a bare JSON array of strings or the serialized output
/// of `smith objectives`.
fn read_objectives(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("reading objectives {}", path.display()))?;
    if let Ok(texts) = serde_json::from_str::<Vec<String>>(&body) {
        return Ok(texts);
    }
    let objectives: Vec<LearningObjective> = serde_json::from_str(&body)
        .with_context(|| format!("parsing objectives {}", path.display()))?;
    Ok(objectives.into_iter().map(|o| o.text).collect())
}
