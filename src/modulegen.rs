//! Module content generation.
//!
//! Content is produced in two stages: each learning objective gets its
//! retrieved context summarized individually, then one generation call
//! assembles the module markdown from the summaries, shaped by the
//! learner's preference profile. The index must already exist; this path
//! never builds one implicitly. Summarization failures are fatal because
//! content generated from missing context reads plausible but wrong.

use chrono::Utc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::CourseIndex;
use crate::infer::{CompletionRequest, Generator};
use crate::logen::retrieve_context;
use crate::models::{DetailLevel, ExplanationStyle, Language, ModuleContent, PreferenceSet};
use crate::parse::{parse_sections, strip_reasoning};

/// Rough token count for budget math; close enough for English prose.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

fn detail_description(level: DetailLevel) -> &'static str {
    match level {
        DetailLevel::Detailed => "comprehensive, in-depth explanations with thorough coverage",
        DetailLevel::Moderate => "balanced explanations with key details",
        DetailLevel::Brief => "concise explanations focusing on the essentials",
    }
}

fn style_description(style: ExplanationStyle) -> &'static str {
    match style {
        ExplanationStyle::ExamplesHeavy => "many worked examples and concrete scenarios",
        ExplanationStyle::Conceptual => "conceptual understanding and underlying intuition",
        ExplanationStyle::Practical => "practical applications and hands-on usage",
        ExplanationStyle::Visual => "descriptions of structure, diagrams, and visual relationships",
    }
}

fn language_description(language: Language) -> &'static str {
    match language {
        Language::Simple => "plain, accessible language that avoids jargon",
        Language::Technical => "precise technical terminology",
        Language::Balanced => "a mix of accessible explanation and technical terms",
    }
}

pub async fn generate_module_content(
    config: &Config,
    index: &CourseIndex,
    generator: &dyn Generator,
    module_name: &str,
    objectives: &[String],
    prefs: &PreferenceSet,
) -> Result<ModuleContent> {
    if objectives.is_empty() {
        return Err(Error::parse(format!(
            "module {:?} has no learning objectives to generate content for",
            module_name
        )));
    }

    // Stage 1: summarize the retrieved context for each objective.
    let mut summaries = Vec::with_capacity(objectives.len());
    for objective in objectives {
        let context =
            retrieve_context(index, objective, config.content.top_k_per_objective).await;
        let summary = summarize_for_objective(config, generator, objective, &context).await?;
        summaries.push(summary);
    }

    // Stage 2: one generation call over all summaries.
    let prompt = content_prompt(module_name, objectives, &summaries, prefs);
    let input_tokens = estimate_tokens(&prompt);
    let window = config.inference.context_window;
    let budget = window
        .saturating_sub(input_tokens)
        .saturating_sub(config.content.token_buffer);
    if budget == 0 {
        return Err(Error::inference(format!(
            "module prompt (~{} tokens) exceeds the {}-token context window",
            input_tokens, window
        )));
    }
    tracing::debug!(
        module = module_name,
        input_tokens,
        output_budget = budget,
        "generating module content"
    );

    let req = CompletionRequest::new(prompt, budget, config.content.generation_temperature);
    let completion = generator.complete(&req).await?;
    let markdown = strip_reasoning(&completion.text).to_string();
    if markdown.trim().is_empty() {
        return Err(Error::parse("module generation returned empty content"));
    }
    let sections = parse_sections(&markdown);

    Ok(ModuleContent {
        module_name: module_name.to_string(),
        markdown,
        sections,
        learning_objectives: objectives.to_vec(),
        generated_at: Utc::now(),
    })
}

async fn summarize_for_objective(
    config: &Config,
    generator: &dyn Generator,
    objective: &str,
    context: &[String],
) -> Result<String> {
    if context.is_empty() {
        tracing::warn!(objective, "no context retrieved for objective");
        return Ok(String::new());
    }
    let prompt = format!(
        "Summarize the following course material as it relates to this learning \
         objective: {objective:?}\n\nMaterial:\n{}\n\n\
         Keep only what supports the objective. Respond with the summary text only.",
        context.join("\n---\n"),
    );
    let req = CompletionRequest::new(
        prompt,
        config.content.summarization_max_tokens,
        config.content.summarization_temperature,
    )
    .no_think();
    let completion = generator.complete(&req).await?;
    Ok(strip_reasoning(&completion.text).to_string())
}

fn content_prompt(
    module_name: &str,
    objectives: &[String],
    summaries: &[String],
    prefs: &PreferenceSet,
) -> String {
    let objective_block = objectives
        .iter()
        .zip(summaries.iter())
        .enumerate()
        .map(|(i, (obj, sum))| {
            if sum.is_empty() {
                format!("{}. {}", i + 1, obj)
            } else {
                format!("{}. {}\nRelevant material: {}", i + 1, obj, sum)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Write complete teaching content for the course module {module_name:?}.\n\n\
         Learning objectives and their supporting material:\n{objective_block}\n\n\
         Requirements:\n\
         - provide {detail}\n\
         - emphasize {style}\n\
         - use {language}\n\
         - one `##` section per learning objective, in order\n\
         - ground every claim in the supporting material\n\n\
         Respond in markdown.",
        detail = detail_description(prefs.detail_level),
        style = style_description(prefs.explanation_style),
        language = language_description(prefs.language),
    )
}
