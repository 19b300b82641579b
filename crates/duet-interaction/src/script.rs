//! Line-script providers: static templates and generated scripts.
//!
//! A script is the ordered list of short lines one identity delivers as
//! separate messages. The orchestrator is polymorphic over
//! `LineScriptProvider`; the static strategy never fails, the generated
//! strategy validates and normalizes model output before any of it is
//! considered usable.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use duet_ai::{ChatRequest, DuetAiError, LlmClient, Message};

/// Practical per-line length cap communicated to the generator.
const MAX_LINE_CHARS: usize = 120;
/// Material words extracted from a trigger message, at most.
const MATERIAL_WORD_LIMIT: usize = 8;
/// Material words probed for overlap validation, at most.
const OVERLAP_PROBE_LIMIT: usize = 5;

const MATERIAL_STOPWORDS: [&str; 14] = [
    "this", "that", "with", "from", "your", "have", "will", "just", "what", "when", "where",
    "which", "about", "please",
];

fn material_word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9']{4,}").expect("material word pattern"))
}

fn bullet_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*(?:[-*]|\d+[.)])\s*").expect("bullet prefix pattern"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Trigger details a provider needs to build one identity's script.
pub struct ScriptContext {
    pub trigger_text: String,
    pub trigger_user_id: u64,
    /// Identity that must be mentioned in the opening line.
    pub partner_mention_id: u64,
}

#[derive(Debug, Error)]
/// Enumerates supported `ScriptError` values.
pub enum ScriptError {
    #[error("script generator returned no usable lines")]
    EmptyOutput,
    #[error("script generator returned unparseable output")]
    UnparseableOutput,
    #[error("script generator ignored trigger material words")]
    IgnoredMaterial,
    #[error("script generation failed: {0}")]
    Generation(#[from] DuetAiError),
}

#[async_trait]
/// Trait contract for `LineScriptProvider` strategies.
pub trait LineScriptProvider: Send + Sync {
    async fn provide(
        &self,
        context: &ScriptContext,
        line_count: usize,
    ) -> Result<Vec<String>, ScriptError>;
}

/// Expands or truncates `base` to exactly `target` lines.
///
/// Shorter targets take the leading lines; longer targets repeat the full
/// base cyclically before truncating. Order is preserved and the result is
/// stable under re-application with the same target.
pub fn expand_lines(base: &[String], target: usize) -> Vec<String> {
    if target <= base.len() {
        return base[..target].to_vec();
    }
    let mut extended = base.to_vec();
    while extended.len() < target {
        extended.extend_from_slice(base);
    }
    extended.truncate(target);
    extended
}

const LEAD_OPENER_TEMPLATES: [&str; 7] = [
    "Hey {partner}, relax. I have this chat handled.",
    "Both of us at once? Then I take the first word, as always.",
    "Keep up, partner. We are doing this in English.",
    "No drama. Follow my tempo and nobody gets embarrassed.",
    "Stay sharp. I am watching every line you type.",
    "Alright chat, the floor is mine first.",
    "You can answer once I am done. I will be quick.",
];

const FOLLOW_REPLY_TEMPLATES: [&str; 7] = [
    "Oh... {partner}, you are here too?",
    "I heard you. You speak first, I will wait.",
    "Please do not look at me like that...",
    "Okay, I will behave. No messing around.",
    "Can I stand a little farther away...?",
    "Alright, I will answer after you.",
    "I will be good. Please do not scold me...",
];

#[derive(Debug, Clone)]
/// Fixed-template script strategy. Never fails.
pub struct StaticScriptProvider {
    templates: Vec<String>,
}

impl StaticScriptProvider {
    pub fn from_templates(templates: Vec<String>) -> Self {
        Self { templates }
    }

    /// Opening script for the identity that speaks first.
    pub fn lead_opener() -> Self {
        Self::from_templates(LEAD_OPENER_TEMPLATES.iter().map(ToString::to_string).collect())
    }

    /// Reply script for the identity that answers after the lead.
    pub fn follow_reply() -> Self {
        Self::from_templates(FOLLOW_REPLY_TEMPLATES.iter().map(ToString::to_string).collect())
    }
}

#[async_trait]
impl LineScriptProvider for StaticScriptProvider {
    async fn provide(
        &self,
        context: &ScriptContext,
        line_count: usize,
    ) -> Result<Vec<String>, ScriptError> {
        let mention = format!("<@{}>", context.partner_mention_id);
        let base = self
            .templates
            .iter()
            .map(|template| template.replace("{partner}", &mention))
            .collect::<Vec<_>>();
        Ok(expand_lines(&base, line_count))
    }
}

/// Selects the lead or follow script by which partner the script addresses:
/// a script aimed at the lead identity belongs to the follow role, and vice
/// versa. Lets one process carry both roles' strategies and still resolve
/// its role only at gateway-ready time.
pub struct RolePairedScriptProvider {
    lead_bot_id: u64,
    lead_script: Arc<dyn LineScriptProvider>,
    follow_script: Arc<dyn LineScriptProvider>,
}

impl RolePairedScriptProvider {
    pub fn new(
        lead_bot_id: u64,
        lead_script: Arc<dyn LineScriptProvider>,
        follow_script: Arc<dyn LineScriptProvider>,
    ) -> Self {
        Self {
            lead_bot_id,
            lead_script,
            follow_script,
        }
    }
}

#[async_trait]
impl LineScriptProvider for RolePairedScriptProvider {
    async fn provide(
        &self,
        context: &ScriptContext,
        line_count: usize,
    ) -> Result<Vec<String>, ScriptError> {
        if context.partner_mention_id == self.lead_bot_id {
            self.follow_script.provide(context, line_count).await
        } else {
            self.lead_script.provide(context, line_count).await
        }
    }
}

#[derive(Debug, Clone)]
/// Generation settings for the dynamic script strategy.
pub struct GeneratedScriptConfig {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Tone directive embedded verbatim in the prompt.
    pub tone: String,
}

impl Default for GeneratedScriptConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: Some(512),
            temperature: Some(0.8),
            tone: "confident, teasing, sharp. No gore, no real-world violence".to_string(),
        }
    }
}

/// Model-backed script strategy with strict output validation.
pub struct GeneratedScriptProvider {
    client: Arc<dyn LlmClient>,
    config: GeneratedScriptConfig,
}

impl GeneratedScriptProvider {
    pub fn new(client: Arc<dyn LlmClient>, config: GeneratedScriptConfig) -> Self {
        Self { client, config }
    }

    fn build_prompt(
        &self,
        context: &ScriptContext,
        line_count: usize,
        material_words: &[String],
    ) -> String {
        let trigger_text = normalize_trigger_text(&context.trigger_text);
        let material_hint = if material_words.is_empty() {
            "none".to_string()
        } else {
            material_words.join(", ")
        };
        format!(
            "Context: one user message addressed both companion bots in the same channel.\n\
             Behavior: you answer first and set the tempo for your partner bot.\n\
             Trigger user id: {trigger_user}\n\
             User message:\n\
             {trigger_text}\n\
             Output requirements:\n\
             - Write exactly {line_count} short lines.\n\
             - English only.\n\
             - Tone: {tone}.\n\
             - No markdown, no numbering, no bullet points.\n\
             - One sentence per line, max {max_chars} characters per line.\n\
             - First line must include <@{partner}>.\n\
             - At least 2 lines must reuse or remix words from the user message.\n\
             - Preferred material words: {material_hint}.\n\
             Return only the lines.",
            trigger_user = context.trigger_user_id,
            trigger_text = trigger_text,
            line_count = line_count,
            tone = self.config.tone,
            max_chars = MAX_LINE_CHARS,
            partner = context.partner_mention_id,
            material_hint = material_hint,
        )
    }
}

#[async_trait]
impl LineScriptProvider for GeneratedScriptProvider {
    async fn provide(
        &self,
        context: &ScriptContext,
        line_count: usize,
    ) -> Result<Vec<String>, ScriptError> {
        let material_words = extract_material_words(&normalize_trigger_text(&context.trigger_text));
        let prompt = self.build_prompt(context, line_count, &material_words);
        let response = self
            .client
            .complete(ChatRequest {
                model: self.config.model.clone(),
                messages: vec![Message::user(prompt)],
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            })
            .await?;
        parse_script_lines(
            &response.text,
            line_count,
            context.partner_mention_id,
            &material_words,
        )
    }
}

fn normalize_trigger_text(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "(empty)".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extracts up to eight distinct lower-cased material words in first-appearance
/// order, skipping the stopword set.
pub fn extract_material_words(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut material: Vec<String> = Vec::new();
    for token in material_word_pattern().find_iter(&lowered) {
        let word = token.as_str();
        if MATERIAL_STOPWORDS.contains(&word) {
            continue;
        }
        if material.iter().any(|seen| seen == word) {
            continue;
        }
        material.push(word.to_string());
        if material.len() >= MATERIAL_WORD_LIMIT {
            break;
        }
    }
    material
}

/// Parses, validates, and normalizes raw generator output into a script.
pub fn parse_script_lines(
    raw_output: &str,
    line_count: usize,
    required_mention_id: u64,
    material_words: &[String],
) -> Result<Vec<String>, ScriptError> {
    let normalized = raw_output.trim();
    if normalized.is_empty() {
        return Err(ScriptError::UnparseableOutput);
    }

    let mut lines = extract_lines_from_text(normalized);
    if lines.is_empty() {
        return Err(ScriptError::EmptyOutput);
    }

    let mention_token = format!("<@{required_mention_id}>");
    if !lines.iter().any(|line| line.contains(&mention_token)) {
        lines[0] = format!("{mention_token} {}", lines[0]);
    }

    if !material_words.is_empty() && !has_material_overlap(&lines, material_words) {
        return Err(ScriptError::IgnoredMaterial);
    }

    Ok(expand_lines(&lines, line_count))
}

fn extract_lines_from_text(text: &str) -> Vec<String> {
    let mut candidate = text.trim().to_string();
    let mut parsed_lines: Vec<String> = Vec::new();

    if candidate.starts_with('[') || candidate.starts_with('{') {
        match serde_json::from_str::<Value>(&candidate) {
            Ok(Value::Array(items)) => {
                parsed_lines.extend(items.iter().map(json_item_to_line));
            }
            Ok(Value::Object(map)) => match map.get("lines") {
                Some(Value::Array(items)) => {
                    parsed_lines.extend(items.iter().map(json_item_to_line));
                }
                _ => {
                    if let Some(Value::String(answer)) = map.get("answer") {
                        candidate = answer.clone();
                    }
                }
            },
            _ => {}
        }
    }

    if parsed_lines.is_empty() {
        let body = candidate.replace("```", "");
        for raw_line in body.lines() {
            let cleaned = bullet_prefix_pattern().replace(raw_line, "");
            let cleaned = cleaned.trim();
            if !cleaned.is_empty() {
                parsed_lines.push(cleaned.to_string());
            }
        }
    }

    parsed_lines.retain(|line| !line.is_empty());
    parsed_lines
}

fn json_item_to_line(item: &Value) -> String {
    match item {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn has_material_overlap(lines: &[String], material_words: &[String]) -> bool {
    let haystack = lines.join(" ").to_lowercase();
    material_words
        .iter()
        .take(OVERLAP_PROBE_LIMIT)
        .any(|word| haystack.contains(word))
}
