use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{GenError, Result};
use crate::prompt::build_prompt;
use crate::types::GenerateRequest;
use crate::PromptGenerator;

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

fn default_temperature() -> f64 {
    0.9
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

/// Connection and sampling settings for the generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Higher values give more varied batches.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra Ollama options merged over the defaults.
    #[serde(default)]
    pub options: Option<Value>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            options: None,
        }
    }
}

impl GeneratorConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }
}

/// Prompt generator backed by Ollama's `/api/generate` in JSON mode.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: Client,
    config: GeneratorConfig,
}

impl OllamaGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens,
            },
        });

        if let Some(custom) = self.config.options.as_ref().and_then(Value::as_object) {
            if let Some(options) = body["options"].as_object_mut() {
                for (k, v) in custom {
                    options.insert(k.clone(), v.clone());
                }
            }
        }
        body
    }
}

#[async_trait]
impl PromptGenerator for OllamaGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>> {
        request.validate()?;

        let body = self.request_body(&build_prompt(request));
        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        info!(
            model = %self.config.model,
            count = request.count,
            media_kind = request.media_kind.as_str(),
            "Requesting prompt batch"
        );

        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| {
            GenError::Other(format!("Failed to connect to generator at {}: {}", url, e))
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenError::Api { status, body });
        }

        let json_response: Value = resp.json().await?;
        let raw = json_response
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let (_, cleaned) = strip_thinking(raw);
        let prompts = parse_prompts(&cleaned, request.count);
        if prompts.is_empty() {
            warn!(raw = %truncate(raw, 200), "No prompts in generator response");
            return Err(GenError::EmptyResponse);
        }
        if prompts.len() < request.count {
            warn!(
                requested = request.count,
                received = prompts.len(),
                "Generator returned a short batch"
            );
        }
        debug!(count = prompts.len(), "Prompt batch parsed");
        Ok(prompts)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Split off a `<think>...</think>` block some models prepend.
fn strip_thinking(text: &str) -> (Option<String>, String) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    if let (Some(start), Some(end)) = (text.find(OPEN), text.find(CLOSE)) {
        if end > start {
            let thinking = text[start + OPEN.len()..end].trim().to_string();
            let cleaned = format!("{}{}", &text[..start], &text[end + CLOSE.len()..]);
            let thinking = (!thinking.is_empty()).then_some(thinking);
            return (thinking, cleaned.trim().to_string());
        }
    }
    (None, text.to_string())
}

/// Pull prompt strings out of whatever shape the model answered with.
///
/// Accepts `{"prompts": [...]}`, a bare array, arrays of objects with a
/// `prompt`/`text`/`description` field, JSON inside a code block, and as a
/// last resort a numbered or bulleted plain-text list. Results are trimmed,
/// de-duplicated and capped at `limit`.
pub fn parse_prompts(text: &str, limit: usize) -> Vec<String> {
    let trimmed = text.trim();
    let candidates = parse_json_value(trimmed)
        .map(|v| collect_strings(&v))
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| plain_lines(trimmed));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|s| clean_line(&s))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .take(limit)
        .collect()
}

fn parse_json_value(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    if let Some(block) = extract_json_block(text) {
        if let Ok(v) = serde_json::from_str::<Value>(&block) {
            return Some(v);
        }
    }
    let start = text.find(['{', '['])?;
    let candidate = &text[start..];
    let close = if candidate.starts_with('{') { '}' } else { ']' };
    let end = candidate.rfind(close)?;
    serde_json::from_str::<Value>(&candidate[..=end]).ok()
}

fn collect_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => ["prompt", "text", "description"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        Value::Object(map) => {
            // {"prompts": [...]} or any single array-valued field.
            if let Some(list) = map.get("prompts") {
                return collect_strings(list);
            }
            map.values()
                .find(|v| v.is_array())
                .map(collect_strings)
                .unwrap_or_default()
        }
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Extract JSON from ```json ... ``` code blocks.
fn extract_json_block(text: &str) -> Option<String> {
    for marker in ["```json", "```JSON", "```"] {
        if let Some(start) = text.find(marker) {
            let content_start = start + marker.len();
            if let Some(end) = text[content_start..].find("```") {
                return Some(text[content_start..content_start + end].trim().to_string());
            }
        }
    }
    None
}

fn plain_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(str::to_string)
        .collect()
}

/// Strip list numbering, bullets and wrapping quotes.
fn clean_line(line: &str) -> String {
    let mut s = line.trim();
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &s[digits..];
        if let Some(stripped) = rest.strip_prefix(['.', ')', ':']) {
            s = stripped.trim_start();
        }
    }
    if let Some(stripped) = s.strip_prefix(['-', '*', '•']) {
        s = stripped.trim_start();
    }
    s.trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompts_object() {
        let out = parse_prompts(r#"{"prompts": ["a fox", "a crow"]}"#, 10);
        assert_eq!(out, vec!["a fox", "a crow"]);
    }

    #[test]
    fn test_parse_prompts_array_of_objects() {
        let out = parse_prompts(r#"[{"prompt": "a fox"}, {"text": "a crow"}, 3]"#, 10);
        assert_eq!(out, vec!["a fox", "a crow"]);
    }

    #[test]
    fn test_parse_prompts_other_array_field() {
        let out = parse_prompts(r#"{"ideas": ["a fox"]}"#, 10);
        assert_eq!(out, vec!["a fox"]);
    }

    #[test]
    fn test_parse_prompts_code_block() {
        let text = "Here you go:\n```json\n[\"a fox\", \"a crow\"]\n```";
        assert_eq!(parse_prompts(text, 10), vec!["a fox", "a crow"]);
    }

    #[test]
    fn test_parse_prompts_embedded_json() {
        let text = "Sure! {\"prompts\": [\"a fox\"]} Enjoy.";
        assert_eq!(parse_prompts(text, 10), vec!["a fox"]);
    }

    #[test]
    fn test_parse_prompts_numbered_text() {
        let text = "Prompts:\n1. A fox in snow\n2) \"A crow at dusk\"\n- A heron";
        assert_eq!(
            parse_prompts(text, 10),
            vec!["A fox in snow", "A crow at dusk", "A heron"]
        );
    }

    #[test]
    fn test_parse_prompts_dedupes_and_limits() {
        let text = r#"["a fox", "A Fox", " ", "a crow", "a heron"]"#;
        assert_eq!(parse_prompts(text, 2), vec!["a fox", "a crow"]);
    }

    #[test]
    fn test_strip_thinking() {
        let (thinking, cleaned) = strip_thinking("<think>plan</think>[\"a\"]");
        assert_eq!(thinking.as_deref(), Some("plan"));
        assert_eq!(cleaned, "[\"a\"]");
    }

    #[test]
    fn test_clean_line_keeps_inner_numbers() {
        assert_eq!(clean_line("3 cats on a sofa"), "3 cats on a sofa");
        assert_eq!(clean_line("12. 3 cats"), "3 cats");
    }

    #[test]
    fn test_request_body_merges_options() {
        let config = GeneratorConfig {
            options: Some(json!({"top_p": 0.5, "temperature": 0.2})),
            ..GeneratorConfig::default()
        };
        let gen = OllamaGenerator::new(config).unwrap();
        let body = gen.request_body("hi");
        assert_eq!(body["format"], "json");
        assert_eq!(body["options"]["top_p"], 0.5);
        assert_eq!(body["options"]["temperature"], 0.2);
        assert_eq!(body["options"]["num_predict"], 4096);
    }

    #[test]
    fn test_config_partial_json() {
        let config: GeneratorConfig = serde_json::from_str(r#"{"model": "qwen2.5"}"#).unwrap();
        assert_eq!(config.model, "qwen2.5");
        assert_eq!(config.endpoint, "http://localhost:11434");
    }
}
