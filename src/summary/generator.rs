//! Summary generation through a hosted chat-completions model.
//!
//! The generator always receives the project's full active timeline and
//! returns all four variants at once; there is no incremental mode.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Entry, EntryType, SummaryVariants};

/// Stored for every variant when a project has nothing to summarize yet.
pub const PLACEHOLDER_SUMMARY: &str = "Aucune synthèse disponible pour l'instant.";

pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "Tu rédiges les synthèses du journal de chantier d'une entreprise du bâtiment. \
On te fournit la chronologie complète des entrées du projet (notes écrites, transcriptions de mémos vocaux, légendes de photos). \
Produis quatre synthèses en français :\n\
- artisan_short : 2 à 3 phrases pour l'équipe sur place, vocabulaire technique, points bloquants en premier ;\n\
- artisan_detail : synthèse détaillée pour l'équipe (avancement, problèmes, matériel, prochaines étapes) ;\n\
- client_short : 2 à 3 phrases pour le client, ton rassurant et factuel, sans jargon ;\n\
- client_detail : compte rendu détaillé pour le client (avancement, décisions, prochaines étapes).\n\
N'invente aucun fait absent des entrées. \
Réponds uniquement avec un objet JSON contenant exactement les clés artisan_short, artisan_detail, client_short, client_detail.";

#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    /// Summarize the full active timeline. May fail or time out.
    async fn generate(&self, entries: &[Entry]) -> Result<SummaryVariants>;
}

pub fn placeholder_variants() -> SummaryVariants {
    SummaryVariants {
        artisan_short: PLACEHOLDER_SUMMARY.to_string(),
        artisan_detail: PLACEHOLDER_SUMMARY.to_string(),
        client_short: PLACEHOLDER_SUMMARY.to_string(),
        client_detail: PLACEHOLDER_SUMMARY.to_string(),
    }
}

/// Render entries as a chronological, one-line-per-entry timeline.
/// Entries with no usable text are skipped, except photos, which still
/// mark that something was documented at that time.
pub fn build_timeline(entries: &[Entry]) -> String {
    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries.iter().filter(|e| e.is_active) {
        let when = entry.created_at.format("%Y-%m-%d %H:%M");
        let text = entry
            .text_content
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let transcript = entry
            .transcript_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let label = match entry.subtype.as_deref() {
            Some(subtype) if !subtype.is_empty() => format!(" ({})", subtype),
            _ => String::new(),
        };
        let line = match (entry.entry_type, text, transcript) {
            (EntryType::Text, Some(t), _) => format!("[{}] Note{}: {}", when, label, t),
            (EntryType::Audio, _, Some(t)) => {
                format!("[{}] Mémo vocal{} (transcription): {}", when, label, t)
            }
            (EntryType::Audio, Some(t), None) => format!("[{}] Mémo vocal{}: {}", when, label, t),
            (EntryType::Photo, Some(t), _) => format!("[{}] Photo{}: {}", when, label, t),
            (EntryType::Photo, None, _) => format!("[{}] Photo{}", when, label),
            _ => continue,
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[derive(Deserialize)]
struct RawVariants {
    artisan_short: Option<String>,
    artisan_detail: Option<String>,
    client_short: Option<String>,
    client_detail: Option<String>,
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => bail!("model response is missing `{}`", field),
    }
}

/// Parse the model's JSON answer, tolerating a surrounding code fence.
pub fn parse_variants(content: &str) -> Result<SummaryVariants> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let raw: RawVariants =
        serde_json::from_str(body).context("model response is not a JSON object")?;
    Ok(SummaryVariants {
        artisan_short: required("artisan_short", raw.artisan_short)?,
        artisan_detail: required("artisan_detail", raw.artisan_detail)?,
        client_short: required("client_short", raw.client_short)?,
        client_detail: required("client_detail", raw.client_detail)?,
    })
}

// ── Hosted model client ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_LLM_API_URL.to_string(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            request_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmGenerator {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build LLM HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SummaryGenerator for LlmGenerator {
    async fn generate(&self, entries: &[Entry]) -> Result<SummaryVariants> {
        let timeline = build_timeline(entries);
        let user_prompt = format!("Chronologie du projet :\n{}", timeline);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: 0.2,
            response_format: serde_json::json!({"type": "json_object"}),
        };

        let mut builder = self.client.post(&self.config.api_url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.context("LLM request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("LLM returned {}: {}", status, body.chars().take(500).collect::<String>());
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .context("LLM response is not valid chat-completions JSON")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("LLM response has no content")?;
        parse_variants(&content)
    }
}
