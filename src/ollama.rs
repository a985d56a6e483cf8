use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Context window of all-MiniLM-L6-v2, in tokens.
pub const DEFAULT_CONTEXT_TOKENS: usize = 256;

/// Embedding client for an Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    context_tokens: usize,
}

#[derive(Clone, Copy, Debug)]
enum Endpoint {
    Embed,
    LegacyEmbeddings,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Self::Embed => "/api/embed",
            Self::LegacyEmbeddings => "/api/embeddings",
        }
    }

    fn request(self, model: &str, text: &str) -> Value {
        match self {
            Self::Embed => json!({ "model": model, "input": text }),
            Self::LegacyEmbeddings => json!({ "model": model, "prompt": text }),
        }
    }

    fn vector(self, body: &Value) -> Option<Vec<f32>> {
        let raw = match self {
            Self::Embed => body.pointer("/embeddings/0")?,
            Self::LegacyEmbeddings => body.get("embedding")?,
        };
        let vector: Vec<f32> = raw
            .as_array()?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<_>>()?;
        (!vector.is_empty()).then_some(vector)
    }
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            context_tokens: DEFAULT_CONTEXT_TOKENS,
        }
    }

    pub fn with_context_tokens(mut self, context_tokens: usize) -> Self {
        self.context_tokens = context_tokens.max(1);
        self
    }

    /// Embeds `text`. Input the model rejects as too long is cut to fewer
    /// words, following a ladder derived from the model's context window.
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let input = text.trim();
        if input.is_empty() {
            anyhow::bail!("cannot embed empty text input");
        }

        let mut last_err = match self.embed_any(model, input).await {
            Ok(vector) => return Ok(vector),
            Err(err) if is_context_length_error(&err) => err,
            Err(err) => return Err(err),
        };

        let word_count = input.split_whitespace().count();
        for max_words in word_limits(self.context_tokens) {
            if word_count <= max_words {
                continue;
            }

            tracing::debug!("embedding input too long, retrying with {} words", max_words);
            let truncated = truncate_to_word_limit(input, max_words);
            match self.embed_any(model, &truncated).await {
                Ok(vector) => return Ok(vector),
                Err(err) if is_context_length_error(&err) => last_err = err,
                Err(err) => return Err(err),
            }
        }

        Err(last_err.context(format!(
            "embedding input of {word_count} words exceeds the {}-token context of {model}",
            self.context_tokens
        )))
    }

    async fn embed_any(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        // Older Ollama releases only serve /api/embeddings.
        let modern_err = match self.embed_via(Endpoint::Embed, model, text).await {
            Ok(vector) => return Ok(vector),
            Err(err) => err,
        };

        self.embed_via(Endpoint::LegacyEmbeddings, model, text)
            .await
            .map_err(|legacy_err| {
                anyhow::anyhow!(
                    "ollama embedding failed via /api/embed and /api/embeddings. \
                     modern error: {modern_err}; legacy error: {legacy_err}; \
                     ensure the embedding model is pulled (e.g. `ollama pull {model}`)"
                )
            })
    }

    async fn embed_via(&self, endpoint: Endpoint, model: &str, text: &str) -> Result<Vec<f32>> {
        let path = endpoint.path();
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&endpoint.request(model, text))
            .send()
            .await
            .with_context(|| format!("failed to call ollama {path}"))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("ollama {path} returned {status}: {}", normalize_err_body(&body));
        }

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("failed to decode ollama {path} response"))?;

        endpoint
            .vector(&body)
            .ok_or_else(|| anyhow::anyhow!("ollama {path} returned no embedding"))
    }
}

pub(crate) fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
        if let Some(err) = json.pointer("/error/message").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}

fn is_context_length_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("input length exceeds the context length")
        || (msg.contains("context length") && msg.contains("input length"))
}

/// Word budgets to retry with, largest first. English runs about four tokens
/// to three words, so the first step leaves room for that expansion.
fn word_limits(context_tokens: usize) -> Vec<usize> {
    let mut limits: Vec<usize> = [3, 2, 1]
        .iter()
        .map(|quarters| context_tokens * quarters / 4)
        .filter(|&words| words > 0)
        .collect();
    limits.dedup();
    limits
}

fn truncate_to_word_limit(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}
