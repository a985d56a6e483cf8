use std::time::Instant;

use thiserror::Error;

use crate::config::{AppConfig, PROMPT_SNIPPET_CHARS, RESPONSE_SNIPPET_CHARS};
use crate::gemini::GeminiClient;
use crate::models::{AskResponse, RetrievalResult, SourceSnippet};
use crate::retrieval::{Retrieval, Retriever};

const ANSWER_TEMPLATE: &str = "You are a helpful tutor. Use the provided CONTEXT to answer the QUESTION.
Formatting rules (follow strictly):
1. Always use Markdown headings (`##`, `###`).
2. Separate each section with a line break.
3. Use bullet points (●) for lists.
4. Keep sentences short and simple (at most 2-3 lines per point).
5. Never put several sections in a single paragraph.

Always follow this structure in your answer:

## Definition
- A short, clear definition of the main concept.

## Key Concepts
- Bullet points (●) with **bold keywords**, each short and easy to understand.

## Detailed Explanation
- Break the topic into logical sub-sections, with subheadings if needed.
- Simple, concise language (3-4 lines per paragraph).

## Example
- A practical example (real-world, analogy, or mini code snippet) tied to the QUESTION.

## Summary
- 3-5 bullet points with the most important takeaways.

---
";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("No documents indexed")]
    NoIndex,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct ChatService {
    config: AppConfig,
    retriever: Retriever,
    gemini: GeminiClient,
}

impl ChatService {
    pub fn new(config: AppConfig, retriever: Retriever, gemini: GeminiClient) -> Self {
        Self {
            config,
            retriever,
            gemini,
        }
    }

    pub async fn answer(
        &self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<AskResponse, ChatError> {
        let started = Instant::now();
        let top_k = top_k.unwrap_or(self.config.chunks.top_k);

        let retrieved = match self.retriever.retrieve(question, top_k).await? {
            Retrieval::NoIndex => return Err(ChatError::NoIndex),
            Retrieval::Hits(hits) if hits.is_empty() => return Err(ChatError::NoIndex),
            Retrieval::Hits(hits) => hits,
        };

        let prompt = build_prompt(question, &retrieved);
        let answer = self
            .gemini
            .generate(
                &self.config.models.answer_model,
                &prompt,
                self.config.models.max_output_tokens,
            )
            .await?;

        tracing::info!(
            "answered from {} chunks in {}ms",
            retrieved.len(),
            started.elapsed().as_millis()
        );

        Ok(AskResponse {
            answer,
            sources: build_sources(&retrieved),
        })
    }
}

pub fn build_prompt(question: &str, results: &[RetrievalResult]) -> String {
    let mut context = String::new();
    for (idx, result) in results.iter().enumerate() {
        let source = source_label(&result.chunk.source, idx + 1);
        let snippet = truncate_chars(&result.chunk.content, PROMPT_SNIPPET_CHARS).replace('\n', " ");
        context.push_str(&format!("[{source}] {snippet}\n\n"));
    }

    format!("{ANSWER_TEMPLATE}\nCONTEXT:\n{context}\nQUESTION:\n{question}\n\nANSWER:\n")
}

fn build_sources(results: &[RetrievalResult]) -> Vec<SourceSnippet> {
    results
        .iter()
        .map(|result| SourceSnippet {
            source: if result.chunk.source.trim().is_empty() {
                "unknown".to_string()
            } else {
                result.chunk.source.clone()
            },
            page: result.chunk.page,
            snippet: truncate_chars(&result.chunk.content, RESPONSE_SNIPPET_CHARS).to_string(),
        })
        .collect()
}

fn source_label(source: &str, position: usize) -> String {
    if source.trim().is_empty() {
        format!("doc_{position}")
    } else {
        source.to_string()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
