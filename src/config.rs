use std::env;
use std::path::PathBuf;

use anyhow::Result;

/// Characters of each retrieved chunk that go into the prompt.
pub const PROMPT_SNIPPET_CHARS: usize = 500;
/// Characters of each retrieved chunk echoed back in `/ask` responses.
pub const RESPONSE_SNIPPET_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub answer_model: String,
    pub embedding_model: String,
    pub embedding_context_tokens: usize,
    pub max_output_tokens: usize,
}

#[derive(Clone, Debug)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub upload_dir: PathBuf,
    pub index_dir: PathBuf,
    pub ollama_base_url: String,
    pub gemini_base_url: String,
    pub gemini_api_key: Option<String>,
    pub max_upload_bytes: usize,
    pub models: ModelConfig,
    pub chunks: ChunkConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("TUTORQA_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            upload_dir: env::var("TUTORQA_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploaded_files")),
            index_dir: env::var("TUTORQA_INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("vector_index")),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            gemini_api_key: env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            max_upload_bytes: env_number("MAX_UPLOAD_BYTES", 64 * 1024 * 1024),
            models: ModelConfig {
                answer_model: env::var("ANSWER_MODEL")
                    .unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "all-minilm".to_string()),
                embedding_context_tokens: env_number(
                    "EMBEDDING_CONTEXT_TOKENS",
                    crate::ollama::DEFAULT_CONTEXT_TOKENS,
                ),
                max_output_tokens: env_number("MAX_OUTPUT_TOKENS", 512),
            },
            chunks: ChunkConfig {
                chunk_size: env_number("CHUNK_SIZE", 800),
                chunk_overlap: env_number("CHUNK_OVERLAP", 100),
                top_k: env_number("TOP_K", 4),
            },
        }
    }

    /// The generation API key; answering questions is impossible without it.
    pub fn require_gemini_key(&self) -> Result<&str> {
        self.gemini_api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("set the GEMINI_API_KEY environment variable"))
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join("index.sqlite3")
    }
}

fn env_number(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
