use anyhow::Result;
use tracing_subscriber::EnvFilter;

use tutorqa::chat::ChatService;
use tutorqa::gemini::GeminiClient;
use tutorqa::ingest::Ingestor;
use tutorqa::ollama::OllamaClient;
use tutorqa::retrieval::Retriever;
use tutorqa::vector_store::VectorStore;
use tutorqa::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env();
    let api_key = config.require_gemini_key()?.to_string();

    let ollama = OllamaClient::new(config.ollama_base_url.clone())
        .with_context_tokens(config.models.embedding_context_tokens);
    let gemini = GeminiClient::new(config.gemini_base_url.clone(), api_key);
    let store = VectorStore::new(config.index_path());

    let retriever = Retriever::new(
        store.clone(),
        ollama.clone(),
        config.models.embedding_model.clone(),
    );
    let chat = ChatService::new(config.clone(), retriever, gemini);
    let ingestor = Ingestor::new(config.clone(), ollama, store)?;

    run_server(config, chat, ingestor).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
