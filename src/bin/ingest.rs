use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tutorqa::config::AppConfig;
use tutorqa::ingest::Ingestor;
use tutorqa::ollama::OllamaClient;
use tutorqa::vector_store::VectorStore;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Build the question-answering index from files already on disk")]
struct Cli {
    /// PDF or text file to index; repeat for several. Replaces the current index.
    #[arg(long = "file", required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    let ollama = OllamaClient::new(config.ollama_base_url.clone())
        .with_context_tokens(config.models.embedding_context_tokens);
    let store = VectorStore::new(config.index_path());
    let ingestor = Ingestor::new(config.clone(), ollama, store.clone())?;

    let result = ingestor.ingest(&cli.files).await?;

    println!(
        "Index built at {}. docs={} chunks={}",
        config.index_path().display(),
        result.doc_count,
        result.chunk_count
    );
    for source in store.sources().await? {
        println!("  {} chunks={} sha256={}", source.path, source.chunk_count, source.sha256);
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
