use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use tutorqa::chat::{ChatError, ChatService};
use tutorqa::config::AppConfig;
use tutorqa::gemini::GeminiClient;
use tutorqa::ollama::OllamaClient;
use tutorqa::retrieval::Retriever;
use tutorqa::vector_store::VectorStore;

#[derive(Parser, Debug)]
#[command(name = "eval")]
#[command(about = "Run a set of questions against the current index")]
struct Cli {
    #[arg(long, default_value = "eval/questions.jsonl")]
    file: String,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct EvalQuestion {
    id: String,
    question: String,
    #[serde(default)]
    expect_contains: Vec<String>,
    #[serde(default)]
    expect_source: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let ollama = OllamaClient::new(config.ollama_base_url.clone())
        .with_context_tokens(config.models.embedding_context_tokens);
    let gemini = GeminiClient::new(
        config.gemini_base_url.clone(),
        config.require_gemini_key()?.to_string(),
    );
    let retriever = Retriever::new(
        VectorStore::new(config.index_path()),
        ollama,
        config.models.embedding_model.clone(),
    );
    let chat = ChatService::new(config, retriever, gemini);

    let questions = load_questions(&cli.file)?;
    if questions.is_empty() {
        anyhow::bail!("no questions found in {}", cli.file);
    }

    let mut total = 0usize;
    let mut grounded = 0usize;
    let mut pass_contains = 0usize;
    let mut source_expectations = 0usize;
    let mut source_hits = 0usize;

    for item in questions {
        total += 1;

        let answer = match chat.answer(&item.question, cli.top_k).await {
            Ok(answer) => answer,
            Err(ChatError::NoIndex) => anyhow::bail!("no index available; run `ingest` first"),
            Err(ChatError::Other(err)) => {
                return Err(err.context(format!("failed eval question {}", item.id)))
            }
        };

        if !answer.answer.trim().is_empty() && !answer.sources.is_empty() {
            grounded += 1;
        }

        let answer_lower = answer.answer.to_lowercase();
        if item
            .expect_contains
            .iter()
            .all(|needle| answer_lower.contains(&needle.to_lowercase()))
        {
            pass_contains += 1;
        }

        if let Some(expected) = &item.expect_source {
            source_expectations += 1;
            if answer.sources.iter().any(|s| s.source.contains(expected.as_str())) {
                source_hits += 1;
            }
        }

        if cli.verbose {
            println!("--- {} ---", item.id);
            println!("Q: {}", item.question);
            println!("A: {}", answer.answer.replace('\n', " "));
            for source in &answer.sources {
                println!("   [{}] {}", source.source, source.snippet.replace('\n', " "));
            }
            println!();
        }
    }

    println!("Eval questions: {}", total);
    println!(
        "Answered with sources: {:.1}%",
        ratio(grounded, total) * 100.0
    );
    println!(
        "Contains/expected accuracy: {:.1}%",
        ratio(pass_contains, total) * 100.0
    );
    if source_expectations > 0 {
        println!(
            "Expected-source hit rate: {:.1}% ({}/{})",
            ratio(source_hits, source_expectations) * 100.0,
            source_hits,
            source_expectations
        );
    }

    Ok(())
}

fn load_questions(path: &str) -> Result<Vec<EvalQuestion>> {
    let file = File::open(path).with_context(|| format!("failed opening {}", path))?;
    let reader = BufReader::new(file);
    let mut questions = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parsed: EvalQuestion = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON at {} line {}", path, idx + 1))?;
        questions.push(parsed);
    }

    Ok(questions)
}

fn ratio(n: usize, d: usize) -> f32 {
    if d == 0 {
        return 0.0;
    }
    n as f32 / d as f32
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
