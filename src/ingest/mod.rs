pub mod pdf;
pub mod text;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chunker::TextSplitter;
use crate::config::AppConfig;
use crate::models::{Chunk, Document, IndexEntry, SourceManifest};
use crate::ollama::OllamaClient;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Self {
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        if is_pdf {
            DocumentKind::Pdf
        } else {
            DocumentKind::PlainText
        }
    }
}

#[derive(Clone)]
pub struct Ingestor {
    config: AppConfig,
    ollama: OllamaClient,
    store: VectorStore,
    splitter: TextSplitter,
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub doc_count: usize,
    pub chunk_count: usize,
}

impl Ingestor {
    pub fn new(config: AppConfig, ollama: OllamaClient, store: VectorStore) -> Result<Self> {
        let splitter = TextSplitter::new(config.chunks.chunk_size, config.chunks.chunk_overlap)
            .context("invalid chunking configuration")?;

        Ok(Self {
            config,
            ollama,
            store,
            splitter,
        })
    }

    /// Loads, chunks and embeds `paths`, then replaces the whole index with
    /// the result. Nothing from a previous ingest survives.
    pub async fn ingest(&self, paths: &[PathBuf]) -> Result<IngestResult> {
        let documents = load_documents(paths).await?;
        tracing::info!(
            "loaded {} documents from {} files",
            documents.len(),
            paths.len()
        );

        let chunks = build_chunks(&documents, &self.splitter);
        if chunks.is_empty() {
            tracing::warn!("no text extracted from {} files", paths.len());
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self
                .ollama
                .embed(&self.config.models.embedding_model, &chunk.content)
                .await
                .with_context(|| format!("failed embedding for chunk {}", chunk.id))?;
            entries.push(IndexEntry { chunk, vector });
        }

        let manifests = build_manifests(paths, &documents, &entries);
        let chunk_count = entries.len();
        self.store.rebuild(entries, &manifests).await?;

        tracing::info!("index rebuilt with {} chunks", chunk_count);
        Ok(IngestResult {
            doc_count: documents.len(),
            chunk_count,
        })
    }
}

pub async fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for path in paths {
        let source_hash = file_sha256(path).await?;
        let mut loaded = match DocumentKind::from_path(path) {
            DocumentKind::Pdf => pdf::load_pdf(path, &source_hash).await?,
            DocumentKind::PlainText => text::load_text(path, &source_hash).await?,
        };
        tracing::debug!("{} yielded {} documents", path.display(), loaded.len());
        documents.append(&mut loaded);
    }

    Ok(documents)
}

pub fn build_chunks(documents: &[Document], splitter: &TextSplitter) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for document in documents {
        for content in splitter.split(&document.content) {
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                char_count: content.chars().count() as i64,
                content,
                source: document.source.clone(),
                page: document.page,
                source_hash: document.source_hash.clone(),
            });
        }
    }

    chunks
}

fn build_manifests(
    paths: &[PathBuf],
    documents: &[Document],
    entries: &[IndexEntry],
) -> Vec<SourceManifest> {
    let mut chunk_counts: HashMap<&str, i64> = HashMap::new();
    for entry in entries {
        *chunk_counts.entry(entry.chunk.source.as_str()).or_insert(0) += 1;
    }

    let hashes: HashMap<&str, &str> = documents
        .iter()
        .map(|doc| (doc.source.as_str(), doc.source_hash.as_str()))
        .collect();

    let now = Utc::now();
    paths
        .iter()
        .map(|path| {
            let source = path.display().to_string();
            SourceManifest {
                sha256: hashes.get(source.as_str()).copied().unwrap_or_default().to_string(),
                chunk_count: chunk_counts.get(source.as_str()).copied().unwrap_or(0),
                path: source,
                indexed_at: now,
            }
        })
        .collect()
}

async fn file_sha256(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed reading file for hash: {}", path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub(crate) fn normalize_text(input: &str) -> String {
    input.replace('\u{00A0}', " ").replace("\r\n", "\n")
}
