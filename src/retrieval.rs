use anyhow::Result;

use crate::models::RetrievalResult;
use crate::ollama::OllamaClient;
use crate::vector_store::VectorStore;

/// Outcome of a retrieval. A missing index is reported separately from an
/// index that simply matched nothing.
#[derive(Debug)]
pub enum Retrieval {
    NoIndex,
    Hits(Vec<RetrievalResult>),
}

#[derive(Clone)]
pub struct Retriever {
    store: VectorStore,
    ollama: OllamaClient,
    embedding_model: String,
}

impl Retriever {
    pub fn new(store: VectorStore, ollama: OllamaClient, embedding_model: impl Into<String>) -> Self {
        Self {
            store,
            ollama,
            embedding_model: embedding_model.into(),
        }
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Retrieval> {
        let Some(index) = self.store.load().await? else {
            return Ok(Retrieval::NoIndex);
        };
        if index.is_empty() {
            return Ok(Retrieval::Hits(vec![]));
        }

        let embedding = self.ollama.embed(&self.embedding_model, query).await?;
        let hits = index.search(&embedding, top_k.max(1))?;
        tracing::debug!("retrieved {} chunks for query", hits.len());

        Ok(Retrieval::Hits(hits))
    }
}
