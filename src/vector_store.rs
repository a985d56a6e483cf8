use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::db::Database;
use crate::models::{IndexEntry, RetrievalResult, SourceManifest};

/// Exhaustive nearest-neighbour index over squared L2 distance.
#[derive(Debug, Default)]
pub struct FlatIndex {
    entries: Vec<IndexEntry>,
    dimension: Option<usize>,
}

impl FlatIndex {
    pub fn new(entries: Vec<IndexEntry>) -> Result<Self> {
        let dimension = entries.first().map(|entry| entry.vector.len());
        if let Some(dimension) = dimension {
            if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimension) {
                anyhow::bail!(
                    "chunk {} has a {}-dimensional vector, expected {}",
                    bad.chunk.id,
                    bad.vector.len(),
                    dimension
                );
            }
        }

        Ok(Self { entries, dimension })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` closest chunks, nearest first. Equal distances keep index order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let Some(dimension) = self.dimension else {
            return Ok(vec![]);
        };
        if query.len() != dimension {
            anyhow::bail!(
                "query vector has {} dimensions but the index holds {}-dimensional vectors",
                query.len(),
                dimension
            );
        }

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (l2_distance_squared(query, &entry.vector), entry))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, entry)| RetrievalResult {
                chunk: entry.chunk.clone(),
                distance,
            })
            .collect())
    }
}

pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index persisted to a SQLite file and cached in memory after first use.
#[derive(Clone)]
pub struct VectorStore {
    index_path: PathBuf,
    cached: Arc<RwLock<Option<Arc<FlatIndex>>>>,
}

impl VectorStore {
    pub fn new(index_path: PathBuf) -> Self {
        Self {
            index_path,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Replaces the persisted and cached index with `entries`.
    pub async fn rebuild(&self, entries: Vec<IndexEntry>, sources: &[SourceManifest]) -> Result<()> {
        let index = FlatIndex::new(entries)?;
        let mut cached = self.cached.write().await;

        let db = Database::create(&self.index_path).await?;
        let written = db.replace_index(&index.entries, sources).await;
        db.close().await;
        written?;

        *cached = Some(Arc::new(index));
        Ok(())
    }

    /// The current index, loading it from disk on first use. `None` means no
    /// index has ever been built.
    pub async fn load(&self) -> Result<Option<Arc<FlatIndex>>> {
        if let Some(index) = self.cached.read().await.as_ref() {
            return Ok(Some(index.clone()));
        }

        let mut cached = self.cached.write().await;
        if let Some(index) = cached.as_ref() {
            return Ok(Some(index.clone()));
        }

        if !tokio::fs::try_exists(&self.index_path).await? {
            return Ok(None);
        }

        let db = Database::open_existing(&self.index_path).await?;
        let entries = db.load_entries().await;
        db.close().await;

        let index = Arc::new(FlatIndex::new(entries?)?);
        tracing::info!(
            "loaded index with {} chunks from {}",
            index.len(),
            self.index_path.display()
        );
        *cached = Some(index.clone());
        Ok(Some(index))
    }

    pub async fn sources(&self) -> Result<Vec<SourceManifest>> {
        if !tokio::fs::try_exists(&self.index_path).await? {
            return Ok(vec![]);
        }

        let db = Database::open_existing(&self.index_path).await?;
        let sources = db.list_sources().await;
        db.close().await;
        sources
    }
}
