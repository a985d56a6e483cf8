use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::models::{Chunk, IndexEntry, SourceManifest};

/// SQLite file backing the vector index.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the index file, creating it (and its directory) first.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Self::connect(path, true).await
    }

    /// Opens an existing index file; fails when it does not exist.
    pub async fn open_existing(path: &Path) -> Result<Self> {
        Self::connect(path, false).await
    }

    async fn connect(path: &Path, create: bool) -> Result<Self> {
        let dsn = format!("sqlite://{}", path.display());
        let options = SqliteConnectOptions::from_str(&dsn)?.create_if_missing(create);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open index database {}", path.display()))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                position INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                source TEXT NOT NULL,
                page INTEGER,
                char_count INTEGER NOT NULL,
                source_hash TEXT NOT NULL,
                vector BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sources (
                path TEXT PRIMARY KEY,
                sha256 TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                indexed_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Swaps the stored index for `entries` in a single transaction.
    pub async fn replace_index(
        &self,
        entries: &[IndexEntry],
        sources: &[SourceManifest],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sources").execute(&mut *tx).await?;

        for (position, entry) in entries.iter().enumerate() {
            insert_entry_tx(&mut tx, position as i64, entry).await?;
        }

        for source in sources {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO sources (path, sha256, chunk_count, indexed_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&source.path)
            .bind(&source.sha256)
            .bind(source.chunk_count)
            .bind(source.indexed_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_entries(&self) -> Result<Vec<IndexEntry>> {
        let rows: Vec<SqliteRow> = sqlx::query(
            r#"
            SELECT id, content, source, page, char_count, source_hash, vector
            FROM chunks
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceManifest>> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT path, sha256, chunk_count, indexed_at FROM sources ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<SourceManifest> {
                let indexed_at: String = row.get("indexed_at");
                Ok(SourceManifest {
                    path: row.get("path"),
                    sha256: row.get("sha256"),
                    chunk_count: row.get("chunk_count"),
                    indexed_at: DateTime::parse_from_rfc3339(&indexed_at)?.with_timezone(&Utc),
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn insert_entry_tx(
    tx: &mut Transaction<'_, Sqlite>,
    position: i64,
    entry: &IndexEntry,
) -> Result<()> {
    let chunk = &entry.chunk;
    sqlx::query(
        r#"
        INSERT INTO chunks (position, id, content, source, page, char_count, source_hash, vector)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(position)
    .bind(&chunk.id)
    .bind(&chunk.content)
    .bind(&chunk.source)
    .bind(chunk.page)
    .bind(chunk.char_count)
    .bind(&chunk.source_hash)
    .bind(vector_to_bytes(&entry.vector))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn row_to_entry(row: SqliteRow) -> Result<IndexEntry> {
    let bytes: Vec<u8> = row.get("vector");
    Ok(IndexEntry {
        vector: bytes_to_vector(&bytes)?,
        chunk: Chunk {
            id: row.get("id"),
            content: row.get("content"),
            source: row.get("source"),
            page: row.get("page"),
            char_count: row.get("char_count"),
            source_hash: row.get("source_hash"),
        },
    })
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("stored vector has invalid length {}", bytes.len());
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
