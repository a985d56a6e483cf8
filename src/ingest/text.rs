use std::path::Path;

use anyhow::{Context, Result};

use super::normalize_text;
use crate::models::Document;

/// Reads a UTF-8 text file as one document. Invalid UTF-8 is an error, not
/// silently replaced.
pub async fn load_text(path: &Path, source_hash: &str) -> Result<Vec<Document>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read text file: {}", path.display()))?;
    let raw = String::from_utf8(bytes)
        .with_context(|| format!("{} is not valid UTF-8 text", path.display()))?;

    let content = normalize_text(&raw);
    if content.trim().is_empty() {
        return Ok(vec![]);
    }

    Ok(vec![Document {
        content,
        source: path.display().to_string(),
        page: None,
        source_hash: source_hash.to_string(),
    }])
}
