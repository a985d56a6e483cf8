use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Reduces a client-supplied filename to a safe basename: no directory
/// components, only ASCII letters, digits, `.`, `-` and `_`. Accented
/// letters are folded to their ASCII base.
pub fn secure_filename(name: &str) -> String {
    let basename = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let folded: String = basename.nfkd().filter(char::is_ascii).collect();

    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = collapsed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    filtered.trim_matches(['.', '_']).to_string()
}

/// Writes one uploaded file into `dir`, replacing an earlier upload of the
/// same name.
pub async fn save_upload(dir: &Path, filename: Option<&str>, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create upload dir {}", dir.display()))?;

    let mut name = filename.map(secure_filename).unwrap_or_default();
    if name.is_empty() {
        name = format!("upload-{}", Uuid::new_v4());
    }

    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to save upload {}", path.display()))?;

    tracing::debug!("saved {} bytes to {}", bytes.len(), path.display());
    Ok(path)
}
