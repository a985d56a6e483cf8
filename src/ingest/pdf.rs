use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;

use super::normalize_text;
use crate::models::Document;

/// One document per non-empty page, numbered from 1. Uses poppler's
/// `pdftotext` when it is installed and `pdf-extract` otherwise.
pub async fn load_pdf(pdf_path: &Path, source_hash: &str) -> Result<Vec<Document>> {
    let source = pdf_path.display().to_string();
    let mut documents = Vec::new();

    if has_command("pdftotext").await {
        let page_count = get_pdf_page_count(pdf_path).await.unwrap_or(0);
        for page in 1..=page_count {
            let output = Command::new("pdftotext")
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string())
                .arg("-nopgbrk")
                .arg(pdf_path)
                .arg("-")
                .output()
                .await
                .with_context(|| format!("failed to run pdftotext for page {}", page))?;

            if !output.status.success() {
                tracing::warn!("pdftotext failed on page {} of {}", page, source);
                continue;
            }

            let content = normalize_text(&String::from_utf8_lossy(&output.stdout));
            if content.trim().is_empty() {
                continue;
            }

            documents.push(Document {
                content,
                source: source.clone(),
                page: Some(page as i64),
                source_hash: source_hash.to_string(),
            });
        }
    }

    if documents.is_empty() {
        let path = pdf_path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || pdf_extract::extract_text_by_pages(&path))
            .await
            .context("PDF extraction task panicked")?
            .with_context(|| format!("failed to extract text from PDF: {}", source))?;

        for (idx, text) in pages.iter().enumerate() {
            let content = normalize_text(text);
            if content.trim().is_empty() {
                continue;
            }

            documents.push(Document {
                content,
                source: source.clone(),
                page: Some(idx as i64 + 1),
                source_hash: source_hash.to_string(),
            });
        }
    }

    Ok(documents)
}

async fn get_pdf_page_count(pdf_path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .context("failed to run pdfinfo")?;

    if !output.status.success() {
        anyhow::bail!("pdfinfo exited with non-zero status");
    }

    parse_page_count(&String::from_utf8_lossy(&output.stdout))
}

fn parse_page_count(pdfinfo: &str) -> Result<usize> {
    let regex = Regex::new(r"(?m)^Pages:\s+(\d+)\s*$")?;
    regex
        .captures(pdfinfo)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .ok_or_else(|| anyhow::anyhow!("unable to parse page count from pdfinfo"))
}

async fn has_command(binary: &str) -> bool {
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}
