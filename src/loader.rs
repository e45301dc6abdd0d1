//! Corpus loader.
//!
//! Reads the flat documents directory and turns every recognised file into
//! [`Document`]s. Unrecognised extensions are skipped silently; a file that
//! fails to read or parse is logged and left out, and loading continues.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::extract::{self, Format};
use crate::models::Document;

/// Regular files directly under `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn corpus_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry =
            entry.with_context(|| format!("Failed to list documents in {}", dir.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Load every recognised document under `dir`, creating the directory if
/// it does not exist yet.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create documents dir {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), "created empty documents directory");
        return Ok(Vec::new());
    }

    let mut docs = Vec::new();
    for path in corpus_files(dir)? {
        let Some(format) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Format::from_extension)
        else {
            tracing::debug!(path = %path.display(), "skipping unsupported file");
            continue;
        };

        match load_file(&path, format) {
            Ok(mut file_docs) => docs.append(&mut file_docs),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load document, skipping");
            }
        }
    }
    Ok(docs)
}

fn load_file(path: &Path, format: Format) -> Result<Vec<Document>> {
    let bytes = std::fs::read(path)?;
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let units = extract::extract(&bytes, format)?;
    let docs = match format {
        Format::Pdf => units
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| Document::new(&source, Some(i as u32 + 1), text))
            .collect(),
        Format::PlainText | Format::Docx => units
            .into_iter()
            .map(|text| Document::new(&source, None, text))
            .collect(),
    };
    Ok(docs)
}
