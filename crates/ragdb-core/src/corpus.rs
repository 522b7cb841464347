//! Corpus source loading.
//!
//! The retrieval core treats all ingested text uniformly, so the supported
//! source formats are a closed set chosen from the path.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// A JSON array of `{url, section, title, text}` records.
    Json,
    /// One `{url, section, title, text}` record per line.
    JsonLines,
    /// A directory tree of `.txt` files, one document per file.
    TextDir,
}

impl SourceFormat {
    pub fn detect(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self::TextDir);
        }
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("jsonl") | Some("ndjson") => Ok(Self::JsonLines),
            _ => Err(Error::Ingestion(format!("unsupported corpus source: {}", path.display()))),
        }
    }
}

pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    if !path.exists() {
        return Err(Error::NotFound(format!("corpus source {}", path.display())));
    }
    let format = SourceFormat::detect(path)?;
    let docs = match format {
        SourceFormat::Json => {
            let raw = fs::read_to_string(path)?;
            serde_json::from_str::<Vec<Document>>(&raw)
                .map_err(|e| Error::Ingestion(format!("{}: {e}", path.display())))?
        }
        SourceFormat::JsonLines => {
            let raw = fs::read_to_string(path)?;
            raw.lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(i, line)| {
                    serde_json::from_str::<Document>(line)
                        .map_err(|e| Error::Ingestion(format!("{}:{}: {e}", path.display(), i + 1)))
                })
                .collect::<Result<Vec<_>>>()?
        }
        SourceFormat::TextDir => load_text_dir(path)?,
    };
    tracing::info!(path = %path.display(), ?format, documents = docs.len(), "loaded corpus");
    Ok(docs)
}

fn load_text_dir(root: &Path) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for file_path in list_txt_files(root) {
        let text = match fs::read_to_string(&file_path) {
            Ok(content) => content,
            Err(_) => String::from_utf8_lossy(&fs::read(&file_path)?).to_string(),
        };
        let relative = file_path.strip_prefix(root).unwrap_or(&file_path);
        let section = relative
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("misc")
            .to_string();
        let title = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        docs.push(Document {
            url: relative.to_string_lossy().replace('\\', "/"),
            section,
            title,
            text,
        });
    }
    Ok(docs)
}

fn list_txt_files(root: &Path) -> Vec<PathBuf> {
    let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txt"))
        .collect();
    txt_files.sort();
    txt_files
}

/// Content digest of a document set, used to key persisted stores.
pub fn corpus_digest(documents: &[Document]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for doc in documents {
        for part in [&doc.url, &doc.section, &doc.title, &doc.text] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }
    hasher.finalize()
}
