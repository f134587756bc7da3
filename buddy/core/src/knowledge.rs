//! Knowledge Base
//!
//! The collaborator that owns uploaded study materials. Chunking, embedding
//! and vector search happen in an external indexer that reads the upload
//! directory; this side stores documents and answers "is there anything to
//! ask about?".

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Magic bytes at the start of every PDF file
const PDF_MAGIC: &[u8] = b"%PDF-";

/// An uploaded document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    /// File name as uploaded (no directories)
    pub filename: String,
    /// Raw file contents
    pub bytes: Vec<u8>,
}

impl Document {
    /// Create a document from a name and contents
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a document from disk, keeping only the file name
    ///
    /// # Errors
    ///
    /// Fails if the path has no file name or cannot be read.
    pub async fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        Ok(Self { filename, bytes })
    }
}

/// Outcome of one ingestion call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// File names stored
    pub stored: Vec<String>,
    /// File names refused, with the reason
    pub rejected: Vec<(String, String)>,
}

impl IngestReport {
    /// Whether at least one document was stored
    #[must_use]
    pub fn any_stored(&self) -> bool {
        !self.stored.is_empty()
    }
}

/// Store of study materials
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Store documents; per-document problems go into the report
    async fn ingest(&self, documents: Vec<Document>) -> anyhow::Result<IngestReport>;

    /// Number of stored documents
    async fn document_count(&self) -> anyhow::Result<usize>;

    /// Whether any study material is available
    ///
    /// A store that cannot be read is an error, not an empty store.
    async fn has_documents(&self) -> anyhow::Result<bool> {
        Ok(self.document_count().await? > 0)
    }
}

/// Metadata for one stored document
#[derive(Clone, Debug)]
pub struct DocumentInfo {
    /// Location on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// When it was stored or first seen
    pub ingested_at: DateTime<Utc>,
}

/// Knowledge base backed by an upload directory of PDFs
#[derive(Debug)]
pub struct DirectoryKnowledgeBase {
    root: PathBuf,
    index: DashMap<String, DocumentInfo>,
}

impl DirectoryKnowledgeBase {
    /// Open (creating if needed) an upload directory and index its PDFs
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or listed.
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", root.display()))?;

        let kb = Self {
            root,
            index: DashMap::new(),
        };
        let found = kb.refresh().await?;
        tracing::info!(
            root = %kb.root.display(),
            documents = found,
            "Knowledge base opened"
        );
        Ok(kb)
    }

    /// Upload directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan the directory, picking up files added or removed externally
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be listed.
    pub async fn refresh(&self) -> anyhow::Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| anyhow::anyhow!("failed to list {}: {e}", self.root.display()))?;

        let mut seen = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !has_pdf_extension(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            self.index.entry(name.clone()).or_insert_with(|| DocumentInfo {
                path: entry.path(),
                size: metadata.len(),
                ingested_at: Utc::now(),
            });
            seen.push(name);
        }

        self.index.retain(|name, _| seen.contains(name));
        Ok(self.index.len())
    }

    /// Stored documents, sorted by name
    #[must_use]
    pub fn documents(&self) -> Vec<(String, DocumentInfo)> {
        let mut documents: Vec<_> = self
            .index
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        documents
    }
}

#[async_trait]
impl KnowledgeBase for DirectoryKnowledgeBase {
    async fn ingest(&self, documents: Vec<Document>) -> anyhow::Result<IngestReport> {
        let mut report = IngestReport::default();

        for document in documents {
            let name = match check_document(&document) {
                Ok(name) => name,
                Err(reason) => {
                    tracing::warn!(filename = %document.filename, %reason, "Document rejected");
                    report.rejected.push((document.filename, reason));
                    continue;
                }
            };

            let path = self.root.join(&name);
            if let Err(e) = tokio::fs::write(&path, &document.bytes).await {
                tracing::warn!(
                    filename = %name,
                    path = %path.display(),
                    error = %e,
                    "Document write failed"
                );
                report.rejected.push((name, format!("failed to write: {e}")));
                continue;
            }

            self.index.insert(
                name.clone(),
                DocumentInfo {
                    path,
                    size: document.bytes.len() as u64,
                    ingested_at: Utc::now(),
                },
            );
            tracing::info!(filename = %name, bytes = document.bytes.len(), "Document stored");
            report.stored.push(name);
        }

        Ok(report)
    }

    async fn document_count(&self) -> anyhow::Result<usize> {
        self.refresh().await
    }
}

fn has_pdf_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn check_document(document: &Document) -> Result<String, String> {
    let name = document.filename.trim();
    if name.is_empty() {
        return Err("empty file name".to_string());
    }
    if name.contains(&['/', '\\'][..]) || name.starts_with('.') {
        return Err("file name must not contain a path".to_string());
    }
    if !has_pdf_extension(name) {
        return Err("only PDF documents are accepted".to_string());
    }
    if !document.bytes.starts_with(PDF_MAGIC) {
        return Err("contents are not a PDF".to_string());
    }
    Ok(name.to_string())
}
