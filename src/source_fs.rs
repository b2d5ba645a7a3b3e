//! Local-folder document source.
//!
//! Walks a root directory with include/exclude globs and serves files as
//! source items, mapping extensions to the closed mime set in
//! [`crate::parse`]. Mainly used for local runs and tests; the production
//! deployment points at a drive folder instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;
use crate::errors::PipelineError;
use crate::models::{FetchedDocument, SourceEntry};
use crate::parse;
use crate::source::DocumentSource;

#[derive(Debug)]
pub struct FilesystemSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl FilesystemSource {
    pub fn new(config: &FilesystemSourceConfig) -> Result<Self, PipelineError> {
        if !config.root.exists() {
            return Err(PipelineError::Permanent(format!(
                "source root does not exist: {}",
                config.root.display()
            )));
        }
        let mut excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
        excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    fn relative_id(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list(&self) -> Result<Vec<SourceEntry>, PipelineError> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry =
                entry.map_err(|e| PipelineError::Transient(format!("walk failed: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = self.relative_id(entry.path());
            if self.exclude.is_match(&rel) || !self.include.is_match(&rel) {
                continue;
            }
            entries.push(SourceEntry {
                id: rel.clone(),
                name: entry.file_name().to_string_lossy().to_string(),
                mime_type: mime_for_path(entry.path()),
                modified: file_modified(entry.path())?,
            });
        }
        // Deterministic listing order.
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn fetch(&self, id: &str) -> Result<FetchedDocument, PipelineError> {
        let path = self.root.join(id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::Transient(format!("read {}: {e}", path.display())))?;
        Ok(FetchedDocument {
            bytes,
            mime_type: mime_for_path(&path),
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, PipelineError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| PipelineError::Permanent(format!("bad glob {pattern}: {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| PipelineError::Permanent(format!("glob set: {e}")))
}

fn mime_for_path(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") => parse::MIME_MARKDOWN,
        Some("csv") => parse::MIME_CSV,
        Some("xlsx") => parse::MIME_XLSX,
        _ => parse::MIME_TEXT,
    }
    .to_string()
}

fn file_modified(path: &Path) -> Result<DateTime<Utc>, PipelineError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| PipelineError::Transient(format!("stat {}: {e}", path.display())))?;
    let secs = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Ok(Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_for(dir: &Path) -> FilesystemSource {
        FilesystemSource::new(&FilesystemSourceConfig {
            root: dir.to_path_buf(),
            include_globs: vec!["**/*.md".into(), "**/*.csv".into()],
            exclude_globs: vec!["**/skip/**".into()],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lists_matching_files_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.md"), "beta").unwrap();
        std::fs::write(tmp.path().join("a.csv"), "h\n1").unwrap();
        std::fs::write(tmp.path().join("c.bin"), [0u8]).unwrap();
        std::fs::create_dir(tmp.path().join("skip")).unwrap();
        std::fs::write(tmp.path().join("skip/d.md"), "hidden").unwrap();

        let entries = source_for(tmp.path()).list().await.unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a.csv", "b.md"]);
        assert_eq!(entries[0].mime_type, parse::MIME_CSV);
        assert_eq!(entries[1].mime_type, parse::MIME_MARKDOWN);
    }

    #[tokio::test]
    async fn fetch_returns_bytes_and_mime() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.md"), "# title").unwrap();

        let doc = source_for(tmp.path()).fetch("a.md").await.unwrap();
        assert_eq!(doc.bytes, b"# title");
        assert_eq!(doc.mime_type, parse::MIME_MARKDOWN);
    }

    #[test]
    fn missing_root_is_permanent_error() {
        let err = FilesystemSource::new(&FilesystemSourceConfig {
            root: PathBuf::from("/definitely/not/here"),
            include_globs: vec![],
            exclude_globs: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::Permanent(_)));
    }
}
