//! Shared-file book and severities

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use vigilmesh_protocol::{ContentId, OrgId};

use crate::error::{BookError, Result};

/// Severity of a shared file, driving how aggressively its metadata is
/// re-gossiped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Minor, Severity::Major, Severity::Critical];

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MINOR" => Ok(Severity::Minor),
            "MAJOR" => Ok(Severity::Major),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(BookError::UnknownSeverity(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "MINOR",
            Severity::Major => "MAJOR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one shared file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// Unix seconds after which the file is stale.
    pub expired_at: i64,
    /// Whether the bytes are present locally.
    pub available: bool,
    /// Local path when available, empty otherwise.
    pub path: String,
    /// Organisations allowed to download; empty means public.
    pub rights: Vec<OrgId>,
    pub severity: Severity,
    /// Opaque TL JSON describing the file.
    pub description: serde_json::Value,
}

/// Map of known shared files keyed by content id. A file is unique by
/// its cid; inserting a second time fails.
pub struct FileBook {
    files: RwLock<HashMap<ContentId, FileMeta>>,
}

impl FileBook {
    pub fn new() -> Self {
        FileBook {
            files: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add(&self, cid: ContentId, meta: FileMeta) -> Result<()> {
        let mut files = self.files.write().await;
        if files.contains_key(&cid) {
            return Err(BookError::FileExists(cid));
        }
        files.insert(cid, meta);
        Ok(())
    }

    pub async fn get(&self, cid: &ContentId) -> Option<FileMeta> {
        self.files.read().await.get(cid).cloned()
    }

    /// Flip a file to locally available at `path` after a successful
    /// download.
    pub async fn mark_available(&self, cid: &ContentId, path: String) -> Result<()> {
        let mut files = self.files.write().await;
        let meta = files.get_mut(cid).ok_or(BookError::UnknownFile(*cid))?;
        meta.available = true;
        meta.path = path;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }
}

impl Default for FileBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(available: bool) -> FileMeta {
        FileMeta {
            expired_at: 2_000_000_000,
            available,
            path: if available { "/tmp/f".into() } else { String::new() },
            rights: vec![],
            severity: Severity::Minor,
            description: serde_json::json!({"name": "sample"}),
        }
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!(Severity::parse("minor").unwrap(), Severity::Minor);
        assert_eq!(Severity::parse("MAJOR").unwrap(), Severity::Major);
        assert_eq!(Severity::parse("Critical").unwrap(), Severity::Critical);
        assert!(Severity::parse("urgent").is_err());
        assert_eq!(Severity::Critical.as_str(), "CRITICAL");
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let book = FileBook::new();
        let cid = ContentId::for_bytes(b"file");

        book.add(cid, meta(true)).await.unwrap();
        assert!(matches!(
            book.add(cid, meta(true)).await,
            Err(BookError::FileExists(_))
        ));
        assert_eq!(book.len().await, 1);
    }

    #[tokio::test]
    async fn test_mark_available() {
        let book = FileBook::new();
        let cid = ContentId::for_bytes(b"file");
        book.add(cid, meta(false)).await.unwrap();

        book.mark_available(&cid, "/downloads/f".to_string())
            .await
            .unwrap();
        let stored = book.get(&cid).await.unwrap();
        assert!(stored.available);
        assert_eq!(stored.path, "/downloads/f");

        let missing = ContentId::for_bytes(b"other");
        assert!(book.mark_available(&missing, "x".into()).await.is_err());
    }
}
