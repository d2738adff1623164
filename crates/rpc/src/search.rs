//! Query and hit types shared by the daemon and its clients
use std::path::PathBuf;
use serde::{Serialize, Deserialize};

/// URI scheme used for documents backed by a local file.
pub const FILE_SCHEME: &str = "file://";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Raw free-text search clauses, all of which must match
    pub clauses: Vec<String>,
}

impl QueryRequest {
    pub fn new<I, S>(clauses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clauses: clauses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.iter().all(|c| c.trim().is_empty())
    }
}

/// One matched document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Opaque URI-like key, unique within one result stream
    pub uri: String,
    /// Higher means more relevant
    pub score: f32,
    /// Name of the backend that produced the hit
    pub source: String,
    /// File, Directory, ...
    pub hit_type: String,
}

impl Hit {
    pub fn new(uri: impl Into<String>, score: f32, source: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            score,
            source: source.into(),
            hit_type: "File".to_string(),
        }
    }

    pub fn with_type(mut self, hit_type: impl Into<String>) -> Self {
        self.hit_type = hit_type.into();
        self
    }

    /// A hit without a key or with a meaningless score is never delivered.
    pub fn is_valid(&self) -> bool {
        !self.uri.is_empty() && self.score.is_finite() && self.score >= 0.0
    }

    /// Short identifier for display: the URI without its `file://` scheme.
    pub fn short_id(&self) -> &str {
        self.uri.strip_prefix(FILE_SCHEME).unwrap_or(&self.uri)
    }
}

/// One entry of the name-to-document index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub name: String,
    pub uri: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexRequest {
    /// Paths under the configured roots to rescan; empty means every root
    pub paths: Vec<PathBuf>,
}
