//! Clients for the literature backends.
//!
//! Two backends are supported:
//!
//! - **PubMed** (NCBI E-utilities): broad biomedical coverage, free, returns XML
//! - **Scopus** (Elsevier APIs): detailed metadata and metrics, weekly request
//!   quota, returns JSON
//!
//! Clients are written against [`Transport`](crate::utils::Transport), so tests
//! drive them with [`MockTransport`] instead of the network. They map backend
//! responses onto the record types in [`crate::models`] and leave planning,
//! merging and projection to [`crate::engine`].

pub mod mock;
pub(crate) mod pubmed;
pub(crate) mod scopus;

pub use mock::MockTransport;
pub use pubmed::{PaperLinks, PubMedClient, SearchHits, PUBMED_BASE_URL};
pub use scopus::{
    AuthorMetrics, ScopusClient, ScopusSearch, SCOPUS_BASE_URL, SCOPUS_PAGE_SIZE,
    SCOPUS_WEEKLY_QUOTA,
};

use serde::Serialize;
use std::fmt;

/// A remote literature backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    PubMed,
    Scopus,
}

impl Backend {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Backend::PubMed => "PubMed",
            Backend::Scopus => "Scopus",
        }
    }

    /// Key used for quota and result-count bookkeeping
    pub fn service(&self) -> &'static str {
        match self {
            Backend::PubMed => "pubmed",
            Backend::Scopus => "scopus",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Errors that can occur when talking to a backend
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(String),

    /// Parsing error (XML or JSON)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded, with the retry-after delay in seconds if given
    #[error("Rate limit exceeded")]
    RateLimit(Option<u64>),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-success status from the backend
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("Error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}

impl From<quick_xml::DeError> for SourceError {
    fn from(err: quick_xml::DeError) -> Self {
        SourceError::Parse(format!("XML: {}", err))
    }
}
