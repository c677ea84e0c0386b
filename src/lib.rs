//! # Research Federation
//!
//! A federated query layer over bibliographic backends (PubMed and Scopus).
//!
//! Callers describe *what* they want as a [`selector`] (a tree of booleans over
//! a record shape's fields) and *which* records as a predicate query. The layer
//! plans the cheapest set of remote operations that can satisfy the selector,
//! runs them, projects the results down to exactly the selected fields and,
//! when asked, reconciles a broad backend with a detailed one by DOI.
//!
//! ## Architecture
//!
//! - [`models`]: record shapes, identifier sets, records and search queries
//! - [`selector`]: selector trees and their algebra (containment, union, ...)
//! - [`projection`]: per-selector models that project full records
//! - [`planning`]: capability groups and execution plans
//! - [`sources`]: PubMed and Scopus clients
//! - [`engine`]: the [`QueryEngine`] trait and one engine per backend and record type
//! - [`federation`]: cross-backend reconciliation
//! - [`utils`]: transport, retries, quota store and result-count cache
//! - [`config`]: configuration management

pub mod config;
pub mod engine;
pub mod federation;
pub mod models;
pub mod planning;
pub mod projection;
pub mod selector;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use engine::{QueryEngine, QueryError, QueryResponse};
pub use federation::{Reconciler, ReconcileConfig};
pub use models::{Author, Institution, Paper, PaperSearchQuery, Predicate};
pub use selector::{AuthorSelector, InstitutionSelector, PaperSelector, Selector};
pub use sources::{Backend, SourceError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
