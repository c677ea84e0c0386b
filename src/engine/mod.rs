//! Query engines: one per (backend, record type).
//!
//! An engine owns a [`Planner`] describing what its backend can return, runs
//! the remote calls a plan asks for and projects the raw records down to the
//! caller's selector. The flow is always the same:
//!
//! 1. plan the query (overselection check, operations, request estimate)
//! 2. check the estimate against the backend's remaining quota
//! 3. run the remote calls
//! 4. project every record with the model generated for the selector
//!
//! Steps 1 and 2 happen before any network traffic, so a query that cannot be
//! answered or paid for fails without spending requests.

pub mod mock;
mod pubmed;
mod scopus;

pub use pubmed::{render_pubmed_query, PubMedPaperEngine};
pub use scopus::{
    render_scopus_author_query, render_scopus_institution_query, render_scopus_paper_query,
    ScopusAuthorEngine, ScopusInstitutionEngine, ScopusPaperEngine,
};

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::models::{PredicateError, QueryField, Record, SearchQuery};
use crate::planning::{ExecutionPlan, Operation, Planner};
use crate::projection::{Model, ModelCache, ProjectedRecord, ProjectionError, TypeOverrides};
use crate::selector::{FieldPath, SelectorError, TypedSelector};
use crate::sources::{Backend, SourceError};

/// Errors raised while planning or running a query
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The selector asks for fields the backend cannot return
    #[error("{backend} cannot return: {}", join_paths(.fields))]
    NotSupported {
        backend: Backend,
        fields: Vec<FieldPath>,
    },

    /// The quota does not cover the planned requests
    #[error("Not enough {service} requests: need {needed}, {remaining} remaining")]
    NotEnoughRequests {
        service: String,
        needed: u64,
        remaining: u64,
    },

    #[error("Invalid predicate: {0}")]
    InvalidPredicate(#[from] PredicateError),

    /// The backend has no search syntax for this field
    #[error("{backend} cannot search on '{field}'")]
    UnsupportedPredicate {
        backend: Backend,
        field: &'static str,
    },

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

fn join_paths(fields: &[FieldPath]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Records as returned by the backend, before projection
#[derive(Debug, Clone)]
pub struct RawResults<R> {
    pub records: Vec<R>,
    /// Requests actually sent
    pub requests: u64,
}

/// What a query planned and spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryMetadata {
    pub backend: Backend,
    pub operations: Vec<Operation>,
    pub estimated_requests: u64,
    pub requests_used: u64,
}

impl QueryMetadata {
    fn planned(plan: &ExecutionPlan) -> Self {
        Self {
            backend: plan.backend,
            operations: plan.operations.list(),
            estimated_requests: plan.estimated_requests,
            requests_used: 0,
        }
    }
}

/// Projected records plus metadata
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub records: Vec<ProjectedRecord>,
    pub metadata: QueryMetadata,
}

/// A backend able to answer one kind of search query
#[async_trait]
pub trait QueryEngine: Send + Sync {
    type Field: QueryField;
    type Selector: TypedSelector;
    type Record: Record + Clone + Send + Sync + 'static;

    fn backend(&self) -> Backend;

    fn planner(&self) -> &Planner;

    fn models(&self) -> &ModelCache;

    /// Everything this engine can return
    fn available(&self) -> Result<Self::Selector, SelectorError> {
        Self::Selector::from_selector(self.planner().available().clone())
    }

    /// Records the query is expected to produce, used for per-record costs
    async fn expected_records(&self, query: &SearchQuery<Self::Field, Self::Selector>) -> u64 {
        query.max_results as u64
    }

    /// Requests left for this backend; `None` when it is unmetered
    async fn remaining_requests(&self) -> Option<u64>;

    /// Plan `query` without sending anything
    async fn plan(
        &self,
        query: &SearchQuery<Self::Field, Self::Selector>,
    ) -> Result<ExecutionPlan, QueryError> {
        let expected = self.expected_records(query).await;
        self.planner().plan(query.selector.as_selector(), expected)
    }

    /// Send the remote calls `plan` includes
    async fn run(
        &self,
        query: &SearchQuery<Self::Field, Self::Selector>,
        plan: &ExecutionPlan,
    ) -> Result<RawResults<Self::Record>, QueryError>;

    /// Plan, check quota and run, returning unprojected records
    async fn fetch(
        &self,
        query: &SearchQuery<Self::Field, Self::Selector>,
    ) -> Result<(Vec<Self::Record>, QueryMetadata), QueryError> {
        let plan = self.plan(query).await?;
        if let Some(remaining) = self.remaining_requests().await {
            plan.ensure_quota(remaining)?;
        }

        let raw = self.run(query, &plan).await?;
        let mut metadata = QueryMetadata::planned(&plan);
        metadata.requests_used = raw.requests;

        let mut records = raw.records;
        records.truncate(query.max_results);
        Ok((records, metadata))
    }

    /// Model for the query's selector, memoized
    fn model_for(&self, selector: &Self::Selector) -> Result<Arc<Model>, QueryError> {
        Ok(self.models().get_or_generate(
            selector.as_selector(),
            <Self::Record as Record>::SHAPE,
            &TypeOverrides::new(),
        )?)
    }

    /// Run `query` and project every record
    async fn execute(
        &self,
        query: &SearchQuery<Self::Field, Self::Selector>,
    ) -> Result<QueryResponse, QueryError> {
        let model = self.model_for(&query.selector)?;
        let (records, metadata) = self.fetch(query).await?;
        let records = records
            .iter()
            .map(|record| model.project(record))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            backend = %metadata.backend,
            records = records.len(),
            requests = metadata.requests_used,
            "Query executed"
        );
        Ok(QueryResponse { records, metadata })
    }

    /// Plan now, fetch lazily on first poll
    async fn stream<'a>(
        &'a self,
        query: &'a SearchQuery<Self::Field, Self::Selector>,
    ) -> Result<RecordStream<'a>, QueryError>
    where
        Self: Sized,
    {
        RecordStream::open(self, query).await
    }
}

type ItemStream<'a> = Pin<Box<dyn Stream<Item = Result<ProjectedRecord, QueryError>> + Send + 'a>>;

/// Single-pass stream of projected records.
///
/// Planning and the quota check happen when the stream is opened; the remote
/// calls run when it is first polled.
pub struct RecordStream<'a> {
    inner: ItemStream<'a>,
    metadata: Arc<Mutex<QueryMetadata>>,
}

impl<'a> RecordStream<'a> {
    pub async fn open<E: QueryEngine>(
        engine: &'a E,
        query: &'a SearchQuery<E::Field, E::Selector>,
    ) -> Result<RecordStream<'a>, QueryError> {
        let plan = engine.plan(query).await?;
        if let Some(remaining) = engine.remaining_requests().await {
            plan.ensure_quota(remaining)?;
        }
        let model = engine.model_for(&query.selector)?;

        let metadata = Arc::new(Mutex::new(QueryMetadata::planned(&plan)));
        let shared = Arc::clone(&metadata);

        let inner = async_stream::stream! {
            match engine.run(query, &plan).await {
                Ok(raw) => {
                    {
                        let mut metadata = shared.lock().unwrap_or_else(|e| e.into_inner());
                        metadata.requests_used = raw.requests;
                    }
                    for record in raw.records.into_iter().take(query.max_results) {
                        yield model.project(&record).map_err(QueryError::from);
                    }
                }
                Err(e) => yield Err(e),
            }
        };

        Ok(RecordStream {
            inner: Box::pin(inner),
            metadata,
        })
    }

    /// Plan metadata; `requests_used` is filled in once the fetch has run
    pub fn metadata(&self) -> QueryMetadata {
        self.metadata
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Stream for RecordStream<'_> {
    type Item = Result<ProjectedRecord, QueryError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RecordStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("metadata", &self.metadata())
            .finish_non_exhaustive()
    }
}

/// Quote a free-text term for a backend query string
pub(crate) fn quote(text: &str) -> String {
    let cleaned = text.replace('"', "");
    let cleaned = cleaned.trim();
    if cleaned.contains(char::is_whitespace) {
        format!("\"{}\"", cleaned)
    } else {
        cleaned.to_string()
    }
}
