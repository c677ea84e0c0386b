//! In-memory paper engine for testing purposes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{QueryEngine, QueryError, RawResults};
use crate::models::{
    Author, Comparison, Name, Paper, PaperBuilder, PaperField, PaperId, PaperSearchQuery, Shape,
    Topic, Value,
};
use crate::planning::{CapabilityGroup, ExecutionPlan, Operation, Planner};
use crate::projection::ModelCache;
use crate::selector::{PaperSelector, Selector, TypedSelector};
use crate::sources::Backend;

/// Paper engine answering from a fixed list.
///
/// Every run costs one request. DOI equality leaves in the predicate filter
/// the list; all other leaves are ignored.
#[derive(Debug)]
pub struct MockPaperEngine {
    papers: Vec<Paper>,
    planner: Planner,
    models: ModelCache,
    remaining: Option<u64>,
    page_limit: Option<usize>,
    runs: AtomicUsize,
    doi_filters: Mutex<Vec<Vec<String>>>,
}

impl MockPaperEngine {
    /// Engine for `backend` able to return `available`
    pub fn new(backend: Backend, available: PaperSelector, papers: Vec<Paper>) -> Self {
        let search = CapabilityGroup::new(Operation::Search, available.into_inner()).mandatory();
        let planner = Planner::new(backend, Shape::Paper, vec![search])
            .expect("a paper selector always matches the paper shape");

        Self {
            papers,
            planner,
            models: ModelCache::new(),
            remaining: None,
            page_limit: None,
            runs: AtomicUsize::new(0),
            doi_filters: Mutex::new(Vec::new()),
        }
    }

    /// PubMed-flavoured engine over `count` sample papers, without links
    pub fn with_papers(count: usize) -> Self {
        Self::new(Backend::PubMed, without_links(), sample_papers(count))
    }

    /// Pretend the backend has `remaining` requests left
    pub fn remaining(mut self, remaining: Option<u64>) -> Self {
        self.remaining = remaining;
        self
    }

    /// Return at most `limit` records per run, whatever the query asks for
    pub fn page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    /// Number of times `run` was called
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// DOI sets seen in predicates, one entry per filtered run
    pub fn doi_filters(&self) -> Vec<Vec<String>> {
        self.doi_filters.lock().unwrap().clone()
    }
}

/// Every paper field except `references` and `cited_by`
pub fn without_links() -> PaperSelector {
    let paths: Vec<&str> = Shape::Paper
        .definition()
        .field_names()
        .filter(|name| *name != "references" && *name != "cited_by")
        .collect();
    let selector = Selector::from_paths(Shape::Paper, &paths)
        .expect("paths come from the paper definition");
    PaperSelector::from_selector(selector).expect("built for the paper shape")
}

/// `count` papers with DOIs `10.1000/mock.<i>` and titles `Mock paper <i>`
pub fn sample_papers(count: usize) -> Vec<Paper> {
    (0..count)
        .filter_map(|i| {
            let id = PaperId::from_doi(format!("10.1000/mock.{}", i))
                .ok()?
                .with_pubmed_id((1000 + i).to_string());
            Some(
                PaperBuilder::new(id)
                    .title(format!("Mock paper {}", i))
                    .abstract_text(format!("Abstract {}", i))
                    .author(Author::named(Name::new(format!("Author{}", i))))
                    .publication_date("2020")
                    .topic(Topic::new("Neoplasms", "mesh"))
                    .build(),
            )
        })
        .collect()
}

#[async_trait]
impl QueryEngine for MockPaperEngine {
    type Field = PaperField;
    type Selector = PaperSelector;
    type Record = Paper;

    fn backend(&self) -> Backend {
        self.planner.backend()
    }

    fn planner(&self) -> &Planner {
        &self.planner
    }

    fn models(&self) -> &ModelCache {
        &self.models
    }

    async fn remaining_requests(&self) -> Option<u64> {
        self.remaining
    }

    async fn run(
        &self,
        query: &PaperSearchQuery,
        _plan: &ExecutionPlan,
    ) -> Result<RawResults<Paper>, QueryError> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        let dois: Vec<String> = query
            .query
            .leaves()
            .into_iter()
            .filter(|c| c.field == PaperField::Doi)
            .filter_map(|c| match &c.comparison {
                Comparison::Equals(Value::Str(doi)) => Some(doi.to_ascii_lowercase()),
                _ => None,
            })
            .collect();

        let mut records: Vec<Paper> = if dois.is_empty() {
            self.papers.clone()
        } else {
            self.doi_filters.lock().unwrap().push(dois.clone());
            self.papers
                .iter()
                .filter(|p| p.paper_id.doi_key().is_some_and(|d| dois.contains(&d)))
                .cloned()
                .collect()
        };
        if let Some(limit) = self.page_limit {
            records.truncate(limit);
        }

        Ok(RawResults {
            records,
            requests: 1,
        })
    }
}
