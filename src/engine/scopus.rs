//! Scopus engines for papers, authors and institutions.
//!
//! Scopus search results carry most bibliographic fields. Abstracts,
//! keywords, author affiliations, references and author metrics each need
//! one retrieval call per record, so those groups are priced per record.

use async_trait::async_trait;
use futures_util::future::try_join_all;

use super::{quote, QueryEngine, QueryError, RawResults};
use crate::models::{
    Author, AuthorField, AuthorSearchQuery, Comparison, Condition, Institution, InstitutionField,
    InstitutionSearchQuery, Paper, PaperField, PaperSearchQuery, Predicate, QueryField, Shape,
    Value,
};
use crate::planning::{
    CapabilityGroup, ExecutionPlan, Operation, OperationCost, Operations, Planner,
};
use crate::projection::ModelCache;
use crate::selector::{
    AuthorSelector, InstitutionSelector, PaperSelector, Selector, SelectorError,
};
use crate::sources::{Backend, ScopusClient, SCOPUS_PAGE_SIZE};

fn unsupported<F: QueryField>(condition: &Condition<F>) -> QueryError {
    QueryError::UnsupportedPredicate {
        backend: Backend::Scopus,
        field: condition.field.name(),
    }
}

/// `CODE(term)` for text and identifier leaves
fn tagged<F: QueryField>(code: &str, condition: &Condition<F>) -> Result<String, QueryError> {
    let text = match &condition.comparison {
        Comparison::Equals(value) => value.to_string(),
        Comparison::Contains(text) => text.clone(),
        _ => return Err(unsupported(condition)),
    };
    Ok(format!("{}({})", code, quote(&text)))
}

fn pub_year(condition: &Condition<PaperField>) -> Result<String, QueryError> {
    match &condition.comparison {
        Comparison::Equals(Value::Int(year)) => Ok(format!("PUBYEAR = {}", year)),
        Comparison::GreaterThan(Value::Int(year)) => Ok(format!("PUBYEAR > {}", year)),
        Comparison::LessThan(Value::Int(year)) => Ok(format!("PUBYEAR < {}", year)),
        // PUBYEAR has no inclusive operators
        Comparison::Between(Value::Int(lo), Value::Int(hi)) => Ok(format!(
            "(PUBYEAR > {} AND PUBYEAR < {})",
            lo.saturating_sub(1),
            hi.saturating_add(1)
        )),
        _ => Err(unsupported(condition)),
    }
}

/// Render a paper predicate in Scopus advanced-search syntax
pub fn render_scopus_paper_query(
    predicate: &Predicate<PaperField>,
) -> Result<String, QueryError> {
    predicate.render(&mut |condition: &Condition<PaperField>| match condition.field {
        PaperField::Keyword => tagged("TITLE-ABS-KEY", condition),
        PaperField::Title => tagged("TITLE", condition),
        PaperField::Abstract => tagged("ABS", condition),
        PaperField::Author => tagged("AUTH", condition),
        PaperField::Affiliation => tagged("AFFIL", condition),
        PaperField::Journal => tagged("SRCTITLE", condition),
        PaperField::Topic => tagged("KEY", condition),
        PaperField::Doi => tagged("DOI", condition),
        PaperField::PubmedId => tagged("PMID", condition),
        PaperField::ScopusId => match &condition.comparison {
            Comparison::Equals(id) => Ok(format!("EID(2-s2.0-{})", id)),
            _ => Err(unsupported(condition)),
        },
        PaperField::Year => pub_year(condition),
        PaperField::CitationCount => Err(unsupported(condition)),
    })
}

/// Render an author predicate in Scopus author-search syntax
pub fn render_scopus_author_query(
    predicate: &Predicate<AuthorField>,
) -> Result<String, QueryError> {
    predicate.render(&mut |condition: &Condition<AuthorField>| match condition.field {
        AuthorField::Name => tagged("AUTHOR-NAME", condition),
        AuthorField::Affiliation => tagged("AFFIL", condition),
        AuthorField::Subject => tagged("SUBJAREA", condition),
        AuthorField::ScopusId => tagged("AU-ID", condition),
        AuthorField::Orcid => tagged("ORCID", condition),
    })
}

/// Render an institution predicate in Scopus affiliation-search syntax
pub fn render_scopus_institution_query(
    predicate: &Predicate<InstitutionField>,
) -> Result<String, QueryError> {
    predicate.render(&mut |condition: &Condition<InstitutionField>| match condition.field {
        InstitutionField::Name => tagged("AFFIL", condition),
        InstitutionField::City => tagged("AFFILCITY", condition),
        InstitutionField::Country => tagged("AFFILCOUNTRY", condition),
        InstitutionField::ScopusId => tagged("AF-ID", condition),
    })
}

fn paper_groups() -> Result<Vec<CapabilityGroup>, SelectorError> {
    let paths = |paths: &[&str]| Selector::from_paths(Shape::Paper, paths);

    Ok(vec![
        CapabilityGroup::new(
            Operation::Search,
            paths(&[
                "paper_id.doi",
                "paper_id.scopus_id",
                "paper_id.pubmed_id",
                "title",
                "publication_date",
                "source_title",
                "document_type",
                "citation_count",
                "authors.author_id.scopus_id",
                "authors.name",
            ])?,
        )
        .mandatory()
        .cost(OperationCost::PerPage(SCOPUS_PAGE_SIZE as u64)),
        CapabilityGroup::new(
            Operation::Fetch,
            paths(&[
                "abstract",
                "topics",
                "subjects",
                "authors.author_id.orcid",
                "authors.affiliations",
            ])?,
        )
        .requires(Operations::SEARCH)
        .cost(OperationCost::PerRecord),
        CapabilityGroup::new(
            Operation::Link,
            paths(&[
                "references.paper_id.doi",
                "references.paper_id.scopus_id",
                "references.title",
                "references.authors.author_id.scopus_id",
                "references.authors.name",
                "references.publication_date",
                "references.source_title",
                "references.citation_count",
            ])?,
        )
        .requires(Operations::SEARCH)
        .cost(OperationCost::PerRecord),
    ])
}

/// Copy the fields an abstract retrieval adds onto a search result
fn absorb_details(paper: &mut Paper, details: Paper) {
    paper.paper_id.absorb(&details.paper_id);
    if details.r#abstract.is_some() {
        paper.r#abstract = details.r#abstract;
    }
    if !details.topics.is_empty() {
        paper.topics = details.topics;
    }
    if !details.subjects.is_empty() {
        paper.subjects = details.subjects;
    }
    // retrieval authors carry ORCIDs and affiliations
    if !details.authors.is_empty() {
        paper.authors = details.authors;
    }
}

/// Papers from Scopus search, abstract and reference retrieval
#[derive(Debug)]
pub struct ScopusPaperEngine {
    client: ScopusClient,
    planner: Planner,
    models: ModelCache,
}

impl ScopusPaperEngine {
    pub fn new(client: ScopusClient) -> Result<Self, SelectorError> {
        Ok(Self {
            client,
            planner: Planner::new(Backend::Scopus, Shape::Paper, paper_groups()?)?,
            models: ModelCache::new(),
        })
    }
}

#[async_trait]
impl QueryEngine for ScopusPaperEngine {
    type Field = PaperField;
    type Selector = PaperSelector;
    type Record = Paper;

    fn backend(&self) -> Backend {
        Backend::Scopus
    }

    fn planner(&self) -> &Planner {
        &self.planner
    }

    fn models(&self) -> &ModelCache {
        &self.models
    }

    /// At most the last known hit count for the same term
    async fn expected_records(&self, query: &PaperSearchQuery) -> u64 {
        let max = query.max_results as u64;
        render_scopus_paper_query(&query.query)
            .ok()
            .and_then(|term| self.client.cached_count(&term))
            .map_or(max, |count| count.min(max))
    }

    async fn remaining_requests(&self) -> Option<u64> {
        Some(self.client.remaining_requests())
    }

    async fn run(
        &self,
        query: &PaperSearchQuery,
        plan: &ExecutionPlan,
    ) -> Result<RawResults<Paper>, QueryError> {
        let term = render_scopus_paper_query(&query.query)?;
        let search = self.client.search_papers(&term, query.max_results).await?;
        let mut requests = search.requests;

        let mut papers = search.records;
        papers.truncate(query.max_results);
        let client = &self.client;

        // the estimate trusted a cached hit count; recheck with the real one
        let per_record = [Operation::Fetch, Operation::Link]
            .into_iter()
            .filter(|op| plan.includes(*op))
            .count() as u64;
        let with_id = papers
            .iter()
            .filter(|paper| paper.paper_id.scopus_id.is_some())
            .count() as u64;
        plan.ensure_requests(per_record * with_id, client.remaining_requests())?;

        if plan.includes(Operation::Fetch) {
            let details = try_join_all(papers.iter().map(|paper| {
                let id = paper.paper_id.scopus_id.clone();
                async move {
                    match id {
                        Some(id) => client.abstract_details(&id).await.map(Some),
                        None => Ok(None),
                    }
                }
            }))
            .await?;

            for (paper, details) in papers.iter_mut().zip(details) {
                if let Some(details) = details {
                    requests += 1;
                    absorb_details(paper, details);
                }
            }
        }

        if plan.includes(Operation::Link) {
            let references = try_join_all(papers.iter().map(|paper| {
                let id = paper.paper_id.scopus_id.clone();
                async move {
                    match id {
                        Some(id) => client.references(&id).await.map(Some),
                        None => Ok(None),
                    }
                }
            }))
            .await?;

            for (paper, references) in papers.iter_mut().zip(references) {
                if let Some(references) = references {
                    requests += 1;
                    paper.references = references;
                }
            }
        }

        tracing::debug!(
            term,
            total = search.total,
            records = papers.len(),
            requests,
            "Scopus paper query finished"
        );

        Ok(RawResults {
            records: papers,
            requests,
        })
    }
}

fn author_groups() -> Result<Vec<CapabilityGroup>, SelectorError> {
    Ok(vec![
        CapabilityGroup::new(
            Operation::Search,
            Selector::from_paths(
                Shape::Author,
                &[
                    "author_id",
                    "name",
                    "affiliations.institution_id",
                    "affiliations.name",
                    "affiliations.city",
                    "affiliations.country",
                    "subjects.name",
                    "subjects.abbreviation",
                    "document_count",
                ],
            )?,
        )
        .mandatory()
        .cost(OperationCost::PerPage(SCOPUS_PAGE_SIZE as u64)),
        CapabilityGroup::new(
            Operation::Fetch,
            Selector::from_paths(Shape::Author, &["citation_count", "h_index"])?,
        )
        .requires(Operations::SEARCH)
        .cost(OperationCost::PerRecord),
    ])
}

/// Authors from Scopus author search and author retrieval
#[derive(Debug)]
pub struct ScopusAuthorEngine {
    client: ScopusClient,
    planner: Planner,
    models: ModelCache,
}

impl ScopusAuthorEngine {
    pub fn new(client: ScopusClient) -> Result<Self, SelectorError> {
        Ok(Self {
            client,
            planner: Planner::new(Backend::Scopus, Shape::Author, author_groups()?)?,
            models: ModelCache::new(),
        })
    }
}

#[async_trait]
impl QueryEngine for ScopusAuthorEngine {
    type Field = AuthorField;
    type Selector = AuthorSelector;
    type Record = Author;

    fn backend(&self) -> Backend {
        Backend::Scopus
    }

    fn planner(&self) -> &Planner {
        &self.planner
    }

    fn models(&self) -> &ModelCache {
        &self.models
    }

    async fn remaining_requests(&self) -> Option<u64> {
        Some(self.client.remaining_requests())
    }

    async fn run(
        &self,
        query: &AuthorSearchQuery,
        plan: &ExecutionPlan,
    ) -> Result<RawResults<Author>, QueryError> {
        let term = render_scopus_author_query(&query.query)?;
        let search = self.client.search_authors(&term, query.max_results).await?;
        let mut requests = search.requests;

        let mut authors = search.records;
        authors.truncate(query.max_results);

        if plan.includes(Operation::Fetch) {
            let client = &self.client;
            let with_id = authors
                .iter()
                .filter(|author| author.author_id.as_ref().is_some_and(|id| id.scopus_id.is_some()))
                .count() as u64;
            plan.ensure_requests(with_id, client.remaining_requests())?;

            let metrics = try_join_all(authors.iter().map(|author| {
                let id = author.author_id.as_ref().and_then(|id| id.scopus_id.clone());
                async move {
                    match id {
                        Some(id) => client.author_metrics(&id).await.map(Some),
                        None => Ok(None),
                    }
                }
            }))
            .await?;

            for (author, metrics) in authors.iter_mut().zip(metrics) {
                if let Some(metrics) = metrics {
                    requests += 1;
                    author.citation_count = metrics.citation_count;
                    author.h_index = metrics.h_index;
                    if author.document_count.is_none() {
                        author.document_count = metrics.document_count;
                    }
                }
            }
        }

        tracing::debug!(term, records = authors.len(), requests, "Scopus author query finished");

        Ok(RawResults {
            records: authors,
            requests,
        })
    }
}

/// Institutions from Scopus affiliation search
#[derive(Debug)]
pub struct ScopusInstitutionEngine {
    client: ScopusClient,
    planner: Planner,
    models: ModelCache,
}

impl ScopusInstitutionEngine {
    pub fn new(client: ScopusClient) -> Result<Self, SelectorError> {
        let search = CapabilityGroup::new(Operation::Search, Selector::all(Shape::Institution))
            .mandatory()
            .cost(OperationCost::PerPage(SCOPUS_PAGE_SIZE as u64));
        Ok(Self {
            client,
            planner: Planner::new(Backend::Scopus, Shape::Institution, vec![search])?,
            models: ModelCache::new(),
        })
    }
}

#[async_trait]
impl QueryEngine for ScopusInstitutionEngine {
    type Field = InstitutionField;
    type Selector = InstitutionSelector;
    type Record = Institution;

    fn backend(&self) -> Backend {
        Backend::Scopus
    }

    fn planner(&self) -> &Planner {
        &self.planner
    }

    fn models(&self) -> &ModelCache {
        &self.models
    }

    async fn remaining_requests(&self) -> Option<u64> {
        Some(self.client.remaining_requests())
    }

    async fn run(
        &self,
        query: &InstitutionSearchQuery,
        _plan: &ExecutionPlan,
    ) -> Result<RawResults<Institution>, QueryError> {
        let term = render_scopus_institution_query(&query.query)?;
        let search = self
            .client
            .search_institutions(&term, query.max_results)
            .await?;

        Ok(RawResults {
            records: search.records,
            requests: search.requests,
        })
    }
}
