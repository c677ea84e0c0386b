//! PubMed paper engine.

use async_trait::async_trait;
use std::collections::HashMap;

use super::{quote, QueryEngine, QueryError, RawResults};
use crate::models::{
    Comparison, Condition, Paper, PaperField, PaperId, PaperSearchQuery, Predicate, QueryField,
    Shape, SubPaper, Value,
};
use crate::planning::{CapabilityGroup, ExecutionPlan, Operation, Operations, Planner};
use crate::projection::ModelCache;
use crate::selector::{PaperSelector, Selector, SelectorError};
use crate::sources::{Backend, PubMedClient};

/// Fields efetch fills in for a paper
const DETAIL_PATHS: &[&str] = &[
    "paper_id.doi",
    "paper_id.pmc_id",
    "title",
    "abstract",
    "authors.author_id.orcid",
    "authors.name",
    "authors.affiliations.name",
    "publication_date",
    "source_title",
    "document_type",
    "topics",
];

fn capability_groups() -> Result<Vec<CapabilityGroup>, SelectorError> {
    let linked_details = |list: &str| -> Vec<String> {
        DETAIL_PATHS
            .iter()
            .map(|path| format!("{}.{}", list, path))
            .collect()
    };
    let mut link_fetch_paths = linked_details("references");
    link_fetch_paths.extend(linked_details("cited_by"));
    let link_fetch_paths: Vec<&str> = link_fetch_paths.iter().map(String::as_str).collect();

    Ok(vec![
        CapabilityGroup::new(
            Operation::Search,
            Selector::from_paths(Shape::Paper, &["paper_id.pubmed_id"])?,
        )
        .mandatory(),
        CapabilityGroup::new(
            Operation::Fetch,
            Selector::from_paths(Shape::Paper, DETAIL_PATHS)?,
        )
        .requires(Operations::SEARCH),
        CapabilityGroup::new(
            Operation::Link,
            Selector::from_paths(
                Shape::Paper,
                &["references.paper_id.pubmed_id", "cited_by.paper_id.pubmed_id"],
            )?,
        )
        .requires(Operations::SEARCH),
        CapabilityGroup::new(
            Operation::LinkFetch,
            Selector::from_paths(Shape::Paper, &link_fetch_paths)?,
        )
        .requires(Operations::LINK),
    ])
}

/// Render a paper predicate in PubMed search syntax
pub fn render_pubmed_query(predicate: &Predicate<PaperField>) -> Result<String, QueryError> {
    predicate.render(&mut render_leaf)
}

fn render_leaf(condition: &Condition<PaperField>) -> Result<String, QueryError> {
    let unsupported = || QueryError::UnsupportedPredicate {
        backend: Backend::PubMed,
        field: condition.field.name(),
    };

    let tag = match condition.field {
        PaperField::Keyword => "All Fields",
        PaperField::Title => "Title",
        PaperField::Abstract => "tiab",
        PaperField::Author => "Author",
        PaperField::Affiliation => "Affiliation",
        PaperField::Journal => "Journal",
        PaperField::Topic => "MeSH Terms",
        PaperField::Doi => "AID",
        PaperField::PubmedId => "PMID",
        PaperField::Year => return render_year(&condition.comparison).ok_or_else(unsupported),
        PaperField::ScopusId | PaperField::CitationCount => return Err(unsupported()),
    };

    let text = match &condition.comparison {
        Comparison::Equals(value) => value.to_string(),
        Comparison::Contains(text) => text.clone(),
        _ => return Err(unsupported()),
    };
    Ok(format!("{}[{}]", quote(&text), tag))
}

/// Publication-date ranges; open ends use the widest years PubMed accepts
fn render_year(comparison: &Comparison) -> Option<String> {
    let range = match comparison {
        Comparison::Equals(Value::Int(year)) => return Some(format!("{}[dp]", year)),
        Comparison::Between(Value::Int(lo), Value::Int(hi)) => (*lo, *hi),
        Comparison::GreaterThan(Value::Int(year)) => (year.saturating_add(1), 3000),
        Comparison::LessThan(Value::Int(year)) => (1000, year.saturating_sub(1)),
        _ => return None,
    };
    Some(format!("{}:{}[dp]", range.0, range.1))
}

/// Papers from PubMed: esearch, then efetch and elink as the selector needs
#[derive(Debug)]
pub struct PubMedPaperEngine {
    client: PubMedClient,
    planner: Planner,
    models: ModelCache,
}

impl PubMedPaperEngine {
    pub fn new(client: PubMedClient) -> Result<Self, SelectorError> {
        Ok(Self {
            client,
            planner: Planner::new(Backend::PubMed, Shape::Paper, capability_groups()?)?,
            models: ModelCache::new(),
        })
    }

    async fn attach_links(
        &self,
        papers: &mut [Paper],
        ids: &[String],
        plan: &ExecutionPlan,
    ) -> Result<u64, QueryError> {
        let links = self.client.links(ids).await?;
        let mut requests = 1;

        let details: HashMap<String, Paper> = if plan.includes(Operation::LinkFetch) {
            let mut linked: Vec<String> = links
                .iter()
                .flat_map(|l| l.references.iter().chain(&l.cited_by))
                .cloned()
                .collect();
            linked.sort();
            linked.dedup();

            if linked.is_empty() {
                HashMap::new()
            } else {
                requests += 1;
                self.client
                    .fetch(&linked)
                    .await?
                    .into_iter()
                    .filter_map(|p| p.paper_id.pubmed_id.clone().map(|id| (id, p)))
                    .collect()
            }
        } else {
            HashMap::new()
        };

        let to_sub_papers = |ids: &[String]| -> Vec<SubPaper> {
            ids.iter()
                .filter_map(|id| match details.get(id) {
                    Some(paper) => Some(SubPaper::from(paper.clone())),
                    None => PaperId::from_pubmed_id(id.as_str()).ok().map(SubPaper::new),
                })
                .collect()
        };

        for paper in papers.iter_mut() {
            let Some(pmid) = paper.paper_id.pubmed_id.as_deref() else {
                continue;
            };
            if let Some(link) = links.iter().find(|l| l.pubmed_id == pmid) {
                paper.references = to_sub_papers(&link.references);
                paper.cited_by = to_sub_papers(&link.cited_by);
            }
        }

        Ok(requests)
    }
}

#[async_trait]
impl QueryEngine for PubMedPaperEngine {
    type Field = PaperField;
    type Selector = PaperSelector;
    type Record = Paper;

    fn backend(&self) -> Backend {
        Backend::PubMed
    }

    fn planner(&self) -> &Planner {
        &self.planner
    }

    fn models(&self) -> &ModelCache {
        &self.models
    }

    async fn remaining_requests(&self) -> Option<u64> {
        None
    }

    async fn run(
        &self,
        query: &PaperSearchQuery,
        plan: &ExecutionPlan,
    ) -> Result<RawResults<Paper>, QueryError> {
        let term = render_pubmed_query(&query.query)?;
        let hits = self.client.search(&term, query.max_results).await?;
        let mut requests = 1;

        let mut ids = hits.ids;
        ids.truncate(query.max_results);

        let mut papers = if plan.includes(Operation::Fetch) && !ids.is_empty() {
            requests += 1;
            let mut fetched = self.client.fetch(&ids).await?;
            // keep search order
            fetched.sort_by_key(|p| {
                p.paper_id
                    .pubmed_id
                    .as_ref()
                    .and_then(|id| ids.iter().position(|i| i == id))
                    .unwrap_or(usize::MAX)
            });
            fetched
        } else {
            ids.iter()
                .filter_map(|id| PaperId::from_pubmed_id(id.as_str()).ok())
                .map(Paper::new)
                .collect()
        };

        if plan.includes(Operation::Link) && !ids.is_empty() {
            requests += self.attach_links(&mut papers, &ids, plan).await?;
        }

        tracing::debug!(
            term,
            total = hits.total,
            records = papers.len(),
            requests,
            "PubMed query finished"
        );

        Ok(RawResults {
            records: papers,
            requests,
        })
    }
}
