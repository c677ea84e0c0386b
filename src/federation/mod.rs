//! Cross-backend reconciliation.
//!
//! A broad, cheap backend finds the candidate papers; a detailed,
//! quota-limited backend is only asked about the DOIs the broad backend
//! returned. DOIs the detailed backend did not return on the first pass are
//! retried in fixed-size batches, unless the batches would cost more than the
//! configured request ceiling, in which case the result degrades to what the
//! first detailed pass produced.

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::engine::{QueryEngine, QueryError, QueryMetadata};
use crate::models::{Paper, PaperField, PaperSearchQuery, Predicate};
use crate::projection::ProjectedRecord;
use crate::selector::PaperSelector;

/// A query engine returning papers
pub trait PaperEngine:
    QueryEngine<Field = PaperField, Selector = PaperSelector, Record = Paper>
{
}

impl<T> PaperEngine for T where
    T: QueryEngine<Field = PaperField, Selector = PaperSelector, Record = Paper>
{
}

/// Batching limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// DOIs per residual batch query
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Most requests the residual batches may cost before degrading
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_requests: default_max_requests(),
        }
    }
}

fn default_batch_size() -> usize {
    25
}

fn default_max_requests() -> u64 {
    10
}

/// How much of the selector a record covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Coverage {
    /// Returned by the detailed backend
    Full,
    /// Only the broad backend's fields are filled in
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciledRecord {
    pub coverage: Coverage,
    pub record: ProjectedRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileMetadata {
    pub broad: QueryMetadata,
    /// First detailed pass, then one entry per batch
    pub detailed: Vec<QueryMetadata>,
    /// DOIs missing after the first detailed pass
    pub residual: usize,
    pub batches: usize,
    /// Batches were skipped because of the request ceiling
    pub degraded: bool,
}

impl ReconcileMetadata {
    /// Requests sent to both backends
    pub fn requests_used(&self) -> u64 {
        self.broad.requests_used + self.detailed.iter().map(|m| m.requests_used).sum::<u64>()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciledPapers {
    pub records: Vec<ReconciledRecord>,
    pub metadata: ReconcileMetadata,
}

/// Runs a paper query against a broad and a detailed backend
#[derive(Debug)]
pub struct Reconciler<B, D> {
    broad: B,
    detailed: D,
    config: ReconcileConfig,
}

impl<B: PaperEngine, D: PaperEngine> Reconciler<B, D> {
    pub fn new(broad: B, detailed: D) -> Self {
        Self {
            broad,
            detailed,
            config: ReconcileConfig::default(),
        }
    }

    pub fn config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn broad(&self) -> &B {
        &self.broad
    }

    pub fn detailed(&self) -> &D {
        &self.detailed
    }

    /// Selector for one backend: what it can supply of `requested`, plus the DOI
    fn sub_selector<E: PaperEngine>(
        engine: &E,
        requested: &PaperSelector,
    ) -> Result<PaperSelector, QueryError> {
        let doi = PaperSelector::from_paths(&["paper_id.doi"])?;
        Ok(requested.intersect(&engine.available()?)?.union(&doi)?)
    }

    pub async fn reconcile(&self, query: &PaperSearchQuery) -> Result<ReconciledPapers, QueryError> {
        let available = self.broad.available()?.union(&self.detailed.available()?)?;
        let missing = available.overselected(&query.selector)?;
        if !missing.is_empty() {
            return Err(QueryError::NotSupported {
                backend: self.detailed.backend(),
                fields: missing,
            });
        }
        let model = self.detailed.model_for(&query.selector)?;

        let broad_query = query
            .clone()
            .selector(Self::sub_selector(&self.broad, &query.selector)?);
        let (broad_records, broad_meta) = self.broad.fetch(&broad_query).await?;

        let mut seen = HashSet::new();
        let dois: Vec<String> = broad_records
            .iter()
            .filter_map(|p| p.paper_id.doi.clone())
            .filter(|doi| seen.insert(doi.to_ascii_lowercase()))
            .collect();

        let detailed_selector = Self::sub_selector(&self.detailed, &query.selector)?;
        let mut detailed_meta = Vec::new();
        let mut full: Vec<Paper> = Vec::new();
        let mut residual = Vec::new();
        let mut batches = 0;
        let mut degraded = false;

        if !dois.is_empty() {
            let first = query
                .with_predicate(Predicate::and(vec![
                    query.query.clone(),
                    Predicate::any_of(PaperField::Doi, dois.iter().cloned())?,
                ])?)
                .selector(detailed_selector.clone());
            let (records, meta) = self.detailed.fetch(&first).await?;
            detailed_meta.push(meta);
            full.extend(records);

            let found: HashSet<String> = full.iter().filter_map(|p| p.paper_id.doi_key()).collect();
            residual = dois
                .iter()
                .filter(|doi| !found.contains(&doi.to_ascii_lowercase()))
                .cloned()
                .collect();
        }

        if !residual.is_empty() {
            let batch_queries = residual
                .chunks(self.config.batch_size.max(1))
                .map(|chunk| -> Result<PaperSearchQuery, QueryError> {
                    Ok(query
                        .with_predicate(Predicate::any_of(PaperField::Doi, chunk.iter().cloned())?)
                        .selector(detailed_selector.clone())
                        .max_results(chunk.len()))
                })
                .collect::<Result<Vec<PaperSearchQuery>, QueryError>>()?;

            let mut estimate = 0;
            for batch in &batch_queries {
                estimate += self.detailed.plan(batch).await?.estimated_requests;
            }

            if estimate > self.config.max_requests {
                tracing::warn!(
                    residual = residual.len(),
                    estimate,
                    ceiling = self.config.max_requests,
                    "Skipping residual batches, returning first detailed pass only"
                );
                degraded = true;
            } else {
                if let Some(remaining) = self.detailed.remaining_requests().await {
                    if remaining < estimate {
                        return Err(QueryError::NotEnoughRequests {
                            service: self.detailed.backend().service().to_string(),
                            needed: estimate,
                            remaining,
                        });
                    }
                }

                batches = batch_queries.len();
                let results =
                    try_join_all(batch_queries.iter().map(|batch| self.detailed.fetch(batch)))
                        .await?;
                for (records, meta) in results {
                    detailed_meta.push(meta);
                    full.extend(records);
                }
            }
        }

        let mut merged: Vec<Paper> = Vec::with_capacity(full.len());
        for paper in full {
            if !merged.iter().any(|m| m.paper_id == paper.paper_id) {
                merged.push(paper);
            }
        }

        let mut records = Vec::with_capacity(merged.len());
        for paper in &merged {
            records.push(ReconciledRecord {
                coverage: Coverage::Full,
                record: model.project(paper)?,
            });
        }
        if !degraded {
            for paper in &broad_records {
                if !merged.iter().any(|m| m.paper_id == paper.paper_id) {
                    records.push(ReconciledRecord {
                        coverage: Coverage::Partial,
                        record: model.project(paper)?,
                    });
                }
            }
        }

        let metadata = ReconcileMetadata {
            broad: broad_meta,
            detailed: detailed_meta,
            residual: residual.len(),
            batches,
            degraded,
        };
        tracing::info!(
            records = records.len(),
            full = merged.len(),
            residual = metadata.residual,
            batches,
            degraded,
            requests = metadata.requests_used(),
            "Reconciled {} with {}",
            self.broad.backend(),
            self.detailed.backend()
        );

        Ok(ReconciledPapers { records, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{sample_papers, without_links, MockPaperEngine};
    use crate::models::PaperBuilder;
    use crate::sources::Backend;
    use serde_json::json;

    fn detailed_available() -> PaperSelector {
        PaperSelector::from_paths(&["paper_id", "title", "citation_count"]).unwrap()
    }

    /// Detailed copies of the sample papers with the given indices
    fn detailed_papers(indices: &[usize]) -> Vec<Paper> {
        let samples = sample_papers(10);
        indices
            .iter()
            .map(|&i| {
                PaperBuilder::new(samples[i].paper_id.clone())
                    .title(format!("Detailed {}", i))
                    .citation_count(i as i64 * 10)
                    .build()
            })
            .collect()
    }

    fn reconciler(
        broad: usize,
        detailed: &[usize],
        config: ReconcileConfig,
    ) -> Reconciler<MockPaperEngine, MockPaperEngine> {
        let broad = MockPaperEngine::with_papers(broad);
        let detailed =
            MockPaperEngine::new(Backend::Scopus, detailed_available(), detailed_papers(detailed));
        Reconciler::new(broad, detailed).config(config)
    }

    fn query(selector: serde_json::Value) -> PaperSearchQuery {
        PaperSearchQuery::new(Predicate::contains(PaperField::Title, "cancer").unwrap())
            .selector(PaperSelector::from_json(&selector).unwrap())
    }

    #[tokio::test]
    async fn test_residual_goes_out_in_one_batch() {
        let reconciler = reconciler(
            3,
            &[0, 1],
            ReconcileConfig {
                batch_size: 2,
                max_requests: 10,
            },
        );
        let result = reconciler
            .reconcile(&query(json!({"paper_id": {"doi": true}, "citation_count": true})))
            .await
            .unwrap();

        let filters = reconciler.detailed().doi_filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].len(), 3);
        assert_eq!(filters[1], vec!["10.1000/mock.2"]);

        let meta = &result.metadata;
        assert_eq!(meta.residual, 1);
        assert_eq!(meta.batches, 1);
        assert!(!meta.degraded);
        assert_eq!(meta.requests_used(), 3);

        let coverage: Vec<_> = result.records.iter().map(|r| r.coverage).collect();
        assert_eq!(coverage, vec![Coverage::Full, Coverage::Full, Coverage::Partial]);
        assert_eq!(result.records[1].record.get("citation_count"), Some(&json!(10)));
        assert_eq!(result.records[2].record.get("citation_count"), Some(&json!(null)));
        assert_eq!(
            result.records[2].record.get("paper_id"),
            Some(&json!({"doi": "10.1000/mock.2"}))
        );
    }

    #[tokio::test]
    async fn test_batches_fill_gaps_in_batch_order() {
        // the first pass stops after two records; the detailed backend also knows 3
        let broad = MockPaperEngine::with_papers(4);
        let detailed =
            MockPaperEngine::new(Backend::Scopus, detailed_available(), detailed_papers(&[0, 1, 3]))
                .page_limit(2)
                .remaining(Some(100));
        let reconciler = Reconciler::new(broad, detailed).config(ReconcileConfig {
            batch_size: 1,
            max_requests: 10,
        });

        let result = reconciler
            .reconcile(&query(json!({"paper_id": {"doi": true}, "title": true})))
            .await
            .unwrap();

        assert_eq!(result.metadata.residual, 2);
        assert_eq!(result.metadata.batches, 2);
        assert_eq!(
            reconciler.detailed().doi_filters()[1..],
            [vec!["10.1000/mock.2".to_string()], vec!["10.1000/mock.3".to_string()]]
        );

        let titles: Vec<_> = result
            .records
            .iter()
            .map(|r| (r.coverage, r.record.get("title").cloned().unwrap()))
            .collect();
        assert_eq!(
            titles,
            vec![
                (Coverage::Full, json!("Detailed 0")),
                (Coverage::Full, json!("Detailed 1")),
                (Coverage::Full, json!("Detailed 3")),
                (Coverage::Partial, json!("Mock paper 2")),
            ]
        );
    }

    #[tokio::test]
    async fn test_ceiling_degrades_to_first_pass() {
        let reconciler = reconciler(
            3,
            &[0],
            ReconcileConfig {
                batch_size: 1,
                max_requests: 1,
            },
        );
        let result = reconciler
            .reconcile(&query(json!({"paper_id": {"doi": true}, "title": true})))
            .await
            .unwrap();

        assert!(result.metadata.degraded);
        assert_eq!(result.metadata.batches, 0);
        assert_eq!(reconciler.detailed().doi_filters().len(), 1);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].coverage, Coverage::Full);
    }

    #[tokio::test]
    async fn test_quota_shortfall_stops_batches() {
        let broad = MockPaperEngine::with_papers(3);
        let detailed =
            MockPaperEngine::new(Backend::Scopus, detailed_available(), detailed_papers(&[0]))
                .remaining(Some(1));
        let reconciler = Reconciler::new(broad, detailed).config(ReconcileConfig {
            batch_size: 1,
            max_requests: 10,
        });

        let err = reconciler
            .reconcile(&query(json!({"paper_id": {"doi": true}})))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueryError::NotEnoughRequests {
                needed: 2,
                remaining: 1,
                ..
            }
        ));
        assert_eq!(reconciler.detailed().doi_filters().len(), 1);
    }

    #[tokio::test]
    async fn test_papers_without_doi_are_partial() {
        let mut papers = sample_papers(1);
        papers.push(
            PaperBuilder::new(crate::models::PaperId::from_pubmed_id("77").unwrap())
                .title("No DOI")
                .build(),
        );
        let broad = MockPaperEngine::new(Backend::PubMed, without_links(), papers);
        let detailed =
            MockPaperEngine::new(Backend::Scopus, detailed_available(), detailed_papers(&[0]));
        let reconciler = Reconciler::new(broad, detailed);

        let result = reconciler
            .reconcile(&query(json!({"paper_id": true, "title": true})))
            .await
            .unwrap();

        assert_eq!(result.metadata.residual, 0);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[1].coverage, Coverage::Partial);
        assert_eq!(result.records[1].record.get("title"), Some(&json!("No DOI")));
    }

    #[tokio::test]
    async fn test_fields_neither_backend_has_are_rejected() {
        let reconciler = reconciler(1, &[0], ReconcileConfig::default());
        let err = reconciler
            .reconcile(&query(json!({"paper_id": true, "references": true})))
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::NotSupported { .. }));
        assert_eq!(reconciler.broad().runs(), 0);
    }
}
