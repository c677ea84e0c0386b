//! Integration tests for Research Federation
//!
//! These tests drive the real PubMed and Scopus engines through a mock
//! transport, from planning to projected and reconciled output.

use futures_util::StreamExt;
use research_federation::engine::{PubMedPaperEngine, QueryEngine, QueryError, ScopusPaperEngine};
use research_federation::federation::{Coverage, ReconcileConfig, Reconciler};
use research_federation::models::{PaperField, PaperSearchQuery, Predicate};
use research_federation::planning::Operation;
use research_federation::selector::PaperSelector;
use research_federation::sources::{MockTransport, PubMedClient, ScopusClient};
use research_federation::utils::MemoryQuotaStore;
use serde_json::{json, Value};
use std::sync::Arc;

const PUBMED_SEARCH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<eSearchResult>
  <Count>2</Count>
  <RetMax>2</RetMax>
  <RetStart>0</RetStart>
  <IdList>
    <Id>111</Id>
    <Id>222</Id>
  </IdList>
</eSearchResult>"#;

const PUBMED_FETCH: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">111</PMID>
      <Article PubModel="Print">
        <Journal>
          <JournalIssue><PubDate><Year>2021</Year></PubDate></JournalIssue>
          <Title>The Lancet</Title>
        </Journal>
        <ArticleTitle>Cancer screening in adults.</ArticleTitle>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">111</ArticleId>
        <ArticleId IdType="doi">10.1/A</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">222</PMID>
      <Article PubModel="Print">
        <Journal>
          <JournalIssue><PubDate><Year>2022</Year></PubDate></JournalIssue>
          <Title>BMJ</Title>
        </Journal>
        <ArticleTitle>Cancer survival trends.</ArticleTitle>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">222</ArticleId>
        <ArticleId IdType="doi">10.1/b</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

const SCOPUS_FOUND_A: &str = r#"{
  "search-results": {
    "opensearch:totalResults": "1",
    "entry": [
      {
        "dc:identifier": "SCOPUS_ID:900",
        "dc:title": "Cancer screening in adults",
        "prism:doi": "10.1/a",
        "citedby-count": "42"
      }
    ]
  }
}"#;

const SCOPUS_EMPTY: &str = r#"{
  "search-results": {
    "opensearch:totalResults": "0",
    "entry": [{"@_fa": "true", "error": "Result set was empty"}]
  }
}"#;

fn pubmed(transport: &Arc<MockTransport>) -> PubMedPaperEngine {
    PubMedPaperEngine::new(PubMedClient::new(transport.clone())).unwrap()
}

fn scopus(transport: &Arc<MockTransport>) -> ScopusPaperEngine {
    ScopusPaperEngine::new(ScopusClient::new(transport.clone(), "test-key")).unwrap()
}

fn cancer_query(selector: Value) -> PaperSearchQuery {
    PaperSearchQuery::new(Predicate::contains(PaperField::Title, "cancer").unwrap())
        .selector(PaperSelector::from_json(&selector).unwrap())
        .max_results(5)
}

fn pubmed_transport() -> Arc<MockTransport> {
    Arc::new(
        MockTransport::new()
            .on("esearch.fcgi", PUBMED_SEARCH)
            .on("efetch.fcgi", PUBMED_FETCH),
    )
}

#[tokio::test]
async fn test_reconcile_pubmed_with_scopus() {
    let pubmed_transport = pubmed_transport();
    // the first pass asks for both DOIs, the residual batch only for the second;
    // Scopus answers with the lower-case DOI, which still matches PubMed's
    let scopus_transport = Arc::new(
        MockTransport::new()
            .on("DOI%2810.1%2FA%29", SCOPUS_FOUND_A)
            .on("DOI%2810.1%2Fb%29", SCOPUS_EMPTY),
    );

    let reconciler = Reconciler::new(pubmed(&pubmed_transport), scopus(&scopus_transport));
    let result = reconciler
        .reconcile(&cancer_query(json!({
            "paper_id": {"doi": true},
            "title": true,
            "citation_count": true
        })))
        .await
        .unwrap();

    assert_eq!(result.records.len(), 2);

    let full = &result.records[0];
    assert_eq!(full.coverage, Coverage::Full);
    assert_eq!(full.record.get("citation_count"), Some(&json!(42)));
    assert_eq!(full.record.get("paper_id"), Some(&json!({"doi": "10.1/a"})));

    let partial = &result.records[1];
    assert_eq!(partial.coverage, Coverage::Partial);
    assert_eq!(partial.record.get("title"), Some(&json!("Cancer survival trends.")));
    assert_eq!(partial.record.get("citation_count"), Some(&Value::Null));
    assert_eq!(partial.record.keys(), vec!["paper_id", "title", "citation_count"]);

    let metadata = &result.metadata;
    assert_eq!(metadata.broad.requests_used, 2);
    assert_eq!(metadata.detailed.len(), 2);
    assert_eq!(metadata.residual, 1);
    assert_eq!(metadata.batches, 1);
    assert!(!metadata.degraded);
    assert_eq!(metadata.requests_used(), 4);

    assert_eq!(pubmed_transport.request_count(), 2);
    assert_eq!(scopus_transport.request_count(), 2);
}

#[tokio::test]
async fn test_reconcile_degrades_past_request_ceiling() {
    let pubmed_transport = pubmed_transport();
    let scopus_transport = Arc::new(MockTransport::new().on("search/scopus", SCOPUS_EMPTY));

    let reconciler = Reconciler::new(pubmed(&pubmed_transport), scopus(&scopus_transport)).config(
        ReconcileConfig {
            batch_size: 1,
            max_requests: 1,
        },
    );
    let result = reconciler
        .reconcile(&cancer_query(json!({"paper_id": {"doi": true}, "citation_count": true})))
        .await
        .unwrap();

    assert!(result.metadata.degraded);
    assert_eq!(result.metadata.residual, 2);
    assert_eq!(result.metadata.batches, 0);
    assert!(result.records.is_empty());
    assert_eq!(scopus_transport.request_count(), 1);
}

#[tokio::test]
async fn test_stream_fetches_on_first_poll() {
    let transport = pubmed_transport();
    let engine = pubmed(&transport);
    let query = cancer_query(json!({"paper_id": {"pubmed_id": true}}));

    let mut stream = engine.stream(&query).await.unwrap();
    assert_eq!(transport.request_count(), 0);
    assert_eq!(stream.metadata().operations, vec![Operation::Search]);

    let mut ids = Vec::new();
    while let Some(record) = stream.next().await {
        let record = record.unwrap();
        ids.push(record.get("paper_id").cloned().unwrap());
    }

    assert_eq!(ids, vec![json!({"pubmed_id": "111"}), json!({"pubmed_id": "222"})]);
    assert_eq!(transport.request_count(), 1);
    assert_eq!(stream.metadata().requests_used, 1);
}

#[tokio::test]
async fn test_scopus_quota_shortfall_sends_nothing() {
    let transport = Arc::new(MockTransport::new().on("search/scopus", SCOPUS_FOUND_A));
    let client = ScopusClient::new(transport.clone(), "test-key")
        .with_quota_store(Arc::new(MemoryQuotaStore::new().with_limit("scopus", 3)));
    let engine = ScopusPaperEngine::new(client).unwrap();

    // one search plus one abstract retrieval per expected record
    let query = cancer_query(json!({"paper_id": {"doi": true}, "abstract": true}));
    let err = engine.execute(&query).await.unwrap_err();

    assert!(matches!(
        err,
        QueryError::NotEnoughRequests {
            needed: 6,
            remaining: 3,
            ..
        }
    ));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_unavailable_fields_fail_before_any_request() {
    let transport = pubmed_transport();
    let engine = pubmed(&transport);

    let query = cancer_query(json!({"citation_count": true}));
    match engine.execute(&query).await {
        Err(QueryError::NotSupported { fields, .. }) => {
            let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
            assert_eq!(names, vec!["citation_count"]);
        }
        other => panic!("expected NotSupported, got {:?}", other),
    }
    assert_eq!(transport.request_count(), 0);
}

#[test]
fn test_plan_without_network() {
    let transport = pubmed_transport();
    let engine = pubmed(&transport);
    let query = cancer_query(json!({"paper_id": {"doi": true}, "title": true}));

    let plan = tokio_test::block_on(engine.plan(&query)).unwrap();
    assert!(plan.includes(Operation::Search));
    assert!(plan.includes(Operation::Fetch));
    assert!(!plan.includes(Operation::Link));
    assert_eq!(plan.estimated_requests, 2);
    assert_eq!(transport.request_count(), 0);
}
