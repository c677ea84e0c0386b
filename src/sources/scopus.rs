//! Scopus client using the Elsevier search and retrieval APIs.
//!
//! Every call costs one request from the weekly quota. The remaining count is
//! taken from the `x-ratelimit-*` response headers when Elsevier sends them
//! and decremented locally otherwise.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{
    Author, AuthorId, Institution, InstitutionId, Name, Paper, PaperBuilder, PaperId, SubPaper,
    Subject, Topic,
};
use crate::sources::SourceError;
use crate::utils::{
    MemoryQuotaStore, MemoryResultCountCache, QuotaStore, ResultCountCache, Transport,
    TransportResponse,
};

/// Elsevier API base URL
pub const SCOPUS_BASE_URL: &str = "https://api.elsevier.com/content";

/// Default weekly request allowance of a Scopus API key
pub const SCOPUS_WEEKLY_QUOTA: u64 = 20_000;

/// Largest page the search APIs return in the standard view
pub const SCOPUS_PAGE_SIZE: usize = 200;

const SERVICE: &str = "scopus";

/// Search results plus the total hit count
#[derive(Debug, Clone, PartialEq)]
pub struct ScopusSearch<T> {
    pub records: Vec<T>,
    pub total: u64,
    /// Pages requested
    pub requests: u64,
}

/// Raw entries gathered over one or more pages
struct Pages<T> {
    entries: Vec<T>,
    total: u64,
    requests: u64,
}

/// Citation metrics of an author
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorMetrics {
    pub citation_count: Option<i64>,
    pub h_index: Option<i64>,
    pub document_count: Option<i64>,
}

/// Scopus API client
#[derive(Debug, Clone)]
pub struct ScopusClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: String,
    inst_token: Option<String>,
    quota: Arc<dyn QuotaStore>,
    counts: Arc<dyn ResultCountCache>,
}

impl ScopusClient {
    /// Create a client with in-memory quota and result-count stores
    pub fn new(transport: Arc<dyn Transport>, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: SCOPUS_BASE_URL.to_string(),
            api_key: api_key.into(),
            inst_token: None,
            quota: Arc::new(MemoryQuotaStore::new().with_limit(SERVICE, SCOPUS_WEEKLY_QUOTA)),
            counts: Arc::new(MemoryResultCountCache::default()),
        }
    }

    /// Point the client at another endpoint (must be an absolute URL)
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, SourceError> {
        url::Url::parse(base_url)
            .map_err(|e| SourceError::InvalidRequest(format!("bad Scopus URL {}: {}", base_url, e)))?;
        self.base_url = base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Institutional token for off-campus access
    pub fn inst_token(mut self, token: Option<String>) -> Self {
        self.inst_token = token;
        self
    }

    pub fn with_quota_store(mut self, quota: Arc<dyn QuotaStore>) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_count_cache(mut self, counts: Arc<dyn ResultCountCache>) -> Self {
        self.counts = counts;
        self
    }

    /// Requests left in the current quota window
    pub fn remaining_requests(&self) -> u64 {
        self.quota.remaining(SERVICE)
    }

    /// Total hits last seen for a paper search term
    pub fn cached_count(&self, term: &str) -> Option<u64> {
        self.counts.lookup(SERVICE, term)
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        query.push(format!("apiKey={}", urlencoding::encode(&self.api_key)));
        if let Some(token) = &self.inst_token {
            query.push(format!("insttoken={}", urlencoding::encode(token)));
        }
        format!("{}/{}?{}", self.base_url, path, query.join("&"))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.transport.get(url).await?;
        self.track_quota(&response);
        Ok(serde_json::from_str(&response.body)?)
    }

    fn track_quota(&self, response: &TransportResponse) {
        let remaining = response
            .header("x-ratelimit-remaining")
            .and_then(|v| v.trim().parse::<u64>().ok());
        let reset_at = response
            .header("x-ratelimit-reset")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        match remaining {
            Some(remaining) => self.quota.record_usage(SERVICE, remaining, reset_at),
            None => self.quota.consume(SERVICE, 1),
        }
    }

    /// Page through a search until `max_results` entries arrived or the hits ran out
    async fn search<T: DeserializeOwned>(
        &self,
        path: &str,
        term: &str,
        max_results: usize,
    ) -> Result<Pages<T>, SourceError> {
        let wanted = max_results.max(1);
        let mut pages = Pages {
            entries: Vec::new(),
            total: 0,
            requests: 0,
        };

        loop {
            let start = pages.entries.len();
            let count = (wanted - start).min(SCOPUS_PAGE_SIZE);
            let (count_param, start_param) = (count.to_string(), start.to_string());
            let url = self.url(
                path,
                &[
                    ("query", term),
                    ("count", count_param.as_str()),
                    ("start", start_param.as_str()),
                ],
            );

            tracing::debug!(path, term, start, count, "Scopus search");
            let envelope: SearchEnvelope<T> = self.get_json(&url).await?;
            pages.requests += 1;
            pages.total = envelope
                .results
                .total
                .and_then(|t| t.value())
                .map(|t| t.max(0) as u64)
                .unwrap_or(0);

            let received = envelope.results.entry.len();
            pages.entries.extend(envelope.results.entry);

            let seen = pages.entries.len();
            if received < count || seen >= wanted || seen as u64 >= pages.total {
                return Ok(pages);
            }
        }
    }

    /// Search documents. The total hit count is stored in the result-count cache.
    pub async fn search_papers(
        &self,
        term: &str,
        max_results: usize,
    ) -> Result<ScopusSearch<Paper>, SourceError> {
        let pages = self
            .search::<PaperEntry>("search/scopus", term, max_results)
            .await?;
        self.counts.store(SERVICE, term, pages.total);

        let records = pages
            .entries
            .into_iter()
            .filter(|e| e.error.is_none())
            .filter_map(PaperEntry::into_paper)
            .take(max_results)
            .collect();
        Ok(ScopusSearch {
            records,
            total: pages.total,
            requests: pages.requests,
        })
    }

    /// Full abstract record: abstract, keywords, subjects, authors with affiliations
    pub async fn abstract_details(&self, scopus_id: &str) -> Result<Paper, SourceError> {
        let url = self.url(
            &format!("abstract/scopus_id/{}", urlencoding::encode(scopus_id)),
            &[("view", "FULL")],
        );

        tracing::debug!(scopus_id, "Scopus abstract retrieval");
        let envelope: AbstractEnvelope = self.get_json(&url).await?;
        envelope
            .response
            .into_paper(scopus_id)
            .ok_or_else(|| SourceError::Parse(format!("abstract {} has no identifiers", scopus_id)))
    }

    /// Reference list of a document, with basic metadata per reference
    pub async fn references(&self, scopus_id: &str) -> Result<Vec<SubPaper>, SourceError> {
        let url = self.url(
            &format!("abstract/scopus_id/{}", urlencoding::encode(scopus_id)),
            &[("view", "REF")],
        );

        tracing::debug!(scopus_id, "Scopus reference retrieval");
        let envelope: ReferenceEnvelope = self.get_json(&url).await?;
        let references = envelope
            .response
            .references
            .and_then(|r| r.reference)
            .map(OneOrMany::into_vec)
            .unwrap_or_default();

        Ok(references
            .into_iter()
            .filter_map(ReferenceEntry::into_sub_paper)
            .collect())
    }

    /// Search author profiles
    pub async fn search_authors(
        &self,
        term: &str,
        max_results: usize,
    ) -> Result<ScopusSearch<Author>, SourceError> {
        let pages = self
            .search::<AuthorEntry>("search/author", term, max_results)
            .await?;
        let records = pages
            .entries
            .into_iter()
            .filter(|e| e.error.is_none())
            .filter_map(AuthorEntry::into_author)
            .take(max_results)
            .collect();
        Ok(ScopusSearch {
            records,
            total: pages.total,
            requests: pages.requests,
        })
    }

    /// Citation count and h-index of one author
    pub async fn author_metrics(&self, author_id: &str) -> Result<AuthorMetrics, SourceError> {
        let url = self.url(
            &format!("author/author_id/{}", urlencoding::encode(author_id)),
            &[("view", "METRICS")],
        );

        tracing::debug!(author_id, "Scopus author retrieval");
        let envelope: AuthorRetrievalEnvelope = self.get_json(&url).await?;
        let profile = envelope
            .profiles
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotFound(format!("author {}", author_id)))?;

        let core = profile.coredata.unwrap_or_default();
        Ok(AuthorMetrics {
            citation_count: core.citation_count.and_then(|c| c.value()),
            h_index: profile.h_index.and_then(|h| h.value()),
            document_count: core.document_count.and_then(|d| d.value()),
        })
    }

    /// Search institutions (affiliation profiles)
    pub async fn search_institutions(
        &self,
        term: &str,
        max_results: usize,
    ) -> Result<ScopusSearch<Institution>, SourceError> {
        let pages = self
            .search::<InstitutionEntry>("search/affiliation", term, max_results)
            .await?;
        let records = pages
            .entries
            .into_iter()
            .filter(|e| e.error.is_none())
            .map(InstitutionEntry::into_institution)
            .take(max_results)
            .collect();
        Ok(ScopusSearch {
            records,
            total: pages.total,
            requests: pages.requests,
        })
    }
}

/// Elsevier sends a single object where a list has one element
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Counts arrive as strings or numbers depending on the endpoint
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Count {
    Int(i64),
    Text(String),
}

impl Count {
    fn value(&self) -> Option<i64> {
        match self {
            Count::Int(v) => Some(*v),
            Count::Text(v) => v.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Dollar {
    #[serde(rename = "$", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct SubjectArea {
    #[serde(rename = "$", default)]
    name: String,
    #[serde(rename = "@abbrev")]
    abbrev: Option<String>,
    #[serde(rename = "@code")]
    code: Option<Count>,
}

impl SubjectArea {
    fn into_subject(self) -> Option<Subject> {
        let name = self.name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Subject {
            name: name.to_string(),
            abbreviation: self.abbrev,
            code: self.code.and_then(|c| c.value()),
        })
    }
}

/// `SCOPUS_ID:85012345678` -> `85012345678`
fn strip_prefix(identifier: &str) -> &str {
    identifier
        .split_once(':')
        .map(|(_, id)| id)
        .unwrap_or(identifier)
        .trim()
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope<T> {
    #[serde(rename = "search-results")]
    results: SearchResults<T>,
}

#[derive(Debug, Deserialize)]
struct SearchResults<T> {
    #[serde(rename = "opensearch:totalResults")]
    total: Option<Count>,
    #[serde(default = "Vec::new")]
    entry: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PaperEntry {
    #[serde(rename = "dc:identifier")]
    identifier: Option<String>,
    #[serde(rename = "dc:title")]
    title: Option<String>,
    #[serde(rename = "prism:doi")]
    doi: Option<String>,
    #[serde(rename = "pubmed-id")]
    pubmed_id: Option<String>,
    #[serde(rename = "prism:publicationName")]
    publication_name: Option<String>,
    #[serde(rename = "prism:coverDate")]
    cover_date: Option<String>,
    #[serde(rename = "subtypeDescription")]
    subtype: Option<String>,
    #[serde(rename = "citedby-count")]
    cited_by_count: Option<Count>,
    #[serde(rename = "dc:creator")]
    creator: Option<String>,
    author: Option<OneOrMany<SearchAuthor>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchAuthor {
    authid: Option<String>,
    authname: Option<String>,
    surname: Option<String>,
    #[serde(rename = "given-name")]
    given_name: Option<String>,
    initials: Option<String>,
}

impl SearchAuthor {
    fn into_author(self) -> Option<Author> {
        let name = match (self.surname, self.authname) {
            (Some(surname), _) => {
                let mut name = Name::new(surname);
                if let Some(given) = self.given_name {
                    name = name.given_name(given);
                }
                if let Some(initials) = self.initials {
                    name = name.initials(initials);
                }
                name
            }
            (None, Some(authname)) => Name::new(authname),
            (None, None) => return None,
        };

        let mut author = Author::named(name);
        author.author_id = self.authid.and_then(|id| AuthorId::from_scopus_id(id).ok());
        Some(author)
    }
}

impl PaperEntry {
    fn into_paper(self) -> Option<Paper> {
        let scopus_id = self.identifier.as_deref().map(strip_prefix)?;
        let mut paper_id = PaperId::from_scopus_id(scopus_id).ok()?;
        if let Some(doi) = self.doi {
            paper_id = paper_id.with_doi(doi);
        }
        if let Some(pmid) = self.pubmed_id {
            paper_id = paper_id.with_pubmed_id(pmid);
        }

        let mut builder = PaperBuilder::new(paper_id);
        if let Some(title) = self.title {
            builder = builder.title(title);
        }
        if let Some(source) = self.publication_name {
            builder = builder.source_title(source);
        }
        if let Some(date) = self.cover_date {
            builder = builder.publication_date(date);
        }
        if let Some(kind) = self.subtype {
            builder = builder.document_type(kind);
        }
        if let Some(count) = self.cited_by_count.and_then(|c| c.value()) {
            builder = builder.citation_count(count);
        }

        let authors: Vec<Author> = self
            .author
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .filter_map(SearchAuthor::into_author)
            .collect();
        if authors.is_empty() {
            // standard view only names the first author
            if let Some(creator) = self.creator {
                builder = builder.author(Author::named(Name::new(creator)));
            }
        } else {
            for author in authors {
                builder = builder.author(author);
            }
        }

        Some(builder.build())
    }
}

#[derive(Debug, Deserialize)]
struct AbstractEnvelope {
    #[serde(rename = "abstracts-retrieval-response")]
    response: AbstractResponse,
}

#[derive(Debug, Deserialize)]
struct AbstractResponse {
    coredata: Option<AbstractCore>,
    authkeywords: Option<AuthKeywords>,
    idxterms: Option<IndexTerms>,
    #[serde(rename = "subject-areas")]
    subject_areas: Option<SubjectAreas>,
    authors: Option<AbstractAuthors>,
    affiliation: Option<OneOrMany<AbstractAffiliation>>,
}

#[derive(Debug, Deserialize)]
struct AbstractCore {
    #[serde(rename = "dc:identifier")]
    identifier: Option<String>,
    #[serde(rename = "dc:description")]
    description: Option<String>,
    #[serde(rename = "prism:doi")]
    doi: Option<String>,
    #[serde(rename = "pubmed-id")]
    pubmed_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthKeywords {
    #[serde(rename = "author-keyword")]
    keywords: Option<OneOrMany<Dollar>>,
}

#[derive(Debug, Deserialize)]
struct IndexTerms {
    mainterm: Option<OneOrMany<Dollar>>,
}

#[derive(Debug, Deserialize)]
struct SubjectAreas {
    #[serde(rename = "subject-area")]
    areas: Option<OneOrMany<SubjectArea>>,
}

#[derive(Debug, Deserialize)]
struct AbstractAuthors {
    author: Option<OneOrMany<AbstractAuthor>>,
}

#[derive(Debug, Deserialize)]
struct AbstractAuthor {
    #[serde(rename = "@auid")]
    auid: Option<String>,
    #[serde(rename = "@orcid")]
    orcid: Option<String>,
    #[serde(rename = "ce:surname")]
    surname: Option<String>,
    #[serde(rename = "ce:given-name")]
    given_name: Option<String>,
    #[serde(rename = "ce:initials")]
    initials: Option<String>,
    affiliation: Option<OneOrMany<AffiliationRef>>,
}

#[derive(Debug, Deserialize)]
struct AffiliationRef {
    #[serde(rename = "@id")]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AbstractAffiliation {
    #[serde(rename = "@id")]
    id: Option<String>,
    affilname: Option<String>,
    #[serde(rename = "affiliation-city")]
    city: Option<String>,
    #[serde(rename = "affiliation-country")]
    country: Option<String>,
}

impl AbstractAffiliation {
    fn to_institution(&self) -> Institution {
        Institution {
            institution_id: self
                .id
                .as_ref()
                .and_then(|id| InstitutionId::from_scopus_id(id.clone()).ok()),
            name: self.affilname.clone(),
            city: self.city.clone(),
            country: self.country.clone(),
            document_count: None,
        }
    }
}

impl AbstractResponse {
    fn into_paper(self, scopus_id: &str) -> Option<Paper> {
        let core = self.coredata;
        let id = core
            .as_ref()
            .and_then(|c| c.identifier.as_deref())
            .map(strip_prefix)
            .unwrap_or(scopus_id);

        let mut paper_id = PaperId::from_scopus_id(id).ok()?;
        let mut builder_abstract = None;
        if let Some(core) = core {
            if let Some(doi) = core.doi {
                paper_id = paper_id.with_doi(doi);
            }
            if let Some(pmid) = core.pubmed_id {
                paper_id = paper_id.with_pubmed_id(pmid);
            }
            builder_abstract = core.description.map(|d| d.trim().to_string());
        }

        let mut builder = PaperBuilder::new(paper_id);
        if let Some(text) = builder_abstract.filter(|t| !t.is_empty()) {
            builder = builder.abstract_text(text);
        }

        let keywords = self
            .authkeywords
            .and_then(|k| k.keywords)
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        for keyword in keywords {
            builder = builder.topic(Topic::new(keyword.value, "author_keyword"));
        }
        let terms = self
            .idxterms
            .and_then(|t| t.mainterm)
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        for term in terms {
            builder = builder.topic(Topic::new(term.value, "index_term"));
        }

        let subjects = self
            .subject_areas
            .and_then(|s| s.areas)
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        for subject in subjects.into_iter().filter_map(SubjectArea::into_subject) {
            builder = builder.subject(subject);
        }

        let affiliations = self
            .affiliation
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        let authors = self
            .authors
            .and_then(|a| a.author)
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        for author in authors {
            let Some(surname) = author.surname else {
                continue;
            };
            let mut name = Name::new(surname);
            if let Some(given) = author.given_name {
                name = name.given_name(given);
            }
            if let Some(initials) = author.initials {
                name = name.initials(initials);
            }

            let mut converted = Author::named(name);
            converted.author_id = match (author.auid, author.orcid) {
                (Some(auid), orcid) => AuthorId::from_scopus_id(auid).ok().map(|id| match orcid {
                    Some(orcid) => id.with_orcid(orcid),
                    None => id,
                }),
                (None, Some(orcid)) => AuthorId::from_orcid(orcid).ok(),
                (None, None) => None,
            };
            converted.affiliations = author
                .affiliation
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .iter()
                .filter_map(|r| {
                    let id = r.id.as_deref()?;
                    affiliations
                        .iter()
                        .find(|a| a.id.as_deref() == Some(id))
                        .map(AbstractAffiliation::to_institution)
                })
                .collect();
            builder = builder.author(converted);
        }

        Some(builder.build())
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceEnvelope {
    #[serde(rename = "abstracts-retrieval-response")]
    response: ReferenceResponse,
}

#[derive(Debug, Deserialize)]
struct ReferenceResponse {
    references: Option<ReferenceList>,
}

#[derive(Debug, Deserialize)]
struct ReferenceList {
    reference: Option<OneOrMany<ReferenceEntry>>,
}

#[derive(Debug, Deserialize)]
struct ReferenceEntry {
    #[serde(rename = "scopus-id")]
    scopus_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "prism:doi")]
    doi: Option<String>,
    sourcetitle: Option<String>,
    #[serde(rename = "prism:coverDate")]
    cover_date: Option<String>,
    #[serde(rename = "citedby-count")]
    cited_by_count: Option<Count>,
    #[serde(rename = "author-list")]
    author_list: Option<ReferenceAuthors>,
}

#[derive(Debug, Deserialize)]
struct ReferenceAuthors {
    author: Option<OneOrMany<AbstractAuthor>>,
}

impl ReferenceEntry {
    fn into_sub_paper(self) -> Option<SubPaper> {
        let mut paper_id = match (self.scopus_id, self.doi.clone()) {
            (Some(id), _) => PaperId::from_scopus_id(id).ok()?,
            (None, Some(doi)) => PaperId::from_doi(doi).ok()?,
            (None, None) => return None,
        };
        if let Some(doi) = self.doi {
            paper_id = paper_id.with_doi(doi);
        }

        let mut paper = SubPaper::new(paper_id);
        paper.title = self.title;
        paper.source_title = self.sourcetitle;
        paper.publication_date = self.cover_date;
        paper.citation_count = self.cited_by_count.and_then(|c| c.value());
        paper.authors = self
            .author_list
            .and_then(|l| l.author)
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| {
                let mut name = Name::new(a.surname?);
                if let Some(given) = a.given_name {
                    name = name.given_name(given);
                }
                let mut author = Author::named(name);
                author.author_id = a.auid.and_then(|id| AuthorId::from_scopus_id(id).ok());
                Some(author)
            })
            .collect();
        Some(paper)
    }
}

#[derive(Debug, Deserialize)]
struct AuthorEntry {
    #[serde(rename = "dc:identifier")]
    identifier: Option<String>,
    orcid: Option<String>,
    #[serde(rename = "preferred-name")]
    preferred_name: Option<PreferredName>,
    #[serde(rename = "document-count")]
    document_count: Option<Count>,
    #[serde(rename = "affiliation-current")]
    affiliation: Option<OneOrMany<CurrentAffiliation>>,
    #[serde(rename = "subject-area")]
    subject_area: Option<OneOrMany<SubjectArea>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreferredName {
    surname: Option<String>,
    #[serde(rename = "given-name")]
    given_name: Option<String>,
    initials: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrentAffiliation {
    #[serde(rename = "affiliation-id")]
    id: Option<String>,
    #[serde(rename = "affiliation-name")]
    name: Option<String>,
    #[serde(rename = "affiliation-city")]
    city: Option<String>,
    #[serde(rename = "affiliation-country")]
    country: Option<String>,
}

impl AuthorEntry {
    fn into_author(self) -> Option<Author> {
        let scopus_id = self.identifier.as_deref().map(strip_prefix)?;
        let mut author_id = AuthorId::from_scopus_id(scopus_id).ok()?;
        if let Some(orcid) = self.orcid {
            author_id = author_id.with_orcid(orcid);
        }

        let name = self.preferred_name.and_then(|n| {
            let mut name = Name::new(n.surname?);
            if let Some(given) = n.given_name {
                name = name.given_name(given);
            }
            if let Some(initials) = n.initials {
                name = name.initials(initials);
            }
            Some(name)
        });

        Some(Author {
            author_id: Some(author_id),
            name,
            affiliations: self
                .affiliation
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .into_iter()
                .map(|a| Institution {
                    institution_id: a.id.and_then(|id| InstitutionId::from_scopus_id(id).ok()),
                    name: a.name,
                    city: a.city,
                    country: a.country,
                    document_count: None,
                })
                .collect(),
            subjects: self
                .subject_area
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .into_iter()
                .filter_map(SubjectArea::into_subject)
                .collect(),
            document_count: self.document_count.and_then(|c| c.value()),
            citation_count: None,
            h_index: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthorRetrievalEnvelope {
    #[serde(rename = "author-retrieval-response")]
    profiles: OneOrMany<AuthorProfile>,
}

#[derive(Debug, Deserialize)]
struct AuthorProfile {
    coredata: Option<AuthorCore>,
    #[serde(rename = "h-index")]
    h_index: Option<Count>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthorCore {
    #[serde(rename = "citation-count")]
    citation_count: Option<Count>,
    #[serde(rename = "document-count")]
    document_count: Option<Count>,
}

#[derive(Debug, Deserialize)]
struct InstitutionEntry {
    #[serde(rename = "dc:identifier")]
    identifier: Option<String>,
    #[serde(rename = "affiliation-name")]
    name: Option<String>,
    city: Option<String>,
    country: Option<String>,
    #[serde(rename = "document-count")]
    document_count: Option<Count>,
    error: Option<String>,
}

impl InstitutionEntry {
    fn into_institution(self) -> Institution {
        Institution {
            institution_id: self
                .identifier
                .as_deref()
                .map(strip_prefix)
                .and_then(|id| InstitutionId::from_scopus_id(id).ok()),
            name: self.name,
            city: self.city,
            country: self.country,
            document_count: self.document_count.and_then(|c| c.value()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sources::MockTransport;

    pub(crate) const SEARCH_JSON: &str = r#"{
      "search-results": {
        "opensearch:totalResults": "2",
        "entry": [
          {
            "dc:identifier": "SCOPUS_ID:85074",
            "eid": "2-s2.0-85074",
            "dc:title": "Quantum supremacy",
            "dc:creator": "Arute F.",
            "prism:publicationName": "Nature",
            "prism:coverDate": "2019-10-24",
            "prism:doi": "10.1038/s41586-019-1666-5",
            "pubmed-id": "31645734",
            "citedby-count": "5000",
            "subtypeDescription": "Article"
          },
          {
            "dc:identifier": "SCOPUS_ID:85100",
            "dc:title": "No DOI here",
            "citedby-count": "3",
            "author": [
              {"authid": "57000", "authname": "Doe J.", "surname": "Doe", "given-name": "Jane", "initials": "J."},
              {"authid": "57001", "authname": "Roe R."}
            ]
          }
        ]
      }
    }"#;

    pub(crate) const ABSTRACT_JSON: &str = r#"{
      "abstracts-retrieval-response": {
        "coredata": {
          "dc:identifier": "SCOPUS_ID:85074",
          "dc:description": "  The promise of quantum computers.  ",
          "prism:doi": "10.1038/s41586-019-1666-5"
        },
        "authkeywords": {"author-keyword": {"$": "qubits"}},
        "idxterms": {"mainterm": [{"$": "Quantum theory"}, {"$": "Superconducting devices"}]},
        "subject-areas": {"subject-area": [{"@abbrev": "MULT", "@code": "1000", "$": "Multidisciplinary"}]},
        "authors": {
          "author": [
            {"@auid": "57000", "@orcid": "0000-0001", "ce:surname": "Arute", "ce:given-name": "Frank",
             "ce:initials": "F.", "affiliation": {"@id": "60006191"}},
            {"@auid": "57002", "ce:surname": "Arya", "affiliation": [{"@id": "60006191"}, {"@id": "999"}]}
          ]
        },
        "affiliation": {"@id": "60006191", "affilname": "Google LLC",
                        "affiliation-city": "Mountain View", "affiliation-country": "United States"}
      }
    }"#;

    pub(crate) const REFERENCES_JSON: &str = r#"{
      "abstracts-retrieval-response": {
        "references": {
          "@total-references": "2",
          "reference": [
            {"scopus-id": "1001", "title": "Ref one", "prism:doi": "10.1/r1", "sourcetitle": "Science",
             "prism:coverDate": "2001-01-01", "citedby-count": "10",
             "author-list": {"author": {"@auid": "1", "ce:surname": "Feynman", "ce:given-name": "R."}}},
            {"title": "Unidentified"}
          ]
        }
      }
    }"#;

    pub(crate) const AUTHOR_SEARCH_JSON: &str = r#"{
      "search-results": {
        "opensearch:totalResults": "1",
        "entry": [
          {
            "dc:identifier": "AUTHOR_ID:57000",
            "orcid": "0000-0001",
            "preferred-name": {"surname": "Doe", "given-name": "Jane", "initials": "J."},
            "document-count": "42",
            "affiliation-current": {"affiliation-id": "60006191", "affiliation-name": "Google LLC",
                                    "affiliation-city": "Mountain View", "affiliation-country": "United States"},
            "subject-area": [{"@abbrev": "PHYS", "@frequency": "30", "$": "Physics and Astronomy"}]
          }
        ]
      }
    }"#;

    pub(crate) const AUTHOR_METRICS_JSON: &str = r#"{
      "author-retrieval-response": [
        {"coredata": {"citation-count": "1234", "document-count": "42"}, "h-index": "17"}
      ]
    }"#;

    pub(crate) const INSTITUTION_SEARCH_JSON: &str = r#"{
      "search-results": {
        "opensearch:totalResults": "1",
        "entry": [
          {"dc:identifier": "AFFILIATION_ID:60006191", "affiliation-name": "Google LLC",
           "city": "Mountain View", "country": "United States", "document-count": "9000"}
        ]
      }
    }"#;

    const EMPTY_SEARCH_JSON: &str = r#"{
      "search-results": {
        "opensearch:totalResults": "0",
        "entry": [{"@_fa": "true", "error": "Result set was empty"}]
      }
    }"#;

    fn client(transport: MockTransport) -> (Arc<MockTransport>, ScopusClient) {
        let transport = Arc::new(transport);
        let client = ScopusClient::new(transport.clone(), "key");
        (transport, client)
    }

    #[tokio::test]
    async fn test_search_papers() {
        let (transport, client) = client(MockTransport::new().on("search/scopus", SEARCH_JSON));

        let result = client.search_papers("TITLE(quantum)", 10).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.records.len(), 2);

        let first = &result.records[0];
        assert_eq!(first.paper_id.scopus_id.as_deref(), Some("85074"));
        assert_eq!(first.paper_id.doi.as_deref(), Some("10.1038/s41586-019-1666-5"));
        assert_eq!(first.paper_id.pubmed_id.as_deref(), Some("31645734"));
        assert_eq!(first.citation_count, Some(5000));
        assert_eq!(first.publication_date.as_deref(), Some("2019-10-24"));
        assert_eq!(first.authors.len(), 1);

        let second = &result.records[1];
        assert_eq!(second.paper_id.doi, None);
        assert_eq!(second.authors.len(), 2);
        assert_eq!(
            second.authors[0].author_id.as_ref().and_then(|a| a.scopus_id.as_deref()),
            Some("57000")
        );
        assert_eq!(
            second.authors[1].name.as_ref().map(|n| n.surname.as_str()),
            Some("Roe R.")
        );

        assert_eq!(client.cached_count("TITLE(quantum)"), Some(2));
        let url = &transport.requests()[0].url;
        assert!(url.contains("query=TITLE%28quantum%29"));
        assert!(url.contains("count=10"));
        assert!(url.contains("apiKey=key"));
    }

    #[tokio::test]
    async fn test_empty_search_skips_error_entry() {
        let (_, client) = client(MockTransport::new().on("search/", EMPTY_SEARCH_JSON));

        let papers = client.search_papers("TITLE(nothing)", 5).await.unwrap();
        assert!(papers.records.is_empty());
        assert_eq!(papers.total, 0);

        let authors = client.search_authors("AUTHLASTNAME(x)", 5).await.unwrap();
        assert!(authors.records.is_empty());
    }

    #[tokio::test]
    async fn test_abstract_details() {
        let (_, client) = client(MockTransport::new().on("view=FULL", ABSTRACT_JSON));

        let paper = client.abstract_details("85074").await.unwrap();
        assert_eq!(paper.r#abstract.as_deref(), Some("The promise of quantum computers."));
        assert_eq!(paper.paper_id.doi.as_deref(), Some("10.1038/s41586-019-1666-5"));

        let topics: Vec<_> = paper.topics.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(topics, vec!["qubits", "Quantum theory", "Superconducting devices"]);
        assert_eq!(paper.subjects[0].code, Some(1000));

        assert_eq!(paper.authors.len(), 2);
        let first = &paper.authors[0];
        let id = first.author_id.as_ref().unwrap();
        assert_eq!(id.scopus_id.as_deref(), Some("57000"));
        assert_eq!(id.orcid.as_deref(), Some("0000-0001"));
        assert_eq!(first.affiliations[0].city.as_deref(), Some("Mountain View"));
        // unknown affiliation ids are dropped
        assert_eq!(paper.authors[1].affiliations.len(), 1);
    }

    #[tokio::test]
    async fn test_references() {
        let (_, client) = client(MockTransport::new().on("view=REF", REFERENCES_JSON));

        let refs = client.references("85074").await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].paper_id.scopus_id.as_deref(), Some("1001"));
        assert_eq!(refs[0].paper_id.doi.as_deref(), Some("10.1/r1"));
        assert_eq!(refs[0].citation_count, Some(10));
        assert_eq!(
            refs[0].authors[0].name.as_ref().map(|n| n.surname.as_str()),
            Some("Feynman")
        );
    }

    #[tokio::test]
    async fn test_authors_and_institutions() {
        let (_, client) = client(
            MockTransport::new()
                .on("search/author", AUTHOR_SEARCH_JSON)
                .on("author/author_id/57000", AUTHOR_METRICS_JSON)
                .on("search/affiliation", INSTITUTION_SEARCH_JSON),
        );

        let authors = client.search_authors("AUTHLASTNAME(doe)", 5).await.unwrap();
        let author = &authors.records[0];
        assert_eq!(author.document_count, Some(42));
        assert_eq!(author.subjects[0].abbreviation.as_deref(), Some("PHYS"));
        assert_eq!(author.affiliations[0].name.as_deref(), Some("Google LLC"));

        let metrics = client.author_metrics("57000").await.unwrap();
        assert_eq!(
            metrics,
            AuthorMetrics {
                citation_count: Some(1234),
                h_index: Some(17),
                document_count: Some(42),
            }
        );

        let institutions = client.search_institutions("AFFIL(google)", 5).await.unwrap();
        let institution = &institutions.records[0];
        assert_eq!(
            institution.institution_id.as_ref().and_then(|i| i.scopus_id.as_deref()),
            Some("60006191")
        );
        assert_eq!(institution.document_count, Some(9000));
    }

    #[tokio::test]
    async fn test_quota_tracking() {
        let response = TransportResponse::new(SEARCH_JSON)
            .with_header("X-RateLimit-Remaining", "19000")
            .with_header("X-RateLimit-Reset", "4102444800");
        let (_, client) = client(
            MockTransport::new()
                .on_response("search/scopus", response)
                .on("search/affiliation", INSTITUTION_SEARCH_JSON),
        );
        assert_eq!(client.remaining_requests(), SCOPUS_WEEKLY_QUOTA);

        client.search_papers("TITLE(a)", 1).await.unwrap();
        assert_eq!(client.remaining_requests(), 19000);

        // no headers: counted locally
        client.search_institutions("AFFIL(b)", 1).await.unwrap();
        assert_eq!(client.remaining_requests(), 18999);
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("SCOPUS_ID:123"), "123");
        assert_eq!(strip_prefix("456"), "456");
    }
}
