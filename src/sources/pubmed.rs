//! PubMed client using the NCBI E-utilities API.

use quick_xml::de::from_str;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{Author, AuthorId, Institution, Name, Paper, PaperBuilder, PaperId, Topic};
use crate::sources::SourceError;
use crate::utils::Transport;

/// E-utilities base URL
pub const PUBMED_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Result of an esearch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHits {
    /// PMIDs in relevance order
    pub ids: Vec<String>,
    /// Total number of matches, beyond `ids`
    pub total: u64,
}

/// References and citations of one paper, as PMIDs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaperLinks {
    pub pubmed_id: String,
    pub references: Vec<String>,
    pub cited_by: Vec<String>,
}

/// PubMed E-utilities client
#[derive(Debug, Clone)]
pub struct PubMedClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: Option<String>,
    email: Option<String>,
}

impl PubMedClient {
    /// Create a client against the public E-utilities endpoint
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: PUBMED_BASE_URL.to_string(),
            api_key: None,
            email: None,
        }
    }

    /// Point the client at another endpoint (must be an absolute URL)
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, SourceError> {
        url::Url::parse(base_url)
            .map_err(|e| SourceError::InvalidRequest(format!("bad PubMed URL {}: {}", base_url, e)))?;
        self.base_url = base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    /// NCBI API key (raises the rate limit from 3 to 10 requests per second)
    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Contact address NCBI asks clients to send
    pub fn email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    fn params(&self, params: &[(&str, &str)]) -> String {
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("tool", env!("CARGO_PKG_NAME")));
        if let Some(email) = &self.email {
            all.push(("email", email.as_str()));
        }
        if let Some(key) = &self.api_key {
            all.push(("api_key", key.as_str()));
        }

        all.iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Run a search and return matching PMIDs plus the total hit count
    pub async fn search(&self, term: &str, max_results: usize) -> Result<SearchHits, SourceError> {
        let retmax = max_results.to_string();
        let url = format!(
            "{}/esearch.fcgi?{}",
            self.base_url,
            self.params(&[
                ("db", "pubmed"),
                ("term", term),
                ("retmax", retmax.as_str()),
                ("retmode", "xml"),
            ])
        );

        tracing::debug!(term, max_results, "PubMed esearch");
        let response = self.transport.get(&url).await?;
        parse_search_response(&response.body)
    }

    /// Fetch full records for `ids`; sent as a POST so long id lists fit
    pub async fn fetch(&self, ids: &[String]) -> Result<Vec<Paper>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids.join(",");
        let body = self.params(&[("db", "pubmed"), ("id", joined.as_str()), ("retmode", "xml")]);

        tracing::debug!(count = ids.len(), "PubMed efetch");
        let response = self
            .transport
            .post(&format!("{}/efetch.fcgi", self.base_url), &body)
            .await?;
        parse_fetch_response(&response.body)
    }

    /// Resolve references and citing papers for `ids`
    pub async fn links(&self, ids: &[String]) -> Result<Vec<PaperLinks>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // one `id` parameter per PMID keeps the link sets separate
        let mut query = self.params(&[
            ("dbfrom", "pubmed"),
            ("db", "pubmed"),
            ("linkname", "pubmed_pubmed_refs,pubmed_pubmed_citedin"),
        ]);
        for id in ids {
            query.push_str("&id=");
            query.push_str(&urlencoding::encode(id));
        }

        tracing::debug!(count = ids.len(), "PubMed elink");
        let response = self
            .transport
            .get(&format!("{}/elink.fcgi?{}", self.base_url, query))
            .await?;
        parse_link_response(&response.body)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

impl Text {
    fn non_empty(&self) -> Option<String> {
        let value = self.value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}

fn parse_search_response(xml: &str) -> Result<SearchHits, SourceError> {
    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct ESearchResult {
        Count: Option<String>,
        IdList: Option<IdList>,
        ERROR: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct IdList {
        #[serde(rename = "Id", default)]
        ids: Vec<String>,
    }

    let result: ESearchResult = from_str(xml)
        .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed search XML: {}", e)))?;

    if let Some(error) = result.ERROR {
        return Err(SourceError::InvalidRequest(error));
    }

    let ids = result.IdList.map(|l| l.ids).unwrap_or_default();
    let total = result
        .Count
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(ids.len() as u64);

    Ok(SearchHits { ids, total })
}

#[derive(Debug, Deserialize)]
struct PubmedArticleSet {
    #[serde(rename = "PubmedArticle", default)]
    articles: Vec<PubmedArticle>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct PubmedArticle {
    MedlineCitation: Option<MedlineCitation>,
    PubmedData: Option<PubmedData>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct MedlineCitation {
    PMID: Option<Text>,
    Article: Option<Article>,
    MeshHeadingList: Option<MeshHeadingList>,
    #[serde(rename = "KeywordList", default)]
    keyword_lists: Vec<KeywordList>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct Article {
    Journal: Option<Journal>,
    ArticleTitle: Option<Text>,
    #[serde(rename = "ELocationID", default)]
    locations: Vec<ELocationId>,
    Abstract: Option<Abstract>,
    AuthorList: Option<AuthorList>,
    PublicationTypeList: Option<PublicationTypeList>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct Journal {
    JournalIssue: Option<JournalIssue>,
    Title: Option<Text>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct JournalIssue {
    PubDate: Option<PubDate>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct PubDate {
    Year: Option<String>,
    Month: Option<String>,
    Day: Option<String>,
    MedlineDate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ELocationId {
    #[serde(rename = "@EIdType")]
    id_type: String,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Abstract {
    #[serde(rename = "AbstractText", default)]
    texts: Vec<Text>,
}

#[derive(Debug, Deserialize)]
struct AuthorList {
    #[serde(rename = "Author", default)]
    authors: Vec<AuthorXml>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct AuthorXml {
    LastName: Option<Text>,
    ForeName: Option<Text>,
    Initials: Option<Text>,
    CollectiveName: Option<Text>,
    #[serde(rename = "Identifier", default)]
    identifiers: Vec<Identifier>,
    #[serde(rename = "AffiliationInfo", default)]
    affiliations: Vec<AffiliationInfo>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    #[serde(rename = "@Source")]
    source: String,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct AffiliationInfo {
    Affiliation: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct PublicationTypeList {
    #[serde(rename = "PublicationType", default)]
    types: Vec<Text>,
}

#[derive(Debug, Deserialize)]
struct MeshHeadingList {
    #[serde(rename = "MeshHeading", default)]
    headings: Vec<MeshHeading>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct MeshHeading {
    DescriptorName: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct KeywordList {
    #[serde(rename = "Keyword", default)]
    keywords: Vec<Text>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct PubmedData {
    ArticleIdList: Option<ArticleIdList>,
}

#[derive(Debug, Deserialize)]
struct ArticleIdList {
    #[serde(rename = "ArticleId", default)]
    ids: Vec<ArticleId>,
}

#[derive(Debug, Deserialize)]
struct ArticleId {
    #[serde(rename = "@IdType")]
    id_type: String,
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_fetch_response(xml: &str) -> Result<Vec<Paper>, SourceError> {
    let result: PubmedArticleSet = from_str(xml)
        .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed fetch XML: {}", e)))?;

    let mut papers = Vec::with_capacity(result.articles.len());
    for article in result.articles {
        match convert_article(article) {
            Some(paper) => papers.push(paper),
            None => tracing::debug!("Skipping PubMed article without PMID"),
        }
    }
    Ok(papers)
}

fn convert_article(article: PubmedArticle) -> Option<Paper> {
    let citation = article.MedlineCitation?;
    let pmid = citation.PMID.as_ref().and_then(Text::non_empty)?;

    let mut paper_id = PaperId::from_pubmed_id(pmid).ok()?;
    if let Some(ids) = article.PubmedData.and_then(|d| d.ArticleIdList) {
        for id in ids.ids {
            match id.id_type.as_str() {
                "doi" => paper_id = paper_id.with_doi(id.value),
                "pmc" => paper_id = paper_id.with_pmc_id(id.value),
                _ => {}
            }
        }
    }

    let article_xml = citation.Article;
    if paper_id.doi.is_none() {
        if let Some(doi) = article_xml
            .as_ref()
            .and_then(|a| a.locations.iter().find(|l| l.id_type == "doi"))
        {
            paper_id = paper_id.with_doi(doi.value.clone());
        }
    }

    let mut builder = PaperBuilder::new(paper_id);

    if let Some(article) = article_xml {
        if let Some(title) = article.ArticleTitle.as_ref().and_then(Text::non_empty) {
            builder = builder.title(title);
        }

        if let Some(abstract_xml) = article.Abstract {
            let text = abstract_xml
                .texts
                .iter()
                .filter_map(Text::non_empty)
                .collect::<Vec<_>>()
                .join(" ");
            if !text.is_empty() {
                builder = builder.abstract_text(text);
            }
        }

        if let Some(journal) = article.Journal {
            if let Some(title) = journal.Title.as_ref().and_then(Text::non_empty) {
                builder = builder.source_title(title);
            }
            if let Some(date) = journal
                .JournalIssue
                .and_then(|issue| issue.PubDate)
                .and_then(|date| format_pub_date(&date))
            {
                builder = builder.publication_date(date);
            }
        }

        if let Some(kind) = article
            .PublicationTypeList
            .and_then(|l| l.types.iter().find_map(Text::non_empty))
        {
            builder = builder.document_type(kind);
        }

        for author in article.AuthorList.map(|l| l.authors).unwrap_or_default() {
            if let Some(author) = convert_author(author) {
                builder = builder.author(author);
            }
        }
    }

    for heading in citation.MeshHeadingList.map(|l| l.headings).unwrap_or_default() {
        if let Some(name) = heading.DescriptorName.as_ref().and_then(Text::non_empty) {
            builder = builder.topic(Topic::new(name, "mesh"));
        }
    }
    for keyword in citation.keyword_lists.into_iter().flat_map(|l| l.keywords) {
        if let Some(name) = keyword.non_empty() {
            builder = builder.topic(Topic::new(name, "author_keyword"));
        }
    }

    Some(builder.build())
}

fn convert_author(author: AuthorXml) -> Option<Author> {
    let name = match (
        author.LastName.as_ref().and_then(Text::non_empty),
        author.CollectiveName.as_ref().and_then(Text::non_empty),
    ) {
        (Some(last), _) => {
            let mut name = Name::new(last);
            if let Some(given) = author.ForeName.as_ref().and_then(Text::non_empty) {
                name = name.given_name(given);
            }
            if let Some(initials) = author.Initials.as_ref().and_then(Text::non_empty) {
                name = name.initials(initials);
            }
            name
        }
        (None, Some(collective)) => Name::new(collective),
        (None, None) => return None,
    };

    let mut converted = Author::named(name);
    converted.author_id = author
        .identifiers
        .iter()
        .find(|i| i.source.eq_ignore_ascii_case("ORCID"))
        .and_then(|i| AuthorId::from_orcid(strip_orcid_prefix(&i.value)).ok());
    converted.affiliations = author
        .affiliations
        .iter()
        .filter_map(|a| a.Affiliation.as_ref().and_then(Text::non_empty))
        .map(Institution::named)
        .collect();

    Some(converted)
}

fn strip_orcid_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("https://orcid.org/")
        .or_else(|| value.strip_prefix("http://orcid.org/"))
        .unwrap_or(value)
}

/// `YYYY`, `YYYY-MM` or `YYYY-MM-DD` from a PubMed date element
fn format_pub_date(date: &PubDate) -> Option<String> {
    let year = match &date.Year {
        Some(year) => year.trim().to_string(),
        None => {
            let medline = date.MedlineDate.as_deref()?.trim();
            let year = medline.get(..4)?;
            if !year.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            return Some(year.to_string());
        }
    };

    let month = match date.Month.as_deref().map(str::trim) {
        Some(month) => month_number(month)?,
        None => return Some(year),
    };

    match date.Day.as_deref().and_then(|d| d.trim().parse::<u32>().ok()) {
        Some(day) => Some(format!("{}-{:02}-{:02}", year, month, day)),
        None => Some(format!("{}-{:02}", year, month)),
    }
}

fn month_number(month: &str) -> Option<u32> {
    if let Ok(n) = month.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = month.get(..3)?.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
}

fn parse_link_response(xml: &str) -> Result<Vec<PaperLinks>, SourceError> {
    #[derive(Debug, Deserialize)]
    struct ELinkResult {
        #[serde(rename = "LinkSet", default)]
        link_sets: Vec<LinkSet>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct LinkSet {
        IdList: Option<IdList>,
        #[serde(rename = "LinkSetDb", default)]
        dbs: Vec<LinkSetDb>,
    }

    #[derive(Debug, Deserialize)]
    struct IdList {
        #[serde(rename = "Id", default)]
        ids: Vec<String>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct LinkSetDb {
        LinkName: String,
        #[serde(rename = "Link", default)]
        links: Vec<Link>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct Link {
        Id: String,
    }

    let result: ELinkResult = from_str(xml)
        .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed link XML: {}", e)))?;

    let links = result
        .link_sets
        .into_iter()
        .filter_map(|set| {
            let pubmed_id = set.IdList.and_then(|l| l.ids.into_iter().next())?;
            let mut links = PaperLinks {
                pubmed_id,
                ..PaperLinks::default()
            };
            for db in set.dbs {
                let ids = db.links.into_iter().map(|l| l.Id);
                match db.LinkName.as_str() {
                    "pubmed_pubmed_refs" => links.references.extend(ids),
                    "pubmed_pubmed_citedin" => links.cited_by.extend(ids),
                    _ => {}
                }
            }
            Some(links)
        })
        .collect();

    Ok(links)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sources::MockTransport;

    pub(crate) const SEARCH_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<eSearchResult>
  <Count>1543</Count>
  <RetMax>2</RetMax>
  <RetStart>0</RetStart>
  <IdList>
    <Id>31452104</Id>
    <Id>29188311</Id>
  </IdList>
</eSearchResult>"#;

    pub(crate) const FETCH_XML: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">31452104</PMID>
      <Article PubModel="Print">
        <Journal>
          <JournalIssue CitedMedium="Internet">
            <PubDate><Year>2019</Year><Month>Aug</Month><Day>26</Day></PubDate>
          </JournalIssue>
          <Title>Nature</Title>
        </Journal>
        <ArticleTitle>Quantum supremacy using a programmable superconducting processor.</ArticleTitle>
        <ELocationID EIdType="doi" ValidYN="Y">10.1038/s41586-019-1666-5</ELocationID>
        <Abstract>
          <AbstractText Label="BACKGROUND">The promise of quantum computers.</AbstractText>
          <AbstractText Label="RESULTS">We report a processor.</AbstractText>
        </Abstract>
        <AuthorList CompleteYN="Y">
          <Author ValidYN="Y">
            <LastName>Arute</LastName>
            <ForeName>Frank</ForeName>
            <Initials>F</Initials>
            <Identifier Source="ORCID">https://orcid.org/0000-0001-2345-6789</Identifier>
            <AffiliationInfo><Affiliation>Google AI Quantum, Mountain View, CA, USA.</Affiliation></AffiliationInfo>
          </Author>
          <Author ValidYN="Y">
            <CollectiveName>Quantum Consortium</CollectiveName>
          </Author>
        </AuthorList>
        <PublicationTypeList>
          <PublicationType UI="D016428">Journal Article</PublicationType>
        </PublicationTypeList>
      </Article>
      <MeshHeadingList>
        <MeshHeading><DescriptorName UI="D000001" MajorTopicYN="N">Computers</DescriptorName></MeshHeading>
      </MeshHeadingList>
      <KeywordList Owner="NOTNLM"><Keyword MajorTopicYN="N">qubits</Keyword></KeywordList>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">31452104</ArticleId>
        <ArticleId IdType="doi">10.1038/s41586-019-1666-5</ArticleId>
        <ArticleId IdType="pmc">PMC6800000</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">29188311</PMID>
      <Article PubModel="Print">
        <Journal>
          <JournalIssue><PubDate><MedlineDate>1998 Dec-1999 Jan</MedlineDate></PubDate></JournalIssue>
          <Title>Cell</Title>
        </Journal>
        <ArticleTitle>Second paper.</ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    pub(crate) const LINK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<eLinkResult>
  <LinkSet>
    <DbFrom>pubmed</DbFrom>
    <IdList><Id>31452104</Id></IdList>
    <LinkSetDb>
      <DbTo>pubmed</DbTo>
      <LinkName>pubmed_pubmed_citedin</LinkName>
      <Link><Id>35000001</Id></Link>
      <Link><Id>35000002</Id></Link>
    </LinkSetDb>
    <LinkSetDb>
      <DbTo>pubmed</DbTo>
      <LinkName>pubmed_pubmed_refs</LinkName>
      <Link><Id>20000001</Id></Link>
    </LinkSetDb>
  </LinkSet>
  <LinkSet>
    <DbFrom>pubmed</DbFrom>
    <IdList><Id>29188311</Id></IdList>
  </LinkSet>
</eLinkResult>"#;

    #[test]
    fn test_parse_search_response() {
        let hits = parse_search_response(SEARCH_XML).unwrap();
        assert_eq!(hits.ids, vec!["31452104", "29188311"]);
        assert_eq!(hits.total, 1543);
    }

    #[test]
    fn test_parse_search_error() {
        let xml = "<eSearchResult><ERROR>Invalid query</ERROR></eSearchResult>";
        assert!(matches!(
            parse_search_response(xml),
            Err(SourceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_parse_fetch_response() {
        let papers = parse_fetch_response(FETCH_XML).unwrap();
        assert_eq!(papers.len(), 2);

        let paper = &papers[0];
        assert_eq!(paper.paper_id.pubmed_id.as_deref(), Some("31452104"));
        assert_eq!(paper.paper_id.doi.as_deref(), Some("10.1038/s41586-019-1666-5"));
        assert_eq!(paper.paper_id.pmc_id.as_deref(), Some("PMC6800000"));
        assert_eq!(
            paper.title.as_deref(),
            Some("Quantum supremacy using a programmable superconducting processor.")
        );
        assert_eq!(
            paper.r#abstract.as_deref(),
            Some("The promise of quantum computers. We report a processor.")
        );
        assert_eq!(paper.publication_date.as_deref(), Some("2019-08-26"));
        assert_eq!(paper.source_title.as_deref(), Some("Nature"));
        assert_eq!(paper.document_type.as_deref(), Some("Journal Article"));

        assert_eq!(paper.authors.len(), 2);
        let first = &paper.authors[0];
        let name = first.name.as_ref().unwrap();
        assert_eq!(name.surname, "Arute");
        assert_eq!(name.given_name.as_deref(), Some("Frank"));
        assert_eq!(
            first.author_id.as_ref().and_then(|id| id.orcid.as_deref()),
            Some("0000-0001-2345-6789")
        );
        assert_eq!(
            first.affiliations[0].name.as_deref(),
            Some("Google AI Quantum, Mountain View, CA, USA.")
        );
        assert_eq!(
            paper.authors[1].name.as_ref().map(|n| n.surname.as_str()),
            Some("Quantum Consortium")
        );

        let topics: Vec<_> = paper
            .topics
            .iter()
            .map(|t| (t.name.as_str(), t.vocabulary.as_deref()))
            .collect();
        assert_eq!(
            topics,
            vec![("Computers", Some("mesh")), ("qubits", Some("author_keyword"))]
        );

        let second = &papers[1];
        assert_eq!(second.paper_id.doi, None);
        assert_eq!(second.publication_date.as_deref(), Some("1998"));
    }

    #[test]
    fn test_parse_link_response() {
        let links = parse_link_response(LINK_XML).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].pubmed_id, "31452104");
        assert_eq!(links[0].references, vec!["20000001"]);
        assert_eq!(links[0].cited_by, vec!["35000001", "35000002"]);
        assert!(links[1].references.is_empty());
    }

    #[test]
    fn test_format_pub_date() {
        let date = |y: Option<&str>, m: Option<&str>, d: Option<&str>| PubDate {
            Year: y.map(String::from),
            Month: m.map(String::from),
            Day: d.map(String::from),
            MedlineDate: None,
        };
        assert_eq!(format_pub_date(&date(Some("2020"), None, None)).as_deref(), Some("2020"));
        assert_eq!(
            format_pub_date(&date(Some("2020"), Some("03"), None)).as_deref(),
            Some("2020-03")
        );
        assert_eq!(
            format_pub_date(&date(Some("2020"), Some("Dec"), Some("5"))).as_deref(),
            Some("2020-12-05")
        );
        assert_eq!(format_pub_date(&date(Some("2020"), Some("Spring"), None)), None);
    }

    #[tokio::test]
    async fn test_client_requests() {
        let transport = Arc::new(
            MockTransport::new()
                .on("esearch.fcgi", SEARCH_XML)
                .on("efetch.fcgi", FETCH_XML)
                .on("elink.fcgi", LINK_XML),
        );
        let client = PubMedClient::new(transport.clone()).api_key(Some("k".to_string()));

        let hits = client.search("cancer[Title]", 2).await.unwrap();
        assert_eq!(hits.total, 1543);

        let papers = client.fetch(&hits.ids).await.unwrap();
        assert_eq!(papers.len(), 2);

        let links = client.links(&hits.ids).await.unwrap();
        assert_eq!(links.len(), 2);

        assert!(client.fetch(&[]).await.unwrap().is_empty());

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].url.contains("term=cancer%5BTitle%5D"));
        assert!(requests[0].url.contains("api_key=k"));
        assert_eq!(requests[1].method, "POST");
        assert!(requests[1]
            .body
            .as_deref()
            .unwrap()
            .contains("id=31452104%2C29188311"));
        assert!(requests[2].url.contains("&id=31452104&id=29188311"));
    }

    #[test]
    fn test_base_url_validation() {
        let client = PubMedClient::new(Arc::new(MockTransport::new()));
        assert!(client.clone().with_base_url("not a url").is_err());
        assert!(client.with_base_url("http://localhost:1234/").is_ok());
    }
}
