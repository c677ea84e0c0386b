//! Full-detail record types returned by the backends.
//!
//! Every struct here mirrors a [`Shape`] definition field for field. Records
//! are plain values: engines fill them from backend responses and the
//! projection engine prunes them down to what a caller selected.

use serde::{Deserialize, Serialize};

use super::ids::{AuthorId, InstitutionId, PaperId};
use super::shape::Shape;

/// A record type with a known shape
pub trait Record: Serialize {
    /// The shape whose definition describes this record
    const SHAPE: Shape;
}

/// A person's name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Name {
    /// Family name (or collective name for group authors)
    pub surname: String,

    /// Given name(s)
    pub given_name: Option<String>,

    /// Initials as reported by the source
    pub initials: Option<String>,
}

impl Name {
    /// Create a name from a surname
    pub fn new(surname: impl Into<String>) -> Self {
        Self {
            surname: surname.into(),
            given_name: None,
            initials: None,
        }
    }

    /// Set the given name
    pub fn given_name(mut self, given: impl Into<String>) -> Self {
        self.given_name = Some(given.into());
        self
    }

    /// Set the initials
    pub fn initials(mut self, initials: impl Into<String>) -> Self {
        self.initials = Some(initials.into());
        self
    }

    /// "Given Surname", or just the surname
    pub fn display(&self) -> String {
        match &self.given_name {
            Some(given) => format!("{} {}", given, self.surname),
            None => self.surname.clone(),
        }
    }
}

/// A subject area classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub abbreviation: Option<String>,
    pub code: Option<i64>,
}

/// A keyword or controlled-vocabulary term attached to a paper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,

    /// Vocabulary the term comes from ("mesh", "author_keyword", "index_term")
    pub vocabulary: Option<String>,
}

impl Topic {
    /// Create a topic from a vocabulary term
    pub fn new(name: impl Into<String>, vocabulary: &str) -> Self {
        Self {
            name: name.into(),
            vocabulary: Some(vocabulary.to_string()),
        }
    }
}

/// An institution (affiliation)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub institution_id: Option<InstitutionId>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub document_count: Option<i64>,
}

impl Institution {
    /// Institution known only by its free-text name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// An author, either standalone or as part of a paper's author list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub author_id: Option<AuthorId>,
    pub name: Option<Name>,
    #[serde(default)]
    pub affiliations: Vec<Institution>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub document_count: Option<i64>,
    pub citation_count: Option<i64>,
    pub h_index: Option<i64>,
}

impl Author {
    /// Author known by name only
    pub fn named(name: Name) -> Self {
        Self {
            name: Some(name),
            ..Default::default()
        }
    }
}

/// A paper nested inside another paper's `references` or `cited_by` list.
///
/// Same fields as [`Paper`] without further reference nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubPaper {
    pub paper_id: PaperId,
    pub title: Option<String>,
    pub r#abstract: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    pub publication_date: Option<String>,
    pub source_title: Option<String>,
    pub document_type: Option<String>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub citation_count: Option<i64>,
}

impl SubPaper {
    /// Linked paper known only by its id
    pub fn new(paper_id: PaperId) -> Self {
        Self {
            paper_id,
            title: None,
            r#abstract: None,
            authors: Vec::new(),
            publication_date: None,
            source_title: None,
            document_type: None,
            topics: Vec::new(),
            subjects: Vec::new(),
            citation_count: None,
        }
    }
}

impl From<Paper> for SubPaper {
    fn from(paper: Paper) -> Self {
        Self {
            paper_id: paper.paper_id,
            title: paper.title,
            r#abstract: paper.r#abstract,
            authors: paper.authors,
            publication_date: paper.publication_date,
            source_title: paper.source_title,
            document_type: paper.document_type,
            topics: paper.topics,
            subjects: paper.subjects,
            citation_count: paper.citation_count,
        }
    }
}

/// A research paper with every field any backend can supply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Identifier alternatives (DOI, Scopus id, PMID, PMCID)
    pub paper_id: PaperId,

    /// Paper title
    pub title: Option<String>,

    /// Abstract text
    pub r#abstract: Option<String>,

    /// Authors in byline order
    #[serde(default)]
    pub authors: Vec<Author>,

    /// Publication date (ISO format, possibly year only)
    pub publication_date: Option<String>,

    /// Journal, book or conference name
    pub source_title: Option<String>,

    /// Article, review, conference paper, ...
    pub document_type: Option<String>,

    /// Keywords and controlled-vocabulary terms
    #[serde(default)]
    pub topics: Vec<Topic>,

    /// Subject areas
    #[serde(default)]
    pub subjects: Vec<Subject>,

    /// Number of citing documents
    pub citation_count: Option<i64>,

    /// Papers this paper cites
    #[serde(default)]
    pub references: Vec<SubPaper>,

    /// Papers citing this paper
    #[serde(default)]
    pub cited_by: Vec<SubPaper>,
}

impl Paper {
    /// Create a paper that only carries its identifiers
    pub fn new(paper_id: PaperId) -> Self {
        Self {
            paper_id,
            title: None,
            r#abstract: None,
            authors: Vec::new(),
            publication_date: None,
            source_title: None,
            document_type: None,
            topics: Vec::new(),
            subjects: Vec::new(),
            citation_count: None,
            references: Vec::new(),
            cited_by: Vec::new(),
        }
    }
}

/// Builder for constructing Paper objects
#[derive(Debug, Clone)]
pub struct PaperBuilder {
    paper: Paper,
}

impl PaperBuilder {
    /// Create a new builder from the paper's identifiers
    pub fn new(paper_id: PaperId) -> Self {
        Self {
            paper: Paper::new(paper_id),
        }
    }

    /// Set title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.paper.title = Some(title.into());
        self
    }

    /// Set abstract
    pub fn abstract_text(mut self, abstract_text: impl Into<String>) -> Self {
        self.paper.r#abstract = Some(abstract_text.into());
        self
    }

    /// Add an author
    pub fn author(mut self, author: Author) -> Self {
        self.paper.authors.push(author);
        self
    }

    /// Set publication date
    pub fn publication_date(mut self, date: impl Into<String>) -> Self {
        self.paper.publication_date = Some(date.into());
        self
    }

    /// Set journal/source title
    pub fn source_title(mut self, source: impl Into<String>) -> Self {
        self.paper.source_title = Some(source.into());
        self
    }

    /// Set document type
    pub fn document_type(mut self, kind: impl Into<String>) -> Self {
        self.paper.document_type = Some(kind.into());
        self
    }

    /// Add a topic
    pub fn topic(mut self, topic: Topic) -> Self {
        self.paper.topics.push(topic);
        self
    }

    /// Add a subject area
    pub fn subject(mut self, subject: Subject) -> Self {
        self.paper.subjects.push(subject);
        self
    }

    /// Set citation count
    pub fn citation_count(mut self, count: i64) -> Self {
        self.paper.citation_count = Some(count);
        self
    }

    /// Add a reference
    pub fn reference(mut self, reference: SubPaper) -> Self {
        self.paper.references.push(reference);
        self
    }

    /// Add a citing paper
    pub fn cited_by(mut self, citing: SubPaper) -> Self {
        self.paper.cited_by.push(citing);
        self
    }

    /// Build the Paper
    pub fn build(self) -> Paper {
        self.paper
    }
}

macro_rules! record_shape {
    ($($ty:ty => $shape:expr),+ $(,)?) => {
        $( impl Record for $ty { const SHAPE: Shape = $shape; } )+
    };
}

record_shape! {
    Paper => Shape::Paper,
    SubPaper => Shape::SubPaper,
    Author => Shape::Author,
    Institution => Shape::Institution,
    Name => Shape::Name,
    Subject => Shape::Subject,
    Topic => Shape::Topic,
    PaperId => Shape::PaperId,
    AuthorId => Shape::AuthorId,
    InstitutionId => Shape::InstitutionId,
}
