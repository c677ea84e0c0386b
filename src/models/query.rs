//! Backend-agnostic search queries.
//!
//! A query pairs a predicate tree with a selector describing the wanted output
//! shape. Paper, author and institution queries share the predicate grammar;
//! they differ in which fields may appear in leaves.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::selector::{AuthorSelector, InstitutionSelector, PaperSelector};

/// Default number of records a query asks for
pub const DEFAULT_MAX_RESULTS: usize = 25;

/// A literal in a predicate leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

/// Comparison applied by a leaf predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equals(Value),
    LessThan(Value),
    GreaterThan(Value),
    /// Inclusive range
    Between(Value, Value),
    Contains(String),
}

impl Comparison {
    /// Operator name for diagnostics
    pub fn operator(&self) -> &'static str {
        match self {
            Comparison::Equals(_) => "equals",
            Comparison::LessThan(_) => "less_than",
            Comparison::GreaterThan(_) => "greater_than",
            Comparison::Between(_, _) => "between",
            Comparison::Contains(_) => "contains",
        }
    }
}

/// The kind of values a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Free text: equality and containment
    Text,
    /// Integers: equality and ordering
    Integer,
    /// Opaque identifiers: equality only
    Identifier,
}

impl ValueKind {
    /// Whether `comparison` is legal for a field of this kind
    pub fn allows(&self, comparison: &Comparison) -> bool {
        use Comparison::*;

        match self {
            ValueKind::Text => matches!(comparison, Equals(Value::Str(_)) | Contains(_)),
            ValueKind::Identifier => matches!(comparison, Equals(Value::Str(_))),
            ValueKind::Integer => match comparison {
                Equals(Value::Int(_)) | LessThan(Value::Int(_)) | GreaterThan(Value::Int(_)) => {
                    true
                }
                Between(Value::Int(lo), Value::Int(hi)) => lo <= hi,
                _ => false,
            },
        }
    }
}

/// A field that may appear in a predicate leaf
pub trait QueryField: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Field name used in diagnostics
    fn name(&self) -> &'static str;

    /// What kind of values the field holds
    fn kind(&self) -> ValueKind;
}

macro_rules! query_fields {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident => ($label:literal, $kind:ident) ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl QueryField for $name {
            fn name(&self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }

            fn kind(&self) -> ValueKind {
                match self {
                    $( $name::$variant => ValueKind::$kind, )+
                }
            }
        }
    };
}

query_fields! {
    /// Fields searchable in paper queries
    PaperField {
        /// Title, abstract and keywords
        Keyword => ("keyword", Text),
        Title => ("title", Text),
        Abstract => ("abstract", Text),
        Author => ("author", Text),
        Affiliation => ("affiliation", Text),
        Journal => ("journal", Text),
        Topic => ("topic", Text),
        Doi => ("doi", Identifier),
        PubmedId => ("pubmed_id", Identifier),
        ScopusId => ("scopus_id", Identifier),
        Year => ("year", Integer),
        CitationCount => ("citation_count", Integer),
    }
}

query_fields! {
    /// Fields searchable in author queries
    AuthorField {
        Name => ("name", Text),
        Affiliation => ("affiliation", Text),
        Subject => ("subject", Text),
        ScopusId => ("scopus_id", Identifier),
        Orcid => ("orcid", Identifier),
    }
}

query_fields! {
    /// Fields searchable in institution queries
    InstitutionField {
        Name => ("name", Text),
        City => ("city", Text),
        Country => ("country", Text),
        ScopusId => ("scopus_id", Identifier),
    }
}

/// Errors raised while building a predicate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredicateError {
    #[error("'{operator}' is not allowed on field '{field}'")]
    IllegalComparison {
        field: &'static str,
        operator: &'static str,
    },

    #[error("{0} needs at least one operand")]
    Empty(&'static str),
}

/// A leaf predicate: one field compared against a literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition<F> {
    pub field: F,
    pub comparison: Comparison,
}

/// A predicate tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate<F> {
    And(Vec<Predicate<F>>),
    Or(Vec<Predicate<F>>),
    Leaf(Condition<F>),
}

impl<F: QueryField> Predicate<F> {
    /// Build a leaf, checking that the comparison is legal for the field
    pub fn leaf(field: F, comparison: Comparison) -> Result<Self, PredicateError> {
        if !field.kind().allows(&comparison) {
            return Err(PredicateError::IllegalComparison {
                field: field.name(),
                operator: comparison.operator(),
            });
        }
        Ok(Predicate::Leaf(Condition { field, comparison }))
    }

    /// `field == value`
    pub fn equals(field: F, value: impl Into<Value>) -> Result<Self, PredicateError> {
        Self::leaf(field, Comparison::Equals(value.into()))
    }

    /// `field contains text`
    pub fn contains(field: F, text: impl Into<String>) -> Result<Self, PredicateError> {
        Self::leaf(field, Comparison::Contains(text.into()))
    }

    /// `lo <= field <= hi`
    pub fn between(field: F, lo: i64, hi: i64) -> Result<Self, PredicateError> {
        Self::leaf(field, Comparison::Between(Value::Int(lo), Value::Int(hi)))
    }

    /// Conjunction of predicates
    pub fn and(children: Vec<Predicate<F>>) -> Result<Self, PredicateError> {
        if children.is_empty() {
            return Err(PredicateError::Empty("and"));
        }
        Ok(Predicate::And(children))
    }

    /// Disjunction of predicates
    pub fn or(children: Vec<Predicate<F>>) -> Result<Self, PredicateError> {
        if children.is_empty() {
            return Err(PredicateError::Empty("or"));
        }
        Ok(Predicate::Or(children))
    }

    /// In-list: `field == v1 OR field == v2 ...`
    pub fn any_of<I, V>(field: F, values: I) -> Result<Self, PredicateError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let children = values
            .into_iter()
            .map(|v| Self::equals(field, v))
            .collect::<Result<Vec<_>, _>>()?;
        Self::or(children)
    }

    /// All leaves, depth-first
    pub fn leaves(&self) -> Vec<&Condition<F>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition<F>>) {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Predicate::Leaf(condition) => out.push(condition),
        }
    }

    /// Render into a boolean query string with `AND`/`OR` infix operators.
    ///
    /// Leaves are rendered by `leaf`; nested groups are parenthesized.
    pub fn render<E>(
        &self,
        leaf: &mut impl FnMut(&Condition<F>) -> Result<String, E>,
    ) -> Result<String, E> {
        match self {
            Predicate::Leaf(condition) => leaf(condition),
            Predicate::And(children) => Self::render_group(children, " AND ", leaf),
            Predicate::Or(children) => Self::render_group(children, " OR ", leaf),
        }
    }

    fn render_group<E>(
        children: &[Predicate<F>],
        joiner: &str,
        leaf: &mut impl FnMut(&Condition<F>) -> Result<String, E>,
    ) -> Result<String, E> {
        let parts = children
            .iter()
            .map(|child| child.render(leaf))
            .collect::<Result<Vec<_>, _>>()?;

        if parts.len() == 1 {
            Ok(parts.into_iter().next().unwrap_or_default())
        } else {
            Ok(format!("({})", parts.join(joiner)))
        }
    }
}

/// Search query: predicate, output selector and result limit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery<F, S> {
    /// What to search for
    pub query: Predicate<F>,

    /// Which fields to return
    pub selector: S,

    /// Maximum number of records to return
    pub max_results: usize,
}

impl<F: QueryField, S: Default> SearchQuery<F, S> {
    /// Create a query that selects every field
    pub fn new(query: Predicate<F>) -> Self {
        Self {
            query,
            selector: S::default(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl<F, S> SearchQuery<F, S> {
    /// Set the output selector
    pub fn selector(mut self, selector: S) -> Self {
        self.selector = selector;
        self
    }

    /// Set maximum results
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Same selector and limit, different predicate
    pub fn with_predicate(&self, query: Predicate<F>) -> Self
    where
        S: Clone,
    {
        Self {
            query,
            selector: self.selector.clone(),
            max_results: self.max_results,
        }
    }
}

pub type PaperSearchQuery = SearchQuery<PaperField, PaperSelector>;
pub type AuthorSearchQuery = SearchQuery<AuthorField, AuthorSelector>;
pub type InstitutionSearchQuery = SearchQuery<InstitutionField, InstitutionSelector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_legality() {
        assert!(Predicate::equals(PaperField::Doi, "10.1/x").is_ok());
        assert!(Predicate::contains(PaperField::Title, "cancer").is_ok());
        assert!(Predicate::between(PaperField::Year, 2015, 2020).is_ok());

        assert_eq!(
            Predicate::contains(PaperField::Doi, "10.1").unwrap_err(),
            PredicateError::IllegalComparison {
                field: "doi",
                operator: "contains"
            }
        );
        assert!(Predicate::between(PaperField::Title, 1, 2).is_err());
        assert!(Predicate::between(PaperField::Year, 2020, 2015).is_err());
        assert!(Predicate::equals(PaperField::Year, "2020").is_err());
        assert!(
            Predicate::leaf(AuthorField::Orcid, Comparison::LessThan(Value::Int(3))).is_err()
        );
    }

    #[test]
    fn test_any_of_builds_disjunction() {
        let pred = Predicate::any_of(PaperField::Doi, ["a", "b"]).unwrap();
        match &pred {
            Predicate::Or(children) => assert_eq!(children.len(), 2),
            other => panic!("expected Or, got {:?}", other),
        }
        assert_eq!(pred.leaves().len(), 2);

        let empty: Vec<&str> = Vec::new();
        assert_eq!(
            Predicate::any_of(PaperField::Doi, empty).unwrap_err(),
            PredicateError::Empty("or")
        );
    }

    #[test]
    fn test_render_parenthesizes_groups() {
        let pred = Predicate::and(vec![
            Predicate::contains(PaperField::Keyword, "asthma").unwrap(),
            Predicate::any_of(PaperField::Doi, ["a", "b"]).unwrap(),
        ])
        .unwrap();

        let rendered = pred
            .render(&mut |c: &Condition<PaperField>| -> Result<String, ()> {
                let value = match &c.comparison {
                    Comparison::Equals(v) => v.to_string(),
                    Comparison::Contains(v) => v.clone(),
                    _ => unreachable!(),
                };
                Ok(format!("{}:{}", c.field.name(), value))
            })
            .unwrap();

        assert_eq!(rendered, "(keyword:asthma AND (doi:a OR doi:b))");
    }

    #[test]
    fn test_search_query_defaults() {
        let query = PaperSearchQuery::new(Predicate::contains(PaperField::Title, "x").unwrap());
        assert_eq!(query.max_results, DEFAULT_MAX_RESULTS);
        assert_eq!(query.selector, PaperSelector::all());

        let limited = query.max_results(5);
        assert_eq!(limited.max_results, 5);
    }
}
