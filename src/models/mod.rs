//! Core data models: record shapes, identifier sets, records and queries.

mod ids;
mod query;
mod records;
mod shape;

pub use ids::{AuthorId, IdError, InstitutionId, PaperId};
pub use query::{
    AuthorField, AuthorSearchQuery, Comparison, Condition, InstitutionField,
    InstitutionSearchQuery, PaperField, PaperSearchQuery, Predicate, PredicateError, QueryField,
    SearchQuery, Value, ValueKind, DEFAULT_MAX_RESULTS,
};
pub use records::{
    Author, Institution, Name, Paper, PaperBuilder, Record, SubPaper, Subject, Topic,
};
pub use shape::{Definition, FieldDef, FieldType, Shape};
