//! Field metadata for every record shape the query layer knows about.
//!
//! A [`Shape`] names one of the fixed record types. Its [`Definition`] lists the
//! fields in declaration order together with their types, required-ness and
//! defaults. Selectors and projected models are both walked against these
//! definitions, so the field names here must match the serde field names of the
//! record structs in [`crate::models`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of record shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Paper,
    SubPaper,
    Author,
    Institution,
    Name,
    Subject,
    Topic,
    PaperId,
    AuthorId,
    InstitutionId,
}

impl Shape {
    /// All shapes, leaf-first
    pub const ALL: [Shape; 10] = [
        Shape::PaperId,
        Shape::AuthorId,
        Shape::InstitutionId,
        Shape::Name,
        Shape::Subject,
        Shape::Topic,
        Shape::Institution,
        Shape::Author,
        Shape::SubPaper,
        Shape::Paper,
    ];

    /// Returns the display name of the shape
    pub fn name(&self) -> &'static str {
        match self {
            Shape::Paper => "Paper",
            Shape::SubPaper => "SubPaper",
            Shape::Author => "Author",
            Shape::Institution => "Institution",
            Shape::Name => "Name",
            Shape::Subject => "Subject",
            Shape::Topic => "Topic",
            Shape::PaperId => "PaperId",
            Shape::AuthorId => "AuthorId",
            Shape::InstitutionId => "InstitutionId",
        }
    }

    /// Returns the full field definition of this shape
    pub fn definition(&self) -> Definition {
        use FieldType::*;

        let fields = match self {
            Shape::PaperId => vec![
                FieldDef::optional("doi", Str),
                FieldDef::optional("scopus_id", Str),
                FieldDef::optional("pubmed_id", Str),
                FieldDef::optional("pmc_id", Str),
            ],
            Shape::AuthorId => vec![
                FieldDef::optional("scopus_id", Str),
                FieldDef::optional("orcid", Str),
            ],
            Shape::InstitutionId => vec![FieldDef::optional("scopus_id", Str)],
            Shape::Name => vec![
                FieldDef::required("surname", Str),
                FieldDef::optional("given_name", Str),
                FieldDef::optional("initials", Str),
            ],
            Shape::Subject => vec![
                FieldDef::required("name", Str),
                FieldDef::optional("abbreviation", Str),
                FieldDef::optional("code", Int),
            ],
            Shape::Topic => vec![
                FieldDef::required("name", Str),
                FieldDef::optional("vocabulary", Str),
            ],
            Shape::Institution => vec![
                FieldDef::optional("institution_id", Record(Shape::InstitutionId)),
                FieldDef::optional("name", Str),
                FieldDef::optional("city", Str),
                FieldDef::optional("country", Str),
                FieldDef::optional("document_count", Int),
            ],
            Shape::Author => vec![
                FieldDef::optional("author_id", Record(Shape::AuthorId)),
                FieldDef::optional("name", Record(Shape::Name)),
                FieldDef::list("affiliations", Record(Shape::Institution)),
                FieldDef::list("subjects", Record(Shape::Subject)),
                FieldDef::optional("document_count", Int),
                FieldDef::optional("citation_count", Int),
                FieldDef::optional("h_index", Int),
            ],
            Shape::SubPaper => paper_fields(),
            Shape::Paper => {
                let mut fields = paper_fields();
                fields.push(FieldDef::list("references", Record(Shape::SubPaper)));
                fields.push(FieldDef::list("cited_by", Record(Shape::SubPaper)));
                fields
            }
        };

        Definition {
            shape: *self,
            fields,
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn paper_fields() -> Vec<FieldDef> {
    use FieldType::*;

    vec![
        FieldDef::required("paper_id", Record(Shape::PaperId)),
        FieldDef::optional("title", Str),
        FieldDef::optional("abstract", Str),
        FieldDef::list("authors", Record(Shape::Author)),
        FieldDef::optional("publication_date", Date),
        FieldDef::optional("source_title", Str),
        FieldDef::optional("document_type", Str),
        FieldDef::list("topics", Record(Shape::Topic)),
        FieldDef::list("subjects", Record(Shape::Subject)),
        FieldDef::optional("citation_count", Int),
    ]
}

/// The type of a single field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Str,
    Int,
    /// ISO-8601 date string
    Date,
    Record(Shape),
    List(Box<FieldType>),
    Optional(Box<FieldType>),
}

impl FieldType {
    /// The record shape inside any list/optional wrapping, if there is one
    pub fn record_shape(&self) -> Option<Shape> {
        match self {
            FieldType::Record(shape) => Some(*shape),
            FieldType::List(inner) | FieldType::Optional(inner) => inner.record_shape(),
            FieldType::Str | FieldType::Int | FieldType::Date => None,
        }
    }
}

/// Metadata for one field of a definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    /// Value used when the field is absent; `Null` for required fields
    pub default: Value,
}

impl FieldDef {
    fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: Value::Null,
        }
    }

    fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty: FieldType::Optional(Box::new(ty)),
            required: false,
            default: Value::Null,
        }
    }

    fn list(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty: FieldType::List(Box::new(ty)),
            required: false,
            default: Value::Array(Vec::new()),
        }
    }
}

/// The full field list of a shape
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub shape: Shape,
    pub fields: Vec<FieldDef>,
}

impl Definition {
    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_paper_excludes_links() {
        let paper = Shape::Paper.definition();
        let sub = Shape::SubPaper.definition();

        assert!(paper.field("references").is_some());
        assert!(paper.field("cited_by").is_some());
        assert!(sub.field("references").is_none());
        assert!(sub.field("cited_by").is_none());
        assert_eq!(paper.fields.len(), sub.fields.len() + 2);
    }

    #[test]
    fn test_record_shape_unwraps_containers() {
        let def = Shape::Paper.definition();
        let references = def.field("references").unwrap();
        assert_eq!(references.ty.record_shape(), Some(Shape::SubPaper));
        assert_eq!(references.default, Value::Array(vec![]));

        let title = def.field("title").unwrap();
        assert_eq!(title.ty.record_shape(), None);
        assert!(!title.required);

        let paper_id = def.field("paper_id").unwrap();
        assert!(paper_id.required);
        assert_eq!(paper_id.ty, FieldType::Record(Shape::PaperId));
    }

    #[test]
    fn test_field_names_are_unique() {
        for shape in Shape::ALL {
            let def = shape.definition();
            let mut names: Vec<_> = def.field_names().collect();
            let len = names.len();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), len, "duplicate field in {}", shape);
        }
    }
}
