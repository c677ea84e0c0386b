//! Field selectors: recursive boolean trees over record shapes.
//!
//! A [`Selector`] holds exactly one entry per field of its shape's definition,
//! in declaration order. Each entry is either a plain flag or, for record-typed
//! fields, a nested selector over the field's element shape. The typed wrappers
//! in this module ([`PaperSelector`], [`AuthorSelector`], ...) pin the shape at
//! compile time so selectors of different shapes cannot be combined by accident.
//!
//! ```rust
//! use research_federation::selector::PaperSelector;
//! use serde_json::json;
//!
//! let wanted = PaperSelector::from_json(&json!({
//!     "paper_id": {"doi": true},
//!     "title": true,
//! })).unwrap();
//!
//! assert!(PaperSelector::all().contains(&wanted).unwrap());
//! ```

mod algebra;
mod typed;

pub use typed::{
    AuthorIdSelector, AuthorSelector, InstitutionIdSelector, InstitutionSelector, NameSelector,
    PaperIdSelector, PaperSelector, SubPaperSelector, SubjectSelector, TopicSelector,
    TypedSelector,
};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::models::Shape;

/// Errors raised by selector construction and algebra
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// Two selectors (or a selector and a definition) disagree on their fields.
    /// Only happens when collaborators are wired against different shapes.
    #[error("selector structure diverges from {shape}: {detail}")]
    StructuralMismatch { shape: Shape, detail: String },

    /// A user-supplied mapping does not fit the shape
    #[error("invalid selector for {shape} at '{path}': {reason}")]
    SchemaMismatch {
        shape: Shape,
        path: String,
        reason: String,
    },
}

/// A dotted path to a field, e.g. `paper_id.doi`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<&'static str>);

impl FieldPath {
    /// Build a path from its segments
    pub fn new(segments: &[&'static str]) -> Self {
        Self(segments.to_vec())
    }

    /// Path segments, outermost first
    pub fn segments(&self) -> &[&'static str] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One entry of a selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectorNode {
    /// The whole field is wanted (`true`) or not (`false`)
    Bool(bool),
    /// Part of a nested record is wanted
    Nested(Selector),
}

impl SelectorNode {
    fn to_json(&self) -> Value {
        match self {
            SelectorNode::Bool(b) => Value::Bool(*b),
            SelectorNode::Nested(sub) => sub.to_json(),
        }
    }
}

/// A selector over one record shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    shape: Shape,
    fields: Vec<(&'static str, SelectorNode)>,
}

impl Selector {
    /// Every field set to `value`
    pub fn filled(shape: Shape, value: bool) -> Self {
        Self {
            shape,
            fields: shape
                .definition()
                .field_names()
                .map(|name| (name, SelectorNode::Bool(value)))
                .collect(),
        }
    }

    /// The canonical all-selected instance
    pub fn all(shape: Shape) -> Self {
        Self::filled(shape, true)
    }

    /// Nothing selected
    pub fn none(shape: Shape) -> Self {
        Self::filled(shape, false)
    }

    /// Build from a nested mapping of field name to `true`/`false`/mapping.
    ///
    /// Fields missing from the mapping are not selected.
    pub fn from_json(shape: Shape, value: &Value) -> Result<Self, SelectorError> {
        match value {
            Value::Object(map) => Self::from_map(shape, map, ""),
            Value::Bool(b) => Ok(Self::filled(shape, *b)),
            _ => Err(SelectorError::SchemaMismatch {
                shape,
                path: String::new(),
                reason: "expected an object or a boolean".to_string(),
            }),
        }
    }

    fn from_map(shape: Shape, map: &Map<String, Value>, prefix: &str) -> Result<Self, SelectorError> {
        let definition = shape.definition();

        if let Some(unknown) = map.keys().find(|k| definition.field(k).is_none()) {
            return Err(SelectorError::SchemaMismatch {
                shape,
                path: join_path(prefix, unknown),
                reason: "unknown field".to_string(),
            });
        }

        let mut fields = Vec::with_capacity(definition.fields.len());
        for field in &definition.fields {
            let path = join_path(prefix, field.name);
            let node = match map.get(field.name) {
                None => SelectorNode::Bool(false),
                Some(Value::Bool(b)) => SelectorNode::Bool(*b),
                Some(Value::Object(sub)) => match field.ty.record_shape() {
                    Some(sub_shape) => SelectorNode::Nested(Self::from_map(sub_shape, sub, &path)?),
                    None => {
                        return Err(SelectorError::SchemaMismatch {
                            shape,
                            path,
                            reason: "not a record field, expected a boolean".to_string(),
                        })
                    }
                },
                Some(other) => {
                    return Err(SelectorError::SchemaMismatch {
                        shape,
                        path,
                        reason: format!("expected a boolean or an object, got {}", other),
                    })
                }
            };
            fields.push((field.name, node));
        }

        Ok(Self { shape, fields })
    }

    /// Select every dotted path in `paths`
    pub fn from_paths(shape: Shape, paths: &[&str]) -> Result<Self, SelectorError> {
        let mut selector = Self::none(shape);
        for path in paths {
            let segments: Vec<&str> = path.split('.').collect();
            selector.select_path(&segments, path)?;
        }
        Ok(selector)
    }

    fn select_path(&mut self, segments: &[&str], full_path: &str) -> Result<(), SelectorError> {
        let shape = self.shape;
        let mismatch = |reason: &str| SelectorError::SchemaMismatch {
            shape,
            path: full_path.to_string(),
            reason: reason.to_string(),
        };

        let (head, rest) = segments.split_first().ok_or_else(|| mismatch("empty path"))?;
        let definition = shape.definition();
        let field = definition.field(head).ok_or_else(|| mismatch("unknown field"))?;
        let slot = self
            .fields
            .iter_mut()
            .find(|(name, _)| name == head)
            .map(|(_, node)| node)
            .ok_or_else(|| mismatch("unknown field"))?;

        if rest.is_empty() {
            *slot = SelectorNode::Bool(true);
            return Ok(());
        }

        let sub_shape = field
            .ty
            .record_shape()
            .ok_or_else(|| mismatch("not a record field"))?;

        match slot {
            SelectorNode::Bool(true) => Ok(()),
            SelectorNode::Bool(false) => {
                let mut sub = Self::none(sub_shape);
                sub.select_path(rest, full_path)?;
                *slot = SelectorNode::Nested(sub);
                Ok(())
            }
            SelectorNode::Nested(sub) => sub.select_path(rest, full_path),
        }
    }

    /// The shape this selector applies to
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Entries in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &SelectorNode)> {
        self.fields.iter().map(|(name, node)| (*name, node))
    }

    /// The entry for `name`
    pub fn get(&self, name: &str) -> Option<&SelectorNode> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, node)| node)
    }

    /// Whether anything of field `name` is wanted
    pub fn is_selected(&self, name: &str) -> bool {
        match self.get(name) {
            Some(SelectorNode::Bool(b)) => *b,
            Some(SelectorNode::Nested(sub)) => sub.any_selected(),
            None => false,
        }
    }

    /// Nested mapping representation
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, node)| (name.to_string(), node.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_defaults_missing_to_false() {
        let selector = Selector::from_json(
            Shape::Paper,
            &json!({"paper_id": {"doi": true}, "title": false}),
        )
        .unwrap();

        assert_eq!(selector.get("title"), Some(&SelectorNode::Bool(false)));
        assert_eq!(selector.get("abstract"), Some(&SelectorNode::Bool(false)));
        match selector.get("paper_id") {
            Some(SelectorNode::Nested(sub)) => {
                assert_eq!(sub.shape(), Shape::PaperId);
                assert_eq!(sub.get("doi"), Some(&SelectorNode::Bool(true)));
                assert_eq!(sub.get("pubmed_id"), Some(&SelectorNode::Bool(false)));
            }
            other => panic!("expected nested paper_id, got {:?}", other),
        }
        assert_eq!(selector.fields().count(), Shape::Paper.definition().fields.len());
    }

    #[test]
    fn test_from_json_rejects_unknown_keys() {
        let err = Selector::from_json(Shape::Paper, &json!({"paper_id": {"isbn": true}}))
            .unwrap_err();
        assert_eq!(
            err,
            SelectorError::SchemaMismatch {
                shape: Shape::PaperId,
                path: "paper_id.isbn".to_string(),
                reason: "unknown field".to_string(),
            }
        );
    }

    #[test]
    fn test_from_json_rejects_nested_scalar_and_bad_values() {
        assert!(Selector::from_json(Shape::Paper, &json!({"title": {"x": true}})).is_err());
        assert!(Selector::from_json(Shape::Paper, &json!({"title": 1})).is_err());
        assert!(Selector::from_json(Shape::Paper, &json!(["title"])).is_err());
    }

    #[test]
    fn test_from_paths() {
        let selector =
            Selector::from_paths(Shape::Paper, &["paper_id.doi", "authors.name", "title"]).unwrap();
        let expected = Selector::from_json(
            Shape::Paper,
            &json!({"paper_id": {"doi": true}, "authors": {"name": true}, "title": true}),
        )
        .unwrap();
        assert_eq!(selector, expected);

        // a parent already fully selected absorbs deeper paths
        let selector = Selector::from_paths(Shape::Paper, &["paper_id", "paper_id.doi"]).unwrap();
        assert_eq!(selector.get("paper_id"), Some(&SelectorNode::Bool(true)));

        assert!(Selector::from_paths(Shape::Paper, &["title.x"]).is_err());
        assert!(Selector::from_paths(Shape::Paper, &["nope"]).is_err());
    }

    #[test]
    fn test_to_json_round_trip() {
        let value = json!({"paper_id": {"doi": true}, "references": {"title": true}});
        let selector = Selector::from_json(Shape::Paper, &value).unwrap();
        let again = Selector::from_json(Shape::Paper, &selector.to_json()).unwrap();
        assert_eq!(selector, again);
        assert_eq!(selector.to_json()["references"]["title"], json!(true));
        assert_eq!(selector.to_json()["cited_by"], json!(false));
    }

    #[test]
    fn test_field_path_display() {
        let path = FieldPath::new(&["paper_id", "doi"]);
        assert_eq!(path.to_string(), "paper_id.doi");
        assert_eq!(serde_json::to_value(&path).unwrap(), json!("paper_id.doi"));
    }
}
