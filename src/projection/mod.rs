//! Model projection: turn a selector into the minimal output schema and prune
//! full records down to it.
//!
//! The selector and the field definitions are walked in lockstep. Every field
//! that is selected keeps its definition metadata (type, required-ness,
//! default); unselected fields disappear from the model. Records projected
//! through a [`Model`] are validated against it, so a [`ProjectedRecord`]
//! always holds exactly the model's fields with values of the declared types.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::models::{FieldDef, FieldType, Record, Shape};
use crate::selector::{Selector, SelectorError, SelectorNode};

/// Errors raised while projecting a record
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("required field '{path}' is missing")]
    MissingField { path: String },

    #[error("field '{path}' should be {expected}")]
    TypeMismatch { path: String, expected: String },

    #[error("cannot project a {record} through a {model} model")]
    WrongRecord { record: Shape, model: Shape },
}

/// Definition shapes to use for specific fields, keyed by dotted path
/// relative to the record being modelled.
///
/// Needed when the element actually stored in a field is richer than the
/// field's logical shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TypeOverrides(BTreeMap<String, Shape>);

impl TypeOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `shape`'s definition for the sub-model at `path`
    pub fn with(mut self, path: impl Into<String>, shape: Shape) -> Self {
        self.0.insert(path.into(), shape);
        self
    }

    pub fn get(&self, path: &str) -> Option<Shape> {
        self.0.get(path).copied()
    }

    /// Overrides below `field`, with the prefix stripped
    fn below(&self, field: &str) -> Self {
        let prefix = format!("{}.", field);
        Self(
            self.0
                .iter()
                .filter_map(|(path, shape)| {
                    path.strip_prefix(&prefix)
                        .map(|rest| (rest.to_string(), *shape))
                })
                .collect(),
        )
    }
}

/// Value used for an absent field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldDefault {
    /// No default, the field must be present
    Required,
    Null,
    EmptyList,
}

impl FieldDefault {
    fn of(def: &FieldDef) -> Self {
        if def.required {
            FieldDefault::Required
        } else if def.default.is_array() {
            FieldDefault::EmptyList
        } else {
            FieldDefault::Null
        }
    }

    /// The JSON value filled in for an absent field
    pub fn to_value(self) -> Option<Value> {
        match self {
            FieldDefault::Required => None,
            FieldDefault::Null => Some(Value::Null),
            FieldDefault::EmptyList => Some(Value::Array(Vec::new())),
        }
    }
}

/// Type of a model field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelType {
    Str,
    Int,
    Date,
    Record(Box<Model>),
    List(Box<ModelType>),
    Optional(Box<ModelType>),
}

impl ModelType {
    /// Mirror a definition type, substituting `record` for the record leaf
    fn wrap(ty: &FieldType, record: Option<&Model>) -> Result<Self, SelectorError> {
        Ok(match ty {
            FieldType::Str => ModelType::Str,
            FieldType::Int => ModelType::Int,
            FieldType::Date => ModelType::Date,
            FieldType::Record(shape) => match record {
                Some(model) => ModelType::Record(Box::new(model.clone())),
                None => {
                    return Err(SelectorError::StructuralMismatch {
                        shape: *shape,
                        detail: "record field without a sub-model".to_string(),
                    })
                }
            },
            FieldType::List(inner) => ModelType::List(Box::new(Self::wrap(inner, record)?)),
            FieldType::Optional(inner) => {
                ModelType::Optional(Box::new(Self::wrap(inner, record)?))
            }
        })
    }

    /// The record model inside any wrapping
    pub fn record(&self) -> Option<&Model> {
        match self {
            ModelType::Record(model) => Some(model),
            ModelType::List(inner) | ModelType::Optional(inner) => inner.record(),
            ModelType::Str | ModelType::Int | ModelType::Date => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            ModelType::Str => "a string".to_string(),
            ModelType::Int => "an integer".to_string(),
            ModelType::Date => "an ISO-8601 date".to_string(),
            ModelType::Record(model) => format!("a {} object", model.shape),
            ModelType::List(inner) => format!("a list of {}", inner.describe()),
            ModelType::Optional(inner) => format!("null or {}", inner.describe()),
        }
    }

    fn project(&self, value: &Value, path: &str) -> Result<Value, ProjectionError> {
        match (self, value) {
            (ModelType::Optional(_), Value::Null) => Ok(Value::Null),
            (ModelType::Optional(inner), _) => inner.project(value, path),
            (ModelType::List(inner), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| inner.project(item, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (ModelType::Str, Value::String(_)) => Ok(value.clone()),
            (ModelType::Date, Value::String(s)) if is_iso_date(s) => Ok(value.clone()),
            (ModelType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            (ModelType::Record(model), Value::Object(_)) => {
                model.project_value(value, path).map(Value::Object)
            }
            _ => Err(ProjectionError::TypeMismatch {
                path: path.to_string(),
                expected: self.describe(),
            }),
        }
    }
}

/// Full dates, year-month or bare years, as the backends report them
fn is_iso_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(&format!("{}-01-01", s), "%Y-%m-%d").is_ok()
}

/// One field of a model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelField {
    pub name: &'static str,
    pub ty: ModelType,
    pub required: bool,
    pub default: FieldDefault,
}

/// The minimal output schema for a selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Model {
    /// Logical shape, the shape of the selector
    pub shape: Shape,
    /// Shape whose definition supplied the field metadata
    pub source: Shape,
    pub fields: Vec<ModelField>,
}

/// Synthesize the model for `selector` against `source`'s definition.
///
/// Unselected fields (and nested selections with nothing in them) are left
/// out. Record fields selected with a bare `true` get the model of the whole
/// logical shape. Pure and deterministic.
pub fn generate_model(
    selector: &Selector,
    source: Shape,
    overrides: &TypeOverrides,
) -> Result<Model, SelectorError> {
    let logical = selector.shape().definition();
    let definition = source.definition();
    let mut fields = Vec::new();

    for (name, node) in selector.fields() {
        let def = definition
            .field(name)
            .ok_or_else(|| SelectorError::StructuralMismatch {
                shape: source,
                detail: format!("no field '{}' to project", name),
            })?;

        let sub_selector = match node {
            SelectorNode::Bool(false) => continue,
            SelectorNode::Nested(sub) if sub.is_none() => continue,
            SelectorNode::Bool(true) => logical
                .field(name)
                .and_then(|f| f.ty.record_shape())
                .map(Selector::all),
            SelectorNode::Nested(sub) => Some(sub.clone()),
        };

        let sub_model = match sub_selector {
            None => None,
            Some(sub) => {
                let sub_source = match overrides.get(name) {
                    Some(shape) => shape,
                    None => def.ty.record_shape().ok_or_else(|| {
                        SelectorError::StructuralMismatch {
                            shape: source,
                            detail: format!("'{}' is not a record field", name),
                        }
                    })?,
                };
                Some(generate_model(&sub, sub_source, &overrides.below(name))?)
            }
        };

        fields.push(ModelField {
            name,
            ty: ModelType::wrap(&def.ty, sub_model.as_ref())?,
            required: def.required,
            default: FieldDefault::of(def),
        });
    }

    Ok(Model {
        shape: selector.shape(),
        source,
        fields,
    })
}

impl Model {
    /// Look up a field
    pub fn field(&self, name: &str) -> Option<&ModelField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The selector that selects exactly this model's fields
    pub fn to_selector(&self) -> Result<Selector, SelectorError> {
        Selector::from_json(self.shape, &self.selector_json())
    }

    fn selector_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|field| {
                    let node = match field.ty.record() {
                        Some(sub) => sub.selector_json(),
                        None => Value::Bool(true),
                    };
                    (field.name.to_string(), node)
                })
                .collect(),
        )
    }

    /// Prune `record` down to this model, validating every kept value
    pub fn project<R: Record>(self: &Arc<Self>, record: &R) -> Result<ProjectedRecord, ProjectionError> {
        if R::SHAPE != self.source && R::SHAPE != self.shape {
            return Err(ProjectionError::WrongRecord {
                record: R::SHAPE,
                model: self.shape,
            });
        }

        let value = serde_json::to_value(record).map_err(|e| ProjectionError::TypeMismatch {
            path: String::new(),
            expected: format!("a serializable record ({})", e),
        })?;

        Ok(ProjectedRecord {
            values: self.project_value(&value, "")?,
            model: Arc::clone(self),
        })
    }

    fn project_value(&self, value: &Value, path: &str) -> Result<Map<String, Value>, ProjectionError> {
        let object = value
            .as_object()
            .ok_or_else(|| ProjectionError::TypeMismatch {
                path: path.to_string(),
                expected: format!("a {} object", self.shape),
            })?;

        let mut out = Map::new();
        for field in &self.fields {
            let field_path = if path.is_empty() {
                field.name.to_string()
            } else {
                format!("{}.{}", path, field.name)
            };

            let projected = match object.get(field.name) {
                None | Some(Value::Null) => field
                    .default
                    .to_value()
                    .ok_or(ProjectionError::MissingField { path: field_path })?,
                Some(v) => field.ty.project(v, &field_path)?,
            };
            out.insert(field.name.to_string(), projected);
        }
        Ok(out)
    }
}

/// A record pruned to a model's fields
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRecord {
    values: Map<String, Value>,
    model: Arc<Model>,
}

impl ProjectedRecord {
    /// The value of field `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Field names present, in model order
    pub fn keys(&self) -> Vec<&'static str> {
        self.model.fields.iter().map(|f| f.name).collect()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

impl Serialize for ProjectedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

type CacheKey = (Selector, Shape, TypeOverrides);

/// Memoizes generated models.
///
/// Keys use the normalized selector, so spellings that select the same
/// leaves share one model.
#[derive(Debug, Default)]
pub struct ModelCache {
    models: Mutex<HashMap<CacheKey, Arc<Model>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached model, generating it on first use
    pub fn get_or_generate(
        &self,
        selector: &Selector,
        source: Shape,
        overrides: &TypeOverrides,
    ) -> Result<Arc<Model>, SelectorError> {
        let key = (selector.normalized(), source, overrides.clone());

        let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(model) = models.get(&key) {
            return Ok(Arc::clone(model));
        }

        let model = Arc::new(generate_model(&key.0, source, overrides)?);
        models.insert(key, Arc::clone(&model));
        Ok(model)
    }

    pub fn len(&self) -> usize {
        self.models.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
