//! Shape-pinned selector wrappers.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::Deref;

use super::{FieldPath, Selector, SelectorError};
use crate::models::Shape;

/// A selector whose shape is fixed by its type
pub trait TypedSelector:
    Clone + fmt::Debug + PartialEq + Default + Send + Sync + 'static
{
    /// The shape every instance has
    const SHAPE: Shape;

    /// Borrow the untyped selector
    fn as_selector(&self) -> &Selector;

    /// Wrap an untyped selector, checking its shape
    fn from_selector(selector: Selector) -> Result<Self, SelectorError>;
}

macro_rules! typed_selector {
    ($(#[$meta:meta])* $name:ident => $shape:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(Selector);

        impl $name {
            /// Every field selected
            pub fn all() -> Self {
                Self(Selector::all($shape))
            }

            /// Nothing selected
            pub fn none() -> Self {
                Self(Selector::none($shape))
            }

            /// Build from a nested mapping; missing keys are not selected
            pub fn from_json(value: &serde_json::Value) -> Result<Self, SelectorError> {
                Selector::from_json($shape, value).map(Self)
            }

            /// Select the given dotted paths
            pub fn from_paths(paths: &[&str]) -> Result<Self, SelectorError> {
                Selector::from_paths($shape, paths).map(Self)
            }

            /// Unwrap into the untyped selector
            pub fn into_inner(self) -> Selector {
                self.0
            }

            pub fn contains(&self, other: &Self) -> Result<bool, SelectorError> {
                self.0.contains(&other.0)
            }

            pub fn any_of_fields(&self, relevant: &Self) -> Result<bool, SelectorError> {
                self.0.any_of_fields(&relevant.0)
            }

            pub fn overselected(&self, requested: &Self) -> Result<Vec<FieldPath>, SelectorError> {
                self.0.overselected(&requested.0)
            }

            pub fn intersect(&self, other: &Self) -> Result<Self, SelectorError> {
                self.0.intersect(&other.0).map(Self)
            }

            pub fn union(&self, other: &Self) -> Result<Self, SelectorError> {
                self.0.union(&other.0).map(Self)
            }

            pub fn normalized(&self) -> Self {
                Self(self.0.normalized())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::all()
            }
        }

        impl Deref for $name {
            type Target = Selector;

            fn deref(&self) -> &Selector {
                &self.0
            }
        }

        impl TypedSelector for $name {
            const SHAPE: Shape = $shape;

            fn as_selector(&self) -> &Selector {
                &self.0
            }

            fn from_selector(selector: Selector) -> Result<Self, SelectorError> {
                if selector.shape() == $shape {
                    Ok(Self(selector))
                } else {
                    Err(SelectorError::StructuralMismatch {
                        shape: $shape,
                        detail: format!("got a {} selector", selector.shape()),
                    })
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = serde_json::Value::deserialize(deserializer)?;
                Self::from_json(&value).map_err(serde::de::Error::custom)
            }
        }
    };
}

typed_selector! {
    /// Selector over [`crate::models::Paper`]
    PaperSelector => Shape::Paper
}
typed_selector! {
    /// Selector over [`crate::models::SubPaper`]
    SubPaperSelector => Shape::SubPaper
}
typed_selector! {
    /// Selector over [`crate::models::Author`]
    AuthorSelector => Shape::Author
}
typed_selector! {
    /// Selector over [`crate::models::Institution`]
    InstitutionSelector => Shape::Institution
}
typed_selector!(NameSelector => Shape::Name);
typed_selector!(SubjectSelector => Shape::Subject);
typed_selector!(TopicSelector => Shape::Topic);
typed_selector!(PaperIdSelector => Shape::PaperId);
typed_selector!(AuthorIdSelector => Shape::AuthorId);
typed_selector!(InstitutionIdSelector => Shape::InstitutionId);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_all() {
        assert_eq!(PaperSelector::default(), PaperSelector::all());
        assert!(PaperSelector::default().is_all());
        assert!(TopicSelector::none().is_none());
    }

    #[test]
    fn test_from_selector_checks_shape() {
        assert!(AuthorSelector::from_selector(Selector::all(Shape::Author)).is_ok());
        assert!(AuthorSelector::from_selector(Selector::all(Shape::Paper)).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let sel: PaperSelector =
            serde_json::from_value(json!({"paper_id": {"doi": true}})).unwrap();
        assert_eq!(sel, PaperSelector::from_paths(&["paper_id.doi"]).unwrap());

        let bad: Result<PaperSelector, _> = serde_json::from_value(json!({"isbn": true}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_serialize_is_nested_mapping() {
        let sel = InstitutionSelector::from_paths(&["name", "institution_id.scopus_id"]).unwrap();
        assert_eq!(
            serde_json::to_value(&sel).unwrap(),
            json!({
                "institution_id": {"scopus_id": true},
                "name": true,
                "city": false,
                "country": false,
                "document_count": false,
            })
        );
    }
}
