//! Identifier sets for papers, authors and institutions.
//!
//! The same entity is usually known under different identifiers in different
//! backends (a DOI in one, a Scopus id in another). An id-set carries every
//! alternative that is known, and two id-sets are equal as soon as any
//! alternative present in both agrees.

use serde::{Deserialize, Serialize};

/// Errors raised when building an identifier set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("{0} must carry at least one identifier")]
    Empty(&'static str),
}

/// DOIs are case-insensitive, everything else compares exactly
fn same_alternative(field: &str, a: &str, b: &str) -> bool {
    if field == "doi" {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

macro_rules! id_set {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $field:ident => $with:ident ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: Option<String>, )+
        }

        impl $name {
            const EMPTY: Self = Self { $( $field: None, )+ };

            $(
                #[doc = concat!("Set the `", stringify!($field), "` alternative (blank values are ignored)")]
                pub fn $with(mut self, value: impl Into<String>) -> Self {
                    self.$field = non_empty(value);
                    self
                }
            )+

            /// Present alternatives as `(field, value)` pairs, in declaration order
            pub fn alternatives(&self) -> Vec<(&'static str, &str)> {
                let mut out = Vec::new();
                $(
                    if let Some(value) = &self.$field {
                        out.push((stringify!($field), value.as_str()));
                    }
                )+
                out
            }

            /// Whether no alternative is set
            pub fn is_empty(&self) -> bool {
                true $( && self.$field.is_none() )+
            }

            /// Check the at-least-one-alternative invariant, e.g. after deserializing
            pub fn validate(self) -> Result<Self, IdError> {
                if self.is_empty() {
                    Err(IdError::Empty(stringify!($name)))
                } else {
                    Ok(self)
                }
            }

            /// Fill alternatives missing here from `other`
            pub fn absorb(&mut self, other: &Self) {
                $(
                    if self.$field.is_none() {
                        self.$field = other.$field.clone();
                    }
                )+
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                $(
                    if let (Some(a), Some(b)) = (&self.$field, &other.$field) {
                        if same_alternative(stringify!($field), a, b) {
                            return true;
                        }
                    }
                )+
                false
            }
        }
    };
}

id_set! {
    /// Alternative identifiers of a paper
    PaperId {
        /// Digital Object Identifier
        doi => with_doi,
        /// Scopus document id (numeric part of the EID)
        scopus_id => with_scopus_id,
        /// PubMed id (PMID)
        pubmed_id => with_pubmed_id,
        /// PubMed Central id
        pmc_id => with_pmc_id,
    }
}

id_set! {
    /// Alternative identifiers of an author
    AuthorId {
        /// Scopus author id
        scopus_id => with_scopus_id,
        /// ORCID iD
        orcid => with_orcid,
    }
}

id_set! {
    /// Alternative identifiers of an institution
    InstitutionId {
        /// Scopus affiliation id
        scopus_id => with_scopus_id,
    }
}

impl PaperId {
    /// Paper known by its DOI
    pub fn from_doi(doi: impl Into<String>) -> Result<Self, IdError> {
        Self::EMPTY.with_doi(doi).validate()
    }

    /// Paper known by its PubMed id
    pub fn from_pubmed_id(pmid: impl Into<String>) -> Result<Self, IdError> {
        Self::EMPTY.with_pubmed_id(pmid).validate()
    }

    /// Paper known by its Scopus id
    pub fn from_scopus_id(id: impl Into<String>) -> Result<Self, IdError> {
        Self::EMPTY.with_scopus_id(id).validate()
    }

    /// The DOI in canonical (lower-case) form, used as the reconciliation key
    pub fn doi_key(&self) -> Option<String> {
        self.doi.as_ref().map(|d| d.to_ascii_lowercase())
    }
}

impl AuthorId {
    /// Author known by a Scopus author id
    pub fn from_scopus_id(id: impl Into<String>) -> Result<Self, IdError> {
        Self::EMPTY.with_scopus_id(id).validate()
    }

    /// Author known by an ORCID iD
    pub fn from_orcid(orcid: impl Into<String>) -> Result<Self, IdError> {
        Self::EMPTY.with_orcid(orcid).validate()
    }
}

impl InstitutionId {
    /// Institution known by a Scopus affiliation id
    pub fn from_scopus_id(id: impl Into<String>) -> Result<Self, IdError> {
        Self::EMPTY.with_scopus_id(id).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_alternative_makes_ids_equal() {
        let a = PaperId::from_doi("X").unwrap();
        let b = PaperId::from_doi("X").unwrap().with_pubmed_id("Y");
        assert_eq!(a, b);
    }

    #[test]
    fn test_doi_comparison_ignores_case() {
        let a = PaperId::from_doi("10.1000/ABC").unwrap();
        let b = PaperId::from_doi("10.1000/abc").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_disjoint_alternatives_are_not_equal() {
        let a = PaperId::from_doi("10.1/a").unwrap();
        let b = PaperId::from_pubmed_id("123").unwrap();
        assert_ne!(a, b);

        let c = PaperId::from_pubmed_id("124").unwrap();
        assert_ne!(b, c);
    }

    #[test]
    fn test_empty_id_set_is_rejected() {
        assert_eq!(
            PaperId::from_doi("   ").unwrap_err(),
            IdError::Empty("PaperId")
        );

        let parsed: AuthorId =
            serde_json::from_str(r#"{"scopus_id": null, "orcid": null}"#).unwrap();
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_alternatives_and_absorb() {
        let mut a = PaperId::from_pubmed_id("1").unwrap();
        let b = PaperId::from_doi("10.1/x").unwrap().with_scopus_id("85");
        a.absorb(&b);

        assert_eq!(
            a.alternatives(),
            vec![("doi", "10.1/x"), ("scopus_id", "85"), ("pubmed_id", "1")]
        );
        assert_eq!(a.doi_key().as_deref(), Some("10.1/x"));
    }
}
