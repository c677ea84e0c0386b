//! Set-style operations over selectors of the same shape.

use super::{FieldPath, Selector, SelectorError, SelectorNode};
use SelectorNode::{Bool, Nested};

type Pair<'a> = (&'static str, &'a SelectorNode, &'a SelectorNode);

impl Selector {
    /// Walk two selectors field by field, failing if their structure diverges
    fn pairs<'a>(&'a self, other: &'a Selector) -> Result<Vec<Pair<'a>>, SelectorError> {
        if self.shape != other.shape {
            return Err(SelectorError::StructuralMismatch {
                shape: self.shape,
                detail: format!("cannot combine with a {} selector", other.shape),
            });
        }
        if self.fields.len() != other.fields.len() {
            return Err(SelectorError::StructuralMismatch {
                shape: self.shape,
                detail: format!(
                    "{} fields against {}",
                    self.fields.len(),
                    other.fields.len()
                ),
            });
        }

        self.fields
            .iter()
            .zip(&other.fields)
            .map(|((a_name, a), (b_name, b))| {
                if a_name == b_name {
                    Ok((*a_name, a, b))
                } else {
                    Err(SelectorError::StructuralMismatch {
                        shape: self.shape,
                        detail: format!("field '{}' against '{}'", a_name, b_name),
                    })
                }
            })
            .collect()
    }

    /// Whether some leaf is selected
    pub fn any_selected(&self) -> bool {
        self.fields.iter().any(|(_, node)| match node {
            Bool(b) => *b,
            Nested(sub) => sub.any_selected(),
        })
    }

    /// Whether every leaf is selected
    pub fn is_all(&self) -> bool {
        self.fields.iter().all(|(_, node)| match node {
            Bool(b) => *b,
            Nested(sub) => sub.is_all(),
        })
    }

    /// Whether nothing is selected
    pub fn is_none(&self) -> bool {
        !self.any_selected()
    }

    /// Whether every field selected by `other` is also selected here
    pub fn contains(&self, other: &Selector) -> Result<bool, SelectorError> {
        for (_, mine, theirs) in self.pairs(other)? {
            let covered = match (mine, theirs) {
                (Bool(a), Bool(b)) => *a || !*b,
                (Bool(true), Nested(_)) => true,
                (Bool(false), Nested(sub)) => sub.is_none(),
                (Nested(sub), Bool(true)) => sub.is_all(),
                (Nested(_), Bool(false)) => true,
                (Nested(a), Nested(b)) => a.contains(b)?,
            };
            if !covered {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether the fields selected here overlap the fields selected in `relevant`
    pub fn any_of_fields(&self, relevant: &Selector) -> Result<bool, SelectorError> {
        for (_, mine, theirs) in self.pairs(relevant)? {
            let overlaps = match (mine, theirs) {
                (Bool(a), Bool(b)) => *a && *b,
                (Bool(false), _) | (_, Bool(false)) => false,
                (Bool(true), Nested(sub)) | (Nested(sub), Bool(true)) => sub.any_selected(),
                (Nested(a), Nested(b)) => a.any_of_fields(b)?,
            };
            if overlaps {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Paths selected in `requested` that this (available) selector lacks.
    ///
    /// Empty exactly when `self.contains(requested)`.
    pub fn overselected(&self, requested: &Selector) -> Result<Vec<FieldPath>, SelectorError> {
        let mut out = Vec::new();
        self.collect_overselected(requested, &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    fn collect_overselected(
        &self,
        requested: &Selector,
        prefix: &mut Vec<&'static str>,
        out: &mut Vec<FieldPath>,
    ) -> Result<(), SelectorError> {
        for (name, available, wanted) in self.pairs(requested)? {
            prefix.push(name);
            match (available, wanted) {
                (_, Bool(false)) | (Bool(true), _) => {}
                (Bool(false), Bool(true)) => out.push(FieldPath(prefix.clone())),
                (Bool(false), Nested(sub)) => sub.collect_selected(prefix, out),
                (Nested(sub), Bool(true)) => {
                    sub.collect_overselected(&Selector::all(sub.shape), prefix, out)?
                }
                (Nested(a), Nested(b)) => a.collect_overselected(b, prefix, out)?,
            }
            prefix.pop();
        }
        Ok(())
    }

    fn collect_selected(&self, prefix: &mut Vec<&'static str>, out: &mut Vec<FieldPath>) {
        for (name, node) in &self.fields {
            prefix.push(*name);
            match node {
                Bool(true) => out.push(FieldPath(prefix.clone())),
                Bool(false) => {}
                Nested(sub) => sub.collect_selected(prefix, out),
            }
            prefix.pop();
        }
    }

    /// Fields selected in both
    pub fn intersect(&self, other: &Selector) -> Result<Selector, SelectorError> {
        let fields = self
            .pairs(other)?
            .into_iter()
            .map(|(name, a, b)| {
                let node = match (a, b) {
                    (Bool(x), Bool(y)) => Bool(*x && *y),
                    (Bool(true), Nested(sub)) | (Nested(sub), Bool(true)) => Nested(sub.clone()),
                    (Bool(false), Nested(_)) | (Nested(_), Bool(false)) => Bool(false),
                    (Nested(x), Nested(y)) => Nested(x.intersect(y)?),
                };
                Ok((name, node))
            })
            .collect::<Result<_, SelectorError>>()?;

        Ok(Selector {
            shape: self.shape,
            fields,
        })
    }

    /// Fields selected in either
    pub fn union(&self, other: &Selector) -> Result<Selector, SelectorError> {
        let fields = self
            .pairs(other)?
            .into_iter()
            .map(|(name, a, b)| {
                let node = match (a, b) {
                    (Bool(x), Bool(y)) => Bool(*x || *y),
                    (Bool(true), Nested(_)) | (Nested(_), Bool(true)) => Bool(true),
                    (Bool(false), Nested(sub)) | (Nested(sub), Bool(false)) => Nested(sub.clone()),
                    (Nested(x), Nested(y)) => Nested(x.union(y)?),
                };
                Ok((name, node))
            })
            .collect::<Result<_, SelectorError>>()?;

        Ok(Selector {
            shape: self.shape,
            fields,
        })
    }

    /// Collapse fully-true and fully-false nested entries to bare booleans
    pub fn normalized(&self) -> Selector {
        let fields = self
            .fields
            .iter()
            .map(|(name, node)| {
                let node = match node {
                    Bool(b) => Bool(*b),
                    Nested(sub) if sub.is_all() => Bool(true),
                    Nested(sub) if sub.is_none() => Bool(false),
                    Nested(sub) => Nested(sub.normalized()),
                };
                (*name, node)
            })
            .collect();

        Selector {
            shape: self.shape,
            fields,
        }
    }

    /// Whether both select the same leaves, however they are spelled
    pub fn equivalent(&self, other: &Selector) -> Result<bool, SelectorError> {
        Ok(self.contains(other)? && other.contains(self)?)
    }
}
