//! Key extraction for relation predicates.
//!
//! A relation predicate `(p, c) => ...` must be a conjunction of exactly one
//! equality between a parent accessor and a child accessor (the anchor), plus
//! any number of terms that mention only the child. The anchor becomes a pair
//! of key selectors; the remaining terms become a residual filter applied to
//! fetched children. The parent set is the batch input, so it cannot be
//! filtered here.

use crate::error::{RelationError, RelationShapeError, ShapeViolation};
use crate::eval::{lookup, Key, Scope};
use crate::expr::{BinaryOp, Expr, Predicate, Side, TypeRef};
use crate::parser::parse_predicate;
use serde_json::Value;
use std::fmt;

/// Projects a batching key out of one side's entity.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySelector {
    pub side: Side,
    /// Member path from the parameter; empty means the entity itself.
    pub path: Vec<String>,
    /// Outermost conversion applied in the predicate, if any.
    pub conversion: Option<TypeRef>,
}

impl KeySelector {
    pub fn new(side: Side, path: &[&str]) -> Self {
        Self {
            side,
            path: path.iter().map(|s| (*s).to_string()).collect(),
            conversion: None,
        }
    }

    /// Returns the key, or `None` if the accessor is missing or null.
    pub fn key_of(&self, entity: &Value) -> Option<Key> {
        let raw = lookup(entity, &self.path)?;
        match self.conversion {
            Some(to) => Key::from_value(&crate::eval::convert(raw.clone(), to)),
            None => Key::from_value(raw),
        }
    }
}

impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = match self.side {
            Side::Parent => "parent",
            Side::Child => "child",
        };
        f.write_str(root)?;
        for field in &self.path {
            write!(f, ".{field}")?;
        }
        Ok(())
    }
}

/// Child-only filter terms left over after removing the anchor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Residual {
    terms: Vec<Expr>,
}

impl Residual {
    pub fn terms(&self) -> &[Expr] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// True when every term holds for `child`.
    pub fn matches(&self, child: &Value) -> bool {
        let scope = Scope::child(child);
        self.terms.iter().all(|term| term.test(&scope))
    }
}

/// A decomposed relation: `parent_key(p) == child_key(c)` and `residual(c)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub predicate: Predicate,
    pub parent_key: KeySelector,
    pub child_key: KeySelector,
    pub residual: Residual,
}

impl Relation {
    /// Decomposes a predicate, or rejects it with the rendered predicate.
    pub fn extract(predicate: Predicate) -> Result<Self, RelationShapeError> {
        let reject = |violation| RelationShapeError {
            predicate: predicate.to_string(),
            violation,
        };

        let mut anchors = Vec::new();
        let mut residual = Vec::new();
        for term in predicate.body.conjuncts() {
            if let Some(anchor) = anchor_of(term) {
                anchors.push(anchor);
            } else if term.references(Side::Parent) {
                return Err(reject(ShapeViolation::ParentResidual(
                    predicate.display(term).to_string(),
                )));
            } else {
                residual.push(term.clone());
            }
        }

        let (parent_key, child_key) = match anchors.len() {
            0 => return Err(reject(ShapeViolation::MissingAnchor)),
            1 => anchors.remove(0),
            n => return Err(reject(ShapeViolation::AmbiguousAnchor(n))),
        };

        Ok(Self {
            predicate,
            parent_key,
            child_key,
            residual: Residual { terms: residual },
        })
    }

    /// Parses predicate text and decomposes it.
    pub fn parse(source: &str) -> Result<Self, RelationError> {
        let predicate = parse_predicate(source)?;
        Ok(Self::extract(predicate)?)
    }

    /// Key of a parent entity.
    pub fn parent_key_of(&self, parent: &Value) -> Option<Key> {
        self.parent_key.key_of(parent)
    }

    /// Key of a child entity, if the child passes the residual filter.
    pub fn child_key_of(&self, child: &Value) -> Option<Key> {
        if self.residual.matches(child) {
            self.child_key.key_of(child)
        } else {
            None
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} == {}", self.parent_key, self.child_key)?;
        for term in &self.residual.terms {
            write!(f, " where {}", self.predicate.display(term))?;
        }
        Ok(())
    }
}

/// Recognizes `accessor == accessor` with one side rooted at each parameter.
fn anchor_of(term: &Expr) -> Option<(KeySelector, KeySelector)> {
    let Expr::Binary {
        op: BinaryOp::Eq,
        lhs,
        rhs,
    } = term
    else {
        return None;
    };
    let left = selector(lhs)?;
    let right = selector(rhs)?;
    match (left.side, right.side) {
        (Side::Parent, Side::Child) => Some((left, right)),
        (Side::Child, Side::Parent) => Some((right, left)),
        _ => None,
    }
}

fn selector(expr: &Expr) -> Option<KeySelector> {
    let (inner, conversion) = expr.unwrap_converts();
    // Only numeric widening or nullable lifting keeps an accessor a key.
    if conversion.is_some_and(|to| !to.scalar.is_numeric()) {
        return None;
    }
    let (side, path) = inner.as_accessor()?;
    Some(KeySelector {
        side,
        path,
        conversion,
    })
}
