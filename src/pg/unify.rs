//! Term and literal unification.
//!
//! A [`Unifier`] records the term identifications under which two literals
//! denote the same fact. Pairs are kept in first-seen order with a
//! normalized (lexicographically sorted) orientation so `(x, y)` and
//! `(y, x)` are the same pair. Syntactically equal terms never enter a
//! unifier; an empty unifier therefore means the literals already coincide.

use crate::ast::{Literal, Term};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A set of term identifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unifier {
    pairs: Vec<(Term, Term)>,
}

impl Unifier {
    pub fn new() -> Self {
        Unifier::default()
    }

    /// Record `t1 ~ t2`. Equal terms are dropped, duplicates collapse.
    pub fn add(&mut self, t1: Term, t2: Term) {
        if t1 == t2 {
            return;
        }
        let pair = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        if !self.pairs.contains(&pair) {
            self.pairs.push(pair);
        }
    }

    pub fn pairs(&self) -> &[(Term, Term)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

impl fmt::Display for Unifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .pairs
            .iter()
            .map(|(a, b)| format!("{a}={b}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{body}}}")
    }
}

/// Try to identify two terms, extending `out`. Fails only when both sides
/// are distinct constants.
pub fn unify_terms(t1: &Term, t2: &Term, out: &mut Unifier) -> bool {
    if t1 == t2 {
        return true;
    }
    if t1.is_constant() && t2.is_constant() {
        return false;
    }
    out.add(t1.clone(), t2.clone());
    true
}

/// Unify two literals position by position.
///
/// Requires equal predicate, arity, and polarity (both classical negation
/// and negation-as-failure). Returns `None` when some argument pair is two
/// distinct constants.
pub fn unify_literals(a: &Literal, b: &Literal) -> Option<Unifier> {
    if a.predicate != b.predicate
        || a.terms.len() != b.terms.len()
        || a.negated != b.negated
        || a.naf != b.naf
    {
        return None;
    }
    let mut out = Unifier::new();
    for (t1, t2) in a.terms.iter().zip(&b.terms) {
        if !unify_terms(t1, t2, &mut out) {
            return None;
        }
    }
    Some(out)
}

/// Unification honoring a `symmetric` predicate property: when the straight
/// pairing of a binary literal fails, the swapped pairing is tried.
pub fn unify_literals_with_symmetry(a: &Literal, b: &Literal, symmetric: bool) -> Option<Unifier> {
    if let Some(u) = unify_literals(a, b) {
        return Some(u);
    }
    if !symmetric || a.terms.len() != 2 || b.terms.len() != 2 {
        return None;
    }
    if a.predicate != b.predicate || a.negated != b.negated || a.naf != b.naf {
        return None;
    }
    let mut out = Unifier::new();
    if unify_terms(&a.terms[0], &b.terms[1], &mut out)
        && unify_terms(&a.terms[1], &b.terms[0], &mut out)
    {
        Some(out)
    } else {
        None
    }
}
