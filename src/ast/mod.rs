//! # Abstract Syntax Tree
//!
//! Value types for first-order terms, literals, conjunctions, rules,
//! problems and predicate properties. Everything compares by value and
//! round-trips through `Display` and the parser.
//!
//! ## Lexical conventions
//!
//! - Variables start with a lowercase letter or `_` (`x`, `_u3`).
//! - Constants start with an uppercase letter, or are quoted (`John`,
//!   `"New York"`).
//! - An equality literal has predicate `=` and exactly two arguments and is
//!   written `(x = y)`; its negation is written `(x != y)`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Terms
// ============================================================================

/// A first-order term: a variable or a constant, carrying its symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term(String);

impl Term {
    pub fn new(symbol: impl Into<String>) -> Self {
        Term(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Variables start with a lowercase letter or an underscore.
    pub fn is_variable(&self) -> bool {
        self.0
            .chars()
            .next()
            .is_some_and(|c| c.is_lowercase() || c == '_')
    }

    pub fn is_constant(&self) -> bool {
        !self.is_variable()
    }

    /// Fresh variables minted while instantiating an axiom side.
    pub fn is_fresh(&self) -> bool {
        self.0.starts_with("_u")
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_identifier(&self.0) {
            write!(f, "{}", self.0)
        } else {
            write!(f, "\"{}\"", self.0)
        }
    }
}

/// True when `s` can be written without quotes.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

// ============================================================================
// Literals
// ============================================================================

/// The predicate symbol reserved for equality literals.
pub const EQ_PREDICATE: &str = "=";

/// A literal (atom): predicate, arguments, classical negation, negation as
/// failure, and a free-form parameter string (used to carry per-literal
/// costs and weights, e.g. `apple(x):20`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub predicate: String,
    pub terms: Vec<Term>,
    pub negated: bool,
    pub naf: bool,
    pub param: String,
}

impl Literal {
    pub fn new(predicate: impl Into<String>, terms: Vec<Term>) -> Self {
        Literal {
            predicate: predicate.into(),
            terms,
            negated: false,
            naf: false,
            param: String::new(),
        }
    }

    pub fn negated(mut self) -> Self {
        self.negated = true;
        self
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }

    /// An equality assumption `(t1 = t2)`, or `(t1 != t2)` when `negated`.
    pub fn equality(t1: Term, t2: Term, negated: bool) -> Self {
        Literal {
            predicate: EQ_PREDICATE.to_string(),
            terms: vec![t1, t2],
            negated,
            naf: false,
            param: String::new(),
        }
    }

    pub fn is_equality(&self) -> bool {
        self.predicate == EQ_PREDICATE && !self.negated
    }

    pub fn is_inequality(&self) -> bool {
        self.predicate == EQ_PREDICATE && self.negated
    }

    /// The `predicate/arity` name this literal is indexed under.
    pub fn arity_string(&self) -> String {
        format!("{}/{}", self.predicate, self.terms.len())
    }

    /// First numeric token of the parameter string, if any.
    ///
    /// Parameters are `:`-separated; `apple(x):20` and `q(y):w:1.5` both
    /// yield a value.
    pub fn param_f64(&self) -> Option<f64> {
        self.param.split(':').find_map(|tok| tok.trim().parse().ok())
    }

    pub fn variables(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter().filter(|t| t.is_variable())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.naf {
            write!(f, "not ")?;
        }
        if self.predicate == EQ_PREDICATE {
            let op = if self.negated { "!=" } else { "=" };
            return write!(f, "({} {} {})", self.terms[0], op, self.terms[1]);
        }
        if self.negated {
            write!(f, "!")?;
        }
        write!(f, "{}(", self.predicate)?;
        for (i, t) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, ")")?;
        if !self.param.is_empty() {
            write!(f, ":{}", param_token(&self.param))?;
        }
        Ok(())
    }
}

/// Quote a parameter when it would not survive re-lexing as one token.
fn param_token(p: &str) -> String {
    let plain = !p.is_empty()
        && p.chars()
            .all(|c| !c.is_whitespace() && !"(){}[]<>\"'#^!|=,".contains(c));
    if plain {
        p.to_string()
    } else {
        format!("\"{p}\"")
    }
}

// ============================================================================
// Conjunctions
// ============================================================================

/// An ordered conjunction of literals with an optional side-wide parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conjunction {
    pub literals: Vec<Literal>,
    pub param: String,
}

impl Conjunction {
    pub fn new(literals: Vec<Literal>) -> Self {
        Conjunction {
            literals,
            param: String::new(),
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Literal> {
        self.literals.iter()
    }

    /// Side-wide numeric parameter, if any.
    pub fn param_f64(&self) -> Option<f64> {
        self.param.split(':').find_map(|tok| tok.trim().parse().ok())
    }

    /// The literals that take part in chaining (equalities do not).
    pub fn chainable(&self) -> impl Iterator<Item = &Literal> {
        self.literals
            .iter()
            .filter(|l| l.predicate != EQ_PREDICATE)
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .literals
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ^ ");
        if self.param.is_empty() {
            write!(f, "{body}")
        } else {
            write!(f, "{{{body}}}:{}", param_token(&self.param))
        }
    }
}

// ============================================================================
// Rules, problems, properties
// ============================================================================

/// A named implication `lhs => rhs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub lhs: Conjunction,
    pub rhs: Conjunction,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {} {{ {} => {} }}", self.name, self.lhs, self.rhs)
    }
}

/// One inference problem: observed literals plus optional requirement and
/// choice groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub name: String,
    pub observe: Conjunction,
    pub require: Conjunction,
    pub choices: Vec<Conjunction>,
}

/// `tag { atoms }[:param]`: the block's braces double as the enclosed
/// conjunction's, so a side-wide parameter lands after the closing brace.
fn write_block(f: &mut fmt::Formatter<'_>, tag: &str, conj: &Conjunction) -> fmt::Result {
    let body = conj
        .literals
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ^ ");
    write!(f, "{tag} {{ {body} }}")?;
    if !conj.param.is_empty() {
        write!(f, ":{}", param_token(&conj.param))?;
    }
    Ok(())
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "problem {} {{ ", self.name)?;
        write_block(f, "observe", &self.observe)?;
        if !self.require.is_empty() {
            write!(f, " ")?;
            write_block(f, "require", &self.require)?;
        }
        for ch in &self.choices {
            write!(f, " ")?;
            write_block(f, "choice", ch)?;
        }
        write!(f, " }}")
    }
}

/// A predicate property restricting which hypotheses may coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PredicateProperty {
    Irreflexive,
    Symmetric,
    Asymmetric,
    Transitive,
    RightUnique,
}

impl PredicateProperty {
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "irreflexive" => Some(PredicateProperty::Irreflexive),
            "symmetric" => Some(PredicateProperty::Symmetric),
            "asymmetric" => Some(PredicateProperty::Asymmetric),
            "transitive" => Some(PredicateProperty::Transitive),
            "right-unique" => Some(PredicateProperty::RightUnique),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            PredicateProperty::Irreflexive => "irreflexive",
            PredicateProperty::Symmetric => "symmetric",
            PredicateProperty::Asymmetric => "asymmetric",
            PredicateProperty::Transitive => "transitive",
            PredicateProperty::RightUnique => "right-unique",
        }
    }
}

/// A `property PRED { ... }` declaration; the predicate is named by its
/// `name/arity` string, e.g. `parent/2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub predicate: String,
    pub properties: Vec<PredicateProperty>,
}

impl fmt::Display for PropertyDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props = self
            .properties
            .iter()
            .map(|p| p.keyword())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "property {} {{ {} }}", self.predicate, props)
    }
}

/// A top-level block of an input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    Problem(Problem),
    Rule(Rule),
    Property(PropertyDecl),
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Problem(p) => write!(f, "{p}"),
            Statement::Rule(r) => write!(f, "{r}"),
            Statement::Property(p) => write!(f, "{p}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_classification() {
        assert!(Term::new("x").is_variable());
        assert!(Term::new("_u12").is_variable());
        assert!(Term::new("John").is_constant());
        assert!(Term::new("_u3").is_fresh());
        assert!(!Term::new("x").is_fresh());
    }

    #[test]
    fn term_display_quotes_non_identifiers() {
        assert_eq!(Term::new("John").to_string(), "John");
        assert_eq!(Term::new("New York").to_string(), "\"New York\"");
    }

    #[test]
    fn literal_display() {
        let lit = Literal::new("eat", vec![Term::new("e"), Term::new("x")]);
        assert_eq!(lit.to_string(), "eat(e, x)");
        assert_eq!(lit.clone().negated().to_string(), "!eat(e, x)");

        let eq = Literal::equality(Term::new("x"), Term::new("y"), false);
        assert_eq!(eq.to_string(), "(x = y)");
        let neq = Literal::equality(Term::new("x"), Term::new("y"), true);
        assert_eq!(neq.to_string(), "(x != y)");
    }

    #[test]
    fn literal_param_parsing() {
        let lit = Literal::new("apple", vec![Term::new("x")]).with_param("20");
        assert_eq!(lit.param_f64(), Some(20.0));

        let lit = Literal::new("q", vec![Term::new("y")]).with_param("w:1.5");
        assert_eq!(lit.param_f64(), Some(1.5));

        let lit = Literal::new("q", vec![Term::new("y")]);
        assert_eq!(lit.param_f64(), None);
    }

    #[test]
    fn arity_string_includes_argument_count() {
        let lit = Literal::new("eat", vec![Term::new("e"), Term::new("x"), Term::new("y")]);
        assert_eq!(lit.arity_string(), "eat/3");
        let eq = Literal::equality(Term::new("x"), Term::new("y"), false);
        assert_eq!(eq.arity_string(), "=/2");
    }

    #[test]
    fn conjunction_display_with_param() {
        let conj = Conjunction::new(vec![
            Literal::new("man", vec![Term::new("x")]),
            Literal::new("mortal", vec![Term::new("x")]),
        ])
        .with_param("1.4");
        assert_eq!(conj.to_string(), "{man(x) ^ mortal(x)}:1.4");
    }

    #[test]
    fn chainable_skips_equalities() {
        let conj = Conjunction::new(vec![
            Literal::new("p", vec![Term::new("x")]),
            Literal::equality(Term::new("x"), Term::new("y"), false),
            Literal::new("q", vec![Term::new("y")]),
        ]);
        let names: Vec<_> = conj.chainable().map(|l| l.predicate.clone()).collect();
        assert_eq!(names, vec!["p", "q"]);
    }
}
