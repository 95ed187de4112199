//! # Input Grammar Parser
//!
//! Hand-written character-stream parser for the rule-definition language:
//!
//! ```text
//! problem NAME { observe { CONJ }  [require { CONJ }]  [choice { CONJ }]* }
//! rule    NAME { CONJ => CONJ }
//! property PREDICATE { PROP (',' PROP)* }
//! ```
//!
//! `#` starts a line comment; whitespace is insignificant outside quoted
//! strings. Every error carries the row and column where scanning stopped.
//! After an error the parser can resynchronize at the next top-level
//! keyword, so one bad block does not take down the rest of the file.

use crate::ast::{
    Conjunction, Literal, PredicateProperty, Problem, PropertyDecl, Rule, Statement, Term,
};
use thiserror::Error;

/// A parse failure with its stream position.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("parse error at {row}:{col}: {message}")]
pub struct ParseError {
    pub row: usize,
    pub col: usize,
    pub message: String,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Characters that terminate a general token.
fn is_general(c: char) -> bool {
    !c.is_whitespace() && !"(){}[]<>\"'#^!|=,".contains(c)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ============================================================================
// Scanner
// ============================================================================

/// Character scanner with row/column bookkeeping.
struct Scanner {
    chars: Vec<char>,
    pos: usize,
    row: usize,
    col: usize,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Scanner {
            chars: source.chars().collect(),
            pos: 0,
            row: 1,
            col: 1,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.row += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            row: self.row,
            col: self.col,
            message: message.into(),
        }
    }

    /// Skip whitespace and `#` line comments.
    fn skip(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    /// Consume `c` if it is next; report whether it was.
    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> ParseResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn expect_str(&mut self, s: &str) -> ParseResult<()> {
        for c in s.chars() {
            if !self.eat(c) {
                return Err(self.error(format!("expected \"{s}\"")));
            }
        }
        Ok(())
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if pred(c) {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        out
    }

    fn read_keyword(&mut self) -> String {
        self.read_while(|c| c.is_alphabetic())
    }

    fn read_general(&mut self) -> String {
        self.read_while(is_general)
    }

    /// A quoted token: `'...'` or `"..."`, no escapes.
    fn read_quoted(&mut self) -> ParseResult<Option<String>> {
        let quote = match self.peek() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Ok(None),
        };
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(Some(out)),
                Some('\n') | None => return Err(self.error("unterminated quoted string")),
                Some(c) => out.push(c),
            }
        }
    }

    /// An argument token: identifier or quoted string.
    fn read_argument(&mut self) -> ParseResult<Option<String>> {
        if let Some(q) = self.read_quoted()? {
            return Ok(Some(q));
        }
        match self.peek() {
            Some(c) if is_ident_start(c) => {
                let mut out = String::new();
                out.push(c);
                self.bump();
                out.push_str(&self.read_while(is_ident_continue));
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }

    /// `[':' PARAM]` where PARAM is a general token or quoted string.
    fn read_parameter(&mut self) -> ParseResult<String> {
        if !self.eat(':') {
            return Ok(String::new());
        }
        self.skip();
        if let Some(q) = self.read_quoted()? {
            return Ok(q);
        }
        let tok = self.read_general();
        if tok.is_empty() {
            return Err(self.error("expected a parameter after ':'"));
        }
        Ok(tok)
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Streaming parser over one input file.
pub struct Parser {
    scanner: Scanner,
}

impl Parser {
    pub fn new(source: &str) -> Self {
        Parser {
            scanner: Scanner::new(source),
        }
    }

    /// Read the next top-level statement; `None` at end of input.
    pub fn next_statement(&mut self) -> Option<ParseResult<Statement>> {
        self.scanner.skip();
        if self.scanner.eof() {
            return None;
        }
        Some(self.read_statement())
    }

    /// Skip forward to the next plausible top-level keyword after an error.
    pub fn resynchronize(&mut self) {
        let mut depth: i32 = 0;
        loop {
            self.scanner.skip();
            if self.scanner.eof() {
                return;
            }
            match self.scanner.peek() {
                Some('{') => {
                    depth += 1;
                    self.scanner.bump();
                }
                Some('}') => {
                    depth -= 1;
                    self.scanner.bump();
                }
                Some(c) if c.is_alphabetic() && depth <= 0 => {
                    let save = (self.scanner.pos, self.scanner.row, self.scanner.col);
                    let word = self.scanner.read_keyword();
                    if matches!(word.as_str(), "problem" | "rule" | "property") {
                        (self.scanner.pos, self.scanner.row, self.scanner.col) = save;
                        return;
                    }
                }
                _ => {
                    self.scanner.bump();
                }
            }
        }
    }

    fn read_statement(&mut self) -> ParseResult<Statement> {
        let key = self.scanner.read_keyword().to_lowercase();
        self.scanner.skip();
        match key.as_str() {
            "problem" => Ok(Statement::Problem(self.read_problem()?)),
            "rule" => Ok(Statement::Rule(self.read_rule()?)),
            "property" => Ok(Statement::Property(self.read_property()?)),
            other => Err(self
                .scanner
                .error(format!("unknown keyword \"{other}\" was found"))),
        }
    }

    /// Read one atom; rolls the stream back and returns `None` on failure.
    fn read_atom(&mut self) -> ParseResult<Option<Literal>> {
        let save = (self.scanner.pos, self.scanner.row, self.scanner.col);
        match self.try_read_atom() {
            Ok(Some(lit)) => Ok(Some(lit)),
            Ok(None) => {
                (self.scanner.pos, self.scanner.row, self.scanner.col) = save;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn try_read_atom(&mut self) -> ParseResult<Option<Literal>> {
        self.scanner.skip();

        // Negation as failure: `not ` followed by an atom.
        let mut naf = false;
        {
            let save = (self.scanner.pos, self.scanner.row, self.scanner.col);
            let word = self.scanner.read_keyword();
            if word == "not" && self.scanner.peek().is_some_and(char::is_whitespace) {
                naf = true;
                self.scanner.skip();
            } else {
                (self.scanner.pos, self.scanner.row, self.scanner.col) = save;
            }
        }

        // Equality atom: ( ARG [!]= ARG )
        if self.scanner.eat('(') {
            self.scanner.skip();
            let Some(t1) = self.scanner.read_argument()? else {
                return Ok(None);
            };
            self.scanner.skip();
            let negated = self.scanner.eat('!');
            if !self.scanner.eat('=') {
                return Ok(None);
            }
            self.scanner.skip();
            let Some(t2) = self.scanner.read_argument()? else {
                return Ok(None);
            };
            self.scanner.skip();
            if !self.scanner.eat(')') {
                return Ok(None);
            }
            let mut lit = Literal::equality(Term::new(t1), Term::new(t2), negated);
            lit.naf = naf;
            return Ok(Some(lit));
        }

        // Basic atom: [!] PRED ( ARG, ... ) [: PARAM]
        let negated = self.scanner.eat('!');
        self.scanner.skip();
        let pred = self.scanner.read_general();
        if pred.is_empty() {
            return Ok(None);
        }
        self.scanner.skip();
        if !self.scanner.eat('(') {
            return Ok(None);
        }
        self.scanner.skip();

        let mut terms = Vec::new();
        loop {
            let Some(arg) = self.scanner.read_argument()? else {
                return Ok(None);
            };
            terms.push(Term::new(arg));
            self.scanner.skip();
            if self.scanner.eat(')') {
                break;
            }
            if !self.scanner.eat(',') {
                return Ok(None);
            }
            self.scanner.skip();
        }

        let param = self.scanner.read_parameter()?;
        let mut lit = Literal::new(pred, terms);
        lit.negated = negated;
        lit.naf = naf;
        lit.param = param;
        Ok(Some(lit))
    }

    /// Read a conjunction of atoms joined by `delim`, optionally enclosed in
    /// braces (mandatory when `must_be_enclosed`); an enclosed conjunction
    /// may carry a trailing `:PARAM`.
    fn read_conjunction(&mut self, delim: char, must_be_enclosed: bool) -> ParseResult<Conjunction> {
        self.scanner.skip();
        let enclosed = self.scanner.eat('{');
        if must_be_enclosed && !enclosed {
            return Err(self.scanner.error("expected '{'"));
        }
        self.scanner.skip();

        let mut out = Conjunction::default();
        while let Some(atom) = self.read_atom()? {
            out.literals.push(atom);
            self.scanner.skip();
            if self.scanner.peek() == Some(delim) {
                self.scanner.bump();
                self.scanner.skip();
            } else {
                break;
            }
        }

        if enclosed {
            self.scanner.expect('}')?;
            self.scanner.skip();
            out.param = self.scanner.read_parameter()?;
        }
        Ok(out)
    }

    fn read_problem(&mut self) -> ParseResult<Problem> {
        let name = self.scanner.read_general();
        if name.is_empty() {
            return Err(self.scanner.error("expected a problem name"));
        }
        self.scanner.skip();
        self.scanner.expect('{')?;
        self.scanner.skip();

        let mut observe: Option<Conjunction> = None;
        let mut require: Option<Conjunction> = None;
        let mut choices: Vec<Conjunction> = Vec::new();

        while !self.scanner.eat('}') {
            if self.scanner.eof() {
                return Err(self.scanner.error("expected '}'"));
            }
            let key = self.scanner.read_keyword();
            match key.as_str() {
                "observe" if observe.is_some() => {
                    return Err(self.scanner.error("multiple observation"));
                }
                "require" if require.is_some() => {
                    return Err(self.scanner.error("multiple requirement"));
                }
                "observe" | "require" | "choice" => {}
                other => {
                    return Err(self
                        .scanner
                        .error(format!("unknown keyword \"{other}\" was found")));
                }
            }
            self.scanner.skip();
            let atoms = self.read_conjunction('^', true)?;
            match key.as_str() {
                "observe" => observe = Some(atoms),
                "require" => require = Some(atoms),
                _ => choices.push(atoms),
            }
            self.scanner.skip();
        }

        let observe = observe.filter(|o| !o.is_empty());
        let Some(observe) = observe else {
            return Err(self.scanner.error("empty observation"));
        };

        Ok(Problem {
            name,
            observe,
            require: require.unwrap_or_default(),
            choices,
        })
    }

    fn read_rule(&mut self) -> ParseResult<Rule> {
        let name = self.scanner.read_general();
        if name.is_empty() {
            return Err(self.scanner.error("expected a rule name"));
        }
        self.scanner.skip();
        self.scanner.expect('{')?;

        let lhs = self.read_conjunction('^', false)?;
        self.scanner.skip();
        self.scanner.expect_str("=>")?;

        let rhs = self.read_conjunction('^', false)?;
        self.scanner.skip();
        self.scanner.expect('}')?;

        if lhs.is_empty() {
            return Err(self.scanner.error("empty conjunction on left-hand-side"));
        }
        if rhs.is_empty() {
            return Err(self.scanner.error("empty conjunction on right-hand-side"));
        }
        Ok(Rule { name, lhs, rhs })
    }

    fn read_property(&mut self) -> ParseResult<PropertyDecl> {
        let predicate = self.scanner.read_general();
        if predicate.is_empty() {
            return Err(self.scanner.error("expected a predicate name"));
        }
        self.scanner.skip();
        self.scanner.expect('{')?;
        self.scanner.skip();

        let mut properties = Vec::new();
        loop {
            let word = self
                .scanner
                .read_while(|c| c.is_alphanumeric() || c == '-');
            let Some(prop) = PredicateProperty::from_keyword(&word) else {
                return Err(self
                    .scanner
                    .error(format!("unknown keyword \"{word}\" was found")));
            };
            properties.push(prop);
            self.scanner.skip();
            if self.scanner.eat('}') {
                break;
            }
            self.scanner.expect(',')?;
            self.scanner.skip();
        }

        Ok(PropertyDecl {
            predicate,
            properties,
        })
    }
}

/// Parse a whole source string, failing on the first error.
pub fn parse_statements(source: &str) -> ParseResult<Vec<Statement>> {
    let mut parser = Parser::new(source);
    let mut out = Vec::new();
    while let Some(stmt) = parser.next_statement() {
        out.push(stmt?);
    }
    Ok(out)
}

/// Parse a whole source string, collecting errors and resynchronizing at the
/// next top-level block after each one.
pub fn parse_statements_lenient(source: &str) -> (Vec<Statement>, Vec<ParseError>) {
    let mut parser = Parser::new(source);
    let mut out = Vec::new();
    let mut errors = Vec::new();
    while let Some(stmt) = parser.next_statement() {
        match stmt {
            Ok(s) => out.push(s),
            Err(e) => {
                errors.push(e);
                parser.resynchronize();
            }
        }
    }
    (out, errors)
}
