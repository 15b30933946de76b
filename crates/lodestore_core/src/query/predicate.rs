//! Filter predicate parser and evaluator.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or       := and (("OR" | "||") and)*
//! and      := unary (("AND" | "&&") unary)*
//! unary    := ("NOT" | "!") unary | primary
//! primary  := "(" or ")" | operand comparison
//! comparison := cmp_op operand
//!             | ("CONTAINS" | "BEGINSWITH" | "ENDSWITH") operand
//!             | "MATCHES" string
//!             | "IN" "{" literal ("," literal)* "}"
//! operand  := key.path | number | 'string' | "string" | TRUE | FALSE | NIL | NULL
//! ```
//!
//! Keywords are case-insensitive. Missing fields evaluate as null.
//! `MATCHES` patterns must match the whole string.

use crate::query::QueryError;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

static NULL: Value = Value::Null;

/// Deepest `(` / `NOT` nesting a filter may use.
const MAX_DEPTH: usize = 64;

const RESERVED: &[&str] = &[
    "AND",
    "OR",
    "NOT",
    "CONTAINS",
    "BEGINSWITH",
    "ENDSWITH",
    "MATCHES",
    "IN",
];

/// Comparison operators between two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    BeginsWith,
    EndsWith,
}

/// Left or right side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    KeyPath(String),
    Literal(Value),
}

impl Operand {
    fn resolve<'a>(&'a self, object: &'a Value) -> &'a Value {
        match self {
            Self::KeyPath(path) => lookup_path(object, path),
            Self::Literal(value) => value,
        }
    }
}

/// Compiled filter expression.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare {
        lhs: Operand,
        op: CompareOp,
        rhs: Operand,
    },
    Matches {
        lhs: Operand,
        pattern: Regex,
    },
    In {
        lhs: Operand,
        values: Vec<Value>,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Parses a filter string.
    pub fn parse(filter: &str) -> Result<Self, QueryError> {
        let tokens = tokenize(filter)?;
        let mut parser = Parser {
            filter,
            tokens,
            pos: 0,
            depth: 0,
        };
        let predicate = parser.parse_or()?;
        if let Some((offset, token)) = parser.tokens.get(parser.pos) {
            return Err(syntax(
                filter,
                *offset,
                format!("unexpected trailing {}", token.describe()),
            ));
        }
        Ok(predicate)
    }

    /// Returns whether `object` satisfies this predicate.
    pub fn evaluate(&self, object: &Value) -> bool {
        match self {
            Self::Compare { lhs, op, rhs } => {
                compare(lhs.resolve(object), *op, rhs.resolve(object))
            }
            Self::Matches { lhs, pattern } => match lhs.resolve(object) {
                Value::String(text) => pattern.is_match(text),
                _ => false,
            },
            Self::In { lhs, values } => {
                let value = lhs.resolve(object);
                values.iter().any(|candidate| values_equal(value, candidate))
            }
            Self::And(left, right) => left.evaluate(object) && right.evaluate(object),
            Self::Or(left, right) => left.evaluate(object) || right.evaluate(object),
            Self::Not(inner) => !inner.evaluate(object),
        }
    }
}

/// Resolves a dotted key path; missing segments read as null.
pub fn lookup_path<'a>(object: &'a Value, path: &str) -> &'a Value {
    path.split('.')
        .try_fold(object, |value, key| value.get(key))
        .unwrap_or(&NULL)
}

/// Orders two scalar values of the same kind; `None` when incomparable.
pub fn compare_scalars(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match compare_scalars(left, right) {
        Some(ordering) => ordering == Ordering::Equal,
        None => left == right,
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            if left.is_null() || right.is_null() {
                return false;
            }
            match compare_scalars(left, right) {
                Some(ordering) => match op {
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Le => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                },
                None => false,
            }
        }
        CompareOp::Contains => match (left, right) {
            (Value::String(text), Value::String(needle)) => text.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            _ => false,
        },
        CompareOp::BeginsWith => match (left, right) {
            (Value::String(text), Value::String(prefix)) => text.starts_with(prefix.as_str()),
            _ => false,
        },
        CompareOp::EndsWith => match (left, right) {
            (Value::String(text), Value::String(suffix)) => text.ends_with(suffix.as_str()),
            _ => false,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Value),
    Str(String),
    Symbol(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("`{name}`"),
            Self::Number(value) => format!("number {value}"),
            Self::Str(text) => format!("string '{text}'"),
            Self::Symbol(symbol) => format!("`{symbol}`"),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Ident(name) if name.eq_ignore_ascii_case(keyword))
    }
}

const SYMBOLS: &[&str] = &[
    "==", "!=", "<>", "<=", ">=", "&&", "||", "=", "<", ">", "!", "(", ")", "{", "}", ",",
];

fn tokenize(filter: &str) -> Result<Vec<(usize, Token)>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = filter.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch == '\'' || ch == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, next)) = chars.next() {
                match next {
                    '\\' => match chars.next() {
                        Some((_, escaped)) => text.push(escaped),
                        None => break,
                    },
                    quote if quote == ch => {
                        closed = true;
                        break;
                    }
                    other => text.push(other),
                }
            }
            if !closed {
                return Err(syntax(filter, offset, "unterminated string literal"));
            }
            tokens.push((offset, Token::Str(text)));
            continue;
        }

        let starts_number = ch.is_ascii_digit()
            || (ch == '-'
                && filter[offset + 1..]
                    .chars()
                    .next()
                    .is_some_and(|next| next.is_ascii_digit()));
        if starts_number {
            let mut end = offset + ch.len_utf8();
            chars.next();
            while let Some(&(index, next)) = chars.peek() {
                if next.is_ascii_digit() || matches!(next, '.' | 'e' | 'E' | '+') {
                    end = index + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let literal = &filter[offset..end];
            tokens.push((offset, Token::Number(parse_number(filter, offset, literal)?)));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let mut end = offset;
            while let Some(&(index, next)) = chars.peek() {
                if next.is_alphanumeric() || next == '_' || next == '.' {
                    end = index + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((offset, Token::Ident(filter[offset..end].to_string())));
            continue;
        }

        let rest = &filter[offset..];
        match SYMBOLS.iter().copied().find(|symbol| rest.starts_with(symbol)) {
            Some(symbol) => {
                for _ in 0..symbol.len() {
                    chars.next();
                }
                tokens.push((offset, Token::Symbol(symbol)));
            }
            None => {
                return Err(syntax(filter, offset, format!("unexpected character `{ch}`")));
            }
        }
    }

    Ok(tokens)
}

fn parse_number(filter: &str, offset: usize, literal: &str) -> Result<Value, QueryError> {
    if let Ok(integer) = literal.parse::<i64>() {
        return Ok(Value::from(integer));
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| syntax(filter, offset, format!("invalid number `{literal}`")))
}

fn syntax(filter: &str, offset: usize, message: impl Into<String>) -> QueryError {
    QueryError::Syntax {
        filter: filter.to_string(),
        offset,
        message: message.into(),
    }
}

struct Parser<'a> {
    filter: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.filter.len(), |(offset, _)| *offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(found)) if *found == symbol) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|token| token.is_keyword(keyword)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), QueryError> {
        if self.eat_symbol(symbol) {
            return Ok(());
        }
        Err(self.unexpected(&format!("expected `{symbol}`")))
    }

    fn unexpected(&self, expectation: &str) -> QueryError {
        let found = self
            .peek()
            .map_or_else(|| "end of filter".to_string(), Token::describe);
        syntax(self.filter, self.offset(), format!("{expectation}, found {found}"))
    }

    fn parse_or(&mut self) -> Result<Predicate, QueryError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") || self.eat_symbol("||") {
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate, QueryError> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("AND") || self.eat_symbol("&&") {
            let right = self.parse_unary()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // Every `(` and `NOT` passes through here, so this bounds recursion.
    fn parse_unary(&mut self) -> Result<Predicate, QueryError> {
        if self.depth >= MAX_DEPTH {
            return Err(syntax(self.filter, self.offset(), "filter nests too deeply"));
        }
        self.depth += 1;
        let parsed = if self.eat_keyword("NOT") || self.eat_symbol("!") {
            self.parse_unary()
                .map(|inner| Predicate::Not(Box::new(inner)))
        } else {
            self.parse_primary()
        };
        self.depth -= 1;
        parsed
    }

    fn parse_primary(&mut self) -> Result<Predicate, QueryError> {
        if self.eat_symbol("(") {
            let inner = self.parse_or()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }

        let lhs = self.parse_operand()?;

        if self.eat_keyword("MATCHES") {
            let offset = self.offset();
            return match self.advance() {
                Some(Token::Str(pattern)) => {
                    let anchored = format!("^(?:{pattern})$");
                    let regex = Regex::new(&anchored).map_err(|err| QueryError::Pattern {
                        pattern: pattern.clone(),
                        message: err.to_string(),
                    })?;
                    Ok(Predicate::Matches {
                        lhs,
                        pattern: regex,
                    })
                }
                _ => Err(syntax(
                    self.filter,
                    offset,
                    "MATCHES expects a quoted pattern",
                )),
            };
        }

        if self.eat_keyword("IN") {
            self.expect_symbol("{")?;
            let mut values = Vec::new();
            if !self.eat_symbol("}") {
                loop {
                    match self.parse_operand()? {
                        Operand::Literal(value) => values.push(value),
                        Operand::KeyPath(path) => {
                            return Err(syntax(
                                self.filter,
                                self.offset(),
                                format!("IN list accepts literals only, found `{path}`"),
                            ));
                        }
                    }
                    if self.eat_symbol("}") {
                        break;
                    }
                    self.expect_symbol(",")?;
                }
            }
            return Ok(Predicate::In { lhs, values });
        }

        let op = self.parse_compare_op()?;
        let rhs = self.parse_operand()?;
        Ok(Predicate::Compare { lhs, op, rhs })
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp, QueryError> {
        let op = match self.peek() {
            Some(Token::Symbol("==")) | Some(Token::Symbol("=")) => CompareOp::Eq,
            Some(Token::Symbol("!=")) | Some(Token::Symbol("<>")) => CompareOp::Ne,
            Some(Token::Symbol("<")) => CompareOp::Lt,
            Some(Token::Symbol("<=")) => CompareOp::Le,
            Some(Token::Symbol(">")) => CompareOp::Gt,
            Some(Token::Symbol(">=")) => CompareOp::Ge,
            Some(token) if token.is_keyword("CONTAINS") => CompareOp::Contains,
            Some(token) if token.is_keyword("BEGINSWITH") => CompareOp::BeginsWith,
            Some(token) if token.is_keyword("ENDSWITH") => CompareOp::EndsWith,
            _ => return Err(self.unexpected("expected comparison operator")),
        };
        self.pos += 1;
        Ok(op)
    }

    fn parse_operand(&mut self) -> Result<Operand, QueryError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(value)) => Ok(Operand::Literal(value)),
            Some(Token::Str(text)) => Ok(Operand::Literal(Value::String(text))),
            Some(Token::Ident(name)) => {
                let upper = name.to_ascii_uppercase();
                match upper.as_str() {
                    "TRUE" | "YES" => Ok(Operand::Literal(Value::Bool(true))),
                    "FALSE" | "NO" => Ok(Operand::Literal(Value::Bool(false))),
                    "NIL" | "NULL" => Ok(Operand::Literal(Value::Null)),
                    keyword if RESERVED.contains(&keyword) => Err(syntax(
                        self.filter,
                        offset,
                        format!("expected operand, found keyword `{name}`"),
                    )),
                    _ if name.split('.').any(str::is_empty) => Err(syntax(
                        self.filter,
                        offset,
                        format!("invalid key path `{name}`"),
                    )),
                    _ => Ok(Operand::KeyPath(name)),
                }
            }
            Some(token) => Err(syntax(
                self.filter,
                offset,
                format!("expected operand, found {}", token.describe()),
            )),
            None => Err(syntax(self.filter, offset, "expected operand, found end of filter")),
        }
    }
}
