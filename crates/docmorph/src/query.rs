//! Structured query dialect for JSON documents.
//!
//! A jq-flavoured language evaluated as a stream of results:
//! - paths `.a.b`, `.["k"]`, `.[0]`, `.[1:3]`, iteration `.[]`, `..`, optional `?`
//! - bare identifiers read a field of the current value (`age` is `.age`)
//! - literals, `[...]` construction, `|`, `,`, `//`, `and`/`or`/`not`
//! - comparisons with jq ordering and `+ - * / %` arithmetic
//! - a small builtin library (`length`, `select(f)`, `test(re)`, ...)
//!
//! `$`-anchored paths (`$.items[*]`) are accepted and normalized first.

use std::cmp::Ordering;

use serde_json::Value as JsonValue;

use crate::value::{number_value, value_text};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string literal at offset {0}")]
    UnterminatedString(usize),
    #[error("invalid string literal at offset {offset}: {message}")]
    InvalidString { offset: usize, message: String },
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown function {name}/{arity}")]
    UnknownFunction { name: String, arity: usize },
    #[error("cannot index {kind} with {key}")]
    CannotIndex { kind: &'static str, key: String },
    #[error("cannot iterate over {0}")]
    CannotIterate(&'static str),
    #[error("{0}")]
    Type(String),
}

// =============================================================================
// AST
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Identity,
    Recurse,
    Literal(JsonValue),
    Field(Box<Query>, String),
    Index(Box<Query>, Box<Query>),
    Slice(Box<Query>, Option<Box<Query>>, Option<Box<Query>>),
    Iterate(Box<Query>),
    Optional(Box<Query>),
    Array(Option<Box<Query>>),
    Pipe(Box<Query>, Box<Query>),
    Comma(Box<Query>, Box<Query>),
    Alternative(Box<Query>, Box<Query>),
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
    Not(Box<Query>),
    Compare(CmpOp, Box<Query>, Box<Query>),
    Arith(ArithOp, Box<Query>, Box<Query>),
    Neg(Box<Query>),
    Call(String, Vec<Query>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

const ZERO_ARG_BUILTINS: &[&str] = &[
    "length",
    "keys",
    "first",
    "last",
    "tostring",
    "tonumber",
    "ascii_downcase",
    "ascii_upcase",
    "type",
    "not",
    "empty",
    "add",
    "min",
    "max",
    "reverse",
];

const ONE_ARG_BUILTINS: &[&str] = &[
    "has",
    "select",
    "map",
    "contains",
    "startswith",
    "endswith",
    "test",
    "split",
    "join",
];

// =============================================================================
// Normalization
// =============================================================================

/// Rewrite the `$`-anchored surface syntax into native form: `$` becomes `.`,
/// `$.a` becomes `.a`, `$[0]` becomes `.[0]` and `[*]` becomes `[]`.
pub fn normalize(expr: &str) -> String {
    let trimmed = expr.trim();
    let anchored = match trimmed.strip_prefix('$') {
        Some("") => ".".to_string(),
        Some(rest) if rest.starts_with('.') => rest.to_string(),
        Some(rest) if rest.starts_with('[') => format!(".{}", rest),
        _ => trimmed.to_string(),
    };
    replace_wildcards(&anchored)
}

fn replace_wildcards(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = expr;
    while let Some(ch) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
        } else if let Some(after) = rest.strip_prefix("[*]") {
            out.push_str("[]");
            rest = after;
            continue;
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    DotDot,
    Field(String),
    Ident(String),
    Str(String),
    Num(f64),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Semicolon,
    Pipe,
    Alt,
    Question,
    Cmp(CmpOp),
    Arith(ArithOp),
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn lex(src: &str) -> Result<Vec<(Token, usize)>, QueryError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let take_ident = |start: usize| -> (String, usize) {
        let mut end = start;
        while end < chars.len() && is_ident_char(chars[end].1) {
            end += 1;
        }
        (chars[start..end].iter().map(|(_, c)| *c).collect(), end)
    };

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match ch {
            c if c.is_whitespace() => {
                i += 1;
            }
            '.' => match next {
                Some('.') => {
                    tokens.push((Token::DotDot, offset));
                    i += 2;
                }
                Some(c) if is_ident_start(c) => {
                    let (name, end) = take_ident(i + 1);
                    tokens.push((Token::Field(name), offset));
                    i = end;
                }
                _ => {
                    tokens.push((Token::Dot, offset));
                    i += 1;
                }
            },
            '"' => {
                let mut end = i + 1;
                let mut escaped = false;
                while end < chars.len() {
                    let c = chars[end].1;
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    }
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(QueryError::UnterminatedString(offset));
                }
                let raw_end = chars[end].0 + 1;
                let text: String = serde_json::from_str(&src[offset..raw_end]).map_err(|err| {
                    QueryError::InvalidString {
                        offset,
                        message: err.to_string(),
                    }
                })?;
                tokens.push((Token::Str(text), offset));
                i = end + 1;
            }
            c if c.is_ascii_digit() => {
                let mut end = i;
                while end < chars.len() && chars[end].1.is_ascii_digit() {
                    end += 1;
                }
                if end + 1 < chars.len()
                    && chars[end].1 == '.'
                    && chars[end + 1].1.is_ascii_digit()
                {
                    end += 1;
                    while end < chars.len() && chars[end].1.is_ascii_digit() {
                        end += 1;
                    }
                }
                if end < chars.len() && (chars[end].1 == 'e' || chars[end].1 == 'E') {
                    let mut exp = end + 1;
                    if exp < chars.len() && (chars[exp].1 == '+' || chars[exp].1 == '-') {
                        exp += 1;
                    }
                    if exp < chars.len() && chars[exp].1.is_ascii_digit() {
                        end = exp;
                        while end < chars.len() && chars[end].1.is_ascii_digit() {
                            end += 1;
                        }
                    }
                }
                let text: String = chars[i..end].iter().map(|(_, c)| *c).collect();
                let value = text.parse::<f64>().map_err(|_| QueryError::Syntax {
                    offset,
                    message: format!("invalid number '{}'", text),
                })?;
                tokens.push((Token::Num(value), offset));
                i = end;
            }
            c if is_ident_start(c) => {
                let (name, end) = take_ident(i);
                tokens.push((Token::Ident(name), offset));
                i = end;
            }
            _ => {
                let (token, width) = match (ch, next) {
                    ('=', Some('=')) => (Token::Cmp(CmpOp::Eq), 2),
                    ('!', Some('=')) => (Token::Cmp(CmpOp::Ne), 2),
                    ('<', Some('=')) => (Token::Cmp(CmpOp::Le), 2),
                    ('>', Some('=')) => (Token::Cmp(CmpOp::Ge), 2),
                    ('/', Some('/')) => (Token::Alt, 2),
                    ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
                    ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
                    ('[', _) => (Token::LBracket, 1),
                    (']', _) => (Token::RBracket, 1),
                    ('(', _) => (Token::LParen, 1),
                    (')', _) => (Token::RParen, 1),
                    (',', _) => (Token::Comma, 1),
                    (':', _) => (Token::Colon, 1),
                    (';', _) => (Token::Semicolon, 1),
                    ('|', _) => (Token::Pipe, 1),
                    ('?', _) => (Token::Question, 1),
                    ('+', _) => (Token::Arith(ArithOp::Add), 1),
                    ('-', _) => (Token::Arith(ArithOp::Sub), 1),
                    ('*', _) => (Token::Arith(ArithOp::Mul), 1),
                    ('/', _) => (Token::Arith(ArithOp::Div), 1),
                    ('%', _) => (Token::Arith(ArithOp::Mod), 1),
                    _ => return Err(QueryError::UnexpectedChar { ch, offset }),
                };
                tokens.push((token, offset));
                i += width;
            }
        }
    }
    Ok(tokens)
}

// =============================================================================
// Parser
// =============================================================================

/// Parse a query after applying [`normalize`].
pub fn parse_query(src: &str) -> Result<Query, QueryError> {
    let normalized = normalize(src);
    let tokens = lex(&normalized)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: normalized.len(),
    };
    if parser.tokens.is_empty() {
        return Err(QueryError::Syntax {
            offset: 0,
            message: "empty expression".to_string(),
        });
    }
    let query = parser.parse_pipe()?;
    if let Some((token, offset)) = parser.tokens.get(parser.pos) {
        return Err(QueryError::Syntax {
            offset: *offset,
            message: format!("unexpected token {:?}", token),
        });
    }
    Ok(query)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(self.len)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), QueryError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", expected)))
        }
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == word)
    }

    fn parse_pipe(&mut self) -> Result<Query, QueryError> {
        let mut left = self.parse_comma()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_comma()?;
            left = Query::Pipe(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comma(&mut self) -> Result<Query, QueryError> {
        let mut left = self.parse_alternative()?;
        while self.eat(&Token::Comma) {
            let right = self.parse_alternative()?;
            left = Query::Comma(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_alternative(&mut self) -> Result<Query, QueryError> {
        let left = self.parse_or()?;
        if self.eat(&Token::Alt) {
            // right-associative
            let right = self.parse_alternative()?;
            return Ok(Query::Alternative(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Query, QueryError> {
        let mut left = self.parse_and()?;
        while self.is_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Query::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Query, QueryError> {
        let mut left = self.parse_comparison()?;
        while self.is_keyword("and") {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Query::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Query, QueryError> {
        let left = self.parse_additive()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_additive()?;
            return Ok(Query::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Query, QueryError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(Token::Arith(op @ (ArithOp::Add | ArithOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Query::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Query, QueryError> {
        let mut left = self.parse_unary()?;
        while let Some(Token::Arith(op @ (ArithOp::Mul | ArithOp::Div | ArithOp::Mod))) =
            self.peek().cloned()
        {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Query::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Query, QueryError> {
        if self.eat(&Token::Arith(ArithOp::Sub)) {
            let operand = self.parse_unary()?;
            return Ok(Query::Neg(Box::new(operand)));
        }
        if self.is_keyword("not") && self.peek_at(1) != Some(&Token::LParen) {
            self.pos += 1;
            if self.starts_operand() {
                let operand = self.parse_unary()?;
                return Ok(Query::Not(Box::new(operand)));
            }
            return Ok(Query::Not(Box::new(Query::Identity)));
        }
        self.parse_postfix()
    }

    fn starts_operand(&self) -> bool {
        match self.peek() {
            Some(Token::Ident(name)) => name != "and" && name != "or",
            Some(
                Token::Dot
                | Token::DotDot
                | Token::Field(_)
                | Token::Str(_)
                | Token::Num(_)
                | Token::LParen
                | Token::LBracket
                | Token::Arith(ArithOp::Sub),
            ) => true,
            _ => false,
        }
    }

    fn parse_postfix(&mut self) -> Result<Query, QueryError> {
        let mut query = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Field(_)) => {
                    if let Some(Token::Field(name)) = self.advance() {
                        query = Query::Field(Box::new(query), name);
                    }
                }
                Some(Token::Dot) if matches!(self.peek_at(1), Some(Token::LBracket)) => {
                    self.pos += 1;
                }
                Some(Token::Dot) if matches!(self.peek_at(1), Some(Token::Str(_))) => {
                    self.pos += 1;
                    if let Some(Token::Str(name)) = self.advance() {
                        query = Query::Field(Box::new(query), name);
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    query = self.parse_bracket_suffix(query)?;
                }
                Some(Token::Question) => {
                    self.pos += 1;
                    query = Query::Optional(Box::new(query));
                }
                _ => return Ok(query),
            }
        }
    }

    fn parse_bracket_suffix(&mut self, target: Query) -> Result<Query, QueryError> {
        if self.eat(&Token::RBracket) {
            return Ok(Query::Iterate(Box::new(target)));
        }
        if self.eat(&Token::Colon) {
            let to = self.parse_pipe()?;
            self.expect(Token::RBracket)?;
            return Ok(Query::Slice(Box::new(target), None, Some(Box::new(to))));
        }
        let index = self.parse_pipe()?;
        if self.eat(&Token::Colon) {
            let to = if self.peek() == Some(&Token::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_pipe()?))
            };
            self.expect(Token::RBracket)?;
            return Ok(Query::Slice(Box::new(target), Some(Box::new(index)), to));
        }
        self.expect(Token::RBracket)?;
        Ok(Query::Index(Box::new(target), Box::new(index)))
    }

    fn parse_primary(&mut self) -> Result<Query, QueryError> {
        let offset = self.offset();
        let token = self
            .advance()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        match token {
            Token::Dot => {
                if let Some(Token::Str(_)) = self.peek() {
                    if let Some(Token::Str(name)) = self.advance() {
                        return Ok(Query::Field(Box::new(Query::Identity), name));
                    }
                }
                Ok(Query::Identity)
            }
            Token::DotDot => Ok(Query::Recurse),
            Token::Field(name) => Ok(Query::Field(Box::new(Query::Identity), name)),
            Token::Str(text) => Ok(Query::Literal(JsonValue::String(text))),
            Token::Num(n) => number_value(n)
                .map(Query::Literal)
                .ok_or_else(|| QueryError::Syntax {
                    offset,
                    message: "number out of range".to_string(),
                }),
            Token::LParen => {
                let inner = self.parse_pipe()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                if self.eat(&Token::RBracket) {
                    return Ok(Query::Array(None));
                }
                let inner = self.parse_pipe()?;
                self.expect(Token::RBracket)?;
                Ok(Query::Array(Some(Box::new(inner))))
            }
            Token::Ident(name) => self.parse_ident(name, offset),
            other => Err(QueryError::Syntax {
                offset,
                message: format!("unexpected token {:?}", other),
            }),
        }
    }

    fn parse_ident(&mut self, name: String, offset: usize) -> Result<Query, QueryError> {
        match name.as_str() {
            "true" => return Ok(Query::Literal(JsonValue::Bool(true))),
            "false" => return Ok(Query::Literal(JsonValue::Bool(false))),
            "null" => return Ok(Query::Literal(JsonValue::Null)),
            "and" | "or" => {
                return Err(QueryError::Syntax {
                    offset,
                    message: format!("unexpected keyword '{}'", name),
                });
            }
            _ => {}
        }

        if self.eat(&Token::LParen) {
            let mut args = vec![self.parse_pipe()?];
            while self.eat(&Token::Semicolon) {
                args.push(self.parse_pipe()?);
            }
            self.expect(Token::RParen)?;
            let known = match args.len() {
                1 => ONE_ARG_BUILTINS.contains(&name.as_str()) || name == "not",
                _ => false,
            };
            if !known {
                return Err(QueryError::UnknownFunction {
                    name,
                    arity: args.len(),
                });
            }
            if name == "not" {
                let operand = args.remove(0);
                return Ok(Query::Not(Box::new(operand)));
            }
            return Ok(Query::Call(name, args));
        }

        if ZERO_ARG_BUILTINS.contains(&name.as_str()) {
            return Ok(Query::Call(name, Vec::new()));
        }
        Ok(Query::Field(Box::new(Query::Identity), name))
    }
}

// =============================================================================
// Evaluation
// =============================================================================

type Stream = Result<Vec<JsonValue>, QueryError>;

/// Evaluate `query` against `input`, producing every result of the stream.
pub fn eval_query(query: &Query, input: &JsonValue) -> Stream {
    match query {
        Query::Identity => Ok(vec![input.clone()]),
        Query::Recurse => {
            let mut out = Vec::new();
            collect_recursive(input, &mut out);
            Ok(out)
        }
        Query::Literal(value) => Ok(vec![value.clone()]),
        Query::Field(target, key) => eval_query(target, input)?
            .iter()
            .map(|value| index_field(value, key))
            .collect(),
        Query::Index(target, index) => {
            let targets = eval_query(target, input)?;
            let indexes = eval_query(index, input)?;
            let mut out = Vec::new();
            for value in &targets {
                for idx in &indexes {
                    out.push(index_value(value, idx)?);
                }
            }
            Ok(out)
        }
        Query::Slice(target, from, to) => {
            let from = match from {
                Some(q) => single(q, input)?,
                None => JsonValue::Null,
            };
            let to = match to {
                Some(q) => single(q, input)?,
                None => JsonValue::Null,
            };
            eval_query(target, input)?
                .iter()
                .map(|value| slice_value(value, &from, &to))
                .collect()
        }
        Query::Iterate(target) => {
            let mut out = Vec::new();
            for value in eval_query(target, input)? {
                match value {
                    JsonValue::Array(items) => out.extend(items),
                    JsonValue::Object(map) => out.extend(map.into_iter().map(|(_, v)| v)),
                    other => return Err(QueryError::CannotIterate(kind_name(&other))),
                }
            }
            Ok(out)
        }
        Query::Optional(inner) => Ok(eval_query(inner, input).unwrap_or_default()),
        Query::Array(inner) => {
            let items = match inner {
                Some(q) => eval_query(q, input)?,
                None => Vec::new(),
            };
            Ok(vec![JsonValue::Array(items)])
        }
        Query::Pipe(left, right) => {
            let mut out = Vec::new();
            for value in eval_query(left, input)? {
                out.extend(eval_query(right, &value)?);
            }
            Ok(out)
        }
        Query::Comma(left, right) => {
            let mut out = eval_query(left, input)?;
            out.extend(eval_query(right, input)?);
            Ok(out)
        }
        Query::Alternative(left, right) => {
            let truthy: Vec<JsonValue> = eval_query(left, input)
                .unwrap_or_default()
                .into_iter()
                .filter(jq_truthy)
                .collect();
            if truthy.is_empty() {
                eval_query(right, input)
            } else {
                Ok(truthy)
            }
        }
        Query::And(left, right) => {
            let mut out = Vec::new();
            for l in eval_query(left, input)? {
                if !jq_truthy(&l) {
                    out.push(JsonValue::Bool(false));
                    continue;
                }
                for r in eval_query(right, input)? {
                    out.push(JsonValue::Bool(jq_truthy(&r)));
                }
            }
            Ok(out)
        }
        Query::Or(left, right) => {
            let mut out = Vec::new();
            for l in eval_query(left, input)? {
                if jq_truthy(&l) {
                    out.push(JsonValue::Bool(true));
                    continue;
                }
                for r in eval_query(right, input)? {
                    out.push(JsonValue::Bool(jq_truthy(&r)));
                }
            }
            Ok(out)
        }
        Query::Not(inner) => Ok(eval_query(inner, input)?
            .iter()
            .map(|v| JsonValue::Bool(!jq_truthy(v)))
            .collect()),
        Query::Compare(op, left, right) => {
            let lefts = eval_query(left, input)?;
            let rights = eval_query(right, input)?;
            let mut out = Vec::new();
            for l in &lefts {
                for r in &rights {
                    let ord = compare_json(l, r);
                    let result = match op {
                        CmpOp::Eq => ord == Ordering::Equal,
                        CmpOp::Ne => ord != Ordering::Equal,
                        CmpOp::Lt => ord == Ordering::Less,
                        CmpOp::Le => ord != Ordering::Greater,
                        CmpOp::Gt => ord == Ordering::Greater,
                        CmpOp::Ge => ord != Ordering::Less,
                    };
                    out.push(JsonValue::Bool(result));
                }
            }
            Ok(out)
        }
        Query::Arith(op, left, right) => {
            let lefts = eval_query(left, input)?;
            let rights = eval_query(right, input)?;
            let mut out = Vec::new();
            for l in &lefts {
                for r in &rights {
                    out.push(arith(*op, l, r)?);
                }
            }
            Ok(out)
        }
        Query::Neg(inner) => eval_query(inner, input)?
            .iter()
            .map(|v| match v.as_f64().and_then(|n| number_value(-n)) {
                Some(negated) => Ok(negated),
                None => Err(QueryError::Type(format!("{} cannot be negated", kind_name(v)))),
            })
            .collect(),
        Query::Call(name, args) => call_builtin(name, args, input),
    }
}

fn single(query: &Query, input: &JsonValue) -> Result<JsonValue, QueryError> {
    Ok(eval_query(query, input)?
        .into_iter()
        .next()
        .unwrap_or(JsonValue::Null))
}

fn collect_recursive(value: &JsonValue, out: &mut Vec<JsonValue>) {
    out.push(value.clone());
    match value {
        JsonValue::Array(items) => items.iter().for_each(|v| collect_recursive(v, out)),
        JsonValue::Object(map) => map.values().for_each(|v| collect_recursive(v, out)),
        _ => {}
    }
}

/// jq truthiness: only `false` and `null` are falsy.
fn jq_truthy(value: &JsonValue) -> bool {
    !matches!(value, JsonValue::Null | JsonValue::Bool(false))
}

pub fn kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn index_field(value: &JsonValue, key: &str) -> Result<JsonValue, QueryError> {
    match value {
        JsonValue::Object(map) => Ok(map.get(key).cloned().unwrap_or(JsonValue::Null)),
        JsonValue::Null => Ok(JsonValue::Null),
        other => Err(QueryError::CannotIndex {
            kind: kind_name(other),
            key: format!("\"{}\"", key),
        }),
    }
}

fn index_value(value: &JsonValue, index: &JsonValue) -> Result<JsonValue, QueryError> {
    match (value, index) {
        (JsonValue::Object(_), JsonValue::String(key)) => index_field(value, key),
        (JsonValue::Array(items), JsonValue::Number(n)) => {
            let Some(i) = n.as_f64().map(|f| f.floor() as i64) else {
                return Ok(JsonValue::Null);
            };
            let resolved = if i < 0 { items.len() as i64 + i } else { i };
            if resolved < 0 {
                return Ok(JsonValue::Null);
            }
            Ok(items
                .get(resolved as usize)
                .cloned()
                .unwrap_or(JsonValue::Null))
        }
        (JsonValue::Null, JsonValue::String(_) | JsonValue::Number(_)) => Ok(JsonValue::Null),
        (other, idx) => Err(QueryError::CannotIndex {
            kind: kind_name(other),
            key: idx.to_string(),
        }),
    }
}

fn slice_bounds(len: usize, from: &JsonValue, to: &JsonValue) -> (usize, usize) {
    let resolve = |bound: &JsonValue, default: usize| -> usize {
        match bound.as_f64() {
            Some(f) => {
                let i = f.floor() as i64;
                let i = if i < 0 { len as i64 + i } else { i };
                i.clamp(0, len as i64) as usize
            }
            None => default,
        }
    };
    let start = resolve(from, 0);
    let end = resolve(to, len);
    (start, end.max(start))
}

fn slice_value(value: &JsonValue, from: &JsonValue, to: &JsonValue) -> Result<JsonValue, QueryError> {
    match value {
        JsonValue::Array(items) => {
            let (start, end) = slice_bounds(items.len(), from, to);
            Ok(JsonValue::Array(items[start..end].to_vec()))
        }
        JsonValue::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), from, to);
            Ok(JsonValue::String(chars[start..end].iter().collect()))
        }
        JsonValue::Null => Ok(JsonValue::Null),
        other => Err(QueryError::CannotIndex {
            kind: kind_name(other),
            key: "slice".to_string(),
        }),
    }
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(false) => 1,
        JsonValue::Bool(true) => 2,
        JsonValue::Number(_) => 3,
        JsonValue::String(_) => 4,
        JsonValue::Array(_) => 5,
        JsonValue::Object(_) => 6,
    }
}

/// Total order over JSON values: null < false < true < numbers < strings <
/// arrays < objects.
pub fn compare_json(left: &JsonValue, right: &JsonValue) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => {
            let l = l.as_f64().unwrap_or(0.0);
            let r = r.as_f64().unwrap_or(0.0);
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
        (JsonValue::String(l), JsonValue::String(r)) => l.cmp(r),
        (JsonValue::Array(l), JsonValue::Array(r)) => {
            for (a, b) in l.iter().zip(r.iter()) {
                let ord = compare_json(a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            l.len().cmp(&r.len())
        }
        (JsonValue::Object(l), JsonValue::Object(r)) => {
            let mut lkeys: Vec<&String> = l.keys().collect();
            let mut rkeys: Vec<&String> = r.keys().collect();
            lkeys.sort();
            rkeys.sort();
            let keys = lkeys.cmp(&rkeys);
            if keys != Ordering::Equal {
                return keys;
            }
            for key in lkeys {
                let ord = compare_json(&l[key.as_str()], &r[key.as_str()]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

fn arith(op: ArithOp, left: &JsonValue, right: &JsonValue) -> Result<JsonValue, QueryError> {
    let type_error = || {
        QueryError::Type(format!(
            "{} and {} cannot be combined with {:?}",
            kind_name(left),
            kind_name(right),
            op
        ))
    };
    let numeric = |f: f64| number_value(f).ok_or_else(|| QueryError::Type("arithmetic overflow".to_string()));

    match (op, left, right) {
        (ArithOp::Add, JsonValue::Null, other) | (ArithOp::Add, other, JsonValue::Null) => {
            Ok(other.clone())
        }
        (_, JsonValue::Number(l), JsonValue::Number(r)) => {
            let l = l.as_f64().unwrap_or(0.0);
            let r = r.as_f64().unwrap_or(0.0);
            match op {
                ArithOp::Add => numeric(l + r),
                ArithOp::Sub => numeric(l - r),
                ArithOp::Mul => numeric(l * r),
                ArithOp::Div | ArithOp::Mod if r == 0.0 => {
                    Err(QueryError::Type("division by zero".to_string()))
                }
                ArithOp::Div => numeric(l / r),
                ArithOp::Mod => {
                    let (l, r) = (l.trunc() as i64, r.trunc() as i64);
                    if r == 0 {
                        return Err(QueryError::Type("division by zero".to_string()));
                    }
                    numeric((l % r) as f64)
                }
            }
        }
        (ArithOp::Add, JsonValue::String(l), JsonValue::String(r)) => {
            Ok(JsonValue::String(format!("{}{}", l, r)))
        }
        (ArithOp::Add, JsonValue::Array(l), JsonValue::Array(r)) => {
            Ok(JsonValue::Array(l.iter().chain(r.iter()).cloned().collect()))
        }
        (ArithOp::Add, JsonValue::Object(l), JsonValue::Object(r)) => {
            let mut merged = l.clone();
            for (k, v) in r {
                merged.insert(k.clone(), v.clone());
            }
            Ok(JsonValue::Object(merged))
        }
        (ArithOp::Sub, JsonValue::Array(l), JsonValue::Array(r)) => Ok(JsonValue::Array(
            l.iter().filter(|item| !r.contains(item)).cloned().collect(),
        )),
        (ArithOp::Div, JsonValue::String(l), JsonValue::String(r)) => Ok(split_string(l, r)),
        _ => Err(type_error()),
    }
}

fn split_string(text: &str, sep: &str) -> JsonValue {
    if text.is_empty() {
        return JsonValue::Array(Vec::new());
    }
    JsonValue::Array(
        text.split(sep)
            .map(|part| JsonValue::String(part.to_string()))
            .collect(),
    )
}

fn string_arg(name: &str, args: &[Query], input: &JsonValue) -> Result<String, QueryError> {
    match single(&args[0], input)? {
        JsonValue::String(s) => Ok(s),
        other => Err(QueryError::Type(format!(
            "{} expects a string argument, got {}",
            name,
            kind_name(&other)
        ))),
    }
}

fn input_str<'v>(name: &str, input: &'v JsonValue) -> Result<&'v str, QueryError> {
    input.as_str().ok_or_else(|| {
        QueryError::Type(format!("{} cannot be applied to {}", name, kind_name(input)))
    })
}

fn contains_value(haystack: &JsonValue, needle: &JsonValue) -> Result<bool, QueryError> {
    match (haystack, needle) {
        (JsonValue::String(h), JsonValue::String(n)) => Ok(h.contains(n.as_str())),
        (JsonValue::Array(h), JsonValue::Array(n)) => {
            for item in n {
                let mut found = false;
                for candidate in h {
                    if contains_value(candidate, item).unwrap_or(false) {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (JsonValue::Object(h), JsonValue::Object(n)) => {
            for (key, value) in n {
                match h.get(key) {
                    Some(candidate) if contains_value(candidate, value)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (h, n) if type_rank(h) == type_rank(n) || (h.is_boolean() && n.is_boolean()) => {
            Ok(compare_json(h, n) == Ordering::Equal)
        }
        (h, n) => Err(QueryError::Type(format!(
            "{} cannot contain {}",
            kind_name(h),
            kind_name(n)
        ))),
    }
}

fn extremum(input: &JsonValue, want: Ordering) -> Result<JsonValue, QueryError> {
    let items = input
        .as_array()
        .ok_or_else(|| QueryError::Type(format!("{} has no extremum", kind_name(input))))?;
    let mut best: Option<&JsonValue> = None;
    for item in items {
        best = match best {
            Some(current) if compare_json(item, current) != want => Some(current),
            _ => Some(item),
        };
    }
    Ok(best.cloned().unwrap_or(JsonValue::Null))
}

fn call_builtin(name: &str, args: &[Query], input: &JsonValue) -> Stream {
    let value = match (name, args.len()) {
        ("empty", 0) => return Ok(Vec::new()),
        ("select", 1) => {
            let mut out = Vec::new();
            for cond in eval_query(&args[0], input)? {
                if jq_truthy(&cond) {
                    out.push(input.clone());
                }
            }
            return Ok(out);
        }
        ("map", 1) => {
            let items = match input {
                JsonValue::Array(items) => items.clone(),
                JsonValue::Object(map) => map.values().cloned().collect(),
                other => return Err(QueryError::CannotIterate(kind_name(other))),
            };
            let mut out = Vec::new();
            for item in &items {
                out.extend(eval_query(&args[0], item)?);
            }
            JsonValue::Array(out)
        }
        ("length", 0) => match input {
            JsonValue::Null => JsonValue::from(0),
            JsonValue::Number(n) => number_value(n.as_f64().unwrap_or(0.0).abs())
                .unwrap_or(JsonValue::Null),
            JsonValue::String(s) => JsonValue::from(s.chars().count()),
            JsonValue::Array(items) => JsonValue::from(items.len()),
            JsonValue::Object(map) => JsonValue::from(map.len()),
            JsonValue::Bool(_) => {
                return Err(QueryError::Type("boolean has no length".to_string()));
            }
        },
        ("keys", 0) => match input {
            JsonValue::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                JsonValue::Array(keys.into_iter().map(|k| JsonValue::String(k.clone())).collect())
            }
            JsonValue::Array(items) => JsonValue::Array((0..items.len()).map(JsonValue::from).collect()),
            other => return Err(QueryError::Type(format!("{} has no keys", kind_name(other)))),
        },
        ("has", 1) => {
            let key = single(&args[0], input)?;
            match (input, &key) {
                (JsonValue::Object(map), JsonValue::String(k)) => JsonValue::Bool(map.contains_key(k)),
                (JsonValue::Array(items), JsonValue::Number(n)) => JsonValue::Bool(
                    n.as_f64()
                        .map(|f| f >= 0.0 && (f as usize) < items.len())
                        .unwrap_or(false),
                ),
                (other, _) => {
                    return Err(QueryError::CannotIndex {
                        kind: kind_name(other),
                        key: key.to_string(),
                    });
                }
            }
        }
        ("first", 0) => match input {
            JsonValue::Array(items) => items.first().cloned().unwrap_or(JsonValue::Null),
            other => return Err(QueryError::CannotIndex { kind: kind_name(other), key: "0".to_string() }),
        },
        ("last", 0) => match input {
            JsonValue::Array(items) => items.last().cloned().unwrap_or(JsonValue::Null),
            other => return Err(QueryError::CannotIndex { kind: kind_name(other), key: "-1".to_string() }),
        },
        ("reverse", 0) => match input {
            JsonValue::Array(items) => JsonValue::Array(items.iter().rev().cloned().collect()),
            JsonValue::String(s) => JsonValue::String(s.chars().rev().collect()),
            JsonValue::Null => JsonValue::Array(Vec::new()),
            other => return Err(QueryError::Type(format!("{} cannot be reversed", kind_name(other)))),
        },
        ("add", 0) => {
            let items = input
                .as_array()
                .ok_or_else(|| QueryError::CannotIterate(kind_name(input)))?;
            let mut acc = JsonValue::Null;
            for item in items {
                acc = arith(ArithOp::Add, &acc, item)?;
            }
            acc
        }
        ("min", 0) => extremum(input, Ordering::Less)?,
        ("max", 0) => extremum(input, Ordering::Greater)?,
        ("tostring", 0) => match input {
            JsonValue::String(_) => input.clone(),
            other => JsonValue::String(other.to_string()),
        },
        ("tonumber", 0) => match input {
            JsonValue::Number(_) => input.clone(),
            JsonValue::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(number_value)
                .ok_or_else(|| QueryError::Type(format!("cannot parse '{}' as a number", s)))?,
            other => return Err(QueryError::Type(format!("{} cannot be parsed as a number", kind_name(other)))),
        },
        ("ascii_downcase", 0) => JsonValue::String(input_str(name, input)?.to_ascii_lowercase()),
        ("ascii_upcase", 0) => JsonValue::String(input_str(name, input)?.to_ascii_uppercase()),
        ("type", 0) => JsonValue::String(kind_name(input).to_string()),
        ("not", 0) => JsonValue::Bool(!jq_truthy(input)),
        ("contains", 1) => {
            let mut out = Vec::new();
            for needle in eval_query(&args[0], input)? {
                out.push(JsonValue::Bool(contains_value(input, &needle)?));
            }
            return Ok(out);
        }
        ("startswith", 1) => {
            let prefix = string_arg(name, args, input)?;
            JsonValue::Bool(input_str(name, input)?.starts_with(&prefix))
        }
        ("endswith", 1) => {
            let suffix = string_arg(name, args, input)?;
            JsonValue::Bool(input_str(name, input)?.ends_with(&suffix))
        }
        ("test", 1) => {
            let pattern = string_arg(name, args, input)?;
            let re = regex::Regex::new(&pattern)
                .map_err(|err| QueryError::Type(format!("invalid regex pattern: {}", err)))?;
            JsonValue::Bool(re.is_match(input_str(name, input)?))
        }
        ("split", 1) => {
            let sep = string_arg(name, args, input)?;
            split_string(input_str(name, input)?, &sep)
        }
        ("join", 1) => {
            let sep = string_arg(name, args, input)?;
            let items = input
                .as_array()
                .ok_or_else(|| QueryError::CannotIterate(kind_name(input)))?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    JsonValue::Array(_) | JsonValue::Object(_) => {
                        return Err(QueryError::Type(format!("cannot join {}", kind_name(item))));
                    }
                    scalar => parts.push(value_text(scalar)),
                }
            }
            JsonValue::String(parts.join(&sep))
        }
        _ => {
            return Err(QueryError::UnknownFunction {
                name: name.to_string(),
                arity: args.len(),
            });
        }
    };
    Ok(vec![value])
}

/// Parse and evaluate in one step.
pub fn run_query(src: &str, input: &JsonValue) -> Stream {
    let query = parse_query(src)?;
    eval_query(&query, input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn employees() -> JsonValue {
        json!({
            "employees": [
                {"id": 101, "name": "Ana", "age": 25, "city": "Chicago"},
                {"id": 102, "name": "Bo", "age": 41, "city": "Denver", "tags": ["x", "y"]},
                {"id": 103, "name": "Marcus Miller", "age": 35, "city": "Chicago"}
            ]
        })
    }

    #[test]
    fn normalizes_root_anchored_paths() {
        assert_eq!(normalize("$"), ".");
        assert_eq!(normalize("$.employees[*]"), ".employees[]");
        assert_eq!(normalize("$[0].name"), ".[0].name");
        assert_eq!(normalize(r#"name == "[*]""#), r#"name == "[*]""#);
        assert_eq!(normalize("items[*].id"), "items[].id");
    }

    #[test]
    fn iterates_and_reads_fields() {
        let doc = employees();
        let names = run_query(".employees[].name", &doc).unwrap();
        assert_eq!(names, vec![json!("Ana"), json!("Bo"), json!("Marcus Miller")]);
        let anchored = run_query("$.employees[*].id", &doc).unwrap();
        assert_eq!(anchored, vec![json!(101), json!(102), json!(103)]);
    }

    #[test]
    fn bare_identifiers_read_fields() {
        let row = json!({"age": 35, "city": "Chicago", "address": {"zip": "60601"}});
        assert_eq!(run_query("age >= 30", &row).unwrap(), vec![json!(true)]);
        assert_eq!(
            run_query(r#"city == "Chicago" and age < 30"#, &row).unwrap(),
            vec![json!(false)]
        );
        assert_eq!(run_query("address.zip", &row).unwrap(), vec![json!("60601")]);
        assert_eq!(run_query("missing", &row).unwrap(), vec![json!(null)]);
    }

    #[test]
    fn identity_and_indexing() {
        let doc = json!([10, 20, 30]);
        assert_eq!(run_query(".", &doc).unwrap(), vec![doc.clone()]);
        assert_eq!(run_query("$", &doc).unwrap(), vec![doc.clone()]);
        assert_eq!(run_query(".[-1]", &doc).unwrap(), vec![json!(30)]);
        assert_eq!(run_query(".[1:]", &doc).unwrap(), vec![json!([20, 30])]);
        assert_eq!(run_query(".[5]", &doc).unwrap(), vec![json!(null)]);
        assert_eq!(run_query(r#".["k"]"#, &json!({"k": 1})).unwrap(), vec![json!(1)]);
    }

    #[test]
    fn builtins_and_pipes() {
        let doc = employees();
        assert_eq!(
            run_query(".employees | length", &doc).unwrap(),
            vec![json!(3)]
        );
        assert_eq!(
            run_query(r#"[.employees[] | select(.city == "Chicago") | .id]"#, &doc).unwrap(),
            vec![json!([101, 103])]
        );
        assert_eq!(
            run_query(r#".employees | map(.name | ascii_upcase) | join(",")"#, &doc).unwrap(),
            vec![json!("ANA,BO,MARCUS MILLER")]
        );
        assert_eq!(
            run_query(r#".employees[1].tags | contains(["y"])"#, &doc).unwrap(),
            vec![json!(true)]
        );
        assert_eq!(
            run_query(r#"name | test("^M")"#, &json!({"name": "Marcus"})).unwrap(),
            vec![json!(true)]
        );
    }

    #[test]
    fn arithmetic_and_alternative() {
        let row = json!({"price": 2.5, "qty": 4, "nick": null});
        assert_eq!(run_query("price * qty", &row).unwrap(), vec![json!(10)]);
        assert_eq!(run_query(r#"nick // "none""#, &row).unwrap(), vec![json!("none")]);
        assert_eq!(run_query("-qty + 1", &row).unwrap(), vec![json!(-3)]);
        assert!(run_query("qty / 0", &row).is_err());
    }

    #[test]
    fn not_works_as_prefix_and_filter() {
        let row = json!({"active": false});
        assert_eq!(run_query("not active", &row).unwrap(), vec![json!(true)]);
        assert_eq!(run_query("active | not", &row).unwrap(), vec![json!(true)]);
        assert_eq!(run_query("not(active)", &row).unwrap(), vec![json!(true)]);
    }

    #[test]
    fn jq_ordering_across_types() {
        assert_eq!(compare_json(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_json(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(compare_json(&json!("a"), &json!(5)), Ordering::Greater);
    }

    #[test]
    fn errors_are_reported() {
        assert!(matches!(parse_query("age >"), Err(QueryError::Syntax { .. })));
        assert!(matches!(parse_query("foo(1)"), Err(QueryError::UnknownFunction { .. })));
        assert!(matches!(parse_query("a # b"), Err(QueryError::UnexpectedChar { .. })));
        assert!(matches!(
            run_query(".a[]", &json!({"a": 5})),
            Err(QueryError::CannotIterate("number"))
        ));
        assert_eq!(run_query(".a[]?", &json!({"a": 5})).unwrap(), Vec::<JsonValue>::new());
    }
}
