// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Boolean conditions over named columns, e.g. `age > 60 && region == 'East'`.
//!
//! Grammar:
//! ```text
//! or      := and (("||" | "or") and)*
//! and     := unary (("&&" | "and") unary)*
//! unary   := ("!" | "not") unary | primary
//! primary := "(" or ")" | operand (cmp operand)?
//! operand := column | number | string | true | false | null
//! cmp     := "<" | ">" | "<=" | ">=" | "==" | "!="
//! ```
//! Columns are bare identifiers or wrapped in backticks or square brackets.
//! When compiled against a dataset, any of its column names may also appear
//! as written, spaces and hyphens included; the longest name that matches on
//! word boundaries wins. `=`/`===` and `<>`/`!==` are accepted as equality
//! and inequality.

use crate::dataset::{cell, Row};
use crate::error::{ExpressionError, ExpressionResult};
use crate::value::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Cmp(CompareOp),
    And,
    Or,
    Not,
    Minus,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => name.clone(),
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("'{s}'"),
            Token::True => "true".into(),
            Token::False => "false".into(),
            Token::Null => "null".into(),
            Token::Cmp(op) => format!("{op:?}"),
            Token::And => "&&".into(),
            Token::Or => "||".into(),
            Token::Not => "!".into(),
            Token::Minus => "-".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Length of the longest known column name starting at `at` and bounded by
/// non-word characters on both sides. `names` is sorted longest first.
fn column_at(chars: &[char], at: usize, names: &[Vec<char>]) -> Option<usize> {
    if at > 0 && is_word(chars[at - 1]) {
        return None;
    }
    names
        .iter()
        .find(|name| {
            chars[at..].starts_with(name.as_slice())
                && chars.get(at + name.len()).map_or(true, |c| !is_word(*c))
        })
        .map(Vec::len)
}

fn tokenize(source: &str, columns: &[String]) -> ExpressionResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut names: Vec<Vec<char>> = columns
        .iter()
        .map(|c| c.chars().collect::<Vec<char>>())
        .filter(|c| c.first().is_some_and(|first| !first.is_whitespace()))
        .collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()));
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        if let Some(len) = column_at(&chars, i, &names) {
            tokens.push(Token::Ident(chars[i..i + len].iter().collect()));
            i += len;
            continue;
        }
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' => {
                let mut len = 1;
                while len < 3 && chars.get(i + len) == Some(&'=') {
                    len += 1;
                }
                tokens.push(Token::Cmp(CompareOp::Eq));
                i += len;
            }
            '!' => {
                if next == Some('=') {
                    let len = if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                    tokens.push(Token::Cmp(CompareOp::Ne));
                    i += len;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => match next {
                Some('=') => {
                    tokens.push(Token::Cmp(CompareOp::Le));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Cmp(CompareOp::Ne));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Cmp(CompareOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if next == Some('=') {
                    tokens.push(Token::Cmp(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CompareOp::Gt));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let (text, end) = read_delimited(&chars, i, ch)?;
                tokens.push(Token::Str(text));
                i = end;
            }
            '`' => {
                let (name, end) = read_delimited(&chars, i, '`')?;
                tokens.push(Token::Ident(name));
                i = end;
            }
            '[' => {
                let (name, end) = read_delimited(&chars, i, ']')?;
                tokens.push(Token::Ident(name));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::UnexpectedToken { token: literal })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(ExpressionError::UnexpectedChar {
                    ch: other,
                    offset: i,
                })
            }
        }
    }
    Ok(tokens)
}

/// Reads from the opening delimiter at `start` up to `close`. Inside string
/// literals a backslash escapes the next character.
fn read_delimited(chars: &[char], start: usize, close: char) -> ExpressionResult<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && close != ']' && close != '`' {
            if let Some(&escaped) = chars.get(i + 1) {
                out.push(escaped);
                i += 2;
                continue;
            }
        }
        if c == close {
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
    Err(ExpressionError::UnterminatedString { offset: start })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Any(Vec<Expr>),
    All(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Truthy(Operand),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> ExpressionResult<Expr> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Any(terms)
        })
    }

    fn parse_and(&mut self) -> ExpressionResult<Expr> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::All(terms)
        })
    }

    fn parse_unary(&mut self) -> ExpressionResult<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ExpressionResult<Expr> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.advance() {
                Some(Token::RParen) => Ok(inner),
                Some(other) => Err(ExpressionError::UnexpectedToken {
                    token: other.describe(),
                }),
                None => Err(ExpressionError::UnexpectedEnd),
            };
        }
        let left = self.parse_operand()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare { left, op, right });
        }
        Ok(Expr::Truthy(left))
    }

    fn parse_operand(&mut self) -> ExpressionResult<Operand> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(Operand::Column(name)),
            Some(Token::Number(n)) => Ok(Operand::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::Text(s))),
            Some(Token::True) => Ok(Operand::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Operand::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Operand::Literal(Value::Null)),
            Some(Token::Minus) => match self.advance() {
                Some(Token::Number(n)) => Ok(Operand::Literal(Value::Number(-n))),
                Some(other) => Err(ExpressionError::UnexpectedToken {
                    token: other.describe(),
                }),
                None => Err(ExpressionError::UnexpectedEnd),
            },
            Some(other) => Err(ExpressionError::UnexpectedToken {
                token: other.describe(),
            }),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

impl Expr {
    pub fn parse(source: &str) -> ExpressionResult<Self> {
        Self::from_tokens(tokenize(source, &[])?)
    }

    fn from_tokens(tokens: Vec<Token>) -> ExpressionResult<Self> {
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.advance() {
            None => Ok(expr),
            Some(extra) => Err(ExpressionError::UnexpectedToken {
                token: extra.describe(),
            }),
        }
    }

    /// Parses `source` and checks every column reference against `columns`.
    pub fn compile(source: &str, columns: &[String]) -> ExpressionResult<Self> {
        let expr = Self::from_tokens(tokenize(source, columns)?)?;
        let mut referenced = Vec::new();
        expr.collect_columns(&mut referenced);
        if let Some(unknown) = referenced.into_iter().find(|c| !columns.contains(c)) {
            return Err(ExpressionError::UnknownIdentifier { name: unknown });
        }
        Ok(expr)
    }

    pub fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Expr::Any(terms) | Expr::All(terms) => {
                for term in terms {
                    term.collect_columns(out);
                }
            }
            Expr::Not(inner) => inner.collect_columns(out),
            Expr::Compare { left, right, .. } => {
                push_column(left, out);
                push_column(right, out);
            }
            Expr::Truthy(operand) => push_column(operand, out),
        }
    }

    pub fn evaluate(&self, row: &Row) -> bool {
        match self {
            Expr::Any(terms) => terms.iter().any(|t| t.evaluate(row)),
            Expr::All(terms) => terms.iter().all(|t| t.evaluate(row)),
            Expr::Not(inner) => !inner.evaluate(row),
            Expr::Compare { left, op, right } => {
                compare(resolve(left, row), *op, resolve(right, row))
            }
            Expr::Truthy(operand) => truthy(resolve(operand, row)),
        }
    }
}

fn push_column(operand: &Operand, out: &mut Vec<String>) {
    if let Operand::Column(name) = operand {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
}

fn resolve<'a>(operand: &'a Operand, row: &'a Row) -> &'a Value {
    match operand {
        Operand::Column(name) => cell(row, name),
        Operand::Literal(value) => value,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::Text(s) => !s.is_empty(),
    }
}

/// Ordering reading of a value: finite numbers and booleans (as 1/0).
fn ordinal(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_number(),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        let both = left.is_null() && right.is_null();
        return match op {
            CompareOp::Eq => both,
            CompareOp::Ne => !both,
            _ => false,
        };
    }
    // A numeric reading on only one side has no ordering: "unknown" is
    // neither above nor below 60.
    let ordering = match (ordinal(left), ordinal(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        (None, None) => Some(left.to_string().cmp(&right.to_string())),
        _ => None,
    };
    match op {
        CompareOp::Eq => ordering == Some(Ordering::Equal),
        CompareOp::Ne => ordering != Some(Ordering::Equal),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}
