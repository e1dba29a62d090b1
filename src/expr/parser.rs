//! Recursive-descent parser for SCIM filters and attribute paths.
//!
//! Operator precedence, tightest first: `not`, comparison, `and`, `or`.
//! Keywords are lowercase. Parentheses group filters; brackets attach a
//! value filter to a multi-valued path step. Unbalanced input fails with
//! `invalidFilter` (or `invalidPath` via [`compile_path`]).

use serde_json::Value;

use super::ast::{AttrPath, CompareOp, Filter, PathStep};
use super::lexer::{Token, tokenize};
use crate::error::{ScimError, ScimResult};

/// Maximum accepted expression length in bytes.
pub const MAX_EXPRESSION_LENGTH: usize = 4096;
/// Maximum nesting depth of parentheses and bracket sub-filters.
pub const MAX_EXPRESSION_DEPTH: usize = 32;

/// Compile a filter expression into its AST.
pub fn compile_filter(input: &str) -> ScimResult<Filter> {
    if input.len() > MAX_EXPRESSION_LENGTH {
        return Err(ScimError::invalid_filter("filter expression too long"));
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let filter = parser.parse_or()?;
    parser.expect_end()?;
    Ok(filter)
}

/// Compile an attribute path, e.g. `name.familyName` or
/// `emails[type eq "work"].value`. Parse failures surface as `invalidPath`.
pub fn compile_path(input: &str) -> ScimResult<AttrPath> {
    if input.len() > MAX_EXPRESSION_LENGTH {
        return Err(ScimError::invalid_path("path expression too long"));
    }
    let run = || -> ScimResult<AttrPath> {
        let tokens = tokenize(input)?;
        let mut parser = Parser::new(tokens);
        let path = parser.parse_attr_path()?;
        parser.expect_end()?;
        Ok(path)
    };
    run().map_err(|err| match err {
        ScimError::InvalidFilter(detail) => ScimError::InvalidPath(detail),
        other => other,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_end(&self) -> ScimResult<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(ScimError::invalid_filter(format!(
                "unexpected trailing input at token {}",
                self.pos
            )))
        }
    }

    fn enter(&mut self) -> ScimResult<()> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            return Err(ScimError::invalid_filter("expression nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> ScimResult<Filter> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Word(w)) if w == "or") {
            self.next();
            let right = self.parse_and()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ScimResult<Filter> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::Word(w)) if w == "and") {
            self.next();
            let right = self.parse_not()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ScimResult<Filter> {
        match self.peek() {
            Some(Token::Word(w)) if w == "not" => {
                self.next();
                match self.next() {
                    Some(Token::LParen) => {}
                    _ => {
                        return Err(ScimError::invalid_filter(
                            "'not' must be followed by a parenthesized filter",
                        ));
                    }
                }
                self.enter()?;
                let inner = self.parse_or()?;
                self.leave();
                match self.next() {
                    Some(Token::RParen) => Ok(Filter::Not(Box::new(inner))),
                    _ => Err(ScimError::invalid_filter("unbalanced parentheses")),
                }
            }
            Some(Token::LParen) => {
                self.next();
                self.enter()?;
                let inner = self.parse_or()?;
                self.leave();
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ScimError::invalid_filter("unbalanced parentheses")),
                }
            }
            _ => self.parse_attr_expr(),
        }
    }

    fn parse_attr_expr(&mut self) -> ScimResult<Filter> {
        let path = self.parse_attr_path()?;
        let Some(Token::Word(word)) = self.next() else {
            return Err(ScimError::invalid_filter(format!(
                "expected an operator after '{}'",
                path
            )));
        };
        if word == "pr" {
            return Ok(Filter::Present(path));
        }
        let op = CompareOp::from_keyword(&word).ok_or_else(|| {
            ScimError::invalid_filter(format!("unknown operator '{}'", word))
        })?;
        let value = self.parse_literal()?;
        Ok(Filter::Compare { path, op, value })
    }

    fn parse_literal(&mut self) -> ScimResult<Value> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Num(n)) => Ok(Value::Number(n)),
            Some(Token::Word(w)) if w == "true" => Ok(Value::Bool(true)),
            Some(Token::Word(w)) if w == "false" => Ok(Value::Bool(false)),
            Some(Token::Word(w)) if w == "null" => Ok(Value::Null),
            other => Err(ScimError::invalid_filter(format!(
                "expected a literal, got {:?}",
                other
            ))),
        }
    }

    fn parse_attr_path(&mut self) -> ScimResult<AttrPath> {
        let Some(Token::Word(word)) = self.next() else {
            return Err(ScimError::invalid_filter("expected an attribute path"));
        };
        let (schema_urn, names) = split_path_word(&word, false)?;
        let mut steps: Vec<PathStep> = names.into_iter().map(PathStep::named).collect();

        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.next();
                    let last = steps.last_mut().ok_or_else(|| {
                        ScimError::invalid_filter("value filter without an attribute")
                    })?;
                    if last.filter.is_some() {
                        return Err(ScimError::invalid_filter(format!(
                            "attribute '{}' has more than one value filter",
                            last.name
                        )));
                    }
                    self.enter()?;
                    let filter = self.parse_or()?;
                    self.leave();
                    match self.next() {
                        Some(Token::RBracket) => {}
                        _ => return Err(ScimError::invalid_filter("unbalanced brackets")),
                    }
                    last.filter = Some(Box::new(filter));
                }
                Some(Token::Word(w)) if w.starts_with('.') => {
                    let continuation = w.clone();
                    self.next();
                    let (_, names) = split_path_word(&continuation, true)?;
                    steps.extend(names.into_iter().map(PathStep::named));
                }
                _ => break,
            }
        }

        Ok(AttrPath { schema_urn, steps })
    }
}

/// Split a path word into an optional URN qualifier and dotted step names.
///
/// URN-qualified paths split at the last colon, so
/// `urn:ietf:params:scim:schemas:core:2.0:User:name.givenName` yields the
/// User schema URN and the steps `name`, `givenName`. Navigation resolves
/// the ambiguity when the word is itself a bare extension URN.
fn split_path_word(word: &str, continuation: bool) -> ScimResult<(Option<String>, Vec<String>)> {
    let trimmed = if continuation {
        word.strip_prefix('.').unwrap_or(word)
    } else {
        word
    };
    let (urn, rest) = if !continuation && trimmed.len() >= 4 && trimmed[..4].eq_ignore_ascii_case("urn:")
    {
        match trimmed.rsplit_once(':') {
            Some((urn, rest)) => (Some(urn.to_string()), rest),
            None => (None, trimmed),
        }
    } else {
        (None, trimmed)
    };

    let mut names = Vec::new();
    for name in rest.split('.') {
        if name.is_empty() {
            return Err(ScimError::invalid_filter(format!(
                "malformed attribute path '{}'",
                word
            )));
        }
        names.push(name.to_string());
    }
    Ok((urn, names))
}
