//! Tokenizer for SCIM path and filter expressions.

use serde_json::Number;

use crate::error::{ScimError, ScimResult};

/// A lexical token. Keywords, operators and attribute paths all surface as
/// [`Token::Word`]; the parser decides their role from context.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    /// Bare word: attribute path fragment, keyword, or `true|false|null`
    Word(String),
    /// Quoted string literal with escapes resolved
    Str(String),
    /// Numeric literal
    Num(Number),
}

/// Characters permitted inside a bare word. Attribute names may carry `$`
/// (for `$ref`), and URN-qualified paths carry `:` and `.`.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$' | '.' | ':')
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '$' | '.')
}

/// Tokenize an expression. Fails with `invalidFilter` on any character or
/// literal that cannot start a token.
pub fn tokenize(input: &str) -> ScimResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '"' => {
                chars.next();
                tokens.push(Token::Str(lex_string(&mut chars)?));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &input[start..end];
                let number = text.parse::<Number>().map_err(|_| {
                    ScimError::invalid_filter(format!("malformed number literal '{}'", text))
                })?;
                tokens.push(Token::Num(number));
            }
            c if is_word_start(c) => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if is_word_char(c) {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(input[start..end].to_string()));
            }
            other => {
                return Err(ScimError::invalid_filter(format!(
                    "unexpected character '{}' at offset {}",
                    other, start
                )));
            }
        }
    }
    Ok(tokens)
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> ScimResult<String> {
    let mut out = String::new();
    loop {
        let Some((_, c)) = chars.next() else {
            return Err(ScimError::invalid_filter("unterminated string literal"));
        };
        match c {
            '"' => return Ok(out),
            '\\' => {
                let Some((_, escape)) = chars.next() else {
                    return Err(ScimError::invalid_filter("unterminated escape sequence"));
                };
                match escape {
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    '/' => out.push('/'),
                    'b' => out.push('\u{0008}'),
                    'f' => out.push('\u{000C}'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'u' => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let Some((_, hex)) = chars.next() else {
                                return Err(ScimError::invalid_filter(
                                    "truncated unicode escape",
                                ));
                            };
                            let digit = hex.to_digit(16).ok_or_else(|| {
                                ScimError::invalid_filter("malformed unicode escape")
                            })?;
                            code = code * 16 + digit;
                        }
                        let ch = char::from_u32(code).ok_or_else(|| {
                            ScimError::invalid_filter("invalid unicode escape")
                        })?;
                        out.push(ch);
                    }
                    other => {
                        return Err(ScimError::invalid_filter(format!(
                            "invalid escape sequence '\\{}'",
                            other
                        )));
                    }
                }
            }
            other => out.push(other),
        }
    }
}
