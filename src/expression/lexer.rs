/// Tokenizer for the arithmetic/boolean expression grammar
///
/// Produces a flat list of tokens tagged with their byte offset so parse errors
/// can point at the offending position.

use super::ExpressionError;

/// A single lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl Token {
    /// Short human-readable form used in error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Percent => "'%'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Eq => "'=='".to_string(),
            Token::NotEq => "'!='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::LtEq => "'<='".to_string(),
            Token::GtEq => "'>='".to_string(),
        }
    }
}

/// Token plus the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split an expression into tokens
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let token = match c {
            b'+' => {
                pos += 1;
                Token::Plus
            }
            b'-' => {
                pos += 1;
                Token::Minus
            }
            b'*' => {
                pos += 1;
                Token::Star
            }
            b'/' => {
                pos += 1;
                Token::Slash
            }
            b'%' => {
                pos += 1;
                Token::Percent
            }
            b'(' => {
                pos += 1;
                Token::LParen
            }
            b')' => {
                pos += 1;
                Token::RParen
            }
            b'=' | b'!' | b'<' | b'>' => {
                let followed_by_eq = bytes.get(pos + 1) == Some(&b'=');
                pos += if followed_by_eq { 2 } else { 1 };
                match (c, followed_by_eq) {
                    (b'=', true) => Token::Eq,
                    (b'!', true) => Token::NotEq,
                    (b'<', true) => Token::LtEq,
                    (b'>', true) => Token::GtEq,
                    (b'<', false) => Token::Lt,
                    (b'>', false) => Token::Gt,
                    _ => {
                        return Err(ExpressionError::UnexpectedChar {
                            ch: c as char,
                            offset: start,
                        })
                    }
                }
            }
            b'"' => {
                let (value, next) = lex_quoted(input, start)?;
                pos = next;
                Token::Str(value)
            }
            b'`' => {
                let rest = &input[start + 1..];
                let end = rest
                    .find('`')
                    .ok_or(ExpressionError::UnterminatedString(start))?;
                pos = start + 1 + end + 1;
                Token::Str(rest[..end].to_string())
            }
            b'0'..=b'9' | b'.' => {
                let next = scan_number(bytes, start);
                let literal = &input[start..next];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber(literal.to_string()))?;
                pos = next;
                Token::Number(value)
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while pos < bytes.len() && (bytes[pos] == b'_' || bytes[pos].is_ascii_alphanumeric()) {
                    pos += 1;
                }
                Token::Ident(input[start..pos].to_string())
            }
            _ => {
                // Report the full (possibly multi-byte) character
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(ExpressionError::UnexpectedChar { ch, offset: start });
            }
        };

        tokens.push(Spanned { token, offset: start });
    }

    Ok(tokens)
}

/// Scan a numeric literal: digits, optional fraction, optional exponent
fn scan_number(bytes: &[u8], start: usize) -> usize {
    let mut pos = start;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        // Only consume the exponent when digits follow, so `2e` stays `2` `e`
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    pos
}

/// Lex a double-quoted string with backslash escapes, returning the value and
/// the offset just past the closing quote
fn lex_quoted(input: &str, start: usize) -> Result<(String, usize), ExpressionError> {
    let mut value = String::new();
    let mut chars = input[start + 1..].char_indices();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '"' => return Ok((value, start + 1 + i + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, '"')) => value.push('"'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, other)) => {
                    value.push('\\');
                    value.push(other);
                }
                None => break,
            },
            other => value.push(other),
        }
    }

    Err(ExpressionError::UnterminatedString(start))
}
