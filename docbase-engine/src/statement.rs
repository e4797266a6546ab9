//! # Statement Queries
//!
//! The in-process store answers a deliberately small statement form, enough
//! for the client's string-query path to be exercised end to end:
//!
//! ```text
//! SELECT <projection> FROM `bucket` [WHERE path = literal [AND path = literal]*] [LIMIT n]
//! ```
//!
//! Every matching document becomes one row: `id` is the document key, `value`
//! the whole document. The projection is not interpreted.

use serde_json::Value;

use docbase_common::{DocError, DocResult};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Ident(String),
    Str(String),
    Eq,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub(crate) bucket: String,
    filters: Vec<(Vec<String>, Value)>,
    pub(crate) limit: Option<usize>,
}

impl Statement {
    pub(crate) fn parse(text: &str) -> DocResult<Self> {
        let tokens = tokenize(text)?;
        let mut iter = tokens.into_iter().peekable();

        match iter.next() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("SELECT") => {}
            _ => return Err(invalid("statement must start with SELECT")),
        }

        // Skip the projection.
        loop {
            match iter.next() {
                Some(Token::Word(word)) if word.eq_ignore_ascii_case("FROM") => break,
                Some(_) => continue,
                None => return Err(invalid("missing FROM clause")),
            }
        }

        let bucket = match iter.next() {
            Some(Token::Ident(name)) | Some(Token::Word(name)) => name,
            _ => return Err(invalid("missing bucket name after FROM")),
        };

        let mut filters = Vec::new();
        let mut limit = None;

        while let Some(token) = iter.next() {
            match token {
                Token::Word(word)
                    if word.eq_ignore_ascii_case("WHERE") || word.eq_ignore_ascii_case("AND") =>
                {
                    let path = match iter.next() {
                        Some(Token::Word(path)) | Some(Token::Ident(path)) => path,
                        _ => return Err(invalid("expected a field path")),
                    };
                    if iter.next() != Some(Token::Eq) {
                        return Err(invalid("only equality predicates are supported"));
                    }
                    let literal = match iter.next() {
                        Some(Token::Str(text)) => Value::String(text),
                        Some(Token::Word(text)) => serde_json::from_str(&text)
                            .map_err(|_| invalid(&format!("invalid literal: {}", text)))?,
                        _ => return Err(invalid("expected a literal")),
                    };
                    filters.push((path.split('.').map(str::to_string).collect(), literal));
                }
                Token::Word(word) if word.eq_ignore_ascii_case("LIMIT") => {
                    let count = match iter.next() {
                        Some(Token::Word(count)) => count
                            .parse::<usize>()
                            .map_err(|_| invalid("LIMIT expects a number"))?,
                        _ => return Err(invalid("LIMIT expects a number")),
                    };
                    limit = Some(count);
                }
                other => return Err(invalid(&format!("unexpected token: {:?}", other))),
            }
        }

        Ok(Statement {
            bucket,
            filters,
            limit,
        })
    }

    /// Returns true when `doc` satisfies every predicate.
    pub(crate) fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|(path, expected)| {
            let mut current = doc;
            for segment in path {
                match current.get(segment) {
                    Some(next) => current = next,
                    None => return false,
                }
            }
            current == expected
        })
    }
}

fn tokenize(text: &str) -> DocResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == ',' || c == ';' {
            chars.next();
        } else if c == '=' {
            chars.next();
            tokens.push(Token::Eq);
        } else if c == '`' || c == '"' || c == '\'' {
            chars.next();
            let mut buf = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == c {
                    closed = true;
                    break;
                }
                buf.push(next);
            }
            if !closed {
                return Err(invalid("unterminated quote"));
            }
            if c == '`' {
                tokens.push(Token::Ident(buf));
            } else {
                tokens.push(Token::Str(buf));
            }
        } else {
            let mut buf = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() || next == '=' || next == ',' || next == ';' {
                    break;
                }
                buf.push(next);
                chars.next();
            }
            tokens.push(Token::Word(buf));
        }
    }

    Ok(tokens)
}

fn invalid(message: &str) -> DocError {
    DocError::InvalidArgument(format!("statement: {}", message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_filters_and_limit() {
        let statement = Statement::parse(
            "SELECT META().id FROM `default` WHERE _type = 'user' AND address.city = \"Lisbon\" LIMIT 5",
        )
        .expect("parse");
        assert_eq!(statement.bucket, "default");
        assert_eq!(statement.limit, Some(5));
        assert!(statement.matches(&json!({"_type": "user", "address": {"city": "Lisbon"}})));
        assert!(!statement.matches(&json!({"_type": "user", "address": {"city": "Porto"}})));
        assert!(!statement.matches(&json!({"_type": "user"})));
    }

    #[test]
    fn numeric_literals() {
        let statement = Statement::parse("SELECT * FROM b WHERE age = 42").expect("parse");
        assert!(statement.matches(&json!({"age": 42})));
        assert!(!statement.matches(&json!({"age": "42"})));
    }

    #[test]
    fn rejects_malformed_statements() {
        assert!(Statement::parse("DELETE FROM b").is_err());
        assert!(Statement::parse("SELECT *").is_err());
        assert!(Statement::parse("SELECT * FROM b WHERE a > 1").is_err());
        assert!(Statement::parse("SELECT * FROM `b").is_err());
    }
}
