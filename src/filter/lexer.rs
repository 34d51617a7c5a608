use crate::error::{ChangelogError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Identifier(String),
    Text(String),
    Integer(i64),
    LeftParen,
    RightParen,
    Comma,
    And,
    Or,
    End,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Identifier(name) => format!("identifier {:?}", name),
            TokenKind::Text(text) => format!("string {:?}", text),
            TokenKind::Integer(value) => format!("integer {}", value),
            TokenKind::LeftParen => "\"(\"".to_string(),
            TokenKind::RightParen => "\")\"".to_string(),
            TokenKind::Comma => "\",\"".to_string(),
            TokenKind::And => "\"&&\"".to_string(),
            TokenKind::Or => "\"||\"".to_string(),
            TokenKind::End => "end of expression".to_string(),
        }
    }
}

/// A token and the character offset where it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Splits a filter expression into tokens. The returned list always ends
/// with `TokenKind::End`.
pub fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;
        let kind = match c {
            c if c.is_whitespace() => {
                pos += 1;
                continue;
            }
            '(' => {
                pos += 1;
                TokenKind::LeftParen
            }
            ')' => {
                pos += 1;
                TokenKind::RightParen
            }
            ',' => {
                pos += 1;
                TokenKind::Comma
            }
            '&' | '|' => {
                if chars.get(pos + 1) != Some(&c) {
                    return Err(ChangelogError::filter_syntax(
                        expression,
                        start,
                        format!("expected \"{}{}\"", c, c),
                    ));
                }
                pos += 2;
                if c == '&' {
                    TokenKind::And
                } else {
                    TokenKind::Or
                }
            }
            '\'' | '"' => {
                let (text, next) = read_quoted(expression, &chars, start)?;
                pos = next;
                TokenKind::Text(text)
            }
            c if c.is_ascii_digit() || c == '-' => {
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                let literal: String = chars[start..pos].iter().collect();
                let value = literal.parse::<i64>().map_err(|_| {
                    ChangelogError::filter_syntax(
                        expression,
                        start,
                        format!("invalid integer {:?}", literal),
                    )
                })?;
                TokenKind::Integer(value)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while pos < chars.len()
                    && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_')
                {
                    pos += 1;
                }
                TokenKind::Identifier(chars[start..pos].iter().collect())
            }
            other => {
                return Err(ChangelogError::filter_syntax(
                    expression,
                    start,
                    format!("unexpected character {:?}", other),
                ));
            }
        };
        tokens.push(Token { kind, position: start });
    }

    tokens.push(Token {
        kind: TokenKind::End,
        position: chars.len(),
    });
    Ok(tokens)
}

/// Reads a string literal opened at `start`. A backslash escapes the next
/// character. Returns the unescaped text and the offset after the closing
/// quote.
fn read_quoted(expression: &str, chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut pos = start + 1;
    while pos < chars.len() {
        match chars[pos] {
            '\\' => {
                let escaped = chars.get(pos + 1).ok_or_else(|| {
                    ChangelogError::filter_syntax(expression, pos, "dangling escape")
                })?;
                text.push(*escaped);
                pos += 2;
            }
            c if c == quote => return Ok((text, pos + 1)),
            c => {
                text.push(c);
                pos += 1;
            }
        }
    }
    Err(ChangelogError::filter_syntax(expression, start, "unterminated string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(expression: &str) -> Vec<TokenKind> {
        tokenize(expression).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn predicate_call() {
        assert_eq!(
            kinds("tableExists('db1', \"public\", 't2')"),
            vec![
                TokenKind::Identifier("tableExists".to_string()),
                TokenKind::LeftParen,
                TokenKind::Text("db1".to_string()),
                TokenKind::Comma,
                TokenKind::Text("public".to_string()),
                TokenKind::Comma,
                TokenKind::Text("t2".to_string()),
                TokenKind::RightParen,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn operators_and_positions() {
        let tokens = tokenize("a(1) && (b(2)||c(-3))").unwrap();
        let and = tokens.iter().find(|t| t.kind == TokenKind::And).unwrap();
        assert_eq!(and.position, 5);
        let or = tokens.iter().find(|t| t.kind == TokenKind::Or).unwrap();
        assert_eq!(or.position, 13);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Integer(-3)));
        assert_eq!(tokens.last().unwrap().position, 21);
    }

    #[test]
    fn escaped_quotes() {
        assert_eq!(
            kinds(r"'it\'s'"),
            vec![TokenKind::Text("it's".to_string()), TokenKind::End]
        );
    }

    #[test]
    fn single_ampersand_is_rejected() {
        let err = tokenize("a('x') & b('y')").unwrap_err();
        assert!(matches!(err, ChangelogError::FilterSyntax { position: 7, .. }));
    }

    #[test]
    fn unterminated_string_reports_opening_quote() {
        let err = tokenize("a('x', 'y").unwrap_err();
        assert!(matches!(
            err,
            ChangelogError::FilterSyntax { position: 7, ref message, .. }
                if message == "unterminated string"
        ));
    }

    #[test]
    fn unexpected_character() {
        let err = tokenize("a('x') == b").unwrap_err();
        assert!(matches!(err, ChangelogError::FilterSyntax { position: 7, .. }));
    }
}
