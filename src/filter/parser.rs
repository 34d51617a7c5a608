use crate::error::{ChangelogError, Result};
use crate::filter::lexer::{tokenize, Token, TokenKind};

/// Deepest parenthesis nesting a filter may use.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Most predicate calls a single filter may contain. Keeps the parsed tree,
/// and the SQL expression it lowers to, well inside SQLite's depth limit.
pub const MAX_PREDICATE_CALLS: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Integer(i64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Argument {
    pub value: Literal,
    pub position: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PredicateCall {
    pub name: String,
    pub args: Vec<Argument>,
    pub position: usize,
}

/// Parsed filter expression. `And`/`Or` chains are left-associative.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Call(PredicateCall),
}

pub fn parse(expression: &str) -> Result<FilterExpr> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        expression,
        tokens,
        index: 0,
        depth: 0,
        calls: 0,
    };
    let expr = parser.parse_or()?;
    parser.expect(TokenKind::End)?;
    Ok(expr)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    index: usize,
    depth: usize,
    calls: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // tokenize always ends the list with End, which is never consumed.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::End {
            self.index += 1;
        }
        token
    }

    fn error(&self, token: &Token, message: impl Into<String>) -> ChangelogError {
        ChangelogError::filter_syntax(self.expression, token.position, message)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        let token = self.advance();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(self.error(
                &token,
                format!("expected {}, found {}", kind.describe(), token.kind.describe()),
            ))
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr> {
        let mut left = self.parse_and()?;
        while self.peek().kind == TokenKind::Or {
            self.advance();
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr> {
        let mut left = self.parse_primary()?;
        while self.peek().kind == TokenKind::And {
            self.advance();
            let right = self.parse_primary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<FilterExpr> {
        let token = self.advance();
        match token.kind {
            TokenKind::LeftParen => {
                if self.depth == MAX_NESTING_DEPTH {
                    return Err(self.error(
                        &token,
                        format!("parentheses nested deeper than {} levels", MAX_NESTING_DEPTH),
                    ));
                }
                self.depth += 1;
                let expr = self.parse_or()?;
                self.expect(TokenKind::RightParen)?;
                self.depth -= 1;
                Ok(expr)
            }
            TokenKind::Identifier(name) => {
                if self.calls == MAX_PREDICATE_CALLS {
                    return Err(ChangelogError::filter_syntax(
                        self.expression,
                        token.position,
                        format!("more than {} predicate calls", MAX_PREDICATE_CALLS),
                    ));
                }
                self.calls += 1;
                self.expect(TokenKind::LeftParen)?;
                let args = self.parse_args()?;
                Ok(FilterExpr::Call(PredicateCall {
                    name,
                    args,
                    position: token.position,
                }))
            }
            ref other => Err(self.error(
                &token,
                format!("expected predicate call or \"(\", found {}", other.describe()),
            )),
        }
    }

    /// Parses `literal ("," literal)* ")"`; the opening paren is consumed.
    fn parse_args(&mut self) -> Result<Vec<Argument>> {
        let mut args = Vec::new();
        loop {
            let token = self.advance();
            let value = match token.kind {
                TokenKind::Text(text) => Literal::Text(text),
                TokenKind::Integer(value) => Literal::Integer(value),
                ref other => {
                    return Err(self.error(
                        &token,
                        format!("expected literal, found {}", other.describe()),
                    ));
                }
            };
            args.push(Argument {
                value,
                position: token.position,
            });

            let separator = self.advance();
            match separator.kind {
                TokenKind::Comma => continue,
                TokenKind::RightParen => return Ok(args),
                ref other => {
                    return Err(self.error(
                        &separator,
                        format!("expected \",\" or \")\", found {}", other.describe()),
                    ));
                }
            }
        }
    }
}
