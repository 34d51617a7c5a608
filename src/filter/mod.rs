//! Resource filter expressions.
//!
//! A filter such as
//!
//! ```text
//! (tableExists('db', 'public', 't2') && tableExists('db', 'public', 't3'))
//!     || tableExists('db', 'public', 't1')
//! ```
//!
//! is tokenized, parsed into a [`FilterExpr`] tree and lowered to a single
//! SQL predicate over the payload column, so it runs inside the same query
//! as the other list filters and pagination.

pub mod lexer;
pub mod parser;
pub mod predicate;

pub use parser::{
    parse, Argument, FilterExpr, Literal, PredicateCall, MAX_NESTING_DEPTH, MAX_PREDICATE_CALLS,
};
pub use predicate::{PredicateRegistry, ResourcePredicate, SchemaObjectExists};

use std::sync::Arc;

use crate::db::query::SqlFragment;
use crate::error::{ChangelogError, Result};

#[derive(Clone, Debug, Default)]
pub struct FilterCompiler {
    registry: Arc<PredicateRegistry>,
}

impl FilterCompiler {
    pub fn new(registry: PredicateRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Compiles `expression` into a predicate over `column`. A blank
    /// expression compiles to `None`, meaning no filtering.
    pub fn compile(&self, expression: &str, column: &'static str) -> Result<Option<SqlFragment>> {
        if expression.trim().is_empty() {
            return Ok(None);
        }
        let expr = parse(expression)?;
        let fragment = self.lower(expression, &expr, column)?;
        log::debug!("Compiled resource filter {:?} to {}", expression, fragment.sql());
        Ok(Some(fragment))
    }

    fn lower(
        &self,
        expression: &str,
        expr: &FilterExpr,
        column: &'static str,
    ) -> Result<SqlFragment> {
        match expr {
            FilterExpr::And(..) => {
                Ok(SqlFragment::all(self.lower_operands(expression, expr, column)?))
            }
            FilterExpr::Or(..) => {
                Ok(SqlFragment::any(self.lower_operands(expression, expr, column)?))
            }
            FilterExpr::Call(call) => self.lower_call(expression, call, column),
        }
    }

    /// Lowers a run of one operator as a single group, so `a || b || c`
    /// becomes `(a OR b OR c)` rather than nested pairs.
    fn lower_operands(
        &self,
        expression: &str,
        expr: &FilterExpr,
        column: &'static str,
    ) -> Result<Vec<SqlFragment>> {
        let mut operands = Vec::new();
        let mut pending = vec![expr];
        while let Some(next) = pending.pop() {
            match (expr, next) {
                (FilterExpr::And(..), FilterExpr::And(left, right))
                | (FilterExpr::Or(..), FilterExpr::Or(left, right)) => {
                    pending.push(right);
                    pending.push(left);
                }
                _ => operands.push(self.lower(expression, next, column)?),
            }
        }
        Ok(operands)
    }

    fn lower_call(
        &self,
        expression: &str,
        call: &PredicateCall,
        column: &'static str,
    ) -> Result<SqlFragment> {
        let predicate = self.registry.get(&call.name).ok_or_else(|| {
            ChangelogError::filter_syntax(
                expression,
                call.position,
                format!(
                    "unknown predicate {:?}, expected one of {}",
                    call.name,
                    self.registry.names().join(", ")
                ),
            )
        })?;

        if call.args.len() != predicate.arity() {
            return Err(ChangelogError::filter_syntax(
                expression,
                call.position,
                format!(
                    "{} takes {} arguments, got {}",
                    call.name,
                    predicate.arity(),
                    call.args.len()
                ),
            ));
        }

        let args = call
            .args
            .iter()
            .map(|arg| match &arg.value {
                Literal::Text(text) => Ok(text.clone()),
                Literal::Integer(value) => Err(ChangelogError::filter_syntax(
                    expression,
                    arg.position,
                    format!("{} expects string arguments, got integer {}", call.name, value),
                )),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(predicate.lower(column, &args))
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::types::Value;

    use super::*;

    const COLUMN: &str = "changelog.payload";

    fn blank_args() -> [String; 3] {
        [String::new(), String::new(), String::new()]
    }

    fn text(values: &[&str]) -> Vec<Value> {
        values.iter().map(|v| Value::Text(v.to_string())).collect()
    }

    #[test]
    fn blank_expression_compiles_to_nothing() -> anyhow::Result<()> {
        let compiler = FilterCompiler::default();
        assert!(compiler.compile("", COLUMN)?.is_none());
        assert!(compiler.compile("  \t", COLUMN)?.is_none());
        Ok(())
    }

    #[test]
    fn composes_with_sql_boolean_operators() -> anyhow::Result<()> {
        let compiler = FilterCompiler::default();
        let fragment = compiler
            .compile(
                "(tableExists('db', 'public', 't2') && tableExists('db', 'public', 't3')) \
                 || tableExists('db', 'public', 't1')",
                COLUMN,
            )?
            .expect("fragment");
        let exists = SchemaObjectExists::tables().lower(COLUMN, &blank_args());
        let expected_sql = format!("(({e} AND {e}) OR {e})", e = exists.sql());
        assert_eq!(fragment.sql(), expected_sql);
        assert_eq!(
            fragment.params(),
            &text(&["db", "public", "t2", "db", "public", "t3", "db", "public", "t1"])[..]
        );
        Ok(())
    }

    #[test]
    fn same_operator_chains_lower_to_one_group() -> anyhow::Result<()> {
        let compiler = FilterCompiler::default();
        let fragment = compiler
            .compile(
                "tableExists('db', 's', 'a') \
                 || (tableExists('db', 's', 'b') || tableExists('db', 's', 'c')) \
                 || tableExists('db', 's', 'd') && tableExists('db', 's', 'e')",
                COLUMN,
            )?
            .expect("fragment");
        let exists = SchemaObjectExists::tables().lower(COLUMN, &blank_args());
        let expected_sql = format!("({e} OR {e} OR {e} OR ({e} AND {e}))", e = exists.sql());
        assert_eq!(fragment.sql(), expected_sql);
        let tables: Vec<Value> = fragment.params().iter().skip(2).step_by(3).cloned().collect();
        assert_eq!(tables, text(&["a", "b", "c", "d", "e"]));
        Ok(())
    }

    #[test]
    fn unknown_predicate_is_a_syntax_error() {
        let compiler = FilterCompiler::default();
        let err = compiler
            .compile(
                "tableExists('db', 'public', 't1') || columnExists('db', 'public', 't1', 'c')",
                COLUMN,
            )
            .unwrap_err();
        match err {
            ChangelogError::FilterSyntax { position, message, .. } => {
                assert_eq!(position, 37);
                assert!(message.contains("columnExists"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn wrong_arity_is_a_syntax_error() {
        let compiler = FilterCompiler::default();
        let err = compiler.compile("tableExists('db', 't1')", COLUMN).unwrap_err();
        assert!(matches!(
            err,
            ChangelogError::FilterSyntax { position: 0, ref message, .. }
                if message.contains("3 arguments")
        ));
    }

    #[test]
    fn integer_argument_is_rejected() {
        let compiler = FilterCompiler::default();
        let err = compiler.compile("tableExists('db', 'public', 7)", COLUMN).unwrap_err();
        assert!(matches!(err, ChangelogError::FilterSyntax { position: 28, .. }));
    }

    #[test]
    fn registered_predicates_are_compiled() -> anyhow::Result<()> {
        let mut registry = PredicateRegistry::default();
        registry.register(SchemaObjectExists::new("viewExists", "views"));
        let compiler = FilterCompiler::new(registry);
        let fragment = compiler
            .compile("viewExists('db', 'public', 'v1')", COLUMN)?
            .expect("fragment");
        assert!(fragment.sql().contains("'$.views'"));
        Ok(())
    }
}
