use thiserror::Error;

use crate::changelog::ChangelogStatus;

pub type Result<T> = std::result::Result<T, ChangelogError>;

/// Errors returned by the changelog store. Every variant is a distinct
/// outcome the caller is expected to branch on. Nothing is retried internally.
#[derive(Debug, Error)]
pub enum ChangelogError {
    /// Pool, transaction, statement, migration or (de)serialization failure.
    /// `op` names the operation and its target.
    #[error("failed to {op}: {source}")]
    Persistence {
        op: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid resource filter {expression:?} at position {position}: {message}")]
    FilterSyntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("changelog {0} not found")]
    NotFound(i64),

    #[error("changelog {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: i64,
        from: ChangelogStatus,
        to: ChangelogStatus,
    },

    /// Stored data violates an invariant, e.g. two rows for one id.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl ChangelogError {
    pub fn filter_syntax(expression: &str, position: usize, message: impl Into<String>) -> Self {
        ChangelogError::FilterSyntax {
            expression: expression.to_string(),
            position,
            message: message.into(),
        }
    }
}

/// Attaches an operation name to internal `anyhow` results at the store
/// boundary, turning them into `ChangelogError::Persistence`.
pub trait PersistenceContext<T> {
    fn persistence<S: Into<String>>(self, op: S) -> Result<T>;
}

impl<T, E> PersistenceContext<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn persistence<S: Into<String>>(self, op: S) -> Result<T> {
        self.map_err(|e| ChangelogError::Persistence {
            op: op.into(),
            source: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_context_names_the_operation() {
        let result: std::result::Result<(), rusqlite::Error> =
            Err(rusqlite::Error::QueryReturnedNoRows);
        let err = result.persistence("update changelog 7").unwrap_err();
        assert!(
            matches!(err, ChangelogError::Persistence { ref op, .. } if op == "update changelog 7")
        );
        assert!(err.to_string().starts_with("failed to update changelog 7"));
    }

    #[test]
    fn filter_syntax_display_includes_position() {
        let err = ChangelogError::filter_syntax("foo(", 4, "unexpected end of expression");
        assert_eq!(
            err.to_string(),
            "invalid resource filter \"foo(\" at position 4: unexpected end of expression"
        );
    }
}
