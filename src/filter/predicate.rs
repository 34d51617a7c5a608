use std::collections::HashMap;
use std::sync::Arc;

use crate::db::query::SqlFragment;

/// A named predicate usable in resource filters, e.g. `tableExists`.
///
/// `lower` receives the payload column to test and the call's arguments,
/// already checked against `arity`. Arguments must be bound, never spliced
/// into the SQL text.
pub trait ResourcePredicate: Send + Sync {
    fn name(&self) -> &str;

    fn arity(&self) -> usize;

    fn lower(&self, column: &'static str, args: &[String]) -> SqlFragment;
}

/// `name(database, schema, object)`: true when the payload's changed
/// resources list `object` in the given collection (`tables`, `views`, ...)
/// under that schema of that database.
#[derive(Clone, Debug)]
pub struct SchemaObjectExists {
    name: &'static str,
    collection: &'static str,
}

impl SchemaObjectExists {
    pub const fn new(name: &'static str, collection: &'static str) -> Self {
        Self { name, collection }
    }

    pub const fn tables() -> Self {
        Self::new("tableExists", "tables")
    }
}

impl ResourcePredicate for SchemaObjectExists {
    fn name(&self) -> &str {
        self.name
    }

    fn arity(&self) -> usize {
        3
    }

    fn lower(&self, column: &'static str, args: &[String]) -> SqlFragment {
        // A schema with the empty name is stored without a name key.
        SqlFragment::new(format!(
            "EXISTS (SELECT 1 FROM json_each({column}, '$.changedResources.databases') AS d \
             JOIN json_each(d.value, '$.schemas') AS s \
             JOIN json_each(s.value, '$.{collection}') AS o \
             WHERE json_extract(d.value, '$.name') = ? \
             AND COALESCE(json_extract(s.value, '$.name'), '') = ? \
             AND json_extract(o.value, '$.name') = ?)",
            column = column,
            collection = self.collection,
        ))
        .bind(args[0].clone())
        .bind(args[1].clone())
        .bind(args[2].clone())
    }
}

/// Predicates known to the filter compiler, by name.
#[derive(Clone)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Arc<dyn ResourcePredicate>>,
}

impl PredicateRegistry {
    pub fn empty() -> Self {
        Self {
            predicates: HashMap::new(),
        }
    }

    /// Adds a predicate, replacing any existing one with the same name.
    pub fn register<P: ResourcePredicate + 'static>(&mut self, predicate: P) -> &mut Self {
        self.predicates
            .insert(predicate.name().to_string(), Arc::new(predicate));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn ResourcePredicate> {
        self.predicates.get(name).map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.predicates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(SchemaObjectExists::tables());
        registry
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("predicates", &self.names())
            .finish()
    }
}
