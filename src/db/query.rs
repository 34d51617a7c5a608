use rusqlite::types::Value;

/// A piece of SQL together with the values bound to its `?` placeholders, in
/// order. Identifiers in `sql` always come from this crate; caller supplied
/// values only ever travel in `params`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SqlFragment {
    sql: String,
    params: Vec<Value>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Concatenates fragments with `separator`, keeping parameter order.
    pub fn join(fragments: Vec<SqlFragment>, separator: &str) -> Self {
        let mut clauses = Vec::with_capacity(fragments.len());
        let mut params = Vec::new();
        for fragment in fragments {
            clauses.push(fragment.sql);
            params.extend(fragment.params);
        }
        Self::with_params(clauses.join(separator), params)
    }

    /// Binds the next `?` placeholder of the fragment.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// `(a AND b AND ...)`, parameters in operand order.
    pub fn all(fragments: Vec<SqlFragment>) -> Self {
        Self::group(fragments, " AND ")
    }

    /// `(a OR b OR ...)`, parameters in operand order.
    pub fn any(fragments: Vec<SqlFragment>) -> Self {
        Self::group(fragments, " OR ")
    }

    fn group(fragments: Vec<SqlFragment>, separator: &str) -> Self {
        let mut grouped = Self::join(fragments, separator);
        grouped.sql = format!("({})", grouped.sql);
        grouped
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

/// Builds a SELECT from a fixed projection plus any number of optional
/// predicates, which are ANDed together.
#[derive(Debug)]
pub struct QueryBuilder {
    select: &'static str,
    predicates: Vec<SqlFragment>,
    order_by: Option<&'static str>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl QueryBuilder {
    /// `select` is everything up to (not including) the WHERE keyword.
    pub fn new(select: &'static str) -> Self {
        Self {
            select,
            predicates: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn filter(&mut self, predicate: SqlFragment) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    pub fn filter_eq(&mut self, column: &'static str, value: impl Into<Value>) -> &mut Self {
        self.filter(SqlFragment::new(format!("{} = ?", column)).bind(value))
    }

    /// `expr IN (?, ?, ...)`. An empty set adds no predicate.
    pub fn filter_in<V: Into<Value>>(
        &mut self,
        expr: &'static str,
        values: impl IntoIterator<Item = V>,
    ) -> &mut Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return self;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.filter(SqlFragment::with_params(format!("{} IN ({})", expr, placeholders), values))
    }

    pub fn order_by(&mut self, order_by: &'static str) -> &mut Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn limit(&mut self, limit: Option<i64>) -> &mut Self {
        self.limit = limit;
        self
    }

    pub fn offset(&mut self, offset: Option<i64>) -> &mut Self {
        self.offset = offset;
        self
    }

    pub fn build(self) -> SqlFragment {
        let mut sql = String::from(self.select);
        let mut params = Vec::new();

        if !self.predicates.is_empty() {
            let (clause, values) = SqlFragment::join(self.predicates, " AND ").into_parts();
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
            params = values;
        }

        if let Some(order_by) = self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(limit));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::Integer(offset));
                }
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::Integer(offset));
            }
            (None, None) => {}
        }

        SqlFragment { sql, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder_has_no_where_clause() {
        let query = QueryBuilder::new("SELECT id FROM changelog").build();
        assert_eq!(query.sql(), "SELECT id FROM changelog");
        assert!(query.params().is_empty());
    }

    #[test]
    fn predicates_are_anded_in_order() {
        let mut builder = QueryBuilder::new("SELECT id FROM changelog");
        builder
            .filter_eq("id", 3i64)
            .filter_in("status", ["DONE".to_string(), "FAILED".to_string()])
            .order_by("id DESC")
            .limit(Some(10))
            .offset(Some(20));
        let query = builder.build();
        assert_eq!(
            query.sql(),
            "SELECT id FROM changelog WHERE id = ? AND status IN (?, ?) \
             ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            query.params(),
            &[
                Value::Integer(3),
                Value::Text("DONE".to_string()),
                Value::Text("FAILED".to_string()),
                Value::Integer(10),
                Value::Integer(20),
            ]
        );
    }

    #[test]
    fn empty_in_list_is_skipped() {
        let mut builder = QueryBuilder::new("SELECT id FROM changelog");
        builder.filter_in("status", Vec::<String>::new());
        assert_eq!(builder.build().sql(), "SELECT id FROM changelog");
    }

    #[test]
    fn offset_without_limit() {
        let mut builder = QueryBuilder::new("SELECT id FROM changelog");
        builder.offset(Some(5));
        let query = builder.build();
        assert_eq!(query.sql(), "SELECT id FROM changelog LIMIT -1 OFFSET ?");
        assert_eq!(query.params(), &[Value::Integer(5)]);
    }

    #[test]
    fn combined_fragments_keep_param_order() {
        let a = SqlFragment::new("a = ?").bind(1i64);
        let b = SqlFragment::new("b = ?").bind(2i64);
        let c = SqlFragment::new("c = ?").bind(3i64);
        let combined = SqlFragment::any(vec![SqlFragment::all(vec![a, b]), c]);
        assert_eq!(combined.sql(), "((a = ? AND b = ?) OR c = ?)");
        assert_eq!(
            combined.params(),
            &[Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }
}
