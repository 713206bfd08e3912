//! Statement classification for routing.
//!
//! Statements are parsed with `sqlparser`; anything that is not provably a
//! read is treated as a write so it lands on the primary.

mod keywords;

use std::fmt;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Mutex;

use lru::LruCache;
use sqlparser::ast::{Query, SetExpr, Statement, Visit, Visitor};
use sqlparser::dialect::{GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::{Parser, ParserError};
use tracing::warn;

use crate::config::SqlDialect;

/// Routing-relevant kind of a statement
///
/// Ordered by strength: a batch takes the strongest kind of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Classification {
    Read,
    ReadForUpdate,
    Write,
}

impl Classification {
    /// Whether this statement must run on the primary and pins the context
    pub fn requires_primary(self) -> bool {
        !matches!(self, Classification::Read)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Read => "read",
            Classification::ReadForUpdate => "read_for_update",
            Classification::Write => "write",
        })
    }
}

/// Anything the router can classify
///
/// SQL text goes through the classifier; ORM layers that already know what
/// they are issuing can hand over a [`Classification`] directly.
pub trait Routable {
    fn classify_with(&self, classifier: &StatementClassifier) -> Classification;
}

impl Routable for str {
    fn classify_with(&self, classifier: &StatementClassifier) -> Classification {
        classifier.classify(self)
    }
}

impl Routable for String {
    fn classify_with(&self, classifier: &StatementClassifier) -> Classification {
        classifier.classify(self)
    }
}

impl Routable for Classification {
    fn classify_with(&self, _classifier: &StatementClassifier) -> Classification {
        *self
    }
}

impl<T: Routable + ?Sized> Routable for &T {
    fn classify_with(&self, classifier: &StatementClassifier) -> Classification {
        (**self).classify_with(classifier)
    }
}

/// SQL statement classifier with an optional LRU cache
pub struct StatementClassifier {
    dialect: SqlDialect,
    cache: Option<Mutex<LruCache<String, Classification>>>,
}

impl StatementClassifier {
    pub fn new(dialect: SqlDialect, cache_size: usize) -> Self {
        Self {
            dialect,
            cache: NonZeroUsize::new(cache_size).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Classify a statement (or a `;`-separated batch)
    ///
    /// # Examples
    ///
    /// ```
    /// # use bindroute::{Classification, SqlDialect, StatementClassifier};
    /// let classifier = StatementClassifier::new(SqlDialect::Postgres, 0);
    ///
    /// assert_eq!(classifier.classify("SELECT * FROM users"), Classification::Read);
    /// assert_eq!(classifier.classify("SELECT * FROM users FOR UPDATE"), Classification::ReadForUpdate);
    /// assert_eq!(classifier.classify("INSERT INTO users VALUES (1) RETURNING id"), Classification::Write);
    /// ```
    pub fn classify(&self, sql: &str) -> Classification {
        let key = sql.trim();

        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                if let Some(hit) = cache.get(key) {
                    return *hit;
                }
            }
        }

        let classification = self.classify_uncached(key);

        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                cache.put(key.to_string(), classification);
            }
        }

        classification
    }

    fn classify_uncached(&self, sql: &str) -> Classification {
        match self.parse(sql) {
            Ok(statements) => statements
                .iter()
                .filter_map(classify_statement)
                .max()
                .unwrap_or(Classification::Read),
            Err(e) => {
                let fallback = keywords::classify_keywords(sql);
                warn!(error = %e, classification = %fallback, "unparsed statement classified by keywords");
                fallback
            }
        }
    }

    fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        match self.dialect {
            SqlDialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
            SqlDialect::MySql => Parser::parse_sql(&MySqlDialect {}, sql),
            SqlDialect::Sqlite => Parser::parse_sql(&SQLiteDialect {}, sql),
            SqlDialect::Generic => Parser::parse_sql(&GenericDialect {}, sql),
        }
    }
}

impl Default for StatementClassifier {
    fn default() -> Self {
        Self::new(SqlDialect::Postgres, crate::config::DEFAULT_CLASSIFIER_CACHE_SIZE)
    }
}

/// `None` for transaction-control statements, which do not affect routing.
fn classify_statement(stmt: &Statement) -> Option<Classification> {
    match stmt {
        Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. }
        | Statement::Savepoint { .. }
        | Statement::ReleaseSavepoint { .. } => None,
        Statement::Query(query) => Some(classify_query(query)),
        // EXPLAIN ANALYZE executes its statement
        Statement::Explain {
            analyze, statement, ..
        } => {
            if *analyze {
                classify_statement(statement)
            } else {
                Some(Classification::Read)
            }
        }
        Statement::ExplainTable { .. } => Some(Classification::Read),
        Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCharset(_)
        | Statement::ShowObjects(_)
        | Statement::ShowTables { .. }
        | Statement::ShowViews { .. }
        | Statement::ShowCollation { .. } => Some(Classification::Read),
        _ => Some(Classification::Write),
    }
}

/// Strongest intent found in a query and every query nested in it
///
/// The visitor reaches CTE bodies, derived tables, set-operation branches
/// and expression subqueries (`IN`, `EXISTS`, scalar, `HAVING`, `LATERAL`).
struct QueryIntent {
    strongest: Classification,
}

impl Visitor for QueryIntent {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if !query.locks.is_empty() {
            self.strongest = self.strongest.max(Classification::ReadForUpdate);
        }
        self.strongest = self.strongest.max(body_intent(&query.body));

        if self.strongest == Classification::Write {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

fn classify_query(query: &Query) -> Classification {
    let mut intent = QueryIntent {
        strongest: Classification::Read,
    };
    let _ = query.visit(&mut intent);
    intent.strongest
}

/// Intent of a query body itself; nested queries are left to the visitor.
fn body_intent(expr: &SetExpr) -> Classification {
    match expr {
        // SELECT ... INTO creates a table
        SetExpr::Select(select) if select.into.is_some() => Classification::Write,
        SetExpr::Select(_) | SetExpr::Query(_) | SetExpr::Values(_) | SetExpr::Table(_) => {
            Classification::Read
        }
        SetExpr::SetOperation { left, right, .. } => body_intent(left).max(body_intent(right)),
        // INSERT/UPDATE/DELETE/MERGE bodies of data-modifying CTEs
        _ => Classification::Write,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(sql: &str) -> Classification {
        StatementClassifier::new(SqlDialect::Postgres, 0).classify(sql)
    }

    #[test]
    fn test_plain_reads() {
        assert_eq!(classify("SELECT * FROM users WHERE id = 1"), Classification::Read);
        assert_eq!(classify("SELECT count(*) FROM orders"), Classification::Read);
        assert_eq!(classify("VALUES (1), (2)"), Classification::Read);
        assert_eq!(
            classify("SELECT a FROM t1 UNION SELECT a FROM t2"),
            Classification::Read
        );
        assert_eq!(classify("EXPLAIN SELECT * FROM users"), Classification::Read);
        assert_eq!(classify("SHOW search_path"), Classification::Read);
        assert_eq!(classify("SHOW TABLES"), Classification::Read);
    }

    #[test]
    fn test_writes() {
        assert_eq!(classify("INSERT INTO users (id) VALUES (1)"), Classification::Write);
        assert_eq!(classify("UPDATE users SET name = 'x' WHERE id = 1"), Classification::Write);
        assert_eq!(classify("DELETE FROM users WHERE id = 1"), Classification::Write);
        assert_eq!(
            classify("INSERT INTO users (id, name) VALUES (1, 'a') ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"),
            Classification::Write
        );
        assert_eq!(
            classify("INSERT INTO users (id) VALUES (1) RETURNING (SELECT max(id) FROM users)"),
            Classification::Write
        );
    }

    #[test]
    fn test_ddl_goes_to_primary() {
        assert_eq!(classify("CREATE TABLE t (id INT)"), Classification::Write);
        assert_eq!(classify("DROP TABLE t"), Classification::Write);
        assert_eq!(classify("TRUNCATE t"), Classification::Write);
    }

    #[test]
    fn test_row_locks() {
        assert_eq!(classify("SELECT * FROM jobs FOR UPDATE"), Classification::ReadForUpdate);
        assert_eq!(
            classify("SELECT * FROM jobs WHERE state = 'new' FOR UPDATE SKIP LOCKED"),
            Classification::ReadForUpdate
        );
        assert_eq!(classify("SELECT * FROM jobs FOR SHARE"), Classification::ReadForUpdate);
    }

    #[test]
    fn test_nested_row_locks() {
        assert_eq!(
            classify("SELECT * FROM (SELECT * FROM jobs FOR UPDATE) AS j"),
            Classification::ReadForUpdate
        );
        assert_eq!(
            classify("WITH locked AS (SELECT * FROM jobs FOR UPDATE) SELECT * FROM locked"),
            Classification::ReadForUpdate
        );
        assert_eq!(
            classify("SELECT * FROM a JOIN (SELECT * FROM b FOR SHARE) AS bb ON a.id = bb.id"),
            Classification::ReadForUpdate
        );
    }

    #[test]
    fn test_row_locks_in_expression_subqueries() {
        assert_eq!(
            classify("SELECT * FROM orders WHERE id IN (SELECT id FROM jobs FOR UPDATE)"),
            Classification::ReadForUpdate
        );
        assert_eq!(
            classify("SELECT (SELECT id FROM jobs LIMIT 1 FOR UPDATE) AS x"),
            Classification::ReadForUpdate
        );
        assert_eq!(
            classify("SELECT * FROM t WHERE EXISTS (SELECT 1 FROM u WHERE u.id = t.id FOR UPDATE)"),
            Classification::ReadForUpdate
        );
        assert_eq!(
            classify("SELECT kind, count(*) FROM t GROUP BY kind HAVING count(*) > (SELECT n FROM limits FOR SHARE)"),
            Classification::ReadForUpdate
        );
        assert_eq!(
            classify("SELECT * FROM a WHERE id IN (SELECT id FROM b WHERE id IN (SELECT id FROM c FOR UPDATE))"),
            Classification::ReadForUpdate
        );
    }

    #[test]
    fn test_plain_subqueries_stay_reads() {
        assert_eq!(
            classify("SELECT * FROM orders WHERE id IN (SELECT order_id FROM items)"),
            Classification::Read
        );
        assert_eq!(
            classify("SELECT (SELECT max(id) FROM jobs) AS newest"),
            Classification::Read
        );
    }

    #[test]
    fn test_data_modifying_cte_is_write() {
        assert_eq!(
            classify("WITH moved AS (DELETE FROM inbox WHERE id = 1 RETURNING *) SELECT * FROM moved"),
            Classification::Write
        );
    }

    #[test]
    fn test_select_into_is_write() {
        assert_eq!(classify("SELECT * INTO archive FROM orders"), Classification::Write);
    }

    #[test]
    fn test_explain_analyze_follows_statement() {
        assert_eq!(
            classify("EXPLAIN ANALYZE UPDATE users SET name = 'x'"),
            Classification::Write
        );
        assert_eq!(classify("EXPLAIN ANALYZE SELECT 1"), Classification::Read);
    }

    #[test]
    fn test_savepoints_and_batches() {
        assert_eq!(
            classify("SAVEPOINT s1; SELECT * FROM users; RELEASE SAVEPOINT s1"),
            Classification::Read
        );
        assert_eq!(
            classify("SAVEPOINT s1; UPDATE users SET name = 'x'; RELEASE SAVEPOINT s1"),
            Classification::Write
        );
        assert_eq!(
            classify("BEGIN; SELECT * FROM jobs FOR UPDATE; COMMIT"),
            Classification::ReadForUpdate
        );
        assert_eq!(classify("COMMIT"), Classification::Read);
    }

    #[test]
    fn test_unparseable_falls_back_to_keywords() {
        assert_eq!(classify("SELECT FROM WHERE ((("), Classification::Read);
        assert_eq!(classify("UPDATE ((( broken"), Classification::Write);
    }

    #[test]
    fn test_cache_returns_same_answer() {
        let classifier = StatementClassifier::new(SqlDialect::Postgres, 2);

        for _ in 0..3 {
            assert_eq!(classifier.classify("SELECT 1"), Classification::Read);
            assert_eq!(classifier.classify(" UPDATE t SET a = 1 "), Classification::Write);
            assert_eq!(classifier.classify("SELECT * FROM t FOR UPDATE"), Classification::ReadForUpdate);
        }
    }

    #[test]
    fn test_routable_impls() {
        let classifier = StatementClassifier::default();
        let owned = String::from("DELETE FROM t");

        assert_eq!("SELECT 1".classify_with(&classifier), Classification::Read);
        assert_eq!(owned.classify_with(&classifier), Classification::Write);
        assert_eq!(
            Classification::ReadForUpdate.classify_with(&classifier),
            Classification::ReadForUpdate
        );
        assert!(Classification::ReadForUpdate.requires_primary());
        assert!(!Classification::Read.requires_primary());
    }

    #[test]
    fn test_mysql_dialect() {
        let classifier = StatementClassifier::new(SqlDialect::MySql, 0);
        assert_eq!(classifier.classify("SELECT * FROM `users`"), Classification::Read);
        assert_eq!(classifier.classify("REPLACE INTO users VALUES (1)"), Classification::Write);
    }
}
