//! In-memory scripted connection for tests.
//!
//! [`MockConnection`] records every statement it sees and replays queued
//! result sets, so tests can assert on the exact statement sequence a
//! mutation produces without a database. Not intended for production use.

use std::collections::VecDeque;
use std::sync::Mutex;

use asupersync::{CancelReason, Cx, Outcome};
use relmodel_core::{
    Connection, Dialect, Error, IsolationLevel, QueryError, QueryErrorKind, Row, Transaction,
    TransactionInternal, Value,
};

/// Scripted connection. `query` pops queued row sets (empty when the
/// queue runs dry), `execute` pops queued affected counts (1 when dry).
pub struct MockConnection {
    dialect: Dialect,
    results: Mutex<VecDeque<Vec<Row>>>,
    affected: Mutex<VecDeque<u64>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
    fail_on: Mutex<Option<String>>,
    cancel_on: Mutex<Option<String>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::with_dialect(Dialect::Postgres)
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            results: Mutex::new(VecDeque::new()),
            affected: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            cancel_on: Mutex::new(None),
        }
    }

    /// Queue a result set for the next `query`/`query_one`.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.results.lock().unwrap().push_back(rows);
    }

    /// Queue an affected-row count for the next `execute`.
    pub fn push_affected(&self, n: u64) {
        self.affected.lock().unwrap().push_back(n);
    }

    /// Make the next statement containing `fragment` fail with a
    /// constraint error.
    pub fn fail_when(&self, fragment: impl Into<String>) {
        *self.fail_on.lock().unwrap() = Some(fragment.into());
    }

    /// Make any statement containing `fragment` come back cancelled, as
    /// if the caller's context was cancelled mid-statement.
    pub fn cancel_when(&self, fragment: impl Into<String>) {
        *self.cancel_on.lock().unwrap() = Some(fragment.into());
    }

    /// Every statement issued so far, in order, with its parameters.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().unwrap().clone()
    }

    /// SQL texts only, for sequence assertions.
    pub fn sql_log(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<(), Error> {
        self.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
        let failing = self
            .fail_on
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|fragment| sql.contains(fragment.as_str()));
        if failing {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                sql: Some(sql.to_string()),
                sqlstate: Some("23505".to_string()),
                message: "scripted failure".to_string(),
                source: None,
            }));
        }
        Ok(())
    }

    fn scripted_cancel(&self, sql: &str) -> Option<CancelReason> {
        let hit = self
            .cancel_on
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|fragment| sql.contains(fragment.as_str()));
        hit.then(|| CancelReason::user("scripted cancellation"))
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        if let Err(e) = self.record(sql, params) {
            return Outcome::Err(e);
        }
        if let Some(reason) = self.scripted_cancel(sql) {
            return Outcome::Cancelled(reason);
        }
        let rows = self.results.lock().unwrap().pop_front().unwrap_or_default();
        Outcome::Ok(rows)
    }

    fn run_execute(&self, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        if let Err(e) = self.record(sql, params) {
            return Outcome::Err(e);
        }
        if let Some(reason) = self.scripted_cancel(sql) {
            return Outcome::Cancelled(reason);
        }
        let n = self.affected.lock().unwrap().pop_front().unwrap_or(1);
        Outcome::Ok(n)
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for MockConnection {
    type Tx<'conn> = Transaction<'conn>;

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, _cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        self.run_query(sql, params)
    }

    async fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<Row>, Error> {
        match self.run_query(sql, params) {
            Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn execute(&self, _cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        self.run_execute(sql, params)
    }

    async fn begin(&self, _cx: &Cx) -> Outcome<Transaction<'_>, Error> {
        if let Err(e) = self.record("BEGIN", &[]) {
            return Outcome::Err(e);
        }
        Outcome::Ok(Transaction::new(self))
    }

    async fn begin_with(
        &self,
        _cx: &Cx,
        isolation: IsolationLevel,
    ) -> Outcome<Transaction<'_>, Error> {
        let sql = format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql());
        if let Err(e) = self.record(&sql, &[]) {
            return Outcome::Err(e);
        }
        Outcome::Ok(Transaction::new(self))
    }

    async fn ping(&self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }

    async fn close(self, _cx: &Cx) -> relmodel_core::Result<()> {
        Ok(())
    }
}

impl TransactionInternal for MockConnection {
    fn query_internal(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Outcome<Vec<Row>, Error>> + Send + '_>>
    {
        let out = self.run_query(sql, params);
        Box::pin(async move { out })
    }

    fn query_one_internal(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Outcome<Option<Row>, Error>> + Send + '_>>
    {
        let out = match self.run_query(sql, params) {
            Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        };
        Box::pin(async move { out })
    }

    fn execute_internal(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Outcome<u64, Error>> + Send + '_>> {
        let out = self.run_execute(sql, params);
        Box::pin(async move { out })
    }

    fn commit_internal(
        &self,
        _cx: &Cx,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Outcome<(), Error>> + Send + '_>> {
        let out = match self.record("COMMIT", &[]) {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(e),
        };
        Box::pin(async move { out })
    }

    fn rollback_internal(
        &self,
        _cx: &Cx,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Outcome<(), Error>> + Send + '_>> {
        let out = match self.record("ROLLBACK", &[]) {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(e),
        };
        Box::pin(async move { out })
    }
}

/// Build a row from column/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs.iter().map(|(c, _)| (*c).to_string()).collect(),
        pairs.iter().map(|(_, v)| v.clone()).collect(),
    )
}
