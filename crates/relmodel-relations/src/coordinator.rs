//! Transaction coordination for nested mutation calls.
//!
//! A [`Coordinator`] fronts a connection for the duration of one mutation
//! call. When the call implies more than one statement it opens a single
//! transaction and routes every statement through it, so the call either
//! fully commits or fully rolls back. Single-statement calls skip the
//! transaction entirely.

use asupersync::{Cx, Outcome};
use relmodel_core::{
    Connection, Dialect, Error, IsolationLevel, Row, TransactionError, TransactionErrorKind,
    TransactionOps, Value,
};

use crate::try_outcome;

pub struct Coordinator<'c, C: Connection> {
    conn: &'c C,
    tx: Option<C::Tx<'c>>,
}

impl<'c, C: Connection> Coordinator<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn, tx: None }
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Open the call-scoped transaction with the default isolation level.
    pub async fn begin(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.begin_with(cx, IsolationLevel::default()).await
    }

    pub async fn begin_with(&mut self, cx: &Cx, isolation: IsolationLevel) -> Outcome<(), Error> {
        if self.tx.is_some() {
            return Outcome::Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NestedNotSupported,
                message: "a transaction is already open for this call".to_string(),
            }));
        }
        let conn: &'c C = self.conn;
        let tx = try_outcome!(conn.begin_with(cx, isolation).await);
        tracing::debug!(?isolation, "transaction opened");
        self.tx = Some(tx);
        Outcome::Ok(())
    }

    pub async fn query(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        tracing::trace!(sql, params = params.len(), "query");
        match &self.tx {
            Some(tx) => tx.query(cx, sql, params).await,
            None => self.conn.query(cx, sql, params).await,
        }
    }

    pub async fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<Row>, Error> {
        tracing::trace!(sql, params = params.len(), "query_one");
        match &self.tx {
            Some(tx) => tx.query_one(cx, sql, params).await,
            None => self.conn.query_one(cx, sql, params).await,
        }
    }

    pub async fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        tracing::trace!(sql, params = params.len(), "execute");
        match &self.tx {
            Some(tx) => tx.execute(cx, sql, params).await,
            None => self.conn.execute(cx, sql, params).await,
        }
    }

    /// Commit the call-scoped transaction. A no-op when no transaction was
    /// opened, so single-statement calls can share the same epilogue.
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        match self.tx.take() {
            Some(tx) => {
                let out = tx.commit(cx).await;
                if matches!(out, Outcome::Ok(())) {
                    tracing::debug!("transaction committed");
                }
                out
            }
            None => Outcome::Ok(()),
        }
    }

    /// Roll back the call-scoped transaction, if one is open.
    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        match self.tx.take() {
            Some(tx) => {
                let out = tx.rollback(cx).await;
                if matches!(out, Outcome::Ok(())) {
                    tracing::debug!("transaction rolled back");
                }
                out
            }
            None => Outcome::Ok(()),
        }
    }

    /// Best-effort rollback for teardown paths that carry no [`Error`] of
    /// their own, such as cancellation. A rollback failure is logged, not
    /// returned.
    pub async fn abort(&mut self, cx: &Cx) {
        if self.in_transaction() {
            match self.rollback(cx).await {
                Outcome::Ok(()) => {}
                Outcome::Err(rb_err) => {
                    tracing::warn!(error = %rb_err, "rollback failed while aborting");
                }
                Outcome::Cancelled(_) | Outcome::Panicked(_) => {
                    tracing::warn!("rollback interrupted while aborting");
                }
            }
        }
    }

    /// Abort path: roll back (best effort) and surface the original error,
    /// so a rollback failure cannot mask the error that caused the abort.
    pub async fn fail<T>(&mut self, cx: &Cx, err: Error) -> Outcome<T, Error> {
        self.abort(cx).await;
        Outcome::Err(err)
    }
}
