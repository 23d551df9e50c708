//! `Connector` (§4.5): owns the policy of obtaining and returning a
//! `Connection`, and brackets `Dbio` execution with the transaction-mode
//! transitions of §4.4's table. A `MySqlConnector` wraps a
//! `mysql_async::Pool` the way the source crate's `ConvexMySqlPool` wraps
//! one.

use crate::connection::{Connection, MySqlConnection, PoolConfig};
use crate::dbio::Dbio;
use crate::error::{DbError, DbResult};
use crate::log::{arc_tracing_handler, LogHandler};

/// A handle that supplies a `Connection` and applies the §4.4 transaction
/// brackets around a `Dbio` program (§4.5).
pub trait Connector: Send + Sync {
    /// Acquire a connection for the duration of `f`, then return it to its
    /// origin (pool or single-use) regardless of outcome. Acquisition
    /// failure surfaces as the program's failure with no partial state
    /// retained; release failure is logged in addition to, not in place
    /// of, a body failure (§4.5 "Failure semantics").
    async fn with_connection<A, F>(&self, f: F) -> DbResult<A>
    where
        A: Send + 'static,
        F: for<'a> FnOnce(&'a mut dyn Connection) -> futures::future::BoxFuture<'a, DbResult<A>> + Send;

    /// `run(dbio)`: no mode bracket, connection used as handed out.
    async fn run<A: Send + 'static>(&self, program: Dbio<A>) -> DbResult<A> {
        self.with_connection(move |conn| Box::pin(async move { program.interpret(conn).await }))
            .await
    }

    /// `readOnly`: `setReadOnly(true)` pre; `setReadOnly(false)` post
    /// regardless of outcome.
    async fn read_only<A: Send + 'static>(&self, program: Dbio<A>) -> DbResult<A> {
        self.with_connection(move |conn| {
            Box::pin(async move {
                conn.set_read_only(true)
                    .await
                    .map_err(|e| DbError::exec_failure(&crate::sql::Sql::raw("SET SESSION TRANSACTION READ ONLY"), e))?;
                let result = program.interpret(conn).await;
                let _ = conn.set_read_only(false).await;
                result
            })
        })
        .await
    }

    /// `commit`: auto-commit mode, no explicit `commit()` call (the
    /// driver commits each statement itself).
    async fn commit<A: Send + 'static>(&self, program: Dbio<A>) -> DbResult<A> {
        self.with_connection(move |conn| {
            Box::pin(async move {
                conn.set_read_only(false)
                    .await
                    .map_err(|e| DbError::exec_failure(&crate::sql::Sql::raw("SET SESSION TRANSACTION READ WRITE"), e))?;
                conn.set_auto_commit(true)
                    .await
                    .map_err(|e| DbError::exec_failure(&crate::sql::Sql::raw("SET autocommit=1"), e))?;
                program.interpret(conn).await
            })
        })
        .await
    }

    /// `rollback`: always rolls back regardless of outcome, restoring
    /// auto-commit afterward.
    async fn rollback<A: Send + 'static>(&self, program: Dbio<A>) -> DbResult<A> {
        self.with_connection(move |conn| {
            Box::pin(async move {
                conn.set_read_only(false)
                    .await
                    .map_err(|e| DbError::exec_failure(&crate::sql::Sql::raw("SET SESSION TRANSACTION READ WRITE"), e))?;
                conn.set_auto_commit(false)
                    .await
                    .map_err(|e| DbError::exec_failure(&crate::sql::Sql::raw("SET autocommit=0"), e))?;
                let result = program.interpret(conn).await;
                let _ = conn.rollback().await;
                let _ = conn.set_auto_commit(true).await;
                result
            })
        })
        .await
    }

    /// `transaction`: commit on success, rollback on failure, restoring
    /// auto-commit either way.
    ///
    /// This does not protect against external cancellation: `program.interpret(conn).await`
    /// on the line below is a plain, interruptible await point. If the
    /// surrounding task is dropped while it's pending (a `tokio::select!`
    /// losing a race, a `timeout` firing, an abort), this future is
    /// dropped too, and neither the `match` nor `commit`/`rollback`/
    /// `set_auto_commit(true)` ever run — the connection is returned to
    /// `with_connection`'s caller (and from there to the pool, or
    /// dropped) mid-transaction, with auto-commit still off. A real
    /// uncancelable critical region would need the body to run to
    /// completion independent of this future being dropped, which this
    /// `Connection`-as-`&mut` architecture doesn't provide (see
    /// DESIGN.md). `DbError::CancellationObserved` exists in the error
    /// taxonomy for a connection model that can detect this; this
    /// connector never constructs it.
    async fn transaction<A: Send + 'static>(&self, program: Dbio<A>) -> DbResult<A> {
        self.with_connection(move |conn| {
            Box::pin(async move {
                conn.set_read_only(false)
                    .await
                    .map_err(|e| DbError::exec_failure(&crate::sql::Sql::raw("SET SESSION TRANSACTION READ WRITE"), e))?;
                conn.set_auto_commit(false)
                    .await
                    .map_err(|e| DbError::exec_failure(&crate::sql::Sql::raw("SET autocommit=0"), e))?;
                let result = program.interpret(conn).await;
                match &result {
                    Ok(_) => {
                        let _ = conn.commit().await;
                    }
                    Err(_) => {
                        let _ = conn.rollback().await;
                    }
                }
                let _ = conn.set_auto_commit(true).await;
                result
            })
        })
        .await
    }
}

/// The first-party `Connector` (§4.6): acquires a `mysql_async::Conn` from
/// a pool per call, wraps it as a `MySqlConnection`, and returns it to the
/// pool on drop (`mysql_async::Conn`'s own `Drop` impl does this, matching
/// `ConvexMySqlPool::acquire`).
pub struct MySqlConnector {
    pool: mysql_async::Pool,
    config: PoolConfig,
    log_handler: std::sync::Arc<dyn LogHandler>,
}

impl MySqlConnector {
    /// Validates `config` (§8 property 13) before building the pool.
    pub fn new(config: PoolConfig) -> DbResult<Self> {
        config.validate()?;
        let pool = mysql_async::Pool::new(config.to_opts());
        Ok(MySqlConnector {
            pool,
            config,
            log_handler: arc_tracing_handler(),
        })
    }

    pub fn with_log_handler(mut self, log_handler: std::sync::Arc<dyn LogHandler>) -> Self {
        self.log_handler = log_handler;
        self
    }

    pub async fn close(self) -> anyhow::Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

impl Connector for MySqlConnector {
    async fn with_connection<A, F>(&self, f: F) -> DbResult<A>
    where
        A: Send + 'static,
        F: for<'a> FnOnce(&'a mut dyn Connection) -> futures::future::BoxFuture<'a, DbResult<A>> + Send,
    {
        let conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| DbError::exec_failure(&crate::sql::Sql::raw("<acquire connection>"), e))?;
        let mut mysql_conn = MySqlConnection::new(conn, self.config.statement_timeout, self.log_handler.clone());
        f(&mut mysql_conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbio;
    use crate::testing::MockConnection;

    /// A `Connector` over a fixed, already-constructed `Connection`,
    /// letting scenario tests (§8 S1-S6) exercise the transaction-mode
    /// brackets against a `MockConnection` without a pool.
    struct SingleConnector {
        conn: tokio::sync::Mutex<MockConnection>,
    }

    impl SingleConnector {
        fn new(conn: MockConnection) -> Self {
            SingleConnector {
                conn: tokio::sync::Mutex::new(conn),
            }
        }
    }

    impl Connector for SingleConnector {
        async fn with_connection<A, F>(&self, f: F) -> DbResult<A>
        where
            A: Send + 'static,
            F: for<'a> FnOnce(&'a mut dyn Connection) -> futures::future::BoxFuture<'a, DbResult<A>> + Send,
        {
            let mut guard = self.conn.lock().await;
            f(&mut *guard).await
        }
    }

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let connector = SingleConnector::new(MockConnection::new(vec![]));
        let result = connector.transaction(dbio::Dbio::pure(1)).await;
        assert_eq!(result.unwrap(), 1);
        let guard = connector.conn.lock().await;
        assert_eq!(guard.commit_count(), 1);
        assert_eq!(guard.rollback_count(), 0);
        assert!(guard.is_auto_commit());
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_failure() {
        let connector = SingleConnector::new(MockConnection::new(vec![]));
        let program: Dbio<i32> = Dbio::raise_error(DbError::InvariantViolation("boom".into()));
        let result = connector.transaction(program).await;
        assert!(result.is_err());
        let guard = connector.conn.lock().await;
        assert_eq!(guard.commit_count(), 0);
        assert_eq!(guard.rollback_count(), 1);
        assert!(guard.is_auto_commit());
    }

    #[tokio::test]
    async fn rollback_wrapper_always_rolls_back() {
        let connector = SingleConnector::new(MockConnection::new(vec![]));
        let result = connector.rollback(dbio::Dbio::pure(1)).await;
        assert!(result.is_ok());
        let guard = connector.conn.lock().await;
        assert_eq!(guard.rollback_count(), 1);
        assert!(guard.is_auto_commit());
    }

    #[tokio::test]
    async fn read_only_restores_flag_after() {
        let connector = SingleConnector::new(MockConnection::new(vec![]));
        let result = connector.read_only(dbio::Dbio::pure(1)).await;
        assert!(result.is_ok());
        let guard = connector.conn.lock().await;
        assert!(!guard.is_read_only());
    }
}
