//! `Dbio<A>` (§4.3): a pure, composable description of a database
//! computation, implemented as a continuation-style closure over a
//! borrowed `Connection` (§9 "monadic program as value", option (b)),
//! matching the source crate's `async move { ... }` blocks threaded
//! through a borrowed connection handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::Connection;
use crate::decode::Decoder;
use crate::error::{DbError, DbResult, DecodeError};
use crate::interpreter;
use crate::nonempty::NonEmpty;
use crate::sql::Sql;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The closure a `Dbio<A>` wraps: given exclusive access to a
/// `Connection` for the duration of the call, produce `A` or fail.
type Run<A> = Arc<dyn for<'a> Fn(&'a mut dyn Connection) -> BoxFuture<'a, DbResult<A>> + Send + Sync>;

/// A database program producing `A` when interpreted (§3 "DBIO[A]").
/// Referentially transparent: the same `Dbio` may be run against
/// different connections, yielding independent side effects each time.
pub struct Dbio<A> {
    run: Run<A>,
}

impl<A> Clone for Dbio<A> {
    fn clone(&self) -> Self {
        Dbio { run: self.run.clone() }
    }
}

/// Rebuild an equivalent `DbError`, since `anyhow::Error` (and so
/// `DbError` itself) isn't `Clone`. Used by `Dbio::raise_error`, whose
/// closure may be invoked more than once against different connections.
/// The rebuilt `ExecFailure`/`ProcessingFailure` cause keeps the original
/// message but loses its source chain.
fn clone_db_error(e: &DbError) -> DbError {
    match e {
        DbError::Encoding { messages } => DbError::Encoding { messages: messages.clone() },
        DbError::ExecFailure { sql, cause } => DbError::ExecFailure {
            sql: sql.clone(),
            cause: anyhow::anyhow!("{cause}"),
        },
        DbError::ProcessingFailure { sql, cause } => DbError::ProcessingFailure {
            sql: sql.clone(),
            cause: anyhow::anyhow!("{cause}"),
        },
        DbError::Decode(d) => DbError::Decode(DecodeError {
            column: d.column,
            expected: d.expected,
            cause: d.cause.clone(),
            statement: d.statement.clone(),
        }),
        DbError::UnexpectedEnd { sql } => DbError::UnexpectedEnd { sql: sql.clone() },
        DbError::UnexpectedContinuation { sql } => DbError::UnexpectedContinuation { sql: sql.clone() },
        DbError::InvariantViolation(s) => DbError::InvariantViolation(s.clone()),
        DbError::CancellationObserved => DbError::CancellationObserved,
    }
}

impl<A: Send + 'static> Dbio<A> {
    fn from_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut dyn Connection) -> BoxFuture<'a, DbResult<A>> + Send + Sync + 'static,
    {
        Dbio { run: Arc::new(f) }
    }

    /// Interprets this program against a live connection. Callers
    /// normally reach this indirectly through a `Connector` method.
    pub async fn interpret(&self, conn: &mut dyn Connection) -> DbResult<A> {
        (self.run)(conn).await
    }

    /// `pure(a)`: a program that performs no I/O and always succeeds.
    pub fn pure(a: A) -> Self
    where
        A: Clone,
    {
        Dbio::from_fn(move |_conn| {
            let a = a.clone();
            Box::pin(async move { Ok(a) })
        })
    }

    /// `raise_error(err)`: a program that always fails with `err`.
    pub fn raise_error(err: DbError) -> Self {
        let err = Arc::new(err);
        Dbio::from_fn(move |_conn| {
            let err = clone_db_error(&err);
            Box::pin(async move { Err(err) })
        })
    }

    /// `flat_map`/monadic bind: sequence `self`, then build the next
    /// program from its result. Strict sequencing point (§5 "ordering").
    pub fn flat_map<B, F>(self, f: F) -> Dbio<B>
    where
        B: Send + 'static,
        F: Fn(A) -> Dbio<B> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Dbio::from_fn(move |conn| {
            let this = self.clone();
            let f = f.clone();
            Box::pin(async move {
                let a = this.interpret(conn).await?;
                f(a).interpret(conn).await
            })
        })
    }

    pub fn map<B, F>(self, f: F) -> Dbio<B>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Dbio::from_fn(move |conn| {
            let this = self.clone();
            let f = f.clone();
            Box::pin(async move {
                let a = this.interpret(conn).await?;
                Ok(f(a))
            })
        })
    }

    /// `handle_error_with(fa, f)`: run `self`; on failure, run `f(err)`
    /// under the same connection; on success, pass through.
    pub fn handle_error_with<F>(self, f: F) -> Dbio<A>
    where
        F: Fn(DbError) -> Dbio<A> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Dbio::from_fn(move |conn| {
            let this = self.clone();
            let f = f.clone();
            Box::pin(async move {
                match this.interpret(conn).await {
                    Ok(a) => Ok(a),
                    Err(e) => f(e).interpret(conn).await,
                }
            })
        })
    }

    /// `on_error(fa, finalizer)`: run `finalizer` if `self` fails,
    /// discarding its result, then re-raise the original error.
    pub fn on_error<F>(self, finalizer: F) -> Dbio<A>
    where
        F: Fn(&DbError) -> Dbio<()> + Send + Sync + 'static,
    {
        let finalizer = Arc::new(finalizer);
        Dbio::from_fn(move |conn| {
            let this = self.clone();
            let finalizer = finalizer.clone();
            Box::pin(async move {
                match this.interpret(conn).await {
                    Ok(a) => Ok(a),
                    Err(e) => {
                        let _ = finalizer(&e).interpret(conn).await;
                        Err(e)
                    }
                }
            })
        })
    }
}

/// `sleep(d)`: suspend without touching the connection. Grounded on the
/// `with_timeout` combinator's own use of `tokio::time::sleep`.
pub fn sleep(duration: Duration) -> Dbio<()> {
    Dbio::from_fn(move |_conn| {
        let duration = duration;
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    })
}

/// `sequence(programs)`: run every program in order against the same
/// connection, threading failures through as soon as one occurs.
pub fn sequence<A: Send + 'static>(programs: Vec<Dbio<A>>) -> Dbio<Vec<A>> {
    Dbio::from_fn(move |conn| {
        let programs = programs.clone();
        Box::pin(async move {
            let mut out = Vec::with_capacity(programs.len());
            for p in programs {
                out.push(p.interpret(conn).await?);
            }
            Ok(out)
        })
    })
}

/// `query_unique(sql, decoder) -> DBIO[A]`.
pub fn query_unique<A, D>(sql: Sql, decoder: D) -> Dbio<A>
where
    A: Send + 'static,
    D: Decoder<A> + Send + Sync + 'static,
{
    let sql = Arc::new(sql);
    let decoder = Arc::new(decoder);
    Dbio::from_fn(move |conn| {
        let sql = sql.clone();
        let decoder = decoder.clone();
        Box::pin(async move { interpreter::execute_unique(conn, &sql, decoder.as_ref()).await })
    })
}

/// `query_option(sql, decoder) -> DBIO[Option[A]]`.
pub fn query_option<A, D>(sql: Sql, decoder: D) -> Dbio<Option<A>>
where
    A: Send + 'static,
    D: Decoder<A> + Send + Sync + 'static,
{
    let sql = Arc::new(sql);
    let decoder = Arc::new(decoder);
    Dbio::from_fn(move |conn| {
        let sql = sql.clone();
        let decoder = decoder.clone();
        Box::pin(async move { interpreter::execute_option(conn, &sql, decoder.as_ref()).await })
    })
}

/// `query_nel(sql, decoder) -> DBIO[NonEmpty[A]]`.
pub fn query_nel<A, D>(sql: Sql, decoder: D) -> Dbio<NonEmpty<A>>
where
    A: Send + 'static,
    D: Decoder<A> + Send + Sync + 'static,
{
    let sql = Arc::new(sql);
    let decoder = Arc::new(decoder);
    Dbio::from_fn(move |conn| {
        let sql = sql.clone();
        let decoder = decoder.clone();
        Box::pin(async move { interpreter::execute_nel(conn, &sql, decoder.as_ref()).await })
    })
}

/// `query_to(sql, decoder) -> DBIO[Vec[A]]` (see `interpreter::execute_to`
/// for why the spec's generic collection "factory" collapses to `Vec`).
pub fn query_to<A, D>(sql: Sql, decoder: D) -> Dbio<Vec<A>>
where
    A: Send + 'static,
    D: Decoder<A> + Send + Sync + 'static,
{
    let sql = Arc::new(sql);
    let decoder = Arc::new(decoder);
    Dbio::from_fn(move |conn| {
        let sql = sql.clone();
        let decoder = decoder.clone();
        Box::pin(async move { interpreter::execute_to(conn, &sql, decoder.as_ref()).await })
    })
}

/// `update(sql) -> DBIO[i32]`: affected row count.
pub fn update(sql: Sql) -> Dbio<i64> {
    let sql = Arc::new(sql);
    Dbio::from_fn(move |conn| {
        let sql = sql.clone();
        Box::pin(async move { interpreter::execute_update(conn, &sql).await })
    })
}

/// `returning(sql, decoder) -> DBIO[A]`: decode the first generated key.
pub fn returning<A, D>(sql: Sql, decoder: D) -> Dbio<A>
where
    A: Send + 'static,
    D: Decoder<A> + Send + Sync + 'static,
{
    let sql = Arc::new(sql);
    let decoder = Arc::new(decoder);
    Dbio::from_fn(move |conn| {
        let sql = sql.clone();
        let decoder = decoder.clone();
        Box::pin(async move { interpreter::execute_returning(conn, &sql, decoder.as_ref()).await })
    })
}

fn stream_inner<A, D>(sql: Sql, decoder: D, fetch_size: i64, limit: Option<usize>) -> Dbio<Vec<A>>
where
    A: Send + 'static,
    D: Decoder<A> + Send + Sync + 'static,
{
    let sql = Arc::new(sql);
    let decoder = Arc::new(decoder);
    Dbio::from_fn(move |conn| {
        let sql = sql.clone();
        let decoder = decoder.clone();
        Box::pin(async move { interpreter::execute_stream(conn, &sql, decoder.as_ref(), fetch_size, limit).await })
    })
}

/// `stream(sql, decoder, fetch_size) -> DBIO[Vec[A]]` (§4.4.s): pulls every
/// row off a lazily-advanced cursor, having asked the driver to use
/// `fetch_size` as its row-buffering hint. The cursor closes as soon as
/// the last row is consumed, before the statement itself closes (§8
/// property 9).
pub fn stream<A, D>(sql: Sql, decoder: D, fetch_size: i64) -> Dbio<Vec<A>>
where
    A: Send + 'static,
    D: Decoder<A> + Send + Sync + 'static,
{
    stream_inner(sql, decoder, fetch_size, None)
}

/// `stream_take(sql, decoder, fetch_size, limit) -> DBIO[Vec[A]]`: like
/// [`stream`], but stops pulling once `limit` rows have been decoded and
/// drops the cursor immediately, without reading the remainder of the
/// result set. This is this crate's expression of "a lazy sequence
/// consumed via an early-terminating `take`" (§8 S4): the `Connection`
/// that owns the cursor is released back to its pool only once the
/// surrounding `Dbio` finishes interpreting, so a cursor can't outlive a
/// single `interpret()` call as an independently-driven `Stream` the way
/// it could in a model where connection checkout is decoupled from
/// program interpretation; `limit` gets the same early-close behavior
/// from inside that one call instead (see DESIGN.md).
pub fn stream_take<A, D>(sql: Sql, decoder: D, fetch_size: i64, limit: usize) -> Dbio<Vec<A>>
where
    A: Send + 'static,
    D: Decoder<A> + Send + Sync + 'static,
{
    stream_inner(sql, decoder, fetch_size, Some(limit))
}

/// `batch_raw(statements) -> DBIO[Vec[i32]]` (§8 S6).
pub fn batch_raw(statements: Vec<String>) -> Dbio<Vec<i64>> {
    let statements = Arc::new(statements);
    Dbio::from_fn(move |conn| {
        let statements = statements.clone();
        Box::pin(async move { interpreter::execute_batch_raw(conn, &statements).await })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::i32_col;
    use crate::testing::{MockConnection, MockRow, MockStatement};

    #[tokio::test]
    async fn pure_performs_no_io() {
        let mut conn = MockConnection::new(vec![]);
        let program = Dbio::pure(42);
        assert_eq!(program.interpret(&mut conn).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn flat_map_sequences_and_shares_connection() {
        let mut conn = MockConnection::new(vec![
            MockStatement::query("SELECT a", vec![MockRow::new(vec![1i32.into()])]),
            MockStatement::update("UPDATE t SET a = 1", 1),
        ]);
        let program = query_unique(Sql::raw("SELECT a"), i32_col())
            .flat_map(|_a| update(Sql::raw("UPDATE t SET a = 1")));
        assert_eq!(program.interpret(&mut conn).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn map_transforms_result() {
        let mut conn = MockConnection::new(vec![MockStatement::query(
            "SELECT a",
            vec![MockRow::new(vec![1i32.into()])],
        )]);
        let program = query_unique::<i32, _>(Sql::raw("SELECT a"), i32_col()).map(|a| a + 1);
        assert_eq!(program.interpret(&mut conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn handle_error_with_recovers() {
        let mut conn = MockConnection::new(vec![]);
        let program: Dbio<i32> = Dbio::raise_error(DbError::InvariantViolation("boom".into()))
            .handle_error_with(|_e| Dbio::pure(0));
        assert_eq!(program.interpret(&mut conn).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn on_error_runs_finalizer_then_reraises() {
        let mut conn = MockConnection::new(vec![]);
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let program: Dbio<i32> = Dbio::raise_error(DbError::InvariantViolation("boom".into())).on_error(move |_e| {
            let ran_clone = ran_clone.clone();
            Dbio::from_fn(move |_conn| {
                let ran_clone = ran_clone.clone();
                Box::pin(async move {
                    ran_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                })
            })
        });
        assert!(program.interpret(&mut conn).await.is_err());
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn same_program_runs_independently_against_two_connections() {
        let program = Dbio::pure(7);
        let mut conn_a = MockConnection::new(vec![]);
        let mut conn_b = MockConnection::new(vec![]);
        assert_eq!(program.interpret(&mut conn_a).await.unwrap(), 7);
        assert_eq!(program.interpret(&mut conn_b).await.unwrap(), 7);
    }
}
