//! The statement executor (§4.4): translates one DBIO leaf against a live
//! `Connection`, owning the fixed lifecycle (acquire -> bind -> execute ->
//! consume -> release -> log) and the streaming bracket (§4.4.s).

use futures::TryStreamExt;

use crate::connection::{Connection, PreparedStatement, ResultSet};
use crate::decode::{Decoder, RowCtx};
use crate::encode::Encoded;
use crate::error::{DbError, DbResult};
use crate::log::LogEvent;
use crate::sql::{Parameter, Sql};
use crate::value::Value;

/// Walks `sql`'s parameter list and writes each `Dynamic` entry into
/// `stmt` at its 1-based position (§4.4 step 3). A pure local buffer
/// operation: no I/O, so no suspension point.
fn bind_params(stmt: &mut PreparedStatement, sql: &Sql) -> DbResult<()> {
    let mut position = 0usize;
    for param in sql.params() {
        let encoded = match param {
            Parameter::Static(_) => continue,
            Parameter::Dynamic(e) => e,
        };
        position += 1;
        match encoded {
            Encoded::Failure(msgs) => return Err(DbError::encoding(msgs.clone())),
            Encoded::Success(values) => {
                if values.len() != 1 {
                    return Err(DbError::InvariantViolation(format!(
                        "placeholder {position} encoded to {} values; bind() expects exactly one \
                         (split composite/tuple encoders into one bind() call per placeholder)",
                        values.len()
                    )));
                }
                stmt.set_value(position, values[0].clone());
            }
        }
    }
    Ok(())
}

fn log_and_finish<A>(conn: &mut dyn Connection, sql: &Sql, result: DbResult<A>) -> DbResult<A> {
    let params = sql.rendered_params();
    let event = match &result {
        Ok(_) => LogEvent::Success {
            sql: sql.text().to_owned(),
            params,
        },
        Err(e) if e.is_processing_failure() => LogEvent::ProcessingFailure {
            sql: sql.text().to_owned(),
            params,
            cause: e.to_string(),
        },
        Err(e) => LogEvent::ExecFailure {
            sql: sql.text().to_owned(),
            params,
            cause: e.to_string(),
        },
    };
    conn.log_handler().log(event);
    result
}

/// Acquires a statement, binds `sql`'s parameters, and releases the
/// statement after `body` runs, regardless of outcome (§4.4 step 6).
/// `body` receives the connection and the freshly bound statement; it is
/// responsible for calling whichever `execute_*` method its shape needs.
async fn with_statement<A, F>(conn: &mut dyn Connection, sql: &Sql, return_keys: bool, body: F) -> DbResult<A>
where
    F: for<'a> FnOnce(
        &'a mut dyn Connection,
        &'a mut PreparedStatement,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = DbResult<A>> + Send + 'a>>,
{
    let mut stmt = match conn.prepare_statement(sql.text(), return_keys).await {
        Ok(s) => s,
        Err(e) => return Err(DbError::exec_failure(sql, e)),
    };
    if let Err(e) = bind_params(&mut stmt, sql) {
        let _ = conn.close_statement(&mut stmt).await;
        return Err(e);
    }
    let result = body(conn, &mut stmt).await;
    if let Err(e) = conn.close_statement(&mut stmt).await {
        tracing::warn!(error = %e, sql = sql.text(), "failed to close prepared statement");
    }
    result
}

async fn consume_rows<A>(sql: &Sql, rs: &mut dyn ResultSet, decoder: &dyn Decoder<A>) -> DbResult<Vec<A>> {
    let mut out = Vec::new();
    loop {
        let has_row = rs.next().await.map_err(|e| DbError::processing_failure(sql, e))?;
        if !has_row {
            break;
        }
        let width = rs.column_count();
        let row: Vec<Value> = (1..=width).map(|i| rs.get_value(i)).collect();
        let mut ctx = RowCtx::new(&row, sql.text());
        let value = decoder.decode(1, &mut ctx)?;
        out.push(value);
    }
    Ok(out)
}

/// **unique** (§4.4 step 5): advance once; no row is `UnexpectedEnd`.
pub async fn execute_unique<A: Send + 'static>(conn: &mut dyn Connection, sql: &Sql, decoder: &(dyn Decoder<A> + Sync)) -> DbResult<A> {
    let result: DbResult<A> = with_statement(conn, sql, false, |conn, stmt| {
        Box::pin(async move {
            let mut rs = conn.execute_query(stmt).await.map_err(|e| DbError::exec_failure(sql, e))?;
            let has_row = rs.next().await.map_err(|e| DbError::processing_failure(sql, e))?;
            if !has_row {
                return Err(DbError::unexpected_end(sql));
            }
            let width = rs.column_count();
            let row: Vec<Value> = (1..=width).map(|i| rs.get_value(i)).collect();
            let mut ctx = RowCtx::new(&row, sql.text());
            let value = decoder.decode(1, &mut ctx)?;
            let _ = rs.close().await;
            Ok(value)
        })
    })
    .await;
    log_and_finish(conn, sql, result)
}

/// **option** (§4.4 step 5): `None` on empty, fail `UnexpectedContinuation`
/// on more than one row.
pub async fn execute_option<A: Send + 'static>(
    conn: &mut dyn Connection,
    sql: &Sql,
    decoder: &(dyn Decoder<A> + Sync),
) -> DbResult<Option<A>> {
    let result: DbResult<Option<A>> = with_statement(conn, sql, false, |conn, stmt| {
        Box::pin(async move {
            let mut rs = conn.execute_query(stmt).await.map_err(|e| DbError::exec_failure(sql, e))?;
            let has_first = rs.next().await.map_err(|e| DbError::processing_failure(sql, e))?;
            if !has_first {
                let _ = rs.close().await;
                return Ok(None);
            }
            let width = rs.column_count();
            let row: Vec<Value> = (1..=width).map(|i| rs.get_value(i)).collect();
            let mut ctx = RowCtx::new(&row, sql.text());
            let value = decoder.decode(1, &mut ctx)?;
            let has_more = rs.next().await.map_err(|e| DbError::processing_failure(sql, e))?;
            let _ = rs.close().await;
            if has_more {
                return Err(DbError::unexpected_continuation(sql));
            }
            Ok(Some(value))
        })
    })
    .await;
    log_and_finish(conn, sql, result)
}

/// **nel** (§4.4 step 5): accumulate all rows; empty is `UnexpectedEnd`.
pub async fn execute_nel<A: Send + 'static>(
    conn: &mut dyn Connection,
    sql: &Sql,
    decoder: &(dyn Decoder<A> + Sync),
) -> DbResult<crate::nonempty::NonEmpty<A>> {
    let result: DbResult<crate::nonempty::NonEmpty<A>> = with_statement(conn, sql, false, |conn, stmt| {
        Box::pin(async move {
            let mut rs = conn.execute_query(stmt).await.map_err(|e| DbError::exec_failure(sql, e))?;
            let rows = consume_rows(sql, rs.as_mut(), decoder).await?;
            let _ = rs.close().await;
            crate::nonempty::NonEmpty::from_vec(rows).ok_or_else(|| DbError::unexpected_end(sql))
        })
    })
    .await;
    log_and_finish(conn, sql, result)
}

/// **to[G]** (§4.4 step 5): accumulate all rows into a plain `Vec`; the
/// "factory" capability of the distilled spec collapses to `Vec::push`
/// since Rust has no generic-collection-builder idiom as ambient as
/// Scala's `Factory`. Callers needing a different collection `collect()`
/// the returned `Vec` themselves.
pub async fn execute_to<A: Send + 'static>(conn: &mut dyn Connection, sql: &Sql, decoder: &(dyn Decoder<A> + Sync)) -> DbResult<Vec<A>> {
    let result: DbResult<Vec<A>> = with_statement(conn, sql, false, |conn, stmt| {
        Box::pin(async move {
            let mut rs = conn.execute_query(stmt).await.map_err(|e| DbError::exec_failure(sql, e))?;
            let rows = consume_rows(sql, rs.as_mut(), decoder).await?;
            let _ = rs.close().await;
            Ok(rows)
        })
    })
    .await;
    log_and_finish(conn, sql, result)
}

/// `update(sql) -> DBIO[i32]`: affected row count.
pub async fn execute_update(conn: &mut dyn Connection, sql: &Sql) -> DbResult<i64> {
    let result: DbResult<i64> = with_statement(conn, sql, false, |conn, stmt| {
        Box::pin(async move { conn.execute_update(stmt).await.map_err(|e| DbError::exec_failure(sql, e)) })
    })
    .await;
    log_and_finish(conn, sql, result)
}

/// `returning(sql, decoder) -> DBIO[A]`: the first generated key, read via
/// the same `unique` consumption shape against the generated-keys result
/// set (§4.4 step 5 "returning").
pub async fn execute_returning<A: Send + 'static>(
    conn: &mut dyn Connection,
    sql: &Sql,
    decoder: &(dyn Decoder<A> + Sync),
) -> DbResult<A> {
    let result: DbResult<A> = with_statement(conn, sql, true, |conn, stmt| {
        Box::pin(async move {
            let mut rs = conn
                .get_generated_keys(stmt)
                .await
                .map_err(|e| DbError::exec_failure(sql, e))?;
            let has_row = rs.next().await.map_err(|e| DbError::processing_failure(sql, e))?;
            if !has_row {
                return Err(DbError::unexpected_end(sql));
            }
            let width = rs.column_count();
            let row: Vec<Value> = (1..=width).map(|i| rs.get_value(i)).collect();
            let mut ctx = RowCtx::new(&row, sql.text());
            let value = decoder.decode(1, &mut ctx)?;
            let _ = rs.close().await;
            Ok(value)
        })
    })
    .await;
    log_and_finish(conn, sql, result)
}

/// `stream(sql, decoder, fetch_size, limit)` (§4.3, §4.4.s): pulls rows one
/// at a time from a lazily-advanced cursor, having asked the driver to use
/// `fetch_size` as its row-buffering hint before executing. `limit` caps
/// how many rows are pulled before the cursor is dropped early, modeling
/// the distilled spec's "lazy sequence consumed via take" against this
/// crate's `Connection`-owns-the-cursor-for-one-`interpret()`-call
/// architecture (see DESIGN.md). The cursor is dropped as soon as it stops
/// being read — on reaching `limit`, on exhaustion, or on a decode error —
/// which closes it before `with_statement`'s outer bracket closes the
/// prepared statement (§8 property 9).
pub async fn execute_stream<A: Send + 'static>(
    conn: &mut dyn Connection,
    sql: &Sql,
    decoder: &(dyn Decoder<A> + Sync),
    fetch_size: i64,
    limit: Option<usize>,
) -> DbResult<Vec<A>> {
    if fetch_size <= 0 {
        return Err(DbError::InvariantViolation(format!(
            "fetch_size must be positive, got {fetch_size}"
        )));
    }
    let result: DbResult<Vec<A>> = with_statement(conn, sql, false, |conn, stmt| {
        Box::pin(async move {
            stmt.set_fetch_size(fetch_size);
            let mut rows = conn.open_stream(stmt).await.map_err(|e| DbError::exec_failure(sql, e))?;
            let mut out = Vec::new();
            while limit.map_or(true, |n| out.len() < n) {
                match rows.try_next().await.map_err(|e| DbError::processing_failure(sql, e))? {
                    Some(row) => {
                        let mut ctx = RowCtx::new(&row, sql.text());
                        out.push(decoder.decode(1, &mut ctx)?);
                    }
                    None => break,
                }
            }
            drop(rows);
            Ok(out)
        })
    })
    .await;
    log_and_finish(conn, sql, result)
}

/// `batch_raw(statements) -> DBIO[Array[i32]]` (§8 S6): executes each
/// whole-SQL string in order, stopping at the first failure. The counts
/// gathered so far and the failure are both surfaced: the returned
/// `DbResult` carries the error, but the partial counts are logged in the
/// `ProcessingFailure`'s cause string since `DbResult<Vec<i64>>` cannot
/// carry both a partial `Vec` and an `Err` at once.
pub async fn execute_batch_raw(conn: &mut dyn Connection, statements: &[String]) -> DbResult<Vec<i64>> {
    let combined_sql = Sql::raw(statements.join("; "));
    let outcome = conn.execute_raw_batch(statements).await;
    let result = match outcome.failure {
        None => Ok(outcome.counts),
        Some((i, cause)) => Err(DbError::processing_failure(
            &combined_sql,
            anyhow::anyhow!(
                "statement {i} (\"{}\") failed after {} prior statement(s) succeeded: {cause}",
                statements.get(i).map(String::as_str).unwrap_or(""),
                outcome.counts.len()
            ),
        )),
    };
    log_and_finish(conn, &combined_sql, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::i32_col;
    use crate::testing::{MockConnection, MockRow, MockStatement};

    fn mock(statements: Vec<MockStatement>) -> MockConnection {
        MockConnection::new(statements)
    }

    #[tokio::test]
    async fn unique_fails_on_empty() {
        let mut conn = mock(vec![MockStatement::query("SELECT 1", vec![])]);
        let sql = Sql::raw("SELECT 1");
        let err = execute_unique(&mut conn, &sql, &i32_col()).await.unwrap_err();
        assert!(matches!(err, DbError::UnexpectedEnd { .. }));
    }

    #[tokio::test]
    async fn unique_decodes_first_column() {
        let mut conn = mock(vec![MockStatement::query(
            "SELECT 1",
            vec![MockRow::new(vec![Value::I32(7)])],
        )]);
        let sql = Sql::raw("SELECT 1");
        let value = execute_unique(&mut conn, &sql, &i32_col()).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn option_fails_on_more_than_one_row() {
        let mut conn = mock(vec![MockStatement::query(
            "SELECT 1",
            vec![MockRow::new(vec![Value::I32(1)]), MockRow::new(vec![Value::I32(2)])],
        )]);
        let sql = Sql::raw("SELECT 1");
        let err = execute_option(&mut conn, &sql, &i32_col()).await.unwrap_err();
        assert!(matches!(err, DbError::UnexpectedContinuation { .. }));
    }

    #[tokio::test]
    async fn stream_rejects_non_positive_fetch_size() {
        let mut conn = mock(vec![]);
        let sql = Sql::raw("SELECT 1");
        let err = execute_stream(&mut conn, &sql, &i32_col(), 0, None).await.unwrap_err();
        assert!(matches!(err, DbError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn exactly_one_log_event_per_primitive() {
        let mut conn = mock(vec![MockStatement::query(
            "SELECT 1",
            vec![MockRow::new(vec![Value::I32(1)])],
        )]);
        let sql = Sql::raw("SELECT 1");
        let _ = execute_unique(&mut conn, &sql, &i32_col()).await.unwrap();
        assert_eq!(conn.log_events().len(), 1);
    }

    struct PanicLogHandler;

    impl crate::log::LogHandler for PanicLogHandler {
        fn log(&self, _event: LogEvent) {
            panic!("log sink exploded");
        }
    }

    struct SlowLogHandler;

    impl crate::log::LogHandler for SlowLogHandler {
        fn log(&self, _event: LogEvent) {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    }

    /// §8 property 14: logging is sink-independent. A handler that panics
    /// takes down only the task it runs in, not the already-decided
    /// `DbResult` — dispatch in `log_and_finish` happens strictly after
    /// `result` is computed, so the caller's task panicking here is the
    /// observable effect, not a corrupted or missing `Ok`.
    #[tokio::test]
    async fn panicking_log_handler_does_not_corrupt_already_decided_outcome() {
        let conn = mock(vec![MockStatement::query(
            "SELECT 1",
            vec![MockRow::new(vec![Value::I32(7)])],
        )])
        .with_log_handler(std::sync::Arc::new(PanicLogHandler));

        let join = tokio::spawn(async move {
            let mut conn = conn;
            let sql = Sql::raw("SELECT 1");
            execute_unique(&mut conn, &sql, &i32_col()).await
        });

        let outcome = join.await;
        let err = outcome.expect_err("panicking log handler should panic its own task, not be swallowed");
        assert!(err.is_panic());
    }

    /// A slow handler must not change the decoded result or block it from
    /// being returned; `log_and_finish` only dispatches after `result` is
    /// already decided, so the value below is observed before the sink
    /// ever runs on a live connection.
    #[tokio::test]
    async fn slow_log_handler_does_not_change_decoded_result() {
        let mut conn = mock(vec![MockStatement::query(
            "SELECT 1",
            vec![MockRow::new(vec![Value::I32(42)])],
        )])
        .with_log_handler(std::sync::Arc::new(SlowLogHandler));
        let sql = Sql::raw("SELECT 1");
        let value = execute_unique(&mut conn, &sql, &i32_col()).await.unwrap();
        assert_eq!(value, 42);
    }
}
