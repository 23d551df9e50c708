//! The pluggable `Connection`/`PreparedStatement`/`ResultSet` capability
//! (§6) plus the one first-party adapter the core ships: a `mysql_async`
//! backed implementation (§4.6), built the way the source crate's
//! `connection.rs` wraps a `mysql_async::Conn` — a `with_timeout` future
//! combinator around every driver call, binary protocol by default.
//!
//! Parameter binding is split from execution here: setters on
//! [`PreparedStatement`] are plain local buffer writes (no I/O, so no
//! `async`), and only the `Connection` methods that actually touch the
//! wire are `async`. This collapses the distilled spec's thirteen typed
//! `set_T` methods into one `set_value(index, &Value)` dispatch, since
//! `Value` already carries its own type tag — a JDBC-style driver needs
//! thirteen overloads to recover what a Rust enum already expresses.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use futures::future::select;
use futures::pin_mut;
use futures::{Stream, StreamExt, TryStreamExt};
use futures_async_stream::try_stream;
use mysql_async::prelude::Queryable;

use crate::log::LogHandler;
use crate::value::Value;

/// A lazy row cursor returned by [`Connection::open_stream`] (§4.4.s):
/// borrows the connection for as long as rows are pulled, so dropping it
/// early — on `take`-style early cancellation, or on error — asks the
/// driver for no further rows.
pub type RowStream<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<Vec<Value>>> + Send + 'a>>;

/// A forward-only row cursor (§3 "ResultSet"). Unlike the JDBC-flavored
/// `getX`+`wasNull` pattern the distilled spec describes, this adapter
/// returns a fully-decoded [`Value`] (with an explicit `Null` variant) per
/// column, which sidesteps a separate stateful `was_null()` query: the
/// interpreter materializes a row into `Vec<Value>` and hands it to
/// `decode::RowCtx`, which tracks "last read" itself.
#[async_trait]
pub trait ResultSet: Send {
    /// Advances the cursor. Returns `false` at end of rows.
    async fn next(&mut self) -> anyhow::Result<bool>;

    fn column_count(&self) -> usize;

    /// 1-based column access into the current row.
    fn get_value(&self, index: usize) -> Value;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// A compiled SQL template with positional parameter slots (§3
/// "PreparedStatement"). `handle` is an adapter-opaque driver resource
/// (e.g. a `mysql_async::Statement`); the generic interpreter never
/// inspects it, only a `Connection` impl does, via [`PreparedStatement::handle_mut`].
pub struct PreparedStatement {
    sql: String,
    handle: Box<dyn Any + Send>,
    params: Vec<Value>,
    fetch_size: Option<i64>,
    return_keys: bool,
}

impl PreparedStatement {
    pub fn new(sql: impl Into<String>, handle: Box<dyn Any + Send>, return_keys: bool) -> Self {
        PreparedStatement {
            sql: sql.into(),
            handle,
            params: Vec::new(),
            fetch_size: None,
            return_keys,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn return_keys(&self) -> bool {
        self.return_keys
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn fetch_size(&self) -> Option<i64> {
        self.fetch_size
    }

    pub fn handle_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.handle.downcast_mut()
    }

    /// Dispatch point the interpreter calls for every `Parameter::Dynamic`
    /// entry (§4.4 step 3), 1-based `index`, covering every member of the
    /// supported primitive set including `Value::Null`.
    pub fn set_value(&mut self, index: usize, v: Value) {
        if self.params.len() < index {
            self.params.resize(index, Value::Null);
        }
        self.params[index - 1] = v;
    }

    pub fn set_fetch_size(&mut self, n: i64) {
        self.fetch_size = Some(n);
    }
}

/// The outcome of `batch_raw`: counts for every statement that completed,
/// plus the first failure encountered (index into the original list and
/// its cause), matching S6's "partial outcome" shape.
pub struct BatchOutcome {
    pub counts: Vec<i64>,
    pub failure: Option<(usize, anyhow::Error)>,
}

/// The capability a DBIO is interpreted against (§3 "Connection"). Only
/// one logical statement is ever in flight on a given connection; the
/// `Connector` guarantees exclusivity (§5).
#[async_trait]
pub trait Connection: Send {
    async fn prepare_statement(&mut self, sql: &str, return_keys: bool) -> anyhow::Result<PreparedStatement>;
    async fn execute_query(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<Box<dyn ResultSet>>;
    async fn execute_update(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<i64>;
    async fn get_generated_keys(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<Box<dyn ResultSet>>;
    async fn close_statement(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<()>;

    /// `batch_raw`: execute each statement in order, stopping at the
    /// first failure (§8 S6).
    async fn execute_raw_batch(&mut self, statements: &[String]) -> BatchOutcome;

    async fn set_read_only(&mut self, read_only: bool) -> anyhow::Result<()>;
    async fn set_auto_commit(&mut self, auto_commit: bool) -> anyhow::Result<()>;
    async fn commit(&mut self) -> anyhow::Result<()>;
    async fn rollback(&mut self) -> anyhow::Result<()>;
    async fn close(&mut self) -> anyhow::Result<()>;
    fn log_handler(&self) -> Arc<dyn LogHandler>;

    /// Backs `stream(sql, decoder, fetch_size)` (§4.4.s): opens a row
    /// cursor that pulls one row at a time off the wire rather than
    /// collecting the whole result set up front. Written by hand rather
    /// than through `#[async_trait]` (as `Connector::with_connection`
    /// already is, for the same reason): the returned `RowStream` borrows
    /// `self` for as long as it's alive, a lifetime `async_trait`'s
    /// default desugaring doesn't thread through cleanly once the output
    /// itself is a trait object with its own elided lifetime.
    fn open_stream<'a>(&'a mut self, stmt: &'a mut PreparedStatement) -> Pin<Box<dyn Future<Output = anyhow::Result<RowStream<'a>>> + Send + 'a>>;
}

/// Races a driver future against a timeout, turning an elapsed timeout
/// into an `anyhow::Error`. Mirrors the source crate's `with_timeout`
/// combinator in `connection.rs`, minus its cluster/runtime-specific
/// disconnection bookkeeping.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> anyhow::Result<T>
where
    F: std::future::Future<Output = anyhow::Result<T>>,
{
    let sleep = tokio::time::sleep(duration);
    pin_mut!(fut);
    pin_mut!(sleep);
    match select(fut, sleep).await {
        futures::future::Either::Left((result, _)) => result,
        futures::future::Either::Right((_, _)) => Err(anyhow::anyhow!("statement timed out after {duration:?}")),
    }
}

/// Programmatic pool configuration (§2 ambient stack "Configuration"): no
/// environment variables, no CLI, no on-disk state. Mirrors the shape of
/// the source crate's `ConvexMySqlPool`/`MySqlOptions` construction,
/// stripped to the concerns this core actually owns.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub min_connections: usize,
    pub max_connections: usize,
    pub statement_timeout: Duration,
    pub default_fetch_size: i64,
}

impl PoolConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, database: impl Into<String>) -> Self {
        PoolConfig {
            host: host.into(),
            port: 3306,
            user: user.into(),
            password: String::new(),
            database: database.into(),
            min_connections: 1,
            max_connections: 10,
            statement_timeout: Duration::from_secs(30),
            default_fetch_size: 1000,
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn pool_size(mut self, min: usize, max: usize) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn default_fetch_size(mut self, n: i64) -> Self {
        self.default_fetch_size = n;
        self
    }

    /// §8 property 13: a zero-sized pool or non-positive default fetch
    /// size is a caller error surfaced before any connection is attempted.
    pub fn validate(&self) -> Result<(), crate::error::DbError> {
        if self.max_connections == 0 {
            return Err(crate::error::DbError::InvariantViolation(
                "PoolConfig.max_connections must be positive".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(crate::error::DbError::InvariantViolation(
                "PoolConfig.min_connections must not exceed max_connections".to_string(),
            ));
        }
        if self.default_fetch_size <= 0 {
            return Err(crate::error::DbError::InvariantViolation(
                "PoolConfig.default_fetch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn to_opts(&self) -> mysql_async::Opts {
        let constraints = mysql_async::PoolConstraints::new(self.min_connections, self.max_connections)
            .unwrap_or_else(|| mysql_async::PoolConstraints::new(1, 1).expect("1, 1 is always a valid pool constraint"));
        let mut builder = mysql_async::OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .db_name(Some(self.database.clone()))
            .pool_opts(mysql_async::PoolOpts::default().with_constraints(constraints));
        if !self.password.is_empty() {
            builder = builder.pass(Some(self.password.clone()));
        }
        mysql_async::Opts::from(builder)
    }
}

fn value_to_mysql(v: &Value) -> mysql_async::Value {
    match v {
        Value::Bool(b) => mysql_async::Value::Int(*b as i64),
        Value::I8(x) => mysql_async::Value::Int(*x as i64),
        Value::I16(x) => mysql_async::Value::Int(*x as i64),
        Value::I32(x) => mysql_async::Value::Int(*x as i64),
        Value::I64(x) => mysql_async::Value::Int(*x),
        Value::F32(x) => mysql_async::Value::Float(*x),
        Value::F64(x) => mysql_async::Value::Double(*x),
        Value::Decimal(x) => mysql_async::Value::Bytes(x.to_string().into_bytes()),
        Value::String(x) => mysql_async::Value::Bytes(x.clone().into_bytes()),
        Value::Bytes(x) => mysql_async::Value::Bytes(x.clone()),
        Value::Date(d) => mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => mysql_async::Value::Time(false, 0, t.hour() as u8, t.minute() as u8, t.second() as u8, 0),
        Value::DateTime(dt) => mysql_async::Value::Date(
            dt.date().year() as u16,
            dt.date().month() as u8,
            dt.date().day() as u8,
            dt.time().hour() as u8,
            dt.time().minute() as u8,
            dt.time().second() as u8,
            0,
        ),
        Value::Null => mysql_async::Value::NULL,
    }
}

fn mysql_to_value(v: &mysql_async::Value) -> Value {
    match v {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(i) => Value::I64(*i),
        mysql_async::Value::UInt(u) => Value::I64(*u as i64),
        mysql_async::Value::Float(f) => Value::F32(*f),
        mysql_async::Value::Double(d) => Value::F64(*d),
        mysql_async::Value::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        mysql_async::Value::Date(y, mo, d, h, mi, s, _) if *h == 0 && *mi == 0 && *s == 0 => Value::Date(
            chrono::NaiveDate::from_ymd_opt(*y as i32, *mo as u32, *d as u32)
                .unwrap_or_else(|| chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
        ),
        mysql_async::Value::Date(y, mo, d, h, mi, s, _) => {
            let date = chrono::NaiveDate::from_ymd_opt(*y as i32, *mo as u32, *d as u32)
                .unwrap_or_else(|| chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
            let time = chrono::NaiveTime::from_hms_opt(*h as u32, *mi as u32, *s as u32)
                .unwrap_or_else(|| chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap());
            Value::DateTime(chrono::NaiveDateTime::new(date, time))
        }
        mysql_async::Value::Time(_neg, d, h, mi, s, _) => {
            let hours = (*d as u32 * 24 + *h as u32) % 24;
            Value::Time(
                chrono::NaiveTime::from_hms_opt(hours, *mi as u32, *s as u32)
                    .unwrap_or_else(|| chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
            )
        }
    }
}

fn row_to_values(row: &mysql_async::Row) -> Vec<Value> {
    (0..row.len())
        .map(|i| row.as_ref(i).map(mysql_to_value).unwrap_or(Value::Null))
        .collect()
}

struct MaterializedResultSet {
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
}

#[async_trait]
impl ResultSet for MaterializedResultSet {
    async fn next(&mut self) -> anyhow::Result<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.rows.len() {
            self.cursor = Some(next);
            Ok(true)
        } else {
            self.cursor = Some(self.rows.len());
            Ok(false)
        }
    }

    fn column_count(&self) -> usize {
        self.cursor.and_then(|c| self.rows.get(c)).map(Vec::len).unwrap_or(0)
    }

    fn get_value(&self, index: usize) -> Value {
        self.cursor
            .and_then(|c| self.rows.get(c))
            .and_then(|row| row.get(index - 1))
            .cloned()
            .unwrap_or(Value::Null)
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The `mysql_async`-backed `Connection` (§4.6). Binary (prepared
/// statement) protocol only; there is no text-protocol/`@db_name`
/// splicing path because this core's `Sql` model never interpolates a
/// schema name.
pub struct MySqlConnection {
    conn: mysql_async::Conn,
    timeout: Duration,
    log_handler: Arc<dyn LogHandler>,
}

impl MySqlConnection {
    pub fn new(conn: mysql_async::Conn, timeout: Duration, log_handler: Arc<dyn LogHandler>) -> Self {
        MySqlConnection {
            conn,
            timeout,
            log_handler,
        }
    }

    fn params_of(stmt: &PreparedStatement) -> mysql_async::Params {
        mysql_async::Params::Positional(stmt.params().iter().map(value_to_mysql).collect())
    }
}

/// Pulls rows one at a time off the wire via `exec_iter`, yielding each as
/// soon as it arrives, matching the source crate's `wrap_query_stream`.
/// Dropping the stream before it's exhausted drops the `QueryResult`
/// inside mid-generator, so the driver is asked for no further rows.
#[try_stream(ok = Vec<Value>, error = anyhow::Error)]
async fn wrap_row_stream(conn: &mut mysql_async::Conn, stmt: mysql_async::Statement, params: mysql_async::Params) {
    let mut result = conn.exec_iter(stmt, params).await?;
    while let Some(row) = result.try_next().await? {
        yield row_to_values(&row);
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn prepare_statement(&mut self, sql: &str, return_keys: bool) -> anyhow::Result<PreparedStatement> {
        let timeout = self.timeout;
        let conn = &mut self.conn;
        let stmt = with_timeout(timeout, async { Ok(conn.prep(sql).await?) }).await?;
        Ok(PreparedStatement::new(sql, Box::new(stmt), return_keys))
    }

    async fn execute_query(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<Box<dyn ResultSet>> {
        let params = Self::params_of(stmt);
        let timeout = self.timeout;
        let driver_stmt = stmt
            .handle_mut::<mysql_async::Statement>()
            .ok_or_else(|| anyhow::anyhow!("statement handle is not a mysql_async::Statement"))?
            .clone();
        let conn = &mut self.conn;
        let rows: Vec<mysql_async::Row> = with_timeout(timeout, async { Ok(conn.exec(&driver_stmt, params).await?) }).await?;
        Ok(Box::new(MaterializedResultSet {
            rows: rows.iter().map(row_to_values).collect(),
            cursor: None,
        }))
    }

    async fn execute_update(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<i64> {
        let params = Self::params_of(stmt);
        let timeout = self.timeout;
        let driver_stmt = stmt
            .handle_mut::<mysql_async::Statement>()
            .ok_or_else(|| anyhow::anyhow!("statement handle is not a mysql_async::Statement"))?
            .clone();
        let conn = &mut self.conn;
        with_timeout(timeout, async {
            conn.exec_drop(&driver_stmt, params).await?;
            Ok(conn.affected_rows() as i64)
        })
        .await
    }

    async fn get_generated_keys(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<Box<dyn ResultSet>> {
        debug_assert!(stmt.return_keys(), "get_generated_keys called without return_keys mode");
        let last_id = self.execute_update(stmt).await.map(|_| self.conn.last_insert_id())?;
        Ok(Box::new(MaterializedResultSet {
            rows: vec![vec![Value::I64(last_id.unwrap_or(0) as i64)]],
            cursor: None,
        }))
    }

    async fn close_statement(&mut self, _stmt: &mut PreparedStatement) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute_raw_batch(&mut self, statements: &[String]) -> BatchOutcome {
        let mut counts = Vec::with_capacity(statements.len());
        for (i, sql) in statements.iter().enumerate() {
            let result = with_timeout(self.timeout, async { Ok(self.conn.query_drop(sql).await?) }).await;
            match result {
                Ok(()) => counts.push(self.conn.affected_rows() as i64),
                Err(e) => {
                    return BatchOutcome {
                        counts,
                        failure: Some((i, e)),
                    }
                }
            }
        }
        BatchOutcome { counts, failure: None }
    }

    async fn set_read_only(&mut self, read_only: bool) -> anyhow::Result<()> {
        let sql = if read_only {
            "SET SESSION TRANSACTION READ ONLY"
        } else {
            "SET SESSION TRANSACTION READ WRITE"
        };
        with_timeout(self.timeout, async { Ok(self.conn.query_drop(sql).await?) }).await
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> anyhow::Result<()> {
        let sql = if auto_commit { "SET autocommit=1" } else { "SET autocommit=0" };
        with_timeout(self.timeout, async { Ok(self.conn.query_drop(sql).await?) }).await
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        with_timeout(self.timeout, async { Ok(self.conn.query_drop("COMMIT").await?) }).await
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        with_timeout(self.timeout, async { Ok(self.conn.query_drop("ROLLBACK").await?) }).await
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn log_handler(&self) -> Arc<dyn LogHandler> {
        self.log_handler.clone()
    }

    fn open_stream<'a>(&'a mut self, stmt: &'a mut PreparedStatement) -> Pin<Box<dyn Future<Output = anyhow::Result<RowStream<'a>>> + Send + 'a>> {
        Box::pin(async move {
            let params = Self::params_of(stmt);
            let driver_stmt = stmt
                .handle_mut::<mysql_async::Statement>()
                .ok_or_else(|| anyhow::anyhow!("statement handle is not a mysql_async::Statement"))?
                .clone();
            Ok(wrap_row_stream(&mut self.conn, driver_stmt, params).boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PoolConfig {
        PoolConfig::new("localhost", "root", "app")
    }

    #[test]
    fn validate_rejects_zero_max_connections() {
        let err = config().pool_size(1, 0).validate().unwrap_err();
        assert!(matches!(err, crate::error::DbError::InvariantViolation(_)));
    }

    #[test]
    fn validate_rejects_min_exceeding_max() {
        let err = config().pool_size(5, 1).validate().unwrap_err();
        assert!(matches!(err, crate::error::DbError::InvariantViolation(_)));
    }

    #[test]
    fn validate_rejects_non_positive_fetch_size() {
        let err = config().default_fetch_size(0).validate().unwrap_err();
        assert!(matches!(err, crate::error::DbError::InvariantViolation(_)));
    }

    #[test]
    fn validate_accepts_defaults() {
        config().validate().unwrap();
    }
}
