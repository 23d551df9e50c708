//! An in-memory mock `Connection` (§2 ambient stack "Test tooling"): lets
//! scenario tests (§8 S1-S6) exercise the interpreter and connector
//! without a live MySQL server. Gated the same way the source crate gates
//! its own test-only cluster helpers: always available to this crate's
//! own `#[cfg(test)]` modules, and to downstream crates that enable the
//! `testing` feature.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;

use crate::connection::{BatchOutcome, Connection, PreparedStatement, ResultSet, RowStream};
use crate::log::{LogEvent, LogHandler, RecordingLogHandler};
use crate::value::Value;

pub struct MockRow {
    values: Vec<Value>,
}

impl MockRow {
    pub fn new(values: Vec<Value>) -> Self {
        MockRow { values }
    }
}

/// What a scripted statement does when executed. `prepare_statement` is
/// always scripted in call order; the connection does not match on SQL
/// text, matching the teacher's own "itest" pattern of a linear scripted
/// cluster rather than a full query planner.
pub enum MockOutcome {
    Rows(Vec<MockRow>),
    Update(i64),
    GeneratedKey(Value),
    DriverError(String),
}

pub struct MockStatement {
    pub sql: String,
    pub outcome: MockOutcome,
}

impl MockStatement {
    pub fn query(sql: impl Into<String>, rows: Vec<MockRow>) -> Self {
        MockStatement {
            sql: sql.into(),
            outcome: MockOutcome::Rows(rows),
        }
    }

    pub fn update(sql: impl Into<String>, affected: i64) -> Self {
        MockStatement {
            sql: sql.into(),
            outcome: MockOutcome::Update(affected),
        }
    }

    pub fn generated_key(sql: impl Into<String>, key: Value) -> Self {
        MockStatement {
            sql: sql.into(),
            outcome: MockOutcome::GeneratedKey(key),
        }
    }

    pub fn error(sql: impl Into<String>, message: impl Into<String>) -> Self {
        MockStatement {
            sql: sql.into(),
            outcome: MockOutcome::DriverError(message.into()),
        }
    }
}

struct MockResultSet {
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
}

#[async_trait]
impl ResultSet for MockResultSet {
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

/// A lazy row cursor over a scripted row set. Tracks how many rows were
/// actually pulled and whether it was dropped before exhaustion, so tests
/// can assert early-cancellation behavior (§8 property 9, S4) the same
/// way they'd assert against a real driver cursor.
struct MockRowStream {
    rows: VecDeque<Vec<Value>>,
    pulled: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Stream for MockRowStream {
    type Item = anyhow::Result<Vec<Value>>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rows.pop_front() {
            Some(row) => {
                this.pulled.fetch_add(1, Ordering::SeqCst);
                Poll::Ready(Some(Ok(row)))
            }
            None => Poll::Ready(None),
        }
    }
}

impl Drop for MockRowStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A linear script of statements, consumed in call order (§2 ambient
/// stack "Test tooling").
pub struct MockConnection {
    scripted: VecDeque<MockStatement>,
    log: Arc<RecordingLogHandler>,
    override_log: Option<Arc<dyn LogHandler>>,
    read_only: bool,
    auto_commit: bool,
    committed: u32,
    rolled_back: u32,
    last_fetch_size: Option<i64>,
    stream_pulled: Arc<AtomicUsize>,
    stream_closed: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn new(statements: Vec<MockStatement>) -> Self {
        MockConnection {
            scripted: statements.into(),
            log: Arc::new(RecordingLogHandler::new()),
            override_log: None,
            read_only: false,
            auto_commit: true,
            committed: 0,
            rolled_back: 0,
            last_fetch_size: None,
            stream_pulled: Arc::new(AtomicUsize::new(0)),
            stream_closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the sink `log_handler()` hands to the interpreter, for
    /// exercising §8 property 14 ("logging is sink-independent") with a
    /// handler that panics or sleeps. `log_events()` keeps reading the
    /// internal `RecordingLogHandler`, which no longer receives events
    /// once this is set.
    pub fn with_log_handler(mut self, handler: Arc<dyn LogHandler>) -> Self {
        self.override_log = Some(handler);
        self
    }

    pub fn log_events(&self) -> Vec<LogEvent> {
        self.log.events()
    }

    /// The `fetch_size` hint most recently seen by `open_stream`, for
    /// asserting the driver was told about it before execution (§8 S4).
    pub fn last_fetch_size(&self) -> Option<i64> {
        self.last_fetch_size
    }

    /// Rows actually pulled off the most recent `open_stream` cursor (§8 S4).
    pub fn stream_rows_pulled(&self) -> usize {
        self.stream_pulled.load(Ordering::SeqCst)
    }

    /// Whether the most recent `open_stream` cursor has been dropped,
    /// i.e. closed (§8 property 9).
    pub fn stream_closed(&self) -> bool {
        self.stream_closed.load(Ordering::SeqCst)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn commit_count(&self) -> u32 {
        self.committed
    }

    pub fn rollback_count(&self) -> u32 {
        self.rolled_back
    }

    fn next_scripted(&mut self) -> anyhow::Result<MockStatement> {
        self.scripted
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("mock connection script exhausted"))
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn prepare_statement(&mut self, sql: &str, return_keys: bool) -> anyhow::Result<PreparedStatement> {
        let scripted = self.next_scripted()?;
        if let MockOutcome::DriverError(msg) = &scripted.outcome {
            anyhow::bail!("{msg}");
        }
        Ok(PreparedStatement::new(sql, Box::new(scripted.outcome) as Box<dyn Any + Send>, return_keys))
    }

    async fn execute_query(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<Box<dyn ResultSet>> {
        match stmt.handle_mut::<MockOutcome>() {
            Some(MockOutcome::Rows(rows)) => Ok(Box::new(MockResultSet {
                rows: rows.iter().map(|r| r.values.clone()).collect(),
                cursor: None,
            })),
            _ => anyhow::bail!("scripted statement is not a query"),
        }
    }

    async fn execute_update(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<i64> {
        match stmt.handle_mut::<MockOutcome>() {
            Some(MockOutcome::Update(n)) => Ok(*n),
            _ => anyhow::bail!("scripted statement is not an update"),
        }
    }

    async fn get_generated_keys(&mut self, stmt: &mut PreparedStatement) -> anyhow::Result<Box<dyn ResultSet>> {
        match stmt.handle_mut::<MockOutcome>() {
            Some(MockOutcome::GeneratedKey(v)) => Ok(Box::new(MockResultSet {
                rows: vec![vec![v.clone()]],
                cursor: None,
            })),
            _ => anyhow::bail!("scripted statement has no generated key"),
        }
    }

    async fn close_statement(&mut self, _stmt: &mut PreparedStatement) -> anyhow::Result<()> {
        Ok(())
    }

    fn open_stream<'a>(
        &'a mut self,
        stmt: &'a mut PreparedStatement,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<RowStream<'a>>> + Send + 'a>> {
        Box::pin(async move {
            self.last_fetch_size = stmt.fetch_size();
            let rows: VecDeque<Vec<Value>> = match stmt.handle_mut::<MockOutcome>() {
                Some(MockOutcome::Rows(rows)) => rows.iter().map(|r| r.values.clone()).collect(),
                _ => anyhow::bail!("scripted statement is not a query"),
            };
            self.stream_pulled.store(0, Ordering::SeqCst);
            self.stream_closed.store(false, Ordering::SeqCst);
            let stream = MockRowStream {
                rows,
                pulled: self.stream_pulled.clone(),
                closed: self.stream_closed.clone(),
            };
            Ok(Box::pin(stream) as RowStream<'a>)
        })
    }

    async fn execute_raw_batch(&mut self, statements: &[String]) -> BatchOutcome {
        let mut counts = Vec::with_capacity(statements.len());
        for (i, _) in statements.iter().enumerate() {
            match self.next_scripted() {
                Ok(MockStatement {
                    outcome: MockOutcome::Update(n),
                    ..
                }) => counts.push(n),
                Ok(MockStatement {
                    outcome: MockOutcome::DriverError(msg),
                    ..
                }) => return BatchOutcome { counts, failure: Some((i, anyhow::anyhow!(msg))) },
                Ok(_) => return BatchOutcome { counts, failure: Some((i, anyhow::anyhow!("scripted statement is not an update"))) },
                Err(e) => return BatchOutcome { counts, failure: Some((i, e)) },
            }
        }
        BatchOutcome { counts, failure: None }
    }

    async fn set_read_only(&mut self, read_only: bool) -> anyhow::Result<()> {
        self.read_only = read_only;
        Ok(())
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> anyhow::Result<()> {
        self.auto_commit = auto_commit;
        Ok(())
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        self.committed += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        self.rolled_back += 1;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn log_handler(&self) -> Arc<dyn LogHandler> {
        self.override_log.clone().unwrap_or_else(|| self.log.clone())
    }
}
