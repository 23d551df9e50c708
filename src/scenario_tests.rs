//! End-to-end scenarios (S1-S6) run against the in-memory mock
//! `Connection`/`Connector`, plus `proptest`-based codec law checks,
//! matching the teacher's own colocated `tests.rs` convention but
//! substituting the mock for a live cluster.

use proptest::prelude::*;

use crate::connection::Connection;
use crate::connector::Connector;
use crate::dbio;
use crate::decode::{i32_col, i64_col, string_col};
use crate::encode::Encode;
use crate::error::{DbError, DbResult};
use crate::log::LogEvent;
use crate::sql::bind;
use crate::testing::{MockConnection, MockRow, MockStatement};
use crate::value::Value;

/// A `Connector` over a fixed, already-constructed `Connection`. Kept as
/// its own small test double here (rather than reused from
/// `connector`'s private test module) so each scenario stays
/// self-contained.
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
async fn s1_option_decodes_tuple_and_logs_success() {
    let connector = SingleConnector::new(MockConnection::new(vec![MockStatement::query(
        "SELECT name, email FROM user WHERE id = ?",
        vec![MockRow::new(vec![Value::String("Alice".into()), Value::String("a@x".into())])],
    )]));
    let query = crate::sql!("SELECT name, email FROM user WHERE id = ", bind(1i32));
    let program = dbio::query_option(query, string_col().zip(string_col()));
    let result = connector.read_only(program).await.unwrap();
    assert_eq!(result, Some(("Alice".to_string(), "a@x".to_string())));

    let guard = connector.conn.lock().await;
    let events = guard.log_events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        LogEvent::Success { params, .. } => assert_eq!(params, &vec!["1".to_string()]),
        other => panic!("expected Success, got {other:?}"),
    }
    assert!(!guard.is_read_only());
}

#[tokio::test]
async fn s2_unique_on_empty_fails_and_logs_processing_failure() {
    let connector = SingleConnector::new(MockConnection::new(vec![MockStatement::query(
        "SELECT name FROM user WHERE id = ?",
        vec![],
    )]));
    let query = crate::sql!("SELECT name FROM user WHERE id = ", bind(999i32));
    let program = dbio::query_unique(query, string_col());
    let result = connector.read_only(program).await;
    assert!(matches!(result, Err(DbError::UnexpectedEnd { .. })));

    let guard = connector.conn.lock().await;
    let events = guard.log_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], LogEvent::ProcessingFailure { .. }));
    assert!(guard.is_auto_commit());
}

#[tokio::test]
async fn s3_transaction_rolls_back_on_third_statement_failure() {
    let connector = SingleConnector::new(MockConnection::new(vec![
        MockStatement::update("INSERT INTO user(name,email) VALUES (\"C\",\"c@x\")", 1),
        MockStatement::update("UPDATE user SET email=\"c2@x\" WHERE name=\"C\"", 1),
        MockStatement::error("UPDATE user SET email=1/0 WHERE name=\"C\"", "division by zero"),
    ]));
    let program = dbio::update(crate::sql::Sql::raw("INSERT INTO user(name,email) VALUES (\"C\",\"c@x\")"))
        .flat_map(|_| dbio::update(crate::sql::Sql::raw("UPDATE user SET email=\"c2@x\" WHERE name=\"C\"")))
        .flat_map(|_| dbio::update(crate::sql::Sql::raw("UPDATE user SET email=1/0 WHERE name=\"C\"")));
    let result = connector.transaction(program).await;
    assert!(result.is_err());

    let guard = connector.conn.lock().await;
    assert_eq!(guard.commit_count(), 0);
    assert_eq!(guard.rollback_count(), 1);
    assert!(guard.is_auto_commit());
}

#[tokio::test]
async fn s4_stream_honors_fetch_size_and_materializes_all_rows() {
    let connector = SingleConnector::new(MockConnection::new(vec![MockStatement::query(
        "SELECT id FROM user ORDER BY id",
        vec![
            MockRow::new(vec![Value::I32(1)]),
            MockRow::new(vec![Value::I32(2)]),
            MockRow::new(vec![Value::I32(3)]),
            MockRow::new(vec![Value::I32(4)]),
            MockRow::new(vec![Value::I32(5)]),
        ],
    )]));
    let program = dbio::stream_take(crate::sql::Sql::raw("SELECT id FROM user ORDER BY id"), i32_col(), 1, 2);
    let rows = connector.run(program).await.unwrap();
    assert_eq!(rows, vec![1, 2]);

    let guard = connector.conn.lock().await;
    assert_eq!(guard.last_fetch_size(), Some(1));
    assert_eq!(guard.stream_rows_pulled(), 2);
    assert!(guard.stream_closed());
}

#[tokio::test]
async fn s5_returning_then_read_back() {
    let connector = SingleConnector::new(MockConnection::new(vec![
        MockStatement::generated_key("INSERT INTO user(name,email) VALUES (?, ?)", Value::I64(3)),
        MockStatement::query("SELECT name FROM user WHERE id = ?", vec![MockRow::new(vec![Value::String("D".into())])]),
    ]));
    let insert = crate::sql!("INSERT INTO user(name,email) VALUES (", bind("D"), ", ", bind("d@x"), ")");
    let new_id = connector.run(dbio::returning(insert, i64_col())).await.unwrap();
    assert_eq!(new_id, 3);

    let select = crate::sql!("SELECT name FROM user WHERE id = ", bind(new_id as i32));
    let name = connector.run(dbio::query_unique(select, string_col())).await.unwrap();
    assert_eq!(name, "D");
}

#[tokio::test]
async fn s6_batch_raw_partial_outcome() {
    let connector = SingleConnector::new(MockConnection::new(vec![
        MockStatement::update("CREATE TABLE t(id INT)", 0),
        MockStatement::error("INSERT INTO t VALUES (1)", "duplicate key"),
    ]));
    let statements = vec![
        "CREATE TABLE t(id INT)".to_string(),
        "INSERT INTO t VALUES (1)".to_string(),
        "INSERT INTO t VALUES (2)".to_string(),
    ];
    let result = connector.run(dbio::batch_raw(statements)).await;
    assert!(matches!(result, Err(DbError::ProcessingFailure { .. })));

    let guard = connector.conn.lock().await;
    let events = guard.log_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], LogEvent::ProcessingFailure { .. }));
}

proptest! {
    /// §8 property: product associativity — `(a.zip(b)).zip(c)`'s decoded
    /// shape carries the same values as `a.zip(b.zip(c))`, just re-bracketed.
    #[test]
    fn zip_is_associative_in_offset(a in any::<i32>(), b in any::<i32>(), c in any::<bool>()) {
        use crate::decode::{bool_col, Decoder, RowCtx};
        let row = vec![Value::I32(a), Value::I32(b), Value::Bool(c)];
        let left = i32_col().zip(i32_col()).zip(bool_col());
        let right = i32_col().zip(i32_col().zip(bool_col()));
        prop_assert_eq!(left.offset(), right.offset());

        let mut ctx1 = RowCtx::new(&row, "t");
        let ((da, db), dc) = left.decode(1, &mut ctx1).unwrap();
        let mut ctx2 = RowCtx::new(&row, "t");
        let (da2, (db2, dc2)) = right.decode(1, &mut ctx2).unwrap();
        prop_assert_eq!((da, db, dc), (da2, db2, dc2));
    }

    /// §8 property: encoding then decoding a primitive round-trips.
    #[test]
    fn i32_round_trips_through_encode_decode(n in any::<i32>()) {
        use crate::decode::{Decoder, RowCtx};
        let encoded = n.encode();
        let values = encoded.values().unwrap().to_vec();
        let mut ctx = RowCtx::new(&values, "t");
        let decoded = i32_col().decode(1, &mut ctx).unwrap();
        prop_assert_eq!(decoded, n);
    }

    /// §8 property: `map(d, identity) == d` for any input row.
    #[test]
    fn map_identity_preserves_decoded_value(n in any::<i32>()) {
        use crate::decode::{Decoder, RowCtx};
        let row = vec![Value::I32(n)];
        let mut ctx1 = RowCtx::new(&row, "t");
        let base = i32_col().decode(1, &mut ctx1).unwrap();
        let mut ctx2 = RowCtx::new(&row, "t");
        let mapped = i32_col().map(|x| x).decode(1, &mut ctx2).unwrap();
        prop_assert_eq!(base, mapped);
    }
}
