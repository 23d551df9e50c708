//! A composable database-program algebra (DBIO) and MySQL interpreter.
//!
//! The core is a free-structured representation of a database computation
//! ([`dbio::Dbio`]) built from typed SQL fragments ([`sql::Sql`]) and
//! column decoders ([`decode::Decoder`]), a statement-lifecycle executor
//! ([`interpreter`]) that runs a `Dbio` against a pluggable
//! [`connection::Connection`], and a [`connector::Connector`] that owns
//! connection acquisition and transaction-mode policy.
//!
//! ```ignore
//! use dbio_mysql::{connector::{Connector, MySqlConnector}, connection::PoolConfig, dbio, decode};
//!
//! let config = PoolConfig::new("localhost", "root", "app");
//! let connector = MySqlConnector::new(config)?;
//! let program = dbio::query_unique(sql, decode::i32_col());
//! let count = connector.read_only(program).await?;
//! ```

pub mod connection;
pub mod connector;
pub mod dbio;
pub mod decode;
pub mod encode;
pub mod error;
pub mod interpreter;
pub mod log;
pub mod nonempty;
pub mod sql;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod scenario_tests;

pub use connector::{Connector, MySqlConnector};
pub use dbio::Dbio;
pub use error::{DbError, DbResult};
pub use value::Value;
