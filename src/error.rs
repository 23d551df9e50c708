//! Error taxonomy (§7).
//!
//! Every error the core itself raises is a variant of [`DbError`]. Driver
//! errors from the first-party `mysql_async` adapter are wrapped into
//! `DbError::Exec`/`DbError::Processing` with `anyhow::Error` as the boxed
//! cause, in the same spirit as the source crate wrapping `mysql_async`
//! errors with `anyhow::Context`.

use std::fmt;

use thiserror::Error;

use crate::sql::Sql;

/// The column-offset/expected-type/cause bundle carried by a failed decode.
#[derive(Debug)]
pub struct DecodeError {
    pub column: usize,
    pub expected: &'static str,
    pub cause: String,
    pub statement: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to decode column {} as {}: {} (statement: {})",
            self.column, self.expected, self.cause, self.statement
        )
    }
}

impl std::error::Error for DecodeError {}

/// The error taxonomy of §7, as one `thiserror`-derived enum.
#[derive(Error, Debug)]
pub enum DbError {
    /// Aggregated encoder failure messages, surfaced at binding time before
    /// any driver call is made.
    #[error("failed to encode parameters: {}", .messages.join("; "))]
    Encoding { messages: Vec<String> },

    /// A driver error raised by execute/binding itself, before or during
    /// statement execution.
    #[error("statement execution failed: {cause}")]
    ExecFailure {
        sql: String,
        #[source]
        cause: anyhow::Error,
    },

    /// An error raised while consuming rows after execution began
    /// (malformed driver response, or see [`DbError::Decode`]).
    #[error("failed while consuming results: {cause}")]
    ProcessingFailure {
        sql: String,
        #[source]
        cause: anyhow::Error,
    },

    /// A decoder failed to interpret a column (sub-kind of `ProcessingFailure`
    /// per §7, kept as its own variant so callers can match on it precisely).
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// `query_unique`/`query_nel`/`returning` expected at least one row.
    #[error("expected at least one row for statement: {sql}")]
    UnexpectedEnd { sql: String },

    /// `query_option` expected at most one row but found more.
    #[error("expected at most one row for statement: {sql}")]
    UnexpectedContinuation { sql: String },

    /// A caller bug: non-positive fetch size, use-after-close, etc.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The host cancellation signal fired while a DBIO program was
    /// suspended at an I/O boundary. Reserved for a connection model that
    /// can observe cancellation of its own await points; `Connector::transaction`
    /// runs `program.interpret` as a plain interruptible await and never
    /// constructs this variant (see its doc comment).
    #[error("operation was cancelled")]
    CancellationObserved,
}

impl DbError {
    pub fn encoding(messages: Vec<String>) -> Self {
        debug_assert!(!messages.is_empty());
        DbError::Encoding { messages }
    }

    pub fn exec_failure(sql: &Sql, cause: impl Into<anyhow::Error>) -> Self {
        DbError::ExecFailure {
            sql: sql.text().to_owned(),
            cause: cause.into(),
        }
    }

    pub fn processing_failure(sql: &Sql, cause: impl Into<anyhow::Error>) -> Self {
        DbError::ProcessingFailure {
            sql: sql.text().to_owned(),
            cause: cause.into(),
        }
    }

    pub fn unexpected_end(sql: &Sql) -> Self {
        DbError::UnexpectedEnd {
            sql: sql.text().to_owned(),
        }
    }

    pub fn unexpected_continuation(sql: &Sql) -> Self {
        DbError::UnexpectedContinuation {
            sql: sql.text().to_owned(),
        }
    }

    /// True for the kinds of failure that happened while rows were already
    /// streaming in, used by the interpreter to choose between
    /// `LogEvent::ExecFailure` and `LogEvent::ProcessingFailure` (§4.4 step 7).
    pub fn is_processing_failure(&self) -> bool {
        matches!(
            self,
            DbError::ProcessingFailure { .. }
                | DbError::Decode(_)
                | DbError::UnexpectedEnd { .. }
                | DbError::UnexpectedContinuation { .. }
        )
    }
}

pub type DbResult<T> = Result<T, DbError>;
