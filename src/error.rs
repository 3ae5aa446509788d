//! Error and Result types.
//!
//! The taxonomy here mirrors the one the driver this core descends from
//! exposes to callers (`InterfaceError`, `ProgrammingError`, `DataError`,
//! ...): one variant per kind rather than one type per kind, the same way
//! `sqlx_core::Error` folds all of its error surface into a single enum.

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::io;

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    /// The cursor, connection, or COPY session is closed, or the connection
    /// is not in a usable state.
    InterfaceError(String),

    /// The caller asked for an operation that doesn't match the current
    /// result state (e.g. `fetchone()` without a `TuplesOk` result, or
    /// `copy()` on a statement that isn't a COPY).
    ProgrammingError(String),

    /// An array encode/decode violation: ragged nesting, mixed element
    /// types, or a malformed text array.
    DataError(String),

    /// The server reported a COPY-format error (SQLSTATE class `57` / the
    /// `bad_copy_file_format` condition), surfaced verbatim.
    BadCopyFileFormat(String),

    /// The server reported query/COPY cancellation (SQLSTATE `57014`),
    /// including the server's response to a client-initiated COPY abort.
    QueryCanceled(String),

    /// An unexpected protocol state: no result where one was required, or
    /// an unrecognized mix of result statuses.
    InternalError(String),

    /// Client-side misuse: writing `str` data to a binary COPY, re-entering
    /// a finished COPY session, or writing an unsupported buffer type.
    TypeError(String),

    /// A result with status `FatalError`, decoded from the server's
    /// `ErrorResponse` under the connection's `client_encoding`.
    Database(Box<DatabaseError>),

    /// Error communicating with the underlying socket.
    Io(io::Error),

    /// Unexpected or invalid data was encountered while decoding the wire
    /// protocol. Indicates either a driver bug or server/connection
    /// corruption.
    Protocol(Box<str>),
}

impl Error {
    /// The cleanup error chained onto a primary error when both a body
    /// error and a `copy_end`/close error occur; the body error always
    /// stays primary (see `Error::source`).
    pub fn chained(primary: Error, cleanup: Error) -> Error {
        match primary {
            Error::Database(mut db) => {
                db.cleanup_error = Some(Box::new(cleanup));
                Error::Database(db)
            }
            other => other,
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            Error::Database(db) => db.cleanup_error.as_deref().map(|e| e as &(dyn StdError)),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InterfaceError(msg) => write!(f, "interface error: {}", msg),
            Error::ProgrammingError(msg) => write!(f, "programming error: {}", msg),
            Error::DataError(msg) => write!(f, "data error: {}", msg),
            Error::BadCopyFileFormat(msg) => write!(f, "bad copy file format: {}", msg),
            Error::QueryCanceled(msg) => write!(f, "query canceled: {}", msg),
            Error::InternalError(msg) => write!(f, "internal error: {}", msg),
            Error::TypeError(msg) => write!(f, "type error: {}", msg),
            Error::Database(db) => Display::fmt(db, f),
            Error::Io(error) => write!(f, "{}", error),
            Error::Protocol(err) => f.write_str(err),
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError<'_>> for Error {
    #[inline]
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err.args.to_string().into_boxed_str())
    }
}

/// Used by the `protocol_err!()` macro for a lazily evaluated conversion to
/// `Error::Protocol`, so the macro can be used inside `.ok_or_else()`
/// without clippy complaining about eager evaluation.
pub(crate) struct ProtocolError<'a> {
    pub args: fmt::Arguments<'a>,
}

macro_rules! protocol_err {
    ($($args:tt)*) => {
        $crate::error::ProtocolError { args: format_args!($($args)*) }
    };
}

pub(crate) use protocol_err;

/// A server-reported `FatalError` result, decoded from an `ErrorResponse`.
///
/// SQLSTATE-to-taxonomy mapping: `57014` is surfaced instead as
/// [`Error::QueryCanceled`] and integrity-violation classes (`23*`) carry
/// their SQLSTATE through unmodified here; everything else becomes a plain
/// `DatabaseError` that callers can match on by `.code()`.
pub struct DatabaseError {
    pub(crate) message: String,
    pub(crate) code: String,
    pub(crate) detail: Option<String>,
    pub(crate) hint: Option<String>,
    pub(crate) table: Option<String>,
    pub(crate) column: Option<String>,
    pub(crate) constraint: Option<String>,
    pub(crate) cleanup_error: Option<Box<Error>>,
}

impl DatabaseError {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The SQLSTATE error code, e.g. `"23505"` for a unique violation.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column_name(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn constraint_name(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// `true` for the integrity-constraint-violation SQLSTATE class (`23`).
    pub fn is_integrity_violation(&self) -> bool {
        self.code.starts_with("23")
    }
}

impl Debug for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DatabaseError")
            .field("message", &self.message())
            .field("code", &self.code())
            .field("detail", &self.detail())
            .field("hint", &self.hint())
            .field("table_name", &self.table_name())
            .field("column_name", &self.column_name())
            .field("constraint_name", &self.constraint_name())
            .finish()
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Classify a server `ErrorResponse` into the driver's error taxonomy,
/// per SPEC_FULL.md §7's SQLSTATE-to-taxonomy mapping.
pub(crate) fn error_from_fields(
    code: String,
    message: String,
    detail: Option<String>,
    hint: Option<String>,
    table: Option<String>,
    column: Option<String>,
    constraint: Option<String>,
) -> Error {
    if code == "57014" {
        return Error::QueryCanceled(message);
    }

    Error::Database(Box::new(DatabaseError {
        message,
        code,
        detail,
        hint,
        table,
        column,
        constraint,
        cleanup_error: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_canceled_maps_from_57014() {
        let err = error_from_fields("57014".into(), "canceling statement".into(), None, None, None, None, None);
        assert!(matches!(err, Error::QueryCanceled(_)));
    }

    #[test]
    fn integrity_violation_is_preserved_verbatim() {
        let err = error_from_fields(
            "23505".into(),
            "duplicate key value".into(),
            Some("Key (id)=(1) already exists.".into()),
            None,
            Some("widgets".into()),
            Some("id".into()),
            None,
        );
        match err {
            Error::Database(db) => {
                assert_eq!(db.code(), "23505");
                assert!(db.is_integrity_violation());
                assert_eq!(db.table_name(), Some("widgets"));
            }
            _ => panic!("expected Error::Database"),
        }
    }
}
