//! The immutable result object produced by executing a statement — the
//! equivalent of libpq's `PGresult`. Built up by the generator (§4.B) as
//! backend messages arrive, then handed to the cursor read-only.

use crate::message::{CopyResponse, DataRow, ErrorFields, Format, RowDescription};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResultStatus {
    TuplesOk,
    CommandOk,
    EmptyQuery,
    CopyIn,
    CopyOut,
    CopyBoth,
    FatalError,
}

/// A column descriptor, as reported by `RowDescription`.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// One executed statement's result. Rows accumulate during `DataRow`
/// messages and the whole thing is frozen once `CommandComplete` (or
/// `EmptyQueryResponse`) arrives.
#[derive(Debug)]
pub struct PgResult {
    status: ResultStatus,
    columns: Vec<Column>,
    rows: Vec<DataRow>,
    command_tag: Option<String>,
    command_tuples: Option<u64>,
    error: Option<ErrorFields>,
    copy: Option<CopyResponse>,
}

impl PgResult {
    pub(crate) fn empty_query() -> PgResult {
        PgResult {
            status: ResultStatus::EmptyQuery,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag: None,
            command_tuples: None,
            error: None,
            copy: None,
        }
    }

    pub(crate) fn command_ok(tag: String) -> PgResult {
        let command_tuples = crate::message::command_tuples(&tag);
        PgResult {
            status: ResultStatus::CommandOk,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag: Some(tag),
            command_tuples,
            error: None,
            copy: None,
        }
    }

    pub(crate) fn tuples_ok(description: RowDescription, rows: Vec<DataRow>, tag: String) -> PgResult {
        let command_tuples = crate::message::command_tuples(&tag);
        PgResult {
            status: ResultStatus::TuplesOk,
            columns: description
                .fields
                .into_iter()
                .map(|f| Column {
                    name: f.name,
                    table_oid: f.table_oid,
                    column_attr: f.column_attr,
                    type_oid: f.type_oid,
                    type_size: f.type_size,
                    type_modifier: f.type_modifier,
                    format: f.format,
                })
                .collect(),
            rows,
            command_tag: Some(tag),
            command_tuples,
            error: None,
            copy: None,
        }
    }

    pub(crate) fn copy_in(copy: CopyResponse) -> PgResult {
        PgResult {
            status: ResultStatus::CopyIn,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag: None,
            command_tuples: None,
            error: None,
            copy: Some(copy),
        }
    }

    pub(crate) fn copy_out(copy: CopyResponse) -> PgResult {
        PgResult {
            status: ResultStatus::CopyOut,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag: None,
            command_tuples: None,
            error: None,
            copy: Some(copy),
        }
    }

    pub(crate) fn fatal_error(fields: ErrorFields) -> PgResult {
        PgResult {
            status: ResultStatus::FatalError,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag: None,
            command_tuples: None,
            error: Some(fields),
            copy: None,
        }
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn ntuples(&self) -> usize {
        self.rows.len()
    }

    pub fn nfields(&self) -> usize {
        self.columns.len()
    }

    /// Rows affected, per the `CommandComplete` tag, when the server
    /// reports one (absent for `"BEGIN"`, `"CREATE TABLE"`, and similar).
    pub fn command_tuples(&self) -> Option<u64> {
        self.command_tuples
    }

    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    /// Raw cell bytes at `(row, col)`, or `None` for SQL `NULL`. Panics if
    /// out of bounds, matching libpq's `PQgetvalue` contract.
    pub fn value(&self, row: usize, col: usize) -> Option<&[u8]> {
        assert!(row < self.rows.len(), "row {} out of bounds ({})", row, self.rows.len());
        assert!(col < self.columns.len(), "column {} out of bounds ({})", col, self.columns.len());
        self.rows[row].get(col)
    }

    pub fn error(&self) -> Option<&ErrorFields> {
        self.error.as_ref()
    }

    pub(crate) fn copy_response(&self) -> Option<&CopyResponse> {
        self.copy.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ok_extracts_row_count_from_tag() {
        let result = PgResult::command_ok("DELETE 7".to_string());
        assert_eq!(result.status(), ResultStatus::CommandOk);
        assert_eq!(result.command_tuples(), Some(7));
    }

    #[test]
    fn command_ok_with_no_count_leaves_it_none() {
        let result = PgResult::command_ok("BEGIN".to_string());
        assert_eq!(result.command_tuples(), None);
    }

    #[test]
    fn empty_query_has_no_rows_or_columns() {
        let result = PgResult::empty_query();
        assert_eq!(result.status(), ResultStatus::EmptyQuery);
        assert_eq!(result.ntuples(), 0);
        assert_eq!(result.nfields(), 0);
    }
}
