//! Component F: the cursor core. Orchestrates the send/wait/collect cycle
//! through the generator (§4.B) and a waiter (§4.C), maintains result-set
//! position, and dispatches COPY to the framing in [`crate::copy`].
//! Grounded on psycopg3's `BaseCursor`/`Cursor` (`_start_query`,
//! `_execute_send`, `_execute_results`, `fetchone`/`fetchmany`/`fetchall`,
//! `copy`/`_start_copy`).

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::io::WireHandle;
use crate::message::{Format, Frontend};
use crate::query::{self, ParamStyle};
use crate::result::{Column, PgResult, ResultStatus};
use crate::transformer::{Dump, Transformer};
use crate::waiter::BlockingWaiter;
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

/// The ambient per-connection configuration a cursor reads, per SPEC_FULL.md
/// §1A: a plain struct, not a file- or env-based config layer.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_encoding: String,
    pub default_format: Format,
    pub default_arraysize: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config { client_encoding: "UTF8".to_string(), default_format: Format::Text, default_arraysize: 1 }
    }
}

/// Encodes each parameter for `format`, returning the `(bytes, oid)` pairs
/// the extended-query `Bind` message needs. Shared by the blocking
/// [`Cursor`] and the `runtime-tokio` `AsyncCursor` — encoding a parameter
/// never touches the socket, so there is nothing waiter-specific about it.
pub(crate) fn encode_params(params: &[&dyn Dump], format: Format) -> Result<Vec<(Vec<u8>, u32)>> {
    let mut encoded = Vec::with_capacity(params.len());
    for param in params {
        let mut buf = Vec::new();
        param.encode(format, &mut buf)?;
        encoded.push((buf, param.type_oid()));
    }
    Ok(encoded)
}

/// Queues the five-message extended-query sequence (`Parse`/`Bind`/
/// `Describe`/`Execute`/`Sync`) that both a parameterized `execute` and a
/// `copy_in`/`copy_out` use to guarantee a single-statement response.
pub(crate) fn enqueue_extended_query<S: Read + Write + AsRawFd>(
    handle: &mut WireHandle<S>,
    sql: &str,
    param_types: &[u32],
    param_formats: &[Format],
    param_values: &[Option<&[u8]>],
    result_format: Format,
) {
    handle.enqueue(&Frontend::Parse { name: "", sql, param_types });
    handle.enqueue(&Frontend::Bind {
        portal: "",
        statement: "",
        param_formats,
        params: param_values,
        result_format,
    });
    handle.enqueue(&Frontend::Describe { kind: b'P', name: "" });
    handle.enqueue(&Frontend::Execute { portal: "" });
    handle.enqueue(&Frontend::Sync);
}

/// A statuses-only triage of an execute's result list, mirroring
/// `_execute_results`'s subset check: `{TuplesOk, CommandOk, EmptyQuery}` is
/// acceptable, a lone COPY status means the caller should have used
/// `copy()` instead, anything else is a `FatalError` to raise from.
pub(crate) fn check_results(results: &[PgResult]) -> Result<()> {
    for result in results {
        match result.status() {
            ResultStatus::TuplesOk | ResultStatus::CommandOk | ResultStatus::EmptyQuery => {}
            ResultStatus::CopyIn | ResultStatus::CopyOut | ResultStatus::CopyBoth => {
                return Err(Error::ProgrammingError(
                    "the query started a COPY operation; use Cursor::copy_in/copy_out instead".into(),
                ));
            }
            ResultStatus::FatalError => {
                let fields = result.error().expect("FatalError result always carries ErrorFields");
                return Err(crate::error::error_from_fields(
                    fields.code.clone(),
                    fields.message.clone(),
                    fields.detail.clone(),
                    fields.hint.clone(),
                    fields.table.clone(),
                    fields.column.clone(),
                    fields.constraint.clone(),
                ));
            }
        }
    }
    Ok(())
}

/// Folds each result's `command_tuples` into a running total, mirroring
/// `_execute_results`'s `rowcount = nrows if rowcount < 0 else rowcount + nrows`:
/// starts "unset" (`-1`); once any result reports a count the total becomes
/// that count, and every subsequent counted result adds to it.
pub(crate) fn fold_rowcount(results: &[PgResult]) -> i64 {
    let mut rowcount: i64 = -1;
    for result in results {
        if let Some(n) = result.command_tuples() {
            let n = n as i64;
            rowcount = if rowcount < 0 { n } else { rowcount + n };
        }
    }
    rowcount
}

/// A synchronous cursor driving a [`WireHandle`] with a [`BlockingWaiter`].
pub struct Cursor<S> {
    handle: WireHandle<S>,
    transformer: Transformer,
    config: Config,
    format: Format,
    arraysize: usize,
    results: Vec<PgResult>,
    current_result: usize,
    row_position: usize,
    rowcount: i64,
    last_query: Option<String>,
    closed: bool,
}

impl<S: Read + Write + AsRawFd> Cursor<S> {
    pub fn new(socket: S, config: Config) -> Cursor<S> {
        let format = config.default_format;
        let arraysize = config.default_arraysize;
        Cursor {
            handle: WireHandle::new(socket),
            transformer: Transformer::new(),
            config,
            format,
            arraysize,
            results: Vec::new(),
            current_result: 0,
            row_position: 0,
            rowcount: -1,
            last_query: None,
            closed: false,
        }
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn transformer_mut(&mut self) -> &mut Transformer {
        &mut self.transformer
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn set_arraysize(&mut self, n: usize) {
        self.arraysize = n;
    }

    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    pub fn query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// The connection's transaction status as of the last `ReadyForQuery`
    /// (§3, §5); a COPY abort leaves this `InError` once the server's
    /// `ReadyForQuery` for the failed sub-protocol has been drained.
    pub fn transaction_status(&self) -> crate::message::TransactionStatus {
        self.handle.transaction_status()
    }

    /// The current result's column descriptors, or an empty slice before
    /// any statement has executed or once the cursor is past the last
    /// result.
    pub fn description(&self) -> &[Column] {
        self.results.get(self.current_result).map(PgResult::columns).unwrap_or(&[])
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InterfaceError("cursor is closed".into()));
        }
        Ok(())
    }

    fn current(&self) -> Option<&PgResult> {
        self.results.get(self.current_result)
    }

    /// Runs one query to completion and triages the results, per
    /// `_start_query`/`_execute_send`/`_execute_results`.
    pub fn execute(&mut self, sql: &str, params: &[&dyn Dump]) -> Result<()> {
        self.ensure_open()?;
        let parsed = query::rewrite(sql)?;
        if parsed.param_count != params.len() {
            return Err(Error::ProgrammingError(format!(
                "query expects {} parameters, {} were supplied",
                parsed.param_count,
                params.len()
            )));
        }

        log::trace!(target: "pg_core::cursor", "execute: {}", truncate_for_log(&parsed.sql));

        let encoded = encode_params(params, self.format)?;
        let param_values: Vec<Option<&[u8]>> = encoded.iter().map(|(b, _)| Some(b.as_slice())).collect();
        let param_formats: Vec<Format> = vec![self.format; params.len()];
        let param_types: Vec<u32> = encoded.iter().map(|(_, oid)| *oid).collect();

        enqueue_extended_query(&mut self.handle, &parsed.sql, &param_types, &param_formats, &param_values, self.format);

        let waiter = BlockingWaiter::new();
        let results = waiter.run(&mut self.handle, Generator::execute())?.into_results()?;
        check_results(&results)?;

        self.rowcount = fold_rowcount(&results);
        self.last_query = Some(parsed.sql);
        self.results = results;
        self.current_result = 0;
        self.row_position = 0;
        Ok(())
    }

    /// Runs `sql` once per entry of `param_sets`, accumulating `rowcount`
    /// across all of them (psycopg3's `executemany`, simplified to the
    /// per-iteration re-bind shape rather than a server-side prepared
    /// statement cache).
    pub fn executemany(&mut self, sql: &str, param_sets: &[&[&dyn Dump]]) -> Result<()> {
        self.ensure_open()?;
        let mut total: i64 = -1;
        for params in param_sets {
            self.execute(sql, params)?;
            if self.rowcount >= 0 {
                total = if total < 0 { self.rowcount } else { total + self.rowcount };
            }
        }
        self.rowcount = total;
        Ok(())
    }

    /// Advances to the next result set produced by a multi-statement
    /// execute, returning `false` once past the last one.
    pub fn nextset(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if self.current_result + 1 >= self.results.len() {
            return Ok(false);
        }
        self.current_result += 1;
        self.row_position = 0;
        Ok(true)
    }

    fn require_tuples(&self) -> Result<&PgResult> {
        match self.current() {
            Some(result) if result.status() == ResultStatus::TuplesOk => Ok(result),
            _ => Err(Error::ProgrammingError("no result set available; call execute() first".into())),
        }
    }

    pub fn fetchone(&mut self) -> Result<Option<Vec<Option<Vec<u8>>>>> {
        let result = self.require_tuples()?;
        if self.row_position >= result.ntuples() {
            return Ok(None);
        }
        let row = row_at(result, self.row_position);
        self.row_position += 1;
        Ok(Some(row))
    }

    /// Fetches up to `n` rows, defaulting to `arraysize` when `n` is `None`.
    pub fn fetchmany(&mut self, n: Option<usize>) -> Result<Vec<Vec<Option<Vec<u8>>>>> {
        let n = n.unwrap_or(self.arraysize);
        let mut rows = Vec::with_capacity(n);
        for _ in 0..n {
            match self.fetchone()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    pub fn fetchall(&mut self) -> Result<Vec<Vec<Option<Vec<u8>>>>> {
        let result = self.require_tuples()?;
        let remaining = result.ntuples() - self.row_position;
        let mut rows = Vec::with_capacity(remaining);
        while let Some(row) = self.fetchone()? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Starts a COPY session, forcing `send_query_params` the way
    /// `_start_copy` does (`no_pqexec=True`) so the result triage below can
    /// rely on seeing exactly one `CopyInResponse`/`CopyOutResponse`.
    /// Direction is discovered from the server's response rather than
    /// declared by the caller, mirroring `cursor.py`'s `copy()`/
    /// `_start_copy()`, which builds one `Copy` object regardless of
    /// whether the statement is a COPY FROM or a COPY TO.
    pub fn copy(&mut self, sql: &str) -> Result<Copy<'_, S>> {
        self.ensure_open()?;
        let parsed = query::rewrite(sql)?;
        if !matches!(parsed.style, ParamStyle::Numbered) || parsed.param_count != 0 {
            return Err(Error::ProgrammingError("COPY statements take no bind parameters".into()));
        }

        enqueue_extended_query(&mut self.handle, &parsed.sql, &[], &[], &[], Format::Text);

        let waiter = BlockingWaiter::new();
        let results = waiter.run(&mut self.handle, Generator::execute())?.into_results()?;
        let copy_result = expect_copy_result(&results)?;
        let format = copy_result.copy_response().expect("expect_copy_result only returns CopyIn/CopyOut results").format;

        match copy_result.status() {
            ResultStatus::CopyIn => {
                Ok(Copy::In(CopyIn { cursor: self, framer: crate::copy::CopyInFramer::new(format), finished: false }))
            }
            ResultStatus::CopyOut => {
                Ok(Copy::Out(CopyOut { cursor: self, format, finished: false, header_consumed: false }))
            }
            _ => unreachable!("expect_copy_result only returns CopyIn/CopyOut results"),
        }
    }

    /// Convenience wrapper over [`Cursor::copy`] for callers who already
    /// know `sql` is a COPY FROM STDIN; fails if the server disagrees.
    pub fn copy_in(&mut self, sql: &str) -> Result<CopyIn<'_, S>> {
        match self.copy(sql)? {
            Copy::In(copy_in) => Ok(copy_in),
            Copy::Out(_) => Err(Error::ProgrammingError("statement started a COPY OUT, not a COPY IN".into())),
        }
    }

    /// Convenience wrapper over [`Cursor::copy`] for callers who already
    /// know `sql` is a COPY TO STDOUT; fails if the server disagrees.
    pub fn copy_out(&mut self, sql: &str) -> Result<CopyOut<'_, S>> {
        match self.copy(sql)? {
            Copy::Out(copy_out) => Ok(copy_out),
            Copy::In(_) => Err(Error::ProgrammingError("statement started a COPY IN, not a COPY OUT".into())),
        }
    }
}

/// The result of [`Cursor::copy`]: which direction the server actually
/// opened, discovered from its `CopyInResponse`/`CopyOutResponse` rather
/// than asserted up front by the caller.
pub enum Copy<'c, S> {
    In(CopyIn<'c, S>),
    Out(CopyOut<'c, S>),
}

/// Encodes a `str` chunk under the connection's `client_encoding`. Only
/// UTF8 is supported by this core (the full encoding-conversion table is
/// out of scope per §1); any other declared encoding is a client-side
/// misuse rather than a silent mis-encode.
pub(crate) fn encode_client_string(encoding: &str, data: &str) -> Result<Vec<u8>> {
    if encoding.eq_ignore_ascii_case("UTF8") || encoding.eq_ignore_ascii_case("UTF-8") {
        Ok(data.as_bytes().to_vec())
    } else {
        Err(Error::InterfaceError(format!(
            "client_encoding {:?} is not supported by this core (only UTF8)",
            encoding
        )))
    }
}

pub(crate) fn expect_copy_result(results: &[PgResult]) -> Result<&PgResult> {
    match results {
        [result] if result.status() == ResultStatus::CopyIn || result.status() == ResultStatus::CopyOut => Ok(result),
        [result] if result.status() == ResultStatus::FatalError => {
            let fields = result.error().expect("FatalError result always carries ErrorFields");
            Err(crate::error::error_from_fields(
                fields.code.clone(),
                fields.message.clone(),
                fields.detail.clone(),
                fields.hint.clone(),
                fields.table.clone(),
                fields.column.clone(),
                fields.constraint.clone(),
            ))
        }
        [_] => Err(Error::ProgrammingError("the statement did not start a COPY operation".into())),
        _ => Err(Error::InternalError("expected exactly one result for a COPY statement".into())),
    }
}

/// Turns the result(s) a `copy_end(Some(message))` drained into the error a
/// caller-thrown exception inside a COPY IN block should surface as, per
/// §4.G's abrupt-exit path and §8 property 8: prefer the server's own
/// `FatalError` (a client-initiated `CopyFail` is reported back under
/// SQLSTATE `57014`, which `error_from_fields` already maps to
/// `QueryCanceled` with a message built from the text the server echoes
/// back — and that text always contains the `CopyFail` message verbatim).
/// Falls back to wrapping `client_message` directly if the server somehow
/// didn't report a `FatalError` (e.g. the socket dropped first).
pub(crate) fn copy_abort_error(results: &[PgResult], client_message: &str) -> Error {
    for result in results {
        if result.status() == ResultStatus::FatalError {
            let fields = result.error().expect("FatalError result always carries ErrorFields");
            return crate::error::error_from_fields(
                fields.code.clone(),
                fields.message.clone(),
                fields.detail.clone(),
                fields.hint.clone(),
                fields.table.clone(),
                fields.column.clone(),
                fields.constraint.clone(),
            );
        }
    }
    Error::QueryCanceled(client_message.to_string())
}

pub(crate) fn row_at(result: &PgResult, row: usize) -> Vec<Option<Vec<u8>>> {
    (0..result.nfields()).map(|col| result.value(row, col).map(|v| v.to_vec())).collect()
}

pub(crate) fn truncate_for_log(sql: &str) -> &str {
    const MAX: usize = 256;
    if sql.len() <= MAX {
        sql
    } else {
        &sql[..sql.floor_char_boundary_like(MAX)]
    }
}

trait FloorCharBoundary {
    fn floor_char_boundary_like(&self, max: usize) -> usize;
}

impl FloorCharBoundary for str {
    fn floor_char_boundary_like(&self, max: usize) -> usize {
        let mut i = max;
        while i > 0 && !self.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// A scoped COPY IN session (§3 "COPY session"). Must be ended with
/// [`CopyIn::finish`] or [`CopyIn::abort`]; dropping it without doing so
/// logs a warning and aborts on the caller's behalf, mirroring the
/// teacher's `PgCopyIn` drop-writes-`CopyFail` guard.
#[must_use = "a COPY IN session must be finished or aborted"]
pub struct CopyIn<'c, S> {
    cursor: &'c mut Cursor<S>,
    framer: crate::copy::CopyInFramer,
    finished: bool,
}

impl<'c, S: Read + Write + AsRawFd> CopyIn<'c, S> {
    pub fn format(&self) -> Format {
        self.framer.format()
    }

    /// Encodes and sends one row.
    pub fn write_row(&mut self, values: &[Option<&[u8]>]) -> Result<()> {
        let bytes = self.framer.encode_row(values)?;
        self.send(bytes)
    }

    /// Sends pre-encoded bytes verbatim (for callers streaming an external
    /// COPY-formatted source).
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.send(data.to_vec())
    }

    /// Sends a pre-formatted chunk of COPY data given as `str`. Per §4.G's
    /// input coercion rule, `str` is only accepted in text format — in
    /// binary format there is no byte-level `client_encoding` transform to
    /// apply to an arbitrary blob, so this is a client-side misuse.
    pub fn write_str(&mut self, data: &str) -> Result<()> {
        if self.framer.format() == Format::Binary {
            return Err(Error::TypeError("cannot copy str data in binary mode".into()));
        }
        let bytes = encode_client_string(&self.cursor.config.client_encoding, data)?;
        self.send(bytes)
    }

    fn send(&mut self, data: Vec<u8>) -> Result<()> {
        let waiter = BlockingWaiter::new();
        waiter.run(&mut self.cursor.handle, Generator::copy_to(data))?;
        Ok(())
    }

    /// Ends the COPY cleanly, sending the binary trailer if one is owed.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        if let Some(trailer) = self.framer.finish_bytes() {
            self.send(trailer)?;
        }
        let waiter = BlockingWaiter::new();
        waiter.run(&mut self.cursor.handle, Generator::copy_end(None))?.into_results()?;
        Ok(())
    }

    /// Aborts the COPY, telling the server it failed with `message`. The
    /// server always refuses to commit an aborted COPY, so this returns
    /// `Err` even when the drain itself succeeds.
    pub fn abort(mut self, message: &str) -> Result<()> {
        self.finished = true;
        let waiter = BlockingWaiter::new();
        let result = waiter.run(&mut self.cursor.handle, Generator::copy_end(Some(message.to_string())));
        match result {
            Err(err) => Err(err),
            Ok(value) => {
                let results = value.into_results()?;
                Err(copy_abort_error(&results, message))
            }
        }
    }
}

impl<'c, S> Drop for CopyIn<'c, S> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(target: "pg_core::copy", "CopyIn dropped without finish()/abort(); the server will see an aborted COPY");
        }
    }
}

/// A scoped COPY OUT session. `next_row` returns `None` once the server has
/// sent every row (§3: "`finished` becomes true on the first terminal
/// result and all further reads return empty").
pub struct CopyOut<'c, S> {
    cursor: &'c mut Cursor<S>,
    format: Format,
    finished: bool,
    header_consumed: bool,
}

impl<'c, S: Read + Write + AsRawFd> CopyOut<'c, S> {
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn next_row(&mut self) -> Result<Option<Vec<Option<Vec<u8>>>>> {
        if self.finished {
            return Ok(None);
        }
        let waiter = BlockingWaiter::new();
        let data = waiter.run(&mut self.cursor.handle, Generator::copy_from())?.into_copy_data()?;
        match data {
            None => {
                self.finished = true;
                Ok(None)
            }
            Some(bytes) => match self.format {
                Format::Text => {
                    let line = if bytes.ends_with(b"\n") { &bytes[..bytes.len() - 1] } else { &bytes[..] };
                    Ok(Some(crate::copy::parse_row_text(line)))
                }
                Format::Binary => {
                    let bytes = if !self.header_consumed {
                        self.header_consumed = true;
                        bytes.strip_prefix(&crate::copy::BINARY_SIGNATURE[..]).ok_or_else(|| {
                            Error::BadCopyFileFormat("binary COPY OUT stream is missing its signature header".into())
                        })?
                    } else {
                        &bytes[..]
                    };
                    crate::copy::parse_row_binary(bytes).map(|row| {
                        if row.is_none() {
                            self.finished = true;
                        }
                        row
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResultStatus;

    #[test]
    fn fold_rowcount_sums_across_statements_with_counts() {
        let results = vec![PgResult::command_ok("INSERT 0 2".into()), PgResult::command_ok("INSERT 0 3".into())];
        assert_eq!(fold_rowcount(&results), 5);
    }

    #[test]
    fn fold_rowcount_ignores_statements_with_no_count() {
        let results = vec![PgResult::command_ok("BEGIN".into()), PgResult::command_ok("DELETE 4".into())];
        assert_eq!(fold_rowcount(&results), 4);
    }

    #[test]
    fn fold_rowcount_stays_unset_when_nothing_reports_a_count() {
        let results = vec![PgResult::command_ok("BEGIN".into())];
        assert_eq!(fold_rowcount(&results), -1);
    }

    #[test]
    fn check_results_rejects_a_bare_copy_status() {
        let results = vec![PgResult::copy_in(crate::message::CopyResponse { format: Format::Text, column_formats: vec![] })];
        let err = check_results(&results).unwrap_err();
        assert!(matches!(err, Error::ProgrammingError(_)));
    }

    #[test]
    fn check_results_accepts_tuples_and_command_ok_together() {
        let results = vec![
            PgResult::command_ok("BEGIN".into()),
            PgResult::empty_query(),
        ];
        assert!(check_results(&results).is_ok());
        assert_eq!(results[0].status(), ResultStatus::CommandOk);
    }

    #[test]
    fn writing_str_in_binary_copy_mode_is_a_type_error() {
        use std::os::unix::net::UnixStream;

        let (socket, _peer) = UnixStream::pair().unwrap();
        socket.set_nonblocking(true).unwrap();
        let mut cursor = Cursor::new(socket, Config::default());
        let mut copy_in = CopyIn {
            cursor: &mut cursor,
            framer: crate::copy::CopyInFramer::new(Format::Binary),
            finished: true, // avoid the Drop warning firing during this test
        };

        let err = copy_in.write_str("abc").unwrap_err();
        assert!(matches!(err, Error::TypeError(_)));
        assert_eq!(err.to_string(), "type error: cannot copy str data in binary mode");
    }

    #[test]
    fn encode_client_string_rejects_non_utf8_encodings() {
        assert!(encode_client_string("UTF8", "hello").is_ok());
        assert!(encode_client_string("LATIN1", "hello").is_err());
    }

    #[test]
    fn aborting_a_copy_in_surfaces_the_servers_fatal_error_and_marks_the_transaction_inerror() {
        use std::io::Write as _;
        use std::os::unix::net::UnixStream;

        let (socket, mut server) = UnixStream::pair().unwrap();
        socket.set_nonblocking(true).unwrap();
        let mut cursor = Cursor::new(socket, Config::default());
        let copy_in = CopyIn {
            cursor: &mut cursor,
            framer: crate::copy::CopyInFramer::new(Format::Text),
            finished: false,
        };

        let mut body = Vec::new();
        body.push(b'V');
        body.extend_from_slice(b"ERROR\0");
        body.push(b'C');
        body.extend_from_slice(b"57014\0");
        body.push(b'M');
        body.extend_from_slice(b"COPY from stdin failed: boom\0");
        body.push(0);

        let mut reply = Vec::new();
        reply.push(b'E');
        reply.extend_from_slice(&((4 + body.len()) as i32).to_be_bytes());
        reply.extend_from_slice(&body);
        reply.push(b'Z');
        reply.extend_from_slice(&5i32.to_be_bytes());
        reply.push(b'E');
        server.write_all(&reply).unwrap();

        let err = copy_in.abort("boom").unwrap_err();
        assert!(matches!(err, Error::QueryCanceled(ref msg) if msg.contains("boom")));
        assert_eq!(cursor.transaction_status(), crate::message::TransactionStatus::InError);
    }

    #[test]
    fn expect_copy_result_discovers_either_direction_from_the_servers_response() {
        let copy_in = vec![PgResult::copy_in(crate::message::CopyResponse { format: Format::Text, column_formats: vec![] })];
        let result = expect_copy_result(&copy_in).unwrap();
        assert_eq!(result.status(), ResultStatus::CopyIn);

        let copy_out = vec![PgResult::copy_out(crate::message::CopyResponse { format: Format::Text, column_formats: vec![] })];
        let result = expect_copy_result(&copy_out).unwrap();
        assert_eq!(result.status(), ResultStatus::CopyOut);
    }

    #[test]
    fn expect_copy_result_rejects_non_copy_statements() {
        let results = vec![PgResult::command_ok("BEGIN".into())];
        let err = expect_copy_result(&results).unwrap_err();
        assert!(matches!(err, Error::ProgrammingError(ref msg) if msg.contains("did not start a COPY")));
    }
}
