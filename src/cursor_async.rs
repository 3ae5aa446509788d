//! The cooperative twin of [`crate::cursor::Cursor`], feature-gated behind
//! `runtime-tokio`. Per §5/§9, the protocol engine (component B) must not
//! be duplicated per concurrency model — only the waiter changes. Every
//! method here mirrors its blocking counterpart almost line for line,
//! sharing the query-building and result-triage helpers in
//! [`crate::cursor`]; the only difference is `CooperativeWaiter::run(...)`
//! in place of `BlockingWaiter::new().run(...)`.

use crate::cursor::{
    check_results, copy_abort_error, encode_client_string, encode_params, enqueue_extended_query,
    expect_copy_result, fold_rowcount, row_at, truncate_for_log, Config,
};
use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::io::WireHandle;
use crate::message::Format;
use crate::query::{self, ParamStyle};
use crate::result::{Column, PgResult, ResultStatus};
use crate::transformer::{Dump, Transformer};
use crate::waiter::cooperative::CooperativeWaiter;
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

/// A cursor driving a [`WireHandle`] from a tokio event loop via
/// [`CooperativeWaiter`] instead of a blocking `libc::poll` loop. Field
/// shape and method contracts are identical to [`crate::cursor::Cursor`];
/// see that type's docs for the semantics each method implements.
pub struct AsyncCursor<S> {
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

impl<S: Read + Write + AsRawFd> AsyncCursor<S> {
    pub fn new(socket: S, config: Config) -> AsyncCursor<S> {
        let format = config.default_format;
        let arraysize = config.default_arraysize;
        AsyncCursor {
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

    /// See [`crate::cursor::Cursor::transaction_status`].
    pub fn transaction_status(&self) -> crate::message::TransactionStatus {
        self.handle.transaction_status()
    }

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

    pub async fn execute(&mut self, sql: &str, params: &[&dyn Dump]) -> Result<()> {
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

        let results = CooperativeWaiter::run(&mut self.handle, Generator::execute()).await?.into_results()?;
        check_results(&results)?;

        self.rowcount = fold_rowcount(&results);
        self.last_query = Some(parsed.sql);
        self.results = results;
        self.current_result = 0;
        self.row_position = 0;
        Ok(())
    }

    pub async fn executemany(&mut self, sql: &str, param_sets: &[&[&dyn Dump]]) -> Result<()> {
        self.ensure_open()?;
        let mut total: i64 = -1;
        for params in param_sets {
            self.execute(sql, params).await?;
            if self.rowcount >= 0 {
                total = if total < 0 { self.rowcount } else { total + self.rowcount };
            }
        }
        self.rowcount = total;
        Ok(())
    }

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

    /// Starts a COPY session; direction is discovered from the server's
    /// response. See [`crate::cursor::Cursor::copy`] for the rationale.
    pub async fn copy(&mut self, sql: &str) -> Result<AsyncCopy<'_, S>> {
        self.ensure_open()?;
        let parsed = query::rewrite(sql)?;
        if !matches!(parsed.style, ParamStyle::Numbered) || parsed.param_count != 0 {
            return Err(Error::ProgrammingError("COPY statements take no bind parameters".into()));
        }

        enqueue_extended_query(&mut self.handle, &parsed.sql, &[], &[], &[], Format::Text);

        let results = CooperativeWaiter::run(&mut self.handle, Generator::execute()).await?.into_results()?;
        let copy_result = expect_copy_result(&results)?;
        let format = copy_result.copy_response().expect("expect_copy_result only returns CopyIn/CopyOut results").format;

        match copy_result.status() {
            ResultStatus::CopyIn => {
                Ok(AsyncCopy::In(AsyncCopyIn { cursor: self, framer: crate::copy::CopyInFramer::new(format), finished: false }))
            }
            ResultStatus::CopyOut => {
                Ok(AsyncCopy::Out(AsyncCopyOut { cursor: self, format, finished: false, header_consumed: false }))
            }
            _ => unreachable!("expect_copy_result only returns CopyIn/CopyOut results"),
        }
    }

    /// Convenience wrapper over [`AsyncCursor::copy`] for callers who
    /// already know `sql` is a COPY FROM STDIN; fails if the server
    /// disagrees.
    pub async fn copy_in(&mut self, sql: &str) -> Result<AsyncCopyIn<'_, S>> {
        match self.copy(sql).await? {
            AsyncCopy::In(copy_in) => Ok(copy_in),
            AsyncCopy::Out(_) => Err(Error::ProgrammingError("statement started a COPY OUT, not a COPY IN".into())),
        }
    }

    /// Convenience wrapper over [`AsyncCursor::copy`] for callers who
    /// already know `sql` is a COPY TO STDOUT; fails if the server
    /// disagrees.
    pub async fn copy_out(&mut self, sql: &str) -> Result<AsyncCopyOut<'_, S>> {
        match self.copy(sql).await? {
            AsyncCopy::Out(copy_out) => Ok(copy_out),
            AsyncCopy::In(_) => Err(Error::ProgrammingError("statement started a COPY IN, not a COPY OUT".into())),
        }
    }
}

/// The result of [`AsyncCursor::copy`]: which direction the server
/// actually opened, discovered from its `CopyInResponse`/`CopyOutResponse`.
pub enum AsyncCopy<'c, S> {
    In(AsyncCopyIn<'c, S>),
    Out(AsyncCopyOut<'c, S>),
}

/// The cooperative twin of [`crate::cursor::CopyIn`]. See that type for the
/// framing contract (binary header on first row, trailer iff any row was
/// written, single-shot reentry guard enforced by consuming `self`).
#[must_use = "a COPY IN session must be finished or aborted"]
pub struct AsyncCopyIn<'c, S> {
    cursor: &'c mut AsyncCursor<S>,
    framer: crate::copy::CopyInFramer,
    finished: bool,
}

impl<'c, S: Read + Write + AsRawFd> AsyncCopyIn<'c, S> {
    pub fn format(&self) -> Format {
        self.framer.format()
    }

    pub async fn write_row(&mut self, values: &[Option<&[u8]>]) -> Result<()> {
        let bytes = self.framer.encode_row(values)?;
        self.send(bytes).await
    }

    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.send(data.to_vec()).await
    }

    pub async fn write_str(&mut self, data: &str) -> Result<()> {
        if self.framer.format() == Format::Binary {
            return Err(Error::TypeError("cannot copy str data in binary mode".into()));
        }
        let bytes = encode_client_string(&self.cursor.config.client_encoding, data)?;
        self.send(bytes).await
    }

    async fn send(&mut self, data: Vec<u8>) -> Result<()> {
        CooperativeWaiter::run(&mut self.cursor.handle, Generator::copy_to(data)).await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<()> {
        self.finished = true;
        if let Some(trailer) = self.framer.finish_bytes() {
            self.send(trailer).await?;
        }
        CooperativeWaiter::run(&mut self.cursor.handle, Generator::copy_end(None)).await?.into_results()?;
        Ok(())
    }

    pub async fn abort(mut self, message: &str) -> Result<()> {
        self.finished = true;
        let result = CooperativeWaiter::run(&mut self.cursor.handle, Generator::copy_end(Some(message.to_string()))).await;
        match result {
            Err(err) => Err(err),
            Ok(value) => {
                let results = value.into_results()?;
                Err(copy_abort_error(&results, message))
            }
        }
    }
}

impl<'c, S> Drop for AsyncCopyIn<'c, S> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(target: "pg_core::copy", "AsyncCopyIn dropped without finish()/abort(); the server will see an aborted COPY");
        }
    }
}

/// The cooperative twin of [`crate::cursor::CopyOut`].
pub struct AsyncCopyOut<'c, S> {
    cursor: &'c mut AsyncCursor<S>,
    format: Format,
    finished: bool,
    header_consumed: bool,
}

impl<'c, S: Read + Write + AsRawFd> AsyncCopyOut<'c, S> {
    pub fn format(&self) -> Format {
        self.format
    }

    pub async fn next_row(&mut self) -> Result<Option<Vec<Option<Vec<u8>>>>> {
        if self.finished {
            return Ok(None);
        }
        let data = CooperativeWaiter::run(&mut self.cursor.handle, Generator::copy_from()).await?.into_copy_data()?;
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
    use std::os::unix::net::UnixStream;

    #[tokio::test]
    async fn execute_runs_against_a_fake_server_over_the_cooperative_waiter() {
        let (client, mut server) = UnixStream::pair().unwrap();
        client.set_nonblocking(true).unwrap();
        let mut cursor = AsyncCursor::new(client, Config::default());

        let server_task = tokio::task::spawn_blocking(move || {
            // Drain whatever the extended-query sequence sent, then answer
            // with `ParseComplete`/`BindComplete`/`NoData`/`CommandComplete`/
            // `ReadyForQuery`, matching a no-op statement like `BEGIN`.
            let mut drain = [0u8; 4096];
            std::thread::sleep(std::time::Duration::from_millis(20));
            let _ = server.read(&mut drain);

            let mut reply = Vec::new();
            reply.extend_from_slice(b"1\0\0\0\x04"); // ParseComplete
            reply.extend_from_slice(b"2\0\0\0\x04"); // BindComplete
            reply.extend_from_slice(b"n\0\0\0\x04"); // NoData
            let tag = b"BEGIN\0";
            reply.push(b'C');
            reply.extend_from_slice(&((4 + tag.len()) as i32).to_be_bytes());
            reply.extend_from_slice(tag);
            reply.push(b'Z');
            reply.extend_from_slice(&5i32.to_be_bytes());
            reply.push(b'I');
            server.write_all(&reply).unwrap();
        });

        cursor.execute("BEGIN", &[]).await.unwrap();
        assert_eq!(cursor.rowcount(), -1);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn aborting_an_async_copy_in_surfaces_the_servers_fatal_error_and_marks_the_transaction_inerror() {
        let (client, mut server) = UnixStream::pair().unwrap();
        client.set_nonblocking(true).unwrap();
        let mut cursor = AsyncCursor::new(client, Config::default());
        let copy_in = AsyncCopyIn {
            cursor: &mut cursor,
            framer: crate::copy::CopyInFramer::new(Format::Text),
            finished: false,
        };

        let server_task = tokio::task::spawn_blocking(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));

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
        });

        let err = copy_in.abort("boom").await.unwrap_err();
        assert!(matches!(err, Error::QueryCanceled(ref msg) if msg.contains("boom")));
        assert_eq!(cursor.transaction_status(), crate::message::TransactionStatus::InError);
        server_task.await.unwrap();
    }
}
