//! The protocol generator (§4.B): a resumable state machine that encodes
//! "drive one wire operation to completion" without a real coroutine
//! language feature, per Design Note 9 option (a). A [`Waiter`
//! ][crate::waiter] owns the [`WireHandle`] and repeatedly calls
//! [`Generator::step`], feeding back the readiness it observed, until the
//! generator reports [`GenOutcome::Done`].

use crate::error::Result;
use crate::io::{Ready, WireHandle};
use crate::message::{Backend, DataRow, Frontend, RowDescription};
use crate::result::PgResult;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

bitflags::bitflags! {
    /// What a generator wants before it can make further progress; a
    /// generator can be waiting on both directions at once (e.g. the flush
    /// step still owes output but wants to drain inbound error/notice
    /// bytes in the meantime), so this is a flag set rather than a plain
    /// three-way enum.
    pub struct Want: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// Either "come back once `(fd, want)` is ready" or the generator's final
/// value.
pub enum GenOutcome<T> {
    Yield(RawFd, Want),
    Done(Result<T>),
}

/// Partial state for a single in-flight wire operation. One `Generator` is
/// consumed per operation; the cursor's lock enforces that only one runs
/// against a handle at a time (§4.B ordering guarantee).
pub enum Generator {
    Execute(ExecuteState),
    CopyFrom,
    CopyTo { buf: Vec<u8>, sent: usize },
    CopyEnd { error_message: Option<String>, flushed: bool, drain: ExecuteState },
}

pub struct ExecuteState {
    results: Vec<PgResult>,
    pending: Option<PendingTuples>,
}

impl ExecuteState {
    fn new() -> ExecuteState {
        ExecuteState { results: Vec::new(), pending: None }
    }
}

struct PendingTuples {
    description: RowDescription,
    rows: Vec<DataRow>,
}

impl Generator {
    pub fn execute() -> Generator {
        Generator::Execute(ExecuteState::new())
    }

    pub fn copy_from() -> Generator {
        Generator::CopyFrom
    }

    pub fn copy_to(buf: Vec<u8>) -> Generator {
        Generator::CopyTo { buf, sent: 0 }
    }

    pub fn copy_end(error_message: Option<String>) -> Generator {
        Generator::CopyEnd { error_message, flushed: false, drain: ExecuteState::new() }
    }
}

/// Drives `handle`'s write buffer toward empty, returning `Want` if it
/// isn't empty yet.
fn flush<S: Read + Write + AsRawFd>(handle: &mut WireHandle<S>) -> Result<Option<Want>> {
    if handle.flush()? {
        Ok(None)
    } else {
        Ok(Some(Want::WRITE))
    }
}

impl Generator {
    /// Advance the state machine. `ready` is `None` on the very first call
    /// and `Some` on every subsequent resumption.
    pub fn step<S: Read + Write + AsRawFd>(
        &mut self,
        handle: &mut WireHandle<S>,
        ready: Option<Ready>,
    ) -> GenOutcome<GeneratorValue> {
        let fd = handle.as_raw_fd();
        match self.step_inner(handle, ready) {
            Ok(StepResult::Yield(want)) => GenOutcome::Yield(fd, want),
            Ok(StepResult::Done(value)) => GenOutcome::Done(Ok(value)),
            Err(err) => GenOutcome::Done(Err(err)),
        }
    }

    fn step_inner<S: Read + Write + AsRawFd>(
        &mut self,
        handle: &mut WireHandle<S>,
        ready: Option<Ready>,
    ) -> Result<StepResult> {
        match self {
            Generator::Execute(state) => Self::step_execute(state, handle, ready),
            Generator::CopyFrom => Self::step_copy_from(handle, ready),
            Generator::CopyTo { buf, sent } => Self::step_copy_to(handle, buf, sent),
            Generator::CopyEnd { error_message, flushed, drain } => {
                Self::step_copy_end(handle, error_message, flushed, drain, ready)
            }
        }
    }

    fn step_execute<S: Read + Write + AsRawFd>(
        state: &mut ExecuteState,
        handle: &mut WireHandle<S>,
        _ready: Option<Ready>,
    ) -> Result<StepResult> {
        if let Some(want) = flush(handle)? {
            return Ok(StepResult::Yield(want | Want::READ));
        }

        loop {
            match handle.try_recv()? {
                Some(Backend::NoticeResponse(fields)) => {
                    crate::logging::log_notice(&fields);
                }
                Some(Backend::ParameterStatus { name, value }) => {
                    crate::logging::log_parameter_status(&name, &value);
                }
                Some(Backend::NotificationResponse { pid, channel, payload }) => {
                    crate::logging::log_notification(pid, &channel, &payload);
                }
                // The extended-query sequence (`Parse`/`Bind`/`Describe`/
                // `Execute`/`Sync`) this core always issues produces these
                // three acks before any rows or `CommandComplete`; none of
                // them carry data this generator needs to act on.
                Some(Backend::ParseComplete) | Some(Backend::BindComplete) | Some(Backend::ParameterDescription) => {}
                Some(Backend::NoData) => {
                    state.pending = None;
                }
                Some(Backend::RowDescription(description)) => {
                    state.pending = Some(PendingTuples { description, rows: Vec::new() });
                }
                Some(Backend::DataRow(row)) => {
                    let pending = state
                        .pending
                        .as_mut()
                        .ok_or_else(|| crate::error::protocol_err!("DataRow without RowDescription"))?;
                    pending.rows.push(row);
                }
                Some(Backend::CommandComplete { tag }) => {
                    let result = match state.pending.take() {
                        Some(pending) => PgResult::tuples_ok(pending.description, pending.rows, tag),
                        None => PgResult::command_ok(tag),
                    };
                    state.results.push(result);
                }
                Some(Backend::EmptyQueryResponse) => {
                    state.results.push(PgResult::empty_query());
                }
                Some(Backend::ErrorResponse(fields)) => {
                    state.results.push(PgResult::fatal_error(fields));
                }
                Some(Backend::CopyInResponse(copy)) => {
                    return Ok(StepResult::Done(GeneratorValue::Results(finish_on_copy(
                        state,
                        PgResult::copy_in(copy),
                    ))));
                }
                Some(Backend::CopyOutResponse(copy)) => {
                    return Ok(StepResult::Done(GeneratorValue::Results(finish_on_copy(
                        state,
                        PgResult::copy_out(copy),
                    ))));
                }
                Some(Backend::CopyBothResponse(copy)) => {
                    return Ok(StepResult::Done(GeneratorValue::Results(finish_on_copy(
                        state,
                        PgResult::copy_in(copy),
                    ))));
                }
                Some(Backend::ReadyForQuery { status }) => {
                    handle.set_transaction_status(status);
                    return Ok(StepResult::Done(GeneratorValue::Results(std::mem::take(
                        &mut state.results,
                    ))));
                }
                Some(other) => {
                    return Err(crate::error::protocol_err!("unexpected message during execute: {:?}", other).into());
                }
                None => return Ok(StepResult::Yield(Want::READ)),
            }
        }
    }

    fn step_copy_from<S: Read + Write + AsRawFd>(
        handle: &mut WireHandle<S>,
        _ready: Option<Ready>,
    ) -> Result<StepResult> {
        match handle.try_recv()? {
            Some(Backend::CopyData(bytes)) => Ok(StepResult::Done(GeneratorValue::CopyData(Some(bytes)))),
            Some(Backend::CopyDone) => Ok(StepResult::Done(GeneratorValue::CopyData(None))),
            Some(Backend::NoticeResponse(fields)) => {
                crate::logging::log_notice(&fields);
                Ok(StepResult::Yield(Want::READ))
            }
            Some(Backend::NotificationResponse { pid, channel, payload }) => {
                crate::logging::log_notification(pid, &channel, &payload);
                Ok(StepResult::Yield(Want::READ))
            }
            Some(other) => Err(crate::error::protocol_err!("unexpected message during copy_from: {:?}", other).into()),
            None => Ok(StepResult::Yield(Want::READ)),
        }
    }

    fn step_copy_to<S: Read + Write + AsRawFd>(
        handle: &mut WireHandle<S>,
        buf: &mut Vec<u8>,
        sent: &mut usize,
    ) -> Result<StepResult> {
        if *sent == 0 {
            handle.enqueue(&Frontend::CopyData { data: buf });
        }
        if handle.flush()? {
            *sent = buf.len();
            Ok(StepResult::Done(GeneratorValue::Unit))
        } else {
            Ok(StepResult::Yield(Want::WRITE))
        }
    }

    fn step_copy_end<S: Read + Write + AsRawFd>(
        handle: &mut WireHandle<S>,
        error_message: &Option<String>,
        flushed: &mut bool,
        drain: &mut ExecuteState,
        ready: Option<Ready>,
    ) -> Result<StepResult> {
        if !*flushed {
            match error_message {
                Some(message) => handle.enqueue(&Frontend::CopyFail { message }),
                None => handle.enqueue(&Frontend::CopyDone),
            }
            if !handle.flush()? {
                return Ok(StepResult::Yield(Want::WRITE));
            }
            *flushed = true;
        }

        Self::step_execute(drain, handle, ready)
    }
}

fn finish_on_copy(state: &mut ExecuteState, copy_result: PgResult) -> Vec<PgResult> {
    state.results.push(copy_result);
    std::mem::take(&mut state.results)
}

enum StepResult {
    Yield(Want),
    Done(GeneratorValue),
}

/// The terminal payload a generator produces; the caller downcasts based on
/// which generator it ran.
pub enum GeneratorValue {
    Results(Vec<PgResult>),
    CopyData(Option<bytes::Bytes>),
    Unit,
}

impl GeneratorValue {
    pub fn into_results(self) -> Result<Vec<PgResult>> {
        match self {
            GeneratorValue::Results(r) => Ok(r),
            _ => Err(crate::error::protocol_err!("expected a result list").into()),
        }
    }

    pub fn into_copy_data(self) -> Result<Option<bytes::Bytes>> {
        match self {
            GeneratorValue::CopyData(b) => Ok(b),
            _ => Err(crate::error::protocol_err!("expected copy data").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn handle_pair() -> (WireHandle<UnixStream>, WireHandle<UnixStream>) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (WireHandle::new(a), WireHandle::new(b))
    }

    #[test]
    fn copy_to_generator_writes_its_buffer_and_completes() {
        let (mut client, _server) = handle_pair();
        let mut gen = Generator::copy_to(b"1\t2\n".to_vec());
        match gen.step(&mut client, None) {
            GenOutcome::Done(Ok(GeneratorValue::Unit)) => {}
            GenOutcome::Done(Err(err)) => panic!("unexpected error: {err}"),
            _ => panic!("expected immediate completion on an unblocked socket"),
        }
    }

    /// Every parameterized `execute` and every `copy_in`/`copy_out` queues
    /// the extended-query sequence (`Parse`/`Bind`/`Describe`/`Execute`/
    /// `Sync`), whose acks (`ParseComplete`, `BindComplete`, `NoData`) must
    /// not derail the drain loop before the `CommandComplete`/
    /// `ReadyForQuery` pair that ends it.
    #[test]
    fn execute_generator_tolerates_the_extended_query_handshake_acks() {
        use crate::waiter::BlockingWaiter;
        use std::io::Write;

        let (a, mut server) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut client = WireHandle::new(a);

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
        server.write(&reply).unwrap();

        let waiter = BlockingWaiter::new();
        let results = waiter.run(&mut client, Generator::execute()).unwrap().into_results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status(), crate::result::ResultStatus::CommandOk);
        assert_eq!(results[0].command_tag(), Some("BEGIN"));
    }
}
