//! Component C: drives a [`Generator`] to completion against a
//! [`WireHandle`]. Two implementations share one job — "given a generator,
//! return its terminal value" — so the rest of the crate is agnostic to
//! which concurrency model actually waits on the socket.
//!
//! This module is the one place allowed to step outside
//! `#![forbid(unsafe_code)]`: `libc::poll` is a raw FFI call, matching the
//! teacher's own per-module `#[allow(unsafe_code)]` carve-outs around its
//! `libc`/`libsqlite3-sys` FFI boundaries.
#![allow(unsafe_code)]

use crate::error::{Error, Result};
use crate::generator::{GenOutcome, Generator, GeneratorValue, Want};
use crate::io::{Ready, WireHandle};
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// How often the blocking waiter re-checks its cancellation flag between
/// `poll` calls, per §4.C.
const POLL_TICK: Duration = Duration::from_millis(250);

fn want_to_poll_events(want: Want) -> libc::c_short {
    let mut events = 0;
    if want.contains(Want::READ) {
        events |= libc::POLLIN;
    }
    if want.contains(Want::WRITE) {
        events |= libc::POLLOUT;
    }
    events
}

fn poll_revents_to_ready(revents: libc::c_short) -> Ready {
    if revents & libc::POLLOUT != 0 {
        Ready::Writable
    } else {
        Ready::Readable
    }
}

/// Drives a generator with a blocking `libc::poll` loop, matching the
/// teacher's existing `libc` dependency. `cancel` is polled once per tick
/// so a caller on another thread can interrupt a long-running wait; no
/// readiness registration survives past `step` returning `Done`.
pub struct BlockingWaiter<'a> {
    cancel: Option<&'a (dyn Fn() -> bool + Sync)>,
}

impl<'a> BlockingWaiter<'a> {
    pub fn new() -> BlockingWaiter<'a> {
        BlockingWaiter { cancel: None }
    }

    pub fn with_cancellation(cancel: &'a (dyn Fn() -> bool + Sync)) -> BlockingWaiter<'a> {
        BlockingWaiter { cancel: Some(cancel) }
    }

    pub fn run<S: io::Read + io::Write + AsRawFd>(
        &self,
        handle: &mut WireHandle<S>,
        mut generator: Generator,
    ) -> Result<GeneratorValue> {
        let mut ready = None;
        loop {
            match generator.step(handle, ready) {
                GenOutcome::Done(result) => return result,
                GenOutcome::Yield(fd, want) => {
                    ready = Some(self.poll_once(fd, want)?);
                }
            }
        }
    }

    fn poll_once(&self, fd: std::os::unix::io::RawFd, want: Want) -> Result<Ready> {
        let mut pfd = libc::pollfd { fd, events: want_to_poll_events(want), revents: 0 };
        loop {
            if let Some(cancel) = self.cancel {
                if cancel() {
                    return Err(Error::QueryCanceled("operation canceled by caller".into()));
                }
            }
            let timeout_ms = POLL_TICK.as_millis() as libc::c_int;
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            match rc {
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err.into());
                }
                0 => continue, // tick elapsed, re-check cancellation
                _ => return Ok(poll_revents_to_ready(pfd.revents)),
            }
        }
    }
}

impl<'a> Default for BlockingWaiter<'a> {
    fn default() -> Self {
        BlockingWaiter::new()
    }
}

#[cfg(feature = "runtime-tokio")]
pub mod cooperative {
    use super::*;
    use tokio::io::unix::AsyncFd;
    use tokio::io::Interest;

    /// Drives a generator from a tokio event loop via `AsyncFd`. Per §9's
    /// cancellation note, the `AsyncFd` guard (and therefore its readiness
    /// registration) is dropped before the next `step` call rather than
    /// held across an await point past cancellation, so a dropped future
    /// never leaves a stale waker registered with the reactor.
    pub struct CooperativeWaiter;

    impl CooperativeWaiter {
        pub async fn run<S: io::Read + io::Write + AsRawFd>(
            handle: &mut WireHandle<S>,
            mut generator: Generator,
        ) -> Result<GeneratorValue> {
            let mut ready = None;
            loop {
                match generator.step(handle, ready) {
                    GenOutcome::Done(result) => return result,
                    GenOutcome::Yield(fd, want) => {
                        ready = Some(Self::wait_once(fd, want).await?);
                    }
                }
            }
        }

        async fn wait_once(fd: std::os::unix::io::RawFd, want: Want) -> Result<Ready> {
            let readable = want.contains(Want::READ);
            let writable = want.contains(Want::WRITE);
            let interest = match (readable, writable) {
                (true, true) => Interest::READABLE | Interest::WRITABLE,
                (true, false) => Interest::READABLE,
                (false, true) => Interest::WRITABLE,
                (false, false) => unreachable!("a generator always yields at least one direction"),
            };

            // `fd` outlives this call; it is owned by the `WireHandle` the
            // caller holds for the duration of `run`, and `BorrowedFdShim`
            // never closes it.
            let borrowed = BorrowedFdShim(fd);
            let async_fd = AsyncFd::with_interest(borrowed, interest)?;

            let result = tokio::select! {
                result = async_fd.readable(), if readable => {
                    let _guard = result?;
                    Ready::Readable
                }
                result = async_fd.writable(), if writable => {
                    let _guard = result?;
                    Ready::Writable
                }
            };
            // `async_fd` (and its reactor registration) drops here, before
            // `result` is returned to the generator loop.
            Ok(result)
        }
    }

    /// A non-owning `RawFd` wrapper satisfying `AsRawFd` so `AsyncFd` can
    /// register interest in a socket the `WireHandle` still owns, without
    /// taking ownership away from it.
    struct BorrowedFdShim(std::os::unix::io::RawFd);

    impl AsRawFd for BorrowedFdShim {
        fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
            self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn blocking_waiter_drives_a_copy_to_generator_to_completion() {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut handle = WireHandle::new(a);
        let waiter = BlockingWaiter::new();
        let result = waiter.run(&mut handle, Generator::copy_to(b"hello\n".to_vec()));
        assert!(matches!(result, Ok(GeneratorValue::Unit)));
    }

    #[test]
    fn blocking_waiter_honors_cancellation() {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut handle = WireHandle::new(a);
        let cancel = || true;
        let waiter = BlockingWaiter::with_cancellation(&cancel);
        // copy_from on a handle with no data waiting yields immediately,
        // giving the cancellation check a chance to fire on the first poll.
        let result = waiter.run(&mut handle, Generator::copy_from());
        assert!(matches!(result, Err(Error::QueryCanceled(_))));
    }
}
