//! The non-blocking socket half of component A: buffers frontend messages
//! for writing, buffers and frames backend messages for reading, and
//! reports `EWOULDBLOCK` as a readiness intent rather than an error so the
//! generator (§4.B) can yield it up to a waiter (§4.C).
//!
//! Grounded on the teacher's `blocking::runtime::IoStream`/`io::buf_stream`
//! buffering shape, adapted from async `Future`-driven I/O to plain
//! `std::io` non-blocking reads/writes: the socket is put in non-blocking
//! mode once at construction and every call here either makes progress or
//! returns the `Ready` interest that would unblock it.

use crate::error::{Error, Result};
use crate::message::{Backend, Frontend, TransactionStatus};
use bytes::BytesMut;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

/// The readiness a caller must wait for before calling back in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ready {
    Readable,
    Writable,
}

const READ_CHUNK: usize = 8 * 1024;

/// A buffered, non-blocking wire connection to a server. Generic over the
/// underlying socket type so the same buffering logic serves both
/// `TcpStream` and `UnixStream`.
pub struct WireHandle<S> {
    socket: S,
    wbuf: Vec<u8>,
    wbuf_pos: usize,
    rbuf: BytesMut,
    transaction_status: TransactionStatus,
}

impl<S: Read + Write + AsRawFd> WireHandle<S> {
    /// Wraps an already-connected, already-non-blocking socket. Startup and
    /// authentication are assumed to have already completed (§1 Non-goals).
    pub fn new(socket: S) -> WireHandle<S> {
        WireHandle {
            socket,
            wbuf: Vec::new(),
            wbuf_pos: 0,
            rbuf: BytesMut::with_capacity(READ_CHUNK),
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// The connection's transaction status as of the last `ReadyForQuery`,
    /// per §3's `WireHandle::transaction_status`. A client-initiated COPY
    /// abort leaves this `InError` (§5, §8 property 8) once the server's
    /// `ReadyForQuery` for the aborted sub-protocol arrives.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub(crate) fn set_transaction_status(&mut self, status: TransactionStatus) {
        self.transaction_status = status;
    }

    /// Queues a frontend message for the next `flush`.
    pub fn enqueue(&mut self, message: &Frontend<'_>) {
        message.encode(&mut self.wbuf);
    }

    /// Drives the pending write buffer toward the socket. Returns `Ok(true)`
    /// once everything queued has been written, `Ok(false)` with
    /// `Ready::Writable` meaning "call again once writable" encoded by the
    /// caller checking the return, or an error for anything but
    /// `WouldBlock`.
    pub fn flush(&mut self) -> Result<bool> {
        while self.wbuf_pos < self.wbuf.len() {
            match self.socket.write(&self.wbuf[self.wbuf_pos..]) {
                Ok(0) => return Err(Error::Io(io::Error::from(ErrorKind::WriteZero))),
                Ok(n) => self.wbuf_pos += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        self.wbuf.clear();
        self.wbuf_pos = 0;
        Ok(true)
    }

    /// Reads as much as is available into the read buffer without blocking.
    /// Returns `Ok(true)` if any bytes were read, `Ok(false)` if the socket
    /// would block (caller should wait for `Ready::Readable`).
    fn fill(&mut self) -> Result<bool> {
        let mut read_any = false;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.socket.read(&mut chunk) {
                Ok(0) => {
                    if read_any {
                        return Ok(true);
                    }
                    return Err(Error::Io(io::Error::from(ErrorKind::UnexpectedEof)));
                }
                Ok(n) => {
                    self.rbuf.extend_from_slice(&chunk[..n]);
                    read_any = true;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(read_any),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Attempts to parse and remove one backend message from the read
    /// buffer, filling from the socket first if nothing is buffered yet.
    /// Returns `Ok(None)` when the caller should wait for `Ready::Readable`.
    pub fn try_recv(&mut self) -> Result<Option<Backend>> {
        if let Some(message) = crate::message::try_parse(&mut self.rbuf)? {
            return Ok(Some(message));
        }
        if !self.fill()? {
            return Ok(None);
        }
        crate::message::try_parse(&mut self.rbuf)
    }

    /// The readiness this handle is currently blocked on, given that the
    /// write buffer is non-empty iff a write is in flight.
    pub fn pending_interest(&self) -> Ready {
        if self.wbuf_pos < self.wbuf.len() {
            Ready::Writable
        } else {
            Ready::Readable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn flush_then_recv_round_trips_a_message() {
        let (client, server) = pair();
        let mut client = WireHandle::new(client);
        let mut server = WireHandle::new(server);

        client.enqueue(&Frontend::Query { sql: "select 1" });
        assert!(client.flush().unwrap());

        // give the kernel a moment to schedule the datagram onto the peer
        std::thread::sleep(std::time::Duration::from_millis(10));

        // can't parse a frontend `Query` as a backend message directly here;
        // this just exercises that bytes make it across and `try_recv`
        // reports "need more data" rather than erroring on a partial frame.
        let _ = server.try_recv();
    }

    #[test]
    fn try_recv_reports_none_when_nothing_buffered_and_socket_blocks() {
        let (_client, server) = pair();
        let mut server = WireHandle::new(server);
        assert!(matches!(server.try_recv(), Ok(None)));
    }
}
