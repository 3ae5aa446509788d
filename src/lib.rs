//! `pg-core`: the execution engine shared by a blocking and a cooperative
//! PostgreSQL client API.
//!
//! This crate covers the hard middle of a PostgreSQL driver — the part
//! that drives the frontend/backend wire protocol from a resumable state
//! machine so the same engine can be wound forward by a blocking
//! `libc::poll` loop or by a `tokio` event loop — plus the COPY streaming
//! subsystem and the array codec that sit on top of it. Connection
//! establishment, authentication, the full scalar type-adapter registry,
//! and anything resembling a CLI or connection pool are explicitly out of
//! scope; see each module's doc comment for what it is grounded on.
//!
//! Module map, leaves first (matching the component table this crate was
//! designed from):
//!
//! - [`io`] — the non-blocking wire handle (component A).
//! - [`message`] — frontend/backend message framing consumed by `io`.
//! - [`generator`] — the resumable protocol state machine (component B).
//! - [`waiter`] — the blocking and cooperative drivers for a generator
//!   (component C).
//! - [`transformer`] — the dumper/loader registry (component D).
//! - [`query`] — placeholder rewriting (component E).
//! - [`cursor`] — the cursor core and COPY session types (component F).
//! - `cursor_async` (behind `runtime-tokio`) — the same component F
//!   orchestration driven by [`waiter::cooperative::CooperativeWaiter`]
//!   instead of [`waiter::BlockingWaiter`].
//! - [`copy`] — COPY row framing (component G).
//! - [`array`] — the array codec (component H).
//! - [`result`] — the immutable per-statement result object.
//! - [`error`] — the error taxonomy.
//! - [`logging`] — the ambient `log`-based logging surface.

#![forbid(unsafe_code)]

#[macro_use]
pub mod error;

pub mod array;
pub mod copy;
pub mod cursor;
#[cfg(feature = "runtime-tokio")]
pub mod cursor_async;
pub mod generator;
pub mod io;
mod logging;
pub mod message;
pub mod query;
pub mod result;
pub mod transformer;
pub mod waiter;

pub use cursor::{Config, Copy, Cursor, CopyIn, CopyOut};
#[cfg(feature = "runtime-tokio")]
pub use cursor_async::{AsyncCopy, AsyncCopyIn, AsyncCopyOut, AsyncCursor};
pub use error::{Error, Result};
pub use message::Format;
pub use result::{Column, PgResult, ResultStatus};
