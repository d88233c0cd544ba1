//! Client and server network engines for the arena.
//!
//! Both engines follow the same shape. The public handle is synchronous
//! and is meant to be owned by the game loop. The networking runs on an
//! isolated [`Worker`](arena_ipc::Worker) with its own single-threaded
//! runtime, and the two sides meet only at mailboxes and a shared state
//! register.
//!
//! - [`ClientEngine`]: one connection, `Idle → Connecting → Running`,
//!   drops back to `Idle` by itself when the connection is lost.
//! - [`ServerEngine`]: many connections, `Idle → Lobby ⇄ Playing`, lobby
//!   requests answered by a [`RequestHandler`] on its own thread.
//!
//! Payloads are opaque bytes here; giving them meaning is the job of the
//! protocol layer above.

mod client;
mod config;
mod error;
mod server;

pub use client::{ClientEngine, ClientState};
pub use config::{ClientConfig, DEFAULT_ADDR, ServerConfig};
pub use error::EngineError;
pub use server::{RequestContext, RequestHandler, Route, ServerEngine, ServerState};

pub use arena_ipc::{RosterView, ShutdownPolicy, WorkerExit};
pub use arena_transport::ConnectionId;
