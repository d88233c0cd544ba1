//! Primitives shared between the game thread and the networking worker.
//!
//! The engines keep the game side and the networking side apart. The only
//! things that cross between them are the types in this crate:
//!
//! - [`Mailbox`]: bounded, non-blocking handoff of values.
//! - [`StateRegister`]: the engine state, lock-protected, with a terminal
//!   state that can never be left.
//! - [`Roster`] / [`RosterView`]: the live connection list, writable by
//!   the networking side only.
//! - [`Worker`]: the isolated thread itself, with escalating shutdown.

mod mailbox;
mod roster;
mod state;
mod worker;

pub use mailbox::{Mailbox, MailboxFull};
pub use roster::{Roster, RosterView};
pub use state::{EngineState, StateRegister};
pub use worker::{ShutdownPolicy, Worker, WorkerExit};
