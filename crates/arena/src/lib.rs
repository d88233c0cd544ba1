//! # Arena
//!
//! Networking for a small multiplayer arena game.
//!
//! The game loop owns an [`ArenaServer`] or an [`ArenaClient`] and talks
//! typed messages to it. Underneath, each one runs a network engine on its
//! own worker thread, so a slow socket never stalls a frame.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use arena::prelude::*;
//!
//! # fn main() -> Result<(), ArenaError> {
//! let mut server = ArenaServer::new(ServerConfig::new("127.0.0.1:5555"), LobbyConfig::default());
//! server.start()?;
//!
//! let mut client = ArenaClient::new(ArenaClientConfig::new("127.0.0.1:5555"));
//! client.connect()?;
//! client.join_lobby("ducks")?;
//!
//! server.wait_for_players(1, Duration::from_secs(1));
//! server.start_playing()?;
//! assert!(client.wait_game_ready());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod lobby;
mod server;

pub use client::{ArenaClient, ArenaClientConfig};
pub use error::ArenaError;
pub use lobby::{LobbyConfig, LobbyHandler};
pub use server::ArenaServer;

/// Re-exports everything a game needs.
pub mod prelude {
    pub use crate::{ArenaClient, ArenaClientConfig, ArenaError, ArenaServer, LobbyConfig};
    pub use arena_engine::{
        ClientConfig, ClientState, ConnectionId, DEFAULT_ADDR, ServerConfig, ServerState, WorkerExit,
    };
    pub use arena_protocol::{
        Direction, EntitiesMessage, EntityMessage, LobbyInfoResponse, PlayerCommand, Segment,
    };
}
