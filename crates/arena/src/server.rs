//! Game-facing arena server.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use arena_engine::{ConnectionId, ServerConfig, ServerEngine, ServerState, WorkerExit};
use arena_protocol::{
    EntitiesMessage, EntityMessage, GameReady, Message, PlayerCommand, decode_bytes, encode_to_vec,
};
use tracing::{debug, info};

use crate::error::ArenaError;
use crate::lobby::{LobbyConfig, LobbyHandler};

/// The arena server as the game loop sees it.
///
/// Wraps a [`ServerEngine`] answering lobby requests with a
/// [`LobbyHandler`] and speaks typed messages instead of bytes.
#[derive(Debug)]
pub struct ArenaServer {
    engine: ServerEngine<LobbyHandler>,
}

impl ArenaServer {
    pub fn new(config: ServerConfig, lobby: LobbyConfig) -> Self {
        Self {
            engine: ServerEngine::new(config, LobbyHandler::new(lobby)),
        }
    }

    /// Starts the engine and opens the lobby. Returns the bound address.
    pub fn start(&mut self) -> Result<SocketAddr, ArenaError> {
        let addr = self.engine.start()?;
        self.engine.handler().clear();
        self.engine.start_lobby()?;
        Ok(addr)
    }

    /// Reopens the lobby after a game.
    pub fn start_lobby(&self) -> Result<(), ArenaError> {
        self.engine.start_lobby()?;
        Ok(())
    }

    /// Starts the game and tells every client about it.
    pub fn start_playing(&self) -> Result<(), ArenaError> {
        self.engine.start_playing()?;
        self.broadcast(GameReady {})
    }

    /// Sends the world to every connected client.
    pub fn send_game_state(&self, entities: Vec<EntityMessage>) -> Result<(), ArenaError> {
        self.broadcast(EntitiesMessage { entities })
    }

    fn broadcast(&self, message: impl Into<Message>) -> Result<(), ArenaError> {
        let payload = encode_to_vec(message)?;
        let patience = self.engine.config().response_patience;
        self.engine.broadcast(payload, patience)?;
        Ok(())
    }

    /// The latest command of every player that sent one since the last call.
    ///
    /// Anything that is not a valid player command is logged and skipped.
    pub fn player_commands(&self) -> Vec<(ConnectionId, PlayerCommand)> {
        self.engine
            .gather_player_data()
            .into_iter()
            .filter_map(|(id, data)| match decode_bytes(&data) {
                Ok(Message::PlayerCommand(command)) => Some((id, command)),
                Ok(other) => {
                    debug!(client = %id, message_type = other.message_type(), "ignoring player data");
                    None
                }
                Err(e) => {
                    debug!(client = %id, error = %e, "undecodable player data");
                    None
                }
            })
            .collect()
    }

    /// Players that joined the lobby and are still connected.
    pub fn joined_players(&self) -> Vec<(ConnectionId, String)> {
        self.engine.handler().joined_players(&self.engine.roster())
    }

    /// Connections alive right now.
    pub fn connected_players(&self) -> Vec<ConnectionId> {
        self.engine.connected_players()
    }

    /// The players of the current game.
    pub fn players(&self) -> Vec<ConnectionId> {
        self.engine.players()
    }

    pub fn state(&self) -> ServerState {
        self.engine.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.engine.local_addr()
    }

    /// Waits up to `timeout` for at least `count` players to join.
    pub fn wait_for_players(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.joined_players().len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn stop(&mut self) -> WorkerExit {
        let exit = self.engine.stop();
        info!(?exit, "arena server stopped");
        exit
    }
}
