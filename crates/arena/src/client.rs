//! Game-facing arena client.

use std::time::{Duration, Instant};

use arena_engine::{ClientConfig, ClientEngine, ClientState, EngineError, WorkerExit};
use arena_protocol::{
    Direction, EntitiesMessage, JoinLobbyRequest, LobbyInfoRequest, LobbyInfoResponse, Message,
    PlayerCommand, STATUS_OK, Schema, ServerResponse, decode_bytes, encode_to_vec,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ArenaError;

/// Configuration for an [`ArenaClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaClientConfig {
    pub engine: ClientConfig,
    /// How long [`ArenaClient::connect`] waits, and how long
    /// [`ArenaClient::disconnect`] waits for the connection to close.
    pub connect_timeout: Duration,
    /// Reply timeout for `join_lobby`.
    pub request_timeout: Duration,
    /// Reply timeout for `get_lobby_info`.
    pub lobby_info_timeout: Duration,
    /// How long `wait_game_ready` waits for the game to start.
    pub game_ready_timeout: Duration,
    /// How long `get_world_update` waits for a frame.
    pub update_timeout: Duration,
    /// How long a send may wait for room in the outbound mailbox.
    pub send_patience: Duration,
}

impl ArenaClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            engine: ClientConfig::new(server_addr),
            ..Self::default()
        }
    }
}

impl Default for ArenaClientConfig {
    fn default() -> Self {
        Self {
            engine: ClientConfig::default(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(1),
            lobby_info_timeout: Duration::from_secs(2),
            game_ready_timeout: Duration::from_secs(2),
            update_timeout: Duration::from_millis(100),
            send_patience: Duration::from_millis(100),
        }
    }
}

/// The arena client as the game loop sees it.
#[derive(Debug)]
pub struct ArenaClient {
    config: ArenaClientConfig,
    engine: ClientEngine,
}

impl ArenaClient {
    pub fn new(config: ArenaClientConfig) -> Self {
        let engine = ClientEngine::new(config.engine.clone());
        Self { config, engine }
    }

    pub fn config(&self) -> &ArenaClientConfig {
        &self.config
    }

    /// Starts the engine if needed and connects to the server.
    pub fn connect(&mut self) -> Result<(), ArenaError> {
        match self.engine.start() {
            Ok(()) | Err(EngineError::AlreadyStarted) => {}
            Err(e) => return Err(e.into()),
        }
        self.engine.connect(self.config.connect_timeout)?;
        info!(addr = %self.config.engine.server_addr, "connected");
        Ok(())
    }

    /// Closes the connection and stops the engine.
    pub fn disconnect(&mut self) -> WorkerExit {
        if self.engine.disconnect().is_ok()
            && self
                .engine
                .wait_for_state(|s| s != ClientState::Running, self.config.connect_timeout)
                .is_none()
        {
            warn!("connection did not close in time");
        }
        self.engine.stop()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_running()
    }

    pub fn state(&self) -> ClientState {
        self.engine.state()
    }

    /// Joins the lobby under `name`.
    pub fn join_lobby(&self, name: impl Into<String>) -> Result<(), ArenaError> {
        let reply: ServerResponse = self.request(
            JoinLobbyRequest {
                player_name: name.into(),
            },
            self.config.request_timeout,
        )?;
        check_status(reply.status, reply.message)
    }

    /// Asks the server who is in the lobby.
    pub fn get_lobby_info(&self) -> Result<LobbyInfoResponse, ArenaError> {
        let info: LobbyInfoResponse =
            self.request(LobbyInfoRequest {}, self.config.lobby_info_timeout)?;
        check_status(info.status, info.message.clone())?;
        Ok(info)
    }

    /// Waits for the server to start the game.
    ///
    /// A world update also counts, in case the start notice was
    /// overwritten by the first update.
    pub fn wait_game_ready(&self) -> bool {
        let deadline = Instant::now() + self.config.game_ready_timeout;
        while let Some(message) = self.next_message(deadline) {
            match message {
                Message::GameReady(_) | Message::Entities(_) => return true,
                other => debug!(message_type = other.message_type(), "waiting for game start"),
            }
        }
        false
    }

    /// Sends one steering command for this tick.
    pub fn send_command(&self, player_name: &str, command: Direction) -> Result<(), ArenaError> {
        self.send(PlayerCommand {
            player_name: player_name.to_owned(),
            command,
        })
    }

    /// The next world update, if one arrives within the update timeout.
    pub fn get_world_update(&self) -> Option<EntitiesMessage> {
        let deadline = Instant::now() + self.config.update_timeout;
        while let Some(message) = self.next_message(deadline) {
            match message {
                Message::Entities(update) => return Some(update),
                other => debug!(message_type = other.message_type(), "skipping non-update frame"),
            }
        }
        None
    }

    fn send(&self, message: impl Into<Message>) -> Result<(), ArenaError> {
        if !self.engine.is_running() {
            return Err(ArenaError::Disconnected);
        }
        let payload = encode_to_vec(message)?;
        self.engine.send(payload, self.config.send_patience)?;
        Ok(())
    }

    /// Sends `request` and waits up to `timeout` for a reply of type `R`.
    ///
    /// Frames left over from earlier exchanges, such as a reply that came
    /// in after its request timed out, are dropped first. Broadcasts
    /// arriving in between are skipped. An error reply from the server is
    /// reported as [`ArenaError::Rejected`].
    fn request<R>(&self, request: impl Into<Message>, timeout: Duration) -> Result<R, ArenaError>
    where
        R: Schema + TryFrom<Message, Error = Message>,
    {
        let stale = self.engine.discard_received();
        if stale > 0 {
            debug!(stale, expected = R::TYPE, "dropped unread frames before request");
        }
        self.send(request)?;
        let deadline = Instant::now() + timeout;
        loop {
            let Some(message) = self.next_message(deadline) else {
                return Err(if self.engine.is_running() {
                    ArenaError::Timeout(timeout)
                } else {
                    ArenaError::Disconnected
                });
            };
            let message = match R::try_from(message) {
                Ok(reply) => return Ok(reply),
                Err(message) => message,
            };
            match message {
                broadcast @ (Message::GameReady(_) | Message::Entities(_)) => {
                    debug!(message_type = broadcast.message_type(), "skipping broadcast");
                }
                Message::Error(err) => {
                    return Err(ArenaError::Rejected {
                        status: err.status,
                        message: err.message,
                    });
                }
                Message::ServerResponse(resp) if resp.status != STATUS_OK => {
                    return Err(ArenaError::Rejected {
                        status: resp.status,
                        message: resp.message,
                    });
                }
                other => {
                    return Err(ArenaError::UnexpectedMessage {
                        expected: R::TYPE,
                        got: other.message_type(),
                    });
                }
            }
        }
    }

    /// Next decodable frame before `deadline`. Undecodable frames are
    /// logged and skipped.
    fn next_message(&self, deadline: Instant) -> Option<Message> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = self.engine.receive(remaining)?;
            match decode_bytes(&frame) {
                Ok(message) => return Some(message),
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            }
            if remaining.is_zero() {
                return None;
            }
        }
    }
}

fn check_status(status: i32, message: String) -> Result<(), ArenaError> {
    if status == STATUS_OK {
        Ok(())
    } else {
        Err(ArenaError::Rejected { status, message })
    }
}
