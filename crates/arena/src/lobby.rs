//! Lobby request handling.
//!
//! [`LobbyHandler`] answers the requests a client makes before the game
//! starts. It remembers the name each connection joined under and
//! nothing else.

use std::sync::{Mutex, PoisonError};

use arena_engine::{ConnectionId, RequestContext, RequestHandler, RosterView};
use arena_protocol::{
    ErrorMessage, LobbyInfoResponse, Message, STATUS_OK, ServerResponse, decode_bytes,
    encode_to_vec,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Static lobby content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyConfig {
    /// High-score table, best first.
    pub highscores: Vec<String>,
    /// Colors players may pick from.
    pub available_colors: Vec<String>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            highscores: (1..=10).rev().map(|n| n.to_string()).collect(),
            available_colors: ["red", "blue", "green", "yellow", "purple"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Answers lobby requests and keeps track of who joined.
#[derive(Debug, Default)]
pub struct LobbyHandler {
    config: LobbyConfig,
    /// Connection → display name, in join order.
    joined: Mutex<Vec<(ConnectionId, String)>>,
}

impl LobbyHandler {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            joined: Mutex::default(),
        }
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// Computes the reply to one raw request.
    pub fn respond(&self, ctx: &RequestContext, request: &[u8]) -> Message {
        let message = match decode_bytes(request) {
            Ok(message) => message,
            Err(e) => {
                debug!(client = %ctx.client, error = %e, "undecodable request");
                return ErrorMessage::new(e.to_string()).into();
            }
        };

        match message {
            Message::JoinLobby(join) => {
                info!(client = %ctx.client, name = %join.player_name, "player joined lobby");
                self.record_join(ctx.client, join.player_name);
                ServerResponse::ok("Joined lobby").into()
            }
            Message::LobbyInfo(_) => {
                debug!(client = %ctx.client, "lobby info requested");
                LobbyInfoResponse {
                    status: STATUS_OK,
                    message: "Here ya go!".into(),
                    player_names: self
                        .joined_players(&ctx.connected)
                        .into_iter()
                        .map(|(_, name)| name)
                        .collect(),
                    highscores: self.config.highscores.clone(),
                    available_colors: self.config.available_colors.clone(),
                }
                .into()
            }
            other => {
                debug!(
                    client = %ctx.client,
                    message_type = other.message_type(),
                    "not a lobby request"
                );
                ServerResponse::rejected("Invalid message").into()
            }
        }
    }

    fn record_join(&self, client: ConnectionId, name: String) {
        let mut joined = self.joined.lock().unwrap_or_else(PoisonError::into_inner);
        match joined.iter_mut().find(|(id, _)| *id == client) {
            Some(entry) => entry.1 = name,
            None => joined.push((client, name)),
        }
    }

    /// Joined players that are still connected, in join order.
    ///
    /// Players that disconnected without leaving are forgotten here.
    pub fn joined_players(&self, connected: &RosterView<ConnectionId>) -> Vec<(ConnectionId, String)> {
        let mut joined = self.joined.lock().unwrap_or_else(PoisonError::into_inner);
        joined.retain(|(id, _)| connected.contains(id));
        joined.clone()
    }

    /// The name `client` joined under.
    pub fn player_name(&self, client: &ConnectionId) -> Option<String> {
        self.joined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(id, _)| id == client)
            .map(|(_, name)| name.clone())
    }

    /// Forgets every joined player.
    pub fn clear(&self) {
        self.joined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RequestHandler for LobbyHandler {
    fn handle(&self, ctx: &RequestContext, request: &[u8]) -> Vec<u8> {
        let reply = self.respond(ctx, request);
        encode_to_vec(reply).unwrap_or_else(|e| {
            error!(client = %ctx.client, error = %e, "failed to encode reply");
            Vec::new()
        })
    }
}
