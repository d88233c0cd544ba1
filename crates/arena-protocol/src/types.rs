//! Message shapes for the arena wire format.
//!
//! Each struct here is the body of one message type. On the wire every body
//! is a JSON object with a `"type"` field naming its shape; that field is
//! not stored in the structs. It is a constant of the shape, exposed
//! through [`Schema::TYPE`], and added by the [`Message`](crate::Message)
//! enum when encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status code for a successful reply.
pub const STATUS_OK: i32 = 0;

/// Status code for a rejected or invalid request.
pub const STATUS_ERROR: i32 = 1;

/// A message shape with a fixed discriminator.
///
/// The discriminator is an associated constant, so it cannot differ
/// between two instances of the same shape.
pub trait Schema {
    /// The value of the `"type"` field for this shape.
    const TYPE: &'static str;
}

/// One grid cell occupied by an entity, as `(x, y)`.
///
/// Serialized as a two-element array: `[3, 4]`.
pub type Segment = (i32, i32);

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

/// Client → Server: "I want to join the lobby under this name."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinLobbyRequest {
    /// Display name the player picked.
    pub player_name: String,
}

/// Client → Server: "Who is in the lobby?"
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LobbyInfoRequest {}

/// Server → Client: the current lobby contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyInfoResponse {
    /// [`STATUS_OK`] on success.
    pub status: i32,
    /// Human-readable note.
    pub message: String,
    /// Names of players who joined and are still connected.
    pub player_names: Vec<String>,
    /// High-score table, best first.
    pub highscores: Vec<String>,
    /// Colors a player may still pick.
    pub available_colors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// A steering command produced by the input system.
///
/// Serialized in upper case: `"UP"`, `"DOWN"`, `"LEFT"`, `"RIGHT"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// The direction pointing the other way.
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Grid offset for one step, with `y` growing downwards.
    pub fn delta(self) -> Segment {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        };
        f.write_str(s)
    }
}

/// Client → Server during play: one steering command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCommand {
    /// Name the player joined the lobby with.
    pub player_name: String,
    /// Where to steer.
    pub command: Direction,
}

/// Server → Client: the lobby is closed and the game is starting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameReady {}

/// One positioned, colored entity in a world update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMessage {
    /// Kind of entity, e.g. `"snake"` or `"food"`.
    pub entity_id: String,
    /// Cells the entity occupies, head first.
    pub body: Vec<Segment>,
    /// Render color.
    pub color: String,
}

/// Server → Client during play: the whole world for this tick.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntitiesMessage {
    pub entities: Vec<EntityMessage>,
}

// ---------------------------------------------------------------------------
// Generic replies
// ---------------------------------------------------------------------------

/// Server → Client: generic acknowledgement of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    /// [`STATUS_OK`] or [`STATUS_ERROR`].
    pub status: i32,
    pub message: String,
}

impl ServerResponse {
    /// A successful reply.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK,
            message: message.into(),
        }
    }

    /// A rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR,
            message: message.into(),
        }
    }
}

/// Server → Client: the request could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub status: i32,
    pub message: String,
}

impl ErrorMessage {
    /// An error reply with [`STATUS_ERROR`].
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "\"UP\"");
        assert_eq!(
            serde_json::from_str::<Direction>("\"LEFT\"").unwrap(),
            Direction::Left
        );
    }

    #[test]
    fn test_direction_rejects_lower_case() {
        assert!(serde_json::from_str::<Direction>("\"up\"").is_err());
    }

    #[test]
    fn test_direction_opposite_and_delta() {
        for d in [Direction::Up, Direction::Down, Direction::Left, Direction::Right] {
            assert_eq!(d.opposite().opposite(), d);
            let (dx, dy) = d.delta();
            let (ox, oy) = d.opposite().delta();
            assert_eq!((dx + ox, dy + oy), (0, 0));
        }
    }

    #[test]
    fn test_segment_serializes_as_pair() {
        let entity = EntityMessage {
            entity_id: "food".into(),
            body: vec![(3, 4)],
            color: "red".into(),
        };
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["body"], serde_json::json!([[3, 4]]));
    }

    #[test]
    fn test_server_response_constructors() {
        assert_eq!(ServerResponse::ok("fine").status, STATUS_OK);
        assert_eq!(ServerResponse::rejected("no").status, STATUS_ERROR);
        assert_eq!(ErrorMessage::new("bad").status, STATUS_ERROR);
    }
}
