//! Wire protocol for the arena.
//!
//! Messages are JSON objects carrying a `"type"` discriminator:
//!
//! - **Types** ([`JoinLobbyRequest`], [`EntitiesMessage`], ...): the body
//!   of each message shape.
//! - **Message** ([`Message`]): the sum of all shapes, plus the static
//!   registry mapping each discriminator to its decoder.
//! - **Codec** ([`decode`], [`encode`]): text ⇄ [`Message`], with every
//!   decode failure classified as a [`DecodeError`].
//!
//! The protocol layer knows nothing about connections. The transport moves
//! frames; this crate gives those frames meaning.
//!
//! ```rust
//! use arena_protocol::{decode, encode, JoinLobbyRequest, Message};
//!
//! let msg: Message = JoinLobbyRequest { player_name: "ducks".into() }.into();
//! let text = encode(&msg).unwrap();
//! assert_eq!(text, r#"{"type":"join_lobby","player_name":"ducks"}"#);
//! assert_eq!(decode(&text).unwrap(), msg);
//! ```

mod codec;
mod error;
mod message;
mod types;

pub use codec::{decode, decode_bytes, encode, encode_to_vec};
pub use error::{DecodeError, ProtocolError};
pub use message::{Message, known_types};
pub use types::{
    Direction, EntitiesMessage, EntityMessage, ErrorMessage, GameReady,
    JoinLobbyRequest, LobbyInfoRequest, LobbyInfoResponse, PlayerCommand,
    STATUS_ERROR, STATUS_OK, Schema, Segment, ServerResponse,
};
