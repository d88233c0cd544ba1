//! The [`Message`] sum type and the static schema registry.
//!
//! Every shape the protocol knows is listed exactly once in
//! [`declare_messages!`](declare_messages). That single list produces the
//! [`Schema`] impls, the conversions between each shape and `Message`, and the
//! discriminator → decoder table the codec looks types up in. There is no
//! runtime discovery: adding a shape means adding a line here, and the
//! exhaustive `match` in [`Message::message_type`] fails to compile until
//! the list and the enum agree.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::types::{
    EntitiesMessage, ErrorMessage, GameReady, JoinLobbyRequest,
    LobbyInfoRequest, LobbyInfoResponse, PlayerCommand, Schema,
    ServerResponse,
};

/// Any message that can travel on the wire.
///
/// `#[serde(tag = "type")]` makes the JSON internally tagged:
///
/// ```text
/// {"type": "join_lobby", "player_name": "ducks"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "join_lobby")]
    JoinLobby(JoinLobbyRequest),

    #[serde(rename = "lobby_info")]
    LobbyInfo(LobbyInfoRequest),

    #[serde(rename = "lobby_info_response")]
    LobbyInfoResponse(LobbyInfoResponse),

    #[serde(rename = "player_command")]
    PlayerCommand(PlayerCommand),

    #[serde(rename = "game_ready")]
    GameReady(GameReady),

    #[serde(rename = "entities")]
    Entities(EntitiesMessage),

    #[serde(rename = "server_response")]
    ServerResponse(ServerResponse),

    #[serde(rename = "error")]
    Error(ErrorMessage),
}

/// Builds a [`Message`] from a parsed JSON object of a known shape.
pub(crate) type DecodeFn = fn(serde_json::Value) -> Result<Message, serde_json::Error>;

fn decode_as<S>(value: serde_json::Value) -> Result<Message, serde_json::Error>
where
    S: Schema + DeserializeOwned + Into<Message>,
{
    serde_json::from_value::<S>(value).map(Into::into)
}

/// Declares each shape's discriminator and wires it into [`Message`].
macro_rules! declare_messages {
    ($($shape:ty => $variant:ident = $tag:literal),+ $(,)?) => {
        $(
            impl Schema for $shape {
                const TYPE: &'static str = $tag;
            }

            impl From<$shape> for Message {
                fn from(shape: $shape) -> Self {
                    Message::$variant(shape)
                }
            }

            impl TryFrom<Message> for $shape {
                type Error = Message;

                /// Unwraps the shape, handing the message back if it is
                /// another one.
                fn try_from(message: Message) -> Result<Self, Message> {
                    match message {
                        Message::$variant(shape) => Ok(shape),
                        other => Err(other),
                    }
                }
            }
        )+

        impl Message {
            /// The discriminator of this message.
            pub fn message_type(&self) -> &'static str {
                match self {
                    $(Message::$variant(_) => <$shape as Schema>::TYPE,)+
                }
            }
        }

        /// Every known discriminator with its decoder.
        const SCHEMA_TABLE: &[(&str, DecodeFn)] = &[
            $((<$shape as Schema>::TYPE, decode_as::<$shape> as DecodeFn),)+
        ];
    };
}

declare_messages! {
    JoinLobbyRequest => JoinLobby = "join_lobby",
    LobbyInfoRequest => LobbyInfo = "lobby_info",
    LobbyInfoResponse => LobbyInfoResponse = "lobby_info_response",
    PlayerCommand => PlayerCommand = "player_command",
    GameReady => GameReady = "game_ready",
    EntitiesMessage => Entities = "entities",
    ServerResponse => ServerResponse = "server_response",
    ErrorMessage => Error = "error",
}

/// Discriminator → decoder, built once on first use.
static REGISTRY: LazyLock<HashMap<&'static str, DecodeFn>> =
    LazyLock::new(|| SCHEMA_TABLE.iter().copied().collect());

/// Looks up a discriminator, returning the registry's own copy of the
/// name together with its decoder.
pub(crate) fn lookup(message_type: &str) -> Option<(&'static str, DecodeFn)> {
    REGISTRY
        .get_key_value(message_type)
        .map(|(tag, decode)| (*tag, *decode))
}

/// All discriminators the registry knows, in declaration order.
pub fn known_types() -> impl Iterator<Item = &'static str> {
    SCHEMA_TABLE.iter().map(|(tag, _)| *tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, EntityMessage};

    fn one_of_each() -> Vec<Message> {
        vec![
            JoinLobbyRequest { player_name: "ducks".into() }.into(),
            LobbyInfoRequest {}.into(),
            LobbyInfoResponse {
                status: 0,
                message: "ok".into(),
                player_names: vec!["ducks".into()],
                highscores: vec!["10".into()],
                available_colors: vec!["red".into()],
            }
            .into(),
            PlayerCommand {
                player_name: "ducks".into(),
                command: Direction::Up,
            }
            .into(),
            GameReady {}.into(),
            EntitiesMessage {
                entities: vec![EntityMessage {
                    entity_id: "snake".into(),
                    body: vec![(1, 1), (1, 2)],
                    color: "blue".into(),
                }],
            }
            .into(),
            ServerResponse::ok("joined").into(),
            ErrorMessage::new("bad").into(),
        ]
    }

    #[test]
    fn test_serde_tag_matches_schema_constant() {
        // The serde rename and the Schema constant must never drift apart.
        for msg in one_of_each() {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["type"], msg.message_type(), "{msg:?}");
        }
    }

    #[test]
    fn test_registry_covers_every_variant() {
        let messages = one_of_each();
        assert_eq!(known_types().count(), messages.len());
        for msg in messages {
            assert!(
                lookup(msg.message_type()).is_some(),
                "{} missing from registry",
                msg.message_type()
            );
        }
    }

    #[test]
    fn test_registry_discriminators_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for tag in known_types() {
            assert!(seen.insert(tag), "duplicate discriminator {tag}");
        }
    }

    #[test]
    fn test_lookup_unknown_type_is_none() {
        assert!(lookup("fly_to_moon").is_none());
    }

    #[test]
    fn test_join_lobby_json_format() {
        let msg: Message = JoinLobbyRequest { player_name: "x".into() }.into();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"type": "join_lobby", "player_name": "x"}));
    }

    #[test]
    fn test_empty_shapes_serialize_to_type_only() {
        let json = serde_json::to_value(Message::from(GameReady {})).unwrap();
        assert_eq!(json, serde_json::json!({"type": "game_ready"}));
        let json = serde_json::to_value(Message::from(LobbyInfoRequest {})).unwrap();
        assert_eq!(json, serde_json::json!({"type": "lobby_info"}));
    }

    #[test]
    fn test_try_from_unwraps_matching_shape() {
        let msg = Message::from(ServerResponse::ok("fine"));
        let resp = ServerResponse::try_from(msg).unwrap();
        assert_eq!(resp.message, "fine");

        let msg = Message::from(GameReady {});
        let back = LobbyInfoResponse::try_from(msg.clone()).unwrap_err();
        assert_eq!(back, msg);
    }
}
