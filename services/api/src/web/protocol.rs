//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol for live lesson lists between the
//! browser client and the API server.

use serde::{Deserialize, Serialize};

use crate::web::rest::LessonDto;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Follows the lessons of one subject of one chapter for one group.
    /// This or `SubscribeAdmin` must be the first message on the connection.
    Subscribe {
        chapter_id: String,
        subject_id: String,
        group: String,
    },

    /// Follows every lesson of the logged-in administrator's group.
    SubscribeAdmin,

    /// Stops the current subscription. The connection stays open.
    Unsubscribe,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full current lesson list, newest first. Replaces any earlier one.
    Snapshot { lessons: Vec<LessonDto> },

    /// The live feed failed; no more snapshots follow until the client
    /// subscribes again. Not the same as an empty list.
    Unavailable { message: String },

    /// Confirms that the current subscription was stopped.
    Unsubscribed,

    /// Reports a rejected message to the client, which should display it.
    Error { kind: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_tagged_by_type() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","chapter_id":"chapter5","subject_id":"civ","group":"G1"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                chapter_id: "chapter5".to_string(),
                subject_id: "civ".to_string(),
                group: "G1".to_string(),
            }
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe_admin"}"#).unwrap(),
            ClientMessage::SubscribeAdmin
        );
    }

    #[test]
    fn unavailable_is_distinct_from_an_empty_snapshot() {
        let empty = serde_json::to_value(ServerMessage::Snapshot { lessons: vec![] }).unwrap();
        let down = serde_json::to_value(ServerMessage::Unavailable {
            message: "x".to_string(),
        })
        .unwrap();
        assert_eq!(empty["type"], "snapshot");
        assert_eq!(down["type"], "unavailable");
    }

    #[test]
    fn snapshots_with_lessons_can_be_resent() {
        let lesson = LessonDto {
            id: uuid::Uuid::nil(),
            name: "cours1.pdf".to_string(),
            file_url: "http://127.0.0.1:3000/files/lessons/cours1.pdf".to_string(),
            storage_path: "lessons/chapter5/civ/G1/cours1.pdf".to_string(),
            chapter_id: "chapter5".to_string(),
            subject_id: "civ".to_string(),
            group: "G1".to_string(),
            created_at: chrono::Utc::now(),
        };
        let snapshot = ServerMessage::Snapshot {
            lessons: vec![lesson],
        };
        let resent = snapshot.clone();
        assert_eq!(resent, snapshot);
        assert_eq!(
            serde_json::to_value(&resent).unwrap()["lessons"][0]["name"],
            "cours1.pdf"
        );
    }
}
