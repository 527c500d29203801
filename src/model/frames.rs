use serde::Deserialize;

use super::{
    player::PlayerState,
    stats::NodeStats,
    track::{Exception, Track, TrackEndReason},
    GuildId,
};

/// Frame recibido por el WebSocket del nodo, discriminado por `op`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingFrame {
    Ready(ReadyFrame),
    PlayerUpdate(PlayerUpdateFrame),
    Stats(NodeStats),
    Event(NodeEvent),
}

impl IncomingFrame {
    pub fn op(&self) -> &'static str {
        match self {
            IncomingFrame::Ready(_) => "ready",
            IncomingFrame::PlayerUpdate(_) => "playerUpdate",
            IncomingFrame::Stats(_) => "stats",
            IncomingFrame::Event(_) => "event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyFrame {
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateFrame {
    pub guild_id: GuildId,
    pub state: PlayerState,
}

/// Eventos `op: event`, discriminados por `type`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: GuildId, track: Track },
    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: GuildId,
        track: Track,
        reason: TrackEndReason,
    },
    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: GuildId,
        track: Track,
        exception: Exception,
    },
    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: GuildId,
        track: Track,
        threshold_ms: u64,
    },
    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

impl NodeEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            NodeEvent::TrackStart { guild_id, .. }
            | NodeEvent::TrackEnd { guild_id, .. }
            | NodeEvent::TrackException { guild_id, .. }
            | NodeEvent::TrackStuck { guild_id, .. }
            | NodeEvent::WebSocketClosed { guild_id, .. } => *guild_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::track_json;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ready_frame() {
        let frame: IncomingFrame =
            serde_json::from_str(r#"{"op":"ready","resumed":false,"sessionId":"la3kfsdf5eafe848"}"#)
                .unwrap();

        assert_eq!(
            frame,
            IncomingFrame::Ready(ReadyFrame {
                resumed: false,
                session_id: "la3kfsdf5eafe848".into(),
            })
        );
    }

    #[test]
    fn test_track_end_event() {
        let mut json = serde_json::json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "817327181659111454",
            "reason": "replaced"
        });
        json["track"] = track_json("QAAA", "Never Gonna Give You Up");

        let frame: IncomingFrame = serde_json::from_value(json).unwrap();
        match frame {
            IncomingFrame::Event(NodeEvent::TrackEnd { guild_id, reason, track }) => {
                assert_eq!(guild_id, GuildId(817327181659111454));
                assert_eq!(reason, TrackEndReason::Replaced);
                assert_eq!(track.encoded, "QAAA");
            }
            other => panic!("frame inesperado: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_op_and_event_type_fail_to_parse() {
        assert!(serde_json::from_str::<IncomingFrame>(r#"{"op":"mystery"}"#).is_err());
        assert!(serde_json::from_str::<IncomingFrame>(
            r#"{"op":"event","type":"SomethingNewEvent","guildId":"1"}"#
        )
        .is_err());
    }
}
