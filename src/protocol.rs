//! Tipos de cable del protocolo: comandos salientes y mensajes entrantes.
//!
//! Cada comando se serializa como un objeto JSON con clave `op` y el guild
//! al que aplica. Ningún comando espera confirmación sincrónica; el estado
//! se reconcilia con los eventos entrantes.

use serde::{Deserialize, Serialize};

use crate::node::stats::Stats;
use crate::player::filters::FiltersPayload;
use crate::sources::TrackInfo;

/// Payload de voz entregado por el colaborador externo de voice-gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceEvent {
    pub token: String,
    pub guild_id: String,
    pub endpoint: String,
}

/// Comandos enviados al nodo por el WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutgoingMessage {
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        event: VoiceEvent,
    },
    Play {
        guild_id: String,
        track: String,
        start_time: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        volume: u16,
        no_replace: bool,
        pause: bool,
    },
    Stop {
        guild_id: String,
    },
    Pause {
        guild_id: String,
        pause: bool,
    },
    Seek {
        guild_id: String,
        position: u64,
    },
    Volume {
        guild_id: String,
        volume: u16,
    },
    Filters {
        guild_id: String,
        #[serde(flatten)]
        payload: FiltersPayload,
    },
    Destroy {
        guild_id: String,
    },
}

impl OutgoingMessage {
    /// Nombre de la operación, para logging.
    pub fn op(&self) -> &'static str {
        match self {
            Self::VoiceUpdate { .. } => "voiceUpdate",
            Self::Play { .. } => "play",
            Self::Stop { .. } => "stop",
            Self::Pause { .. } => "pause",
            Self::Seek { .. } => "seek",
            Self::Volume { .. } => "volume",
            Self::Filters { .. } => "filters",
            Self::Destroy { .. } => "destroy",
        }
    }
}

/// Snapshot de posición enviado periódicamente por el nodo.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateState {
    /// Timestamp del snapshot en milisegundos unix.
    pub time: u64,
    /// Posición del track en milisegundos. Ausente si no hay track.
    #[serde(default)]
    pub position: Option<u64>,
    /// Si el nodo sigue conectado al transporte de voz.
    #[serde(default)]
    pub connected: Option<bool>,
}

/// Evento crudo anidado dentro de un mensaje `op: event`.
///
/// Se mantiene plano porque el conjunto de campos varía por `type`; la
/// conversión a evento tipado la hace el dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub guild_id: String,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub threshold_ms: Option<u64>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub by_remote: Option<bool>,
}

/// Mensajes entrantes de la sesión, demultiplexados por `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    PlayerUpdate {
        #[serde(rename = "guildId")]
        guild_id: String,
        state: PlayerUpdateState,
    },
    Stats(Stats),
    Event(RawEvent),
}

/// Un track tal y como lo devuelve el endpoint `loadtracks`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrack {
    pub track: String,
    pub info: TrackInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlaylistInfo {
    pub name: String,
    #[serde(default)]
    pub selected_track: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawException {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

/// Respuesta del endpoint `loadtracks`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLoadResponse {
    pub load_type: String,
    #[serde(default)]
    pub tracks: Vec<RawTrack>,
    #[serde(default)]
    pub playlist_info: Option<RawPlaylistInfo>,
    #[serde(default)]
    pub exception: Option<RawException>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_play_serializes_with_op_and_guild() {
        let msg = OutgoingMessage::Play {
            guild_id: "1234".to_string(),
            track: "QAAAjQIA".to_string(),
            start_time: 0,
            end_time: None,
            volume: 100,
            no_replace: false,
            pause: false,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["op"], "play");
        assert_eq!(value["guildId"], "1234");
        assert_eq!(value["track"], "QAAAjQIA");
        assert!(value.get("endTime").is_none());
    }

    #[test]
    fn test_voice_update_shape() {
        let msg = OutgoingMessage::VoiceUpdate {
            guild_id: "42".to_string(),
            session_id: "abc".to_string(),
            event: VoiceEvent {
                token: "tok".to_string(),
                guild_id: "42".to_string(),
                endpoint: "voz.example.com".to_string(),
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["op"], "voiceUpdate");
        assert_eq!(value["sessionId"], "abc");
        assert_eq!(value["event"]["endpoint"], "voz.example.com");
    }

    #[test]
    fn test_player_update_roundtrip() {
        let raw = r#"{"op":"playerUpdate","guildId":"99","state":{"time":1700000000000,"position":42000,"connected":true}}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                assert_eq!(guild_id, "99");
                assert_eq!(state.position, Some(42000));
                assert_eq!(state.connected, Some(true));
            }
            other => panic!("mensaje inesperado: {other:?}"),
        }
    }

    #[test]
    fn test_track_end_event_parses() {
        let raw = r#"{"op":"event","type":"TrackEndEvent","guildId":"7","track":"QQ==","reason":"FINISHED"}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            IncomingMessage::Event(ev) => {
                assert_eq!(ev.kind, "TrackEndEvent");
                assert_eq!(ev.reason.as_deref(), Some("FINISHED"));
            }
            other => panic!("mensaje inesperado: {other:?}"),
        }
    }
}
