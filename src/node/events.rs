//! Demultiplexado de mensajes entrantes y eventos tipados.
//!
//! Hay un dispatcher por nodo, ejecutado dentro de la tarea de sesión: el
//! orden de entrega entre eventos del mismo player es FIFO por sesión. Cada
//! evento tipado se entrega primero al player dueño (para actualizar su
//! estado) y después se difunde a los listeners de la aplicación.

use tracing::{debug, warn};

use crate::node::Node;
use crate::protocol::{IncomingMessage, RawEvent};
use crate::sources::Track;

/// Razón con la que el nodo remoto terminó un track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    /// El track llegó a su fin.
    Finished,
    /// Se detuvo explícitamente.
    Stopped,
    /// Otro track lo reemplazó.
    Replaced,
    /// El player fue destruido.
    Cleanup,
    /// El track no pudo cargarse.
    LoadFailed,
}

impl TrackEndReason {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "FINISHED" => Self::Finished,
            "STOPPED" => Self::Stopped,
            "REPLACED" => Self::Replaced,
            "CLEANUP" => Self::Cleanup,
            _ => Self::LoadFailed,
        }
    }

    /// Si el player debe avanzar automáticamente a la siguiente entrada de
    /// la cola tras esta razón.
    pub fn should_advance(self) -> bool {
        matches!(self, Self::Finished | Self::Stopped)
    }
}

/// Eventos tipados originados en el servidor, difundidos a los listeners.
#[derive(Debug, Clone)]
pub enum LavalinkEvent {
    /// La sesión WebSocket quedó abierta (también tras una reanudación).
    WebsocketOpen { node: String },
    /// Un track empezó a reproducirse; confirma el estado optimista.
    TrackStart { guild_id: u64, track: Option<Track> },
    /// Un track terminó.
    TrackEnd {
        guild_id: u64,
        track: Option<Track>,
        reason: TrackEndReason,
    },
    /// El nodo reportó una excepción reproduciendo un track.
    TrackException {
        guild_id: u64,
        track: Option<Track>,
        error: String,
    },
    /// El track superó el umbral de atasco del nodo.
    TrackStuck {
        guild_id: u64,
        track: Option<Track>,
        threshold_ms: u64,
    },
    /// La sesión (o el transporte de voz de un guild) se cerró.
    WebsocketClosed {
        guild_id: Option<u64>,
        code: u16,
        reason: String,
        by_remote: bool,
    },
    /// Snapshot de posición de un player.
    PlayerUpdate {
        guild_id: u64,
        position: Option<u64>,
        connected: Option<bool>,
    },
}

/// Procesa un frame de texto entrante de la sesión.
pub(crate) fn dispatch(node: &Node, text: &str) {
    let message: IncomingMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("⚠️ Mensaje no reconocido del nodo {}: {e}", node.identifier());
            return;
        }
    };

    match message {
        IncomingMessage::Stats(stats) => {
            debug!(
                "📊 Stats del nodo {}: {} players, carga {:.2}",
                node.identifier(),
                stats.players,
                stats.cpu.system_load
            );
            node.set_stats(stats);
        }
        IncomingMessage::PlayerUpdate { guild_id, state } => {
            let Ok(guild_id) = guild_id.parse::<u64>() else {
                return;
            };
            // El servidor puede ir por detrás de un destroy local: los
            // guilds desconocidos se descartan en silencio.
            let Some(player) = node.get_player(guild_id) else {
                debug!("📭 playerUpdate para guild desconocido {guild_id}");
                return;
            };
            player.apply_update(&state);
            node.emit(LavalinkEvent::PlayerUpdate {
                guild_id,
                position: state.position,
                connected: state.connected,
            });
        }
        IncomingMessage::Event(raw) => handle_event(node, raw),
    }
}

fn handle_event(node: &Node, raw: RawEvent) {
    let Ok(guild_id) = raw.guild_id.parse::<u64>() else {
        return;
    };

    if raw.kind == "WebSocketClosedEvent" {
        node.emit(LavalinkEvent::WebsocketClosed {
            guild_id: Some(guild_id),
            code: raw.code.unwrap_or(1000),
            reason: raw.reason.unwrap_or_default(),
            by_remote: raw.by_remote.unwrap_or(false),
        });
        return;
    }

    let Some(player) = node.get_player(guild_id) else {
        debug!("📭 Evento {} para guild desconocido {guild_id}", raw.kind);
        return;
    };
    let track = player.current_track();

    // Primero el player dueño actualiza su estado, después se difunde.
    let event = match raw.kind.as_str() {
        "TrackStartEvent" => {
            player.confirm_start();
            LavalinkEvent::TrackStart { guild_id, track }
        }
        "TrackEndEvent" => {
            let reason = TrackEndReason::parse(raw.reason.as_deref().unwrap_or(""));
            player.handle_track_end(reason);
            LavalinkEvent::TrackEnd {
                guild_id,
                track,
                reason,
            }
        }
        "TrackExceptionEvent" => LavalinkEvent::TrackException {
            guild_id,
            track,
            error: raw.error.unwrap_or_default(),
        },
        "TrackStuckEvent" => LavalinkEvent::TrackStuck {
            guild_id,
            track,
            threshold_ms: raw.threshold_ms.unwrap_or(0),
        },
        other => {
            debug!("📭 Evento desconocido del nodo {}: {other}", node.identifier());
            return;
        }
    };
    node.emit(event);
}
