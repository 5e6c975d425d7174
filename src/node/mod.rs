//! Nodo remoto: una sesión WebSocket y un endpoint REST por servidor.

pub mod events;
pub mod pool;
pub mod stats;
pub(crate) mod websocket;

use base64::Engine;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result, Severity};
use crate::node::events::LavalinkEvent;
use crate::node::stats::Stats;
use crate::node::websocket::ExponentialBackoff;
use crate::player::Player;
use crate::protocol::{OutgoingMessage, RawLoadResponse};
use crate::sources::{LoadResult, Playlist, Track, TrackInfo};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Estado de la sesión de un nodo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

pub(crate) struct NodeInner {
    identifier: String,
    config: NodeConfig,
    capabilities: Vec<String>,
    http: reqwest::Client,
    players: DashMap<u64, Player>,
    stats: RwLock<Option<Stats>>,
    state: RwLock<SessionState>,
    sender: RwLock<Option<mpsc::UnboundedSender<OutgoingMessage>>>,
    events: broadcast::Sender<LavalinkEvent>,
    shutdown: CancellationToken,
}

/// Handle barato de clonar sobre un nodo remoto.
///
/// Cada nodo es dueño de exactamente una sesión WebSocket y un cliente REST.
/// No se construye a mano: usa [`pool::NodePool::create_node`].
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("identifier", &self.inner.identifier)
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("state", &*self.inner.state.read())
            .field("players", &self.inner.players.len())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(config: NodeConfig) -> Result<Self> {
        let identifier = config.resolve_identifier()?;
        let capabilities = config.effective_capabilities();
        let http = reqwest::Client::builder()
            .timeout(config.rest_timeout)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(NodeInner {
                identifier,
                config,
                capabilities,
                http,
                players: DashMap::new(),
                stats: RwLock::new(None),
                state: RwLock::new(SessionState::Disconnected),
                sender: RwLock::new(None),
                events,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub(crate) fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Etiqueta de región configurada, si la hay.
    pub fn region(&self) -> Option<&str> {
        self.inner.config.region.as_deref()
    }

    pub fn capabilities(&self) -> &[String] {
        &self.inner.capabilities
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.inner.capabilities.iter().any(|c| c == capability)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Último snapshot de estadísticas reportado por el nodo.
    pub fn stats(&self) -> Option<Stats> {
        self.inner.stats.read().clone()
    }

    /// Penalización de balanceo. Un nodo que aún no reportó stats se trata
    /// como cargado al máximo para despriorizarlo hasta que reporte.
    pub fn penalty(&self) -> f64 {
        self.inner
            .stats
            .read()
            .as_ref()
            .map_or(f64::INFINITY, |s| s.penalty().total())
    }

    /// Players vivos ligados a este nodo.
    pub fn players(&self) -> Vec<Player> {
        self.inner
            .players
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.inner.players.len()
    }

    /// Obtiene el player de un guild, creándolo si no existe. Un player
    /// queda ligado a este nodo durante toda su vida.
    pub fn player(&self, guild_id: u64) -> Player {
        self.inner
            .players
            .entry(guild_id)
            .or_insert_with(|| Player::new(guild_id, self.clone()))
            .clone()
    }

    pub fn get_player(&self, guild_id: u64) -> Option<Player> {
        self.inner.players.get(&guild_id).map(|p| p.clone())
    }

    pub(crate) fn remove_player(&self, guild_id: u64) {
        self.inner.players.remove(&guild_id);
    }

    /// Suscribe un listener a los eventos tipados de este nodo.
    pub fn subscribe(&self) -> broadcast::Receiver<LavalinkEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: LavalinkEvent) {
        // Sin receptores no es un error: nadie escucha todavía.
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn set_stats(&self, stats: Stats) {
        *self.inner.stats.write() = Some(stats);
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.inner.state.write() = state;
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Encola un comando hacia la sesión. No espera confirmación: los
    /// efectos se confirman con los eventos entrantes.
    pub(crate) fn send(&self, message: OutgoingMessage) -> Result<()> {
        let guard = self.inner.sender.read();
        match guard.as_ref() {
            Some(sender) => sender
                .send(message)
                .map_err(|_| Error::NodeUnavailable(self.inner.identifier.clone())),
            None => Err(Error::NodeUnavailable(self.inner.identifier.clone())),
        }
    }

    /// Abre la sesión WebSocket con el nodo.
    ///
    /// Reintenta el handshake con backoff exponencial hasta el tope de
    /// intentos; si se agota, el nodo queda desconectado y sus players
    /// muertos. Falla con [`Error::WebsocketAlreadyExists`] si ya hay una
    /// sesión viva.
    pub async fn connect(&self) -> Result<()> {
        // Un nodo destruido tiene su token cancelado para siempre: la tarea
        // de sesión moriría al instante y el nodo quedaría como un zombi
        // que se reporta conectado. Se rechaza antes de tocar la red.
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::NodeUnavailable(self.inner.identifier.clone()));
        }
        {
            let mut state = self.inner.state.write();
            if *state != SessionState::Disconnected {
                return Err(Error::WebsocketAlreadyExists);
            }
            *state = SessionState::Connecting;
        }
        info!(
            "🔌 Conectando al nodo {} en {}:{}",
            self.inner.identifier, self.inner.config.host, self.inner.config.port
        );

        let mut backoff = ExponentialBackoff::new(1.0, 10);
        let mut attempt = 0u32;
        let stream = loop {
            match websocket::handshake(self).await {
                Ok(stream) => break stream,
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.inner.config.max_retries {
                        self.set_state(SessionState::Disconnected);
                        self.mark_players_dead();
                        warn!(
                            "⛔ Agotados los intentos de conexión al nodo {}: {e}",
                            self.inner.identifier
                        );
                        return Err(e);
                    }
                    let wait = backoff.delay();
                    debug!(
                        "🔁 Handshake fallido con el nodo {} (intento {attempt}): {e}",
                        self.inner.identifier
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.sender.write() = Some(tx);
        self.set_state(SessionState::Connected);
        self.emit(LavalinkEvent::WebsocketOpen {
            node: self.inner.identifier.clone(),
        });
        info!("✅ Sesión abierta con el nodo {}", self.inner.identifier);

        tokio::spawn(websocket::session_loop(self.clone(), stream, rx));
        Ok(())
    }

    /// Desconecta el nodo: cancela la tarea de sesión, falla las llamadas
    /// REST en vuelo y marca muertos todos los players ligados.
    pub fn disconnect(&self) {
        info!("🔌 Desconectando el nodo {}", self.inner.identifier);
        self.mark_players_dead();
        self.inner.shutdown.cancel();
        *self.inner.sender.write() = None;
        self.set_state(SessionState::Disconnected);
    }

    /// Cierre terminal tras agotar la ventana de reanudación.
    pub(crate) fn session_lost(&self, close: Option<CloseFrame<'static>>) {
        let (code, reason, by_remote) = websocket::close_details(close);
        self.mark_players_dead();
        *self.inner.sender.write() = None;
        self.set_state(SessionState::Disconnected);
        self.emit(LavalinkEvent::WebsocketClosed {
            guild_id: None,
            code,
            reason,
            by_remote,
        });
    }

    pub(crate) fn mark_players_dead(&self) {
        let players: Vec<Player> = self
            .inner
            .players
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for player in players {
            player.mark_dead();
        }
        self.inner.players.clear();
    }

    async fn rest_get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<reqwest::Response> {
        let url = format!("{}/{endpoint}", self.inner.config.rest_uri());
        let request = self
            .inner
            .http
            .get(&url)
            .header("Authorization", &self.inner.config.password)
            .query(params)
            .send();
        // Destruir el nodo cancela las llamadas REST en vuelo.
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                Err(Error::NodeUnavailable(self.inner.identifier.clone()))
            }
            response = request => Ok(response?),
        }
    }

    /// Resuelve una consulta o URL en cero o más tracks, o una playlist.
    ///
    /// "Sin coincidencias" es [`LoadResult::Empty`], no un error; los
    /// fallos del proveedor llegan como [`Error::LoadTrack`] con la
    /// severidad reportada por el nodo.
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        debug!(
            "🔎 loadtracks en el nodo {}: {identifier}",
            self.inner.identifier
        );
        let response = self
            .rest_get("loadtracks", &[("identifier", identifier)])
            .await?;
        if !response.status().is_success() {
            return Err(Error::LoadTrack {
                severity: Severity::Fault,
                message: format!("respuesta {} del nodo", response.status()),
            });
        }
        let raw: RawLoadResponse = response.json().await?;
        load_result(raw)
    }

    /// Reconstruye un [`Track`] completo desde su ID base64 opaco.
    pub async fn build_track(&self, id: &str) -> Result<Track> {
        // Un ID que ni siquiera es base64 no merece un viaje a la red.
        if base64::engine::general_purpose::STANDARD.decode(id).is_err() {
            return Err(Error::BuildTrack(format!("ID malformado: {id}")));
        }

        let response = self.rest_get("decodetrack", &[("track", id)]).await?;
        if !response.status().is_success() {
            return Err(Error::BuildTrack(format!(
                "respuesta {} del nodo",
                response.status()
            )));
        }
        let info: TrackInfo = response.json().await?;
        Ok(Track::new(id, info))
    }

    /// Reenvía el payload de voz del colaborador externo al nodo. Es el
    /// único camino por el que el nodo aprende a unirse al transporte real.
    pub(crate) fn send_voice_update(
        &self,
        guild_id: u64,
        session_id: String,
        token: String,
        endpoint: String,
    ) -> Result<()> {
        self.send(OutgoingMessage::VoiceUpdate {
            guild_id: guild_id.to_string(),
            session_id,
            event: crate::protocol::VoiceEvent {
                token,
                guild_id: guild_id.to_string(),
                endpoint,
            },
        })
    }

    #[cfg(test)]
    pub(crate) fn attach_test_session(&self) -> mpsc::UnboundedReceiver<OutgoingMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.sender.write() = Some(tx);
        self.set_state(SessionState::Connected);
        rx
    }
}

fn load_result(raw: RawLoadResponse) -> Result<LoadResult> {
    match raw.load_type.as_str() {
        "TRACK_LOADED" => {
            let first = raw
                .tracks
                .into_iter()
                .next()
                .ok_or_else(|| Error::LoadTrack {
                    severity: Severity::Fault,
                    message: "TRACK_LOADED sin tracks".to_string(),
                })?;
            Ok(LoadResult::Track(Track::new(first.track, first.info)))
        }
        "SEARCH_RESULT" => Ok(LoadResult::Search(
            raw.tracks
                .into_iter()
                .map(|t| Track::new(t.track, t.info))
                .collect(),
        )),
        "PLAYLIST_LOADED" => {
            let info = raw.playlist_info.ok_or_else(|| Error::LoadTrack {
                severity: Severity::Fault,
                message: "PLAYLIST_LOADED sin playlistInfo".to_string(),
            })?;
            let selected = info
                .selected_track
                .and_then(|i| usize::try_from(i).ok())
                .filter(|&i| i < raw.tracks.len());
            Ok(LoadResult::Playlist(Playlist {
                name: info.name,
                selected_track: selected,
                tracks: raw
                    .tracks
                    .into_iter()
                    .map(|t| Track::new(t.track, t.info))
                    .collect(),
            }))
        }
        "NO_MATCHES" => Ok(LoadResult::Empty),
        _ => {
            let exception = raw.exception.unwrap_or(crate::protocol::RawException {
                message: None,
                severity: None,
            });
            Err(Error::LoadTrack {
                severity: Severity::parse(exception.severity.as_deref().unwrap_or("FAULT")),
                message: exception
                    .message
                    .unwrap_or_else(|| "el nodo no pudo cargar el track".to_string()),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_node(identifier: &str) -> Node {
        let mut config = NodeConfig::default();
        config.identifier = Some(identifier.to_string());
        Node::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_build_track_rejects_malformed_id() {
        // Un ID que no es base64 falla antes de tocar la red.
        let node = test_node("n1");
        let result = node.build_track("esto no es base64 !!!").await;
        assert!(matches!(result, Err(Error::BuildTrack(_))));
    }

    #[test]
    fn test_player_map_is_unique_per_guild() {
        let node = test_node("n1");
        let a = node.player(42);
        let b = node.player(42);
        assert_eq!(node.player_count(), 1);
        assert_eq!(a.guild_id(), b.guild_id());
    }

    #[test]
    fn test_penalty_without_stats_is_maximal() {
        let node = test_node("n1");
        assert_eq!(node.penalty(), f64::INFINITY);
    }

    #[test]
    fn test_send_without_session_fails() {
        let node = test_node("n1");
        let result = node.send(OutgoingMessage::Stop {
            guild_id: "1".to_string(),
        });
        assert!(matches!(result, Err(Error::NodeUnavailable(_))));
    }

    #[test]
    fn test_mark_players_dead_clears_map() {
        let node = test_node("n1");
        let player = node.player(1);
        node.player(2);
        node.mark_players_dead();
        assert!(player.is_dead());
        assert_eq!(node.player_count(), 0);
    }

    #[test]
    fn test_load_result_parses_playlist() {
        let raw = r#"{
            "loadType": "PLAYLIST_LOADED",
            "playlistInfo": {"name": "mi lista", "selectedTrack": 1},
            "tracks": [
                {"track": "QQ==", "info": {"identifier": "a", "isSeekable": true, "author": "x", "length": 1000, "title": "uno"}},
                {"track": "Qg==", "info": {"identifier": "b", "isSeekable": true, "author": "x", "length": 2000, "title": "dos"}}
            ]
        }"#;
        let parsed: RawLoadResponse = serde_json::from_str(raw).unwrap();
        match load_result(parsed).unwrap() {
            LoadResult::Playlist(playlist) => {
                assert_eq!(playlist.name, "mi lista");
                assert_eq!(playlist.selected_track, Some(1));
                assert_eq!(playlist.tracks.len(), 2);
            }
            other => panic!("resultado inesperado: {other:?}"),
        }
    }

    #[test]
    fn test_load_result_failure_carries_severity() {
        let raw = r#"{
            "loadType": "LOAD_FAILED",
            "exception": {"message": "video privado", "severity": "COMMON"}
        }"#;
        let parsed: RawLoadResponse = serde_json::from_str(raw).unwrap();
        match load_result(parsed) {
            Err(Error::LoadTrack { severity, message }) => {
                assert_eq!(severity, Severity::Common);
                assert_eq!(message, "video privado");
            }
            other => panic!("resultado inesperado: {other:?}"),
        }
    }

    #[test]
    fn test_no_matches_is_empty_not_error() {
        let raw = r#"{"loadType": "NO_MATCHES"}"#;
        let parsed: RawLoadResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(load_result(parsed).unwrap(), LoadResult::Empty));
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let node = test_node("n1");
        let _rx = node.attach_test_session();
        // Con una sesión viva, conectar de nuevo es un error inmediato.
        assert!(matches!(
            node.connect().await,
            Err(Error::WebsocketAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_connect_after_disconnect_fails() {
        let node = test_node("n1");
        let _rx = node.attach_test_session();
        node.disconnect();

        // El token quedó cancelado: reconectar jamás produce una sesión
        // viva, así que se rechaza sin handshake y sin cambiar el estado.
        assert!(matches!(
            node.connect().await,
            Err(Error::NodeUnavailable(_))
        ));
        assert_eq!(node.state(), SessionState::Disconnected);
        assert!(!node.is_connected());
    }
}
