//! Player por guild: una máquina de estados optimista sobre un nodo.
//!
//! Cada comando se encola sin esperar confirmación; el estado local se marca
//! de forma optimista y los eventos entrantes lo reconcilian. Un player nace
//! ligado a un nodo y muere con él: no migra jamás.

pub mod filters;
pub mod queue;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, Severity};
use crate::node::events::TrackEndReason;
use crate::node::Node;
use crate::player::filters::{Filter, FilterChain, FilterKind};
use crate::player::queue::Queue;
use crate::protocol::{OutgoingMessage, PlayerUpdateState};
use crate::sources::{Playable, Track};

const MAX_VOLUME: u16 = 1000;
const DEFAULT_VOLUME: u16 = 100;

/// Opciones del comando `play`.
#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    /// Posición inicial en milisegundos.
    pub start_time: u64,
    /// Posición final en milisegundos, si el track debe cortarse antes.
    pub end_time: Option<u64>,
    /// Reemplazar el track en curso. Con `false`, el nodo ignora el comando
    /// si ya hay algo sonando.
    pub replace: bool,
    /// Empezar en pausa.
    pub pause: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            start_time: 0,
            end_time: None,
            replace: true,
            pause: false,
        }
    }
}

/// Las dos mitades del payload de voz llegan por separado desde el
/// colaborador externo; el `voiceUpdate` solo se envía con ambas presentes.
#[derive(Debug, Default)]
struct VoiceState {
    session_id: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug)]
struct PlayerState {
    track: Option<Track>,
    paused: bool,
    connected: bool,
    volume: u16,
    /// Última posición conocida, en milisegundos.
    last_position: u64,
    /// Momento local en que se tomó la última posición.
    last_update: Option<DateTime<Utc>>,
    voice: VoiceState,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            track: None,
            paused: false,
            connected: false,
            volume: DEFAULT_VOLUME,
            last_position: 0,
            last_update: None,
            voice: VoiceState::default(),
        }
    }
}

struct PlayerInner {
    guild_id: u64,
    node: Node,
    state: RwLock<PlayerState>,
    queue: Mutex<Queue>,
    filters: Mutex<FilterChain>,
    dead: AtomicBool,
}

/// Handle barato de clonar sobre el player de un guild.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Player")
            .field("guild_id", &self.inner.guild_id)
            .field("node", &self.inner.node.identifier())
            .field("track", &state.track.as_ref().map(Track::title))
            .field("paused", &state.paused)
            .field("dead", &self.is_dead())
            .finish()
    }
}

impl Player {
    pub(crate) fn new(guild_id: u64, node: Node) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                guild_id,
                node,
                state: RwLock::new(PlayerState::default()),
                queue: Mutex::new(Queue::new()),
                filters: Mutex::new(FilterChain::new()),
                dead: AtomicBool::new(false),
            }),
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.inner.guild_id
    }

    /// Nodo al que este player está ligado de por vida.
    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    pub fn is_dead(&self) -> bool {
        self.inner.dead.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.read().paused
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.read().connected
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.read().track.is_some()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.inner.state.read().track.clone()
    }

    pub fn volume(&self) -> u16 {
        self.inner.state.read().volume
    }

    /// Posición estimada del track en milisegundos.
    ///
    /// Interpola desde el último snapshot del nodo mientras suena; en pausa
    /// la posición queda congelada. Nunca supera la duración conocida.
    pub fn position(&self) -> u64 {
        interpolated(&self.inner.state.read(), Utc::now())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_dead() {
            return Err(Error::PlayerDead(self.inner.guild_id));
        }
        Ok(())
    }

    fn guild_str(&self) -> String {
        self.inner.guild_id.to_string()
    }

    /// Registra la mitad `sessionId` del payload de voz.
    pub fn set_voice_session_id(&self, session_id: impl Into<String>) -> Result<()> {
        self.ensure_alive()?;
        self.inner.state.write().voice.session_id = Some(session_id.into());
        self.maybe_send_voice_update()
    }

    /// Registra la mitad servidor (token + endpoint) del payload de voz.
    pub fn set_voice_server(
        &self,
        token: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<()> {
        self.ensure_alive()?;
        {
            let mut state = self.inner.state.write();
            state.voice.token = Some(token.into());
            state.voice.endpoint = Some(endpoint.into());
        }
        self.maybe_send_voice_update()
    }

    fn maybe_send_voice_update(&self) -> Result<()> {
        let (session_id, token, endpoint) = {
            let state = self.inner.state.read();
            match (
                &state.voice.session_id,
                &state.voice.token,
                &state.voice.endpoint,
            ) {
                (Some(session), Some(token), Some(endpoint)) => {
                    (session.clone(), token.clone(), endpoint.clone())
                }
                // Falta una mitad: se espera a la otra sin enviar nada.
                _ => return Ok(()),
            }
        };
        self.inner
            .node
            .send_voice_update(self.inner.guild_id, session_id, token, endpoint)?;
        self.inner.state.write().connected = true;
        debug!("🎙️ voiceUpdate enviado para el guild {}", self.inner.guild_id);
        Ok(())
    }

    /// Reproduce un recurso con las opciones por defecto.
    pub async fn play(&self, playable: impl Into<Playable>) -> Result<()> {
        self.play_with(playable, PlayOptions::default()).await
    }

    /// Reproduce un recurso.
    ///
    /// Un [`PartialResource`](crate::sources::PartialResource) se resuelve
    /// aquí, una sola vez. Una playlist reproduce su track seleccionado (o
    /// el primero) y encola el resto. El estado local se marca optimista; el
    /// evento `TrackStart` lo confirma.
    pub async fn play_with(
        &self,
        playable: impl Into<Playable>,
        options: PlayOptions,
    ) -> Result<()> {
        self.ensure_alive()?;
        let track = match playable.into() {
            Playable::Track(track) => track,
            Playable::Partial(partial) => partial.resolve(&self.inner.node).await?,
            Playable::Playlist(playlist) => {
                if playlist.tracks.is_empty() {
                    return Err(Error::LoadTrack {
                        severity: Severity::Common,
                        message: format!("la playlist <{}> está vacía", playlist.name),
                    });
                }
                let selected = playlist
                    .selected_track
                    .unwrap_or(0)
                    .min(playlist.tracks.len() - 1);
                let mut tracks = playlist.tracks;
                let track = tracks.remove(selected);
                let mut queue = self.inner.queue.lock();
                for rest in tracks {
                    queue.add(rest);
                }
                track
            }
        };

        let volume = self.inner.state.read().volume;
        self.inner.node.send(OutgoingMessage::Play {
            guild_id: self.guild_str(),
            track: track.id().to_string(),
            start_time: options.start_time,
            end_time: options.end_time,
            volume,
            no_replace: !options.replace,
            pause: options.pause,
        })?;
        info!(
            "▶️ Reproduciendo <{}> en el guild {}",
            track.title(),
            self.inner.guild_id
        );

        let mut state = self.inner.state.write();
        state.track = Some(track);
        state.paused = options.pause;
        state.last_position = options.start_time;
        state.last_update = Some(Utc::now());
        Ok(())
    }

    fn set_paused(&self, pause: bool) -> Result<()> {
        self.ensure_alive()?;
        if self.inner.state.read().paused == pause {
            return Ok(());
        }
        self.inner.node.send(OutgoingMessage::Pause {
            guild_id: self.guild_str(),
            pause,
        })?;
        let mut state = self.inner.state.write();
        // La posición se congela (o retoma) en el instante de la transición.
        let now = Utc::now();
        state.last_position = interpolated(&state, now);
        state.last_update = Some(now);
        state.paused = pause;
        Ok(())
    }

    /// Pausa la reproducción. Pausar un player ya en pausa no envía nada.
    pub fn pause(&self) -> Result<()> {
        self.set_paused(true)
    }

    /// Reanuda la reproducción. Idempotente, como [`pause`](Self::pause).
    pub fn resume(&self) -> Result<()> {
        self.set_paused(false)
    }

    /// Detiene el track en curso. La cola no se toca.
    pub fn stop(&self) -> Result<()> {
        self.ensure_alive()?;
        self.inner.node.send(OutgoingMessage::Stop {
            guild_id: self.guild_str(),
        })?;
        let mut state = self.inner.state.write();
        state.track = None;
        state.paused = false;
        state.last_position = 0;
        state.last_update = None;
        Ok(())
    }

    /// Salta a la posición dada en milisegundos.
    ///
    /// Una posición negativa o más allá de la duración conocida falla sin
    /// enviar nada al nodo.
    pub fn seek(&self, position_ms: i64) -> Result<()> {
        self.ensure_alive()?;
        if position_ms < 0 {
            return Err(Error::InvalidSeekPosition(position_ms));
        }
        let position = position_ms as u64;
        if let Some(track) = &self.inner.state.read().track {
            if position > track.length_ms() {
                return Err(Error::InvalidSeekPosition(position_ms));
            }
        }
        self.inner.node.send(OutgoingMessage::Seek {
            guild_id: self.guild_str(),
            position,
        })?;
        let mut state = self.inner.state.write();
        state.last_position = position;
        state.last_update = Some(Utc::now());
        Ok(())
    }

    /// Fija el volumen, recortado al rango 0-1000.
    pub fn set_volume(&self, volume: u16) -> Result<()> {
        self.ensure_alive()?;
        let volume = volume.min(MAX_VOLUME);
        self.inner.node.send(OutgoingMessage::Volume {
            guild_id: self.guild_str(),
            volume,
        })?;
        self.inner.state.write().volume = volume;
        Ok(())
    }

    fn send_filters(&self, chain: &FilterChain) -> Result<()> {
        self.inner.node.send(OutgoingMessage::Filters {
            guild_id: self.guild_str(),
            payload: chain.to_payload(),
        })
    }

    /// Aplica un filtro y reenvía la cadena completa al nodo. Si el envío
    /// falla, la cadena local queda como estaba.
    pub fn add_filter(&self, filter: Filter) -> Result<()> {
        self.ensure_alive()?;
        let kind = filter.kind();
        let mut chain = self.inner.filters.lock();
        chain.add(filter)?;
        if let Err(e) = self.send_filters(&chain) {
            let _ = chain.remove(kind);
            return Err(e);
        }
        Ok(())
    }

    /// Quita el filtro del tipo dado y reenvía la cadena. Si el envío falla,
    /// la cadena local queda como estaba.
    pub fn remove_filter(&self, kind: FilterKind) -> Result<()> {
        self.ensure_alive()?;
        let mut chain = self.inner.filters.lock();
        let removed = chain.remove(kind)?;
        if let Err(e) = self.send_filters(&chain) {
            let _ = chain.add(removed);
            return Err(e);
        }
        Ok(())
    }

    /// Vacía la cadena de filtros y lo notifica al nodo.
    pub fn reset_filters(&self) -> Result<()> {
        self.ensure_alive()?;
        let mut chain = self.inner.filters.lock();
        let snapshot = chain.clone();
        chain.clear();
        if let Err(e) = self.send_filters(&chain) {
            *chain = snapshot;
            return Err(e);
        }
        Ok(())
    }

    /// Acceso a la cadena de filtros aplicada.
    pub fn filters(&self) -> MutexGuard<'_, FilterChain> {
        self.inner.filters.lock()
    }

    /// Acceso a la cola de este player.
    pub fn queue(&self) -> MutexGuard<'_, Queue> {
        self.inner.queue.lock()
    }

    /// Agrega un recurso al final de la cola.
    pub fn enqueue(&self, playable: impl Into<Playable>) -> Result<()> {
        self.ensure_alive()?;
        self.inner.queue.lock().add(playable);
        Ok(())
    }

    pub fn enqueue_all(&self, playables: impl IntoIterator<Item = Playable>) -> Result<()> {
        self.ensure_alive()?;
        self.inner.queue.lock().add_all(playables);
        Ok(())
    }

    /// Avanza a la siguiente entrada de la cola según el modo de repetición.
    ///
    /// Devuelve `false` (y deja el player ocioso) si la cola no produce
    /// ninguna entrada.
    pub async fn advance(&self) -> Result<bool> {
        self.ensure_alive()?;
        let next = self.inner.queue.lock().next();
        match next {
            Ok(playable) => {
                self.play(playable).await?;
                Ok(true)
            }
            Err(Error::QueueEmpty) => {
                let mut state = self.inner.state.write();
                state.track = None;
                state.paused = false;
                state.last_position = 0;
                state.last_update = None;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Salta el track en curso: avanza la cola, o detiene si está vacía.
    pub async fn skip(&self) -> Result<bool> {
        self.ensure_alive()?;
        if self.advance().await? {
            Ok(true)
        } else {
            self.stop()?;
            Ok(false)
        }
    }

    /// Destruye el player en el nodo y lo quita del mapa. Idempotente: las
    /// llamadas posteriores no hacen nada, y cualquier otro comando falla
    /// con [`Error::PlayerDead`].
    pub fn destroy(&self) -> Result<()> {
        if self.inner.dead.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Mejor esfuerzo: si la sesión ya cayó, el nodo limpia por su cuenta.
        let _ = self.inner.node.send(OutgoingMessage::Destroy {
            guild_id: self.guild_str(),
        });
        self.inner.node.remove_player(self.inner.guild_id);
        info!("💀 Player del guild {} destruido", self.inner.guild_id);
        Ok(())
    }

    pub(crate) fn mark_dead(&self) {
        self.inner.dead.store(true, Ordering::SeqCst);
    }

    /// Reconcilia el snapshot de posición periódico del nodo.
    pub(crate) fn apply_update(&self, update: &PlayerUpdateState) {
        let mut state = self.inner.state.write();
        if let Some(position) = update.position {
            state.last_position = position;
        }
        if let Some(connected) = update.connected {
            state.connected = connected;
        }
        state.last_update = Some(Utc::now());
    }

    /// El nodo confirmó el arranque marcado de forma optimista.
    pub(crate) fn confirm_start(&self) {
        let mut state = self.inner.state.write();
        state.last_update = Some(Utc::now());
        debug!(
            "🎵 Arranque confirmado en el guild {}: {:?}",
            self.inner.guild_id,
            state.track.as_ref().map(Track::title)
        );
    }

    /// El nodo reportó el fin del track en curso. Con razones que avanzan
    /// (fin natural, stop) se tira de la cola en segundo plano.
    pub(crate) fn handle_track_end(&self, reason: TrackEndReason) {
        {
            let mut state = self.inner.state.write();
            state.track = None;
            state.paused = false;
            state.last_position = 0;
            state.last_update = None;
        }
        if !reason.should_advance() || self.is_dead() {
            return;
        }
        let player = self.clone();
        tokio::spawn(async move {
            match player.advance().await {
                Ok(true) => {}
                Ok(false) => debug!("⏹️ Cola agotada en el guild {}", player.guild_id()),
                Err(e) => warn!(
                    "⚠️ No se pudo avanzar la cola del guild {}: {e}",
                    player.guild_id()
                ),
            }
        });
    }
}

fn interpolated(state: &PlayerState, now: DateTime<Utc>) -> u64 {
    let Some(track) = &state.track else {
        return 0;
    };
    let position = if state.paused {
        state.last_position
    } else if let Some(last) = state.last_update {
        let elapsed = (now - last).num_milliseconds().max(0) as u64;
        state.last_position.saturating_add(elapsed)
    } else {
        state.last_position
    };
    position.min(track.length_ms())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::test_node;
    use crate::sources::{test_track, Playlist};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session_player(guild_id: u64) -> (Player, UnboundedReceiver<OutgoingMessage>) {
        let node = test_node("n1");
        let rx = node.attach_test_session();
        (node.player(guild_id), rx)
    }

    #[tokio::test]
    async fn test_play_sends_command_and_marks_state() {
        let (player, mut rx) = session_player(1);
        player.play(test_track("QQ==", "cancion", 10_000)).await.unwrap();

        match rx.try_recv().unwrap() {
            OutgoingMessage::Play {
                guild_id,
                track,
                no_replace,
                volume,
                ..
            } => {
                assert_eq!(guild_id, "1");
                assert_eq!(track, "QQ==");
                assert!(!no_replace);
                assert_eq!(volume, 100);
            }
            other => panic!("comando inesperado: {other:?}"),
        }
        assert!(player.is_playing());
        assert_eq!(player.current_track().unwrap().title(), "cancion");
        assert!(!player.is_paused());
    }

    #[tokio::test]
    async fn test_play_playlist_plays_selected_and_enqueues_rest() {
        let (player, mut rx) = session_player(1);
        let playlist = Playlist {
            name: "lista".to_string(),
            selected_track: Some(1),
            tracks: vec![
                test_track("a", "uno", 1000),
                test_track("b", "dos", 1000),
                test_track("c", "tres", 1000),
            ],
        };
        player.play(playlist).await.unwrap();

        match rx.try_recv().unwrap() {
            OutgoingMessage::Play { track, .. } => assert_eq!(track, "b"),
            other => panic!("comando inesperado: {other:?}"),
        }
        assert_eq!(player.queue().count(), 2);
    }

    #[tokio::test]
    async fn test_seek_invalid_positions_send_nothing() {
        let (player, mut rx) = session_player(1);
        player.play(test_track("QQ==", "corta", 1000)).await.unwrap();
        let _ = rx.try_recv();

        assert!(matches!(
            player.seek(-5),
            Err(Error::InvalidSeekPosition(-5))
        ));
        assert!(matches!(
            player.seek(5000),
            Err(Error::InvalidSeekPosition(5000))
        ));
        assert!(rx.try_recv().is_err());

        player.seek(500).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutgoingMessage::Seek { position: 500, .. }
        ));
    }

    #[tokio::test]
    async fn test_pause_and_resume_are_idempotent() {
        let (player, mut rx) = session_player(1);
        player.play(test_track("QQ==", "cancion", 60_000)).await.unwrap();
        let _ = rx.try_recv();

        player.pause().unwrap();
        player.pause().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutgoingMessage::Pause { pause: true, .. }
        ));
        // La segunda pausa no envió nada.
        assert!(rx.try_recv().is_err());
        assert!(player.is_paused());

        player.resume().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutgoingMessage::Pause { pause: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_position_freezes_while_paused() {
        let (player, mut rx) = session_player(1);
        player.play(test_track("QQ==", "cancion", 60_000)).await.unwrap();
        let _ = rx.try_recv();
        player.apply_update(&PlayerUpdateState {
            time: 0,
            position: Some(500),
            connected: Some(true),
        });
        player.pause().unwrap();

        let frozen = player.position();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(player.position(), frozen);
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let (player, mut rx) = session_player(1);
        player.set_volume(5000).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutgoingMessage::Volume { volume: 1000, .. }
        ));
        assert_eq!(player.volume(), 1000);
    }

    #[tokio::test]
    async fn test_voice_update_waits_for_both_halves() {
        let (player, mut rx) = session_player(1);
        player.set_voice_session_id("sesion").unwrap();
        // Con una sola mitad no se envía nada.
        assert!(rx.try_recv().is_err());
        assert!(!player.is_connected());

        player.set_voice_server("token", "voz.example.com").unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutgoingMessage::VoiceUpdate { .. }
        ));
        assert!(player.is_connected());
    }

    #[tokio::test]
    async fn test_stop_preserves_queue() {
        let (player, mut rx) = session_player(1);
        player.play(test_track("QQ==", "cancion", 1000)).await.unwrap();
        player.enqueue(test_track("Qg==", "siguiente", 1000)).unwrap();
        let _ = rx.try_recv();

        player.stop().unwrap();
        assert!(matches!(rx.try_recv().unwrap(), OutgoingMessage::Stop { .. }));
        assert!(player.current_track().is_none());
        assert_eq!(player.queue().count(), 1);
    }

    #[tokio::test]
    async fn test_advance_drains_queue_then_idles() {
        let (player, mut rx) = session_player(1);
        player.enqueue(test_track("QQ==", "unica", 1000)).unwrap();

        assert!(player.advance().await.unwrap());
        assert!(matches!(rx.try_recv().unwrap(), OutgoingMessage::Play { .. }));

        // Cola agotada: ocioso sin error y sin comandos.
        assert!(!player.advance().await.unwrap());
        assert!(player.current_track().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_terminal() {
        let (player, mut rx) = session_player(7);
        let node = player.node().clone();

        player.destroy().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutgoingMessage::Destroy { .. }
        ));
        assert!(node.get_player(7).is_none());

        // La segunda destrucción no envía nada.
        player.destroy().unwrap();
        assert!(rx.try_recv().is_err());

        // Cualquier otro comando falla rápido.
        assert!(matches!(player.pause(), Err(Error::PlayerDead(7))));
        assert!(matches!(player.seek(0), Err(Error::PlayerDead(7))));
        assert!(matches!(
            player.play(test_track("QQ==", "x", 1)).await,
            Err(Error::PlayerDead(7))
        ));
    }

    #[tokio::test]
    async fn test_filter_rollback_when_session_is_down() {
        // Nodo sin sesión: el envío falla y la cadena local no cambia.
        let node = test_node("n1");
        let player = node.player(1);

        let result = player.add_filter(Filter::LowPass(filters::LowPass::default()));
        assert!(matches!(result, Err(Error::NodeUnavailable(_))));
        assert!(player.filters().is_empty());
    }

    #[tokio::test]
    async fn test_filters_resend_whole_chain() {
        let (player, mut rx) = session_player(1);
        player
            .add_filter(Filter::Timescale(filters::Timescale {
                speed: 1.25,
                ..filters::Timescale::default()
            }))
            .unwrap();
        player
            .add_filter(Filter::LowPass(filters::LowPass::default()))
            .unwrap();

        let _ = rx.try_recv();
        let second = rx.try_recv().unwrap();
        let value = serde_json::to_value(&second).unwrap();
        assert_eq!(value["op"], "filters");
        assert!(value.get("timescale").is_some());
        assert!(value.get("lowPass").is_some());

        player.remove_filter(FilterKind::Timescale).unwrap();
        let third = serde_json::to_value(rx.try_recv().unwrap()).unwrap();
        assert!(third.get("timescale").is_none());
        assert!(third.get("lowPass").is_some());
    }

    #[tokio::test]
    async fn test_track_end_finished_advances_queue() {
        let (player, mut rx) = session_player(1);
        player.play(test_track("QQ==", "primera", 1000)).await.unwrap();
        player.enqueue(test_track("Qg==", "segunda", 1000)).unwrap();
        let _ = rx.try_recv();

        player.handle_track_end(TrackEndReason::Finished);
        // El avance corre en segundo plano.
        let command = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match command {
            OutgoingMessage::Play { track, .. } => assert_eq!(track, "Qg=="),
            other => panic!("comando inesperado: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_track_end_replaced_does_not_advance() {
        let (player, mut rx) = session_player(1);
        player.play(test_track("QQ==", "primera", 1000)).await.unwrap();
        player.enqueue(test_track("Qg==", "segunda", 1000)).unwrap();
        let _ = rx.try_recv();

        player.handle_track_end(TrackEndReason::Replaced);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(player.queue().count(), 1);
    }
}
