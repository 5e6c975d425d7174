//! Ciclo de vida de la sesión WebSocket de un nodo.
//!
//! La tarea de sesión es dueña del stream: multiplexa comandos salientes,
//! frames entrantes y la señal de apagado del nodo. Una caída inesperada
//! intenta reanudarse con backoff dentro de la ventana de gracia; si la
//! ventana expira, los players quedan muertos y se emite WebsocketClosed.

use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::node::events::{self, LavalinkEvent};
use crate::node::{Node, SessionState};
use crate::protocol::OutgoingMessage;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Backoff exponencial con jitter para reintentos de conexión.
///
/// Cada llamada a `delay` devuelve un valor aleatorio entre 0 y
/// base·2^reintentos; al superar el máximo de reintentos el exponente se
/// reinicia.
pub(crate) struct ExponentialBackoff {
    base: f64,
    retries: u32,
    max_retries: u32,
}

impl ExponentialBackoff {
    pub(crate) fn new(base_secs: f64, max_retries: u32) -> Self {
        Self {
            base: base_secs,
            retries: 0,
            max_retries,
        }
    }

    pub(crate) fn delay(&mut self) -> Duration {
        self.retries += 1;
        if self.retries > self.max_retries {
            self.retries = 1;
        }
        let cap = self.base * 2f64.powi(self.retries as i32);
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..cap))
    }
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Websocket(tungstenite::Error::HttpFormat(e.into())))
}

/// Un intento de handshake con las cabeceras de autenticación, acotado por
/// el timeout de conexión.
pub(crate) async fn handshake(node: &Node) -> Result<WsStream> {
    let config = node.config();
    let mut request = config.websocket_uri().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert("Authorization", header(&config.password)?);
    headers.insert("User-Id", header(&config.user_id.to_string())?);
    headers.insert(
        "Client-Name",
        header(&format!("enlace/{}", env!("CARGO_PKG_VERSION")))?,
    );

    debug!(
        "🔌 Intentando handshake con el nodo {} en {}",
        node.identifier(),
        config.websocket_uri()
    );
    let (stream, _response) = timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| Error::NodeUnavailable(node.identifier().to_string()))??;
    Ok(stream)
}

/// Bucle de lectura/escritura de la sesión. Corre durante toda la vida del
/// nodo; solo lo cancela el token de apagado o el agotamiento de la ventana
/// de reanudación.
pub(crate) async fn session_loop(
    node: Node,
    mut stream: WsStream,
    mut commands: UnboundedReceiver<OutgoingMessage>,
) {
    let mut heartbeat = tokio::time::interval(node.config().heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = node.shutdown_token().cancelled() => {
                let _ = stream.close(None).await;
                debug!("🔌 Sesión del nodo {} cancelada", node.identifier());
                return;
            }
            command = commands.recv() => match command {
                Some(message) => {
                    let op = message.op();
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("⚠️ No se pudo serializar el comando {op}: {e}");
                            continue;
                        }
                    };
                    debug!("📤 Comando {op} al nodo {}", node.identifier());
                    if let Err(e) = stream.send(Message::Text(json)).await {
                        warn!("⚠️ Fallo enviando {op} al nodo {}: {e}", node.identifier());
                        // El comando se pierde: el llamador reconcilia por
                        // eventos, nunca por el envío en sí.
                        match recover(&node).await {
                            Some(new_stream) => stream = new_stream,
                            None => return,
                        }
                    }
                }
                // Todos los emisores cayeron: el nodo fue destruido.
                None => {
                    let _ = stream.close(None).await;
                    return;
                }
            },
            _ = heartbeat.tick() => {
                if let Err(e) = stream.send(Message::Ping(Vec::new())).await {
                    debug!("💓 Ping fallido al nodo {}: {e}", node.identifier());
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => events::dispatch(&node, &text),
                Some(Ok(Message::Close(close))) => {
                    match recover(&node).await {
                        Some(new_stream) => stream = new_stream,
                        None => {
                            node.session_lost(close);
                            return;
                        }
                    }
                }
                // Ping/pong y frames binarios: los gestiona el transporte.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("⚠️ Error en la sesión del nodo {}: {e}", node.identifier());
                    match recover(&node).await {
                        Some(new_stream) => stream = new_stream,
                        None => {
                            node.session_lost(None);
                            return;
                        }
                    }
                }
                None => {
                    match recover(&node).await {
                        Some(new_stream) => stream = new_stream,
                        None => {
                            node.session_lost(None);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Intenta reanudar la sesión dentro de la ventana de gracia. Devuelve el
/// stream nuevo, o `None` si la ventana expiró o el nodo fue apagado.
async fn recover(node: &Node) -> Option<WsStream> {
    node.set_state(SessionState::Reconnecting);
    info!(
        "🔁 Sesión perdida con el nodo {}, reintentando dentro de la ventana de gracia",
        node.identifier()
    );

    let deadline = Instant::now() + node.config().resume_timeout;
    let mut backoff = ExponentialBackoff::new(1.0, 10);
    loop {
        if node.shutdown_token().is_cancelled() {
            return None;
        }
        let wait = backoff.delay();
        if Instant::now() + wait >= deadline {
            warn!(
                "⛔ Ventana de reanudación agotada para el nodo {}",
                node.identifier()
            );
            return None;
        }
        sleep(wait).await;

        match handshake(node).await {
            Ok(stream) => {
                node.set_state(SessionState::Connected);
                // Los players se conservan al reanudar con el mismo
                // identificador.
                node.emit(LavalinkEvent::WebsocketOpen {
                    node: node.identifier().to_string(),
                });
                info!("✅ Sesión reanudada con el nodo {}", node.identifier());
                return Some(stream);
            }
            Err(e) => {
                debug!("🔁 Reintento fallido contra el nodo {}: {e}", node.identifier());
            }
        }
    }
}

/// Detalle de cierre para el evento terminal.
pub(crate) fn close_details(frame: Option<CloseFrame<'_>>) -> (u16, String, bool) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.into_owned(), true),
        None => (1006, String::new(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    #[tokio::test]
    async fn test_recover_gives_up_when_grace_window_is_zero() {
        let mut config = NodeConfig::default();
        config.identifier = Some("n1".to_string());
        config.resume_timeout = Duration::ZERO;
        let node = Node::new(config).unwrap();
        let mut events = node.subscribe();

        // La ventana ya expiró antes del primer reintento: no hay stream
        // nuevo y el nodo queda esperando el cierre terminal.
        assert!(recover(&node).await.is_none());
        assert_eq!(node.state(), SessionState::Reconnecting);

        // El cierre terminal marca muertos los players y emite el evento
        // con el código de cierre anómalo.
        let player = node.player(1);
        node.session_lost(None);
        assert!(player.is_dead());
        assert_eq!(node.state(), SessionState::Disconnected);
        match events.try_recv().unwrap() {
            LavalinkEvent::WebsocketClosed {
                guild_id,
                code,
                by_remote,
                ..
            } => {
                assert_eq!(guild_id, None);
                assert_eq!(code, 1006);
                assert!(!by_remote);
            }
            other => panic!("evento inesperado: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recover_stops_on_cancelled_node() {
        let node = Node::new(NodeConfig::default()).unwrap();
        node.disconnect();
        // El token cancelado corta la reanudación antes de cualquier espera.
        assert!(recover(&node).await.is_none());
    }

    #[test]
    fn test_backoff_bounded_and_resets() {
        let mut backoff = ExponentialBackoff::new(1.0, 3);
        for _ in 0..20 {
            let delay = backoff.delay();
            // Nunca supera base·2^(max+?) = 16s con base 1 y tope 3.
            assert!(delay <= Duration::from_secs_f64(16.0));
        }
    }

    #[test]
    fn test_close_details() {
        let (code, reason, by_remote) = close_details(None);
        assert_eq!(code, 1006);
        assert!(reason.is_empty());
        assert!(!by_remote);
    }
}
