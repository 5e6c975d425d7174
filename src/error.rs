use thiserror::Error;

/// Alias de resultado usado en toda la librería.
pub type Result<T> = std::result::Result<T, Error>;

/// Severidad reportada por el nodo remoto al fallar la carga de un track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// La causa es conocida y no es culpa del nodo (ej: video privado).
    Common,
    /// La causa es sospechosa pero el nodo no está seguro.
    Suspicious,
    /// Fallo interno del nodo.
    Fault,
}

impl Severity {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "COMMON" => Self::Common,
            "SUSPICIOUS" => Self::Suspicious,
            _ => Self::Fault,
        }
    }
}

/// Errores de la librería.
///
/// Los errores de configuración y de estado son sincrónicos y no realizan
/// I/O. Los errores de protocolo remoto se devuelven al llamador de la
/// operación concreta y nunca tumban la sesión del nodo.
#[derive(Debug, Error)]
pub enum Error {
    /// Identificador de nodo malformado, vacío o inexistente en una
    /// búsqueda exacta.
    #[error("identificador de nodo inválido: {0}")]
    InvalidIdentifier(String),

    /// Ya existe un nodo registrado con ese identificador.
    #[error("ya existe un nodo con el identificador <{0}>")]
    NodeOccupied(String),

    /// No hay ningún nodo registrado en el pool.
    #[error("no hay nodos conectados")]
    NoNodesConnected,

    /// Un algoritmo de selección no encontró ningún nodo que cumpla el
    /// criterio (región, capacidad).
    #[error("ningún nodo cumple el criterio de búsqueda: {0}")]
    InvalidNodeSearch(String),

    /// Se intentó abrir una sesión WebSocket cuando ya hay una viva.
    #[error("el websocket de este nodo ya existe")]
    WebsocketAlreadyExists,

    /// El nodo remoto rechazó la carga de un track o playlist.
    #[error("error al cargar track ({severity:?}): {message}")]
    LoadTrack { severity: Severity, message: String },

    /// El nodo remoto no pudo reconstruir un track desde su ID base64.
    #[error("error al construir track: {0}")]
    BuildTrack(String),

    /// La cola está vacía y el modo de repetición no produce ningún track.
    #[error("la cola está vacía")]
    QueueEmpty,

    /// Posición de seek negativa o más allá de la duración conocida.
    #[error("posición de seek inválida: {0} ms")]
    InvalidSeekPosition(i64),

    /// Ya hay un filtro de ese tipo aplicado a la cadena.
    #[error("el filtro {0} ya está aplicado")]
    FilterAlreadyExists(&'static str),

    /// No hay ningún filtro de ese tipo que quitar.
    #[error("el filtro {0} no está aplicado")]
    FilterNotApplied(&'static str),

    /// Un argumento de filtro está fuera de rango.
    #[error("argumento de filtro inválido: {0}")]
    InvalidFilterArgument(String),

    /// El player fue destruido; no acepta más comandos.
    #[error("el player del guild {0} está muerto")]
    PlayerDead(u64),

    /// La sesión del nodo no está disponible (desconectado o destruido).
    #[error("el nodo {0} no está disponible")]
    NodeUnavailable(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
