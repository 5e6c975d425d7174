//! Modelo de recursos reproducibles y resolución de búsquedas.
//!
//! Un [`Playable`] es un descriptor inmutable (o perezoso) de un recurso de
//! audio. El conjunto de proveedores es cerrado: añadir uno nuevo es añadir
//! una variante de [`Provider`] con su patrón de URL y prefijo de búsqueda,
//! no una jerarquía de herencia.

use regex::Regex;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{Error, Result, Severity};
use crate::node::Node;

/// Metadatos de un track tal y como los reporta el nodo remoto.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duración en milisegundos.
    pub length: u64,
    #[serde(default)]
    pub is_stream: bool,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

/// Un track resuelto: ID base64 opaco asignado por el servidor más sus
/// metadatos. El ID es inmutable una vez resuelto.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: String,
    info: TrackInfo,
}

impl Track {
    pub fn new(id: impl Into<String>, info: TrackInfo) -> Self {
        Self {
            id: id.into(),
            info,
        }
    }

    /// ID base64 opaco que entiende el nodo remoto.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn author(&self) -> &str {
        &self.info.author
    }

    /// Duración en milisegundos.
    pub fn length_ms(&self) -> u64 {
        self.info.length
    }

    pub fn uri(&self) -> Option<&str> {
        self.info.uri.as_deref()
    }

    pub fn source_name(&self) -> Option<&str> {
        self.info.source_name.as_deref()
    }

    pub fn artwork_url(&self) -> Option<&str> {
        self.info.artwork_url.as_deref()
    }
}

/// Secuencia ordenada de tracks con nombre.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub name: String,
    /// Índice del track marcado como seleccionado por el proveedor.
    pub selected_track: Option<usize>,
    pub tracks: Vec<Track>,
}

/// Resultado del endpoint `loadtracks` del nodo.
///
/// "Sin resultados" es un resultado vacío, no un error: los fallos del
/// proveedor se reportan como [`Error::LoadTrack`].
#[derive(Debug, Clone)]
pub enum LoadResult {
    Track(Track),
    Search(Vec<Track>),
    Playlist(Playlist),
    Empty,
}

/// Proveedores de contenido conocidos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Youtube,
    YoutubeMusic,
    Soundcloud,
    Spotify,
    Local,
}

fn youtube_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://(www\.|m\.)?(youtube\.com|youtu\.be)/").expect("patrón válido")
    })
}

fn youtube_music_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://music\.youtube\.com/").expect("patrón válido"))
}

fn soundcloud_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://(www\.|m\.)?soundcloud\.com/").expect("patrón válido")
    })
}

fn spotify_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://open\.spotify\.com/(track|album|playlist)/").expect("patrón válido")
    })
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::YoutubeMusic => "youtubemusic",
            Self::Soundcloud => "soundcloud",
            Self::Spotify => "spotify",
            Self::Local => "local",
        }
    }

    /// Prefijo de búsqueda que entiende el nodo remoto.
    pub fn search_prefix(self) -> Option<&'static str> {
        match self {
            Self::Youtube => Some("ytsearch:"),
            Self::YoutubeMusic => Some("ytmsearch:"),
            Self::Soundcloud => Some("scsearch:"),
            Self::Spotify => Some("spsearch:"),
            Self::Local => None,
        }
    }

    /// Capacidad que debe declarar el nodo para servir este proveedor.
    pub fn required_capability(self) -> Option<&'static str> {
        match self {
            Self::Spotify => Some("spotify"),
            _ => None,
        }
    }

    /// Si la URL pertenece a la forma canónica de este proveedor.
    pub fn matches_url(self, url: &str) -> bool {
        match self {
            // El patrón de YouTube Music es más específico y se comprueba
            // antes que el genérico en `detect`.
            Self::Youtube => youtube_url().is_match(url),
            Self::YoutubeMusic => youtube_music_url().is_match(url),
            Self::Soundcloud => soundcloud_url().is_match(url),
            Self::Spotify => spotify_url().is_match(url),
            Self::Local => url.starts_with('/') || url.starts_with("file://"),
        }
    }

    /// Detecta el proveedor al que pertenece una URL.
    pub fn detect(url: &str) -> Option<Self> {
        [
            Self::YoutubeMusic,
            Self::Youtube,
            Self::Soundcloud,
            Self::Spotify,
            Self::Local,
        ]
        .into_iter()
        .find(|provider| provider.matches_url(url))
    }
}

struct PartialInner {
    provider: Provider,
    query: String,
    resolved: OnceCell<Track>,
}

/// Recurso de resolución diferida.
///
/// Guarda solo la consulta y el proveedor, y se resuelve a un [`Track`] real
/// de forma perezosa, exactamente una vez, en el momento en que se entrega a
/// un comando `play`. Permite construir colas grandes sin golpear la API de
/// búsqueda del proveedor por cada entrada.
#[derive(Clone)]
pub struct PartialResource {
    inner: Arc<PartialInner>,
}

impl std::fmt::Debug for PartialResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialResource")
            .field("provider", &self.inner.provider.name())
            .field("query", &self.inner.query)
            .field("resolved", &self.inner.resolved.get().is_some())
            .finish()
    }
}

impl PartialResource {
    pub fn new(provider: Provider, query: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PartialInner {
                provider,
                query: query.into(),
                resolved: OnceCell::new(),
            }),
        }
    }

    pub fn provider(&self) -> Provider {
        self.inner.provider
    }

    pub fn query(&self) -> &str {
        &self.inner.query
    }

    /// El track ya resuelto, si la resolución ocurrió.
    pub fn resolved(&self) -> Option<&Track> {
        self.inner.resolved.get()
    }

    /// Resuelve la consulta contra el nodo dado. La resolución exitosa se
    /// cachea: nunca se ejecuta dos veces. Un intento fallido no envenena
    /// el recurso y puede reintentarse.
    pub async fn resolve(&self, node: &Node) -> Result<Track> {
        let provider = self.inner.provider;
        let query = self.inner.query.clone();
        self.resolve_with(|| async move {
            debug!("🔎 Resolviendo recurso diferido: {query}");
            let outcome = search(
                node,
                provider,
                &query,
                SearchOptions {
                    return_first: true,
                    partial: false,
                },
            )
            .await?;
            match outcome {
                SearchOutcome::Track(track) => Ok(track),
                SearchOutcome::Tracks(mut tracks) if !tracks.is_empty() => Ok(tracks.remove(0)),
                SearchOutcome::Playlist(playlist) => {
                    let index = playlist
                        .selected_track
                        .unwrap_or(0)
                        .min(playlist.tracks.len().saturating_sub(1));
                    playlist
                        .tracks
                        .into_iter()
                        .nth(index)
                        .ok_or_else(|| empty_resolution(&query))
                }
                _ => Err(empty_resolution(&query)),
            }
        })
        .await
    }

    async fn resolve_with<F, Fut>(&self, fetch: F) -> Result<Track>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Track>>,
    {
        self.inner.resolved.get_or_try_init(fetch).await.cloned()
    }
}

fn empty_resolution(query: &str) -> Error {
    Error::LoadTrack {
        severity: Severity::Common,
        message: format!("la consulta <{query}> no produjo ningún track"),
    }
}

/// Un recurso reproducible: track resuelto, playlist o recurso diferido.
#[derive(Debug, Clone)]
pub enum Playable {
    Track(Track),
    Playlist(Playlist),
    Partial(PartialResource),
}

impl Playable {
    pub fn as_track(&self) -> Option<&Track> {
        match self {
            Self::Track(track) => Some(track),
            _ => None,
        }
    }
}

impl From<Track> for Playable {
    fn from(track: Track) -> Self {
        Self::Track(track)
    }
}

impl From<Playlist> for Playable {
    fn from(playlist: Playlist) -> Self {
        Self::Playlist(playlist)
    }
}

impl From<PartialResource> for Playable {
    fn from(partial: PartialResource) -> Self {
        Self::Partial(partial)
    }
}

/// Opciones de búsqueda.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Devolver solo la primera coincidencia en vez de la lista completa.
    pub return_first: bool,
    /// Cortocircuitar la resolución y devolver un [`PartialResource`].
    pub partial: bool,
}

/// Resultado de una búsqueda.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// Una única coincidencia (URL canónica o `return_first`).
    Track(Track),
    /// Lista ordenada de coincidencias.
    Tracks(Vec<Track>),
    Playlist(Playlist),
    /// Resolución diferida, sin tocar la red.
    Partial(PartialResource),
    /// Sin coincidencias. No es un error.
    Empty,
}

/// Convierte consulta/URL en el identificador que entiende el nodo.
fn build_identifier(provider: Provider, query: &str) -> String {
    if query.starts_with("http://")
        || query.starts_with("https://")
        || provider == Provider::Local
    {
        query.to_string()
    } else if let Some(prefix) = provider.search_prefix() {
        format!("{prefix}{query}")
    } else {
        query.to_string()
    }
}

/// Resuelve una consulta o URL contra un nodo.
///
/// Si la consulta es una URL de un proveedor conocido, ese proveedor manda
/// sobre el indicado y la URL se resuelve directamente a su forma canónica
/// (un track o una playlist). Si no, se emite una búsqueda del proveedor
/// indicado. Con `partial` activo no se toca la red: se devuelve un recurso
/// diferido.
pub async fn search(
    node: &Node,
    provider: Provider,
    query: &str,
    options: SearchOptions,
) -> Result<SearchOutcome> {
    // La capacidad se comprueba contra el proveedor efectivo: una URL de
    // Spotify exige la capacidad aunque el llamador pidiera otra cosa.
    let provider = Provider::detect(query).unwrap_or(provider);
    if let Some(capability) = provider.required_capability() {
        if !node.has_capability(capability) {
            return Err(Error::InvalidNodeSearch(format!(
                "el nodo {} no declara la capacidad {capability}",
                node.identifier()
            )));
        }
    }

    if options.partial {
        return Ok(SearchOutcome::Partial(PartialResource::new(provider, query)));
    }

    let identifier = build_identifier(provider, query);
    info!("🔎 Buscando en {}: {query}", provider.name());

    match node.load_tracks(&identifier).await? {
        LoadResult::Track(track) => Ok(SearchOutcome::Track(track)),
        LoadResult::Playlist(playlist) => Ok(SearchOutcome::Playlist(playlist)),
        LoadResult::Search(mut tracks) => {
            if tracks.is_empty() {
                Ok(SearchOutcome::Empty)
            } else if options.return_first {
                Ok(SearchOutcome::Track(tracks.remove(0)))
            } else {
                Ok(SearchOutcome::Tracks(tracks))
            }
        }
        LoadResult::Empty => Ok(SearchOutcome::Empty),
    }
}

#[cfg(test)]
pub(crate) fn test_track(id: &str, title: &str, length: u64) -> Track {
    Track::new(
        id,
        TrackInfo {
            identifier: id.to_string(),
            is_seekable: true,
            author: "autor".to_string(),
            length,
            is_stream: false,
            title: title.to_string(),
            uri: None,
            source_name: Some("youtube".to_string()),
            artwork_url: None,
        },
    )
}
