//! Cliente asíncrono para nodos remotos de procesamiento de audio
//! (protocolo Lavalink).
//!
//! La librería es el plano de control del lado cliente: registra nodos,
//! mantiene una sesión WebSocket por nodo, expone un player por guild y
//! reconcilia el estado local con los eventos que el servidor emite. El
//! audio en sí nunca pasa por aquí.
//!
//! ```no_run
//! use enlace::{NodeConfig, NodePool, Provider, SearchOptions, SearchOutcome};
//!
//! # async fn demo() -> enlace::Result<()> {
//! let pool = NodePool::new();
//! let mut config = NodeConfig::new("lava.example.com", 2333, "secreto");
//! config.user_id = 1234;
//! pool.create_node(config).await?;
//!
//! let node = pool.balanced()?;
//! let outcome = enlace::sources::search(
//!     &node,
//!     Provider::Youtube,
//!     "lofi beats",
//!     SearchOptions { return_first: true, ..Default::default() },
//! )
//! .await?;
//!
//! if let SearchOutcome::Track(track) = outcome {
//!     let player = node.player(9876);
//!     player.set_voice_session_id("sesion")?;
//!     player.set_voice_server("token", "voz.example.com")?;
//!     player.play(track).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod player;
pub mod protocol;
pub mod sources;

pub use config::NodeConfig;
pub use error::{Error, Result, Severity};
pub use node::events::{LavalinkEvent, TrackEndReason};
pub use node::pool::NodePool;
pub use node::stats::{Penalty, Stats};
pub use node::{Node, SessionState};
pub use player::filters::{Filter, FilterChain, FilterKind};
pub use player::queue::{LoopMode, Queue};
pub use player::{PlayOptions, Player};
pub use sources::{
    LoadResult, PartialResource, Playable, Playlist, Provider, SearchOptions, SearchOutcome,
    Track, TrackInfo,
};
