//! Cola de reproducción de un player.

use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sources::{Playable, Playlist};

/// Modo de repetición de la cola.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Sin repetición: cada track sale de la cola una sola vez.
    #[default]
    None,
    /// Repite siempre la misma entrada sin avanzar.
    Single,
    /// Al avanzar, la entrada vuelve al final de la cola.
    All,
}

/// Secuencia ordenada y mutable de recursos reproducibles. Cada cola
/// pertenece exactamente a un player.
#[derive(Debug, Default)]
pub struct Queue {
    tracks: VecDeque<Playable>,
    loop_mode: LoopMode,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un recurso al final de la cola.
    pub fn add(&mut self, playable: impl Into<Playable>) {
        self.tracks.push_back(playable.into());
    }

    /// Agrega varios recursos de una vez.
    pub fn add_all(&mut self, playables: impl IntoIterator<Item = Playable>) {
        for playable in playables {
            self.add(playable);
        }
    }

    /// Aplana una playlist y agrega sus tracks individualmente.
    pub fn add_playlist(&mut self, playlist: Playlist) {
        let count = playlist.tracks.len();
        for track in playlist.tracks {
            self.tracks.push_back(Playable::Track(track));
        }
        info!("➕ Agregadas {count} canciones de la playlist {}", playlist.name);
    }

    /// Obtiene la siguiente entrada respetando el modo de repetición.
    ///
    /// Con la cola vacía y modo `None` falla con [`Error::QueueEmpty`] en
    /// vez de devolver un valor.
    pub fn next(&mut self) -> Result<Playable> {
        match self.loop_mode {
            LoopMode::None => self.tracks.pop_front().ok_or(Error::QueueEmpty),
            LoopMode::Single => self.tracks.front().cloned().ok_or(Error::QueueEmpty),
            LoopMode::All => {
                let next = self.tracks.pop_front().ok_or(Error::QueueEmpty)?;
                self.tracks.push_back(next.clone());
                Ok(next)
            }
        }
    }

    /// Elimina la entrada en la posición dada.
    pub fn remove(&mut self, index: usize) -> Option<Playable> {
        let removed = self.tracks.remove(index);
        if removed.is_some() {
            debug!("❌ Entrada eliminada en posición {index}");
        }
        removed
    }

    /// Mezcla la cola.
    pub fn shuffle(&mut self) {
        let mut items: Vec<_> = self.tracks.drain(..).collect();
        items.shuffle(&mut rand::thread_rng());
        self.tracks.extend(items);
        info!("🔀 Cola mezclada");
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn count(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// Vista de las entradas pendientes, en orden.
    pub fn tracks(&self) -> impl Iterator<Item = &Playable> {
        self.tracks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_track;

    fn queue_with(titles: &[&str]) -> Queue {
        let mut queue = Queue::new();
        for (i, title) in titles.iter().enumerate() {
            queue.add(test_track(&format!("id{i}"), title, 1000));
        }
        queue
    }

    fn next_title(queue: &mut Queue) -> String {
        queue
            .next()
            .unwrap()
            .as_track()
            .unwrap()
            .title()
            .to_string()
    }

    #[test]
    fn test_next_none_mode_drains_then_fails() {
        let mut queue = queue_with(&["a", "b"]);
        assert_eq!(next_title(&mut queue), "a");
        assert_eq!(next_title(&mut queue), "b");
        assert!(matches!(queue.next(), Err(Error::QueueEmpty)));
    }

    #[test]
    fn test_next_all_mode_cycles() {
        let mut queue = queue_with(&["a", "b", "c"]);
        queue.set_loop_mode(LoopMode::All);
        // Tras N llamadas vuelve al primero.
        assert_eq!(next_title(&mut queue), "a");
        assert_eq!(next_title(&mut queue), "b");
        assert_eq!(next_title(&mut queue), "c");
        assert_eq!(next_title(&mut queue), "a");
        assert_eq!(queue.count(), 3);
    }

    #[test]
    fn test_next_single_mode_repeats() {
        let mut queue = queue_with(&["a", "b"]);
        queue.set_loop_mode(LoopMode::Single);
        assert_eq!(next_title(&mut queue), "a");
        assert_eq!(next_title(&mut queue), "a");
        assert_eq!(queue.count(), 2);
    }

    #[test]
    fn test_empty_queue_fails_in_all_modes() {
        let mut queue = Queue::new();
        for mode in [LoopMode::None, LoopMode::Single, LoopMode::All] {
            queue.set_loop_mode(mode);
            assert!(matches!(queue.next(), Err(Error::QueueEmpty)));
        }
    }

    #[test]
    fn test_shuffle_preserves_membership() {
        let mut queue = queue_with(&["a", "b", "c", "d", "e"]);
        queue.shuffle();
        let mut titles: Vec<_> = queue
            .tracks()
            .map(|p| p.as_track().unwrap().title().to_string())
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_add_playlist_flattens() {
        let mut queue = Queue::new();
        queue.add_playlist(Playlist {
            name: "mi lista".to_string(),
            selected_track: None,
            tracks: vec![test_track("1", "a", 1), test_track("2", "b", 1)],
        });
        assert_eq!(queue.count(), 2);
        assert!(queue.tracks().all(|p| p.as_track().is_some()));
    }
}
