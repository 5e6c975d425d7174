//! Snapshot de carga reportado por el nodo remoto.
//!
//! Las estadísticas solo se usan para el ranking de nodos; nunca para
//! corrección. Las muta únicamente el mensaje entrante `stats`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Milisegundos que el nodo lleva levantado.
    pub uptime: u64,
    /// Players conectados al nodo.
    pub players: u32,
    /// Players que están reproduciendo un track.
    pub playing_players: u32,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    /// Solo presente cuando el nodo tiene players activos.
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

/// Penalización de balanceo de carga derivada de un snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Penalty {
    pub player_penalty: f64,
    pub cpu_penalty: f64,
    pub null_frame_penalty: f64,
    pub deficit_frame_penalty: f64,
}

impl Penalty {
    pub fn from_stats(stats: &Stats) -> Self {
        let player_penalty = f64::from(stats.playing_players);
        let cpu_penalty = 1.05_f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0;

        let mut null_frame_penalty = 0.0;
        let mut deficit_frame_penalty = 0.0;
        if let Some(frames) = &stats.frame_stats {
            if frames.nulled >= 0 {
                null_frame_penalty =
                    (1.03_f64.powf(500.0 * (frames.nulled as f64 / 3000.0)) * 300.0 - 300.0) * 2.0;
            }
            if frames.deficit >= 0 {
                deficit_frame_penalty =
                    1.03_f64.powf(500.0 * (frames.deficit as f64 / 3000.0)) * 600.0 - 600.0;
            }
        }

        Self {
            player_penalty,
            cpu_penalty,
            null_frame_penalty,
            deficit_frame_penalty,
        }
    }

    /// Penalización total: cuanto menor, mejor candidato es el nodo.
    pub fn total(&self) -> f64 {
        self.player_penalty + self.cpu_penalty + self.null_frame_penalty + self.deficit_frame_penalty
    }
}

impl Stats {
    pub fn penalty(&self) -> Penalty {
        Penalty::from_stats(self)
    }
}
