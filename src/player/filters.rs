//! Cadena de filtros de audio aplicada por player.
//!
//! Como máximo hay una instancia por tipo de filtro. El orden de inserción
//! es irrelevante: la serialización sigue siempre el orden fijo de
//! [`FilterKind`].

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Tipos de filtro soportados por el nodo remoto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterKind {
    Equalizer,
    Karaoke,
    Timescale,
    Tremolo,
    Vibrato,
    Rotation,
    Distortion,
    ChannelMix,
    LowPass,
}

impl FilterKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Equalizer => "equalizer",
            Self::Karaoke => "karaoke",
            Self::Timescale => "timescale",
            Self::Tremolo => "tremolo",
            Self::Vibrato => "vibrato",
            Self::Rotation => "rotation",
            Self::Distortion => "distortion",
            Self::ChannelMix => "channelMix",
            Self::LowPass => "lowPass",
        }
    }
}

/// Una banda del ecualizador: índice 0-14 y ganancia -0.25..1.0.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Band {
    pub band: u8,
    pub gain: f32,
}

/// Ecualizador de 15 bandas.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Equalizer {
    bands: Vec<Band>,
}

impl Equalizer {
    /// Ecualizador plano: no recorta ni amplifica ninguna frecuencia.
    pub fn flat() -> Self {
        Self {
            bands: (0..15).map(|band| Band { band, gain: 0.0 }).collect(),
        }
    }

    /// Construye un ecualizador con niveles arbitrarios (banda, ganancia).
    pub fn build(levels: &[(u8, f32)]) -> Result<Self> {
        for &(band, gain) in levels {
            if band > 14 {
                return Err(Error::InvalidFilterArgument(format!(
                    "la banda {band} no existe (0-14)"
                )));
            }
            if !(-0.25..=1.0).contains(&gain) {
                return Err(Error::InvalidFilterArgument(format!(
                    "ganancia {gain} fuera de rango (-0.25 a 1.0)"
                )));
            }
        }
        Ok(Self {
            bands: levels
                .iter()
                .map(|&(band, gain)| Band { band, gain })
                .collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    pub level: f32,
    pub mono_level: f32,
    pub filter_band: f32,
    pub filter_width: f32,
}

impl Default for Karaoke {
    fn default() -> Self {
        Self {
            level: 1.0,
            mono_level: 1.0,
            filter_band: 220.0,
            filter_width: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Timescale {
    pub speed: f32,
    pub pitch: f32,
    pub rate: f32,
}

impl Default for Timescale {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tremolo {
    pub frequency: f32,
    pub depth: f32,
}

impl Tremolo {
    pub fn new(frequency: f32, depth: f32) -> Result<Self> {
        if frequency < 0.0 {
            return Err(Error::InvalidFilterArgument(
                "la frecuencia debe ser mayor que 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&depth) {
            return Err(Error::InvalidFilterArgument(
                "la profundidad debe estar entre 0 y 1".to_string(),
            ));
        }
        Ok(Self { frequency, depth })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vibrato {
    pub frequency: f32,
    pub depth: f32,
}

impl Vibrato {
    pub fn new(frequency: f32, depth: f32) -> Result<Self> {
        if !(0.0..=14.0).contains(&frequency) {
            return Err(Error::InvalidFilterArgument(
                "la frecuencia debe estar entre 0 y 14".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&depth) {
            return Err(Error::InvalidFilterArgument(
                "la profundidad debe estar entre 0 y 1".to_string(),
            ));
        }
        Ok(Self { frequency, depth })
    }
}

/// Rota el sonido alrededor de los canales estéreo (audio panning).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    pub rotation_hz: f32,
}

impl Default for Rotation {
    fn default() -> Self {
        Self { rotation_hz: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Distortion {
    pub sin_offset: f32,
    pub sin_scale: f32,
    pub cos_offset: f32,
    pub cos_scale: f32,
    pub tan_offset: f32,
    pub tan_scale: f32,
    pub offset: f32,
    pub scale: f32,
}

impl Default for Distortion {
    fn default() -> Self {
        Self {
            sin_offset: 0.0,
            sin_scale: 1.0,
            cos_offset: 0.0,
            cos_scale: 1.0,
            tan_offset: 0.0,
            tan_scale: 1.0,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

/// Mezcla ambos canales con un factor configurable. Con todos los factores
/// a 0.5 los dos canales reciben el mismo audio.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMix {
    pub left_to_left: f32,
    pub left_to_right: f32,
    pub right_to_left: f32,
    pub right_to_right: f32,
}

impl ChannelMix {
    pub fn new(
        left_to_left: f32,
        left_to_right: f32,
        right_to_left: f32,
        right_to_right: f32,
    ) -> Result<Self> {
        for (name, value) in [
            ("leftToLeft", left_to_left),
            ("leftToRight", left_to_right),
            ("rightToLeft", right_to_left),
            ("rightToRight", right_to_right),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidFilterArgument(format!(
                    "{name} debe estar entre 0 y 1"
                )));
            }
        }
        Ok(Self {
            left_to_left,
            left_to_right,
            right_to_left,
            right_to_right,
        })
    }
}

/// Suprime las frecuencias altas dejando pasar las bajas.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LowPass {
    pub smoothing: f32,
}

impl Default for LowPass {
    fn default() -> Self {
        Self { smoothing: 20.0 }
    }
}

/// Un filtro aplicable. Conjunto cerrado: un proveedor nuevo de filtros
/// añade una variante, no una jerarquía.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equalizer(Equalizer),
    Karaoke(Karaoke),
    Timescale(Timescale),
    Tremolo(Tremolo),
    Vibrato(Vibrato),
    Rotation(Rotation),
    Distortion(Distortion),
    ChannelMix(ChannelMix),
    LowPass(LowPass),
}

impl Filter {
    pub fn kind(&self) -> FilterKind {
        match self {
            Self::Equalizer(_) => FilterKind::Equalizer,
            Self::Karaoke(_) => FilterKind::Karaoke,
            Self::Timescale(_) => FilterKind::Timescale,
            Self::Tremolo(_) => FilterKind::Tremolo,
            Self::Vibrato(_) => FilterKind::Vibrato,
            Self::Rotation(_) => FilterKind::Rotation,
            Self::Distortion(_) => FilterKind::Distortion,
            Self::ChannelMix(_) => FilterKind::ChannelMix,
            Self::LowPass(_) => FilterKind::LowPass,
        }
    }
}

/// Payload completo del comando `filters`: solo los tipos aplicados.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiltersPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Equalizer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Tremolo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPass>,
}

/// Cadena de filtros de un player: a lo sumo una instancia por tipo.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: BTreeMap<FilterKind, Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aplica un filtro nuevo. Falla si ya hay uno del mismo tipo; la
    /// cadena queda intacta en ese caso.
    pub fn add(&mut self, filter: Filter) -> Result<()> {
        let kind = filter.kind();
        if self.filters.contains_key(&kind) {
            return Err(Error::FilterAlreadyExists(kind.name()));
        }
        self.filters.insert(kind, filter);
        Ok(())
    }

    /// Quita el filtro del tipo dado y lo devuelve. Falla si no está
    /// aplicado; la cadena queda intacta en ese caso.
    pub fn remove(&mut self, kind: FilterKind) -> Result<Filter> {
        self.filters
            .remove(&kind)
            .ok_or(Error::FilterNotApplied(kind.name()))
    }

    pub fn get(&self, kind: FilterKind) -> Option<&Filter> {
        self.filters.get(&kind)
    }

    pub fn contains(&self, kind: FilterKind) -> bool {
        self.filters.contains_key(&kind)
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Serializa la cadena completa en el payload del comando `filters`.
    /// El orden lo fija el tipo, no el orden de inserción.
    pub fn to_payload(&self) -> FiltersPayload {
        let mut payload = FiltersPayload::default();
        for filter in self.filters.values() {
            match filter.clone() {
                Filter::Equalizer(f) => payload.equalizer = Some(f),
                Filter::Karaoke(f) => payload.karaoke = Some(f),
                Filter::Timescale(f) => payload.timescale = Some(f),
                Filter::Tremolo(f) => payload.tremolo = Some(f),
                Filter::Vibrato(f) => payload.vibrato = Some(f),
                Filter::Rotation(f) => payload.rotation = Some(f),
                Filter::Distortion(f) => payload.distortion = Some(f),
                Filter::ChannelMix(f) => payload.channel_mix = Some(f),
                Filter::LowPass(f) => payload.low_pass = Some(f),
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_duplicate_filter_fails() {
        let mut chain = FilterChain::new();
        chain.add(Filter::LowPass(LowPass::default())).unwrap();

        let result = chain.add(Filter::LowPass(LowPass { smoothing: 35.0 }));
        assert!(matches!(result, Err(Error::FilterAlreadyExists("lowPass"))));
        // La cadena no cambió tras el fallo.
        assert_eq!(chain.len(), 1);
        assert_eq!(
            chain.get(FilterKind::LowPass),
            Some(&Filter::LowPass(LowPass::default()))
        );
    }

    #[test]
    fn test_remove_unapplied_filter_fails() {
        let mut chain = FilterChain::new();
        chain.add(Filter::Karaoke(Karaoke::default())).unwrap();

        let result = chain.remove(FilterKind::Tremolo);
        assert!(matches!(result, Err(Error::FilterNotApplied("tremolo"))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_tremolo_validation() {
        assert!(Tremolo::new(-1.0, 0.5).is_err());
        assert!(Tremolo::new(2.0, 1.5).is_err());
        assert!(Tremolo::new(2.0, 0.5).is_ok());
    }

    #[test]
    fn test_vibrato_validation() {
        assert!(Vibrato::new(15.0, 0.5).is_err());
        assert!(Vibrato::new(7.0, 0.5).is_ok());
    }

    #[test]
    fn test_channel_mix_validation() {
        assert!(ChannelMix::new(0.5, 0.5, 0.5, 0.5).is_ok());
        assert!(ChannelMix::new(1.1, 0.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_equalizer_build_validation() {
        assert!(Equalizer::build(&[(15, 0.0)]).is_err());
        assert!(Equalizer::build(&[(3, 2.0)]).is_err());
        assert!(Equalizer::build(&[(3, 0.25), (7, -0.1)]).is_ok());
    }

    #[test]
    fn test_payload_only_contains_applied_kinds() {
        let mut chain = FilterChain::new();
        chain
            .add(Filter::Timescale(Timescale {
                speed: 1.2,
                ..Timescale::default()
            }))
            .unwrap();
        chain.add(Filter::Equalizer(Equalizer::flat())).unwrap();

        let value = serde_json::to_value(chain.to_payload()).unwrap();
        assert!(value.get("timescale").is_some());
        assert!(value.get("equalizer").is_some());
        assert!(value.get("karaoke").is_none());
        assert_eq!(value["timescale"]["speed"], 1.2);
        // El ecualizador plano serializa las 15 bandas.
        assert_eq!(value["equalizer"].as_array().unwrap().len(), 15);
    }
}
