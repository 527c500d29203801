use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Número de bandas del ecualizador de Lavalink (25 Hz - 16 kHz)
pub const EQ_BANDS: usize = 15;

/// Filtros de audio aplicados en el nodo.
///
/// Cada filtro ausente se omite del JSON; un `Filters::default()` enviado
/// al nodo limpia todos los filtros activos.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqualizerBand>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Oscillation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Oscillation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_filters: Option<Map<String, Value>>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Filtros con solo el ecualizador del preset indicado
    pub fn with_preset(preset: EqualizerPreset) -> Self {
        Self {
            equalizer: Some(preset.bands()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    /// 0..=14
    pub band: u8,
    /// -0.25 (silencio) ..= 1.0 (el doble)
    pub gain: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    pub level: Option<f32>,
    pub mono_level: Option<f32>,
    pub filter_band: Option<f32>,
    pub filter_width: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timescale {
    pub speed: Option<f32>,
    pub pitch: Option<f32>,
    pub rate: Option<f32>,
}

/// Tremolo y vibrato comparten forma
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Oscillation {
    pub frequency: Option<f32>,
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    pub rotation_hz: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distortion {
    pub sin_offset: Option<f32>,
    pub sin_scale: Option<f32>,
    pub cos_offset: Option<f32>,
    pub cos_scale: Option<f32>,
    pub tan_offset: Option<f32>,
    pub tan_scale: Option<f32>,
    pub offset: Option<f32>,
    pub scale: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMix {
    pub left_to_left: Option<f32>,
    pub left_to_right: Option<f32>,
    pub right_to_left: Option<f32>,
    pub right_to_right: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LowPass {
    pub smoothing: Option<f32>,
}

/// Presets de ecualizador disponibles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualizerPreset {
    Flat,
    Bass,
    Pop,
    Rock,
    Jazz,
    Classical,
    Electronic,
    Vocal,
}

impl EqualizerPreset {
    pub const ALL: [EqualizerPreset; 8] = [
        EqualizerPreset::Flat,
        EqualizerPreset::Bass,
        EqualizerPreset::Pop,
        EqualizerPreset::Rock,
        EqualizerPreset::Jazz,
        EqualizerPreset::Classical,
        EqualizerPreset::Electronic,
        EqualizerPreset::Vocal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EqualizerPreset::Flat => "flat",
            EqualizerPreset::Bass => "bass",
            EqualizerPreset::Pop => "pop",
            EqualizerPreset::Rock => "rock",
            EqualizerPreset::Jazz => "jazz",
            EqualizerPreset::Classical => "classical",
            EqualizerPreset::Electronic => "electronic",
            EqualizerPreset::Vocal => "vocal",
        }
    }

    /// Obtiene un preset por nombre
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        if name == "normal" {
            return Some(EqualizerPreset::Flat);
        }
        Self::ALL.into_iter().find(|preset| preset.name() == name)
    }

    /// Ganancias en dB sobre 10 bandas (32 Hz - 16 kHz)
    fn gains_db(self) -> [f32; 10] {
        match self {
            EqualizerPreset::Flat => [0.0; 10],
            EqualizerPreset::Bass => [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            EqualizerPreset::Pop => [-1.0, 2.0, 4.0, 5.0, 3.0, 0.0, -1.0, -1.0, 0.0, 0.0],
            EqualizerPreset::Rock => [5.0, 4.0, 3.0, 1.0, -1.0, -1.0, 0.0, 2.0, 3.0, 4.0],
            EqualizerPreset::Jazz => [0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0, 1.0, 2.0, 3.0],
            EqualizerPreset::Classical => [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -2.0, -2.0, -2.0, -3.0],
            EqualizerPreset::Electronic => [5.0, 4.0, 1.0, 0.0, -2.0, 2.0, 1.0, 0.0, 3.0, 4.0],
            EqualizerPreset::Vocal => [-2.0, -1.0, 0.0, 2.0, 4.0, 3.0, 2.0, 1.0, 0.0, -1.0],
        }
    }

    /// Reparte las 10 bandas en las 15 de Lavalink; 24 dB equivalen a ganancia 1.0
    pub fn bands(self) -> Vec<EqualizerBand> {
        let gains = self.gains_db();
        (0..EQ_BANDS)
            .map(|band| {
                let source = band * gains.len() / EQ_BANDS;
                EqualizerBand {
                    band: band as u8,
                    gain: (gains[source] / 24.0).clamp(-0.25, 1.0),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_lookup() {
        assert_eq!(EqualizerPreset::from_name("Rock"), Some(EqualizerPreset::Rock));
        assert_eq!(EqualizerPreset::from_name("normal"), Some(EqualizerPreset::Flat));
        assert_eq!(EqualizerPreset::from_name("dubstep"), None);
    }

    #[test]
    fn test_preset_bands_within_lavalink_range() {
        for preset in EqualizerPreset::ALL {
            let bands = preset.bands();
            assert_eq!(bands.len(), EQ_BANDS);
            assert!(bands.iter().all(|b| (-0.25..=1.0).contains(&b.gain)));
            assert_eq!(bands.last().map(|b| b.band), Some(14));
        }
    }

    #[test]
    fn test_empty_filters_serialize_to_empty_object() {
        assert!(Filters::default().is_empty());
        assert_eq!(serde_json::to_value(Filters::default()).unwrap(), serde_json::json!({}));
        assert!(!Filters::with_preset(EqualizerPreset::Bass).is_empty());
    }
}
