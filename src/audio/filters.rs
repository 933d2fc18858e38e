//! Audio filters applied by the node.
//!
//! A player's [`Filters`] remembers which filter is enabled (a named preset or a
//! custom [`FilterData`]) and produces the payload the player sends as the
//! `filters` op.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::protocol::EqualizerBand;
use crate::{Error, Result};

/// Filter parameters understood by Lavalink. Every field is optional and only
/// present fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterData {
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
    pub low_pass: Option<LowPass>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mono_level: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_band: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_width: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timescale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f32>,
}

/// Tremolo / vibrato.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Oscillation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rotation {
    #[serde(rename = "rotationHz")]
    pub rotation_hz: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LowPass {
    pub smoothing: f32,
}

/// What to apply with [`Filters::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// A named preset (`nightcore`, `bassboostHard`, ...).
    Preset(String),
    Custom(FilterData),
    /// Disable every filter.
    Clear,
}

/// Estado de filtros de un player.
#[derive(Debug, Clone)]
pub struct Filters {
    presets: Arc<BTreeMap<String, FilterData>>,
    enabled_key: Option<String>,
    enabled: Option<FilterData>,
}

impl Default for Filters {
    fn default() -> Self {
        Self::with_presets(default_presets())
    }
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters backed by a custom preset table.
    pub fn with_presets(presets: BTreeMap<String, FilterData>) -> Self {
        Self {
            presets: Arc::new(presets),
            enabled_key: None,
            enabled: None,
        }
    }

    pub fn presets(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    /// Name of the enabled filter: a preset name, `"custom"`, or `None`.
    pub fn enabled_key(&self) -> Option<&str> {
        self.enabled_key.as_deref()
    }

    pub fn enabled(&self) -> Option<&FilterData> {
        self.enabled.as_ref()
    }

    /// Enables `filter` and returns the data to send. Clearing sends an empty set.
    pub fn apply(&mut self, filter: Filter) -> Result<FilterData> {
        match filter {
            Filter::Preset(name) => {
                let data = self
                    .presets
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| Error::validation(format!("unknown filter preset '{name}'")))?;
                info!("🎛️ Filtro '{}' aplicado", name);
                self.enabled_key = Some(name);
                self.enabled = Some(data.clone());
                Ok(data)
            }
            Filter::Custom(data) => {
                info!("🎛️ Filtro personalizado aplicado");
                self.enabled_key = Some("custom".to_string());
                self.enabled = Some(data.clone());
                Ok(data)
            }
            Filter::Clear => {
                info!("🎛️ Filtros desactivados");
                self.enabled_key = None;
                self.enabled = None;
                Ok(FilterData::default())
            }
        }
    }
}

fn bands(gains: &[(usize, f32)]) -> Option<Vec<EqualizerBand>> {
    Some(
        gains
            .iter()
            .map(|&(band, gain)| EqualizerBand { band, gain })
            .collect(),
    )
}

fn bassboost(gain: f32) -> FilterData {
    FilterData {
        equalizer: Some((0..6).map(|band| EqualizerBand { band, gain }).collect()),
        ..Default::default()
    }
}

fn wobble() -> Option<Oscillation> {
    Some(Oscillation {
        depth: Some(0.3),
        frequency: Some(14.0),
    })
}

/// Built-in preset table.
pub fn default_presets() -> BTreeMap<String, FilterData> {
    let mut presets = BTreeMap::new();

    presets.insert(
        "timescale".to_string(),
        FilterData {
            timescale: Some(Timescale {
                rate: Some(1.0),
                speed: Some(1.0),
                pitch: Some(1.0),
            }),
            ..Default::default()
        },
    );
    presets.insert(
        "karaoke".to_string(),
        FilterData {
            karaoke: Some(Karaoke {
                level: Some(1.0),
                mono_level: Some(1.0),
                filter_band: Some(220.0),
                filter_width: Some(100.0),
            }),
            ..Default::default()
        },
    );
    presets.insert(
        "tremolo".to_string(),
        FilterData {
            tremolo: Some(Oscillation {
                depth: Some(0.5),
                frequency: Some(2.0),
            }),
            ..Default::default()
        },
    );
    presets.insert(
        "pop".to_string(),
        FilterData {
            equalizer: bands(&[
                (0, 0.65),
                (1, 0.45),
                (2, -0.45),
                (3, -0.65),
                (4, -0.35),
                (5, 0.45),
                (6, 0.55),
                (7, 0.6),
                (8, 0.6),
                (9, 0.6),
                (10, 0.0),
                (11, 0.0),
                (12, 0.0),
                (13, 0.0),
            ]),
            ..Default::default()
        },
    );
    presets.insert(
        "eightD".to_string(),
        FilterData {
            rotation: Some(Rotation { rotation_hz: 0.2 }),
            ..Default::default()
        },
    );
    presets.insert(
        "slowed".to_string(),
        FilterData {
            equalizer: bands(&[(1, 0.3), (0, 0.3)]),
            timescale: Some(Timescale {
                pitch: Some(1.1),
                rate: Some(0.8),
                speed: None,
            }),
            tremolo: wobble(),
            ..Default::default()
        },
    );
    presets.insert(
        "vaporwave".to_string(),
        FilterData {
            equalizer: bands(&[(1, 0.3), (0, 0.3)]),
            timescale: Some(Timescale {
                pitch: Some(0.5),
                ..Default::default()
            }),
            tremolo: wobble(),
            ..Default::default()
        },
    );
    presets.insert(
        "nightcore".to_string(),
        FilterData {
            equalizer: bands(&[(1, 0.1), (0, 0.1)]),
            timescale: Some(Timescale {
                pitch: Some(1.2),
                speed: Some(1.1),
                rate: None,
            }),
            tremolo: wobble(),
            ..Default::default()
        },
    );
    presets.insert(
        "soft".to_string(),
        FilterData {
            equalizer: bands(
                &(0..14)
                    .map(|band| (band, if band >= 8 { -0.25 } else { 0.0 }))
                    .collect::<Vec<_>>(),
            ),
            ..Default::default()
        },
    );

    presets.insert("bassboostLow".to_string(), bassboost(0.06));
    presets.insert("bassboostMedium".to_string(), bassboost(0.09));
    presets.insert("bassboostHard".to_string(), bassboost(0.14));
    presets.insert("bassboostExtreme".to_string(), bassboost(0.2));

    presets
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_preset_table() {
        let filters = Filters::new();
        let names: Vec<&str> = filters.presets().collect();
        for expected in ["nightcore", "eightD", "bassboostExtreme", "soft", "pop"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert_eq!(names.len(), 13);
    }

    #[test]
    fn test_apply_preset_and_clear() {
        let mut filters = Filters::new();
        let data = filters.apply(Filter::Preset("eightD".into())).unwrap();
        assert_eq!(filters.enabled_key(), Some("eightD"));
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({"rotation": {"rotationHz": 0.2}})
        );

        let cleared = filters.apply(Filter::Clear).unwrap();
        assert_eq!(cleared, FilterData::default());
        assert_eq!(filters.enabled_key(), None);
        assert!(filters.enabled().is_none());
    }

    #[test]
    fn test_custom_and_unknown() {
        let mut filters = Filters::new();
        let custom = FilterData {
            volume: Some(0.8),
            ..Default::default()
        };
        filters.apply(Filter::Custom(custom.clone())).unwrap();
        assert_eq!(filters.enabled_key(), Some("custom"));
        assert_eq!(filters.enabled(), Some(&custom));

        assert!(filters.apply(Filter::Preset("nope".into())).is_err());
        // A failed apply leaves the previous filter enabled.
        assert_eq!(filters.enabled_key(), Some("custom"));
    }

    #[test]
    fn test_bassboost_covers_six_bands() {
        let data = bassboost(0.14);
        let eq = data.equalizer.unwrap();
        assert_eq!(eq.len(), 6);
        assert!(eq.iter().enumerate().all(|(i, b)| b.band == i && b.gain == 0.14));
    }
}
