use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! define_filters {
    ($($field:ident : $type:ty => $name:expr),* $(,)?) => {
        /// Audio filters as the node's player endpoint takes them.
        /// `None` fields are omitted so a patch only touches what is set.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Filters {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$type>,
            )*
        }

        impl Filters {
            pub fn names() -> &'static [&'static str] {
                &[$($name),*]
            }

            /// Overlays every field `incoming` sets.
            pub fn merge_from(&mut self, incoming: Filters) {
                $(
                    if incoming.$field.is_some() {
                        self.$field = incoming.$field;
                    }
                )*
            }

            pub fn is_all_none(&self) -> bool {
                $(
                    self.$field.is_none() &&
                )* true
            }

            /// Names of the filters currently set.
            pub fn active(&self) -> Vec<&'static str> {
                let mut out = Vec::new();
                $(
                    if self.$field.is_some() {
                        out.push($name);
                    }
                )*
                out
            }
        }
    };
}

define_filters! {
    volume: f32 => "volume",
    equalizer: Vec<EqBand> => "equalizer",
    karaoke: KaraokeFilter => "karaoke",
    timescale: TimescaleFilter => "timescale",
    tremolo: TremoloFilter => "tremolo",
    vibrato: VibratoFilter => "vibrato",
    rotation: RotationFilter => "rotation",
    distortion: DistortionFilter => "distortion",
    channel_mix: ChannelMixFilter => "channelMix",
    low_pass: LowPassFilter => "lowPass",
    plugin_filters: Value => "pluginFilters",
}

impl Filters {
    /// Faster and higher pitched.
    pub fn nightcore() -> Self {
        Self {
            timescale: Some(TimescaleFilter {
                speed: Some(1.165),
                pitch: Some(1.125),
                rate: Some(1.05),
            }),
            ..Default::default()
        }
    }

    /// Slower and lower pitched.
    pub fn vaporwave() -> Self {
        Self {
            timescale: Some(TimescaleFilter {
                speed: Some(1.0),
                pitch: Some(0.5),
                rate: Some(1.0),
            }),
            ..Default::default()
        }
    }

    pub fn slowmode(rate: f64) -> Self {
        Self {
            timescale: Some(TimescaleFilter {
                speed: Some(1.0),
                pitch: Some(1.0),
                rate: Some(rate),
            }),
            ..Default::default()
        }
    }

    /// Rotating stereo pan.
    pub fn eight_d(rotation_hz: f64) -> Self {
        Self {
            rotation: Some(RotationFilter {
                rotation_hz: Some(rotation_hz),
            }),
            ..Default::default()
        }
    }

    /// Boosts the 13 low bands; `level` is clamped to 0..=5.
    pub fn bassboost(level: f32) -> Self {
        let level = level.clamp(0.0, 5.0);
        let gain = (level - 1.0) * (1.25 / 9.0) - 0.25;
        Self {
            equalizer: Some((0..13).map(|band| EqBand { band, gain }).collect()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub band: u8,
    pub gain: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KaraokeFilter {
    pub level: Option<f32>,
    pub mono_level: Option<f32>,
    pub filter_band: Option<f32>,
    pub filter_width: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimescaleFilter {
    pub speed: Option<f64>,
    pub pitch: Option<f64>,
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TremoloFilter {
    pub frequency: Option<f32>,
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VibratoFilter {
    pub frequency: Option<f32>,
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationFilter {
    pub rotation_hz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistortionFilter {
    pub sin_offset: Option<f32>,
    pub sin_scale: Option<f32>,
    pub cos_offset: Option<f32>,
    pub cos_scale: Option<f32>,
    pub tan_offset: Option<f32>,
    pub tan_scale: Option<f32>,
    pub offset: Option<f32>,
    pub scale: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMixFilter {
    pub left_to_left: Option<f32>,
    pub left_to_right: Option<f32>,
    pub right_to_left: Option<f32>,
    pub right_to_right: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowPassFilter {
    pub smoothing: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_only_overwrites_set_fields() {
        let mut current = Filters::nightcore();
        current.volume = Some(0.8);

        current.merge_from(Filters::eight_d(0.2));
        assert_eq!(current.volume, Some(0.8));
        assert!(current.timescale.is_some());
        assert_eq!(current.rotation.as_ref().and_then(|r| r.rotation_hz), Some(0.2));
        assert_eq!(current.active(), vec!["volume", "timescale", "rotation"]);
    }

    #[test]
    fn serializes_only_active_filters() {
        let json = serde_json::to_value(Filters::eight_d(0.2)).unwrap();
        assert_eq!(json, serde_json::json!({ "rotation": { "rotationHz": 0.2 } }));
        assert!(Filters::default().is_all_none());
    }

    #[test]
    fn bassboost_covers_thirteen_bands() {
        let eq = Filters::bassboost(9.0).equalizer.unwrap();
        assert_eq!(eq.len(), 13);
        assert_eq!(eq[12].band, 12);
        assert!(eq.iter().all(|b| (b.gain - eq[0].gain).abs() < f32::EPSILON));
    }
}
