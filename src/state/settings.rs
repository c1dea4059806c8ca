/// Per-shot camera and look settings
///
/// Every shot carries a fully populated `ShotSettings`. The five fields are
/// drawn from closed vocabularies and serialized as their display strings,
/// which is also the shape used in project backups.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Camera motion during the shot
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraMovement {
    #[default]
    Static,
    #[serde(rename = "Pan Left")]
    PanLeft,
    #[serde(rename = "Pan Right")]
    PanRight,
    #[serde(rename = "Tilt Up")]
    TiltUp,
    #[serde(rename = "Tilt Down")]
    TiltDown,
    #[serde(rename = "Zoom In")]
    ZoomIn,
    #[serde(rename = "Zoom Out")]
    ZoomOut,
    #[serde(rename = "Dolly In")]
    DollyIn,
    #[serde(rename = "Dolly Out")]
    DollyOut,
    Tracking,
    Handheld,
    Crane,
}

/// Framing of the subject
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShotType {
    #[serde(rename = "Extreme Wide Shot")]
    ExtremeWide,
    #[serde(rename = "Wide Shot")]
    Wide,
    #[serde(rename = "Full Shot")]
    Full,
    #[serde(rename = "Medium Wide Shot")]
    MediumWide,
    #[default]
    #[serde(rename = "Medium Shot")]
    Medium,
    #[serde(rename = "Medium Close-Up")]
    MediumCloseUp,
    #[serde(rename = "Close-Up")]
    CloseUp,
    #[serde(rename = "Extreme Close-Up")]
    ExtremeCloseUp,
    #[serde(rename = "Over the Shoulder")]
    OverTheShoulder,
    #[serde(rename = "Point of View")]
    PointOfView,
    #[serde(rename = "Two Shot")]
    TwoShot,
    #[serde(rename = "Insert Shot")]
    Insert,
}

/// Output frame proportions
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "9:16")]
    Vertical,
    #[serde(rename = "21:9")]
    Anamorphic,
}

/// Rendering style requested from the image model
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArtStyle {
    #[default]
    Cinematic,
    Photorealistic,
    Anime,
    Watercolor,
    Sketch,
    #[serde(rename = "Comic Book")]
    ComicBook,
    #[serde(rename = "Film Noir")]
    FilmNoir,
    #[serde(rename = "3D Render")]
    Render3d,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lighting {
    #[default]
    Natural,
    #[serde(rename = "Golden Hour")]
    GoldenHour,
    #[serde(rename = "Blue Hour")]
    BlueHour,
    #[serde(rename = "High Key")]
    HighKey,
    #[serde(rename = "Low Key")]
    LowKey,
    Neon,
    Candlelight,
    Overcast,
}

/// All settings for a single shot
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShotSettings {
    pub camera_movement: CameraMovement,
    pub shot_type: ShotType,
    pub aspect_ratio: AspectRatio,
    pub art_style: ArtStyle,
    pub lighting: Lighting,
}

/// Settings as found in stored records, where any field may be missing
///
/// Older records predate some of the fields (notably `shotType`); the shot
/// migrator completes them from the defaults. A value outside the current
/// vocabulary is dropped and completed the same way.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PartialShotSettings {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub camera_movement: Option<CameraMovement>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub shot_type: Option<ShotType>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub art_style: Option<ArtStyle>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub lighting: Option<Lighting>,
}

/// Read an optional field, treating an unrecognized value as absent
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            warn!(%value, error = %e, "dropping unrecognized shot setting");
            Ok(None)
        }
    }
}

impl PartialShotSettings {
    /// Fill every missing field from the defaults
    pub fn complete(self) -> ShotSettings {
        let defaults = ShotSettings::default();
        ShotSettings {
            camera_movement: self.camera_movement.unwrap_or(defaults.camera_movement),
            shot_type: self.shot_type.unwrap_or(defaults.shot_type),
            aspect_ratio: self.aspect_ratio.unwrap_or(defaults.aspect_ratio),
            art_style: self.art_style.unwrap_or(defaults.art_style),
            lighting: self.lighting.unwrap_or(defaults.lighting),
        }
    }
}

impl From<ShotSettings> for PartialShotSettings {
    fn from(settings: ShotSettings) -> Self {
        Self {
            camera_movement: Some(settings.camera_movement),
            shot_type: Some(settings.shot_type),
            aspect_ratio: Some(settings.aspect_ratio),
            art_style: Some(settings.art_style),
            lighting: Some(settings.lighting),
        }
    }
}
