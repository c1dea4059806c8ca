/// Shared data structures for the application state
///
/// These structs represent the data model that flows between
/// the catalog, the reducer and the backup files. Live types
/// (`Project`, `Shot`, `ImageAsset`) always satisfy the model's
/// invariants; the `*Record` types are the permissive stored shapes
/// that only the shot migrator turns into live values.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::settings::{PartialShotSettings, ShotSettings};

pub type ProjectId = String;
pub type ShotId = String;
pub type VariationId = String;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Generate a fresh unique id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall clock time in milliseconds
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Next `updatedAt` value for a record last touched at `previous`
///
/// Always strictly greater than `previous`, so two mutations inside the
/// same millisecond still register as a change.
pub fn next_timestamp(previous: Timestamp, now: Timestamp) -> Timestamp {
    now.max(previous + 1)
}

/// One generated or edited image for a shot
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    pub id: VariationId,
    /// Full resolution payload (data URL)
    pub original_url: String,
    /// Compressed payload for display (data URL)
    pub preview_url: String,
    pub original_file_size: u64,
    pub preview_file_size: u64,
    pub created_at: Timestamp,
}

/// A single shot in a storyboard
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Shot {
    pub id: ShotId,
    /// 1-based position in the containing list
    pub shot_number: u32,
    pub description: String,
    pub visual_prompt: String,
    /// Newest first
    pub image_variations: Vec<ImageAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_variation_id: Option<VariationId>,
    pub is_generating_image: bool,
    pub is_updating_prompt: bool,
    pub settings: ShotSettings,
}

impl Shot {
    /// Create a shot with default settings and no images
    pub fn new(shot_number: u32, description: impl Into<String>, visual_prompt: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            shot_number,
            description: description.into(),
            visual_prompt: visual_prompt.into(),
            image_variations: Vec::new(),
            selected_variation_id: None,
            is_generating_image: false,
            is_updating_prompt: false,
            settings: ShotSettings::default(),
        }
    }

    /// The currently selected variation, if the selection resolves
    pub fn selected_variation(&self) -> Option<&ImageAsset> {
        let selected = self.selected_variation_id.as_deref()?;
        self.image_variations.iter().find(|v| v.id == selected)
    }
}

/// A storyboard project
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub idea: String,
    pub shots: Vec<Shot>,
    pub trashed_shots: Vec<Shot>,
    pub created_at: Timestamp,
    /// The only dirty marker the auto-saver looks at
    pub updated_at: Timestamp,
    pub is_trashed: bool,
}

impl Project {
    /// Create an empty project stamped with `now`
    pub fn new(title: impl Into<String>, idea: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            idea: idea.into(),
            shots: Vec::new(),
            trashed_shots: Vec::new(),
            created_at: now,
            updated_at: now,
            is_trashed: false,
        }
    }

    pub fn shot(&self, shot_id: &str) -> Option<&Shot> {
        self.shots.iter().find(|s| s.id == shot_id)
    }

    pub fn shot_mut(&mut self, shot_id: &str) -> Option<&mut Shot> {
        self.shots.iter_mut().find(|s| s.id == shot_id)
    }

    /// Mark the project as changed
    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = next_timestamp(self.updated_at, now);
    }
}

/// Rewrite `shot_number` so it equals position + 1
pub fn renumber(shots: &mut [Shot]) {
    for (index, shot) in shots.iter_mut().enumerate() {
        shot.shot_number = index as u32 + 1;
    }
}

/// A shot as stored on disk or in a backup file
///
/// Admits the deprecated single-image fields and partial or missing
/// settings. Use `migrate::migrate_shot` to turn it into a `Shot`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShotRecord {
    pub id: ShotId,
    #[serde(default)]
    pub shot_number: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub visual_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_variations: Option<Vec<ImageAsset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_variation_id: Option<VariationId>,
    #[serde(default)]
    pub is_generating_image: bool,
    #[serde(default)]
    pub is_updating_prompt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<PartialShotSettings>,

    // Deprecated single-image shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_preview_file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_original_file_size: Option<u64>,
}

impl ShotRecord {
    /// True if any deprecated image field carries a payload
    pub fn has_legacy_image(&self) -> bool {
        self.image_url.is_some() || self.image_original_url.is_some()
    }
}

impl From<Shot> for ShotRecord {
    fn from(shot: Shot) -> Self {
        Self {
            id: shot.id,
            shot_number: shot.shot_number,
            description: shot.description,
            visual_prompt: shot.visual_prompt,
            image_variations: Some(shot.image_variations),
            selected_variation_id: shot.selected_variation_id,
            is_generating_image: shot.is_generating_image,
            is_updating_prompt: shot.is_updating_prompt,
            settings: Some(shot.settings.into()),
            ..Self::default()
        }
    }
}

/// A project as stored on disk or in a backup file
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    #[serde(default)]
    pub id: Option<ProjectId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub idea: String,
    #[serde(default)]
    pub shots: Option<Vec<ShotRecord>>,
    #[serde(default)]
    pub trashed_shots: Vec<ShotRecord>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub is_trashed: bool,
}

impl From<Project> for ProjectRecord {
    fn from(project: Project) -> Self {
        Self {
            id: Some(project.id),
            title: project.title,
            idea: project.idea,
            shots: Some(project.shots.into_iter().map(ShotRecord::from).collect()),
            trashed_shots: project.trashed_shots.into_iter().map(ShotRecord::from).collect(),
            created_at: Some(project.created_at),
            updated_at: Some(project.updated_at),
            is_trashed: project.is_trashed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        assert_eq!(next_timestamp(100, 500), 500);
        assert_eq!(next_timestamp(500, 500), 501);
        assert_eq!(next_timestamp(900, 500), 901);
    }

    #[test]
    fn test_renumber() {
        let mut shots = vec![Shot::new(7, "a", "a"), Shot::new(3, "b", "b"), Shot::new(3, "c", "c")];
        renumber(&mut shots);
        let numbers: Vec<u32> = shots.iter().map(|s| s.shot_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_selected_variation_ignores_dangling_id() {
        let mut shot = Shot::new(1, "a", "a");
        shot.selected_variation_id = Some("missing".to_string());
        assert!(shot.selected_variation().is_none());
    }

    #[test]
    fn test_shot_serializes_camel_case() {
        let shot = Shot::new(1, "Opening", "A sunrise");
        let json = serde_json::to_string(&shot).unwrap();
        assert!(json.contains("\"shotNumber\":1"));
        assert!(json.contains("\"visualPrompt\":\"A sunrise\""));
        assert!(json.contains("\"imageVariations\":[]"));
        assert!(!json.contains("selectedVariationId"));
    }

    #[test]
    fn test_legacy_record_parses() {
        let record: ShotRecord = serde_json::from_str(
            r#"{"id":"s1","shotNumber":2,"description":"d","visualPrompt":"p","imageUrl":"data:image/png;base64,AAAA"}"#,
        )
        .unwrap();
        assert!(record.has_legacy_image());
        assert!(record.image_variations.is_none());
        assert!(record.settings.is_none());
    }
}
