/// Upgrades stored records into live projects and shots
///
/// Shots were once stored with a single image (`imageUrl`,
/// `imageOriginalUrl` and their sizes). They now carry a list of image
/// variations. Migration runs when the catalog is loaded, when a backup
/// is imported and when the legacy key-value blob is moved into the
/// catalog. Running it on an already migrated shot changes nothing.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, warn};

use super::data::{now_millis, Project, ProjectRecord, Shot, ShotRecord};
use crate::media::AssetCodec;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("project record has no id")]
    MissingId,
    #[error("project record has no shots")]
    MissingShots,
}

/// Turn a stored shot into a live shot
pub fn migrate_shot(record: ShotRecord, codec: &AssetCodec) -> Shot {
    // settings missing entirely, or missing individual fields such as shotType
    let settings = record.settings.map(|s| s.complete()).unwrap_or_default();
    let has_legacy_image = record.has_legacy_image();

    let (image_variations, selected_variation_id) = match record.image_variations {
        Some(variations) if !variations.is_empty() => {
            let selected = record
                .selected_variation_id
                .filter(|id| variations.iter().any(|v| &v.id == id));
            (variations, selected)
        }
        _ if has_legacy_image => {
            let original = record.image_original_url.or_else(|| record.image_url.clone());
            match original {
                Some(original) => {
                    let asset = match record.image_url {
                        // Deprecated sizes are reused without re-checking them against the payloads
                        Some(preview) => codec.asset_from_parts(
                            original,
                            preview,
                            record.image_original_file_size,
                            record.image_preview_file_size,
                        ),
                        None => {
                            let (preview, preview_size) = codec.preview(&original);
                            codec.asset_from_parts(
                                original,
                                preview,
                                record.image_original_file_size,
                                Some(preview_size),
                            )
                        }
                    };
                    debug!(shot_id = %record.id, variation_id = %asset.id, "migrated single-image shot");
                    let selected = Some(asset.id.clone());
                    (vec![asset], selected)
                }
                None => (Vec::new(), None),
            }
        }
        _ => (Vec::new(), None),
    };

    Shot {
        id: record.id,
        shot_number: record.shot_number,
        description: record.description,
        visual_prompt: record.visual_prompt,
        image_variations,
        selected_variation_id,
        is_generating_image: record.is_generating_image,
        is_updating_prompt: record.is_updating_prompt,
        settings,
    }
}

/// Turn a stored project into a live project, migrating every shot
///
/// A shot id found in both lists stays active and its trashed copy is
/// dropped.
pub fn migrate_project(record: ProjectRecord, codec: &AssetCodec) -> Result<Project, MigrationError> {
    let id = record.id.ok_or(MigrationError::MissingId)?;
    let shots = record.shots.ok_or(MigrationError::MissingShots)?;

    let shots: Vec<Shot> = shots.into_iter().map(|s| migrate_shot(s, codec)).collect();
    let active: HashSet<&str> = shots.iter().map(|s| s.id.as_str()).collect();

    let mut trashed_shots = Vec::with_capacity(record.trashed_shots.len());
    for shot in record.trashed_shots {
        if active.contains(shot.id.as_str()) {
            warn!(project_id = %id, shot_id = %shot.id, "shot is both active and trashed, keeping active copy");
            continue;
        }
        trashed_shots.push(migrate_shot(shot, codec));
    }

    let created_at = record.created_at.unwrap_or_else(now_millis);
    Ok(Project {
        id,
        title: record.title,
        idea: record.idea,
        shots,
        trashed_shots,
        created_at,
        updated_at: record.updated_at.unwrap_or(created_at),
        is_trashed: record.is_trashed,
    })
}

/// Clear in-flight flags left over from a previous run
///
/// No AI call survives a restart, so a shot loaded as "generating" would
/// otherwise stay stuck. Does not bump `updated_at`.
pub fn settle_transient_flags(project: &mut Project) {
    for shot in project.shots.iter_mut().chain(project.trashed_shots.iter_mut()) {
        shot.is_generating_image = false;
        shot.is_updating_prompt = false;
    }
}
