/// Project and shot state transitions
///
/// Every user or AI event becomes an `Action`, and `reduce` maps the current
/// project sequence to the next one. A transition that changes a project
/// bumps that project's `updated_at`; one that finds nothing to change
/// (unknown id, no-op selection) leaves the project untouched so the
/// auto-saver skips it.
///
/// Invariants kept here:
/// - `shot_number` equals position + 1 in `shots` after every transition
/// - a shot id lives in exactly one of `shots` and `trashed_shots`
/// - `selected_variation_id` always points into `image_variations`

use super::data::{renumber, ImageAsset, Project, ProjectId, Shot, ShotId, Timestamp, VariationId};
use super::settings::ShotSettings;

pub const PLACEHOLDER_DESCRIPTION: &str = "New shot";
pub const PLACEHOLDER_PROMPT: &str = "Describe what the camera sees in this shot.";

/// A blank shot for "add shot after"
pub fn placeholder_shot() -> Shot {
    Shot::new(0, PLACEHOLDER_DESCRIPTION, PLACEHOLDER_PROMPT)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Put a new or imported project at the front of the collection
    AddProject(Project),
    TrashProject { project_id: ProjectId },
    RestoreProject { project_id: ProjectId },
    /// Remove a project for good
    DeleteProject { project_id: ProjectId },
    /// Remove every trashed project for good
    EmptyProjectTrash,

    BeginImageGeneration { project_id: ProjectId, shot_id: ShotId },
    /// Prepend freshly created variations and select the first of them
    AddVariations {
        project_id: ProjectId,
        shot_id: ShotId,
        variations: Vec<ImageAsset>,
    },
    ImageGenerationFailed { project_id: ProjectId, shot_id: ShotId },
    SelectVariation {
        project_id: ProjectId,
        shot_id: ShotId,
        variation_id: VariationId,
    },

    /// Apply a new description right away and mark the prompt as updating
    EditDescription {
        project_id: ProjectId,
        shot_id: ShotId,
        description: String,
    },
    ApplyVisualPrompt {
        project_id: ProjectId,
        shot_id: ShotId,
        visual_prompt: String,
    },
    PromptUpdateFailed { project_id: ProjectId, shot_id: ShotId },
    UpdateSettings {
        project_id: ProjectId,
        shot_id: ShotId,
        settings: ShotSettings,
    },

    AddShotAfter {
        project_id: ProjectId,
        after_shot_id: ShotId,
        shot: Shot,
    },
    TrashShot { project_id: ProjectId, shot_id: ShotId },
    RestoreShot { project_id: ProjectId, shot_id: ShotId },
    /// Remove a trashed shot for good
    DeleteShot { project_id: ProjectId, shot_id: ShotId },
    EmptyShotTrash { project_id: ProjectId },
}

/// Result of a transition
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    pub projects: Vec<Project>,
    /// Projects removed for good; their stored copies must be deleted too
    pub removed: Vec<ProjectId>,
}

pub fn reduce(mut projects: Vec<Project>, action: Action, now: Timestamp) -> Reduced {
    let mut removed = Vec::new();

    match action {
        Action::AddProject(project) => {
            projects.retain(|p| p.id != project.id);
            projects.insert(0, project);
        }
        Action::TrashProject { project_id } => {
            update_project(&mut projects, &project_id, now, |p| !std::mem::replace(&mut p.is_trashed, true));
        }
        Action::RestoreProject { project_id } => {
            update_project(&mut projects, &project_id, now, |p| std::mem::replace(&mut p.is_trashed, false));
        }
        Action::DeleteProject { project_id } => {
            projects.retain(|p| {
                let keep = p.id != project_id;
                if !keep {
                    removed.push(p.id.clone());
                }
                keep
            });
        }
        Action::EmptyProjectTrash => {
            projects.retain(|p| {
                if p.is_trashed {
                    removed.push(p.id.clone());
                }
                !p.is_trashed
            });
        }

        Action::BeginImageGeneration { project_id, shot_id } => {
            update_shot(&mut projects, &project_id, &shot_id, now, |s| {
                s.is_generating_image = true;
            });
        }
        Action::AddVariations { project_id, shot_id, variations } => {
            update_any_shot(&mut projects, &project_id, &shot_id, now, |s| {
                s.is_generating_image = false;
                if let Some(first) = variations.first() {
                    s.selected_variation_id = Some(first.id.clone());
                    let older = std::mem::replace(&mut s.image_variations, variations);
                    s.image_variations.extend(older);
                }
            });
        }
        Action::ImageGenerationFailed { project_id, shot_id } => {
            update_any_shot(&mut projects, &project_id, &shot_id, now, |s| {
                s.is_generating_image = false;
            });
        }
        Action::SelectVariation { project_id, shot_id, variation_id } => {
            update_project(&mut projects, &project_id, now, |p| match p.shot_mut(&shot_id) {
                Some(s)
                    if s.selected_variation_id.as_deref() != Some(variation_id.as_str())
                        && s.image_variations.iter().any(|v| v.id == variation_id) =>
                {
                    s.selected_variation_id = Some(variation_id);
                    true
                }
                _ => false,
            });
        }

        Action::EditDescription { project_id, shot_id, description } => {
            update_shot(&mut projects, &project_id, &shot_id, now, |s| {
                s.description = description;
                s.is_updating_prompt = true;
            });
        }
        Action::ApplyVisualPrompt { project_id, shot_id, visual_prompt } => {
            update_any_shot(&mut projects, &project_id, &shot_id, now, |s| {
                s.visual_prompt = visual_prompt;
                s.is_updating_prompt = false;
            });
        }
        Action::PromptUpdateFailed { project_id, shot_id } => {
            update_any_shot(&mut projects, &project_id, &shot_id, now, |s| {
                s.is_updating_prompt = false;
            });
        }
        Action::UpdateSettings { project_id, shot_id, settings } => {
            update_shot(&mut projects, &project_id, &shot_id, now, |s| {
                s.settings = settings;
            });
        }

        Action::AddShotAfter { project_id, after_shot_id, shot } => {
            update_project(&mut projects, &project_id, now, |p| {
                match p.shots.iter().position(|s| s.id == after_shot_id) {
                    Some(index) => {
                        p.shots.insert(index + 1, shot);
                        renumber(&mut p.shots);
                        true
                    }
                    None => false,
                }
            });
        }
        Action::TrashShot { project_id, shot_id } => {
            update_project(&mut projects, &project_id, now, |p| {
                match p.shots.iter().position(|s| s.id == shot_id) {
                    Some(index) => {
                        // keeps its old shot_number so restore can find its slot
                        let shot = p.shots.remove(index);
                        p.trashed_shots.push(shot);
                        renumber(&mut p.shots);
                        true
                    }
                    None => false,
                }
            });
        }
        Action::RestoreShot { project_id, shot_id } => {
            update_project(&mut projects, &project_id, now, |p| {
                match p.trashed_shots.iter().position(|s| s.id == shot_id) {
                    Some(index) => {
                        let shot = p.trashed_shots.remove(index);
                        // Ahead of the list so that on equal numbers the restored
                        // shot retakes its old slot; the sort is stable.
                        p.shots.insert(0, shot);
                        p.shots.sort_by_key(|s| s.shot_number);
                        renumber(&mut p.shots);
                        true
                    }
                    None => false,
                }
            });
        }
        Action::DeleteShot { project_id, shot_id } => {
            update_project(&mut projects, &project_id, now, |p| {
                let before = p.trashed_shots.len();
                p.trashed_shots.retain(|s| s.id != shot_id);
                p.trashed_shots.len() != before
            });
        }
        Action::EmptyShotTrash { project_id } => {
            update_project(&mut projects, &project_id, now, |p| {
                let had_any = !p.trashed_shots.is_empty();
                p.trashed_shots.clear();
                had_any
            });
        }
    }

    Reduced { projects, removed }
}

/// Apply `f` to one project; bump it if `f` reports a change
fn update_project(
    projects: &mut [Project],
    project_id: &str,
    now: Timestamp,
    f: impl FnOnce(&mut Project) -> bool,
) {
    if let Some(project) = projects.iter_mut().find(|p| p.id == project_id) {
        if f(project) {
            project.touch(now);
        }
    }
}

/// Apply `f` to an active shot
fn update_shot(
    projects: &mut [Project],
    project_id: &str,
    shot_id: &str,
    now: Timestamp,
    f: impl FnOnce(&mut Shot),
) {
    update_project(projects, project_id, now, |p| match p.shot_mut(shot_id) {
        Some(shot) => {
            f(shot);
            true
        }
        None => false,
    });
}

/// Apply `f` to a shot in either list
///
/// Completions of in-flight AI calls land here: the shot may have been
/// trashed meanwhile and must not keep a stale busy flag.
fn update_any_shot(
    projects: &mut [Project],
    project_id: &str,
    shot_id: &str,
    now: Timestamp,
    f: impl FnOnce(&mut Shot),
) {
    update_project(projects, project_id, now, |p| {
        match p
            .shots
            .iter_mut()
            .chain(p.trashed_shots.iter_mut())
            .find(|s| s.id == shot_id)
        {
            Some(shot) => {
                f(shot);
                true
            }
            None => false,
        }
    });
}
