/// Project backup files
///
/// - JSON export: the full project record, pretty-printed
/// - JSON import: the same shape, from this or any older version
/// - HTML export: a standalone read-only storyboard page

use thiserror::Error;
use tracing::info;

use super::data::{Project, ProjectRecord, Timestamp};
use super::migrate::{migrate_project, settle_transient_flags, MigrationError};
use crate::media::AssetCodec;

/// Appended to the title of every imported project
pub const IMPORTED_MARKER: &str = "(Imported)";

const FILE_SUFFIX: &str = "_storyboard";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("not a project backup: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid project backup: {0}")]
    Invalid(#[from] MigrationError),
}

/// An exported file, ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub file_name: String,
    pub contents: String,
}

/// Lowercase the title and collapse every run of other characters into `_`
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_separator = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}

/// Serialize a project as a JSON backup
pub fn export_project(project: &Project) -> Result<ExportedFile, serde_json::Error> {
    Ok(ExportedFile {
        file_name: format!("{}{FILE_SUFFIX}.json", sanitize_title(&project.title)),
        contents: serde_json::to_string_pretty(project)?,
    })
}

/// Parse a JSON backup into a new project
///
/// The backup must carry both an id and a shots list. Every shot goes through
/// the migrator, the project gets a fresh id so it never collides with the
/// one it was exported from, and its title is marked as imported.
pub fn import_project(text: &str, codec: &AssetCodec, now: Timestamp) -> Result<Project, ImportError> {
    let record: ProjectRecord = serde_json::from_str(text)?;
    let mut project = migrate_project(record, codec)?;

    settle_transient_flags(&mut project);
    project.id = super::data::new_id();
    project.title = format!("{} {IMPORTED_MARKER}", project.title.trim_end());
    project.is_trashed = false;
    project.touch(now);

    info!(
        project_id = %project.id,
        shots = project.shots.len(),
        trashed_shots = project.trashed_shots.len(),
        "imported project"
    );
    Ok(project)
}

/// Render a standalone HTML page of the active shots
pub fn export_html(project: &Project) -> ExportedFile {
    let title = escape_html(&project.title);
    let mut body = String::new();

    for shot in &project.shots {
        body.push_str("<figure class=\"shot\">\n");
        if let Some(variation) = shot.selected_variation() {
            body.push_str(&format!(
                "  <img src=\"{}\" alt=\"Shot {}\">\n",
                escape_html(&variation.preview_url),
                shot.shot_number
            ));
        }
        body.push_str(&format!(
            "  <figcaption>\n    <h2>Shot {}</h2>\n    <p>{}</p>\n    <p class=\"prompt\">{}</p>\n  </figcaption>\n",
            shot.shot_number,
            escape_html(&shot.description),
            escape_html(&shot.visual_prompt)
        ));
        body.push_str("</figure>\n");
    }

    let contents = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
<style>body{{font-family:sans-serif;max-width:960px;margin:2rem auto}}\
.shot{{margin:0 0 2rem}}.shot img{{max-width:100%}}.prompt{{color:#666;font-style:italic}}</style>\n\
</head>\n<body>\n<h1>{title}</h1>\n<p>{idea}</p>\n{body}</body>\n</html>\n",
        idea = escape_html(&project.idea),
    );

    ExportedFile {
        file_name: format!("{}{FILE_SUFFIX}.html", sanitize_title(&project.title)),
        contents,
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::Shot;
    use crate::state::settings::{CameraMovement, Lighting, ShotType};

    fn sample() -> Project {
        let codec = AssetCodec::default();
        let mut project = Project::new("Night Heist: Part 2!", "A <bold> plan", 100);
        let mut shot = Shot::new(1, "Vault & door", "Steel \"door\"");
        let variation = codec.create_asset("TWFu".to_string());
        shot.selected_variation_id = Some(variation.id.clone());
        shot.image_variations.push(variation);
        project.shots.push(shot);
        project.shots.push(Shot::new(2, "Escape", "Car chase"));
        project
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Night Heist: Part 2!"), "night_heist_part_2");
        assert_eq!(sanitize_title("  "), "untitled");
        assert_eq!(sanitize_title("Été"), "été");
    }

    #[test]
    fn test_export_then_import_gets_fresh_identity() {
        let project = sample();
        let file = export_project(&project).unwrap();
        assert_eq!(file.file_name, "night_heist_part_2_storyboard.json");

        let imported = import_project(&file.contents, &AssetCodec::default(), 500).unwrap();
        assert_ne!(imported.id, project.id);
        assert_eq!(imported.title, "Night Heist: Part 2! (Imported)");
        assert_eq!(imported.shots, project.shots);
        assert_eq!(imported.updated_at, 500);
    }

    #[test]
    fn test_missing_shots_is_rejected() {
        let err = import_project(r#"{"id":"p1","title":"No shots"}"#, &AssetCodec::default(), 1).unwrap_err();
        assert!(matches!(err, ImportError::Invalid(MigrationError::MissingShots)));
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let err = import_project(r#"{"title":"No id","shots":[]}"#, &AssetCodec::default(), 1).unwrap_err();
        assert!(matches!(err, ImportError::Invalid(MigrationError::MissingId)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            import_project("[1, 2, 3]", &AssetCodec::default(), 1),
            Err(ImportError::Parse(_))
        ));
    }

    #[test]
    fn test_legacy_backup_gets_one_variation_per_imaged_shot() {
        let text = r#"{
            "id": "old", "title": "Legacy", "idea": "x", "createdAt": 5,
            "shots": [
                {"id":"a","shotNumber":1,"description":"A","visualPrompt":"a","imageUrl":"TWE=","imageOriginalUrl":"TWFu"},
                {"id":"b","shotNumber":2,"description":"B","visualPrompt":"b"},
                {"id":"c","shotNumber":3,"description":"C","visualPrompt":"c","imageUrl":"TQ==",
                 "settings":{"cameraMovement":"Crane","aspectRatio":"1:1","artStyle":"Anime","lighting":"Neon"}}
            ]
        }"#;

        let project = import_project(text, &AssetCodec::default(), 10).unwrap();

        let counts: Vec<usize> = project.shots.iter().map(|s| s.image_variations.len()).collect();
        assert_eq!(counts, vec![1, 0, 1]);
        for shot in &project.shots {
            assert_eq!(shot.selected_variation_id.is_some(), !shot.image_variations.is_empty());
        }
        assert_eq!(project.title, "Legacy (Imported)");
    }

    #[test]
    fn test_unknown_setting_value_does_not_reject_backup() {
        let text = r#"{
            "id": "p", "title": "Orbiting", "createdAt": 5,
            "shots": [
                {"id":"a","shotNumber":1,"description":"A","visualPrompt":"a",
                 "settings":{"cameraMovement":"Orbit","shotType":"Close-Up","aspectRatio":"1:1","artStyle":"Anime","lighting":"Neon"}}
            ]
        }"#;

        let project = import_project(text, &AssetCodec::default(), 10).unwrap();

        let settings = project.shots[0].settings;
        assert_eq!(settings.camera_movement, CameraMovement::Static);
        assert_eq!(settings.shot_type, ShotType::CloseUp);
        assert_eq!(settings.lighting, Lighting::Neon);
    }

    #[test]
    fn test_html_export_escapes_and_embeds_previews() {
        let project = sample();
        let file = export_html(&project);

        assert_eq!(file.file_name, "night_heist_part_2_storyboard.html");
        assert!(file.contents.starts_with("<!DOCTYPE html>"));
        assert!(file.contents.contains("<h1>Night Heist: Part 2!</h1>"));
        assert!(file.contents.contains("A &lt;bold&gt; plan"));
        assert!(file.contents.contains("Vault &amp; door"));
        assert!(file.contents.contains("Steel &quot;door&quot;"));
        assert_eq!(file.contents.matches("<img ").count(), 1);
        assert_eq!(file.contents.matches("<figure").count(), 2);
    }
}
