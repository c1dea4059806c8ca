/// Application orchestrator
///
/// `Studio` is a cloneable handle over the shared project sequence, the
/// throttle controller and the last surfaced error. Every change goes
/// through the reducer and is then published to the auto-saver. AI calls
/// are admitted one at a time by the throttle controller, which a 1 Hz
/// ticker task counts down.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::ai::{AiError, StoryboardAi, ThrottleController, ThrottleStatus};
use crate::config::{ApiKeyConfig, AppConfig};
use crate::error::{StudioError, StudioResult};
use crate::media::AssetCodec;
use crate::state::autosave::{AutoSaver, SaveReport, Snapshot};
use crate::state::data::{now_millis, renumber, Project, ProjectId, Shot, ShotId, VariationId};
use crate::state::interchange::{self, ExportedFile};
use crate::state::library::bootstrap;
use crate::state::reducer::{placeholder_shot, reduce, Action, Reduced};
use crate::state::settings::ShotSettings;
use crate::state::store::{KeyValueStore, ProjectStore, API_KEY_KEY};

/// Longest title derived from an idea, before the ellipsis
pub const TITLE_MAX_CHARS: usize = 50;

const UNTITLED: &str = "Untitled Project";

/// Where the reference image for a generation comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// An uploaded image; wins over `reference_shot_id`
    pub custom_reference: Option<String>,
    /// Use the selected image of another shot in the same project
    pub reference_shot_id: Option<ShotId>,
}

/// Derive a project title from the first non-empty line of an idea
pub fn title_from_idea(idea: &str) -> String {
    let line = idea.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.is_empty() {
        return UNTITLED.to_string();
    }
    if line.chars().count() <= TITLE_MAX_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Selected image of an active shot placed before `shot_id`
///
/// Anything else (trashed, later in the sequence, nothing selected) means
/// the generation runs without a reference.
fn earlier_reference(project: &Project, shot_id: &str, reference_id: &str) -> Option<String> {
    let target = project.shots.iter().position(|s| s.id == shot_id)?;
    let Some(position) = project.shots.iter().position(|s| s.id == reference_id) else {
        debug!(reference_id, "reference shot is not active, generating without it");
        return None;
    };
    if position >= target {
        debug!(reference_id, "reference shot does not come earlier, generating without it");
        return None;
    }
    match project.shots[position].selected_variation() {
        Some(selected) => Some(selected.original_url.clone()),
        None => {
            debug!(reference_id, "reference shot has no selected image");
            None
        }
    }
}

struct StudioState {
    projects: Arc<Vec<Project>>,
    throttle: ThrottleController,
    last_error: Option<String>,
}

struct Inner {
    state: Mutex<StudioState>,
    ai: Arc<dyn StoryboardAi>,
    store: Arc<dyn ProjectStore>,
    keys: Arc<dyn KeyValueStore>,
    codec: AssetCodec,
    saver: AutoSaver,
}

#[derive(Clone)]
pub struct Studio {
    inner: Arc<Inner>,
}

/// An admitted AI call
///
/// Settled explicitly with the call's outcome; dropped unsettled (the
/// caller's future was cancelled) it just releases the busy flag.
struct Admission<'a> {
    state: &'a Mutex<StudioState>,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, outcome: Result<(), &AiError>) {
        self.settled = true;
        let mut state = self.state.lock();
        if let Some(message) = state.throttle.finish(outcome) {
            state.last_error = Some(message);
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.lock().throttle.abandon();
        }
    }
}

impl Studio {
    /// Load the catalog and start the background tasks
    pub async fn open<S>(config: &AppConfig, ai: Arc<dyn StoryboardAi>, store: Arc<S>) -> StudioResult<Self>
    where
        S: ProjectStore + KeyValueStore + 'static,
    {
        let codec = AssetCodec::new(&config.preview);
        let projects = bootstrap(store.as_ref(), &codec).await?;

        let stored_key = match store.get_value(API_KEY_KEY).await {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "could not read stored API key");
                None
            }
        };
        let key = ApiKeyConfig::init(stored_key);
        ai.configure(key.key());
        info!(projects = projects.len(), key_status = ?key.status(), "studio ready");

        let saver = AutoSaver::spawn_with_snapshot(
            store.clone(),
            config.autosave_debounce(),
            Some(Snapshot::of(&projects)),
        );

        let inner = Arc::new(Inner {
            state: Mutex::new(StudioState {
                projects: Arc::new(projects),
                throttle: ThrottleController::new(config, key),
                last_error: None,
            }),
            ai,
            store: store.clone(),
            keys: store,
            codec,
            saver,
        });
        spawn_ticker(Arc::downgrade(&inner));

        Ok(Self { inner })
    }

    pub fn projects(&self) -> Arc<Vec<Project>> {
        self.inner.state.lock().projects.clone()
    }

    pub fn project(&self, project_id: &str) -> Option<Project> {
        self.inner
            .state
            .lock()
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .cloned()
    }

    pub fn status(&self) -> ThrottleStatus {
        self.inner.state.lock().throttle.status()
    }

    /// The last error surfaced from the AI service
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn dismiss_error(&self) {
        self.inner.state.lock().last_error = None;
    }

    /// Install a new API key and persist it
    pub async fn set_api_key(&self, key: &str) -> StudioResult<()> {
        {
            let mut state = self.inner.state.lock();
            state.throttle.reset_key(key);
            self.inner.ai.configure(state.throttle.api_key());
        }
        self.inner.keys.set_value(API_KEY_KEY, key).await?;
        info!("API key updated");
        Ok(())
    }

    pub async fn clear_api_key(&self) -> StudioResult<()> {
        self.inner.state.lock().throttle.clear_key();
        self.inner.ai.configure(None);
        self.inner.keys.remove_value(API_KEY_KEY).await?;
        info!("API key removed");
        Ok(())
    }

    /// Save pending changes now
    pub async fn flush(&self) -> SaveReport {
        self.inner.saver.flush().await
    }

    /// Save pending changes and stop the auto-saver
    ///
    /// If other handles are still alive the auto-saver keeps running and
    /// only a flush happens.
    pub async fn close(self) {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner.saver.shutdown().await,
            Err(inner) => {
                inner.saver.flush().await;
            }
        }
    }

    fn dispatch(&self, action: Action) -> Vec<ProjectId> {
        let mut state = self.inner.state.lock();
        let Reduced { projects, removed } = reduce(Vec::clone(&state.projects), action, now_millis());
        state.projects = Arc::new(projects);
        // published under the lock so the auto-saver sees sequences in order
        self.inner.saver.publish(state.projects.clone());
        removed
    }

    async fn purge(&self, removed: Vec<ProjectId>) {
        // a cycle already writing one of these would bring it back
        self.inner.saver.flush().await;
        let store = self.inner.store.as_ref();
        join_all(removed.iter().map(|id| async move {
            match store.delete_project(id).await {
                Ok(()) => debug!(project_id = %id, "deleted stored project"),
                Err(e) => warn!(project_id = %id, error = %e, "failed to delete stored project"),
            }
        }))
        .await;
    }

    fn inspect<T>(&self, project_id: &str, f: impl FnOnce(&Project) -> StudioResult<T>) -> StudioResult<T> {
        let state = self.inner.state.lock();
        let project = state
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .ok_or_else(|| StudioError::ProjectNotFound(project_id.to_string()))?;
        f(project)
    }

    fn active_shot<T>(&self, project_id: &str, shot_id: &str, f: impl FnOnce(&Project, &Shot) -> StudioResult<T>) -> StudioResult<T> {
        self.inspect(project_id, |project| {
            let shot = project
                .shot(shot_id)
                .ok_or_else(|| StudioError::ShotNotFound(shot_id.to_string()))?;
            f(project, shot)
        })
    }

    fn require_trashed_shot(&self, project_id: &str, shot_id: &str) -> StudioResult<()> {
        self.inspect(project_id, |project| {
            if project.trashed_shots.iter().any(|s| s.id == shot_id) {
                Ok(())
            } else {
                Err(StudioError::ShotNotFound(shot_id.to_string()))
            }
        })
    }

    fn admit(&self) -> StudioResult<Admission<'_>> {
        let mut state = self.inner.state.lock();
        if let Err(rejection) = state.throttle.begin() {
            debug!(%rejection, "AI call not admitted");
            return Err(rejection.into());
        }
        Ok(Admission {
            state: &self.inner.state,
            settled: false,
        })
    }

    /// Turn an idea into a new project via the AI breakdown
    pub async fn create_project(&self, idea: &str) -> StudioResult<ProjectId> {
        let admission = self.admit()?;

        let outlines = match self.inner.ai.breakdown(idea).await {
            Ok(outlines) if !outlines.is_empty() => outlines,
            Ok(_) => {
                let error = AiError::new("the breakdown returned no shots");
                admission.settle(Err(&error));
                return Err(error.into());
            }
            Err(e) => {
                admission.settle(Err(&e));
                return Err(e.into());
            }
        };
        admission.settle(Ok(()));

        let mut project = Project::new(title_from_idea(idea), idea, now_millis());
        let mut outlines = outlines;
        outlines.sort_by_key(|o| o.shot_number);
        project.shots = outlines
            .into_iter()
            .map(|o| Shot::new(o.shot_number, o.description, o.visual_prompt))
            .collect();
        renumber(&mut project.shots);

        let project_id = project.id.clone();
        info!(project_id = %project_id, shots = project.shots.len(), "created project");
        self.dispatch(Action::AddProject(project));
        Ok(project_id)
    }

    /// Generate two candidate images for a shot
    ///
    /// Both attempts run concurrently; whichever succeed become new
    /// variations. Returns how many were added.
    pub async fn generate_image(&self, project_id: &str, shot_id: &str, options: GenerateOptions) -> StudioResult<usize> {
        let (visual_prompt, settings, reference) = self.active_shot(project_id, shot_id, |project, shot| {
            let reference = match (options.custom_reference, options.reference_shot_id) {
                (Some(custom), _) => Some(custom),
                (None, Some(reference_id)) => earlier_reference(project, shot_id, &reference_id),
                (None, None) => None,
            };
            Ok((shot.visual_prompt.clone(), shot.settings, reference))
        })?;

        let admission = self.admit()?;
        self.dispatch(Action::BeginImageGeneration {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
        });

        let ai = self.inner.ai.as_ref();
        let (first, second) = futures::join!(
            ai.generate_image(&visual_prompt, &settings, reference.as_deref()),
            ai.generate_image(&visual_prompt, &settings, reference.as_deref()),
        );

        let mut payloads = Vec::with_capacity(2);
        let mut failure = None;
        for result in [first, second] {
            match result {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    warn!(shot_id, error = %e, "image attempt failed");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        if payloads.is_empty() {
            let error = failure.unwrap_or_else(|| AiError::new("no image was returned"));
            admission.settle(Err(&error));
            self.dispatch(Action::ImageGenerationFailed {
                project_id: project_id.to_string(),
                shot_id: shot_id.to_string(),
            });
            return Err(StudioError::GenerationFailed(error.message));
        }

        let codec = &self.inner.codec;
        let variations = join_all(payloads.into_iter().map(|payload| codec.encode(payload))).await;
        let added = variations.len();
        self.dispatch(Action::AddVariations {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
            variations,
        });
        admission.settle(Ok(()));

        info!(project_id, shot_id, added, "generated images");
        Ok(added)
    }

    /// Edit the selected image of a shot with a text instruction
    pub async fn edit_image(&self, project_id: &str, shot_id: &str, instruction: &str) -> StudioResult<()> {
        let original = self.active_shot(project_id, shot_id, |_, shot| {
            shot.selected_variation()
                .map(|v| v.original_url.clone())
                .ok_or_else(|| StudioError::NoSelectedVariation(shot_id.to_string()))
        })?;

        let admission = self.admit()?;
        self.dispatch(Action::BeginImageGeneration {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
        });

        match self.inner.ai.edit_image(&original, instruction).await {
            Ok(payload) => {
                let asset = self.inner.codec.encode(payload).await;
                self.dispatch(Action::AddVariations {
                    project_id: project_id.to_string(),
                    shot_id: shot_id.to_string(),
                    variations: vec![asset],
                });
                admission.settle(Ok(()));
                info!(project_id, shot_id, "edited image");
                Ok(())
            }
            Err(e) => {
                admission.settle(Err(&e));
                self.dispatch(Action::ImageGenerationFailed {
                    project_id: project_id.to_string(),
                    shot_id: shot_id.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Apply a new description and regenerate the shot's visual prompt
    ///
    /// The description sticks even if the prompt update fails.
    pub async fn update_description(&self, project_id: &str, shot_id: &str, description: &str) -> StudioResult<()> {
        self.active_shot(project_id, shot_id, |_, _| Ok(()))?;

        let admission = self.admit()?;
        self.dispatch(Action::EditDescription {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
            description: description.to_string(),
        });

        match self.inner.ai.regenerate_prompt(description).await {
            Ok(visual_prompt) => {
                self.dispatch(Action::ApplyVisualPrompt {
                    project_id: project_id.to_string(),
                    shot_id: shot_id.to_string(),
                    visual_prompt,
                });
                admission.settle(Ok(()));
                Ok(())
            }
            Err(e) => {
                admission.settle(Err(&e));
                self.dispatch(Action::PromptUpdateFailed {
                    project_id: project_id.to_string(),
                    shot_id: shot_id.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Alternative descriptions for a shot; state is left as is
    pub async fn suggestions(&self, project_id: &str, shot_id: &str) -> StudioResult<Vec<String>> {
        let (idea, description) = self.active_shot(project_id, shot_id, |project, shot| {
            Ok((project.idea.clone(), shot.description.clone()))
        })?;

        let admission = self.admit()?;
        match self.inner.ai.suggestions(&idea, &description).await {
            Ok(suggestions) => {
                admission.settle(Ok(()));
                Ok(suggestions)
            }
            Err(e) => {
                admission.settle(Err(&e));
                Err(e.into())
            }
        }
    }

    pub fn select_variation(&self, project_id: &str, shot_id: &str, variation_id: &str) -> StudioResult<()> {
        self.active_shot(project_id, shot_id, |_, shot| {
            if shot.image_variations.iter().any(|v| v.id == variation_id) {
                Ok(())
            } else {
                Err(StudioError::NoSelectedVariation(shot_id.to_string()))
            }
        })?;
        self.dispatch(Action::SelectVariation {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
            variation_id: VariationId::from(variation_id),
        });
        Ok(())
    }

    pub fn update_settings(&self, project_id: &str, shot_id: &str, settings: ShotSettings) -> StudioResult<()> {
        self.active_shot(project_id, shot_id, |_, _| Ok(()))?;
        self.dispatch(Action::UpdateSettings {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
            settings,
        });
        Ok(())
    }

    /// Insert a placeholder shot right after `after_shot_id`
    pub fn add_shot_after(&self, project_id: &str, after_shot_id: &str) -> StudioResult<ShotId> {
        self.active_shot(project_id, after_shot_id, |_, _| Ok(()))?;
        let shot = placeholder_shot();
        let shot_id = shot.id.clone();
        self.dispatch(Action::AddShotAfter {
            project_id: project_id.to_string(),
            after_shot_id: after_shot_id.to_string(),
            shot,
        });
        Ok(shot_id)
    }

    pub fn trash_shot(&self, project_id: &str, shot_id: &str) -> StudioResult<()> {
        self.active_shot(project_id, shot_id, |_, _| Ok(()))?;
        self.dispatch(Action::TrashShot {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
        });
        Ok(())
    }

    pub fn restore_shot(&self, project_id: &str, shot_id: &str) -> StudioResult<()> {
        self.require_trashed_shot(project_id, shot_id)?;
        self.dispatch(Action::RestoreShot {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
        });
        Ok(())
    }

    pub fn delete_shot(&self, project_id: &str, shot_id: &str) -> StudioResult<()> {
        self.require_trashed_shot(project_id, shot_id)?;
        self.dispatch(Action::DeleteShot {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
        });
        Ok(())
    }

    pub fn empty_shot_trash(&self, project_id: &str) -> StudioResult<()> {
        self.inspect(project_id, |_| Ok(()))?;
        self.dispatch(Action::EmptyShotTrash {
            project_id: project_id.to_string(),
        });
        Ok(())
    }

    pub fn trash_project(&self, project_id: &str) -> StudioResult<()> {
        self.inspect(project_id, |_| Ok(()))?;
        self.dispatch(Action::TrashProject {
            project_id: project_id.to_string(),
        });
        Ok(())
    }

    pub fn restore_project(&self, project_id: &str) -> StudioResult<()> {
        self.inspect(project_id, |_| Ok(()))?;
        self.dispatch(Action::RestoreProject {
            project_id: project_id.to_string(),
        });
        Ok(())
    }

    /// Remove a project from the catalog and from storage
    ///
    /// A failed storage delete is logged; the catalog change stands.
    pub async fn delete_project(&self, project_id: &str) -> StudioResult<()> {
        self.inspect(project_id, |_| Ok(()))?;
        let removed = self.dispatch(Action::DeleteProject {
            project_id: project_id.to_string(),
        });
        self.purge(removed).await;
        Ok(())
    }

    /// Remove every trashed project; returns how many went
    pub async fn empty_project_trash(&self) -> usize {
        let removed = self.dispatch(Action::EmptyProjectTrash);
        let count = removed.len();
        self.purge(removed).await;
        if count > 0 {
            info!(count, "emptied project trash");
        }
        count
    }

    /// Add a project from a JSON backup
    pub fn import_project(&self, text: &str) -> StudioResult<ProjectId> {
        let project = interchange::import_project(text, &self.inner.codec, now_millis())?;
        let project_id = project.id.clone();
        self.dispatch(Action::AddProject(project));
        Ok(project_id)
    }

    pub fn export_project(&self, project_id: &str) -> StudioResult<ExportedFile> {
        self.inspect(project_id, |project| Ok(interchange::export_project(project)?))
    }

    pub fn export_html(&self, project_id: &str) -> StudioResult<ExportedFile> {
        self.inspect(project_id, |project| Ok(interchange::export_html(project)))
    }
}

impl std::fmt::Debug for Studio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Studio")
            .field("projects", &state.projects.len())
            .field("throttle", &state.throttle.status())
            .finish()
    }
}

fn spawn_ticker(inner: Weak<Inner>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.state.lock().throttle.tick();
        }
    });
}
