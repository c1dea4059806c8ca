/// Debounced, change-tracking persistence
///
/// The auto-saver receives every new project sequence. Once the sequence
/// has been quiet for the debounce delay, it writes only the projects whose
/// `updated_at` differs from the previous snapshot (or that are new), one
/// upsert per project. Unchanged projects, and their image payloads, are
/// never re-serialized.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::data::{Project, ProjectId, Timestamp};
use super::store::ProjectStore;

/// `updated_at` of every project at the time of the last save cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    stamps: HashMap<ProjectId, Timestamp>,
}

impl Snapshot {
    pub fn of(projects: &[Project]) -> Self {
        Self {
            stamps: projects
                .iter()
                .map(|p| (p.id.clone(), p.updated_at))
                .collect(),
        }
    }

    fn is_dirty(&self, project: &Project) -> bool {
        self.stamps.get(&project.id) != Some(&project.updated_at)
    }
}

/// Projects that need writing, in sequence order
///
/// Without a previous snapshot everything is dirty.
pub fn dirty_projects<'a>(previous: Option<&Snapshot>, current: &'a [Project]) -> Vec<&'a Project> {
    match previous {
        None => current.iter().collect(),
        Some(snapshot) => current.iter().filter(|p| snapshot.is_dirty(p)).collect(),
    }
}

/// Outcome of one save cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
}

/// Write every dirty project, each independently
///
/// A failed write is logged and dropped; it is not retried until the
/// project changes again.
pub async fn save_dirty(
    store: &dyn ProjectStore,
    previous: Option<&Snapshot>,
    current: &[Project],
) -> SaveReport {
    let dirty = dirty_projects(previous, current);
    if dirty.is_empty() {
        return SaveReport::default();
    }

    let results = join_all(dirty.into_iter().map(|project| async move {
        let result = store.save_project(project).await;
        if let Err(e) = &result {
            warn!(project_id = %project.id, error = %e, "auto-save failed");
        }
        result.is_ok()
    }))
    .await;

    let saved = results.iter().filter(|ok| **ok).count();
    let report = SaveReport {
        saved,
        failed: results.len() - saved,
    };
    debug!(saved = report.saved, failed = report.failed, "auto-save cycle");
    report
}

enum Command {
    Changed(Arc<Vec<Project>>),
    Flush(oneshot::Sender<SaveReport>),
}

/// Handle to the background auto-save task
///
/// Dropping the handle saves any pending change and stops the task.
pub struct AutoSaver {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl AutoSaver {
    /// Start with no snapshot: the first cycle writes every project
    pub fn spawn(store: Arc<dyn ProjectStore>, delay: Duration) -> Self {
        Self::spawn_with_snapshot(store, delay, None)
    }

    /// Start from a known snapshot, e.g. the projects just loaded from the store
    pub fn spawn_with_snapshot(
        store: Arc<dyn ProjectStore>,
        delay: Duration,
        snapshot: Option<Snapshot>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, store, delay, snapshot));
        Self { tx, task }
    }

    /// Report a new project sequence; restarts the debounce timer
    pub fn publish(&self, projects: Arc<Vec<Project>>) {
        if self.tx.send(Command::Changed(projects)).is_err() {
            warn!("auto-save task is gone, change not recorded");
        }
    }

    /// Save any pending change now, skipping the rest of the debounce delay
    pub async fn flush(&self) -> SaveReport {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_err() {
            return SaveReport::default();
        }
        wait.await.unwrap_or_default()
    }

    /// Save any pending change and wait for the task to finish
    pub async fn shutdown(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!(error = %e, "auto-save task ended abnormally");
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    store: Arc<dyn ProjectStore>,
    delay: Duration,
    mut snapshot: Option<Snapshot>,
) {
    let mut pending: Option<Arc<Vec<Project>>> = None;

    loop {
        let command = if pending.is_some() {
            tokio::select! {
                command = rx.recv() => command,
                _ = tokio::time::sleep(delay) => {
                    if let Some(projects) = pending.take() {
                        cycle(store.as_ref(), &mut snapshot, &projects).await;
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            // a newer sequence supersedes the pending one and re-arms the timer
            Some(Command::Changed(projects)) => pending = Some(projects),
            Some(Command::Flush(done)) => {
                let report = match pending.take() {
                    Some(projects) => cycle(store.as_ref(), &mut snapshot, &projects).await,
                    None => SaveReport::default(),
                };
                let _ = done.send(report);
            }
            None => {
                if let Some(projects) = pending.take() {
                    cycle(store.as_ref(), &mut snapshot, &projects).await;
                }
                break;
            }
        }
    }
}

async fn cycle(store: &dyn ProjectStore, snapshot: &mut Option<Snapshot>, projects: &[Project]) -> SaveReport {
    let report = save_dirty(store, snapshot.as_ref(), projects).await;
    // replaced even when writes failed
    *snapshot = Some(Snapshot::of(projects));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::Shot;
    use crate::state::store::testing::RecordingStore;

    fn projects(n: usize) -> Vec<Project> {
        (0..n)
            .map(|i| {
                let mut p = Project::new(format!("P{i}"), "idea", 1000);
                p.shots.push(Shot::new(1, "a", "b"));
                p
            })
            .collect()
    }

    #[test]
    fn test_no_snapshot_means_everything_is_dirty() {
        let current = projects(3);
        assert_eq!(dirty_projects(None, &current).len(), 3);
    }

    #[test]
    fn test_only_changed_project_is_dirty() {
        let before = projects(3);
        let snapshot = Snapshot::of(&before);

        let mut after = before.clone();
        after[1].touch(1000);

        let dirty = dirty_projects(Some(&snapshot), &after);
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].id, after[1].id);
    }

    #[test]
    fn test_new_project_is_dirty_and_removed_one_is_ignored() {
        let before = projects(2);
        let snapshot = Snapshot::of(&before);

        let mut after = vec![before[1].clone()];
        after.insert(0, Project::new("Fresh", "idea", 5));

        let dirty = dirty_projects(Some(&snapshot), &after);
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].title, "Fresh");
    }

    #[tokio::test]
    async fn test_failure_does_not_block_siblings() {
        let store = RecordingStore::default();
        let current = projects(3);
        store.fail_saves_for(&current[0].id);

        let report = save_dirty(&store, None, &current).await;

        assert_eq!(report, SaveReport { saved: 2, failed: 1 });
        assert_eq!(store.saved_ids().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_saves_every_project() {
        let store = Arc::new(RecordingStore::default());
        let saver = AutoSaver::spawn(store.clone(), Duration::from_millis(1000));

        saver.publish(Arc::new(projects(3)));
        tokio::time::sleep(Duration::from_millis(1001)).await;

        assert_eq!(store.saved_ids().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_restarts_on_each_change() {
        let store = Arc::new(RecordingStore::default());
        let initial = projects(2);
        let saver = AutoSaver::spawn_with_snapshot(
            store.clone(),
            Duration::from_millis(1000),
            Some(Snapshot::of(&initial)),
        );

        let mut next = initial.clone();
        next[0].touch(2000);
        saver.publish(Arc::new(next.clone()));
        tokio::time::sleep(Duration::from_millis(500)).await;

        next[0].touch(3000);
        saver.publish(Arc::new(next.clone()));
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(store.saved_ids().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(store.saved_ids(), vec![next[0].id.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_state_is_not_rewritten() {
        let store = Arc::new(RecordingStore::default());
        let saver = AutoSaver::spawn(store.clone(), Duration::from_millis(100));
        let state = Arc::new(projects(2));

        saver.publish(state.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        saver.publish(state);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.saved_ids().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_is_not_retried_until_next_change() {
        let store = Arc::new(RecordingStore::default());
        let mut state = projects(1);
        store.fail_saves_for(&state[0].id);
        let saver = AutoSaver::spawn(store.clone(), Duration::from_millis(100));

        saver.publish(Arc::new(state.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        saver.publish(Arc::new(state.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.saved_ids().len(), 1);

        state[0].touch(5000);
        saver.publish(Arc::new(state));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.saved_ids().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_and_shutdown_save_pending_changes() {
        let store = Arc::new(RecordingStore::default());
        let saver = AutoSaver::spawn(store.clone(), Duration::from_secs(60));

        saver.publish(Arc::new(projects(1)));
        let report = saver.flush().await;
        assert_eq!(report.saved, 1);

        let mut more = projects(2);
        more[0].touch(9000);
        saver.publish(Arc::new(more));
        saver.shutdown().await;
        assert_eq!(store.saved_ids().len(), 3);
    }
}
