/// Persistence contracts
///
/// `ProjectStore` is the durable mapping from project id to project.
/// `KeyValueStore` is the small string store that holds the pre-catalog
/// legacy blob and the API key. `Library` implements both on SQLite.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use super::data::{Project, ProjectRecord};

/// Key of the legacy blob: a JSON array of pre-catalog project records
pub const LEGACY_PROJECTS_KEY: &str = "storyboard_projects";

/// Key of the stored API key
pub const API_KEY_KEY: &str = "api_key";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode project {id}: {source}")]
    Encode {
        id: String,
        source: serde_json::Error,
    },
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Every stored project, as stored (not yet migrated)
    async fn get_all_projects(&self) -> StorageResult<Vec<ProjectRecord>>;

    /// Write many projects at once; only used for the legacy migration
    async fn save_all_projects(&self, projects: &[Project]) -> StorageResult<()>;

    /// Insert or replace one project
    async fn save_project(&self, project: &Project) -> StorageResult<()>;

    /// Remove a project; removing an unknown id is not an error
    async fn delete_project(&self, id: &str) -> StorageResult<()>;
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_value(&self, key: &str) -> StorageResult<Option<String>>;
    async fn set_value(&self, key: &str, value: &str) -> StorageResult<()>;
    async fn remove_value(&self, key: &str) -> StorageResult<()>;
}

/// In-memory stores that record every call, for tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashSet};
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub projects: Mutex<BTreeMap<String, Project>>,
        pub values: Mutex<BTreeMap<String, String>>,
        pub saved: Mutex<Vec<String>>,
        pub bulk_saves: Mutex<usize>,
        pub deleted: Mutex<Vec<String>>,
        pub failing_ids: Mutex<HashSet<String>>,
        pub fail_bulk: Mutex<bool>,
        pub fail_remove: Mutex<bool>,
        /// Holds every `save_project` for this long before it writes
        pub save_delay: Mutex<Option<Duration>>,
    }

    impl RecordingStore {
        pub(crate) fn saved_ids(&self) -> Vec<String> {
            self.saved.lock().clone()
        }

        pub(crate) fn fail_saves_for(&self, id: &str) {
            self.failing_ids.lock().insert(id.to_string());
        }

        fn fake_error() -> StorageError {
            StorageError::Sqlite(rusqlite::Error::QueryReturnedNoRows)
        }
    }

    #[async_trait]
    impl ProjectStore for RecordingStore {
        async fn get_all_projects(&self) -> StorageResult<Vec<ProjectRecord>> {
            Ok(self.projects.lock().values().cloned().map(ProjectRecord::from).collect())
        }

        async fn save_all_projects(&self, projects: &[Project]) -> StorageResult<()> {
            if *self.fail_bulk.lock() {
                return Err(Self::fake_error());
            }
            *self.bulk_saves.lock() += 1;
            let mut stored = self.projects.lock();
            for project in projects {
                stored.insert(project.id.clone(), project.clone());
            }
            Ok(())
        }

        async fn save_project(&self, project: &Project) -> StorageResult<()> {
            self.saved.lock().push(project.id.clone());
            let delay = *self.save_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing_ids.lock().contains(&project.id) {
                return Err(Self::fake_error());
            }
            self.projects.lock().insert(project.id.clone(), project.clone());
            Ok(())
        }

        async fn delete_project(&self, id: &str) -> StorageResult<()> {
            self.deleted.lock().push(id.to_string());
            self.projects.lock().remove(id);
            Ok(())
        }
    }

    #[async_trait]
    impl KeyValueStore for RecordingStore {
        async fn get_value(&self, key: &str) -> StorageResult<Option<String>> {
            Ok(self.values.lock().get(key).cloned())
        }

        async fn set_value(&self, key: &str, value: &str) -> StorageResult<()> {
            self.values.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn remove_value(&self, key: &str) -> StorageResult<()> {
            if *self.fail_remove.lock() {
                return Err(Self::fake_error());
            }
            self.values.lock().remove(key);
            Ok(())
        }
    }
}
