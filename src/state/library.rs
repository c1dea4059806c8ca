use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::data::{Project, ProjectRecord};
use super::migrate::{migrate_project, settle_transient_flags};
use super::store::{
    KeyValueStore, ProjectStore, StorageError, StorageResult, LEGACY_PROJECTS_KEY,
};
use crate::media::AssetCodec;

/// File name of the catalog inside the data directory
pub const DB_FILE: &str = "storyboard.db";

/// The Library manages the SQLite catalog database.
/// It stores every project as a JSON document keyed by project id,
/// plus a small key-value table.
///
/// Each operation opens its own connection on the blocking pool, so the
/// Library itself is cheap to share between tasks.
#[derive(Clone)]
pub struct Library {
    db_path: PathBuf,
}

impl Library {
    /// Open (or create) the catalog inside `data_dir`.
    pub fn open(data_dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|source| StorageError::CreateDir {
            path: data_dir.to_path_buf(),
            source,
        })?;
        Self::at(data_dir.join(DB_FILE))
    }

    /// Open (or create) the catalog at an exact file path.
    pub fn at(db_path: PathBuf) -> StorageResult<Self> {
        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;

        info!(path = %db_path.display(), "catalog initialized");

        Ok(Library { db_path })
    }

    /// Initialize the database schema.
    /// Creates all necessary tables and indexes if they don't exist.
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        // One row per project; the full record lives in data_json
        conn.execute(
            "CREATE TABLE IF NOT EXISTS projects (
                id              TEXT PRIMARY KEY,
                title           TEXT NOT NULL,
                is_trashed      INTEGER NOT NULL DEFAULT 0,
                updated_at      INTEGER NOT NULL,
                data_json       TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key             TEXT PRIMARY KEY,
                value           TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_projects_updated_at
             ON projects(updated_at DESC)",
            [],
        )?;

        // Added after the first schema; fails harmlessly when the column exists
        let _ = conn.execute("ALTER TABLE projects ADD COLUMN created_at INTEGER", []);

        debug!("catalog schema ready");

        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against a fresh connection on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)?;
            f(&mut conn)
        })
        .await?
    }
}

/// A project flattened into the columns of one row
struct ProjectRow {
    id: String,
    title: String,
    is_trashed: bool,
    created_at: i64,
    updated_at: i64,
    data_json: String,
}

impl ProjectRow {
    fn encode(project: &Project) -> StorageResult<Self> {
        let data_json = serde_json::to_string(project).map_err(|source| StorageError::Encode {
            id: project.id.clone(),
            source,
        })?;
        Ok(Self {
            id: project.id.clone(),
            title: project.title.clone(),
            is_trashed: project.is_trashed,
            created_at: project.created_at,
            updated_at: project.updated_at,
            data_json,
        })
    }

    fn upsert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO projects (id, title, is_trashed, created_at, updated_at, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                is_trashed = excluded.is_trashed,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                data_json = excluded.data_json",
            params![
                self.id,
                self.title,
                self.is_trashed,
                self.created_at,
                self.updated_at,
                self.data_json
            ],
        )
    }
}

#[async_trait]
impl ProjectStore for Library {
    async fn get_all_projects(&self) -> StorageResult<Vec<ProjectRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, data_json FROM projects ORDER BY updated_at DESC",
            )?;

            let rows: Vec<(String, String)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;

            let mut records = Vec::with_capacity(rows.len());
            for (id, json) in rows {
                match serde_json::from_str::<ProjectRecord>(&json) {
                    Ok(record) => records.push(record),
                    // One corrupt row should not hide the rest of the catalog
                    Err(e) => warn!(project_id = %id, error = %e, "skipping unreadable project row"),
                }
            }
            Ok(records)
        })
        .await
    }

    async fn save_all_projects(&self, projects: &[Project]) -> StorageResult<()> {
        let rows = projects
            .iter()
            .map(ProjectRow::encode)
            .collect::<StorageResult<Vec<_>>>()?;

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                row.upsert(&tx)?;
            }
            tx.commit()?;
            info!(count = rows.len(), "saved projects in bulk");
            Ok(())
        })
        .await
    }

    async fn save_project(&self, project: &Project) -> StorageResult<()> {
        let row = ProjectRow::encode(project)?;
        self.with_connection(move |conn| {
            row.upsert(conn)?;
            debug!(project_id = %row.id, bytes = row.data_json.len(), "saved project");
            Ok(())
        })
        .await
    }

    async fn delete_project(&self, id: &str) -> StorageResult<()> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let removed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            debug!(project_id = %id, removed, "deleted project");
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl KeyValueStore for Library {
    async fn get_value(&self, key: &str) -> StorageResult<Option<String>> {
        let key = key.to_string();
        self.with_connection(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv_store WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set_value(&self, key: &str, value: &str) -> StorageResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_value(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.with_connection(move |conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Load the catalog at startup.
///
/// If the legacy key-value blob is still present, its projects are migrated,
/// written in bulk and the blob is removed. The blob is only removed once the
/// bulk write succeeded, so a failed migration is retried on the next launch.
/// Then every stored project is loaded and migrated.
pub async fn bootstrap<S>(store: &S, codec: &AssetCodec) -> StorageResult<Vec<Project>>
where
    S: ProjectStore + KeyValueStore + ?Sized,
{
    migrate_legacy_blob(store, codec).await;

    let records = store.get_all_projects().await?;
    let mut projects = Vec::with_capacity(records.len());
    for record in records {
        match migrate_project(record, codec) {
            Ok(mut project) => {
                settle_transient_flags(&mut project);
                projects.push(project);
            }
            Err(e) => warn!(error = %e, "skipping stored project"),
        }
    }

    info!(count = projects.len(), "loaded projects");
    Ok(projects)
}

async fn migrate_legacy_blob<S>(store: &S, codec: &AssetCodec)
where
    S: ProjectStore + KeyValueStore + ?Sized,
{
    let blob = match store.get_value(LEGACY_PROJECTS_KEY).await {
        Ok(Some(blob)) => blob,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "could not read legacy projects");
            return;
        }
    };

    let records: Vec<ProjectRecord> = match serde_json::from_str(&blob) {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "legacy projects are unreadable, leaving them in place");
            return;
        }
    };

    // a blob left behind by an earlier run must not overwrite later edits
    let existing: HashSet<String> = match store.get_all_projects().await {
        Ok(stored) => stored.into_iter().filter_map(|r| r.id).collect(),
        Err(e) => {
            warn!(error = %e, "could not read the catalog, leaving legacy projects in place");
            return;
        }
    };

    let mut projects = Vec::with_capacity(records.len());
    for record in records {
        match migrate_project(record, codec) {
            Ok(project) if existing.contains(&project.id) => {
                debug!(project_id = %project.id, "legacy project already in the catalog");
            }
            Ok(project) => projects.push(project),
            Err(e) => warn!(error = %e, "skipping legacy project"),
        }
    }

    if !projects.is_empty() {
        if let Err(e) = store.save_all_projects(&projects).await {
            warn!(error = %e, "legacy migration failed, will retry on next launch");
            return;
        }
    }

    match store.remove_value(LEGACY_PROJECTS_KEY).await {
        Ok(()) => info!(count = projects.len(), "migrated legacy projects into the catalog"),
        Err(e) => warn!(error = %e, "legacy projects migrated but the old key could not be cleared"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::Shot;
    use crate::state::settings::{ArtStyle, Lighting};
    use crate::state::store::testing::RecordingStore;

    fn library() -> (tempfile::TempDir, Library) {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::open(dir.path()).unwrap();
        (dir, library)
    }

    fn project(title: &str, updated_at: i64) -> Project {
        let mut project = Project::new(title, "idea", updated_at);
        project.shots.push(Shot::new(1, "Opening", "A sunrise"));
        project
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let (_dir, library) = library();
        let older = project("Older", 100);
        let newer = project("Newer", 200);

        library.save_project(&older).await.unwrap();
        library.save_project(&newer).await.unwrap();

        let records = library.get_all_projects().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_deref(), Some(newer.id.as_str()));

        let codec = AssetCodec::default();
        let loaded = migrate_project(records[1].clone(), &codec).unwrap();
        assert_eq!(loaded, older);
    }

    #[tokio::test]
    async fn test_save_project_upserts() {
        let (_dir, library) = library();
        let mut p = project("Draft", 100);
        library.save_project(&p).await.unwrap();

        p.title = "Final".to_string();
        p.touch(150);
        library.save_project(&p).await.unwrap();

        let records = library.get_all_projects().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Final");
    }

    #[tokio::test]
    async fn test_delete_project() {
        let (_dir, library) = library();
        let p = project("Doomed", 100);
        library.save_project(&p).await.unwrap();

        library.delete_project(&p.id).await.unwrap();
        library.delete_project("never-existed").await.unwrap();

        assert!(library.get_all_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_skipped() {
        let (_dir, library) = library();
        library.save_project(&project("Good", 100)).await.unwrap();

        let conn = Connection::open(library.path()).unwrap();
        conn.execute(
            "INSERT INTO projects (id, title, updated_at, data_json) VALUES ('bad', 'Bad', 1, '{oops')",
            [],
        )
        .unwrap();

        let records = library.get_all_projects().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Good");
    }

    #[tokio::test]
    async fn test_key_value_store() {
        let (_dir, library) = library();
        assert_eq!(library.get_value("k").await.unwrap(), None);

        library.set_value("k", "one").await.unwrap();
        library.set_value("k", "two").await.unwrap();
        assert_eq!(library.get_value("k").await.unwrap().as_deref(), Some("two"));

        library.remove_value("k").await.unwrap();
        assert_eq!(library.get_value("k").await.unwrap(), None);
    }

    #[test]
    fn test_schema_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        Library::open(dir.path()).unwrap();
        Library::open(dir.path()).unwrap();
    }

    const LEGACY_BLOB: &str = r#"[
        {"id":"p1","title":"Heist","idea":"A bank job","createdAt":1,"updatedAt":2,
         "shots":[
            {"id":"s1","shotNumber":1,"description":"Vault","visualPrompt":"Steel door",
             "imageUrl":"TWE=","imageOriginalUrl":"TWFu"},
            {"id":"s2","shotNumber":2,"description":"Escape","visualPrompt":"Car chase"}
         ]}
    ]"#;

    #[tokio::test]
    async fn test_bootstrap_migrates_legacy_blob() {
        let (_dir, library) = library();
        library.set_value(LEGACY_PROJECTS_KEY, LEGACY_BLOB).await.unwrap();

        let projects = bootstrap(&library, &AssetCodec::default()).await.unwrap();

        assert_eq!(projects.len(), 1);
        let shots = &projects[0].shots;
        assert_eq!(shots[0].image_variations.len(), 1);
        assert!(shots[1].image_variations.is_empty());
        assert_eq!(library.get_value(LEGACY_PROJECTS_KEY).await.unwrap(), None);

        // second launch finds nothing to migrate and the same catalog
        let again = bootstrap(&library, &AssetCodec::default()).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].shots[0].image_variations[0].id, shots[0].image_variations[0].id);
    }

    #[tokio::test]
    async fn test_unknown_setting_in_legacy_blob_keeps_the_project() {
        let (_dir, library) = library();
        let blob = r#"[
            {"id":"p1","title":"Day","createdAt":1,"updatedAt":2,
             "shots":[{"id":"s1","shotNumber":1,"description":"A","visualPrompt":"a",
                       "settings":{"lighting":"Moonlight","artStyle":"Anime"}}]},
            {"id":"p2","title":"Night","createdAt":1,"updatedAt":3,
             "shots":[{"id":"s2","shotNumber":1,"description":"B","visualPrompt":"b"}]}
        ]"#;
        library.set_value(LEGACY_PROJECTS_KEY, blob).await.unwrap();

        let projects = bootstrap(&library, &AssetCodec::default()).await.unwrap();

        assert_eq!(projects.len(), 2);
        let day = projects.iter().find(|p| p.id == "p1").unwrap();
        assert_eq!(day.shots[0].settings.lighting, Lighting::Natural);
        assert_eq!(day.shots[0].settings.art_style, ArtStyle::Anime);
        assert_eq!(library.get_value(LEGACY_PROJECTS_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_leftover_legacy_blob_does_not_overwrite_edits() {
        let store = RecordingStore::default();
        store.values.lock().insert(LEGACY_PROJECTS_KEY.to_string(), LEGACY_BLOB.to_string());
        *store.fail_remove.lock() = true;

        let first = bootstrap(&store, &AssetCodec::default()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(*store.bulk_saves.lock(), 1);
        assert!(store.values.lock().contains_key(LEGACY_PROJECTS_KEY));

        let mut edited = first[0].clone();
        edited.title = "Heist, final cut".to_string();
        edited.touch(500);
        store.save_project(&edited).await.unwrap();

        let second = bootstrap(&store, &AssetCodec::default()).await.unwrap();

        assert_eq!(*store.bulk_saves.lock(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].title, "Heist, final cut");
        assert_eq!(second[0].updated_at, 500);

        // once the key can be cleared the blob goes away without a rewrite
        *store.fail_remove.lock() = false;
        bootstrap(&store, &AssetCodec::default()).await.unwrap();
        assert!(!store.values.lock().contains_key(LEGACY_PROJECTS_KEY));
        assert_eq!(*store.bulk_saves.lock(), 1);
    }

    #[tokio::test]
    async fn test_failed_legacy_save_keeps_blob() {
        let store = RecordingStore::default();
        store.values.lock().insert(LEGACY_PROJECTS_KEY.to_string(), LEGACY_BLOB.to_string());
        *store.fail_bulk.lock() = true;

        let projects = bootstrap(&store, &AssetCodec::default()).await.unwrap();

        assert!(projects.is_empty());
        assert!(store.values.lock().contains_key(LEGACY_PROJECTS_KEY));
    }

    #[tokio::test]
    async fn test_bootstrap_clears_stuck_flags() {
        let store = RecordingStore::default();
        let mut p = project("Stuck", 10);
        p.shots[0].is_generating_image = true;
        store.projects.lock().insert(p.id.clone(), p);

        let projects = bootstrap(&store, &AssetCodec::default()).await.unwrap();
        assert!(!projects[0].shots[0].is_generating_image);
    }
}
