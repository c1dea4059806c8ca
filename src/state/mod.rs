/// State management module
///
/// This module handles all application state, including:
/// - Shared data structures (data.rs) and shot settings (settings.rs)
/// - Turning stored and legacy records into live values (migrate.rs)
/// - The persistence contract (store.rs) and its SQLite catalog (library.rs)
/// - Debounced saving of changed projects (autosave.rs)
/// - Project and shot transitions (reducer.rs)
/// - Backup files (interchange.rs)

pub mod autosave;
pub mod data;
pub mod interchange;
pub mod library;
pub mod migrate;
pub mod reducer;
pub mod settings;
pub mod store;
