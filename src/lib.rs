/// Storyboard studio core
///
/// Projects made of shots, each shot carrying AI-generated image
/// variations. The catalog lives in SQLite; every change flows through
/// the reducer and is saved by the change-tracking auto-saver.

pub mod ai;
pub mod config;
pub mod error;
pub mod media;
pub mod state;
pub mod studio;

pub use error::{StudioError, StudioResult};
pub use studio::{GenerateOptions, Studio};
