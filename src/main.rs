use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use storyboard_studio::ai::OfflineAi;
use storyboard_studio::config::AppConfig;
use storyboard_studio::state::interchange::ExportedFile;
use storyboard_studio::state::library::Library;
use storyboard_studio::{Studio, StudioError};

#[derive(Parser)]
#[command(
    name = "storyboard-studio",
    version,
    about = "Manage the storyboard project catalog"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: config.json in the data directory)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// List projects, newest first
    List {
        /// Show the project trash instead
        #[arg(long)]
        trashed: bool,
    },
    /// Import a JSON backup as a new project
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Write a JSON backup of a project
    Export {
        project_id: String,
        /// Output directory (default: current directory)
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Write a standalone HTML storyboard of a project
    ExportHtml {
        project_id: String,
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Move a project to the trash
    Trash { project_id: String },
    /// Bring a project back from the trash
    Restore { project_id: String },
    /// Delete a project for good
    Delete { project_id: String },
    /// Delete every trashed project for good
    EmptyTrash,
    /// Store the API key used for AI calls
    SetKey { key: String },
    /// Forget the stored API key
    ClearKey,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Studio(#[from] StudioError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::load(cli.config.as_deref()).map_err(StudioError::from)?;
    let data_dir = config.data_dir().map_err(StudioError::from)?;
    let library = Library::open(&data_dir).map_err(StudioError::from)?;
    info!(path = %library.path().display(), "opened catalog");

    let studio = Studio::open(&config, Arc::new(OfflineAi), Arc::new(library)).await?;

    match cli.command {
        Command::List { trashed } => list(&studio, trashed),
        Command::Import { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|source| CliError::Read { path: file.clone(), source })?;
            let project_id = studio.import_project(&text)?;
            println!("Imported {} as {project_id}", file.display());
        }
        Command::Export { project_id, out } => {
            let exported = studio.export_project(&project_id)?;
            write_export(exported, out.as_deref()).await?;
        }
        Command::ExportHtml { project_id, out } => {
            let exported = studio.export_html(&project_id)?;
            write_export(exported, out.as_deref()).await?;
        }
        Command::Trash { project_id } => {
            studio.trash_project(&project_id)?;
            println!("Moved {project_id} to the trash");
        }
        Command::Restore { project_id } => {
            studio.restore_project(&project_id)?;
            println!("Restored {project_id}");
        }
        Command::Delete { project_id } => {
            studio.delete_project(&project_id).await?;
            println!("Deleted {project_id}");
        }
        Command::EmptyTrash => {
            let count = studio.empty_project_trash().await;
            println!("Deleted {count} trashed project(s)");
        }
        Command::SetKey { key } => {
            studio.set_api_key(&key).await?;
            println!("API key saved");
        }
        Command::ClearKey => {
            studio.clear_api_key().await?;
            println!("API key removed");
        }
    }

    studio.close().await;
    Ok(())
}

fn list(studio: &Studio, trashed: bool) {
    let projects = studio.projects();
    let mut shown: Vec<_> = projects.iter().filter(|p| p.is_trashed == trashed).collect();
    shown.sort_by_key(|p| std::cmp::Reverse(p.updated_at));

    if shown.is_empty() {
        println!("{}", if trashed { "Trash is empty." } else { "No projects yet." });
        return;
    }

    for project in shown {
        let updated = DateTime::<Utc>::from_timestamp_millis(project.updated_at)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<40}  {:>3} shots  {}",
            project.id,
            project.title,
            project.shots.len(),
            updated
        );
    }
}

async fn write_export(exported: ExportedFile, out: Option<&Path>) -> Result<(), CliError> {
    let dir = out.unwrap_or_else(|| Path::new("."));
    let path = dir.join(&exported.file_name);
    tokio::fs::write(&path, exported.contents)
        .await
        .map_err(|source| CliError::Write { path: path.clone(), source })?;
    println!("Wrote {}", path.display());
    Ok(())
}
