use crate::output::{OutputMode, pretty_kv, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use dealflow_core::config::{self, PROJECT_DIR};
use dealflow_core::db::open_database;
use serde::Serialize;
use std::path::Path;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite `.dealflow/config.toml` with defaults even if it exists.
    #[arg(long)]
    pub force: bool,
}

const GITIGNORE: &str = "*.db\n*.db-wal\n*.db-shm\n";

#[derive(Debug, Serialize)]
struct InitOutput {
    root: String,
    config: String,
    database: String,
    stages: Vec<String>,
    created_config: bool,
}

/// Execute `dealflow init`. Creates the project skeleton:
///
/// ```text
/// .dealflow/
///   config.toml    (default pipeline stages and database name)
///   .gitignore     (database files)
///   dealflow.db    (migrated SQLite deal store)
/// ```
///
/// Running it again keeps an existing config unless `--force` is set.
///
/// # Errors
///
/// Returns an error if the config is unreadable or any filesystem or
/// database operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let dir = project_root.join(PROJECT_DIR);
    let config_path = dir.join("config.toml");
    let create_config = args.force || !config_path.exists();

    let cfg = if create_config {
        let cfg = config::ProjectConfig::default();
        config::write_project_config(project_root, &cfg)?;
        cfg
    } else {
        super::load_config(project_root, output)?
    };

    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, GITIGNORE)
            .with_context(|| format!("Failed to write {}", gitignore.display()))?;
    }

    let db_path = cfg.database_path(project_root);
    open_database(&db_path)?;
    tracing::info!(root = %project_root.display(), "project initialized");

    let result = InitOutput {
        root: project_root.display().to_string(),
        config: config_path.display().to_string(),
        database: db_path.display().to_string(),
        stages: cfg
            .pipeline
            .stages
            .stages()
            .iter()
            .map(ToString::to_string)
            .collect(),
        created_config: create_config,
    };

    render_mode(
        output,
        &result,
        |r, w| writeln!(w, "initialized\t{}", r.root),
        |r, w| {
            writeln!(w, "Initialized dealflow project")?;
            pretty_kv(w, "Config", &r.config)?;
            pretty_kv(w, "Database", &r.database)?;
            pretty_kv(w, "Stages", r.stages.join(" > "))
        },
    )
}
