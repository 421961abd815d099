//! Command handlers for `dealflow`.

pub mod add;
pub mod board;
pub mod bulk;
pub mod history;
pub mod init;
pub mod move_cmd;
pub mod progress;

use crate::output::{CliError, OutputMode, render_error};
use dealflow_core::config::{self, PROJECT_DIR, ProjectConfig};
use dealflow_core::db::SqliteDealStore;
use dealflow_core::{ErrorCode, PersistError, PipelineError, Stage, StageSet};
use std::path::Path;

/// An initialized project: its config and an open deal store.
pub struct Project {
    pub config: ProjectConfig,
    pub store: SqliteDealStore,
}

fn code_error(code: ErrorCode, detail: impl std::fmt::Display) -> CliError {
    CliError {
        message: format!("{}: {detail}", code.message()),
        suggestion: code.hint().map(str::to_string),
        error_code: Some(code.code().to_string()),
    }
}

/// Load `.dealflow/config.toml`, defaults when absent.
pub fn load_config(project_root: &Path, output: OutputMode) -> anyhow::Result<ProjectConfig> {
    match config::load_project_config(project_root) {
        Ok(cfg) => Ok(cfg),
        Err(err) => {
            render_error(output, &code_error(ErrorCode::ConfigParseError, format!("{err:#}")))?;
            Err(err)
        }
    }
}

/// Open the project under `project_root`, failing if `init` never ran.
pub fn open_project(project_root: &Path, output: OutputMode) -> anyhow::Result<Project> {
    let dir = project_root.join(PROJECT_DIR);
    if !dir.is_dir() {
        render_error(
            output,
            &code_error(ErrorCode::NotInitialized, dir.display()),
        )?;
        anyhow::bail!("{} not found", dir.display());
    }

    let config = load_config(project_root, output)?;
    let db_path = config.database_path(project_root);
    match SqliteDealStore::open(&db_path, config.pipeline.stages.clone()) {
        Ok(store) => Ok(Project { config, store }),
        Err(err) => {
            render_error(output, &code_error(ErrorCode::StorageFailure, format!("{err:#}")))?;
            Err(err)
        }
    }
}

/// Render a usage error under `code` and fail the command.
pub fn fail_code<T>(
    output: OutputMode,
    code: ErrorCode,
    detail: impl std::fmt::Display,
) -> anyhow::Result<T> {
    let err = code_error(code, detail);
    render_error(output, &err)?;
    Err(anyhow::anyhow!(err.message))
}

/// Render a library error and hand it back as the command's failure.
pub fn fail<T>(output: OutputMode, err: PipelineError) -> anyhow::Result<T> {
    render_error(output, &CliError::from(&err))?;
    Err(err.into())
}

pub fn fail_persist<T>(output: OutputMode, err: PersistError) -> anyhow::Result<T> {
    render_error(output, &CliError::from(&err))?;
    Err(err.into())
}

/// Resolve a user-typed stage name against the configured stages.
pub fn resolve_stage(stages: &StageSet, raw: &str, output: OutputMode) -> anyhow::Result<Stage> {
    match stages.resolve(raw) {
        Ok(stage) => Ok(stage),
        Err(err) => fail(output, err.into()),
    }
}
