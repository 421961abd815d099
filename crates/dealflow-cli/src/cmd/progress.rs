//! `dealflow progress <stage>`: how far along the pipeline a stage sits.

use crate::output::{OutputMode, render};
use clap::Args;
use serde::Serialize;
use std::path::Path;

#[derive(Args, Debug)]
pub struct ProgressArgs {
    /// Stage name (case-insensitive).
    pub stage: String,
}

#[derive(Debug, Serialize)]
struct ProgressOutput {
    stage: String,
    index: usize,
    stage_count: usize,
    progress: u8,
}

pub fn run_progress(
    args: &ProgressArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let config = super::load_config(project_root, output)?;
    let stages = &config.pipeline.stages;
    let stage = super::resolve_stage(stages, &args.stage, output)?;

    let (index, progress) = match (stages.index(&stage), stages.progress(&stage)) {
        (Ok(index), Ok(progress)) => (index, progress),
        (Err(err), _) | (_, Err(err)) => return super::fail(output, err.into()),
    };

    let result = ProgressOutput {
        stage: stage.to_string(),
        index,
        stage_count: stages.len(),
        progress,
    };
    render(output, &result, |r, w| {
        writeln!(w, "{}\t{}%", r.stage, r.progress)
    })
}
