//! `dealflow move`: one stage move through the persistence call.

use crate::output::{OutputMode, pretty_kv, render_mode};
use clap::Args;
use dealflow_core::{Item, ItemId, PipelineError, StagePersistence};
use serde::Serialize;
use std::path::Path;

#[derive(Args, Debug)]
pub struct MoveArgs {
    /// Deal ID to move.
    pub id: String,

    /// Target stage (case-insensitive).
    pub stage: String,
}

#[derive(Debug, Serialize)]
struct MoveOutput {
    from: String,
    to: String,
    item: Item,
}

pub fn run_move(args: &MoveArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let mut project = super::open_project(project_root, output)?;
    let target = super::resolve_stage(project.store.stage_set(), &args.stage, output)?;
    let id = ItemId::new(args.id.trim());

    let current = match project.store.get_item(&id) {
        Ok(Some(item)) => item,
        Ok(None) => return super::fail(output, PipelineError::ItemNotFound(id)),
        Err(err) => return super::fail(output, err),
    };
    if current.stage == target {
        return super::fail(
            output,
            PipelineError::InvalidMove {
                item: id,
                stage: target.to_string(),
            },
        );
    }

    let item = match project.store.apply_stage_move(&id, &target) {
        Ok(item) => item,
        Err(err) => return super::fail_persist(output, err),
    };

    let result = MoveOutput {
        from: current.stage.to_string(),
        to: item.stage.to_string(),
        item,
    };
    render_mode(
        output,
        &result,
        |r, w| writeln!(w, "{}\t{}\t{}", r.item.id, r.from, r.to),
        |r, w| {
            writeln!(w, "Moved {}", r.item.id)?;
            pretty_kv(w, "From", &r.from)?;
            pretty_kv(w, "To", &r.to)
        },
    )
}
