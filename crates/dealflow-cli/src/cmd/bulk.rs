//! `dealflow bulk-move`: several stage moves as one atomic batch.

use crate::output::{OutputMode, render_mode};
use clap::Args;
use dealflow_core::{ErrorCode, Item, ItemId, Move, PipelineError, StagePersistence};
use serde::Serialize;
use std::path::Path;

#[derive(Args, Debug)]
pub struct BulkMoveArgs {
    /// Moves as ID=STAGE, applied in order.
    #[arg(required = true, value_name = "ID=STAGE")]
    pub moves: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BulkOutput {
    moved: Vec<Item>,
    unchanged: Vec<String>,
}

fn split_pair(raw: &str) -> Option<(&str, &str)> {
    let (id, stage) = raw.split_once('=')?;
    let (id, stage) = (id.trim(), stage.trim());
    (!id.is_empty() && !stage.is_empty()).then_some((id, stage))
}

pub fn run_bulk_move(
    args: &BulkMoveArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let mut project = super::open_project(project_root, output)?;

    let mut moves = Vec::with_capacity(args.moves.len());
    let mut unchanged = Vec::new();
    for raw in &args.moves {
        let Some((id, stage)) = split_pair(raw) else {
            return super::fail_code(
                output,
                ErrorCode::MalformedMove,
                format!("'{raw}', expected ID=STAGE"),
            );
        };
        let target = super::resolve_stage(project.store.stage_set(), stage, output)?;
        let id = ItemId::new(id);
        let current = match project.store.get_item(&id) {
            Ok(Some(item)) => item,
            Ok(None) => return super::fail(output, PipelineError::ItemNotFound(id)),
            Err(err) => return super::fail(output, err),
        };
        if current.stage == target {
            unchanged.push(id.to_string());
        } else {
            moves.push(Move::new(id, current.stage, target));
        }
    }

    let moved = match project.store.apply_stage_moves(&moves) {
        Ok(items) => items,
        Err(err) => return super::fail_persist(output, err),
    };

    let result = BulkOutput { moved, unchanged };
    render_mode(
        output,
        &result,
        |r, w| {
            for item in &r.moved {
                writeln!(w, "{}\t{}", item.id, item.stage)?;
            }
            Ok(())
        },
        |r, w| {
            writeln!(w, "Moved {} deals", r.moved.len())?;
            for item in &r.moved {
                writeln!(w, "  {} -> {}", item.id, item.stage)?;
            }
            if !r.unchanged.is_empty() {
                writeln!(w, "Already in place: {}", r.unchanged.join(", "))?;
            }
            Ok(())
        },
    )
}
