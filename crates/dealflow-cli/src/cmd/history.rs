//! `dealflow history <id>`: stage moves recorded for one deal.

use crate::output::{OutputMode, render_mode};
use chrono::{DateTime, Utc};
use clap::Args;
use dealflow_core::{ItemId, PipelineError};
use std::path::Path;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Deal ID.
    pub id: String,
}

pub fn run_history(
    args: &HistoryArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let project = super::open_project(project_root, output)?;
    let id = ItemId::new(args.id.trim());

    match project.store.get_item(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return super::fail(output, PipelineError::ItemNotFound(id)),
        Err(err) => return super::fail(output, err),
    }
    let history = match project.store.move_history(&id) {
        Ok(history) => history,
        Err(err) => return super::fail(output, err),
    };

    render_mode(
        output,
        &history,
        |h, w| {
            for rec in h {
                writeln!(w, "{}\t{}\t{}", rec.moved_at_us, rec.from, rec.to)?;
            }
            Ok(())
        },
        |h, w| {
            if h.is_empty() {
                return writeln!(w, "{id}: no stage moves");
            }
            for rec in h {
                writeln!(w, "{}  {} -> {}", format_moved_at(rec.moved_at_us), rec.from, rec.to)?;
            }
            Ok(())
        },
    )
}

fn format_moved_at(us: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(us)
        .map_or_else(|| us.to_string(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string())
}
