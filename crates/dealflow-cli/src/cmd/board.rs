//! `dealflow board`: one section per stage with its deals.

use crate::output::{OutputMode, pretty_section, render_mode};
use clap::Args;
use dealflow_core::{Board, Item, ItemId, StageSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Args, Debug)]
pub struct BoardArgs {
    /// Hide stages with no deals.
    #[arg(long)]
    pub compact: bool,
}

#[derive(Debug, Serialize)]
struct CardView {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

#[derive(Debug, Serialize)]
struct LaneView {
    stage: String,
    progress: u8,
    items: Vec<CardView>,
}

#[derive(Debug, Serialize)]
struct BoardView {
    stages: Vec<LaneView>,
    total: usize,
}

fn board_view(stages: &StageSet, board: &Board, items: &BTreeMap<ItemId, Item>) -> BoardView {
    let lanes = board
        .lanes()
        .iter()
        .map(|lane| LaneView {
            stage: lane.stage.to_string(),
            progress: stages.progress(&lane.stage).unwrap_or(0),
            items: lane
                .items
                .iter()
                .map(|id| CardView {
                    id: id.to_string(),
                    title: items
                        .get(id)
                        .and_then(Item::title)
                        .map(str::to_string),
                })
                .collect(),
        })
        .collect();
    BoardView {
        stages: lanes,
        total: board.len(),
    }
}

pub fn run_board(args: &BoardArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = super::open_project(project_root, output)?;
    let items = match project.store.list_items() {
        Ok(items) => items,
        Err(err) => return super::fail(output, err),
    };
    let board = match Board::from_items(project.store.stage_set(), &items) {
        Ok(board) => board,
        Err(err) => return super::fail(output, err),
    };
    let by_id: BTreeMap<ItemId, Item> = items.into_iter().map(|i| (i.id.clone(), i)).collect();

    let mut view = board_view(project.store.stage_set(), &board, &by_id);
    if args.compact {
        view.stages.retain(|lane| !lane.items.is_empty());
    }

    render_mode(
        output,
        &view,
        |v, w| {
            for lane in &v.stages {
                for card in &lane.items {
                    writeln!(
                        w,
                        "{}\t{}\t{}",
                        lane.stage,
                        card.id,
                        card.title.as_deref().unwrap_or("")
                    )?;
                }
            }
            Ok(())
        },
        |v, w| {
            for lane in &v.stages {
                pretty_section(
                    w,
                    &format!("{} ({}) {}%", lane.stage, lane.items.len(), lane.progress),
                )?;
                if lane.items.is_empty() {
                    writeln!(w, "  (empty)")?;
                }
                for card in &lane.items {
                    match &card.title {
                        Some(title) => writeln!(w, "  {}  {title}", card.id)?,
                        None => writeln!(w, "  {}", card.id)?,
                    }
                }
                writeln!(w)?;
            }
            writeln!(w, "{} deals", v.total)
        },
    )
}
