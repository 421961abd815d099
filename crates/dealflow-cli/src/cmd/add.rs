use crate::output::{OutputMode, pretty_kv, render_mode};
use clap::Args;
use dealflow_core::Item;
use serde_json::Value;
use std::path::Path;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Deal ID (must be unused).
    pub id: String,

    /// Stage the deal starts in.
    #[arg(long, short)]
    pub stage: String,

    /// Deal title.
    #[arg(long, short)]
    pub title: Option<String>,

    /// Extra payload field as key=value. JSON values are kept typed.
    #[arg(long = "field", value_name = "KEY=VALUE")]
    pub fields: Vec<String>,
}

/// Parse `key=value`. Values that parse as JSON keep their type, anything
/// else is a string.
pub fn parse_field(raw: &str) -> anyhow::Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        anyhow::bail!("invalid field '{raw}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("invalid field '{raw}': empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn run_add(args: &AddArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let mut project = super::open_project(project_root, output)?;
    let stage = super::resolve_stage(project.store.stage_set(), &args.stage, output)?;

    let mut item = Item::new(args.id.trim(), stage);
    if let Some(title) = &args.title {
        item = item.with_field("title", title.as_str());
    }
    for raw in &args.fields {
        let (key, value) = parse_field(raw)?;
        item = item.with_field(key, value);
    }

    let created = match project.store.create_item(&item) {
        Ok(created) => created,
        Err(err) => return super::fail(output, err),
    };

    render_mode(
        output,
        &created,
        |item, w| writeln!(w, "{}\t{}", item.id, item.stage),
        |item, w| {
            writeln!(w, "Added {}", item.id)?;
            pretty_kv(w, "Stage", item.stage.as_str())?;
            if let Some(title) = item.title() {
                pretty_kv(w, "Title", title)?;
            }
            Ok(())
        },
    )
}
