//! Ls command - list a directory with coordinated access.
//!
//! Cloud placeholders are listed under their real names with kind `c`.
//!
//! # Examples
//!
//! ```bash
//! inplace ls '#1'
//! inplace ls --json ~/Sync/notes | jq '.entries[].name'
//! ```

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use comfy_table::Cell;
use serde::Serialize;
use tracing::instrument;

use super::{App, Target};
use crate::output::{create_table, format_kind, format_name};

#[derive(ClapArgs)]
pub struct Args {
    /// Directory to list (`#N` or a path)
    pub target: Target,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// One entry per line (script-friendly)
    #[arg(short = '1')]
    pub one_per_line: bool,
}

#[derive(Serialize)]
struct LsOutput {
    path: String,
    entries: Vec<EntryInfo>,
}

#[derive(Serialize)]
struct EntryInfo {
    name: String,
    is_dir: bool,
    placeholder: bool,
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(target = %args.target))]
pub async fn execute(app: &App, args: &Args) -> Result<()> {
    let location = app.resolve(&args.target)?;
    if !location.is_dir() {
        bail!("Not a directory: {location}");
    }

    let _grant = app.grant(&location)?;
    let entries = app.access().list(&location).await?;

    if args.json {
        let output = LsOutput {
            path: location.path().display().to_string(),
            entries: entries
                .iter()
                .map(|e| EntryInfo {
                    name: e.display_name().to_string(),
                    is_dir: e.is_dir(),
                    placeholder: e.is_placeholder(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if args.one_per_line {
        for entry in &entries {
            println!("{}", format_name(entry));
        }
        return Ok(());
    }

    if entries.is_empty() {
        println!("{location} is empty");
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Kind", "Name"]);
    for entry in &entries {
        table.add_row(vec![Cell::new(format_kind(entry)), Cell::new(format_name(entry))]);
    }
    println!("{table}");
    Ok(())
}
