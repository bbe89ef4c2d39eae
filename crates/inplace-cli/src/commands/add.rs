//! Add command - grant and bookmark locations.
//!
//! # Examples
//!
//! ```bash
//! inplace add ~/Sync/notes ~/Sync/todo.md
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use inplace_core::LocationRef;

use super::App;

#[derive(ClapArgs)]
pub struct Args {
    /// Files or directories to remember
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[instrument(level = "info", name = "cmd::add", skip_all, fields(count = args.paths.len()))]
pub fn execute(app: &App, args: &Args) -> Result<()> {
    for path in &args.paths {
        let path = std::path::absolute(path)
            .with_context(|| format!("Invalid path: {}", path.display()))?;
        let location = LocationRef::inspect(&path)
            .with_context(|| format!("Cannot add {}", path.display()))?;

        if let Some(n) = app
            .bookmarks()
            .locations()
            .iter()
            .position(|l| l.path() == location.path())
        {
            println!("#{} {} (already added)", n + 1, location);
            continue;
        }

        let report = app.bookmarks().add_location(location.clone())?;
        if let Some((_, e)) = report.failures.into_iter().find(|(l, _)| l == &location) {
            bail!("Failed to bookmark {location}: {e}");
        }
        println!("#{} {}", app.bookmarks().locations().len(), location);
    }
    Ok(())
}
