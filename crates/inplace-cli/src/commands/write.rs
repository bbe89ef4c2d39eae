//! Write command - replace a file's contents with stdin.
//!
//! The write is coordinated, so running sessions in this or other
//! processes flush first and reload afterwards.
//!
//! # Examples
//!
//! ```bash
//! echo "- buy milk" | inplace write ~/Sync/todo.md
//! ```

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use tokio::io::AsyncReadExt;
use tracing::{info, instrument};

use super::{App, Target};

#[derive(ClapArgs)]
pub struct Args {
    /// File to write (`#N` or a path); created if missing
    pub target: Target,
}

#[instrument(level = "info", name = "cmd::write", skip_all, fields(target = %args.target))]
pub async fn execute(app: &App, args: &Args) -> Result<()> {
    let location = app.resolve(&args.target)?;
    if location.is_dir() {
        bail!("Is a directory: {location}");
    }

    let mut contents = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut contents)
        .await
        .context("Failed to read stdin")?;

    let _grant = app.grant(&location)?;
    let len = contents.len();
    app.access().write(&location, contents).await?;
    info!(path = %location, bytes = len, "Wrote file");
    Ok(())
}
