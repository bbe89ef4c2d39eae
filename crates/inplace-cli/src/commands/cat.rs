use std::io::{self, Write};

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::{App, Target};

#[derive(ClapArgs)]
pub struct Args {
    /// File to print (`#N` or a path)
    pub target: Target,
}

/// Print a file, downloading it first if only a placeholder is present.
#[instrument(level = "info", name = "cmd::cat", skip_all, fields(target = %args.target))]
pub async fn execute(app: &App, args: &Args) -> Result<()> {
    let location = app.resolve(&args.target)?;
    if location.is_dir() {
        bail!("Is a directory: {location}");
    }

    let _grant = app.grant(&location)?;
    let contents = app.access().read_bytes(&location).await?;
    io::stdout().write_all(&contents)?;
    Ok(())
}
