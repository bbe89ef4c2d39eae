//! Rm command - forget a bookmark or delete an item.
//!
//! `#N` only removes the bookmark; the item itself is left alone. A path
//! is deleted with coordinated access, so sessions presenting it see the
//! deletion.
//!
//! # Examples
//!
//! ```bash
//! inplace rm '#2'
//! inplace rm ~/Sync/notes/old.md
//! ```

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::{App, Target};

#[derive(ClapArgs)]
pub struct Args {
    /// Bookmark to forget (`#N`) or path to delete
    pub target: Target,
}

#[instrument(level = "info", name = "cmd::rm", skip_all, fields(target = %args.target))]
pub async fn execute(app: &App, args: &Args) -> Result<()> {
    match &args.target {
        Target::Bookmark(n) => match app.bookmarks().remove_location(n - 1)? {
            Some(location) => println!("Forgot #{n} {location}"),
            None => bail!("No bookmark #{n} (see `inplace list`)"),
        },
        Target::Path(_) => {
            let location = app.resolve(&args.target)?;
            let _grant = app.grant(&location)?;
            app.access().delete(&location).await?;
        }
    }
    Ok(())
}
