//! Edit command - feed stdin lines into an autosaving edit session.
//!
//! Each line read from stdin is appended to the document as one edit.
//! Writes are debounced by the configured quiescence, so a burst of lines
//! produces a single save. Changes made by others while editing are
//! reloaded and editing continues from the new contents.
//!
//! # Examples
//!
//! ```bash
//! # Append to a bookmarked file
//! echo "- call back" | inplace edit '#1'
//!
//! # Start from an empty document
//! tail -f build.log | inplace edit --replace ~/Sync/build.txt
//! ```

use std::io;

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument};

use inplace_core::{EditSession, LocationRef, SessionEvent};

use super::{App, Target};

#[derive(ClapArgs)]
pub struct Args {
    /// File to edit (`#N` or a path)
    pub target: Target,

    /// Discard the current contents instead of appending to them
    #[arg(long)]
    pub replace: bool,
}

fn gone(location: &LocationRef) -> anyhow::Error {
    anyhow::Error::new(io::Error::from(io::ErrorKind::NotFound))
        .context(format!("{location} no longer exists"))
}

/// Wait for the first load of the session.
async fn loaded(session: &mut EditSession, location: &LocationRef) -> Result<String> {
    loop {
        match session.next_event().await {
            Some(SessionEvent::ContentAvailable { text, .. }) => return Ok(text),
            Some(SessionEvent::Deleted { .. }) => return Err(gone(location)),
            Some(SessionEvent::Error(e)) => return Err(e.into()),
            Some(SessionEvent::Moved { to }) => debug!(to = %to, "Followed move before load"),
            Some(SessionEvent::ListingAvailable { .. }) => {}
            None => bail!("Edit session for {location} ended unexpectedly"),
        }
    }
}

#[instrument(level = "info", name = "cmd::edit", skip_all, fields(target = %args.target))]
pub async fn execute(app: &App, args: &Args) -> Result<()> {
    let location = app.resolve(&args.target)?;
    if location.is_dir() {
        bail!("Is a directory: {location}");
    }

    let mut session = EditSession::new(app.env().clone());
    session.open(location.clone()).await;
    let mut text = loaded(&mut session, &location).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut edits = 0usize;
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    if edits == 0 && args.replace {
                        text.clear();
                    }
                    text.push_str(&line);
                    text.push('\n');
                    if !session.edit(text.clone()) {
                        bail!("{} can no longer be edited", session.title());
                    }
                    edits += 1;
                }
                None => break,
            },
            event = session.next_event() => match event {
                Some(SessionEvent::ContentAvailable { text: reloaded, .. }) => {
                    info!(path = %location, "Reloaded after external change");
                    text = reloaded;
                }
                Some(SessionEvent::Deleted { .. }) => return Err(gone(&location)),
                Some(SessionEvent::Moved { to }) => info!(to = %to, "Following move"),
                Some(SessionEvent::Error(e)) => return Err(e.into()),
                Some(SessionEvent::ListingAvailable { .. }) => {}
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    let saved = session.flush().await?;
    session.close().await;
    debug!(edits, saved, "Edit session finished");
    Ok(())
}
