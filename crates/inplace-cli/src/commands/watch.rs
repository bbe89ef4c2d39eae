//! Watch command - present a location live and print what happens to it.
//!
//! Directories are presented as a listing, files as their contents. The
//! session follows renames and reports deletion. On Unix, `SIGUSR1` suspends
//! observation as if the presenter went to the background and `SIGUSR2`
//! resumes it; changes made meanwhile are picked up on resume.
//!
//! # Examples
//!
//! ```bash
//! inplace watch '#1'
//! kill -USR1 "$(pgrep inplace)"   # suspend
//! ```

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::{info, instrument};

use inplace_core::{
    EditSession, ErrorCategory, ListingSession, LocationRef, SessionEnv, SessionEvent,
};

use super::{App, Target};
use crate::output::format_name;

#[derive(ClapArgs)]
pub struct Args {
    /// File or directory to watch (`#N` or a path)
    pub target: Target,
}

/// The session backing a watch, chosen by the kind of target.
enum Watched {
    Edit(EditSession),
    Listing(ListingSession),
}

impl Watched {
    async fn open(env: SessionEnv, location: LocationRef) -> Self {
        if location.is_dir() {
            let mut session = ListingSession::new(env);
            session.open(location);
            Self::Listing(session)
        } else {
            let mut session = EditSession::new(env);
            session.open(location).await;
            Self::Edit(session)
        }
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        match self {
            Self::Edit(session) => session.next_event().await,
            Self::Listing(session) => session.next_event().await,
        }
    }

    async fn enter_background(&mut self) {
        match self {
            Self::Edit(session) => session.enter_background().await,
            Self::Listing(session) => session.enter_background(),
        }
    }

    fn enter_foreground(&mut self) {
        match self {
            Self::Edit(session) => session.enter_foreground(),
            Self::Listing(session) => session.enter_foreground(),
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Edit(session) => session.close().await,
            Self::Listing(session) => session.close(),
        }
    }
}

#[instrument(level = "info", name = "cmd::watch", skip_all, fields(target = %args.target))]
pub async fn execute(app: &App, args: &Args) -> Result<()> {
    let location = app.resolve(&args.target)?;
    let mut lifecycle = Lifecycle::new()?;
    let mut session = Watched::open(app.env().clone(), location).await;

    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            transition = lifecycle.next() => match transition {
                Transition::Suspend => {
                    info!("Suspending observation");
                    session.enter_background().await;
                }
                Transition::Resume => {
                    info!("Resuming observation");
                    session.enter_foreground();
                }
            },
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

pub(crate) fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::ContentAvailable { title, text } => {
            println!("== {title} ==");
            print!("{text}");
            if !text.is_empty() && !text.ends_with('\n') {
                println!();
            }
        }
        SessionEvent::ListingAvailable { title, entries } => {
            println!("== {title} ({} entries) ==", entries.len());
            for entry in entries {
                println!("{}", format_name(entry));
            }
        }
        SessionEvent::Moved { to } => println!("-> moved to {to}"),
        SessionEvent::Deleted { title } => println!("== {title} =="),
        SessionEvent::Error(e) => match e.category() {
            ErrorCategory::Removed => println!("!! removed: {e}"),
            ErrorCategory::Silent => {}
            ErrorCategory::Alert => eprintln!("Error: {e}"),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Suspend,
    Resume,
}

#[cfg(unix)]
struct Lifecycle {
    suspend: tokio::signal::unix::Signal,
    resume: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Lifecycle {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            suspend: signal(SignalKind::user_defined1()).context("Failed to listen for SIGUSR1")?,
            resume: signal(SignalKind::user_defined2()).context("Failed to listen for SIGUSR2")?,
        })
    }

    async fn next(&mut self) -> Transition {
        tokio::select! {
            Some(()) = self.suspend.recv() => Transition::Suspend,
            Some(()) = self.resume.recv() => Transition::Resume,
            else => std::future::pending().await,
        }
    }
}

#[cfg(not(unix))]
struct Lifecycle;

#[cfg(not(unix))]
impl Lifecycle {
    #[allow(clippy::unnecessary_wraps)]
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Transition {
        std::future::pending().await
    }
}
