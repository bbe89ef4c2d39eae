#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "tokio-console")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inplace_core::{AccessError, CoordinationError, DeepLinkError};

use crate::commands::{App, add, cat, edit, list, ls, open, rm, watch, write};
use crate::config::Config;

/// Coordinated, autosaving access to files in shared locations
#[derive(Parser)]
#[command(name = "inplace")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Remember a synced folder and list it
    inplace add ~/Sync/notes
    inplace ls '#1'

    # Follow a file as other processes change it
    inplace watch ~/Sync/notes/todo.md

    # Append lines with debounced autosave
    echo \"- call back\" | inplace edit ~/Sync/notes/todo.md

    # Handle a deep link from another application
    inplace open 'inplace://x-callback-url/open-in-place?root=/Team&path=a.md'
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (default: platform config directory)
    #[arg(long, value_name = "FILE", env = "INPLACE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grant and bookmark files or directories
    Add(add::Args),

    /// Show bookmarked locations
    List(list::Args),

    /// List a directory
    Ls(ls::Args),

    /// Print a file
    Cat(cat::Args),

    /// Replace a file's contents with stdin
    Write(write::Args),

    /// Forget a bookmark (#N) or delete a path
    Rm(rm::Args),

    /// Present a location live and print its changes
    Watch(watch::Args),

    /// Append stdin lines to a file with debounced autosave
    Edit(edit::Args),

    /// Handle an x-callback-url open request
    Open(open::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let config = Config::load(cli.config.as_deref())?;
    let app = App::new(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        match &cli.command {
            Commands::Add(args) => add::execute(&app, args),
            Commands::List(args) => list::execute(&app, args).await,
            Commands::Ls(args) => ls::execute(&app, args).await,
            Commands::Cat(args) => cat::execute(&app, args).await,
            Commands::Write(args) => write::execute(&app, args).await,
            Commands::Rm(args) => rm::execute(&app, args).await,
            Commands::Watch(args) => watch::execute(&app, args).await,
            Commands::Edit(args) => edit::execute(&app, args).await,
            Commands::Open(args) => open::execute(&app, args).await,
        }
    })
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    #[cfg(feature = "tokio-console")]
    {
        use tracing_subscriber::Layer;

        let console_layer = console_subscriber::ConsoleLayer::builder()
            .with_default_env()
            .spawn();
        tracing_subscriber::registry()
            .with(console_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_filter(
                        EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
                    ),
            )
            .init();
    }

    #[cfg(not(feature = "tokio-console"))]
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map an error to an exit code by inspecting the typed errors in its chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(access_err) = cause.downcast_ref::<AccessError>() {
            match access_err {
                AccessError::AccessDenied { .. } => return exit_code::PERMISSION_DENIED,
                AccessError::Coordination(
                    CoordinationError::Timeout { .. } | CoordinationError::RelinquishTimeout { .. },
                ) => return exit_code::BUSY,
                AccessError::Io { source, .. } => {
                    if let Some(code) = io_exit_code(source) {
                        return code;
                    }
                }
                _ => {}
            }
        }

        if let Some(link_err) = cause.downcast_ref::<DeepLinkError>() {
            match link_err {
                DeepLinkError::Cancelled => return exit_code::CANCELLED,
                DeepLinkError::AccessDenied { .. } => return exit_code::PERMISSION_DENIED,
                _ => {}
            }
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && let Some(code) = io_exit_code(io_err)
        {
            return code;
        }
    }

    exit_code::GENERAL_ERROR
}

fn io_exit_code(e: &io::Error) -> Option<u8> {
    match e.kind() {
        io::ErrorKind::NotFound => Some(exit_code::NOT_FOUND),
        io::ErrorKind::PermissionDenied => Some(exit_code::PERMISSION_DENIED),
        _ => None,
    }
}
