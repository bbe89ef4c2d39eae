//! Open command - handle an `x-callback-url` open request.
//!
//! ```text
//! <scheme>://x-callback-url/open-in-place?root=<dir>&path=<relative>[&on-success=<url>][&on-error=<url>]
//! ```
//!
//! When `root` has not been granted before, the directory is asked for on
//! stdin and remembered for later requests. Output is one line per action:
//! `open <path>` for the item to present and `reply <url>` for each
//! callback to hand back to the requesting application.
//!
//! # Examples
//!
//! ```bash
//! inplace open 'inplace://x-callback-url/open-in-place?root=/Team/Docs&path=notes/todo.md'
//! ```

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Args as ClapArgs;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, instrument};
use url::Url;

use inplace_core::{DeepLinkError, DeepLinkRegistry, LinkDelegate, LocationRef, RequestId};

use super::App;

#[derive(ClapArgs)]
pub struct Args {
    /// The callback URL
    pub url: String,
}

/// Prints what the registry asks the application to do.
#[derive(Default)]
struct CliDelegate {
    picks: Vec<(RequestId, PathBuf)>,
    failure: Option<anyhow::Error>,
}

impl LinkDelegate for CliDelegate {
    fn open(&mut self, location: LocationRef) {
        println!("open {location}");
    }

    fn pick_directory(&mut self, request: RequestId, suggested_root: &Path) {
        self.picks.push((request, suggested_root.to_path_buf()));
    }

    fn open_reply(&mut self, url: Url) -> bool {
        println!("reply {url}");
        true
    }

    fn show_error(&mut self, error: &DeepLinkError) {
        self.failure.get_or_insert_with(|| detach(error));
    }
}

/// Owned copy of a borrowed error, keeping the variants exit codes depend on.
fn detach(error: &DeepLinkError) -> anyhow::Error {
    match error {
        DeepLinkError::Cancelled => DeepLinkError::Cancelled.into(),
        DeepLinkError::MissingParameters => DeepLinkError::MissingParameters.into(),
        DeepLinkError::AccessDenied { path } => {
            DeepLinkError::AccessDenied { path: path.clone() }.into()
        }
        other => anyhow!("{other}"),
    }
}

#[instrument(level = "info", name = "cmd::open", skip_all)]
pub async fn execute(app: &App, args: &Args) -> Result<()> {
    let url = Url::parse(&args.url).with_context(|| format!("Invalid URL: {}", args.url))?;

    let mut registry = DeepLinkRegistry::new(app.roots(), Arc::clone(app.env().grantor()))
        .with_app_name(app.app_name());
    let mut delegate = CliDelegate::default();

    if !registry.handle_url(&url, &mut delegate) {
        bail!("Not an open-in-place request: {url}");
    }

    let mut stdin = BufReader::new(tokio::io::stdin());
    for (id, suggested) in std::mem::take(&mut delegate.picks) {
        let picked = prompt_directory(&mut stdin, &suggested).await?;
        debug!(request = id, picked = picked.is_some(), "Root pick answered");
        registry.complete_pick(id, picked, &mut delegate)?;
    }

    match delegate.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Ask for the directory standing in for `suggested`. An empty answer or
/// end of input cancels.
async fn prompt_directory<R>(input: &mut R, suggested: &Path) -> Result<Option<LocationRef>>
where
    R: AsyncBufRead + Unpin,
{
    eprint!("Directory for {} (empty to cancel): ", suggested.display());
    std::io::stderr().flush()?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .await
        .context("Failed to read directory from stdin")?;
    let answer = line.trim();
    if answer.is_empty() {
        return Ok(None);
    }

    let path = std::path::absolute(answer).with_context(|| format!("Invalid path: {answer}"))?;
    let location = LocationRef::inspect(&path)
        .with_context(|| format!("Cannot use {}", path.display()))?;
    if !location.is_dir() {
        bail!("Not a directory: {location}");
    }
    Ok(Some(location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prompt_directory() {
        let dir = TempDir::new().unwrap();
        let answer = format!("{}\n", dir.path().display());

        let picked = prompt_directory(&mut answer.as_bytes(), Path::new("/Team/Docs"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.path(), dir.path());
        assert!(picked.is_dir());

        let cancelled = prompt_directory(&mut "\n".as_bytes(), Path::new("/Team/Docs"))
            .await
            .unwrap();
        assert!(cancelled.is_none());

        let eof = prompt_directory(&mut "".as_bytes(), Path::new("/Team/Docs"))
            .await
            .unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn test_prompt_rejects_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "a").unwrap();
        let answer = format!("{}\n", file.display());

        assert!(
            prompt_directory(&mut answer.as_bytes(), Path::new("/Team"))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_detach_keeps_cancellation() {
        let e = detach(&DeepLinkError::Cancelled);
        assert!(matches!(
            e.downcast_ref::<DeepLinkError>(),
            Some(DeepLinkError::Cancelled)
        ));
    }
}
