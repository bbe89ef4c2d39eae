//! List command - show bookmarked locations.
//!
//! # Examples
//!
//! ```bash
//! # Table of bookmarks
//! inplace list
//!
//! # Include version control status for items in a git work tree
//! inplace list --status
//!
//! # Show which tool stores each item
//! inplace list --source
//!
//! # Script-friendly output
//! inplace list --json | jq '.[].path'
//! ```

use std::sync::Arc;

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::Cell;
use serde::Serialize;
use tracing::{debug, instrument};

use inplace_core::{Capability, ErrorCategory, GitServices, LocationRef, ServiceDirectory};

use super::App;
use crate::output::{create_table, format_kind, format_name};

#[derive(ClapArgs)]
pub struct Args {
    /// Show change status from the location's version control
    #[arg(short, long)]
    pub status: bool,

    /// Show the application or tool that stores each location
    #[arg(long)]
    pub source: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct EntryInfo {
    index: usize,
    name: String,
    path: String,
    is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

#[instrument(level = "info", name = "cmd::list", skip_all)]
pub async fn execute(app: &App, args: &Args) -> Result<()> {
    let locations = app.bookmarks().locations();
    let services = GitServices::new(Arc::clone(app.env().grantor()));

    let mut entries = Vec::with_capacity(locations.len());
    for (i, location) in locations.iter().enumerate() {
        let status = if args.status {
            Some(status_of(&services, location).await)
        } else {
            None
        };
        let source = if args.source {
            Some(source_of(&services, location).await)
        } else {
            None
        };
        entries.push(EntryInfo {
            index: i + 1,
            name: format_name(location),
            path: location.path().display().to_string(),
            is_dir: location.is_dir(),
            status,
            source,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No locations. Add one with `inplace add PATH`.");
        return Ok(());
    }

    let mut table = create_table();
    let mut header = vec!["#", "Name", "Kind", "Path"];
    if args.status {
        header.push("Status");
    }
    if args.source {
        header.push("Source");
    }
    table.set_header(header);

    for (entry, location) in entries.into_iter().zip(&locations) {
        let mut row = vec![
            Cell::new(entry.index),
            Cell::new(entry.name),
            Cell::new(format_kind(location)),
            Cell::new(entry.path),
        ];
        if let Some(status) = entry.status {
            row.push(Cell::new(status));
        }
        if let Some(source) = entry.source {
            row.push(Cell::new(source));
        }
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}

/// Status column text. Locations without a status service show a dash.
async fn status_of(services: &GitServices, location: &LocationRef) -> String {
    let service = match services.status_service(location).await {
        Ok(Capability::Bound(service)) => service,
        Ok(Capability::Unsupported) => return "-".to_string(),
        Err(e) if e.category() == ErrorCategory::Silent => return "-".to_string(),
        Err(e) => return format!("error: {e}"),
    };

    match service.fetch_status().await {
        Ok(summary) => summary.to_string(),
        Err(e) => {
            debug!(path = %location, error = %e, "Status unavailable");
            match e.category() {
                ErrorCategory::Silent => "-".to_string(),
                _ => format!("error: {e}"),
            }
        }
    }
}

/// Source column text: application name and version, or a dash.
async fn source_of(services: &GitServices, location: &LocationRef) -> String {
    let service = match services.document_source_service(location).await {
        Ok(Capability::Bound(service)) => service,
        Ok(Capability::Unsupported) => return "-".to_string(),
        Err(e) if e.category() == ErrorCategory::Silent => return "-".to_string(),
        Err(e) => return format!("error: {e}"),
    };

    match service.document_source().await {
        Ok(info) => match info.app_version {
            Some(version) => format!("{} {version}", info.app_name),
            None => info.app_name,
        },
        Err(e) => {
            debug!(path = %location, error = %e, "Document source unavailable");
            "-".to_string()
        }
    }
}
