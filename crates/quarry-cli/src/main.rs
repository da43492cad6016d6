//! Quarry - main entry point.
//!
//! Usage: `quarry [page.toml] [response.json ...]`
//!
//! Loads a page, prints the request each source would send and, when
//! response files are given, replays them through the page and prints the
//! resulting grids and maps.

use std::path::PathBuf;
use std::sync::Arc;

use quarry_cli::{grid_summary, map_summary, outcome_line, FixtureBackend};
use quarry_core::{default_page_path, PageConfig};
use quarry_engine::{BuiltQuery, LogNotifier, Page};

// =============================================================================
// Configuration
// =============================================================================

/// Page file from the first argument, else the default location.
fn page_path(arg: Option<String>) -> Result<PathBuf, String> {
    match arg {
        Some(path) => Ok(PathBuf::from(path)),
        None => default_page_path().map_err(|e| e.to_string()),
    }
}

// =============================================================================
// Commands
// =============================================================================

fn print_requests(page: &Page) {
    for id in page.widgets().sources.list() {
        let Some(source) = page.source(&id) else {
            continue;
        };
        match source.build_request() {
            BuiltQuery::Request(request) => match serde_json::to_string_pretty(&request) {
                Ok(json) => println!("== {} ==\n{}", id, json),
                Err(e) => tracing::error!("Failed to serialize request for '{}': {}", id, e),
            },
            BuiltQuery::NoQuery => println!("== {} ==\n(waiting for a row selection)", id),
        }
    }
}

async fn replay(page: &Page) {
    let outcomes = page.populate_all().await;
    for (source, outcome) in &outcomes {
        println!("{}", outcome_line(source, outcome));
    }
    for id in page.widgets().grids.list() {
        if let Some(grid) = page.grid(&id) {
            print!("{}", grid_summary(&grid));
        }
    }
    for id in page.widgets().maps.list() {
        if let Some(map) = page.map(&id) {
            print!("{}", map_summary(&map));
        }
    }
}

fn run() -> Result<(), String> {
    let mut args = std::env::args().skip(1);
    let path = page_path(args.next())?;
    let responses: Vec<String> = args.collect();

    let config = PageConfig::load(&path).map_err(|e| e.to_string())?;
    let backend =
        Arc::new(FixtureBackend::from_files(responses.as_slice()).map_err(|e| e.to_string())?);
    let page = Page::build(config, backend.clone(), Arc::new(LogNotifier));
    for error in page.skipped() {
        eprintln!("warning: {}", error);
    }

    print_requests(&page);
    if responses.is_empty() {
        return Ok(());
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;
    rt.block_on(replay(&page));

    if backend.remaining() > 0 {
        tracing::warn!("{} fixture response(s) were not used", backend.remaining());
    }
    Ok(())
}

// =============================================================================
// Entry Point
// =============================================================================

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
