//! # filemover CLI
//!
//! Command parsing and orchestration only. The transfer engine lives in
//! `filemover-core`; this module loads the configuration, builds one
//! [`MediaWikiClient`] per corpus and hands both to a [`Transferer`].
//!
//! ## Subcommands
//! - `transfer <titles...>`: move the named files.
//! - `category <name>`: move every eligible file in a source category.
//!
//! Both accept `--dry-run` (render only, print the generated pages) and
//! `--force` (skip the category check; duplicates are still skipped).
//! Ctrl-C stops the batch before its next file starts.

use crate::client::MediaWikiClient;
use crate::load_config::load_config;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use filemover_core::transfer::{BatchControl, TransferReport, TransferState, Transferer};
use std::fmt::Write as _;
use std::path::PathBuf;

/// CLI for filemover: move media files and their description pages to a shared repository.
#[derive(Parser)]
#[clap(
    name = "filemover",
    version,
    about = "Transfer media files from a wiki to a shared media repository"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transfer the given file titles
    Transfer {
        #[clap(flatten)]
        options: RunOptions,
        /// Source file titles, e.g. "File:Example.jpg"
        #[clap(required = true)]
        titles: Vec<String>,
    },
    /// Transfer every eligible file in a source category
    Category {
        #[clap(flatten)]
        options: RunOptions,
        /// Category name, with or without the "Category:" prefix
        category: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunOptions {
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,
    /// Render description pages without writing to either wiki
    #[clap(long)]
    pub dry_run: bool,
    /// Ignore the category allow/deny lists
    #[clap(long)]
    pub force: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let (options, target) = match &cli.command {
        Commands::Transfer { options, titles } => (options, Target::Titles(titles.clone())),
        Commands::Category { options, category } => (options, Target::Category(category.clone())),
    };

    let loaded = load_config(&options.config)?;
    let mut config = loaded.transfer;
    config.dry_run |= options.dry_run;
    config.ignore_filter |= options.force;

    let source = MediaWikiClient::new(loaded.endpoints.source_api_url.clone())
        .map_err(|e| anyhow::anyhow!("Failed to build source client: {e}"))?;
    let destination = MediaWikiClient::new(loaded.endpoints.destination_api_url.clone())
        .map_err(|e| anyhow::anyhow!("Failed to build destination client: {e}"))?;

    let control = BatchControl::new();
    let on_interrupt = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("[TRANSFER] Interrupted, finishing files already started");
            on_interrupt.stop();
        }
    });

    let transferer = Transferer::new(&source, &destination, &config).with_control(control);
    let result = match target {
        Target::Titles(titles) => transferer.transfer(&titles).await,
        Target::Category(category) => transferer.transfer_category(&category).await,
    };
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Transfer batch failed");
            return Err(anyhow::Error::msg(format!("Transfer batch failed: {e}")));
        }
    };

    print!("{}", summarize(&report, config.dry_run));

    let failed = report.failed().count();
    let follow_up = report.needs_follow_up().count();
    if failed > 0 || follow_up > 0 {
        return Err(anyhow::anyhow!(
            "{failed} file(s) failed, {follow_up} need manual follow-up"
        ));
    }
    Ok(())
}

enum Target {
    Titles(Vec<String>),
    Category(String),
}

/// Human-readable report. Dry runs include every rendered page.
pub fn summarize(report: &TransferReport, dry_run: bool) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        let destination = outcome.destination_title.as_deref().unwrap_or("-");
        let _ = write!(out, "{:<10} {} -> {}", state_label(outcome.state), outcome.source_title, destination);
        if let Some(error) = &outcome.error {
            let _ = write!(out, " ({error})");
        }
        out.push('\n');
        if dry_run {
            if let Some(rendered) = &outcome.rendered {
                let _ = writeln!(out, "{rendered}");
            }
        }
    }
    for skipped in &report.skipped {
        let _ = writeln!(out, "{:<10} {skipped}", "skipped");
    }
    let _ = writeln!(
        out,
        "{} transferred, {} failed, {} need follow-up, {} skipped",
        report.succeeded().count(),
        report.failed().count(),
        report.needs_follow_up().count(),
        report.skipped.len()
    );
    out
}

fn state_label(state: TransferState) -> &'static str {
    match state {
        TransferState::Pending => "pending",
        TransferState::Parsed => "parsed",
        TransferState::Rewritten => "rewritten",
        TransferState::Rendered => "rendered",
        TransferState::Published => "published",
        TransferState::Annotated => "done",
        TransferState::Failed => "failed",
    }
}
