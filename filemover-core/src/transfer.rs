//! High-level pipeline: moves a batch of files from the source wiki to the destination.
//!
//! For every candidate the executor runs one transaction:
//!   - eligibility check and destination name resolution (for the whole batch up front)
//!   - parse the source description page into a template tree
//!   - rewrite the tree and render the destination description page
//!   - download the binary into the staging area and upload it with the new page
//!   - mark the source page as moved and strip its transfer request
//!
//! # Major Types
//! - [`Transferer`]: binds the two wikis, the config and the shared alias cache
//! - [`TransferReport`]: per-file [`TransferOutcome`]s plus the titles that were not eligible
//! - [`BatchControl`]: cooperative stop flag, checked between files
//!
//! # Error Handling
//! A file that fails is recorded and the batch continues. Only collaborator
//! failures that affect the whole batch (the eligibility queries, the alias
//! lookups) end [`Transferer::transfer`] early. A file that is published but
//! whose source page could not be annotated stays in state
//! [`TransferState::Published`] and is never retried automatically.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::aliases::{AliasIndex, CanonicalTable};
use crate::config::TransferConfig;
use crate::contract::{ApiError, Revision, Wiki};
use crate::describe;
use crate::eligibility::EligibilityFilter;
use crate::error::TransferError;
use crate::naming::NameResolver;
use crate::parse::parse;
use crate::rewrite::Rewriter;
use crate::tree::ParsedItem;

/// Where a file's transaction ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Parsed,
    Rewritten,
    Rendered,
    Published,
    Annotated,
    Failed,
}

/// One file being moved.
#[derive(Debug, Clone)]
pub struct TransferCandidate {
    pub source_title: String,
    pub destination_title: String,
    pub upload_history: Vec<Revision>,
    pub parse_tree: Option<ParsedItem>,
}

impl TransferCandidate {
    pub fn new(source_title: impl Into<String>, destination_title: impl Into<String>) -> Self {
        Self {
            source_title: source_title.into(),
            destination_title: destination_title.into(),
            upload_history: Vec::new(),
            parse_tree: None,
        }
    }

    /// The user who uploaded the oldest revision.
    pub fn original_uploader(&self) -> Option<&str> {
        self.upload_history
            .iter()
            .min_by_key(|r| r.timestamp)
            .map(|r| r.user.as_str())
    }
}

#[derive(Debug)]
pub struct TransferOutcome {
    pub source_title: String,
    pub destination_title: Option<String>,
    pub state: TransferState,
    /// Generated description page, once rendered.
    pub rendered: Option<String>,
    pub error: Option<TransferError>,
}

impl TransferOutcome {
    fn new(source_title: &str) -> Self {
        Self {
            source_title: source_title.to_string(),
            destination_title: None,
            state: TransferState::Pending,
            rendered: None,
            error: None,
        }
    }

    fn fail(mut self, error: TransferError) -> Self {
        error!(source_title = %self.source_title, state = ?self.state, error = %error, "[TRANSFER][ERROR] Transfer failed");
        self.state = TransferState::Failed;
        self.error = Some(error);
        self
    }

    /// Published at the destination, but the source still lacks its moved notice.
    pub fn needs_follow_up(&self) -> bool {
        self.state == TransferState::Published && self.error.is_some()
    }
}

#[derive(Debug, Default)]
pub struct TransferReport {
    pub outcomes: Vec<TransferOutcome>,
    /// Candidates rejected by the eligibility filter.
    pub skipped: Vec<String>,
}

impl TransferReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_none() && o.state != TransferState::Failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes.iter().filter(|o| o.state == TransferState::Failed)
    }

    pub fn needs_follow_up(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes.iter().filter(|o| o.needs_follow_up())
    }
}

/// Stops a running batch before its next file starts.
#[derive(Debug, Clone, Default)]
pub struct BatchControl {
    stopped: Arc<AtomicBool>,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub struct Transferer<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    destination: &'a D,
    config: &'a TransferConfig,
    aliases: AliasIndex,
    resolver: NameResolver,
    control: BatchControl,
}

/// Per-batch lookups shared by every file.
struct BatchContext {
    table: CanonicalTable,
    request_pattern: Regex,
    staging_dir: PathBuf,
}

impl<'a, S, D> Transferer<'a, S, D>
where
    S: Wiki + ?Sized,
    D: Wiki + ?Sized,
{
    pub fn new(source: &'a S, destination: &'a D, config: &'a TransferConfig) -> Self {
        Self {
            source,
            destination,
            config,
            aliases: AliasIndex::new(),
            resolver: NameResolver::new(config.max_name_attempts),
            control: BatchControl::new(),
        }
    }

    /// Share an alias cache across batches.
    pub fn with_aliases(mut self, aliases: AliasIndex) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_resolver(mut self, resolver: NameResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_control(mut self, control: BatchControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> &BatchControl {
        &self.control
    }

    /// Transfer every eligible member of a source category.
    pub async fn transfer_category(&self, category: &str) -> Result<TransferReport, ApiError> {
        info!(category, "[TRANSFER] Listing category members");
        let titles = self.source.category_members(category).await?;
        self.transfer(&titles).await
    }

    /// Transfer the given source file titles.
    ///
    /// A title named more than once is transferred once.
    pub async fn transfer(&self, titles: &[String]) -> Result<TransferReport, ApiError> {
        let mut seen = BTreeSet::new();
        let titles: Vec<String> = titles.iter().filter(|t| seen.insert(t.as_str())).cloned().collect();
        info!(candidates = titles.len(), dry_run = self.config.dry_run, "[TRANSFER] Starting batch");

        let filter = EligibilityFilter::new(&self.config.eligibility);
        let eligible = filter
            .filter(self.source, &titles, self.config.ignore_filter)
            .await?;
        let skipped: Vec<String> = titles.iter().filter(|t| !eligible.contains(t)).cloned().collect();
        if eligible.is_empty() {
            info!(skipped = skipped.len(), "[TRANSFER] Nothing eligible to transfer");
            return Ok(TransferReport {
                outcomes: Vec::new(),
                skipped,
            });
        }

        let roles = &self.config.templates;
        let context = BatchContext {
            table: self.aliases.canonical_table(self.source, &roles.all_canonical()).await?,
            request_pattern: self.aliases.regex_for(self.source, &roles.transfer_request).await?,
            staging_dir: self
                .config
                .staging_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("filemover")),
        };

        let mut names = self.resolver.resolve(self.destination, &eligible).await;
        let jobs: Vec<(String, Result<String, TransferError>)> = eligible
            .into_iter()
            .map(|title| {
                let name = names.remove(&title).unwrap_or_else(|| {
                    Err(TransferError::api(&title, "no destination name was resolved".into()))
                });
                (title, name)
            })
            .collect();

        let context = &context;
        let outcomes: Vec<TransferOutcome> = stream::iter(jobs)
            .map(move |(title, name)| self.transfer_one(context, title, name))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let report = TransferReport { outcomes, skipped };
        info!(
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            follow_up = report.needs_follow_up().count(),
            skipped = report.skipped.len(),
            "[TRANSFER] Batch complete"
        );
        Ok(report)
    }

    async fn transfer_one(
        &self,
        context: &BatchContext,
        title: String,
        name: Result<String, TransferError>,
    ) -> TransferOutcome {
        let mut outcome = TransferOutcome::new(&title);
        if self.control.is_stopped() {
            warn!(source_title = %title, "[TRANSFER] Batch stopped, not starting file");
            return outcome.fail(TransferError::Cancelled { title });
        }
        let destination_title = match name {
            Ok(name) => name,
            Err(e) => return outcome.fail(e),
        };
        outcome.destination_title = Some(destination_title.clone());
        let mut candidate = TransferCandidate::new(title.clone(), destination_title.clone());

        // Pending -> Parsed
        let page_text = match self.source.page_text(&title).await {
            Ok(text) => text,
            Err(e) => return outcome.fail(TransferError::api(&title, e)),
        };
        candidate.upload_history = match self.source.upload_history_of(&title).await {
            Ok(history) => history,
            Err(e) => return outcome.fail(TransferError::api(&title, e)),
        };
        let Some(uploader) = candidate.original_uploader().map(str::to_string) else {
            return outcome.fail(TransferError::api(&title, "file has no upload history".into()));
        };
        let mut tree = match parse(self.source, &page_text, &title).await {
            Ok(tree) => tree,
            Err(e) => return outcome.fail(e),
        };
        outcome.state = TransferState::Parsed;
        info!(source_title = %title, state = ?outcome.state, "[TRANSFER] Parsed description page");

        // Parsed -> Rewritten
        let rewriter = Rewriter::new(&self.config.templates, &self.config.source_corpus, &context.table);
        let page = match rewriter.rewrite(self.destination, &mut tree, &uploader).await {
            Ok(page) => page,
            Err(e) => return outcome.fail(TransferError::api(&title, e)),
        };
        candidate.parse_tree = Some(tree);
        outcome.state = TransferState::Rewritten;

        // Rewritten -> Rendered
        let description = describe::render(
            &self.config.source_corpus,
            &page,
            &candidate.upload_history,
            &candidate.source_title,
        );
        outcome.state = TransferState::Rendered;
        debug!(source_title = %title, description = %description, "[TRANSFER] Rendered description page");
        outcome.rendered = Some(description.clone());

        if self.config.dry_run {
            info!(
                source_title = %title,
                destination_title = %destination_title,
                "[TRANSFER] Dry run, stopping after render"
            );
            return outcome;
        }

        // Rendered -> Published
        if let Err(e) = self.publish(context, &candidate, &description).await {
            return outcome.fail(e);
        }
        outcome.state = TransferState::Published;
        info!(source_title = %title, destination_title = %destination_title, "[PUBLISH] Uploaded to destination");

        // Published -> Annotated
        match self.annotate(context, &candidate).await {
            Ok(()) => {
                outcome.state = TransferState::Annotated;
                info!(source_title = %title, destination_title = %destination_title, "[ANNOTATE] Marked source as moved");
            }
            Err(e) => {
                warn!(
                    source_title = %title,
                    destination_title = %destination_title,
                    error = %e,
                    "[ANNOTATE] Published but source not marked as moved; needs manual follow-up"
                );
                outcome.error = Some(e);
            }
        }
        outcome
    }

    async fn publish(&self, context: &BatchContext, candidate: &TransferCandidate, description: &str) -> Result<(), TransferError> {
        let title = candidate.source_title.as_str();
        let staging = |source: std::io::Error| TransferError::Staging {
            title: title.to_string(),
            source,
        };
        tokio::fs::create_dir_all(&context.staging_dir).await.map_err(staging)?;
        let local_path = context.staging_dir.join(staged_name(title));
        reserve(&local_path).await.map_err(staging)?;
        debug!(source_title = title, path = %local_path.display(), "[PUBLISH] Staging binary");

        let result = self.download_and_upload(candidate, &local_path, description).await;
        if let Err(e) = tokio::fs::remove_file(&local_path).await {
            warn!(error = ?e, path = %local_path.display(), "[PUBLISH] Failed to remove staged binary");
        }
        result
    }

    async fn download_and_upload(&self, candidate: &TransferCandidate, local_path: &Path, description: &str) -> Result<(), TransferError> {
        let title = candidate.source_title.as_str();
        let publish = |source: ApiError| TransferError::Publish {
            title: title.to_string(),
            source,
        };
        self.source
            .download_binary(title, local_path)
            .await
            .map_err(publish)?;
        let summary = self.config.upload_summary.replace(
            "{source}",
            &format!("[[{}:{}]]", self.config.source_corpus.interwiki_prefix, title),
        );
        self.destination
            .upload_binary(local_path, &candidate.destination_title, description, &summary)
            .await
            .map_err(publish)
    }

    async fn annotate(&self, context: &BatchContext, candidate: &TransferCandidate) -> Result<(), TransferError> {
        let annotation = |source: ApiError| TransferError::Annotation {
            title: candidate.source_title.clone(),
            destination: candidate.destination_title.clone(),
            source,
        };
        let current = self
            .source
            .page_text(&candidate.source_title)
            .await
            .map_err(annotation)?;
        let mut text = context.request_pattern.replace_all(&current, "").into_owned();
        text.push_str(
            &self
                .config
                .moved_notice
                .replace("{destination}", &candidate.destination_title),
        );
        let summary = self
            .config
            .annotate_summary
            .replace("{destination}", &candidate.destination_title);
        self.source
            .edit_page(&candidate.source_title, &text, &summary, false)
            .await
            .map_err(annotation)
    }
}

/// Collision-resistant staging file name: SHA-256 of the title plus its extension.
pub fn staged_name(title: &str) -> String {
    let digest = hex::encode(Sha256::digest(title.as_bytes()));
    match Path::new(title).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{digest}.{ext}"),
        None => digest,
    }
}

/// Atomically create the staging file, clearing a stale one left by an earlier run.
async fn reserve(path: &Path) -> std::io::Result<()> {
    match create_new(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            warn!(path = %path.display(), "[PUBLISH] Removing stale staged binary");
            tokio::fs::remove_file(path).await?;
            create_new(path).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}

async fn create_new(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}
