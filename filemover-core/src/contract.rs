//! # contract: the wiki collaborator interface
//!
//! Every network-facing operation the transfer engine needs is expressed as a
//! method on the [`Wiki`] trait. One implementation is bound to each corpus: the
//! source wiki the file currently lives on, and the destination repository it is
//! being moved to.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`, so tests and downstream crates can
//!   build a `MockWiki` and drive the whole pipeline without a network.
//! - The mock is exported when the `test-export-mocks` feature is enabled (the
//!   default), so `filemover` tests can use it too.
//!
//! ## Errors
//! - Implementations convert transport, HTTP and API-level failures into a boxed
//!   [`ApiError`]. The engine wraps those in a [`crate::error::TransferError`]
//!   variant that names the transaction step that failed.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

/// Error type for every collaborator call.
pub type ApiError = Box<dyn std::error::Error + Send + Sync>;

/// One historical revision of a file, as shown in its upload log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub timestamp: DateTime<Utc>,
    /// The user who uploaded this revision.
    pub user: String,
    pub width: u32,
    pub height: u32,
    /// Upload summary. May contain newlines.
    pub comment: String,
}

/// Access to one wiki corpus.
///
/// Titles are full page titles including their namespace prefix
/// (`File:Example.jpg`, `Template:Information`). Batch operations return a map
/// keyed by the titles that were passed in; a title missing from the map is
/// treated as having no data.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Wiki: Send + Sync {
    /// Current wikitext of a page.
    async fn page_text(&self, title: &str) -> Result<String, ApiError>;

    /// Replace (or, with `append`, extend) the text of a page.
    async fn edit_page(
        &self,
        title: &str,
        text: &str,
        summary: &str,
        append: bool,
    ) -> Result<(), ApiError>;

    /// Titles of the pages in a category.
    async fn category_members(&self, category: &str) -> Result<Vec<String>, ApiError>;

    /// Categories each page belongs to, namespace prefix included.
    async fn categories_of(
        &self,
        titles: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ApiError>;

    /// Pages that redirect to `title`.
    async fn redirects_to(&self, title: &str) -> Result<Vec<String>, ApiError>;

    /// Whether each page exists.
    async fn exists(&self, titles: &[String]) -> Result<HashMap<String, bool>, ApiError>;

    /// Byte-identical copies of each file that already live in the shared
    /// destination repository.
    async fn find_duplicates_of(
        &self,
        titles: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ApiError>;

    /// Upload log of a file, oldest revision first.
    async fn upload_history_of(&self, title: &str) -> Result<Vec<Revision>, ApiError>;

    /// Download the current binary of a file to `local_path`.
    async fn download_binary(&self, title: &str, local_path: &Path) -> Result<(), ApiError>;

    /// Upload `local_path` as `dest_title` with the given description page text.
    async fn upload_binary(
        &self,
        local_path: &Path,
        dest_title: &str,
        description: &str,
        comment: &str,
    ) -> Result<(), ApiError>;

    /// Structural parse of `raw_text` as preprocessor parse-tree XML.
    ///
    /// `title_context` is the page the text belongs to, or an empty string.
    async fn parse_tree(&self, raw_text: &str, title_context: &str) -> Result<String, ApiError>;
}
