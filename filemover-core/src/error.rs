//! Per-file failure taxonomy for the transfer engine.
//!
//! A failure never aborts a batch: the executor records it against the file and
//! moves on. The variant says how far the transaction got, which decides what a
//! human has to clean up afterwards.

use thiserror::Error;

use crate::contract::ApiError;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The description page could not be structurally parsed.
    #[error("could not parse {title}: {reason}")]
    Parse { title: String, reason: String },

    /// No free destination name was found within the attempt cap.
    #[error("no free destination name for {title} after {attempts} attempts")]
    NameResolutionExhausted { title: String, attempts: usize },

    /// Download or upload failed. Nothing was written at either corpus.
    #[error("publishing {title} failed: {source}")]
    Publish {
        title: String,
        #[source]
        source: ApiError,
    },

    /// The file is live at the destination but the source page was not marked
    /// as moved. Not retried: a second publish would duplicate the copy.
    #[error("{title} was published as {destination} but annotating the source failed: {source}")]
    Annotation {
        title: String,
        destination: String,
        #[source]
        source: ApiError,
    },

    /// A collaborator query outside the publish/annotate steps failed.
    #[error("wiki request for {title} failed: {source}")]
    Api {
        title: String,
        #[source]
        source: ApiError,
    },

    /// The local staging area could not be prepared.
    #[error("staging {title} failed: {source}")]
    Staging {
        title: String,
        #[source]
        source: std::io::Error,
    },

    /// The batch was stopped before this file was started.
    #[error("transfer of {title} was cancelled")]
    Cancelled { title: String },
}

impl TransferError {
    /// True when the file already exists at the destination despite the error.
    pub fn is_published(&self) -> bool {
        matches!(self, TransferError::Annotation { .. })
    }

    /// The source title the failure belongs to.
    pub fn title(&self) -> &str {
        match self {
            TransferError::Parse { title, .. }
            | TransferError::NameResolutionExhausted { title, .. }
            | TransferError::Publish { title, .. }
            | TransferError::Annotation { title, .. }
            | TransferError::Api { title, .. }
            | TransferError::Staging { title, .. }
            | TransferError::Cancelled { title } => title,
        }
    }

    pub(crate) fn api(title: &str, source: ApiError) -> Self {
        TransferError::Api {
            title: title.to_string(),
            source,
        }
    }
}
