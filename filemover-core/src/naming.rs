//! Picks a destination title that is not already taken.
//!
//! A free title is used unchanged. A taken one gets a random number inserted
//! before the extension (`File:X.jpg` -> `File:X 482913.jpg`) and is probed
//! again, up to a fixed number of attempts.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::contract::Wiki;
use crate::error::TransferError;

type SuffixFn = dyn Fn() -> u32 + Send + Sync;

#[derive(Clone)]
pub struct NameResolver {
    max_attempts: usize,
    suffix: Arc<SuffixFn>,
}

impl NameResolver {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            suffix: Arc::new(|| rand::random_range(1_000u32..1_000_000)),
        }
    }

    /// Replace the random suffix source, e.g. with a fixed sequence.
    pub fn with_suffixes(mut self, suffix: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.suffix = Arc::new(suffix);
        self
    }

    /// Resolve every title. One batch probe, then per-title retries for conflicts.
    pub async fn resolve<W>(&self, destination: &W, titles: &[String]) -> BTreeMap<String, Result<String, TransferError>>
    where
        W: Wiki + ?Sized,
    {
        let mut resolved = BTreeMap::new();
        if titles.is_empty() {
            return resolved;
        }
        let taken = match destination.exists(titles).await {
            Ok(taken) => taken,
            Err(e) => {
                let message = e.to_string();
                for title in titles {
                    resolved.insert(
                        title.clone(),
                        Err(TransferError::api(title, message.clone().into())),
                    );
                }
                return resolved;
            }
        };
        for title in titles {
            let outcome = if taken.get(title).copied().unwrap_or(false) {
                self.permute(destination, title).await
            } else {
                Ok(title.clone())
            };
            resolved.insert(title.clone(), outcome);
        }
        resolved
    }

    /// Resolve a single title.
    pub async fn resolve_one<W>(&self, destination: &W, title: &str) -> Result<String, TransferError>
    where
        W: Wiki + ?Sized,
    {
        if self.is_free(destination, title).await? {
            return Ok(title.to_string());
        }
        self.permute(destination, title).await
    }

    async fn permute<W>(&self, destination: &W, title: &str) -> Result<String, TransferError>
    where
        W: Wiki + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = with_suffix(title, (self.suffix)());
            if self.is_free(destination, &candidate).await? {
                info!(title, candidate = %candidate, attempt, "[RESOLVE] Destination name taken, using permutation");
                return Ok(candidate);
            }
        }
        warn!(title, attempts = self.max_attempts, "[RESOLVE] No free destination name found");
        Err(TransferError::NameResolutionExhausted {
            title: title.to_string(),
            attempts: self.max_attempts,
        })
    }

    async fn is_free<W>(&self, destination: &W, title: &str) -> Result<bool, TransferError>
    where
        W: Wiki + ?Sized,
    {
        let probe = vec![title.to_string()];
        let exists = destination
            .exists(&probe)
            .await
            .map_err(|e| TransferError::api(title, e))?;
        Ok(!exists.get(title).copied().unwrap_or(false))
    }
}

/// `File:X.jpg` + 42 -> `File:X 42.jpg`
pub fn with_suffix(title: &str, suffix: u32) -> String {
    match title.rfind('.') {
        Some(dot) if dot > title.rfind(':').map_or(0, |c| c + 1) => {
            format!("{} {}{}", &title[..dot], suffix, &title[dot..])
        }
        _ => format!("{title} {suffix}"),
    }
}
