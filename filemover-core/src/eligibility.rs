//! Decides which candidate files may be transferred.
//!
//! Stage one drops files that already have a byte-identical copy at the
//! destination. This stage always runs. Stage two keeps files in at least one
//! allowed category and in no denied category; `ignore_filter` skips it.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::config::EligibilityPolicy;
use crate::contract::{ApiError, Wiki};

const CATEGORY_NAMESPACE: &str = "Category:";

pub struct EligibilityFilter {
    allow: BTreeSet<String>,
    deny: BTreeSet<String>,
}

impl EligibilityFilter {
    pub fn new(policy: &EligibilityPolicy) -> Self {
        Self {
            allow: policy.allow_categories.iter().map(|c| category_key(c)).collect(),
            deny: policy.deny_categories.iter().map(|c| category_key(c)).collect(),
        }
    }

    /// Eligible subset of `titles`, in input order.
    pub async fn filter<W>(&self, source: &W, titles: &[String], ignore_filter: bool) -> Result<Vec<String>, ApiError>
    where
        W: Wiki + ?Sized,
    {
        if titles.is_empty() {
            return Ok(Vec::new());
        }

        let duplicates = source.find_duplicates_of(titles).await?;
        let unique: Vec<String> = titles
            .iter()
            .filter(|title| match duplicates.get(*title) {
                Some(copies) if !copies.is_empty() => {
                    info!(title = %title, copies = ?copies, "[ELIGIBILITY] Skipping file with a duplicate at the destination");
                    false
                }
                _ => true,
            })
            .cloned()
            .collect();

        if ignore_filter || unique.is_empty() {
            return Ok(unique);
        }

        let categories = source.categories_of(&unique).await?;
        let eligible: Vec<String> = unique
            .into_iter()
            .filter(|title| {
                let member_of: BTreeSet<String> = categories
                    .get(title)
                    .map(|cats| cats.iter().map(|c| category_key(c)).collect())
                    .unwrap_or_default();
                let allowed = !member_of.is_disjoint(&self.allow);
                let denied = !member_of.is_disjoint(&self.deny);
                debug!(title = %title, allowed, denied, "[ELIGIBILITY] Category check");
                allowed && !denied
            })
            .collect();

        info!(
            candidates = titles.len(),
            eligible = eligible.len(),
            "[ELIGIBILITY] Filtered candidates"
        );
        Ok(eligible)
    }
}

fn category_key(category: &str) -> String {
    let trimmed = category.trim();
    let bare = match trimmed.get(..CATEGORY_NAMESPACE.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(CATEGORY_NAMESPACE) => &trimmed[CATEGORY_NAMESPACE.len()..],
        _ => trimmed,
    };
    crate::tree::normalize_title(bare)
}
