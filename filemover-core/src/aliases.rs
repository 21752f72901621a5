//! # aliases: template redirect index
//!
//! For a canonical template title, collects every redirect that points at it
//! and compiles one case-insensitive regex matching an invocation of any of
//! those names, parameters and nested templates included.
//!
//! Entries are cached in an [`AliasIndex`] that callers create per batch run
//! and share across files. The cache is never invalidated: a redirect created
//! upstream after the first lookup is only seen by a fresh index.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::try_join_all;
use regex::Regex;
use tracing::{debug, info};

use crate::contract::{ApiError, Wiki};
use crate::tree::normalize_title;

const TEMPLATE_NAMESPACE: &str = "Template:";

/// Redirect set and invocation pattern of one canonical template.
#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub canonical: String,
    /// Every name the template answers to, the canonical one included.
    pub aliases: BTreeSet<String>,
    pub pattern: Regex,
}

/// Process-wide cache of [`AliasEntry`] values keyed by canonical title.
///
/// Cloning shares the cache. Concurrent first lookups of the same title may
/// both hit the wiki; the first entry stored wins.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    cache: Arc<DashMap<String, Arc<AliasEntry>>>,
}

impl AliasIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub async fn entry_for<W>(&self, wiki: &W, canonical: &str) -> Result<Arc<AliasEntry>, ApiError>
    where
        W: Wiki + ?Sized,
    {
        let canonical = normalize_title(strip_namespace(canonical));
        if let Some(hit) = self.cache.get(&canonical).map(|r| r.value().clone()) {
            return Ok(hit);
        }

        let redirects = wiki
            .redirects_to(&format!("{TEMPLATE_NAMESPACE}{canonical}"))
            .await?;
        let mut aliases: BTreeSet<String> = redirects
            .iter()
            .map(|r| normalize_title(strip_namespace(r)))
            .filter(|r| !r.is_empty())
            .collect();
        aliases.insert(canonical.clone());

        let pattern = build_pattern(aliases.iter().map(String::as_str))?;
        info!(canonical = %canonical, aliases = aliases.len(), "[ALIASES] Indexed template redirects");
        debug!(canonical = %canonical, pattern = %pattern, "[ALIASES] Compiled invocation pattern");

        let entry = Arc::new(AliasEntry {
            canonical: canonical.clone(),
            aliases,
            pattern,
        });
        Ok(self.cache.entry(canonical).or_insert(entry).value().clone())
    }

    /// Regex matching any invocation of `canonical` under any of its names.
    pub async fn regex_for<W>(&self, wiki: &W, canonical: &str) -> Result<Regex, ApiError>
    where
        W: Wiki + ?Sized,
    {
        Ok(self.entry_for(wiki, canonical).await?.pattern.clone())
    }

    /// Alias-to-canonical lookup table over several canonical titles.
    pub async fn canonical_table<W>(&self, wiki: &W, canonicals: &[String]) -> Result<CanonicalTable, ApiError>
    where
        W: Wiki + ?Sized,
    {
        let entries = try_join_all(canonicals.iter().map(|c| self.entry_for(wiki, c))).await?;
        let mut table = CanonicalTable::default();
        for entry in entries {
            for alias in &entry.aliases {
                table.insert(alias, &entry.canonical);
            }
        }
        Ok(table)
    }
}

/// Maps any known alias to its canonical template title.
#[derive(Debug, Clone, Default)]
pub struct CanonicalTable {
    map: HashMap<String, String>,
}

impl CanonicalTable {
    pub fn insert(&mut self, alias: &str, canonical: &str) {
        self.map.insert(alias_key(alias), canonical.to_string());
    }

    pub fn canonical(&self, title: &str) -> Option<&str> {
        self.map.get(&alias_key(title)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One alternation over all `names`, tolerant of whitespace, parameters and
/// nested invocations up to the closing braces.
pub fn build_pattern<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Regex, regex::Error> {
    let mut alternatives: Vec<String> = names
        .into_iter()
        .map(|name| {
            regex::escape(strip_namespace(name))
                .replace([' ', '_'], "[ _]")
        })
        .collect();
    alternatives.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    alternatives.dedup();
    let pattern = format!(
        r"(?si)\{{\{{\s*(?:{})\s*(?:\|(?:\{{\{{.*?\}}\}}|.)*?)?\}}\}}",
        alternatives.join("|")
    );
    Regex::new(&pattern)
}

pub(crate) fn strip_namespace(title: &str) -> &str {
    let trimmed = title.trim();
    match trimmed.get(..TEMPLATE_NAMESPACE.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(TEMPLATE_NAMESPACE) => {
            trimmed[TEMPLATE_NAMESPACE.len()..].trim_start()
        }
        _ => trimmed,
    }
}

fn alias_key(title: &str) -> String {
    normalize_title(strip_namespace(title)).to_lowercase()
}
