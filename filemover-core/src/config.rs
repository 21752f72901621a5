use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// Everything a transfer batch needs besides the two wiki clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub eligibility: EligibilityPolicy,
    pub templates: TemplateRoles,
    pub source_corpus: SourceCorpus,
    /// Where binaries are staged between download and upload.
    /// Defaults to the system temp directory.
    pub staging_dir: Option<PathBuf>,
    /// Number of files processed at once.
    pub concurrency: usize,
    /// Stop after rendering; nothing is written to either wiki.
    pub dry_run: bool,
    /// Skip the category check (duplicate detection still applies).
    pub ignore_filter: bool,
    /// Attempts at a free destination name before giving up.
    pub max_name_attempts: usize,
    /// Appended to the source page once the file is published.
    /// `{destination}` is replaced with the destination title.
    pub moved_notice: String,
    pub upload_summary: String,
    pub annotate_summary: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            eligibility: EligibilityPolicy::default(),
            templates: TemplateRoles::default(),
            source_corpus: SourceCorpus::default(),
            staging_dir: None,
            concurrency: 4,
            dry_run: false,
            ignore_filter: false,
            max_name_attempts: 50,
            moved_notice: "\n{{Now Commons|{destination}}}".to_string(),
            upload_summary: "Transferred from {source}".to_string(),
            annotate_summary: "Transferred to {destination}".to_string(),
        }
    }
}

impl TransferConfig {
    pub fn trace_loaded(&self) {
        info!(
            allow = self.eligibility.allow_categories.len(),
            deny = self.eligibility.deny_categories.len(),
            concurrency = self.concurrency,
            dry_run = self.dry_run,
            "Loaded TransferConfig"
        );
        debug!(?self, "TransferConfig loaded (full debug)");
    }
}

/// Category allow/deny lists. Names may carry the `Category:` prefix or not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityPolicy {
    pub allow_categories: BTreeSet<String>,
    pub deny_categories: BTreeSet<String>,
}

/// Canonical titles of the templates the rewriter treats specially.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateRoles {
    /// The structured metadata block.
    pub information: String,
    /// Authorship/self-license wrapper that needs an `author`.
    pub author_license: String,
    /// Public-domain-by-uploader template at the source.
    pub public_domain_self: String,
    /// What `public_domain_self` becomes at the destination.
    pub public_domain_self_target: String,
    /// The request-to-transfer tag. Never carried over.
    pub transfer_request: String,
    /// Further canonical titles whose redirects are folded.
    pub canonical: Vec<String>,
}

impl Default for TemplateRoles {
    fn default() -> Self {
        Self {
            information: "Information".to_string(),
            author_license: "Self".to_string(),
            public_domain_self: "PD-self".to_string(),
            public_domain_self_target: "PD-user-en".to_string(),
            transfer_request: "Copy to Wikimedia Commons".to_string(),
            canonical: Vec::new(),
        }
    }
}

impl TemplateRoles {
    /// Every canonical title the rewriter needs redirects for.
    pub fn all_canonical(&self) -> Vec<String> {
        let mut all = vec![
            self.information.clone(),
            self.author_license.clone(),
            self.public_domain_self.clone(),
            self.transfer_request.clone(),
        ];
        for extra in &self.canonical {
            if !all.contains(extra) {
                all.push(extra.clone());
            }
        }
        all
    }
}

/// How the source corpus is referred to from the destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCorpus {
    /// Interwiki prefix that links back to the source (`w` for `[[w:...]]`).
    pub interwiki_prefix: String,
    pub language: String,
    pub project: String,
}

impl Default for SourceCorpus {
    fn default() -> Self {
        Self {
            interwiki_prefix: "w".to_string(),
            language: "en".to_string(),
            project: "wikipedia".to_string(),
        }
    }
}

impl SourceCorpus {
    /// `{{User at project|Name|wikipedia|en}}`
    pub fn user_reference(&self, user: &str) -> String {
        format!("{{{{User at project|{}|{}|{}}}}}", user, self.project, self.language)
    }

    /// `{{Transferred from|en.wikipedia}}`
    pub fn provenance(&self) -> String {
        format!("{{{{Transferred from|{}.{}}}}}", self.language, self.project)
    }
}
