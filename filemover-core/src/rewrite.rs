//! # rewrite: make a parsed description page acceptable at the destination
//!
//! A caption section, if any, is cut out first, untouched, so it can be placed
//! last. Then the tree is worked on in place, in this order:
//! 1. every template, nested ones included, is renamed to its canonical title;
//! 2. top-level templates that do not exist at the destination are dropped
//!    (one batch existence query);
//! 3. templates with a role are special-cased: the metadata template is set
//!    aside, the self-license gets an `author`, public-domain-self is renamed
//!    and credited, the transfer request is removed;
//! 4. the remaining top-level templates form the license section;
//! 5. the metadata template is created if missing and its standard fields are
//!    filled in;
//! 6. leftover free text is folded into its description.
//!
//! Given the same tree, alias table and existence answers the output is always
//! the same.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::aliases::{strip_namespace, CanonicalTable};
use crate::config::{SourceCorpus, TemplateRoles};
use crate::contract::{ApiError, Wiki};
use crate::tree::{normalize_title, NodeId, ParamValue, ParsedItem, TemplateNode};

/// Fields every metadata block carries, in rendering order.
pub const METADATA_FIELDS: [&str; 6] = [
    "description",
    "date",
    "source",
    "author",
    "permission",
    "other versions",
];

static CAPTION_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)(?:\A|\n)(==[ \t]*captions?[ \t]*==[^\n]*\n.*?\|\})")
        .expect("caption pattern is valid")
});

static HEADING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*=+[^\n]*=+[ \t]*$").expect("heading pattern is valid")
});

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line pattern is valid"));

/// Output of a rewrite, ready for the description page generator.
#[derive(Debug, Clone)]
pub struct RewrittenPage {
    pub metadata: TemplateNode,
    /// Remaining license templates, one per line.
    pub license_section: String,
    /// Caption section to place at the very end, verbatim.
    pub caption: Option<String>,
    /// Canonical titles of templates removed because the destination lacks them.
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Information,
    AuthorLicense,
    PublicDomainSelf,
    TransferRequest,
}

pub struct Rewriter<'a> {
    roles: &'a TemplateRoles,
    corpus: &'a SourceCorpus,
    table: &'a CanonicalTable,
}

impl<'a> Rewriter<'a> {
    pub fn new(roles: &'a TemplateRoles, corpus: &'a SourceCorpus, table: &'a CanonicalTable) -> Self {
        Self { roles, corpus, table }
    }

    /// Rewrite `tree` in place for a file originally uploaded by `uploader`.
    ///
    /// Afterwards `tree` holds only the templates that make up the license section.
    pub async fn rewrite<W>(&self, destination: &W, tree: &mut ParsedItem, uploader: &str) -> Result<RewrittenPage, ApiError>
    where
        W: Wiki + ?Sized,
    {
        let caption = self.take_caption(tree);
        self.canonicalize(tree);
        let dropped = self.drop_missing(destination, tree).await?;

        let mut metadata: Option<TemplateNode> = None;
        let roles: Vec<(NodeId, Option<Role>)> =
            tree.templates().map(|node| (node.id(), self.role_of(&node.title))).collect();
        for (id, role) in roles {
            match role {
                Some(Role::Information) => {
                    let Some(node) = tree.drop_template(id) else { continue };
                    if metadata.is_none() {
                        metadata = Some(node);
                    } else {
                        warn!(template = %node.title, "[REWRITE] Ignoring additional metadata template");
                    }
                }
                Some(Role::AuthorLicense) => {
                    if let Some(node) = tree.template_mut(id) {
                        if !node.has("author") {
                            node.put("author", self.corpus.user_reference(uploader));
                        }
                    }
                }
                Some(Role::PublicDomainSelf) => {
                    if let Some(node) = tree.template_mut(id) {
                        node.title = self.roles.public_domain_self_target.clone();
                        node.prepend_positional(uploader);
                    }
                }
                Some(Role::TransferRequest) => {
                    tree.drop_template(id);
                }
                None => {}
            }
        }

        let license_section = tree
            .templates()
            .map(|node| node.render(false))
            .collect::<Vec<_>>()
            .join("\n");

        let mut metadata = metadata.unwrap_or_else(|| TemplateNode::new(self.roles.information.clone()));
        self.fill_defaults(&mut metadata, uploader);

        let leftover = clean_leftover(&tree.take_contents());
        if !leftover.is_empty() {
            let separator = match metadata.get("description") {
                Some(existing) if !existing.is_blank() => "\n",
                _ => "",
            };
            metadata.append("description", &format!("{separator}{leftover}"));
        }

        info!(
            metadata = %metadata.title,
            license_templates = tree.templates().count(),
            dropped = dropped.len(),
            caption = caption.is_some(),
            "[REWRITE] Rewrote description page"
        );
        Ok(RewrittenPage {
            metadata,
            license_section,
            caption,
            dropped,
        })
    }

    /// Take the caption section out of the page, or failing that out of the
    /// metadata description, before any template in it is rewritten.
    fn take_caption(&self, tree: &mut ParsedItem) -> Option<String> {
        if let Some(caption) = cut_caption(tree) {
            return Some(caption);
        }
        let metadata = tree.templates_mut().find(|node| {
            let title = self.table.canonical(&node.title).unwrap_or(node.title.as_str());
            self.role_of(title) == Some(Role::Information)
        })?;
        match metadata.get_mut("description")? {
            ParamValue::Text(description) => extract_caption(description),
            ParamValue::Tree(description) => cut_caption(description),
        }
    }

    fn canonicalize(&self, tree: &mut ParsedItem) {
        tree.visit_templates_mut(&mut |node: &mut TemplateNode| {
            if let Some(canonical) = self.table.canonical(&node.title) {
                if canonical != node.title {
                    debug!(from = %node.title, to = canonical, "[REWRITE] Canonicalised template");
                    node.title = canonical.to_string();
                }
            }
        });
    }

    async fn drop_missing<W>(&self, destination: &W, tree: &mut ParsedItem) -> Result<Vec<String>, ApiError>
    where
        W: Wiki + ?Sized,
    {
        let candidates: BTreeMap<String, String> = tree
            .templates()
            .filter(|node| self.role_of(&node.title).is_none())
            .map(|node| {
                let page = format!("Template:{}", normalize_title(strip_namespace(&node.title)));
                (node.title.clone(), page)
            })
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query: Vec<String> = candidates.values().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let exists = destination.exists(&query).await?;
        let missing: BTreeSet<&str> = candidates
            .iter()
            .filter(|(_, page)| !exists.get(*page).copied().unwrap_or(false))
            .map(|(title, _)| title.as_str())
            .collect();

        let doomed: Vec<(NodeId, String)> = tree
            .templates()
            .filter(|node| missing.contains(node.title.as_str()))
            .map(|node| (node.id(), node.title.clone()))
            .collect();
        let mut dropped = Vec::new();
        for (id, title) in doomed {
            if tree.drop_template(id).is_some() {
                info!(template = %title, "[REWRITE] Dropping template unknown at destination");
                dropped.push(title);
            }
        }
        Ok(dropped)
    }

    fn role_of(&self, title: &str) -> Option<Role> {
        let title = normalize_title(title);
        let is = |role: &str| normalize_title(role).eq_ignore_ascii_case(&title);
        if is(&self.roles.information) {
            Some(Role::Information)
        } else if is(&self.roles.author_license) {
            Some(Role::AuthorLicense)
        } else if is(&self.roles.public_domain_self) {
            Some(Role::PublicDomainSelf)
        } else if is(&self.roles.transfer_request) {
            Some(Role::TransferRequest)
        } else {
            None
        }
    }

    fn fill_defaults(&self, metadata: &mut TemplateNode, uploader: &str) {
        for field in METADATA_FIELDS {
            let blank = metadata.get(field).map_or(true, ParamValue::is_blank);
            match field {
                "source" if blank => metadata.put(field, self.corpus.provenance()),
                "author" if blank => metadata.put(field, self.corpus.user_reference(uploader)),
                _ if !metadata.has(field) => metadata.put(field, ""),
                _ => {}
            }
        }
    }
}

/// Cut the first caption section out of a parsed page and return it as
/// wikitext, including any templates inside it.
pub fn cut_caption(tree: &mut ParsedItem) -> Option<String> {
    let (whole, section) = {
        let skeleton = tree.skeleton();
        let captures = CAPTION_SECTION.captures(&skeleton)?;
        (captures.get(0)?.range(), captures.get(1)?.range())
    };
    let removed = tree.splice(whole.clone(), "\n");
    Some(removed[section.start - whole.start..].to_string())
}

/// Cut the first caption section out of `text` and return it.
pub fn extract_caption(text: &mut String) -> Option<String> {
    let (range, caption) = {
        let captures = CAPTION_SECTION.captures(text)?;
        let section = captures.get(1)?;
        let whole = captures.get(0)?;
        (whole.range(), section.as_str().to_string())
    };
    text.replace_range(range, "\n");
    Some(caption)
}

fn clean_leftover(text: &str) -> String {
    let without_headings = HEADING_LINE.replace_all(text, "");
    BLANK_LINES
        .replace_all(without_headings.trim(), "\n\n")
        .into_owned()
}
