//! Renders the final description page for the destination.
//!
//! Sections, in order: metadata, license, original upload log, and finally the
//! caption section when the source page had one. Comments and category links
//! are removed, and every wiki link is qualified so it still points at the
//! source corpus.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::SourceCorpus;
use crate::contract::Revision;
use crate::rewrite::RewrittenPage;

static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"));

static CATEGORY_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\[\s*category\s*:[^\]]*\]\][ \t]*\n?").expect("category pattern is valid")
});

static LINK_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[").expect("link pattern is valid"));

/// Description page text for `source_title`, ready to upload.
pub fn render(corpus: &SourceCorpus, page: &RewrittenPage, history: &[Revision], source_title: &str) -> String {
    let mut text = String::new();
    text.push_str("== {{int:filedesc}} ==\n");
    text.push_str(&page.metadata.render(true));
    text.push_str("\n\n== {{int:license-header}} ==\n");
    if !page.license_section.trim().is_empty() {
        text.push_str(page.license_section.trim());
        text.push('\n');
    }
    text.push('\n');
    text.push_str(&upload_log(corpus, history, source_title));

    let mut text = postprocess(&text, &corpus.interwiki_prefix);
    if let Some(caption) = &page.caption {
        text.push_str("\n\n");
        text.push_str(caption.trim());
    }
    text.push('\n');
    text
}

/// The original upload log as a wikitable, oldest revision first.
pub fn upload_log(corpus: &SourceCorpus, history: &[Revision], source_title: &str) -> String {
    let mut revisions: Vec<&Revision> = history.iter().collect();
    revisions.sort_by_key(|r| r.timestamp);

    let mut log = String::from("== {{Original upload log}} ==\n");
    log.push_str(&format!(
        "{{{{Original file page|{}.{}|{}}}}}\n",
        corpus.language, corpus.project, source_title
    ));
    log.push_str("{| class=\"wikitable\"\n");
    log.push_str("! {{int:filehist-datetime}} !! {{int:filehist-dimensions}} !! {{int:filehist-user}} !! {{int:filehist-comment}}\n");
    for revision in revisions {
        log.push_str("|-\n");
        log.push_str(&format!(
            "| {} || {} × {} || [[User:{}|{}]] || {}\n",
            revision.timestamp.format("%Y-%m-%d %H:%M"),
            revision.width,
            revision.height,
            revision.user,
            revision.user,
            flatten(&revision.comment),
        ));
    }
    log.push_str("|}");
    log
}

/// Strip comments and categories, then qualify links with `prefix`.
pub fn postprocess(text: &str, prefix: &str) -> String {
    let text = HTML_COMMENT.replace_all(text, "");
    let text = CATEGORY_LINK.replace_all(&text, "");
    let qualified = format!("[[{prefix}:");
    let text = LINK_OPEN.replace_all(&text, regex::NoExpand(&qualified));

    // `[[w:w:X` and `[[w::X` both collapse to `[[w:X`.
    let doubled = Regex::new(&format!(r"(?i)\[\[{0}:(?:\s*{0}\s*:|:)+", regex::escape(prefix)));
    match doubled {
        Ok(doubled) => doubled.replace_all(&text, regex::NoExpand(&qualified)).into_owned(),
        Err(_) => text.into_owned(),
    }
}

fn flatten(comment: &str) -> String {
    comment
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
