use chrono::{TimeZone, Utc};
use filemover_core::config::SourceCorpus;
use filemover_core::contract::Revision;
use filemover_core::describe::{postprocess, render, upload_log};
use filemover_core::rewrite::RewrittenPage;
use filemover_core::tree::TemplateNode;

fn revision(year: i32, user: &str, comment: &str) -> Revision {
    Revision {
        timestamp: Utc.with_ymd_and_hms(year, 5, 1, 12, 30, 0).unwrap(),
        user: user.to_string(),
        width: 800,
        height: 600,
        comment: comment.to_string(),
    }
}

fn page(description: &str, caption: Option<&str>) -> RewrittenPage {
    let mut metadata = TemplateNode::new("Information");
    metadata.put("description", description);
    metadata.put("author", "{{User at project|Alice|wikipedia|en}}");
    RewrittenPage {
        metadata,
        license_section: "{{Self|GFDL}}".to_string(),
        caption: caption.map(str::to_string),
        dropped: vec![],
    }
}

#[test]
fn test_sections_appear_in_order() {
    let corpus = SourceCorpus::default();
    let text = render(&corpus, &page("A cat", None), &[revision(2010, "Alice", "first")], "File:Cat.jpg");

    let summary = text.find("== {{int:filedesc}} ==").unwrap();
    let metadata = text.find("{{Information\n|description=A cat").unwrap();
    let license = text.find("== {{int:license-header}} ==").unwrap();
    let self_license = text.find("{{Self|GFDL}}").unwrap();
    let log = text.find("== {{Original upload log}} ==").unwrap();
    assert!(summary < metadata && metadata < license && license < self_license && self_license < log);
    assert!(text.contains("{{Original file page|en.wikipedia|File:Cat.jpg}}"));
}

#[test]
fn test_comments_and_categories_are_removed_and_links_qualified() {
    let corpus = SourceCorpus::default();
    let description = "A [[cat]] on a [[w:mat]]<!-- hidden -->\n[[Category:Cats]]\n[[category: Mats|sort]]";
    let text = render(&corpus, &page(description, None), &[], "File:Cat.jpg");

    assert!(!text.contains("<!--"));
    assert!(!text.to_lowercase().contains("category:"));
    assert!(text.contains("A [[w:cat]] on a [[w:mat]]"), "got: {text}");
    assert!(!text.contains("[[w:w:"));
}

#[test]
fn test_caption_is_last_and_kept_verbatim() {
    let corpus = SourceCorpus::default();
    let caption = "== Captions ==\n{|\n| en || A [[cat]]\n|}";
    let text = render(&corpus, &page("A cat", Some(caption)), &[revision(2010, "Alice", "x")], "File:Cat.jpg");

    assert!(text.trim_end().ends_with(caption), "got: {text}");
    assert!(text.find("== {{Original upload log}} ==").unwrap() < text.find(caption).unwrap());
}

#[test]
fn test_upload_log_lists_revisions_oldest_first_with_flattened_comments() {
    let corpus = SourceCorpus::default();
    let history = vec![
        revision(2014, "Carol", "Reverted\nto older\n\nversion"),
        revision(2009, "Alice", "Original upload"),
        revision(2012, "Bob", "Cropped"),
    ];
    let log = upload_log(&corpus, &history, "File:Cat.jpg");

    let rows: Vec<&str> = log.lines().filter(|l| l.starts_with("| ")).collect();
    assert_eq!(
        rows,
        vec![
            "| 2009-05-01 12:30 || 800 × 600 || [[User:Alice|Alice]] || Original upload",
            "| 2012-05-01 12:30 || 800 × 600 || [[User:Bob|Bob]] || Cropped",
            "| 2014-05-01 12:30 || 800 × 600 || [[User:Carol|Carol]] || Reverted to older version",
        ]
    );
    assert!(log.starts_with("== {{Original upload log}} =="));
    assert!(log.ends_with("|}"));
}

#[test]
fn test_postprocess_collapses_doubled_prefixes() {
    let out = postprocess("[[w:Cat]] [[W: w :Dog]] [[:Mouse]] [[Horse]]", "w");
    assert_eq!(out, "[[w:Cat]] [[w:Dog]] [[w:Mouse]] [[w:Horse]]");
}

#[test]
fn test_postprocess_uses_the_configured_prefix() {
    let out = postprocess("See [[Cat]] and [[de:Katze]]", "wikt");
    assert_eq!(out, "See [[wikt:Cat]] and [[wikt:de:Katze]]");
}
