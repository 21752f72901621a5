use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use filemover_core::config::{EligibilityPolicy, TransferConfig};
use filemover_core::contract::{MockWiki, Revision};
use filemover_core::error::TransferError;
use filemover_core::naming::NameResolver;
use filemover_core::transfer::{staged_name, BatchControl, TransferState, Transferer};
use tempfile::TempDir;

const PAGE_TEXT: &str = "== Summary ==\n{{Information|description=A cat|source=Own work}}\n== Licensing ==\n{{Self|cc-by-sa-4.0}}\n{{Cc-by-sa-4.0}}\n{{MTC|bot=Bot}}\n[[Category:Cats]]";

const PAGE_XML: &str = r#"<root><h level="2" i="1">== Summary ==</h>
<template><title>Information</title><part><name>description</name><equals>=</equals><value>A cat</value></part><part><name>source</name><equals>=</equals><value>Own work</value></part></template>
<h level="2" i="2">== Licensing ==</h>
<template><title>Self</title><part><name index="1"/><value>cc-by-sa-4.0</value></part></template>
<template><title>Cc-by-sa-4.0</title></template>
<template><title>MTC</title><part><name>bot</name><equals>=</equals><value>Bot</value></part></template>
[[Category:Cats]]</root>"#;

#[derive(Debug, Clone)]
struct Upload {
    staged_file_present: bool,
    destination: String,
    description: String,
    comment: String,
}

fn config(staging: &TempDir) -> TransferConfig {
    TransferConfig {
        eligibility: EligibilityPolicy {
            allow_categories: BTreeSet::from(["Self-published work".to_string()]),
            deny_categories: BTreeSet::new(),
        },
        staging_dir: Some(staging.path().to_path_buf()),
        ..Default::default()
    }
}

/// Source wiki hosting any number of copies of the same cat picture.
/// Titles containing `Broken` fail to parse; `File:Nonfree.jpg` is not in an
/// allowed category.
fn source_wiki() -> MockWiki {
    let mut wiki = MockWiki::new();
    wiki.expect_find_duplicates_of()
        .returning(|titles| Ok(titles.iter().map(|t| (t.clone(), vec![])).collect()));
    wiki.expect_categories_of().returning(|titles| {
        Ok(titles
            .iter()
            .map(|t| {
                let category = if t == "File:Nonfree.jpg" {
                    "Category:Non-free media"
                } else {
                    "Category:Self-published work"
                };
                (t.clone(), vec![category.to_string()])
            })
            .collect())
    });
    wiki.expect_redirects_to().returning(|title| match title {
        "Template:Copy to Wikimedia Commons" => Ok(vec!["Template:MTC".to_string()]),
        _ => Ok(vec![]),
    });
    wiki.expect_page_text().returning(|_| Ok(PAGE_TEXT.to_string()));
    wiki.expect_upload_history_of().returning(|_| {
        Ok(vec![
            Revision {
                timestamp: Utc.with_ymd_and_hms(2012, 3, 4, 10, 0, 0).unwrap(),
                user: "Bob".to_string(),
                width: 1024,
                height: 768,
                comment: "Better crop".to_string(),
            },
            Revision {
                timestamp: Utc.with_ymd_and_hms(2009, 1, 2, 9, 15, 0).unwrap(),
                user: "Alice".to_string(),
                width: 2048,
                height: 1536,
                comment: "Taken in my garden".to_string(),
            },
        ])
    });
    wiki.expect_parse_tree().returning(|_, context| {
        if context.contains("Broken") {
            Err("parser crashed".into())
        } else {
            Ok(PAGE_XML.to_string())
        }
    });
    wiki.expect_download_binary().returning(|_, path| {
        std::fs::write(path, b"JPEG")?;
        Ok(())
    });
    wiki
}

/// Destination where the listed file titles are taken and only
/// `Template:Cc-by-sa-4.0` exists among templates.
fn destination_wiki(taken: &'static [&'static str], uploads: Arc<Mutex<Vec<Upload>>>) -> MockWiki {
    let mut wiki = MockWiki::new();
    wiki.expect_exists().returning(move |titles| {
        Ok(titles
            .iter()
            .map(|t| {
                let exists = t == "Template:Cc-by-sa-4.0" || taken.contains(&t.as_str());
                (t.clone(), exists)
            })
            .collect::<HashMap<_, _>>())
    });
    wiki.expect_upload_binary()
        .returning(move |path, destination, description, comment| {
            uploads.lock().unwrap().push(Upload {
                staged_file_present: path.exists(),
                destination: destination.to_string(),
                description: description.to_string(),
                comment: comment.to_string(),
            });
            Ok(())
        });
    wiki
}

fn record_edits(wiki: &mut MockWiki) -> Arc<Mutex<Vec<(String, String, String)>>> {
    let edits = Arc::new(Mutex::new(Vec::new()));
    let recorded = edits.clone();
    wiki.expect_edit_page()
        .returning(move |title, text, summary, append| {
            assert!(!append);
            recorded
                .lock()
                .unwrap()
                .push((title.to_string(), text.to_string(), summary.to_string()));
            Ok(())
        });
    edits
}

fn staging_is_empty(staging: &TempDir) -> bool {
    std::fs::read_dir(staging.path())
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[tokio::test]
async fn test_file_is_published_and_source_annotated() {
    let staging = TempDir::new().unwrap();
    let config = config(&staging);
    let mut source = source_wiki();
    let edits = record_edits(&mut source);
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let destination = destination_wiki(&[], uploads.clone());

    let report = Transferer::new(&source, &destination, &config)
        .transfer(&["File:Cat.jpg".to_string()])
        .await
        .expect("batch should run");

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, TransferState::Annotated);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.destination_title.as_deref(), Some("File:Cat.jpg"));
    assert_eq!(report.succeeded().count(), 1);

    let uploads = uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert!(upload.staged_file_present);
    assert_eq!(upload.destination, "File:Cat.jpg");
    assert_eq!(upload.comment, "Transferred from [[w:File:Cat.jpg]]");

    let description = &upload.description;
    assert_eq!(outcome.rendered.as_deref(), Some(description.as_str()));
    assert!(description.contains("{{Information\n|description=A cat"), "got: {description}");
    assert!(description.contains("|author={{User at project|Alice|wikipedia|en}}"));
    assert!(description.contains("{{Self|cc-by-sa-4.0|author={{User at project|Alice|wikipedia|en}}}}"));
    assert!(description.contains("{{Cc-by-sa-4.0}}"));
    assert!(!description.contains("MTC"));
    assert!(!description.contains("Copy to Wikimedia Commons"));
    assert!(!description.contains("Category:Cats"));
    let alice = description.find("[[w:User:Alice|Alice]]").expect("uploader row");
    let bob = description.find("[[w:User:Bob|Bob]]").expect("second row");
    assert!(alice < bob, "upload log should list the oldest revision first");

    let edits = edits.lock().unwrap();
    assert_eq!(edits.len(), 1);
    let (title, text, summary) = &edits[0];
    assert_eq!(title, "File:Cat.jpg");
    assert!(!text.contains("{{MTC"));
    assert!(text.ends_with("{{Now Commons|File:Cat.jpg}}"));
    assert_eq!(summary, "Transferred to File:Cat.jpg");

    assert!(staging_is_empty(&staging));
}

#[tokio::test]
async fn test_taken_destination_name_is_permuted() {
    let staging = TempDir::new().unwrap();
    let config = config(&staging);
    let mut source = source_wiki();
    let edits = record_edits(&mut source);
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let destination = destination_wiki(&["File:Cat.jpg"], uploads.clone());

    let report = Transferer::new(&source, &destination, &config)
        .with_resolver(NameResolver::new(config.max_name_attempts).with_suffixes(|| 7))
        .transfer(&["File:Cat.jpg".to_string()])
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, TransferState::Annotated);
    assert_eq!(outcome.destination_title.as_deref(), Some("File:Cat 7.jpg"));
    assert_eq!(uploads.lock().unwrap()[0].destination, "File:Cat 7.jpg");
    assert!(edits.lock().unwrap()[0].1.ends_with("{{Now Commons|File:Cat 7.jpg}}"));
}

#[tokio::test]
async fn test_repeated_title_is_transferred_once() {
    let staging = TempDir::new().unwrap();
    let config = config(&staging);
    let mut source = source_wiki();
    let edits = record_edits(&mut source);
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let destination = destination_wiki(&["File:Cat.jpg"], uploads.clone());

    let report = Transferer::new(&source, &destination, &config)
        .with_resolver(NameResolver::new(config.max_name_attempts).with_suffixes(|| 7))
        .transfer(&["File:Cat.jpg".to_string(), "File:Cat.jpg".to_string()])
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].state, TransferState::Annotated);
    assert!(report.skipped.is_empty());
    let uploads = uploads.lock().unwrap();
    let destinations: Vec<&str> = uploads.iter().map(|u| u.destination.as_str()).collect();
    assert_eq!(destinations, vec!["File:Cat 7.jpg"]);
    assert_eq!(edits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unresolvable_name_fails_only_that_file() {
    let staging = TempDir::new().unwrap();
    let config = TransferConfig {
        max_name_attempts: 3,
        ..config(&staging)
    };
    let mut source = source_wiki();
    record_edits(&mut source);
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let destination = destination_wiki(&["File:Cat.jpg", "File:Cat 7.jpg"], uploads.clone());

    let report = Transferer::new(&source, &destination, &config)
        .with_resolver(NameResolver::new(config.max_name_attempts).with_suffixes(|| 7))
        .transfer(&["File:Cat.jpg".to_string(), "File:Dog.jpg".to_string()])
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].state, TransferState::Failed);
    assert!(matches!(
        report.outcomes[0].error,
        Some(TransferError::NameResolutionExhausted { attempts: 3, .. })
    ));
    assert_eq!(report.outcomes[1].state, TransferState::Annotated);
    let uploads = uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].destination, "File:Dog.jpg");
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let staging = TempDir::new().unwrap();
    let config = TransferConfig {
        dry_run: true,
        ..config(&staging)
    };
    let mut source = source_wiki();
    source.expect_edit_page().never();
    let mut destination = MockWiki::new();
    destination
        .expect_exists()
        .returning(|titles| Ok(titles.iter().map(|t| (t.clone(), t.starts_with("Template:"))).collect()));
    destination.expect_upload_binary().never();

    let report = Transferer::new(&source, &destination, &config)
        .transfer(&["File:Cat.jpg".to_string()])
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, TransferState::Rendered);
    assert!(outcome.error.is_none());
    let rendered = outcome.rendered.as_deref().expect("rendered page");
    assert!(rendered.contains("== {{Original upload log}} =="));
    assert!(staging_is_empty(&staging));
}

#[tokio::test]
async fn test_upload_failure_leaves_source_untouched() {
    let staging = TempDir::new().unwrap();
    let config = config(&staging);
    let mut source = source_wiki();
    source.expect_edit_page().never();
    let mut destination = MockWiki::new();
    destination
        .expect_exists()
        .returning(|titles| Ok(titles.iter().map(|t| (t.clone(), false)).collect()));
    destination
        .expect_upload_binary()
        .returning(|_, _, _, _| Err("upload rejected: file type".into()));

    let report = Transferer::new(&source, &destination, &config)
        .transfer(&["File:Cat.jpg".to_string()])
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, TransferState::Failed);
    match &outcome.error {
        Some(err @ TransferError::Publish { .. }) => {
            assert!(!err.is_published());
            assert!(err.to_string().contains("upload rejected"));
        }
        other => panic!("expected a publish error, got {other:?}"),
    }
    assert!(staging_is_empty(&staging), "staged binary should be removed");
}

#[tokio::test]
async fn test_annotation_failure_is_reported_for_follow_up() {
    let staging = TempDir::new().unwrap();
    let config = config(&staging);
    let mut source = source_wiki();
    source
        .expect_edit_page()
        .times(1)
        .returning(|_, _, _, _| Err("edit conflict".into()));
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let destination = destination_wiki(&[], uploads.clone());

    let report = Transferer::new(&source, &destination, &config)
        .transfer(&["File:Cat.jpg".to_string()])
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, TransferState::Published);
    assert!(outcome.needs_follow_up());
    let err = outcome.error.as_ref().expect("annotation error");
    assert!(err.is_published());
    assert!(matches!(err, TransferError::Annotation { destination, .. } if destination == "File:Cat.jpg"));
    assert_eq!(uploads.lock().unwrap().len(), 1);
    assert_eq!(report.needs_follow_up().count(), 1);
    assert_eq!(report.failed().count(), 0);
    assert_eq!(report.succeeded().count(), 0);
}

#[tokio::test]
async fn test_one_failing_file_does_not_stop_the_batch() {
    let staging = TempDir::new().unwrap();
    let config = config(&staging);
    let mut source = source_wiki();
    record_edits(&mut source);
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let destination = destination_wiki(&[], uploads.clone());

    let titles = vec![
        "File:Broken.jpg".to_string(),
        "File:Nonfree.jpg".to_string(),
        "File:Cat.jpg".to_string(),
    ];
    let report = Transferer::new(&source, &destination, &config)
        .transfer(&titles)
        .await
        .unwrap();

    assert_eq!(report.skipped, vec!["File:Nonfree.jpg".to_string()]);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].source_title, "File:Broken.jpg");
    assert_eq!(report.outcomes[0].state, TransferState::Failed);
    assert!(matches!(report.outcomes[0].error, Some(TransferError::Parse { .. })));
    assert_eq!(report.outcomes[1].source_title, "File:Cat.jpg");
    assert_eq!(report.outcomes[1].state, TransferState::Annotated);
    assert_eq!(uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stopped_batch_starts_no_files() {
    let staging = TempDir::new().unwrap();
    let config = config(&staging);
    let mut source = MockWiki::new();
    source
        .expect_find_duplicates_of()
        .returning(|titles| Ok(titles.iter().map(|t| (t.clone(), vec![])).collect()));
    source.expect_categories_of().returning(|titles| {
        Ok(titles
            .iter()
            .map(|t| (t.clone(), vec!["Category:Self-published work".to_string()]))
            .collect())
    });
    source.expect_redirects_to().returning(|_| Ok(vec![]));
    source.expect_page_text().never();
    source.expect_download_binary().never();
    let mut destination = MockWiki::new();
    destination
        .expect_exists()
        .returning(|titles| Ok(titles.iter().map(|t| (t.clone(), false)).collect()));
    destination.expect_upload_binary().never();

    let control = BatchControl::new();
    control.stop();
    let report = Transferer::new(&source, &destination, &config)
        .with_control(control.clone())
        .transfer(&["File:A.jpg".to_string(), "File:B.jpg".to_string()])
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    for outcome in &report.outcomes {
        assert_eq!(outcome.state, TransferState::Failed);
        assert!(matches!(outcome.error, Some(TransferError::Cancelled { .. })));
    }
}

#[tokio::test]
async fn test_category_members_are_transferred() {
    let staging = TempDir::new().unwrap();
    let config = config(&staging);
    let mut source = source_wiki();
    source
        .expect_category_members()
        .withf(|category| category == "Category:Files to move")
        .times(1)
        .returning(|_| Ok(vec!["File:Cat.jpg".to_string()]));
    record_edits(&mut source);
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let destination = destination_wiki(&[], uploads.clone());

    let report = Transferer::new(&source, &destination, &config)
        .transfer_category("Category:Files to move")
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].state, TransferState::Annotated);
}

#[tokio::test]
async fn test_stale_staged_binary_is_replaced() {
    let staging = TempDir::new().unwrap();
    std::fs::write(staging.path().join(staged_name("File:Cat.jpg")), b"stale").unwrap();
    let config = config(&staging);
    let mut source = source_wiki();
    record_edits(&mut source);
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let destination = destination_wiki(&[], uploads.clone());

    let report = Transferer::new(&source, &destination, &config)
        .transfer(&["File:Cat.jpg".to_string()])
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].state, TransferState::Annotated);
    assert!(staging_is_empty(&staging));
}

#[test]
fn test_staged_name_keeps_extension() {
    let name = staged_name("File:Cat.jpg");
    assert!(name.ends_with(".jpg"));
    assert_eq!(name.len(), 64 + ".jpg".len());
    assert_ne!(name, staged_name("File:Cat 2.jpg"));
}
