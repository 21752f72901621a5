use filemover::load_config::{load_config, Endpoints, DESTINATION_API_URL, SOURCE_API_URL};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn set_endpoints() {
    env::set_var(SOURCE_API_URL, "https://en.wikipedia.org/w/api.php");
    env::set_var(DESTINATION_API_URL, "https://commons.wikimedia.org/w/api.php");
}

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

#[tokio::test]
#[serial]
async fn test_load_config_reads_yaml_and_endpoints() {
    let config_file = config_file(
        r#"
eligibility:
  allow_categories:
    - "Category:Self-published work"
    - GFDL files
  deny_categories:
    - Non-free media
templates:
  public_domain_self_target: PD-user-de
  canonical:
    - Cc-by-sa-4.0
source_corpus:
  interwiki_prefix: de
  language: de
staging_dir: ./tmp/staging
concurrency: 2
max_name_attempts: 10
"#,
    );
    set_endpoints();

    let config = load_config(config_file.path()).expect("Config should load");

    let transfer = &config.transfer;
    assert!(transfer.eligibility.allow_categories.contains("GFDL files"));
    assert!(transfer.eligibility.deny_categories.contains("Non-free media"));
    assert_eq!(transfer.templates.public_domain_self_target, "PD-user-de");
    // Unspecified roles keep their defaults.
    assert_eq!(transfer.templates.information, "Information");
    assert_eq!(transfer.templates.canonical, vec!["Cc-by-sa-4.0".to_string()]);
    assert_eq!(transfer.source_corpus.interwiki_prefix, "de");
    assert_eq!(transfer.source_corpus.project, "wikipedia");
    assert_eq!(transfer.staging_dir, Some(PathBuf::from("./tmp/staging")));
    assert_eq!(transfer.concurrency, 2);
    assert_eq!(transfer.max_name_attempts, 10);
    assert!(!transfer.dry_run);

    assert_eq!(
        config.endpoints,
        Endpoints {
            source_api_url: "https://en.wikipedia.org/w/api.php".to_string(),
            destination_api_url: "https://commons.wikimedia.org/w/api.php".to_string(),
        }
    );
}

#[tokio::test]
#[serial]
async fn test_empty_config_selects_defaults() {
    set_endpoints();
    for yaml in ["", "{}\n"] {
        let config_file = config_file(yaml);
        let config = load_config(config_file.path()).expect("Empty config should load");
        assert_eq!(config.transfer.concurrency, 4);
        assert_eq!(config.transfer.max_name_attempts, 50);
        assert_eq!(config.transfer.templates.transfer_request, "Copy to Wikimedia Commons");
        assert!(config.transfer.eligibility.allow_categories.is_empty());
    }
}

#[tokio::test]
#[serial]
async fn test_missing_endpoint_variable_is_named() {
    let config_file = config_file("dry_run: true\n");
    set_endpoints();
    env::remove_var(DESTINATION_API_URL);

    let err = load_config(config_file.path()).unwrap_err();
    assert!(
        err.to_string().contains(DESTINATION_API_URL),
        "error should name the variable: {err}"
    );
}

#[tokio::test]
#[serial]
async fn test_invalid_yaml_is_reported() {
    set_endpoints();
    let config_file = config_file("concurrency: [not, a, number]\n");

    let err = load_config(config_file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_zero_concurrency_is_rejected() {
    set_endpoints();
    let config_file = config_file("concurrency: 0\n");

    let err = load_config(config_file.path()).unwrap_err();
    assert!(err.to_string().contains("concurrency"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_missing_file_is_reported() {
    set_endpoints();
    let err = load_config("/definitely/not/here.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
