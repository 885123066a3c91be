use assert_matches::assert_matches;

use subaru_ql::config::{Config, ConfigLoader, DEFAULT_PROGRESS_THRESHOLD};
use subaru_ql::error::QlError;

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, QlError::ConfigRead(_));
}

#[test]
fn file_values_override_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("subaru-ql.json");
    std::fs::write(
        &path,
        r#"{
            "metadata_cache": "/data/votable",
            "image_cache": "/data/fits",
            "metadata_url_template": "https://tap.example.org/sync?id={data_id}",
            "max_retries": 5,
            "decode_workers": 0
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.metadata_cache.as_str(), "/data/votable");
    assert_eq!(config.image_cache.as_str(), "/data/fits");
    assert_eq!(
        config.metadata_url("SUPA0"),
        "https://tap.example.org/sync?id=SUPA0"
    );
    assert_eq!(config.max_retries, 5);
    assert_eq!(config.decode_workers, 1);
    assert_eq!(config.timeout_secs, 600);
    assert_eq!(config.progress_threshold_bytes, DEFAULT_PROGRESS_THRESHOLD);
}

#[test]
fn template_without_placeholder_is_rejected() {
    let err = ConfigLoader::resolve_config(Config {
        metadata_cache: Some("/tmp/votable".to_string()),
        image_cache: Some("/tmp/fits".to_string()),
        metadata_url_template: Some("https://tap.example.org/sync".to_string()),
        ..Config::default()
    })
    .unwrap_err();
    assert_matches!(err, QlError::ConfigParse(_));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, QlError::ConfigParse(_));
}
