mod support;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use subaru_ql::app::App;
use subaru_ql::domain::{DataId, ImageState};
use subaru_ql::error::QlError;

use support::{
    DATA_ID, IMAGE_URL, MockClient, RecordingSink, Route, fits_bytes, ramp, sample_votable,
    test_config,
};

#[test]
fn render_fetches_metadata_and_embeds_it() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let image = fits_bytes(8, 8, &ramp(64));
    let client = MockClient::default();
    client.route(
        &config.metadata_url(DATA_ID),
        Route::new(sample_votable(image.len() as u64, IMAGE_URL)),
    );
    client.route(IMAGE_URL, Route::new(image));
    let sink = Arc::new(RecordingSink::default());
    let app = App::new(client, &config, sink.clone());

    let page = app.render_dataset(DATA_ID, None).unwrap();

    let calls = app.registry().fetcher().client().calls();
    assert!(calls[0].contains("data_id%20='SUPA01234567'"));
    assert!(page.contains("data-dataId=\"SUPA01234567\""));
    assert!(page.contains("data-bandUnit=\"&amp;Aring;\""));
    assert!(page.contains(&format!("data-fileUrl=\"{IMAGE_URL}\"")));
    assert!(config.metadata_cache.join("SUPA01234567.xml").as_std_path().is_file());

    let id: DataId = DATA_ID.parse().unwrap();
    let state = app
        .registry()
        .wait_for_image(&id, Duration::from_secs(10))
        .unwrap();
    assert_matches!(state, ImageState::Ready(_));
    assert_eq!(sink.events().last().unwrap().message, "downloaded");

    let summary = app.summary(&app.registry().snapshot(&id).unwrap());
    assert_eq!(summary.image_status, "ready");
    assert_eq!(summary.image.unwrap().width, 8);
    assert!(summary.image_error.is_none());
}

#[test]
fn blank_or_unsafe_ids_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let app = App::new(
        MockClient::default(),
        &config,
        Arc::new(RecordingSink::default()),
    );

    for bad in ["", "   ", "..", "../etc/passwd", "SUPA 0123"] {
        assert_matches!(app.launch(bad, None), Err(QlError::InvalidRequest(_)));
    }
    assert!(app.registry().fetcher().client().calls().is_empty());
}

#[test]
fn votable_override_is_fetched() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let override_url = "https://mirror.example.org/tap?id=SUPA01234567";
    let client = MockClient::default();
    client.route(override_url, Route::new(sample_votable(0, IMAGE_URL)));
    let app = App::new(client, &config, Arc::new(RecordingSink::default()));

    let dataset = app.launch(DATA_ID, Some(override_url)).unwrap();

    assert_eq!(dataset.meta.objects, "M31");
    assert_eq!(app.registry().fetcher().client().calls()[0], override_url);
}

#[test]
fn metadata_status_error_surfaces() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let app = App::new(
        MockClient::default(),
        &config,
        Arc::new(RecordingSink::default()),
    );

    let err = app.render_dataset(DATA_ID, None).unwrap_err();
    assert_matches!(err, QlError::MetadataStatus { status: 404, .. });
    assert!(err.is_network());
}
