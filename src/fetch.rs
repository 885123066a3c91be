use std::fs::File;
use std::io::{Read, Write};
use std::time::Instant;

use camino::Utf8Path;
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::client::{ArchiveClient, Resource};
use crate::config::ResolvedConfig;
use crate::domain::{DataId, DatasetMeta, Image};
use crate::error::QlError;
use crate::fits;
use crate::store::Store;
use crate::votable;

const READ_CHUNK: usize = 256 * 1024;
const MAX_PREALLOC: u64 = 512 * 1024 * 1024;

/// Per-transfer bookkeeping for an image download.
struct DownloadState {
    file: File,
    received: u64,
    since_notice: u64,
    gzip: bool,
    buffer: Vec<u8>,
}

impl DownloadState {
    fn new(file: File, gzip: bool, expected: u64) -> Self {
        Self {
            file,
            received: 0,
            since_notice: 0,
            gzip,
            buffer: Vec::with_capacity(usize::try_from(expected.min(MAX_PREALLOC)).unwrap_or(0)),
        }
    }

    /// Gzip payloads are only buffered; plain payloads also go straight to disk.
    fn write(&mut self, chunk: &[u8]) -> Result<(), QlError> {
        if !self.gzip {
            self.file
                .write_all(chunk)
                .map_err(|err| QlError::ImageFetchFailed(format!("write: {err}")))?;
        }
        self.buffer.extend_from_slice(chunk);
        self.received += chunk.len() as u64;
        self.since_notice += chunk.len() as u64;
        Ok(())
    }
}

/// Cache-first retrieval of VOTable documents and FITS files.
pub struct Fetcher<C: ArchiveClient> {
    client: C,
    store: Store,
    config: ResolvedConfig,
}

impl<C: ArchiveClient> Fetcher<C> {
    pub fn new(client: C, store: Store, config: &ResolvedConfig) -> Self {
        Self {
            client,
            store,
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn metadata_url(&self, id: &DataId) -> String {
        self.config.metadata_url(id.as_str())
    }

    /// Returns parsed metadata for `id`. A document that does not parse is
    /// left at its `.tmp` name and never becomes a cache hit.
    pub fn fetch_metadata(
        &self,
        id: &DataId,
        votable_url: Option<&str>,
    ) -> Result<DatasetMeta, QlError> {
        let path = self.store.metadata_path(id);
        if Store::exists(&path) {
            debug!(data_id = %id, %path, "metadata cache hit");
            let bytes = Store::read(&path)?;
            return Ok(finish_meta(id, votable::parse_votable(&bytes)?));
        }

        let url = match votable_url.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => url.to_string(),
            None => self.metadata_url(id),
        };
        info!(data_id = %id, %url, "fetching metadata");

        self.store.ensure_roots()?;
        let tmp_path = Store::temp_path(&path);
        let mut file = create_file(&tmp_path)?;
        let mut response = self.client.get(&url, Resource::Metadata)?;

        let mut buffer = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = response
                .body
                .read(&mut chunk)
                .map_err(|err| QlError::MetadataFetchFailed(err.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&chunk[..n])
                .map_err(|err| QlError::MetadataFetchFailed(format!("write {tmp_path}: {err}")))?;
            buffer.extend_from_slice(&chunk[..n]);
        }
        file.sync_all()
            .map_err(|err| QlError::MetadataFetchFailed(format!("sync {tmp_path}: {err}")))?;
        drop(file);

        let meta = votable::parse_votable(&buffer)?;
        Store::commit(&tmp_path, &path)?;
        debug!(data_id = %id, bytes = buffer.len(), "metadata cached");
        Ok(finish_meta(id, meta))
    }

    /// Downloads (or reads from cache) and decodes the frame described by `meta`.
    pub fn fetch_image(
        &self,
        id: &DataId,
        meta: &DatasetMeta,
        sink: &dyn ProgressSink,
    ) -> Result<Image, QlError> {
        let path = self.store.image_path(id);
        if Store::exists(&path) {
            debug!(data_id = %id, %path, "image cache hit");
            let bytes = Store::read(&path)?;
            return fits::decode_image(&bytes, self.config.decode_workers);
        }

        let bytes = self.download_image(id, meta, &path, sink)?;
        fits::decode_image(&bytes, self.config.decode_workers)
    }

    fn download_image(
        &self,
        id: &DataId,
        meta: &DatasetMeta,
        path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<u8>, QlError> {
        let url = meta.file_url.trim();
        if url.is_empty() {
            return Err(QlError::ImageFetchFailed(format!(
                "no access URL for {id}"
            )));
        }
        info!(data_id = %id, %url, expected = meta.file_size, "fetching image");

        self.store.ensure_roots()?;
        let tmp_path = Store::temp_path(path);
        let file = create_file(&tmp_path)
            .map_err(|err| QlError::ImageFetchFailed(err.to_string()))?;
        let mut response = self.client.get(url, Resource::Image)?;
        let gzip = response.is_gzip_flagged() || url_is_gzip(url);
        if let Some(length) = response.content_length.filter(|length| *length != meta.file_size) {
            warn!(
                data_id = %id,
                content_length = length,
                expected = meta.file_size,
                "Content-Length disagrees with declared file size"
            );
        }

        let start = Instant::now();
        let mut state = DownloadState::new(file, gzip, meta.file_size);
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = response
                .body
                .read(&mut chunk)
                .map_err(|err| QlError::ImageFetchFailed(err.to_string()))?;
            if n == 0 {
                break;
            }
            state.write(&chunk[..n])?;
            if state.since_notice >= self.config.progress_threshold_bytes {
                state.since_notice = 0;
                sink.event(progress_event(id, &state, meta.file_size, start, "downloading"));
            }
        }

        // A missing FILE_SIZE reads as 0 and fails here.
        if state.received != meta.file_size {
            return Err(QlError::ImageSizeMismatch {
                expected: meta.file_size,
                received: state.received,
            });
        }
        sink.event(progress_event(id, &state, meta.file_size, start, "downloaded"));

        let bytes = if state.gzip {
            let mut decoder = GzDecoder::new(state.buffer.as_slice());
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|err| QlError::ImageDecodeFailed(format!("gzip: {err}")))?;
            state
                .file
                .write_all(&decompressed)
                .map_err(|err| QlError::ImageFetchFailed(format!("write: {err}")))?;
            debug!(
                data_id = %id,
                compressed = state.received,
                decompressed = decompressed.len(),
                "inflated gzip payload"
            );
            decompressed
        } else {
            std::mem::take(&mut state.buffer)
        };

        state
            .file
            .sync_all()
            .map_err(|err| QlError::ImageFetchFailed(format!("sync {tmp_path}: {err}")))?;
        drop(state);
        Store::commit(&tmp_path, path)?;
        info!(
            data_id = %id,
            bytes = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "image cached"
        );
        Ok(bytes)
    }
}

fn finish_meta(id: &DataId, mut meta: DatasetMeta) -> DatasetMeta {
    if meta.data_id.is_empty() {
        meta.data_id = id.as_str().to_string();
    }
    meta
}

fn create_file(path: &Utf8Path) -> Result<File, QlError> {
    File::create(path.as_std_path())
        .map_err(|err| QlError::Filesystem(format!("create {path}: {err}")))
}

fn url_is_gzip(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".gz")
}

fn progress_event(
    id: &DataId,
    state: &DownloadState,
    total: u64,
    start: Instant,
    message: &str,
) -> ProgressEvent {
    let percent = if total > 0 {
        state.received as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    ProgressEvent {
        data_id: id.as_str().to_string(),
        message: message.to_string(),
        received: state.received,
        total,
        percent,
        elapsed: Some(start.elapsed()),
    }
}
