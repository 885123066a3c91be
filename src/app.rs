use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::client::{ArchiveClient, ArchiveHttpClient};
use crate::config::ResolvedConfig;
use crate::domain::{DataId, Dataset, ImageHeader};
use crate::error::QlError;
use crate::fetch::Fetcher;
use crate::output;
use crate::registry::Registry;
use crate::store::Store;

/// Download progress for one dataset, addressed by its `data_id`.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub data_id: String,
    pub message: String,
    pub received: u64,
    pub total: u64,
    pub percent: f64,
    pub elapsed: Option<Duration>,
}

/// Receiver of download notifications (e.g. a push channel per dataset).
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub data_id: String,
    pub last_access: String,
    pub metadata: crate::domain::DatasetMeta,
    pub image_status: String,
    pub image: Option<ImageHeader>,
    pub image_error: Option<String>,
    pub metadata_path: String,
    pub image_path: String,
}

/// Request orchestrator: the single entry point the HTTP layer calls.
pub struct App<C: ArchiveClient + 'static> {
    registry: Registry<C>,
}

impl App<ArchiveHttpClient> {
    pub fn from_config(
        config: &ResolvedConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self, QlError> {
        let client = ArchiveHttpClient::new(config)?;
        Ok(Self::new(client, config, sink))
    }
}

impl<C: ArchiveClient + 'static> App<C> {
    pub fn new(client: C, config: &ResolvedConfig, sink: Arc<dyn ProgressSink>) -> Self {
        let fetcher = Fetcher::new(client, Store::new(config), config);
        Self {
            registry: Registry::new(fetcher, sink),
        }
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    /// Resolves `data_id` to a dataset snapshot. Metadata is fetched
    /// synchronously on first sight; the image follows in the background.
    pub fn launch(&self, data_id: &str, votable_url: Option<&str>) -> Result<Dataset, QlError> {
        let id: DataId = data_id.parse()?;
        self.registry.get_or_create(&id, votable_url)
    }

    /// HTML page embedding the dataset metadata as `data-*` attributes.
    pub fn render_dataset(
        &self,
        data_id: &str,
        votable_url: Option<&str>,
    ) -> Result<String, QlError> {
        let dataset = self.launch(data_id, votable_url)?;
        Ok(output::render_page(&dataset))
    }

    pub fn summary(&self, dataset: &Dataset) -> DatasetSummary {
        let store = self.registry.fetcher().store();
        DatasetSummary {
            data_id: dataset.data_id.to_string(),
            last_access: dataset.last_access.to_rfc3339(),
            metadata: dataset.meta.clone(),
            image_status: dataset.image.label().to_string(),
            image: dataset.image().map(|image| image.header.clone()),
            image_error: dataset.image.error().map(|err| err.to_string()),
            metadata_path: store.metadata_path(&dataset.data_id).to_string(),
            image_path: store.image_path(&dataset.data_id).to_string(),
        }
    }
}
