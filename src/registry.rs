//! Process-wide dataset registry.
//!
//! The map lock guards the key set and is only held for a lookup or insert.
//! Each key owns a slot: a `OnceLock` holding the published entry, read
//! without blocking, and a fetch mutex that serialises the first metadata
//! fetch (single-flight). Each dataset owns a state mutex for its fields.
//! Only the fetch mutex is ever held across I/O.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::app::ProgressSink;
use crate::client::ArchiveClient;
use crate::domain::{DataId, Dataset, DatasetMeta, Image, ImageState};
use crate::error::QlError;
use crate::fetch::Fetcher;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Slot {
    entry: OnceLock<Arc<DatasetEntry>>,
    fetch: Mutex<()>,
}

impl Slot {
    fn published(&self) -> Option<Arc<DatasetEntry>> {
        self.entry.get().cloned()
    }
}

struct EntryState {
    meta: DatasetMeta,
    last_access: DateTime<Utc>,
    image: ImageState,
}

/// Canonical record for one observation, shared with its image task.
pub struct DatasetEntry {
    id: DataId,
    state: Mutex<EntryState>,
    image_done: Condvar,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DatasetEntry {
    fn new(id: DataId, meta: DatasetMeta) -> Self {
        Self {
            id,
            state: Mutex::new(EntryState {
                meta,
                last_access: Utc::now(),
                image: ImageState::Pending,
            }),
            image_done: Condvar::new(),
            task: Mutex::new(None),
        }
    }

    fn meta(&self) -> DatasetMeta {
        lock(&self.state).meta.clone()
    }

    fn snapshot_of(&self, state: &EntryState) -> Dataset {
        Dataset {
            data_id: self.id.clone(),
            meta: state.meta.clone(),
            last_access: state.last_access,
            image: state.image.clone(),
        }
    }

    fn snapshot(&self) -> Dataset {
        let state = lock(&self.state);
        self.snapshot_of(&state)
    }

    fn touch(&self) -> Dataset {
        let mut state = lock(&self.state);
        state.last_access = Utc::now();
        self.snapshot_of(&state)
    }

    /// Publishes the outcome of the image task and wakes every waiter.
    fn complete(&self, result: Result<Image, QlError>) {
        let image = match result {
            Ok(image) => {
                info!(
                    data_id = %self.id,
                    width = image.width(),
                    height = image.height(),
                    "image ready"
                );
                ImageState::Ready(Arc::new(image))
            }
            Err(err) => {
                warn!(data_id = %self.id, error = %err, "image task failed");
                ImageState::Failed(err)
            }
        };
        lock(&self.state).image = image;
        self.image_done.notify_all();
    }

    fn wait(&self, timeout: Duration) -> ImageState {
        let state = lock(&self.state);
        let (state, _) = self
            .image_done
            .wait_timeout_while(state, timeout, |state| state.image.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        state.image.clone()
    }

    fn join(&self) -> ImageState {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                self.complete(Err(QlError::ImageDecodeFailed(
                    "image task panicked".to_string(),
                )));
            }
        }
        lock(&self.state).image.clone()
    }
}

pub struct Registry<C: ArchiveClient + 'static> {
    datasets: RwLock<HashMap<DataId, Arc<Slot>>>,
    fetcher: Arc<Fetcher<C>>,
    sink: Arc<dyn ProgressSink>,
}

impl<C: ArchiveClient + 'static> Registry<C> {
    pub fn new(fetcher: Fetcher<C>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            datasets: RwLock::new(HashMap::new()),
            fetcher: Arc::new(fetcher),
            sink,
        }
    }

    pub fn fetcher(&self) -> &Fetcher<C> {
        &self.fetcher
    }

    /// Returns the dataset for `id`, fetching its metadata on first sight.
    ///
    /// Concurrent first requests for the same id share one metadata fetch:
    /// the first caller holds the slot's fetch lock, the others block on it
    /// and then reuse the published entry. Hits never take the fetch lock.
    /// A failed fetch leaves nothing registered.
    pub fn get_or_create(
        &self,
        id: &DataId,
        votable_url: Option<&str>,
    ) -> Result<Dataset, QlError> {
        loop {
            let slot = self.slot(id);
            if let Some(entry) = slot.published() {
                debug!(data_id = %id, "registry hit");
                return Ok(entry.touch());
            }

            let guard = lock(&slot.fetch);
            if let Some(entry) = slot.published() {
                drop(guard);
                debug!(data_id = %id, "registry hit after wait");
                return Ok(entry.touch());
            }
            if !self.is_current(id, &slot) {
                // Abandoned by a failed fetch; start over with a fresh slot.
                continue;
            }

            debug!(data_id = %id, "registry miss");
            match self.fetcher.fetch_metadata(id, votable_url) {
                Ok(meta) => {
                    let entry = Arc::new(DatasetEntry::new(id.clone(), meta));
                    self.spawn_image_task(&entry);
                    // Only the fetch-lock holder publishes, so the cell is empty.
                    let _ = slot.entry.set(Arc::clone(&entry));
                    drop(guard);
                    return Ok(entry.snapshot());
                }
                Err(err) => {
                    self.abandon(id, &slot);
                    drop(guard);
                    return Err(err);
                }
            }
        }
    }

    /// Current snapshot without creating or touching the entry.
    pub fn snapshot(&self, id: &DataId) -> Option<Dataset> {
        self.entry(id).map(|entry| entry.snapshot())
    }

    pub fn contains(&self, id: &DataId) -> bool {
        self.entry(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.datasets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.entry.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until the image task for `id` has finished or `timeout` elapses.
    pub fn wait_for_image(&self, id: &DataId, timeout: Duration) -> Result<ImageState, QlError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| QlError::Unknown(id.to_string()))?;
        Ok(entry.wait(timeout))
    }

    /// Joins the image task for `id`; later calls return the recorded state.
    pub fn join_image(&self, id: &DataId) -> Result<ImageState, QlError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| QlError::Unknown(id.to_string()))?;
        Ok(entry.join())
    }

    fn slot(&self, id: &DataId) -> Arc<Slot> {
        {
            let datasets = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = datasets.get(id) {
                return Arc::clone(slot);
            }
        }
        let mut datasets = self.datasets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(datasets.entry(id.clone()).or_default())
    }

    fn is_current(&self, id: &DataId, slot: &Arc<Slot>) -> bool {
        self.datasets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn abandon(&self, id: &DataId, slot: &Arc<Slot>) {
        let mut datasets = self.datasets.write().unwrap_or_else(PoisonError::into_inner);
        if datasets
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            datasets.remove(id);
        }
    }

    fn entry(&self, id: &DataId) -> Option<Arc<DatasetEntry>> {
        let slot = {
            let datasets = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(datasets.get(id)?)
        };
        slot.published()
    }

    fn spawn_image_task(&self, entry: &Arc<DatasetEntry>) {
        let fetcher = Arc::clone(&self.fetcher);
        let sink = Arc::clone(&self.sink);
        let task_entry = Arc::clone(entry);
        let spawned = thread::Builder::new()
            .name(format!("image-{}", entry.id))
            .spawn(move || {
                let meta = task_entry.meta();
                let result = fetcher.fetch_image(&task_entry.id, &meta, sink.as_ref());
                task_entry.complete(result);
            });
        match spawned {
            Ok(handle) => *lock(&entry.task) = Some(handle),
            Err(err) => entry.complete(Err(QlError::ImageFetchFailed(format!(
                "spawn image task: {err}"
            )))),
        }
    }
}
