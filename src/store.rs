use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::ResolvedConfig;
use crate::domain::DataId;
use crate::error::QlError;

/// On-disk cache layout. A file at its final name is the only cache-hit
/// signal; downloads land in `<name>.tmp` and are renamed when complete.
#[derive(Debug, Clone)]
pub struct Store {
    metadata_root: Utf8PathBuf,
    image_root: Utf8PathBuf,
}

impl Store {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self::new_with_paths(config.metadata_cache.clone(), config.image_cache.clone())
    }

    pub fn new_with_paths(metadata_root: Utf8PathBuf, image_root: Utf8PathBuf) -> Self {
        Self {
            metadata_root,
            image_root,
        }
    }

    pub fn metadata_path(&self, id: &DataId) -> Utf8PathBuf {
        self.metadata_root.join(format!("{id}.xml"))
    }

    pub fn image_path(&self, id: &DataId) -> Utf8PathBuf {
        self.image_root.join(format!("{id}.fits"))
    }

    pub fn ensure_roots(&self) -> Result<(), QlError> {
        for root in [&self.metadata_root, &self.image_root] {
            fs::create_dir_all(root.as_std_path())
                .map_err(|err| QlError::Filesystem(format!("create {root}: {err}")))?;
        }
        Ok(())
    }

    pub fn exists(path: &Utf8Path) -> bool {
        path.as_std_path().is_file()
    }

    pub fn read(path: &Utf8Path) -> Result<Vec<u8>, QlError> {
        fs::read(path.as_std_path()).map_err(|err| QlError::Filesystem(format!("read {path}: {err}")))
    }

    /// `SUPA0.fits` -> `SUPA0.fits.tmp`.
    pub fn temp_path(path: &Utf8Path) -> Utf8PathBuf {
        let mut name = path.as_str().to_string();
        name.push_str(".tmp");
        Utf8PathBuf::from(name)
    }

    pub fn commit(tmp_path: &Utf8Path, path: &Utf8Path) -> Result<(), QlError> {
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| QlError::Filesystem(format!("rename {tmp_path} -> {path}: {err}")))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), QlError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| QlError::Filesystem(err.to_string()))?;
        }
        let tmp_path = Self::temp_path(path);
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| QlError::Filesystem(format!("write {tmp_path}: {err}")))?;
        Self::commit(&tmp_path, path)
    }
}
