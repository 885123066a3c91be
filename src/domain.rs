use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::error::QlError;

static DATA_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid data id pattern"));

pub const HISTOGRAM_BINS: usize = 1024;

/// Observation identifier, e.g. `SUPA01234567`. Doubles as the cache file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DataId(String);

impl DataId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DataId {
    type Err = QlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(QlError::InvalidRequest("dataId is empty".to_string()));
        }
        if trimmed == "." || trimmed == ".." || !DATA_ID_PATTERN.is_match(trimmed) {
            return Err(QlError::InvalidRequest(format!(
                "dataId contains unsupported characters: {value}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Attributes read from one VOTable row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetMeta {
    pub data_id: String,
    pub process_id: String,
    pub title: String,
    pub date_obs: String,
    pub objects: String,
    pub band_name: String,
    pub band_ref: String,
    pub band_hi: String,
    pub band_lo: String,
    pub band_unit: String,
    pub ra: String,
    pub dec: String,
    pub file_size: u64,
    pub file_path: String,
    pub file_url: String,
}

/// Keyword values carried through from the primary FITS header.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageHeader {
    pub bitpix: i64,
    pub naxis: i64,
    pub width: usize,
    pub height: usize,
    pub ignrval: f64,
    pub crval1: f64,
    pub crval2: f64,
    pub cdelt1: f64,
    pub cdelt2: f64,
    pub crpix1: f64,
    pub crpix2: f64,
    pub cd1_1: f64,
    pub cd1_2: f64,
    pub cd2_1: f64,
    pub cd2_2: f64,
    /// Byte offset of the first pixel, always a multiple of 2880.
    pub data_offset: usize,
}

impl ImageHeader {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// A fully decoded frame.
///
/// The statistics fields belong to the rendering pipeline; they are
/// allocated zeroed here and never computed by this crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    pub header: ImageHeader,
    #[serde(skip)]
    pub pixels: Vec<f32>,
    pub min: f32,
    pub max: f32,
    #[serde(skip)]
    pub histogram: Vec<u32>,
    pub median: f32,
    pub mad: f32,
    pub black: f32,
    pub sensitivity: f32,
    #[serde(skip)]
    pub color_bytes: Vec<u8>,
}

impl Image {
    pub fn new(header: ImageHeader, pixels: Vec<f32>) -> Self {
        Self {
            header,
            pixels,
            min: 0.0,
            max: 0.0,
            histogram: vec![0; HISTOGRAM_BINS],
            median: 0.0,
            mad: 0.0,
            black: 0.0,
            sensitivity: 0.0,
            color_bytes: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.header.width
    }

    pub fn height(&self) -> usize {
        self.header.height
    }
}

/// Progress of the background image task for one dataset.
#[derive(Debug, Clone, Default)]
pub enum ImageState {
    #[default]
    Pending,
    Ready(Arc<Image>),
    Failed(QlError),
}

impl ImageState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ImageState::Pending)
    }

    pub fn image(&self) -> Option<&Arc<Image>> {
        match self {
            ImageState::Ready(image) => Some(image),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QlError> {
        match self {
            ImageState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ImageState::Pending => "pending",
            ImageState::Ready(_) => "ready",
            ImageState::Failed(_) => "failed",
        }
    }
}

/// Read-only copy of a registry entry handed to callers.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub data_id: DataId,
    pub meta: DatasetMeta,
    pub last_access: DateTime<Utc>,
    pub image: ImageState,
}

impl Dataset {
    pub fn image(&self) -> Option<&Arc<Image>> {
        self.image.image()
    }
}
