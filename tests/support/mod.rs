#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use quick_xml::escape::escape;

use subaru_ql::app::{ProgressEvent, ProgressSink};
use subaru_ql::client::{ArchiveClient, RemoteResponse, Resource};
use subaru_ql::config::{Config, ConfigLoader, ResolvedConfig};
use subaru_ql::error::QlError;

pub const DATA_ID: &str = "SUPA01234567";
pub const IMAGE_URL: &str = "https://archive.example.org/fits/SUPA01234567.fits";

#[derive(Clone, Default)]
pub struct Route {
    pub body: Vec<u8>,
    pub content_encoding: Option<String>,
    pub delay: Option<Duration>,
    pub chunk: Option<usize>,
}

impl Route {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }
}

/// Serves canned bodies by exact URL and records every request.
#[derive(Default)]
pub struct MockClient {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn route(&self, url: &str, route: Route) {
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|call| call.as_str() == url).count()
    }
}

impl ArchiveClient for MockClient {
    fn get(&self, url: &str, resource: Resource) -> Result<RemoteResponse, QlError> {
        self.calls.lock().unwrap().push(url.to_string());
        let route = self.routes.lock().unwrap().get(url).cloned();
        let Some(route) = route else {
            let message = "not found".to_string();
            return Err(match resource {
                Resource::Metadata => QlError::MetadataStatus {
                    status: 404,
                    message,
                },
                Resource::Image => QlError::ImageStatus {
                    status: 404,
                    message,
                },
            });
        };
        if let Some(delay) = route.delay {
            thread::sleep(delay);
        }
        let length = route.body.len() as u64;
        let mut response = match route.chunk {
            Some(size) => RemoteResponse::from_reader(ChunkedReader {
                inner: Cursor::new(route.body),
                size,
            }),
            None => RemoteResponse::from_reader(Cursor::new(route.body)),
        };
        response.content_encoding = route.content_encoding;
        response.content_length = Some(length);
        Ok(response)
    }
}

/// Hands out at most `size` bytes per read, like a slow network stream.
struct ChunkedReader {
    inner: Cursor<Vec<u8>>,
    size: usize,
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let limit = buf.len().min(self.size);
        self.inner.read(&mut buf[..limit])
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn test_config(root: &std::path::Path) -> ResolvedConfig {
    let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap();
    ConfigLoader::resolve_config(Config {
        metadata_cache: Some(root.join("votable").to_string()),
        image_cache: Some(root.join("fits").to_string()),
        ..Config::default()
    })
    .unwrap()
}

/// Columns in declaration order; `C<n>` follows the position.
pub fn votable(columns: &[(&str, &str)]) -> Vec<u8> {
    let mut doc = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <VOTABLE version=\"1.2\" xmlns=\"http://www.ivoa.net/xml/VOTable/v1.2\">\n\
         <RESOURCE type=\"results\">\n<TABLE>\n",
    );
    for (index, (name, _)) in columns.iter().enumerate() {
        doc.push_str(&format!(
            "<FIELD ID=\"C{}\" name=\"{}\" datatype=\"char\" arraysize=\"*\"/>\n",
            index + 1,
            name
        ));
    }
    doc.push_str("<DATA>\n<TABLEDATA>\n<TR>");
    for (_, value) in columns {
        doc.push_str(&format!("<TD>{}</TD>", escape(*value)));
    }
    doc.push_str("</TR>\n</TABLEDATA>\n</DATA>\n</TABLE>\n</RESOURCE>\n</VOTABLE>\n");
    doc.into_bytes()
}

pub fn sample_columns(file_size: u64, access_ref: &str) -> Vec<(&'static str, String)> {
    vec![
        ("DATA_ID", DATA_ID.to_string()),
        ("PROC_ID", "SUP-2008-0042".to_string()),
        ("TITLE", "M31 disk".to_string()),
        ("DATE_OBS", "2008-09-29".to_string()),
        ("OBJECTS", "M31".to_string()),
        ("EXPTIME", "240".to_string()),
        ("BAND_NAME", "W-C-RC".to_string()),
        ("BAND_REFVAL", "6517.0".to_string()),
        ("BAND_HILIMIT", "7200".to_string()),
        ("BAND_LOLIMIT", "5800".to_string()),
        ("BAND_UNIT", "A".to_string()),
        ("CENTER_RA", "10.6847".to_string()),
        ("CENTER_DEC", "41.2690".to_string()),
        ("FILE_SIZE", file_size.to_string()),
        ("PATH", "/spcam/2008-09-29/SUPA01234567.fits".to_string()),
        ("ACCESS_REF", access_ref.to_string()),
    ]
}

pub fn sample_votable(file_size: u64, access_ref: &str) -> Vec<u8> {
    let columns = sample_columns(file_size, access_ref);
    let borrowed: Vec<(&str, &str)> = columns
        .iter()
        .map(|(name, value)| (*name, value.as_str()))
        .collect();
    votable(&borrowed)
}

fn card(text: &str) -> Vec<u8> {
    let mut line = text.as_bytes().to_vec();
    line.resize(80, b' ');
    line
}

fn value_card(keyword: &str, value: &str) -> Vec<u8> {
    card(&format!("{keyword:<8}= {value:>20}"))
}

/// Header cards without `END`, so callers can append extras.
pub fn header_cards(bitpix: i64, width: usize, height: usize) -> Vec<u8> {
    let mut header = Vec::new();
    header.extend(value_card("SIMPLE", "T"));
    header.extend(value_card("BITPIX", &bitpix.to_string()));
    header.extend(value_card("NAXIS", "2"));
    header.extend(value_card("NAXIS1", &width.to_string()));
    header.extend(value_card("NAXIS2", &height.to_string()));
    header.extend(value_card("IGNRVAL", "-32768.0"));
    header.extend(value_card("CRVAL1", "10.6847"));
    header.extend(value_card("CRVAL2", "41.2690"));
    header.extend(value_card("CRPIX1", "1024.5"));
    header.extend(value_card("CRPIX2", "2088.5"));
    header.extend(value_card("CDELT1", "-5.6E-05"));
    header.extend(value_card("CDELT2", "5.6E-05"));
    header.extend(value_card("CD1_1", "-5.6E-05"));
    header.extend(value_card("CD1_2", "0.0"));
    header.extend(value_card("CD2_1", "0.0"));
    header.extend(value_card("CD2_2", "5.6E-05"));
    header
}

pub fn card_padding(count: usize) -> Vec<u8> {
    (0..count)
        .flat_map(|index| card(&format!("COMMENT   filler card {index}")))
        .collect()
}

pub fn finish_fits(mut header: Vec<u8>, pixels: &[f32]) -> Vec<u8> {
    header.extend(card("END"));
    header.resize(header.len().div_ceil(2880) * 2880, b' ');
    for value in pixels {
        header.extend_from_slice(&value.to_be_bytes());
    }
    header.resize(header.len().div_ceil(2880) * 2880, 0);
    header
}

pub fn fits_bytes(width: usize, height: usize, pixels: &[f32]) -> Vec<u8> {
    finish_fits(header_cards(-32, width, height), pixels)
}

pub fn ramp(count: usize) -> Vec<f32> {
    (0..count).map(|index| index as f32 * 0.25 - 100.0).collect()
}
