use std::fmt::Write as _;
use std::io::{self, Write};

use quick_xml::escape::escape;
use serde::Serialize;
use tracing::info;

use crate::app::{DatasetSummary, ProgressEvent, ProgressSink};
use crate::domain::Dataset;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &DatasetSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards download progress to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        info!(
            data_id = %event.data_id,
            received = event.received,
            total = event.total,
            percent = event.percent,
            elapsed_ms = event.elapsed.map(|elapsed| elapsed.as_millis() as u64),
            "{}",
            event.message
        );
    }
}

/// Quick-look page; the client-side viewer reads the `data-*` attributes of
/// the `#votable` element.
pub fn render_page(dataset: &Dataset) -> String {
    let meta = &dataset.meta;
    let attributes = [
        ("dataId", dataset.data_id.as_str()),
        ("procId", meta.process_id.as_str()),
        ("title", meta.title.as_str()),
        ("dateObs", meta.date_obs.as_str()),
        ("objects", meta.objects.as_str()),
        ("bandName", meta.band_name.as_str()),
        ("bandRef", meta.band_ref.as_str()),
        ("bandHi", meta.band_hi.as_str()),
        ("bandLo", meta.band_lo.as_str()),
        ("bandUnit", meta.band_unit.as_str()),
        ("ra", meta.ra.as_str()),
        ("dec", meta.dec.as_str()),
        ("filePath", meta.file_path.as_str()),
        ("fileUrl", meta.file_url.as_str()),
    ];

    let mut page = String::new();
    page.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(page, "<title>{}</title>", escape(dataset.data_id.as_str()));
    page.push_str("<link rel=\"stylesheet\" href=\"subaruwebql.css\"/>\n");
    page.push_str("<script src=\"subaruwebql.js\"></script>\n</head>\n<body>\n");
    page.push_str("<div id=\"votable\" style=\"width: 0; height: 0;\"");
    for (name, value) in attributes {
        let _ = write!(page, " data-{name}=\"{}\"", escape(value));
    }
    let _ = write!(page, " data-fileSize=\"{}\"", meta.file_size);
    page.push_str("></div>\n");
    page.push_str("<div id=\"mainDiv\" class=\"main\"></div>\n");
    page.push_str("<script>main();</script>\n</body>\n</html>\n");
    page
}
