//! VOTable metadata parser.
//!
//! The document is read into a generic element tree, then walked depth-first.
//! `FIELD` declarations bind a physical column index (`ID="C<n>"`) to a
//! logical column name; each `TD` in a `TR` is dispatched by position through
//! that binding. Column order in the source is therefore irrelevant.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

use crate::domain::DatasetMeta;
use crate::error::QlError;

type Setter = fn(&mut DatasetMeta, &str);

/// Binds a logical column name to the attribute it fills; unknown names
/// yield `None` and are ignored.
fn column_setter(name: &str) -> Option<Setter> {
    let setter: Setter = match name.trim().to_ascii_uppercase().as_str() {
        "DATA_ID" => |meta, value| meta.data_id = value.to_string(),
        "PROC_ID" => |meta, value| meta.process_id = value.to_string(),
        "TITLE" => |meta, value| meta.title = value.to_string(),
        "DATE_OBS" => |meta, value| meta.date_obs = value.to_string(),
        "OBJECTS" => |meta, value| meta.objects = value.to_string(),
        "BAND_NAME" => |meta, value| meta.band_name = value.to_string(),
        "BAND_REFVAL" => |meta, value| meta.band_ref = value.to_string(),
        "BAND_HILIMIT" => |meta, value| meta.band_hi = value.to_string(),
        "BAND_LOLIMIT" => |meta, value| meta.band_lo = value.to_string(),
        "BAND_UNIT" => |meta, value| meta.band_unit = band_unit_entity(value),
        "CENTER_RA" => |meta, value| meta.ra = value.to_string(),
        "CENTER_DEC" => |meta, value| meta.dec = value.to_string(),
        "FILE_SIZE" => set_file_size,
        "PATH" => |meta, value| meta.file_path = value.to_string(),
        "ACCESS_REF" => |meta, value| meta.file_url = unescape_html(value),
        _ => return None,
    };
    Some(setter)
}

/// Generic markup element: tag, attributes and either text or children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart) -> Result<Self, QlError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|err| QlError::MetadataParseFailed(err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| QlError::MetadataParseFailed(err.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    fn is(&self, tag: &str) -> bool {
        self.name.eq_ignore_ascii_case(tag)
    }
}

/// Parses the whole document into a tree rooted at a synthetic `#document`
/// element.
pub fn parse_tree(bytes: &[u8]) -> Result<Element, QlError> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut stack = vec![Element {
        name: "#document".to_string(),
        ..Element::default()
    }];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(Element::from_start(e)?),
            Ok(Event::Empty(ref e)) => {
                let element = Element::from_start(e)?;
                push_child(&mut stack, element)?;
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(QlError::MetadataParseFailed(
                        "unexpected closing tag".to_string(),
                    ));
                }
                let element = stack.pop().ok_or_else(|| {
                    QlError::MetadataParseFailed("unexpected closing tag".to_string())
                })?;
                push_child(&mut stack, element)?;
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| QlError::MetadataParseFailed(err.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(QlError::MetadataParseFailed(format!(
                    "at byte {}: {err}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if stack.len() != 1 {
        return Err(QlError::MetadataParseFailed(
            "document ended inside an open element".to_string(),
        ));
    }
    let document = stack.pop().unwrap_or_default();
    if document.children.is_empty() {
        return Err(QlError::MetadataParseFailed(
            "document has no elements".to_string(),
        ));
    }
    Ok(document)
}

fn push_child(stack: &mut [Element], element: Element) -> Result<(), QlError> {
    let parent = stack
        .last_mut()
        .ok_or_else(|| QlError::MetadataParseFailed("element outside document".to_string()))?;
    parent.children.push(element);
    Ok(())
}

#[derive(Default)]
struct TableWalk {
    columns: HashMap<usize, Setter>,
    counter: usize,
    rows: usize,
    meta: DatasetMeta,
}

impl TableWalk {
    fn visit(&mut self, element: &Element) {
        if element.is("FIELD") {
            self.declare(element);
        } else if element.is("TR") {
            self.counter = 0;
            self.rows += 1;
        } else if element.is("TD") {
            self.counter += 1;
            if let Some(setter) = self.columns.get(&self.counter) {
                setter(&mut self.meta, &element.text);
            }
        }
        for child in &element.children {
            self.visit(child);
        }
    }

    fn declare(&mut self, field: &Element) {
        let Some(index) = field.attribute("ID").and_then(column_index) else {
            return;
        };
        let Some(name) = field.attribute("name") else {
            return;
        };
        if let Some(setter) = column_setter(name) {
            self.columns.insert(index, setter);
        }
    }
}

/// `C12` -> 12.
fn column_index(id: &str) -> Option<usize> {
    id.trim()
        .strip_prefix(['C', 'c'])
        .and_then(|digits| digits.parse().ok())
}

/// Maps a document tree onto dataset attributes.
pub fn read_table(document: &Element) -> Result<DatasetMeta, QlError> {
    let mut walk = TableWalk::default();
    walk.visit(document);
    if walk.rows == 0 {
        return Err(QlError::MetadataParseFailed(
            "VOTable contains no rows".to_string(),
        ));
    }
    Ok(walk.meta)
}

pub fn parse_votable(bytes: &[u8]) -> Result<DatasetMeta, QlError> {
    let document = parse_tree(bytes)?;
    read_table(&document)
}

pub fn band_unit_entity(unit: &str) -> String {
    match unit {
        "A" => "&Aring;".to_string(),
        "um" => "&micro;m".to_string(),
        other => other.to_string(),
    }
}

fn set_file_size(meta: &mut DatasetMeta, value: &str) {
    if let Ok(size) = value.trim().parse::<u64>() {
        meta.file_size = size;
    }
}

/// Access URLs arrive escaped once more than the XML layer undoes.
fn unescape_html(value: &str) -> String {
    unescape(value)
        .map(|text| text.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_index_parsing() {
        assert_eq!(column_index("C1"), Some(1));
        assert_eq!(column_index(" C15 "), Some(15));
        assert_eq!(column_index("X1"), None);
        assert_eq!(column_index("C"), None);
    }

    #[test]
    fn band_unit_substitution() {
        assert_eq!(band_unit_entity("A"), "&Aring;");
        assert_eq!(band_unit_entity("um"), "&micro;m");
        assert_eq!(band_unit_entity("nm"), "nm");
    }

    #[test]
    fn tree_keeps_attributes_and_text() {
        let doc = parse_tree(br#"<ROOT><FIELD ID="C1" name="TITLE"/><TD>a &amp; b</TD></ROOT>"#)
            .unwrap();
        let root = &doc.children[0];
        assert_eq!(root.name, "ROOT");
        assert_eq!(root.children[0].attribute("id"), Some("C1"));
        assert_eq!(root.children[1].text, "a & b");
    }
}
