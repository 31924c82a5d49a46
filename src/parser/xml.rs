//! Minimal owned element tree built from quick-xml events.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::UploadError;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Element(Element),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Concatenated direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// First descendant (depth-first, self included) with the given name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.elements().find_map(|e| e.find(name))
    }
}

fn malformed(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> UploadError {
    UploadError::MalformedXml(format!("at byte {}: {}", reader.buffer_position(), err))
}

fn start_element(reader: &Reader<&[u8]>, e: &BytesStart) -> Result<Element, UploadError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| malformed(reader, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| malformed(reader, err))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
    })
}

/// Parses a document into its root element.
pub fn parse(xml: &str) -> Result<Element, UploadError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|err| malformed(&reader, err))?;
        let node = match event {
            Event::Start(e) => {
                stack.push(start_element(&reader, &e)?);
                continue;
            }
            Event::End(_) => {
                let Some(done) = stack.pop() else {
                    return Err(malformed(&reader, "unbalanced end tag"));
                };
                Node::Element(done)
            }
            Event::Empty(e) => Node::Element(start_element(&reader, &e)?),
            Event::Text(e) => Node::Text(
                e.unescape()
                    .map_err(|err| malformed(&reader, err))?
                    .into_owned(),
            ),
            Event::CData(e) => Node::Text(String::from_utf8_lossy(&e.into_inner()).into_owned()),
            Event::Comment(e) => Node::Comment(String::from_utf8_lossy(&e).into_owned()),
            Event::Eof => break,
            _ => continue,
        };

        match (stack.last_mut(), node) {
            (Some(parent), node) => parent.children.push(node),
            (None, Node::Element(e)) => {
                if root.is_some() {
                    return Err(malformed(&reader, "multiple root elements"));
                }
                root = Some(e);
            }
            (None, Node::Text(t)) if t.trim().is_empty() => {}
            (None, Node::Text(_)) => return Err(malformed(&reader, "text outside root element")),
            (None, Node::Comment(_)) => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed(&reader, "unclosed element"));
    }
    root.ok_or_else(|| malformed(&reader, "no root element"))
}
