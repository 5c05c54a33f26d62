//! Owned XML element tree
//!
//! Sidecar records are small documents whose unknown attributes and child
//! elements must survive a rewrite untouched. This module keeps them as a
//! plain owned tree. Attribute order is preserved, and text and element
//! children are kept in document order with their text verbatim. Only the
//! whitespace-only runs between child elements are dropped.

use crate::error::{Result, SyncError};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::{BufRead, Write};

/// Child of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// Nested element
    Element(XmlElement),
    /// Character data
    Text(String),
}

/// An element with its attributes and children
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    /// Tag name
    pub name: String,
    /// Attributes in document order
    pub attributes: Vec<(String, String)>,
    /// Children in document order
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Value of an attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing its value in place when present
    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    /// Remove an attribute, returning its value
    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(idx).1)
    }

    /// Child elements in document order
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element with the given name
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name == name)
    }

    /// Concatenated text content of this element
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Text of the first child element with the given name
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(XmlElement::text)
    }

    /// Replace the text of a child element, creating the child when missing
    pub fn set_child_text(&mut self, name: &str, text: impl Into<String>) {
        let text = text.into();
        let content = if text.is_empty() {
            Vec::new()
        } else {
            vec![XmlNode::Text(text)]
        };
        for child in self.children.iter_mut() {
            if let XmlNode::Element(element) = child {
                if element.name == name {
                    element.children = content;
                    return;
                }
            }
        }
        let mut element = XmlElement::new(name);
        element.children = content;
        self.children.push(XmlNode::Element(element));
    }

    /// Append an empty child element unless one with that name exists
    pub fn ensure_child(&mut self, name: &str) {
        if self.child(name).is_none() {
            self.children.push(XmlNode::Element(XmlElement::new(name)));
        }
    }

    /// Append a child element
    pub fn push_element(&mut self, element: XmlElement) {
        self.children.push(XmlNode::Element(element));
    }

    /// Drop whitespace-only text between child elements
    ///
    /// Leaf elements keep all their text.
    fn drop_indentation(&mut self) {
        if self.elements().next().is_none() {
            return;
        }
        self.children.retain(|child| match child {
            XmlNode::Text(text) => !text.trim().is_empty(),
            XmlNode::Element(_) => true,
        });
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    /// Start tag carrying this element's name and attributes
    pub fn start_tag(&self) -> BytesStart<'_> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        start
    }
}

/// Parse the root element of a document
///
/// # Errors
///
/// - [`SyncError::Xml`] if the document is malformed or holds no element
pub fn parse_element<R: BufRead>(input: R) -> Result<XmlElement> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => stack.push(XmlElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.push_element(element),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| SyncError::xml("unbalanced end tag"))?;
                element.drop_indentation();
                match stack.last_mut() {
                    Some(parent) => parent.push_element(element),
                    None => return Ok(element),
                }
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    let text = text.unescape()?.into_owned();
                    if !text.is_empty() {
                        parent.children.push(XmlNode::Text(text));
                    }
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::Eof => return Err(SyncError::xml("document ended before its root element closed")),
            _ => {}
        }
        buf.clear();
    }
}

/// Serialize an element and everything below it
pub fn write_element<W: Write>(writer: &mut Writer<W>, element: &XmlElement) -> Result<()> {
    if element.children.is_empty() {
        writer.write_event(Event::Empty(element.start_tag()))?;
        return Ok(());
    }
    writer.write_event(Event::Start(element.start_tag()))?;
    for child in &element.children {
        match child {
            XmlNode::Element(nested) => write_element(writer, nested)?,
            XmlNode::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

/// Serialize an element as a standalone document
pub fn to_document(element: &XmlElement) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(quick_xml::events::BytesDecl::new(
        "1.0",
        Some("UTF-8"),
        None,
    )))?;
    write_element(&mut writer, element)?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_attributes_and_children_in_order() {
        let doc = br#"<?xml version="1.0"?>
<resource name="a.txt" path="/ws/a.txt" isCollection="false" custom="x&amp;y">
    <mediaType>text/plain</mediaType>
    <properties><property key="k">v</property></properties>
    <uuid/>
</resource>"#;
        let element = parse_element(&doc[..]).unwrap();

        assert_eq!(element.name, "resource");
        assert_eq!(element.attribute("custom"), Some("x&y"));
        assert_eq!(element.attributes[0].0, "name");
        let names: Vec<&str> = element.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["mediaType", "properties", "uuid"]);
        assert_eq!(element.child_text("mediaType").as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_write_then_parse_preserves_tree() {
        let mut element = XmlElement::new("resource");
        element.set_attribute("name", "a <b>");
        element.set_child_text("description", "one & two");
        element.ensure_child("uuid");

        let bytes = to_document(&element).unwrap();
        let parsed = parse_element(&bytes[..]).unwrap();
        assert_eq!(parsed, element);
    }

    #[test]
    fn test_text_is_kept_verbatim() {
        let doc = b"<resource>\n  <description>  two  spaces\n</description>\n  <uuid>   </uuid>\n</resource>";
        let element = parse_element(&doc[..]).unwrap();

        assert_eq!(element.children.len(), 2);
        assert_eq!(element.child_text("description").as_deref(), Some("  two  spaces\n"));
        assert_eq!(element.child_text("uuid").as_deref(), Some("   "));

        let reparsed = parse_element(&to_document(&element).unwrap()[..]).unwrap();
        assert_eq!(reparsed, element);
    }

    #[test]
    fn test_set_and_remove_attribute() {
        let mut element = XmlElement::new("resource");
        element.set_attribute("status", "added");
        element.set_attribute("status", "updated");
        assert_eq!(element.attributes.len(), 1);
        assert_eq!(element.remove_attribute("status").as_deref(), Some("updated"));
        assert!(element.attribute("status").is_none());
    }

    #[test]
    fn test_truncated_document_is_an_error() {
        let result = parse_element(&b"<resource name=\"a\"><children>"[..]);
        assert!(matches!(result, Err(SyncError::Xml(_))));
    }
}
