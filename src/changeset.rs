//! Change-set documents
//!
//! A change-set is one XML document describing everything a check-in sends.
//! Each node is a `<resource>` element; collections wrap their members in
//! `<children>`, resources embed their bytes base64-encoded in `<content>`:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <resource name="ws" isCollection="true">
//!     <children>
//!         <resource name="a.txt" status="added" isCollection="false">
//!             <mediaType>txt</mediaType>
//!             <content>aGVsbG8=</content>
//!         </resource>
//!         <resource name="sub" isCollection="true">
//!             <children>
//!                 <resource name="old.txt" status="deleted" isCollection="false"/>
//!             </children>
//!         </resource>
//!     </children>
//! </resource>
//! ```
//!
//! ## Streaming
//!
//! [`ChangeSetWriter`] writes depth-first in a single pass and never holds
//! more than the chain of open collections. The root collection is opened
//! immediately. A nested collection with nothing of its own to send stays
//! pending until its first changed descendant is written, so untouched
//! subtrees leave no trace in the document. Content is encoded straight from
//! the file into the output.
//!
//! ## Reading
//!
//! [`parse_document`] reads a document back into a [`ChangeSetEntry`] tree.
//! Unlike the writer it holds the whole document, which suits the repository
//! side and tests.

use crate::error::{Result, SyncError};
use crate::meta::{
    RecordedStatus, ATTR_IGNORE_CONFLICTS, ATTR_IS_COLLECTION, ATTR_NAME, ATTR_STATUS,
    RESOURCE_ELEMENT,
};
use crate::xml::{self, XmlElement, XmlNode};
use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use base64::Engine as _;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::trace;

/// Wrapper element for the members of a collection
pub const CHILDREN_ELEMENT: &str = "children";
/// Element holding base64 content
pub const CONTENT_ELEMENT: &str = "content";

/// Record children copied into the change-set, in this order of preference
pub const DUMP_ELEMENTS: &[&str] = &[
    "mediaType",
    "creator",
    "createdTime",
    "lastUpdater",
    "lastModified",
    "description",
    "properties",
    "comments",
    "taggings",
    "ratings",
    "version",
    "associations",
];

/// Build the change-set head of a node from its sidecar record
///
/// Keeps `name`, `status`, `ignoreConflicts` and `isCollection`, plus the
/// record children listed in [`DUMP_ELEMENTS`]. Location attributes such as
/// `path`, `md5` and `registryUrl` stay local.
pub fn dump_head(record: &XmlElement, is_collection: bool) -> XmlElement {
    let mut head = XmlElement::new(RESOURCE_ELEMENT);
    head.set_attribute(ATTR_NAME, record.attribute(ATTR_NAME).unwrap_or_default());
    if let Some(status) = record.attribute(ATTR_STATUS) {
        head.set_attribute(ATTR_STATUS, status);
    }
    if let Some(ignore) = record.attribute(ATTR_IGNORE_CONFLICTS) {
        head.set_attribute(ATTR_IGNORE_CONFLICTS, ignore);
    }
    head.set_attribute(ATTR_IS_COLLECTION, is_collection.to_string());
    for child in record.elements() {
        if DUMP_ELEMENTS.contains(&child.name.as_str()) {
            head.push_element(child.clone());
        }
    }
    head
}

struct Frame {
    /// Head still to be written; `None` once the collection is open
    pending: Option<XmlElement>,
}

/// Streaming change-set writer
pub struct ChangeSetWriter<W: Write> {
    writer: Writer<W>,
    frames: Vec<Frame>,
    nodes_written: usize,
}

impl<W: Write> ChangeSetWriter<W> {
    /// Start a document on `inner`
    ///
    /// # Errors
    ///
    /// - [`SyncError::Staging`] if the declaration cannot be written
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = Self {
            writer: Writer::new(inner),
            frames: Vec::new(),
            nodes_written: 0,
        };
        writer.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(writer)
    }

    /// Enter a collection
    ///
    /// With `open_now` the collection and any pending ancestors are written
    /// immediately; otherwise it waits for its first changed descendant.
    pub fn begin_directory(&mut self, record: &XmlElement, open_now: bool) -> Result<()> {
        self.frames.push(Frame {
            pending: Some(dump_head(record, true)),
        });
        if open_now {
            self.open_pending()?;
        }
        Ok(())
    }

    /// Leave the current collection, closing it when it was written
    pub fn end_directory(&mut self) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| SyncError::internal("end_directory without an open collection"))?;
        if frame.pending.is_none() {
            self.emit(Event::End(BytesEnd::new(CHILDREN_ELEMENT)))?;
            self.emit(Event::End(BytesEnd::new(RESOURCE_ELEMENT)))?;
        }
        Ok(())
    }

    /// Write one resource, embedding the content of `content` when given
    ///
    /// Returns the number of content bytes embedded.
    ///
    /// # Errors
    ///
    /// - [`SyncError::MissingContent`] if the content file does not exist
    /// - [`SyncError::Staging`] if the output cannot be written
    pub fn write_resource(&mut self, record: &XmlElement, content: Option<&Path>) -> Result<u64> {
        self.open_pending()?;
        let head = dump_head(record, false);

        if content.is_none() && head.children.is_empty() {
            self.emit(Event::Empty(head.start_tag()))?;
            self.nodes_written += 1;
            return Ok(0);
        }

        self.emit(Event::Start(head.start_tag()))?;
        self.write_head_children(&head)?;
        let bytes = match content {
            Some(path) => self.write_content(path)?,
            None => 0,
        };
        self.emit(Event::End(BytesEnd::new(RESOURCE_ELEMENT)))?;
        self.nodes_written += 1;
        Ok(bytes)
    }

    /// Number of open or pending collections
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of nodes written so far, collections included
    pub fn nodes_written(&self) -> usize {
        self.nodes_written
    }

    /// Finish the document and hand back the flushed output
    pub fn finish(self) -> Result<W> {
        if !self.frames.is_empty() {
            return Err(SyncError::internal(format!(
                "change-set finished with {} open collections",
                self.frames.len()
            )));
        }
        let mut inner = self.writer.into_inner();
        inner
            .flush()
            .map_err(|e| SyncError::staging(format!("cannot flush change-set: {}", e)))?;
        Ok(inner)
    }

    fn open_pending(&mut self) -> Result<()> {
        for idx in 0..self.frames.len() {
            if let Some(head) = self.frames[idx].pending.take() {
                self.emit(Event::Start(head.start_tag()))?;
                self.write_head_children(&head)?;
                self.emit(Event::Start(BytesStart::new(CHILDREN_ELEMENT)))?;
                self.nodes_written += 1;
            }
        }
        Ok(())
    }

    fn write_head_children(&mut self, head: &XmlElement) -> Result<()> {
        for child in &head.children {
            if let XmlNode::Element(element) = child {
                xml::write_element(&mut self.writer, element)
                    .map_err(|e| SyncError::staging(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn write_content(&mut self, path: &Path) -> Result<u64> {
        let mut file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SyncError::MissingContent(path.to_path_buf()),
            _ => SyncError::Io(e),
        })?;

        self.emit(Event::Start(BytesStart::new(CONTENT_ELEMENT)))?;
        let bytes = {
            let mut encoder = EncoderWriter::new(self.writer.get_mut(), &STANDARD);
            let bytes = io::copy(&mut file, &mut encoder).map_err(|e| {
                SyncError::staging(format!("cannot embed {:?}: {}", path, e))
            })?;
            encoder
                .finish()
                .map_err(|e| SyncError::staging(format!("cannot embed {:?}: {}", path, e)))?;
            bytes
        };
        self.emit(Event::End(BytesEnd::new(CONTENT_ELEMENT)))?;
        trace!("Embedded {} bytes from {:?}", bytes, path);
        Ok(bytes)
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| SyncError::staging(e.to_string()))?;
        Ok(())
    }
}

/// A node of a parsed change-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetEntry {
    /// Resource name
    pub name: String,
    /// Whether the node is a collection
    pub is_collection: bool,
    /// Status carried by the node
    pub status: RecordedStatus,
    /// Conflict-suppression flag, when present
    pub ignore_conflicts: Option<bool>,
    /// Metadata child elements
    pub metadata: Vec<XmlElement>,
    /// Decoded content, for resources that embed it
    pub content: Option<Vec<u8>>,
    /// Members, for collections
    pub children: Vec<ChangeSetEntry>,
}

impl ChangeSetEntry {
    /// Find a descendant by slash-separated relative path
    pub fn find(&self, relative: &str) -> Option<&ChangeSetEntry> {
        let mut current = self;
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            current = current.children.iter().find(|c| c.name == segment)?;
        }
        Some(current)
    }

    /// Number of nodes in this subtree that carry a status
    pub fn change_count(&self) -> usize {
        let own = usize::from(self.status != RecordedStatus::Unchanged);
        own + self.children.iter().map(ChangeSetEntry::change_count).sum::<usize>()
    }

    /// Text of a metadata element
    pub fn metadata_text(&self, name: &str) -> Option<String> {
        self.metadata.iter().find(|e| e.name == name).map(XmlElement::text)
    }
}

/// Parse a change-set document
///
/// # Errors
///
/// - [`SyncError::Xml`] if the document is malformed or a node is invalid
pub fn parse_document<R: BufRead>(input: R) -> Result<ChangeSetEntry> {
    let root = xml::parse_element(input)?;
    entry_from_element(root)
}

fn entry_from_element(element: XmlElement) -> Result<ChangeSetEntry> {
    if element.name != RESOURCE_ELEMENT {
        return Err(SyncError::xml(format!(
            "unexpected <{}> in change-set",
            element.name
        )));
    }
    let status = element
        .attribute(ATTR_STATUS)
        .unwrap_or("")
        .parse::<RecordedStatus>()
        .map_err(SyncError::xml)?;
    let mut entry = ChangeSetEntry {
        name: element.attribute(ATTR_NAME).unwrap_or_default().to_string(),
        is_collection: element.attribute(ATTR_IS_COLLECTION) == Some("true"),
        status,
        ignore_conflicts: element
            .attribute(ATTR_IGNORE_CONFLICTS)
            .map(|v| v.eq_ignore_ascii_case("true")),
        metadata: Vec::new(),
        content: None,
        children: Vec::new(),
    };

    for child in element.children {
        let XmlNode::Element(child) = child else {
            continue;
        };
        match child.name.as_str() {
            CHILDREN_ELEMENT => {
                for member in child.children {
                    if let XmlNode::Element(member) = member {
                        entry.children.push(entry_from_element(member)?);
                    }
                }
            }
            CONTENT_ELEMENT => {
                let encoded: String = child.text().split_whitespace().collect();
                let decoded = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| SyncError::xml(format!("bad content of {}: {}", entry.name, e)))?;
                entry.content = Some(decoded);
            }
            _ => entry.metadata.push(child),
        }
    }
    Ok(entry)
}
