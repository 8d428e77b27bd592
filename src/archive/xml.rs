//! The reference backend: an XML element/attribute tree.
//!
//! The document is materialized as an in-memory element tree and only
//! touches text at the edges: [`XmlArchive::untyped_data`] renders the tree
//! through `quick-xml`, [`XmlArchive::begin_unarchiving`] parses text back
//! into a tree. Positioning is a stack of child indices into the tree; the
//! scoped openers push before running the inner action and pop on every
//! exit path.
//!
//! ## Wire shape
//!
//! ```text
//! <archive version="1.0.0" type="org.dsource.orange.xml">
//!   <data>
//!     <object runtimeType="B" type="B" key="0" id="0">
//!       <int key="value" id="1">7</int>
//!     </object>
//!   </data>
//! </archive>
//! ```
//!
//! Element names encode kinds (`object`, `struct`, `array`,
//! `associativeArray`, `string`, `pointer`, `reference`, `base`, `null`,
//! `enum`, `typedef`, `slice`, or a primitive type name). No declaration,
//! no pretty-printing: two runs over equal input produce byte-identical
//! documents.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{ErrorCallback, Result, TangerineError, report, throw_on_error};
use crate::id::Id;

use super::{
    Archive, ArrayHeader, AssocHeader, BaseHeader, EnumNode, NodeKind, ObjectHeader,
    PrimitiveNode, Slice, SliceNode, StringNode, StructHeader, TypedefHeader,
};

/// The archive-type attribute of the document root.
pub const ARCHIVE_TYPE: &str = "org.dsource.orange.xml";

/// The format version attribute of the document root.
pub const ARCHIVE_VERSION: &str = "1.0.0";

/// One element of the document tree.
#[derive(Debug, Clone, Default)]
pub(crate) struct Element {
    pub(crate) name: String,
    pub(crate) attrs: Vec<(String, String)>,
    pub(crate) text: String,
    pub(crate) children: Vec<Element>,
}

impl Element {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs.push((name.to_string(), value.into()));
        self
    }

    fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn id(&self) -> Id {
        self.attr("id").and_then(Id::parse).unwrap_or(Id::NONE)
    }

    fn find_by_id_mut(&mut self, id: Id) -> Option<&mut Element> {
        if self.id() == id {
            return Some(self);
        }
        for child in &mut self.children {
            if let Some(found) = child.find_by_id_mut(id) {
                return Some(found);
            }
        }
        None
    }
}

fn kind_of(name: &str) -> NodeKind {
    match name {
        "object" => NodeKind::Object,
        "struct" => NodeKind::Struct,
        "array" => NodeKind::Array,
        "associativeArray" => NodeKind::AssociativeArray,
        "string" => NodeKind::String,
        "pointer" => NodeKind::Pointer,
        "reference" => NodeKind::Reference,
        "base" => NodeKind::Base,
        "null" => NodeKind::Null,
        "enum" => NodeKind::Enum,
        "typedef" => NodeKind::Typedef,
        "slice" => NodeKind::Slice,
        _ => NodeKind::Primitive,
    }
}

/// The reference tree-document archive.
pub struct XmlArchive {
    data: Element,
    cursor: Vec<usize>,
    has_document: bool,
    callback: ErrorCallback,
}

impl Default for XmlArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlArchive {
    /// Creates an empty archive with the raising error callback.
    pub fn new() -> Self {
        Self {
            data: Element::new("data"),
            cursor: Vec::new(),
            has_document: false,
            callback: throw_on_error(),
        }
    }

    fn malformed(&self, msg: impl Into<String>) -> Result<()> {
        report(&self.callback, TangerineError::MalformedArchive(msg.into()))
    }

    fn current(&self) -> Option<&Element> {
        let mut el = &self.data;
        for &i in &self.cursor {
            el = el.children.get(i)?;
        }
        Some(el)
    }

    fn current_mut(&mut self) -> Option<&mut Element> {
        let mut el = &mut self.data;
        for &i in &self.cursor {
            el = el.children.get_mut(i)?;
        }
        Some(el)
    }

    fn append_child(&mut self, el: Element) -> Result<usize> {
        if let (Some(key), Some(parent)) = (el.attr("key"), self.current()) {
            if parent.children.iter().any(|c| c.attr("key") == Some(key)) {
                self.malformed(format!("duplicate key `{key}` in scope"))?;
            }
        }
        let parent = self
            .current_mut()
            .ok_or_else(|| TangerineError::ApiMisuse("archive cursor out of scope".into()))?;
        parent.children.push(el);
        Ok(parent.children.len() - 1)
    }

    fn emit_scoped(
        &mut self,
        el: Element,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        let idx = self.append_child(el)?;
        self.cursor.push(idx);
        let result = inner(self);
        self.cursor.pop();
        result
    }

    /// Locates the child carrying `key` in the current scope, flagging
    /// duplicate keys through the error callback.
    fn find_index(&self, key: &str) -> Result<Option<usize>> {
        if !self.has_document {
            report(
                &self.callback,
                TangerineError::ApiMisuse("archive read before begin_unarchiving".into()),
            )?;
            return Ok(None);
        }
        let Some(parent) = self.current() else {
            return Ok(None);
        };
        let mut found = None;
        for (i, child) in parent.children.iter().enumerate() {
            if child.attr("key") == Some(key) {
                if found.is_some() {
                    self.malformed(format!("duplicate key `{key}` in scope"))?;
                    break;
                }
                found = Some(i);
            }
        }
        Ok(found)
    }

    fn find_element(&self, key: &str) -> Result<Option<(usize, &Element)>> {
        let Some(idx) = self.find_index(key)? else {
            return Ok(None);
        };
        let el = self.current().and_then(|p| p.children.get(idx));
        Ok(el.map(|e| (idx, e)))
    }

    /// Reads a leaf element, verifying its name when `expect` is given.
    fn read_leaf(&self, key: &str, expect: Option<&str>) -> Result<Option<Element>> {
        let Some((_, el)) = self.find_element(key)? else {
            self.malformed(format!("missing element for key `{key}`"))?;
            return Ok(None);
        };
        if let Some(name) = expect {
            if el.name != name {
                self.malformed(format!(
                    "expected `{name}` under key `{key}`, found `{}`",
                    el.name
                ))?;
                return Ok(None);
            }
        }
        Ok(Some(el.clone()))
    }

    /// Positions into the child element under `key`, verifying its name,
    /// and hands the (cloned) element header to the caller.
    fn read_scoped(
        &mut self,
        key: &str,
        expect: &str,
        inner: &mut dyn FnMut(&mut XmlArchive, Element) -> Result<()>,
    ) -> Result<()> {
        let Some((idx, el)) = self.find_element(key)? else {
            self.malformed(format!("missing `{expect}` element for key `{key}`"))?;
            return Ok(());
        };
        if el.name != expect {
            let found = el.name.clone();
            self.malformed(format!(
                "expected `{expect}` under key `{key}`, found `{found}`"
            ))?;
            return Ok(());
        }
        let header = el.clone();
        self.cursor.push(idx);
        let result = inner(self, header);
        self.cursor.pop();
        result
    }

    fn render(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        let mut root = BytesStart::new("archive");
        root.push_attribute(("version", ARCHIVE_VERSION));
        root.push_attribute(("type", ARCHIVE_TYPE));
        writer
            .write_event(Event::Start(root))
            .map_err(|e| TangerineError::MalformedArchive(e.to_string()))?;
        write_element(&mut writer, &self.data)?;
        writer
            .write_event(Event::End(BytesEnd::new("archive")))
            .map_err(|e| TangerineError::MalformedArchive(e.to_string()))?;
        Ok(writer.into_inner().into_inner())
    }
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, el: &Element) -> Result<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (name, value) in &el.attrs {
        start.push_attribute((name.as_str(), value.as_str()));
    }
    if el.children.is_empty() && el.text.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| TangerineError::MalformedArchive(e.to_string()))?;
        return Ok(());
    }
    writer
        .write_event(Event::Start(start))
        .map_err(|e| TangerineError::MalformedArchive(e.to_string()))?;
    if !el.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(el.text.as_str())))
            .map_err(|e| TangerineError::MalformedArchive(e.to_string()))?;
    }
    for child in &el.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(el.name.as_str())))
        .map_err(|e| TangerineError::MalformedArchive(e.to_string()))?;
    Ok(())
}

/// Parses a serialized document into `(archive_type, version, data)`.
pub(crate) fn parse_document(data: &[u8]) -> Result<(String, String, Element)> {
    let text = std::str::from_utf8(data)
        .map_err(|e| TangerineError::MalformedArchive(format!("document is not UTF-8: {e}")))?;
    // Text is not trimmed: string nodes must round-trip their content
    // exactly, and the writer emits no inter-element whitespace.
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element_from(&e)?),
            Ok(Event::Empty(e)) => {
                let el = element_from(&e)?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::End(_)) => {
                let el = stack.pop().ok_or_else(|| {
                    TangerineError::MalformedArchive("unbalanced end tag".into())
                })?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| TangerineError::MalformedArchive(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(TangerineError::MalformedArchive(e.to_string())),
        }
    }

    let root = root.ok_or_else(|| TangerineError::MalformedArchive("empty document".into()))?;
    if root.name != "archive" {
        return Err(TangerineError::MalformedArchive(format!(
            "expected `archive` root, found `{}`",
            root.name
        )));
    }
    let archive_type = root.attr("type").unwrap_or_default().to_string();
    let version = root.attr("version").unwrap_or_default().to_string();
    let data = root
        .children
        .into_iter()
        .find(|c| c.name == "data")
        .ok_or_else(|| TangerineError::MalformedArchive("missing `data` element".into()))?;
    Ok((archive_type, version, data))
}

fn element_from(start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut el = Element::new(&name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| TangerineError::MalformedArchive(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| TangerineError::MalformedArchive(e.to_string()))?
            .into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, el: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_some() {
                return Err(TangerineError::MalformedArchive(
                    "multiple root elements".into(),
                ));
            }
            *root = Some(el);
        }
    }
    Ok(())
}

impl Archive for XmlArchive {
    fn archive_object(
        &mut self,
        runtime_type: &str,
        static_type: &str,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        let el = Element::new("object")
            .with("runtimeType", runtime_type)
            .with("type", static_type)
            .with("key", key)
            .with("id", id.to_string());
        self.emit_scoped(el, inner)
    }

    fn archive_struct(
        &mut self,
        type_name: &str,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        let el = Element::new("struct")
            .with("type", type_name)
            .with("key", key)
            .with("id", id.to_string());
        self.emit_scoped(el, inner)
    }

    fn archive_array(
        &mut self,
        elem_type: &str,
        len: usize,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        let el = Element::new("array")
            .with("type", elem_type)
            .with("length", len.to_string())
            .with("key", key)
            .with("id", id.to_string());
        self.emit_scoped(el, inner)
    }

    fn archive_assoc_array(
        &mut self,
        key_type: &str,
        value_type: &str,
        len: usize,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        let el = Element::new("associativeArray")
            .with("keyType", key_type)
            .with("valueType", value_type)
            .with("length", len.to_string())
            .with("key", key)
            .with("id", id.to_string());
        self.emit_scoped(el, inner)
    }

    fn archive_assoc_key(
        &mut self,
        entry_key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        self.emit_scoped(Element::new("key").with("key", entry_key), inner)
    }

    fn archive_assoc_value(
        &mut self,
        entry_key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        self.emit_scoped(Element::new("value").with("key", entry_key), inner)
    }

    fn archive_pointer(
        &mut self,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        let el = Element::new("pointer")
            .with("key", key)
            .with("id", id.to_string());
        self.emit_scoped(el, inner)
    }

    fn archive_pointer_reference(
        &mut self,
        target_id: Id,
        target_key: &str,
        pointer_id: Id,
    ) -> Result<()> {
        match self.data.find_by_id_mut(pointer_id) {
            Some(el) => {
                el.children.clear();
                el.text.clear();
                el.children.push(
                    Element::new("reference")
                        .with("key", target_key)
                        .with_text(target_id.to_string()),
                );
                Ok(())
            }
            None => self.malformed(format!("no pointer node with id {pointer_id} to rewrite")),
        }
    }

    fn archive_base_class(
        &mut self,
        type_name: &str,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        let el = Element::new("base")
            .with("type", type_name)
            .with("key", key)
            .with("id", id.to_string());
        self.emit_scoped(el, inner)
    }

    fn archive_string(&mut self, value: &str, elem_type: &str, key: &str, id: Id) -> Result<()> {
        let el = Element::new("string")
            .with("type", elem_type)
            .with("key", key)
            .with("id", id.to_string())
            .with_text(value);
        self.append_child(el).map(|_| ())
    }

    fn archive_primitive(
        &mut self,
        type_name: &str,
        value: &str,
        key: &str,
        id: Id,
    ) -> Result<()> {
        let el = Element::new(type_name)
            .with("key", key)
            .with("id", id.to_string())
            .with_text(value);
        self.append_child(el).map(|_| ())
    }

    fn archive_enum(&mut self, type_name: &str, value: &str, key: &str, id: Id) -> Result<()> {
        let el = Element::new("enum")
            .with("type", type_name)
            .with("key", key)
            .with("id", id.to_string())
            .with_text(value);
        self.append_child(el).map(|_| ())
    }

    fn archive_typedef(
        &mut self,
        type_name: &str,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        let el = Element::new("typedef")
            .with("type", type_name)
            .with("key", key)
            .with("id", id.to_string());
        self.emit_scoped(el, inner)
    }

    fn archive_reference(&mut self, key: &str, target_id: Id) -> Result<()> {
        let el = Element::new("reference")
            .with("key", key)
            .with_text(target_id.to_string());
        self.append_child(el).map(|_| ())
    }

    fn archive_null(&mut self, type_name: &str, key: &str) -> Result<()> {
        let el = Element::new("null").with("type", type_name).with("key", key);
        self.append_child(el).map(|_| ())
    }

    fn archive_slice(&mut self, slice: Slice, slice_id: Id, array_id: Id) -> Result<()> {
        match self.data.find_by_id_mut(slice_id) {
            Some(el) => {
                let key = el.attr("key").unwrap_or_default().to_string();
                *el = Element::new("slice")
                    .with("key", key)
                    .with("id", slice_id.to_string())
                    .with("offset", slice.offset.to_string())
                    .with("length", slice.length.to_string())
                    .with_text(array_id.to_string());
                Ok(())
            }
            None => self.malformed(format!("no array node with id {slice_id} to rewrite")),
        }
    }

    fn post_process_array(&mut self, _id: Id) -> Result<()> {
        // Standalone arrays are already in final form in the tree backend.
        Ok(())
    }

    fn post_process_pointer(&mut self, _id: Id) -> Result<()> {
        Ok(())
    }

    fn untyped_data(&self) -> Result<Vec<u8>> {
        self.render()
    }

    fn begin_unarchiving(&mut self, data: &[u8]) -> Result<()> {
        let (archive_type, version, tree) = parse_document(data)?;
        if archive_type != ARCHIVE_TYPE {
            self.malformed(format!("unknown archive type `{archive_type}`"))?;
        }
        if version != ARCHIVE_VERSION {
            self.malformed(format!("unsupported archive version `{version}`"))?;
        }
        self.data = tree;
        self.cursor.clear();
        self.has_document = true;
        Ok(())
    }

    fn node_kind(&self, key: &str) -> Result<Option<NodeKind>> {
        Ok(self.find_element(key)?.map(|(_, el)| kind_of(&el.name)))
    }

    fn scope_keys(&self) -> Result<Vec<String>> {
        let Some(parent) = self.current() else {
            return Ok(Vec::new());
        };
        Ok(parent
            .children
            .iter()
            .filter_map(|c| c.attr("key").map(str::to_string))
            .collect())
    }

    fn unarchive_object(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, ObjectHeader) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(key, "object", &mut |archive, el| {
            let header = ObjectHeader {
                runtime_type: el.attr("runtimeType").unwrap_or_default().to_string(),
                static_type: el.attr("type").unwrap_or_default().to_string(),
                id: el.id(),
            };
            inner(archive, header)
        })
    }

    fn unarchive_struct(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, StructHeader) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(key, "struct", &mut |archive, el| {
            let header = StructHeader {
                type_name: el.attr("type").unwrap_or_default().to_string(),
                id: el.id(),
            };
            inner(archive, header)
        })
    }

    fn unarchive_array(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, ArrayHeader) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(key, "array", &mut |archive, el| {
            let len = el
                .attr("length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(el.children.len());
            let header = ArrayHeader {
                elem_type: el.attr("type").unwrap_or_default().to_string(),
                len,
                id: el.id(),
            };
            inner(archive, header)
        })
    }

    fn unarchive_assoc_array(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, AssocHeader) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(key, "associativeArray", &mut |archive, el| {
            let len = el
                .attr("length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(el.children.len() / 2);
            let header = AssocHeader {
                key_type: el.attr("keyType").unwrap_or_default().to_string(),
                value_type: el.attr("valueType").unwrap_or_default().to_string(),
                len,
                id: el.id(),
            };
            inner(archive, header)
        })
    }

    fn unarchive_assoc_key(
        &mut self,
        entry_key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(entry_key, "key", &mut |archive, _| inner(archive))
    }

    fn unarchive_assoc_value(
        &mut self,
        entry_key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(entry_key, "value", &mut |archive, _| inner(archive))
    }

    fn unarchive_pointer(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, Id) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(key, "pointer", &mut |archive, el| inner(archive, el.id()))
    }

    fn unarchive_base_class(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, BaseHeader) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(key, "base", &mut |archive, el| {
            let header = BaseHeader {
                type_name: el.attr("type").unwrap_or_default().to_string(),
                id: el.id(),
            };
            inner(archive, header)
        })
    }

    fn unarchive_string(&mut self, key: &str) -> Result<StringNode> {
        match self.read_leaf(key, Some("string"))? {
            Some(el) => {
                let elem_type = el.attr("type").unwrap_or("char").to_string();
                let id = el.id();
                Ok(StringNode {
                    elem_type,
                    value: el.text,
                    id,
                })
            }
            None => Ok(StringNode {
                elem_type: "char".into(),
                value: String::new(),
                id: Id::NONE,
            }),
        }
    }

    fn unarchive_primitive(&mut self, key: &str) -> Result<PrimitiveNode> {
        match self.read_leaf(key, None)? {
            Some(el) if kind_of(&el.name) == NodeKind::Primitive => {
                let type_name = el.name.clone();
                let id = el.id();
                Ok(PrimitiveNode {
                    type_name,
                    value: el.text,
                    id,
                })
            }
            Some(el) => {
                self.malformed(format!(
                    "expected primitive under key `{key}`, found `{}`",
                    el.name
                ))?;
                Ok(PrimitiveNode {
                    type_name: String::new(),
                    value: String::new(),
                    id: Id::NONE,
                })
            }
            None => Ok(PrimitiveNode {
                type_name: String::new(),
                value: String::new(),
                id: Id::NONE,
            }),
        }
    }

    fn unarchive_enum(&mut self, key: &str) -> Result<EnumNode> {
        match self.read_leaf(key, Some("enum"))? {
            Some(el) => {
                let type_name = el.attr("type").unwrap_or_default().to_string();
                let id = el.id();
                Ok(EnumNode {
                    type_name,
                    value: el.text,
                    id,
                })
            }
            None => Ok(EnumNode {
                type_name: String::new(),
                value: String::new(),
                id: Id::NONE,
            }),
        }
    }

    fn unarchive_typedef(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, TypedefHeader) -> Result<()>,
    ) -> Result<()> {
        self.read_scoped(key, "typedef", &mut |archive, el| {
            let header = TypedefHeader {
                type_name: el.attr("type").unwrap_or_default().to_string(),
                id: el.id(),
            };
            inner(archive, header)
        })
    }

    fn unarchive_reference(&mut self, key: &str) -> Result<Id> {
        let Some((_, el)) = self.find_element(key)? else {
            return Ok(Id::NONE);
        };
        if el.name != "reference" {
            return Ok(Id::NONE);
        }
        match Id::parse(&el.text) {
            Some(id) => Ok(id),
            None => {
                let text = el.text.clone();
                self.malformed(format!("unparseable reference target `{text}`"))?;
                Ok(Id::NONE)
            }
        }
    }

    fn unarchive_slice(&mut self, key: &str) -> Result<Option<SliceNode>> {
        let Some((_, el)) = self.find_element(key)? else {
            return Ok(None);
        };
        if el.name != "slice" {
            return Ok(None);
        }
        let offset = el.attr("offset").and_then(|v| v.parse().ok());
        let length = el.attr("length").and_then(|v| v.parse().ok());
        let array = Id::parse(&el.text);
        let id = el.id();
        match (offset, length, array) {
            (Some(offset), Some(length), Some(array)) => Ok(Some(SliceNode {
                offset,
                length,
                array,
                id,
            })),
            _ => {
                self.malformed(format!("malformed slice node under key `{key}`"))?;
                Ok(None)
            }
        }
    }

    fn unarchive_null(&mut self, key: &str) -> Result<String> {
        match self.read_leaf(key, Some("null"))? {
            Some(el) => Ok(el.attr("type").unwrap_or("void").to_string()),
            None => Ok("void".into()),
        }
    }

    fn error_callback(&self) -> ErrorCallback {
        self.callback.clone()
    }

    fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.callback = callback;
    }

    fn reset(&mut self) {
        self.data = Element::new("data");
        self.cursor.clear();
        self.has_document = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_then_parse_preserves_the_tree() -> Result<()> {
        let mut archive = XmlArchive::new();
        archive.archive_object("A", "A", "0", Id::new(0), &mut |a| {
            a.archive_primitive("int", "42", "count", Id::new(1))?;
            a.archive_string("hi", "char", "label", Id::new(2))
        })?;
        let bytes = archive.untyped_data()?;

        let mut back = XmlArchive::new();
        back.begin_unarchiving(&bytes)?;
        assert_eq!(back.node_kind("0")?, Some(NodeKind::Object));
        back.unarchive_object("0", &mut |a, header| {
            assert_eq!(header.runtime_type, "A");
            assert_eq!(header.id, Id::new(0));
            let count = a.unarchive_primitive("count")?;
            assert_eq!(count.value, "42");
            let label = a.unarchive_string("label")?;
            assert_eq!(label.value, "hi");
            Ok(())
        })
    }

    #[test]
    fn duplicate_keys_are_rejected_on_write() {
        let mut archive = XmlArchive::new();
        archive
            .archive_primitive("int", "1", "x", Id::new(0))
            .expect("first key is fine");
        let err = archive
            .archive_primitive("int", "2", "x", Id::new(1))
            .expect_err("duplicate key");
        assert!(matches!(err, TangerineError::MalformedArchive(_)));
    }

    #[test]
    fn cursor_is_restored_after_inner_failure() {
        let mut archive = XmlArchive::new();
        let result = archive.archive_struct("P", "0", Id::new(0), &mut |a| {
            a.archive_primitive("int", "1", "x", Id::new(1))?;
            Err(TangerineError::NotSerializable("boom".into()))
        });
        assert!(result.is_err());
        // Back at data scope: a sibling write must succeed.
        archive
            .archive_primitive("int", "2", "y", Id::new(2))
            .expect("cursor restored");
    }
}
