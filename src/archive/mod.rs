//! The contract between the engine and a document backend.
//!
//! An [`Archive`] turns the engine's normalized emit calls into a
//! serialized document and answers the inverse read calls. The engine is
//! backend-independent: it never sees text, framing, or attribute syntax,
//! only the operations below. The reference backend is the XML element
//! tree in [`xml`].
//!
//! ## Scoped positioning
//!
//! Compound openers take an *inner action* executed with the archive
//! positioned inside the new node. Implementations must restore the
//! previous position on every exit path, including an `Err` returned by
//! the inner action; the engine relies on this to recover after a
//! swallowed error.
//!
//! ## Probes
//!
//! The read side is probe-friendly: [`Archive::unarchive_reference`]
//! returns [`Id::NONE`] when the node under a key is not a reference,
//! [`Archive::unarchive_slice`] returns `None` when it is not a slice, and
//! [`Archive::node_kind`] reports the stored kind tag so the engine can
//! dispatch on the self-describing document.

pub mod xml;

use crate::error::{ErrorCallback, Result};
use crate::id::Id;

pub use xml::XmlArchive;

/// A sub-range of an array, in elements, relative to a parent array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    /// Offset in elements from the parent's first element.
    pub offset: usize,
    /// Length in elements.
    pub length: usize,
}

/// A slice node as read back from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceNode {
    /// Offset in elements from the parent's first element.
    pub offset: usize,
    /// Length in elements.
    pub length: usize,
    /// Id of the parent array node.
    pub array: Id,
    /// Document id of the slice node itself.
    pub id: Id,
}

/// Header of an object node on the read side.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    /// Concrete class name for factory reconstruction.
    pub runtime_type: String,
    /// Statically declared type.
    pub static_type: String,
    /// Document id of the node.
    pub id: Id,
}

/// Header of a record node on the read side.
#[derive(Debug, Clone)]
pub struct StructHeader {
    /// The record's type name.
    pub type_name: String,
    /// Document id of the node.
    pub id: Id,
}

/// Header of an array node on the read side.
#[derive(Debug, Clone)]
pub struct ArrayHeader {
    /// Element type name.
    pub elem_type: String,
    /// Element count.
    pub len: usize,
    /// Document id of the node.
    pub id: Id,
}

/// Header of an associative-array node on the read side.
#[derive(Debug, Clone)]
pub struct AssocHeader {
    /// Key type name.
    pub key_type: String,
    /// Value type name.
    pub value_type: String,
    /// Entry count.
    pub len: usize,
    /// Document id of the node.
    pub id: Id,
}

/// Header of a typedef (alias) node on the read side.
#[derive(Debug, Clone)]
pub struct TypedefHeader {
    /// The alias's type name.
    pub type_name: String,
    /// Document id of the node.
    pub id: Id,
}

/// Header of a base-class node on the read side.
#[derive(Debug, Clone)]
pub struct BaseHeader {
    /// The base type's name.
    pub type_name: String,
    /// Document id of the node.
    pub id: Id,
}

/// A primitive leaf as read back from a document.
#[derive(Debug, Clone)]
pub struct PrimitiveNode {
    /// The primitive's type name (the element name on the wire).
    pub type_name: String,
    /// The literal text.
    pub value: String,
    /// Document id of the node.
    pub id: Id,
}

/// A string leaf as read back from a document.
#[derive(Debug, Clone)]
pub struct StringNode {
    /// Element type name of the characters.
    pub elem_type: String,
    /// The string content.
    pub value: String,
    /// Document id of the node.
    pub id: Id,
}

/// An enum leaf as read back from a document.
#[derive(Debug, Clone)]
pub struct EnumNode {
    /// The enum's type name.
    pub type_name: String,
    /// The base primitive literal.
    pub value: String,
    /// Document id of the node.
    pub id: Id,
}

/// The stored kind tag of a document node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A polymorphic object node.
    Object,
    /// A record node.
    Struct,
    /// An array node.
    Array,
    /// An associative-array node.
    AssociativeArray,
    /// A string node.
    String,
    /// A pointer node.
    Pointer,
    /// A reference to an earlier id.
    Reference,
    /// A base-class node.
    Base,
    /// A null node.
    Null,
    /// An enum node.
    Enum,
    /// A typedef (alias) node.
    Typedef,
    /// A post-processed slice node.
    Slice,
    /// A primitive leaf (element name is the type name).
    Primitive,
}

/// The backend seam: primitive emission, structural openers, reference and
/// slice emission, and their inverses.
///
/// `key` is always the scope-unique label of the node within its parent;
/// `id` the run-unique document id. See the module docs for positioning
/// and probe semantics.
pub trait Archive {
    // --- Emitting side ---

    /// Opens an object node and runs `inner` positioned inside it.
    fn archive_object(
        &mut self,
        runtime_type: &str,
        static_type: &str,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Opens a record node and runs `inner` positioned inside it.
    fn archive_struct(
        &mut self,
        type_name: &str,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Opens an array node and runs `inner` positioned inside it.
    fn archive_array(
        &mut self,
        elem_type: &str,
        len: usize,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Opens an associative-array node and runs `inner` positioned inside.
    fn archive_assoc_array(
        &mut self,
        key_type: &str,
        value_type: &str,
        len: usize,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Opens one entry-key wrapper inside an associative-array node.
    fn archive_assoc_key(
        &mut self,
        entry_key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Opens one entry-value wrapper inside an associative-array node.
    fn archive_assoc_value(
        &mut self,
        entry_key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Opens a pointer node and runs `inner` positioned inside it.
    fn archive_pointer(
        &mut self,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Post-processing overload: rewrites pointer node `pointer_id` to
    /// carry a reference edge to the value archived under `target_id`.
    fn archive_pointer_reference(
        &mut self,
        target_id: Id,
        target_key: &str,
        pointer_id: Id,
    ) -> Result<()>;

    /// Opens a base-class node and runs `inner` positioned inside it.
    fn archive_base_class(
        &mut self,
        type_name: &str,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Emits a string leaf.
    fn archive_string(&mut self, value: &str, elem_type: &str, key: &str, id: Id) -> Result<()>;

    /// Emits a primitive leaf.
    fn archive_primitive(&mut self, type_name: &str, value: &str, key: &str, id: Id) -> Result<()>;

    /// Emits an enum leaf.
    fn archive_enum(&mut self, type_name: &str, value: &str, key: &str, id: Id) -> Result<()>;

    /// Opens a typedef (alias) node and runs `inner` positioned inside it.
    fn archive_typedef(
        &mut self,
        type_name: &str,
        key: &str,
        id: Id,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Emits a reference to the node previously archived under `target_id`.
    fn archive_reference(&mut self, key: &str, target_id: Id) -> Result<()>;

    /// Emits a null node of the given declared type.
    fn archive_null(&mut self, type_name: &str, key: &str) -> Result<()>;

    /// Post-processing: rewrites array node `slice_id` into a slice edge
    /// referencing `array_id`.
    fn archive_slice(&mut self, slice: Slice, slice_id: Id, array_id: Id) -> Result<()>;

    /// Post-processing: confirms the array under `id` is not a slice.
    fn post_process_array(&mut self, id: Id) -> Result<()>;

    /// Post-processing: confirms the pointer under `id` is dangling.
    fn post_process_pointer(&mut self, id: Id) -> Result<()>;

    /// The serialized document produced so far.
    fn untyped_data(&self) -> Result<Vec<u8>>;

    // --- Reading side ---

    /// Loads a document for reading.
    fn begin_unarchiving(&mut self, data: &[u8]) -> Result<()>;

    /// The stored kind tag of the node under `key`, or `None` if absent.
    fn node_kind(&self, key: &str) -> Result<Option<NodeKind>>;

    /// The keys of the current scope's children, in document order.
    fn scope_keys(&self) -> Result<Vec<String>>;

    /// Reads an object node, running `inner` positioned inside it.
    fn unarchive_object(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, ObjectHeader) -> Result<()>,
    ) -> Result<()>;

    /// Reads a record node, running `inner` positioned inside it.
    fn unarchive_struct(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, StructHeader) -> Result<()>,
    ) -> Result<()>;

    /// Reads an array node, running `inner` positioned inside it.
    fn unarchive_array(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, ArrayHeader) -> Result<()>,
    ) -> Result<()>;

    /// Reads an associative-array node, running `inner` positioned inside.
    fn unarchive_assoc_array(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, AssocHeader) -> Result<()>,
    ) -> Result<()>;

    /// Reads one entry-key wrapper inside an associative-array node.
    fn unarchive_assoc_key(
        &mut self,
        entry_key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Reads one entry-value wrapper inside an associative-array node.
    fn unarchive_assoc_value(
        &mut self,
        entry_key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive) -> Result<()>,
    ) -> Result<()>;

    /// Reads a pointer node, running `inner` positioned inside it.
    fn unarchive_pointer(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, Id) -> Result<()>,
    ) -> Result<()>;

    /// Reads a base-class node, running `inner` positioned inside it.
    fn unarchive_base_class(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, BaseHeader) -> Result<()>,
    ) -> Result<()>;

    /// Reads a string leaf.
    fn unarchive_string(&mut self, key: &str) -> Result<StringNode>;

    /// Reads a primitive leaf.
    fn unarchive_primitive(&mut self, key: &str) -> Result<PrimitiveNode>;

    /// Reads an enum leaf.
    fn unarchive_enum(&mut self, key: &str) -> Result<EnumNode>;

    /// Reads a typedef node, running `inner` positioned inside it.
    fn unarchive_typedef(
        &mut self,
        key: &str,
        inner: &mut dyn FnMut(&mut dyn Archive, TypedefHeader) -> Result<()>,
    ) -> Result<()>;

    /// The target id of the reference under `key`, or [`Id::NONE`] if the
    /// node is not a reference.
    fn unarchive_reference(&mut self, key: &str) -> Result<Id>;

    /// The slice under `key`, or `None` if the node is not a slice.
    fn unarchive_slice(&mut self, key: &str) -> Result<Option<SliceNode>>;

    /// The declared type of the null node under `key`.
    fn unarchive_null(&mut self, key: &str) -> Result<String>;

    // --- Common ---

    /// The installed error callback.
    fn error_callback(&self) -> ErrorCallback;

    /// Installs the error callback the archive routes failures through.
    fn set_error_callback(&mut self, callback: ErrorCallback);

    /// Discards all document state.
    fn reset(&mut self);
}
