//! The backend-independent serialization engine.
//!
//! [`Serializer`] is the public façade over the whole pipeline: it
//! classifies each value by its kind tag, assigns run-unique ids and
//! scope-unique keys, tracks identity so sharing and cycles round-trip,
//! dispatches to custom hooks or the field walk, fires lifecycle events,
//! and runs the two post-processing passes (slices, pointers) after the
//! main traversal.
//!
//! Custom (de)serializers registered per runtime type name receive a
//! [`SerializeContext`] / [`DeserializeContext`] exposing the nested
//! operations; the contexts only exist while a run is in progress, so a
//! nested call outside a run is unrepresentable.
//!
//! A serializer instance is single-threaded and non-reentrant: all tables
//! are instance-local mutable state, and each public operation runs to
//! completion or error.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::archive::{Archive, NodeKind, XmlArchive};
use crate::descriptor::{self, LifecycleHook, TypeDescriptor};
use crate::error::{ErrorCallback, Result, TangerineError, do_nothing_on_error, report, throw_on_error};
use crate::id::Id;
use crate::tracker::{ArrayRecord, Fixup, Tracker};
use crate::value::{self, ArrayValue, MapValue, ObjectValue, PointerValue, RecordValue, Slot, Value, slot};

/// A per-instance custom serializer, keyed by runtime type name.
pub type CustomSerializer = Rc<dyn Fn(&mut SerializeContext<'_>, &Value) -> Result<()>>;

/// A per-instance custom deserializer, keyed by runtime type name.
pub type CustomDeserializer = Rc<dyn Fn(&mut DeserializeContext<'_>) -> Result<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Serializing,
    Deserializing,
}

struct EngineState {
    mode: Mode,
    tracker: Tracker,
    serializers: HashMap<String, CustomSerializer>,
    deserializers: HashMap<String, CustomDeserializer>,
    callback: ErrorCallback,
}

impl EngineState {
    fn raise(&self, err: TangerineError) -> Result<()> {
        report(&self.callback, err)
    }
}

/// The engine façade: `serialize` a value graph into opaque document data,
/// `deserialize` an equal graph back out of it.
pub struct Serializer {
    archive: Box<dyn Archive>,
    state: EngineState,
}

impl Serializer {
    /// Creates an engine over the given archive backend.
    pub fn new(mut archive: Box<dyn Archive>) -> Self {
        let callback = throw_on_error();
        archive.set_error_callback(callback.clone());
        Self {
            archive,
            state: EngineState {
                mode: Mode::Idle,
                tracker: Tracker::default(),
                serializers: HashMap::new(),
                deserializers: HashMap::new(),
                callback,
            },
        }
    }

    /// Creates an engine over the reference XML backend.
    pub fn with_xml_archive() -> Self {
        Self::new(Box::new(XmlArchive::new()))
    }

    /// Archives `value` under `key` (a synthetic key if absent) and returns
    /// the serialized document produced so far.
    ///
    /// Legal from idle or from an ongoing serialization run; calling it
    /// during a deserialization run is Api-misuse (a silenced misuse starts
    /// a fresh run).
    pub fn serialize(&mut self, value: &Value, key: Option<&str>) -> Result<Vec<u8>> {
        if self.state.mode == Mode::Deserializing {
            self.state.raise(TangerineError::ApiMisuse(
                "serialize called during a deserialization run; call reset() first".into(),
            ))?;
            self.state.tracker.reset();
            self.archive.reset();
        }
        if self.state.mode == Mode::Idle {
            debug!(root = %value.type_name(), "beginning serialization run");
        }
        self.state.mode = Mode::Serializing;

        let key = match key {
            Some(k) => k.to_string(),
            None => self.state.tracker.next_key(),
        };
        let Self { archive, state } = self;
        serialize_node(state, archive.as_mut(), value, &key, None, None)?;
        post_process_serialize(state, archive.as_mut())?;

        let data = self.archive.untyped_data()?;
        debug!(bytes = data.len(), "serialization produced document");
        Ok(data)
    }

    /// Reconstructs a value graph from `data`, reading the node under
    /// `key` (a synthetic key if absent).
    ///
    /// Following a serialization run without an intervening [`reset`]
    /// clears the run tables and counters; the archive keeps its data.
    ///
    /// [`reset`]: Serializer::reset
    pub fn deserialize(&mut self, data: &[u8], key: Option<&str>) -> Result<Value> {
        if self.state.mode == Mode::Serializing {
            self.state.tracker.reset();
        }
        if self.state.mode != Mode::Deserializing {
            debug!(bytes = data.len(), "beginning deserialization run");
        }
        self.state.mode = Mode::Deserializing;
        self.archive.begin_unarchiving(data)?;

        let key = match key {
            Some(k) => Some(k.to_string()),
            None => self.archive.scope_keys()?.first().cloned(),
        };
        let Some(key) = key else {
            self.state
                .raise(TangerineError::MalformedArchive("empty document".into()))?;
            return Ok(Value::Null("void".into()));
        };
        let Self { archive, state } = self;
        let root = deserialize_node(state, archive.as_mut(), &key, None)?;
        post_process_deserialize(state)?;
        let out = root.borrow().clone();
        Ok(out)
    }

    /// Registers a custom serializer for the given runtime type name.
    pub fn register_serializer(&mut self, type_name: impl Into<String>, hook: CustomSerializer) {
        self.state.serializers.insert(type_name.into(), hook);
    }

    /// Registers a custom deserializer for the given runtime type name.
    pub fn register_deserializer(
        &mut self,
        type_name: impl Into<String>,
        hook: CustomDeserializer,
    ) {
        self.state.deserializers.insert(type_name.into(), hook);
    }

    /// Clears all run tables and counters, resets the archive, and returns
    /// to the idle state. Registered custom hooks are kept.
    pub fn reset(&mut self) {
        self.state.tracker.reset();
        self.archive.reset();
        self.state.mode = Mode::Idle;
    }

    /// The installed error callback.
    pub fn error_callback(&self) -> ErrorCallback {
        self.state.callback.clone()
    }

    /// Installs an error callback on the engine and its archive.
    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.state.callback = callback.clone();
        self.archive.set_error_callback(callback);
    }

    /// Installs the raising callback (the default).
    pub fn set_throw_on_error(&mut self) {
        self.set_error_callback(throw_on_error());
    }

    /// Installs the do-nothing callback: failures are swallowed and
    /// operations continue with per-kind defaults.
    pub fn set_do_nothing_on_error(&mut self) {
        self.set_error_callback(do_nothing_on_error());
    }
}

/// Nested operations available to custom serializers.
pub struct SerializeContext<'a> {
    state: &'a mut EngineState,
    archive: &'a mut dyn Archive,
}

impl SerializeContext<'_> {
    /// Archives `value` under `key` (a synthetic key if absent) within the
    /// current scope.
    pub fn serialize_value(&mut self, value: &Value, key: Option<&str>) -> Result<()> {
        let key = match key {
            Some(k) => k.to_string(),
            None => self.state.tracker.next_key(),
        };
        serialize_node(self.state, self.archive, value, &key, None, None)
    }

    /// Walks one step up the inheritance chain of `value` (an object),
    /// archiving the base view. No-op at the root of the hierarchy.
    pub fn serialize_base(&mut self, value: &Value) -> Result<()> {
        let Value::Object(obj) = value else {
            return Ok(());
        };
        let class = obj.borrow().class.clone();
        match descriptor::lookup_type(&class) {
            Some(desc) => serialize_base_chain(self.state, self.archive, value, &desc),
            None => Ok(()),
        }
    }
}

/// Nested operations available to custom deserializers.
pub struct DeserializeContext<'a> {
    state: &'a mut EngineState,
    archive: &'a mut dyn Archive,
    next_child: usize,
}

impl DeserializeContext<'_> {
    /// Reads the value under `key` from the current scope. With no key,
    /// reads the scope's children positionally, in document order.
    pub fn deserialize_value(&mut self, key: Option<&str>) -> Result<Value> {
        let slot = self.deserialize_slot(key)?;
        let out = slot.borrow().clone();
        Ok(out)
    }

    /// Like [`deserialize_value`](Self::deserialize_value) but returns the
    /// slot, preserving aliasing for positions a pointer may target.
    pub fn deserialize_slot(&mut self, key: Option<&str>) -> Result<Slot> {
        let key = match key {
            Some(k) => Some(k.to_string()),
            None => {
                let keys = self.archive.scope_keys()?;
                let k = keys.get(self.next_child).cloned();
                if k.is_some() {
                    self.next_child += 1;
                }
                k
            }
        };
        let Some(key) = key else {
            self.state.raise(TangerineError::MalformedArchive(
                "no further child in the current scope".into(),
            ))?;
            return Ok(slot(Value::Null("void".into())));
        };
        deserialize_node(self.state, self.archive, &key, None)
    }

    /// Walks one step up the inheritance chain of `value` (an object being
    /// reconstructed), reading the base view into it. No-op at the root.
    pub fn deserialize_base(&mut self, value: &Value) -> Result<()> {
        let Value::Object(obj) = value else {
            return Ok(());
        };
        let class = obj.borrow().class.clone();
        match descriptor::lookup_type(&class) {
            Some(desc) => deserialize_base_chain(self.state, self.archive, obj, &desc),
            None => Ok(()),
        }
    }
}

fn fire(hook: Option<LifecycleHook>, value: &Value) {
    if let Some(hook) = hook {
        hook(value);
    }
}

/// Allocates the node id for the value archived under `key` and, when the
/// value sits in a known slot, records that position as a pointer target.
fn begin_node(state: &mut EngineState, key: &str, origin: Option<&Slot>) -> Id {
    let id = state.tracker.next_id();
    if let Some(origin) = origin {
        state
            .tracker
            .record_value_position(Rc::as_ptr(origin) as usize, id, key, Rc::clone(origin));
    }
    id
}

fn serialize_node(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    value: &Value,
    key: &str,
    declared: Option<&str>,
    origin: Option<&Slot>,
) -> Result<()> {
    trace!(key, kind = ?value.kind(), "archiving node");
    match value {
        Value::Null(ty) => archive.archive_null(ty, key),

        Value::Bool(_) | Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Char(_) => {
            let id = begin_node(state, key, origin);
            let text = value::format_primitive(value).unwrap_or_default();
            archive.archive_primitive(&value.type_name(), &text, key, id)
        }

        Value::Enum(e) => {
            let id = begin_node(state, key, origin);
            archive.archive_enum(&e.type_name, &e.value, key, id)
        }

        Value::Str(s) => {
            let id = begin_node(state, key, origin);
            let record = ArrayRecord {
                base: s.buf.as_ptr() as usize + s.offset,
                len: s.len,
                elem_size: 1,
            };
            state.tracker.record_array(id, record, value.clone());
            archive.archive_string(s.as_str(), "char", key, id)
        }

        Value::Array(a) => serialize_array(state, archive, a, value, key, origin),
        Value::Map(m) => serialize_map(state, archive, m, value, key, origin),
        Value::Record(r) => serialize_record(state, archive, r, value, key, origin),
        Value::Object(_) => serialize_object(state, archive, value, key, declared, origin),
        Value::Pointer(p) => serialize_pointer(state, archive, p, value, key, origin),

        Value::Alias(a) => {
            let id = begin_node(state, key, origin);
            let inner = &a.inner;
            archive.archive_typedef(&a.type_name, key, id, &mut |ar| {
                let k = state.tracker.next_key();
                serialize_node(state, ar, inner, &k, None, None)
            })
        }
    }
}

fn serialize_array(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    array: &ArrayValue,
    value: &Value,
    key: &str,
    origin: Option<&Slot>,
) -> Result<()> {
    let id = begin_node(state, key, origin);
    let record = ArrayRecord {
        base: array.buf.borrow().as_ptr() as usize
            + array.offset * std::mem::size_of::<Slot>(),
        len: array.len,
        elem_size: std::mem::size_of::<Slot>(),
    };
    state.tracker.record_array(id, record, value.clone());

    let elem_type = array
        .get(0)
        .map(|s| s.borrow().type_name())
        .unwrap_or_else(|| "void".into());
    archive.archive_array(&elem_type, array.len, key, id, &mut |ar| {
        for i in 0..array.len {
            let Some(elem) = array.get(i) else {
                continue;
            };
            let k = state.tracker.next_key();
            let inner = elem.borrow().clone();
            serialize_node(state, ar, &inner, &k, None, Some(&elem))?;
        }
        Ok(())
    })
}

fn serialize_map(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    map: &MapValue,
    value: &Value,
    key: &str,
    origin: Option<&Slot>,
) -> Result<()> {
    let addr = Rc::as_ptr(&map.entries) as usize;
    if let Some(prior) = state.tracker.reference_id(addr) {
        return archive.archive_reference(key, prior);
    }
    let id = begin_node(state, key, origin);
    state.tracker.record_reference(addr, id, value.clone());

    let entries: Vec<(Slot, Slot)> = map.entries.borrow().clone();
    let key_type = entries
        .first()
        .map(|(k, _)| k.borrow().type_name())
        .unwrap_or_else(|| "void".into());
    let value_type = entries
        .first()
        .map(|(_, v)| v.borrow().type_name())
        .unwrap_or_else(|| "void".into());

    archive.archive_assoc_array(&key_type, &value_type, entries.len(), key, id, &mut |ar| {
        for (i, (entry_key, entry_value)) in entries.iter().enumerate() {
            let wrapper = (2 * i).to_string();
            ar.archive_assoc_key(&wrapper, &mut |ar| {
                let k = state.tracker.next_key();
                let inner = entry_key.borrow().clone();
                serialize_node(state, ar, &inner, &k, None, Some(entry_key))
            })?;
            let wrapper = (2 * i + 1).to_string();
            ar.archive_assoc_value(&wrapper, &mut |ar| {
                let k = state.tracker.next_key();
                let inner = entry_value.borrow().clone();
                serialize_node(state, ar, &inner, &k, None, Some(entry_value))
            })?;
        }
        Ok(())
    })
}

fn serialize_record(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    record: &RecordValue,
    value: &Value,
    key: &str,
    origin: Option<&Slot>,
) -> Result<()> {
    let id = begin_node(state, key, origin);
    let desc = descriptor::lookup_type(&record.type_name);
    let custom = state.serializers.get(&record.type_name).cloned();
    let capability = desc.as_ref().and_then(|d| d.serialize_capability());

    fire(desc.as_ref().and_then(|d| d.serializing_hook()), value);
    archive.archive_struct(&record.type_name, key, id, &mut |ar| {
        if let Some(hook) = &custom {
            let mut ctx = SerializeContext { state: &mut *state, archive: ar };
            hook(&mut ctx, value)
        } else if let Some(capability) = &capability {
            let mut ctx = SerializeContext { state: &mut *state, archive: ar };
            capability(&mut ctx, value)
        } else {
            walk_fields(state, ar, &record.fields, desc.as_deref())
        }
    })?;
    fire(desc.as_ref().and_then(|d| d.serialized_hook()), value);
    Ok(())
}

fn serialize_object(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    value: &Value,
    key: &str,
    declared: Option<&str>,
    origin: Option<&Slot>,
) -> Result<()> {
    let Value::Object(obj) = value else {
        return Ok(());
    };
    let addr = Rc::as_ptr(obj) as usize;
    if let Some(prior) = state.tracker.reference_id(addr) {
        return archive.archive_reference(key, prior);
    }

    let runtime = obj.borrow().class.clone();
    let static_type = declared.unwrap_or(&runtime).to_string();
    let desc = descriptor::lookup_type(&runtime);
    let custom = state.serializers.get(&runtime).cloned();
    let capability = desc.as_ref().and_then(|d| d.serialize_capability());

    if runtime != static_type && desc.is_none() && custom.is_none() {
        state.raise(TangerineError::UnregisteredType(runtime.clone()))?;
        return archive.archive_null(&static_type, key);
    }

    let id = begin_node(state, key, origin);
    state.tracker.record_reference(addr, id, value.clone());

    fire(desc.as_ref().and_then(|d| d.serializing_hook()), value);
    let fields: Vec<(String, Slot)> = obj.borrow().fields.clone();
    archive.archive_object(&runtime, &static_type, key, id, &mut |ar| {
        if let Some(hook) = &custom {
            let mut ctx = SerializeContext { state: &mut *state, archive: ar };
            hook(&mut ctx, value)
        } else if let Some(capability) = &capability {
            let mut ctx = SerializeContext { state: &mut *state, archive: ar };
            capability(&mut ctx, value)
        } else {
            walk_fields(state, ar, &fields, desc.as_deref())?;
            match &desc {
                Some(d) => serialize_base_chain(state, ar, value, d),
                None => Ok(()),
            }
        }
    })?;
    fire(desc.as_ref().and_then(|d| d.serialized_hook()), value);
    Ok(())
}

/// Archives fields in declaration order when a descriptor is present,
/// otherwise in the order the value carries them. Names listed as
/// non-serialized and internal `__` names are skipped.
fn walk_fields(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    fields: &[(String, Slot)],
    desc: Option<&TypeDescriptor>,
) -> Result<()> {
    match desc {
        Some(desc) if !desc.fields().is_empty() => {
            for field in desc.fields() {
                if desc.is_non_serialized(&field.name) || field.name.starts_with("__") {
                    continue;
                }
                match fields.iter().find(|(n, _)| *n == field.name) {
                    Some((_, field_slot)) => {
                        let inner = field_slot.borrow().clone();
                        serialize_node(
                            state,
                            archive,
                            &inner,
                            &field.name,
                            Some(&field.type_name),
                            Some(field_slot),
                        )?;
                    }
                    None => {
                        state.raise(TangerineError::NotSerializable(format!(
                            "value lacks declared field `{}`",
                            field.name
                        )))?;
                        archive.archive_null(&field.type_name, &field.name)?;
                    }
                }
            }
            Ok(())
        }
        _ => {
            for (name, field_slot) in fields {
                if name.starts_with("__") {
                    continue;
                }
                let inner = field_slot.borrow().clone();
                serialize_node(state, archive, &inner, name, None, Some(field_slot))?;
            }
            Ok(())
        }
    }
}

/// Emits the base-class chain of `value`'s runtime type, outermost first.
fn serialize_base_chain(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    value: &Value,
    desc: &TypeDescriptor,
) -> Result<()> {
    let Some(base_name) = desc.base() else {
        return Ok(());
    };
    let base_name = base_name.to_string();
    let base_desc = descriptor::lookup_type(&base_name);
    let Value::Object(obj) = value else {
        return Ok(());
    };
    let fields: Vec<(String, Slot)> = obj.borrow().fields.clone();

    let key = state.tracker.next_key();
    let id = state.tracker.next_id();
    archive.archive_base_class(&base_name, &key, id, &mut |ar| match &base_desc {
        Some(base_desc) => {
            walk_fields(state, ar, &fields, Some(base_desc))?;
            serialize_base_chain(state, ar, value, base_desc)
        }
        None => state.raise(TangerineError::UnregisteredType(format!(
            "base type `{base_name}` has no registered descriptor"
        ))),
    })
}

fn post_process_serialize(state: &mut EngineState, archive: &mut dyn Archive) -> Result<()> {
    let resolved = state.tracker.resolve_slices();
    let mut slices = 0usize;
    for (id, edge) in resolved {
        match edge {
            Some((parent, slice)) => {
                slices += 1;
                archive.archive_slice(slice, id, parent)?;
            }
            None => archive.post_process_array(id)?,
        }
    }

    let pointers: Vec<(Id, usize)> = state.tracker.pointers().to_vec();
    let mut linked = 0usize;
    for (pointer_id, addr) in pointers {
        match state.tracker.value_position(addr).cloned() {
            Some((target_id, target_key)) => {
                linked += 1;
                archive.archive_pointer_reference(target_id, &target_key, pointer_id)?;
            }
            None => archive.post_process_pointer(pointer_id)?,
        }
    }
    debug!(slices, linked_pointers = linked, "post-processing complete");
    Ok(())
}

fn serialize_pointer(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    pointer: &PointerValue,
    value: &Value,
    key: &str,
    origin: Option<&Slot>,
) -> Result<()> {
    let addr = Rc::as_ptr(&pointer.target) as usize;
    if let Some(prior) = state.tracker.reference_id(addr) {
        return archive.archive_reference(key, prior);
    }
    let id = begin_node(state, key, origin);
    state.tracker.record_reference(addr, id, value.clone());
    state.tracker.record_pointer(id, addr);

    archive.archive_pointer(key, id, &mut |ar| {
        let k = state.tracker.next_key();
        let inner = pointer.target.borrow().clone();
        serialize_node(state, ar, &inner, &k, None, None)
    })
}

// --- Deserialization ---

fn deserialize_node(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    key: &str,
    declared: Option<&str>,
) -> Result<Slot> {
    let declared_or = |fallback: &str| declared.unwrap_or(fallback).to_string();
    let Some(kind) = archive.node_kind(key)? else {
        state.raise(TangerineError::MalformedArchive(format!(
            "missing element for key `{key}`"
        )))?;
        return Ok(slot(value::default_for_type(&declared_or("void"))));
    };
    trace!(key, ?kind, "reading node");

    match kind {
        NodeKind::Null => {
            let ty = archive.unarchive_null(key)?;
            Ok(slot(Value::Null(ty)))
        }

        NodeKind::Reference => {
            let target = archive.unarchive_reference(key)?;
            if target.is_none() {
                state.raise(TangerineError::MalformedArchive(format!(
                    "reference under key `{key}` has no target"
                )))?;
                return Ok(slot(value::default_for_type(&declared_or("void"))));
            }
            match state.tracker.reconstructed(target) {
                Some(v) => Ok(slot(v)),
                None => {
                    let out = slot(Value::Null(declared_or("void")));
                    state.tracker.push_fixup(Fixup::Reference {
                        target,
                        slot: Rc::clone(&out),
                        declared: declared_or("void"),
                    });
                    Ok(out)
                }
            }
        }

        NodeKind::Primitive => {
            let node = archive.unarchive_primitive(key)?;
            let parsed = value::parse_primitive(&node.type_name, &node.value);
            let v = match parsed {
                Some(v) => v,
                None => {
                    state.raise(TangerineError::MalformedArchive(format!(
                        "unparseable `{}` literal `{}` under key `{key}`",
                        node.type_name, node.value
                    )))?;
                    value::default_for_type(&node.type_name)
                }
            };
            let out = slot(v);
            state.tracker.record_slot(node.id, Rc::clone(&out));
            Ok(out)
        }

        NodeKind::String => {
            let node = archive.unarchive_string(key)?;
            let v = Value::string(node.value);
            let out = slot(v.clone());
            state.tracker.record_reconstructed(node.id, v);
            state.tracker.record_slot(node.id, Rc::clone(&out));
            Ok(out)
        }

        NodeKind::Enum => {
            let node = archive.unarchive_enum(key)?;
            let out = slot(Value::enumeration(node.type_name, node.value));
            state.tracker.record_slot(node.id, Rc::clone(&out));
            Ok(out)
        }

        NodeKind::Typedef => {
            let out = slot(Value::Null(declared_or("void")));
            archive.unarchive_typedef(key, &mut |ar, header| {
                let Some(k) = ar.scope_keys()?.first().cloned() else {
                    state.raise(TangerineError::MalformedArchive(
                        "typedef node has no base value".into(),
                    ))?;
                    return Ok(());
                };
                let inner = deserialize_node(state, ar, &k, None)?;
                let inner_value = inner.borrow().clone();
                *out.borrow_mut() = Value::Alias(crate::value::AliasValue {
                    type_name: header.type_name.clone(),
                    inner: Box::new(inner_value),
                });
                state.tracker.record_slot(header.id, Rc::clone(&out));
                Ok(())
            })?;
            Ok(out)
        }

        NodeKind::Slice => {
            let Some(node) = archive.unarchive_slice(key)? else {
                state.raise(TangerineError::MalformedArchive(format!(
                    "malformed slice under key `{key}`"
                )))?;
                return Ok(slot(value::default_for_type(&declared_or("void"))));
            };
            let out = slot(Value::Null(declared_or("void")));
            state.tracker.record_slot(node.id, Rc::clone(&out));
            match state.tracker.reconstructed(node.array) {
                Some(parent) => {
                    let view = slice_view(&parent, node.offset, node.length);
                    match view {
                        Some(v) => *out.borrow_mut() = v,
                        None => state.raise(TangerineError::MalformedArchive(format!(
                            "slice under key `{key}` is out of range of array {}",
                            node.array
                        )))?,
                    }
                }
                None => state.tracker.push_fixup(Fixup::Slice {
                    parent: node.array,
                    offset: node.offset,
                    length: node.length,
                    slot: Rc::clone(&out),
                }),
            }
            Ok(out)
        }

        NodeKind::Array => {
            let out = slot(Value::array(Vec::new()));
            archive.unarchive_array(key, &mut |ar, header| {
                let keys = ar.scope_keys()?;
                if keys.len() != header.len {
                    state.raise(TangerineError::MalformedArchive(format!(
                        "array declares length {} but carries {} elements",
                        header.len,
                        keys.len()
                    )))?;
                }
                let mut slots = Vec::with_capacity(keys.len());
                for k in &keys {
                    slots.push(deserialize_node(state, ar, k, Some(&header.elem_type))?);
                }
                let len = slots.len();
                let v = Value::Array(ArrayValue {
                    buf: Rc::new(std::cell::RefCell::new(slots)),
                    offset: 0,
                    len,
                });
                state.tracker.record_reconstructed(header.id, v.clone());
                state.tracker.record_slot(header.id, Rc::clone(&out));
                *out.borrow_mut() = v;
                Ok(())
            })?;
            Ok(out)
        }

        NodeKind::AssociativeArray => {
            let out = slot(Value::map(Vec::new()));
            archive.unarchive_assoc_array(key, &mut |ar, header| {
                let mut entries: Vec<(Slot, Slot)> = Vec::with_capacity(header.len);
                for i in 0..header.len {
                    let mut entry_key: Option<Slot> = None;
                    ar.unarchive_assoc_key(&(2 * i).to_string(), &mut |ar| {
                        let Some(k) = ar.scope_keys()?.first().cloned() else {
                            return state.raise(TangerineError::MalformedArchive(
                                "empty mapping key wrapper".into(),
                            ));
                        };
                        entry_key =
                            Some(deserialize_node(state, ar, &k, Some(&header.key_type))?);
                        Ok(())
                    })?;
                    let mut entry_value: Option<Slot> = None;
                    ar.unarchive_assoc_value(&(2 * i + 1).to_string(), &mut |ar| {
                        let Some(k) = ar.scope_keys()?.first().cloned() else {
                            return state.raise(TangerineError::MalformedArchive(
                                "empty mapping value wrapper".into(),
                            ));
                        };
                        entry_value =
                            Some(deserialize_node(state, ar, &k, Some(&header.value_type))?);
                        Ok(())
                    })?;
                    let entry_key = entry_key
                        .unwrap_or_else(|| slot(value::default_for_type(&header.key_type)));
                    let entry_value = entry_value
                        .unwrap_or_else(|| slot(value::default_for_type(&header.value_type)));
                    entries.push((entry_key, entry_value));
                }
                let v = Value::Map(MapValue {
                    entries: Rc::new(std::cell::RefCell::new(entries)),
                });
                state.tracker.record_reconstructed(header.id, v.clone());
                state.tracker.record_slot(header.id, Rc::clone(&out));
                *out.borrow_mut() = v;
                Ok(())
            })?;
            Ok(out)
        }

        NodeKind::Struct => {
            let out = slot(Value::Null(declared_or("void")));
            archive.unarchive_struct(key, &mut |ar, header| {
                let desc = descriptor::lookup_type(&header.type_name);
                if let Some(hook) = state.deserializers.get(&header.type_name).cloned() {
                    let v = {
                        let mut ctx = DeserializeContext { state: &mut *state, archive: ar, next_child: 0 };
                        hook(&mut ctx)?
                    };
                    state.tracker.record_slot(header.id, Rc::clone(&out));
                    *out.borrow_mut() = v;
                    return Ok(());
                }
                if let Some(capability) = desc.as_ref().and_then(|d| d.deserialize_capability()) {
                    let v = {
                        let mut ctx = DeserializeContext { state: &mut *state, archive: ar, next_child: 0 };
                        capability(&mut ctx)?
                    };
                    state.tracker.record_slot(header.id, Rc::clone(&out));
                    *out.borrow_mut() = v;
                    return Ok(());
                }

                let shell = Value::Record(RecordValue {
                    type_name: header.type_name.clone(),
                    fields: Vec::new(),
                });
                fire(desc.as_ref().and_then(|d| d.deserializing_hook()), &shell);

                let mut fields: Vec<(String, Slot)> = Vec::new();
                match &desc {
                    Some(desc) if !desc.fields().is_empty() => {
                        for field in desc.fields() {
                            if field.name.starts_with("__") {
                                continue;
                            }
                            if desc.is_non_serialized(&field.name) {
                                fields.push((
                                    field.name.clone(),
                                    slot(value::default_for_type(&field.type_name)),
                                ));
                                continue;
                            }
                            let field_slot =
                                deserialize_node(state, ar, &field.name, Some(&field.type_name))?;
                            fields.push((field.name.clone(), field_slot));
                        }
                    }
                    _ => {
                        for k in ar.scope_keys()? {
                            let field_slot = deserialize_node(state, ar, &k, None)?;
                            fields.push((k, field_slot));
                        }
                    }
                }
                let v = Value::Record(RecordValue {
                    type_name: header.type_name.clone(),
                    fields,
                });
                state.tracker.record_slot(header.id, Rc::clone(&out));
                *out.borrow_mut() = v.clone();
                fire(desc.as_ref().and_then(|d| d.deserialized_hook()), &v);
                Ok(())
            })?;
            Ok(out)
        }

        NodeKind::Object => deserialize_object(state, archive, key, declared),

        NodeKind::Pointer => {
            let out = slot(Value::Null(declared_or("void")));
            archive.unarchive_pointer(key, &mut |ar, pointer_id| {
                state.tracker.record_slot(pointer_id, Rc::clone(&out));
                let Some(k) = ar.scope_keys()?.first().cloned() else {
                    return state.raise(TangerineError::MalformedArchive(
                        "pointer node has no pointee".into(),
                    ));
                };
                match ar.node_kind(&k)? {
                    Some(NodeKind::Reference) => {
                        let target = ar.unarchive_reference(&k)?;
                        if target.is_none() {
                            state.raise(TangerineError::MalformedArchive(
                                "pointer reference has no target".into(),
                            ))?;
                            return Ok(());
                        }
                        match state.tracker.slot(target) {
                            Some(target_slot) => {
                                let v = Value::Pointer(PointerValue {
                                    target: target_slot,
                                });
                                state.tracker.record_reconstructed(pointer_id, v.clone());
                                *out.borrow_mut() = v;
                            }
                            None => state.tracker.push_fixup(Fixup::Pointer {
                                pointer: pointer_id,
                                target,
                                slot: Rc::clone(&out),
                            }),
                        }
                    }
                    Some(_) => {
                        let pointee = deserialize_node(state, ar, &k, None)?;
                        let v = Value::Pointer(PointerValue { target: pointee });
                        state.tracker.record_reconstructed(pointer_id, v.clone());
                        *out.borrow_mut() = v;
                    }
                    None => {
                        state.raise(TangerineError::MalformedArchive(
                            "pointer node has no pointee".into(),
                        ))?;
                    }
                }
                Ok(())
            })?;
            Ok(out)
        }

        NodeKind::Base => {
            state.raise(TangerineError::MalformedArchive(format!(
                "unexpected base-class node under key `{key}`"
            )))?;
            Ok(slot(value::default_for_type(&declared_or("void"))))
        }
    }
}

fn deserialize_object(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    key: &str,
    declared: Option<&str>,
) -> Result<Slot> {
    let out = slot(Value::Null(declared.unwrap_or("void").to_string()));
    archive.unarchive_object(key, &mut |ar, header| {
        if let Some(hook) = state.deserializers.get(&header.runtime_type).cloned() {
            let v = {
                let mut ctx = DeserializeContext { state: &mut *state, archive: ar, next_child: 0 };
                hook(&mut ctx)?
            };
            state.tracker.record_reconstructed(header.id, v.clone());
            state.tracker.record_slot(header.id, Rc::clone(&out));
            *out.borrow_mut() = v;
            return Ok(());
        }
        let desc = descriptor::lookup_type(&header.runtime_type);
        if let Some(capability) = desc.as_ref().and_then(|d| d.deserialize_capability()) {
            let v = {
                let mut ctx = DeserializeContext { state: &mut *state, archive: ar, next_child: 0 };
                capability(&mut ctx)?
            };
            state.tracker.record_reconstructed(header.id, v.clone());
            state.tracker.record_slot(header.id, Rc::clone(&out));
            *out.borrow_mut() = v;
            return Ok(());
        }
        if desc.is_none() && header.runtime_type != header.static_type {
            state.raise(TangerineError::UnregisteredType(header.runtime_type.clone()))?;
            *out.borrow_mut() = Value::Null(header.static_type.clone());
            return Ok(());
        }

        // Allocate the shell before walking fields so that references to
        // this object from inside its own graph resolve (cycle safety).
        let object = match desc.as_ref().map(|d| d.instantiate()) {
            Some(Value::Object(rc)) => rc,
            _ => Rc::new(std::cell::RefCell::new(ObjectValue {
                class: header.runtime_type.clone(),
                fields: Vec::new(),
            })),
        };
        let v = Value::Object(Rc::clone(&object));
        state.tracker.record_reconstructed(header.id, v.clone());
        state.tracker.record_slot(header.id, Rc::clone(&out));
        *out.borrow_mut() = v.clone();
        fire(desc.as_ref().and_then(|d| d.deserializing_hook()), &v);

        match &desc {
            Some(desc) if !desc.fields().is_empty() => {
                for field in desc.fields() {
                    if field.name.starts_with("__") || desc.is_non_serialized(&field.name) {
                        continue;
                    }
                    let field_slot =
                        deserialize_node(state, ar, &field.name, Some(&field.type_name))?;
                    set_field(&object, &field.name, field_slot);
                }
                deserialize_base_chain(state, ar, &object, desc)?;
            }
            _ => {
                for k in ar.scope_keys()? {
                    if ar.node_kind(&k)? == Some(NodeKind::Base) {
                        deserialize_doc_base(state, ar, &object, &k)?;
                        continue;
                    }
                    let field_slot = deserialize_node(state, ar, &k, None)?;
                    set_field(&object, &k, field_slot);
                }
            }
        }
        fire(desc.as_ref().and_then(|d| d.deserialized_hook()), &v);
        Ok(())
    })?;
    Ok(out)
}

fn set_field(object: &Rc<std::cell::RefCell<ObjectValue>>, name: &str, field_slot: Slot) {
    let mut obj = object.borrow_mut();
    match obj.fields.iter_mut().find(|(n, _)| n == name) {
        Some((_, existing)) => *existing = field_slot,
        None => obj.fields.push((name.to_string(), field_slot)),
    }
}

/// Reads the base-class chain declared by `desc` into `object`.
fn deserialize_base_chain(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    object: &Rc<std::cell::RefCell<ObjectValue>>,
    desc: &TypeDescriptor,
) -> Result<()> {
    let Some(base_name) = desc.base() else {
        return Ok(());
    };
    let base_name = base_name.to_string();
    let mut base_key = None;
    for k in archive.scope_keys()? {
        if archive.node_kind(&k)? == Some(NodeKind::Base) {
            base_key = Some(k);
            break;
        }
    }
    let Some(key) = base_key else {
        return state.raise(TangerineError::MalformedArchive(format!(
            "missing base-class node for `{base_name}`"
        )));
    };
    archive.unarchive_base_class(&key, &mut |ar, header| {
        let name = if header.type_name.is_empty() {
            base_name.clone()
        } else {
            header.type_name.clone()
        };
        match descriptor::lookup_type(&name) {
            Some(base_desc) => {
                for field in base_desc.fields() {
                    if field.name.starts_with("__") || base_desc.is_non_serialized(&field.name) {
                        continue;
                    }
                    let field_slot =
                        deserialize_node(state, ar, &field.name, Some(&field.type_name))?;
                    set_field(object, &field.name, field_slot);
                }
                deserialize_base_chain(state, ar, object, &base_desc)
            }
            None => {
                for k in ar.scope_keys()? {
                    let field_slot = deserialize_node(state, ar, &k, None)?;
                    set_field(object, &k, field_slot);
                }
                Ok(())
            }
        }
    })
}

/// Document-driven base walk used when the object has no descriptor.
fn deserialize_doc_base(
    state: &mut EngineState,
    archive: &mut dyn Archive,
    object: &Rc<std::cell::RefCell<ObjectValue>>,
    key: &str,
) -> Result<()> {
    archive.unarchive_base_class(key, &mut |ar, _header| {
        for k in ar.scope_keys()? {
            if ar.node_kind(&k)? == Some(NodeKind::Base) {
                deserialize_doc_base(state, ar, object, &k)?;
                continue;
            }
            let field_slot = deserialize_node(state, ar, &k, None)?;
            set_field(object, &k, field_slot);
        }
        Ok(())
    })
}

fn slice_view(parent: &Value, offset: usize, length: usize) -> Option<Value> {
    match parent {
        Value::Array(a) => a.slice(offset, length).map(Value::Array),
        Value::Str(s) => s.slice(offset, length).map(Value::Str),
        _ => None,
    }
}

fn post_process_deserialize(state: &mut EngineState) -> Result<()> {
    let fixups = state.tracker.take_fixups();
    if fixups.is_empty() {
        return Ok(());
    }
    debug!(pending = fixups.len(), "resolving deferred edges");

    let (pointers, rest): (Vec<_>, Vec<_>) = fixups
        .into_iter()
        .partition(|f| matches!(f, Fixup::Pointer { .. }));

    for fixup in pointers {
        let Fixup::Pointer { pointer, target, slot: out } = fixup else {
            continue;
        };
        match state.tracker.slot(target) {
            Some(target_slot) => {
                let v = Value::Pointer(PointerValue {
                    target: target_slot,
                });
                state.tracker.record_reconstructed(pointer, v.clone());
                *out.borrow_mut() = v;
            }
            None => state.raise(TangerineError::MalformedArchive(format!(
                "pointer {pointer} targets id {target}, which was never deserialized"
            )))?,
        }
    }

    for fixup in rest {
        match fixup {
            Fixup::Slice {
                parent,
                offset,
                length,
                slot: out,
            } => match state.tracker.reconstructed(parent) {
                Some(parent_value) => match slice_view(&parent_value, offset, length) {
                    Some(v) => *out.borrow_mut() = v,
                    None => state.raise(TangerineError::MalformedArchive(format!(
                        "slice is out of range of array {parent}"
                    )))?,
                },
                None => state.raise(TangerineError::MalformedArchive(format!(
                    "slice references array {parent}, which was never deserialized"
                )))?,
            },
            Fixup::Reference {
                target,
                slot: out,
                declared,
            } => {
                let resolved = state
                    .tracker
                    .reconstructed(target)
                    .or_else(|| state.tracker.slot(target).map(|s| s.borrow().clone()));
                match resolved {
                    Some(v) => *out.borrow_mut() = v,
                    None => {
                        state.raise(TangerineError::MalformedArchive(format!(
                            "reference targets id {target}, which was never deserialized"
                        )))?;
                        *out.borrow_mut() = value::default_for_type(&declared);
                    }
                }
            }
            Fixup::Pointer { .. } => {}
        }
    }
    Ok(())
}
