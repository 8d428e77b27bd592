//! Type descriptors and the process-wide type registry.
//!
//! A [`TypeDescriptor`] is the engine's reflection capability for one named
//! type: its kind, its fields in declaration order, its base-type linkage,
//! the field names excluded from the walk, its lifecycle hooks, and (for
//! objects) a factory that builds a fresh instance from the runtime type
//! name. Descriptors are built with a fluent builder and published to a
//! process-wide registry shared by all serializer instances.
//!
//! The registry is read-mostly: registration happens during initialization,
//! lookups happen on every (de)serialized object. [`reset_registered_types`]
//! clears it for tests.
//!
//! Descriptors are optional for non-polymorphic data: the document format
//! is self-describing, so records and objects whose runtime type equals
//! their declared type round-trip from the document alone. An object whose
//! runtime type differs from its declared type *must* be registered (or
//! have a custom serializer); that is the unregistered-type error.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use crate::error::Result;
use crate::serializer::{DeserializeContext, SerializeContext};
use crate::value::{self, Value};

/// The nine kinds a value or type classifies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Integers, floats, booleans, characters.
    Primitive,
    /// Variable-length character sequence with identity-sensitive storage.
    String,
    /// Homogeneous sequence with identity-sensitive storage.
    Array,
    /// Keyed mapping, reference-typed.
    Mapping,
    /// Composite by-value aggregate with named fields.
    Record,
    /// Polymorphic reference-typed aggregate with a runtime class tag.
    Object,
    /// Reference to exactly one other value.
    Pointer,
    /// Tagged primitive with a named type.
    Enum,
    /// Named type structurally identical to its base.
    Alias,
}

/// One declared field of a record or object type.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// The field name, unique within the type.
    pub name: String,
    /// The field's declared type name.
    pub type_name: String,
}

/// A lifecycle event hook, fired on the value being (de)serialized.
pub type LifecycleHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// A factory building a fresh instance for polymorphic reconstruction.
pub type Factory = Arc<dyn Fn() -> Value + Send + Sync>;

/// The type-provided serialization capability (`to_data`): overrides the
/// default field walk for this type.
pub type SerializeWith = Arc<dyn Fn(&mut SerializeContext<'_>, &Value) -> Result<()> + Send + Sync>;

/// The type-provided deserialization capability (`from_data`).
pub type DeserializeWith = Arc<dyn Fn(&mut DeserializeContext<'_>) -> Result<Value> + Send + Sync>;

/// Reflection data for one named type.
pub struct TypeDescriptor {
    name: String,
    kind: Kind,
    fields: Vec<FieldDescriptor>,
    base: Option<String>,
    non_serialized: Vec<String>,
    on_serializing: Option<LifecycleHook>,
    on_serialized: Option<LifecycleHook>,
    on_deserializing: Option<LifecycleHook>,
    on_deserialized: Option<LifecycleHook>,
    serialize_with: Option<SerializeWith>,
    deserialize_with: Option<DeserializeWith>,
    factory: Option<Factory>,
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl TypeDescriptor {
    /// Starts a descriptor for a polymorphic object type.
    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, Kind::Object)
    }

    /// Starts a descriptor for a by-value record type.
    pub fn record(name: impl Into<String>) -> Self {
        Self::new(name, Kind::Record)
    }

    fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: Vec::new(),
            base: None,
            non_serialized: Vec::new(),
            on_serializing: None,
            on_serialized: None,
            on_deserializing: None,
            on_deserialized: None,
            serialize_with: None,
            deserialize_with: None,
            factory: None,
        }
    }

    /// Declares a field. Order of calls is declaration order.
    pub fn with_field(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            type_name: type_name.into(),
        });
        self
    }

    /// Links this type to its base type.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Excludes a field name from the (de)serialization walk.
    pub fn non_serialized(mut self, name: impl Into<String>) -> Self {
        self.non_serialized.push(name.into());
        self
    }

    /// Installs the `on_serializing` lifecycle hook.
    pub fn on_serializing(mut self, hook: LifecycleHook) -> Self {
        self.on_serializing = Some(hook);
        self
    }

    /// Installs the `on_serialized` lifecycle hook.
    pub fn on_serialized(mut self, hook: LifecycleHook) -> Self {
        self.on_serialized = Some(hook);
        self
    }

    /// Installs the `on_deserializing` lifecycle hook.
    pub fn on_deserializing(mut self, hook: LifecycleHook) -> Self {
        self.on_deserializing = Some(hook);
        self
    }

    /// Installs the `on_deserialized` lifecycle hook.
    pub fn on_deserialized(mut self, hook: LifecycleHook) -> Self {
        self.on_deserialized = Some(hook);
        self
    }

    /// Installs the type-provided serialization capability.
    pub fn serialize_with(mut self, callback: SerializeWith) -> Self {
        self.serialize_with = Some(callback);
        self
    }

    /// Installs the type-provided deserialization capability.
    pub fn deserialize_with(mut self, callback: DeserializeWith) -> Self {
        self.deserialize_with = Some(callback);
        self
    }

    /// Installs a custom reconstruction factory.
    pub fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Publishes this descriptor to the process-wide registry.
    pub fn register(self) {
        register_type(self);
    }

    /// The type name this descriptor reflects.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind this type classifies into.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Declared fields, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// The base type name, if this type has a non-root base.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// True if the named field is excluded from the walk.
    pub fn is_non_serialized(&self, field: &str) -> bool {
        self.non_serialized.iter().any(|n| n == field)
    }

    pub(crate) fn serializing_hook(&self) -> Option<LifecycleHook> {
        self.on_serializing.clone()
    }

    pub(crate) fn serialized_hook(&self) -> Option<LifecycleHook> {
        self.on_serialized.clone()
    }

    pub(crate) fn deserializing_hook(&self) -> Option<LifecycleHook> {
        self.on_deserializing.clone()
    }

    pub(crate) fn deserialized_hook(&self) -> Option<LifecycleHook> {
        self.on_deserialized.clone()
    }

    pub(crate) fn serialize_capability(&self) -> Option<SerializeWith> {
        self.serialize_with.clone()
    }

    pub(crate) fn deserialize_capability(&self) -> Option<DeserializeWith> {
        self.deserialize_with.clone()
    }

    /// Builds a fresh instance of this type: the registered factory if one
    /// was installed, otherwise a shell with declared fields defaulted.
    pub fn instantiate(&self) -> Value {
        if let Some(factory) = &self.factory {
            return factory();
        }
        let fields: Vec<(String, crate::value::Slot)> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    value::slot(value::default_for_type(&f.type_name)),
                )
            })
            .collect();
        match self.kind {
            Kind::Record => Value::Record(crate::value::RecordValue {
                type_name: self.name.clone(),
                fields,
            }),
            _ => Value::Object(std::rc::Rc::new(std::cell::RefCell::new(
                crate::value::ObjectValue {
                    class: self.name.clone(),
                    fields,
                },
            ))),
        }
    }
}

static REGISTERED_TYPES: LazyLock<RwLock<HashMap<String, Arc<TypeDescriptor>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Registers a type descriptor under its fully-qualified name. Later
/// registrations for the same name replace earlier ones.
pub fn register_type(descriptor: TypeDescriptor) {
    let mut table = REGISTERED_TYPES
        .write()
        .unwrap_or_else(|p| p.into_inner());
    table.insert(descriptor.name.clone(), Arc::new(descriptor));
}

/// Looks up the descriptor registered under `name`.
pub fn lookup_type(name: &str) -> Option<Arc<TypeDescriptor>> {
    let table = REGISTERED_TYPES.read().unwrap_or_else(|p| p.into_inner());
    table.get(name).cloned()
}

/// Clears the process-wide registry. Intended for tests.
pub fn reset_registered_types() {
    let mut table = REGISTERED_TYPES
        .write()
        .unwrap_or_else(|p| p.into_inner());
    table.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiate_defaults_declared_fields() {
        let desc = TypeDescriptor::object("tests.Shell")
            .with_field("count", "int")
            .with_field("label", "string");
        let shell = desc.instantiate();
        let count = shell.field("count").expect("declared");
        assert_eq!(*count.borrow(), Value::Int(0));
        let label = shell.field("label").expect("declared");
        assert_eq!(*label.borrow(), Value::string(""));
    }

    #[test]
    fn registry_replaces_existing_descriptors() {
        TypeDescriptor::object("tests.Replaced").register();
        TypeDescriptor::object("tests.Replaced")
            .with_field("x", "int")
            .register();
        let found = lookup_type("tests.Replaced").expect("registered");
        assert_eq!(found.fields().len(), 1);
    }
}
