//! The dynamic value model the engine operates on.
//!
//! A [`Value`] is one node of an object graph: a primitive, a string, an
//! array view, a mapping, a record, a polymorphic object, a pointer, an
//! enum, or an opaque alias. Reference-typed values (objects, mappings,
//! pointers) and the backing storage of strings and arrays are shared
//! through `Rc`, so the same graph shape the user builds, including shared
//! subgraphs and cycles, is what the engine sees and what deserialization
//! reconstructs.
//!
//! Every value *position* (a record or object field, an array element, a
//! map key or value, a pointer target) is a [`Slot`]. Slots are the
//! addressable unit: identity tracking compares slot and storage addresses,
//! and a [`Value::Pointer`] aliases the slot it points at, so writing
//! through the original position is visible through the pointer.

use std::cell::RefCell;
use std::rc::Rc;

use crate::descriptor::Kind;

/// A shared, mutable value position.
pub type Slot = Rc<RefCell<Value>>;

/// Wraps a value in a fresh slot.
pub fn slot(value: Value) -> Slot {
    Rc::new(RefCell::new(value))
}

/// A string value: a byte range into a shared buffer.
///
/// Two `StrValue`s built over the same buffer share storage; a sub-range of
/// another string is a slice of it and round-trips as one.
#[derive(Debug, Clone)]
pub struct StrValue {
    /// The shared backing buffer.
    pub buf: Rc<String>,
    /// Byte offset of this view into the buffer.
    pub offset: usize,
    /// Byte length of this view.
    pub len: usize,
}

impl StrValue {
    /// Creates a string over a fresh buffer.
    pub fn new(text: impl Into<String>) -> Self {
        let buf: String = text.into();
        let len = buf.len();
        Self {
            buf: Rc::new(buf),
            offset: 0,
            len,
        }
    }

    /// Returns the visible text of this view.
    pub fn as_str(&self) -> &str {
        self.buf
            .get(self.offset..self.offset + self.len)
            .unwrap_or("")
    }

    /// A sub-view sharing this string's buffer, or `None` if the byte range
    /// is out of bounds or splits a character.
    pub fn slice(&self, offset: usize, len: usize) -> Option<Self> {
        let start = self.offset + offset;
        self.buf.get(start..start + len)?;
        Some(Self {
            buf: Rc::clone(&self.buf),
            offset: start,
            len,
        })
    }
}

/// An array value: a view into shared element storage.
#[derive(Debug, Clone)]
pub struct ArrayValue {
    /// The shared element storage.
    pub buf: Rc<RefCell<Vec<Slot>>>,
    /// Element offset of this view.
    pub offset: usize,
    /// Element count of this view.
    pub len: usize,
}

impl ArrayValue {
    /// Creates an array over fresh storage.
    pub fn new(values: Vec<Value>) -> Self {
        let slots: Vec<Slot> = values.into_iter().map(slot).collect();
        let len = slots.len();
        Self {
            buf: Rc::new(RefCell::new(slots)),
            offset: 0,
            len,
        }
    }

    /// Number of elements visible through this view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The slot of the `index`-th visible element.
    pub fn get(&self, index: usize) -> Option<Slot> {
        if index >= self.len {
            return None;
        }
        self.buf.borrow().get(self.offset + index).cloned()
    }

    /// A sub-view sharing this array's storage, or `None` if out of range.
    pub fn slice(&self, offset: usize, len: usize) -> Option<Self> {
        if offset + len > self.len {
            return None;
        }
        Some(Self {
            buf: Rc::clone(&self.buf),
            offset: self.offset + offset,
            len,
        })
    }

    /// True if both views read from the same backing storage.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.buf, &other.buf)
    }
}

/// A keyed mapping. Reference-typed: clones share the entry list.
#[derive(Debug, Clone)]
pub struct MapValue {
    /// Shared, order-preserving entry list.
    pub entries: Rc<RefCell<Vec<(Slot, Slot)>>>,
}

impl MapValue {
    /// Creates a mapping from `(key, value)` pairs.
    pub fn new(entries: Vec<(Value, Value)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (slot(k), slot(v)))
            .collect();
        Self {
            entries: Rc::new(RefCell::new(entries)),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// True if the mapping has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// A by-value composite with named fields. Identity is not tracked.
#[derive(Debug, Clone)]
pub struct RecordValue {
    /// The record's type name.
    pub type_name: String,
    /// Fields in declaration order.
    pub fields: Vec<(String, Slot)>,
}

/// A polymorphic, reference-typed aggregate with a runtime class tag.
#[derive(Debug)]
pub struct ObjectValue {
    /// The concrete runtime class name.
    pub class: String,
    /// Fields in declaration order.
    pub fields: Vec<(String, Slot)>,
}

impl ObjectValue {
    /// The slot of the named field.
    pub fn field(&self, name: &str) -> Option<Slot> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| Rc::clone(s))
    }
}

/// A pointer: aliases exactly one other value position.
#[derive(Debug, Clone)]
pub struct PointerValue {
    /// The aliased slot.
    pub target: Slot,
}

/// A tagged primitive with a named enum type; the base value is carried as
/// its literal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    /// The enum's type name.
    pub type_name: String,
    /// The base primitive literal (for example `"1"` or a variant name).
    pub value: String,
}

/// An opaque alias: a named type structurally identical to its base.
#[derive(Debug, Clone)]
pub struct AliasValue {
    /// The alias's own type name.
    pub type_name: String,
    /// The wrapped base value.
    pub inner: Box<Value>,
}

/// One node of an object graph.
#[derive(Debug, Clone)]
pub enum Value {
    /// An absent object or pointer, carrying its declared type name.
    Null(String),
    /// Boolean primitive.
    Bool(bool),
    /// Signed integer primitive.
    Int(i64),
    /// Unsigned integer primitive.
    UInt(u64),
    /// Floating point primitive.
    Float(f64),
    /// Character primitive.
    Char(char),
    /// String with identity-sensitive storage.
    Str(StrValue),
    /// Homogeneous sequence with identity-sensitive storage.
    Array(ArrayValue),
    /// Keyed mapping, reference-typed.
    Map(MapValue),
    /// By-value composite with named fields.
    Record(RecordValue),
    /// Polymorphic reference-typed aggregate.
    Object(Rc<RefCell<ObjectValue>>),
    /// Reference to exactly one other value position.
    Pointer(PointerValue),
    /// Tagged primitive with a named type.
    Enum(EnumValue),
    /// Named type structurally identical to its base.
    Alias(AliasValue),
}

impl Value {
    /// Creates a string value.
    pub fn string(text: impl Into<String>) -> Self {
        Self::Str(StrValue::new(text))
    }

    /// Creates an array value over fresh storage.
    pub fn array(values: Vec<Value>) -> Self {
        Self::Array(ArrayValue::new(values))
    }

    /// Creates a mapping value.
    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Self::Map(MapValue::new(entries))
    }

    /// Creates a record value.
    pub fn record<N: Into<String>>(type_name: N, fields: Vec<(&str, Value)>) -> Self {
        Self::Record(RecordValue {
            type_name: type_name.into(),
            fields: fields
                .into_iter()
                .map(|(n, v)| (n.to_string(), slot(v)))
                .collect(),
        })
    }

    /// Creates an object value.
    pub fn object<N: Into<String>>(class: N, fields: Vec<(&str, Value)>) -> Self {
        Self::Object(Rc::new(RefCell::new(ObjectValue {
            class: class.into(),
            fields: fields
                .into_iter()
                .map(|(n, v)| (n.to_string(), slot(v)))
                .collect(),
        })))
    }

    /// Creates a pointer aliasing `target`.
    pub fn pointer_to(target: Slot) -> Self {
        Self::Pointer(PointerValue { target })
    }

    /// Creates a pointer that owns its pointee.
    pub fn pointer(value: Value) -> Self {
        Self::Pointer(PointerValue {
            target: slot(value),
        })
    }

    /// Creates an enum value from its type name and base literal.
    pub fn enumeration<N: Into<String>, V: Into<String>>(type_name: N, value: V) -> Self {
        Self::Enum(EnumValue {
            type_name: type_name.into(),
            value: value.into(),
        })
    }

    /// Creates an alias wrapping `inner`.
    pub fn alias<N: Into<String>>(type_name: N, inner: Value) -> Self {
        Self::Alias(AliasValue {
            type_name: type_name.into(),
            inner: Box::new(inner),
        })
    }

    /// Creates a null of the given declared type.
    pub fn null<N: Into<String>>(type_name: N) -> Self {
        Self::Null(type_name.into())
    }

    /// Classifies this value into one of the nine kinds; `None` for null.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Self::Null(_) => None,
            Self::Bool(_) | Self::Int(_) | Self::UInt(_) | Self::Float(_) | Self::Char(_) => {
                Some(Kind::Primitive)
            }
            Self::Str(_) => Some(Kind::String),
            Self::Array(_) => Some(Kind::Array),
            Self::Map(_) => Some(Kind::Mapping),
            Self::Record(_) => Some(Kind::Record),
            Self::Object(_) => Some(Kind::Object),
            Self::Pointer(_) => Some(Kind::Pointer),
            Self::Enum(_) => Some(Kind::Enum),
            Self::Alias(_) => Some(Kind::Alias),
        }
    }

    /// The value's type name as it appears on the wire.
    pub fn type_name(&self) -> String {
        match self {
            Self::Null(ty) => ty.clone(),
            Self::Bool(_) => "bool".into(),
            Self::Int(_) => "int".into(),
            Self::UInt(_) => "uint".into(),
            Self::Float(_) => "float".into(),
            Self::Char(_) => "char".into(),
            Self::Str(_) => "string".into(),
            Self::Array(_) => "array".into(),
            Self::Map(_) => "associativeArray".into(),
            Self::Record(r) => r.type_name.clone(),
            Self::Object(o) => o.borrow().class.clone(),
            // Not derived from the pointee: a self-referential pointer
            // would recurse through its own slot.
            Self::Pointer(_) => "pointer".into(),
            Self::Enum(e) => e.type_name.clone(),
            Self::Alias(a) => a.type_name.clone(),
        }
    }

    /// The slot of the named field, for objects and records.
    pub fn field(&self, name: &str) -> Option<Slot> {
        match self {
            Self::Object(o) => o.borrow().field(name),
            Self::Record(r) => r
                .fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, s)| Rc::clone(s)),
            _ => None,
        }
    }

    /// The visible text, for string values.
    pub fn as_str(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.as_str().to_string()),
            _ => None,
        }
    }

    /// True if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// Bounded structural comparison, safe on cyclic graphs: nodes deeper
    /// than `depth` compare equal.
    pub fn equal_to_depth(&self, other: &Self, depth: usize) -> bool {
        if depth == 0 {
            return true;
        }
        let next = depth - 1;
        match (self, other) {
            (Self::Null(a), Self::Null(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a.as_str() == b.as_str(),
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Alias(a), Self::Alias(b)) => {
                a.type_name == b.type_name && a.inner.equal_to_depth(&b.inner, next)
            }
            (Self::Array(a), Self::Array(b)) => {
                a.len == b.len
                    && (0..a.len).all(|i| match (a.get(i), b.get(i)) {
                        (Some(x), Some(y)) => x.borrow().equal_to_depth(&y.borrow(), next),
                        _ => false,
                    })
            }
            (Self::Map(a), Self::Map(b)) => {
                let (ae, be) = (a.entries.borrow(), b.entries.borrow());
                ae.len() == be.len()
                    && ae.iter().zip(be.iter()).all(|((ak, av), (bk, bv))| {
                        ak.borrow().equal_to_depth(&bk.borrow(), next)
                            && av.borrow().equal_to_depth(&bv.borrow(), next)
                    })
            }
            (Self::Record(a), Self::Record(b)) => {
                a.type_name == b.type_name && fields_equal(&a.fields, &b.fields, next)
            }
            (Self::Object(a), Self::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (ao, bo) = (a.borrow(), b.borrow());
                ao.class == bo.class && fields_equal(&ao.fields, &bo.fields, next)
            }
            (Self::Pointer(a), Self::Pointer(b)) => {
                Rc::ptr_eq(&a.target, &b.target)
                    || a.target.borrow().equal_to_depth(&b.target.borrow(), next)
            }
            _ => false,
        }
    }
}

fn fields_equal(a: &[(String, Slot)], b: &[(String, Slot)], depth: usize) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|((an, av), (bn, bv))| {
            an == bn && av.borrow().equal_to_depth(&bv.borrow(), depth)
        })
}

/// Structural equality through slots and shared storage.
///
/// Not cycle-safe: comparing cyclic graphs recurses until identical `Rc`s
/// short-circuit. Tests over cyclic graphs use [`Value::equal_to_depth`].
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equal_to_depth(other, usize::MAX)
    }
}

/// Formats a primitive or enum base value as its wire literal.
pub(crate) fn format_primitive(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::UInt(u) => Some(u.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Char(c) => Some(c.to_string()),
        _ => None,
    }
}

/// Parses a wire literal back into the primitive named by `type_name`.
pub(crate) fn parse_primitive(type_name: &str, text: &str) -> Option<Value> {
    match type_name {
        "bool" => text.trim().parse().ok().map(Value::Bool),
        "int" => text.trim().parse().ok().map(Value::Int),
        "uint" => text.trim().parse().ok().map(Value::UInt),
        "float" => text.trim().parse().ok().map(Value::Float),
        "char" => text.chars().next().map(Value::Char),
        _ => None,
    }
}

/// The per-kind default substituted when the do-nothing error callback
/// swallows a failure.
pub(crate) fn default_for_type(type_name: &str) -> Value {
    match type_name {
        "bool" => Value::Bool(false),
        "int" => Value::Int(0),
        "uint" => Value::UInt(0),
        "float" => Value::Float(0.0),
        "char" => Value::Char('\u{0}'),
        "string" => Value::string(""),
        "array" => Value::array(Vec::new()),
        "associativeArray" => Value::map(Vec::new()),
        other => Value::Null(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_slices_share_the_buffer() {
        let a = StrValue::new("hello world");
        let b = a.slice(6, 5).expect("in range");
        assert_eq!(b.as_str(), "world");
        assert!(Rc::ptr_eq(&a.buf, &b.buf));
    }

    #[test]
    fn array_views_alias_elements() {
        let a = ArrayValue::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let b = a.slice(1, 2).expect("in range");
        let elem = b.get(0).expect("present");
        *elem.borrow_mut() = Value::Int(99);
        assert_eq!(*a.get(1).expect("present").borrow(), Value::Int(99));
    }

    #[test]
    fn primitive_literals_round_trip() {
        for v in [
            Value::Bool(true),
            Value::Int(-7),
            Value::UInt(7),
            Value::Float(1.5),
            Value::Char('x'),
        ] {
            let text = format_primitive(&v).expect("primitive");
            let back = parse_primitive(&v.type_name(), &text).expect("parses");
            assert_eq!(v, back);
        }
    }
}
