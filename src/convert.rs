//! Bridging serde data structures into the engine's value model.
//!
//! [`to_value`] runs any `serde::Serialize` type through a `Serializer`
//! that builds a [`Value`] graph instead of writing bytes; [`from_value`]
//! is the inverse. The mapping is tree-shaped:
//!
//! | serde | value model |
//! |-------|-------------|
//! | bool / ints / floats / char | primitives |
//! | str | string |
//! | seq, tuple, tuple struct, bytes | array |
//! | map | mapping |
//! | struct | record |
//! | unit struct | empty record |
//! | newtype struct | alias |
//! | unit enum variant | enum |
//! | option | null / inner |
//!
//! Data-carrying enum variants have no counterpart in the model and are
//! not serializable. Sharing and cycles cannot be expressed through serde;
//! graphs with aliasing are built with the [`Value`] API directly.

use serde::de::{self, DeserializeOwned};
use serde::forward_to_deserialize_any;
use serde::ser::{self, Impossible, Serialize};

use crate::error::{Result, TangerineError};
use crate::value::{MapValue, RecordValue, Value, slot};

/// Converts any serde-serializable value into a [`Value`] tree.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    value.serialize(ValueSerializer)
}

/// Reconstructs a serde-deserializable value from a [`Value`] tree.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T> {
    T::deserialize(ValueDeserializer {
        value: value.clone(),
    })
}

struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = TangerineError;
    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = Impossible<Value, TangerineError>;
    type SerializeMap = MapBuilder;
    type SerializeStruct = StructBuilder;
    type SerializeStructVariant = Impossible<Value, TangerineError>;

    fn serialize_bool(self, v: bool) -> Result<Value> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value> {
        self.serialize_i64(v.into())
    }

    fn serialize_i16(self, v: i16) -> Result<Value> {
        self.serialize_i64(v.into())
    }

    fn serialize_i32(self, v: i32) -> Result<Value> {
        self.serialize_i64(v.into())
    }

    fn serialize_i64(self, v: i64) -> Result<Value> {
        Ok(Value::Int(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Value> {
        self.serialize_u64(v.into())
    }

    fn serialize_u16(self, v: u16) -> Result<Value> {
        self.serialize_u64(v.into())
    }

    fn serialize_u32(self, v: u32) -> Result<Value> {
        self.serialize_u64(v.into())
    }

    fn serialize_u64(self, v: u64) -> Result<Value> {
        Ok(Value::UInt(v))
    }

    fn serialize_f32(self, v: f32) -> Result<Value> {
        Ok(Value::Float(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<Value> {
        Ok(Value::Float(v))
    }

    fn serialize_char(self, v: char) -> Result<Value> {
        Ok(Value::Char(v))
    }

    fn serialize_str(self, v: &str) -> Result<Value> {
        Ok(Value::string(v))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value> {
        Ok(Value::array(v.iter().map(|b| Value::UInt((*b).into())).collect()))
    }

    fn serialize_none(self) -> Result<Value> {
        Ok(Value::Null("void".into()))
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value> {
        Ok(Value::Null("void".into()))
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<Value> {
        Ok(Value::record(name, Vec::new()))
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Value> {
        Ok(Value::enumeration(name, variant))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Value> {
        Ok(Value::alias(name, value.serialize(ValueSerializer)?))
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _value: &T,
    ) -> Result<Value> {
        Err(TangerineError::NotSerializable(format!(
            "data-carrying enum variant `{name}::{variant}`"
        )))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqBuilder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Impossible<Value, TangerineError>> {
        Err(TangerineError::NotSerializable(format!(
            "data-carrying enum variant `{name}::{variant}`"
        )))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapBuilder> {
        Ok(MapBuilder {
            entries: Vec::with_capacity(len.unwrap_or(0)),
            pending_key: None,
        })
    }

    fn serialize_struct(self, name: &'static str, len: usize) -> Result<StructBuilder> {
        Ok(StructBuilder {
            name,
            fields: Vec::with_capacity(len),
        })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Impossible<Value, TangerineError>> {
        Err(TangerineError::NotSerializable(format!(
            "data-carrying enum variant `{name}::{variant}`"
        )))
    }
}

struct SeqBuilder {
    items: Vec<Value>,
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Value;
    type Error = TangerineError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::array(self.items))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = Value;
    type Error = TangerineError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Value;
    type Error = TangerineError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value> {
        ser::SerializeSeq::end(self)
    }
}

struct MapBuilder {
    entries: Vec<(Value, Value)>,
    pending_key: Option<Value>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Value;
    type Error = TangerineError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        self.pending_key = Some(key.serialize(ValueSerializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = self.pending_key.take().ok_or_else(|| {
            TangerineError::NotSerializable("map value without a preceding key".into())
        })?;
        self.entries.push((key, value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::map(self.entries))
    }
}

struct StructBuilder {
    name: &'static str,
    fields: Vec<(String, Value)>,
}

impl ser::SerializeStruct for StructBuilder {
    type Ok = Value;
    type Error = TangerineError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.fields
            .push((key.to_string(), value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Record(RecordValue {
            type_name: self.name.to_string(),
            fields: self
                .fields
                .into_iter()
                .map(|(n, v)| (n, slot(v)))
                .collect(),
        }))
    }
}

struct ValueDeserializer {
    value: Value,
}

impl<'de> de::Deserializer<'de> for ValueDeserializer {
    type Error = TangerineError;

    fn deserialize_any<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Null(_) => visitor.visit_unit(),
            Value::Bool(v) => visitor.visit_bool(v),
            Value::Int(v) => visitor.visit_i64(v),
            Value::UInt(v) => visitor.visit_u64(v),
            Value::Float(v) => visitor.visit_f64(v),
            Value::Char(v) => visitor.visit_char(v),
            Value::Str(s) => visitor.visit_string(s.as_str().to_string()),
            Value::Array(a) => {
                let items: Vec<Value> = (0..a.len())
                    .filter_map(|i| a.get(i))
                    .map(|s| s.borrow().clone())
                    .collect();
                visitor.visit_seq(SeqDeserializer {
                    iter: items.into_iter(),
                })
            }
            Value::Map(m) => visitor.visit_map(map_access(&m)),
            Value::Record(r) => visitor.visit_map(field_access(&r.fields)),
            Value::Object(o) => visitor.visit_map(field_access(&o.borrow().fields)),
            Value::Pointer(p) => {
                let inner = p.target.borrow().clone();
                ValueDeserializer { value: inner }.deserialize_any(visitor)
            }
            Value::Enum(e) => visitor.visit_string(e.value),
            Value::Alias(a) => ValueDeserializer { value: *a.inner }.deserialize_any(visitor),
        }
    }

    fn deserialize_option<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Null(_) => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Value::Alias(a) => visitor.visit_newtype_struct(ValueDeserializer { value: *a.inner }),
            _ => visitor.visit_newtype_struct(self),
        }
    }

    fn deserialize_enum<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        let variant = match self.value {
            Value::Enum(e) => e.value,
            Value::Str(s) => s.as_str().to_string(),
            other => {
                return Err(TangerineError::MalformedArchive(format!(
                    "expected enum value, found {} node",
                    other.type_name()
                )));
            }
        };
        visitor.visit_enum(EnumDeserializer { variant })
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

struct SeqDeserializer {
    iter: std::vec::IntoIter<Value>,
}

impl<'de> de::SeqAccess<'de> for SeqDeserializer {
    type Error = TangerineError;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some(value) => seed.deserialize(ValueDeserializer { value }).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: std::vec::IntoIter<(Value, Value)>,
    pending: Option<Value>,
}

fn map_access(map: &MapValue) -> MapDeserializer {
    let entries: Vec<(Value, Value)> = map
        .entries
        .borrow()
        .iter()
        .map(|(k, v)| (k.borrow().clone(), v.borrow().clone()))
        .collect();
    MapDeserializer {
        iter: entries.into_iter(),
        pending: None,
    }
}

fn field_access(fields: &[(String, crate::value::Slot)]) -> MapDeserializer {
    let entries: Vec<(Value, Value)> = fields
        .iter()
        .map(|(n, s)| (Value::string(n.as_str()), s.borrow().clone()))
        .collect();
    MapDeserializer {
        iter: entries.into_iter(),
        pending: None,
    }
}

impl<'de> de::MapAccess<'de> for MapDeserializer {
    type Error = TangerineError;

    fn next_key_seed<K: de::DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.pending = Some(value);
                seed.deserialize(ValueDeserializer { value: key }).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: de::DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let value = self.pending.take().ok_or_else(|| {
            TangerineError::MalformedArchive("map value read before its key".into())
        })?;
        seed.deserialize(ValueDeserializer { value })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumDeserializer {
    variant: String,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer {
    type Error = TangerineError;
    type Variant = UnitVariantAccess;

    fn variant_seed<V: de::DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, UnitVariantAccess)> {
        let variant =
            seed.deserialize(de::IntoDeserializer::<TangerineError>::into_deserializer(
                self.variant,
            ))?;
        Ok((variant, UnitVariantAccess))
    }
}

struct UnitVariantAccess;

impl<'de> de::VariantAccess<'de> for UnitVariantAccess {
    type Error = TangerineError;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(self, _seed: T) -> Result<T::Value> {
        Err(TangerineError::NotSerializable(
            "data-carrying enum variants are not supported".into(),
        ))
    }

    fn tuple_variant<V: de::Visitor<'de>>(self, _len: usize, _visitor: V) -> Result<V::Value> {
        Err(TangerineError::NotSerializable(
            "data-carrying enum variants are not supported".into(),
        ))
    }

    fn struct_variant<V: de::Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value> {
        Err(TangerineError::NotSerializable(
            "data-carrying enum variants are not supported".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Player {
        name: String,
        level: u32,
        alive: bool,
        scores: Vec<i64>,
    }

    #[test]
    fn structs_round_trip_as_records() -> Result<()> {
        let player = Player {
            name: "ada".into(),
            level: 3,
            alive: true,
            scores: vec![10, -2, 33],
        };
        let value = to_value(&player)?;
        assert!(matches!(&value, Value::Record(r) if r.type_name == "Player"));
        let back: Player = from_value(&value)?;
        assert_eq!(back, player);
        Ok(())
    }

    #[test]
    fn maps_and_options_round_trip() -> Result<()> {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Some(1u8));
        map.insert("b".to_string(), None);
        let value = to_value(&map)?;
        let back: BTreeMap<String, Option<u8>> = from_value(&value)?;
        assert_eq!(back, map);
        Ok(())
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    enum Color {
        Red,
        Green,
    }

    #[test]
    fn unit_variants_become_enums() -> Result<()> {
        let value = to_value(&Color::Green)?;
        assert!(matches!(&value, Value::Enum(e) if e.value == "Green"));
        let back: Color = from_value(&value)?;
        assert_eq!(back, Color::Green);
        Ok(())
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    enum Payload {
        Wrapped(u32),
    }

    #[test]
    fn data_variants_are_rejected() {
        let err = to_value(&Payload::Wrapped(1)).expect_err("unsupported");
        assert!(matches!(err, TangerineError::NotSerializable(_)));
    }
}
