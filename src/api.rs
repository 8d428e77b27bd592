//! The one-shot façade over the engine and the reference backend.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::convert;
use crate::error::Result;
use crate::serializer::Serializer;
use crate::value::Value;

/// The high-level façade: one-shot save/load over files and buffers.
///
/// Every call runs a fresh [`Serializer`] over the reference XML backend.
/// Use [`Serializer`] directly for custom hooks, multiple roots, or a
/// different archive backend.
#[derive(Debug, Default)]
pub struct Tangerine {
    lenient: bool,
}

impl Tangerine {
    /// Starts a configuration builder.
    pub fn builder() -> Self {
        Self::default()
    }

    /// With `true`, installs the do-nothing error callback: failures are
    /// swallowed and operations continue with per-kind defaults.
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    fn engine(&self) -> Serializer {
        let mut serializer = Serializer::with_xml_archive();
        if self.lenient {
            serializer.set_do_nothing_on_error();
        }
        serializer
    }

    /// Serializes `value` into document bytes.
    pub fn write(&self, value: &Value) -> Result<Vec<u8>> {
        self.engine().serialize(value, None)
    }

    /// Reconstructs a value graph from document bytes.
    pub fn read(&self, data: &[u8]) -> Result<Value> {
        self.engine().deserialize(data, None)
    }

    /// Serializes `value` to a file.
    pub fn write_to<P: AsRef<Path>>(&self, path: P, value: &Value) -> Result<()> {
        let data = self.write(value)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Reconstructs a value graph from a file.
    pub fn read_from<P: AsRef<Path>>(&self, path: P) -> Result<Value> {
        let data = fs::read(path)?;
        self.read(&data)
    }

    /// Serializes `value` with default settings into document bytes.
    pub fn to_bytes(value: &Value) -> Result<Vec<u8>> {
        Self::default().write(value)
    }

    /// Reconstructs a value graph with default settings.
    pub fn from_bytes(data: &[u8]) -> Result<Value> {
        Self::default().read(data)
    }

    /// Saves a value graph to a file with default settings.
    pub fn save<P: AsRef<Path>>(path: P, value: &Value) -> Result<()> {
        Self::default().write_to(path, value)
    }

    /// Loads a value graph from a file with default settings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Value> {
        Self::default().read_from(path)
    }

    /// Serializes any serde-serializable value through the value-model
    /// bridge. Tree-shaped data only; see [`crate::convert`].
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Self::to_bytes(&convert::to_value(value)?)
    }

    /// Reconstructs a serde-deserializable value through the bridge.
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        convert::from_value(&Self::from_bytes(data)?)
    }
}
