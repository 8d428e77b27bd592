//! # Tangerine
//!
//! An identity-preserving object-graph serialization library for Rust.
//! Tangerine converts an in-memory value graph (primitives, records,
//! sequences, keyed mappings, enums, pointers, and arbitrarily deep graphs
//! of such things including shared subgraphs and cycles) into a
//! structured, self-describing document, and reconstructs an equal graph
//! from that document.
//!
//! ## Overview
//!
//! Tangerine is fundamentally different from tree-only serialization
//! libraries. Instead of treating data as a tree, it assigns every
//! reference-typed value a run-unique identity while it walks the graph,
//! so that aliasing, sharing, slices, and cyclic structure survive the
//! round trip:
//!
//! *   **Sharing:** a value reached through two paths is emitted once;
//!     later occurrences become reference nodes carrying only the prior id.
//! *   **Cycles:** a node whose field points back at itself round-trips to
//!     a node whose field points back at itself.
//! *   **Slices:** an array that is a sub-range of another array is
//!     detected in a post-processing pass and re-emitted as a slice edge,
//!     so both views share storage again after deserialization.
//! *   **Interior pointers:** a pointer at a field that was itself
//!     serialized as a value becomes an explicit pointer-to-value edge,
//!     resolved on the way back in a final fixup pass.
//!
//! ## Architecture
//!
//! The pipeline has four cooperating parts, leaves first:
//!
//! 1.  [`descriptor`]: classification of values into nine kinds, plus the
//!     process-wide registry of type descriptors (fields, base types,
//!     lifecycle hooks, factories) that drives polymorphic reconstruction.
//! 2.  [`archive`]: the narrow contract between the engine and a document
//!     backend, and the reference XML tree backend.
//! 3.  The identity and alias tracker: per-run tables mapping live value
//!     addresses to stable ids, array storage records for slice detection,
//!     and pointer provenance for the post-processing passes.
//! 4.  [`serializer`]: the engine façade driving the recursion, custom
//!     hooks, lifecycle events, and post-processing.
//!
//! ## Usage
//!
//! ### Value graphs
//!
//! ```rust
//! use tangerine::{Tangerine, Value};
//!
//! let graph = Value::record(
//!     "Save",
//!     vec![
//!         ("hero", Value::object("Player", vec![("hp", Value::Int(40))])),
//!         ("turn", Value::UInt(7)),
//!     ],
//! );
//! let bytes = Tangerine::to_bytes(&graph)?;
//! let back = Tangerine::from_bytes(&bytes)?;
//! assert_eq!(back, graph);
//! # Ok::<(), tangerine::TangerineError>(())
//! ```
//!
//! ### Typed data through serde
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use tangerine::Tangerine;
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Config {
//!     name: String,
//!     retries: u32,
//! }
//!
//! let config = Config { name: "prod".into(), retries: 3 };
//! let bytes = Tangerine::encode(&config)?;
//! let back: Config = Tangerine::decode(&bytes)?;
//! assert_eq!(back, config);
//! # Ok::<(), tangerine::TangerineError>(())
//! ```
//!
//! ### Shared structure
//!
//! ```rust
//! use tangerine::{Tangerine, Value};
//!
//! let shared = Value::object("Player", vec![("hp", Value::Int(40))]);
//! let graph = Value::record(
//!     "Duel",
//!     vec![("attacker", shared.clone()), ("defender", shared)],
//! );
//! let back = Tangerine::from_bytes(&Tangerine::to_bytes(&graph)?)?;
//! // Both fields refer to the same reconstructed object.
//! let a = back.field("attacker").unwrap();
//! let d = back.field("defender").unwrap();
//! assert!(a.borrow().equal_to_depth(&d.borrow(), 8));
//! # Ok::<(), tangerine::TangerineError>(())
//! ```
//!
//! ## Error Handling
//!
//! All failures correspond to a [`TangerineError`] and flow through a
//! configurable error callback: the default raises, the do-nothing
//! callback swallows the failure and substitutes per-kind defaults so
//! partially damaged documents still yield a value. See [`error`].
//!
//! ## Concurrency
//!
//! A [`Serializer`] instance is single-threaded and non-reentrant. The
//! only process-wide state is the registered-type table, which is
//! read-mostly and safe to read concurrently once populated;
//! [`reset_registered_types`] clears it for tests.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

pub mod api;
pub mod archive;
pub mod convert;
pub mod descriptor;
pub mod error;
pub mod inspector;
pub mod serializer;
pub mod value;

mod id;
mod tracker;

pub use api::Tangerine;
pub use archive::{Archive, XmlArchive};
pub use descriptor::{Kind, TypeDescriptor, lookup_type, register_type, reset_registered_types};
pub use error::{ErrorAction, ErrorCallback, Result, TangerineError};
pub use id::Id;
pub use inspector::DocumentInspector;
pub use serializer::{DeserializeContext, SerializeContext, Serializer};
pub use value::{Slot, Value};
