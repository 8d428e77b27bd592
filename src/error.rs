//! Centralized error handling.
//!
//! All failure conditions are represented as `Result` values; the library
//! never panics (enforced by `#![deny(clippy::panic)]` and
//! `#![deny(clippy::unwrap_used)]`). Errors are `Clone` so that a single
//! failure can be routed through the error callback and still be returned
//! to the caller.
//!
//! The engine does not decide on its own whether a failure is fatal: every
//! condition flows through the installed [`ErrorCallback`]. The default
//! callback raises (the operation returns `Err`); the do-nothing callback
//! swallows the failure and lets the operation continue with a per-kind
//! default value (null object, zero primitive, empty container).

use std::fmt;
use std::io;
use std::rc::Rc;
use std::sync::Arc;

/// A specialized `Result` type for tangerine operations.
pub type Result<T> = std::result::Result<T, TangerineError>;

/// The master error enum covering all failure domains.
///
/// ## Variants
///
/// - **Io:** file system failures from the [`Tangerine`](crate::Tangerine)
///   façade (wrapped in `Arc` to keep the error `Clone`).
/// - **NotSerializable:** the value classified to a kind the engine cannot
///   archive (for example a data-carrying enum variant coming through the
///   serde bridge).
/// - **UnregisteredType:** a polymorphic object whose concrete runtime type
///   has neither a registered descriptor nor a custom (de)serializer.
/// - **MalformedArchive:** a required element or attribute is missing, a key
///   is duplicated within its scope, or a primitive literal fails to parse.
/// - **ApiMisuse:** the engine's run-state machine was violated (for example
///   `serialize` called while a deserialization run is in progress, or an
///   archive read before `begin_unarchiving`).
#[derive(Debug, Clone)]
pub enum TangerineError {
    /// Low-level I/O failure from the file façade.
    Io(Arc<io::Error>),
    /// The value or type cannot be archived.
    NotSerializable(String),
    /// Polymorphic runtime type with no registration.
    UnregisteredType(String),
    /// The document violates a structural expectation.
    MalformedArchive(String),
    /// An operation was called in the wrong engine state.
    ApiMisuse(String),
}

impl TangerineError {
    /// Short name of the failure domain, used in log lines and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::NotSerializable(_) => "not-serializable",
            Self::UnregisteredType(_) => "unregistered-type",
            Self::MalformedArchive(_) => "malformed-archive",
            Self::ApiMisuse(_) => "api-misuse",
        }
    }
}

impl fmt::Display for TangerineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::NotSerializable(s) => write!(f, "Not Serializable: {s}"),
            Self::UnregisteredType(s) => write!(f, "Unregistered Type: {s}"),
            Self::MalformedArchive(s) => write!(f, "Malformed Archive: {s}"),
            Self::ApiMisuse(s) => write!(f, "Api Misuse: {s}"),
        }
    }
}

impl std::error::Error for TangerineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TangerineError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl serde::ser::Error for TangerineError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::NotSerializable(msg.to_string())
    }
}

impl serde::de::Error for TangerineError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::MalformedArchive(msg.to_string())
    }
}

/// What the error callback decided to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Propagate the error; the operation unwinds.
    Raise,
    /// Swallow the error; the operation continues with a default value.
    Continue,
}

/// The installed error policy.
///
/// Called exactly once per failure occurrence, by whichever layer (engine
/// or archive) detected the condition.
pub type ErrorCallback = Rc<dyn Fn(&TangerineError) -> ErrorAction>;

/// The default callback: every failure raises.
pub fn throw_on_error() -> ErrorCallback {
    Rc::new(|_| ErrorAction::Raise)
}

/// The do-nothing callback: failures are swallowed and operations return
/// per-kind defaults.
pub fn do_nothing_on_error() -> ErrorCallback {
    Rc::new(|_| ErrorAction::Continue)
}

/// Routes `err` through `callback`, mapping the decision onto `Result`.
pub(crate) fn report(callback: &ErrorCallback, err: TangerineError) -> Result<()> {
    match callback(&err) {
        ErrorAction::Raise => Err(err),
        ErrorAction::Continue => Ok(()),
    }
}
