use std::fmt;

/// A strong type naming a single node in a serialized document.
///
/// Ids are 0-based and monotonically increasing within one run of the
/// engine; [`Id::NONE`] is the "no id" sentinel returned by probe
/// operations such as
/// [`Archive::unarchive_reference`](crate::archive::Archive::unarchive_reference).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u64);

impl Id {
    /// The "no id" sentinel.
    pub const NONE: Self = Self(u64::MAX);

    /// Creates an `Id` from its raw numeric value.
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true if this is the [`Id::NONE`] sentinel.
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// Parses a decimal id as it appears in a document attribute.
    pub(crate) fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<u64>().ok().map(Self)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Id(NONE)")
        } else {
            write!(f, "Id({})", self.0)
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
