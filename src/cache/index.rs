use std::fmt;
use std::str::FromStr;

/// Version marker returned by the source with every blocking query response.
///
/// Opaque to the cache beyond ordering: the cache sends the last index back to
/// resume long-polling from the last observed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index(u64);

impl Index {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Index {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Index {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// What the poll loop should do with an index returned by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexAdvance {
    /// The source moved forward (or this is the first response)
    Advanced(Index),
    /// Same index as requested, nothing can have changed
    Unchanged,
    /// The source went backwards; restart without an index
    Reset,
}

pub(crate) fn classify(requested: Option<Index>, returned: Index) -> IndexAdvance {
    match requested {
        None => IndexAdvance::Advanced(returned),
        Some(last) if returned == last => IndexAdvance::Unchanged,
        Some(last) if returned < last => IndexAdvance::Reset,
        Some(_) => IndexAdvance::Advanced(returned),
    }
}
