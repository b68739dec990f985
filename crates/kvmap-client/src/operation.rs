//! Operations for multi-op requests

use kvmap_common::{Bin, Bins};

/// One step of an `operate` request.
///
/// All operations of a request apply atomically to a single record, and
/// the record's generation increases once per request that writes.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Set a bin
    Put(Bin),
    /// Add an integer to a bin (missing bins count as 0)
    Add(Bin),
    /// Append a string to a bin
    Append(Bin),
    /// Prepend a string to a bin
    Prepend(Bin),
    /// Reset the record's expiration without touching its bins
    Touch,
    /// Read all bins (after any writes in the same request)
    Get,
    /// Read generation and expiration only
    GetHeader,
}

impl Operation {
    /// Whether the operation modifies the record
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Put(_) | Self::Add(_) | Self::Append(_) | Self::Prepend(_) | Self::Touch
        )
    }

    /// One `Put` per bin, followed by `tail`
    #[must_use]
    pub fn puts(bins: &Bins, tail: &[Self]) -> Vec<Self> {
        bins.iter()
            .cloned()
            .map(Self::Put)
            .chain(tail.iter().cloned())
            .collect()
    }
}
