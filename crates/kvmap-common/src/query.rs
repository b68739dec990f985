//! Query descriptors
//!
//! Filters are produced by the query-derivation layer (which turns
//! repository method names into predicates) and consumed by store scans.
//! This module only defines their shape and how a record is matched.

use crate::error::{Error, Result};
use crate::types::Record;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Predicate over a record's bins
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Bin equals value
    Equal { bin: String, value: Value },
    /// Bin within `[begin, end]` (inclusive)
    Range {
        bin: String,
        begin: Value,
        end: Value,
    },
    /// All sub-filters match
    And(Vec<Filter>),
}

impl Filter {
    pub fn equal(bin: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equal {
            bin: bin.into(),
            value: value.into(),
        }
    }

    pub fn range(bin: impl Into<String>, begin: impl Into<Value>, end: impl Into<Value>) -> Self {
        Self::Range {
            bin: bin.into(),
            begin: begin.into(),
            end: end.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Equal { bin, value } => record.get(bin).unwrap_or(&Value::Nil) == value,
            Self::Range { bin, begin, end } => record.get(bin).is_some_and(|v| {
                v.sort_cmp(begin) != Ordering::Less && v.sort_cmp(end) != Ordering::Greater
            }),
            Self::And(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Ordering on a single bin
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub bin: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Compare two records by this ordering; missing bins sort first
    #[must_use]
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let nil = Value::Nil;
        let ord = a
            .get(&self.bin)
            .unwrap_or(&nil)
            .sort_cmp(b.get(&self.bin).unwrap_or(&nil));
        match self.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

/// A scan query: optional filter, ordering and paging
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Filter>,
    pub sort: Option<Sort>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Query {
    #[must_use]
    pub fn new(filter: Option<Filter>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Paging without ordering is non-deterministic over a scan
    pub fn validate(&self) -> Result<()> {
        if self.sort.is_none() && self.offset > 0 {
            return Err(Error::invalid_argument(
                "Unsorted query must not have offset value. For retrieving paged results use sorted query.",
            ));
        }
        Ok(())
    }
}
