//! Grouping Table
//!
//! Per-filter tally of field values. Keys are unique; the sum of all counts
//! equals the number of grouping events attributed to the filter. Keys are
//! the field's raw bytes, so values that are not valid UTF-8 stay distinct.

use crate::{Result, TallyError};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashMap;

/// Mapping from a field value to its match count
#[derive(Debug, Clone, Default)]
pub struct GroupingTable {
    counts: HashMap<Box<[u8]>, u64>,
}

/// One reported group entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupEntry {
    /// Raw field bytes; rendered lossily where text is required
    #[serde(serialize_with = "serialize_lossy")]
    pub value: Vec<u8>,
    pub count: u64,
}

impl GroupEntry {
    /// The value as text, with invalid UTF-8 replaced
    pub fn value_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

fn serialize_lossy<S>(value: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(value))
}

impl GroupingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `value`, inserting it with count 1 on first sight.
    /// Allocation failure is reported instead of aborting.
    pub fn record(&mut self, value: impl AsRef<[u8]>) -> Result<()> {
        let value = value.as_ref();
        if let Some(count) = self.counts.get_mut(value) {
            *count += 1;
            return Ok(());
        }

        let mut key = Vec::new();
        key.try_reserve_exact(value.len())
            .map_err(|_| TallyError::OutOfMemory("grouping key"))?;
        key.extend_from_slice(value);
        self.counts
            .try_reserve(1)
            .map_err(|_| TallyError::OutOfMemory("grouping table"))?;
        self.counts.insert(key.into_boxed_slice(), 1);
        Ok(())
    }

    pub fn get(&self, value: impl AsRef<[u8]>) -> Option<u64> {
        self.counts.get(value.as_ref()).copied()
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Entries by descending count; equal counts ordered by value so repeated
    /// runs print identically.
    pub fn sorted(&self) -> Vec<(&[u8], u64)> {
        let mut entries: Vec<(&[u8], u64)> =
            self.counts.iter().map(|(k, &v)| (&k[..], v)).collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }

    /// Sorted entries truncated by `limit`
    pub fn top(&self, limit: GroupLimit) -> Vec<GroupEntry> {
        let mut displayed = 0usize;
        let mut out = Vec::new();
        for (value, count) in self.sorted() {
            if limit.reached(displayed) {
                break;
            }
            displayed += 1;
            out.push(GroupEntry {
                value: value.to_vec(),
                count,
            });
        }
        out
    }
}

/// How many group entries a filter reports.
///
/// A negative configured limit suppresses every entry. This is the literal
/// behavior of the tool's argument format, even though elsewhere `-1` reads
/// as "unbounded".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLimit {
    Suppressed,
    AtMost(usize),
}

impl GroupLimit {
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Self::Suppressed
        } else {
            Self::AtMost(usize::try_from(raw).unwrap_or(usize::MAX))
        }
    }

    /// Checked before each candidate entry, so exactly `n` entries pass.
    #[inline]
    pub fn reached(self, displayed: usize) -> bool {
        match self {
            Self::Suppressed => true,
            Self::AtMost(n) => displayed >= n,
        }
    }
}
