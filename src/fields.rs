//! Field Splitter
//!
//! Splits a raw delimited record into exactly `N` borrowed field slices.
//! Missing trailing fields become empty; tokens past the `N`-th are
//! dropped. The multi-value column is not decomposed here.
//!
//! Records are split as bytes. Nothing requires them to be valid UTF-8,
//! and field values keep their exact bytes all the way to the report.

use crate::schema::Schema;
use memchr::memmem;
use smallvec::SmallVec;

/// Inline capacity for field slices (covers the built-in 7-column schema)
const INLINE_FIELDS: usize = 8;

/// A split record borrowing from the raw record buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    fields: SmallVec<[&'a [u8]; INLINE_FIELDS]>,
}

impl<'a> Record<'a> {
    /// Split `raw` on the schema delimiter into `schema.len()` fields
    pub fn split(raw: &'a [u8], schema: &Schema) -> Self {
        Self::split_n(raw, schema.delimiter(), schema.len())
    }

    /// Split `raw` on `delimiter` into exactly `n` fields
    pub fn split_n(raw: &'a [u8], delimiter: char, n: usize) -> Self {
        let mut fields: SmallVec<[&'a [u8]; INLINE_FIELDS]> = SmallVec::with_capacity(n);
        fields.extend(FieldCursor::new(raw, delimiter).take(n));
        while fields.len() < n {
            fields.push(&[]);
        }
        Self { fields }
    }

    /// Field at `index`, or `None` past the schema width
    pub fn get(&self, index: usize) -> Option<&'a [u8]> {
        self.fields.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.fields.iter().copied()
    }
}

/// Explicit tokenizer cursor. Each record gets its own cursor, so splitting
/// several records interleaved is safe.
///
/// An empty remainder ends the sequence, so `"a|"` yields only `"a"` and an
/// empty record yields nothing; adjacent delimiters yield empty tokens.
#[derive(Debug, Clone)]
pub struct FieldCursor<'a> {
    rest: Option<&'a [u8]>,
    delimiter: [u8; 4],
    delimiter_len: usize,
}

impl<'a> FieldCursor<'a> {
    pub fn new(raw: &'a [u8], delimiter: char) -> Self {
        let mut encoded = [0u8; 4];
        let delimiter_len = delimiter.encode_utf8(&mut encoded).len();
        Self {
            rest: Some(raw),
            delimiter: encoded,
            delimiter_len,
        }
    }

    fn find_delimiter(&self, haystack: &[u8]) -> Option<usize> {
        match self.delimiter_len {
            1 => memchr::memchr(self.delimiter[0], haystack),
            n => memmem::find(haystack, &self.delimiter[..n]),
        }
    }
}

impl<'a> Iterator for FieldCursor<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = self.rest.filter(|r| !r.is_empty())?;
        match self.find_delimiter(rest) {
            Some(pos) => {
                self.rest = Some(&rest[pos + self.delimiter_len..]);
                Some(&rest[..pos])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

/// Non-empty sub-values of a multi-value field
pub fn multi_values(value: &[u8], separator: char) -> impl Iterator<Item = &[u8]> {
    FieldCursor::new(value, separator).filter(|token| !token.is_empty())
}

/// True when `term` occurs in `field`
#[inline]
pub fn contains(field: &[u8], term: &[u8]) -> bool {
    memmem::find(field, term).is_some()
}
