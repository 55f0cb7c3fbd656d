//! Bounded query-string encoder.
//!
//! Pairs are appended as `?key=value` for the first and `&key=value` after
//! that. The buffer has a fixed capacity; a pair that doesn't fit is
//! rejected and the encoder is left untouched so the caller can retry with
//! a larger one.

use std::fmt::{self, Write};

use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryString {
    buf: String,
    capacity: usize,
    has_pairs: bool,
}

impl QueryString {
    /// Empty encoder that may grow to `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self::with_prefix("", capacity)
    }

    /// Encoder writing after `prefix` (typically the endpoint path); the
    /// prefix counts against `capacity`
    pub fn with_prefix(prefix: &str, capacity: usize) -> Self {
        Self {
            buf: prefix.to_string(),
            capacity,
            has_pairs: false,
        }
    }

    pub fn add(&mut self, key: &str, value: &str) -> Result<(), QueryError> {
        let needed = key.len() + value.len() + 2;
        let available = self.capacity.saturating_sub(self.buf.len());
        if needed > available {
            return Err(QueryError::OutOfSpace { needed, available });
        }

        self.buf.push(if self.has_pairs { '&' } else { '?' });
        self.buf.push_str(key);
        self.buf.push('=');
        self.buf.push_str(value);
        self.has_pairs = true;

        Ok(())
    }

    /// Like [`QueryString::add`], formatting the value first.
    ///
    /// ```
    /// use rest_ratelimit::query::QueryString;
    ///
    /// let mut query = QueryString::new(32);
    /// query.add_fmt("limit", format_args!("{}", 50)).unwrap();
    /// assert_eq!(query.as_str(), "?limit=50");
    /// ```
    pub fn add_fmt(&mut self, key: &str, value: fmt::Arguments<'_>) -> Result<(), QueryError> {
        let mut scratch = String::new();
        // Writing into a String can't fail
        let _ = scratch.write_fmt(value);
        self.add(key, &scratch)
    }

    /// Bytes written so far, including any prefix
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

impl fmt::Display for QueryString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}
