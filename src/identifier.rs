use std::fmt;

use crate::error::{Error, Result};

pub const DEFAULT_PREFIX: &str = "MI20-";
pub const DEFAULT_WIDTH: usize = 5;

/// Patient-facing identifier derived from a counter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed prefix followed by a zero-padded, fixed-width decimal counter.
///
/// Counter values that need more digits than `width` are rejected instead of
/// widening the identifier, so every identifier of one format has the same
/// length and sorts in issue order.
#[derive(Debug, Clone)]
pub struct IdentifierFormat {
    prefix: String,
    width: usize,
}

impl Default for IdentifierFormat {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_WIDTH)
    }
}

impl IdentifierFormat {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width: width.clamp(1, 19),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Largest counter value that still fits the padding.
    pub fn max_value(&self) -> u64 {
        10u64.pow(self.width as u32) - 1
    }

    /// Fails unless every value in `start..start + count` can be formatted.
    pub fn check_range(&self, start: u64, count: u64) -> Result<()> {
        let end = start.saturating_add(count);
        if count > 0 && end - 1 > self.max_value() {
            return Err(Error::CounterExhausted {
                start,
                end,
                width: self.width,
            });
        }
        Ok(())
    }

    pub fn format(&self, value: u64) -> Result<Identifier> {
        self.check_range(value, 1)?;
        Ok(Identifier(format!(
            "{}{:0width$}",
            self.prefix,
            value,
            width = self.width
        )))
    }

    pub fn parse(&self, identifier: &str) -> Option<u64> {
        let digits = identifier.strip_prefix(&self.prefix)?;
        if digits.len() != self.width || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}
