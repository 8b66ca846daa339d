//! Step syntax for `sgt-sim run`.
//!
//! | Step              | Meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `capacity`        | query the available memory                |
//! | `reserve=<size>`  | reserve a linear buffer                   |
//! | `circular=<size>` | reserve a circular buffer                 |
//! | `unreserve=<n>`   | release the `n`-th reservation (1-based)  |
//! | `unreserve-all`   | release everything                        |
//!
//! Sizes take an optional binary suffix: `K`, `M` or `G` (`50K`, `400M`).

use kernel_sgt::BufferMode;
use std::str::FromStr;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Step {
    Capacity,
    Reserve { size: u64, mode: BufferMode },
    Unreserve { handle: usize },
    UnreserveAll,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown step `{0}`")]
    UnknownStep(String),
    #[error("invalid size `{0}`")]
    BadSize(String),
    #[error("invalid reservation number `{0}`")]
    BadHandle(String),
}

/// Parse a byte count such as `4096`, `50K` or `400M`.
///
/// # Errors
/// [`ParseError::BadSize`] for malformed or overflowing values.
pub fn parse_size(text: &str) -> Result<u64, ParseError> {
    let bad = || ParseError::BadSize(text.to_owned());
    let trimmed = text.trim();
    let (digits, shift) = match trimmed.char_indices().last() {
        Some((i, 'k' | 'K')) => (&trimmed[..i], 10),
        Some((i, 'm' | 'M')) => (&trimmed[..i], 20),
        Some((i, 'g' | 'G')) => (&trimmed[..i], 30),
        _ => (trimmed, 0),
    };
    let value: u64 = digits.parse().map_err(|_| bad())?;
    value.checked_mul(1 << shift).ok_or_else(bad)
}

impl FromStr for Step {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            None if s == "capacity" => Ok(Self::Capacity),
            None if s == "unreserve-all" => Ok(Self::UnreserveAll),
            Some(("reserve", size)) => Ok(Self::Reserve {
                size: parse_size(size)?,
                mode: BufferMode::Linear,
            }),
            Some(("circular", size)) => Ok(Self::Reserve {
                size: parse_size(size)?,
                mode: BufferMode::Circular,
            }),
            Some(("unreserve", n)) => match n.parse() {
                Ok(handle) if handle > 0 => Ok(Self::Unreserve { handle }),
                _ => Err(ParseError::BadHandle(n.to_owned())),
            },
            _ => Err(ParseError::UnknownStep(s.to_owned())),
        }
    }
}
