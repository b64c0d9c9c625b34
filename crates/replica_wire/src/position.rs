//! Resume positions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// A resume token into the log.
///
/// Formats as `{generation:016x}-{offset:016x}`: the log generation (bumped
/// whenever the log is rotated to a new topic) and the number of entries of
/// that generation already consumed. The empty string is the beginning of
/// history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Position {
    coordinates: Option<(u64, u64)>,
}

impl Position {
    /// The position just after `offset` entries of `generation`.
    #[must_use]
    pub fn new(generation: u64, offset: u64) -> Self {
        Self {
            coordinates: Some((generation, offset)),
        }
    }

    /// The beginning of history.
    #[must_use]
    pub fn beginning() -> Self {
        Self::default()
    }

    /// Returns `true` for the beginning of history.
    #[must_use]
    pub fn is_beginning(&self) -> bool {
        self.coordinates.is_none()
    }

    /// `(generation, offset)`, or `None` at the beginning of history.
    #[must_use]
    pub fn coordinates(&self) -> Option<(u64, u64)> {
        self.coordinates
    }

    /// Parse a position string.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidPosition`] if `s` is neither empty nor two
    /// dash-separated 16-digit hex numbers.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        if s.is_empty() {
            return Ok(Self::beginning());
        }
        let invalid = || WireError::InvalidPosition(s.to_string());
        let (generation, offset) = s.split_once('-').ok_or_else(invalid)?;
        if generation.len() != 16 || offset.len() != 16 {
            return Err(invalid());
        }
        let generation = u64::from_str_radix(generation, 16).map_err(|_| invalid())?;
        let offset = u64::from_str_radix(offset, 16).map_err(|_| invalid())?;
        Ok(Self::new(generation, offset))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.coordinates {
            Some((generation, offset)) => write!(f, "{generation:016x}-{offset:016x}"),
            None => Ok(()),
        }
    }
}

impl FromStr for Position {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, WireError> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Position {
    type Error = WireError;

    fn try_from(s: String) -> Result<Self, WireError> {
        Self::parse(&s)
    }
}

impl From<Position> for String {
    fn from(position: Position) -> Self {
        position.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let s = "0000000000000000-0000000000000001";
        let position = Position::parse(s).unwrap();
        assert_eq!(position.coordinates(), Some((0, 1)));
        assert_eq!(position.to_string(), s);
        assert_eq!(Position::new(0x2a, 0xff).to_string(), "000000000000002a-00000000000000ff");
    }

    #[test]
    fn test_empty_is_beginning() {
        let position: Position = "".parse().unwrap();
        assert!(position.is_beginning());
        assert_eq!(position.to_string(), "");
        assert!(position.coordinates().is_none());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["1-2", "0000000000000000", "zzzzzzzzzzzzzzzz-0000000000000000", "0000000000000000-00000000000000001"] {
            assert!(matches!(Position::parse(bad), Err(WireError::InvalidPosition(_))), "{bad}");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let position = Position::new(1, 2);
        let json = serde_json::to_string(&position).unwrap();
        assert_eq!(json, "\"0000000000000001-0000000000000002\"");
        assert_eq!(serde_json::from_str::<Position>(&json).unwrap(), position);
        assert!(serde_json::from_str::<Position>("\"x\"").is_err());
    }

    #[test]
    fn test_orders_by_generation_then_offset() {
        assert!(Position::beginning() < Position::new(0, 0));
        assert!(Position::new(0, 9) < Position::new(1, 0));
    }
}
