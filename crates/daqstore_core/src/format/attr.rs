//! Attribute values on groups and datasets.

use crate::error::{DatasetError, DatasetResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named attributes of one tree node.
pub type Attributes = BTreeMap<String, AttrValue>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrValue {
    /// Unsigned integer.
    U64(u64),
    /// Flag.
    Bool(bool),
    /// Text.
    Text(String),
}

impl AttrValue {
    /// Returns the integer value, if this is one.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the flag value, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value, if this is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        Self::U64(u64::from(v))
    }
}

impl From<u16> for AttrValue {
    fn from(v: u16) -> Self {
        Self::U64(u64::from(v))
    }
}

impl From<u8> for AttrValue {
    fn from(v: u8) -> Self {
        Self::U64(u64::from(v))
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Reads a required integer attribute.
///
/// # Errors
///
/// Fails if the attribute is absent or not an integer.
pub fn require_u64(attrs: &Attributes, key: &str) -> DatasetResult<u64> {
    attrs
        .get(key)
        .and_then(AttrValue::as_u64)
        .ok_or_else(|| DatasetError::invalid_format(format!("missing integer attribute '{key}'")))
}

/// Reads a required integer attribute that must fit `T`.
///
/// # Errors
///
/// Fails if the attribute is absent, not an integer or out of range.
pub fn require_narrow<T: TryFrom<u64>>(attrs: &Attributes, key: &str) -> DatasetResult<T> {
    let value = require_u64(attrs, key)?;
    T::try_from(value).map_err(|_| {
        DatasetError::invalid_format(format!("attribute '{key}' value {value} out of range"))
    })
}

/// Reads a required flag attribute.
///
/// # Errors
///
/// Fails if the attribute is absent or not a flag.
pub fn require_bool(attrs: &Attributes, key: &str) -> DatasetResult<bool> {
    attrs
        .get(key)
        .and_then(AttrValue::as_bool)
        .ok_or_else(|| DatasetError::invalid_format(format!("missing flag attribute '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variants() {
        assert_eq!(AttrValue::from(7u8).as_u64(), Some(7));
        assert_eq!(AttrValue::from(true).as_bool(), Some(true));
        assert_eq!(AttrValue::from("x").as_text(), Some("x"));
        assert_eq!(AttrValue::from(true).as_u64(), None);
    }

    #[test]
    fn required_attributes() {
        let mut attrs = Attributes::new();
        attrs.insert("type".into(), 300u64.into());
        attrs.insert("valid".into(), true.into());

        assert_eq!(require_u64(&attrs, "type").unwrap(), 300);
        assert!(require_narrow::<u8>(&attrs, "type").is_err());
        assert_eq!(require_narrow::<u16>(&attrs, "type").unwrap(), 300);
        assert!(require_bool(&attrs, "valid").unwrap());
        assert!(require_u64(&attrs, "valid").is_err());
        assert!(require_bool(&attrs, "complete").is_err());
    }
}
