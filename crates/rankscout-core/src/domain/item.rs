use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const ITEM_ID_LEN: usize = 10;

/// Normalized provider item identifier (ten uppercase alphanumerics).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Parse and normalize an item id to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyItemId);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len != ITEM_ID_LEN {
            return Err(ValidationError::ItemIdLength {
                len,
                expected: ITEM_ID_LEN,
            });
        }

        for (index, ch) in normalized.chars().enumerate() {
            if !ch.is_ascii_alphanumeric() {
                return Err(ValidationError::ItemIdInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ItemId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for ItemId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ItemId> for String {
    fn from(value: ItemId) -> Self {
        value.0
    }
}

/// Provider category node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct CategoryId(u64);

impl CategoryId {
    pub fn new(value: u64) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError::InvalidCategory);
        }
        Ok(Self(value))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for CategoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for CategoryId {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CategoryId> for u64 {
    fn from(value: CategoryId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_item_id() {
        let parsed = ItemId::parse(" b00abc1234 ").expect("item id should parse");
        assert_eq!(parsed.as_str(), "B00ABC1234");
    }

    #[test]
    fn rejects_wrong_length() {
        let err = ItemId::parse("B00ABC").expect_err("must fail");
        assert!(matches!(err, ValidationError::ItemIdLength { len: 6, .. }));
    }

    #[test]
    fn rejects_invalid_chars() {
        let err = ItemId::parse("B00ABC-234").expect_err("must fail");
        assert!(matches!(err, ValidationError::ItemIdInvalidChar { ch: '-', index: 6 }));
    }

    #[test]
    fn category_zero_is_rejected() {
        assert_eq!(CategoryId::new(0), Err(ValidationError::InvalidCategory));
        assert_eq!(CategoryId::new(165_793_011).map(CategoryId::get), Ok(165_793_011));
    }
}
