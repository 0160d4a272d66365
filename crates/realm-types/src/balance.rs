use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque token classifying a balance.
///
/// Balance conservation is enforced per color independently: a transfer may
/// not convert value between colors. [`Color::UNCOLORED`] tags plain,
/// untyped value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Color([u8; 32]);

impl Color {
    /// The plain-value color (all zeros).
    pub const UNCOLORED: Self = Self([0u8; 32]);

    /// Create a `Color` from raw bytes.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw 32-byte token.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns `true` if this is the plain-value color.
    pub fn is_uncolored(&self) -> bool {
        *self == Self::UNCOLORED
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_uncolored() {
            write!(f, "Color(UNCOLORED)")
        } else {
            write!(f, "Color({})", hex::encode(&self.0[..4]))
        }
    }
}

/// A single colored balance: a color token and an amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoredBalance {
    color: Color,
    value: u64,
}

impl ColoredBalance {
    /// Create a new colored balance.
    pub const fn new(color: Color, value: u64) -> Self {
        Self { color, value }
    }

    /// Plain-value shorthand for [`Color::UNCOLORED`] balances.
    pub const fn uncolored(value: u64) -> Self {
        Self::new(Color::UNCOLORED, value)
    }

    /// The color token.
    pub fn color(&self) -> Color {
        self.color
    }

    /// The amount.
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl fmt::Display for ColoredBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.color.is_uncolored() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}@{}", self.value, hex::encode(&self.color.0[..4]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncolored_is_all_zeros() {
        assert!(Color::UNCOLORED.is_uncolored());
        assert_eq!(Color::UNCOLORED.as_bytes(), &[0u8; 32]);
        assert!(!Color::from_raw([1u8; 32]).is_uncolored());
    }

    #[test]
    fn uncolored_shorthand() {
        let balance = ColoredBalance::uncolored(100);
        assert_eq!(balance.color(), Color::UNCOLORED);
        assert_eq!(balance.value(), 100);
    }

    #[test]
    fn display_plain_and_colored() {
        assert_eq!(format!("{}", ColoredBalance::uncolored(42)), "42");
        let colored = ColoredBalance::new(Color::from_raw([0xAA; 32]), 7);
        assert_eq!(format!("{colored}"), "7@aaaaaaaa");
    }
}
