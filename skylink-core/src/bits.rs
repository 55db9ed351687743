//! Bit strings: the unit every payload, key and ciphertext is expressed in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered sequence of bits. Parsed from and rendered as a `'0'`/`'1'` string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BitString(Vec<bool>);

impl BitString {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    /// Render `value` as unsigned binary, left-padded with zeros to `width`.
    /// Caller guarantees `value < 2^width`.
    pub(crate) fn from_unsigned(value: u64, width: u32) -> Self {
        let bits = (0..width).rev().map(|i| (value >> i) & 1 == 1).collect();
        Self(bits)
    }

    /// Interpret the bits as an unsigned big-endian integer. `None` above 64 bits.
    pub fn to_unsigned(&self) -> Option<u64> {
        if self.0.len() > 64 {
            return None;
        }
        Some(self.0.iter().fold(0u64, |acc, &b| (acc << 1) | u64::from(b)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.0.get(index).copied()
    }

    pub fn last(&self) -> Option<bool> {
        self.0.last().copied()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub fn push(&mut self, bit: bool) {
        self.0.push(bit);
    }

    pub fn extend_from(&mut self, other: &BitString) {
        self.0.extend_from_slice(&other.0);
    }

    /// Copy of the bits in `start..end`. Panics if the range is out of bounds.
    pub fn slice(&self, start: usize, end: usize) -> BitString {
        BitString(self.0[start..end].to_vec())
    }
}

impl FromStr for BitString {
    type Err = ParseBitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .enumerate()
            .map(|(position, c)| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                found => Err(ParseBitsError { position, found }),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(BitString)
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &bit in &self.0 {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl Serialize for BitString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BitString {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A character other than `'0'` or `'1'` in a bit string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bit {found:?} at position {position}")]
pub struct ParseBitsError {
    pub position: usize,
    pub found: char,
}
