//! Module `order` implement the byte orders used to sort primary keys.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use std::{cmp, convert::TryFrom, fmt, result};

use crate::{Error, Result};

/// Alphabet for filename-safe base64 keys.
pub const ALPHA_ENHANCED: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
/// Alphabet for RFC-1521 compliant base64 keys.
pub const ALPHA_STANDARD: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

lazy_static! {
    // position of each ascii byte in the alphabet, -1 if not in alphabet.
    static ref POS_ENHANCED: [i8; 128] = positions(ALPHA_ENHANCED);
    static ref POS_STANDARD: [i8; 128] = positions(ALPHA_STANDARD);
}

fn positions(alpha: &[u8; 64]) -> [i8; 128] {
    let mut table = [-1_i8; 128];
    for (i, b) in alpha.iter().enumerate() {
        table[*b as usize] = i as i8;
    }
    table
}

/// Order in which primary keys are sorted, and the predicate deciding
/// whether a key is well-formed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyOrder {
    /// Unsigned lexicographic byte order. All keys are well-formed.
    Natural,
    /// Keys are base64 strings over `A-Z a-z 0-9 - _`, sorted by
    /// the position of each byte in the alphabet.
    Base64,
    /// Keys are base64 strings over `A-Z a-z 0-9 + /`, sorted by
    /// the position of each byte in the alphabet.
    #[serde(rename = "base64-rfc1521")]
    Base64Rfc1521,
}

impl Default for KeyOrder {
    fn default() -> KeyOrder {
        KeyOrder::Natural
    }
}

impl fmt::Display for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            KeyOrder::Natural => write!(f, "natural"),
            KeyOrder::Base64 => write!(f, "base64"),
            KeyOrder::Base64Rfc1521 => write!(f, "base64-rfc1521"),
        }
    }
}

impl TryFrom<&str> for KeyOrder {
    type Error = Error;

    fn try_from(name: &str) -> Result<KeyOrder> {
        match name {
            "natural" => Ok(KeyOrder::Natural),
            "base64" => Ok(KeyOrder::Base64),
            "base64-rfc1521" => Ok(KeyOrder::Base64Rfc1521),
            name => err_at!(InvalidInput, msg: "unknown key order {:?}", name),
        }
    }
}

impl<'a> arbitrary::Arbitrary<'a> for KeyOrder {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let orders = [KeyOrder::Natural, KeyOrder::Base64, KeyOrder::Base64Rfc1521];
        Ok(*u.choose(&orders)?)
    }
}

impl KeyOrder {
    /// Return the alphabet of well-formed key bytes, None if every byte
    /// is allowed.
    pub fn to_alphabet(&self) -> Option<&'static [u8; 64]> {
        match self {
            KeyOrder::Natural => None,
            KeyOrder::Base64 => Some(ALPHA_ENHANCED),
            KeyOrder::Base64Rfc1521 => Some(ALPHA_STANDARD),
        }
    }

    fn to_positions(&self) -> Option<&'static [i8; 128]> {
        match self {
            KeyOrder::Natural => None,
            KeyOrder::Base64 => Some(&*POS_ENHANCED),
            KeyOrder::Base64Rfc1521 => Some(&*POS_STANDARD),
        }
    }

    /// Return whether `key` is acceptable for this order.
    pub fn wellformed(&self, key: &[u8]) -> bool {
        match self.to_positions() {
            None => true,
            Some(pos) => key
                .iter()
                .all(|c| (*c as usize) < pos.len() && pos[*c as usize] >= 0),
        }
    }

    /// Compare two keys. Malformed keys sort after well-formed keys, and
    /// two malformed keys compare by their natural order.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering {
        let pos = match self.to_positions() {
            None => return a.cmp(b),
            Some(pos) => pos,
        };

        match (self.wellformed(a), self.wellformed(b)) {
            (true, true) => {
                let x = a.iter().map(|c| pos[*c as usize]);
                let y = b.iter().map(|c| pos[*c as usize]);
                x.cmp(y)
            }
            (true, false) => cmp::Ordering::Less,
            (false, true) => cmp::Ordering::Greater,
            (false, false) => a.cmp(b),
        }
    }
}

#[cfg(test)]
#[path = "order_test.rs"]
mod order_test;
