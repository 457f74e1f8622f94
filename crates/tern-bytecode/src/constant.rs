//! Constant pool for code units

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;
use crate::operand::ConstantIndex;

/// A constant value in the constant pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// 64-bit floating point number
    Number(f64),
    /// Interned string
    String(Identifier),
}

impl Constant {
    /// Create a number constant
    #[inline]
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a string constant, interning the text
    #[inline]
    pub fn string(s: &str) -> Self {
        Self::String(Identifier::new(s))
    }

    /// Get as number if this is a number constant
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string if this is a string constant
    #[inline]
    pub fn as_string(&self) -> Option<&Identifier> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    fn key(&self) -> ConstantKey {
        match self {
            Self::Undefined => ConstantKey::Undefined,
            Self::Null => ConstantKey::Null,
            Self::Bool(b) => ConstantKey::Bool(*b),
            Self::Number(n) => ConstantKey::Number(n.to_bits()),
            Self::String(s) => ConstantKey::String(s.clone()),
        }
    }
}

/// Constants are equal when they are the same value bit for bit, so `+0`
/// differs from `-0` and NaN payloads stay distinct.
impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Constant {}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if *n == 0.0 && n.is_sign_negative() => f.write_str("-0"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{:?}", s.as_str()),
        }
    }
}

/// Render a number the way `String(n)` does
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i128);
    }
    if n.abs() < 1e-6 || n.abs() >= 1e21 {
        let mut text = format!("{n:e}");
        if let Some(e) = text.find('e')
            && !text[e + 1..].starts_with('-')
        {
            text.insert(e + 1, '+');
        }
        return text;
    }
    format!("{n}")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(Identifier),
}

/// Constant pool with deduplication.
///
/// `add` is idempotent: inserting a value that is already present returns
/// the existing slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Constant>", into = "Vec<Constant>")]
pub struct ConstantPool {
    constants: Vec<Constant>,
    index: FxHashMap<ConstantKey, u32>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constant to the pool, returns its index
    pub fn add(&mut self, constant: Constant) -> ConstantIndex {
        let key = constant.key();
        if let Some(&idx) = self.index.get(&key) {
            return ConstantIndex::new(idx);
        }
        let idx = self.constants.len() as u32;
        self.constants.push(constant);
        self.index.insert(key, idx);
        ConstantIndex::new(idx)
    }

    /// Add a number constant
    #[inline]
    pub fn add_number(&mut self, n: f64) -> ConstantIndex {
        self.add(Constant::Number(n))
    }

    /// Add a string constant
    #[inline]
    pub fn add_string(&mut self, s: &str) -> ConstantIndex {
        self.add(Constant::string(s))
    }

    /// Get a constant by index
    #[inline]
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get(index.index() as usize)
    }

    /// Number of constants in the pool
    #[inline]
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Check if the pool is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Iterate over constants
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }
}

impl From<Vec<Constant>> for ConstantPool {
    fn from(constants: Vec<Constant>) -> Self {
        let mut pool = ConstantPool::new();
        for constant in constants {
            // Keep positions even if a serialized pool carried duplicates.
            let key = constant.key();
            let idx = pool.constants.len() as u32;
            pool.constants.push(constant);
            pool.index.entry(key).or_insert(idx);
        }
        pool
    }
}

impl From<ConstantPool> for Vec<Constant> {
    fn from(pool: ConstantPool) -> Self {
        pool.constants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
    }

    #[test]
    fn test_constant_pool_dedup() {
        let mut pool = ConstantPool::new();

        let idx1 = pool.add_string("hello");
        let idx2 = pool.add_string("world");
        let idx3 = pool.add_string("hello");

        assert_eq!(idx1.index(), 0);
        assert_eq!(idx2.index(), 1);
        assert_eq!(idx3, idx1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_signed_zero_is_distinct() {
        let mut pool = ConstantPool::new();
        let pos = pool.add_number(0.0);
        let neg = pool.add_number(-0.0);
        assert_ne!(pos, neg);
        assert_eq!(pool.add_number(-0.0), neg);
        assert_eq!(pool.get(neg).unwrap().to_string(), "-0");
    }

    #[test]
    fn test_nan_dedups_by_payload() {
        let mut pool = ConstantPool::new();
        let a = pool.add_number(f64::NAN);
        let b = pool.add_number(f64::NAN);
        let other = pool.add_number(f64::from_bits(f64::NAN.to_bits() | 1));
        assert_eq!(a, b);
        assert_ne!(a, other);
    }

    #[test]
    fn test_singletons() {
        let mut pool = ConstantPool::new();
        let u = pool.add(Constant::Undefined);
        let n = pool.add(Constant::Null);
        assert_ne!(u, n);
        assert_eq!(pool.add(Constant::Undefined), u);
        assert_ne!(pool.add(Constant::Bool(true)), pool.add(Constant::Bool(false)));
    }

    #[test]
    fn test_serde_rebuilds_index() {
        let mut pool = ConstantPool::new();
        pool.add_number(1.5);
        pool.add_string("s");
        let json = serde_json::to_string(&pool).unwrap();
        let mut back: ConstantPool = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.add_number(1.5).index(), 0);
        assert_eq!(back.len(), 2);
    }
}
