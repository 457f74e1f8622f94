//! Interned identifiers
//!
//! Every identifier that reaches a code unit goes through the process-wide
//! [`Interner`], so two identifiers are equal exactly when they share storage.
//! The table is shared by compilations running on different threads.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Interned identifier handle, compared by identity
#[derive(Clone)]
pub struct Identifier(Arc<str>);

impl Identifier {
    /// Intern `name` in the process-wide table
    pub fn new(name: &str) -> Self {
        Interner::global().intern(name)
    }

    /// The identifier text
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl PartialEq for Identifier {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl Deref for Identifier {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Identifier::new(&text))
    }
}

/// Concurrent interning table.
///
/// Insertion is idempotent: racing `intern` calls for the same text all get
/// the handle stored by whichever call reached the shard first.
#[derive(Default)]
pub struct Interner {
    table: DashMap<Arc<str>, ()>,
}

impl Interner {
    /// Create an empty, private table
    pub fn new() -> Self {
        Self::default()
    }

    /// The table shared by the whole process
    pub fn global() -> &'static Interner {
        static GLOBAL: OnceLock<Interner> = OnceLock::new();
        GLOBAL.get_or_init(Interner::new)
    }

    /// Intern `name`, returning the canonical handle
    pub fn intern(&self, name: &str) -> Identifier {
        if let Some(entry) = self.table.get(name) {
            return Identifier(entry.key().clone());
        }
        let entry = self.table.entry(Arc::from(name)).or_insert(());
        Identifier(entry.key().clone())
    }

    /// Whether `name` has been interned
    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Number of distinct identifiers
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for Interner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interner").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let interner = Interner::new();
        let a = interner.intern("value");
        let b = interner.intern("value");
        assert_eq!(a, b);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_distinct_text_distinct_identity() {
        let a = Identifier::new("left");
        let b = Identifier::new("right");
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "left");
    }

    #[test]
    fn test_serde_reinterns() {
        let id = Identifier::new("roundtrip");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"roundtrip\"");
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
