//! Symbol table: name → storage for the locals of one unit

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;
use crate::operand::Register;

/// Where a named local lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableStorage {
    /// A frame slot
    Register(Register),
    /// A slot of the unit's activation record (captured locals)
    Environment(u32),
}

/// Local flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalKind {
    /// Ordinary declaration or parameter
    Normal,
    /// Engine-managed binding such as `arguments`
    Special,
}

/// One named local
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTableEntry {
    /// Storage location
    pub storage: VariableStorage,
    /// Writes are rejected (`const`)
    pub read_only: bool,
    /// Local flavour
    pub kind: LocalKind,
}

impl SymbolTableEntry {
    /// Whether the local lives in the activation record
    pub fn is_captured(&self) -> bool {
        matches!(self.storage, VariableStorage::Environment(_))
    }
}

/// Declaration-ordered symbol table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(Identifier, SymbolTableEntry)>", into = "Vec<(Identifier, SymbolTableEntry)>")]
pub struct SymbolTable {
    entries: Vec<(Identifier, SymbolTableEntry)>,
    index: FxHashMap<Identifier, usize>,
}

impl SymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding. Returns false, leaving the table untouched, when `name`
    /// is already bound.
    pub fn add(&mut self, name: Identifier, entry: SymbolTableEntry) -> bool {
        if self.index.contains_key(&name) {
            return false;
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push((name, entry));
        true
    }

    /// Replace the binding of an existing name
    pub fn set(&mut self, name: &Identifier, entry: SymbolTableEntry) -> bool {
        match self.index.get(name) {
            Some(&i) => {
                self.entries[i].1 = entry;
                true
            }
            None => false,
        }
    }

    /// Look up a name
    pub fn get(&self, name: &Identifier) -> Option<&SymbolTableEntry> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    /// Whether `name` is bound
    pub fn contains(&self, name: &Identifier) -> bool {
        self.index.contains_key(name)
    }

    /// Bindings in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &SymbolTableEntry)> {
        self.entries.iter().map(|(name, entry)| (name, entry))
    }

    /// Names of the activation slots, indexed by slot
    pub fn environment_layout(&self) -> Vec<Identifier> {
        let mut slots: Vec<(u32, Identifier)> = self
            .entries
            .iter()
            .filter_map(|(name, entry)| match entry.storage {
                VariableStorage::Environment(slot) => Some((slot, name.clone())),
                VariableStorage::Register(_) => None,
            })
            .collect();
        slots.sort_by_key(|(slot, _)| *slot);
        slots.into_iter().map(|(_, name)| name).collect()
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<(Identifier, SymbolTableEntry)>> for SymbolTable {
    fn from(entries: Vec<(Identifier, SymbolTableEntry)>) -> Self {
        let mut table = SymbolTable::new();
        for (name, entry) in entries {
            table.add(name, entry);
        }
        table
    }
}

impl From<SymbolTable> for Vec<(Identifier, SymbolTableEntry)> {
    fn from(table: SymbolTable) -> Self {
        table.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(slot: i32) -> SymbolTableEntry {
        SymbolTableEntry {
            storage: VariableStorage::Register(Register::new(slot)),
            read_only: false,
            kind: LocalKind::Normal,
        }
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut table = SymbolTable::new();
        let x = Identifier::new("x");
        assert!(table.add(x.clone(), local(-1)));
        assert!(!table.add(x.clone(), local(-2)));
        assert_eq!(table.get(&x), Some(&local(-1)));
    }

    #[test]
    fn test_environment_layout_is_slot_ordered() {
        let mut table = SymbolTable::new();
        let captured = |slot| SymbolTableEntry {
            storage: VariableStorage::Environment(slot),
            read_only: false,
            kind: LocalKind::Normal,
        };
        table.add(Identifier::new("b"), captured(1));
        table.add(Identifier::new("plain"), local(-1));
        table.add(Identifier::new("a"), captured(0));

        let layout = table.environment_layout();
        let names: Vec<&str> = layout.iter().map(|id| id.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
