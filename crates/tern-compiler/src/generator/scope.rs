//! Identifier resolution for one unit
//!
//! Names declared by a function body become locals: a frame slot, or a slot
//! of the activation record when a nested function or a dynamic scope may
//! observe them. Everything else is looked up through the scope chain at run
//! time.

use rustc_hash::FxHashMap;
use tern_bytecode::{
    Identifier, LocalKind, Register, SymbolTable, SymbolTableEntry, VariableStorage,
};

/// How one identifier occurrence is accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedScope {
    /// Statically known local
    Local(SymbolTableEntry),
    /// Scope-chain lookup by name
    Dynamic,
}

/// Declared locals of the unit being generated
#[derive(Debug)]
pub struct ScopeTracker<'a> {
    locals: FxHashMap<&'a str, SymbolTableEntry>,
    order: Vec<&'a str>,
    optimize_locals: bool,
    environment_slots: u32,
}

impl<'a> ScopeTracker<'a> {
    /// Create a tracker. Without `optimize_locals` every reference resolves
    /// dynamically, even to names the unit declares.
    pub fn new(optimize_locals: bool) -> Self {
        Self {
            locals: FxHashMap::default(),
            order: Vec::new(),
            optimize_locals,
            environment_slots: 0,
        }
    }

    fn bind(&mut self, name: &'a str, entry: SymbolTableEntry) {
        if self.locals.insert(name, entry).is_none() {
            self.order.push(name);
        }
    }

    /// Bind `name` to a frame slot. A later binding of the same name wins,
    /// as duplicate parameters do.
    pub fn bind_register(
        &mut self,
        name: &'a str,
        reg: Register,
        read_only: bool,
        kind: LocalKind,
    ) {
        self.bind(
            name,
            SymbolTableEntry {
                storage: VariableStorage::Register(reg),
                read_only,
                kind,
            },
        );
    }

    /// Bind `name` to the next activation slot
    pub fn bind_environment(&mut self, name: &'a str, read_only: bool, kind: LocalKind) -> u32 {
        if let Some(SymbolTableEntry {
            storage: VariableStorage::Environment(slot),
            ..
        }) = self.locals.get(name)
        {
            return *slot;
        }
        let slot = self.environment_slots;
        self.environment_slots += 1;
        self.bind(
            name,
            SymbolTableEntry {
                storage: VariableStorage::Environment(slot),
                read_only,
                kind,
            },
        );
        slot
    }

    /// Whether `name` is declared by the unit
    pub fn is_declared(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    /// Declared binding of `name`, regardless of dynamic scopes
    pub fn declared(&self, name: &str) -> Option<SymbolTableEntry> {
        self.locals.get(name).copied()
    }

    /// Local for `name` when it can be accessed statically: the unit
    /// optimizes locals and no `with`/`catch` scope is pushed
    pub fn local(&self, name: &str, dynamic_depth: u32) -> Option<SymbolTableEntry> {
        if !self.optimize_locals || dynamic_depth > 0 {
            return None;
        }
        self.declared(name)
    }

    /// Classify one identifier occurrence
    pub fn resolve(&self, name: &str, dynamic_depth: u32) -> ResolvedScope {
        match self.local(name, dynamic_depth) {
            Some(entry) => ResolvedScope::Local(entry),
            None => ResolvedScope::Dynamic,
        }
    }

    /// Whether the unit resolves its declarations statically
    pub fn optimizes_locals(&self) -> bool {
        self.optimize_locals
    }

    /// Slots of the activation record
    pub fn environment_size(&self) -> u32 {
        self.environment_slots
    }

    /// Symbol table in declaration order
    pub fn into_symbol_table(self) -> SymbolTable {
        let mut table = SymbolTable::new();
        for name in self.order {
            table.add(Identifier::new(name), self.locals[name]);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_parameter_last_wins() {
        let mut scope = ScopeTracker::new(true);
        scope.bind_register("a", Register::argument(1), false, LocalKind::Normal);
        scope.bind_register("a", Register::argument(2), false, LocalKind::Normal);
        let entry = scope.local("a", 0).unwrap();
        assert_eq!(entry.storage, VariableStorage::Register(Register::argument(2)));
        assert_eq!(scope.into_symbol_table().len(), 1);
    }

    #[test]
    fn test_dynamic_scope_disables_locals() {
        let mut scope = ScopeTracker::new(true);
        scope.bind_register("x", Register::local(1), false, LocalKind::Normal);
        assert!(matches!(scope.resolve("x", 0), ResolvedScope::Local(_)));
        assert_eq!(scope.resolve("x", 1), ResolvedScope::Dynamic);
        assert_eq!(scope.resolve("y", 0), ResolvedScope::Dynamic);
    }

    #[test]
    fn test_unoptimized_unit_resolves_dynamically() {
        let mut scope = ScopeTracker::new(false);
        let slot = scope.bind_environment("x", false, LocalKind::Normal);
        assert_eq!(slot, 0);
        assert_eq!(scope.resolve("x", 0), ResolvedScope::Dynamic);
        assert!(scope.declared("x").unwrap().is_captured());
    }

    #[test]
    fn test_environment_slots_are_stable() {
        let mut scope = ScopeTracker::new(true);
        assert_eq!(scope.bind_environment("a", false, LocalKind::Normal), 0);
        assert_eq!(scope.bind_environment("b", true, LocalKind::Normal), 1);
        assert_eq!(scope.bind_environment("a", false, LocalKind::Normal), 0);
        assert_eq!(scope.environment_size(), 2);

        let layout = scope.into_symbol_table().environment_layout();
        let names: Vec<&str> = layout.iter().map(|id| id.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
