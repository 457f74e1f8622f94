//! Scope chain nodes.
//!
//! A scope register holds one [`ScopeRef`]; its parents form the chain a
//! dynamic lookup walks. Activations back the captured locals of one call,
//! addressed by slot from the owning function and by name from everyone
//! else.

use std::cell::RefCell;
use std::rc::Rc;

use tern_bytecode::Identifier;

use crate::object::ObjectRef;
use crate::value::Value;

/// Shared handle to a scope node
pub type ScopeRef = Rc<Scope>;

/// Declarative record of captured locals
#[derive(Debug, Default)]
pub struct Activation {
    names: Vec<Identifier>,
    values: Vec<Value>,
    read_only: Vec<bool>,
}

impl Activation {
    /// Record with one `undefined` slot per name
    pub fn new(names: &[Identifier], read_only: &[bool]) -> Self {
        Self {
            names: names.to_vec(),
            values: vec![Value::Undefined; names.len()],
            read_only: read_only.to_vec(),
        }
    }

    /// Slot bound to `name`
    pub fn slot_of(&self, name: &Identifier) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Value in `slot`
    pub fn get(&self, slot: usize) -> Value {
        self.values.get(slot).cloned().unwrap_or_default()
    }

    /// Store into `slot`, growing the record if needed
    pub fn set(&mut self, slot: usize, value: Value) {
        if slot >= self.values.len() {
            self.values.resize(slot + 1, Value::Undefined);
        }
        self.values[slot] = value;
    }

    /// Whether writes to `slot` are rejected
    pub fn is_read_only(&self, slot: usize) -> bool {
        self.read_only.get(slot).copied().unwrap_or(false)
    }

    /// Bind `name` unless it is already bound (`var` introduced by eval)
    pub fn declare(&mut self, name: Identifier) {
        if self.slot_of(&name).is_none() {
            self.names.push(name);
            self.values.push(Value::Undefined);
            self.read_only.push(false);
        }
    }
}

/// What a scope node binds
#[derive(Debug)]
pub enum ScopeKind {
    /// The global object
    Global(ObjectRef),
    /// Captured locals of one call
    Activation(RefCell<Activation>),
    /// `with (object)`
    With(ObjectRef),
    /// `catch (name)`
    Catch {
        /// Bound name
        name: Identifier,
        /// Caught value
        value: RefCell<Value>,
    },
}

/// One node of a scope chain
#[derive(Debug)]
pub struct Scope {
    /// Bindings
    pub kind: ScopeKind,
    /// Enclosing scope; `None` only for the global scope
    pub parent: Option<ScopeRef>,
}

impl Scope {
    /// Global scope over `global`
    pub fn global(global: ObjectRef) -> ScopeRef {
        Rc::new(Self {
            kind: ScopeKind::Global(global),
            parent: None,
        })
    }

    /// Push an activation
    pub fn activation(activation: Activation, parent: ScopeRef) -> ScopeRef {
        Rc::new(Self {
            kind: ScopeKind::Activation(RefCell::new(activation)),
            parent: Some(parent),
        })
    }

    /// Push an object scope
    pub fn with(object: ObjectRef, parent: ScopeRef) -> ScopeRef {
        Rc::new(Self {
            kind: ScopeKind::With(object),
            parent: Some(parent),
        })
    }

    /// Push a catch scope
    pub fn catch(name: Identifier, value: Value, parent: ScopeRef) -> ScopeRef {
        Rc::new(Self {
            kind: ScopeKind::Catch {
                name,
                value: RefCell::new(value),
            },
            parent: Some(parent),
        })
    }

    /// Whether this node binds `name`
    pub fn binds(&self, name: &Identifier) -> bool {
        match &self.kind {
            ScopeKind::Global(object) | ScopeKind::With(object) => object.has_property(name),
            ScopeKind::Activation(activation) => activation.borrow().slot_of(name).is_some(),
            ScopeKind::Catch { name: bound, .. } => bound == name,
        }
    }

    /// Innermost node of the chain starting here that binds `name`, or the
    /// global scope when none does
    pub fn resolve(self: &ScopeRef, name: &Identifier) -> ScopeRef {
        let mut current = Rc::clone(self);
        loop {
            if current.binds(name) {
                return current;
            }
            match &current.parent {
                Some(parent) => current = Rc::clone(parent),
                None => return current,
            }
        }
    }

    /// Nearest activation or global scope: where `var` declarations of
    /// sloppy eval code land
    pub fn variable_scope(self: &ScopeRef) -> ScopeRef {
        let mut current = Rc::clone(self);
        loop {
            if matches!(current.kind, ScopeKind::Global(_) | ScopeKind::Activation(_)) {
                return current;
            }
            match &current.parent {
                Some(parent) => current = Rc::clone(parent),
                None => return current,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Attributes, ObjectClass};

    fn id(s: &str) -> Identifier {
        Identifier::new(s)
    }

    #[test]
    fn test_resolve_walks_to_binding() {
        let global = ObjectRef::with_class(ObjectClass::Ordinary, None);
        global.define(id("g"), Value::Number(1.0), Attributes::PERMANENT);
        let root = Scope::global(global);
        let activation = Scope::activation(Activation::new(&[id("x")], &[false]), root.clone());
        let catch = Scope::catch(id("e"), Value::Null, activation.clone());

        assert!(Rc::ptr_eq(&catch.resolve(&id("e")), &catch));
        assert!(Rc::ptr_eq(&catch.resolve(&id("x")), &activation));
        assert!(Rc::ptr_eq(&catch.resolve(&id("g")), &root));
        assert!(Rc::ptr_eq(&catch.resolve(&id("missing")), &root));
        assert!(Rc::ptr_eq(&catch.variable_scope(), &activation));
    }

    #[test]
    fn test_with_scope_follows_object() {
        let root = Scope::global(ObjectRef::with_class(ObjectClass::Ordinary, None));
        let object = ObjectRef::with_class(ObjectClass::Ordinary, None);
        let with = Scope::with(object.clone(), root);
        assert!(!with.binds(&id("p")));
        object.define(id("p"), Value::Null, Attributes::DEFAULT);
        assert!(with.binds(&id("p")));
    }

    #[test]
    fn test_activation_declare_is_idempotent() {
        let mut activation = Activation::new(&[id("a")], &[true]);
        activation.declare(id("a"));
        activation.declare(id("b"));
        assert_eq!(activation.slot_of(&id("b")), Some(1));
        assert!(activation.is_read_only(0));
        assert!(!activation.is_read_only(1));
        activation.set(1, Value::Number(2.0));
        assert_eq!(activation.get(1).as_number(), Some(2.0));
    }
}
