//! Break and continue targets

use super::emitter::Label;

/// What a label scope was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScopeKind {
    /// Loop body: unlabelled `break` and `continue` land here
    Loop,
    /// `switch`: unlabelled `break` lands here
    Switch,
    /// `name:` on an arbitrary statement
    Named,
}

/// One open break/continue target
#[derive(Debug, Clone, Copy)]
pub struct LabelScope<'a> {
    /// Scope flavour
    pub kind: LabelScopeKind,
    /// Label name of a [`Named`](LabelScopeKind::Named) scope
    pub name: Option<&'a str>,
    /// Where `break` jumps
    pub break_target: Label,
    /// Where `continue` jumps (loops only)
    pub continue_target: Option<Label>,
    /// Control-flow stack depth when the scope was opened; a jump here pops
    /// everything above it
    pub context_depth: usize,
}

/// Stack of open label scopes
#[derive(Debug, Default)]
pub struct LabelScopes<'a> {
    scopes: Vec<LabelScope<'a>>,
}

impl<'a> LabelScopes<'a> {
    /// Open a scope
    pub fn push(&mut self, scope: LabelScope<'a>) {
        self.scopes.push(scope);
    }

    /// Close the innermost scope
    ///
    /// # Panics
    ///
    /// Popping an empty stack is a generator defect.
    pub fn pop(&mut self) -> LabelScope<'a> {
        self.scopes.pop().expect("label scope stack underflow")
    }

    /// Number of open scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Whether no scope is open
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Hide every scope at or above `len` (while a finally body is replayed)
    pub fn split_off(&mut self, len: usize) -> Vec<LabelScope<'a>> {
        self.scopes.split_off(len)
    }

    /// Put back scopes taken by [`split_off`](Self::split_off)
    pub fn restore(&mut self, scopes: Vec<LabelScope<'a>>) {
        self.scopes.extend(scopes);
    }

    /// Target of `break` or `break name`
    pub fn break_target(&self, name: Option<&str>) -> Option<&LabelScope<'a>> {
        match name {
            None => self
                .scopes
                .iter()
                .rev()
                .find(|s| s.kind != LabelScopeKind::Named),
            Some(name) => self.scopes.iter().rev().find(|s| s.name == Some(name)),
        }
    }

    /// Target of `continue` or `continue name`.
    ///
    /// A named continue goes to the loop nested nearest the label.
    pub fn continue_target(&self, name: Option<&str>) -> Option<&LabelScope<'a>> {
        match name {
            None => self
                .scopes
                .iter()
                .rev()
                .find(|s| s.kind == LabelScopeKind::Loop),
            Some(name) => {
                let mut result = None;
                for scope in self.scopes.iter().rev() {
                    if scope.kind == LabelScopeKind::Loop {
                        result = Some(scope);
                    }
                    if scope.name == Some(name) {
                        return result;
                    }
                }
                None
            }
        }
    }
}
