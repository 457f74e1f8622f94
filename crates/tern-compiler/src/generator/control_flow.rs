//! Control-flow context stack
//!
//! Every construct that a `break`, `continue` or `return` may have to unwind
//! through pushes an entry here: dynamic scopes (`with`, `catch`) need a
//! scope pop, `finally` blocks need their body replayed, `for-in` loops keep
//! their enumeration registers for the fast property read path.
//!
//! Open `try` regions live in a separate stack. A finally replay closes the
//! regions opened inside it before the replayed body and reopens them after,
//! so one source-level `try` may produce several handler ranges.

use tern_bytecode::Register;

use super::emitter::Label;
use crate::ast::Stmt;

/// Replay information of a `finally` block
#[derive(Debug, Clone, Copy)]
pub struct FinallyContext<'a> {
    /// Statements replayed on every exit crossing the block
    pub body: &'a [Stmt<'a>],
    /// Label scopes open outside the `try`
    pub label_scope_depth: usize,
    /// Open try regions outside the `try`
    pub try_depth: usize,
    /// Dynamic scope depth outside the `try`
    pub dynamic_scope_depth: u32,
}

/// Enumeration registers of one `for-in` loop body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForInKind {
    /// Indexed phase: the key is `String(index)`
    Indexed {
        /// Running index
        index: Register,
    },
    /// Named phase: the key came from a property enumerator
    Structured {
        /// Position in the enumerator
        index: Register,
        /// Snapshot of the remaining keys
        enumerator: Register,
    },
}

/// A `for-in` loop whose variable is a frame local
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForInContext {
    /// Loop variable
    pub local: Register,
    /// Phase registers
    pub kind: ForInKind,
    /// Cleared when the body writes the loop variable
    pub valid: bool,
}

/// One control-flow entry
#[derive(Debug, Clone, Copy)]
pub enum ControlFlowEntry<'a> {
    /// A pushed `with` or `catch` scope
    Lexical,
    /// A `try` with a `finally` block
    Finally(FinallyContext<'a>),
    /// A `switch` body
    Switch,
    /// A `for-in` body
    ForIn(ForInContext),
}

/// Catch entry of one source-level `try`
#[derive(Debug, Clone, Copy)]
pub struct TryData {
    /// Handler entry
    pub target: Label,
    /// Dynamic scope depth the handler runs at
    pub scope_depth: u32,
}

/// An open protected region
#[derive(Debug, Clone, Copy)]
pub struct TryContext {
    /// Region start
    pub start: Label,
    /// Index into the try data
    pub data: usize,
}

/// A closed protected region
#[derive(Debug, Clone, Copy)]
pub struct TryRange {
    /// First protected instruction
    pub start: Label,
    /// One past the last protected instruction
    pub end: Label,
    /// Index into the try data
    pub data: usize,
}

/// The stack itself
#[derive(Debug, Default)]
pub struct ControlFlowStack<'a> {
    entries: Vec<ControlFlowEntry<'a>>,
    tries: Vec<TryContext>,
    try_data: Vec<TryData>,
    try_ranges: Vec<TryRange>,
    dynamic_depth: u32,
}

impl<'a> ControlFlowStack<'a> {
    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is open
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index` (0 is the outermost)
    pub fn entry(&self, index: usize) -> ControlFlowEntry<'a> {
        self.entries[index]
    }

    /// Number of dynamic scopes pushed by this unit
    pub fn dynamic_depth(&self) -> u32 {
        self.dynamic_depth
    }

    /// Override the dynamic depth, returning the previous value
    pub fn set_dynamic_depth(&mut self, depth: u32) -> u32 {
        std::mem::replace(&mut self.dynamic_depth, depth)
    }

    /// Whether an exit to `depth` must pop scopes or replay finally blocks
    pub fn needs_unwind(&self, depth: usize) -> bool {
        self.entries[depth.min(self.entries.len())..]
            .iter()
            .any(|e| matches!(e, ControlFlowEntry::Lexical | ControlFlowEntry::Finally(_)))
    }

    fn pop_expecting(
        &mut self,
        what: &str,
        matches: impl Fn(&ControlFlowEntry<'a>) -> bool,
    ) -> ControlFlowEntry<'a> {
        match self.entries.pop() {
            Some(entry) if matches(&entry) => entry,
            other => panic!("control-flow stack out of order: expected {what}, found {other:?}"),
        }
    }

    /// Enter a `with` or `catch` scope
    pub fn push_lexical(&mut self) {
        self.entries.push(ControlFlowEntry::Lexical);
        self.dynamic_depth += 1;
    }

    /// Leave a `with` or `catch` scope
    pub fn pop_lexical(&mut self) {
        self.pop_expecting("lexical scope", |e| matches!(e, ControlFlowEntry::Lexical));
        self.dynamic_depth -= 1;
    }

    /// Enter the protected part of a `try` with a `finally` block
    pub fn push_finally(&mut self, body: &'a [Stmt<'a>], label_scope_depth: usize) {
        self.entries.push(ControlFlowEntry::Finally(FinallyContext {
            body,
            label_scope_depth,
            try_depth: self.tries.len(),
            dynamic_scope_depth: self.dynamic_depth,
        }));
    }

    /// Leave the protected part of a `try` with a `finally` block
    pub fn pop_finally(&mut self) {
        self.pop_expecting("finally", |e| matches!(e, ControlFlowEntry::Finally(_)));
    }

    /// Enter a `switch` body
    pub fn push_switch(&mut self) {
        self.entries.push(ControlFlowEntry::Switch);
    }

    /// Leave a `switch` body
    pub fn pop_switch(&mut self) {
        self.pop_expecting("switch", |e| matches!(e, ControlFlowEntry::Switch));
    }

    /// Enter a `for-in` body
    pub fn push_for_in(&mut self, context: ForInContext) {
        self.entries.push(ControlFlowEntry::ForIn(context));
    }

    /// Leave a `for-in` body
    pub fn pop_for_in(&mut self) {
        self.pop_expecting("for-in", |e| matches!(e, ControlFlowEntry::ForIn(_)));
    }

    /// Valid `for-in` context, innermost first, whose loop variable is `local`
    pub fn for_in_for(&self, local: Register) -> Option<ForInContext> {
        self.entries.iter().rev().find_map(|e| match e {
            ControlFlowEntry::ForIn(cx) if cx.valid && cx.local == local => Some(*cx),
            _ => None,
        })
    }

    /// The body wrote `local`; its `for-in` loops lose the fast path
    pub fn invalidate_for_in(&mut self, local: Register) {
        for entry in &mut self.entries {
            if let ControlFlowEntry::ForIn(cx) = entry
                && cx.local == local
            {
                cx.valid = false;
            }
        }
    }

    /// Hide the entries at or above `index` (while a finally body is replayed)
    pub fn split_off(&mut self, index: usize) -> Vec<ControlFlowEntry<'a>> {
        self.entries.split_off(index)
    }

    /// Put back entries taken by [`split_off`](Self::split_off)
    pub fn restore(&mut self, entries: Vec<ControlFlowEntry<'a>>) {
        self.entries.extend(entries);
    }

    /// Open a protected region starting at `start`; `target` is its handler
    pub fn push_try(&mut self, start: Label, target: Label) -> usize {
        let data = self.try_data.len();
        self.try_data.push(TryData {
            target,
            scope_depth: 0,
        });
        self.tries.push(TryContext { start, data });
        data
    }

    /// Close the innermost region at `end` and return its handler.
    ///
    /// The handler runs at the current dynamic depth.
    pub fn pop_try(&mut self, end: Label) -> TryData {
        let context = self.tries.pop().expect("try stack underflow");
        self.try_ranges.push(TryRange {
            start: context.start,
            end,
            data: context.data,
        });
        let data = &mut self.try_data[context.data];
        data.scope_depth = self.dynamic_depth;
        *data
    }

    /// Number of open regions
    pub fn try_depth(&self) -> usize {
        self.tries.len()
    }

    /// Close every region above `depth` at `end`, innermost first, and take
    /// them off the stack
    pub fn close_tries_above(&mut self, depth: usize, end: Label) -> Vec<TryContext> {
        let closed = self.tries.split_off(depth);
        for context in closed.iter().rev() {
            self.try_ranges.push(TryRange {
                start: context.start,
                end,
                data: context.data,
            });
        }
        closed
    }

    /// Reopen regions closed by [`close_tries_above`](Self::close_tries_above) at `start`
    pub fn reopen_tries(&mut self, closed: Vec<TryContext>, start: Label) {
        self.tries
            .extend(closed.into_iter().map(|c| TryContext { start, data: c.data }));
    }

    /// Closed regions with their handler data, in closing order
    pub fn ranges(&self) -> impl Iterator<Item = (TryRange, TryData)> + '_ {
        self.try_ranges
            .iter()
            .map(|range| (*range, self.try_data[range.data]))
    }

    /// Whether every entry and region was closed
    pub fn is_balanced(&self) -> bool {
        self.entries.is_empty() && self.tries.is_empty() && self.dynamic_depth == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::emitter::InstructionEmitter;

    #[test]
    fn test_lexical_tracks_dynamic_depth() {
        let mut stack = ControlFlowStack::default();
        stack.push_lexical();
        stack.push_switch();
        stack.push_lexical();
        assert_eq!(stack.dynamic_depth(), 2);
        assert!(stack.needs_unwind(1));
        stack.pop_lexical();
        assert!(!stack.needs_unwind(1));
        stack.pop_switch();
        stack.pop_lexical();
        assert!(stack.is_balanced());
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn test_out_of_order_pop_is_fatal() {
        let mut stack = ControlFlowStack::default();
        stack.push_switch();
        stack.pop_lexical();
    }

    #[test]
    fn test_finally_records_outer_state() {
        let mut e = InstructionEmitter::new(false);
        let mut stack = ControlFlowStack::default();
        stack.push_lexical();
        let start = e.new_label();
        let target = e.new_label();
        stack.push_try(start, target);
        stack.push_finally(&[], 3);
        match stack.entry(1) {
            ControlFlowEntry::Finally(cx) => {
                assert_eq!(cx.try_depth, 1);
                assert_eq!(cx.dynamic_scope_depth, 1);
                assert_eq!(cx.label_scope_depth, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_replay_splits_open_regions() {
        let mut e = InstructionEmitter::new(false);
        let mut stack = ControlFlowStack::default();
        let outer_start = e.new_label();
        let outer_target = e.new_label();
        stack.push_try(outer_start, outer_target);
        let inner_start = e.new_label();
        let inner_target = e.new_label();
        stack.push_try(inner_start, inner_target);

        let before = e.new_label();
        let closed = stack.close_tries_above(0, before);
        assert_eq!(closed.len(), 2);
        assert_eq!(stack.try_depth(), 0);
        let after = e.new_label();
        stack.reopen_tries(closed, after);
        assert_eq!(stack.try_depth(), 2);

        let end = e.new_label();
        let data = stack.pop_try(end);
        assert_eq!(data.target, inner_target);

        let ranges: Vec<_> = stack.ranges().collect();
        assert_eq!(ranges.len(), 3);
        // innermost fragment closes first
        assert_eq!(ranges[0].1.target, inner_target);
        assert_eq!(ranges[0].0.start, inner_start);
        assert_eq!(ranges[1].1.target, outer_target);
        assert_eq!(ranges[2].0.start, after);
    }

    #[test]
    fn test_for_in_invalidation_is_per_local() {
        let mut stack = ControlFlowStack::default();
        let cx = |local| ForInContext {
            local,
            kind: ForInKind::Indexed {
                index: Register::local(10),
            },
            valid: true,
        };
        stack.push_for_in(cx(Register::local(1)));
        stack.push_for_in(cx(Register::local(2)));
        stack.invalidate_for_in(Register::local(2));
        assert!(stack.for_in_for(Register::local(2)).is_none());
        assert!(stack.for_in_for(Register::local(1)).is_some());
        assert!(stack.for_in_for(Register::local(3)).is_none());
    }
}
