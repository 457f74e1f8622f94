//! Exception handler table
//!
//! Try regions are recorded out of line as `[start, end)` instruction ranges.
//! Regions are appended when the generator closes them, so an inner region
//! always precedes the regions enclosing it and the first match is the
//! innermost handler.

use serde::{Deserialize, Serialize};

/// One protected range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    /// First protected instruction
    pub start: u32,
    /// One past the last protected instruction
    pub end: u32,
    /// Handler entry (a `Catch` instruction)
    pub target: u32,
    /// Dynamic scope depth to restore before entering the handler
    pub scope_depth: u32,
}

impl HandlerInfo {
    /// Whether the instruction at `offset` is protected by this range
    #[inline]
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Ordered handler ranges of one unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerTable {
    handlers: Vec<HandlerInfo>,
}

impl HandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a closed range
    pub fn push(&mut self, handler: HandlerInfo) {
        debug_assert!(handler.start <= handler.end, "inverted try range");
        self.handlers.push(handler);
    }

    /// Innermost handler protecting `offset`
    pub fn lookup(&self, offset: u32) -> Option<&HandlerInfo> {
        self.handlers.iter().find(|h| h.covers(offset))
    }

    /// Number of ranges
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no range is recorded
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Iterate over ranges in recording order
    pub fn iter(&self) -> impl Iterator<Item = &HandlerInfo> {
        self.handlers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_prefers_inner_range() {
        let mut table = HandlerTable::new();
        table.push(HandlerInfo {
            start: 4,
            end: 6,
            target: 8,
            scope_depth: 1,
        });
        table.push(HandlerInfo {
            start: 0,
            end: 10,
            target: 12,
            scope_depth: 0,
        });

        assert_eq!(table.lookup(5).map(|h| h.target), Some(8));
        assert_eq!(table.lookup(2).map(|h| h.target), Some(12));
        assert_eq!(table.lookup(6).map(|h| h.target), Some(12));
        assert!(table.lookup(10).is_none());
    }
}
