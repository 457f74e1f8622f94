//! Source-position side table
//!
//! Maps instruction offsets back to the expression that produced them. Each
//! entry is a divot (the point an error message should blame) with the extent
//! of the surrounding expression, plus a line/column for stack traces.

use serde::{Deserialize, Serialize};

/// Position record attached to the instruction at `instruction_offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionInfo {
    /// Instruction index
    pub instruction_offset: u32,
    /// Source byte offset of the divot
    pub divot: u32,
    /// Distance from the expression start to the divot
    pub start_offset: u32,
    /// Distance from the divot to the expression end
    pub end_offset: u32,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

/// Entries sorted by instruction offset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionInfoTable {
    entries: Vec<ExpressionInfo>,
}

impl ExpressionInfoTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `info`; a later record for the same instruction replaces the earlier one
    pub fn add(&mut self, info: ExpressionInfo) {
        if let Some(last) = self.entries.last_mut() {
            debug_assert!(last.instruction_offset <= info.instruction_offset);
            if last.instruction_offset == info.instruction_offset {
                *last = info;
                return;
            }
        }
        self.entries.push(info);
    }

    /// Drop every entry at or after `instruction_offset`
    pub fn truncate_from(&mut self, instruction_offset: u32) {
        let keep = self
            .entries
            .partition_point(|e| e.instruction_offset < instruction_offset);
        self.entries.truncate(keep);
    }

    /// Find the record in force at `instruction_offset`
    pub fn find(&self, instruction_offset: u32) -> Option<&ExpressionInfo> {
        let idx = self
            .entries
            .binary_search_by_key(&instruction_offset, |e| e.instruction_offset);

        match idx {
            Ok(i) => Some(&self.entries[i]),
            Err(i) if i > 0 => Some(&self.entries[i - 1]),
            _ => None,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no position was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
