//! Native recursion guard
//!
//! The generator and the parser adapter walk the AST recursively. Before each
//! nested step they ask the guard whether it is still safe to recurse: the
//! distance between the guard's origin and the current stack position must
//! stay inside the budget, and the nesting depth under the cap.

use crate::config::GeneratorConfig;

/// Stack-usage check anchored at the frame that created it
#[derive(Debug, Clone, Copy)]
pub struct StackGuard {
    origin: usize,
    budget: usize,
    max_depth: u32,
}

impl StackGuard {
    /// Anchor a guard at the caller's stack position
    pub fn new(budget_bytes: usize, max_depth: u32) -> Self {
        Self {
            origin: current_stack_position(),
            budget: budget_bytes,
            max_depth,
        }
    }

    /// Anchor a guard using the limits of `config`
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(config.stack_budget_bytes, config.max_depth)
    }

    /// Whether one more level of recursion at `depth` is allowed
    #[inline]
    pub fn is_safe_to_recurse(&self, depth: u32) -> bool {
        depth < self.max_depth && self.used() < self.budget
    }

    /// Bytes of stack consumed since the guard was created
    #[inline]
    pub fn used(&self) -> usize {
        self.origin.abs_diff(current_stack_position())
    }
}

#[inline(never)]
fn current_stack_position() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descend(guard: &StackGuard, depth: u32) -> u32 {
        if !guard.is_safe_to_recurse(depth) {
            return depth;
        }
        let padding = std::hint::black_box([0u8; 256]);
        descend(guard, depth + 1) + (padding[0] as u32)
    }

    #[test]
    fn test_depth_cap_trips() {
        let guard = StackGuard::new(usize::MAX, 50);
        assert_eq!(descend(&guard, 0), 50);
    }

    #[test]
    fn test_budget_trips_before_overflow() {
        let guard = StackGuard::new(64 * 1024, u32::MAX);
        let reached = descend(&guard, 0);
        assert!(reached > 0);
        assert!(reached < 64 * 1024);
    }
}
