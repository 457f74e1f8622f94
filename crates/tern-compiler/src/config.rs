//! Generator configuration
//!
//! Defaults come from the environment, read once per process. Every knob can
//! be overridden on [`GeneratorConfig`] so callers never depend on the
//! environment.

use std::sync::OnceLock;

/// Default native stack the generator may consume, in KiB
pub const DEFAULT_STACK_BUDGET_KB: u32 = 1024;

/// Default cap on emission nesting depth
pub const DEFAULT_MAX_EMIT_DEPTH: u32 = 10_000;

/// Default cap on bracket nesting handed to the parser
pub const DEFAULT_MAX_PARSE_DEPTH: u32 = 4096;

static STACK_BUDGET_KB: OnceLock<u32> = OnceLock::new();
static MAX_EMIT_DEPTH: OnceLock<u32> = OnceLock::new();
static MAX_PARSE_DEPTH: OnceLock<u32> = OnceLock::new();
static DEBUG_HOOKS: OnceLock<bool> = OnceLock::new();

pub(crate) fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

fn parse_env_u32(var_name: &str) -> Option<u32> {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
}

/// Stack budget from `TERN_STACK_BUDGET_KB`
pub fn env_stack_budget_kb() -> u32 {
    *STACK_BUDGET_KB.get_or_init(|| {
        parse_env_u32("TERN_STACK_BUDGET_KB")
            .filter(|&kb| kb > 0)
            .unwrap_or(DEFAULT_STACK_BUDGET_KB)
    })
}

/// Emission depth cap from `TERN_MAX_EMIT_DEPTH`
pub fn env_max_emit_depth() -> u32 {
    *MAX_EMIT_DEPTH.get_or_init(|| {
        parse_env_u32("TERN_MAX_EMIT_DEPTH")
            .filter(|&depth| depth > 0)
            .unwrap_or(DEFAULT_MAX_EMIT_DEPTH)
    })
}

/// Parser nesting cap from `TERN_MAX_PARSE_DEPTH`
pub fn env_max_parse_depth() -> u32 {
    *MAX_PARSE_DEPTH.get_or_init(|| {
        parse_env_u32("TERN_MAX_PARSE_DEPTH")
            .filter(|&depth| depth > 0)
            .unwrap_or(DEFAULT_MAX_PARSE_DEPTH)
    })
}

/// Whether `TERN_DEBUG_HOOKS` asks for debug-hook instructions
pub fn env_debug_hooks() -> bool {
    *DEBUG_HOOKS.get_or_init(|| {
        std::env::var("TERN_DEBUG_HOOKS")
            .ok()
            .is_some_and(|v| parse_env_truthy(&v))
    })
}

/// Knobs for one generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Native stack the generator may consume before the recursion guard trips
    pub stack_budget_bytes: usize,
    /// Hard cap on emission nesting depth
    pub max_depth: u32,
    /// Source nested deeper than this is never handed to the parser; the
    /// whole unit compiles to a stack-exceeded throw
    pub max_parse_depth: u32,
    /// Emit debug-hook instructions
    pub debug_hooks: bool,
    /// Engine-internal code: no source positions are recorded
    pub builtin: bool,
}

impl GeneratorConfig {
    /// Override the emission depth cap
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Override the parser nesting cap
    pub fn with_max_parse_depth(mut self, max_parse_depth: u32) -> Self {
        self.max_parse_depth = max_parse_depth;
        self
    }

    /// Override the stack budget
    pub fn with_stack_budget(mut self, bytes: usize) -> Self {
        self.stack_budget_bytes = bytes;
        self
    }

    /// Turn debug hooks on or off
    pub fn with_debug_hooks(mut self, enabled: bool) -> Self {
        self.debug_hooks = enabled;
        self
    }

    /// Mark the code as engine-internal
    pub fn with_builtin(mut self, builtin: bool) -> Self {
        self.builtin = builtin;
        self
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            stack_budget_bytes: env_stack_budget_kb() as usize * 1024,
            max_depth: env_max_emit_depth(),
            max_parse_depth: env_max_parse_depth(),
            debug_hooks: env_debug_hooks(),
            builtin: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_truthy() {
        assert!(parse_env_truthy("1"));
        assert!(parse_env_truthy("yes"));
        assert!(!parse_env_truthy("0"));
        assert!(!parse_env_truthy(" Off "));
        assert!(!parse_env_truthy(""));
    }

    #[test]
    fn test_overrides() {
        let config = GeneratorConfig::default()
            .with_max_depth(7)
            .with_max_parse_depth(9)
            .with_debug_hooks(true);
        assert_eq!(config.max_depth, 7);
        assert_eq!(config.max_parse_depth, 9);
        assert!(config.debug_hooks);
    }
}
