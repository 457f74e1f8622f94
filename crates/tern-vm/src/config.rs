//! Interpreter configuration.
//!
//! Defaults come from the environment, read once per process; [`VmOptions`]
//! overrides them per instance.

use std::sync::OnceLock;

use tern_compiler::GeneratorConfig;

/// Default cap on live call frames
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 10_000;

static MAX_CALL_DEPTH: OnceLock<u32> = OnceLock::new();
static CALL_LINKING_DISABLED: OnceLock<bool> = OnceLock::new();

fn parse_env_truthy(value: &str) -> bool {
    let value = value.trim();
    !matches!(value, "" | "0")
        && !value.eq_ignore_ascii_case("false")
        && !value.eq_ignore_ascii_case("off")
        && !value.eq_ignore_ascii_case("no")
}

fn parse_env_u32(var_name: &str) -> Option<u32> {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
}

/// Call depth cap from `TERN_MAX_CALL_DEPTH`
pub fn env_max_call_depth() -> u32 {
    *MAX_CALL_DEPTH.get_or_init(|| {
        parse_env_u32("TERN_MAX_CALL_DEPTH")
            .filter(|&depth| depth > 0)
            .unwrap_or(DEFAULT_MAX_CALL_DEPTH)
    })
}

/// Whether `TERN_DISABLE_CALL_LINKING` sends every call down the generic path
pub fn env_call_linking_disabled() -> bool {
    *CALL_LINKING_DISABLED.get_or_init(|| {
        std::env::var("TERN_DISABLE_CALL_LINKING")
            .ok()
            .is_some_and(|v| parse_env_truthy(&v))
    })
}

/// Per-instance interpreter options
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    /// Frames allowed on the call stack before `RangeError` is thrown
    pub max_call_depth: u32,
    /// Cache callee entries at call sites
    pub call_linking: bool,
    /// Relinks per site before it goes permanently generic
    pub thrash_limit: u32,
    /// Keep `print` output in memory instead of writing to stdout
    pub capture_output: bool,
    /// Bytecode generator settings for programs and eval code
    pub generator: GeneratorConfig,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: env_max_call_depth(),
            call_linking: !env_call_linking_disabled(),
            thrash_limit: tern_jit::config::env_call_thrash_limit(),
            capture_output: false,
            generator: GeneratorConfig::default(),
        }
    }
}

impl VmOptions {
    /// Override the call depth cap
    pub fn with_max_call_depth(mut self, depth: u32) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Turn call-site caching on or off
    pub fn with_call_linking(mut self, enabled: bool) -> Self {
        self.call_linking = enabled;
        self
    }

    /// Override the thrash limit
    pub fn with_thrash_limit(mut self, limit: u32) -> Self {
        self.thrash_limit = limit;
        self
    }

    /// Capture `print` output
    pub fn with_captured_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Override the generator settings
    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = generator;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_truthy() {
        assert!(parse_env_truthy("1"));
        assert!(parse_env_truthy("on"));
        assert!(!parse_env_truthy("no"));
        assert!(!parse_env_truthy(" 0 "));
    }

    #[test]
    fn test_builders() {
        let options = VmOptions::default()
            .with_max_call_depth(50)
            .with_call_linking(false)
            .with_thrash_limit(1)
            .with_captured_output(true);
        assert_eq!(options.max_call_depth, 50);
        assert!(!options.call_linking);
        assert_eq!(options.thrash_limit, 1);
        assert!(options.capture_output);
    }
}
