//! Call-link configuration read from the environment.

use std::sync::OnceLock;

/// Relinks a call site may take before it goes permanently generic
pub const DEFAULT_CALL_THRASH_LIMIT: u32 = 4;

static CALL_THRASH_LIMIT: OnceLock<u32> = OnceLock::new();

fn parse_env_u32(var_name: &str) -> Option<u32> {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
}

/// Thrash limit from `TERN_CALL_THRASH_LIMIT`
pub fn env_call_thrash_limit() -> u32 {
    *CALL_THRASH_LIMIT.get_or_init(|| {
        parse_env_u32("TERN_CALL_THRASH_LIMIT").unwrap_or(DEFAULT_CALL_THRASH_LIMIT)
    })
}
