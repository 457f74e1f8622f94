//! # tern JIT
//!
//! Call linking for the tern engine: per-site [`CallLinkInfo`] records, the
//! [`CallLinker`] that publishes and retracts them, and a Cranelift compiler
//! that turns one call instruction into native code with an inline cache.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod call_link;
pub mod compiler;
pub mod config;
pub mod error;
pub mod linker;
pub mod runtime_helpers;

pub use call_link::{CallLinkInfo, CallType, LinkState};
pub use compiler::{CallSiteCompiler, CompiledCallSite};
pub use error::{JitError, JitResult};
pub use linker::CallLinker;
pub use runtime_helpers::{
    CallContext, HelperKind, NativeEntry, RuntimeHelpers, STATUS_EXCEPTION, STATUS_OK,
};
