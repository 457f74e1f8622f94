//! # tern VM
//!
//! Reference interpreter for tern bytecode.
//!
//! ## Design Principles
//!
//! - **Register-based**: one register file shared by every frame; a callee
//!   frame is laid on the caller's argument registers
//! - **No host recursion**: bytecode-to-bytecode calls push a frame and the
//!   run loop continues in the callee
//! - **Linked call sites**: each call site keeps a call-link record and
//!   enters the cached callee directly on a hit
//! - **Single-threaded values**: objects are `Rc<RefCell<_>>`

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod code_block;
pub mod config;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod native;
pub mod object;
pub mod realm;
pub mod runtime;
pub mod scope;
pub mod value;

pub use code_block::CodeBlock;
pub use config::VmOptions;
pub use context::VmContext;
pub use error::{VmError, VmResult};
pub use interpreter::Interpreter;
pub use native::{NativeHost, runtime_helpers};
pub use object::ObjectRef;
pub use realm::{ErrorType, NativeKind};
pub use runtime::VmRuntime;
pub use value::Value;
