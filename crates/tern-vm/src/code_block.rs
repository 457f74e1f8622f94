//! Linked code blocks.
//!
//! A [`CodeBlock`] is the executable form of one unlinked unit: constants
//! materialized as values, one call-link record per call site, and an entry
//! word that call sites cache. Nested functions are linked the first time a
//! closure over them is created.

use std::cell::{Cell, OnceCell};
use std::rc::Rc;
use std::sync::Arc;

use tern_bytecode::{FunctionIndex, Identifier, UnlinkedCodeBlock};
use tern_jit::CallLinkInfo;

use crate::error::{VmError, VmResult};
use crate::value::Value;

/// Executable form of an [`UnlinkedCodeBlock`]
#[derive(Debug)]
pub struct CodeBlock {
    unit: Arc<UnlinkedCodeBlock>,
    constants: Vec<Value>,
    call_links: Vec<Arc<CallLinkInfo>>,
    functions: Vec<OnceCell<Rc<CodeBlock>>>,
    environment: Vec<Identifier>,
    environment_read_only: Vec<bool>,
    entry: Cell<u64>,
}

impl CodeBlock {
    /// Link `unit`; `entry` must be non-zero and never handed out twice
    pub fn link(unit: Arc<UnlinkedCodeBlock>, entry: u64) -> Self {
        let constants = unit.constants.iter().map(Value::from_constant).collect();
        let call_links = CallLinkInfo::for_instructions(&unit.instructions, unit.num_call_sites);
        let functions = unit.functions.iter().map(|_| OnceCell::new()).collect();
        let environment = unit.symbol_table.environment_layout();
        let environment_read_only = environment
            .iter()
            .map(|name| {
                unit.symbol_table
                    .get(name)
                    .is_some_and(|entry| entry.read_only)
            })
            .collect();
        Self {
            unit,
            constants,
            call_links,
            functions,
            environment,
            environment_read_only,
            entry: Cell::new(entry),
        }
    }

    /// The unlinked unit
    pub fn unit(&self) -> &Arc<UnlinkedCodeBlock> {
        &self.unit
    }

    /// Constant `index` as a value
    pub fn constant(&self, index: tern_bytecode::ConstantIndex) -> VmResult<Value> {
        self.constants
            .get(index.index() as usize)
            .cloned()
            .ok_or_else(|| VmError::internal(format!("constant {index} out of range")))
    }

    /// Identifier operand
    pub fn identifier(&self, index: tern_bytecode::IdentifierIndex) -> VmResult<Identifier> {
        self.unit
            .identifier(index)
            .cloned()
            .ok_or_else(|| VmError::internal(format!("identifier {index} out of range")))
    }

    /// Call-link records, indexed by `CallLinkIndex`
    pub fn call_links(&self) -> &[Arc<CallLinkInfo>] {
        &self.call_links
    }

    /// Record for one call site
    pub fn call_link(&self, index: tern_bytecode::CallLinkIndex) -> VmResult<&Arc<CallLinkInfo>> {
        self.call_links
            .get(index.index() as usize)
            .ok_or_else(|| VmError::internal(format!("call link {index} out of range")))
    }

    /// Nested function `index`, linked on first use with `next_entry`
    pub fn function(
        &self,
        index: FunctionIndex,
        next_entry: impl FnOnce() -> u64,
    ) -> VmResult<Rc<CodeBlock>> {
        let cell = self
            .functions
            .get(index.index() as usize)
            .ok_or_else(|| VmError::internal(format!("function {index} out of range")))?;
        let unit = self
            .unit
            .function(index)
            .ok_or_else(|| VmError::internal(format!("function {index} out of range")))?;
        Ok(Rc::clone(cell.get_or_init(|| {
            Rc::new(CodeBlock::link(Arc::clone(unit), next_entry()))
        })))
    }

    /// Names of the activation slots
    pub fn environment(&self) -> &[Identifier] {
        &self.environment
    }

    /// Read-only flag per activation slot
    pub fn environment_read_only(&self) -> &[bool] {
        &self.environment_read_only
    }

    /// Entry word call sites cache for this code
    pub fn entry(&self) -> u64 {
        self.entry.get()
    }

    /// Retire the current entry word in favour of `entry`. Sites still
    /// caching the old word must be unlinked first.
    pub(crate) fn replace_entry(&self, entry: u64) -> u64 {
        self.entry.replace(entry)
    }

    /// Display name
    pub fn name(&self) -> &str {
        self.unit.display_name()
    }
}
