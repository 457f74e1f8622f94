//! Execution context: register file, call frames and per-runtime state.
//!
//! All frames share one register file. A frame addresses its slots relative
//! to its base: slot `s` lives at `base - s`, so locals (negative slots) sit
//! above the base and arguments below it. A callee frame is laid directly on
//! the caller's argument temporaries, with its header in the four slots
//! below `this`.

use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tern_bytecode::Register;
use tern_bytecode::frame::{ARGUMENT_COUNT, CALL_FRAME_HEADER_SIZE, THIS_ARGUMENT};

use crate::code_block::CodeBlock;
use crate::error::{VmError, VmResult};
use crate::object::ObjectRef;
use crate::realm::{NativeKind, Realm, WordSource};
use crate::scope::ScopeRef;
use crate::value::Value;

/// Entry count below which dropped code is never swept
const MIN_SWEEP_AT: usize = 256;

/// What a cached entry word stands for
#[derive(Debug, Clone)]
pub enum Entry {
    /// Bytecode; dropped code reads as a miss
    Code(Weak<CodeBlock>),
    /// Host function
    Native(NativeKind),
}

/// One activation of a code block
#[derive(Debug)]
pub struct CallFrame {
    /// Running code
    pub code: Rc<CodeBlock>,
    /// Register-file index of slot 0
    pub base: usize,
    /// Index of the executing instruction
    pub pc: usize,
    /// Scope `GetScope` produces
    pub scope: ScopeRef,
    /// With and catch scopes pushed on top of the frame's own chain
    pub scope_depth: u32,
    /// Caller register receiving the result
    pub return_to: Option<Register>,
    /// Object under construction, returned when the body returns a primitive
    pub construct: Option<ObjectRef>,
    /// Host boundary: returning from this frame ends the current run
    pub stop: bool,
}

impl CallFrame {
    /// Register-file index of `reg`
    #[inline]
    pub fn index(&self, reg: Register) -> VmResult<usize> {
        let index = self.base as i64 - i64::from(reg.index());
        usize::try_from(index).map_err(|_| VmError::internal(format!("register {reg} below stack")))
    }

    /// One past the highest register-file index this frame uses
    pub fn extent(&self) -> usize {
        self.base + self.code.unit().num_callee_registers as usize + 1
    }
}

/// Register file, frames and runtime-wide state
#[derive(Debug)]
pub struct VmContext {
    registers: Vec<Value>,
    frames: Vec<CallFrame>,
    exception: Option<Value>,
    realm: Realm,
    entries: FxHashMap<u64, Entry>,
    sweep_at: usize,
    next_word: u64,
    output: Option<String>,
}

struct Words<'a>(&'a mut u64);

impl WordSource for Words<'_> {
    fn next_word(&mut self) -> u64 {
        *self.0 += 1;
        *self.0
    }
}

impl VmContext {
    /// Fresh context; `capture_output` keeps `print` output in memory
    pub fn new(capture_output: bool) -> Self {
        let mut next_word = 0;
        let realm = Realm::new(&mut Words(&mut next_word));
        let entries = realm
            .native_entries()
            .map(|(kind, entry)| (entry, Entry::Native(kind)))
            .collect();
        Self {
            registers: Vec::with_capacity(1024),
            frames: Vec::new(),
            exception: None,
            realm,
            entries,
            sweep_at: MIN_SWEEP_AT,
            next_word,
            output: capture_output.then(String::new),
        }
    }

    /// Realm of this context
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// Unique non-zero word for an identity or entry
    pub fn next_word(&mut self) -> u64 {
        Words(&mut self.next_word).next_word()
    }

    // ==================== Entries ====================

    /// Register the entry word of `code`.
    ///
    /// Entries of dropped code blocks are swept once the table has doubled
    /// since the last sweep; their words are returned so call sites still
    /// caching them can be unlinked. Entry words are never reused.
    pub fn register_code(&mut self, code: &Rc<CodeBlock>) -> Vec<u64> {
        self.entries
            .entry(code.entry())
            .or_insert_with(|| Entry::Code(Rc::downgrade(code)));
        if self.entries.len() < self.sweep_at {
            return Vec::new();
        }
        let dead = self.sweep_dead_entries();
        self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_AT);
        dead
    }

    /// Remove the entries of dropped code blocks, returning their words
    pub fn sweep_dead_entries(&mut self) -> Vec<u64> {
        let dead: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Code(code) if code.strong_count() == 0))
            .map(|(&word, _)| word)
            .collect();
        for word in &dead {
            self.entries.remove(word);
        }
        dead
    }

    /// Number of registered entry words
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// What `entry` stands for
    pub fn entry(&self, entry: u64) -> Option<&Entry> {
        self.entries.get(&entry)
    }

    /// Forget `entry`
    pub fn remove_entry(&mut self, entry: u64) -> Option<Entry> {
        self.entries.remove(&entry)
    }

    // ==================== Frames ====================

    /// Push a frame; fails with `RangeError` past `max_depth` frames
    pub fn push_frame(&mut self, frame: CallFrame, max_depth: u32) -> VmResult<()> {
        if self.frames.len() >= max_depth as usize {
            return Err(VmError::range_error("Maximum call stack size exceeded"));
        }
        let extent = frame.extent();
        if self.registers.len() < extent {
            self.registers.resize(extent, Value::Undefined);
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the innermost frame
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    /// Drop frames above `depth`
    pub fn truncate_frames(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Innermost frame
    pub fn frame(&self) -> VmResult<&CallFrame> {
        self.frames.last().ok_or_else(|| VmError::internal("no frame"))
    }

    /// Innermost frame, mutably
    pub fn frame_mut(&mut self) -> VmResult<&mut CallFrame> {
        self.frames.last_mut().ok_or_else(|| VmError::internal("no frame"))
    }

    /// Number of live frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// First register-file index no live frame uses
    pub fn free_start(&self) -> usize {
        self.frames.last().map_or(0, CallFrame::extent)
    }

    // ==================== Registers ====================

    /// Read `reg` of the innermost frame
    #[inline]
    pub fn get(&self, reg: Register) -> VmResult<Value> {
        let index = self.frame()?.index(reg)?;
        Ok(self.read_at(index))
    }

    /// Write `reg` of the innermost frame
    #[inline]
    pub fn set(&mut self, reg: Register, value: Value) -> VmResult<()> {
        let index = self.frame()?.index(reg)?;
        self.write_at(index, value);
        Ok(())
    }

    /// Read a register-file index
    #[inline]
    pub fn read_at(&self, index: usize) -> Value {
        self.registers.get(index).cloned().unwrap_or_default()
    }

    /// Write a register-file index, growing the file if needed
    #[inline]
    pub fn write_at(&mut self, index: usize, value: Value) {
        if index >= self.registers.len() {
            self.registers.resize(index + 1, Value::Undefined);
        }
        self.registers[index] = value;
    }

    /// Argument count (including `this`) the innermost frame was called with
    pub fn argument_count(&self) -> VmResult<u32> {
        Ok(self.get(Register::new(ARGUMENT_COUNT))?.as_number().unwrap_or(1.0) as u32)
    }

    /// Arguments passed to the innermost frame, `this` excluded
    pub fn arguments(&self) -> VmResult<SmallVec<[Value; 8]>> {
        let argc = self.argument_count()?;
        (1..argc)
            .map(|i| self.get(Register::argument(i)))
            .collect()
    }

    /// Base a frame whose `this` and arguments occupy `slots` fresh
    /// register-file entries starting at `free`
    pub fn relocated_base(free: usize, slots: usize) -> usize {
        free + slots.max(1) - 1 + THIS_ARGUMENT as usize
    }

    /// Base of a frame laid on caller arguments starting at `this_index`
    pub fn in_place_base(this_index: usize) -> usize {
        this_index + CALL_FRAME_HEADER_SIZE as usize
    }

    // ==================== Exceptions and output ====================

    /// Record the exception a handler is about to receive
    pub fn set_exception(&mut self, value: Value) {
        self.exception = Some(value);
    }

    /// Take the pending exception
    pub fn take_exception(&mut self) -> Value {
        self.exception.take().unwrap_or_default()
    }

    /// Write one `print` line
    pub fn print(&mut self, line: &str) {
        match &mut self.output {
            Some(buffer) => {
                buffer.push_str(line);
                buffer.push('\n');
            }
            None => println!("{line}"),
        }
    }

    /// Captured `print` output
    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or("")
    }

    /// Take the captured output, leaving the buffer empty
    pub fn take_output(&mut self) -> String {
        self.output.as_mut().map(std::mem::take).unwrap_or_default()
    }
}
