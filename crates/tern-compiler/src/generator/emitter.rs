//! Instruction stream, labels and side tables
//!
//! Branches are emitted against [`Label`]s. A branch to a label that is not
//! bound yet is recorded as pending and patched when the label is bound, so
//! every jump ends up as a plain relative offset.

use rustc_hash::FxHashMap;
use tern_bytecode::{
    Constant, ConstantIndex, ConstantPool, ExpressionInfo, ExpressionInfoTable, Identifier,
    IdentifierIndex, Instruction, JumpOffset,
};

use crate::ast::Span;

/// Branch target inside one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug, Default)]
struct LabelState {
    location: Option<u32>,
    /// Branches waiting for the label to be bound
    pending: Vec<u32>,
}

/// Everything the emitter produced for one unit
#[derive(Debug)]
pub struct EmitterOutput {
    /// Instruction stream
    pub instructions: Vec<Instruction>,
    /// Literal values
    pub constants: ConstantPool,
    /// Names used by property and scope instructions
    pub identifiers: Vec<Identifier>,
    /// Source positions
    pub positions: ExpressionInfoTable,
}

/// Append-only instruction buffer with a one-instruction rewind window
#[derive(Debug)]
pub struct InstructionEmitter {
    instructions: Vec<Instruction>,
    labels: Vec<LabelState>,
    /// The last instruction can be taken back (no label bound since)
    can_rewind: bool,
    constants: ConstantPool,
    identifiers: Vec<Identifier>,
    identifier_index: FxHashMap<Identifier, IdentifierIndex>,
    positions: ExpressionInfoTable,
    record_positions: bool,
}

impl InstructionEmitter {
    /// Create an emitter. Builtin units skip position tracking.
    pub fn new(record_positions: bool) -> Self {
        Self {
            instructions: Vec::new(),
            labels: Vec::new(),
            can_rewind: false,
            constants: ConstantPool::new(),
            identifiers: Vec::new(),
            identifier_index: FxHashMap::default(),
            positions: ExpressionInfoTable::new(),
            record_positions,
        }
    }

    /// Offset the next instruction will take
    #[inline]
    pub fn offset(&self) -> u32 {
        self.instructions.len() as u32
    }

    /// Append an instruction, returning its offset
    pub fn emit(&mut self, instruction: Instruction) -> u32 {
        let pc = self.offset();
        self.instructions.push(instruction);
        self.can_rewind = true;
        pc
    }

    /// Append a branch whose offset is resolved against `target`
    pub fn emit_branch(&mut self, instruction: Instruction, target: Label) -> u32 {
        let pc = self.emit(instruction);
        let state = &mut self.labels[target.0 as usize];
        match state.location {
            Some(location) => {
                let offset = JumpOffset::new(location as i32 - pc as i32);
                self.instructions[pc as usize].set_jump_offset(offset);
            }
            None => state.pending.push(pc),
        }
        pc
    }

    /// Create an unbound label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(LabelState::default());
        label
    }

    /// Bind `label` to the next instruction and patch branches waiting on it.
    ///
    /// # Panics
    ///
    /// Binding a label twice is a generator defect.
    pub fn bind_label(&mut self, label: Label) {
        let location = self.offset();
        let state = &mut self.labels[label.0 as usize];
        assert!(state.location.is_none(), "label bound twice");
        state.location = Some(location);
        for pc in std::mem::take(&mut state.pending) {
            let offset = JumpOffset::new(location as i32 - pc as i32);
            self.instructions[pc as usize].set_jump_offset(offset);
        }
        self.can_rewind = false;
    }

    /// Create a label bound to the next instruction
    pub fn here(&mut self) -> Label {
        let label = self.new_label();
        self.bind_label(label);
        label
    }

    /// Bound location of a label
    pub fn label_location(&self, label: Label) -> Option<u32> {
        self.labels[label.0 as usize].location
    }

    /// Last instruction, if it can still be rewound
    pub fn last_instruction(&self) -> Option<&Instruction> {
        if self.can_rewind {
            self.instructions.last()
        } else {
            None
        }
    }

    /// Take back the last instruction and the positions recorded for it
    pub fn rewind(&mut self) -> Option<Instruction> {
        if !self.can_rewind {
            return None;
        }
        let instruction = self.instructions.pop()?;
        self.positions.truncate_from(self.offset());
        self.can_rewind = false;
        Some(instruction)
    }

    /// Intern a constant
    pub fn add_constant(&mut self, constant: Constant) -> ConstantIndex {
        self.constants.add(constant)
    }

    /// Intern a name used as an instruction operand
    pub fn add_identifier(&mut self, name: &str) -> IdentifierIndex {
        let id = Identifier::new(name);
        if let Some(&index) = self.identifier_index.get(&id) {
            return index;
        }
        let index = IdentifierIndex::new(self.identifiers.len() as u32);
        self.identifiers.push(id.clone());
        self.identifier_index.insert(id, index);
        index
    }

    /// Attach `span` to the next instruction
    pub fn record_position(&mut self, span: Span) {
        if !self.record_positions {
            return;
        }
        self.positions.add(ExpressionInfo {
            instruction_offset: self.offset(),
            divot: span.start,
            start_offset: 0,
            end_offset: span.end.saturating_sub(span.start),
            line: span.line,
            column: span.column,
        });
    }

    /// Number of emitted instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether nothing was emitted yet
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Finish the stream.
    ///
    /// # Panics
    ///
    /// A branch to a label that was never bound is a generator defect.
    pub fn finish(self) -> EmitterOutput {
        if let Some(state) = self.labels.iter().find(|s| !s.pending.is_empty()) {
            panic!("unresolved label with branches at {:?}", state.pending);
        }
        EmitterOutput {
            instructions: self.instructions,
            constants: self.constants,
            identifiers: self.identifiers,
            positions: self.positions,
        }
    }
}
