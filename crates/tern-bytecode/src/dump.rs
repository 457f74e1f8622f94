//! Human-readable disassembly

use std::fmt;

use crate::instruction::Instruction;
use crate::unit::UnlinkedCodeBlock;

impl fmt::Display for UnlinkedCodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({:?}{}) params={} registers={} call_sites={}",
            self.display_name(),
            self.kind,
            if self.flags.strict { ", strict" } else { "" },
            self.num_parameters,
            self.num_callee_registers,
            self.num_call_sites,
        )?;

        for (pc, instruction) in self.instructions.iter().enumerate() {
            write!(f, "  [{pc:4}] {instruction}")?;
            if let Some(offset) = instruction.jump_offset() {
                write!(f, "  ; -> {}", offset.target_from(pc))?;
            }
            match instruction {
                Instruction::LoadConst { constant, .. } => {
                    if let Some(value) = self.constants.get(*constant) {
                        write!(f, "  ; {value}")?;
                    }
                }
                Instruction::GetById { name, .. }
                | Instruction::PutById { name, .. }
                | Instruction::DefineById { name, .. }
                | Instruction::PutGetterSetter { name, .. }
                | Instruction::DeleteById { name, .. }
                | Instruction::ResolveScope { name, .. }
                | Instruction::GetFromScope { name, .. }
                | Instruction::PutToScope { name, .. }
                | Instruction::PushCatchScope { name, .. } => {
                    if let Some(id) = self.identifier(*name) {
                        write!(f, "  ; {id}")?;
                    }
                }
                _ => {}
            }
            writeln!(f)?;
        }

        if !self.exception_handlers.is_empty() {
            writeln!(f, "  handlers:")?;
            for h in self.exception_handlers.iter() {
                writeln!(
                    f,
                    "    [{}, {}) -> {} depth={}",
                    h.start, h.end, h.target, h.scope_depth
                )?;
            }
        }

        for (index, function) in self.functions.iter().enumerate() {
            let nested = function.to_string();
            writeln!(f, "  function f{index}:")?;
            for line in nested.lines() {
                writeln!(f, "    {line}")?;
            }
        }
        Ok(())
    }
}

/// Disassemble a unit and its nested functions
pub fn disassemble(unit: &UnlinkedCodeBlock) -> String {
    unit.to_string()
}
