//! Register allocation for one code unit
//!
//! Locals and temporaries share one array of frame slots below the header.
//! Named locals and reserved slots are permanent; temporaries carry a
//! reference count and become reusable once nothing holds them. There is no
//! liveness analysis: a temporary is live exactly while its count is
//! positive.

use tern_bytecode::Register;

/// Largest frame a unit may use
pub const MAX_CALLEE_REGISTERS: u32 = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    /// Scope, activation and arguments slots
    Reserved,
    /// A named local living in the frame
    Variable,
    /// Scratch value owned through its reference count
    Temporary,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    kind: SlotKind,
    refcount: u32,
}

/// Frame slot allocator
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    slots: Vec<Slot>,
    /// Highest slot count ever needed, including callee frame headers built
    /// below the last temporary
    high_water: u32,
}

impl RegisterAllocator {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: SlotKind, refcount: u32) -> Register {
        let n = self.slots.len() as u32;
        self.slots.push(Slot { kind, refcount });
        self.high_water = self.high_water.max(n + 1);
        Register::local(n)
    }

    /// Reserve an engine-managed slot (scope, activation, arguments)
    pub fn add_reserved(&mut self) -> Register {
        debug_assert!(
            self.live_temporaries() == 0,
            "reserved slot allocated while temporaries are live"
        );
        self.push(SlotKind::Reserved, 0)
    }

    /// Allocate the frame slot of a named local
    pub fn add_variable(&mut self) -> Register {
        debug_assert!(
            self.live_temporaries() == 0,
            "variable allocated while temporaries are live"
        );
        self.push(SlotKind::Variable, 0)
    }

    /// Allocate a temporary, owned once by the caller.
    ///
    /// Trailing temporaries nobody holds are reclaimed first, so the frame
    /// only grows when every temporary above the named locals is live.
    pub fn new_temporary(&mut self) -> Register {
        self.reclaim();
        self.push(SlotKind::Temporary, 1)
    }

    /// Drop trailing temporaries nobody holds
    pub fn reclaim(&mut self) {
        while let Some(last) = self.slots.last() {
            if last.kind == SlotKind::Temporary && last.refcount == 0 {
                self.slots.pop();
            } else {
                break;
            }
        }
    }

    fn slot_mut(&mut self, reg: Register) -> Option<&mut Slot> {
        let n = reg.to_local()? as usize;
        self.slots.get_mut(n)
    }

    fn slot(&self, reg: Register) -> Option<&Slot> {
        let n = reg.to_local()? as usize;
        self.slots.get(n)
    }

    /// Take another reference to `reg`. No-op for anything but temporaries.
    pub fn retain(&mut self, reg: Register) {
        if let Some(slot) = self.slot_mut(reg) {
            if slot.kind == SlotKind::Temporary {
                slot.refcount += 1;
            }
        }
    }

    /// Drop one reference to `reg`. No-op for anything but temporaries.
    ///
    /// # Panics
    ///
    /// Releasing a temporary nobody holds is a generator defect.
    pub fn release(&mut self, reg: Register) {
        if let Some(slot) = self.slot_mut(reg) {
            if slot.kind == SlotKind::Temporary {
                assert!(slot.refcount > 0, "released dead temporary {reg}");
                slot.refcount -= 1;
            }
        }
    }

    /// Whether `reg` is a temporary slot of this frame
    pub fn is_temporary(&self, reg: Register) -> bool {
        self.slot(reg)
            .is_some_and(|slot| slot.kind == SlotKind::Temporary)
    }

    /// Outstanding references to a temporary (0 for other slots)
    pub fn refcount(&self, reg: Register) -> u32 {
        match self.slot(reg) {
            Some(slot) if slot.kind == SlotKind::Temporary => slot.refcount,
            _ => 0,
        }
    }

    /// Local number the next fresh slot would take
    pub fn next_local(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Temporaries with a positive count
    pub fn live_temporaries(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.kind == SlotKind::Temporary && s.refcount > 0)
            .count()
    }

    /// Make sure the frame covers `count` local slots (callee headers built
    /// below the last argument slot)
    pub fn note_frame_extent(&mut self, count: u32) {
        self.high_water = self.high_water.max(count);
    }

    /// Slots a call into this unit needs below its header
    pub fn num_callee_registers(&self) -> u32 {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporaries_are_reclaimed_from_the_top() {
        let mut regs = RegisterAllocator::new();
        let scope = regs.add_reserved();
        let x = regs.add_variable();
        assert_eq!(scope, Register::local(0));
        assert_eq!(x, Register::local(1));

        let a = regs.new_temporary();
        let b = regs.new_temporary();
        assert_eq!(a, Register::local(2));
        assert_eq!(b, Register::local(3));

        regs.release(b);
        let c = regs.new_temporary();
        assert_eq!(c, b);

        // `a` is dead but buried under a live temporary
        regs.release(a);
        let d = regs.new_temporary();
        assert_eq!(d, Register::local(4));
        assert_eq!(regs.num_callee_registers(), 5);
    }

    #[test]
    fn test_named_slots_ignore_refcounting() {
        let mut regs = RegisterAllocator::new();
        let x = regs.add_variable();
        regs.retain(x);
        regs.release(x);
        regs.release(x);
        assert!(!regs.is_temporary(x));
        assert_eq!(regs.refcount(x), 0);
        assert!(!regs.is_temporary(Register::argument(1)));

        let t = regs.new_temporary();
        assert_ne!(t, x);
    }

    #[test]
    fn test_retain_keeps_temporary_alive() {
        let mut regs = RegisterAllocator::new();
        let t = regs.new_temporary();
        regs.retain(t);
        assert_eq!(regs.refcount(t), 2);
        regs.release(t);
        assert_eq!(regs.live_temporaries(), 1);
        let u = regs.new_temporary();
        assert_ne!(t, u);
        regs.release(t);
        regs.release(u);
        assert_eq!(regs.live_temporaries(), 0);
    }

    #[test]
    #[should_panic(expected = "released dead temporary")]
    fn test_release_underflow_is_fatal() {
        let mut regs = RegisterAllocator::new();
        let t = regs.new_temporary();
        regs.release(t);
        regs.release(t);
    }

    #[test]
    fn test_frame_extent_covers_callee_header() {
        let mut regs = RegisterAllocator::new();
        regs.new_temporary();
        regs.note_frame_extent(9);
        assert_eq!(regs.num_callee_registers(), 9);
        regs.note_frame_extent(3);
        assert_eq!(regs.num_callee_registers(), 9);
    }
}
