//! Per-call-site link records.
//!
//! A [`CallLinkInfo`] is the patch record behind one call instruction. The
//! fast path compares the callee word against `expected_callee` and, on a
//! match, enters `target` directly. Both words are published by the
//! [`CallLinker`](crate::linker::CallLinker); readers never take a lock.
//!
//! # Publication order
//!
//! The pair is guarded by a sequence word. A writer, always holding the
//! linker lock, makes `version` odd, stores `target` and then
//! `expected_callee`, and makes `version` even again. A reader loads
//! `version`, misses if it is odd, loads `expected_callee` and `target`,
//! then loads `version` again and only trusts `target` when both version
//! loads agree. Every publish moves the version forward, so a site relinked
//! A to B and back to A between a reader's loads is still a miss. A reader
//! can see a stale pair (an extra miss) but never a comparison word next to
//! a target published with a different one.
//!
//! The word `0` means "nothing cached" in both fields; hosts must never use
//! `0` as the identity of a callable value.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use tern_bytecode::{CallLinkIndex, Instruction};

/// Link state of one call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkState {
    /// Fresh; every call takes the slow path
    Unlinked = 0,
    /// Fast path enabled for one callee
    Linked = 1,
    /// Linked to a callee other than the first one
    Relinked = 2,
    /// Polymorphic; the slow path runs forever
    PermanentlyGeneric = 3,
}

impl LinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Unlinked,
            1 => Self::Linked,
            2 => Self::Relinked,
            _ => Self::PermanentlyGeneric,
        }
    }
}

/// Which call instruction owns a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallType {
    /// `Call`
    Call = 0,
    /// `Construct`
    Construct = 1,
    /// `CallEval`; never cached
    Eval = 2,
    /// `CallVarargs`
    CallVarargs = 3,
    /// `ConstructVarargs`
    ConstructVarargs = 4,
}

impl CallType {
    /// Call type of a call-family instruction
    pub fn of(instruction: &Instruction) -> Option<(Self, CallLinkIndex)> {
        match *instruction {
            Instruction::Call { link, .. } => Some((Self::Call, link)),
            Instruction::Construct { link, .. } => Some((Self::Construct, link)),
            Instruction::CallEval { link, .. } => Some((Self::Eval, link)),
            Instruction::CallVarargs { link, .. } => Some((Self::CallVarargs, link)),
            Instruction::ConstructVarargs { link, .. } => Some((Self::ConstructVarargs, link)),
            _ => None,
        }
    }

    /// Whether sites of this type may use the inline cache
    pub fn is_cacheable(self) -> bool {
        matches!(self, Self::Call | Self::Construct)
    }

    /// Whether the callee is invoked as a constructor
    pub fn is_construct(self) -> bool {
        matches!(self, Self::Construct | Self::ConstructVarargs)
    }
}

/// Patch record for one call site
#[derive(Debug)]
#[repr(C)]
pub struct CallLinkInfo {
    expected_callee: AtomicU64,
    target: AtomicU64,
    version: AtomicU64,
    relinks: AtomicU32,
    state: AtomicU8,
    call_type: CallType,
    bytecode_offset: u32,
}

/// Byte offset of the comparison word, read by compiled call sites
pub const EXPECTED_CALLEE_OFFSET: i32 = std::mem::offset_of!(CallLinkInfo, expected_callee) as i32;

/// Byte offset of the entry word, read by compiled call sites
pub const TARGET_OFFSET: i32 = std::mem::offset_of!(CallLinkInfo, target) as i32;

/// Byte offset of the sequence word, read by compiled call sites
pub const VERSION_OFFSET: i32 = std::mem::offset_of!(CallLinkInfo, version) as i32;

impl CallLinkInfo {
    /// Create an unlinked record
    pub fn new(call_type: CallType, bytecode_offset: u32) -> Self {
        Self {
            expected_callee: AtomicU64::new(0),
            target: AtomicU64::new(0),
            version: AtomicU64::new(0),
            relinks: AtomicU32::new(0),
            state: AtomicU8::new(LinkState::Unlinked as u8),
            call_type,
            bytecode_offset,
        }
    }

    /// One record per call instruction of `instructions`, indexed by
    /// `CallLinkIndex`
    pub fn for_instructions(instructions: &[Instruction], count: u32) -> Vec<Arc<Self>> {
        let mut infos: Vec<Option<Self>> = (0..count).map(|_| None).collect();
        for (pc, instruction) in instructions.iter().enumerate() {
            if let Some((call_type, link)) = CallType::of(instruction)
                && let Some(slot) = infos.get_mut(link.index() as usize)
            {
                *slot = Some(Self::new(call_type, pc as u32));
            }
        }
        infos
            .into_iter()
            .map(|info| Arc::new(info.unwrap_or_else(|| Self::new(CallType::Call, u32::MAX))))
            .collect()
    }

    /// Shared handle for the record address compiled code passes to the
    /// runtime helpers.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Arc::as_ptr`] on a record that is still alive.
    pub unsafe fn retain_raw(ptr: *const Self) -> Arc<Self> {
        // SAFETY: upheld by the caller.
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Call type of the owning instruction
    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Bytecode offset of the owning instruction
    pub fn bytecode_offset(&self) -> u32 {
        self.bytecode_offset
    }

    /// Number of times the site switched to a different callee
    pub fn relink_count(&self) -> u32 {
        self.relinks.load(Ordering::Acquire)
    }

    /// Cached callee identity, `0` when nothing is cached
    pub fn expected_callee(&self) -> u64 {
        self.expected_callee.load(Ordering::Acquire)
    }

    /// Cached entry word, `0` when nothing is cached
    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Acquire)
    }

    /// Sequence word; odd while a writer is mid-publish
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Fast-path check: the cached entry for `callee`, if the site is linked
    /// to it
    #[inline]
    pub fn lookup(&self, callee: u64) -> Option<u64> {
        if callee == 0 {
            return None;
        }
        let before = self.version.load(Ordering::Acquire);
        if before & 1 == 1 {
            return None;
        }
        if self.expected_callee.load(Ordering::Acquire) != callee {
            return None;
        }
        let target = self.target.load(Ordering::Acquire);
        let after = self.version.load(Ordering::Acquire);
        (target != 0 && after == before).then_some(target)
    }

    /// Caller holds the linker lock: there is one writer at a time.
    pub(crate) fn publish(&self, callee: u64, target: u64) {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.target.store(target, Ordering::Release);
        self.expected_callee.store(callee, Ordering::Release);
        self.version.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.expected_callee.store(0, Ordering::Release);
        self.target.store(0, Ordering::Release);
        self.version.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn bump_relinks(&self) -> u32 {
        self.relinks.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_bytecode::Register;

    #[test]
    fn test_fresh_record_misses() {
        let info = CallLinkInfo::new(CallType::Call, 3);
        assert_eq!(info.state(), LinkState::Unlinked);
        assert_eq!(info.lookup(0x10), None);
        assert_eq!(info.lookup(0), None);
    }

    #[test]
    fn test_publish_and_clear() {
        let info = CallLinkInfo::new(CallType::Call, 0);
        info.publish(0x10, 0x1000);
        assert_eq!(info.lookup(0x10), Some(0x1000));
        assert_eq!(info.lookup(0x20), None);
        info.clear();
        assert_eq!(info.lookup(0x10), None);
    }

    #[test]
    fn test_records_follow_link_indices() {
        let call = |link| Instruction::Call {
            dst: Register::local(0),
            callee: Register::local(1),
            this_arg: Register::local(2),
            argc: 1,
            link: CallLinkIndex::new(link),
        };
        let instructions = [
            Instruction::Nop {},
            call(1),
            Instruction::CallEval {
                dst: Register::local(0),
                callee: Register::local(1),
                this_arg: Register::local(2),
                argc: 1,
                link: CallLinkIndex::new(0),
            },
        ];
        let infos = CallLinkInfo::for_instructions(&instructions, 2);
        assert_eq!(infos[0].call_type(), CallType::Eval);
        assert_eq!(infos[0].bytecode_offset(), 2);
        assert_eq!(infos[1].call_type(), CallType::Call);
        assert_eq!(infos[1].bytecode_offset(), 1);
        assert!(!infos[0].call_type().is_cacheable());
    }

    #[test]
    fn test_field_offsets() {
        assert_eq!(EXPECTED_CALLEE_OFFSET, 0);
        assert_eq!(TARGET_OFFSET, 8);
        assert_eq!(VERSION_OFFSET, 16);
    }

    #[test]
    fn test_relink_back_to_same_callee_moves_version() {
        let info = CallLinkInfo::new(CallType::Call, 0);
        info.publish(0x10, 0x1000);
        let seen = info.version();
        assert_eq!(seen % 2, 0);

        // A to B and back to A, with a new entry for A
        info.publish(0x20, 0x2000);
        info.publish(0x10, 0x1800);
        assert_eq!(info.expected_callee(), 0x10);
        assert_ne!(info.version(), seen);
        assert_eq!(info.version(), seen + 4);
        assert_eq!(info.lookup(0x10), Some(0x1800));

        info.clear();
        assert_eq!(info.version(), seen + 6);
        assert_eq!(info.lookup(0x10), None);
    }
}
