//! Call frame layout shared by the interpreter and native call sites.
//!
//! Slots are 8 bytes and indexed relative to the frame base. The header sits
//! at the bottom of the frame, arguments above it, locals below it:
//!
//! ```text
//!   base + 5 + i   argument i
//!   base + 4       this
//!   base + 3       argument count (including this)
//!   base + 2       callee
//!   base + 1       return location (caller bytecode offset)
//!   base + 0       caller frame
//!   base - 1 - i   local i
//! ```

/// Slot holding the caller's frame base
pub const CALLER_FRAME: i32 = 0;
/// Slot holding the bytecode offset of the call in the caller
pub const RETURN_LOCATION: i32 = 1;
/// Slot holding the callee value
pub const CALLEE: i32 = 2;
/// Slot holding the argument count including `this`
pub const ARGUMENT_COUNT: i32 = 3;
/// Slot of the `this` argument
pub const THIS_ARGUMENT: i32 = 4;

/// Number of fixed header slots below `this`
pub const CALL_FRAME_HEADER_SIZE: i32 = 4;

/// Frame bases are aligned to this many slots (16 bytes)
pub const STACK_ALIGNMENT_SLOTS: i32 = 2;

/// Size of one slot in bytes
pub const SLOT_SIZE: i32 = 8;

/// Byte offset of a slot from the frame base
#[inline]
pub const fn slot_offset(slot: i32) -> i32 {
    slot * SLOT_SIZE
}

/// Number of padding slots to allocate before `argc` argument slots so that a
/// callee frame built on top of them starts on an aligned slot.
///
/// `next_local` is the local number the first padding slot would take.
#[inline]
pub const fn call_frame_padding(next_local: u32, argc: u32) -> u32 {
    // `this` ends up at local `next_local + padding + argc - 1`, i.e. slot
    // `-(next_local + padding + argc)`; the callee base is that minus 4.
    (next_local + argc) % STACK_ALIGNMENT_SLOTS as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_aligns_callee_base() {
        for next_local in 0..8u32 {
            for argc in 1..6u32 {
                let padding = call_frame_padding(next_local, argc);
                let this_slot = -((next_local + padding + argc) as i32);
                let base = this_slot - THIS_ARGUMENT;
                assert_eq!(base.rem_euclid(STACK_ALIGNMENT_SLOTS), 0);
            }
        }
    }

    #[test]
    fn test_slot_offset() {
        assert_eq!(slot_offset(CALLEE), 16);
        assert_eq!(slot_offset(-1), -8);
    }
}
