//! Bytecode operands

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{self, CALL_FRAME_HEADER_SIZE};

/// Signed frame slot.
///
/// `0..CALL_FRAME_HEADER_SIZE` are the frame header, larger indices are the
/// arguments (`this` first), negative indices are locals and temporaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub i32);

impl Register {
    /// Create a register from a raw slot index
    #[inline]
    pub const fn new(index: i32) -> Self {
        Self(index)
    }

    /// Get the raw slot index
    #[inline]
    pub const fn index(self) -> i32 {
        self.0
    }

    /// Register for local `n` (0 is the first local, at slot -1)
    #[inline]
    pub const fn local(n: u32) -> Self {
        Self(-1 - n as i32)
    }

    /// Register for argument `n`, where argument 0 is `this`
    #[inline]
    pub const fn argument(n: u32) -> Self {
        Self(frame::THIS_ARGUMENT + n as i32)
    }

    /// The `this` argument slot
    #[inline]
    pub const fn this() -> Self {
        Self::argument(0)
    }

    /// Header slot holding the callee
    #[inline]
    pub const fn callee() -> Self {
        Self(frame::CALLEE)
    }

    /// Whether this is a local or temporary slot
    #[inline]
    pub const fn is_local(self) -> bool {
        self.0 < 0
    }

    /// Whether this slot is part of the fixed frame header
    #[inline]
    pub const fn is_header(self) -> bool {
        self.0 >= 0 && self.0 < CALL_FRAME_HEADER_SIZE
    }

    /// Whether this is an argument slot (including `this`)
    #[inline]
    pub const fn is_argument(self) -> bool {
        self.0 >= frame::THIS_ARGUMENT
    }

    /// Local number, if this is a local slot
    #[inline]
    pub const fn to_local(self) -> Option<u32> {
        if self.0 < 0 {
            Some((-1 - self.0) as u32)
        } else {
            None
        }
    }

    /// Argument number (`this` is 0), if this is an argument slot
    #[inline]
    pub const fn to_argument(self) -> Option<u32> {
        if self.0 >= frame::THIS_ARGUMENT {
            Some((self.0 - frame::THIS_ARGUMENT) as u32)
        } else {
            None
        }
    }

    /// Offset this register by `delta` slots
    #[inline]
    pub const fn offset(self, delta: i32) -> Self {
        Self(self.0 + delta)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            frame::CALLER_FRAME => write!(f, "callerFrame"),
            frame::RETURN_LOCATION => write!(f, "returnLocation"),
            frame::CALLEE => write!(f, "callee"),
            frame::ARGUMENT_COUNT => write!(f, "argc"),
            frame::THIS_ARGUMENT => write!(f, "this"),
            n if n > frame::THIS_ARGUMENT => write!(f, "arg{}", n - frame::THIS_ARGUMENT),
            n => write!(f, "loc{}", -1 - n),
        }
    }
}

macro_rules! index_operand {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Create a new index
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Get index value
            #[inline]
            pub const fn index(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

index_operand!(
    /// Index into the constant pool
    ConstantIndex,
    "k"
);
index_operand!(
    /// Index into the unit's identifier table
    IdentifierIndex,
    "id"
);
index_operand!(
    /// Index into the unit's nested function table
    FunctionIndex,
    "f"
);
index_operand!(
    /// Index into the unit's switch jump tables
    JumpTableIndex,
    "jt"
);
index_operand!(
    /// Per-unit ordinal of a call site, used to find its call-link record
    CallLinkIndex,
    "cl"
);

/// Jump offset relative to the jumping instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpOffset(pub i32);

impl JumpOffset {
    /// Create a new jump offset
    #[inline]
    pub const fn new(offset: i32) -> Self {
        Self(offset)
    }

    /// Get offset value
    #[inline]
    pub const fn offset(self) -> i32 {
        self.0
    }

    /// Absolute target when applied at `pc`
    #[inline]
    pub const fn target_from(self, pc: usize) -> i64 {
        pc as i64 + self.0 as i64
    }
}

impl fmt::Display for JumpOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_and_argument_slots() {
        assert_eq!(Register::local(0).index(), -1);
        assert_eq!(Register::local(3).to_local(), Some(3));
        assert_eq!(Register::this().to_argument(), Some(0));
        assert_eq!(Register::argument(2).index(), 6);
        assert!(Register::callee().is_header());
        assert!(!Register::this().is_header());
        assert_eq!(Register::local(0).to_argument(), None);
    }

    #[test]
    fn test_register_display() {
        assert_eq!(Register::local(2).to_string(), "loc2");
        assert_eq!(Register::argument(1).to_string(), "arg1");
        assert_eq!(Register::this().to_string(), "this");
        assert_eq!(Register::callee().to_string(), "callee");
    }

    #[test]
    fn test_jump_offset_target() {
        assert_eq!(JumpOffset::new(-3).target_from(10), 7);
        assert_eq!(JumpOffset::new(4).to_string(), "+4");
    }
}
