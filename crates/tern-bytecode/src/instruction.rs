//! Bytecode instructions (opcodes)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operand::{
    CallLinkIndex, ConstantIndex, FunctionIndex, IdentifierIndex, JumpOffset, JumpTableIndex,
    Register,
};

/// How a scope operation treats a name that no scope binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolveMode {
    /// Reads throw `ReferenceError`, writes throw in strict code
    ThrowIfNotFound,
    /// Reads produce `undefined` (`typeof x`), writes create a global
    DoNotThrowIfNotFound,
}

impl fmt::Display for ResolveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThrowIfNotFound => f.write_str("throw"),
            Self::DoNotThrowIfNotFound => f.write_str("nothrow"),
        }
    }
}

/// Error constructor used by `ThrowStaticError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// `TypeError`
    TypeError,
    /// `ReferenceError`
    ReferenceError,
    /// `RangeError`
    RangeError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError => f.write_str("TypeError"),
            Self::ReferenceError => f.write_str("ReferenceError"),
            Self::RangeError => f.write_str("RangeError"),
        }
    }
}

/// Debugger notification points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebugHookKind {
    /// Before the first instruction of global code
    WillExecuteProgram,
    /// After the last instruction of global code
    DidExecuteProgram,
    /// On entry to function code
    DidEnterCallFrame,
    /// Before a function returns
    WillLeaveCallFrame,
    /// Before each statement
    WillExecuteStatement,
    /// At a `debugger` statement
    WillExecuteDebuggerStatement,
}

impl fmt::Display for DebugHookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

macro_rules! define_instructions {
    ($(
        $(#[$doc:meta])*
        $name:ident = $byte:literal { $($field:ident : $ty:ty),* $(,)? }
    ),* $(,)?) => {
        /// Bytecode opcodes
        ///
        /// The discriminant of every [`Instruction`] variant.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $( $(#[$doc])* $name = $byte, )*
        }

        impl Opcode {
            /// Every opcode, in byte order
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            /// Convert from raw byte
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Self::$name), )*
                    _ => None,
                }
            }

            /// Convert to raw byte
            pub fn to_byte(self) -> u8 {
                self as u8
            }

            /// Get the name of this opcode
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name), )*
                }
            }
        }

        /// A decoded instruction with its operands
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[allow(missing_docs)]
        pub enum Instruction {
            $( $(#[$doc])* $name { $($field: $ty),* }, )*
        }

        impl Instruction {
            /// Opcode of this instruction
            pub const fn opcode(&self) -> Opcode {
                match self {
                    $( Self::$name { .. } => Opcode::$name, )*
                }
            }
        }

        impl fmt::Display for Instruction {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(
                        #[allow(unused_variables)]
                        Self::$name { $($field),* } => {
                            f.write_str(Opcode::$name.name())?;
                            $( write!(f, " {}", $field)?; )*
                            Ok(())
                        }
                    )*
                }
            }
        }
    };
}

define_instructions! {
    // ==================== Loads ====================
    /// dst = src
    Mov = 0x00 { dst: Register, src: Register },
    /// dst = constants\[constant\]
    LoadConst = 0x01 { dst: Register, constant: ConstantIndex },

    // ==================== Arithmetic ====================
    /// dst = lhs + rhs
    Add = 0x10 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs - rhs
    Sub = 0x11 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs * rhs
    Mul = 0x12 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs / rhs
    Div = 0x13 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs % rhs
    Mod = 0x14 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs & rhs
    BitAnd = 0x15 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs | rhs
    BitOr = 0x16 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs ^ rhs
    BitXor = 0x17 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs << rhs
    Shl = 0x18 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >> rhs
    Shr = 0x19 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >>> rhs
    UShr = 0x1A { dst: Register, lhs: Register, rhs: Register },
    /// dst = -src
    Negate = 0x1B { dst: Register, src: Register },
    /// dst = +src
    ToNumber = 0x1C { dst: Register, src: Register },
    /// dst = ~src
    BitNot = 0x1D { dst: Register, src: Register },
    /// dst = !src
    Not = 0x1E { dst: Register, src: Register },
    /// dst = dst + 1, in place
    Inc = 0x1F { dst: Register },
    /// dst = dst - 1, in place
    Dec = 0x20 { dst: Register },

    // ==================== Comparison ====================
    /// dst = lhs == rhs
    Eq = 0x28 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs != rhs
    NotEq = 0x29 { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs === rhs
    StrictEq = 0x2A { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs !== rhs
    StrictNotEq = 0x2B { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs < rhs
    Less = 0x2C { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs <= rhs
    LessEq = 0x2D { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs > rhs
    Greater = 0x2E { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >= rhs
    GreaterEq = 0x2F { dst: Register, lhs: Register, rhs: Register },
    /// dst = src == null
    EqNull = 0x30 { dst: Register, src: Register },
    /// dst = src != null
    NotEqNull = 0x31 { dst: Register, src: Register },
    /// dst = property in base
    In = 0x32 { dst: Register, property: Register, base: Register },
    /// dst = value instanceof constructor
    InstanceOf = 0x33 { dst: Register, value: Register, constructor: Register },

    // ==================== Type tests ====================
    /// dst = typeof src
    TypeOf = 0x38 { dst: Register, src: Register },
    /// dst = typeof src === "undefined"
    IsUndefined = 0x39 { dst: Register, src: Register },
    /// dst = typeof src === "boolean"
    IsBoolean = 0x3A { dst: Register, src: Register },
    /// dst = typeof src === "number"
    IsNumber = 0x3B { dst: Register, src: Register },
    /// dst = typeof src === "string"
    IsString = 0x3C { dst: Register, src: Register },
    /// dst = typeof src === "object"
    IsObject = 0x3D { dst: Register, src: Register },
    /// dst = typeof src === "function"
    IsFunction = 0x3E { dst: Register, src: Register },

    // ==================== Control flow ====================
    /// pc += offset
    Jump = 0x40 { offset: JumpOffset },
    /// if cond: pc += offset
    JumpIfTrue = 0x41 { cond: Register, offset: JumpOffset },
    /// if !cond: pc += offset
    JumpIfFalse = 0x42 { cond: Register, offset: JumpOffset },
    /// if src == null: pc += offset
    JumpIfNull = 0x43 { src: Register, offset: JumpOffset },
    /// if src != null: pc += offset
    JumpIfNotNull = 0x44 { src: Register, offset: JumpOffset },
    /// if lhs < rhs: pc += offset
    JumpIfLess = 0x45 { lhs: Register, rhs: Register, offset: JumpOffset },
    /// if !(lhs < rhs): pc += offset
    JumpIfNotLess = 0x46 { lhs: Register, rhs: Register, offset: JumpOffset },
    /// if lhs <= rhs: pc += offset
    JumpIfLessEq = 0x47 { lhs: Register, rhs: Register, offset: JumpOffset },
    /// if !(lhs <= rhs): pc += offset
    JumpIfNotLessEq = 0x48 { lhs: Register, rhs: Register, offset: JumpOffset },
    /// if lhs > rhs: pc += offset
    JumpIfGreater = 0x49 { lhs: Register, rhs: Register, offset: JumpOffset },
    /// if !(lhs > rhs): pc += offset
    JumpIfNotGreater = 0x4A { lhs: Register, rhs: Register, offset: JumpOffset },
    /// if lhs >= rhs: pc += offset
    JumpIfGreaterEq = 0x4B { lhs: Register, rhs: Register, offset: JumpOffset },
    /// if !(lhs >= rhs): pc += offset
    JumpIfNotGreaterEq = 0x4C { lhs: Register, rhs: Register, offset: JumpOffset },
    /// Dense integer switch through a jump table
    SwitchImm = 0x4D { table: JumpTableIndex, default: JumpOffset, scrutinee: Register },
    /// Loop header marker (tier-up counting point)
    LoopHint = 0x4E {},

    // ==================== Scopes ====================
    /// dst = scope captured by the running function
    GetScope = 0x50 { dst: Register },
    /// dst = new activation record whose parent is `parent`
    CreateActivation = 0x51 { dst: Register, parent: Register },
    /// dst = innermost scope in the chain starting at `scope` that binds `name`
    ResolveScope = 0x52 { dst: Register, scope: Register, name: IdentifierIndex, mode: ResolveMode },
    /// dst = scope.name
    GetFromScope = 0x53 { dst: Register, scope: Register, name: IdentifierIndex, mode: ResolveMode },
    /// scope.name = value
    PutToScope = 0x54 { scope: Register, name: IdentifierIndex, value: Register, mode: ResolveMode },
    /// dst = activation slot
    GetClosureVar = 0x55 { dst: Register, scope: Register, slot: u32 },
    /// activation slot = value
    PutClosureVar = 0x56 { scope: Register, slot: u32, value: Register },
    /// scope = with-scope(object) -> scope
    PushWithScope = 0x57 { scope: Register, object: Register },
    /// scope = catch-scope { name: value } -> scope
    PushCatchScope = 0x58 { scope: Register, name: IdentifierIndex, value: Register },
    /// scope = scope.parent
    PopScope = 0x59 { scope: Register },

    // ==================== Properties ====================
    /// dst = base.name
    GetById = 0x60 { dst: Register, base: Register, name: IdentifierIndex },
    /// base.name = value
    PutById = 0x61 { base: Register, name: IdentifierIndex, value: Register },
    /// Define an own data property (object literals)
    DefineById = 0x62 { base: Register, name: IdentifierIndex, value: Register },
    /// Define an accessor property; either side may hold `undefined`
    PutGetterSetter = 0x63 { base: Register, name: IdentifierIndex, getter: Register, setter: Register },
    /// dst = base\[property\]
    GetByVal = 0x64 { dst: Register, base: Register, property: Register },
    /// base\[property\] = value
    PutByVal = 0x65 { base: Register, property: Register, value: Register },
    /// dst = delete base.name
    DeleteById = 0x66 { dst: Register, base: Register, name: IdentifierIndex },
    /// dst = delete base\[property\]
    DeleteByVal = 0x67 { dst: Register, base: Register, property: Register },

    // ==================== Allocation ====================
    /// dst = {}
    NewObject = 0x70 { dst: Register },
    /// dst = [first, first + 1, ..] from `count` consecutive registers
    NewArray = 0x71 { dst: Register, first: Register, count: u32 },
    /// array.push(value)
    ArrayPush = 0x72 { array: Register, value: Register },
    /// Grow array by one hole
    ArrayPushHole = 0x73 { array: Register },
    /// array.push(...iterable)
    ArrayAppendSpread = 0x74 { array: Register, iterable: Register },
    /// dst = /pattern/flags
    NewRegExp = 0x75 { dst: Register, pattern: ConstantIndex, flags: ConstantIndex },
    /// dst = closure over `scope` for a nested function
    NewFunction = 0x76 { dst: Register, scope: Register, function: FunctionIndex },

    // ==================== Frame values ====================
    /// Coerce `this` in sloppy function code (null/undefined become the global object)
    ToThis = 0x78 { dst: Register },
    /// dst = materialized arguments object
    CreateArguments = 0x79 { dst: Register },
    /// dst = argument `index` (0 is the first argument after `this`), or undefined
    GetArgument = 0x7A { dst: Register, index: u32 },
    /// dst = number of arguments passed, excluding `this`
    GetArgumentCount = 0x7B { dst: Register },

    // ==================== Calls ====================
    /// dst = callee.call(this_arg, ..) with `argc` slots starting at `this_arg`
    Call = 0x80 { dst: Register, callee: Register, this_arg: Register, argc: u32, link: CallLinkIndex },
    /// Like `Call` but performs direct eval when `callee` is the intrinsic eval
    CallEval = 0x81 { dst: Register, callee: Register, this_arg: Register, argc: u32, link: CallLinkIndex },
    /// dst = new callee(..); the `this_arg` slot is filled by the callee side
    Construct = 0x82 { dst: Register, callee: Register, this_arg: Register, argc: u32, link: CallLinkIndex },
    /// dst = callee.apply(this_value, arguments) with the frame placed below `first_free`
    CallVarargs = 0x83 { dst: Register, callee: Register, this_value: Register, arguments: Register, first_free: Register, link: CallLinkIndex },
    /// dst = new callee(...arguments)
    ConstructVarargs = 0x84 { dst: Register, callee: Register, this_value: Register, arguments: Register, first_free: Register, link: CallLinkIndex },
    /// Return from function code
    Return = 0x85 { value: Register },
    /// Completion of global or eval code
    End = 0x86 { value: Register },

    // ==================== Exceptions ====================
    /// throw value
    Throw = 0x90 { value: Register },
    /// dst = pending exception (first instruction of a handler)
    Catch = 0x91 { dst: Register },
    /// throw new kind(constants\[message\])
    ThrowStaticError = 0x92 { message: ConstantIndex, kind: ErrorKind },
    /// throw RangeError for input nested too deeply to compile
    ThrowStackOverflow = 0x93 {},

    // ==================== Enumeration ====================
    /// dst = number of indexed properties of base
    GetEnumerableLength = 0xA0 { dst: Register, base: Register },
    /// dst = base has own indexed property `index`
    HasIndexedProperty = 0xA1 { dst: Register, base: Register, index: Register },
    /// dst = String(index)
    ToIndexString = 0xA2 { dst: Register, index: Register },
    /// dst = snapshot of base's enumerable non-index keys
    GetPropertyEnumerator = 0xA3 { dst: Register, base: Register },
    /// dst = enumerator\[index\], or null when exhausted
    EnumeratorNext = 0xA4 { dst: Register, enumerator: Register, index: Register },
    /// dst = base still has property
    HasGenericProperty = 0xA5 { dst: Register, base: Register, property: Register },
    /// dst = base\[property\] where property came from `enumerator` at `index`
    GetDirectPname = 0xA6 { dst: Register, base: Register, property: Register, index: Register, enumerator: Register },

    // ==================== Debugging ====================
    /// Debugger notification
    DebugHook = 0xB0 { kind: DebugHookKind },

    /// No operation
    Nop = 0xFF {},
}

impl Instruction {
    /// Relative jump carried by this instruction, if it is a branch
    pub fn jump_offset(&self) -> Option<JumpOffset> {
        match self {
            Self::Jump { offset }
            | Self::JumpIfTrue { offset, .. }
            | Self::JumpIfFalse { offset, .. }
            | Self::JumpIfNull { offset, .. }
            | Self::JumpIfNotNull { offset, .. }
            | Self::JumpIfLess { offset, .. }
            | Self::JumpIfNotLess { offset, .. }
            | Self::JumpIfLessEq { offset, .. }
            | Self::JumpIfNotLessEq { offset, .. }
            | Self::JumpIfGreater { offset, .. }
            | Self::JumpIfNotGreater { offset, .. }
            | Self::JumpIfGreaterEq { offset, .. }
            | Self::JumpIfNotGreaterEq { offset, .. } => Some(*offset),
            Self::SwitchImm { default, .. } => Some(*default),
            _ => None,
        }
    }

    /// Rewrite the relative jump of a branch. Returns false for non-branches.
    pub fn set_jump_offset(&mut self, new_offset: JumpOffset) -> bool {
        match self {
            Self::Jump { offset }
            | Self::JumpIfTrue { offset, .. }
            | Self::JumpIfFalse { offset, .. }
            | Self::JumpIfNull { offset, .. }
            | Self::JumpIfNotNull { offset, .. }
            | Self::JumpIfLess { offset, .. }
            | Self::JumpIfNotLess { offset, .. }
            | Self::JumpIfLessEq { offset, .. }
            | Self::JumpIfNotLessEq { offset, .. }
            | Self::JumpIfGreater { offset, .. }
            | Self::JumpIfNotGreater { offset, .. }
            | Self::JumpIfGreaterEq { offset, .. }
            | Self::JumpIfNotGreaterEq { offset, .. } => {
                *offset = new_offset;
                true
            }
            Self::SwitchImm { default, .. } => {
                *default = new_offset;
                true
            }
            _ => false,
        }
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. }
                | Self::Return { .. }
                | Self::End { .. }
                | Self::Throw { .. }
                | Self::ThrowStaticError { .. }
                | Self::ThrowStackOverflow {}
        )
    }

    /// Whether this is one of the call family that owns a call-link record
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Self::Call { .. }
                | Self::CallEval { .. }
                | Self::Construct { .. }
                | Self::CallVarargs { .. }
                | Self::ConstructVarargs { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op.to_byte()), Some(op));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_byte(0xFE), None);
    }

    #[test]
    fn test_opcode_name() {
        assert_eq!(Opcode::Add.name(), "Add");
        assert_eq!(Opcode::Jump.name(), "Jump");
        assert_eq!(Opcode::ThrowStackOverflow.name(), "ThrowStackOverflow");
    }

    #[test]
    fn test_instruction_display() {
        let add = Instruction::Add {
            dst: Register::local(0),
            lhs: Register::argument(1),
            rhs: Register::argument(2),
        };
        assert_eq!(add.opcode(), Opcode::Add);
        assert_eq!(add.to_string(), "Add loc0 arg1 arg2");
        assert_eq!(Instruction::LoopHint {}.to_string(), "LoopHint");
    }

    #[test]
    fn test_patch_jump() {
        let mut jump = Instruction::JumpIfFalse {
            cond: Register::local(1),
            offset: JumpOffset::new(0),
        };
        assert!(jump.set_jump_offset(JumpOffset::new(7)));
        assert_eq!(jump.jump_offset(), Some(JumpOffset::new(7)));

        let mut mov = Instruction::Mov {
            dst: Register::local(0),
            src: Register::local(1),
        };
        assert!(!mov.set_jump_offset(JumpOffset::new(1)));
    }
}
