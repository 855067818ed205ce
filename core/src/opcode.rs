/// IR opcodes.
///
/// Every value is 32 bits wide. Opcodes that read guest CPU state
/// carry the byte offset into [`GuestState`](crate::state::GuestState)
/// in the instruction's `aux` field; exits carry their guest target
/// there, `setcond` its [`Cond`](crate::types::Cond).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -- Markers --
    InsnStart = 0, // guest instruction boundary, aux = guest pc

    // -- Guest state access --
    LoadState,
    StoreState,

    // -- Data movement --
    Mov,

    // -- Arithmetic / logic --
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    RotL,
    Not,
    Neg,
    SetCond,

    // -- Guest memory (through host helpers) --
    Load8,
    Load16,
    Load32,
    Store8,
    Store16,
    Store32,

    // -- Interpreter fallback, aux = raw instruction word --
    CallInterp,

    // -- Block exits --
    ExitIf,
    Exit,
    ExitDyn,

    // Sentinel, must be last
    Count,
}

/// Flags describing properties of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpFlags(u16);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// Leaves the block (possibly conditionally).
    pub const BB_EXIT: OpFlags = OpFlags(0x01);
    /// Nothing after this op in the block is reachable.
    pub const BB_END: OpFlags = OpFlags(0x02);
    /// Calls a host function; clobbers caller-saved registers.
    pub const CALL_CLOBBER: OpFlags = OpFlags(0x04);
    /// Has side effects; never removed when its result is unused.
    pub const SIDE_EFFECTS: OpFlags = OpFlags(0x08);
    /// Operands may be swapped.
    pub const COMMUTATIVE: OpFlags = OpFlags(0x10);

    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: OpFlags) -> Self {
        Self(self.0 | other.0)
    }
}

/// Static definition of an opcode: argument counts and flags.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub nb_oargs: u8,
    pub nb_iargs: u8,
    pub flags: OpFlags,
}

impl OpDef {
    pub const fn has_result(&self) -> bool {
        self.nb_oargs != 0
    }

    pub const fn has_side_effects(&self) -> bool {
        self.flags.contains(OpFlags::SIDE_EFFECTS)
    }

    pub const fn is_call(&self) -> bool {
        self.flags.contains(OpFlags::CALL_CLOBBER)
    }
}

const N: OpFlags = OpFlags::NONE;
const SE: OpFlags = OpFlags::SIDE_EFFECTS;
const CM: OpFlags = OpFlags::COMMUTATIVE;
const CALL: OpFlags = OpFlags::CALL_CLOBBER.union(SE);
const EXIT: OpFlags = OpFlags::BB_EXIT.union(SE);
const END: OpFlags = EXIT.union(OpFlags::BB_END);

const fn def(name: &'static str, nb_oargs: u8, nb_iargs: u8, flags: OpFlags) -> OpDef {
    OpDef {
        name,
        nb_oargs,
        nb_iargs,
        flags,
    }
}

/// Static opcode definition table, indexed by `Opcode as usize`.
pub static OPCODE_DEFS: [OpDef; Opcode::Count as usize] = [
    def("insn_start", 0, 0, SE),
    def("ld_state", 1, 0, N),
    def("st_state", 0, 1, SE),
    def("mov", 1, 1, N),
    def("add", 1, 2, CM),
    def("sub", 1, 2, N),
    def("mul", 1, 2, CM),
    def("and", 1, 2, CM),
    def("or", 1, 2, CM),
    def("xor", 1, 2, CM),
    def("shl", 1, 2, N),
    def("shr", 1, 2, N),
    def("sar", 1, 2, N),
    def("rotl", 1, 2, N),
    def("not", 1, 1, N),
    def("neg", 1, 1, N),
    def("setcond", 1, 2, N),
    def("ld8", 1, 1, CALL),
    def("ld16", 1, 1, CALL),
    def("ld32", 1, 1, CALL),
    def("st8", 0, 2, CALL),
    def("st16", 0, 2, CALL),
    def("st32", 0, 2, CALL),
    def("call_interp", 0, 0, CALL),
    def("exit_if", 0, 1, EXIT),
    def("exit", 0, 0, END),
    def("exit_dyn", 0, 1, END),
];

impl Opcode {
    #[inline]
    pub fn def(self) -> &'static OpDef {
        &OPCODE_DEFS[self as usize]
    }

    /// Fold a binary opcode over two constants.
    ///
    /// Shift amounts are taken modulo 32, matching the host.
    pub fn fold(self, a: u32, b: u32) -> Option<u32> {
        let v = match self {
            Opcode::Add => a.wrapping_add(b),
            Opcode::Sub => a.wrapping_sub(b),
            Opcode::Mul => a.wrapping_mul(b),
            Opcode::And => a & b,
            Opcode::Or => a | b,
            Opcode::Xor => a ^ b,
            Opcode::Shl => a << (b & 31),
            Opcode::Shr => a >> (b & 31),
            Opcode::Sar => ((a as i32) >> (b & 31)) as u32,
            Opcode::RotL => a.rotate_left(b & 31),
            _ => return None,
        };
        Some(v)
    }
}
