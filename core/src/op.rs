use crate::opcode::Opcode;
use crate::types::Location;

/// Maximum number of input operands per IR instruction.
pub const MAX_INST_ARGS: usize = 2;

/// Index into the Context's instruction list. An instruction's
/// index also names the value it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstIdx(pub u32);

impl InstIdx {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An operand reference: the result of an earlier instruction or
/// an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arg {
    Value(InstIdx),
    Imm(u32),
}

impl Arg {
    pub const fn value(self) -> Option<InstIdx> {
        match self {
            Arg::Value(v) => Some(v),
            Arg::Imm(_) => None,
        }
    }

    pub const fn imm(self) -> Option<u32> {
        match self {
            Arg::Imm(v) => Some(v),
            Arg::Value(_) => None,
        }
    }
}

/// Per-operand liveness bits: operand `n` is dead after this
/// instruction (this is the value's last use).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifeData(pub u8);

impl LifeData {
    pub const fn dead_arg(n: usize) -> u8 {
        1 << n
    }

    pub fn is_dead(&self, n: usize) -> bool {
        self.0 & Self::dead_arg(n) != 0
    }

    pub fn set_dead(&mut self, n: usize) {
        self.0 |= Self::dead_arg(n);
    }
}

/// A single IR instruction.
#[derive(Debug, Clone)]
pub struct Inst {
    pub idx: InstIdx,
    pub opc: Opcode,
    /// Input operands; only the first `nb_iargs` are meaningful.
    pub args: [Arg; MAX_INST_ARGS],
    /// Opcode-specific constant: state offset, condition,
    /// exit target, or raw guest instruction word.
    pub aux: u32,

    // -- Filled in by liveness analysis --
    pub life: LifeData,
    /// Number of live instructions reading this value.
    pub uses: u32,
    /// First instruction that reads this value.
    pub first_use: Option<InstIdx>,
    /// Last instruction that reads this value.
    pub last_use: Option<InstIdx>,

    // -- Filled in by register allocation --
    pub loc: Option<Location>,
}

impl Inst {
    pub fn new(idx: InstIdx, opc: Opcode, args: &[Arg], aux: u32) -> Self {
        debug_assert_eq!(args.len(), opc.def().nb_iargs as usize);
        let mut a = [Arg::Imm(0); MAX_INST_ARGS];
        a[..args.len()].copy_from_slice(args);
        Self {
            idx,
            opc,
            args: a,
            aux,
            life: LifeData::default(),
            uses: 0,
            first_use: None,
            last_use: None,
            loc: None,
        }
    }

    /// Input operands of this instruction.
    pub fn iargs(&self) -> &[Arg] {
        &self.args[..self.opc.def().nb_iargs as usize]
    }

    /// Whether the instruction must be kept regardless of uses.
    pub fn is_live(&self) -> bool {
        self.opc.def().has_side_effects() || self.uses > 0
    }

    /// Whether the value's lifetime ends at or before `at`.
    pub fn dies_at(&self, at: InstIdx) -> bool {
        self.last_use.map_or(true, |u| u <= at)
    }

    /// Clear liveness and allocation results.
    pub fn reset_life(&mut self) {
        self.life = LifeData::default();
        self.uses = 0;
        self.first_use = None;
        self.last_use = None;
        self.loc = None;
    }
}
