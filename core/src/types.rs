/// Comparison for `setcond`, stored in the instruction's `aux`.
/// Signed variants compare the operands as `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Le,
    Gt,
    Ltu,
    Geu,
    Leu,
    Gtu,
}

impl Cond {
    pub const ALL: [Cond; 10] = {
        use Cond::*;
        [Eq, Ne, Lt, Ge, Le, Gt, Ltu, Geu, Leu, Gtu]
    };

    pub fn from_raw(raw: u32) -> Option<Cond> {
        Self::ALL.get(raw as usize).copied()
    }

    /// The condition that holds exactly when `self` does not.
    pub const fn invert(self) -> Cond {
        use Cond::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            Lt => Ge,
            Ge => Lt,
            Le => Gt,
            Gt => Le,
            Ltu => Geu,
            Geu => Ltu,
            Leu => Gtu,
            Gtu => Leu,
        }
    }

    /// The condition with its operands exchanged: `a < b` is `b > a`.
    pub const fn swap(self) -> Cond {
        use Cond::*;
        match self {
            Eq | Ne => self,
            Lt => Gt,
            Gt => Lt,
            Le => Ge,
            Ge => Le,
            Ltu => Gtu,
            Gtu => Ltu,
            Leu => Geu,
            Geu => Leu,
        }
    }

    pub fn eval(self, a: u32, b: u32) -> bool {
        use std::cmp::Ordering::*;
        let signed = (a as i32).cmp(&(b as i32));
        let unsigned = a.cmp(&b);
        match self {
            Cond::Eq => unsigned == Equal,
            Cond::Ne => unsigned != Equal,
            Cond::Lt => signed == Less,
            Cond::Ge => signed != Less,
            Cond::Le => signed != Greater,
            Cond::Gt => signed == Greater,
            Cond::Ltu => unsigned == Less,
            Cond::Geu => unsigned != Less,
            Cond::Leu => unsigned != Greater,
            Cond::Gtu => unsigned == Greater,
        }
    }
}

/// Width of a guest memory access. The discriminant indexes the
/// helper tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemSize {
    U8 = 0,
    U16 = 1,
    U32 = 2,
}

impl MemSize {
    pub const fn bytes(self) -> u32 {
        1 << (self as u32)
    }
}

/// Home of an allocated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(u8),
    Spill(u32),
}

/// Set of host general-purpose registers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegSet(u16);

impl RegSet {
    pub const fn of(regs: &[u8]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < regs.len() {
            bits |= 1 << regs[i];
            i += 1;
        }
        Self(bits)
    }

    pub const fn contains(self, reg: u8) -> bool {
        self.0 & (1 << reg) != 0
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..16).filter(move |&r| self.contains(r))
    }
}

impl std::fmt::Debug for RegSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
