/// Host register number (x86-64 encoding).
pub type HostReg = u8;

/// Operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }
}

/// An emitter operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(HostReg),
    /// `[base + disp]`
    Mem { base: HostReg, disp: i32 },
    /// `[base + index * scale + disp]`, scale in {1, 2, 4, 8}.
    Sib {
        base: HostReg,
        index: HostReg,
        scale: u8,
        disp: i32,
    },
    Imm { value: i64, width: Width },
}

impl Operand {
    pub const fn imm32(value: u32) -> Self {
        Operand::Imm {
            value: value as i32 as i64,
            width: Width::W32,
        }
    }

    pub const fn mem(base: HostReg, disp: i32) -> Self {
        Operand::Mem { base, disp }
    }

    pub fn is_mem(&self) -> bool {
        matches!(self, Operand::Mem { .. } | Operand::Sib { .. })
    }

    pub fn reg(&self) -> Option<HostReg> {
        match *self {
            Operand::Reg(r) => Some(r),
            _ => None,
        }
    }
}

/// Whether `v` fits a sign-extended 8-bit immediate.
#[inline]
pub const fn fits_i8(v: i64) -> bool {
    v >= i8::MIN as i64 && v <= i8::MAX as i64
}

/// Whether `v` fits a sign-extended 32-bit immediate.
#[inline]
pub const fn fits_i32(v: i64) -> bool {
    v >= i32::MIN as i64 && v <= i32::MAX as i64
}
