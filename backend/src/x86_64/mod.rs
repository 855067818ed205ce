pub mod codegen;
pub mod emitter;
pub mod regs;

pub use codegen::X86_64CodeGen;
pub use emitter::{ArithOp, ShiftOp, UnaryOp, X64Emitter, X86Cond};
pub use regs::Reg;
