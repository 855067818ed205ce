//! Direct emission: guest instructions lowered straight to host code
//! without IR or register allocation. Guest registers live in the
//! state block and are accessed as memory operands.

use dbt_core::state::{gpr_offset, FALLBACKS_OFFSET, PC_OFFSET};
use dbt_core::MemSize;

use crate::code_region::CodeRegion;
use crate::operand::{Operand, Width};
use crate::translate::HostBlock;
use crate::x86_64::emitter::{ArithOp, X64Emitter, X86Cond};
use crate::x86_64::regs::{env_field, Reg, ENV_REG};
use crate::{ExitSite, Helpers, HostCodeGen};

pub struct DirectEmitter<'a, B: HostCodeGen> {
    buf: &'a mut CodeRegion,
    backend: &'a B,
    helpers: &'a Helpers,
    checked_entry: usize,
    unchecked_entry: usize,
    cur_pc: u32,
    cycles: u32,
    exits: Vec<ExitSite>,
    terminated: bool,
}

impl<'a, B: HostCodeGen> DirectEmitter<'a, B> {
    /// Start a block: emits the block header.
    pub fn new(buf: &'a mut CodeRegion, backend: &'a B, helpers: &'a Helpers) -> Self {
        let (checked_entry, unchecked_entry) = backend.emit_block_entry(buf);
        Self {
            buf,
            backend,
            helpers,
            checked_entry,
            unchecked_entry,
            cur_pc: 0,
            cycles: 0,
            exits: Vec::new(),
            terminated: false,
        }
    }

    pub fn asm(&mut self) -> X64Emitter<'_> {
        X64Emitter::new(self.buf)
    }

    pub fn region(&self) -> &CodeRegion {
        &*self.buf
    }

    /// Guest register `n` as a memory operand.
    pub fn gpr(&self, n: usize) -> Operand {
        env_field(gpr_offset(n))
    }

    /// Guest state field at `off` as a memory operand.
    pub fn state(&self, off: u32) -> Operand {
        env_field(off)
    }

    /// Mark the start of the guest instruction at `pc`.
    pub fn begin_insn(&mut self, pc: u32) {
        self.cur_pc = pc;
        self.cycles += 1;
    }

    pub fn current_pc(&self) -> u32 {
        self.cur_pc
    }

    /// Unconditional exit to a static target.
    pub fn exit(&mut self, target: u32) {
        let jump = self.backend.emit_exit(self.buf, target, self.cycles);
        self.exits.push(ExitSite {
            target: Some(target),
            jump_offset: Some(jump),
        });
        self.terminated = true;
    }

    /// Exit to `target` when `cond` holds on the current flags.
    pub fn exit_if(&mut self, cond: X86Cond, target: u32) {
        let skip = X64Emitter::new(self.buf).jcc_fixup(cond.invert(), true);
        let jump = self.backend.emit_exit(self.buf, target, self.cycles);
        X64Emitter::new(self.buf).bind(skip);
        self.exits.push(ExitSite {
            target: Some(target),
            jump_offset: Some(jump),
        });
    }

    /// Exit to the guest address held in `target`.
    pub fn exit_dynamic(&mut self, target: Operand) {
        self.backend.emit_exit_dynamic(self.buf, target, self.cycles);
        self.exits.push(ExitSite {
            target: None,
            jump_offset: None,
        });
        self.terminated = true;
    }

    /// Run the raw instruction `word` at the current pc through the
    /// interpreter helper.
    pub fn call_interp(&mut self, word: u32) {
        let pc = self.cur_pc;
        let interp = self.helpers.interp;
        let mut e = self.asm();
        e.mov(Width::W32, env_field(PC_OFFSET), Operand::imm32(pc));
        e.alu(ArithOp::Add, Width::W32, env_field(FALLBACKS_OFFSET), Operand::imm32(1));
        e.call_abs(interp, &[ENV_REG.op(), Operand::imm32(word)]);
    }

    /// Guest load from the address in `addr`. The zero-extended
    /// value is returned in EAX; RCX and RDX are clobbered.
    pub fn load(&mut self, size: MemSize, addr: Operand) -> Operand {
        let f = self.helpers.read[size as usize];
        self.asm().call_abs(f, &[ENV_REG.op(), addr]);
        Reg::Rax.op()
    }

    /// Guest store of `val` to the address in `addr`. Clobbers the
    /// scratch registers.
    pub fn store(&mut self, size: MemSize, addr: Operand, val: Operand) {
        let f = self.helpers.write[size as usize];
        self.asm().call_abs(f, &[ENV_REG.op(), addr, val]);
    }

    /// Whether the block already ends in an unconditional exit.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn finish(self) -> HostBlock {
        HostBlock {
            checked_entry: self.checked_entry,
            unchecked_entry: self.unchecked_entry,
            exits: self.exits,
            host_size: self.buf.offset() - self.checked_entry,
            stats: Default::default(),
        }
    }
}
