use dbt_core::{Arg, Context, Inst, InstIdx, Location, OpFlags, Opcode};

use crate::code_region::CodeRegion;
use crate::operand::{HostReg, Operand};
use crate::{ExitSite, Helpers, HostCodeGen, OpEnv};

/// One step of the allocation, recorded for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocEvent {
    /// `value` was written to `reg`.
    Def { value: InstIdx, reg: HostReg },
    /// Instruction `inst` read `value` from `loc`.
    Use {
        inst: InstIdx,
        value: InstIdx,
        loc: Location,
    },
    /// `value` was stored from `reg` to spill slot `slot`.
    Spill {
        value: InstIdx,
        reg: HostReg,
        slot: u32,
    },
    /// `reg` was clobbered by a host call.
    Clobber { reg: HostReg },
}

/// Allocation counters for one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub spills: u32,
    /// Results placed in a dying operand's register.
    pub recycled: u32,
    /// Unused side-effect-free instructions skipped.
    pub dead_skipped: u32,
    /// High-water mark of spill slots.
    pub slots_used: u32,
}

/// Register allocator state.
struct RegAllocState {
    reg_to_value: [Option<InstIdx>; 16],
    /// Current location of each value; at most one.
    value_loc: Vec<Option<Location>>,
    free_slots: Vec<u32>,
    next_slot: u32,
    max_slots: u32,
}

impl RegAllocState {
    fn new(num_values: usize, max_slots: u32) -> Self {
        Self {
            reg_to_value: [None; 16],
            value_loc: vec![None; num_values],
            free_slots: Vec::new(),
            next_slot: 0,
            max_slots,
        }
    }

    fn assign(&mut self, reg: HostReg, v: InstIdx) {
        self.reg_to_value[reg as usize] = Some(v);
        self.value_loc[v.index()] = Some(Location::Reg(reg));
    }

    fn new_slot(&mut self) -> u32 {
        if let Some(s) = self.free_slots.pop() {
            return s;
        }
        assert!(
            self.next_slot < self.max_slots,
            "spill area overflow: {} slots in use",
            self.next_slot
        );
        self.next_slot += 1;
        self.next_slot - 1
    }

    /// Release whatever location `v` occupies.
    fn release(&mut self, v: InstIdx) {
        match self.value_loc[v.index()].take() {
            Some(Location::Reg(r)) => self.reg_to_value[r as usize] = None,
            Some(Location::Spill(s)) => self.free_slots.push(s),
            None => {}
        }
    }
}

struct Allocator<'a, B: HostCodeGen> {
    backend: &'a B,
    state: RegAllocState,
    stats: AllocStats,
    trace: Option<&'a mut Vec<AllocEvent>>,
}

impl<B: HostCodeGen> Allocator<'_, B> {
    fn record(&mut self, ev: AllocEvent) {
        if let Some(t) = self.trace.as_deref_mut() {
            t.push(ev);
        }
    }

    /// Move the value in `reg` to a fresh spill slot.
    fn spill(&mut self, buf: &mut CodeRegion, reg: HostReg) {
        let Some(v) = self.state.reg_to_value[reg as usize] else {
            return;
        };
        let slot = self.state.new_slot();
        self.stats.slots_used = self.stats.slots_used.max(self.state.next_slot);
        let dst = self.backend.loc_operand(Location::Spill(slot));
        self.backend.out_mov(buf, dst, Operand::Reg(reg));
        self.state.reg_to_value[reg as usize] = None;
        self.state.value_loc[v.index()] = Some(Location::Spill(slot));
        self.stats.spills += 1;
        self.record(AllocEvent::Spill {
            value: v,
            reg,
            slot,
        });
    }

    /// Pick a register outside `forbidden`: the first free one in
    /// allocation order, else evict the resident whose last use is
    /// farthest away (ties go to the earlier register in the order).
    fn alloc_reg(&mut self, ctx: &Context, buf: &mut CodeRegion, forbidden: &[HostReg]) -> HostReg {
        let order = self.backend.alloc_order();
        if let Some(&r) = order
            .iter()
            .find(|&&r| !forbidden.contains(&r) && self.state.reg_to_value[r as usize].is_none())
        {
            return r;
        }
        let mut victim: Option<(HostReg, InstIdx)> = None;
        for &r in order.iter().filter(|r| !forbidden.contains(r)) {
            let Some(v) = self.state.reg_to_value[r as usize] else {
                continue;
            };
            let last = ctx.inst(v).last_use;
            let better = match victim {
                None => true,
                Some((_, cur)) => last > ctx.inst(cur).last_use,
            };
            if better {
                victim = Some((r, v));
            }
        }
        let (r, _) = victim.unwrap_or_else(|| panic!("no register available outside {forbidden:?}"));
        self.spill(buf, r);
        r
    }

    /// Before a host call: spill caller-saved residents still needed
    /// by this instruction or later, drop the rest.
    fn spill_for_call(&mut self, ctx: &Context, buf: &mut CodeRegion, inst: &Inst) {
        let clobbered = self.backend.caller_saved();
        for r in clobbered.iter() {
            let Some(v) = self.state.reg_to_value[r as usize] else {
                continue;
            };
            let operand = inst.iargs().contains(&Arg::Value(v));
            if operand || !ctx.inst(v).dies_at(inst.idx) {
                self.spill(buf, r);
            } else {
                self.state.release(v);
            }
        }
        for r in clobbered.iter() {
            self.record(AllocEvent::Clobber { reg: r });
        }
    }

    fn operand(&mut self, inst: &Inst, arg: Arg) -> Operand {
        match arg {
            Arg::Imm(x) => Operand::imm32(x),
            Arg::Value(v) => {
                let loc = self.state.value_loc[v.index()].unwrap_or_else(|| {
                    panic!("v{} read by v{} has no location", v.0, inst.idx.0)
                });
                self.record(AllocEvent::Use {
                    inst: inst.idx,
                    value: v,
                    loc,
                });
                self.backend.loc_operand(loc)
            }
        }
    }

    /// Whether operand `n` of `inst` dies here while held in a register.
    fn dies_in_reg(&self, inst: &Inst, n: usize) -> Option<HostReg> {
        let v = inst.iargs().get(n)?.value()?;
        if !inst.life.is_dead(n) {
            return None;
        }
        match self.state.value_loc[v.index()] {
            Some(Location::Reg(r)) => Some(r),
            _ => None,
        }
    }
}

/// Forward register allocation fused with code generation.
///
/// Walks the IR once in program order, assigning every used value a
/// host register or spill slot and emitting host code through the
/// backend. Returns the exits emitted and allocation counters.
pub fn regalloc_and_codegen(
    ctx: &mut Context,
    backend: &impl HostCodeGen,
    buf: &mut CodeRegion,
    helpers: &Helpers,
    trace: Option<&mut Vec<AllocEvent>>,
) -> (Vec<ExitSite>, AllocStats) {
    let mut ra = Allocator {
        backend,
        state: RegAllocState::new(ctx.num_insts(), backend.spill_slots()),
        stats: AllocStats::default(),
        trace,
    };
    let mut exits = Vec::new();
    let mut cycles = 0u32;

    for i in 0..ctx.num_insts() {
        let inst = ctx.insts()[i].clone();
        let def = inst.opc.def();

        if inst.opc == Opcode::InsnStart {
            cycles += 1;
            continue;
        }
        if !inst.is_live() {
            ra.stats.dead_skipped += 1;
            continue;
        }

        if def.is_call() {
            ra.spill_for_call(ctx, buf, &inst);
        }

        let mut args: Vec<Operand> = inst.iargs().iter().map(|&a| ra.operand(&inst, a)).collect();
        let operand_regs: Vec<HostReg> = args.iter().filter_map(|a| a.reg()).collect();

        // Result register.
        let mut out = None;
        let mut recycled = None;
        if def.has_result() && inst.uses > 0 {
            let commutative = def.flags.contains(OpFlags::COMMUTATIVE);
            let reg = if let Some(r) = ra.dies_in_reg(&inst, 0) {
                recycled = inst.args[0].value();
                r
            } else if let Some(r) = ra.dies_in_reg(&inst, 1).filter(|_| commutative) {
                recycled = inst.args[1].value();
                args.swap(0, 1);
                r
            } else {
                ra.alloc_reg(ctx, buf, &operand_regs)
            };
            if recycled.is_some() {
                ra.stats.recycled += 1;
            }
            out = Some(reg);
        }

        let env = OpEnv { helpers, cycles };
        if let Some(site) = backend.out_op(buf, &inst, out, &args, &env) {
            exits.push(site);
        }

        // Operands whose lifetime ends here.
        for (n, a) in inst.iargs().iter().enumerate() {
            if let Arg::Value(v) = *a {
                if inst.life.is_dead(n) && Some(v) != recycled {
                    ra.state.release(v);
                }
            }
        }
        if let Some(v) = recycled {
            ra.state.value_loc[v.index()] = None;
        }

        if let Some(reg) = out {
            ra.state.assign(reg, inst.idx);
            ra.record(AllocEvent::Def {
                value: inst.idx,
                reg,
            });
            ctx.inst_mut(inst.idx).loc = Some(Location::Reg(reg));
        }
    }

    (exits, ra.stats)
}
