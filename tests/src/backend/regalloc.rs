//! Register allocation checked against its own event trace.

use std::collections::HashMap;

use dbt_backend::{translate, AllocEvent, CodeRegion, Helpers, HostCodeGen, X86_64CodeGen};
use dbt_core::{Arg, Context, InstIdx, Location, MemSize};
use proptest::prelude::*;

/// Replay `events`, checking that every use reads the location its
/// value was last placed in and that nothing clobbered it since.
fn check_trace(events: &[AllocEvent]) {
    let mut regs: HashMap<u8, InstIdx> = HashMap::new();
    let mut slots: HashMap<u32, InstIdx> = HashMap::new();
    for (n, ev) in events.iter().enumerate() {
        match *ev {
            AllocEvent::Def { value, reg } => {
                regs.insert(reg, value);
            }
            AllocEvent::Spill { value, reg, slot } => {
                assert_eq!(regs.get(&reg), Some(&value), "event {n}: spilled {value:?} not in {reg}");
                slots.insert(slot, value);
                regs.remove(&reg);
            }
            AllocEvent::Clobber { reg } => {
                regs.remove(&reg);
            }
            AllocEvent::Use { inst, value, loc } => {
                let held = match loc {
                    Location::Reg(r) => regs.get(&r),
                    Location::Spill(s) => slots.get(&s),
                };
                assert_eq!(held, Some(&value), "event {n}: {inst:?} reads {value:?} from {loc:?}");
            }
        }
    }
}

fn compile(ctx: &mut Context) -> (dbt_backend::HostBlock, Vec<AllocEvent>) {
    let mut buf = CodeRegion::new(256 * 1024).unwrap();
    let mut backend = X86_64CodeGen::new();
    backend.emit_prologue(&mut buf);
    backend.emit_epilogue(&mut buf);
    let mut trace = Vec::new();
    let block = translate(ctx, &backend, &mut buf, &Helpers::default(), Some(&mut trace));
    (block, trace)
}

#[derive(Debug, Clone)]
enum Step {
    Load(usize),
    Binary(u8, usize, usize),
    Imm(usize, u32),
    MemLoad(usize),
    MemStore(usize, usize),
    Store(usize, usize),
    ExitIf(usize),
    Interp,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0usize..32).prop_map(Step::Load),
        8 => (0u8..10, any::<usize>(), any::<usize>()).prop_map(|(op, a, b)| Step::Binary(op, a, b)),
        2 => (any::<usize>(), any::<u32>()).prop_map(|(a, x)| Step::Imm(a, x)),
        1 => any::<usize>().prop_map(Step::MemLoad),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Step::MemStore(a, b)),
        2 => (0usize..32, any::<usize>()).prop_map(|(r, a)| Step::Store(r, a)),
        1 => any::<usize>().prop_map(Step::ExitIf),
        1 => Just(Step::Interp),
    ]
}

fn build(steps: &[Step]) -> Context {
    let mut ctx = Context::new();
    ctx.gen_insn_start(0x1000);
    let mut vals: Vec<Arg> = vec![ctx.gen_load_gpr(1)];
    let pick = |vals: &Vec<Arg>, i: usize| vals[i % vals.len()];
    for step in steps {
        match *step {
            Step::Load(r) => vals.push(ctx.gen_load_gpr(r)),
            Step::Binary(op, a, b) => {
                let (a, b) = (pick(&vals, a), pick(&vals, b));
                let v = match op {
                    0 => ctx.gen_add(a, b),
                    1 => ctx.gen_sub(a, b),
                    2 => ctx.gen_mul(a, b),
                    3 => ctx.gen_and(a, b),
                    4 => ctx.gen_or(a, b),
                    5 => ctx.gen_xor(a, b),
                    6 => ctx.gen_shl(a, b),
                    7 => ctx.gen_sar(a, b),
                    8 => ctx.gen_rotl(a, b),
                    _ => ctx.gen_setcond(dbt_core::Cond::Ltu, a, b),
                };
                vals.push(v);
            }
            Step::Imm(a, x) => {
                let a = pick(&vals, a);
                vals.push(ctx.gen_add(a, Arg::Imm(x)));
            }
            Step::MemLoad(a) => {
                let a = pick(&vals, a);
                vals.push(ctx.gen_load(MemSize::U32, a));
            }
            Step::MemStore(a, b) => {
                let (a, b) = (pick(&vals, a), pick(&vals, b));
                ctx.gen_store(MemSize::U32, a, b);
            }
            Step::Store(r, a) => {
                let a = pick(&vals, a);
                ctx.gen_store_gpr(r, a);
            }
            // A constant condition would fold into an unconditional exit.
            Step::ExitIf(a) => {
                if let a @ Arg::Value(_) = pick(&vals, a) {
                    ctx.gen_exit_if(a, 0x2000);
                }
            }
            Step::Interp => {
                ctx.gen_insn_start(ctx.current_pc() + 4);
                ctx.gen_call_interp(0x6000_0000);
            }
        }
    }
    // Keep a handful of values alive to the end.
    for (n, &v) in vals.iter().rev().take(8).enumerate() {
        ctx.gen_store_gpr(n, v);
    }
    ctx.gen_exit(0x1004);
    ctx
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn random_blocks_allocate_consistently(steps in prop::collection::vec(arb_step(), 1..96)) {
        let mut ctx = build(&steps);
        let (block, trace) = compile(&mut ctx);
        check_trace(&trace);
        prop_assert!(block.host_size > 0);
        prop_assert!(block.exits.last().is_some_and(|x| x.target == Some(0x1004)));
    }
}

#[test]
fn pressure_forces_spills() {
    let mut ctx = Context::new();
    ctx.gen_insn_start(0);
    let vals: Vec<Arg> = (0..32).map(|r| ctx.gen_load_gpr(r)).collect();
    // Consume in reverse so every value stays live across the loads.
    let mut acc = vals[31];
    for &v in vals.iter().rev().skip(1) {
        acc = ctx.gen_xor(acc, v);
    }
    for (r, &v) in vals.iter().enumerate() {
        let sum = ctx.gen_add(v, acc);
        ctx.gen_store_gpr(r, sum);
    }
    ctx.gen_exit(4);

    let (block, trace) = compile(&mut ctx);
    check_trace(&trace);
    assert!(block.stats.spills > 0);
    assert!(block.stats.slots_used > 0);
}

#[test]
fn calls_clobber_caller_saved_registers() {
    let mut ctx = Context::new();
    ctx.gen_insn_start(0);
    let a = ctx.gen_load_gpr(3);
    let b = ctx.gen_load_gpr(4);
    let v = ctx.gen_load(MemSize::U32, a);
    let sum = ctx.gen_add(v, b);
    ctx.gen_store_gpr(5, sum);
    ctx.gen_exit(4);

    let (_, trace) = compile(&mut ctx);
    check_trace(&trace);
    let backend = X86_64CodeGen::new();
    let clobbered: Vec<u8> = trace
        .iter()
        .filter_map(|e| match *e {
            AllocEvent::Clobber { reg } => Some(reg),
            _ => None,
        })
        .collect();
    assert_eq!(clobbered.len(), backend.caller_saved().count() as usize);
}

#[test]
fn unused_values_are_skipped() {
    let mut ctx = Context::new();
    ctx.gen_insn_start(0);
    let a = ctx.gen_load_gpr(3);
    ctx.gen_add(a, Arg::Imm(1));
    ctx.gen_exit(4);

    let (block, trace) = compile(&mut ctx);
    assert_eq!(block.stats.dead_skipped, 2);
    assert!(trace.is_empty());
}

#[test]
fn dying_operand_register_is_recycled() {
    let mut ctx = Context::new();
    ctx.gen_insn_start(0);
    let a = ctx.gen_load_gpr(3);
    let b = ctx.gen_add(a, Arg::Imm(1));
    let c = ctx.gen_xor(b, Arg::Imm(2));
    ctx.gen_store_gpr(3, c);
    ctx.gen_exit(4);

    let (block, trace) = compile(&mut ctx);
    check_trace(&trace);
    assert!(block.stats.recycled >= 1);
}
