//! IR dump: human-readable text output of a block's IR, annotated
//! with liveness and allocation results when present.

use std::fmt::Write as FmtWrite;
use std::io::Write;

use crate::context::Context;
use crate::op::{Arg, Inst};
use crate::opcode::Opcode;
use crate::state::{
    CR_OFFSET, CTR_OFFSET, DOWNCOUNT_OFFSET, EXCEPTIONS_OFFSET, LR_OFFSET, PC_OFFSET,
    XER_OFFSET,
};
use crate::types::{Cond, Location};

fn cond_name(c: u32) -> &'static str {
    match Cond::from_raw(c) {
        Some(Cond::Eq) => "eq",
        Some(Cond::Ne) => "ne",
        Some(Cond::Lt) => "lt",
        Some(Cond::Ge) => "ge",
        Some(Cond::Le) => "le",
        Some(Cond::Gt) => "gt",
        Some(Cond::Ltu) => "ltu",
        Some(Cond::Geu) => "geu",
        Some(Cond::Leu) => "leu",
        Some(Cond::Gtu) => "gtu",
        None => "???",
    }
}

/// Name of a guest state field by offset.
fn state_name(off: u32, buf: &mut String) {
    match off {
        o if o < PC_OFFSET => write!(buf, "r{}", o / 4).unwrap_or(()),
        PC_OFFSET => buf.push_str("pc"),
        LR_OFFSET => buf.push_str("lr"),
        CTR_OFFSET => buf.push_str("ctr"),
        CR_OFFSET => buf.push_str("cr"),
        XER_OFFSET => buf.push_str("xer"),
        DOWNCOUNT_OFFSET => buf.push_str("downcount"),
        EXCEPTIONS_OFFSET => buf.push_str("exceptions"),
        _ => write!(buf, "env+{off}").unwrap_or(()),
    }
}

fn fmt_arg(a: Arg, buf: &mut String) {
    match a {
        Arg::Value(v) => write!(buf, "v{}", v.0).unwrap_or(()),
        Arg::Imm(x) => write!(buf, "$0x{x:x}").unwrap_or(()),
    }
}

fn fmt_inst(inst: &Inst, buf: &mut String) {
    let def = inst.opc.def();
    if def.has_result() {
        write!(buf, " v{} = {}", inst.idx.0, def.name).unwrap_or(());
    } else {
        write!(buf, " {}", def.name).unwrap_or(());
    }

    let mut first = true;
    let mut sep = |buf: &mut String| {
        buf.push_str(if first { " " } else { ", " });
        first = false;
    };
    match inst.opc {
        Opcode::LoadState => {
            sep(buf);
            state_name(inst.aux, buf);
        }
        Opcode::StoreState => {
            sep(buf);
            state_name(inst.aux, buf);
        }
        _ => {}
    }
    for &a in inst.iargs() {
        sep(buf);
        fmt_arg(a, buf);
    }
    match inst.opc {
        Opcode::SetCond => {
            sep(buf);
            buf.push_str(cond_name(inst.aux));
        }
        Opcode::Exit | Opcode::ExitIf => {
            sep(buf);
            write!(buf, "-> 0x{:08x}", inst.aux).unwrap_or(());
        }
        Opcode::CallInterp => {
            sep(buf);
            write!(buf, "word=0x{:08x}", inst.aux).unwrap_or(());
        }
        _ => {}
    }
}

fn fmt_life(inst: &Inst, buf: &mut String) {
    let def = inst.opc.def();
    let mut notes = Vec::new();
    if def.has_result() {
        if inst.uses == 0 {
            notes.push("dead".to_string());
        } else {
            let last = inst.last_use.map_or(0, |u| u.0);
            notes.push(format!("uses={} last=v{last}", inst.uses));
        }
        match inst.loc {
            Some(Location::Reg(r)) => notes.push(format!("reg={r}")),
            Some(Location::Spill(s)) => notes.push(format!("slot={s}")),
            None => {}
        }
    }
    let dead: Vec<String> = (0..def.nb_iargs as usize)
        .filter(|&n| inst.life.is_dead(n))
        .map(|n| n.to_string())
        .collect();
    if !dead.is_empty() {
        notes.push(format!("dies:{}", dead.join(",")));
    }
    if !notes.is_empty() {
        write!(buf, "  ; {}", notes.join(" ")).unwrap_or(());
    }
}

/// Dump all IR instructions in `ctx` to the given writer.
pub fn dump_insts(ctx: &Context, w: &mut impl Write) -> std::io::Result<()> {
    dump_insts_with(ctx, w, |_, _| Ok(()))
}

/// Dump IR with an annotation callback at each guest instruction
/// boundary, called with `(pc, writer)` on the `---- 0x...` line.
pub fn dump_insts_with(
    ctx: &Context,
    w: &mut impl Write,
    insn_anno: impl Fn(u32, &mut dyn Write) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let mut buf = String::with_capacity(128);
    for inst in ctx.insts() {
        if inst.opc == Opcode::InsnStart {
            write!(w, " ---- 0x{:08x}", inst.aux)?;
            insn_anno(inst.aux, w)?;
            writeln!(w)?;
            continue;
        }
        buf.clear();
        fmt_inst(inst, &mut buf);
        fmt_life(inst, &mut buf);
        writeln!(w, "{buf}")?;
    }
    Ok(())
}
