use dbt_backend::x86_64::emitter::{jmp_rel32_target, patch_jmp_rel32};
use dbt_backend::x86_64::{ArithOp, Reg, X64Emitter, X86Cond};
use dbt_backend::{CodeRegion, Operand, Width};
use dbt_core::Cond;

fn emit(f: impl FnOnce(&mut X64Emitter<'_>)) -> Vec<u8> {
    let mut buf = CodeRegion::new(4096).unwrap();
    f(&mut X64Emitter::new(&mut buf));
    buf.as_slice().to_vec()
}

#[test]
fn simple_encodings() {
    assert_eq!(emit(|e| e.ret()), [0xC3]);
    assert_eq!(emit(|e| e.push(Reg::Rbp)), [0x55]);
    assert_eq!(emit(|e| e.push(Reg::R12)), [0x41, 0x54]);
    assert_eq!(emit(|e| e.pop(Reg::Rbx)), [0x5B]);
    assert_eq!(
        emit(|e| e.mov(Width::W32, Reg::Rax.op(), Reg::Rcx.op())),
        [0x89, 0xC8]
    );
    assert_eq!(
        emit(|e| e.alu(ArithOp::Add, Width::W32, Reg::Rax.op(), Operand::imm32(1))),
        [0x83, 0xC0, 0x01]
    );
}

#[test]
fn mov_abs_uses_full_immediate() {
    let code = emit(|e| e.mov_abs(Reg::Rax, 0x1122_3344_5566_7788));
    assert_eq!(code[..2], [0x48, 0xB8]);
    assert_eq!(code[2..], 0x1122_3344_5566_7788u64.to_le_bytes());
}

#[test]
fn patchable_jump() {
    let mut buf = CodeRegion::new(4096).unwrap();
    buf.emit_bytes(&[0x90; 8]);
    let jump = X64Emitter::new(&mut buf).jmp_rel32(0);
    assert_eq!(jump, 8);
    assert_eq!(buf.read_u8(jump), 0xE9);
    assert_eq!(jmp_rel32_target(&buf, jump), 0);

    buf.emit_bytes(&[0x90; 64]);
    patch_jmp_rel32(&mut buf, jump, 70);
    assert_eq!(jmp_rel32_target(&buf, jump), 70);
}

#[test]
#[should_panic(expected = "no jmp rel32")]
fn patching_a_non_jump_panics() {
    let mut buf = CodeRegion::new(4096).unwrap();
    buf.emit_bytes(&[0x90; 8]);
    patch_jmp_rel32(&mut buf, 0, 4);
}

#[test]
fn fixups_bind_forward() {
    let mut buf = CodeRegion::new(4096).unwrap();
    let mut e = X64Emitter::new(&mut buf);
    let skip = e.jcc_fixup(X86Cond::Je, true);
    e.ret();
    e.bind(skip);
    assert_eq!(buf.as_slice(), [0x74, 0x01, 0xC3]);

    let mut buf = CodeRegion::new(4096).unwrap();
    let mut e = X64Emitter::new(&mut buf);
    let skip = e.jmp_fixup(false);
    e.ret();
    e.bind(skip);
    assert_eq!(buf.as_slice(), [0xE9, 0x01, 0x00, 0x00, 0x00, 0xC3]);
}

#[test]
fn short_backward_branch() {
    let code = emit(|e| e.jmp(0));
    assert_eq!(code, [0xEB, 0xFE]);
}

#[test]
fn condition_mapping() {
    for cond in Cond::ALL {
        let x = X86Cond::from_cond(cond);
        assert_eq!(x.invert().invert(), x);
        assert_eq!(X86Cond::from_cond(cond.invert()), x.invert());
    }
    assert_eq!(X86Cond::from_cond(Cond::Ltu), X86Cond::Jb);
    assert_eq!(X86Cond::from_cond(Cond::Gt), X86Cond::Jg);
}

#[test]
fn jumps_pick_rel8_while_it_reaches() {
    assert_eq!(emit(|e| e.jmp(129)), [0xEB, 0x7F]);
    assert_eq!(emit(|e| e.jmp(130)), [0xE9, 0x7D, 0x00, 0x00, 0x00]);
    assert_eq!(emit(|e| e.jcc(X86Cond::Je, 129)), [0x74, 0x7F]);
    assert_eq!(
        emit(|e| e.jcc(X86Cond::Je, 200)),
        [0x0F, 0x84, 0xC2, 0x00, 0x00, 0x00]
    );
}

#[test]
fn backward_jumps_switch_to_rel32() {
    let code = emit(|e| {
        e.nops(200);
        e.jmp(74);
    });
    assert_eq!(code[200..], [0xEB, 0x80]);

    let code = emit(|e| {
        e.nops(200);
        e.jcc(X86Cond::Jne, 0);
    });
    assert_eq!(code[200..], [0x0F, 0x85, 0x32, 0xFF, 0xFF, 0xFF]);

    let code = emit(|e| {
        e.nops(200);
        e.jmp(0);
    });
    assert_eq!(code[200..], [0xE9, 0x33, 0xFF, 0xFF, 0xFF]);
}

#[test]
#[should_panic(expected = "cannot reach")]
fn short_fixup_out_of_range_panics() {
    let mut buf = CodeRegion::new(4096).unwrap();
    let mut e = X64Emitter::new(&mut buf);
    let skip = e.jcc_fixup(X86Cond::Je, true);
    e.nops(200);
    e.bind(skip);
}

#[test]
fn base_register_special_cases() {
    let load = |base: Reg, disp: i32| {
        emit(|e| e.mov(Width::W32, Reg::Rax.op(), Operand::mem(base as u8, disp)))
    };
    // RSP and R12 bases need a SIB byte.
    assert_eq!(load(Reg::Rsp, 8), [0x8B, 0x44, 0x24, 0x08]);
    assert_eq!(load(Reg::Rsp, 0), [0x8B, 0x04, 0x24]);
    assert_eq!(load(Reg::R12, 0), [0x41, 0x8B, 0x04, 0x24]);
    // RBP and R13 have no disp-less form.
    assert_eq!(load(Reg::Rbp, 0), [0x8B, 0x45, 0x00]);
    assert_eq!(load(Reg::R13, 0), [0x41, 0x8B, 0x45, 0x00]);
    assert_eq!(load(Reg::Rbp, 0x1000), [0x8B, 0x85, 0x00, 0x10, 0x00, 0x00]);
    assert_eq!(load(Reg::Rbx, 0), [0x8B, 0x03]);
    assert_eq!(load(Reg::Rbx, -4), [0x8B, 0x43, 0xFC]);
}

#[test]
fn scaled_index_encodings() {
    let sib = |base: Reg, index: Reg, scale: u8, disp: i32| Operand::Sib {
        base: base as u8,
        index: index as u8,
        scale,
        disp,
    };
    assert_eq!(
        emit(|e| e.lea(Width::W32, Reg::Rax as u8, sib(Reg::Rbx, Reg::Rcx, 4, 0x10))),
        [0x8D, 0x44, 0x8B, 0x10]
    );
    assert_eq!(
        emit(|e| e.mov(Width::W32, Reg::Rax.op(), sib(Reg::Rbx, Reg::Rcx, 1, 0))),
        [0x8B, 0x04, 0x0B]
    );
    assert_eq!(
        emit(|e| e.mov(Width::W32, Reg::Rax.op(), sib(Reg::Rbp, Reg::Rcx, 8, 0))),
        [0x8B, 0x44, 0xCD, 0x00]
    );
    assert_eq!(
        emit(|e| e.mov(Width::W32, Reg::Rax.op(), sib(Reg::R13, Reg::R9, 2, 0))),
        [0x43, 0x8B, 0x44, 0x4D, 0x00]
    );
    assert_eq!(
        emit(|e| e.lea(Width::W64, Reg::Rdx as u8, sib(Reg::Rax, Reg::Rsi, 2, 0x100))),
        [0x48, 0x8D, 0x94, 0x70, 0x00, 0x01, 0x00, 0x00]
    );
}
