//! Random straight-line integer code must leave the same architectural
//! state under the IR strategy, the direct strategy and the
//! interpreter.

use dbt_frontend::ppc::asm;
use proptest::prelude::*;

use super::{arch_state, exit, li32, run, Mode, MODES};

/// Registers the generated code works on.
fn reg() -> impl Strategy<Value = u32> {
    3u32..12
}

fn alu_insn() -> impl Strategy<Value = u32> {
    prop_oneof![
        (reg(), reg(), any::<i16>()).prop_map(|(d, a, i)| asm::addi(d, a, i)),
        (reg(), reg(), any::<i16>()).prop_map(|(d, a, i)| asm::addis(d, a, i)),
        (reg(), reg(), any::<i16>()).prop_map(|(d, a, i)| asm::addic(d, a, i)),
        (reg(), reg(), any::<i16>()).prop_map(|(d, a, i)| asm::mulli(d, a, i)),
        (reg(), reg(), any::<u16>()).prop_map(|(a, s, i)| asm::ori(a, s, i)),
        (reg(), reg(), any::<u16>()).prop_map(|(a, s, i)| asm::xori(a, s, i)),
        (reg(), reg(), any::<u16>()).prop_map(|(a, s, i)| asm::andi_rc(a, s, i)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::add(d, a, b)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::add_rc(d, a, b)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::addo(d, a, b)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::addc(d, a, b)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::adde(d, a, b)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::subf(d, a, b)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::subfc(d, a, b)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::mullw(d, a, b)),
        (reg(), reg(), reg()).prop_map(|(d, a, b)| asm::mulhwu(d, a, b)),
        (reg(), reg()).prop_map(|(d, a)| asm::neg(d, a)),
        (reg(), reg(), reg()).prop_map(|(a, s, b)| asm::and(a, s, b)),
        (reg(), reg(), reg()).prop_map(|(a, s, b)| asm::andc(a, s, b)),
        (reg(), reg(), reg()).prop_map(|(a, s, b)| asm::or(a, s, b)),
        (reg(), reg(), reg()).prop_map(|(a, s, b)| asm::xor(a, s, b)),
        (reg(), reg(), reg()).prop_map(|(a, s, b)| asm::nor(a, s, b)),
        (reg(), reg(), reg()).prop_map(|(a, s, b)| asm::slw(a, s, b)),
        (reg(), reg(), reg()).prop_map(|(a, s, b)| asm::srw(a, s, b)),
        (reg(), reg(), reg()).prop_map(|(a, s, b)| asm::sraw(a, s, b)),
        (reg(), reg(), 0u32..32).prop_map(|(a, s, n)| asm::srawi(a, s, n)),
        (reg(), reg()).prop_map(|(a, s)| asm::extsb(a, s)),
        (reg(), reg()).prop_map(|(a, s)| asm::extsh(a, s)),
        (reg(), reg()).prop_map(|(a, s)| asm::cntlzw(a, s)),
        (reg(), reg(), 0u32..32, 0u32..32, 0u32..32)
            .prop_map(|(a, s, sh, mb, me)| asm::rlwinm(a, s, sh, mb, me)),
        (reg(), reg(), 0u32..32, 0u32..32, 0u32..32)
            .prop_map(|(a, s, sh, mb, me)| asm::rlwimi(a, s, sh, mb, me)),
        (0u32..8, reg(), reg()).prop_map(|(f, a, b)| asm::cmpw(f, a, b)),
        (0u32..8, reg(), reg()).prop_map(|(f, a, b)| asm::cmplw(f, a, b)),
        (0u32..8, reg(), any::<i16>()).prop_map(|(f, a, i)| asm::cmpwi(f, a, i)),
        (0u32..8, reg(), any::<u16>()).prop_map(|(f, a, i)| asm::cmplwi(f, a, i)),
        (reg()).prop_map(asm::mfcr),
        (reg()).prop_map(asm::mtctr),
        (reg()).prop_map(asm::mtlr),
        (reg()).prop_map(asm::mflr),
    ]
}

fn program() -> impl Strategy<Value = Vec<u32>> {
    (
        prop::array::uniform9(any::<u32>()),
        prop::collection::vec(alu_insn(), 1..64),
    )
        .prop_map(|(seeds, body)| {
            let mut code = Vec::new();
            for (r, v) in (3..).zip(seeds) {
                code.extend(li32(r, v));
            }
            code.extend(body);
            code.extend(exit());
            code
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn strategies_agree_with_interpreter(code in program()) {
        let reference = arch_state(run(Mode::Interp, &code).state());
        for mode in MODES {
            let engine = run(mode, &code);
            prop_assert_eq!(arch_state(engine.state()), reference, "{:?}", mode);
        }
    }
}
