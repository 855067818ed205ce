use dbt_frontend::ppc::asm;

use super::{config, exit, li32, load, run, Mode, ENTRY, MODES};

const SUB: u32 = ENTRY + 0x100;

/// Calls `SUB`, patches its first instruction with a guest store and
/// calls it again. Exits with the sum of both results.
fn patching_program() -> Vec<u32> {
    let mut code = vec![asm::bl(0x100), asm::mr(20, 3)];
    code.extend(li32(5, asm::li(3, 42)));
    code.extend(li32(6, SUB));
    code.push(asm::stw(5, 6, 0));
    let call = ENTRY + 4 * code.len() as u32;
    code.push(asm::bl((SUB - call) as i32));
    code.push(asm::add(3, 3, 20));
    code.extend(exit());
    code.resize(0x100 / 4, asm::nop());
    code.extend([asm::li(3, 1), asm::blr()]);
    code
}

#[test]
fn guest_store_retranslates_patched_code() {
    let code = patching_program();
    for mode in MODES {
        let engine = run(mode, &code);
        assert_eq!(engine.guest().exit_code, Some(43), "{mode:?}");
        if mode != Mode::Interp {
            assert!(engine.stats().invalidations >= 1, "{mode:?}");
            // Entry, SUB twice, the code after each call.
            assert!(engine.stats().blocks_compiled >= 4, "{mode:?}");
        }
    }
}

#[test]
fn patched_block_is_relinked() {
    let mut engine = load(config(Mode::Ir), &patching_program());
    engine.run().unwrap();
    let stats = engine.stats();
    assert!(stats.unlinks >= 1);
    let index = engine.lookup(SUB).unwrap();
    assert_eq!(engine.cache().block(index).start, SUB);
}

#[test]
fn host_patch_needs_invalidation() {
    for mode in [Mode::Ir, Mode::Direct] {
        let code = [vec![asm::li(3, 5)], exit().to_vec()].concat();
        let mut engine = load(config(mode), &code);
        engine.run().unwrap();
        assert_eq!(engine.guest().exit_code, Some(5));

        // Without notice the stale translation runs again.
        engine.memory_mut().load_words(ENTRY, &[asm::li(3, 6)]);
        engine.guest_mut().exit_code = None;
        engine.state_mut().pc = ENTRY;
        engine.run().unwrap();
        assert_eq!(engine.guest().exit_code, Some(5), "{mode:?}");

        assert_eq!(engine.invalidate_range(ENTRY, 4).unwrap(), 1);
        engine.guest_mut().exit_code = None;
        engine.state_mut().pc = ENTRY;
        engine.run().unwrap();
        assert_eq!(engine.guest().exit_code, Some(6), "{mode:?}");
    }
}

#[test]
fn loop_rewriting_its_own_increment() {
    // Each pass adds the immediate of the `addi` at `PATCH`, then bumps
    // that immediate by one through a guest store.
    const PATCH: u32 = ENTRY + 0x40;
    let mut code = vec![asm::li(3, 0), asm::li(7, 4), asm::mtctr(7)];
    code.extend(li32(6, PATCH));
    // loop:
    let head = ENTRY + 4 * code.len() as u32;
    code.push(asm::bl((PATCH - head) as i32));
    code.extend([asm::lwz(5, 6, 0), asm::addi(5, 5, 1), asm::stw(5, 6, 0)]);
    let back = ENTRY + 4 * code.len() as u32;
    code.push(asm::bdnz(head.wrapping_sub(back) as i32 as i16));
    code.extend(exit());
    code.resize(0x40 / 4, asm::nop());
    code.extend([asm::addi(3, 3, 1), asm::blr()]);

    for mode in MODES {
        let engine = run(mode, &code);
        // 1 + 2 + 3 + 4
        assert_eq!(engine.guest().exit_code, Some(10), "{mode:?}");
    }
}
