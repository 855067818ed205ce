use dbt_backend::{CodeRegion, ExitSite, HostBlock, X86_64CodeGen};
use dbt_core::{BlockState, GuestMemory, MAX_BLOCK_EXITS};
use dbt_exec::shadow::{ShadowEntry, EMPTY_WORD};
use dbt_exec::{BlockCache, EngineConfig, Strategy, Translated};
use dbt_frontend::ppc::asm;

use super::{engine_with, small_config};

const A: u32 = 0x1000;

fn straight_line() -> Vec<u32> {
    vec![asm::nop(), asm::li(3, 1), asm::addi(3, 3, 2), asm::b(0x100)]
}

#[test]
fn translated_block_is_found_by_lookup() {
    for strategy in [Strategy::Ir, Strategy::Direct] {
        let code = straight_line();
        let mut engine = engine_with(EngineConfig { strategy, ..small_config() }, &[(A, &code)]);
        let index = engine.translate(A).unwrap();

        let b = engine.cache().block(index);
        assert_eq!(b.state, BlockState::Live);
        assert_eq!(b.start, A);
        assert_eq!(b.guest_insns, 4);
        assert_eq!(b.original_word, asm::nop());
        assert!(b.unchecked_entry > b.checked_entry);
        assert_eq!(engine.lookup(A), Some(index));
        assert_eq!(engine.lookup(A + 4), None);
        assert_eq!(engine.cache().shadow().entry(A), ShadowEntry::Sentinel(index));
        assert!(engine.memory().is_code(A + 12));
        assert_eq!(engine.stats().blocks_compiled, 1);
    }
}

#[test]
fn block_ends_at_branch() {
    let code = [asm::li(3, 1), asm::blr(), asm::li(3, 2)];
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    let index = engine.translate(A).unwrap();
    assert_eq!(engine.cache().block(index).guest_insns, 2);
    // Dynamic exits are never linkable.
    let exits = engine.cache().block(index).exits;
    assert!(exits.iter().flatten().all(|x| !x.is_linkable()));
}

#[test]
fn block_length_is_capped() {
    let code = [asm::nop(); 8];
    let config = EngineConfig {
        max_block_insns: 4,
        ..small_config()
    };
    let mut engine = engine_with(config, &[(A, &code)]);
    let index = engine.translate(A).unwrap();
    let b = engine.cache().block(index);
    assert_eq!(b.guest_insns, 4);
    assert_eq!(b.exits[0].and_then(|x| x.target), Some(A + 16));
}

#[test]
fn recompiling_replaces_the_old_block() {
    let code = straight_line();
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    let first = engine.translate(A).unwrap();
    let second = engine.translate(A).unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.cache().block(first).state, BlockState::Invalidated);
    assert_eq!(engine.lookup(A), Some(second));
    assert_eq!(engine.cache().live_count(), 1);
    // The replaced block's first word came back through the shadow.
    assert_eq!(engine.cache().block(second).original_word, asm::nop());
}

#[test]
fn overlapping_block_invalidates_older_one() {
    let code = straight_line();
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    let outer = engine.translate(A).unwrap();
    let inner = engine.translate(A + 8).unwrap();

    assert_eq!(engine.lookup(A), None);
    assert_eq!(engine.lookup(A + 8), Some(inner));
    assert!(!engine.cache().block(outer).is_live());
    assert_eq!(engine.cache().shadow().raw(A), asm::nop());
    assert_eq!(engine.cache().blocks_containing(A + 12), vec![inner]);
    assert!(engine.cache().blocks_containing(A).is_empty());
    assert_eq!(engine.stats().invalidations, 1);
}

#[test]
fn adjacent_blocks_coexist() {
    let code = [asm::blr(), asm::blr(), asm::blr()];
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    let ids: Vec<usize> = (0..3).map(|n| engine.translate(A + n * 4).unwrap()).collect();
    for (n, &id) in ids.iter().enumerate() {
        assert_eq!(engine.lookup(A + n as u32 * 4), Some(id));
    }
    assert_eq!(engine.cache().live_count(), 3);
}

#[test]
fn invalidate_range_drops_covering_blocks() {
    let code = straight_line();
    let mut engine = engine_with(small_config(), &[(A, &code), (0x2000, &[asm::blr()])]);
    engine.translate(A).unwrap();
    let other = engine.translate(0x2000).unwrap();

    assert_eq!(engine.invalidate_range(0x3000, 0x100).unwrap(), 0);
    assert_eq!(engine.invalidate_range(A + 12, 1).unwrap(), 1);
    assert_eq!(engine.lookup(A), None);
    assert_eq!(engine.lookup(0x2000), Some(other));
    // Already gone.
    assert_eq!(engine.invalidate_range(A, 16).unwrap(), 0);
}

#[test]
fn invalidated_words_are_fetched_again() {
    let code = straight_line();
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    engine.translate(A).unwrap();
    assert_eq!(engine.cache().shadow().raw(A + 4), asm::li(3, 1));

    // Untracked write: the shadow still holds the old word.
    engine.memory_mut().load_words(A + 4, &[asm::li(3, 9)]);
    engine.invalidate_range(A, 16).unwrap();
    assert_eq!(engine.cache().shadow().raw(A + 4), EMPTY_WORD);
    assert_eq!(engine.cache().shadow().raw(A), EMPTY_WORD);

    let index = engine.translate(A).unwrap();
    assert_eq!(engine.cache().shadow().raw(A + 4), asm::li(3, 9));
    assert_eq!(engine.lookup(A), Some(index));
}

#[test]
fn bus_writes_only_invalidate_code() {
    let code = straight_line();
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    engine.translate(A).unwrap();
    assert_eq!(engine.notify_guest_write(0x3000, 4).unwrap(), 0);
    assert!(engine.lookup(A).is_some());
    // Starts before the block, ends inside it.
    assert_eq!(engine.notify_guest_write(A - 0x10, 0x14).unwrap(), 1);
    assert!(engine.lookup(A).is_none());
}

#[test]
fn full_table_flushes_before_compiling() {
    let code = [asm::blr(); 4];
    let config = EngineConfig {
        max_blocks: 4,
        ..small_config()
    };
    let mut engine = engine_with(config, &[(A, &code)]);
    for n in 0..3 {
        assert!(!engine.is_full());
        engine.translate(A + n * 4).unwrap();
    }
    assert!(engine.is_full());

    let index = engine.translate(A + 12).unwrap();
    assert_eq!(index, 0);
    assert_eq!(engine.stats().flushes, 1);
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(engine.lookup(A), None);
    assert_eq!(engine.lookup(A + 12), Some(0));
}

#[test]
fn code_space_threshold_triggers_flush() {
    let words = vec![asm::blr(); 8192];
    let config = small_config();
    let threshold = config.flush_threshold;
    let mut engine = engine_with(config, &[(A, &words)]);
    let start_space = engine.space_remaining();

    let mut addr = A;
    while !engine.is_full() {
        let before = engine.space_remaining();
        engine.translate(addr).unwrap();
        assert!(engine.space_remaining() < before);
        addr += 4;
        assert!(addr < A + 8192 * 4, "region never filled");
    }
    assert!(engine.space_remaining() < threshold);
    assert_eq!(engine.stats().flushes, 0);

    engine.translate(addr).unwrap();
    assert_eq!(engine.stats().flushes, 1);
    assert_eq!(engine.cache().live_count(), 1);
    assert!(engine.space_remaining() > start_space - 1024);
}

#[test]
fn flush_forgets_everything() {
    let code = straight_line();
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    let space = engine.space_remaining();
    engine.translate(A).unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.space_remaining(), space);
    assert_eq!(engine.lookup(A), None);
    assert!(engine.cache().is_empty());
    assert_eq!(engine.cache().live_count(), 0);
    assert!(!engine.memory().is_code(A));
    assert_eq!(engine.cache().shadow().raw(A), EMPTY_WORD);
    assert!(!engine.is_full());
}

#[test]
fn restoring_state_drops_pending_writes_and_code() {
    let code = straight_line();
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    engine.translate(A).unwrap();
    assert!(engine.memory_mut().write_u32(A, asm::nop()));
    assert!(engine.memory().has_pending_writes());

    engine.on_state_restored().unwrap();
    assert!(!engine.memory().has_pending_writes());
    assert_eq!(engine.lookup(A), None);
    assert_eq!(engine.stats().flushes, 1);
}

/// Distance between two mirrors of the 64 KiB test RAM.
const MIRROR: u32 = 64 * 1024;

#[test]
fn mirrored_start_reads_through_sentinel() {
    for strategy in [Strategy::Ir, Strategy::Direct] {
        let code = straight_line();
        let mut engine = engine_with(EngineConfig { strategy, ..small_config() }, &[(A, &code)]);
        let first = engine.translate(A).unwrap();
        let second = engine.translate(A + MIRROR).unwrap();

        let b = engine.cache().block(second);
        assert_eq!(b.original_word, asm::nop(), "{strategy:?}");
        assert_eq!(b.guest_insns, 4, "{strategy:?}");
        // Both map the same RAM, only one stays live.
        assert_eq!(engine.cache().block(first).state, BlockState::Invalidated);
        assert_eq!(engine.lookup(A), None);
        assert_eq!(engine.lookup(A + MIRROR), Some(second));
        assert_eq!(engine.cache().shadow().entry(A), ShadowEntry::Sentinel(second));
        assert_eq!(engine.cache().blocks_containing(A + 4), vec![second]);
    }
}

#[test]
fn store_through_mirror_invalidates_block() {
    for strategy in [Strategy::Ir, Strategy::Direct] {
        let code = [asm::nop(), asm::li(3, 1), asm::blr()];
        let mut engine = engine_with(EngineConfig { strategy, ..small_config() }, &[(A, &code)]);
        let index = engine.translate(A).unwrap();

        assert!(engine.memory_mut().write_u32(A + MIRROR + 4, asm::li(3, 9)));
        engine.state_mut().pc = A;
        engine.step().unwrap();

        assert_eq!(engine.state().gpr[3], 9, "{strategy:?}");
        assert_eq!(engine.cache().block(index).state, BlockState::Invalidated);
        assert_eq!(engine.stats().invalidations, 1);
        let fresh = engine.lookup(A).unwrap();
        assert_ne!(fresh, index);
        assert_eq!(engine.cache().block(fresh).original_word, asm::nop());
    }
}

#[test]
fn invalidate_range_matches_any_mirror() {
    let code = straight_line();
    let mut engine = engine_with(small_config(), &[(A, &code)]);
    let index = engine.translate(A + 2 * MIRROR).unwrap();
    assert_eq!(engine.invalidate_range(A + 8, 4).unwrap(), 1);
    assert_eq!(engine.cache().block(index).state, BlockState::Invalidated);
    assert_eq!(engine.cache().shadow().raw(A), asm::nop());
}

#[test]
fn block_stops_at_end_of_ram() {
    let end = MIRROR - 8;
    let mut engine = engine_with(small_config(), &[(end, &[asm::nop(), asm::nop()])]);
    let index = engine.translate(end).unwrap();
    let b = engine.cache().block(index);
    assert_eq!(b.guest_insns, 2);
    assert_eq!(b.exits[0].and_then(|x| x.target), Some(MIRROR));
}

#[test]
#[should_panic(expected = "exits")]
fn finalize_rejects_too_many_exits() {
    let mut cache = BlockCache::new(16, 64 * 1024);
    let mut mem = GuestMemory::new(64 * 1024);
    let mut region = CodeRegion::new(64 * 1024).unwrap();
    let backend = X86_64CodeGen::new();
    let exit = ExitSite {
        target: None,
        jump_offset: None,
    };
    let translated = Translated {
        host: HostBlock {
            exits: vec![exit; MAX_BLOCK_EXITS + 1],
            ..HostBlock::default()
        },
        guest_insns: 1,
        first_word: asm::nop(),
        fallbacks: 0,
    };
    let index = cache.allocate(A);
    cache.finalize(index, &translated, &mut mem, &mut region, &backend, false);
}
