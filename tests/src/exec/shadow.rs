use dbt_core::GuestMemory;
use dbt_exec::shadow::{sentinel, ShadowEntry, ShadowTable, EMPTY_WORD};
use dbt_exec::BlockCache;
use dbt_frontend::ppc::asm;

#[test]
fn entries_decode() {
    assert_eq!(ShadowEntry::from_raw(EMPTY_WORD), ShadowEntry::Empty);
    assert_eq!(ShadowEntry::from_raw(sentinel(7)), ShadowEntry::Sentinel(7));
    assert_eq!(ShadowEntry::from_raw(asm::blr()), ShadowEntry::Word(asm::blr()));
}

#[test]
fn fresh_table_is_empty() {
    let t = ShadowTable::new(4096);
    assert_eq!(t.len(), 1024);
    assert!((0..4096).step_by(4).all(|a| t.entry(a) == ShadowEntry::Empty));
}

#[test]
fn install_and_restore() {
    let mut t = ShadowTable::new(4096);
    t.set_word(0x100, asm::nop());
    assert_eq!(t.install(0x100, 3), asm::nop());
    assert_eq!(t.entry(0x100), ShadowEntry::Sentinel(3));

    // Only the owning block's sentinel is replaced.
    assert!(!t.restore(0x100, 4, 0xdead_beef));
    assert!(t.restore(0x100, 3, asm::nop()));
    assert_eq!(t.raw(0x100), asm::nop());
}

#[test]
fn addresses_mirror_like_guest_ram() {
    let mut t = ShadowTable::new(4096);
    t.set_word(0x1004, asm::nop());
    assert_eq!(t.raw(0x4), asm::nop());
}

#[test]
fn forget_respects_keep() {
    let mut t = ShadowTable::new(4096);
    for a in [0x10, 0x14, 0x18] {
        t.set_word(a, asm::nop());
    }
    t.install(0x14, 1);
    // Unaligned range still covers every word it touches.
    t.forget(0x12, 7, |_, raw| raw == sentinel(1));
    assert_eq!(t.raw(0x10), EMPTY_WORD);
    assert_eq!(t.entry(0x14), ShadowEntry::Sentinel(1));
    assert_eq!(t.raw(0x18), EMPTY_WORD);
}

#[test]
fn fetch_caches_words() {
    let mut cache = BlockCache::new(16, 4096);
    let mut mem = GuestMemory::new(4096);
    mem.load_words(0x40, &[asm::li(3, 1)]);
    assert_eq!(cache.fetch(0x40, &mem), asm::li(3, 1));
    assert_eq!(cache.shadow().raw(0x40), asm::li(3, 1));

    // Stale until forgotten.
    mem.load_words(0x40, &[asm::li(3, 2)]);
    assert_eq!(cache.fetch(0x40, &mem), asm::li(3, 1));
    cache.forget_words(0x40, 4);
    assert_eq!(cache.fetch(0x40, &mem), asm::li(3, 2));
}

#[test]
fn sentinel_shaped_word_is_not_a_block() {
    let mut cache = BlockCache::new(16, 4096);
    let mut mem = GuestMemory::new(4096);
    mem.load_words(0x40, &[5]);
    assert_eq!(cache.fetch(0x40, &mem), 5);
    assert_eq!(cache.lookup(0x40), None);
    assert_eq!(cache.fetch(0x40, &mem), 5);
}
