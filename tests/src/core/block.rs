use dbt_core::{BlockState, ExitRecord, JitBlock};

#[test]
fn new_block_is_compiling() {
    let b = JitBlock::new(3, 0x1000);
    assert_eq!(b.index, 3);
    assert_eq!(b.state, BlockState::Compiling);
    assert!(!b.is_live());
    assert_eq!(b.exits, [None, None]);
    assert!(b.incoming.is_empty());
}

#[test]
fn guest_range() {
    let mut b = JitBlock::new(0, 0x1000);
    b.guest_insns = 4;
    assert_eq!(b.guest_len(), 16);
    assert_eq!(b.last_byte(), 0x100f);
    assert!(b.contains(0x1000));
    assert!(b.contains(0x100f));
    assert!(!b.contains(0x1010));
    assert!(!b.contains(0xfff));
}

#[test]
fn overlap_edges() {
    let mut b = JitBlock::new(0, 0x1000);
    b.guest_insns = 2;
    assert!(b.overlaps(0xffc, 5));
    assert!(!b.overlaps(0xffc, 4));
    assert!(b.overlaps(0x1007, 1));
    assert!(!b.overlaps(0x1008, 4));
    assert!(!b.overlaps(0x1000, 0));
    // Ranges running off the top of the space saturate.
    assert!(b.overlaps(0x1004, u32::MAX));
}

#[test]
fn linkable_exits() {
    assert!(ExitRecord::new(Some(0x100), Some(40)).is_linkable());
    assert!(!ExitRecord::new(None, None).is_linkable());
    assert!(!ExitRecord::new(Some(0x100), None).is_linkable());
}
