use dbt_backend::code_region::TRAP_FILL;
use dbt_backend::{CodeRegion, Phase};

#[test]
fn emit_and_read() {
    let mut buf = CodeRegion::new(4096).unwrap();
    buf.emit_u8(0x90);
    buf.emit_u32(0xDEAD_BEEF);
    assert_eq!(buf.offset(), 5);
    assert_eq!(buf.as_slice()[0], 0x90);
    assert_eq!(buf.read_u32(1), 0xDEAD_BEEF);
    assert_eq!(buf.remaining(), buf.capacity() - 5);
}

#[test]
fn patch() {
    let mut buf = CodeRegion::new(4096).unwrap();
    buf.emit_u32(0);
    buf.patch_u32(0, 0x1234_5678);
    assert_eq!(buf.read_u32(0), 0x1234_5678);
}

#[test]
fn size_rounds_to_pages() {
    let buf = CodeRegion::new(100).unwrap();
    assert!(buf.capacity() >= 4096);
    assert_eq!(buf.capacity() % 4096, 0);
}

#[test]
fn fresh_region_is_trap_filled() {
    let buf = CodeRegion::new(4096).unwrap();
    assert!((0..64).all(|i| buf.read_u8(i) == TRAP_FILL));
}

#[test]
fn clear_keeps_prefix() {
    let mut buf = CodeRegion::new(4096).unwrap();
    buf.emit_bytes(&[0xC3; 16]);
    buf.reserve_prefix();
    buf.emit_bytes(&[0x90; 32]);
    assert_eq!(buf.prefix_end(), 16);

    buf.clear();
    assert_eq!(buf.offset(), 16);
    assert!(buf.as_slice()[..16].iter().all(|&b| b == 0xC3));
    assert!((16..64).all(|i| buf.read_u8(i) == TRAP_FILL));
}

#[test]
fn phases() {
    let mut buf = CodeRegion::new(4096).unwrap();
    assert_eq!(buf.phase(), Phase::Writable);
    buf.set_executable().unwrap();
    assert_eq!(buf.phase(), Phase::Executable);
    // Idempotent both ways.
    buf.set_executable().unwrap();
    buf.set_writable().unwrap();
    buf.set_writable().unwrap();
    assert_eq!(buf.phase(), Phase::Writable);
}

#[test]
fn readable_while_executable() {
    let mut buf = CodeRegion::new(4096).unwrap();
    buf.emit_u8(0xC3);
    buf.set_executable().unwrap();
    assert_eq!(buf.read_u8(0), 0xC3);
}

#[test]
#[should_panic(expected = "non-writable")]
fn clear_requires_writable() {
    let mut buf = CodeRegion::new(4096).unwrap();
    buf.set_executable().unwrap();
    buf.clear();
}

#[test]
#[should_panic(expected = "overflow")]
fn overflow_panics() {
    let mut buf = CodeRegion::new(4096).unwrap();
    let cap = buf.capacity();
    buf.emit_bytes(&vec![0; cap]);
    buf.emit_u8(0);
}
