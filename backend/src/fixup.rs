/// Displacement width of an unresolved branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupWidth {
    Rel8,
    Rel32,
}

impl FixupWidth {
    pub const fn bytes(self) -> usize {
        match self {
            FixupWidth::Rel8 => 1,
            FixupWidth::Rel32 => 4,
        }
    }
}

/// Handle to a branch whose target is not known yet.
///
/// `offset` is the code-region offset of the displacement field.
/// The displacement is relative to the end of that field, which is
/// also the end of the branch instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub offset: usize,
    pub width: FixupWidth,
}

impl Fixup {
    /// Offset just past the branch instruction.
    pub const fn end(&self) -> usize {
        self.offset + self.width.bytes()
    }
}
