use thiserror::Error;

/// Fatal format errors. Every variant that arises while scanning a byte
/// stream carries the offending offset; none of them may be swallowed
/// mid-interpretation.
///
/// Degraded-but-continuable conditions (character not defined, resolution
/// substitution, checksum mismatch, font not found) are not errors: they
/// are logged once and rendering continues with empty-glyph fallbacks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DviError {
    #[error("malformed preamble at byte {offset}: {reason}")]
    BadPreamble { offset: usize, reason: String },

    #[error("malformed postamble at byte {offset}: {reason}")]
    BadPostamble { offset: usize, reason: String },

    #[error("unknown opcode {opcode} at byte {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("pop with no matching push at byte {offset}")]
    StackUnderflow { offset: usize },

    #[error("register stack not empty at end of page (depth {depth}) at byte {offset}")]
    StackUnbalanced { depth: usize, offset: usize },

    #[error("font number {number} selected before definition at byte {offset}")]
    UndefinedFontNumber { number: i32, offset: usize },

    #[error("no font selected before set/put at byte {offset}")]
    NoFontSelected { offset: usize },

    #[error("virtual-font macro for char {code} overran its declared length at byte {offset}")]
    MacroOverrun { code: u32, offset: usize },

    #[error("begin-reflect at byte {offset} has no matching end-reflect")]
    UnterminatedReflection { offset: usize },

    #[error("virtual-font nesting deeper than {limit} levels")]
    VfRecursionLimit { limit: usize },

    #[error("glyph raster for char {code}: decoded {got} bits, expected {want}")]
    BitCount { code: u32, got: u64, want: u64 },

    #[error("malformed character packet for char {code} at byte {offset}: {reason}")]
    BadCharPacket {
        code: u32,
        offset: usize,
        reason: String,
    },

    #[error("page {page} not present in document (have {pages})")]
    NoSuchPage { page: usize, pages: usize },
}
