//! DVI opcode space, shared by page programs and virtual-font macros.

pub const SETCHAR0: u8 = 0;
pub const SETCHAR127: u8 = 127;
pub const SET1: u8 = 128;
pub const SET2: u8 = 129;
pub const SET3: u8 = 130;
pub const SET4: u8 = 131;
pub const SETRULE: u8 = 132;
pub const PUT1: u8 = 133;
pub const PUT2: u8 = 134;
pub const PUT3: u8 = 135;
pub const PUT4: u8 = 136;
pub const PUTRULE: u8 = 137;
pub const NOP: u8 = 138;
pub const BOP: u8 = 139;
/// Doubles as the cursor's past-end sentinel (see `io::cursor`).
pub const EOP: u8 = 140;
pub const PUSH: u8 = 141;
pub const POP: u8 = 142;
pub const RIGHT1: u8 = 143;
pub const RIGHT4: u8 = 146;
pub const W0: u8 = 147;
pub const W1: u8 = 148;
pub const W4: u8 = 151;
pub const X0: u8 = 152;
pub const X1: u8 = 153;
pub const X4: u8 = 156;
pub const DOWN1: u8 = 157;
pub const DOWN4: u8 = 160;
pub const Y0: u8 = 161;
pub const Y1: u8 = 162;
pub const Y4: u8 = 165;
pub const Z0: u8 = 166;
pub const Z1: u8 = 167;
pub const Z4: u8 = 170;
pub const FNTNUM0: u8 = 171;
pub const FNTNUM63: u8 = 234;
pub const FNT1: u8 = 235;
pub const FNT4: u8 = 238;
pub const XXX1: u8 = 239;
pub const XXX4: u8 = 242;
pub const FNTDEF1: u8 = 243;
pub const FNTDEF4: u8 = 246;
pub const PRE: u8 = 247;
pub const POST: u8 = 248;
pub const POSTPOST: u8 = 249;
/// TeX--XeT right-to-left extensions.
pub const BEGIN_REFLECT: u8 = 250;
pub const END_REFLECT: u8 = 251;

/// DVI format identification byte carried by PRE/POSTPOST.
pub const DVI_ID: u8 = 2;
/// Filler byte padding the end of the file after POSTPOST.
pub const TRAILER: u8 = 223;

/// Number of `c[i]` page counters in a BOP, each 4 bytes.
pub const BOP_COUNTERS: usize = 10;
