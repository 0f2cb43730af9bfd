/// GF (generic font) decoder.
///
/// The glyph directory lives in the postamble, reached through the
/// trailer bytes at the end of the file; rasters decode lazily from
/// their `BOC` offsets, like the PK path.

use log::warn;
use nohash_hasher::IntMap;

use crate::error::DviError;
use crate::io::DviCursor;
use crate::player::bitmap::Bitmap;

pub const GF_ID: u8 = 131;
const GF_PRE: u8 = 247;
const GF_POST: u8 = 248;
const GF_POSTPOST: u8 = 249;
const GF_TRAILER: u8 = 223;

const PAINT0: u8 = 0;
const PAINT_MAX: u8 = 63;
const PAINT1: u8 = 64;
const PAINT3: u8 = 66;
const BOC: u8 = 67;
const BOC1: u8 = 68;
const EOC: u8 = 69;
const SKIP0: u8 = 70;
const SKIP3: u8 = 73;
const NEW_ROW_0: u8 = 74;
const NEW_ROW_MAX: u8 = 238;
const GF_XXX1: u8 = 239;
const GF_XXX4: u8 = 242;
const GF_YYY: u8 = 243;
const GF_NOP: u8 = 244;
const CHAR_LOC: u8 = 245;
const CHAR_LOC0: u8 = 246;

#[derive(Debug)]
pub struct GfDirectory {
    pub comment: String,
    pub design_size: u32,
    pub checksum: u32,
    pub hppp: u32,
    pub vppp: u32,
    pub chars: IntMap<u32, GfCharLoc>,
}

#[derive(Clone, Copy, Debug)]
pub struct GfCharLoc {
    /// Offset of the character's BOC command.
    pub offset: usize,
    pub tfm_width: u32,
}

/// Locate the postamble behind the trailer bytes and read the glyph
/// directory in one backward-entered pass.
pub fn scan(data: &[u8]) -> Result<GfDirectory, DviError> {
    let mut head = DviCursor::new(data);
    if head.read_u8() != GF_PRE || head.read_u8() != GF_ID {
        return Err(DviError::BadPreamble {
            offset: 0,
            reason: "not a GF file".to_string(),
        });
    }
    let comment_len = head.read_u8() as usize;
    let comment = head.read_string(comment_len);

    // Trailer: at least four 223 bytes, preceded by the id byte and the
    // postamble pointer.
    let mut end = data.len();
    while end > 0 && data[end - 1] == GF_TRAILER {
        end -= 1;
    }
    if data.len() - end < 4 || end < 6 {
        return Err(DviError::BadPostamble {
            offset: data.len(),
            reason: "missing trailer".to_string(),
        });
    }
    if data[end - 1] != GF_ID {
        return Err(DviError::BadPostamble {
            offset: end - 1,
            reason: "bad id byte before trailer".to_string(),
        });
    }
    let mut tail = DviCursor::from_offset(data, end - 5);
    let post_offset = tail.read_u32() as usize;

    let mut cursor = DviCursor::from_offset(data, post_offset);
    if post_offset >= data.len() || cursor.read_u8() != GF_POST {
        return Err(DviError::BadPostamble {
            offset: post_offset,
            reason: "postamble pointer does not reach POST".to_string(),
        });
    }
    let _final_ptr = cursor.read_u32();
    let design_size = cursor.read_u32();
    let checksum = cursor.read_u32();
    let hppp = cursor.read_u32();
    let vppp = cursor.read_u32();
    cursor.skip(16); // document-wide min_m/max_m/min_n/max_n

    let mut chars: IntMap<u32, GfCharLoc> = IntMap::default();
    loop {
        let at = cursor.position();
        let op = cursor.read_u8();
        match op {
            GF_POSTPOST => break,
            CHAR_LOC => {
                let code = cursor.read_u8() as u32;
                let _dx = cursor.read_i32();
                let _dy = cursor.read_i32();
                let tfm_width = cursor.read_u32();
                let offset = cursor.read_u32() as usize;
                chars.insert(code, GfCharLoc { offset, tfm_width });
            }
            CHAR_LOC0 => {
                let code = cursor.read_u8() as u32;
                let _dx = cursor.read_u8();
                let tfm_width = cursor.read_u32();
                let offset = cursor.read_u32() as usize;
                chars.insert(code, GfCharLoc { offset, tfm_width });
            }
            GF_NOP => {}
            _ => {
                return Err(DviError::BadPostamble {
                    offset: at,
                    reason: format!("unexpected byte {} in glyph directory", op),
                });
            }
        }
    }
    Ok(GfDirectory {
        comment,
        design_size,
        checksum,
        hppp,
        vppp,
        chars,
    })
}

/// Decode one character starting at its BOC command.
pub fn decode_char(data: &[u8], loc: &GfCharLoc, code: u32) -> Result<Bitmap, DviError> {
    let mut cursor = DviCursor::from_offset(data, loc.offset);
    let at = cursor.position();
    let (min_m, max_m, min_n, max_n) = match cursor.read_u8() {
        BOC => {
            let _c = cursor.read_u32();
            let _back = cursor.read_i32();
            let min_m = cursor.read_i32();
            let max_m = cursor.read_i32();
            let min_n = cursor.read_i32();
            let max_n = cursor.read_i32();
            (min_m, max_m, min_n, max_n)
        }
        BOC1 => {
            let _c = cursor.read_u8();
            let del_m = cursor.read_u8() as i32;
            let max_m = cursor.read_u8() as i32;
            let del_n = cursor.read_u8() as i32;
            let max_n = cursor.read_u8() as i32;
            (max_m - del_m, max_m, max_n - del_n, max_n)
        }
        other => {
            return Err(DviError::BadCharPacket {
                code,
                offset: at,
                reason: format!("expected BOC, found {}", other),
            });
        }
    };

    // Bounding box comes from the difference of two signed coordinates.
    let width = (max_m - min_m + 1).max(0) as u32;
    let height = (max_n - min_n + 1).max(0) as u32;
    let mut bitmap = Bitmap::new(width, height);
    bitmap.hot_x = -min_m;
    bitmap.hot_y = max_n;

    let want = width as u64 * height as u64;
    let mut painted: u64 = 0;
    let overrun = |painted| DviError::BitCount {
        code,
        got: painted,
        want,
    };

    // Paint state: column m, row counted down from max_n, color starts
    // white on every character and every skip.
    let mut x = 0u32;
    let mut row = 0i32;
    let mut black = false;

    loop {
        let at = cursor.position();
        let op = cursor.read_u8();
        match op {
            EOC => break,
            PAINT0..=PAINT_MAX => {
                paint(&mut bitmap, &mut x, row, op as u32, black, &mut painted)
                    .map_err(|_| overrun(painted))?;
                black = !black;
            }
            PAINT1..=PAINT3 => {
                let d = cursor.read_unsigned((op - PAINT1 + 1) as usize);
                paint(&mut bitmap, &mut x, row, d, black, &mut painted)
                    .map_err(|_| overrun(painted))?;
                black = !black;
            }
            SKIP0..=SKIP3 => {
                let blank = if op == SKIP0 {
                    0
                } else {
                    cursor.read_unsigned((op - SKIP0) as usize)
                };
                row += blank as i32 + 1;
                x = 0;
                black = false;
                if row >= height as i32 {
                    warn!("GF char {}: skip below the bounding box", code);
                    return Err(overrun(painted));
                }
            }
            NEW_ROW_0..=NEW_ROW_MAX => {
                row += 1;
                x = (op - NEW_ROW_0) as u32;
                black = true;
                if row >= height as i32 {
                    warn!("GF char {}: new-row below the bounding box", code);
                    return Err(overrun(painted));
                }
            }
            GF_XXX1..=GF_XXX4 => {
                let n = (op - GF_XXX1 + 1) as usize;
                let len = cursor.read_unsigned(n) as usize;
                cursor.skip(len);
            }
            GF_YYY => cursor.skip(4),
            GF_NOP => {}
            other => {
                return Err(DviError::BadCharPacket {
                    code,
                    offset: at,
                    reason: format!("unexpected paint-time command {}", other),
                });
            }
        }
    }

    Ok(bitmap)
}

fn paint(
    bitmap: &mut Bitmap,
    x: &mut u32,
    row: i32,
    count: u32,
    black: bool,
    painted: &mut u64,
) -> Result<(), ()> {
    if *x as u64 + count as u64 > bitmap.width as u64 || row < 0 {
        return Err(());
    }
    if black {
        for px in *x..*x + count {
            bitmap.set_pixel(px, row as u32);
            *painted += 1;
        }
    }
    *x += count;
    Ok(())
}
