/// PK packed-raster font decoder.
///
/// Two layers, so glyph rasters stay lazy: `scan` walks the packet
/// chain once and records where each character's data lives, and
/// `decode_char` unpacks a single raster on first use.

use log::warn;
use nohash_hasher::IntMap;

use crate::error::DviError;
use crate::io::DviCursor;
use crate::player::bitmap::Bitmap;

pub const PK_ID: u8 = 89;
const PK_PRE: u8 = 247;
const PK_XXX1: u8 = 240;
const PK_YYY: u8 = 244;
const PK_POST: u8 = 245;
const PK_NOP: u8 = 246;

/// Raster-by-bits mode: the flag nibble that bypasses run-length.
const DYN_F_BITMAP: u8 = 14;

#[derive(Debug)]
pub struct PkDirectory {
    pub comment: String,
    pub design_size: u32,
    pub checksum: u32,
    pub hppp: u32,
    pub vppp: u32,
    pub chars: IntMap<u32, PkCharLoc>,
}

/// Where one character packet lives inside the container.
#[derive(Clone, Copy, Debug)]
pub struct PkCharLoc {
    pub flag: u8,
    /// Offset of the metric fields (right after the character code).
    pub offset: usize,
    /// Packet bytes following the character code.
    pub len: usize,
    pub tfm_width: u32,
}

/// Single pass over the packet chain, recording the directory.
pub fn scan(data: &[u8]) -> Result<PkDirectory, DviError> {
    let mut cursor = DviCursor::new(data);
    if cursor.read_u8() != PK_PRE || cursor.read_u8() != PK_ID {
        return Err(DviError::BadPreamble {
            offset: 0,
            reason: "not a PK file".to_string(),
        });
    }
    let comment_len = cursor.read_u8() as usize;
    let comment = cursor.read_string(comment_len);
    let design_size = cursor.read_u32();
    let checksum = cursor.read_u32();
    let hppp = cursor.read_u32();
    let vppp = cursor.read_u32();

    let mut chars: IntMap<u32, PkCharLoc> = IntMap::default();
    loop {
        let at = cursor.position();
        if cursor.is_eof() {
            warn!("PK file ends without a postamble");
            break;
        }
        let flag = cursor.read_u8();
        match flag {
            PK_POST => break,
            PK_NOP => {}
            PK_YYY => cursor.skip(4),
            f if f >= PK_XXX1 && f < PK_YYY => {
                let n = (f - PK_XXX1 + 1) as usize;
                let len = cursor.read_unsigned(n) as usize;
                cursor.skip(len);
            }
            f if f >= PK_PRE => {
                return Err(DviError::BadCharPacket {
                    code: 0,
                    offset: at,
                    reason: format!("unexpected command byte {}", f),
                });
            }
            _ => {
                // Character packet: the length field counts the bytes
                // following the character code.
                let (len, code) = if flag & 7 == 7 {
                    (cursor.read_u32() as usize, cursor.read_u32())
                } else if flag & 4 != 0 {
                    (
                        (((flag & 3) as usize) << 16) + cursor.read_u16() as usize,
                        cursor.read_u8() as u32,
                    )
                } else {
                    (
                        (((flag & 3) as usize) << 8) + cursor.read_u8() as usize,
                        cursor.read_u8() as u32,
                    )
                };
                let offset = cursor.position();
                if offset + len > data.len() {
                    return Err(DviError::BadCharPacket {
                        code,
                        offset: at,
                        reason: "packet overruns the file".to_string(),
                    });
                }
                let tfm_width = peek_tfm(data, flag, offset);
                chars.insert(
                    code,
                    PkCharLoc {
                        flag,
                        offset,
                        len,
                        tfm_width,
                    },
                );
                cursor.set_position(offset + len);
            }
        }
    }
    Ok(PkDirectory {
        comment,
        design_size,
        checksum,
        hppp,
        vppp,
        chars,
    })
}

fn peek_tfm(data: &[u8], flag: u8, offset: usize) -> u32 {
    let mut cursor = DviCursor::from_offset(data, offset);
    if flag & 7 == 7 {
        cursor.read_u32()
    } else {
        cursor.read_u24()
    }
}

/// Unpack a single character's raster (hot point filled in).
pub fn decode_char(data: &[u8], loc: &PkCharLoc, code: u32) -> Result<Bitmap, DviError> {
    let mut cursor = DviCursor::with_limit(data, loc.offset, loc.len);
    let dyn_f = loc.flag >> 4;
    let first_run_black = loc.flag & 8 != 0;

    let (width, height, hoff, voff) = if loc.flag & 7 == 7 {
        let _tfm = cursor.read_u32();
        let _dx = cursor.read_u32();
        let _dy = cursor.read_u32();
        let w = cursor.read_u32();
        let h = cursor.read_u32();
        let hoff = cursor.read_i32();
        let voff = cursor.read_i32();
        (w, h, hoff, voff)
    } else if loc.flag & 4 != 0 {
        let _tfm = cursor.read_u24();
        let _dm = cursor.read_u16();
        let w = cursor.read_u16() as u32;
        let h = cursor.read_u16() as u32;
        let hoff = cursor.read_signed(2);
        let voff = cursor.read_signed(2);
        (w, h, hoff, voff)
    } else {
        let _tfm = cursor.read_u24();
        let _dm = cursor.read_u8();
        let w = cursor.read_u8() as u32;
        let h = cursor.read_u8() as u32;
        let hoff = cursor.read_signed(1);
        let voff = cursor.read_signed(1);
        (w, h, hoff, voff)
    };

    let mut bitmap = Bitmap::new(width, height);
    bitmap.hot_x = hoff;
    bitmap.hot_y = voff;
    if width == 0 || height == 0 {
        return Ok(bitmap);
    }

    let raster = cursor.read_bytes(cursor.remaining());
    if dyn_f == DYN_F_BITMAP {
        decode_bits(raster, &mut bitmap, code)?;
    } else {
        decode_packed(raster, dyn_f, first_run_black, &mut bitmap, code)?;
    }
    Ok(bitmap)
}

/// Raster-by-bits mode: width*height bits, MSB first, no row padding.
fn decode_bits(raster: &[u8], bitmap: &mut Bitmap, code: u32) -> Result<(), DviError> {
    let want = bitmap.width as u64 * bitmap.height as u64;
    let have = raster.len() as u64 * 8;
    if have < want {
        return Err(DviError::BitCount {
            code,
            got: have,
            want,
        });
    }
    let mut bit = 0usize;
    for y in 0..bitmap.height {
        for x in 0..bitmap.width {
            if raster[bit / 8] & (0x80 >> (bit % 8)) != 0 {
                bitmap.set_pixel(x, y);
            }
            bit += 1;
        }
    }
    Ok(())
}

struct NybbleReader<'a> {
    raster: &'a [u8],
    index: usize,
    high: bool,
}

impl<'a> NybbleReader<'a> {
    fn new(raster: &'a [u8]) -> Self {
        NybbleReader {
            raster,
            index: 0,
            high: true,
        }
    }

    fn next(&mut self) -> Option<u8> {
        if self.index >= self.raster.len() {
            return None;
        }
        let byte = self.raster[self.index];
        if self.high {
            self.high = false;
            Some(byte >> 4)
        } else {
            self.high = true;
            self.index += 1;
            Some(byte & 0x0F)
        }
    }
}

/// The dynamic run-length code. Returns the next run count; a nibble of
/// 14 prefixes a row-repeat count, 15 means repeat once.
fn packed_num(nybs: &mut NybbleReader, dyn_f: u8, repeat: &mut u32) -> Option<u32> {
    let mut want_repeat = false;
    loop {
        let i = nybs.next()?;
        if i == DYN_F_BITMAP {
            // The repeat count follows as a packed number of its own.
            want_repeat = true;
            continue;
        }
        if i == 15 {
            *repeat = 1;
            continue;
        }
        let count = if i == 0 {
            // Large count: zero nybbles give the digit length.
            let mut digits = 1u32;
            let mut j;
            loop {
                j = nybs.next()? as u32;
                digits += 1;
                if j != 0 {
                    break;
                }
            }
            for _ in 1..digits {
                j = j.saturating_mul(16).saturating_add(nybs.next()? as u32);
            }
            j - 15 + (13 - dyn_f as u32) * 16 + dyn_f as u32
        } else if i <= dyn_f {
            i as u32
        } else {
            let next = nybs.next()? as u32;
            (i as u32 - dyn_f as u32 - 1) * 16 + next + dyn_f as u32 + 1
        };
        if want_repeat {
            *repeat = count;
            want_repeat = false;
            continue;
        }
        return Some(count);
    }
}

fn decode_packed(
    raster: &[u8],
    dyn_f: u8,
    first_run_black: bool,
    bitmap: &mut Bitmap,
    code: u32,
) -> Result<(), DviError> {
    let (width, height) = (bitmap.width, bitmap.height);
    let want = width as u64 * height as u64;
    let mut nybs = NybbleReader::new(raster);
    let mut black = first_run_black;
    let mut x = 0u32;
    let mut y = 0u32;
    let mut repeat = 0u32;
    let mut decoded: u64 = 0;

    let truncated = |decoded| DviError::BitCount {
        code,
        got: decoded,
        want,
    };

    while y < height {
        let mut count = packed_num(&mut nybs, dyn_f, &mut repeat).ok_or(truncated(decoded))?;
        decoded += count as u64;
        while count > 0 {
            if y >= height {
                return Err(truncated(decoded));
            }
            let run = count.min(width - x);
            if black {
                for px in x..x + run {
                    bitmap.set_pixel(px, y);
                }
            }
            x += run;
            count -= run;
            if x == width {
                // Row complete: replicate it for any pending repeat.
                for _ in 0..repeat {
                    if y + 1 >= height {
                        return Err(truncated(decoded));
                    }
                    bitmap.copy_row(y, y + 1);
                    decoded += width as u64;
                    y += 1;
                }
                repeat = 0;
                x = 0;
                y += 1;
            }
        }
        black = !black;
    }
    if decoded != want {
        return Err(DviError::BitCount {
            code,
            got: decoded,
            want,
        });
    }
    Ok(())
}
