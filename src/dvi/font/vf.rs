/// VF (virtual font) decoder.
///
/// A virtual font's "characters" are DVI-like macros that place glyphs
/// from other fonts. The preamble carries a font-definition list in the
/// same encoding as a page postamble; sub-fonts resolve through the
/// shared registry so a virtual font and its host document share
/// loaded fonts.

use nohash_hasher::IntMap;

use crate::dvi::opcodes::{FNTDEF1, FNTDEF4, POST, PRE};
use crate::dvi::{read_font_def, FontDef};
use crate::error::DviError;
use crate::io::DviCursor;

pub const VF_ID: u8 = 202;
const LONG_CHAR: u8 = 242;

#[derive(Debug)]
pub struct VfContainer {
    pub comment: String,
    pub checksum: u32,
    pub design_size: u32,
    /// Sub-font definitions, in file order; the first one is the
    /// initially selected font of every macro.
    pub font_defs: Vec<FontDef>,
    pub macros: IntMap<u32, VfMacro>,
}

/// One character: a DVI opcode sub-program plus its TFM width.
/// Unassigned codes simply have no entry and render as nothing.
#[derive(Clone, Debug)]
pub struct VfMacro {
    pub tfm_width: u32,
    pub program: Vec<u8>,
}

pub fn parse(data: &[u8]) -> Result<VfContainer, DviError> {
    let mut cursor = DviCursor::new(data);
    if cursor.read_u8() != PRE || cursor.read_u8() != VF_ID {
        return Err(DviError::BadPreamble {
            offset: 0,
            reason: "not a VF file".to_string(),
        });
    }
    let comment_len = cursor.read_u8() as usize;
    let comment = cursor.read_string(comment_len);
    let checksum = cursor.read_u32();
    let design_size = cursor.read_u32();

    let mut font_defs = Vec::new();
    let mut macros: IntMap<u32, VfMacro> = IntMap::default();
    let mut in_preamble = true;

    loop {
        let at = cursor.position();
        if cursor.is_eof() {
            // A missing POST is tolerated the way a missing macro
            // terminator is: the character list simply ends.
            break;
        }
        let op = cursor.read_u8();
        match op {
            POST => break,
            FNTDEF1..=FNTDEF4 => {
                if !in_preamble {
                    return Err(DviError::BadCharPacket {
                        code: 0,
                        offset: at,
                        reason: "font definition after character packets".to_string(),
                    });
                }
                font_defs.push(read_font_def(&mut cursor, (op - FNTDEF1 + 1) as usize));
            }
            LONG_CHAR => {
                in_preamble = false;
                let len = cursor.read_u32() as usize;
                let code = cursor.read_u32();
                let tfm_width = cursor.read_u32();
                read_macro(&mut cursor, code, len, tfm_width, &mut macros)?;
            }
            short_len if short_len < LONG_CHAR => {
                in_preamble = false;
                let code = cursor.read_u8() as u32;
                let tfm_width = cursor.read_u24();
                read_macro(&mut cursor, code, short_len as usize, tfm_width, &mut macros)?;
            }
            other => {
                return Err(DviError::BadCharPacket {
                    code: 0,
                    offset: at,
                    reason: format!("unexpected byte {} in VF character list", other),
                });
            }
        }
    }

    Ok(VfContainer {
        comment,
        checksum,
        design_size,
        font_defs,
        macros,
    })
}

fn read_macro(
    cursor: &mut DviCursor,
    code: u32,
    len: usize,
    tfm_width: u32,
    macros: &mut IntMap<u32, VfMacro>,
) -> Result<(), DviError> {
    if cursor.remaining() < len {
        return Err(DviError::BadCharPacket {
            code,
            offset: cursor.position(),
            reason: "macro overruns the file".to_string(),
        });
    }
    let program = cursor.read_bytes(len).to_vec();
    macros.insert(code, VfMacro { tfm_width, program });
    Ok(())
}
