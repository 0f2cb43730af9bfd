pub mod document;
pub mod font;
pub mod opcodes;

use crate::io::DviCursor;

/// One FNTDEF record, as it appears in page programs, postambles and
/// virtual-font preambles alike.
#[derive(Clone, Debug, PartialEq)]
pub struct FontDef {
    pub number: i32,
    pub checksum: u32,
    /// Scale factor in DVI units (what the document asks the font to
    /// render at).
    pub scale: i32,
    /// Design size in DVI units.
    pub design_size: i32,
    pub area: String,
    pub name: String,
}

/// Read the body of FNTDEF1..4 (the opcode byte itself already
/// consumed); `size` is the byte width of the font number (1..=4).
pub fn read_font_def(cursor: &mut DviCursor, size: usize) -> FontDef {
    // The number is unsigned in the 1..3 byte forms, signed in the
    // 4-byte form.
    let number = if size == 4 {
        cursor.read_signed(4)
    } else {
        cursor.read_unsigned(size) as i32
    };
    let checksum = cursor.read_u32();
    let scale = cursor.read_u32() as i32;
    let design_size = cursor.read_u32() as i32;
    let area_len = cursor.read_u8() as usize;
    let name_len = cursor.read_u8() as usize;
    let area = cursor.read_string(area_len);
    let name = cursor.read_string(name_len);
    FontDef {
        number,
        checksum,
        scale,
        design_size,
        area,
        name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_font_def() {
        let mut bytes = vec![7u8];
        bytes.extend_from_slice(&0xCAFEu32.to_be_bytes());
        bytes.extend_from_slice(&655360u32.to_be_bytes());
        bytes.extend_from_slice(&655360u32.to_be_bytes());
        bytes.extend_from_slice(&[0, 5]);
        bytes.extend_from_slice(b"cmr10");
        let mut cursor = DviCursor::new(&bytes);
        let def = read_font_def(&mut cursor, 1);
        assert_eq!(def.number, 7);
        assert_eq!(def.checksum, 0xCAFE);
        assert_eq!(def.name, "cmr10");
        assert!(def.area.is_empty());
        assert!(cursor.is_eof());
    }
}
