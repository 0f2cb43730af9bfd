//! Bitmap-font container formats. Each decoder splits into a directory
//! scan at load time and a per-glyph decode on first use.

pub mod gf;
pub mod pk;
pub mod vf;

/// Container kind, sniffed from the preamble id byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FontFormat {
    Pk,
    Gf,
    Vf,
}

pub fn sniff(data: &[u8]) -> Option<FontFormat> {
    if data.len() < 2 || data[0] != 247 {
        return None;
    }
    match data[1] {
        pk::PK_ID => Some(FontFormat::Pk),
        gf::GF_ID => Some(FontFormat::Gf),
        vf::VF_ID => Some(FontFormat::Vf),
        _ => None,
    }
}
