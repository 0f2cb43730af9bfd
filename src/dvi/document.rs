/// Whole-file DVI handling: preamble and postamble verification, the
/// page directory, and page rendering entry points.
///
/// Random page access goes through the postamble: the trailer padding
/// is walked backwards to the final-BOP pointer, then the backward BOP
/// chain yields every page's offset without scanning page bodies.

use log::{debug, warn};

use crate::dvi::opcodes::*;
use crate::dvi::read_font_def;
use crate::error::DviError;
use crate::io::DviCursor;
use crate::player::font::FontManager;
use crate::player::interpreter::{DeviceParams, FontNumTable, PageRenderer, PageSink};

/// DVI dimension unit conversion baseline, 1e-7 meters per inch-fraction.
const DVI_UNIT_SCALE: f64 = 254000.0;

pub struct Document {
    data: Vec<u8>,
    pub comment: String,
    pub numerator: u32,
    pub denominator: u32,
    /// Magnification times 1000.
    pub magnification: u32,
    /// Deepest PUSH nesting any page uses, per the postamble.
    pub max_stack_depth: u16,
    /// DVI units -> natural pixels at the manager's base resolution.
    conv: f64,
    /// BOP offsets in file order.
    pages: Vec<usize>,
    font_table: FontNumTable,
}

impl Document {
    /// Parse a DVI byte stream and register its fonts. Fonts from a
    /// previously opened document that this one does not also use are
    /// evicted from the manager.
    pub fn open(data: Vec<u8>, fonts: &mut FontManager) -> Result<Document, DviError> {
        let (comment, numerator, denominator, magnification) = read_preamble(&data)?;
        let post = locate_postamble(&data)?;

        let mut cursor = DviCursor::from_offset(&data, post);
        cursor.skip(1);
        let final_bop = cursor.read_i32();
        let post_num = cursor.read_u32();
        let post_den = cursor.read_u32();
        let post_mag = cursor.read_u32();
        cursor.skip(8); // tallest / widest page dimensions
        let max_stack_depth = cursor.read_u16();
        let page_total = cursor.read_u16();
        if post_num != numerator || post_den != denominator || post_mag != magnification {
            warn!("postamble units disagree with the preamble; using the preamble's");
        }

        let pages = collect_pages(&data, final_bop, page_total)?;
        debug!("document: {} page(s), comment {:?}", pages.len(), comment);

        fonts.mag = magnification as f64 / 1000.0;
        let font_table = read_postamble_fonts(&mut cursor, fonts)?;

        let conv = numerator as f64 / DVI_UNIT_SCALE * fonts.base_dpi as f64
            / denominator as f64
            * magnification as f64
            / 1000.0;

        Ok(Document {
            data,
            comment,
            numerator,
            denominator,
            magnification,
            max_stack_depth,
            conv,
            pages,
            font_table,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The ten `\count` values a page was shipped out with.
    pub fn page_counters(&self, page: usize) -> Result<[i32; BOP_COUNTERS], DviError> {
        let offset = self.page_offset(page)?;
        let mut cursor = DviCursor::from_offset(&self.data, offset + 1);
        let mut counters = [0i32; BOP_COUNTERS];
        for slot in counters.iter_mut() {
            *slot = cursor.read_i32();
        }
        Ok(counters)
    }

    pub fn device_params(&self) -> DeviceParams {
        DeviceParams::new(self.conv)
    }

    /// Interpret one page (zero-based) into `sink`.
    pub fn render_page(
        &self,
        page: usize,
        fonts: &mut FontManager,
        sink: &mut dyn PageSink,
    ) -> Result<(), DviError> {
        let offset = self.page_offset(page)?;
        let mut renderer = PageRenderer::new(fonts, self.device_params());
        renderer.render_page(&self.data[offset..], &self.font_table, sink)
    }

    fn page_offset(&self, page: usize) -> Result<usize, DviError> {
        self.pages.get(page).copied().ok_or(DviError::NoSuchPage {
            page,
            pages: self.pages.len(),
        })
    }
}

fn read_preamble(data: &[u8]) -> Result<(String, u32, u32, u32), DviError> {
    let mut cursor = DviCursor::new(data);
    if cursor.read_u8() != PRE {
        return Err(DviError::BadPreamble {
            offset: 0,
            reason: "missing preamble opcode".to_string(),
        });
    }
    let id = cursor.read_u8();
    if id != DVI_ID {
        return Err(DviError::BadPreamble {
            offset: 1,
            reason: format!("unsupported format id {}", id),
        });
    }
    let numerator = cursor.read_u32();
    let denominator = cursor.read_u32();
    let magnification = cursor.read_u32();
    if numerator == 0 || denominator == 0 || magnification == 0 {
        return Err(DviError::BadPreamble {
            offset: 2,
            reason: "zero unit parameter".to_string(),
        });
    }
    let comment_len = cursor.read_u8() as usize;
    let comment = cursor.read_string(comment_len);
    Ok((comment, numerator, denominator, magnification))
}

/// Walk the trailer padding backwards to the postamble pointer stored
/// just before it.
fn locate_postamble(data: &[u8]) -> Result<usize, DviError> {
    let mut pos = data.len();
    while pos > 0 && data[pos - 1] == TRAILER {
        pos -= 1;
    }
    let padding = data.len() - pos;
    if padding < 4 {
        return Err(DviError::BadPostamble {
            offset: data.len(),
            reason: format!("{} trailer byte(s), need at least 4", padding),
        });
    }
    // id byte, then the four-byte pointer, preceded by POSTPOST itself.
    if pos < 6 || data[pos - 1] != DVI_ID {
        return Err(DviError::BadPostamble {
            offset: pos.saturating_sub(1),
            reason: "bad format id before trailer".to_string(),
        });
    }
    let postpost = pos - 6;
    if data[postpost] != POSTPOST {
        return Err(DviError::BadPostamble {
            offset: postpost,
            reason: "post-postamble opcode not found".to_string(),
        });
    }
    let post = DviCursor::from_offset(data, postpost + 1).read_u32() as usize;
    if post >= postpost || data[post] != POST {
        return Err(DviError::BadPostamble {
            offset: postpost + 1,
            reason: "postamble pointer does not land on the postamble".to_string(),
        });
    }
    Ok(post)
}

/// Follow the backward BOP chain from the postamble's final-BOP
/// pointer; offsets must strictly decrease, which also rules out
/// pointer cycles.
fn collect_pages(data: &[u8], final_bop: i32, expected: u16) -> Result<Vec<usize>, DviError> {
    let mut pages = Vec::with_capacity(expected as usize);
    let mut next = final_bop;
    while next >= 0 {
        let offset = next as usize;
        if offset >= data.len() || data[offset] != BOP {
            return Err(DviError::BadPostamble {
                offset,
                reason: "page pointer does not land on a page start".to_string(),
            });
        }
        pages.push(offset);
        let mut cursor = DviCursor::from_offset(data, offset + 1 + 4 * BOP_COUNTERS);
        let prev = cursor.read_i32();
        if prev >= next {
            return Err(DviError::BadPostamble {
                offset,
                reason: "page chain does not move backwards".to_string(),
            });
        }
        next = prev;
    }
    if pages.len() != expected as usize {
        warn!(
            "postamble claims {} page(s), chain has {}",
            expected,
            pages.len()
        );
    }
    pages.reverse();
    Ok(pages)
}

/// Read the postamble font definitions, resolving each through the
/// manager, then sweep out fonts no definition re-marked.
fn read_postamble_fonts(
    cursor: &mut DviCursor,
    fonts: &mut FontManager,
) -> Result<FontNumTable, DviError> {
    fonts.begin_sweep();
    let mut table = FontNumTable::default();
    let mut ids = Vec::new();
    loop {
        let at = cursor.position();
        let op = cursor.read_u8();
        match op {
            NOP => {}
            FNTDEF1..=FNTDEF4 => {
                let def = read_font_def(cursor, (op - FNTDEF1 + 1) as usize);
                let dpi = fonts.request_dpi(def.scale, def.design_size);
                let id = fonts.resolve(&def.name, dpi, def.checksum, def.scale, def.design_size);
                table.define(def.number, id);
                ids.push(id);
            }
            POSTPOST => break,
            other => {
                return Err(DviError::UnknownOpcode {
                    opcode: other,
                    offset: at,
                });
            }
        }
        if cursor.is_eof() {
            return Err(DviError::BadPostamble {
                offset: cursor.position(),
                reason: "postamble runs off the end of the file".to_string(),
            });
        }
    }
    for id in ids {
        fonts.mark_in_use(id);
    }
    fonts.sweep();
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::font::tests::MapSource;
    use crate::player::interpreter::{PageEvent, PageEvents};

    fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    struct Builder {
        data: Vec<u8>,
        bops: Vec<usize>,
    }

    impl Builder {
        /// Unit parameters chosen so one DVI unit is one pixel at
        /// 300dpi.
        fn new() -> Builder {
            let mut data = vec![PRE, DVI_ID];
            push_u32(&mut data, 254000);
            push_u32(&mut data, 300);
            push_u32(&mut data, 1000);
            data.push(4);
            data.extend_from_slice(b"test");
            Builder {
                data,
                bops: Vec::new(),
            }
        }

        fn begin_page(&mut self, counter0: i32) {
            let prev = self.bops.last().map_or(-1i32, |&b| b as i32);
            self.bops.push(self.data.len());
            self.data.push(BOP);
            push_u32(&mut self.data, counter0 as u32);
            for _ in 1..BOP_COUNTERS {
                push_u32(&mut self.data, 0);
            }
            push_u32(&mut self.data, prev as u32);
        }

        fn end_page(&mut self) {
            self.data.push(EOP);
        }

        fn fntdef(&mut self, number: u8, name: &str) {
            self.data.push(FNTDEF1);
            self.data.push(number);
            push_u32(&mut self.data, 0);
            push_u32(&mut self.data, 10 << 20);
            push_u32(&mut self.data, 10 << 20);
            self.data.push(0);
            self.data.push(name.len() as u8);
            self.data.extend_from_slice(name.as_bytes());
        }

        fn finish(mut self, postamble_fonts: &[(u8, &str)]) -> Vec<u8> {
            let post = self.data.len();
            self.data.push(POST);
            let final_bop = self.bops.last().map_or(-1i32, |&b| b as i32);
            push_u32(&mut self.data, final_bop as u32);
            push_u32(&mut self.data, 254000);
            push_u32(&mut self.data, 300);
            push_u32(&mut self.data, 1000);
            push_u32(&mut self.data, 0);
            push_u32(&mut self.data, 0);
            self.data.extend_from_slice(&(16u16).to_be_bytes());
            self.data
                .extend_from_slice(&(self.bops.len() as u16).to_be_bytes());
            for &(number, name) in postamble_fonts {
                self.fntdef(number, name);
            }
            self.data.push(POSTPOST);
            push_u32(&mut self.data, post as u32);
            self.data.push(DVI_ID);
            for _ in 0..4 {
                self.data.push(TRAILER);
            }
            while self.data.len() % 4 != 0 {
                self.data.push(TRAILER);
            }
            self.data
        }
    }

    fn manager() -> FontManager {
        let mut source = MapSource::new();
        source.insert("tiny", 300, crate::dvi::font::pk::tests::one_pixel_font());
        FontManager::new(Box::new(source), 300)
    }

    fn one_page_doc() -> Vec<u8> {
        let mut b = Builder::new();
        b.begin_page(1);
        b.data.push(FNTNUM0);
        b.data.push(b'A');
        b.end_page();
        b.finish(&[(0, "tiny")])
    }

    #[test]
    fn test_open_reads_directory_in_file_order() {
        let mut b = Builder::new();
        for n in 1..=3 {
            b.begin_page(n);
            b.end_page();
        }
        let data = b.finish(&[]);
        let mut fonts = manager();
        let doc = Document::open(data, &mut fonts).unwrap();
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.comment, "test");
        for page in 0..3 {
            assert_eq!(doc.page_counters(page).unwrap()[0], page as i32 + 1);
        }
        assert!(matches!(
            doc.page_counters(3),
            Err(DviError::NoSuchPage { page: 3, pages: 3 })
        ));
    }

    #[test]
    fn test_render_page_places_postamble_font_glyph() {
        let mut fonts = manager();
        let doc = Document::open(one_page_doc(), &mut fonts).unwrap();
        // conv = 254000/254000 * 300/300 = one pixel per DVI unit.
        assert!((doc.device_params().conv - 1.0).abs() < 1e-12);
        let mut events = PageEvents::default();
        doc.render_page(0, &mut fonts, &mut events).unwrap();
        assert_eq!(events.events.len(), 1);
        assert!(matches!(events.events[0], PageEvent::Glyph { .. }));
    }

    #[test]
    fn test_bad_preamble() {
        let mut fonts = manager();
        assert!(matches!(
            Document::open(vec![0, 1, 2, 3], &mut fonts),
            Err(DviError::BadPreamble { .. })
        ));
        let mut wrong_id = one_page_doc();
        wrong_id[1] = 3;
        assert!(matches!(
            Document::open(wrong_id, &mut fonts),
            Err(DviError::BadPreamble { offset: 1, .. })
        ));
    }

    #[test]
    fn test_truncated_trailer_is_fatal() {
        let mut fonts = manager();
        let mut data = one_page_doc();
        while data.last() == Some(&TRAILER) {
            data.pop();
        }
        data.push(TRAILER); // fewer than the required four
        assert!(matches!(
            Document::open(data, &mut fonts),
            Err(DviError::BadPostamble { .. })
        ));
    }

    #[test]
    fn test_corrupt_page_chain_is_fatal() {
        let mut b = Builder::new();
        b.begin_page(1);
        b.end_page();
        let bop = b.bops[0];
        let mut data = b.finish(&[]);
        // Point the page's prev pointer at itself.
        crate::io::write_u32(
            &mut data,
            bop + 1 + 4 * BOP_COUNTERS,
            bop as u32,
        );
        let mut fonts = manager();
        assert!(matches!(
            Document::open(data, &mut fonts),
            Err(DviError::BadPostamble { .. })
        ));
    }

    #[test]
    fn test_document_switch_sweeps_unused_fonts() {
        let mut source = MapSource::new();
        source.insert("tiny", 300, crate::dvi::font::pk::tests::one_pixel_font());
        source.insert("tiny2", 300, crate::dvi::font::pk::tests::one_pixel_font());
        let mut fonts = FontManager::new(Box::new(source), 300);

        let first = {
            let mut b = Builder::new();
            b.begin_page(1);
            b.end_page();
            b.finish(&[(0, "tiny"), (1, "tiny2")])
        };
        Document::open(first, &mut fonts).unwrap();
        assert_eq!(fonts.fonts.len(), 2);

        let second = {
            let mut b = Builder::new();
            b.begin_page(1);
            b.end_page();
            b.finish(&[(0, "tiny")])
        };
        Document::open(second, &mut fonts).unwrap();
        assert_eq!(fonts.fonts.len(), 1);
    }
}
