/// The page interpreter: a stack machine over the DVI opcode space.
///
/// One `PageRenderer` walks one page (or, recursively, one virtual-font
/// macro) and emits place-glyph / place-rule / special side effects
/// into a `PageSink`. All positioning is kept in DVI units in the
/// register frame; device pixels are derived only at emission time.

use log::debug;

use crate::dvi::opcodes::*;
use crate::dvi::read_font_def;
use crate::error::DviError;
use crate::io::DviCursor;
use crate::player::bitmap::Bitmap;
use crate::player::font::{FontId, FontManager, GlyphDispatch};

/// Bound on virtual-font nesting; a malformed self-referential font
/// becomes a typed error instead of a native stack overflow.
pub const MAX_VF_DEPTH: usize = 32;

/// Number of direct slots in the font-number table; ids above go to
/// the overflow association list.
const FONT_TABLE_LEN: usize = 64;

/// How far the per-move rounded baseline row may wander from the
/// absolute pixel conversion of `v`.
const MAX_DRIFT: i32 = 1;

/// Conversion from DVI units to pixels.
#[derive(Clone, Copy, Debug)]
pub struct DeviceParams {
    /// DVI units -> natural (unshrunken) pixels.
    pub conv: f64,
}

impl DeviceParams {
    pub fn new(conv: f64) -> DeviceParams {
        DeviceParams { conv }
    }

    /// Natural pixel position of a DVI coordinate.
    pub fn pixels(&self, dvi: i32) -> i32 {
        (dvi as f64 * self.conv).round() as i32
    }

    /// Rule dimensions round up: any positive extent covers at least
    /// one pixel.
    pub fn rule_pixels(&self, dvi: i32, shrink: f64) -> u32 {
        let px = (dvi as f64 * self.conv / shrink).ceil();
        px.max(1.0) as u32
    }

    fn device(&self, dvi: i32, shrink: f64) -> i32 {
        device_row(self.pixels(dvi), shrink)
    }
}

/// Natural pixel -> device pixel under the current shrink factor.
fn device_row(pixel: i32, shrink: f64) -> i32 {
    (pixel as f64 / shrink).round() as i32
}

/// Side-effect boundary toward the excluded painting layer.
pub trait PageSink {
    fn place_glyph(&mut self, bitmap: Bitmap, origin: (i32, i32));
    fn place_rule(&mut self, origin: (i32, i32), size: (u32, u32));
    /// Extension payload (XXX opcode), forwarded verbatim.
    fn special(&mut self, payload: &[u8]);
}

#[derive(Debug, PartialEq)]
pub enum PageEvent {
    Glyph { bitmap: Bitmap, origin: (i32, i32) },
    Rule { origin: (i32, i32), size: (u32, u32) },
    Special(Vec<u8>),
}

/// Collects the event sequence; the `render_page` return shape most
/// callers want.
#[derive(Debug, Default)]
pub struct PageEvents {
    pub events: Vec<PageEvent>,
}

impl PageSink for PageEvents {
    fn place_glyph(&mut self, bitmap: Bitmap, origin: (i32, i32)) {
        self.events.push(PageEvent::Glyph { bitmap, origin });
    }
    fn place_rule(&mut self, origin: (i32, i32), size: (u32, u32)) {
        self.events.push(PageEvent::Rule { origin, size });
    }
    fn special(&mut self, payload: &[u8]) {
        self.events.push(PageEvent::Special(payload.to_vec()));
    }
}

/// Swallows everything; used while prescanning reflected runs.
struct NullSink;

impl PageSink for NullSink {
    fn place_glyph(&mut self, _bitmap: Bitmap, _origin: (i32, i32)) {}
    fn place_rule(&mut self, _origin: (i32, i32), _size: (u32, u32)) {}
    fn special(&mut self, _payload: &[u8]) {}
}

/// Positioning state: current position plus the W/X/Y/Z shorthand
/// registers. Frames stack under PUSH/POP.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterFrame {
    pub h: i32,
    pub v: i32,
    pub w: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// `v` rounded to a natural pixel row, updated only on vertical
    /// moves, so every glyph on one baseline shares a device row even
    /// as `v` itself accumulates rounding drift.
    pub pixel_v: i32,
}

/// Page-local font-number table: direct slots for the FNTNUM range,
/// association list above it.
#[derive(Clone, Debug)]
pub struct FontNumTable {
    direct: [Option<FontId>; FONT_TABLE_LEN],
    overflow: Vec<(i32, FontId)>,
}

impl Default for FontNumTable {
    fn default() -> FontNumTable {
        FontNumTable {
            direct: [None; FONT_TABLE_LEN],
            overflow: Vec::new(),
        }
    }
}

impl FontNumTable {
    pub fn define(&mut self, number: i32, id: FontId) {
        if number >= 0 && (number as usize) < FONT_TABLE_LEN {
            self.direct[number as usize] = Some(id);
            return;
        }
        match self.overflow.iter_mut().find(|(n, _)| *n == number) {
            Some(slot) => slot.1 = id,
            None => self.overflow.push((number, id)),
        }
    }

    pub fn lookup(&self, number: i32) -> Option<FontId> {
        if number >= 0 && (number as usize) < FONT_TABLE_LEN {
            return self.direct[number as usize];
        }
        self.overflow
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, id)| *id)
    }
}

#[derive(Clone, Debug)]
struct ExecState {
    frame: RegisterFrame,
    stack: Vec<RegisterFrame>,
    font: Option<FontId>,
    table: FontNumTable,
    /// +1 normally, -1 inside a reflected (right-to-left) run.
    dir: i32,
    /// End positions of open reflected runs.
    reflect_ends: Vec<i32>,
}

enum Exit {
    EndOfPage,
    ReflectEnd,
}

pub struct PageRenderer<'a> {
    pub fonts: &'a mut FontManager,
    pub params: DeviceParams,
}

impl<'a> PageRenderer<'a> {
    pub fn new(fonts: &'a mut FontManager, params: DeviceParams) -> PageRenderer<'a> {
        PageRenderer { fonts, params }
    }

    /// Interpret one page program (starting at its BOP or at its first
    /// instruction) and emit side effects into `sink`. `table` carries
    /// the document-level font definitions; inline FNTDEFs extend a
    /// local copy.
    pub fn render_page(
        &mut self,
        program: &[u8],
        table: &FontNumTable,
        sink: &mut dyn PageSink,
    ) -> Result<(), DviError> {
        let mut cursor = DviCursor::new(program);
        if !cursor.is_eof() && program[0] == BOP {
            cursor.skip(1 + 4 * BOP_COUNTERS + 4);
        }
        let mut state = ExecState {
            frame: RegisterFrame::default(),
            stack: Vec::new(),
            font: None,
            table: table.clone(),
            dir: 1,
            reflect_ends: Vec::new(),
        };
        match self.execute(program, &mut cursor, &mut state, sink, None, 0, false)? {
            Exit::EndOfPage => Ok(()),
            Exit::ReflectEnd => Err(DviError::UnknownOpcode {
                opcode: END_REFLECT,
                offset: cursor.position(),
            }),
        }
    }

    fn execute(
        &mut self,
        data: &[u8],
        cursor: &mut DviCursor,
        state: &mut ExecState,
        sink: &mut dyn PageSink,
        virtual_font: Option<(FontId, u32)>,
        depth: usize,
        until_reflect_end: bool,
    ) -> Result<Exit, DviError> {
        loop {
            let at = cursor.position();
            let hit_end = cursor.is_eof();
            let op = cursor.read_u8();
            match op {
                SETCHAR0..=SETCHAR127 => {
                    self.do_char(state, sink, depth, op as u32, true, at)?;
                }
                SET1..=SET4 => {
                    let code = cursor.read_unsigned((op - SET1 + 1) as usize);
                    self.do_char(state, sink, depth, code, true, at)?;
                }
                PUT1..=PUT4 => {
                    let code = cursor.read_unsigned((op - PUT1 + 1) as usize);
                    self.do_char(state, sink, depth, code, false, at)?;
                }
                SETRULE => self.do_rule(cursor, state, sink, true),
                PUTRULE => self.do_rule(cursor, state, sink, false),
                NOP => {}
                EOP => {
                    // A real EOP ends the page; the sentinel form of it
                    // ends a macro, but only exactly at the declared
                    // macro length.
                    if let Some((_, code)) = virtual_font {
                        if !hit_end {
                            return Err(DviError::MacroOverrun { code, offset: at });
                        }
                    }
                    if !state.stack.is_empty() {
                        return Err(DviError::StackUnbalanced {
                            depth: state.stack.len(),
                            offset: at,
                        });
                    }
                    if until_reflect_end {
                        // Prescan ran off the page without finding the
                        // end marker.
                        return Err(DviError::UnterminatedReflection { offset: at });
                    }
                    return Ok(Exit::EndOfPage);
                }
                PUSH => state.stack.push(state.frame),
                POP => match state.stack.pop() {
                    Some(frame) => state.frame = frame,
                    None => return Err(DviError::StackUnderflow { offset: at }),
                },
                RIGHT1..=RIGHT4 => {
                    let amount = cursor.read_signed((op - RIGHT1 + 1) as usize);
                    state.frame.h += state.dir * amount;
                }
                W0 => state.frame.h += state.dir * state.frame.w,
                W1..=W4 => {
                    state.frame.w = cursor.read_signed((op - W1 + 1) as usize);
                    state.frame.h += state.dir * state.frame.w;
                }
                X0 => state.frame.h += state.dir * state.frame.x,
                X1..=X4 => {
                    state.frame.x = cursor.read_signed((op - X1 + 1) as usize);
                    state.frame.h += state.dir * state.frame.x;
                }
                DOWN1..=DOWN4 => {
                    let amount = cursor.read_signed((op - DOWN1 + 1) as usize);
                    self.move_down(&mut state.frame, amount);
                }
                Y0 => {
                    let amount = state.frame.y;
                    self.move_down(&mut state.frame, amount);
                }
                Y1..=Y4 => {
                    state.frame.y = cursor.read_signed((op - Y1 + 1) as usize);
                    let amount = state.frame.y;
                    self.move_down(&mut state.frame, amount);
                }
                Z0 => {
                    let amount = state.frame.z;
                    self.move_down(&mut state.frame, amount);
                }
                Z1..=Z4 => {
                    state.frame.z = cursor.read_signed((op - Z1 + 1) as usize);
                    let amount = state.frame.z;
                    self.move_down(&mut state.frame, amount);
                }
                FNTNUM0..=FNTNUM63 => {
                    self.select_font(state, virtual_font, (op - FNTNUM0) as i32, at)?;
                }
                FNT1..=FNT4 => {
                    let size = (op - FNT1 + 1) as usize;
                    let number = if size == 4 {
                        cursor.read_signed(4)
                    } else {
                        cursor.read_unsigned(size) as i32
                    };
                    self.select_font(state, virtual_font, number, at)?;
                }
                XXX1..=XXX4 => {
                    let len = cursor.read_unsigned((op - XXX1 + 1) as usize) as usize;
                    let payload = cursor.read_bytes(len);
                    sink.special(payload);
                }
                FNTDEF1..=FNTDEF4 => {
                    if virtual_font.is_some() {
                        return Err(DviError::UnknownOpcode { opcode: op, offset: at });
                    }
                    let def = read_font_def(cursor, (op - FNTDEF1 + 1) as usize);
                    let dpi = self.fonts.request_dpi(def.scale, def.design_size);
                    let id = self
                        .fonts
                        .resolve(&def.name, dpi, def.checksum, def.scale, def.design_size);
                    state.table.define(def.number, id);
                }
                BEGIN_REFLECT => {
                    // Find the run's end position first, with all side
                    // effects suppressed, then render it right-to-left
                    // starting from there.
                    let mut probe = state.clone();
                    probe.reflect_ends.clear();
                    let mut probe_cursor =
                        DviCursor::with_limit(data, cursor.position(), cursor.remaining());
                    self.execute(
                        data,
                        &mut probe_cursor,
                        &mut probe,
                        &mut NullSink,
                        virtual_font,
                        depth,
                        true,
                    )?;
                    debug!("reflected run at {}..{}", at, probe_cursor.position());
                    state.reflect_ends.push(probe.frame.h);
                    state.frame.h = probe.frame.h;
                    state.dir = -state.dir;
                }
                END_REFLECT => match state.reflect_ends.pop() {
                    Some(h_end) => {
                        state.frame.h = h_end;
                        state.dir = -state.dir;
                    }
                    None if until_reflect_end => return Ok(Exit::ReflectEnd),
                    None => {
                        return Err(DviError::UnknownOpcode { opcode: op, offset: at });
                    }
                },
                _ => {
                    return Err(DviError::UnknownOpcode { opcode: op, offset: at });
                }
            }
        }
    }

    /// Vertical moves round per-move so repeated small leads stay an
    /// integer number of rows apart, clamped to within `MAX_DRIFT` of
    /// the absolute conversion of `v`.
    fn move_down(&self, frame: &mut RegisterFrame, amount: i32) {
        frame.v += amount;
        frame.pixel_v += self.params.pixels(amount);
        let absolute = self.params.pixels(frame.v);
        let drift = frame.pixel_v - absolute;
        if drift.abs() > MAX_DRIFT {
            frame.pixel_v = absolute + MAX_DRIFT * drift.signum();
        }
    }

    fn select_font(
        &mut self,
        state: &mut ExecState,
        virtual_font: Option<(FontId, u32)>,
        number: i32,
        at: usize,
    ) -> Result<(), DviError> {
        let found = match virtual_font {
            // Macro font numbers are local to the virtual font.
            Some((vf, _)) => self.fonts.virtual_sub_font(vf, Some(number)),
            None => state.table.lookup(number),
        };
        match found {
            Some(id) => {
                state.font = Some(id);
                Ok(())
            }
            None => Err(DviError::UndefinedFontNumber { number, offset: at }),
        }
    }

    fn do_char(
        &mut self,
        state: &mut ExecState,
        sink: &mut dyn PageSink,
        depth: usize,
        code: u32,
        advance: bool,
        at: usize,
    ) -> Result<(), DviError> {
        let font_id = state
            .font
            .ok_or(DviError::NoFontSelected { offset: at })?;
        match self.fonts.dispatch_kind(font_id)? {
            GlyphDispatch::Raster => {
                let adv = self.fonts.glyph_advance(font_id, code)?;
                if advance && state.dir < 0 {
                    state.frame.h -= adv;
                }
                if let Some(bitmap) = self.fonts.device_glyph(font_id, code)? {
                    if !bitmap.is_empty() {
                        let shrink = self.fonts.shrink_factor();
                        let origin = (
                            self.params.device(state.frame.h, shrink) - bitmap.hot_x,
                            device_row(state.frame.pixel_v, shrink) - bitmap.hot_y,
                        );
                        sink.place_glyph(bitmap, origin);
                    }
                }
                if advance && state.dir > 0 {
                    state.frame.h += adv;
                }
            }
            GlyphDispatch::Virtual => {
                if depth >= MAX_VF_DEPTH {
                    return Err(DviError::VfRecursionLimit { limit: MAX_VF_DEPTH });
                }
                // Unassigned codes have an empty macro: render nothing.
                let (program, adv) = match self.fonts.macro_program(font_id, code) {
                    Some(found) => found,
                    None => return Ok(()),
                };
                if advance && state.dir < 0 {
                    state.frame.h -= adv;
                }
                // Enter the macro with the pen position carried over,
                // fresh shorthand registers and a fresh stack; the
                // outer frame is untouchable from inside.
                let mut sub_state = ExecState {
                    frame: RegisterFrame {
                        h: state.frame.h,
                        v: state.frame.v,
                        pixel_v: state.frame.pixel_v,
                        ..RegisterFrame::default()
                    },
                    stack: Vec::new(),
                    font: self.fonts.virtual_sub_font(font_id, None),
                    table: FontNumTable::default(),
                    dir: state.dir,
                    reflect_ends: Vec::new(),
                };
                let mut cursor = DviCursor::new(&program);
                self.execute(
                    &program,
                    &mut cursor,
                    &mut sub_state,
                    sink,
                    Some((font_id, code)),
                    depth + 1,
                    false,
                )?;
                if advance && state.dir > 0 {
                    state.frame.h += adv;
                }
            }
            GlyphDispatch::Empty => {
                // Font failed to load: zero advance, no output.
            }
        }
        Ok(())
    }

    fn do_rule(
        &mut self,
        cursor: &mut DviCursor,
        state: &mut ExecState,
        sink: &mut dyn PageSink,
        advance: bool,
    ) {
        let height = cursor.read_i32();
        let width = cursor.read_i32();
        if advance && state.dir < 0 {
            state.frame.h -= width;
        }
        if height > 0 && width > 0 {
            let shrink = self.fonts.shrink_factor();
            let w = self.params.rule_pixels(width, shrink);
            let h = self.params.rule_pixels(height, shrink);
            let origin = (
                self.params.device(state.frame.h, shrink),
                device_row(state.frame.pixel_v, shrink) - h as i32 + 1,
            );
            sink.place_rule(origin, (w, h));
        }
        if advance && state.dir > 0 {
            state.frame.h += width;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::font::tests::MapSource;
    use crate::player::font::FontManager;

    fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    fn bop(out: &mut Vec<u8>) {
        out.push(BOP);
        for _ in 0..BOP_COUNTERS {
            push_u32(out, 0);
        }
        push_u32(out, 0xFFFF_FFFF);
    }

    /// FNTDEF1 for `name` with number 0 at design-size scale.
    fn fntdef(out: &mut Vec<u8>, name: &str) {
        out.push(FNTDEF1);
        out.push(0);
        push_u32(out, 0);
        push_u32(out, 10 << 20);
        push_u32(out, 10 << 20);
        out.push(0);
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
    }

    fn manager() -> FontManager {
        let mut source = MapSource::new();
        source.insert("tiny", 300, crate::dvi::font::pk::tests::one_pixel_font());
        source.insert("virt", 300, crate::dvi::font::vf::tests::simple_vf());
        FontManager::new(Box::new(source), 300)
    }

    fn render(mgr: &mut FontManager, program: &[u8]) -> Result<PageEvents, DviError> {
        let mut events = PageEvents::default();
        let table = FontNumTable::default();
        PageRenderer::new(mgr, DeviceParams::new(1.0)).render_page(program, &table, &mut events)?;
        Ok(events)
    }

    #[test]
    fn test_font_num_table_overflow_list() {
        let mut table = FontNumTable::default();
        table.define(3, 10);
        table.define(200, 11);
        table.define(200, 12);
        assert_eq!(table.lookup(3), Some(10));
        assert_eq!(table.lookup(200), Some(12));
        assert_eq!(table.lookup(5), None);
    }

    #[test]
    fn test_single_glyph_page() {
        let mut program = Vec::new();
        bop(&mut program);
        fntdef(&mut program, "tiny");
        program.push(FNTNUM0);
        program.push(b'A');
        program.push(EOP);

        let mut mgr = manager();
        let events = render(&mut mgr, &program).unwrap();
        assert_eq!(events.events.len(), 1);
        match &events.events[0] {
            PageEvent::Glyph { bitmap, origin } => {
                assert_eq!((bitmap.width, bitmap.height), (1, 1));
                assert!(bitmap.get_pixel(0, 0));
                assert_eq!(*origin, (0, 0));
            }
            other => panic!("expected glyph, got {:?}", other),
        }
    }

    #[test]
    fn test_unbalanced_push_is_fatal() {
        let mut program = Vec::new();
        bop(&mut program);
        program.push(PUSH);
        program.push(EOP);
        let mut mgr = manager();
        assert!(matches!(
            render(&mut mgr, &program),
            Err(DviError::StackUnbalanced { depth: 1, .. })
        ));
    }

    #[test]
    fn test_pop_without_push_is_fatal() {
        let mut program = Vec::new();
        bop(&mut program);
        program.push(POP);
        program.push(EOP);
        let mut mgr = manager();
        assert!(matches!(
            render(&mut mgr, &program),
            Err(DviError::StackUnderflow { .. })
        ));
    }

    #[test]
    fn test_undefined_font_number_is_fatal() {
        let mut program = Vec::new();
        bop(&mut program);
        program.push(FNTNUM0 + 5);
        program.push(EOP);
        let mut mgr = manager();
        assert!(matches!(
            render(&mut mgr, &program),
            Err(DviError::UndefinedFontNumber { number: 5, .. })
        ));
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let mut program = Vec::new();
        bop(&mut program);
        program.push(252);
        let mut mgr = manager();
        assert!(matches!(
            render(&mut mgr, &program),
            Err(DviError::UnknownOpcode { opcode: 252, .. })
        ));
    }

    #[test]
    fn test_rules_and_moves() {
        let mut program = Vec::new();
        bop(&mut program);
        program.push(DOWN1 + 3); // down4
        push_u32(&mut program, 40);
        program.push(RIGHT1);
        program.push(10);
        program.push(SETRULE);
        push_u32(&mut program, 8); // height
        push_u32(&mut program, 4); // width
        program.push(PUTRULE);
        push_u32(&mut program, 0xFFFF_FFF0); // negative height: no output
        push_u32(&mut program, 4);
        program.push(EOP);

        let mut mgr = manager();
        let events = render(&mut mgr, &program).unwrap();
        assert_eq!(events.events.len(), 1);
        match &events.events[0] {
            PageEvent::Rule { origin, size } => {
                assert_eq!(*size, (4, 8));
                // Rule grows up from the pen position.
                assert_eq!(*origin, (10, 40 - 8 + 1));
            }
            other => panic!("expected rule, got {:?}", other),
        }
    }

    #[test]
    fn test_w_register_shorthand() {
        // w1 sets and moves; w0 repeats the move.
        let mut program = Vec::new();
        bop(&mut program);
        fntdef(&mut program, "tiny");
        program.push(FNTNUM0);
        program.push(W1);
        program.push(7);
        program.push(W0);
        program.push(b'A');
        program.push(EOP);
        let mut mgr = manager();
        let events = render(&mut mgr, &program).unwrap();
        match &events.events[0] {
            PageEvent::Glyph { origin, .. } => assert_eq!(*origin, (14, 0)),
            other => panic!("expected glyph, got {:?}", other),
        }
    }

    #[test]
    fn test_repeated_small_leads_round_per_move() {
        // Two half-pixel leads give two device rows, not one: the
        // baseline row accumulates per-move rounding (within the
        // drift clamp) instead of re-rounding v.
        let mut program = Vec::new();
        bop(&mut program);
        fntdef(&mut program, "tiny");
        program.push(FNTNUM0);
        program.push(DOWN1);
        program.push(1);
        program.push(DOWN1);
        program.push(1);
        program.push(b'A');
        program.push(EOP);

        let mut mgr = manager();
        let mut events = PageEvents::default();
        let table = FontNumTable::default();
        PageRenderer::new(&mut mgr, DeviceParams::new(0.5))
            .render_page(&program, &table, &mut events)
            .unwrap();
        match &events.events[0] {
            PageEvent::Glyph { origin, .. } => assert_eq!(*origin, (0, 2)),
            other => panic!("expected glyph, got {:?}", other),
        }
    }

    #[test]
    fn test_special_payload_forwarded_verbatim() {
        let mut program = Vec::new();
        bop(&mut program);
        program.push(XXX1);
        program.push(5);
        program.extend_from_slice(b"color");
        program.push(EOP);
        let mut mgr = manager();
        let events = render(&mut mgr, &program).unwrap();
        assert_eq!(events.events, vec![PageEvent::Special(b"color".to_vec())]);
    }

    #[test]
    fn test_missing_font_renders_rest_of_page() {
        let mut program = Vec::new();
        bop(&mut program);
        fntdef(&mut program, "ghost");
        program.push(FNTNUM0);
        program.push(b'A'); // ghost font: empty glyph, zero advance
        fntdef_tiny_as(&mut program, 1);
        program.push(FNTNUM0 + 1);
        program.push(b'A');
        program.push(EOP);

        let mut mgr = manager();
        let events = render(&mut mgr, &program).unwrap();
        assert_eq!(events.events.len(), 1);
    }

    fn fntdef_tiny_as(out: &mut Vec<u8>, number: u8) {
        out.push(FNTDEF1);
        out.push(number);
        push_u32(out, 0);
        push_u32(out, 10 << 20);
        push_u32(out, 10 << 20);
        out.push(0);
        out.push(4);
        out.extend_from_slice(b"tiny");
    }

    #[test]
    fn test_virtual_macro_matches_direct_set() {
        // Macro for code 6 is PUSH, SETCHAR 'A', POP against the
        // default sub-font; it must place exactly what a direct
        // SETCHAR 'A' places, and leave the outer frame alone.
        let mut direct = Vec::new();
        bop(&mut direct);
        fntdef(&mut direct, "tiny");
        direct.push(FNTNUM0);
        direct.push(RIGHT1);
        direct.push(9);
        direct.push(b'A');
        direct.push(EOP);

        let mut via_macro = Vec::new();
        bop(&mut via_macro);
        fntdef(&mut via_macro, "virt");
        via_macro.push(FNTNUM0);
        via_macro.push(RIGHT1);
        via_macro.push(9);
        via_macro.push(6);
        via_macro.push(EOP);

        let mut mgr = manager();
        let direct_events = render(&mut mgr, &direct).unwrap();
        let macro_events = render(&mut mgr, &via_macro).unwrap();
        assert_eq!(direct_events.events, macro_events.events);
        assert_eq!(macro_events.events.len(), 1);
    }

    #[test]
    fn test_vf_self_reference_hits_depth_guard() {
        // A virtual font whose macro sets a character of itself.
        let mut vf = vec![PRE, 202, 0];
        push_u32(&mut vf, 0);
        push_u32(&mut vf, 10 << 20);
        vf.push(FNTDEF1);
        vf.push(0);
        push_u32(&mut vf, 0);
        push_u32(&mut vf, 1 << 20);
        push_u32(&mut vf, 10 << 20);
        vf.extend_from_slice(&[0, 4]);
        vf.extend_from_slice(b"loop");
        vf.push(1); // macro length
        vf.push(6); // code
        vf.extend_from_slice(&[0, 0, 0]);
        vf.push(6); // the macro sets char 6 again
        vf.push(POST);

        let mut source = MapSource::new();
        source.insert("loop", 300, vf);
        let mut mgr = FontManager::new(Box::new(source), 300);

        let mut program = Vec::new();
        bop(&mut program);
        fntdef(&mut program, "loop");
        program.push(FNTNUM0);
        program.push(6);
        program.push(EOP);
        assert!(matches!(
            render(&mut mgr, &program),
            Err(DviError::VfRecursionLimit { .. })
        ));
    }

    #[test]
    fn test_reflection_round_trip() {
        // h after a reflected run equals h after the same run
        // unreflected, and the same glyphs appear mirrored about the
        // run's span.
        let mut plain = Vec::new();
        bop(&mut plain);
        fntdef(&mut plain, "tiny");
        plain.push(FNTNUM0);
        plain.push(RIGHT1);
        plain.push(3);
        plain.push(b'A');
        plain.push(RIGHT1);
        plain.push(5);
        plain.push(b'A');
        plain.push(b'A');
        plain.push(EOP);

        let mut reflected = Vec::new();
        bop(&mut reflected);
        fntdef(&mut reflected, "tiny");
        reflected.push(FNTNUM0);
        reflected.push(RIGHT1);
        reflected.push(3);
        reflected.push(BEGIN_REFLECT);
        reflected.push(b'A');
        reflected.push(RIGHT1);
        reflected.push(5);
        reflected.push(b'A');
        reflected.push(b'A');
        reflected.push(END_REFLECT);
        // A trailing glyph confirms h continued from the run's end.
        reflected.push(b'A');
        reflected.push(EOP);

        let mut mgr = manager();
        let plain_events = render(&mut mgr, &plain).unwrap();
        let reflected_events = render(&mut mgr, &reflected).unwrap();

        let xs = |evs: &PageEvents| -> Vec<i32> {
            evs.events
                .iter()
                .filter_map(|e| match e {
                    PageEvent::Glyph { origin, .. } => Some(origin.0),
                    _ => None,
                })
                .collect()
        };
        // Plain: advance 1<<20 per glyph... with conv=1.0 DVI==pixels,
        // glyphs land at 3, 3+adv+5, 3+2*adv+5.
        let plain_xs = xs(&plain_events);
        let mut reflected_xs = xs(&reflected_events);
        let trailing = reflected_xs.pop().unwrap();
        // The reflected glyphs cover the same columns, in reverse
        // placement order shifted by one advance (first glyph sits at
        // the run's right edge minus its width).
        let run_start = 3;
        let run_end = *plain_xs.iter().max().unwrap() + plain_advance(&mut mgr);
        assert_eq!(reflected_xs.len(), plain_xs.len());
        for x in &reflected_xs {
            assert!(*x >= run_start && *x < run_end);
        }
        // Glyphs come out in reverse spatial order.
        let mut sorted = reflected_xs.clone();
        sorted.sort_unstable();
        sorted.reverse();
        assert_eq!(reflected_xs, sorted);
        // And the trailing glyph starts exactly at the run's end.
        assert_eq!(trailing, run_end);
    }

    fn plain_advance(mgr: &mut FontManager) -> i32 {
        let id = mgr.resolve("tiny", 300.0, 0, 10 << 20, 10 << 20);
        mgr.glyph_advance(id, b'A' as u32).unwrap()
    }

    #[test]
    fn test_unterminated_reflection_is_fatal() {
        let mut program = Vec::new();
        bop(&mut program);
        program.push(BEGIN_REFLECT);
        program.push(EOP);
        let mut mgr = manager();
        assert!(matches!(
            render(&mut mgr, &program),
            Err(DviError::UnterminatedReflection { .. })
        ));
    }

    #[test]
    fn test_stray_end_reflect_is_fatal() {
        let mut program = Vec::new();
        bop(&mut program);
        program.push(END_REFLECT);
        program.push(EOP);
        let mut mgr = manager();
        assert!(matches!(
            render(&mut mgr, &program),
            Err(DviError::UnknownOpcode {
                opcode: END_REFLECT,
                ..
            })
        ));
    }
}
