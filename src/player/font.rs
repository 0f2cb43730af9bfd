/// Font registry: resolves a font name+size to a loaded font, dedups
/// identical requests, shares fonts between a document and its virtual
/// fonts, and tracks liveness for unloading.
///
/// Fonts live in an id-addressed arena; virtual sub-fonts hold ids, not
/// owning pointers, so shared and even cyclic font graphs need no
/// reference counting. The whole manager is plain owned data: callers
/// that render pages concurrently wrap it in one Mutex.

use std::sync::Arc;

use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use log::{debug, info, warn};
use nohash_hasher::IntMap;

use crate::dvi::font::{gf, pk, sniff, vf, FontFormat};
use crate::error::DviError;
use crate::player::bitmap::Bitmap;
use crate::player::rescale::{shrink, RescaleParams};

pub type FontId = u32;

/// Upper bound on the substitution search radius, whatever the
/// requested resolution.
const MAX_SUBST_DELTA: u32 = 1024;

/// Where font container bytes come from. File-system lookup lives
/// outside this crate.
pub trait FontSource {
    fn load(&self, name: &str, dpi: u32) -> Option<Vec<u8>>;
}

/// `(tfm fixword) * (scale in DVI units)`, the conventional fixword
/// product for glyph advances.
pub fn fixword_mul(tfm: u32, scale: i32) -> i32 {
    ((tfm as i64 * scale as i64) >> 20) as i32
}

/// Snap a requested resolution to the nearest standard magstep
/// (base * 1.2^(k/2)) when it lands within 1/500 of one, so
/// magstep-equivalent requests dedup to one font.
pub fn magstep_snap(dpi: f64, base_dpi: u32) -> u32 {
    if dpi <= 0.0 {
        return base_dpi;
    }
    for k in -16i32..=16 {
        let step = base_dpi as f64 * 1.2f64.powf(k as f64 / 2.0);
        if (dpi - step).abs() < step / 500.0 {
            return step.round() as u32;
        }
    }
    dpi.round() as u32
}

#[derive(Debug)]
pub enum FontKind {
    /// Resolved but not yet loaded; loading happens on first use.
    Deferred,
    Raster(RasterFont),
    Virtual(VirtualFont),
    /// No resource found: every glyph is empty, advances are zero.
    Missing,
}

#[derive(Debug)]
pub enum RasterBacking {
    Pk(pk::PkDirectory),
    Gf(gf::GfDirectory),
}

#[derive(Debug)]
pub struct RasterFont {
    data: Vec<u8>,
    backing: RasterBacking,
    glyphs: IntMap<u32, GlyphRecord>,
}

#[derive(Debug, Default)]
pub struct GlyphRecord {
    /// Decoded once, memoized for the font's lifetime.
    pub natural: Option<Bitmap>,
    /// Invalidated wholesale when the shrink factor changes.
    pub device: Option<Bitmap>,
    /// Terminal "permanently absent" marker so failed lookups never
    /// repeat.
    pub absent: bool,
}

#[derive(Debug)]
pub struct VirtualFont {
    /// code -> (tfm width, macro program).
    pub macros: IntMap<u32, (u32, Arc<[u8]>)>,
    /// Local font number -> registry id.
    pub font_map: FxHashMap<i32, FontId>,
    /// First sub-font defined; macros start with it selected.
    pub default_font: Option<FontId>,
}

#[derive(Debug)]
pub struct Font {
    pub name: String,
    /// Zero until some reference declares one; later references must
    /// agree or a (non-fatal) mismatch is reported.
    pub checksum: u32,
    /// Scale factor in DVI units.
    pub scale: i32,
    pub design_size: i32,
    /// Dedup-key resolution (magstep-snapped).
    pub dpi: u32,
    /// Resolution of the resource actually loaded.
    pub actual_dpi: u32,
    pub in_use: bool,
    pub kind: FontKind,
}

/// What the interpreter needs to know to dispatch a set-char.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlyphDispatch {
    Raster,
    Virtual,
    Empty,
}

pub struct FontManager {
    pub fonts: IntMap<FontId, Font>,
    font_counter: FontId,
    key_cache: FxHashMap<(String, u32), FontId>,
    source: Box<dyn FontSource>,
    /// Unscaled device resolution.
    pub base_dpi: u32,
    /// Document magnification / 1000.
    pub mag: f64,
    /// Substitution search range as a fraction of the requested dpi.
    /// The original's constant is implementation-defined, so it is a
    /// knob here.
    pub resolution_tolerance: f64,
    pub rescale_params: RescaleParams,
    shrink_factor: f64,
    warned: FxHashSet<String>,
}

impl FontManager {
    pub fn new(source: Box<dyn FontSource>, base_dpi: u32) -> FontManager {
        FontManager {
            fonts: IntMap::default(),
            font_counter: 0,
            key_cache: FxHashMap::default(),
            source,
            base_dpi,
            mag: 1.0,
            resolution_tolerance: 0.02,
            rescale_params: RescaleParams::default(),
            shrink_factor: 1.0,
            warned: FxHashSet::default(),
        }
    }

    pub fn shrink_factor(&self) -> f64 {
        self.shrink_factor
    }

    /// Changing the shrink factor (zoom) drops every device bitmap.
    pub fn set_shrink_factor(&mut self, factor: f64) {
        if (factor - self.shrink_factor).abs() < f64::EPSILON {
            return;
        }
        self.shrink_factor = factor;
        for font in self.fonts.values_mut() {
            if let FontKind::Raster(raster) = &mut font.kind {
                for glyph in raster.glyphs.values_mut() {
                    glyph.device = None;
                }
            }
        }
    }

    fn warn_once(&mut self, key: String, message: String) {
        if self.warned.insert(key) {
            warn!("{}", message);
        }
    }

    /// Requested resolution for a font used at `scale` DVI units with
    /// design size `design_size`, under the current magnification.
    pub fn request_dpi(&self, scale: i32, design_size: i32) -> f64 {
        if design_size == 0 {
            return self.base_dpi as f64 * self.mag;
        }
        self.base_dpi as f64 * self.mag * scale as f64 / design_size as f64
    }

    /// Resolve a font reference to a handle, deduplicating on
    /// `(name, snapped dpi)`. Marks the handle in-use. Loading is
    /// deferred to first glyph use.
    pub fn resolve(
        &mut self,
        name: &str,
        requested_dpi: f64,
        checksum: u32,
        scale: i32,
        design_size: i32,
    ) -> FontId {
        let dpi = magstep_snap(requested_dpi, self.base_dpi);
        let key = (name.to_string(), dpi);
        if let Some(&id) = self.key_cache.get(&key) {
            let font = self.fonts.get_mut(&id).expect("key cache points at arena");
            font.in_use = true;
            if font.checksum == 0 {
                font.checksum = checksum;
            } else if checksum != 0 && checksum != font.checksum {
                let (have, name) = (font.checksum, font.name.clone());
                self.warn_once(
                    format!("cksum:{}:{}", name, dpi),
                    format!(
                        "checksum mismatch for font {} at {}dpi: {:08x} vs {:08x}",
                        name, dpi, have, checksum
                    ),
                );
            }
            return id;
        }

        let id = self.font_counter;
        self.font_counter += 1;
        debug!("font {} at {}dpi registered as #{}", name, dpi, id);
        self.fonts.insert(
            id,
            Font {
                name: name.to_string(),
                checksum,
                scale,
                design_size,
                dpi,
                actual_dpi: dpi,
                in_use: true,
                kind: FontKind::Deferred,
            },
        );
        self.key_cache.insert(key, id);
        id
    }

    /// Try the exact resolution, then alternating ±delta inside the
    /// tolerance window. A non-exact hit logs a substitution notice.
    fn fetch(&mut self, name: &str, dpi: u32) -> Option<(Vec<u8>, u32)> {
        if let Some(data) = self.source.load(name, dpi) {
            return Some((data, dpi));
        }
        let max_delta = ((dpi as f64 * self.resolution_tolerance).ceil() as u32).min(MAX_SUBST_DELTA);
        for delta in 1..=max_delta {
            for &candidate in &[dpi.saturating_add(delta), dpi.saturating_sub(delta)] {
                if candidate == dpi || candidate == 0 {
                    continue;
                }
                if let Some(data) = self.source.load(name, candidate) {
                    self.warn_once(
                        format!("subst:{}:{}", name, dpi),
                        format!(
                            "font {}: no resource at {}dpi, substituting {}dpi",
                            name, dpi, candidate
                        ),
                    );
                    return Some((data, candidate));
                }
            }
        }
        None
    }

    /// Load a deferred font synchronously. Idempotent; a failed load
    /// leaves the font Missing and rendering continues with empty
    /// glyphs.
    pub fn ensure_loaded(&mut self, id: FontId) -> Result<(), DviError> {
        match self.fonts.get(&id) {
            Some(font) if matches!(font.kind, FontKind::Deferred) => {}
            _ => return Ok(()),
        }
        let (name, dpi, declared_checksum, scale) = {
            let font = &self.fonts[&id];
            (font.name.clone(), font.dpi, font.checksum, font.scale)
        };

        let fetched = self.fetch(&name, dpi);
        let (data, actual_dpi) = match fetched {
            Some(hit) => hit,
            None => {
                self.warn_once(
                    format!("notfound:{}:{}", name, dpi),
                    format!("font {} not found at {}dpi, rendering empty", name, dpi),
                );
                if let Some(font) = self.fonts.get_mut(&id) {
                    font.kind = FontKind::Missing;
                }
                return Ok(());
            }
        };

        let kind = match sniff(&data) {
            Some(FontFormat::Pk) => {
                let dir = pk::scan(&data)?;
                self.check_container_checksum(&name, dpi, declared_checksum, dir.checksum);
                FontKind::Raster(RasterFont {
                    data,
                    backing: RasterBacking::Pk(dir),
                    glyphs: IntMap::default(),
                })
            }
            Some(FontFormat::Gf) => {
                let dir = gf::scan(&data)?;
                self.check_container_checksum(&name, dpi, declared_checksum, dir.checksum);
                FontKind::Raster(RasterFont {
                    data,
                    backing: RasterBacking::Gf(dir),
                    glyphs: IntMap::default(),
                })
            }
            Some(FontFormat::Vf) => {
                let container = vf::parse(&data)?;
                self.check_container_checksum(&name, dpi, declared_checksum, container.checksum);
                let virt = self.build_virtual(container, scale);
                FontKind::Virtual(virt)
            }
            None => {
                return Err(DviError::BadPreamble {
                    offset: 0,
                    reason: format!("font {}: unrecognized container", name),
                });
            }
        };
        if let Some(font) = self.fonts.get_mut(&id) {
            font.kind = kind;
            font.actual_dpi = actual_dpi;
        }
        Ok(())
    }

    fn check_container_checksum(&mut self, name: &str, dpi: u32, declared: u32, found: u32) {
        if declared != 0 && found != 0 && declared != found {
            self.warn_once(
                format!("cksum:{}:{}", name, dpi),
                format!(
                    "checksum mismatch for font {} at {}dpi: {:08x} vs {:08x}",
                    name, dpi, declared, found
                ),
            );
        }
    }

    /// Resolve a VF's sub-fonts through this same registry, so a
    /// virtual font shares loaded fonts with its host document.
    fn build_virtual(&mut self, container: vf::VfContainer, parent_scale: i32) -> VirtualFont {
        let mut font_map = FxHashMap::default();
        let mut default_font = None;
        for def in &container.font_defs {
            // Sub-font scale is a fixword fraction of the parent's
            // scale factor.
            let sub_scale = fixword_mul(def.scale as u32, parent_scale);
            let dpi = self.request_dpi(sub_scale, def.design_size);
            let sub_id = self.resolve(&def.name, dpi, def.checksum, sub_scale, def.design_size);
            font_map.insert(def.number, sub_id);
            default_font.get_or_insert(sub_id);
        }
        let macros = container
            .macros
            .into_iter()
            .map(|(code, mac)| (code, (mac.tfm_width, Arc::from(mac.program))))
            .collect();
        VirtualFont {
            macros,
            font_map,
            default_font,
        }
    }

    pub fn get(&self, id: FontId) -> Option<&Font> {
        self.fonts.get(&id)
    }

    /// Dispatch mode of a font, loading it first if still deferred.
    pub fn dispatch_kind(&mut self, id: FontId) -> Result<GlyphDispatch, DviError> {
        self.ensure_loaded(id)?;
        Ok(match self.fonts.get(&id).map(|f| &f.kind) {
            Some(FontKind::Raster(_)) => GlyphDispatch::Raster,
            Some(FontKind::Virtual(_)) => GlyphDispatch::Virtual,
            _ => GlyphDispatch::Empty,
        })
    }

    /// Advance for a character in DVI units; zero for absent glyphs
    /// and missing fonts.
    pub fn glyph_advance(&mut self, id: FontId, code: u32) -> Result<i32, DviError> {
        self.ensure_loaded(id)?;
        let font = match self.fonts.get(&id) {
            Some(f) => f,
            None => return Ok(0),
        };
        let scale = font.scale;
        Ok(match &font.kind {
            FontKind::Raster(raster) => match &raster.backing {
                RasterBacking::Pk(dir) => dir
                    .chars
                    .get(&code)
                    .map_or(0, |loc| fixword_mul(loc.tfm_width, scale)),
                RasterBacking::Gf(dir) => dir
                    .chars
                    .get(&code)
                    .map_or(0, |loc| fixword_mul(loc.tfm_width, scale)),
            },
            FontKind::Virtual(virt) => virt
                .macros
                .get(&code)
                .map_or(0, |(tfm, _)| fixword_mul(*tfm, scale)),
            _ => 0,
        })
    }

    /// Natural-resolution bitmap for a character, decoding and
    /// memoizing on first use. `None` means "character not defined"
    /// (warned once, renders empty).
    pub fn natural_glyph(&mut self, id: FontId, code: u32) -> Result<Option<Bitmap>, DviError> {
        self.ensure_loaded(id)?;
        self.decode_into_record(id, code)?;
        let font = match self.fonts.get(&id) {
            Some(f) => f,
            None => return Ok(None),
        };
        if let FontKind::Raster(raster) = &font.kind {
            if let Some(record) = raster.glyphs.get(&code) {
                return Ok(record.natural.clone());
            }
        }
        Ok(None)
    }

    /// Device-resolution bitmap for a character, rescaled under the
    /// current shrink factor and cached until the factor changes.
    pub fn device_glyph(&mut self, id: FontId, code: u32) -> Result<Option<Bitmap>, DviError> {
        self.ensure_loaded(id)?;
        self.decode_into_record(id, code)?;
        let factor = self.shrink_factor;
        let params = self.rescale_params;
        let font = match self.fonts.get_mut(&id) {
            Some(f) => f,
            None => return Ok(None),
        };
        if let FontKind::Raster(raster) = &mut font.kind {
            if let Some(record) = raster.glyphs.get_mut(&code) {
                if record.absent {
                    return Ok(None);
                }
                if record.device.is_none() {
                    let natural = record.natural.as_ref().expect("decoded record has raster");
                    record.device = Some(shrink(natural, factor, &params));
                }
                return Ok(record.device.clone());
            }
        }
        Ok(None)
    }

    /// Make sure a glyph record exists for `code`, decoding the raster
    /// on first reference or marking the code permanently absent.
    fn decode_into_record(&mut self, id: FontId, code: u32) -> Result<(), DviError> {
        let (decoded, name, dpi) = {
            let font = match self.fonts.get(&id) {
                Some(f) => f,
                None => return Ok(()),
            };
            let raster = match &font.kind {
                FontKind::Raster(r) => r,
                _ => return Ok(()),
            };
            if raster.glyphs.contains_key(&code) {
                return Ok(());
            }
            let glyph = match &raster.backing {
                RasterBacking::Pk(dir) => match dir.chars.get(&code) {
                    Some(loc) => Some(pk::decode_char(&raster.data, loc, code)?),
                    None => None,
                },
                RasterBacking::Gf(dir) => match dir.chars.get(&code) {
                    Some(loc) => Some(gf::decode_char(&raster.data, loc, code)?),
                    None => None,
                },
            };
            (glyph, font.name.clone(), font.dpi)
        };

        let record = match decoded {
            Some(bitmap) => GlyphRecord {
                natural: Some(bitmap),
                device: None,
                absent: false,
            },
            None => {
                self.warn_once(
                    format!("nochar:{}:{}:{}", name, dpi, code),
                    format!("character {} not defined in font {}", code, name),
                );
                GlyphRecord {
                    absent: true,
                    ..GlyphRecord::default()
                }
            }
        };
        if let Some(font) = self.fonts.get_mut(&id) {
            if let FontKind::Raster(raster) = &mut font.kind {
                raster.glyphs.insert(code, record);
            }
        }
        Ok(())
    }

    /// Macro program and advance for a virtual-font character. `None`
    /// for unassigned codes (renders nothing, not an error).
    pub fn macro_program(&mut self, id: FontId, code: u32) -> Option<(Arc<[u8]>, i32)> {
        let font = self.fonts.get(&id)?;
        let scale = font.scale;
        if let FontKind::Virtual(virt) = &font.kind {
            return virt
                .macros
                .get(&code)
                .map(|(tfm, program)| (Arc::clone(program), fixword_mul(*tfm, scale)));
        }
        None
    }

    /// Sub-font for a local number inside a VF macro, falling back to
    /// the first-defined sub-font when the macro never selects one.
    pub fn virtual_sub_font(&self, id: FontId, local_number: Option<i32>) -> Option<FontId> {
        let font = self.fonts.get(&id)?;
        if let FontKind::Virtual(virt) = &font.kind {
            return match local_number {
                Some(n) => virt.font_map.get(&n).copied(),
                None => virt.default_font,
            };
        }
        None
    }

    /// Start a liveness sweep: everything is presumed dead until a
    /// font table re-marks it.
    pub fn begin_sweep(&mut self) {
        for font in self.fonts.values_mut() {
            font.in_use = false;
        }
    }

    /// Mark a handle and, transitively, its virtual sub-fonts in-use.
    pub fn mark_in_use(&mut self, id: FontId) {
        let mut pending = vec![id];
        let mut seen: FxHashSet<FontId> = FxHashSet::default();
        while let Some(next) = pending.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(font) = self.fonts.get_mut(&next) {
                font.in_use = true;
                if let FontKind::Virtual(virt) = &font.kind {
                    pending.extend(virt.font_map.values().copied());
                }
            }
        }
    }

    /// Evict every handle the sweep left unused and release its
    /// resources.
    pub fn sweep(&mut self) {
        let dead: Vec<FontId> = self
            .fonts
            .iter()
            .filter(|(_, font)| !font.in_use)
            .map(|(&id, _)| id)
            .collect();
        if dead.is_empty() {
            return;
        }
        let names = dead
            .iter()
            .filter_map(|id| self.fonts.get(id).map(|f| f.name.clone()))
            .sorted()
            .unique()
            .join(", ");
        info!("evicting {} unused font(s): {}", dead.len(), names);
        for id in dead {
            if let Some(font) = self.fonts.remove(&id) {
                self.key_cache.remove(&(font.name, font.dpi));
            }
        }
    }
}
