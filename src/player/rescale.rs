/// Glyph rescaling: natural-resolution bitmaps down to device resolution.
///
/// The hot point's device pixel is fixed first, then source cells are
/// anchored so the hot column/row starts its own cell. That gives
/// asymmetric leading/trailing margins and keeps the hot point on the
/// exact pixel it would land on if the whole page were rescaled
/// uniformly, so glyphs do not jitter against rules across zoom levels.

use super::bitmap::{Bitmap, Greymap};

#[derive(Clone, Copy, Debug)]
pub struct RescaleParams {
    /// Fraction of a source cell that must be inked for a bilevel
    /// output pixel to come out black.
    pub density: f64,
    /// Gamma applied to the grey ramp.
    pub gamma: f64,
}

impl Default for RescaleParams {
    fn default() -> Self {
        RescaleParams {
            density: 0.25,
            gamma: 1.0,
        }
    }
}

/// Per-axis cell geometry: device pixel range and the source boundary
/// of each device pixel, anchored on the hot point.
struct Axis {
    t_min: i32,
    t_max: i32,
    hot_device: i32,
    factor: f64,
    hot_natural: i32,
}

impl Axis {
    fn new(extent: u32, hot: i32, factor: f64) -> Axis {
        let hot2 = (hot as f64 / factor).round() as i32;
        let mut t_min = hot2;
        while Self::bound(hot, hot2, factor, t_min) > 0 {
            t_min -= 1;
        }
        while Self::bound(hot, hot2, factor, t_min + 1) <= 0 {
            t_min += 1;
        }
        let mut t_max = t_min;
        while Self::bound(hot, hot2, factor, t_max + 1) < extent as i32 {
            t_max += 1;
        }
        Axis {
            t_min,
            t_max,
            hot_device: hot2 - t_min,
            factor,
            hot_natural: hot,
        }
    }

    /// Source coordinate where device pixel `t`'s cell begins.
    fn bound(hot: i32, hot2: i32, factor: f64, t: i32) -> i32 {
        hot + (((t - hot2) as f64) * factor).round() as i32
    }

    fn len(&self) -> u32 {
        (self.t_max - self.t_min + 1) as u32
    }

    /// Clamped source range covered by device pixel index `i` (0-based).
    fn cell(&self, i: u32, extent: u32) -> (u32, u32) {
        let t = self.t_min + i as i32;
        let hot2 = self.hot_device + self.t_min;
        let lo = Self::bound(self.hot_natural, hot2, self.factor, t).max(0) as u32;
        let hi = Self::bound(self.hot_natural, hot2, self.factor, t + 1)
            .max(0)
            .min(extent as i32) as u32;
        (lo, hi.max(lo))
    }
}

fn cell_count(src: &Bitmap, xs: (u32, u32), ys: (u32, u32)) -> u32 {
    let mut count = 0;
    for y in ys.0..ys.1 {
        for x in xs.0..xs.1 {
            if src.get_pixel(x, y) {
                count += 1;
            }
        }
    }
    count
}

/// Box-filter shrink to a bilevel bitmap. `factor == 1.0` is an
/// identity copy.
pub fn shrink(natural: &Bitmap, factor: f64, params: &RescaleParams) -> Bitmap {
    if factor <= 1.0 || natural.is_empty() {
        return natural.clone();
    }
    let ax = Axis::new(natural.width, natural.hot_x, factor);
    let ay = Axis::new(natural.height, natural.hot_y, factor);
    let mut out = Bitmap::new(ax.len(), ay.len());
    out.hot_x = ax.hot_device;
    out.hot_y = ay.hot_device;

    let threshold = (params.density * factor * factor).max(1.0);
    for ty in 0..out.height {
        let ys = ay.cell(ty, natural.height);
        for tx in 0..out.width {
            let xs = ax.cell(tx, natural.width);
            if cell_count(natural, xs, ys) as f64 >= threshold {
                out.set_pixel(tx, ty);
            }
        }
    }
    out
}

/// Box-filter shrink to a gamma-mapped greymap.
pub fn shrink_grey(natural: &Bitmap, factor: f64, params: &RescaleParams) -> Greymap {
    let factor = factor.max(1.0);
    let ax = Axis::new(natural.width, natural.hot_x, factor);
    let ay = Axis::new(natural.height, natural.hot_y, factor);
    let mut out = Greymap::new(ax.len(), ay.len());
    out.hot_x = ax.hot_device;
    out.hot_y = ay.hot_device;

    let area = factor * factor;
    // Precomputed gamma ramp; cell counts index into it after
    // normalization, the way a paletted greyscale target would.
    let mut ramp = [0u8; 256];
    for (i, slot) in ramp.iter_mut().enumerate() {
        let v = (i as f64 / 255.0).powf(1.0 / params.gamma);
        *slot = (v * 255.0).round() as u8;
    }

    for ty in 0..out.height {
        let ys = ay.cell(ty, natural.height);
        for tx in 0..out.width {
            let xs = ax.cell(tx, natural.width);
            let count = cell_count(natural, xs, ys) as f64;
            let level = ((count / area).min(1.0) * 255.0).round() as usize;
            out.bytes[(ty * out.width + tx) as usize] = ramp[level];
        }
    }
    out
}
