/// Glyph bitmap containers.
///
/// `Bitmap` is 1 bit per pixel, row-major, MSB first, rows padded to a
/// whole byte. `Greymap` is one byte per pixel, produced by the grey
/// rescale path.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// Pixel that must align with the current pen position, measured
    /// rightward/downward from the top-left corner.
    pub hot_x: i32,
    pub hot_y: i32,
    pub bytes: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = Self::stride_for(width);
        Bitmap {
            width,
            height,
            hot_x: 0,
            hot_y: 0,
            bytes: vec![0; stride * height as usize],
        }
    }

    pub fn stride_for(width: u32) -> usize {
        ((width as usize) + 7) / 8
    }

    pub fn stride(&self) -> usize {
        Self::stride_for(self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let byte = self.bytes[y as usize * self.stride() + (x / 8) as usize];
        byte & (0x80 >> (x % 8)) != 0
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let stride = self.stride();
        self.bytes[y as usize * stride + (x / 8) as usize] |= 0x80 >> (x % 8);
    }

    /// Copy row `src` over row `dst`. Used by the PK row-repeat decode.
    pub fn copy_row(&mut self, src: u32, dst: u32) {
        if src == dst || src >= self.height || dst >= self.height {
            return;
        }
        let stride = self.stride();
        let (from, to) = (src as usize * stride, dst as usize * stride);
        let row: Vec<u8> = self.bytes[from..from + stride].to_vec();
        self.bytes[to..to + stride].copy_from_slice(&row);
    }

    /// Number of set pixels, padding bits excluded.
    pub fn count_set(&self) -> u64 {
        let mut total = 0u64;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get_pixel(x, y) {
                    total += 1;
                }
            }
        }
        total
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Greymap {
    pub width: u32,
    pub height: u32,
    pub hot_x: i32,
    pub hot_y: i32,
    /// One intensity byte per pixel, 0 = white, 255 = full ink.
    pub bytes: Vec<u8>,
}

impl Greymap {
    pub fn new(width: u32, height: u32) -> Self {
        Greymap {
            width,
            height,
            hot_x: 0,
            hot_y: 0,
            bytes: vec![0; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.bytes[(y * self.width + x) as usize]
    }
}
