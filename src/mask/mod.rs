use std::fmt;

mod palette;

pub use palette::mask_color;

/// Binary segmentation mask, one byte per pixel, aligned to its frame image
#[derive(Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Mask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Returns `None` if `pixels` doesn't hold exactly `width * height` entries
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y) as u8)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of pixels which belong to the object
    pub fn count(&self) -> usize {
        self.pixels.iter().filter(|p| **p != 0).count()
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.pixels
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("set", &self.count())
            .finish()
    }
}
