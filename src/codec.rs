use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use std::path::Path;

use crate::error::Result;

/// Reads image headers and mask pixels.
pub trait ImageCodec: Send + Sync {
    /// `(width, height)` of the image, or the decode error
    fn dimensions(&self, path: &Path) -> Result<(u32, u32)>;

    /// Load a mask as 0/255 pixels, scaled to `size` when its own size differs
    fn load_mask(&self, path: &Path, size: (u32, u32)) -> Result<GrayImage>;
}

/// Codec backed by the `image` crate
#[derive(Debug, Clone, Default)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        Ok(image::image_dimensions(path)?)
    }

    fn load_mask(&self, path: &Path, size: (u32, u32)) -> Result<GrayImage> {
        // 16-bit so that 0/1 masks stored as u16 stay non-zero
        let luma = image::open(path)?.to_luma16();
        let mask = GrayImage::from_fn(luma.width(), luma.height(), |x, y| {
            if luma.get_pixel(x, y)[0] > 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        });

        if mask.dimensions() == size {
            Ok(mask)
        } else {
            Ok(imageops::resize(&mask, size.0, size.1, FilterType::Nearest))
        }
    }
}
