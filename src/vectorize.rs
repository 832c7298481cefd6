//! Binary mask -> polygon rings, bounding box and area.

use geo::Simplify;
use geo_types::{Coord, LineString};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};

use crate::coco::Rle;

/// Vectorized foreground of one mask
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Flat `[x0, y0, x1, y1, ...]` rings, one per connected outer boundary
    pub polygons: Vec<Vec<f64>>,
    /// `[x, y, width, height]` in pixels
    pub bbox: [f64; 4],
    /// Foreground pixel count
    pub area: f64,
}

/// Turns a binary mask into a [`Region`]; `None` when the mask has no foreground.
pub trait MaskVectorizer: Send + Sync {
    fn vectorize(&self, mask: &GrayImage, tolerance: f64) -> Option<Region>;
}

/// Border following via `imageproc::contours::find_contours` and
/// Ramer-Douglas-Peucker simplification via `geo`.
#[derive(Debug, Clone, Default)]
pub struct ContourVectorizer;

impl MaskVectorizer for ContourVectorizer {
    fn vectorize(&self, mask: &GrayImage, tolerance: f64) -> Option<Region> {
        let (bbox, area) = pixel_extent(mask)?;

        let mut polygons: Vec<Vec<f64>> = find_contours::<i32>(mask)
            .into_iter()
            .filter(|contour| contour.border_type == BorderType::Outer)
            .filter_map(|contour| {
                let ring: Vec<Coord<f64>> = contour
                    .points
                    .iter()
                    .map(|p| Coord {
                        x: p.x as f64,
                        y: p.y as f64,
                    })
                    .collect();
                simplify_ring(ring, tolerance)
            })
            .collect();

        // regions too thin to trace a ring still get an outline
        if polygons.is_empty() {
            polygons.push(rectangle_to_polygon(bbox));
        }

        Some(Region {
            polygons,
            bbox,
            area,
        })
    }
}

/// Simplify a contour as a closed ring; `None` if fewer than three points remain.
fn simplify_ring(mut ring: Vec<Coord<f64>>, tolerance: f64) -> Option<Vec<f64>> {
    let first = *ring.first()?;
    ring.push(first);

    let simplified = LineString::new(ring).simplify(&tolerance);
    let mut coords: Vec<Coord<f64>> = simplified.coords().copied().collect();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return None;
    }

    Some(coords.into_iter().flat_map(|c| [c.x, c.y]).collect())
}

/// Bounding box and pixel count of the foreground, `None` if empty
pub fn pixel_extent(mask: &GrayImage) -> Option<([f64; 4], f64)> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0u32, 0u32);
    let mut count = 0u64;

    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] > 0 {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }

    let bbox = [
        min_x as f64,
        min_y as f64,
        (max_x - min_x + 1) as f64,
        (max_y - min_y + 1) as f64,
    ];
    Some((bbox, count as f64))
}

/// Convert a bounding box to the polygon along its pixel edges
pub fn rectangle_to_polygon(bbox: [f64; 4]) -> Vec<f64> {
    let [x, y, w, h] = bbox;
    vec![x, y, x + w, y, x + w, y + h, x, y + h]
}

/// Uncompressed column-major RLE; the first run counts background pixels.
pub fn encode_rle(mask: &GrayImage) -> Rle {
    let (width, height) = mask.dimensions();
    let mut counts = Vec::new();
    let mut current = false;
    let mut run = 0u32;

    for x in 0..width {
        for y in 0..height {
            let value = mask.get_pixel(x, y)[0] > 0;
            if value != current {
                counts.push(run);
                run = 0;
                current = value;
            }
            run += 1;
        }
    }
    counts.push(run);

    Rle {
        counts,
        size: [height, width],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square_mask(size: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_empty_mask_has_no_region() {
        let mask = GrayImage::new(10, 10);
        assert!(ContourVectorizer.vectorize(&mask, 2.0).is_none());
    }

    #[test]
    fn test_square_region() {
        let mask = square_mask(20, 4, 5, 6);
        let region = ContourVectorizer.vectorize(&mask, 1.0).unwrap();

        assert_eq!(region.area, 36.0);
        assert_eq!(region.bbox, [4.0, 5.0, 6.0, 6.0]);
        assert_eq!(region.polygons.len(), 1);

        let ring = &region.polygons[0];
        assert_eq!(ring.len() % 2, 0);
        assert!(ring.len() >= 6);
        for point in ring.chunks(2) {
            assert!((4.0..=9.0).contains(&point[0]));
            assert!((5.0..=10.0).contains(&point[1]));
        }
    }

    #[test]
    fn test_two_blobs_give_two_rings() {
        let mut mask = square_mask(30, 2, 2, 5);
        for x in 20..26 {
            for y in 20..26 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let region = ContourVectorizer.vectorize(&mask, 0.5).unwrap();
        assert_eq!(region.polygons.len(), 2);
        assert_eq!(region.area, 25.0 + 36.0);
    }

    #[test]
    fn test_single_pixel_falls_back_to_box() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(2, 3, Luma([255]));
        let region = ContourVectorizer.vectorize(&mask, 2.0).unwrap();
        assert_eq!(region.area, 1.0);
        assert_eq!(region.polygons, vec![vec![2.0, 3.0, 3.0, 3.0, 3.0, 4.0, 2.0, 4.0]]);
    }

    #[test]
    fn test_encode_rle_column_major() {
        // 3 rows x 2 columns, foreground at (x=0,y=2) and (x=1,y=0)
        let mut mask = GrayImage::new(2, 3);
        mask.put_pixel(0, 2, Luma([255]));
        mask.put_pixel(1, 0, Luma([255]));

        let rle = encode_rle(&mask);
        assert_eq!(rle.size, [3, 2]);
        assert_eq!(rle.counts, vec![2, 2, 2]);
        assert_eq!(rle.counts.iter().sum::<u32>(), 6);
    }

    #[test]
    fn test_encode_rle_starts_with_background_run() {
        let mask = square_mask(2, 0, 0, 2);
        assert_eq!(encode_rle(&mask).counts, vec![0, 4]);
    }
}
