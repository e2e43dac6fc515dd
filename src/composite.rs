use image::{Rgb, RgbImage};
use log::warn;

use crate::{
    database::Point,
    mask::{mask_color, Mask},
};

const BASE_DIM: f32 = 0.8;
const MASK_ALPHA: f32 = 0.4;
const MARKER_SIZE: i64 = 10;
pub const POSITIVE_MARKER: Rgb<u8> = Rgb([0, 255, 0]);
pub const NEGATIVE_MARKER: Rgb<u8> = Rgb([255, 0, 0]);

/// One record as it is drawn onto the frame
pub struct Layer<'a> {
    pub mask: &'a Mask,
    pub positive_points: &'a [Point],
    pub negative_points: &'a [Point],
}

/// Dims the image, blends one palette color per layer into its mask and draws
/// the points on top.
pub fn render<'a>(image: &RgbImage, layers: impl IntoIterator<Item = Layer<'a>>) -> RgbImage {
    let layers = layers.into_iter().collect::<Vec<_>>();
    let (width, height) = image.dimensions();

    let mut blended = image
        .as_raw()
        .iter()
        .map(|v| *v as f32 * BASE_DIM)
        .collect::<Vec<_>>();

    for (i, layer) in layers.iter().enumerate() {
        if layer.mask.dimensions() != (width, height) {
            warn!(
                "Skip overlay of mask {:?} on image of size {:?}",
                layer.mask.dimensions(),
                (width, height)
            );
            continue;
        }
        let color = mask_color(i);
        for (px, set) in blended.chunks_exact_mut(3).zip(layer.mask.as_raw()) {
            if *set == 0 {
                continue;
            }
            for (channel, c) in px.iter_mut().zip(color) {
                *channel = *channel * (1.0 - MASK_ALPHA) + c as f32 * MASK_ALPHA;
            }
        }
    }

    let pixels = blended
        .into_iter()
        .map(|v| v.clamp(0.0, 255.0) as u8)
        .collect();
    let mut result = RgbImage::from_raw(width, height, pixels)
        .expect("Buffer has the size of the source image");

    for layer in &layers {
        for point in layer.positive_points {
            draw_marker(&mut result, point, POSITIVE_MARKER);
        }
        for point in layer.negative_points {
            draw_marker(&mut result, point, NEGATIVE_MARKER);
        }
    }
    result
}

// Square of MARKER_SIZE starting half a marker before the point, clipped to the image
fn draw_marker(image: &mut RgbImage, point: &Point, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let (cx, cy) = (point.x as i64, point.y as i64);
    let half = MARKER_SIZE / 2;
    let x_range = (cx - half).max(0)..(cx + half).min(width as i64);
    let y_range = (cy - half).max(0)..(cy + half).min(height as i64);
    for y in y_range {
        for x in x_range.clone() {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}
