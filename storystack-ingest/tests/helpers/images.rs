//! Synthetic photos

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use storystack_ingest::models::RawPick;

pub fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

/// Small PNG whose bytes differ for every seed
pub fn unique_png(seed: u32) -> Vec<u8> {
    let [a, b, c, d] = seed.to_le_bytes();
    let image = RgbImage::from_fn(8, 8, |x, y| {
        if x == 0 && y == 0 {
            Rgb([a, b, c])
        } else {
            Rgb([d, (x * 16) as u8, (y * 16) as u8])
        }
    });
    encode(image, ImageFormat::Png)
}

/// `count` distinct PNG picks, seeds starting at `first_seed`
pub fn picks(count: usize, first_seed: u32) -> Vec<RawPick> {
    (0..count)
        .map(|i| {
            let seed = first_seed + i as u32;
            RawPick::new(format!("photo-{}.png", seed), unique_png(seed))
        })
        .collect()
}
