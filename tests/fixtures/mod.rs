//! Batch source and image fixtures shared by the integration tests

#![allow(dead_code)]

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;

pub const CSV_HEADER: &str = "S. No.,Product Name,Input Image Urls";

/// One CSV row: a product and the image paths (relative to the mock server)
#[derive(Debug, Clone)]
pub struct BatchRowFixture {
    pub product: String,
    pub image_paths: Vec<String>,
}

impl BatchRowFixture {
    pub fn new(product: &str, image_paths: &[&str]) -> Self {
        Self {
            product: product.to_string(),
            image_paths: image_paths.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Render rows as a CSV batch source pointing at `base_url`.
pub fn render_csv(base_url: &str, rows: &[BatchRowFixture]) -> String {
    let mut csv = format!("{CSV_HEADER}\n");
    for (idx, row) in rows.iter().enumerate() {
        let urls: Vec<String> = row
            .image_paths
            .iter()
            .map(|p| format!("{base_url}{p}"))
            .collect();
        csv.push_str(&format!("{},{},\"{}\"\n", idx + 1, row.product, urls.join(",")));
    }
    csv
}

/// A small PNG whose pixels depend on `seed`, so every fixture is distinct.
pub fn png_image(seed: u8, width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([seed, (x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode fixture png");
    out.into_inner()
}

/// A source that has no image-reference column at all.
pub const MALFORMED_CSV: &str = "S. No.,Product Name\n1,SKU1\n";
