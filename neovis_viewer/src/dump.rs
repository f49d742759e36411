//! Binary PPM output for layer canvases and field images.

use std::fs;
use std::io::Write;
use std::path::Path;

use neovis::render::{Canvas, Color, FieldImage};

use crate::error::ViewerError;

/// Window clear colour that transparent canvas pixels are composited onto.
pub const BACKDROP: Color = Color::rgb(50, 50, 50);

fn blend(c: Color, under: Color) -> [u8; 3] {
    let a = c.a as u32;
    let mix = |top: u8, bottom: u8| ((top as u32 * a + bottom as u32 * (255 - a)) / 255) as u8;
    [mix(c.r, under.r), mix(c.g, under.g), mix(c.b, under.b)]
}

fn ppm(width: u32, height: u32, pixels: impl Iterator<Item = [u8; 3]>) -> Vec<u8> {
    let mut out = format!("P6\n{width} {height}\n255\n").into_bytes();
    for px in pixels {
        out.extend_from_slice(&px);
    }
    out
}

pub fn canvas_ppm(canvas: &Canvas) -> Vec<u8> {
    ppm(
        canvas.width(),
        canvas.height(),
        canvas.pixels().iter().map(|&c| blend(c, BACKDROP)),
    )
}

pub fn field_ppm(image: &FieldImage) -> Vec<u8> {
    ppm(image.width, image.height, image.pixels.iter().copied())
}

pub fn write(path: &Path, bytes: &[u8]) -> Result<(), ViewerError> {
    let mut f = fs::File::create(path)?;
    f.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_pixels_show_the_backdrop() {
        let canvas = Canvas::new(2, 1);
        let bytes = canvas_ppm(&canvas);
        let header = b"P6\n2 1\n255\n";
        assert_eq!(&bytes[..header.len()], header);
        assert_eq!(&bytes[header.len()..], &[50, 50, 50, 50, 50, 50]);
    }

    #[test]
    fn opaque_pixels_are_kept() {
        assert_eq!(blend(Color::rgb(255, 0, 0), BACKDROP), [255, 0, 0]);
    }

    #[test]
    fn field_image_bytes_follow_header() {
        let img = FieldImage {
            width: 1,
            height: 2,
            pixels: vec![[1, 2, 3], [4, 5, 6]],
        };
        let bytes = field_ppm(&img);
        assert!(bytes.ends_with(&[1, 2, 3, 4, 5, 6]));
        assert!(bytes.starts_with(b"P6\n1 2\n255\n"));
    }
}
