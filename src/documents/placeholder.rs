//! Last-resort page image when every raster method fails.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use gatehouse_common::{Error, Result};
use image::{Rgb, RgbImage};

const WIDTH: u32 = 850;
const HEIGHT: u32 = 1100;
const MARGIN: u32 = 60;
const BACKGROUND: Rgb<u8> = Rgb([244, 244, 240]);
const BORDER: Rgb<u8> = Rgb([190, 190, 185]);
const INK: Rgb<u8> = Rgb([60, 60, 60]);
const MUTED: Rgb<u8> = Rgb([140, 140, 140]);

/// Letter-proportioned JPEG naming the resource and the page.
pub fn render_placeholder(title: &str, unit: u32) -> Result<Vec<u8>> {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
    draw_border(&mut img, 8, BORDER);

    let mut y = MARGIN + 40;
    for line in wrap(title, max_chars(4)).into_iter().take(4) {
        draw_text_centered(&mut img, &line, y, 4, INK);
        y += 8 * 4 + 16;
    }

    draw_text_centered(&mut img, &format!("PAGE {unit}"), HEIGHT / 2 - 32, 8, INK);
    draw_text_centered(&mut img, "PREVIEW UNAVAILABLE", HEIGHT - MARGIN - 48, 3, MUTED);

    gatehouse_av::raster::encode_jpeg(&img)
        .map_err(|e| Error::internal(format!("placeholder encoding failed: {e}")))
}

fn max_chars(scale: u32) -> usize {
    ((WIDTH - 2 * MARGIN) / (8 * scale)) as usize
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let word: String = word.chars().take(width).collect();
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn draw_border(img: &mut RgbImage, thickness: u32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        if x < thickness || y < thickness || x >= w - thickness || y >= h - thickness {
            *pixel = color;
        }
    }
}

fn draw_text_centered(img: &mut RgbImage, text: &str, y: u32, scale: u32, color: Rgb<u8>) {
    let width = text.chars().count() as u32 * 8 * scale;
    let x = img.width().saturating_sub(width) / 2;
    draw_text(img, text, x, y, scale, color);
}

fn draw_text(img: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    for (i, c) in text.chars().enumerate() {
        let glyph = BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?'));
        let Some(glyph) = glyph else { continue };
        let origin_x = x + i as u32 * 8 * scale;

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = origin_x + col * scale + dx;
                        let py = y + row as u32 * scale + dy;
                        if px < img.width() && py < img.height() {
                            img.put_pixel(px, py, color);
                        }
                    }
                }
            }
        }
    }
}
