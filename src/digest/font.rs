//! 5×7 bitmap glyphs for the characters that appear on a heatmap: digits,
//! `:` and `-` for values and times, and the Cyrillic capitals of the
//! weekday labels.

use image::{Rgb, RgbImage};

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;

/// Rows top to bottom; bit 4 is the leftmost pixel.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        'П' => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11],
        'Н' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'В' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'Т' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'С' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'Р' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Ч' => [0x11, 0x11, 0x11, 0x0F, 0x01, 0x01, 0x01],
        'Б' => [0x1F, 0x10, 0x10, 0x1E, 0x11, 0x11, 0x1E],
        _ => return None,
    };
    Some(rows)
}

/// Pixel width of `text` at `scale`, one scaled pixel between glyphs.
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    n * GLYPH_WIDTH * scale + (n - 1) * scale
}

/// Draws `text` with its top-left corner at (`x`, `y`). Unknown characters
/// leave a blank; pixels outside the image are clipped.
pub fn draw_text(img: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>, scale: u32) {
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else { continue };
        let gx = x + i as u32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = gx + col * scale + dx;
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
