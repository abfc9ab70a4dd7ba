use std::io::Cursor;

use chrono::{Datelike, NaiveDateTime, Weekday};
use image::{ImageFormat, Rgb, RgbImage};

use super::{
    aggregate::{bucket_time, Heatmap},
    font::{self, GLYPH_HEIGHT},
};

const CELL_WIDTH: u32 = 64;
const CELL_HEIGHT: u32 = 26;
const LEFT_MARGIN: u32 = 80;
const TOP_MARGIN: u32 = 34;
const PADDING: u32 = 8;
const TEXT_SCALE: u32 = 2;
const MARKER_WIDTH: u32 = 3;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL: Rgb<u8> = Rgb([40, 40, 40]);
const MARKER: Rgb<u8> = Rgb([0, 0, 255]);

/// Red-yellow-green, reversed: low occupancy is green, high is red.
const RDYLGN_R: [[u8; 3]; 11] = [
    [0, 104, 55],
    [26, 152, 80],
    [102, 189, 99],
    [166, 217, 106],
    [217, 239, 139],
    [255, 255, 191],
    [254, 224, 139],
    [253, 174, 97],
    [244, 109, 67],
    [215, 48, 39],
    [165, 0, 38],
];

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to encode heatmap: {0}")]
    Encode(#[from] image::ImageError),
}

pub fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "ПН",
        Weekday::Tue => "ВТ",
        Weekday::Wed => "СР",
        Weekday::Thu => "ЧТ",
        Weekday::Fri => "ПТ",
        Weekday::Sat => "СБ",
        Weekday::Sun => "ВС",
    }
}

/// `(row, column)` of the cell holding `now`, if the grid has one.
pub fn marker_cell(map: &Heatmap, now: NaiveDateTime) -> Option<(usize, usize)> {
    let time = bucket_time(now.time());
    let row = map.rows.iter().position(|&t| t == time)?;
    let col = map.columns.iter().position(|&d| d == now.weekday())?;
    Some((row, col))
}

/// Maps `v` within `[lo, hi]` onto the colormap.
fn cell_color(v: f64, lo: f64, hi: f64) -> Rgb<u8> {
    let t = if hi > lo { ((v - lo) / (hi - lo)).clamp(0.0, 1.0) } else { 0.5 };
    let pos = t * (RDYLGN_R.len() - 1) as f64;
    let i = (pos.floor() as usize).min(RDYLGN_R.len() - 2);
    let frac = pos - i as f64;
    let (a, b) = (RDYLGN_R[i], RDYLGN_R[i + 1]);
    let mix = |k: usize| (f64::from(a[k]) + (f64::from(b[k]) - f64::from(a[k])) * frac).round() as u8;
    Rgb([mix(0), mix(1), mix(2)])
}

/// Black on light cells, white on dark ones.
fn text_color(bg: Rgb<u8>) -> Rgb<u8> {
    let lin = |c: u8| {
        let c = f64::from(c) / 255.0;
        if c <= 0.03928 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
    };
    let lum = 0.2126 * lin(bg[0]) + 0.7152 * lin(bg[1]) + 0.0722 * lin(bg[2]);
    if lum > 0.408 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    for py in y..(y + h).min(img.height()) {
        for px in x..(x + w).min(img.width()) {
            img.put_pixel(px, py, color);
        }
    }
}

fn outline_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, width: u32, color: Rgb<u8>) {
    fill_rect(img, x, y, w, width, color);
    fill_rect(img, x, y + h - width, w, width, color);
    fill_rect(img, x, y, width, h, color);
    fill_rect(img, x + w - width, y, width, h, color);
}

fn centered(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, text: &str, color: Rgb<u8>) {
    let tw = font::text_width(text, TEXT_SCALE);
    let th = GLYPH_HEIGHT * TEXT_SCALE;
    let tx = x + w.saturating_sub(tw) / 2;
    let ty = y + h.saturating_sub(th) / 2;
    font::draw_text(img, tx, ty, text, color, TEXT_SCALE);
}

/// Draws the grid and encodes it as PNG.
///
/// Missing cells stay blank. The cell containing `now` gets a blue border.
pub fn render_heatmap(map: &Heatmap, now: NaiveDateTime) -> Result<Vec<u8>, RenderError> {
    let cols = map.columns.len() as u32;
    let rows = map.rows.len() as u32;
    let width = LEFT_MARGIN + cols * CELL_WIDTH + PADDING;
    let height = TOP_MARGIN + rows * CELL_HEIGHT + PADDING;
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    for (c, &day) in map.columns.iter().enumerate() {
        let x = LEFT_MARGIN + c as u32 * CELL_WIDTH;
        centered(&mut img, x, 0, CELL_WIDTH, TOP_MARGIN, weekday_label(day), LABEL);
    }

    let (lo, hi) = map.value_range().unwrap_or((0.0, 0.0));
    for (r, time) in map.rows.iter().enumerate() {
        let y = TOP_MARGIN + r as u32 * CELL_HEIGHT;
        let label = time.format("%H:%M").to_string();
        centered(&mut img, 0, y, LEFT_MARGIN, CELL_HEIGHT, &label, LABEL);

        for (c, value) in map.cells[r].iter().enumerate() {
            let Some(v) = *value else { continue };
            let x = LEFT_MARGIN + c as u32 * CELL_WIDTH;
            let bg = cell_color(v, lo, hi);
            fill_rect(&mut img, x, y, CELL_WIDTH, CELL_HEIGHT, bg);
            centered(&mut img, x, y, CELL_WIDTH, CELL_HEIGHT, &format!("{v:.0}"), text_color(bg));
        }
    }

    if let Some((r, c)) = marker_cell(map, now) {
        let x = LEFT_MARGIN + c as u32 * CELL_WIDTH;
        let y = TOP_MARGIN + r as u32 * CELL_HEIGHT;
        outline_rect(&mut img, x, y, CELL_WIDTH, CELL_HEIGHT, MARKER_WIDTH, MARKER);
    }

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn map() -> Heatmap {
        Heatmap {
            rows: vec![hm(14, 0), hm(14, 30), hm(15, 0)],
            columns: vec![Weekday::Mon, Weekday::Wed],
            cells: vec![
                vec![Some(3.0), Some(10.0)],
                vec![None, Some(20.0)],
                vec![Some(5.5), None],
            ],
        }
    }

    fn wednesday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, 18).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn marker_lands_on_the_current_half_hour() {
        assert_eq!(marker_cell(&map(), wednesday(14, 47)), Some((1, 1)));
        assert_eq!(marker_cell(&map(), wednesday(14, 29)), Some((0, 1)));
    }

    #[test]
    fn no_marker_outside_the_grid() {
        assert_eq!(marker_cell(&map(), wednesday(6, 10)), None);
        // Tuesday has no column.
        let tuesday = NaiveDate::from_ymd_opt(2024, 9, 17).unwrap().and_hms_opt(14, 0, 0).unwrap();
        assert_eq!(marker_cell(&map(), tuesday), None);
    }

    #[test]
    fn colormap_runs_green_to_red() {
        assert_eq!(cell_color(0.0, 0.0, 10.0), Rgb([0, 104, 55]));
        assert_eq!(cell_color(10.0, 0.0, 10.0), Rgb([165, 0, 38]));
        assert_eq!(cell_color(5.0, 0.0, 10.0), Rgb([255, 255, 191]));
        assert_eq!(cell_color(7.0, 7.0, 7.0), Rgb([255, 255, 191]));
    }

    #[test]
    fn annotation_contrasts_with_cell() {
        assert_eq!(text_color(Rgb([255, 255, 191])), Rgb([0, 0, 0]));
        assert_eq!(text_color(Rgb([0, 104, 55])), Rgb([255, 255, 255]));
    }

    #[test]
    fn renders_png_with_marker_and_blank_cells() {
        let png = render_heatmap(&map(), wednesday(14, 47)).unwrap();
        assert_eq!(png[..8], PNG_SIGNATURE);

        let img = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(img.width(), LEFT_MARGIN + 2 * CELL_WIDTH + PADDING);
        assert_eq!(img.height(), TOP_MARGIN + 3 * CELL_HEIGHT + PADDING);

        // Corner of the marked cell (row 1, column 1).
        let x = LEFT_MARGIN + CELL_WIDTH;
        let y = TOP_MARGIN + CELL_HEIGHT;
        assert_eq!(img.get_pixel(x, y), &MARKER);
        assert_eq!(img.get_pixel(x + CELL_WIDTH - 1, y + CELL_HEIGHT - 1), &MARKER);

        // Missing cell (row 1, column 0) keeps the background.
        assert_eq!(img.get_pixel(LEFT_MARGIN + 1, y + 1), &BACKGROUND);
    }

    #[test]
    fn empty_grid_still_encodes() {
        let empty = Heatmap { rows: vec![], columns: vec![], cells: vec![] };
        let png = render_heatmap(&empty, wednesday(12, 0)).unwrap();
        assert_eq!(png[..8], PNG_SIGNATURE);
    }
}
