use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

/// Fonts tried in order when no font path is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

const WIDTH: u32 = 1600;
const HEIGHT: u32 = 960;
const MARGIN_LEFT: u32 = 110;
const MARGIN_RIGHT: u32 = 40;
const MARGIN_TOP: u32 = 90;
const MARGIN_BOTTOM: u32 = 110;

/// Fraction of each bin slot covered by its bar.
const BAR_FILL: f32 = 0.8;
const Y_TICKS: u64 = 5;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const BAR_COLOR: Rgb<u8> = Rgb([135, 206, 235]);
const BAR_EDGE: Rgb<u8> = Rgb([70, 130, 180]);
const AXIS_COLOR: Rgb<u8> = Rgb([40, 40, 40]);
const GRID_COLOR: Rgb<u8> = Rgb([225, 225, 225]);
const TEXT_COLOR: Rgb<u8> = Rgb([20, 20, 20]);

const TITLE_SCALE: f32 = 36.0;
const LABEL_SCALE: f32 = 24.0;
const TICK_SCALE: f32 = 18.0;

/// Renders bar charts of `(value, count)` bins.
pub struct ChartRenderer {
    font: Option<FontVec>,
}

impl ChartRenderer {
    /// Load `font_path`, or the first available system font when `None`.
    /// Without a font the chart is drawn without text.
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = match font_path {
            Some(path) => Self::load_font(path),
            None => FONT_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .filter(|p| p.exists())
                .find_map(|p| Self::load_font(&p)),
        };
        if font.is_none() {
            warn!("no usable font found, chart will have no labels");
        }
        Self { font }
    }

    /// A renderer that never draws text.
    #[cfg(test)]
    fn without_font() -> Self {
        Self { font: None }
    }

    #[cfg(test)]
    fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn render(&self, bins: &[(u64, usize)], title: &str, x_label: &str, y_label: &str) -> RgbImage {
        let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
        let y_max = y_axis_max(bins);
        let (left, top, right, bottom) = plot_area();

        for tick in 0..=Y_TICKS {
            let value = y_max * tick / Y_TICKS;
            let y = value_to_y(value, y_max);
            if tick > 0 {
                draw_line_segment_mut(&mut img, (left as f32, y), (right as f32, y), GRID_COLOR);
            }
            draw_line_segment_mut(&mut img, (left as f32 - 6.0, y), (left as f32, y), AXIS_COLOR);
            let label = value.to_string();
            self.draw_text_right(&mut img, &label, left as i32 - 10, y as i32 - 9, TICK_SCALE);
        }

        for ((value, count), rect) in bins.iter().zip(bar_rects(bins, y_max)) {
            draw_filled_rect_mut(&mut img, rect, BAR_COLOR);
            draw_hollow_rect_mut(&mut img, rect, BAR_EDGE);
            debug!(value, count, x = rect.left(), height = rect.height(), "drew bar");
        }

        let label_every = self.x_label_stride(bins);
        for (i, ((value, _), rect)) in bins.iter().zip(bar_rects(bins, y_max)).enumerate() {
            if i % label_every != 0 {
                continue;
            }
            let center = rect.left() + rect.width() as i32 / 2;
            self.draw_text_centered(&mut img, &value.to_string(), center, bottom as i32 + 10, TICK_SCALE);
        }

        draw_line_segment_mut(&mut img, (left as f32, top as f32), (left as f32, bottom as f32), AXIS_COLOR);
        draw_line_segment_mut(&mut img, (left as f32, bottom as f32), (right as f32, bottom as f32), AXIS_COLOR);

        self.draw_text_centered(&mut img, title, (WIDTH / 2) as i32, 25, TITLE_SCALE);
        let x_center = ((left + right) / 2) as i32;
        self.draw_text_centered(&mut img, x_label, x_center, bottom as i32 + 50, LABEL_SCALE);
        self.draw_text(&mut img, y_label, 10, top as i32 - 40, LABEL_SCALE);

        img
    }

    /// Render and save as an image file; the format follows the extension.
    pub fn save(&self, bins: &[(u64, usize)], title: &str, x_label: &str, y_label: &str, path: &Path) -> Result<()> {
        let img = self.render(bins, title, x_label, y_label);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        img.save(path)
            .with_context(|| format!("failed to save chart to {}", path.display()))?;

        info!(?path, bins = bins.len(), "chart saved");
        Ok(())
    }

    /// Label every Nth bar so tick labels do not overlap.
    fn x_label_stride(&self, bins: &[(u64, usize)]) -> usize {
        let Some(font) = &self.font else { return 1 };
        let widest = bins
            .iter()
            .map(|(v, _)| text_size(PxScale::from(TICK_SCALE), font, &v.to_string()).0)
            .max()
            .unwrap_or(0)
            + 8;
        let (left, _, right, _) = plot_area();
        let fits = ((right - left) / widest.max(1)).max(1) as usize;
        bins.len().div_ceil(fits).max(1)
    }

    fn draw_text(&self, img: &mut RgbImage, text: &str, x: i32, y: i32, scale: f32) {
        let Some(font) = &self.font else { return };
        draw_text_mut(img, TEXT_COLOR, x, y, PxScale::from(scale), font, text);
    }

    fn draw_text_centered(&self, img: &mut RgbImage, text: &str, center_x: i32, y: i32, scale: f32) {
        let Some(font) = &self.font else { return };
        let (w, _) = text_size(PxScale::from(scale), font, text);
        self.draw_text(img, text, center_x - w as i32 / 2, y, scale);
    }

    fn draw_text_right(&self, img: &mut RgbImage, text: &str, right_x: i32, y: i32, scale: f32) {
        let Some(font) = &self.font else { return };
        let (w, _) = text_size(PxScale::from(scale), font, text);
        self.draw_text(img, text, right_x - w as i32, y, scale);
    }

    fn load_font(path: &Path) -> Option<FontVec> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(?path, error = %e, "failed to read font file");
                return None;
            }
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                info!(?path, "loaded chart font");
                Some(font)
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to parse font file");
                None
            }
        }
    }
}

/// (left, top, right, bottom) of the plotting area in pixels.
fn plot_area() -> (u32, u32, u32, u32) {
    (MARGIN_LEFT, MARGIN_TOP, WIDTH - MARGIN_RIGHT, HEIGHT - MARGIN_BOTTOM)
}

/// Top of the y axis: the largest count rounded up to a multiple of the tick count.
fn y_axis_max(bins: &[(u64, usize)]) -> u64 {
    let max = bins.iter().map(|&(_, c)| c as u64).max().unwrap_or(0).max(1);
    max.div_ceil(Y_TICKS) * Y_TICKS
}

fn value_to_y(value: u64, y_max: u64) -> f32 {
    let (_, top, _, bottom) = plot_area();
    let plot_h = (bottom - top) as f32;
    bottom as f32 - plot_h * value as f32 / y_max as f32
}

fn bar_rects(bins: &[(u64, usize)], y_max: u64) -> Vec<Rect> {
    if bins.is_empty() {
        return Vec::new();
    }
    let (left, _, right, bottom) = plot_area();
    let slot_w = (right - left) as f32 / bins.len() as f32;
    let bar_w = ((slot_w * BAR_FILL).round() as u32).max(1);

    bins.iter()
        .enumerate()
        .map(|(i, &(_, count))| {
            let x = left as f32 + slot_w * i as f32 + (slot_w - bar_w as f32) / 2.0;
            let top = value_to_y(count as u64, y_max).round() as u32;
            let h = bottom.saturating_sub(top).max(1);
            Rect::at(x.round() as i32, (bottom - h) as i32).of_size(bar_w, h)
        })
        .collect()
}
