//! Bounding-box rasterizer
//!
//! Projects a point set onto the XY plane of a fixed-size RGBA image.
//!
//! The bounding box is seeded at `0.0` on both axes rather than at the first
//! point, so world origin is always inside the frame. Frames from the same
//! scene therefore share an anchor, which the optional origin crosshair makes
//! visible.
//!
//! ```text
//! px = width  * (x - min_x) / (max_x - min_x)
//! py = height * (y - min_y) / (max_y - min_y)
//! ```
//!
//! Degenerate axes (zero span) map every point to the middle of that axis.
//! Points on the max edge land on the last pixel row/column. Non-finite
//! coordinates are skipped. The returned image is always exactly
//! `width × height`.

use crate::config::{Background, RasterConfig};
use crate::point::{Point, Rgb};
use image::{Rgba, RgbaImage};

/// Color used for points that carry no color.
pub const DEFAULT_POINT_COLOR: Rgb = Rgb::new(0, 255, 0);

/// Color of the origin crosshair.
pub const ORIGIN_MARKER_COLOR: Rgb = Rgb::new(255, 0, 0);

/// Rendering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterStyle {
    /// Background fill
    pub background: Background,
    /// Color for points without one
    pub point_color: Rgb,
    /// Crosshair arm length in pixels at world origin, if drawn
    pub origin_marker: Option<u32>,
}

impl Default for RasterStyle {
    fn default() -> Self {
        Self {
            background: Background::Transparent,
            point_color: DEFAULT_POINT_COLOR,
            origin_marker: None,
        }
    }
}

impl From<&RasterConfig> for RasterStyle {
    fn from(config: &RasterConfig) -> Self {
        Self {
            background: config.background,
            point_color: DEFAULT_POINT_COLOR,
            origin_marker: config.origin_marker.then_some(config.marker_size),
        }
    }
}

/// XY extent of a point set, always containing the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Smallest x (≤ 0)
    pub min_x: f64,
    /// Largest x (≥ 0)
    pub max_x: f64,
    /// Smallest y (≤ 0)
    pub min_y: f64,
    /// Largest y (≥ 0)
    pub max_y: f64,
}

impl BoundingBox {
    /// Single pass over `points`, seeded at the origin. Non-finite
    /// coordinates do not widen the box.
    pub fn of(points: &[Point]) -> Self {
        let mut bounds = Self {
            min_x: 0.0,
            max_x: 0.0,
            min_y: 0.0,
            max_y: 0.0,
        };
        for p in points {
            if p.x.is_finite() {
                bounds.min_x = bounds.min_x.min(p.x);
                bounds.max_x = bounds.max_x.max(p.x);
            }
            if p.y.is_finite() {
                bounds.min_y = bounds.min_y.min(p.y);
                bounds.max_y = bounds.max_y.max(p.y);
            }
        }
        bounds
    }

    /// Pixel for a world coordinate, or `None` if it cannot be placed.
    fn project(&self, x: f64, y: f64, width: u32, height: u32) -> Option<(u32, u32)> {
        let px = axis_to_pixel(x, self.min_x, self.max_x, width)?;
        let py = axis_to_pixel(y, self.min_y, self.max_y, height)?;
        Some((px, py))
    }
}

fn axis_to_pixel(value: f64, min: f64, max: f64, extent: u32) -> Option<u32> {
    if extent == 0 || !value.is_finite() {
        return None;
    }

    // halved so extremes near f64::MAX do not overflow the span
    let half_span = max / 2.0 - min / 2.0;
    if !half_span.is_finite() {
        return None;
    }
    if half_span == 0.0 {
        return Some(extent / 2);
    }

    let scaled = f64::from(extent) * ((value / 2.0 - min / 2.0) / half_span);
    if !(0.0..=f64::from(extent)).contains(&scaled) {
        return None;
    }
    // truncate like an integer conversion; max edge folds onto the last pixel
    Some((scaled as u32).min(extent - 1))
}

/// Project `points` into a `width × height` image.
pub fn rasterize(points: &[Point], width: u32, height: u32, style: &RasterStyle) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, background_pixel(style.background));
    let bounds = BoundingBox::of(points);

    for point in points {
        if let Some((px, py)) = bounds.project(point.x, point.y, width, height) {
            let color = point.color.unwrap_or(style.point_color);
            img.put_pixel(px, py, opaque(color));
        }
    }

    if let Some(arm) = style.origin_marker {
        if let Some((cx, cy)) = bounds.project(0.0, 0.0, width, height) {
            draw_crosshair(&mut img, cx, cy, arm, opaque(ORIGIN_MARKER_COLOR));
        }
    }

    img
}

fn background_pixel(background: Background) -> Rgba<u8> {
    match background {
        Background::Transparent => Rgba([0, 0, 0, 0]),
        Background::Black => Rgba([0, 0, 0, 255]),
    }
}

fn opaque(color: Rgb) -> Rgba<u8> {
    Rgba([color.r, color.g, color.b, 255])
}

fn draw_crosshair(img: &mut RgbaImage, cx: u32, cy: u32, arm: u32, pixel: Rgba<u8>) {
    let (width, height) = img.dimensions();

    let x_start = cx.saturating_sub(arm);
    let x_end = cx.saturating_add(arm).min(width.saturating_sub(1));
    for x in x_start..=x_end {
        img.put_pixel(x, cy, pixel);
    }

    let y_start = cy.saturating_sub(arm);
    let y_end = cy.saturating_add(arm).min(height.saturating_sub(1));
    for y in y_start..=y_end {
        img.put_pixel(cx, y, pixel);
    }
}
