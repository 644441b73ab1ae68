//! Point-cloud data model
//!
//! A [`Point`] is immutable once decoded. A [`PointSet`] shares its points
//! behind an `Arc<[Point]>`, so handing the same set to the cache, a reader
//! and the rasterizer never copies or mutates point data. A [`Measurement`]
//! pairs a set with its capture time; the snapshot cache holds exactly one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;

/// 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    /// Red channel
    pub r: u8,
    /// Green channel
    pub g: u8,
    /// Blue channel
    pub b: u8,
}

impl Rgb {
    /// Build a color from its channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Which wire variant a tuple was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TupleLayout {
    /// `(x, y, z)`
    Position,
    /// `(x, y, z, intensity)`
    PositionIntensity,
    /// `(x, y, z, r, g, b)`
    PositionColor,
    /// `(x, y, z, r, g, b, intensity)`
    PositionColorIntensity,
}

impl TupleLayout {
    /// Layout for a tuple with `fields` components, if it is a known one.
    pub fn from_field_count(fields: usize) -> Option<Self> {
        match fields {
            3 => Some(TupleLayout::Position),
            4 => Some(TupleLayout::PositionIntensity),
            6 => Some(TupleLayout::PositionColor),
            7 => Some(TupleLayout::PositionColorIntensity),
            _ => None,
        }
    }

    /// Number of fields on the wire.
    pub fn field_count(self) -> usize {
        match self {
            TupleLayout::Position => 3,
            TupleLayout::PositionIntensity => 4,
            TupleLayout::PositionColor => 6,
            TupleLayout::PositionColorIntensity => 7,
        }
    }
}

/// A single decoded point.
///
/// `color` and `intensity` are `None` when the wire variant did not carry
/// them; `None` means "unset", never zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
    /// Color, for colored variants
    pub color: Option<Rgb>,
    /// Intensity, for intensity variants
    pub intensity: Option<u16>,
}

impl Point {
    /// Position-only point.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            color: None,
            intensity: None,
        }
    }

    /// Add a color.
    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = Some(color);
        self
    }

    /// Add an intensity.
    pub fn with_intensity(mut self, intensity: u16) -> Self {
        self.intensity = Some(intensity);
        self
    }

    /// Wire variant this point corresponds to.
    pub fn layout(&self) -> TupleLayout {
        match (self.color.is_some(), self.intensity.is_some()) {
            (false, false) => TupleLayout::Position,
            (false, true) => TupleLayout::PositionIntensity,
            (true, false) => TupleLayout::PositionColor,
            (true, true) => TupleLayout::PositionColorIntensity,
        }
    }
}

/// Immutable, cheaply clonable collection of points in decode order.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    points: Arc<[Point]>,
}

impl Default for PointSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PointSet {
    /// Wrap decoded points.
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            points: points.into(),
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no points were decoded.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points as a slice.
    pub fn as_slice(&self) -> &[Point] {
        &self.points
    }
}

impl Deref for PointSet {
    type Target = [Point];

    fn deref(&self) -> &[Point] {
        &self.points
    }
}

impl From<Vec<Point>> for PointSet {
    fn from(points: Vec<Point>) -> Self {
        Self::new(points)
    }
}

impl FromIterator<Point> for PointSet {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// One decoded snapshot with its capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Decoded points
    pub points: PointSet,
    /// When the payload was decoded
    pub captured_at: DateTime<Utc>,
}

impl Measurement {
    /// Stamp a point set with the current time.
    pub fn now(points: PointSet) -> Self {
        Self {
            points,
            captured_at: Utc::now(),
        }
    }
}
