//! Point-tuple decoder
//!
//! Parses the device's textual point list into a [`PointSet`]:
//!
//! ```text
//! [(1.1, 2.2, 3.3), (4.4, 5.5, 6.6)]          position only
//! [(1.1, 2.2, 3.3, 10, 20, 30), ...]          position + RGB
//! ```
//!
//! The grammar is tokenized rather than sliced at fixed offsets:
//!
//! ```text
//! payload := '[' list ']' | list
//! list    := ε | tuple ( ws? ',' ws? tuple )*
//! tuple   := '(' field ( ',' field )* ')'
//! ```
//!
//! Field count selects the [`TupleLayout`]: 3 position, 4 position +
//! intensity, 6 position + color, 7 position + color + intensity. Color
//! components truncate (and saturate) to `u8`, intensity to `u16`.
//!
//! # Lenient fields
//!
//! A field that does not parse as `f64` decodes as `0.0` instead of failing
//! the tuple. The device feed has always been consumed this way, so the
//! behavior is kept as-is; whether it is wanted tolerance for a noisy sensor
//! or an accident is still open.

use crate::error::DecodeError;
use crate::point::{Point, PointSet, Rgb, TupleLayout};

/// Decode a point-tuple payload.
///
/// Output preserves input order. Coordinates are not range-checked and
/// duplicates are kept.
///
/// # Errors
/// - [`DecodeError::Empty`] when the trimmed payload is shorter than two
///   characters or has no bracket pair to strip (device sentinels such as
///   `exit` land here)
/// - [`DecodeError::Malformed`] when a tuple is unterminated, has fewer than
///   three fields, or has a field count matching no layout
pub fn decode(raw: &str) -> Result<PointSet, DecodeError> {
    let list = tuple_list(raw)?;

    let mut points = Vec::with_capacity(estimate_tuples(list));
    for (index, tuple) in Tuples::new(list).enumerate() {
        points.push(decode_tuple(index, tuple?)?);
    }

    Ok(PointSet::new(points))
}

/// Strip the outer `[...]`, or accept a bare `(...), (...)` list.
fn tuple_list(raw: &str) -> Result<&str, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.len() < 2 {
        return Err(DecodeError::Empty);
    }

    if let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        return Ok(inner.trim());
    }

    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        return Ok(trimmed);
    }

    Err(DecodeError::Empty)
}

fn estimate_tuples(list: &str) -> usize {
    list.bytes().filter(|b| *b == b'(').count()
}

/// Iterator over tuple bodies (the text between `(` and `)`).
struct Tuples<'a> {
    rest: &'a str,
    index: usize,
    failed: bool,
}

impl<'a> Tuples<'a> {
    fn new(list: &'a str) -> Self {
        Self {
            rest: list,
            index: 0,
            failed: false,
        }
    }

    fn fail(&mut self, reason: impl Into<String>) -> Option<Result<&'a str, DecodeError>> {
        self.failed = true;
        Some(Err(DecodeError::malformed(self.index, reason)))
    }
}

impl<'a> Iterator for Tuples<'a> {
    type Item = Result<&'a str, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut rest: &'a str = self.rest;
        rest = rest.trim_start();
        if rest.is_empty() {
            return None;
        }

        if self.index > 0 {
            match rest.strip_prefix(',') {
                Some(after) => rest = after.trim_start(),
                None => return self.fail("expected ',' between tuples"),
            }
        }

        let Some(after_open) = rest.strip_prefix('(') else {
            return self.fail("expected '('");
        };
        let Some(close) = after_open.find(')') else {
            return self.fail("unterminated tuple");
        };

        let body = &after_open[..close];
        if body.contains('(') {
            return self.fail("nested '(' inside tuple");
        }

        self.rest = &after_open[close + 1..];
        self.index += 1;
        Some(Ok(body))
    }
}

fn decode_tuple(index: usize, body: &str) -> Result<Point, DecodeError> {
    let fields: Vec<&str> = if body.trim().is_empty() {
        Vec::new()
    } else {
        body.split(',').map(str::trim).collect()
    };

    if fields.len() < 3 {
        return Err(DecodeError::malformed(
            index,
            format!("expected at least 3 fields, got {}", fields.len()),
        ));
    }

    let layout = TupleLayout::from_field_count(fields.len()).ok_or_else(|| {
        DecodeError::malformed(index, format!("unsupported field count {}", fields.len()))
    })?;

    let values: Vec<f64> = fields.iter().map(|f| lenient_f64(f)).collect();
    let mut point = Point::new(values[0], values[1], values[2]);

    match layout {
        TupleLayout::Position => {}
        TupleLayout::PositionIntensity => {
            point = point.with_intensity(values[3] as u16);
        }
        TupleLayout::PositionColor => {
            point = point.with_color(color(&values[3..6]));
        }
        TupleLayout::PositionColorIntensity => {
            point = point
                .with_color(color(&values[3..6]))
                .with_intensity(values[6] as u16);
        }
    }

    Ok(point)
}

fn color(channels: &[f64]) -> Rgb {
    // `as` truncates toward zero and saturates; NaN becomes 0
    Rgb::new(channels[0] as u8, channels[1] as u8, channels[2] as u8)
}

fn lenient_f64(field: &str) -> f64 {
    match field.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            tracing::trace!(field, "unparsable field decoded as 0.0");
            0.0
        }
    }
}
