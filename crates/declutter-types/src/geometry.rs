//! Axis-aligned bounding boxes.
//!
//! A [`BoundingBox`] is the structured key of a detection. The textual
//! `"(x_min, y_min, x_max, y_max)"` form only exists at the boundary
//! (legacy keyed payloads and the report) and is produced by
//! [`Display`](std::fmt::Display) / parsed by [`FromStr`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Largest absolute coordinate accepted from a detector.
pub const MAX_COORDINATE: f64 = 1.0e9;

/// Four integer edge coordinates in pixel space (XYXY order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

impl BoundingBox {
    pub const fn new(x_min: i64, y_min: i64, x_max: i64, y_max: i64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Build a box from fractional detector output by truncating each
    /// coordinate toward zero.
    pub fn from_f64(coords: [f64; 4]) -> Self {
        Self::new(
            coords[0] as i64,
            coords[1] as i64,
            coords[2] as i64,
            coords[3] as i64,
        )
    }

    /// Like [`from_f64`](Self::from_f64), but `None` when any coordinate
    /// is non-finite or beyond [`MAX_COORDINATE`].
    pub fn try_from_f64(coords: [f64; 4]) -> Option<Self> {
        coords
            .iter()
            .all(|c| c.is_finite() && c.abs() <= MAX_COORDINATE)
            .then(|| Self::from_f64(coords))
    }

    pub fn width(&self) -> i64 {
        self.x_max.saturating_sub(self.x_min)
    }

    pub fn height(&self) -> i64 {
        self.y_max.saturating_sub(self.y_min)
    }

    /// `(x_max - x_min) * (y_max - y_min)`, or 0 for inverted or empty boxes.
    pub fn area(&self) -> i64 {
        if self.is_degenerate() {
            0
        } else {
            self.width().saturating_mul(self.height())
        }
    }

    /// True when the box has no positive extent on either axis.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Border (in pixels per side) for a dilation by `fraction` of the
    /// box's own width and height. Fractional pixels are truncated.
    pub fn border(&self, fraction: f64) -> (i64, i64) {
        (
            (self.width() as f64 * fraction) as i64,
            (self.height() as f64 * fraction) as i64,
        )
    }

    /// Dilate by `fraction` of the box's own size on each side, then clamp
    /// to an image of `image_width` x `image_height`.
    pub fn expanded(&self, fraction: f64, image_width: u32, image_height: u32) -> Self {
        let (bx, by) = self.border(fraction);
        Self::new(
            self.x_min.saturating_sub(bx).max(0),
            self.y_min.saturating_sub(by).max(0),
            self.x_max.saturating_add(bx).min(i64::from(image_width)),
            self.y_max.saturating_add(by).min(i64::from(image_height)),
        )
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.x_min, self.y_min, self.x_max, self.y_max
        )
    }
}

/// A coordinate key that could not be parsed into a [`BoundingBox`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparseable box coordinates: {input:?}")]
pub struct BoxParseError {
    pub input: String,
}

impl FromStr for BoundingBox {
    type Err = BoxParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || BoxParseError {
            input: s.to_string(),
        };
        let inner = s
            .trim()
            .trim_start_matches(['(', '['])
            .trim_end_matches([')', ']']);
        let parts: Vec<i64> = inner
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|_| err())?;
        match parts.as_slice() {
            [x_min, y_min, x_max, y_max] => Ok(Self::new(*x_min, *y_min, *x_max, *y_max)),
            _ => Err(err()),
        }
    }
}
