//! Insertion point resolution from fixed coordinates or anchor boxes

use crate::locator::AnchorBox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A point in page space (PDF points, origin bottom-left)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Absolute position for one field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedPosition {
    pub x: f32,
    pub y: f32,
}

/// Offset from the right edge and vertical center of a field's anchor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetPosition {
    #[serde(default = "default_dx")]
    pub dx: f32,
    #[serde(default = "default_dy")]
    pub dy: f32,
}

fn default_dx() -> f32 {
    15.0
}

fn default_dy() -> f32 {
    2.0
}

impl Default for OffsetPosition {
    fn default() -> Self {
        Self {
            dx: default_dx(),
            dy: default_dy(),
        }
    }
}

/// How every field of a batch is positioned
#[derive(Debug, Clone, PartialEq)]
pub enum PositionSpec {
    /// Per-field absolute coordinates; no anchor lookup
    Fixed(BTreeMap<String, FixedPosition>),
    /// One offset applied to each field's anchor box
    Offset(OffsetPosition),
}

impl PositionSpec {
    /// Whether resolution needs an anchor box
    pub fn needs_anchor(&self) -> bool {
        matches!(self, PositionSpec::Offset(_))
    }
}

/// Resolve the insertion point of a field
///
/// Fixed mode ignores `anchor`. Offset mode returns `None` when no anchor was
/// found, which means the field is skipped; otherwise the point sits `dx`
/// right of the box and `dy` above its vertical center.
pub fn resolve(field: &str, anchor: Option<&AnchorBox>, spec: &PositionSpec) -> Option<Point> {
    match spec {
        PositionSpec::Fixed(positions) => positions.get(field).map(|p| Point { x: p.x, y: p.y }),
        PositionSpec::Offset(offset) => anchor.map(|b| Point {
            x: b.x1 + offset.dx,
            y: b.y0 + b.height() / 2.0 + offset.dy,
        }),
    }
}
