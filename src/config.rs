//! Batch configuration, validated once before any document is opened

use crate::columns::{FieldSchema, CODE_FIELD};
use crate::injector::{PlannedField, StampPlan, TextStyle};
use crate::locator::Marker;
use crate::position::{FixedPosition, OffsetPosition, PositionSpec};
use crate::StampError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Font size used in fixed mode unless configured
pub const DEFAULT_FIXED_FONT_SIZE: f32 = 8.0;
/// Font size used in offset mode unless configured
pub const DEFAULT_OFFSET_FONT_SIZE: f32 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    Fixed,
    Offset,
}

/// Text rotation; 90 is a quarter turn counter-clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            other => Err(format!("rotation must be 0 or 90, got {other}")),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageScope {
    #[default]
    FirstPage,
    AllPages,
}

/// RGB fill color, channels in 0..=1
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TextColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl TextColor {
    pub const BLACK: TextColor = TextColor {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };
    pub const RED: TextColor = TextColor {
        r: 1.0,
        g: 0.0,
        b: 0.0,
    };
}

/// One injected field: the canonical name plus how to place it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    /// Accepted marker spellings, used in offset mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<String>,
    /// Absolute position, used in fixed mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<FixedPosition>,
}

impl FieldConfig {
    pub fn fixed(name: &str, x: f32, y: f32) -> Self {
        Self {
            name: name.to_string(),
            markers: Vec::new(),
            fixed: Some(FixedPosition { x, y }),
        }
    }

    pub fn anchored(name: &str, markers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            markers: markers.iter().map(|m| m.to_string()).collect(),
            fixed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionConfig {
    pub mode: PositionMode,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub offset: OffsetPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default)]
    pub color: TextColor,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default)]
    pub scope: PageScope,
    /// Folder prefix for archive entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_folder: Option<String>,
    /// Exact headers required for schema slots, in schema order (strict mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_columns: Vec<String>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self::vertical()
    }
}

impl InjectionConfig {
    /// Rotated text along the left margin, first page only
    pub fn vertical() -> Self {
        Self {
            mode: PositionMode::Fixed,
            fields: vec![
                FieldConfig::fixed("sistema", 50.0, 500.0),
                FieldConfig::fixed("subsistema", 50.0, 470.0),
                FieldConfig::fixed(CODE_FIELD, 50.0, 440.0),
            ],
            offset: OffsetPosition::default(),
            font_size: None,
            color: TextColor::BLACK,
            rotation: Rotation::Deg90,
            scope: PageScope::FirstPage,
            archive_folder: Some("editados".to_string()),
            required_columns: Vec::new(),
        }
    }

    /// Horizontal text along the bottom edge, first page only
    pub fn horizontal() -> Self {
        Self {
            fields: vec![
                FieldConfig::fixed("sistema", 100.0, 35.0),
                FieldConfig::fixed("subsistema", 250.0, 35.0),
                FieldConfig::fixed(CODE_FIELD, 430.0, 35.0),
            ],
            rotation: Rotation::Deg0,
            ..Self::vertical()
        }
    }

    /// Text placed right of the printed labels, on every page
    pub fn anchored() -> Self {
        Self {
            mode: PositionMode::Offset,
            fields: vec![
                FieldConfig::anchored("sistema", &["SISTEMA"]),
                FieldConfig::anchored("subsistema", &["SUBSISTEMA", "SUB SISTEMA"]),
                FieldConfig::anchored(CODE_FIELD, &["CÓDIGO", "CODIGO"]),
            ],
            rotation: Rotation::Deg0,
            scope: PageScope::AllPages,
            ..Self::vertical()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, StampError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StampError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, StampError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn effective_font_size(&self) -> f32 {
        self.font_size.unwrap_or(match self.mode {
            PositionMode::Fixed => DEFAULT_FIXED_FONT_SIZE,
            PositionMode::Offset => DEFAULT_OFFSET_FONT_SIZE,
        })
    }

    pub fn is_strict(&self) -> bool {
        !self.required_columns.is_empty()
    }

    /// Check every option against the schema the records were mapped with
    pub fn validate(&self, schema: &FieldSchema) -> Result<(), StampError> {
        let invalid = |msg: String| Err(StampError::Config(msg));

        if self.fields.is_empty() {
            return invalid("no fields configured".into());
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return invalid("field with empty name".into());
            }
            if !seen.insert(field.name.as_str()) {
                return invalid(format!("field {:?} configured twice", field.name));
            }
            if !schema.contains(&field.name) {
                return invalid(format!("field {:?} is not a known column field", field.name));
            }
            match self.mode {
                PositionMode::Fixed => match field.fixed {
                    Some(p) if p.x.is_finite() && p.y.is_finite() => {}
                    Some(_) => {
                        return invalid(format!("field {:?} has a non-finite position", field.name))
                    }
                    None => {
                        return invalid(format!("field {:?} needs a fixed position", field.name))
                    }
                },
                PositionMode::Offset => {
                    if Marker::new(&field.markers).is_empty() {
                        return invalid(format!("field {:?} needs at least one marker", field.name));
                    }
                }
            }
        }

        if self.mode == PositionMode::Offset
            && !(self.offset.dx.is_finite() && self.offset.dy.is_finite())
        {
            return invalid("offset must be finite".into());
        }

        let size = self.effective_font_size();
        if !(size.is_finite() && size > 0.0) {
            return invalid(format!("font size must be positive, got {size}"));
        }

        let TextColor { r, g, b } = self.color;
        if ![r, g, b].iter().all(|c| (0.0..=1.0).contains(c)) {
            return invalid("color channels must be within 0..1".into());
        }

        if self.is_strict() && self.required_columns.len() != schema.len() {
            return invalid(format!(
                "strict mode needs {} required columns, got {}",
                schema.len(),
                self.required_columns.len()
            ));
        }

        Ok(())
    }

    /// Validate and freeze into the per-batch stamping plan
    pub fn plan(&self, schema: &FieldSchema) -> Result<StampPlan, StampError> {
        self.validate(schema)?;

        let positions = match self.mode {
            PositionMode::Fixed => PositionSpec::Fixed(
                self.fields
                    .iter()
                    .filter_map(|f| f.fixed.map(|p| (f.name.clone(), p)))
                    .collect::<BTreeMap<_, _>>(),
            ),
            PositionMode::Offset => PositionSpec::Offset(self.offset),
        };

        Ok(StampPlan {
            fields: self
                .fields
                .iter()
                .map(|f| PlannedField {
                    name: f.name.clone(),
                    marker: Marker::new(&f.markers),
                })
                .collect(),
            positions,
            style: TextStyle {
                font_size: self.effective_font_size(),
                color: self.color,
                rotation: self.rotation,
            },
            scope: self.scope,
        })
    }
}
