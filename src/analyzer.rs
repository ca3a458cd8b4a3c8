//! Diagnostics for calibrating positions: anchor measurements and a
//! coordinate grid overlay

use crate::injector::{append_content, encoded, helvetica, register_font};
use crate::locator::{Marker, PageText};
use crate::position::Point;
use crate::{open_document, save_document, StampError};
use lopdf::content::Operation;
use lopdf::{Object, StringFormat};
use serde::Serialize;

/// Offset used for the suggested insertion point
const SUGGESTED_DX: f32 = 15.0;
const SUGGESTED_DY: f32 = -2.0;

const GRID_STEP: usize = 50;
const GRID_X: (u16, u16) = (50, 550);
const GRID_Y: (u16, u16) = (50, 700);
const GRID_FONT_SIZE: f32 = 6.0;
const REFERENCE_POINTS: [(u16, u16); 4] = [(100, 500), (200, 500), (300, 500), (400, 500)];
const REFERENCE_RADIUS: f32 = 3.0;

/// Bezier control distance for a quarter circle of radius 1
const KAPPA: f32 = 0.552_284_8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorMeasurement {
    pub x0: f32,
    pub y0: f32,
    pub width: f32,
    pub height: f32,
    pub suggested: Point,
}

/// What was found for one field's marker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorReport {
    pub field: String,
    pub found: Option<AnchorMeasurement>,
}

/// Measure the first anchor box of each marker on a page
pub fn analyze_page(page: &PageText, markers: &[(String, Marker)]) -> Vec<AnchorReport> {
    markers
        .iter()
        .map(|(field, marker)| {
            let found = marker.first_box(page).map(|b| AnchorMeasurement {
                x0: b.x0,
                y0: b.y0,
                width: b.width(),
                height: b.height(),
                suggested: Point {
                    x: b.x1 + SUGGESTED_DX,
                    y: b.y0 + b.height() / 2.0 + SUGGESTED_DY,
                },
            });
            AnchorReport {
                field: field.clone(),
                found,
            }
        })
        .collect()
}

/// Analyze one 1-indexed page of a PDF
pub fn analyze_document(
    buffer: &[u8],
    markers: &[(String, Marker)],
    page_num: u32,
) -> Result<Vec<AnchorReport>, StampError> {
    let page = PageText::extract_mem(buffer, page_num)?;
    Ok(analyze_page(&page, markers))
}

/// Copy of the document with coordinate labels and reference dots on
/// every page
pub fn coordinate_grid(buffer: &[u8]) -> Result<Vec<u8>, StampError> {
    let mut doc = open_document(buffer)?;
    let pages: Vec<_> = doc.get_pages().into_values().collect();
    if pages.is_empty() {
        return Err(StampError::NoPages);
    }

    let font_id = doc.add_object(helvetica());
    for page_id in pages {
        let font_name = register_font(&mut doc, page_id, font_id)?;
        let content = encoded(grid_operations(&font_name))?;
        append_content(&mut doc, page_id, content)?;
    }

    save_document(&mut doc)
}

fn grid_operations(font_name: &str) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new("rg", vec![0.into(), 0.into(), 0.into()]),
    ];

    for x in (GRID_X.0..=GRID_X.1).step_by(GRID_STEP) {
        for y in (GRID_Y.0..=GRID_Y.1).step_by(GRID_STEP) {
            label(&mut ops, font_name, x as f32, y as f32, &format!("({x},{y})"));
        }
    }

    for (x, y) in REFERENCE_POINTS {
        ops.push(Operation::new("rg", vec![1.into(), 0.into(), 0.into()]));
        circle(&mut ops, x as f32, y as f32, REFERENCE_RADIUS);
        ops.push(Operation::new("rg", vec![0.into(), 0.into(), 0.into()]));
        label(
            &mut ops,
            font_name,
            x as f32 + 5.0,
            y as f32,
            &format!("REF({x},{y})"),
        );
    }

    ops.push(Operation::new("Q", vec![]));
    ops
}

fn label(ops: &mut Vec<Operation>, font_name: &str, x: f32, y: f32, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![
            Object::Name(font_name.as_bytes().to_vec()),
            Object::Real(GRID_FONT_SIZE),
        ],
    ));
    ops.push(Operation::new("Td", vec![Object::Real(x), Object::Real(y)]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(text.as_bytes().to_vec(), StringFormat::Literal)],
    ));
    ops.push(Operation::new("ET", vec![]));
}

/// Filled circle as four Bezier quarters
fn circle(ops: &mut Vec<Operation>, cx: f32, cy: f32, r: f32) {
    let k = KAPPA * r;
    let nums = |values: [f32; 6]| values.iter().map(|v| Object::Real(*v)).collect::<Vec<_>>();

    ops.push(Operation::new(
        "m",
        vec![Object::Real(cx + r), Object::Real(cy)],
    ));
    ops.push(Operation::new(
        "c",
        nums([cx + r, cy + k, cx + k, cy + r, cx, cy + r]),
    ));
    ops.push(Operation::new(
        "c",
        nums([cx - k, cy + r, cx - r, cy + k, cx - r, cy]),
    ));
    ops.push(Operation::new(
        "c",
        nums([cx - r, cy - k, cx - k, cy - r, cx, cy - r]),
    ));
    ops.push(Operation::new(
        "c",
        nums([cx + k, cy - r, cx + r, cy - k, cx + r, cy]),
    ));
    ops.push(Operation::new("f", vec![]));
}
