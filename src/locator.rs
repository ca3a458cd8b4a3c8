//! Anchor text location on PDF pages
//!
//! The page content stream is interpreted into text runs (one per shown
//! string) with a page-space box per glyph. Marker strings are searched
//! inside each run; a match's box is the union of its glyph boxes.

use crate::fonts::{get_number, FontMetrics};
use crate::StampError;
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use serde::Serialize;
use std::collections::HashMap;

/// Descent and ascent of a glyph box as a fraction of the font size
const GLYPH_DESCENT: f32 = -0.2;
const GLYPH_ASCENT: f32 = 0.8;

/// Bounding box in page space (PDF points, origin bottom-left)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnchorBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl AnchorBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Smallest box containing both
    pub fn union(&self, other: &AnchorBox) -> AnchorBox {
        AnchorBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// One decoded glyph with its page-space box
#[derive(Debug, Clone)]
pub struct Glyph {
    pub text: String,
    pub bbox: AnchorBox,
}

/// Glyphs produced by a single text-showing operator
#[derive(Debug, Clone, Default)]
pub struct TextRun {
    pub glyphs: Vec<Glyph>,
}

impl TextRun {
    pub fn text(&self) -> String {
        self.glyphs.iter().map(|g| g.text.as_str()).collect()
    }

    /// Boxes of every non-overlapping occurrence of `needle`, left to right
    pub fn find(&self, needle: &str) -> Vec<AnchorBox> {
        if needle.is_empty() {
            return Vec::new();
        }

        // Byte offset in the run text -> owning glyph
        let mut text = String::new();
        let mut owner = Vec::new();
        for (idx, glyph) in self.glyphs.iter().enumerate() {
            text.push_str(&glyph.text);
            owner.resize(text.len(), idx);
        }

        text.match_indices(needle)
            .filter_map(|(start, matched)| {
                let first = owner[start];
                let last = owner[start + matched.len() - 1];
                self.glyphs[first..=last]
                    .iter()
                    .map(|g| g.bbox)
                    .reduce(|a, b| a.union(&b))
            })
            .collect()
    }
}

/// Positioned text of one page
#[derive(Debug, Clone, Default)]
pub struct PageText {
    pub runs: Vec<TextRun>,
}

impl PageText {
    /// Interpret the content stream of a page
    pub fn extract(doc: &Document, page_id: ObjectId) -> Result<PageText, StampError> {
        let fonts = doc.get_page_fonts(page_id).unwrap_or_default();
        let content_data = doc
            .get_page_content(page_id)
            .map_err(|e| StampError::Parse(e.to_string()))?;
        let content =
            Content::decode(&content_data).map_err(|e| StampError::Parse(e.to_string()))?;

        let table = FontTable {
            fonts: fonts
                .iter()
                .map(|(name, dict)| (name.clone(), FontMetrics::from_dict(doc, dict)))
                .collect(),
            fallback: FontMetrics::default(),
        };
        let mut interpreter = Interpreter::default();

        for op in &content.operations {
            interpreter.apply(&op.operator, &op.operands, &table);
        }

        Ok(PageText {
            runs: interpreter.runs,
        })
    }

    /// Extract the text of a 1-indexed page from a PDF buffer
    pub fn extract_mem(buffer: &[u8], page_num: u32) -> Result<PageText, StampError> {
        let doc = crate::open_document(buffer)?;
        let page_id = *doc.get_pages().get(&page_num).ok_or(StampError::NoPages)?;
        PageText::extract(&doc, page_id)
    }

    /// Boxes of every occurrence of the exact string, in content order
    pub fn find_literal(&self, needle: &str) -> Vec<AnchorBox> {
        self.runs.iter().flat_map(|run| run.find(needle)).collect()
    }

    /// Full page text, one run per line
    pub fn text(&self) -> String {
        self.runs
            .iter()
            .map(|r| r.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Find a marker with the case fallback chain: as given, upper-cased,
/// lower-cased. The first non-empty result wins.
pub fn find_boxes(page: &PageText, literal: &str) -> Vec<AnchorBox> {
    let exact = page.find_literal(literal);
    if !exact.is_empty() {
        return exact;
    }

    let upper = page.find_literal(&literal.to_uppercase());
    if !upper.is_empty() {
        log::debug!("marker {:?} found upper-cased", literal);
        return upper;
    }

    let lower = page.find_literal(&literal.to_lowercase());
    if !lower.is_empty() {
        log::debug!("marker {:?} found lower-cased", literal);
    }
    lower
}

/// A logical marker: distinct accepted spellings in registration order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Marker {
    spellings: Vec<String>,
}

impl Marker {
    /// Drops empty and repeated spellings, keeping first occurrences
    pub fn new<S: AsRef<str>>(spellings: &[S]) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for s in spellings {
            let s = s.as_ref();
            if !s.is_empty() && !unique.iter().any(|u| u == s) {
                unique.push(s.to_string());
            }
        }
        Self { spellings: unique }
    }

    pub fn spellings(&self) -> &[String] {
        &self.spellings
    }

    pub fn is_empty(&self) -> bool {
        self.spellings.is_empty()
    }

    /// Boxes from every spelling concatenated in registration order
    pub fn locate(&self, page: &PageText) -> Vec<AnchorBox> {
        self.spellings
            .iter()
            .flat_map(|s| find_boxes(page, s))
            .collect()
    }

    /// The anchor: first box of the first spelling that matched
    pub fn first_box(&self, page: &PageText) -> Option<AnchorBox> {
        self.spellings
            .iter()
            .find_map(|s| find_boxes(page, s).into_iter().next())
    }
}

/// Multiply two 2D transformation matrices
/// Matrix format: [a, b, c, d, e, f] representing:
/// | a  b  0 |
/// | c  d  0 |
/// | e  f  1 |
fn multiply_matrices(m1: &[f32; 6], m2: &[f32; 6]) -> [f32; 6] {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn transform_point(m: &[f32; 6], x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

fn translation(tx: f32, ty: f32) -> [f32; 6] {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Graphics state entries that affect text placement (saved by q/Q)
#[derive(Debug, Clone)]
struct TextState {
    ctm: [f32; 6],
    font: Vec<u8>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    rise: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            font: Vec::new(),
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

/// Metrics of the fonts a page references, keyed by resource name
#[derive(Default)]
struct FontTable {
    fonts: HashMap<Vec<u8>, FontMetrics>,
    fallback: FontMetrics,
}

impl FontTable {
    fn get(&self, name: &[u8]) -> &FontMetrics {
        self.fonts.get(name).unwrap_or(&self.fallback)
    }
}

#[derive(Default)]
struct Interpreter {
    state: TextState,
    stack: Vec<TextState>,
    text_matrix: [f32; 6],
    line_matrix: [f32; 6],
    runs: Vec<TextRun>,
}

impl Interpreter {
    fn apply(&mut self, operator: &str, operands: &[Object], fonts: &FontTable) {
        let num = |i: usize| operands.get(i).and_then(get_number);

        match operator {
            "q" => self.stack.push(self.state.clone()),
            "Q" => {
                if let Some(saved) = self.stack.pop() {
                    self.state = saved;
                }
            }
            "cm" => {
                if operands.len() >= 6 {
                    let m = [
                        num(0).unwrap_or(1.0),
                        num(1).unwrap_or(0.0),
                        num(2).unwrap_or(0.0),
                        num(3).unwrap_or(1.0),
                        num(4).unwrap_or(0.0),
                        num(5).unwrap_or(0.0),
                    ];
                    self.state.ctm = multiply_matrices(&m, &self.state.ctm);
                }
            }
            "BT" => {
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            "Tf" => {
                if let Some(Ok(name)) = operands.first().map(|o| o.as_name()) {
                    self.state.font = name.to_vec();
                }
                if let Some(size) = num(1) {
                    self.state.font_size = size;
                }
            }
            "Tc" => self.state.char_spacing = num(0).unwrap_or(0.0),
            "Tw" => self.state.word_spacing = num(0).unwrap_or(0.0),
            "Tz" => self.state.horizontal_scale = num(0).unwrap_or(100.0) / 100.0,
            "TL" => self.state.leading = num(0).unwrap_or(0.0),
            "Ts" => self.state.rise = num(0).unwrap_or(0.0),
            "Td" | "TD" => {
                let tx = num(0).unwrap_or(0.0);
                let ty = num(1).unwrap_or(0.0);
                if operator == "TD" {
                    self.state.leading = -ty;
                }
                self.line_matrix = multiply_matrices(&translation(tx, ty), &self.line_matrix);
                self.text_matrix = self.line_matrix;
            }
            "Tm" => {
                if operands.len() >= 6 {
                    for i in 0..6 {
                        self.text_matrix[i] = num(i).unwrap_or(IDENTITY[i]);
                    }
                    self.line_matrix = self.text_matrix;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    let font = fonts.get(&self.state.font);
                    let mut run = TextRun::default();
                    self.show(bytes, font, &mut run);
                    self.push_run(run);
                }
            }
            "'" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    let font = fonts.get(&self.state.font);
                    let mut run = TextRun::default();
                    self.show(bytes, font, &mut run);
                    self.push_run(run);
                }
            }
            "\"" => {
                self.state.word_spacing = num(0).unwrap_or(0.0);
                self.state.char_spacing = num(1).unwrap_or(0.0);
                self.next_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    let font = fonts.get(&self.state.font);
                    let mut run = TextRun::default();
                    self.show(bytes, font, &mut run);
                    self.push_run(run);
                }
            }
            "TJ" => {
                if let Some(Ok(array)) = operands.first().map(|o| o.as_array()) {
                    let font = fonts.get(&self.state.font);
                    let mut run = TextRun::default();
                    for item in array {
                        match item {
                            Object::String(bytes, _) => self.show(bytes, font, &mut run),
                            other => {
                                if let Some(adjust) = get_number(other) {
                                    let tx = -adjust / 1000.0
                                        * self.state.font_size
                                        * self.state.horizontal_scale;
                                    self.advance(tx);
                                }
                            }
                        }
                    }
                    self.push_run(run);
                }
            }
            _ => {}
        }
    }

    fn next_line(&mut self) {
        self.line_matrix =
            multiply_matrices(&translation(0.0, -self.state.leading), &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn advance(&mut self, tx: f32) {
        self.text_matrix = multiply_matrices(&translation(tx, 0.0), &self.text_matrix);
    }

    fn push_run(&mut self, run: TextRun) {
        if !run.glyphs.is_empty() {
            self.runs.push(run);
        }
    }

    /// Lay out one shown string, appending a glyph per character code
    fn show(&mut self, bytes: &[u8], font: &FontMetrics, run: &mut TextRun) {
        let size = self.state.font_size;
        let scale = self.state.horizontal_scale;

        for code in font.codes(bytes) {
            let text = font.decode(code);
            let w0 = font.width(code, &text) / 1000.0;

            // Text rendering matrix: [size*Th 0 0 size 0 rise] x Tm x CTM
            let params = [size * scale, 0.0, 0.0, size, 0.0, self.state.rise];
            let trm = multiply_matrices(
                &params,
                &multiply_matrices(&self.text_matrix, &self.state.ctm),
            );

            let corners = [
                transform_point(&trm, 0.0, GLYPH_DESCENT),
                transform_point(&trm, w0, GLYPH_DESCENT),
                transform_point(&trm, 0.0, GLYPH_ASCENT),
                transform_point(&trm, w0, GLYPH_ASCENT),
            ];
            let bbox = corners.iter().skip(1).fold(
                AnchorBox::new(corners[0].0, corners[0].1, corners[0].0, corners[0].1),
                |b, &(x, y)| AnchorBox::new(b.x0.min(x), b.y0.min(y), b.x1.max(x), b.y1.max(y)),
            );

            run.glyphs.push(Glyph { text, bbox });

            let mut tx = w0 * size + self.state.char_spacing;
            if font.is_word_space(code) {
                tx += self.state.word_spacing;
            }
            self.advance(tx * scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph_run(text: &str, x: f32, y: f32, advance: f32) -> TextRun {
        TextRun {
            glyphs: text
                .chars()
                .enumerate()
                .map(|(i, c)| Glyph {
                    text: c.to_string(),
                    bbox: AnchorBox::new(
                        x + i as f32 * advance,
                        y,
                        x + (i + 1) as f32 * advance,
                        y + 10.0,
                    ),
                })
                .collect(),
        }
    }

    fn run_ops(ops: &[(&str, Vec<Object>)]) -> Vec<TextRun> {
        let fonts = FontTable::default();
        let mut interpreter = Interpreter::default();
        for (operator, operands) in ops {
            interpreter.apply(operator, operands, &fonts);
        }
        interpreter.runs
    }

    #[test]
    fn test_run_find_substring_box() {
        let run = glyph_run("SISTEMA: X", 100.0, 500.0, 5.0);
        let boxes = run.find("SISTEMA");
        assert_eq!(boxes, vec![AnchorBox::new(100.0, 500.0, 135.0, 510.0)]);
    }

    #[test]
    fn test_run_find_multiple_occurrences() {
        let run = glyph_run("AB AB", 0.0, 0.0, 1.0);
        let boxes = run.find("AB");
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[1].x0, 3.0);
        assert_eq!(boxes[1].x1, 5.0);
    }

    #[test]
    fn test_case_fallback_upper() {
        let page = PageText {
            runs: vec![glyph_run("SISTEMA", 100.0, 500.0, 5.0)],
        };
        let boxes = find_boxes(&page, "Sistema");
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].x0, 100.0);
    }

    #[test]
    fn test_case_fallback_lower() {
        let page = PageText {
            runs: vec![glyph_run("codigo", 10.0, 20.0, 5.0)],
        };
        assert_eq!(find_boxes(&page, "Codigo").len(), 1);
        assert!(find_boxes(&page, "Sistema").is_empty());
    }

    #[test]
    fn test_exact_case_preferred() {
        let page = PageText {
            runs: vec![
                glyph_run("SISTEMA", 0.0, 0.0, 1.0),
                glyph_run("Sistema", 50.0, 0.0, 1.0),
            ],
        };
        let boxes = find_boxes(&page, "Sistema");
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].x0, 50.0);
    }

    #[test]
    fn test_marker_concatenates_spellings() {
        let page = PageText {
            runs: vec![
                glyph_run("SUB SISTEMA", 0.0, 100.0, 1.0),
                glyph_run("SUBSISTEMA", 0.0, 50.0, 1.0),
            ],
        };
        let marker = Marker::new(&["SUBSISTEMA", "SUB SISTEMA", "SUBSISTEMA"]);
        assert_eq!(marker.spellings().len(), 2);
        let boxes = marker.locate(&page);
        assert_eq!(boxes.len(), 2);
        // Registration order, not content order
        assert_eq!(boxes[0].y0, 50.0);
        assert_eq!(marker.first_box(&page), Some(boxes[0]));
    }

    #[test]
    fn test_interpreter_tj_positions() {
        let runs = run_ops(&[
            ("BT", vec![]),
            ("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            ("Td", vec![100.into(), 500.into()]),
            ("Tj", vec![Object::string_literal("AI")]),
            ("ET", vec![]),
        ]);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text(), "AI");
        let a = runs[0].glyphs[0].bbox;
        let i = runs[0].glyphs[1].bbox;
        assert!((a.x0 - 100.0).abs() < 1e-3);
        assert!((a.x1 - 106.67).abs() < 1e-3);
        assert!((a.y0 - 498.0).abs() < 1e-3);
        assert!((a.y1 - 508.0).abs() < 1e-3);
        assert!((i.x0 - 106.67).abs() < 1e-3);
    }

    #[test]
    fn test_interpreter_tj_array_kerning() {
        let runs = run_ops(&[
            ("BT", vec![]),
            ("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            (
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("A"),
                    Object::Integer(-1000),
                    Object::string_literal("B"),
                ])],
            ),
        ]);
        assert_eq!(runs[0].text(), "AB");
        // A advances 6.67, the -1000 adjustment moves right another 10
        assert!((runs[0].glyphs[1].bbox.x0 - 16.67).abs() < 1e-3);
    }

    #[test]
    fn test_interpreter_ctm_and_state_restore() {
        let runs = run_ops(&[
            ("q", vec![]),
            (
                "cm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 50.into()],
            ),
            ("BT", vec![]),
            ("Tj", vec![Object::string_literal("X")]),
            ("ET", vec![]),
            ("Q", vec![]),
            ("BT", vec![]),
            ("Tj", vec![Object::string_literal("Y")]),
            ("ET", vec![]),
        ]);
        assert_eq!(runs.len(), 2);
        assert!((runs[0].glyphs[0].bbox.x0 - 50.0).abs() < 1e-3);
        assert!((runs[1].glyphs[0].bbox.x0).abs() < 1e-3);
    }

    #[test]
    fn test_interpreter_leading() {
        let runs = run_ops(&[
            ("BT", vec![]),
            ("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            ("TD", vec![0.into(), (-12).into()]),
            ("'", vec![Object::string_literal("Z")]),
        ]);
        // TD sets leading to 12, then ' moves down another line
        assert!((runs[0].glyphs[0].bbox.y0 - (-24.0 - 2.0)).abs() < 1e-3);
    }
}
