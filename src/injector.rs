//! Text injection into PDF pages
//!
//! Stamps are drawn in a content stream appended after the page's own
//! content. The original streams are bracketed by `q`/`Q` so any graphics
//! state they leave behind cannot move or recolor the injected text.

use crate::config::{PageScope, Rotation, TextColor};
use crate::fonts::{encode_win_ansi, resolve};
use crate::locator::{Marker, PageText};
use crate::position::{self, Point, PositionSpec};
use crate::StampError;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

/// Resource name prefix for the injected font
const FONT_RESOURCE_PREFIX: &str = "FStamp";

/// Max Parent links followed when looking for inherited resources
const MAX_INHERITANCE_DEPTH: usize = 32;

/// How injected text is drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub font_size: f32,
    pub color: TextColor,
    pub rotation: Rotation,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 8.0,
            color: TextColor::BLACK,
            rotation: Rotation::Deg0,
        }
    }
}

/// One piece of text at one page-space point
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    pub point: Point,
    pub text: String,
}

/// A field to inject and the marker that anchors it
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedField {
    pub name: String,
    pub marker: Marker,
}

/// Everything needed to stamp a document, fixed for a whole batch
#[derive(Debug, Clone, PartialEq)]
pub struct StampPlan {
    pub fields: Vec<PlannedField>,
    pub positions: PositionSpec,
    pub style: TextStyle,
    pub scope: PageScope,
}

/// Draw stamps on one page
///
/// Stamps with empty text are skipped. Returns how many were drawn; when
/// that is zero the document is left untouched.
pub fn inject(
    doc: &mut Document,
    page_id: ObjectId,
    stamps: &[Stamp],
    style: &TextStyle,
) -> Result<usize, StampError> {
    inject_with_font(doc, page_id, &mut None, stamps, style)
}

/// Like [`inject`], sharing one font object across pages
///
/// The font is added to the document the first time something is drawn.
fn inject_with_font(
    doc: &mut Document,
    page_id: ObjectId,
    font: &mut Option<ObjectId>,
    stamps: &[Stamp],
    style: &TextStyle,
) -> Result<usize, StampError> {
    let visible: Vec<&Stamp> = stamps.iter().filter(|s| !s.text.is_empty()).collect();
    if visible.is_empty() {
        return Ok(0);
    }

    let font_id = *font.get_or_insert_with(|| doc.add_object(helvetica()));
    let font_name = register_font(doc, page_id, font_id)?;
    let content = stamp_content(&font_name, &visible, style)?;
    append_content(doc, page_id, content)?;

    Ok(visible.len())
}

/// Stamp every targeted page of a document with a record's values
///
/// `values` pairs field names with text. Fields whose value is missing or
/// empty are skipped, as are offset-mode fields whose marker is not on the
/// page. Returns the number of stamps drawn.
pub fn stamp_document(
    doc: &mut Document,
    plan: &StampPlan,
    values: &[(&str, &str)],
) -> Result<usize, StampError> {
    let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();
    if pages.is_empty() {
        return Err(StampError::NoPages);
    }

    let targets = match plan.scope {
        PageScope::FirstPage => &pages[..1],
        PageScope::AllPages => &pages[..],
    };

    let mut font = None;
    let mut drawn = 0;

    for &(page_num, page_id) in targets {
        let page_text = if plan.positions.needs_anchor() {
            Some(PageText::extract(doc, page_id)?)
        } else {
            None
        };

        let mut stamps = Vec::new();
        for field in &plan.fields {
            let text = match values.iter().find(|(name, _)| *name == field.name) {
                Some((_, value)) if !value.is_empty() => *value,
                _ => {
                    log::debug!("page {}: no value for {}", page_num, field.name);
                    continue;
                }
            };

            let anchor = page_text.as_ref().and_then(|t| field.marker.first_box(t));
            if plan.positions.needs_anchor() && anchor.is_none() {
                log::warn!(
                    "page {}: marker for {} not found ({:?})",
                    page_num,
                    field.name,
                    field.marker.spellings()
                );
                continue;
            }

            if let Some(point) = position::resolve(&field.name, anchor.as_ref(), &plan.positions)
            {
                stamps.push(Stamp {
                    point,
                    text: text.to_string(),
                });
            }
        }

        drawn += inject_with_font(doc, page_id, &mut font, &stamps, &plan.style)?;
    }

    Ok(drawn)
}

/// Standard Helvetica, which every viewer provides without embedding
pub(crate) fn helvetica() -> Dictionary {
    Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
    ])
}

/// Resources in effect for a page, following Parent links when the page
/// has none of its own
fn effective_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = doc.get_dictionary(page_id).ok();

    for _ in 0..MAX_INHERITANCE_DEPTH {
        let Some(dict) = current else { break };
        if let Ok(resources) = dict.get(b"Resources") {
            if let Ok(resources) = resolve(doc, resources).as_dict() {
                return resources.clone();
            }
        }
        current = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_dictionary(id))
            .ok();
    }

    Dictionary::new()
}

/// Add the font to the page's own resources under an unused name
///
/// The page gets a private copy of its resources, so pages sharing a
/// resource dictionary are not affected.
pub(crate) fn register_font(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
) -> Result<String, StampError> {
    let mut resources = effective_resources(doc, page_id);
    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|f| resolve(doc, f).as_dict().ok())
        .cloned()
        .unwrap_or_default();

    let name = unused_font_name(&fonts);
    fonts.set(name.clone(), Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));

    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Resources", Object::Dictionary(resources));

    Ok(name)
}

fn unused_font_name(fonts: &Dictionary) -> String {
    if !fonts.has(FONT_RESOURCE_PREFIX.as_bytes()) {
        return FONT_RESOURCE_PREFIX.to_string();
    }
    (1..)
        .map(|n| format!("{FONT_RESOURCE_PREFIX}{n}"))
        .find(|name| !fonts.has(name.as_bytes()))
        .unwrap_or_default()
}

fn stamp_content(
    font_name: &str,
    stamps: &[&Stamp],
    style: &TextStyle,
) -> Result<Vec<u8>, StampError> {
    let TextColor { r, g, b } = style.color;
    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new("rg", vec![Object::Real(r), Object::Real(g), Object::Real(b)]),
    ];

    for stamp in stamps {
        let Point { x, y } = stamp.point;
        let (ma, mb, mc, md) = match style.rotation {
            Rotation::Deg0 => (1.0, 0.0, 0.0, 1.0),
            Rotation::Deg90 => (0.0, 1.0, -1.0, 0.0),
        };

        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![
                Object::Name(font_name.as_bytes().to_vec()),
                Object::Real(style.font_size),
            ],
        ));
        operations.push(Operation::new(
            "Tm",
            vec![
                Object::Real(ma),
                Object::Real(mb),
                Object::Real(mc),
                Object::Real(md),
                Object::Real(x),
                Object::Real(y),
            ],
        ));
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(
                encode_win_ansi(&stamp.text),
                StringFormat::Literal,
            )],
        ));
        operations.push(Operation::new("ET", vec![]));
    }

    operations.push(Operation::new("Q", vec![]));
    encoded(operations)
}

pub(crate) fn encoded(operations: Vec<Operation>) -> Result<Vec<u8>, StampError> {
    Ok(Content { operations }.encode()?)
}

/// Append a content stream after the page's existing content
///
/// Existing streams are wrapped as `q ... Q`. Newlines after the opening `q`
/// and before the closing `Q` keep them separate from the original operators
/// when readers join the streams.
pub(crate) fn append_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
) -> Result<(), StampError> {
    let existing = existing_contents(doc, page_id);

    let mut contents = Vec::with_capacity(existing.len() + 2);
    let mut tail = b"\n".to_vec();

    if !existing.is_empty() {
        let mut open = encoded(vec![Operation::new("q", vec![])])?;
        open.push(b'\n');
        let open_id = doc.add_object(Stream::new(Dictionary::new(), open));
        contents.push(Object::Reference(open_id));
        contents.extend(existing);
        tail.extend(encoded(vec![Operation::new("Q", vec![])])?);
        tail.push(b'\n');
    }

    tail.extend(content);
    let stamp_id = doc.add_object(Stream::new(Dictionary::new(), tail));
    contents.push(Object::Reference(stamp_id));

    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Contents", Object::Array(contents));

    Ok(())
}

/// The page's content stream references, flattened
fn existing_contents(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };

    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::get_number;
    use crate::locator::AnchorBox;
    use crate::position::{FixedPosition, OffsetPosition};
    use std::collections::BTreeMap;

    /// Pages with "SISTEMA:" at (100, 700), Helvetica 10pt, resources on the
    /// Pages node when `inherit` is set
    fn test_document(page_count: usize, inherit: bool) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));
        let resources = Dictionary::from_iter([(
            "Font",
            Object::Dictionary(Dictionary::from_iter([("F1", Object::Reference(font_id))])),
        )]);
        let resources_id = doc.add_object(resources.clone());

        let mut kids = Vec::new();
        for _ in 0..page_count {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 10.into()]),
                    Operation::new("Td", vec![100.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal("SISTEMA:")]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                Dictionary::new(),
                content.encode().unwrap(),
            ));
            let mut page = Dictionary::from_iter([
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                ("Contents", Object::Reference(content_id)),
                (
                    "MediaBox",
                    Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
                ),
            ]);
            if !inherit {
                page.set("Resources", Object::Reference(resources_id));
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let mut pages = Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(page_count as i64)),
            ("Kids", Object::Array(kids)),
        ]);
        if inherit {
            pages.set("Resources", Object::Dictionary(resources));
        }
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc
    }

    fn first_page(doc: &Document) -> ObjectId {
        *doc.get_pages().values().next().unwrap()
    }

    fn shown_strings(doc: &Document, page_id: ObjectId) -> Vec<Vec<u8>> {
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        content
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| match op.operands.first() {
                Some(Object::String(bytes, _)) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn fixed_plan(scope: PageScope) -> StampPlan {
        let mut positions = BTreeMap::new();
        positions.insert("sistema".to_string(), FixedPosition { x: 100.0, y: 35.0 });
        positions.insert("code".to_string(), FixedPosition { x: 430.0, y: 35.0 });
        StampPlan {
            fields: vec![
                PlannedField {
                    name: "sistema".into(),
                    marker: Marker::default(),
                },
                PlannedField {
                    name: "code".into(),
                    marker: Marker::default(),
                },
            ],
            positions: PositionSpec::Fixed(positions),
            style: TextStyle::default(),
            scope,
        }
    }

    #[test]
    fn test_inject_appends_wrapped_stream() {
        let mut doc = test_document(1, false);
        let page_id = first_page(&doc);
        let stamps = vec![Stamp {
            point: Point { x: 50.0, y: 60.0 },
            text: "Agua".into(),
        }];

        let drawn = inject(&mut doc, page_id, &stamps, &TextStyle::default()).unwrap();
        assert_eq!(drawn, 1);

        let page = doc.get_dictionary(page_id).unwrap();
        let contents = page.get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 3);

        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let operators: Vec<&str> = content.operations.iter().map(|o| o.operator.as_str()).collect();
        assert_eq!(operators.first(), Some(&"q"));
        assert_eq!(operators.last(), Some(&"Q"));
        assert_eq!(
            shown_strings(&doc, page_id),
            vec![b"SISTEMA:".to_vec(), b"Agua".to_vec()]
        );
    }

    #[test]
    fn test_inject_skips_empty_text() {
        let mut doc = test_document(1, false);
        let page_id = first_page(&doc);
        let before = doc.get_page_content(page_id).unwrap();
        let stamps = vec![Stamp {
            point: Point { x: 50.0, y: 60.0 },
            text: String::new(),
        }];

        assert_eq!(
            inject(&mut doc, page_id, &stamps, &TextStyle::default()).unwrap(),
            0
        );
        assert_eq!(doc.get_page_content(page_id).unwrap(), before);
    }

    #[test]
    fn test_opening_q_is_separate_operator() {
        let mut doc = test_document(1, false);
        let page_id = first_page(&doc);
        append_content(&mut doc, page_id, b"BT ET".to_vec()).unwrap();

        let page = doc.get_dictionary(page_id).unwrap();
        let contents = page.get(b"Contents").unwrap().as_array().unwrap();
        let open_id = contents[0].as_reference().unwrap();
        let open = doc.get_object(open_id).unwrap().as_stream().unwrap();
        assert!(open.content.ends_with(b"\n"));

        // Joined streams still start with a standalone q
        let joined = doc.get_page_content(page_id).unwrap();
        let content = Content::decode(&joined).unwrap();
        assert_eq!(content.operations[0].operator, "q");
        assert_eq!(content.operations[1].operator, "BT");
        let close = content.operations.len() - 3;
        assert_eq!(content.operations[close].operator, "Q");
        assert_eq!(content.operations[close + 1].operator, "BT");
    }

    #[test]
    fn test_nothing_drawn_adds_no_objects() {
        let mut doc = test_document(2, false);
        let objects_before = doc.objects.len();
        let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        let contents_before: Vec<Vec<u8>> = pages
            .iter()
            .map(|id| doc.get_page_content(*id).unwrap())
            .collect();

        let values = [("sistema", ""), ("code", "")];
        let drawn = stamp_document(&mut doc, &fixed_plan(PageScope::AllPages), &values).unwrap();
        assert_eq!(drawn, 0);
        assert_eq!(doc.objects.len(), objects_before);
        for (id, before) in pages.iter().zip(&contents_before) {
            assert_eq!(&doc.get_page_content(*id).unwrap(), before);
        }
    }

    #[test]
    fn test_missing_markers_add_no_objects() {
        let mut doc = test_document(1, false);
        let objects_before = doc.objects.len();
        let plan = StampPlan {
            fields: vec![PlannedField {
                name: "subsistema".into(),
                marker: Marker::new(&["SUBSISTEMA"]),
            }],
            positions: PositionSpec::Offset(OffsetPosition::default()),
            style: TextStyle::default(),
            scope: PageScope::AllPages,
        };

        let drawn = stamp_document(&mut doc, &plan, &[("subsistema", "Bombeo")]).unwrap();
        assert_eq!(drawn, 0);
        assert_eq!(doc.objects.len(), objects_before);
    }

    #[test]
    fn test_font_shared_across_pages() {
        let mut doc = test_document(3, false);
        let objects_before = doc.objects.len();
        let values = [("sistema", "Agua")];
        stamp_document(&mut doc, &fixed_plan(PageScope::AllPages), &values).unwrap();

        // One font, then an opening and a stamp stream per page
        assert_eq!(doc.objects.len(), objects_before + 1 + 3 * 2);
    }

    #[test]
    fn test_font_registered_beside_inherited_resources() {
        let mut doc = test_document(1, true);
        let page_id = first_page(&doc);
        let font_id = doc.add_object(helvetica());

        let name = register_font(&mut doc, page_id, font_id).unwrap();
        assert_eq!(name, "FStamp");

        let page = doc.get_dictionary(page_id).unwrap();
        let fonts = page
            .get(b"Resources")
            .and_then(Object::as_dict)
            .and_then(|r| r.get(b"Font"))
            .and_then(Object::as_dict)
            .unwrap();
        assert!(fonts.has(b"F1"));
        assert!(fonts.has(b"FStamp"));
    }

    #[test]
    fn test_unused_font_name() {
        let fonts = Dictionary::from_iter([
            ("FStamp", Object::Null),
            ("FStamp1", Object::Null),
        ]);
        assert_eq!(unused_font_name(&fonts), "FStamp2");
    }

    #[test]
    fn test_rotated_text_matrix() {
        let mut doc = test_document(1, false);
        let page_id = first_page(&doc);
        let style = TextStyle {
            rotation: Rotation::Deg90,
            ..TextStyle::default()
        };
        let stamps = vec![Stamp {
            point: Point { x: 50.0, y: 500.0 },
            text: "Agua".into(),
        }];
        inject(&mut doc, page_id, &stamps, &style).unwrap();

        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let tm = content
            .operations
            .iter()
            .filter(|o| o.operator == "Tm")
            .last()
            .unwrap();
        let values: Vec<f32> = tm.operands.iter().map(|o| get_number(o).unwrap()).collect();
        assert_eq!(values, vec![0.0, 1.0, -1.0, 0.0, 50.0, 500.0]);
    }

    #[test]
    fn test_stamp_document_scope() {
        let values = [("sistema", "Agua"), ("code", "P-001")];

        let mut doc = test_document(3, false);
        let drawn = stamp_document(&mut doc, &fixed_plan(PageScope::FirstPage), &values).unwrap();
        assert_eq!(drawn, 2);
        let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        assert_eq!(shown_strings(&doc, pages[0]).len(), 3);
        assert_eq!(shown_strings(&doc, pages[1]).len(), 1);

        let mut doc = test_document(3, false);
        let drawn = stamp_document(&mut doc, &fixed_plan(PageScope::AllPages), &values).unwrap();
        assert_eq!(drawn, 6);
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_stamp_document_offset_mode() {
        let mut doc = test_document(1, false);
        let plan = StampPlan {
            fields: vec![
                PlannedField {
                    name: "sistema".into(),
                    marker: Marker::new(&["SISTEMA"]),
                },
                PlannedField {
                    name: "subsistema".into(),
                    marker: Marker::new(&["SUBSISTEMA"]),
                },
            ],
            positions: PositionSpec::Offset(OffsetPosition::default()),
            style: TextStyle::default(),
            scope: PageScope::FirstPage,
        };

        let values = [("sistema", "Agua"), ("subsistema", "Bombeo")];
        let drawn = stamp_document(&mut doc, &plan, &values).unwrap();
        // Only the marker present on the page gets its value
        assert_eq!(drawn, 1);

        let page_id = first_page(&doc);
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let tm = content
            .operations
            .iter()
            .filter(|o| o.operator == "Tm")
            .last()
            .unwrap();
        let x = get_number(&tm.operands[4]).unwrap();
        let y = get_number(&tm.operands[5]).unwrap();

        // "SISTEMA" in Helvetica 10pt is 43.9pt wide; its box spans 698..708
        let anchor = AnchorBox::new(100.0, 698.0, 143.9, 708.0);
        assert!((x - (anchor.x1 + 15.0)).abs() < 0.1);
        assert!((y - 705.0).abs() < 0.1);
    }

    #[test]
    fn test_stamp_document_without_pages() {
        let mut doc = test_document(0, false);
        assert!(matches!(
            stamp_document(&mut doc, &fixed_plan(PageScope::FirstPage), &[]),
            Err(StampError::NoPages)
        ));
    }
}
