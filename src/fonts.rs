//! Font metrics and code-to-Unicode decoding for anchor location
//!
//! Glyph widths come from the font dictionary (`/Widths` for simple fonts,
//! `/W` for composite fonts) with the Helvetica and Courier standard metrics
//! as fallback. Text decoding prefers the ToUnicode CMap, then the font's
//! simple encoding, then Latin-1.

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object, Stream};
use std::collections::HashMap;
use std::io::Read;

/// Helvetica advance widths for codes 32..=126 (1/1000 em)
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 32-47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 48-63
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 64-79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 80-95
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 96-111
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 112-126
];

/// Width used for characters outside the Helvetica table
const HELVETICA_DEFAULT_WIDTH: f32 = 556.0;

/// Standard metrics used when a font carries no width information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardMetrics {
    Helvetica,
    Courier,
}

impl StandardMetrics {
    fn from_base_font(name: &[u8]) -> Self {
        if String::from_utf8_lossy(name).contains("Courier") {
            StandardMetrics::Courier
        } else {
            StandardMetrics::Helvetica
        }
    }

    /// Advance width of a character in 1/1000 em
    pub fn width(self, ch: char) -> f32 {
        match self {
            StandardMetrics::Courier => 600.0,
            StandardMetrics::Helvetica => {
                let code = ch as u32;
                if (32..=126).contains(&code) {
                    HELVETICA_WIDTHS[(code - 32) as usize] as f32
                } else {
                    HELVETICA_DEFAULT_WIDTH
                }
            }
        }
    }

    /// Width of a whole string in points at the given size
    pub fn text_width(self, text: &str, font_size: f32) -> f32 {
        text.chars().map(|c| self.width(c)).sum::<f32>() * font_size / 1000.0
    }
}

/// Everything the locator needs to know about one font resource
#[derive(Debug, Clone)]
pub struct FontMetrics {
    two_byte: bool,
    to_unicode: Option<ToUnicodeCMap>,
    byte_map: Option<Vec<Option<String>>>,
    widths: HashMap<u32, f32>,
    missing_width: f32,
    standard: Option<StandardMetrics>,
}

impl Default for FontMetrics {
    /// Metrics for an unknown font: Helvetica widths, Latin-1 decoding
    fn default() -> Self {
        Self {
            two_byte: false,
            to_unicode: None,
            byte_map: None,
            widths: HashMap::new(),
            missing_width: 0.0,
            standard: Some(StandardMetrics::Helvetica),
        }
    }
}

impl FontMetrics {
    /// Read metrics from a font dictionary
    pub fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let subtype = dict.get(b"Subtype").and_then(|o| o.as_name()).unwrap_or(&b""[..]);
        let two_byte = subtype == b"Type0";

        let to_unicode = dict
            .get(b"ToUnicode")
            .ok()
            .map(|o| resolve(doc, o))
            .and_then(|o| o.as_stream().ok())
            .and_then(stream_content)
            .and_then(|content| ToUnicodeCMap::parse(&content));

        let mut metrics = FontMetrics {
            two_byte,
            to_unicode,
            ..FontMetrics::default()
        };

        if two_byte {
            metrics.read_composite_widths(doc, dict);
        } else {
            metrics.byte_map = simple_byte_map(doc, dict);
            metrics.read_simple_widths(doc, dict);
        }

        metrics
    }

    fn read_simple_widths(&mut self, doc: &Document, dict: &Dictionary) {
        let widths = dict
            .get(b"Widths")
            .ok()
            .map(|o| resolve(doc, o))
            .and_then(|o| o.as_array().ok());

        match widths {
            Some(widths) => {
                let first_char = dict
                    .get(b"FirstChar")
                    .ok()
                    .and_then(|o| o.as_i64().ok())
                    .unwrap_or(0)
                    .max(0) as u32;
                for (i, w) in widths.iter().enumerate() {
                    if let Some(w) = get_number(resolve(doc, w)) {
                        self.widths.insert(first_char + i as u32, w);
                    }
                }
                self.missing_width = dict
                    .get(b"FontDescriptor")
                    .ok()
                    .map(|o| resolve(doc, o))
                    .and_then(|o| o.as_dict().ok())
                    .and_then(|d| d.get(b"MissingWidth").ok())
                    .and_then(get_number)
                    .unwrap_or(0.0);
                self.standard = None;
            }
            None => {
                let base_font = dict.get(b"BaseFont").and_then(|o| o.as_name()).unwrap_or(&b""[..]);
                self.standard = Some(StandardMetrics::from_base_font(base_font));
            }
        }
    }

    fn read_composite_widths(&mut self, doc: &Document, dict: &Dictionary) {
        self.standard = None;
        self.missing_width = 1000.0;

        let descendant = dict
            .get(b"DescendantFonts")
            .ok()
            .map(|o| resolve(doc, o))
            .and_then(|o| o.as_array().ok())
            .and_then(|arr| arr.first())
            .map(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok());

        let Some(descendant) = descendant else {
            return;
        };

        if let Some(dw) = descendant.get(b"DW").ok().and_then(get_number) {
            self.missing_width = dw;
        }

        let Some(w) = descendant
            .get(b"W")
            .ok()
            .map(|o| resolve(doc, o))
            .and_then(|o| o.as_array().ok())
        else {
            return;
        };

        // Entries are either `c [w1 w2 ...]` or `c_first c_last w`
        let mut i = 0;
        while i < w.len() {
            let Some(start) = get_number(resolve(doc, &w[i])) else {
                break;
            };
            let start = start.max(0.0) as u32;
            match w.get(i + 1).map(|o| resolve(doc, o)) {
                Some(Object::Array(list)) => {
                    for (offset, width) in list.iter().enumerate() {
                        if let Some(width) = get_number(resolve(doc, width)) {
                            self.widths.insert(start + offset as u32, width);
                        }
                    }
                    i += 2;
                }
                Some(end) => {
                    let end = get_number(end).unwrap_or(0.0).max(0.0) as u32;
                    let width = w.get(i + 2).and_then(|o| get_number(resolve(doc, o)));
                    if let Some(width) = width {
                        for code in start..=end.min(start.saturating_add(0xFFFF)) {
                            self.widths.insert(code, width);
                        }
                    }
                    i += 3;
                }
                None => break,
            }
        }
    }

    /// Split a shown string into character codes
    pub fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.two_byte {
            bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => u32::from(*hi) << 8 | u32::from(*lo),
                    [single] => u32::from(*single),
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|&b| u32::from(b)).collect()
        }
    }

    /// Unicode text of one character code
    pub fn decode(&self, code: u32) -> String {
        if let Some(text) = self.to_unicode.as_ref().and_then(|m| m.get(code)) {
            return text.to_string();
        }
        if let Some(text) = self
            .byte_map
            .as_ref()
            .and_then(|m| m.get(code as usize))
            .and_then(|t| t.as_ref())
        {
            return text.clone();
        }
        char::from_u32(code).map(String::from).unwrap_or_default()
    }

    /// Advance width of a code in 1/1000 text space units
    pub fn width(&self, code: u32, text: &str) -> f32 {
        if let Some(w) = self.widths.get(&code) {
            return *w;
        }
        match self.standard {
            Some(standard) => text
                .chars()
                .next()
                .map(|c| standard.width(c))
                .unwrap_or(HELVETICA_DEFAULT_WIDTH),
            None => self.missing_width,
        }
    }

    /// Word spacing applies to the single-byte code 32 only
    pub fn is_word_space(&self, code: u32) -> bool {
        !self.two_byte && code == 32
    }
}

/// Decode every single-byte code through lopdf's view of the font encoding
fn simple_byte_map(doc: &Document, dict: &Dictionary) -> Option<Vec<Option<String>>> {
    let encoding = dict.get_font_encoding(doc).ok()?;
    let map = (0u8..=255)
        .map(|b| {
            Document::decode_text(&encoding, &[b])
                .ok()
                .filter(|s| !s.is_empty())
        })
        .collect();
    Some(map)
}

/// Stream bytes with filters applied; falls back to a raw zlib inflate when
/// lopdf cannot decode the filter chain
fn stream_content(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.get(b"Filter").is_err() {
        return Some(stream.content.clone());
    }
    match stream.decompressed_content() {
        Ok(data) => Some(data),
        Err(_) => {
            let mut decoder = ZlibDecoder::new(stream.content.as_slice());
            let mut data = Vec::new();
            decoder.read_to_end(&mut data).ok()?;
            Some(data)
        }
    }
}

/// Follow one level of indirection
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Helper to get f32 from Object
pub(crate) fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// A parsed ToUnicode CMap (bfchar and bfrange sections)
#[derive(Debug, Default, Clone)]
pub struct ToUnicodeCMap {
    map: HashMap<u32, String>,
}

enum CMapToken {
    Hex(Vec<u8>),
    Array(Vec<Vec<u8>>),
}

impl ToUnicodeCMap {
    /// Parse decompressed CMap content; `None` when it holds no mappings
    pub fn parse(content: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(content);
        let mut cmap = ToUnicodeCMap::default();

        for section in sections(&text, "beginbfchar", "endbfchar") {
            let tokens = tokenize(section);
            for pair in tokens.chunks(2) {
                if let [CMapToken::Hex(src), CMapToken::Hex(dst)] = pair {
                    cmap.map.insert(code_value(src), utf16_string(dst));
                }
            }
        }

        for section in sections(&text, "beginbfrange", "endbfrange") {
            let tokens = tokenize(section);
            for triple in tokens.chunks(3) {
                let [CMapToken::Hex(lo), CMapToken::Hex(hi), dst] = triple else {
                    continue;
                };
                let (lo, hi) = (code_value(lo), code_value(hi));
                if hi < lo || hi - lo > 0xFFFF {
                    continue;
                }
                match dst {
                    CMapToken::Hex(base) => {
                        for (offset, code) in (lo..=hi).enumerate() {
                            cmap.map.insert(code, offset_utf16(base, offset as u32));
                        }
                    }
                    CMapToken::Array(items) => {
                        for (code, item) in (lo..=hi).zip(items.iter()) {
                            cmap.map.insert(code, utf16_string(item));
                        }
                    }
                }
            }
        }

        if cmap.map.is_empty() {
            None
        } else {
            Some(cmap)
        }
    }

    pub fn get(&self, code: u32) -> Option<&str> {
        self.map.get(&code).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn sections<'a>(text: &'a str, begin: &str, end: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(start) = text[pos..].find(begin) {
        let section_start = pos + start + begin.len();
        match text[section_start..].find(end) {
            Some(len) => {
                found.push(&text[section_start..section_start + len]);
                pos = section_start + len + end.len();
            }
            None => break,
        }
    }
    found
}

fn tokenize(section: &str) -> Vec<CMapToken> {
    let mut tokens = Vec::new();
    let mut array: Option<Vec<Vec<u8>>> = None;
    let mut chars = section.chars();

    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let hex: String = chars.by_ref().take_while(|&c| c != '>').collect();
                let bytes = hex_bytes(&hex);
                match array.as_mut() {
                    Some(items) => items.push(bytes),
                    None => tokens.push(CMapToken::Hex(bytes)),
                }
            }
            '[' => array = Some(Vec::new()),
            ']' => {
                if let Some(items) = array.take() {
                    tokens.push(CMapToken::Array(items));
                }
            }
            _ => {}
        }
    }

    tokens
}

fn hex_bytes(hex: &str) -> Vec<u8> {
    let mut digits: Vec<u8> = hex
        .chars()
        .filter_map(|c| c.to_digit(16))
        .map(|d| d as u8)
        .collect();
    if digits.len() % 2 == 1 {
        digits.push(0);
    }
    digits.chunks(2).map(|p| p[0] << 4 | p[1]).collect()
}

fn code_value(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc << 8 | u32::from(b))
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => u16::from(*single),
            _ => 0,
        })
        .collect()
}

fn utf16_string(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&utf16_units(bytes))
}

fn offset_utf16(base: &[u8], offset: u32) -> String {
    let mut units = utf16_units(base);
    if let Some(last) = units.last_mut() {
        *last = last.wrapping_add(offset as u16);
    }
    String::from_utf16_lossy(&units)
}

/// Encode text for a WinAnsiEncoding font; unmappable characters become `?`
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => match c {
                '€' => 0x80,
                '‚' => 0x82,
                'ƒ' => 0x83,
                '„' => 0x84,
                '…' => 0x85,
                '†' => 0x86,
                '‡' => 0x87,
                'ˆ' => 0x88,
                '‰' => 0x89,
                'Š' => 0x8A,
                '‹' => 0x8B,
                'Œ' => 0x8C,
                'Ž' => 0x8E,
                '\u{2018}' => 0x91,
                '\u{2019}' => 0x92,
                '\u{201C}' => 0x93,
                '\u{201D}' => 0x94,
                '•' => 0x95,
                '–' => 0x96,
                '—' => 0x97,
                '˜' => 0x98,
                '™' => 0x99,
                'š' => 0x9A,
                '›' => 0x9B,
                'œ' => 0x9C,
                'ž' => 0x9E,
                'Ÿ' => 0x9F,
                _ => b'?',
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helvetica_widths() {
        assert_eq!(StandardMetrics::Helvetica.width(' '), 278.0);
        assert_eq!(StandardMetrics::Helvetica.width('A'), 667.0);
        assert_eq!(StandardMetrics::Helvetica.width('~'), 584.0);
        assert_eq!(StandardMetrics::Helvetica.width('Ó'), 556.0);
        assert_eq!(StandardMetrics::Courier.width('W'), 600.0);
        // "II" = 2 * 278 at 10pt
        let w = StandardMetrics::Helvetica.text_width("II", 10.0);
        assert!((w - 5.56).abs() < 0.001);
    }

    #[test]
    fn test_parse_bfchar_and_bfrange() {
        let content = b"/CIDInit /ProcSet findresource begin
2 beginbfchar
<0003> <0020>
<0024> <0041>
endbfchar
2 beginbfrange
<0044> <0046> <0061>
<0050> <0051> [<00F3> <00D3>]
endbfrange
end";
        let cmap = ToUnicodeCMap::parse(content).expect("cmap");
        assert_eq!(cmap.get(0x03), Some(" "));
        assert_eq!(cmap.get(0x24), Some("A"));
        assert_eq!(cmap.get(0x44), Some("a"));
        assert_eq!(cmap.get(0x46), Some("c"));
        assert_eq!(cmap.get(0x50), Some("ó"));
        assert_eq!(cmap.get(0x51), Some("Ó"));
        assert_eq!(cmap.len(), 7);
    }

    #[test]
    fn test_parse_empty_cmap() {
        assert!(ToUnicodeCMap::parse(b"begincmap endcmap").is_none());
    }

    #[test]
    fn test_encode_win_ansi() {
        assert_eq!(encode_win_ansi("Código"), vec![b'C', 0xF3, b'd', b'i', b'g', b'o']);
        assert_eq!(encode_win_ansi("a–b"), vec![b'a', 0x96, b'b']);
        assert_eq!(encode_win_ansi("漢"), vec![b'?']);
    }

    #[test]
    fn test_two_byte_codes() {
        let metrics = FontMetrics {
            two_byte: true,
            ..FontMetrics::default()
        };
        assert_eq!(metrics.codes(&[0x00, 0x24, 0x01, 0x02]), vec![0x24, 0x0102]);
        assert!(!metrics.is_word_space(32));
    }

    #[test]
    fn test_default_metrics_decode_latin1() {
        let metrics = FontMetrics::default();
        assert_eq!(metrics.decode(0x41), "A");
        assert_eq!(metrics.decode(0xF3), "ó");
        assert_eq!(metrics.width(0x41, "A"), 667.0);
        assert!(metrics.is_word_space(32));
    }
}
