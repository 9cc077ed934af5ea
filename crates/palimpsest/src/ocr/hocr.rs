//! hOCR parsing.
//!
//! Recognition engines report their results as hOCR: XHTML where `ocr_line` and `ocrx_word`
//! elements carry geometry in their `title` attribute, e.g.
//! `title="bbox 36 92 618 184; baseline 0.015 -18; x_size 31"`.
//!
//! Only the parts the text layer needs are kept: lines with their bbox, baseline and x-height,
//! and words with their bbox, text and confidence.

use crate::{PalimpsestError, Result};

/// Axis-aligned box in raster pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// Text baseline relative to the bottom-left corner of the line box.
///
/// `y = slope * (x - line.x0) + line.y1 + offset`, in raster pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Baseline {
    pub slope: f64,
    pub offset: f64,
}

/// One recognized word with the geometry of its line.
#[derive(Debug, Clone, PartialEq)]
pub struct TextElement {
    pub text: String,
    pub bbox: BBox,
    pub line_bbox: BBox,
    pub baseline: Baseline,
    /// Line height hint (`x_size`) when reported.
    pub line_height: Option<f64>,
    /// Engine confidence in percent.
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
struct HocrWord {
    text: String,
    bbox: BBox,
    confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
struct HocrLine {
    bbox: BBox,
    baseline: Baseline,
    x_size: Option<f64>,
    words: Vec<HocrWord>,
}

/// Parsed hOCR for a single page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HocrPage {
    page_bbox: Option<BBox>,
    lines: Vec<HocrLine>,
}

const LINE_CLASSES: &[&str] = &["ocr_line", "ocr_caption", "ocr_header", "ocr_textfloat"];

impl HocrPage {
    /// Parse an hOCR document. Only the first `ocr_page` is read.
    pub fn parse(hocr: &str) -> Result<Self> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(hocr, options)
            .map_err(|e| PalimpsestError::engine_with_source("Engine produced invalid hOCR", e))?;

        let mut page = HocrPage::default();

        let Some(page_node) = doc.descendants().find(|n| has_class(n, "ocr_page")) else {
            return Ok(page);
        };
        page.page_bbox = page_node.attribute("title").and_then(|t| parse_title(t).bbox);

        for node in page_node.descendants() {
            if LINE_CLASSES.iter().any(|c| has_class(&node, c)) {
                let props = node.attribute("title").map(parse_title).unwrap_or_default();
                let words: Vec<HocrWord> = node
                    .descendants()
                    .filter(|n| has_class(n, "ocrx_word"))
                    .filter_map(parse_word)
                    .collect();

                let bbox = props.bbox.unwrap_or_else(|| union(words.iter().map(|w| w.bbox)));
                if !words.is_empty() {
                    page.lines.push(HocrLine {
                        bbox,
                        baseline: props.baseline.unwrap_or_default(),
                        x_size: props.x_size,
                        words,
                    });
                }
            } else if has_class(&node, "ocrx_word") && !node.ancestors().any(|a| LINE_CLASSES.iter().any(|c| has_class(&a, c))) {
                // Words outside any line become single-word lines.
                if let Some(word) = parse_word(node) {
                    page.lines.push(HocrLine {
                        bbox: word.bbox,
                        baseline: Baseline::default(),
                        x_size: None,
                        words: vec![word],
                    });
                }
            }
        }

        Ok(page)
    }

    /// Size of the recognized raster as reported by the engine.
    pub fn page_bbox(&self) -> Option<BBox> {
        self.page_bbox
    }

    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|l| l.words.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Words in reading order, each carrying its line geometry.
    pub fn elements(&self) -> impl Iterator<Item = TextElement> + '_ {
        self.lines.iter().flat_map(|line| {
            line.words.iter().map(move |word| TextElement {
                text: word.text.clone(),
                bbox: word.bbox,
                line_bbox: line.bbox,
                baseline: line.baseline,
                line_height: line.x_size,
                confidence: word.confidence,
            })
        })
    }

    /// Plain text: words joined by spaces, one line per hOCR line.
    pub fn plain_text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            let words: Vec<&str> = line.words.iter().map(|w| w.text.as_str()).collect();
            text.push_str(&words.join(" "));
            text.push('\n');
        }
        text
    }
}

fn has_class(node: &roxmltree::Node<'_, '_>, class: &str) -> bool {
    node.is_element()
        && node
            .attribute("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
}

fn parse_word(node: roxmltree::Node<'_, '_>) -> Option<HocrWord> {
    let props = parse_title(node.attribute("title")?);
    let bbox = props.bbox?;
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string();

    if text.is_empty() || bbox.is_empty() {
        return None;
    }

    Some(HocrWord {
        text,
        bbox,
        confidence: props.confidence,
    })
}

fn union(boxes: impl Iterator<Item = BBox>) -> BBox {
    boxes
        .reduce(|a, b| BBox::new(a.x0.min(b.x0), a.y0.min(b.y0), a.x1.max(b.x1), a.y1.max(b.y1)))
        .unwrap_or_default()
}

#[derive(Debug, Default, PartialEq)]
struct TitleProps {
    bbox: Option<BBox>,
    baseline: Option<Baseline>,
    x_size: Option<f64>,
    confidence: Option<f32>,
}

/// Parse the `key v1 v2 ...; key ...` property list of an hOCR `title` attribute.
fn parse_title(title: &str) -> TitleProps {
    let mut props = TitleProps::default();

    for property in title.split(';') {
        let mut parts = property.split_whitespace();
        let Some(key) = parts.next() else {
            continue;
        };
        let values: Vec<f64> = parts.filter_map(|v| v.parse::<f64>().ok()).collect();

        match (key, values.as_slice()) {
            ("bbox", [x0, y0, x1, y1]) => props.bbox = Some(BBox::new(*x0, *y0, *x1, *y1)),
            ("baseline", [slope, offset]) => {
                props.baseline = Some(Baseline {
                    slope: *slope,
                    offset: *offset,
                })
            }
            ("x_size", [size]) => props.x_size = Some(*size),
            ("x_wconf", [conf]) => props.confidence = Some(*conf as f32),
            _ => {}
        }
    }

    props
}
