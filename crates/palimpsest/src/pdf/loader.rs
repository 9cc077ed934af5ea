//! Opening inputs and analysing their pages.
//!
//! A document is either a PDF or an ordered set of page images. Loading validates the input
//! once, up front; per-page analysis (size, rotation, existing text) runs in parallel over the
//! parsed document, which is only read.

use crate::core::config::RenderConfig;
use crate::pdf::error::PdfError;
use crate::types::{OcrPolicy, PageGeometry, PageSource, PageUnit, Rotation};
use crate::{PalimpsestError, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// US Letter, used when a page has no usable media box.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

/// Maximum depth of `/Parent` links followed for inherited page attributes.
const MAX_INHERITANCE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputKind {
    Pdf { path: PathBuf },
    Images { paths: Vec<PathBuf> },
}

/// Result of analysing one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub source: PageSource,
    pub geometry: PageGeometry,
    pub has_text: bool,
    pub has_ocr_text: bool,
}

/// A validated input document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDocument {
    pub kind: InputKind,
    pub pages: Vec<PageInfo>,
}

impl InputDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self.kind, InputKind::Pdf { .. })
    }

    /// One immutable work unit per page, in page order.
    pub fn page_units(&self, policy: Option<OcrPolicy>) -> Vec<PageUnit> {
        self.pages
            .iter()
            .enumerate()
            .map(|(index, page)| PageUnit {
                index,
                source: page.source.clone(),
                geometry: page.geometry,
                has_existing_text: page.has_text,
                has_existing_ocr_text: page.has_ocr_text,
                policy,
            })
            .collect()
    }
}

/// Opens an input and describes its pages.
pub trait DocumentLoader: Send + Sync {
    /// Load `input`. Unreadable or unusable inputs are [`PalimpsestError::Input`].
    fn load(&self, input: &Path) -> Result<InputDocument>;
}

/// Loads PDFs with `lopdf`.
#[derive(Debug, Clone, Default)]
pub struct LopdfLoader;

impl LopdfLoader {
    pub fn open(path: &Path) -> Result<Document> {
        let doc = Document::load(path).map_err(|e| {
            PalimpsestError::input_with_source(format!("Cannot open PDF {}", path.display()), PdfError::from(e))
        })?;

        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(PalimpsestError::input_with_source(
                format!("Cannot process {}", path.display()),
                PdfError::Encrypted,
            ));
        }

        Ok(doc)
    }
}

impl DocumentLoader for LopdfLoader {
    fn load(&self, input: &Path) -> Result<InputDocument> {
        let doc = Self::open(input)?;
        let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();

        if pages.is_empty() {
            return Err(PalimpsestError::input_with_source(
                format!("Cannot process {}", input.display()),
                PdfError::NoPages,
            ));
        }

        let analysed: Vec<PageInfo> = pages
            .par_iter()
            .map(|(number, id)| analyse_page(&doc, input, *number, *id))
            .collect();

        let with_text = analysed.iter().filter(|p| p.has_text).count();
        tracing::debug!(path = %input.display(), pages = analysed.len(), with_text, "Analysed PDF pages");

        Ok(InputDocument {
            kind: InputKind::Pdf {
                path: input.to_path_buf(),
            },
            pages: analysed,
        })
    }
}

/// Loads page images. A directory contributes its images in file name order.
#[derive(Debug, Clone)]
pub struct ImageSetLoader {
    dpi: f64,
}

impl ImageSetLoader {
    pub fn new(dpi: f64) -> Self {
        Self { dpi }
    }

    fn collect(input: &Path) -> Result<Vec<PathBuf>> {
        if !input.is_dir() {
            return Ok(vec![input.to_path_buf()]);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(input)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image_path(p))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl DocumentLoader for ImageSetLoader {
    fn load(&self, input: &Path) -> Result<InputDocument> {
        let paths = Self::collect(input)?;
        if paths.is_empty() {
            return Err(PalimpsestError::input(format!("No page images found in {}", input.display())));
        }

        let pages = paths
            .par_iter()
            .map(|path| {
                let (width, height) = image::image_dimensions(path).map_err(|e| {
                    PalimpsestError::input_with_source(format!("Cannot read image {}", path.display()), e)
                })?;
                Ok(PageInfo {
                    source: PageSource::Image {
                        path: path.clone(),
                        dpi: self.dpi,
                    },
                    geometry: PageGeometry::new(
                        f64::from(width) * 72.0 / self.dpi,
                        f64::from(height) * 72.0 / self.dpi,
                        Rotation::Deg0,
                    ),
                    has_text: false,
                    has_ocr_text: false,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InputDocument {
            kind: InputKind::Images { paths },
            pages,
        })
    }
}

/// Picks the PDF or image loader from the input itself.
#[derive(Debug, Clone)]
pub struct AutoLoader {
    images: ImageSetLoader,
}

impl AutoLoader {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            images: ImageSetLoader::new(config.image_dpi),
        }
    }
}

impl DocumentLoader for AutoLoader {
    fn load(&self, input: &Path) -> Result<InputDocument> {
        if !input.exists() {
            return Err(PalimpsestError::input(format!("Input {} does not exist", input.display())));
        }

        if input.is_dir() || is_image_path(input) {
            self.images.load(input)
        } else {
            LopdfLoader.load(input)
        }
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn analyse_page(doc: &Document, path: &Path, number: u32, id: ObjectId) -> PageInfo {
    let media_box = inherited(doc, id, b"MediaBox")
        .and_then(|obj| rectangle(doc, obj))
        .unwrap_or(DEFAULT_MEDIA_BOX);
    let rotation = inherited(doc, id, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .map(Rotation::from_degrees)
        .unwrap_or_default();

    let (has_visible, has_invisible) = match scan_page_text(doc, id) {
        Ok(text) => (text.visible, text.invisible),
        Err(e) => {
            tracing::warn!(page = number, error = %e, "Cannot read page content, treating page as image-only");
            (false, false)
        }
    };

    PageInfo {
        source: PageSource::PdfPage {
            path: path.to_path_buf(),
            page_number: number,
        },
        geometry: PageGeometry::new(
            (media_box[2] - media_box[0]).abs(),
            (media_box[3] - media_box[1]).abs(),
            rotation,
        ),
        has_text: has_visible || has_invisible,
        has_ocr_text: has_invisible,
    }
}

/// Look up a page attribute, following `/Parent` for inheritable keys.
fn inherited<'a>(doc: &'a Document, page: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page).ok()?;

    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(resolve(doc, value));
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }

    None
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

fn rectangle(doc: &Document, object: &Object) -> Option<[f64; 4]> {
    let values: Vec<f64> = object
        .as_array()
        .ok()?
        .iter()
        .filter_map(|o| number(resolve(doc, o)))
        .collect();
    match values.as_slice() {
        [x0, y0, x1, y1] if (x1 - x0).abs() > 0.0 && (y1 - y0).abs() > 0.0 => Some([*x0, *y0, *x1, *y1]),
        _ => None,
    }
}

/// Text operators found on a page, including those inside the Form XObjects it draws.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageText {
    pub visible: bool,
    /// Shown with render mode 3, the mode OCR text layers use.
    pub invisible: bool,
    /// Form XObjects reached from the page, each listed once.
    pub forms: Vec<ObjectId>,
}

struct TextScan<'a> {
    doc: Option<&'a Document>,
    visited: HashSet<ObjectId>,
    text: PageText,
}

impl<'a> TextScan<'a> {
    fn new(doc: Option<&'a Document>) -> Self {
        Self {
            doc,
            visited: HashSet::new(),
            text: PageText::default(),
        }
    }

    fn walk(&mut self, operations: &[Operation], resources: Option<&'a Dictionary>, initial_mode: i64) {
        let mut render_mode = initial_mode;
        let mut saved_modes: Vec<i64> = Vec::new();

        for op in operations {
            match op.operator.as_str() {
                "q" => saved_modes.push(render_mode),
                "Q" => render_mode = saved_modes.pop().unwrap_or(initial_mode),
                "Tr" => {
                    if let Some(mode) = op.operands.first().and_then(|o| o.as_i64().ok()) {
                        render_mode = mode;
                    }
                }
                "Tj" | "TJ" | "'" | "\"" => {
                    if render_mode == 3 {
                        self.text.invisible = true;
                    } else {
                        self.text.visible = true;
                    }
                }
                "Do" => self.enter_form(op, resources, render_mode),
                _ => {}
            }
        }
    }

    fn enter_form(&mut self, op: &Operation, resources: Option<&'a Dictionary>, render_mode: i64) {
        let (Some(doc), Some(resources)) = (self.doc, resources) else {
            return;
        };
        let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
            return;
        };
        let Some(id) = resources
            .get(b"XObject")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
            .and_then(|xobjects| xobjects.get(name).ok())
            .and_then(|o| o.as_reference().ok())
        else {
            return;
        };
        if !self.visited.insert(id) {
            return;
        }

        let Ok(stream) = doc.get_object(id).and_then(|o| o.as_stream()) else {
            return;
        };
        if !stream.dict.get(b"Subtype").and_then(|o| o.as_name()).is_ok_and(|s| s == b"Form") {
            return;
        }
        let Some(content) = stream_content(stream).and_then(|bytes| Content::decode(&bytes).ok()) else {
            tracing::debug!(form = ?id, "Cannot decode Form XObject content");
            return;
        };

        self.text.forms.push(id);
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
            .or(Some(resources));
        self.walk(&content.operations, form_resources, render_mode);
    }
}

/// Decoded bytes of a stream, whether or not it is filtered.
pub(crate) fn stream_content(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.has(b"Filter") {
        stream.decompressed_content().ok()
    } else {
        Some(stream.content.clone())
    }
}

/// Scan a content stream for text-showing operators.
///
/// Returns `(visible, invisible)` where invisible means shown with render mode 3. Form XObjects
/// are not followed; see [`scan_page_text`].
pub fn scan_text(content: &[u8]) -> (bool, bool) {
    let Ok(content) = Content::decode(content) else {
        return (false, false);
    };
    let mut scan = TextScan::new(None);
    scan.walk(&content.operations, None, 0);
    (scan.text.visible, scan.text.invisible)
}

/// Scan a page's content and, recursively, every Form XObject it draws.
pub fn scan_page_text(doc: &Document, page: ObjectId) -> Result<PageText> {
    let bytes = doc.get_page_content(page).map_err(PdfError::from)?;
    let content = Content::decode(&bytes).map_err(PdfError::from)?;
    let resources = inherited(doc, page, b"Resources").and_then(|o| o.as_dict().ok());

    let mut scan = TextScan::new(Some(doc));
    scan.walk(&content.operations, resources, 0);
    Ok(scan.text)
}

/// Remove text shown in render mode 3 from a content stream.
///
/// Only the show operators themselves go; text state, positioning and every other operator
/// stay, so visible text in the same text object is untouched. `'` and `"` keep their line
/// advance. Returns `None` when the stream cannot be decoded.
pub fn strip_invisible_text(content: &[u8]) -> Option<Vec<u8>> {
    let decoded = Content::decode(content).ok()?;
    let mut kept = Vec::with_capacity(decoded.operations.len());
    let mut render_mode = 0i64;
    let mut saved_modes: Vec<i64> = Vec::new();

    for op in decoded.operations {
        match op.operator.as_str() {
            "q" => saved_modes.push(render_mode),
            "Q" => render_mode = saved_modes.pop().unwrap_or(0),
            "Tr" => {
                if let Some(mode) = op.operands.first().and_then(|o| o.as_i64().ok()) {
                    render_mode = mode;
                }
            }
            "Tj" | "TJ" if render_mode == 3 => continue,
            "'" if render_mode == 3 => {
                kept.push(Operation::new("T*", vec![]));
                continue;
            }
            "\"" if render_mode == 3 => {
                // aw ac string " sets word and character spacing before the line advance.
                let mut operands = op.operands.into_iter();
                if let (Some(word_spacing), Some(char_spacing)) = (operands.next(), operands.next()) {
                    kept.push(Operation::new("Tw", vec![word_spacing]));
                    kept.push(Operation::new("Tc", vec![char_spacing]));
                }
                kept.push(Operation::new("T*", vec![]));
                continue;
            }
            _ => {}
        }
        kept.push(op);
    }

    Content { operations: kept }.encode().ok()
}

/// Page dictionary lookup shared with the assembler.
pub(crate) fn page_dictionary(doc: &Document, page: ObjectId) -> Result<&Dictionary> {
    doc.get_dictionary(page)
        .map_err(|e| PalimpsestError::input_with_source("Page object is not a dictionary", PdfError::from(e)))
}
