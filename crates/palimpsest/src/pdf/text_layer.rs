//! hOCR to PDF text layer.
//!
//! Each recognized word becomes an invisible (`3 Tr`) text run whose origin sits on the word's
//! baseline and whose horizontal scaling stretches it over the recognized box, so selecting or
//! searching text in a viewer highlights the right region of the scan.
//!
//! Raster coordinates have their origin at the top-left of the page *as displayed*, i.e. after
//! `/Rotate` is applied. PDF user space has its origin at the bottom-left of the unrotated media
//! box. [`RasterTransform`] maps between the two.

use crate::ocr::hocr::{BBox, HocrPage, TextElement};
use crate::types::{PageGeometry, Rotation, TextLayer};
use crate::{PalimpsestError, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Object, StringFormat};

/// PDF user space units per inch.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Advance width of every glyph of the text layer font, in thousandths of an em.
pub const GLYPH_ADVANCE: f64 = 500.0;

/// Resource name of the text layer font.
pub const TEXT_FONT_RESOURCE: &str = "FPalimpsestText";

const MIN_FONT_SIZE: f64 = 0.5;

/// Maps raster pixels of the displayed page to PDF user space and back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterTransform {
    geometry: PageGeometry,
    /// Pixels per point, horizontally and vertically.
    scale_x: f64,
    scale_y: f64,
}

impl RasterTransform {
    /// Transform for a raster rendered at `dpi` in both directions.
    pub fn new(geometry: PageGeometry, dpi: f64) -> Self {
        Self::with_dpi(geometry, dpi, dpi)
    }

    pub fn with_dpi(geometry: PageGeometry, dpi_x: f64, dpi_y: f64) -> Self {
        Self {
            geometry,
            scale_x: dpi_x / POINTS_PER_INCH,
            scale_y: dpi_y / POINTS_PER_INCH,
        }
    }

    /// Derive the resolution from the size the engine reports for the page, falling back to
    /// `dpi` when the engine does not report one.
    pub fn for_page(geometry: PageGeometry, page_bbox: Option<BBox>, dpi: f64) -> Self {
        let (width_pt, height_pt) = geometry.displayed_size();
        match page_bbox {
            Some(bbox) if !bbox.is_empty() && width_pt > 0.0 && height_pt > 0.0 => Self::with_dpi(
                geometry,
                bbox.width() / width_pt * POINTS_PER_INCH,
                bbox.height() / height_pt * POINTS_PER_INCH,
            ),
            _ => Self::new(geometry, dpi),
        }
    }

    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    /// Raster point (pixels, top-left origin) to user space (points, bottom-left origin).
    pub fn to_user(&self, x_px: f64, y_px: f64) -> (f64, f64) {
        let (_, displayed_height) = self.geometry.displayed_size();
        let dx = x_px / self.scale_x;
        let dy = displayed_height - y_px / self.scale_y;
        let (w, h) = (self.geometry.width_pt, self.geometry.height_pt);

        match self.geometry.rotation {
            Rotation::Deg0 => (dx, dy),
            Rotation::Deg90 => (w - dy, dx),
            Rotation::Deg180 => (w - dx, h - dy),
            Rotation::Deg270 => (dy, h - dx),
        }
    }

    /// User space point back to raster pixels. Inverse of [`to_user`](Self::to_user).
    pub fn to_raster(&self, u: f64, v: f64) -> (f64, f64) {
        let (_, displayed_height) = self.geometry.displayed_size();
        let (w, h) = (self.geometry.width_pt, self.geometry.height_pt);

        let (dx, dy) = match self.geometry.rotation {
            Rotation::Deg0 => (u, v),
            Rotation::Deg90 => (v, w - u),
            Rotation::Deg180 => (w - u, h - v),
            Rotation::Deg270 => (h - v, u),
        };

        (dx * self.scale_x, (displayed_height - dy) * self.scale_y)
    }

    /// Counter-clockwise angle of displayed horizontal text in user space, in degrees.
    pub fn text_angle(&self) -> f64 {
        self.geometry.rotation.degrees() as f64
    }
}

/// Placement of one invisible word.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRun {
    pub text: String,
    pub font_size: f64,
    /// Horizontal scaling in percent (`Tz`).
    pub horizontal_scale: f64,
    /// Text matrix `[a b c d e f]` (`Tm`).
    pub matrix: [f64; 6],
}

/// Compute where a word goes. Returns `None` for words that cannot be placed.
pub fn place(element: &TextElement, transform: &RasterTransform) -> Option<GlyphRun> {
    let glyphs = element.text.chars().count();
    if glyphs == 0 || element.bbox.is_empty() {
        return None;
    }

    let line_height_px = element
        .line_height
        .filter(|h| *h > 0.0)
        .unwrap_or_else(|| element.line_bbox.height().max(element.bbox.height()));
    let font_size = (line_height_px / transform.scale_y).max(MIN_FONT_SIZE);

    let slope = element.baseline.slope;
    let baseline_y = element.line_bbox.y1 + element.baseline.offset + slope * (element.bbox.x0 - element.line_bbox.x0);
    let (origin_u, origin_v) = transform.to_user(element.bbox.x0, baseline_y);

    let box_width_pt = element.bbox.width() / transform.scale_x * (1.0 + slope * slope).sqrt();
    let natural_width = glyphs as f64 * GLYPH_ADVANCE / 1000.0 * font_size;
    let horizontal_scale = 100.0 * box_width_pt / natural_width;

    let angle = (transform.text_angle() - slope.atan().to_degrees()).to_radians();
    let (sin, cos) = angle.sin_cos();

    Some(GlyphRun {
        text: element.text.clone(),
        font_size,
        horizontal_scale,
        matrix: [cos, sin, -sin, cos, origin_u, origin_v],
    })
}

/// Build the invisible text layer for a recognized page.
pub fn synthesize(page: &HocrPage, transform: &RasterTransform) -> Result<TextLayer> {
    let runs: Vec<GlyphRun> = page.elements().filter_map(|e| place(&e, transform)).collect();
    if runs.is_empty() {
        return Ok(TextLayer::default());
    }

    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new("Tr", vec![Object::Integer(3)]),
    ];

    for run in &runs {
        operations.push(Operation::new(
            "Tf",
            vec![Object::Name(TEXT_FONT_RESOURCE.as_bytes().to_vec()), real(run.font_size)],
        ));
        operations.push(Operation::new("Tz", vec![real(run.horizontal_scale)]));
        operations.push(Operation::new("Tm", run.matrix.iter().map(|v| real(*v)).collect()));
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(encode_text(&run.text), StringFormat::Hexadecimal)],
        ));
    }

    operations.push(Operation::new("ET", vec![]));
    operations.push(Operation::new("Q", vec![]));

    let content = Content { operations }
        .encode()
        .map_err(|e| PalimpsestError::engine(format!("Failed to encode text layer: {}", e)))?;

    Ok(TextLayer {
        content,
        word_count: runs.len(),
    })
}

/// Two-byte codes for the Identity-H text font. Characters outside the basic multilingual
/// plane are replaced by U+FFFD.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .flat_map(|c| {
            let code = u16::try_from(u32::from(c)).unwrap_or(0xFFFD);
            code.to_be_bytes()
        })
        .collect()
}

pub(crate) fn real(value: f64) -> Object {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    Object::Real((rounded as f32).into())
}
