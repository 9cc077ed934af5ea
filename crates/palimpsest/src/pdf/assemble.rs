//! Output document assembly.
//!
//! The assembler turns the input document and the ordered page results into one candidate PDF.
//! Each compliance attempt uses a [`GenerationPass`]; later passes are more conservative.

use crate::pdf::error::PdfError;
use crate::pdf::loader::{
    InputDocument, InputKind, LopdfLoader, page_dictionary, scan_page_text, scan_text, stream_content,
    strip_invisible_text,
};
use crate::pdf::text_layer::{GLYPH_ADVANCE, TEXT_FONT_RESOURCE, real};
use crate::types::{ComplianceProfile, CompressionChoice, PageGeometry, PageMode, PageResult, PageState, Rotation};
use crate::{PalimpsestError, Result};
use image::{DynamicImage, GenericImageView, GrayImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Resource name of the page raster on rasterized pages.
const PAGE_IMAGE_RESOURCE: &str = "ImPalimpsestPage";

const JPEG_QUALITY: u8 = 85;

/// XMP namespace of the PDF/A identification schema.
const PDFAID_NS: &str = "http://www.aiim.org/pdfa/ns/id/";

/// Maximum entries per `beginbfrange` section of a CMap.
const CMAP_SECTION: usize = 100;

/// Settings for one candidate generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPass {
    /// Zero for the first candidate, incremented for each corrective pass.
    pub attempt: u32,
    /// Remove JavaScript, open actions and additional actions.
    pub strip_active_content: bool,
    /// Remove page transparency groups.
    pub drop_transparency: bool,
    /// Remove annotations from every page.
    pub drop_annotations: bool,
}

impl GenerationPass {
    /// The pass used for `attempt`. Each corrective pass keeps the previous pass's settings and
    /// enables one more.
    pub fn for_attempt(attempt: u32) -> Self {
        Self {
            attempt,
            strip_active_content: attempt >= 1,
            drop_transparency: attempt >= 2,
            drop_annotations: attempt >= 3,
        }
    }

    pub fn is_conservative(&self) -> bool {
        self.attempt > 0
    }
}

/// Writes candidate output documents.
pub trait OutputAssembler: Send + Sync {
    /// Write a candidate for `pages` (ascending index order, one per page of `document`) to
    /// `candidate`.
    fn assemble(
        &self,
        document: &InputDocument,
        pages: &[PageResult],
        pass: &GenerationPass,
        profile: ComplianceProfile,
        candidate: &Path,
    ) -> Result<()>;
}

/// Assembler built on `lopdf`.
#[derive(Debug, Clone, Default)]
pub struct LopdfAssembler;

impl OutputAssembler for LopdfAssembler {
    fn assemble(
        &self,
        document: &InputDocument,
        pages: &[PageResult],
        pass: &GenerationPass,
        profile: ComplianceProfile,
        candidate: &Path,
    ) -> Result<()> {
        if pages.len() != document.page_count() {
            return Err(PalimpsestError::Other(format!(
                "Cannot assemble {} page results into a {}-page document",
                pages.len(),
                document.page_count()
            )));
        }

        let mut doc = match &document.kind {
            InputKind::Pdf { path } => overlay_pdf(path, document, pages)?,
            InputKind::Images { .. } => build_from_images(document, pages)?,
        };

        apply_pass(&mut doc, pass, profile)?;
        doc.prune_objects();
        doc.save(candidate)
            .map_err(|e| PalimpsestError::Other(format!("Failed to write {}: {}", candidate.display(), e)))?;

        tracing::debug!(
            candidate = %candidate.display(),
            attempt = pass.attempt,
            %profile,
            "Assembled candidate document"
        );
        Ok(())
    }
}

fn overlay_pdf(path: &Path, document: &InputDocument, pages: &[PageResult]) -> Result<Document> {
    let mut doc = LopdfLoader::open(path)?;
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.len() != pages.len() {
        return Err(PdfError::AssemblyFailed(format!(
            "{} changed while processing: {} pages, expected {}",
            path.display(),
            page_ids.len(),
            pages.len()
        ))
        .into());
    }

    let font_id = add_text_font(&mut doc);

    for ((result, page_id), info) in pages.iter().zip(page_ids).zip(&document.pages) {
        if result.state == PageState::Failed {
            continue;
        }

        match result.mode {
            PageMode::Copy => {}
            PageMode::Ocr => {
                if let Some(layer) = result.text_layer.as_ref().filter(|l| !l.is_empty()) {
                    let origin = media_origin(&doc, page_id);
                    let original = doc.get_page_content(page_id).map_err(PdfError::from)?;
                    let layer = offset_layer(&layer.content, origin);
                    let content = [b"q\n".as_slice(), original.as_slice(), b"\nQ\n".as_slice(), layer.as_slice()].concat();
                    replace_content(&mut doc, page_id, content, Some(font_id), None)?;
                }
            }
            PageMode::RedoOcr => {
                strip_form_text(&mut doc, page_id);
                let original = doc.get_page_content(page_id).map_err(PdfError::from)?;
                let stripped = strip_invisible_text(&original).unwrap_or(original);
                let origin = media_origin(&doc, page_id);
                let mut content = [b"q\n".as_slice(), stripped.as_slice(), b"\nQ\n".as_slice()].concat();
                if let Some(layer) = result.text_layer.as_ref().filter(|l| !l.is_empty()) {
                    content.extend_from_slice(&offset_layer(&layer.content, origin));
                }
                replace_content(&mut doc, page_id, content, Some(font_id), None)?;
            }
            PageMode::Rasterize => {
                let image_path = result.page_image.as_deref().ok_or_else(|| {
                    PdfError::AssemblyFailed(format!("Page {} was rasterized but has no image", result.page_number()))
                })?;
                let image_id = doc.add_object(image_xobject(image_path, result.compression)?);
                let geometry = info.geometry;

                let mut content = draw_page_image(geometry);
                if let Some(layer) = result.text_layer.as_ref().filter(|l| !l.is_empty()) {
                    content.extend_from_slice(&layer.content);
                }

                set_media_box(&mut doc, page_id, geometry)?;
                replace_content(&mut doc, page_id, content, Some(font_id), Some(image_id))?;
            }
        }
    }

    Ok(doc)
}

/// Remove old OCR text from the Form XObjects a redo page draws.
fn strip_form_text(doc: &mut Document, page_id: ObjectId) {
    let forms = match scan_page_text(doc, page_id) {
        Ok(text) if text.invisible => text.forms,
        _ => return,
    };

    for id in forms {
        let Ok(stream) = doc.get_object_mut(id).and_then(|o| o.as_stream_mut()) else {
            continue;
        };
        let Some(content) = stream_content(stream).filter(|c| scan_text(c).1) else {
            continue;
        };
        if let Some(stripped) = strip_invisible_text(&content) {
            tracing::debug!(form = ?id, "Removed old OCR text from Form XObject");
            stream.set_plain_content(stripped);
        }
    }
}

fn build_from_images(document: &InputDocument, pages: &[PageResult]) -> Result<Document> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = add_text_font(&mut doc);
    let mut kids = Vec::with_capacity(pages.len());

    for (result, info) in pages.iter().zip(&document.pages) {
        let image_path = result.page_image.as_deref().unwrap_or_else(|| info.source.path());
        let image_id = doc.add_object(image_xobject(image_path, result.compression)?);
        let geometry = PageGeometry::new(info.geometry.width_pt, info.geometry.height_pt, Rotation::Deg0);

        let mut content = draw_page_image(geometry);
        if result.state != PageState::Failed
            && let Some(layer) = result.text_layer.as_ref().filter(|l| !l.is_empty())
        {
            content.extend_from_slice(&layer.content);
        }

        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), real(geometry.width_pt), real(geometry.height_pt)],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { TEXT_FONT_RESOURCE => font_id },
                "XObject" => dictionary! { PAGE_IMAGE_RESOURCE => image_id },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

/// Content that paints the page raster over the whole displayed page.
///
/// The raster shows the page as displayed, so the image matrix undoes `/Rotate`.
fn draw_page_image(geometry: PageGeometry) -> Vec<u8> {
    let (w, h) = (geometry.width_pt, geometry.height_pt);
    let (dw, dh) = geometry.displayed_size();
    let matrix = match geometry.rotation {
        Rotation::Deg0 => [dw, 0.0, 0.0, dh, 0.0, 0.0],
        Rotation::Deg90 => [0.0, dw, -dh, 0.0, w, 0.0],
        Rotation::Deg180 => [-dw, 0.0, 0.0, -dh, w, h],
        Rotation::Deg270 => [0.0, -dw, dh, 0.0, 0.0, h],
    };

    format!(
        "q\n{} cm\n/{} Do\nQ\n",
        matrix.iter().map(|v| format_number(*v)).collect::<Vec<_>>().join(" "),
        PAGE_IMAGE_RESOURCE
    )
    .into_bytes()
}

fn format_number(value: f64) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

/// Shift a text layer computed for a media box at the origin onto a media box that is not.
fn offset_layer(layer: &[u8], origin: (f64, f64)) -> Vec<u8> {
    if origin == (0.0, 0.0) {
        return layer.to_vec();
    }
    let prefix = format!("q\n1 0 0 1 {} {} cm\n", format_number(origin.0), format_number(origin.1));
    [prefix.as_bytes(), layer, b"Q\n".as_slice()].concat()
}

fn media_origin(doc: &Document, page_id: ObjectId) -> (f64, f64) {
    let mut current = doc.get_dictionary(page_id).ok();
    while let Some(dict) = current {
        if let Ok(Object::Array(values)) = dict.get(b"MediaBox").map(|o| resolve(doc, o)) {
            let numbers: Vec<f64> = values.iter().filter_map(|v| number(resolve(doc, v))).collect();
            if let [x0, y0, x1, y1] = numbers.as_slice() {
                return (x0.min(*x1), y0.min(*y1));
            }
            return (0.0, 0.0);
        }
        current = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .ok()
            .and_then(|id| doc.get_dictionary(id).ok());
    }
    (0.0, 0.0)
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

/// Effective resources of a page, inherited resources included, as an owned dictionary.
fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = doc.get_dictionary(page_id).ok();
    while let Some(dict) = current {
        if let Ok(resources) = dict.get(b"Resources") {
            return match resolve(doc, resources) {
                Object::Dictionary(d) => d.clone(),
                _ => Dictionary::new(),
            };
        }
        current = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .ok()
            .and_then(|id| doc.get_dictionary(id).ok());
    }
    Dictionary::new()
}

/// Owned copy of a resource category (`Font`, `XObject`), resolving references.
fn resource_category(doc: &Document, resources: &Dictionary, key: &[u8]) -> Dictionary {
    match resources.get(key).map(|o| resolve(doc, o)) {
        Ok(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    }
}

/// Replace a page's content stream and extend its resources.
///
/// Rasterized pages pass `image` and lose their previous resources along with their content.
fn replace_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
    font: Option<ObjectId>,
    image: Option<ObjectId>,
) -> Result<()> {
    let mut resources = if image.is_some() {
        Dictionary::new()
    } else {
        page_resources(doc, page_id)
    };

    if let Some(font_id) = font {
        let mut fonts = resource_category(doc, &resources, b"Font");
        fonts.set(TEXT_FONT_RESOURCE, font_id);
        resources.set("Font", fonts);
    }

    if let Some(image_id) = image {
        let mut xobjects = resource_category(doc, &resources, b"XObject");
        xobjects.set(PAGE_IMAGE_RESOURCE, image_id);
        resources.set("XObject", xobjects);
    }

    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(PdfError::from)?;
    page.set("Contents", content_id);
    page.set("Resources", resources);
    Ok(())
}

fn set_media_box(doc: &mut Document, page_id: ObjectId, geometry: PageGeometry) -> Result<()> {
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(PdfError::from)?;
    page.set(
        "MediaBox",
        vec![0.into(), 0.into(), real(geometry.width_pt), real(geometry.height_pt)],
    );
    page.remove(b"CropBox");
    page.set("Rotate", geometry.rotation.degrees() as i64);
    Ok(())
}

/// Encode a page raster as a JPEG image XObject.
/// Page raster as an image XObject, encoded according to the page's compression choice.
///
/// Bitonal rasters are stored losslessly at one bit per pixel whatever the choice; JBIG2 and
/// CCITT streams need external encoders, so Flate stands in for them. Other rasters are Flate
/// compressed unless the choice allows lossy output, in which case they are JPEG.
fn image_xobject(path: &Path, choice: CompressionChoice) -> Result<Stream> {
    let img = image::open(path)
        .map_err(|e| PalimpsestError::engine_with_source(format!("Cannot read page image {}", path.display()), e))?;
    let (width, height) = img.dimensions();
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
    };

    if !img.color().has_color() {
        let gray = img.to_luma8();
        if is_bitonal(&gray) {
            dict.set("ColorSpace", "DeviceGray");
            dict.set("BitsPerComponent", 1);
            return flate_stream(dict, pack_bilevel(&gray));
        }
    }

    let (color_space, encodable) = if img.color().has_color() {
        ("DeviceRGB", DynamicImage::ImageRgb8(img.to_rgb8()))
    } else {
        ("DeviceGray", DynamicImage::ImageLuma8(img.to_luma8()))
    };
    dict.set("ColorSpace", color_space);
    dict.set("BitsPerComponent", 8);

    if matches!(choice, CompressionChoice::Jbig2Lossy { .. }) {
        let mut bytes = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
        encodable.write_with_encoder(encoder)?;
        dict.set("Filter", "DCTDecode");
        return Ok(Stream::new(dict, bytes));
    }

    flate_stream(dict, encodable.into_bytes())
}

fn flate_stream(dict: Dictionary, samples: Vec<u8>) -> Result<Stream> {
    let mut stream = Stream::new(dict, samples);
    stream.compress().map_err(PdfError::from)?;
    Ok(stream)
}

fn is_bitonal(gray: &GrayImage) -> bool {
    gray.pixels().all(|p| p[0] == 0 || p[0] == u8::MAX)
}

/// Pack a bitonal raster at one bit per pixel, rows padded to a byte, 1 meaning white.
fn pack_bilevel(gray: &GrayImage) -> Vec<u8> {
    let (width, height) = gray.dimensions();
    let row_bytes = (width as usize).div_ceil(8);
    let mut packed = vec![0u8; row_bytes * height as usize];
    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel[0] == u8::MAX {
            packed[y as usize * row_bytes + x as usize / 8] |= 0x80 >> (x % 8);
        }
    }
    packed
}

/// Add the glyphless Identity-H font used by text layers.
fn add_text_font(doc: &mut Document) -> ObjectId {
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => "GlyphLessFont",
        "Flags" => 5,
        "FontBBox" => vec![0.into(), 0.into(), (GLYPH_ADVANCE as i64).into(), 1000.into()],
        "ItalicAngle" => 0,
        "Ascent" => 1000,
        "Descent" => 0,
        "CapHeight" => 1000,
        "StemV" => 80,
    });
    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => "GlyphLessFont",
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => GLYPH_ADVANCE as i64,
        "CIDToGIDMap" => "Identity",
    });
    let cmap_id = doc.add_object(Stream::new(dictionary! {}, identity_to_unicode_cmap().into_bytes()));

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "GlyphLessFont",
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        "ToUnicode" => cmap_id,
    })
}

/// ToUnicode CMap mapping every two-byte code to the same UTF-16 code unit.
fn identity_to_unicode_cmap() -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );

    // Surrogate codes never occur in text layers, so they are left unmapped.
    let ranges: Vec<u16> = (0u16..=0xFF).filter(|high| !(0xD8..=0xDF).contains(high)).collect();
    for section in ranges.chunks(CMAP_SECTION) {
        cmap.push_str(&format!("{} beginbfrange\n", section.len()));
        for high in section {
            let start = high << 8;
            cmap.push_str(&format!("<{:04X}> <{:04X}> <{:04X}>\n", start, start | 0xFF, start));
        }
        cmap.push_str("endbfrange\n");
    }

    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

fn apply_pass(doc: &mut Document, pass: &GenerationPass, profile: ComplianceProfile) -> Result<()> {
    doc.version = profile.pdf_version().to_string();
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(PdfError::from)?;
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

    if let Some(part) = profile.pdfa_part() {
        let metadata = Stream::new(
            dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
            xmp_packet(part).into_bytes(),
        );
        let metadata_id = doc.add_object(metadata);
        catalog_mut(doc, root_id)?.set("Metadata", metadata_id);
    }

    if pass.strip_active_content {
        let catalog = catalog_mut(doc, root_id)?;
        catalog.remove(b"OpenAction");
        catalog.remove(b"AA");
        let names_id = catalog.get(b"Names").and_then(Object::as_reference).ok();
        if let Ok(Object::Dictionary(names)) = catalog.get_mut(b"Names") {
            names.remove(b"JavaScript");
        }
        if let Some(id) = names_id
            && let Ok(names) = doc.get_object_mut(id).and_then(Object::as_dict_mut)
        {
            names.remove(b"JavaScript");
        }
    }

    for page_id in page_ids {
        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(PdfError::from)?;
        if pass.strip_active_content {
            page.remove(b"AA");
        }
        if pass.drop_transparency {
            page.remove(b"Group");
        }
        if pass.drop_annotations {
            page.remove(b"Annots");
        }
    }

    Ok(())
}

fn catalog_mut(doc: &mut Document, root_id: ObjectId) -> Result<&mut Dictionary> {
    doc.get_object_mut(root_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| PdfError::from(e).into())
}

fn xmp_packet(part: u8) -> String {
    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="" xmlns:pdfaid="{}">
   <pdfaid:part>{}</pdfaid:part>
   <pdfaid:conformance>B</pdfaid:conformance>
  </rdf:Description>
  <rdf:Description rdf:about="" xmlns:xmp="http://ns.adobe.com/xap/1.0/">
   <xmp:CreatorTool>palimpsest {}</xmp:CreatorTool>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#,
        PDFAID_NS,
        part,
        env!("CARGO_PKG_VERSION")
    )
}

/// Part number declared in a document's XMP metadata, if any.
pub fn declared_pdfa_part(doc: &Document) -> Option<u8> {
    let root = doc.trailer.get(b"Root").and_then(Object::as_reference).ok()?;
    let catalog = page_dictionary(doc, root).ok()?;
    let metadata_id = catalog.get(b"Metadata").and_then(Object::as_reference).ok()?;
    let stream = doc.get_object(metadata_id).and_then(Object::as_stream).ok()?;
    let bytes = stream_content(stream)?;
    let xml = std::str::from_utf8(&bytes).ok()?;
    let xml = xml.trim_start_matches('\u{feff}');

    let xmp = roxmltree::Document::parse(xml).ok()?;
    // The part is written either as an element or as an attribute of rdf:Description.
    xmp.descendants()
        .find_map(|node| {
            if node.tag_name().namespace() == Some(PDFAID_NS) && node.tag_name().name() == "part" {
                return node.text();
            }
            node.attribute((PDFAID_NS, "part"))
        })
        .and_then(|part| part.trim().parse().ok())
}
