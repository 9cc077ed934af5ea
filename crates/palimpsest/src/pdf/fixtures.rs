//! Small PDFs for unit tests.

use lopdf::{Document, Object, Stream, dictionary};
use std::path::Path;

/// Write a Letter-sized PDF with one page per `(content, rotate)` pair.
pub(crate) fn write_pdf(path: &Path, pages: &[(Vec<u8>, i64)]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();

    for (bytes, rotate) in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, bytes.clone()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Rotate" => *rotate,
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
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}
