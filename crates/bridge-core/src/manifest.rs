//! Page manifest of a source PDF
//!
//! Rasterization happens outside the bridge. The manifest records what it
//! is expected to produce: one `<stem>_<n>.png` per page, with the page size
//! in points for checking image aspect ratios.

use crate::error::{BridgeError, Result};
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::path::Path;

/// US Letter, used when neither the page nor its ancestors carry a MediaBox
const DEFAULT_MEDIA_BOX: (f64, f64) = (612.0, 792.0);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestPage {
    pub page: u32,
    pub width_pt: f64,
    pub height_pt: f64,
    pub image: String,
}

/// Build the manifest for an in-memory PDF
pub fn page_manifest(pdf: &[u8], stem: &str, dir: &Path) -> Result<Vec<ManifestPage>> {
    let doc = Document::load_mem(pdf).map_err(|e| BridgeError::Pdf(e.to_string()))?;
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(BridgeError::Pdf("document has no pages".into()));
    }

    pages
        .into_iter()
        .map(|(page, id)| {
            let (width_pt, height_pt) = media_box(&doc, id)?;
            Ok(ManifestPage {
                page,
                width_pt,
                height_pt,
                image: dir
                    .join(format!("{stem}_{page}.png"))
                    .to_string_lossy()
                    .into_owned(),
            })
        })
        .collect()
}

/// Number of pages in a PDF
pub fn page_count(pdf: &[u8]) -> Result<u32> {
    let doc = Document::load_mem(pdf).map_err(|e| BridgeError::Pdf(e.to_string()))?;
    u32::try_from(doc.get_pages().len()).map_err(|e| BridgeError::Pdf(e.to_string()))
}

/// The image pattern the rasterizer follows for `pdf_path`
pub fn default_pattern(pdf_path: &Path) -> String {
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string());
    let dir = pdf_path.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("{stem}_{{page}}.png"))
        .to_string_lossy()
        .into_owned()
}

/// MediaBox size, inherited through the page tree when the page has none
fn media_box(doc: &Document, page_id: ObjectId) -> Result<(f64, f64)> {
    let mut current = doc
        .get_dictionary(page_id)
        .map_err(|e| BridgeError::Pdf(format!("page object {page_id:?}: {e}")))?;

    // Page trees are shallow; the bound guards against Parent cycles
    for _ in 0..32 {
        if let Some(size) = box_size(doc, current) {
            return Ok(size);
        }
        let Ok(parent) = current.get(b"Parent").and_then(Object::as_reference) else {
            break;
        };
        match doc.get_dictionary(parent) {
            Ok(dict) => current = dict,
            Err(_) => break,
        }
    }
    Ok(DEFAULT_MEDIA_BOX)
}

fn box_size(doc: &Document, dict: &Dictionary) -> Option<(f64, f64)> {
    let obj = resolve(doc, dict.get(b"MediaBox").ok()?)?;
    let Object::Array(values) = obj else {
        return None;
    };
    let numbers: Vec<f64> = values
        .iter()
        .filter_map(|v| resolve(doc, v).and_then(number))
        .collect();
    match numbers.as_slice() {
        [x0, y0, x1, y1] => Some(((x1 - x0).abs(), (y1 - y0).abs())),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::Stream;

    fn create_test_pdf(sizes: &[(i64, i64)], inherit_first: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut page_ids = Vec::new();

        for (i, &(w, h)) in sizes.iter().enumerate() {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("Page {}", i + 1).into_bytes(),
                            lopdf::StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

            let mut page = Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                ("Contents", Object::Reference(content_id)),
            ]);
            if !(inherit_first && i == 0) {
                page.set(
                    "MediaBox",
                    Object::Array(vec![0.into(), 0.into(), w.into(), h.into()]),
                );
            }
            page_ids.push(doc.add_object(page));
        }

        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(sizes.len() as i64)),
            (
                "Kids",
                Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
            (
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), 595.into(), 842.into()]),
            ),
        ]);
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]);
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_manifest_lists_pages_and_sizes() {
        let pdf = create_test_pdf(&[(612, 792), (792, 612)], false);
        let manifest = page_manifest(&pdf, "invoice", Path::new("out")).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0].page, 1);
        assert_eq!(manifest[1].width_pt, 792.0);
        assert_eq!(manifest[1].height_pt, 612.0);
        assert_eq!(
            manifest[1].image,
            Path::new("out").join("invoice_2.png").to_string_lossy()
        );
    }

    #[test]
    fn test_media_box_inherited_from_page_tree() {
        let pdf = create_test_pdf(&[(612, 792)], true);
        let manifest = page_manifest(&pdf, "a4", Path::new("")).unwrap();
        assert_eq!((manifest[0].width_pt, manifest[0].height_pt), (595.0, 842.0));
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(&create_test_pdf(&[(612, 792); 3], false)).unwrap(), 3);
    }

    #[test]
    fn test_invalid_pdf_rejected() {
        assert!(matches!(
            page_manifest(b"not a pdf", "x", Path::new("")),
            Err(BridgeError::Pdf(_))
        ));
    }

    #[test]
    fn test_default_pattern() {
        assert_eq!(
            default_pattern(Path::new("scans/invoice.pdf")),
            Path::new("scans").join("invoice_{page}.png").to_string_lossy()
        );
    }
}
