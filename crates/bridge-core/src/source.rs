//! Parsing of extraction documents and model predictions
//!
//! Two extraction shapes are accepted:
//! - a full Textract response (`{"Blocks": [...]}`)
//! - a reduced list of word items with `page`, `text` and a bounding box under
//!   `bbox`, `coordinates`, `Geometry.BoundingBox` or flattened keys
//!
//! Required geometry is never guessed: a selected block or item without a
//! complete bounding box is a malformed document.

use crate::config::MappingConfig;
use crate::error::{BridgeError, Result};
use bridge_types::{
    ExtractionDocument, GeometricRegion, NormBox, PageRegions, PixelBox, Prediction, RegionKind,
    SourceGeometry, TextractDocument,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Highest page index accepted when the document declares no page count
pub const MAX_PAGES: u32 = 10_000;

/// Parse an extraction document. `page_count` extends the page range when
/// trailing pages carry no regions (e.g. known from the source PDF).
///
/// A page index beyond the declared count (the caller's or
/// `DocumentMetadata.Pages`, whichever is larger) is malformed; with no
/// declared count, indexes above [`MAX_PAGES`] are.
pub fn parse_extraction(
    json: &Value,
    config: &MappingConfig,
    name: &str,
    page_count: Option<u32>,
) -> Result<ExtractionDocument> {
    let mut pages: BTreeMap<u32, PageRegions> = BTreeMap::new();
    let mut max_page = page_count.unwrap_or(0);

    match json {
        Value::Object(obj) if obj.contains_key("Blocks") => {
            let doc: TextractDocument = serde_json::from_value(json.clone()).map_err(|e| {
                BridgeError::malformed(name, format!("not a Textract response: {e}"))
            })?;
            let declared = doc.document_metadata.as_ref().and_then(|m| m.pages);
            let bound = PageBound::new(name, page_count.max(declared))?;
            max_page = max_page.max(declared.unwrap_or(0));
            for (index, block) in doc.blocks.iter().enumerate() {
                let page = block.page.unwrap_or(1);
                bound.check(page, &block_context(name, block.id.as_deref(), index))?;
                max_page = max_page.max(page);

                let Ok(kind) = block.block_type.parse::<RegionKind>() else {
                    continue;
                };
                if !config.block_types.contains(&kind) {
                    continue;
                }

                let context = block_context(name, block.id.as_deref(), index);
                let bb = block
                    .geometry
                    .as_ref()
                    .and_then(|g| g.bounding_box.as_ref())
                    .ok_or_else(|| {
                        BridgeError::malformed(&context, "missing Geometry.BoundingBox")
                    })?;
                let geometry = NormBox {
                    left: required(bb.left, &context, "Left")?,
                    top: required(bb.top, &context, "Top")?,
                    width: required(bb.width, &context, "Width")?,
                    height: required(bb.height, &context, "Height")?,
                };

                let text = match kind {
                    RegionKind::SelectionElement => block.selection_status.clone(),
                    _ => block.text.clone(),
                };
                let region = GeometricRegion {
                    id: block
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("p{page}-b{index}")),
                    page,
                    kind,
                    geometry: SourceGeometry::Normalized(geometry),
                    text,
                    confidence: block.confidence,
                    label: None,
                    value: None,
                };
                pages
                    .entry(page)
                    .or_insert_with(|| empty_page(page))
                    .regions
                    .push(region);
            }
        }
        Value::Array(items) => {
            let bound = PageBound::new(name, page_count)?;
            for (index, item) in items.iter().enumerate() {
                let context = format!("{name} item {index}");
                let Value::Object(item) = item else {
                    return Err(BridgeError::malformed(context, "expected an object"));
                };
                let Some(region) = parse_item(item, index, config, &context)? else {
                    continue;
                };
                bound.check(region.page, &context)?;
                max_page = max_page.max(region.page);
                let page = pages
                    .entry(region.page)
                    .or_insert_with(|| empty_page(region.page));
                if page.width.is_none() {
                    page.width = number(item, &["page_width", "PageWidth"]).map(|v| v as u32);
                    page.height = number(item, &["page_height", "PageHeight"]).map(|v| v as u32);
                }
                page.regions.push(region);
            }
        }
        _ => {
            return Err(BridgeError::malformed(
                name,
                "unsupported extraction JSON shape: expected a Textract response with Blocks or a list of word items",
            ))
        }
    }

    for page in 1..=max_page {
        pages.entry(page).or_insert_with(|| empty_page(page));
    }

    let doc = ExtractionDocument {
        name: name.to_string(),
        pages: pages.into_values().collect(),
    };
    tracing::debug!(
        document = name,
        pages = doc.pages.len(),
        regions = doc.region_count(),
        "parsed extraction document"
    );
    Ok(doc)
}

/// Limit on page indexes for one document
struct PageBound {
    declared: Option<u32>,
}

impl PageBound {
    fn new(name: &str, declared: Option<u32>) -> Result<Self> {
        match declared {
            Some(n) if n > MAX_PAGES => Err(BridgeError::malformed(
                name,
                format!("declares {n} pages, more than the supported {MAX_PAGES}"),
            )),
            _ => Ok(Self { declared }),
        }
    }

    fn check(&self, page: u32, context: &str) -> Result<()> {
        if page == 0 {
            return Err(BridgeError::malformed(context, "page numbers are 1-based"));
        }
        match self.declared {
            Some(n) if page > n => Err(BridgeError::malformed(
                context,
                format!("page {page} exceeds the document's {n} pages"),
            )),
            None if page > MAX_PAGES => Err(BridgeError::malformed(
                context,
                format!("page {page} exceeds the limit of {MAX_PAGES} pages"),
            )),
            _ => Ok(()),
        }
    }
}

fn empty_page(page: u32) -> PageRegions {
    PageRegions {
        page,
        ..Default::default()
    }
}

fn block_context(name: &str, id: Option<&str>, index: usize) -> String {
    match id {
        Some(id) => format!("{name} block {id}"),
        None => format!("{name} block #{index}"),
    }
}

fn required(value: Option<f64>, context: &str, field: &str) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(BridgeError::malformed(
            context,
            format!("BoundingBox.{field} is not finite ({v})"),
        )),
        None => Err(BridgeError::malformed(
            context,
            format!("missing BoundingBox.{field}"),
        )),
    }
}

fn number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_f64))
}

fn string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn parse_item(
    item: &Map<String, Value>,
    index: usize,
    config: &MappingConfig,
    context: &str,
) -> Result<Option<GeometricRegion>> {
    let kind = match string(item, &["type", "BlockType"]) {
        Some(t) => t
            .parse::<RegionKind>()
            .map_err(|e| BridgeError::malformed(context, e))?,
        None => RegionKind::Word,
    };
    if !config.block_types.contains(&kind) {
        return Ok(None);
    }

    let page = match item.get("page").or_else(|| item.get("Page")) {
        None | Some(Value::Null) => 1,
        Some(v) => v
            .as_u64()
            .and_then(|p| u32::try_from(p).ok())
            .ok_or_else(|| BridgeError::malformed(context, format!("invalid page {v}")))?,
    };
    if page == 0 {
        return Err(BridgeError::malformed(context, "page numbers are 1-based"));
    }

    let coords = item
        .get("bbox")
        .or_else(|| item.get("coordinates"))
        .or_else(|| item.get("Geometry").and_then(|g| g.get("BoundingBox")))
        .and_then(Value::as_object)
        .unwrap_or(item);
    let extent = |field: &str| -> Result<f64> {
        let capitalized = format!("{}{}", field[..1].to_uppercase(), &field[1..]);
        match number(coords, &[field, capitalized.as_str()]) {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(BridgeError::malformed(
                context,
                format!("missing or non-numeric bounding box field '{field}'"),
            )),
        }
    };
    let (left, top, width, height) = (
        extent("left")?,
        extent("top")?,
        extent("width")?,
        extent("height")?,
    );

    let units = string(item, &["units"]).unwrap_or_default();
    let geometry = match units.to_ascii_lowercase().as_str() {
        "" | "normalized" => SourceGeometry::Normalized(NormBox::new(left, top, width, height)),
        "px" | "pixels" => SourceGeometry::Pixels(PixelBox {
            x: left,
            y: top,
            width,
            height,
        }),
        other => {
            return Err(BridgeError::malformed(
                context,
                format!("unknown coordinate units '{other}'"),
            ))
        }
    };

    Ok(Some(GeometricRegion {
        id: string(item, &["id", "Id"]).unwrap_or_else(|| format!("p{page}-w{index}")),
        page,
        kind,
        geometry,
        text: string(item, &["text", "word", "value", "Text"]),
        confidence: number(item, &["confidence", "Confidence"]),
        label: string(item, &["label", "key"]),
        value: string(item, &["field_value"]),
    }))
}

/// Parse the forms-model prediction list
pub fn parse_predictions(json: &Value, name: &str) -> Result<Vec<Prediction>> {
    let Value::Array(items) = json else {
        return Err(BridgeError::malformed(
            name,
            "expected a list of predictions",
        ));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item.clone()).map_err(|e| {
                BridgeError::malformed(format!("{name} prediction {i}"), e.to_string())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use serde_json::json;

    #[test]
    fn test_textract_words_grouped_by_page() {
        let json = json!({
            "DocumentMetadata": {"Pages": 3},
            "Blocks": [
                {"Id": "p1", "BlockType": "PAGE", "Page": 1,
                 "Geometry": {"BoundingBox": {"Left": 0, "Top": 0, "Width": 1, "Height": 1}}},
                {"Id": "l1", "BlockType": "LINE", "Page": 1, "Text": "Name Jane",
                 "Geometry": {"BoundingBox": {"Left": 0.1, "Top": 0.1, "Width": 0.4, "Height": 0.05}}},
                {"Id": "w1", "BlockType": "WORD", "Page": 1, "Text": "Name", "Confidence": 99.5,
                 "Geometry": {"BoundingBox": {"Left": 0.1, "Top": 0.1, "Width": 0.1, "Height": 0.05}}},
                {"Id": "w2", "BlockType": "WORD", "Page": 2, "Text": "Total",
                 "Geometry": {"BoundingBox": {"Left": 0.3, "Top": 0.4, "Width": 0.1, "Height": 0.05}}}
            ]
        });
        let doc = parse_extraction(&json, &test_config(), "doc.json", None).unwrap();
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.pages[0].regions.len(), 1);
        assert_eq!(doc.pages[0].regions[0].id, "w1");
        assert_eq!(doc.pages[0].regions[0].confidence, Some(99.5));
        assert_eq!(doc.pages[1].regions[0].text.as_deref(), Some("Total"));
        assert!(doc.pages[2].regions.is_empty());
    }

    #[test]
    fn test_textract_missing_width_names_block() {
        let json = json!({"Blocks": [
            {"Id": "w9", "BlockType": "WORD", "Page": 1,
             "Geometry": {"BoundingBox": {"Left": 0.1, "Top": 0.1, "Height": 0.05}}}
        ]});
        let err = parse_extraction(&json, &test_config(), "doc.json", None).unwrap_err();
        match err {
            BridgeError::MalformedInput { context, message } => {
                assert_eq!(context, "doc.json block w9");
                assert!(message.contains("Width"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_simplified_items_with_flattened_and_nested_boxes() {
        let json = json!([
            {"page": 1, "text": "Jane", "left": 0.1, "top": 0.1, "width": 0.2, "height": 0.05, "label": "name"},
            {"page": 1, "word": "2024", "bbox": {"Left": 0.3, "Top": 0.3, "Width": 0.25, "Height": 0.05}},
            {"page": 2, "value": "X", "coordinates": {"left": 0.5, "top": 0.6, "width": 0.1, "height": 0.1}}
        ]);
        let doc = parse_extraction(&json, &test_config(), "words.json", Some(3)).unwrap();
        assert_eq!(doc.pages.len(), 3);
        let first = &doc.pages[0].regions[0];
        assert_eq!(first.label.as_deref(), Some("name"));
        assert_eq!(first.id, "p1-w0");
        assert_eq!(doc.pages[0].regions[1].text.as_deref(), Some("2024"));
        assert_eq!(doc.pages[1].regions[0].text.as_deref(), Some("X"));
    }

    #[test]
    fn test_simplified_pixel_units_and_page_size() {
        let json = json!([
            {"page": 1, "text": "a", "left": 170, "top": 220, "width": 340, "height": 110,
             "units": "px", "page_width": 1700, "page_height": 2200}
        ]);
        let doc = parse_extraction(&json, &test_config(), "px.json", None).unwrap();
        assert_eq!(doc.pages[0].width, Some(1700));
        assert!(matches!(
            doc.pages[0].regions[0].geometry,
            SourceGeometry::Pixels(_)
        ));
    }

    #[test]
    fn test_simplified_item_without_box_rejected() {
        let json = json!([{"page": 1, "text": "orphan", "left": 0.1}]);
        let err = parse_extraction(&json, &test_config(), "w.json", None).unwrap_err();
        assert!(err.to_string().contains("w.json item 0"));
    }

    #[test]
    fn test_unsupported_shape_rejected() {
        let err = parse_extraction(&json!({"pages": []}), &test_config(), "x.json", None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedInput { .. }));
    }

    #[test]
    fn test_unselected_block_types_skipped() {
        let json = json!([
            {"type": "LINE", "text": "whole line", "left": 0.1, "top": 0.1, "width": 0.5, "height": 0.05}
        ]);
        let doc = parse_extraction(&json, &test_config(), "w.json", None).unwrap();
        assert_eq!(doc.region_count(), 0);
    }

    #[test]
    fn test_block_page_beyond_metadata_rejected() {
        let json = json!({
            "DocumentMetadata": {"Pages": 2},
            "Blocks": [
                {"Id": "w1", "BlockType": "WORD", "Page": 40000, "Text": "x",
                 "Geometry": {"BoundingBox": {"Left": 0.1, "Top": 0.1, "Width": 0.1, "Height": 0.05}}}
            ]
        });
        let err = parse_extraction(&json, &test_config(), "doc.json", None).unwrap_err();
        match err {
            BridgeError::MalformedInput { context, message } => {
                assert_eq!(context, "doc.json block w1");
                assert_eq!(message, "page 40000 exceeds the document's 2 pages");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_caller_page_count_widens_metadata() {
        let json = json!({
            "DocumentMetadata": {"Pages": 1},
            "Blocks": [
                {"Id": "w1", "BlockType": "WORD", "Page": 3, "Text": "x",
                 "Geometry": {"BoundingBox": {"Left": 0.1, "Top": 0.1, "Width": 0.1, "Height": 0.05}}}
            ]
        });
        let doc = parse_extraction(&json, &test_config(), "doc.json", Some(3)).unwrap();
        assert_eq!(doc.pages.len(), 3);
    }

    #[test]
    fn test_item_page_beyond_page_count_rejected() {
        let json = json!([
            {"page": 5, "text": "late", "left": 0.1, "top": 0.1, "width": 0.2, "height": 0.05}
        ]);
        let err = parse_extraction(&json, &test_config(), "w.json", Some(2)).unwrap_err();
        assert!(err.to_string().contains("w.json item 0"), "{err}");
        assert!(err.to_string().contains("exceeds the document's 2 pages"), "{err}");
    }

    #[test]
    fn test_undeclared_page_count_is_capped() {
        let json = json!([
            {"page": 4_000_000_000u64, "text": "x", "left": 0.1, "top": 0.1, "width": 0.2, "height": 0.05}
        ]);
        let err = parse_extraction(&json, &test_config(), "w.json", None).unwrap_err();
        assert!(err.to_string().contains("limit of 10000 pages"), "{err}");

        let huge = json!({"DocumentMetadata": {"Pages": 4_000_000_000u64}, "Blocks": []});
        assert!(matches!(
            parse_extraction(&huge, &test_config(), "doc.json", None),
            Err(BridgeError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_parse_predictions() {
        let json = json!([
            {"key": "name", "value": "Jane", "page": 1, "valueConfidence": 87.5,
             "valueCoordinates": [{"left": 0.1, "top": 0.1, "width": 0.2, "height": 0.05}]},
            {"key": "date", "value": "2024-01-01"}
        ]);
        let preds = parse_predictions(&json, "model.json").unwrap();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].value_coordinates.len(), 1);
        assert_eq!(preds[1].page, None);
        assert!(parse_predictions(&json!({"key": "x"}), "model.json").is_err());
    }
}
