//! Forward mapping: extraction document -> annotation tasks
//!
//! One task per page, page-ascending. Every usable region becomes exactly one
//! pre-populated tool region: a rectangle, plus per-region OCR text, field
//! choice and value sharing the rectangle's id. Regions are emitted in
//! reading order so review proceeds top-to-bottom, left-to-right.

use crate::align::align_page;
use crate::config::MappingConfig;
use crate::error::{BridgeError, Report, Result, WarningKind};
use crate::geometry::{check_region, pixels_to_norm, reading_order, to_percent, GeometryProblem};
use crate::images::PageImage;
use crate::validate;
use bridge_types::{
    ExtractionDocument, GeometricRegion, NormBox, PageRegions, Prediction, ResultItem,
    ResultType, ResultValue, SourceGeometry, Task, TaskData, TaskPrediction,
};
use serde_json::Map;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct ForwardOutput {
    pub tasks: Vec<Task>,
    pub report: Report,
}

/// Build one task per page of `doc`
pub fn map(
    doc: &ExtractionDocument,
    predictions: &[Prediction],
    images: &[PageImage],
    config: &MappingConfig,
) -> Result<ForwardOutput> {
    let images = index_images(doc, images)?;
    let mut report = Report::default();
    let mut matched = BTreeSet::new();
    let mut tasks = Vec::with_capacity(doc.pages.len());

    for page in &doc.pages {
        let image = images[&page.page];
        let mut task = map_page(page, image, predictions, config, &mut matched, &mut report)?;
        task.data.document = Some(doc.name.clone());
        tasks.push(task);
    }

    for (pi, pred) in predictions.iter().enumerate() {
        if !matched.contains(&pi) {
            report.warn(
                WarningKind::UnmatchedPrediction,
                pred.page.unwrap_or(1),
                pred.key.clone(),
                "prediction was not attached to any OCR region",
            );
        }
    }

    validate::tasks(&tasks, config)?;
    tracing::info!(
        document = %doc.name,
        tasks = tasks.len(),
        warnings = report.warnings.len(),
        "built annotation tasks"
    );
    Ok(ForwardOutput { tasks, report })
}

/// Every page needs exactly one image and every image one page
fn index_images<'a>(
    doc: &ExtractionDocument,
    images: &'a [PageImage],
) -> Result<BTreeMap<u32, &'a PageImage>> {
    let mut by_page = BTreeMap::new();
    for image in images {
        if by_page.insert(image.page, image).is_some() {
            return Err(BridgeError::mismatch(format!(
                "page {} has more than one image",
                image.page
            )));
        }
    }
    for page in &doc.pages {
        if !by_page.contains_key(&page.page) {
            return Err(BridgeError::mismatch(format!(
                "no image for page {} of {}",
                page.page, doc.name
            )));
        }
    }
    if let Some(extra) = by_page.keys().find(|p| doc.page(**p).is_none()) {
        return Err(BridgeError::mismatch(format!(
            "image given for page {extra}, which {} does not contain",
            doc.name
        )));
    }
    Ok(by_page)
}

fn map_page(
    page: &PageRegions,
    image: &PageImage,
    predictions: &[Prediction],
    config: &MappingConfig,
    matched: &mut BTreeSet<usize>,
    report: &mut Report,
) -> Result<Task> {
    let width = page.width.or(image.width);
    let height = page.height.or(image.height);

    let mut kept: Vec<(&GeometricRegion, NormBox)> = Vec::with_capacity(page.regions.len());
    for region in &page.regions {
        let raw = match &region.geometry {
            SourceGeometry::Normalized(b) => *b,
            SourceGeometry::Pixels(px) => match (width, height) {
                (Some(w), Some(h)) => pixels_to_norm(px, w, h)?,
                _ => {
                    return Err(BridgeError::mismatch(format!(
                        "region {} on page {} uses pixel coordinates but the page size is unknown",
                        region.id, page.page
                    )))
                }
            },
        };
        match check_region(&raw, config.tolerance) {
            Ok(b) => kept.push((region, b)),
            Err(GeometryProblem::Degenerate(msg)) => {
                report.warn(WarningKind::Degenerate, page.page, region.id.clone(), msg)
            }
            Err(GeometryProblem::OutOfBounds(msg)) => {
                report.warn(WarningKind::OutOfBounds, page.page, region.id.clone(), msg)
            }
        }
    }

    let boxes: Vec<NormBox> = kept.iter().map(|(_, b)| *b).collect();
    let aligned = align_page(page.page, &boxes, predictions, config.iou_threshold);
    matched.extend(aligned.iter().flatten().copied());

    let mut result = Vec::with_capacity(kept.len() * 2);
    for index in reading_order(&boxes) {
        let (region, bbox) = kept[index];
        let prediction = aligned[index].map(|pi| &predictions[pi]);
        push_region(&mut result, region, &bbox, prediction, width, height, config)?;
    }

    Ok(Task {
        data: TaskData {
            image: image.reference.clone(),
            page: Some(page.page),
            document: None,
            field_labels: config.field_labels(),
            extra: Map::new(),
        },
        predictions: vec![TaskPrediction {
            model_version: config.model_version.clone(),
            score: None,
            result,
        }],
    })
}

fn push_region(
    result: &mut Vec<ResultItem>,
    region: &GeometricRegion,
    bbox: &NormBox,
    prediction: Option<&Prediction>,
    width: Option<u32>,
    height: Option<u32>,
    config: &MappingConfig,
) -> Result<()> {
    let names = &config.interface;
    let item = |result_type: ResultType, from_name: &str, value: ResultValue| ResultItem {
        id: Some(region.id.clone()),
        result_type,
        from_name: from_name.to_string(),
        to_name: names.image.clone(),
        original_width: width,
        original_height: height,
        image_rotation: None,
        origin: None,
        score: None,
        readonly: false,
        value,
    };

    let mut rect = item(
        ResultType::Rectanglelabels,
        &names.boxes,
        ResultValue {
            rectanglelabels: Some(vec![config.rect_label_for(region.kind)?.to_string()]),
            ..ResultValue::with_rect(to_percent(bbox))
        },
    );
    rect.score = region.confidence.map(|c| c / 100.0);
    result.push(rect);

    if let (Some(ocr), Some(text)) = (names.ocr(), region.text.as_ref()) {
        let mut ocr_item = item(
            ResultType::Textarea,
            ocr,
            ResultValue {
                text: Some(vec![text.clone()]),
                ..Default::default()
            },
        );
        ocr_item.readonly = true;
        result.push(ocr_item);
    }

    // The region's own label wins over an aligned prediction
    let (label, value, score) = match (&region.label, prediction) {
        (Some(label), _) => (Some(label.as_str()), region.value.clone(), None),
        (None, Some(pred)) => (
            Some(pred.key.as_str()),
            Some(pred.value.clone()),
            pred.value_confidence.map(|c| c / 100.0),
        ),
        (None, None) => (None, None, None),
    };
    let Some(label) = label else {
        return Ok(());
    };

    let Some(field) = names.field() else {
        return Err(BridgeError::mismatch(format!(
            "region {} is labeled '{label}' but no field control is configured",
            region.id
        )));
    };
    let mut choice = item(
        ResultType::Choices,
        field,
        ResultValue {
            choices: Some(vec![config.choice_for_field(label)?.to_string()]),
            ..Default::default()
        },
    );
    choice.score = score;
    result.push(choice);

    if let Some(value_control) = names.value() {
        let text = value.or_else(|| region.text.clone()).unwrap_or_default();
        let mut value_item = item(
            ResultType::Textarea,
            value_control,
            ResultValue {
                text: Some(vec![text]),
                ..Default::default()
            },
        );
        value_item.score = score;
        result.push(value_item);
    }
    Ok(())
}
