//! Reverse mapping: annotation export -> training-schema documents
//!
//! Every exported task is matched to the task it was created from, by page
//! index. The regions of the chosen annotation are compared against the
//! pre-populated ones to record where each training item came from.

use crate::config::MappingConfig;
use crate::error::{BridgeError, Report, Result, WarningKind};
use crate::geometry::{
    approx_eq, check_region, from_percent, normalize_rotation, reading_order, GeometryProblem,
};
use crate::validate;
use bridge_types::{
    Annotation, ExportedTask, NormBox, Provenance, RegionKind, ResultItem, ResultType, Task,
    TrainingItem, TrainingPage,
};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ReverseOutput {
    pub pages: Vec<TrainingPage>,
    pub report: Report,
}

/// A region reassembled from the result items sharing one id
#[derive(Debug, Clone, PartialEq)]
struct Region {
    id: String,
    bbox: NormBox,
    kind: Option<RegionKind>,
    key: Option<String>,
    value: Option<String>,
    text: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

impl Region {
    fn differs_from(&self, original: &Region, tolerance: f64) -> bool {
        !approx_eq(&self.bbox, &original.bbox, tolerance)
            || self.kind != original.kind
            || self.key != original.key
            || self.value != original.value
    }
}

/// Map an export back to training documents, one per annotated page
pub fn map(
    export: &[ExportedTask],
    original: &[Task],
    config: &MappingConfig,
) -> Result<ReverseOutput> {
    let originals = index_original(original)?;
    let mut report = Report::default();
    let mut pages: BTreeMap<u32, TrainingPage> = BTreeMap::new();

    for task in export {
        let label = task.label();
        let page = task
            .data
            .page
            .ok_or_else(|| BridgeError::malformed(&label, "exported task has no page index"))?;
        let source = originals.get(&page).ok_or_else(|| {
            BridgeError::malformed(
                &label,
                format!("page index {page} is not among the original tasks"),
            )
        })?;
        if !same_image(&source.data.image, &task.data.image) {
            return Err(BridgeError::mismatch(format!(
                "{label} shows image '{}' but page {page} was created for '{}'",
                task.data.image, source.data.image
            )));
        }
        if pages.contains_key(&page) {
            return Err(BridgeError::malformed(
                &label,
                format!("page {page} is exported more than once"),
            ));
        }

        let Some((index, annotation)) = latest_annotation(&task.annotations) else {
            report.warn(
                WarningKind::UnannotatedTask,
                page,
                label.clone(),
                "no completed annotation; page skipped",
            );
            continue;
        };

        let seeded = source
            .predictions
            .first()
            .map(|p| p.result.as_slice())
            .unwrap_or_default();
        let mut scratch = Report::default();
        let seeded_context = format!("original task for page {page}");
        let before = interpret(seeded, &seeded_context, page, config, &mut scratch)?;
        let before: BTreeMap<&str, &Region> =
            before.iter().map(|r| (r.id.as_str(), r)).collect();

        let annotation_label = annotation
            .id
            .map_or_else(|| format!("#{index}"), |id| id.to_string());
        let context = format!("{label} / annotation {annotation_label}");
        let after = interpret(&annotation.result, &context, page, config, &mut report)?;

        let training = reconcile(page, &task.data.image, after, &before, config, &mut report);
        tracing::debug!(page, items = training.items.len(), "reconciled page");
        pages.insert(page, training);
    }

    let pages: Vec<TrainingPage> = pages.into_values().collect();
    validate::training(&pages, config)?;
    tracing::info!(
        pages = pages.len(),
        warnings = report.warnings.len(),
        "built training documents"
    );
    Ok(ReverseOutput { pages, report })
}

fn index_original(original: &[Task]) -> Result<BTreeMap<u32, &Task>> {
    let mut by_page = BTreeMap::new();
    for (index, task) in original.iter().enumerate() {
        let context = format!("original task {index}");
        let page = task
            .data
            .page
            .ok_or_else(|| BridgeError::malformed(&context, "task has no page index"))?;
        if by_page.insert(page, task).is_some() {
            return Err(BridgeError::malformed(
                &context,
                format!("page {page} appears in more than one task"),
            ));
        }
    }
    Ok(by_page)
}

/// The tool may re-home uploaded images as `<hash>-<name>` under its own
/// upload directory
fn same_image(original: &str, exported: &str) -> bool {
    if original == exported {
        return true;
    }
    let name = |s: &str| {
        let trimmed = s.split(['?', '#']).next().unwrap_or(s);
        Path::new(trimmed)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
    };
    match (name(original), name(exported)) {
        (Some(a), Some(b)) => {
            a == b || b.split_once('-').is_some_and(|(_, rest)| rest == a)
        }
        _ => false,
    }
}

/// Last annotation not cancelled by the annotator, with its index
fn latest_annotation(annotations: &[Annotation]) -> Option<(usize, &Annotation)> {
    annotations
        .iter()
        .enumerate()
        .rev()
        .find(|(_, a)| !a.was_cancelled)
}

/// Group result items by region id, in first-seen order
fn interpret(
    result: &[ResultItem],
    context: &str,
    page: u32,
    config: &MappingConfig,
    report: &mut Report,
) -> Result<Vec<Region>> {
    let names = &config.interface;
    let mut order: Vec<&str> = Vec::new();
    let mut groups: BTreeMap<&str, Vec<&ResultItem>> = BTreeMap::new();

    for (i, item) in result.iter().enumerate() {
        let known = match item.result_type {
            ResultType::Rectanglelabels | ResultType::Rectangle => item.from_name == names.boxes,
            ResultType::Choices => names.field() == Some(item.from_name.as_str()),
            ResultType::Textarea => {
                names.value() == Some(item.from_name.as_str())
                    || names.ocr() == Some(item.from_name.as_str())
            }
            ResultType::Other => {
                tracing::debug!(from_name = %item.from_name, "ignoring unsupported result type");
                continue;
            }
        };
        if !known {
            return Err(BridgeError::mismatch(format!(
                "{context}: result item from unknown control '{}'",
                item.from_name
            )));
        }
        let id = item
            .id
            .as_deref()
            .ok_or_else(|| BridgeError::malformed(context, format!("result item {i} has no id")))?;
        groups
            .entry(id)
            .or_insert_with(|| {
                order.push(id);
                Vec::new()
            })
            .push(item);
    }

    order
        .into_iter()
        .map(|id| {
            let region_context = format!("{context} / region {id}");
            build_region(id, &groups[id], &region_context, page, config, report)
        })
        .collect()
}

fn build_region(
    id: &str,
    items: &[&ResultItem],
    context: &str,
    page: u32,
    config: &MappingConfig,
    report: &mut Report,
) -> Result<Region> {
    let names = &config.interface;
    let mut rects = items.iter().filter(|i| {
        matches!(
            i.result_type,
            ResultType::Rectanglelabels | ResultType::Rectangle
        )
    });
    let rect = rects
        .next()
        .ok_or_else(|| BridgeError::malformed(context, "region has no rectangle"))?;
    if rects.next().is_some() {
        return Err(BridgeError::malformed(context, "region has more than one rectangle"));
    }

    let v = &rect.value;
    for (field, value) in [("x", v.x), ("y", v.y), ("width", v.width), ("height", v.height)] {
        match value {
            Some(n) if n.is_finite() => {}
            Some(_) => {
                return Err(BridgeError::malformed(
                    context,
                    format!("rectangle {field} is not a finite number"),
                ))
            }
            None => {
                return Err(BridgeError::malformed(
                    context,
                    format!("rectangle is missing {field}"),
                ))
            }
        }
    }
    let mut percent = v
        .rect()
        .ok_or_else(|| BridgeError::malformed(context, "rectangle is missing geometry"))?;
    if percent.rotation.rem_euclid(360.0).abs() > 1e-9 {
        let rotation = percent.rotation;
        percent = normalize_rotation(&percent, rect.original_width, rect.original_height);
        report.warn(
            WarningKind::RotationNormalized,
            page,
            id,
            format!("rotation {rotation} replaced by axis-aligned bounds"),
        );
    }

    let kind = match v.rectanglelabels.as_ref().and_then(|l| l.first()) {
        Some(label) => Some(config.kind_for_rect_label(label)?),
        None => None,
    };

    let mut key = None;
    let mut value = None;
    let mut text = None;
    for item in items {
        match item.result_type {
            ResultType::Choices => {
                if let Some(choice) = item.value.choices.as_ref().and_then(|c| c.first()) {
                    key = Some(config.field_for_choice(choice)?.to_string());
                }
            }
            ResultType::Textarea if names.value() == Some(item.from_name.as_str()) => {
                value = item.value.first_text().map(str::to_string);
            }
            ResultType::Textarea => {
                text = item.value.first_text().map(str::to_string);
            }
            _ => {}
        }
    }

    Ok(Region {
        id: id.to_string(),
        bbox: from_percent(&percent),
        kind,
        key,
        value,
        text,
        width: rect.original_width,
        height: rect.original_height,
    })
}

fn reconcile(
    page: u32,
    image: &str,
    regions: Vec<Region>,
    before: &BTreeMap<&str, &Region>,
    config: &MappingConfig,
    report: &mut Report,
) -> TrainingPage {
    let mut width = None;
    let mut height = None;
    let mut kept = Vec::with_capacity(regions.len());

    for region in regions {
        width = width.or(region.width);
        height = height.or(region.height);
        match check_region(&region.bbox, config.tolerance) {
            Ok(bbox) => kept.push(Region { bbox, ..region }),
            Err(GeometryProblem::Degenerate(msg)) => {
                report.warn(WarningKind::Degenerate, page, region.id, msg)
            }
            Err(GeometryProblem::OutOfBounds(msg)) => {
                report.warn(WarningKind::OutOfBounds, page, region.id, msg)
            }
        }
    }

    let boxes: Vec<NormBox> = kept.iter().map(|r| r.bbox).collect();
    let mut slots: Vec<Option<Region>> = kept.into_iter().map(Some).collect();
    let mut items = Vec::with_capacity(slots.len());

    for index in reading_order(&boxes) {
        let Some(region) = slots[index].take() else {
            continue;
        };
        let original = before.get(region.id.as_str()).copied();
        let (id, provenance) = match original {
            None => (Uuid::new_v4().to_string(), Provenance::AnnotatorAdded),
            Some(o) if region.differs_from(o, config.tolerance) => {
                (region.id.clone(), Provenance::AnnotatorEdited)
            }
            Some(_) => (region.id.clone(), Provenance::Ocr),
        };
        let text = region
            .text
            .clone()
            .or_else(|| original.and_then(|o| o.text.clone()));
        let value = region
            .value
            .clone()
            .or_else(|| text.clone())
            .unwrap_or_default();

        items.push(TrainingItem {
            id,
            key: region.key,
            value,
            text,
            page,
            block_type: region.kind,
            value_coordinates: vec![region.bbox],
            value_confidence: config.confidence,
            key_confidence: config.confidence,
            key_coordinates: Vec::new(),
            provenance,
        });
    }

    TrainingPage {
        page,
        image: image.to_string(),
        width,
        height,
        items,
    }
}
