//! Schema validation of emitted documents
//!
//! Both mappers run their output through here before returning it. Labels
//! outside the label set are configuration mismatches; every other failure
//! means the mapper (or its input) produced something malformed.

use crate::config::MappingConfig;
use crate::error::{BridgeError, Result};
use bridge_types::{ResultItem, ResultType, Task, TrainingPage};
use std::collections::BTreeSet;

/// Float noise allowed when a box touches the page edge
const EDGE_SLACK: f64 = 1e-9;

/// Check annotation tasks against the label set
pub fn tasks(tasks: &[Task], config: &MappingConfig) -> Result<()> {
    let mut last_page = 0;
    for (index, task) in tasks.iter().enumerate() {
        let context = format!("task {index}");
        let page = task
            .data
            .page
            .ok_or_else(|| BridgeError::malformed(&context, "task has no page index"))?;
        if page <= last_page {
            return Err(BridgeError::malformed(
                &context,
                format!("page {page} does not follow page {last_page}"),
            ));
        }
        last_page = page;

        for prediction in &task.predictions {
            let mut rect_ids = BTreeSet::new();
            for item in &prediction.result {
                let id = item
                    .id
                    .as_deref()
                    .ok_or_else(|| BridgeError::malformed(&context, "result item has no id"))?;
                let item_context = format!("{context} region {id}");
                check_item(item, &item_context, config)?;
                if is_rectangle(item) && !rect_ids.insert(id) {
                    return Err(BridgeError::malformed(
                        &item_context,
                        "region id is used by more than one rectangle",
                    ));
                }
            }
        }
    }
    Ok(())
}

fn is_rectangle(item: &ResultItem) -> bool {
    matches!(
        item.result_type,
        ResultType::Rectanglelabels | ResultType::Rectangle
    )
}

fn check_item(item: &ResultItem, context: &str, config: &MappingConfig) -> Result<()> {
    let names = &config.interface;
    let set = &config.label_set;
    if item.to_name != names.image {
        return Err(BridgeError::mismatch(format!(
            "{context}: to_name '{}' is not the image object '{}'",
            item.to_name, names.image
        )));
    }

    match item.result_type {
        ResultType::Rectanglelabels | ResultType::Rectangle => {
            if item.from_name != names.boxes {
                return Err(BridgeError::mismatch(format!(
                    "{context}: rectangle bound to unknown control '{}'",
                    item.from_name
                )));
            }
            for label in item.value.rectanglelabels.iter().flatten() {
                if !set.has_rect_label(&item.from_name, label) {
                    return Err(BridgeError::mismatch(format!(
                        "{context}: rectangle label '{label}' is not in the label set"
                    )));
                }
            }
            let rect = item
                .value
                .rect()
                .ok_or_else(|| BridgeError::malformed(context, "rectangle is missing geometry"))?;
            let in_range =
                |v: f64| v.is_finite() && (-EDGE_SLACK..=100.0 + EDGE_SLACK).contains(&v);
            if !(in_range(rect.x)
                && in_range(rect.y)
                && rect.width > 0.0
                && rect.height > 0.0
                && in_range(rect.x + rect.width)
                && in_range(rect.y + rect.height))
            {
                return Err(BridgeError::malformed(
                    context,
                    format!(
                        "rectangle [{}, {}, {}, {}] is outside [0, 100]",
                        rect.x, rect.y, rect.width, rect.height
                    ),
                ));
            }
        }
        ResultType::Choices => {
            if !set.choices.contains_key(&item.from_name) {
                return Err(BridgeError::mismatch(format!(
                    "{context}: choices bound to unknown control '{}'",
                    item.from_name
                )));
            }
            for choice in item.value.choices.iter().flatten() {
                if !set.has_choice(&item.from_name, choice) {
                    return Err(BridgeError::mismatch(format!(
                        "{context}: label '{choice}' is not in the label set"
                    )));
                }
            }
        }
        ResultType::Textarea => {
            if !set.textareas.contains_key(&item.from_name) {
                return Err(BridgeError::mismatch(format!(
                    "{context}: textarea bound to unknown control '{}'",
                    item.from_name
                )));
            }
        }
        ResultType::Other => {
            return Err(BridgeError::malformed(
                context,
                format!("unsupported result type from '{}'", item.from_name),
            ))
        }
    }
    Ok(())
}

/// Check training documents against the training schema
pub fn training(pages: &[TrainingPage], config: &MappingConfig) -> Result<()> {
    let vocabulary = config.training_vocabulary();
    let mut last_page = 0;
    let mut ids = BTreeSet::new();

    for doc in pages {
        let context = format!("training page {}", doc.page);
        if doc.page <= last_page {
            return Err(BridgeError::malformed(
                &context,
                format!("page {} does not follow page {last_page}", doc.page),
            ));
        }
        last_page = doc.page;

        for item in &doc.items {
            let item_context = format!("{context} item {}", item.id);
            if item.page != doc.page {
                return Err(BridgeError::malformed(
                    &item_context,
                    format!("item claims page {}", item.page),
                ));
            }
            if !ids.insert(item.id.as_str()) {
                return Err(BridgeError::malformed(&item_context, "duplicate item id"));
            }
            if let Some(key) = &item.key {
                if !vocabulary.contains(key) {
                    return Err(BridgeError::mismatch(format!(
                        "{item_context}: key '{key}' is not in the field vocabulary"
                    )));
                }
            }
            if item.value_coordinates.is_empty() {
                return Err(BridgeError::malformed(&item_context, "item has no coordinates"));
            }
            for b in item.value_coordinates.iter().chain(&item.key_coordinates) {
                let ok = b.is_finite()
                    && b.width > 0.0
                    && b.height > 0.0
                    && b.left >= 0.0
                    && b.top >= 0.0
                    && b.right() <= 1.0 + EDGE_SLACK
                    && b.bottom() <= 1.0 + EDGE_SLACK;
                if !ok {
                    return Err(BridgeError::malformed(
                        &item_context,
                        format!(
                            "box [{}, {}, {}, {}] is not within the unit page",
                            b.left, b.top, b.width, b.height
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use bridge_types::{
        NormBox, Provenance, ResultValue, TaskData, TaskPrediction, TrainingItem,
    };
    use serde_json::Map;

    fn rect(id: &str, label: &str, x: f64) -> ResultItem {
        ResultItem {
            id: Some(id.into()),
            result_type: ResultType::Rectanglelabels,
            from_name: "word_boxes".into(),
            to_name: "document".into(),
            original_width: None,
            original_height: None,
            image_rotation: None,
            origin: None,
            score: None,
            readonly: false,
            value: ResultValue {
                x: Some(x),
                y: Some(10.0),
                width: Some(10.0),
                height: Some(5.0),
                rotation: Some(0.0),
                rectanglelabels: Some(vec![label.into()]),
                ..Default::default()
            },
        }
    }

    fn task(page: u32, result: Vec<ResultItem>) -> Task {
        Task {
            data: TaskData {
                image: format!("doc_{page}.png"),
                page: Some(page),
                document: None,
                field_labels: vec![],
                extra: Map::new(),
            },
            predictions: vec![TaskPrediction {
                model_version: "v1".into(),
                score: None,
                result,
            }],
        }
    }

    fn item(id: &str, page: u32, key: Option<&str>, b: NormBox) -> TrainingItem {
        TrainingItem {
            id: id.into(),
            key: key.map(str::to_string),
            value: "x".into(),
            text: None,
            page,
            block_type: None,
            value_coordinates: vec![b],
            value_confidence: 100.0,
            key_confidence: 100.0,
            key_coordinates: vec![],
            provenance: Provenance::Ocr,
        }
    }

    fn page(n: u32, items: Vec<TrainingItem>) -> TrainingPage {
        TrainingPage {
            page: n,
            image: format!("doc_{n}.png"),
            width: None,
            height: None,
            items,
        }
    }

    #[test]
    fn test_valid_tasks_pass() {
        let all = vec![task(1, vec![rect("a", "_token", 10.0)]), task(2, vec![])];
        tasks(&all, &test_config()).unwrap();
    }

    #[test]
    fn test_unknown_rect_label_is_mismatch() {
        let err = tasks(&[task(1, vec![rect("a", "_word", 10.0)])], &test_config()).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationMismatch(_)));
    }

    #[test]
    fn test_pages_must_increase() {
        let err = tasks(&[task(2, vec![]), task(1, vec![])], &test_config()).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedInput { .. }));
    }

    #[test]
    fn test_geometry_outside_percent_range_rejected() {
        let err = tasks(&[task(1, vec![rect("a", "_token", 95.0)])], &test_config()).unwrap_err();
        assert!(err.to_string().contains("outside [0, 100]"));
    }

    #[test]
    fn test_duplicate_rectangle_id_rejected() {
        let result = vec![rect("a", "_token", 10.0), rect("a", "_token", 30.0)];
        assert!(tasks(&[task(1, result)], &test_config()).is_err());
    }

    #[test]
    fn test_training_checks() {
        let config = test_config();
        let ok = NormBox::new(0.1, 0.1, 0.2, 0.05);
        training(
            &[page(1, vec![item("a", 1, Some("account_number"), ok)])],
            &config,
        )
        .unwrap();

        let err = training(&[page(1, vec![item("a", 2, None, ok)])], &config).unwrap_err();
        assert!(err.to_string().contains("claims page 2"));

        let err = training(&[page(1, vec![item("a", 1, Some("bank"), ok)])], &config).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationMismatch(_)));

        let wide = NormBox::new(0.9, 0.1, 0.2, 0.05);
        assert!(training(&[page(1, vec![item("a", 1, None, wide)])], &config).is_err());

        let dup = vec![
            page(1, vec![item("a", 1, None, ok)]),
            page(2, vec![item("a", 2, None, ok)]),
        ];
        assert!(training(&dup, &config).is_err());
    }
}
