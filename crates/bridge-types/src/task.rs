//! Annotation-tool task and export documents
//!
//! Field names follow the tool's import/export JSON exactly; anything the
//! bridge does not interpret is kept in `extra` so a re-import stays faithful.

use crate::geometry::PercentRect;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of annotation work: one page image plus its candidate regions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub data: TaskData,
    #[serde(default)]
    pub predictions: Vec<TaskPrediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub image: String,
    /// 1-based page index; absent only in hand-made or foreign tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default)]
    pub field_labels: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPrediction {
    pub model_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub result: Vec<ResultItem>,
}

/// A task as re-emitted by the tool's JSON export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedTask {
    #[serde(default)]
    pub id: Option<u64>,
    pub data: TaskData,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl ExportedTask {
    /// Identifier used in error messages
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("task {id}"),
            None => format!("task for image '{}'", self.data.image),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Vec<ResultItem>,
    #[serde(default)]
    pub was_cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Control type of a result item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Rectanglelabels,
    Rectangle,
    Choices,
    Textarea,
    #[serde(other)]
    Other,
}

/// One control value bound to a region. Items sharing `id` describe the same
/// region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub result_type: ResultType,
    pub from_name: String,
    pub to_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
    pub value: ResultValue,
}

/// Geometry fields are optional so that a missing one can be reported
/// against the region that lacks it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rectanglelabels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Vec<String>>,
}

impl ResultValue {
    pub fn with_rect(rect: PercentRect) -> Self {
        Self {
            x: Some(rect.x),
            y: Some(rect.y),
            width: Some(rect.width),
            height: Some(rect.height),
            rotation: Some(rect.rotation),
            ..Default::default()
        }
    }

    /// The rectangle when all four extents are present
    pub fn rect(&self) -> Option<PercentRect> {
        Some(PercentRect {
            x: self.x?,
            y: self.y?,
            width: self.width?,
            height: self.height?,
            rotation: self.rotation.unwrap_or(0.0),
        })
    }

    pub fn first_text(&self) -> Option<&str> {
        self.text
            .as_ref()
            .and_then(|t| t.first())
            .map(String::as_str)
    }
}
