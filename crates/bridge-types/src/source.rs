//! Extraction-side types: Textract blocks, parsed regions, model predictions

use crate::geometry::SourceGeometry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of detected element, named after the Textract block types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionKind {
    Word,
    Line,
    KeyValueSet,
    SelectionElement,
    Cell,
}

impl RegionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionKind::Word => "WORD",
            RegionKind::Line => "LINE",
            RegionKind::KeyValueSet => "KEY_VALUE_SET",
            RegionKind::SelectionElement => "SELECTION_ELEMENT",
            RegionKind::Cell => "CELL",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "WORD" => Ok(Self::Word),
            "LINE" => Ok(Self::Line),
            "KEY_VALUE_SET" | "FORM_FIELD" => Ok(Self::KeyValueSet),
            "SELECTION_ELEMENT" | "CHECKBOX" => Ok(Self::SelectionElement),
            "CELL" => Ok(Self::Cell),
            _ => Err(format!("unknown region kind: '{s}'")),
        }
    }
}

/// Full Textract response (`AnalyzeDocument` / `DetectDocumentText`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextractDocument {
    #[serde(default)]
    pub document_metadata: Option<DocumentMetadata>,
    pub blocks: Vec<TextractBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentMetadata {
    #[serde(default)]
    pub pages: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextractBlock {
    #[serde(default)]
    pub id: Option<String>,
    pub block_type: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub selection_status: Option<String>,
    #[serde(default)]
    pub geometry: Option<TextractGeometry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextractGeometry {
    #[serde(default)]
    pub bounding_box: Option<TextractBoundingBox>,
}

/// Fields are optional so a missing one can be reported against its block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextractBoundingBox {
    pub left: Option<f64>,
    pub top: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

/// A detected text or form element. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometricRegion {
    pub id: String,
    pub page: u32,
    pub kind: RegionKind,
    pub geometry: SourceGeometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Semantic label, e.g. the form field name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Predicted field value attached to the label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Regions of one page. `width`/`height` are pixel dimensions when the
/// extraction document records them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageRegions {
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub regions: Vec<GeometricRegion>,
}

/// Parsed extraction result, pages contiguous from 1
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionDocument {
    pub name: String,
    pub pages: Vec<PageRegions>,
}

impl ExtractionDocument {
    pub fn page(&self, page: u32) -> Option<&PageRegions> {
        self.pages.iter().find(|p| p.page == page)
    }

    pub fn region_count(&self) -> usize {
        self.pages.iter().map(|p| p.regions.len()).sum()
    }
}

/// One key/value prediction from the forms model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub value_confidence: Option<f64>,
    #[serde(default)]
    pub value_coordinates: Vec<PredictionBox>,
}

fn default_key() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionBox {
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}
