//! Training-schema documents consumed by the retraining pipeline

use crate::geometry::NormBox;
use crate::source::RegionKind;
use serde::{Deserialize, Serialize};

/// Where a training region came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Pre-populated from OCR and accepted unchanged
    Ocr,
    /// Pre-populated, then relabeled, resized or retyped by an annotator
    AnnotatorEdited,
    /// Drawn by an annotator with no OCR source
    AnnotatorAdded,
}

/// One page of reviewed regions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPage {
    pub page: u32,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub items: Vec<TrainingItem>,
}

impl TrainingPage {
    pub fn count(&self, provenance: Provenance) -> usize {
        self.items
            .iter()
            .filter(|i| i.provenance == provenance)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingItem {
    pub id: String,
    /// Field name; `None` for regions nobody labeled
    pub key: Option<String>,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<RegionKind>,
    pub value_coordinates: Vec<NormBox>,
    pub value_confidence: f64,
    pub key_confidence: f64,
    #[serde(default)]
    pub key_coordinates: Vec<NormBox>,
    pub provenance: Provenance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_training_item_serializes_camel_case() {
        let item = TrainingItem {
            id: "r1".into(),
            key: Some("name".into()),
            value: "Jane".into(),
            text: None,
            page: 1,
            block_type: Some(RegionKind::Word),
            value_coordinates: vec![NormBox::new(0.1, 0.1, 0.2, 0.05)],
            value_confidence: 100.0,
            key_confidence: 100.0,
            key_coordinates: vec![],
            provenance: Provenance::AnnotatorEdited,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["blockType"], "WORD");
        assert_eq!(json["provenance"], "annotator_edited");
        assert_eq!(json["valueCoordinates"][0]["left"], 0.1);
        assert_eq!(json["keyCoordinates"], serde_json::json!([]));
    }
}
