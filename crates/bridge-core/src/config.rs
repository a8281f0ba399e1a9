//! Mapping configuration shared by the forward and reverse mappers
//!
//! A [`MappingConfig`] is built once per invocation from a TOML file plus the
//! tool's labeling interface, validated, and passed by reference into both
//! directions, so the two always agree on control names, label vocabulary and
//! tolerance.

use crate::error::{BridgeError, Result};
use crate::label_set::{Control, LabelSet, LabelSetSpec};
use anyhow::Context;
use bridge_types::RegionKind;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Default tolerance in normalized page units
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

/// Raw configuration as written in TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub interface: InterfaceNames,
    #[serde(default)]
    pub labels: LabelMapping,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub reverse: ReverseConfig,
    /// Path of the XML labeling config, relative to the TOML file
    #[serde(default)]
    pub interface_path: Option<PathBuf>,
    /// Inline label set, used when no XML interface is given
    #[serde(default)]
    pub label_set: Option<LabelSetSpec>,
}

impl BridgeConfig {
    /// Load configuration from a TOML file. A relative `interface_path` is
    /// resolved against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_toml(&content)?;
        if let (Some(interface), Some(dir)) = (config.interface_path.as_mut(), path.parent()) {
            if interface.is_relative() {
                *interface = dir.join(&*interface);
            }
        }
        Ok(config)
    }

    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML configuration")
    }
}

/// Control names in the labeling interface
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceNames {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_boxes")]
    pub boxes: String,
    /// Per-region field choice; empty disables
    #[serde(default = "default_field")]
    pub field: String,
    /// Per-region corrected value; empty disables
    #[serde(default = "default_value")]
    pub value: String,
    /// Per-region raw OCR text; empty disables
    #[serde(default = "default_ocr")]
    pub ocr: String,
}

impl Default for InterfaceNames {
    fn default() -> Self {
        Self {
            image: default_image(),
            boxes: default_boxes(),
            field: default_field(),
            value: default_value(),
            ocr: default_ocr(),
        }
    }
}

impl InterfaceNames {
    pub fn field(&self) -> Option<&str> {
        non_empty(&self.field)
    }

    pub fn value(&self) -> Option<&str> {
        non_empty(&self.value)
    }

    pub fn ocr(&self) -> Option<&str> {
        non_empty(&self.ocr)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn default_image() -> String {
    "document".to_string()
}

fn default_boxes() -> String {
    "word_boxes".to_string()
}

fn default_field() -> String {
    "field".to_string()
}

fn default_value() -> String {
    "value".to_string()
}

fn default_ocr() -> String {
    "ocr".to_string()
}

/// Vocabulary translation between the extraction side and the tool
#[derive(Debug, Clone, Deserialize)]
pub struct LabelMapping {
    /// Region kind (Textract block type) -> rectangle label
    #[serde(default = "default_kind_labels")]
    pub kinds: BTreeMap<String, String>,
    /// Semantic label -> choice value; unmapped labels pass through as-is
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Default for LabelMapping {
    fn default() -> Self {
        Self {
            kinds: default_kind_labels(),
            fields: BTreeMap::new(),
        }
    }
}

fn default_kind_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("WORD".to_string(), "_token".to_string()),
        ("LINE".to_string(), "_line".to_string()),
        ("KEY_VALUE_SET".to_string(), "_field".to_string()),
        ("SELECTION_ELEMENT".to_string(), "_checkbox".to_string()),
        ("CELL".to_string(), "_cell".to_string()),
    ])
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// Block types turned into regions (default: WORD)
    #[serde(default = "default_block_types")]
    pub block_types: Vec<String>,
    /// IoU needed to attach a model prediction to a word (default: 0.2)
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            block_types: default_block_types(),
            iou_threshold: default_iou_threshold(),
            model_version: default_model_version(),
        }
    }
}

fn default_block_types() -> Vec<String> {
    vec!["WORD".to_string()]
}

fn default_iou_threshold() -> f64 {
    0.2
}

fn default_model_version() -> String {
    "v1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReverseConfig {
    /// Confidence recorded for human-reviewed values (default: 100)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Geometry tolerance in normalized units (default: 1e-3)
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for ReverseConfig {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            tolerance: default_tolerance(),
        }
    }
}

fn default_confidence() -> f64 {
    100.0
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

/// Validated configuration handed to both mappers
#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub interface: InterfaceNames,
    pub label_set: LabelSet,
    pub block_types: BTreeSet<RegionKind>,
    pub iou_threshold: f64,
    pub model_version: String,
    pub confidence: f64,
    pub tolerance: f64,
    kind_labels: BTreeMap<RegionKind, String>,
    field_choices: BTreeMap<String, String>,
}

impl MappingConfig {
    /// Combine raw config and label set, failing on any disagreement between
    /// the two
    pub fn new(config: BridgeConfig, label_set: LabelSet) -> Result<Self> {
        let mut kind_labels = BTreeMap::new();
        for (kind, label) in config.labels.kinds {
            let kind: RegionKind = kind.parse().map_err(BridgeError::Config)?;
            kind_labels.insert(kind, label);
        }

        let mut block_types = BTreeSet::new();
        for block_type in &config.forward.block_types {
            let kind: RegionKind = block_type.parse().map_err(BridgeError::Config)?;
            block_types.insert(kind);
        }
        if block_types.is_empty() {
            return Err(BridgeError::Config(
                "forward.block_types must name at least one block type".into(),
            ));
        }

        if !(0.0..=1.0).contains(&config.forward.iou_threshold) {
            return Err(BridgeError::Config(format!(
                "forward.iou_threshold must be within [0, 1], got {}",
                config.forward.iou_threshold
            )));
        }
        if !(config.reverse.tolerance > 0.0 && config.reverse.tolerance < 0.5) {
            return Err(BridgeError::Config(format!(
                "reverse.tolerance must be within (0, 0.5), got {}",
                config.reverse.tolerance
            )));
        }

        let mapping = Self {
            interface: config.interface,
            label_set,
            block_types,
            iou_threshold: config.forward.iou_threshold,
            model_version: config.forward.model_version,
            confidence: config.reverse.confidence,
            tolerance: config.reverse.tolerance,
            kind_labels,
            field_choices: config.labels.fields,
        };
        mapping.validate()?;
        Ok(mapping)
    }

    /// Build from a TOML config, reading the labeling interface it points to
    /// (or the explicit `interface` override)
    pub fn load(config: BridgeConfig, interface: Option<&Path>) -> anyhow::Result<Self> {
        let xml_path = interface
            .map(Path::to_path_buf)
            .or_else(|| config.interface_path.clone());
        let label_set = match (xml_path, config.label_set.clone()) {
            (Some(path), _) => {
                let xml = fs::read_to_string(&path).with_context(|| {
                    format!("Failed to read labeling config: {}", path.display())
                })?;
                LabelSet::from_xml(&xml)
                    .with_context(|| format!("Invalid labeling config: {}", path.display()))?
            }
            (None, Some(spec)) => LabelSet::from(spec),
            (None, None) => anyhow::bail!(
                "No label set configured: pass --interface <labeling.xml>, set interface_path, or add a [label_set] table"
            ),
        };
        Ok(Self::new(config, label_set)?)
    }

    fn validate(&self) -> Result<()> {
        let names = &self.interface;
        let set = &self.label_set;

        if !set.images.contains(&names.image) {
            return Err(BridgeError::mismatch(format!(
                "image object '{}' is not declared in the labeling config",
                names.image
            )));
        }
        let Some(boxes) = set.rectangles.get(&names.boxes) else {
            return Err(BridgeError::mismatch(format!(
                "rectangle control '{}' is not declared in the labeling config",
                names.boxes
            )));
        };
        if let Some(field) = names.field() {
            let Some(control) = set.choices.get(field) else {
                return Err(BridgeError::mismatch(format!(
                    "choices control '{field}' is not declared in the labeling config"
                )));
            };
            require_per_region("choices", field, control)?;
        }
        for textarea in [names.value(), names.ocr()].into_iter().flatten() {
            let Some(control) = set.textareas.get(textarea) else {
                return Err(BridgeError::mismatch(format!(
                    "textarea control '{textarea}' is not declared in the labeling config"
                )));
            };
            require_per_region("textarea", textarea, control)?;
        }

        for kind in &self.block_types {
            let label = self.kind_labels.get(kind).ok_or_else(|| {
                BridgeError::mismatch(format!("block type {kind} has no rectangle label mapping"))
            })?;
            if !boxes.values.contains(label) {
                return Err(BridgeError::mismatch(format!(
                    "rectangle label '{label}' for {kind} is not offered by control '{}'",
                    names.boxes
                )));
            }
        }

        let mut seen = BTreeMap::new();
        for (field, choice) in &self.field_choices {
            if let Some(first) = seen.insert(choice, field) {
                return Err(BridgeError::Config(format!(
                    "fields '{first}' and '{field}' both map to choice '{choice}'"
                )));
            }
        }
        if let Some(field_control) = names.field() {
            for choice in self.field_choices.values() {
                if !set.has_choice(field_control, choice) {
                    return Err(BridgeError::mismatch(format!(
                        "choice '{choice}' is not offered by control '{field_control}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Rectangle label for a region kind; must be in the label set
    pub fn rect_label_for(&self, kind: RegionKind) -> Result<&str> {
        let label = self.kind_labels.get(&kind).ok_or_else(|| {
            BridgeError::mismatch(format!("block type {kind} has no rectangle label mapping"))
        })?;
        if !self.label_set.has_rect_label(&self.interface.boxes, label) {
            return Err(BridgeError::mismatch(format!(
                "rectangle label '{label}' is not offered by control '{}'",
                self.interface.boxes
            )));
        }
        Ok(label)
    }

    /// Region kind for a rectangle label found in an export
    pub fn kind_for_rect_label(&self, label: &str) -> Result<RegionKind> {
        if !self.label_set.has_rect_label(&self.interface.boxes, label) {
            return Err(BridgeError::mismatch(format!(
                "rectangle label '{label}' is not offered by control '{}'",
                self.interface.boxes
            )));
        }
        self.kind_labels
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| {
                BridgeError::mismatch(format!(
                    "rectangle label '{label}' does not map back to a block type"
                ))
            })
    }

    /// Choice value for a semantic label; fails instead of substituting
    pub fn choice_for_field<'a>(&'a self, field: &'a str) -> Result<&'a str> {
        let control = self.interface.field().ok_or_else(|| {
            BridgeError::mismatch(format!(
                "region labeled '{field}' but no field control is configured"
            ))
        })?;
        let choice = match self.field_choices.get(field) {
            Some(choice) => choice.as_str(),
            None => {
                // unmapped labels must not shadow a mapped choice
                if let Some((mapped, _)) =
                    self.field_choices.iter().find(|(_, c)| c.as_str() == field)
                {
                    return Err(BridgeError::mismatch(format!(
                        "label '{field}' is the choice value of field '{mapped}'; \
                         label the region '{mapped}' instead"
                    )));
                }
                field
            }
        };
        if !self.label_set.has_choice(control, choice) {
            return Err(BridgeError::mismatch(format!(
                "label '{choice}' is not offered by control '{control}'"
            )));
        }
        Ok(choice)
    }

    /// Semantic label for a choice found in an export
    pub fn field_for_choice<'a>(&'a self, choice: &'a str) -> Result<&'a str> {
        let control = self.interface.field().ok_or_else(|| {
            BridgeError::mismatch(format!(
                "choice '{choice}' found but no field control is configured"
            ))
        })?;
        if !self.label_set.has_choice(control, choice) {
            return Err(BridgeError::mismatch(format!(
                "label '{choice}' is not offered by control '{control}'"
            )));
        }
        Ok(self
            .field_choices
            .iter()
            .find(|(_, c)| c.as_str() == choice)
            .map(|(field, _)| field.as_str())
            .unwrap_or(choice))
    }

    /// Every choice value of the field control, sorted
    pub fn field_labels(&self) -> Vec<String> {
        self.interface
            .field()
            .and_then(|f| self.label_set.choices.get(f))
            .map(|c| c.values.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Field names the training schema may contain
    pub fn training_vocabulary(&self) -> BTreeSet<String> {
        self.field_labels()
            .iter()
            .filter_map(|c| self.field_for_choice(c).ok().map(str::to_string))
            .collect()
    }
}

/// Per-region controls share the rectangle's id in the tool's output
fn require_per_region(tag: &str, name: &str, control: &Control) -> Result<()> {
    if control.per_region {
        return Ok(());
    }
    Err(BridgeError::mismatch(format!(
        "{tag} control '{name}' must be declared with perRegion=\"true\""
    )))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const INTERFACE: &str = r#"
<View>
  <Image name="document" value="$image"/>
  <RectangleLabels name="word_boxes" toName="document">
    <Label value="_token"/>
    <Label value="_checkbox"/>
  </RectangleLabels>
  <Choices name="field" toName="document" perRegion="true">
    <Choice value="name"/>
    <Choice value="date"/>
    <Choice value="signature"/>
    <Choice value="Account Number"/>
  </Choices>
  <TextArea name="value" toName="document" perRegion="true"/>
  <TextArea name="ocr" toName="document" perRegion="true"/>
</View>"#;

    pub(crate) fn test_config() -> MappingConfig {
        let raw = BridgeConfig::from_toml(
            r#"
            [labels.fields]
            account_number = "Account Number"
            "#,
        )
        .unwrap();
        MappingConfig::new(raw, LabelSet::from_xml(INTERFACE).unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_apply() {
        let config = BridgeConfig::from_toml("").unwrap();
        assert_eq!(config.interface.boxes, "word_boxes");
        assert_eq!(config.forward.block_types, vec!["WORD"]);
        assert_eq!(config.forward.iou_threshold, 0.2);
        assert_eq!(config.reverse.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.labels.kinds["WORD"], "_token");
    }

    #[test]
    fn test_label_lookups() {
        let config = test_config();
        assert_eq!(config.rect_label_for(RegionKind::Word).unwrap(), "_token");
        assert_eq!(config.kind_for_rect_label("_token").unwrap(), RegionKind::Word);
        assert_eq!(config.choice_for_field("name").unwrap(), "name");
        assert_eq!(
            config.choice_for_field("account_number").unwrap(),
            "Account Number"
        );
        assert_eq!(
            config.field_for_choice("Account Number").unwrap(),
            "account_number"
        );
        assert!(config.training_vocabulary().contains("account_number"));
        assert!(!config.training_vocabulary().contains("Account Number"));
    }

    #[test]
    fn test_unknown_label_is_mismatch() {
        let config = test_config();
        assert!(matches!(
            config.choice_for_field("bank"),
            Err(BridgeError::ConfigurationMismatch(_))
        ));
        assert!(matches!(
            config.kind_for_rect_label("_line"),
            Err(BridgeError::ConfigurationMismatch(_))
        ));
        assert!(matches!(
            config.field_for_choice("invoice_total"),
            Err(BridgeError::ConfigurationMismatch(_))
        ));
    }

    #[test]
    fn test_choice_value_used_as_label_is_mismatch() {
        let config = test_config();
        let err = config.choice_for_field("Account Number").unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationMismatch(_)));
        assert!(err.to_string().contains("'account_number'"), "{err}");
    }

    #[test]
    fn test_label_lookups_are_inverse() {
        let config = test_config();
        for label in ["name", "date", "signature", "account_number"] {
            let choice = config.choice_for_field(label).unwrap();
            assert_eq!(config.field_for_choice(choice).unwrap(), label);
        }
    }

    #[test]
    fn test_missing_control_rejected() {
        let raw = BridgeConfig::from_toml(
            r#"
            [interface]
            boxes = "bbox"
            "#,
        )
        .unwrap();
        let err = MappingConfig::new(raw, LabelSet::from_xml(INTERFACE).unwrap()).unwrap_err();
        assert!(err.to_string().contains("'bbox'"));
    }

    #[test]
    fn test_block_type_label_must_exist() {
        let raw = BridgeConfig::from_toml(
            r#"
            [forward]
            block_types = ["WORD", "LINE"]
            "#,
        )
        .unwrap();
        let err = MappingConfig::new(raw, LabelSet::from_xml(INTERFACE).unwrap()).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationMismatch(_)));
        assert!(err.to_string().contains("_line"));
    }

    #[test]
    fn test_ambiguous_field_mapping_rejected() {
        let raw = BridgeConfig::from_toml(
            r#"
            [labels.fields]
            first_name = "name"
            full_name = "name"
            "#,
        )
        .unwrap();
        assert!(matches!(
            MappingConfig::new(raw, LabelSet::from_xml(INTERFACE).unwrap()),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_field_controls_must_be_per_region() {
        let xml = INTERFACE.replace(
            r#"<TextArea name="value" toName="document" perRegion="true"/>"#,
            r#"<TextArea name="value" toName="document"/>"#,
        );
        let raw = BridgeConfig::default();
        let err = MappingConfig::new(raw, LabelSet::from_xml(&xml).unwrap()).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationMismatch(_)));
        assert!(err.to_string().contains("'value'"), "{err}");
        assert!(err.to_string().contains("perRegion"), "{err}");
    }

    #[test]
    fn test_disabled_ocr_control_not_required() {
        let xml = INTERFACE.replace(
            r#"<TextArea name="ocr" toName="document" perRegion="true"/>"#,
            "",
        );
        let raw = BridgeConfig::from_toml(
            r#"
            [interface]
            ocr = ""
            "#,
        )
        .unwrap();
        let config = MappingConfig::new(raw, LabelSet::from_xml(&xml).unwrap()).unwrap();
        assert_eq!(config.interface.ocr(), None);
    }

    #[test]
    fn test_load_without_label_set_fails() {
        let err = MappingConfig::load(BridgeConfig::default(), None).unwrap_err();
        assert!(err.to_string().contains("No label set configured"));
    }

    #[test]
    fn test_inline_label_set_loads() {
        let raw = BridgeConfig::from_toml(
            r#"
            [interface]
            ocr = ""
            value = ""

            [label_set]
            image = "document"
            rectangles = { word_boxes = ["_token"] }
            choices = { field = ["name", "date"] }
            "#,
        )
        .unwrap();
        let config = MappingConfig::load(raw, None).unwrap();
        assert_eq!(config.field_labels(), vec!["date", "name"]);
    }

    #[test]
    fn test_shipped_sample_config_loads() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");
        let raw = BridgeConfig::from_file(dir.join("bridge.toml")).unwrap();
        let config = MappingConfig::load(raw, None).unwrap();
        assert_eq!(config.choice_for_field("invoice_date").unwrap(), "Invoice Date");
        assert!(config.training_vocabulary().contains("account_number"));
    }
}
