//! Label set of the annotation tool's labeling interface
//!
//! The interface is an XML template maintained in the tool itself. Only the
//! controls the bridge talks to are read: `Image`, `RectangleLabels` /
//! `Rectangle`, `Choices` and `TextArea`.

use crate::error::{BridgeError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// One labeling control and the values it offers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Control {
    pub to_name: Option<String>,
    pub per_region: bool,
    pub values: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    pub images: BTreeSet<String>,
    pub rectangles: BTreeMap<String, Control>,
    pub choices: BTreeMap<String, Control>,
    pub textareas: BTreeMap<String, Control>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Rectangles,
    Choices,
}

impl LabelSet {
    /// Parse the tool's XML labeling config
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut set = LabelSet::default();
        let mut open: Option<(Open, String)> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    if let Some(control) = set.add_control(&e)? {
                        open = Some(control);
                    } else {
                        set.add_value(&e, open.as_ref())?;
                    }
                }
                Ok(Event::Empty(e)) => {
                    if set.add_control(&e)?.is_none() {
                        set.add_value(&e, open.as_ref())?;
                    }
                }
                Ok(Event::End(e)) => {
                    let name = e.name();
                    if matches!(name.as_ref(), b"RectangleLabels" | b"Choices") {
                        open = None;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(BridgeError::Config(format!(
                        "labeling config is not valid XML at position {}: {e}",
                        reader.buffer_position()
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        if set.images.is_empty() {
            return Err(BridgeError::Config(
                "labeling config declares no <Image> object".into(),
            ));
        }
        Ok(set)
    }

    /// Registers a control tag. Returns the control to attach nested values
    /// to when it is a labels/choices container.
    fn add_control(&mut self, e: &BytesStart<'_>) -> Result<Option<(Open, String)>> {
        let tag = e.name();
        let tag = tag.as_ref();
        if !matches!(
            tag,
            b"Image" | b"RectangleLabels" | b"Rectangle" | b"Choices" | b"TextArea"
        ) {
            return Ok(None);
        }
        let attrs = attributes(e)?;
        let tag_name = String::from_utf8_lossy(tag).to_string();
        let name = attrs.get("name").cloned().ok_or_else(|| {
            BridgeError::Config(format!("<{tag_name}> in labeling config has no name"))
        })?;
        let control = Control {
            to_name: attrs.get("toName").cloned(),
            per_region: attrs
                .get("perRegion")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            values: BTreeSet::new(),
        };

        match tag {
            b"Image" => {
                self.images.insert(name);
                Ok(None)
            }
            b"RectangleLabels" => {
                self.rectangles.insert(name.clone(), control);
                Ok(Some((Open::Rectangles, name)))
            }
            b"Rectangle" => {
                self.rectangles.insert(name, control);
                Ok(None)
            }
            b"Choices" => {
                self.choices.insert(name.clone(), control);
                Ok(Some((Open::Choices, name)))
            }
            _ => {
                self.textareas.insert(name, control);
                Ok(None)
            }
        }
    }

    fn add_value(&mut self, e: &BytesStart<'_>, open: Option<&(Open, String)>) -> Result<()> {
        let Some((kind, control)) = open else {
            return Ok(());
        };
        let expected: &[u8] = match kind {
            Open::Rectangles => b"Label",
            Open::Choices => b"Choice",
        };
        if e.name().as_ref() != expected {
            return Ok(());
        }
        let attrs = attributes(e)?;
        let Some(value) = attrs.get("value").cloned() else {
            return Err(BridgeError::Config(format!(
                "value-less label inside control '{control}'"
            )));
        };
        let target = match kind {
            Open::Rectangles => self.rectangles.get_mut(control),
            Open::Choices => self.choices.get_mut(control),
        };
        if let Some(target) = target {
            target.values.insert(value);
        }
        Ok(())
    }

    pub fn has_rect_label(&self, control: &str, label: &str) -> bool {
        self.rectangles
            .get(control)
            .is_some_and(|c| c.values.contains(label))
    }

    pub fn has_choice(&self, control: &str, choice: &str) -> bool {
        self.choices
            .get(control)
            .is_some_and(|c| c.values.contains(choice))
    }
}

fn attributes(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|err| BridgeError::Config(format!("bad XML attribute: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| BridgeError::Config(format!("bad XML attribute value: {err}")))?;
        out.insert(key, value.into_owned());
    }
    Ok(out)
}

/// Inline alternative to the XML template, for `[label_set]` in the TOML
/// config
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelSetSpec {
    pub image: String,
    #[serde(default)]
    pub rectangles: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub choices: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub textareas: Vec<String>,
}

impl From<LabelSetSpec> for LabelSet {
    fn from(spec: LabelSetSpec) -> Self {
        let to_name = Some(spec.image.clone());
        let control = |values: Vec<String>, per_region: bool| Control {
            to_name: to_name.clone(),
            per_region,
            values: values.into_iter().collect(),
        };
        LabelSet {
            images: BTreeSet::from([spec.image.clone()]),
            rectangles: spec
                .rectangles
                .into_iter()
                .map(|(name, labels)| (name, control(labels, false)))
                .collect(),
            choices: spec
                .choices
                .into_iter()
                .map(|(name, values)| (name, control(values, true)))
                .collect(),
            textareas: spec
                .textareas
                .into_iter()
                .map(|name| (name, control(Vec::new(), true)))
                .collect(),
        }
    }
}
