//! Schema bridge between OCR extraction output and an annotation tool
//!
//! The forward direction turns extraction documents into pre-populated
//! annotation tasks, one per page. The reverse direction turns the tool's
//! export into training documents, recording which regions annotators
//! accepted, edited or added.
//!
//! Both directions share one [`MappingConfig`]: the label set read from the
//! tool's labeling interface plus the mapping between extraction block types,
//! field names and tool labels.

pub mod align;
pub mod config;
pub mod error;
pub mod forward;
pub mod geometry;
pub mod images;
pub mod label_set;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod reverse;
pub mod source;
pub mod validate;

pub use config::{BridgeConfig, MappingConfig};
pub use error::{BridgeError, Report, Result, Warning, WarningKind};
pub use forward::ForwardOutput;
pub use images::{ImagePattern, PageImage};
pub use label_set::LabelSet;
pub use manifest::{page_manifest, ManifestPage};
pub use output::{read_json, write_json_atomic};
pub use pipeline::{AcceptPredictions, Annotator, Stage};
pub use reverse::ReverseOutput;
pub use source::{parse_extraction, parse_predictions};
