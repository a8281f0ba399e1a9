//! Shared data model for the OCR ⇄ annotation bridge
//!
//! Three JSON shapes meet here: the extraction document produced by the OCR /
//! forms pipeline, the annotation tool's task and export documents, and the
//! training-schema document consumed by the retraining pipeline. All geometry
//! is carried internally as [`NormBox`].

pub mod geometry;
pub mod source;
pub mod task;
pub mod training;

pub use geometry::{NormBox, PercentRect, PixelBox, SourceGeometry};
pub use source::{
    ExtractionDocument, GeometricRegion, PageRegions, Prediction, RegionKind, TextractBlock,
    TextractDocument,
};
pub use task::{
    Annotation, ExportedTask, ResultItem, ResultType, ResultValue, Task, TaskData, TaskPrediction,
};
pub use training::{Provenance, TrainingItem, TrainingPage};
