//! Named processing stages with typed boundaries
//!
//! `LoadExtraction -> ForwardMap -> Annotate -> ReverseMap`. The annotation
//! step is performed by people in the external tool; [`Annotator`] stands in
//! for it so the whole round trip can be driven in-process.

use crate::config::MappingConfig;
use crate::error::Result;
use crate::forward::{self, ForwardOutput};
use crate::images::{locate_all, ImagePattern};
use crate::reverse::{self, ReverseOutput};
use crate::source::{parse_extraction, parse_predictions};
use bridge_types::{Annotation, ExportedTask, ExtractionDocument, Prediction, Task};
use serde_json::Value;

pub trait Stage {
    const NAME: &'static str;
    type Input;
    type Output;

    fn run(&self, input: Self::Input) -> Result<Self::Output>;
}

/// Run one stage inside its own tracing span
pub fn run_stage<S: Stage>(stage: &S, input: S::Input) -> Result<S::Output> {
    let span = tracing::info_span!("stage", name = S::NAME);
    let _guard = span.enter();
    tracing::debug!("stage started");
    let output = stage.run(input);
    match &output {
        Ok(_) => tracing::debug!("stage finished"),
        Err(e) => tracing::error!(error = %e, "stage failed"),
    }
    output
}

/// Raw extraction JSON plus optional forms-model output
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub name: String,
    pub extraction: Value,
    pub predictions: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct SourceBundle {
    pub document: ExtractionDocument,
    pub predictions: Vec<Prediction>,
}

pub struct LoadExtraction<'a> {
    pub config: &'a MappingConfig,
    /// Page count known from elsewhere (the PDF), so empty trailing pages
    /// still get tasks
    pub page_count: Option<u32>,
}

impl Stage for LoadExtraction<'_> {
    const NAME: &'static str = "load_extraction";
    type Input = ExtractionInput;
    type Output = SourceBundle;

    fn run(&self, input: ExtractionInput) -> Result<SourceBundle> {
        let document =
            parse_extraction(&input.extraction, self.config, &input.name, self.page_count)?;
        let predictions = match &input.predictions {
            Some(json) => parse_predictions(json, &input.name)?,
            None => Vec::new(),
        };
        tracing::info!(
            pages = document.pages.len(),
            regions = document.region_count(),
            predictions = predictions.len(),
            "loaded extraction"
        );
        Ok(SourceBundle {
            document,
            predictions,
        })
    }
}

pub struct ForwardMap<'a> {
    pub config: &'a MappingConfig,
    pub images: ImagePattern,
}

impl Stage for ForwardMap<'_> {
    const NAME: &'static str = "forward_map";
    type Input = SourceBundle;
    type Output = ForwardOutput;

    fn run(&self, input: SourceBundle) -> Result<ForwardOutput> {
        let pages: Vec<u32> = input.document.pages.iter().map(|p| p.page).collect();
        let images = locate_all(&self.images, &pages)?;
        forward::map(&input.document, &input.predictions, &images, self.config)
    }
}

/// Whoever turns tasks into an export: annotators in the tool, or a stand-in
pub trait Annotator {
    fn annotate(&self, tasks: &[Task]) -> Result<Vec<ExportedTask>>;
}

impl<F> Annotator for F
where
    F: Fn(&[Task]) -> Result<Vec<ExportedTask>>,
{
    fn annotate(&self, tasks: &[Task]) -> Result<Vec<ExportedTask>> {
        self(tasks)
    }
}

/// Accepts every pre-populated region as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptPredictions;

impl Annotator for AcceptPredictions {
    fn annotate(&self, tasks: &[Task]) -> Result<Vec<ExportedTask>> {
        Ok(tasks
            .iter()
            .enumerate()
            .map(|(i, task)| {
                let id = i as u64 + 1;
                ExportedTask {
                    id: Some(id),
                    data: task.data.clone(),
                    annotations: vec![Annotation {
                        id: Some(id),
                        result: task
                            .predictions
                            .first()
                            .map(|p| p.result.clone())
                            .unwrap_or_default(),
                        was_cancelled: false,
                        updated_at: None,
                    }],
                }
            })
            .collect())
    }
}

/// Tasks as created, next to what came back from annotation
#[derive(Debug, Clone)]
pub struct AnnotatedTasks {
    pub original: Vec<Task>,
    pub export: Vec<ExportedTask>,
}

pub struct Annotate<A> {
    pub annotator: A,
}

impl<A: Annotator> Stage for Annotate<A> {
    const NAME: &'static str = "annotate";
    type Input = Vec<Task>;
    type Output = AnnotatedTasks;

    fn run(&self, tasks: Vec<Task>) -> Result<AnnotatedTasks> {
        let export = self.annotator.annotate(&tasks)?;
        Ok(AnnotatedTasks {
            original: tasks,
            export,
        })
    }
}

pub struct ReverseMap<'a> {
    pub config: &'a MappingConfig,
}

impl Stage for ReverseMap<'_> {
    const NAME: &'static str = "reverse_map";
    type Input = AnnotatedTasks;
    type Output = ReverseOutput;

    fn run(&self, input: AnnotatedTasks) -> Result<ReverseOutput> {
        reverse::map(&input.export, &input.original, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use bridge_types::Provenance;
    use serde_json::json;

    #[test]
    fn test_accepting_predictions_round_trips_as_ocr() {
        let config = test_config();
        let input = ExtractionInput {
            name: "scan.json".into(),
            extraction: json!([
                {"page": 1, "text": "Jane", "bbox": {"left": 0.1, "top": 0.1, "width": 0.2, "height": 0.05}, "label": "name"},
                {"page": 1, "text": "Doe", "left": 0.35, "top": 0.1, "width": 0.2, "height": 0.05}
            ]),
            predictions: None,
        };

        let load = LoadExtraction {
            config: &config,
            page_count: Some(2),
        };
        let bundle = run_stage(&load, input).unwrap();
        let forward = run_stage(
            &ForwardMap {
                config: &config,
                images: ImagePattern::new("https://cdn.example.com/scan_{page}.png"),
            },
            bundle,
        )
        .unwrap();
        assert_eq!(forward.tasks.len(), 2);

        let annotate = Annotate {
            annotator: AcceptPredictions,
        };
        let annotated = run_stage(&annotate, forward.tasks).unwrap();
        let training = run_stage(&ReverseMap { config: &config }, annotated).unwrap();

        assert_eq!(training.pages.len(), 2);
        let items = &training.pages[0].items;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.provenance == Provenance::Ocr));
        assert_eq!(items[0].key.as_deref(), Some("name"));
        assert_eq!(items[0].value, "Jane");
        assert!(training.pages[1].items.is_empty());
    }

    #[test]
    fn test_closure_annotator() {
        let drop_all = |tasks: &[Task]| -> Result<Vec<ExportedTask>> {
            let mut export = AcceptPredictions.annotate(tasks)?;
            for task in &mut export {
                task.annotations.clear();
            }
            Ok(export)
        };
        let annotated = Annotate { annotator: drop_all }.run(vec![]).unwrap();
        assert!(annotated.export.is_empty());
    }
}
