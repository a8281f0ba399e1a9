//! OCR bridge command-line tool
//!
//! Thin wrapper over `bridge-core`: reads inputs, runs one direction of the
//! mapping, writes the result atomically and prints warnings to stderr.

use anyhow::{bail, Context};
use bridge_core::manifest::{default_pattern, page_count, page_manifest};
use bridge_core::output::{from_value, read_json, write_json_atomic};
use bridge_core::pipeline::{
    run_stage, AcceptPredictions, Annotate, ExtractionInput, ForwardMap, LoadExtraction,
};
use bridge_core::{reverse, BridgeConfig, ImagePattern, MappingConfig, Report};
use bridge_types::{ExportedTask, Task};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ocr-bridge")]
#[command(
    version,
    about = "Convert OCR extraction output to annotation tasks and annotation exports back to training documents"
)]
struct Cli {
    /// Mapping configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Labeling interface XML, overriding the one named in the config
    #[arg(short, long, global = true)]
    interface: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build annotation tasks from an extraction document
    ToTasks {
        /// Extraction JSON (Textract response or word list)
        extraction: PathBuf,

        /// Page image reference, with `{page}` for multi-page documents.
        /// Defaults to `<stem>_{page}.png` beside `--pdf`.
        images: Option<String>,

        /// Forms-model predictions to pre-label regions with
        #[arg(long)]
        model: Option<PathBuf>,

        /// Source PDF, for the page count and the default image pattern
        #[arg(long)]
        pdf: Option<PathBuf>,

        /// Page count, when trailing pages have no OCR regions
        #[arg(long, conflicts_with = "pdf")]
        pages: Option<u32>,

        /// Output task list
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Convert an annotation export to training documents
    FromExport {
        /// Export JSON from the annotation tool
        export: PathBuf,

        /// Task list the export was annotated from
        #[arg(long)]
        tasks: PathBuf,

        /// Output training documents
        #[arg(short, long)]
        out: PathBuf,
    },

    /// List the pages of a PDF and the image each page is expected in
    Pages {
        pdf: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Produce an export that accepts every pre-populated region unchanged
    Simulate {
        tasks: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // stdout carries command output; logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_report(report: &Report) {
    if report.is_empty() {
        return;
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    eprintln!("{} warning(s)", report.warnings.len());
}

fn run(cli: Cli) -> anyhow::Result<Report> {
    match cli.command {
        Command::ToTasks {
            extraction,
            images,
            model,
            pdf,
            pages,
            out,
        } => {
            let config = load_config(cli.config.as_deref(), cli.interface.as_deref())?;
            let (pattern, page_count) = resolve_pages(images, pdf.as_deref(), pages)?;

            let input = ExtractionInput {
                name: display_name(&extraction),
                extraction: read_json(&extraction)?,
                predictions: model.as_deref().map(read_json).transpose()?,
            };
            let bundle = run_stage(
                &LoadExtraction {
                    config: &config,
                    page_count,
                },
                input,
            )?;
            let output = run_stage(
                &ForwardMap {
                    config: &config,
                    images: ImagePattern::new(pattern),
                },
                bundle,
            )?;

            write_json_atomic(&out, &output.tasks)?;
            tracing::info!(tasks = output.tasks.len(), out = %out.display(), "wrote tasks");
            Ok(output.report)
        }

        Command::FromExport {
            export,
            tasks,
            out,
        } => {
            let config = load_config(cli.config.as_deref(), cli.interface.as_deref())?;
            let exported: Vec<ExportedTask> =
                from_value(read_json(&export)?, &display_name(&export))?;
            let original: Vec<Task> = from_value(read_json(&tasks)?, &display_name(&tasks))?;

            let output = reverse::map(&exported, &original, &config)?;
            write_json_atomic(&out, &output.pages)?;
            tracing::info!(
                pages = output.pages.len(),
                out = %out.display(),
                "wrote training documents"
            );
            Ok(output.report)
        }

        Command::Pages { pdf, json } => {
            let bytes =
                std::fs::read(&pdf).with_context(|| format!("Failed to read {}", pdf.display()))?;
            let stem = pdf
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "page".into());
            let dir = pdf.parent().unwrap_or_else(|| Path::new(""));
            let manifest = page_manifest(&bytes, &stem, dir)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                for page in &manifest {
                    println!(
                        "{:>4}  {:>7.1} x {:<7.1}  {}",
                        page.page, page.width_pt, page.height_pt, page.image
                    );
                }
            }
            Ok(Report::default())
        }

        Command::Simulate { tasks, out } => {
            let original: Vec<Task> = from_value(read_json(&tasks)?, &display_name(&tasks))?;
            let annotated = run_stage(
                &Annotate {
                    annotator: AcceptPredictions,
                },
                original,
            )?;
            write_json_atomic(&out, &annotated.export)?;
            Ok(Report::default())
        }
    }
}

fn load_config(path: Option<&Path>, interface: Option<&Path>) -> anyhow::Result<MappingConfig> {
    let raw = match path {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    MappingConfig::load(raw, interface)
}

/// Image pattern and page count from the arguments, falling back to the PDF
fn resolve_pages(
    images: Option<String>,
    pdf: Option<&Path>,
    pages: Option<u32>,
) -> anyhow::Result<(String, Option<u32>)> {
    let Some(pdf) = pdf else {
        let Some(images) = images else {
            bail!("an image pattern is required unless --pdf is given");
        };
        return Ok((images, pages));
    };
    let bytes = std::fs::read(pdf).with_context(|| format!("Failed to read {}", pdf.display()))?;
    let count = page_count(&bytes)?;
    Ok((images.unwrap_or_else(|| default_pattern(pdf)), Some(count)))
}

fn display_name(path: &Path) -> String {
    path.display().to_string()
}
