use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Malformed input in {context}: {message}")]
    MalformedInput { context: String, message: String },

    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    #[error("Missing resource: {}", .path.display())]
    MissingResource { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read or write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read PDF: {0}")]
    Pdf(String),
}

impl BridgeError {
    pub fn malformed(context: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::MalformedInput {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn mismatch(message: impl Into<String>) -> Self {
        BridgeError::ConfigurationMismatch(message.into())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Non-fatal problems, reported next to a successful output
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Zero, negative or non-finite extent; region dropped
    Degenerate,
    /// Region lies outside the page; region dropped
    OutOfBounds,
    /// Rotated rectangle replaced by its axis-aligned bounds
    RotationNormalized,
    /// Exported task carries no completed annotation; task skipped
    UnannotatedTask,
    /// Model prediction could not be placed on any region
    UnmatchedPrediction,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub page: u32,
    pub region: String,
    pub message: String,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "page {} region {}: {}",
            self.page, self.region, self.message
        )
    }
}

/// Warnings accumulated over one invocation
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Report {
    pub warnings: Vec<Warning>,
}

impl Report {
    pub fn warn(
        &mut self,
        kind: WarningKind,
        page: u32,
        region: impl Into<String>,
        message: impl Into<String>,
    ) {
        let warning = Warning {
            kind,
            page,
            region: region.into(),
            message: message.into(),
        };
        tracing::warn!(kind = ?warning.kind, "{}", warning);
        self.warnings.push(warning);
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}
