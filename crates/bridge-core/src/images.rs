//! Page image references
//!
//! Images come from the external rasterizer and follow a per-page naming
//! convention, given here as a template with a `{page}` placeholder
//! (`{page:03}` zero-pads). Local files must exist; remote references
//! (URLs, tool-served `/data/...` paths) are taken on trust.

use crate::error::{BridgeError, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::path::Path;

lazy_static! {
    /// `{page}` or `{page:NN}` / `{page:0NN}`
    static ref PAGE_PLACEHOLDER: Regex = Regex::new(r"\{page(?::0?(\d+))?\}").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePattern {
    template: String,
}

impl ImagePattern {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Whether the pattern varies per page
    pub fn is_template(&self) -> bool {
        PAGE_PLACEHOLDER.is_match(&self.template)
    }

    /// Image reference for a 1-based page index
    pub fn resolve(&self, page: u32) -> String {
        PAGE_PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures<'_>| {
                match caps.get(1).and_then(|w| w.as_str().parse::<usize>().ok()) {
                    Some(width) => format!("{page:0width$}"),
                    None => page.to_string(),
                }
            })
            .into_owned()
    }
}

/// Whether a reference points somewhere the bridge cannot check
pub fn is_remote(reference: &str) -> bool {
    reference.contains("://") || reference.starts_with("/data/") || reference.starts_with("data:")
}

/// A located page image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page: u32,
    pub reference: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Locate the image of one page, probing local files for pixel dimensions
pub fn locate(pattern: &ImagePattern, page: u32) -> Result<PageImage> {
    let reference = pattern.resolve(page);
    if is_remote(&reference) {
        return Ok(PageImage {
            page,
            reference,
            width: None,
            height: None,
        });
    }

    let path = Path::new(&reference);
    if !path.is_file() {
        return Err(BridgeError::MissingResource {
            path: path.to_path_buf(),
        });
    }
    let (width, height) = match image::image_dimensions(path) {
        Ok((w, h)) => (Some(w), Some(h)),
        Err(e) => {
            tracing::warn!(page, image = %reference, error = %e, "could not read image dimensions");
            (None, None)
        }
    };
    Ok(PageImage {
        page,
        reference,
        width,
        height,
    })
}

/// Locate every page image; a single missing page fails the whole set
pub fn locate_all(pattern: &ImagePattern, pages: &[u32]) -> Result<Vec<PageImage>> {
    if pages.len() > 1 && !pattern.is_template() {
        return Err(BridgeError::mismatch(format!(
            "image reference '{}' has no {{page}} placeholder but the document has {} pages",
            pattern.as_str(),
            pages.len()
        )));
    }
    pages.iter().map(|&page| locate(pattern, page)).collect()
}
