//! Loaded manual and its embedded images
//!
//! At most one manual is active at a time. Loading a new one replaces the
//! previous content wholesale.

mod docx;
mod images;

pub use docx::{read_document, DocumentError, DocumentParser, DocxParser};
pub use images::resolve_images;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One image extracted from a manual
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    /// Self-contained data URI (`data:<mime>;base64,...`)
    pub src: String,
    pub description: String,
}

/// Parsed manual
///
/// `images` is in document order; image N in citations is `images[N - 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualContent {
    pub text: String,
    pub images: Vec<ImageContent>,
    pub file_name: String,
}

impl ManualContent {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// Holds the active manual
#[derive(Debug, Default)]
pub struct ManualStore {
    current: Option<Arc<ManualContent>>,
}

impl ManualStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was loaded before
    pub fn load(&mut self, content: ManualContent) -> Arc<ManualContent> {
        let content = Arc::new(content);
        self.current = Some(content.clone());
        content
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<Arc<ManualContent>> {
        self.current.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }
}
