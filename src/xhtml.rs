//! XHTML content documents and the text of their `id`-addressed fragments.

use std::collections::HashMap;

use html2text::render::text_renderer::TrivialDecorator;

use crate::error::{PrepareError, Result};
use crate::markup;

// Wide enough that html2text never wraps a fragment
const RENDER_WIDTH: usize = 10_000;

/// Where an `id`-carrying element starts its content.
#[derive(Debug, Clone)]
struct Anchor {
    name: String,
    body_start: usize,
    self_closing: bool,
}

/// A content document, scanned once; fragments are looked up by `id`.
#[derive(Debug, Clone)]
pub struct ContentDocument {
    path: String,
    source: String,
    anchors: HashMap<String, Anchor>,
}

impl ContentDocument {
    pub fn new(path: &str, source: &str) -> Self {
        let source = markup::strip_comments(source).into_owned();

        let mut anchors = HashMap::new();
        for tag in markup::tags(&source).filter(|tag| !tag.closing) {
            if let Some(id) = tag.attr("id") {
                // first occurrence wins for duplicate ids
                anchors.entry(id).or_insert_with(|| Anchor {
                    name: tag.name.to_string(),
                    body_start: tag.end,
                    self_closing: tag.self_closing,
                });
            }
        }

        Self {
            path: path.to_string(),
            source,
            anchors,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of elements addressable by `id`.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Plain text of the element carrying `id="<fragment>"`, including the
    /// text of nested elements, with whitespace collapsed.
    pub fn fragment_text(&self, fragment: &str) -> Result<String> {
        let anchor = self
            .anchors
            .get(fragment)
            .ok_or_else(|| PrepareError::Fragment {
                document: self.path.clone(),
                fragment: fragment.to_string(),
            })?;
        if anchor.self_closing {
            return Ok(String::new());
        }

        let inner = markup::element_body(&self.source, &anchor.name, anchor.body_start)
            .ok_or_else(|| PrepareError::Content {
                document: self.path.clone(),
                message: format!("element #{} is never closed", fragment),
            })?;

        Ok(markup_to_text(inner))
    }
}

/// Render an XHTML snippet to a single line of plain text.
pub fn markup_to_text(snippet: &str) -> String {
    if !snippet.contains('<') && !snippet.contains('&') {
        return collapse_whitespace(snippet);
    }

    let rendered = html2text::from_read_with_decorator(
        snippet.as_bytes(),
        RENDER_WIDTH,
        TrivialDecorator::new(),
    );
    collapse_whitespace(&rendered)
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
