//! Text templating applied to fetched documents before parsing.
//!
//! Documents are Go `text/template` sources rendered with `gtmpl`. Dot is
//! the `BuildInfo` of the current host, so `{{.Hostname}}`, pipelines and
//! the standard builtins all work. Referencing any other field is an error.

mod build_info;
mod render;

pub use build_info::{BuildInfo, IMAGE_ID_ENV, STAGE_ENV};
pub use render::render;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template parse failed: {0}")]
    Parse(String),

    #[error("template references undefined field .{0}")]
    UndefinedField(String),

    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("document is not valid UTF-8 (first invalid byte at {0})")]
    NotUtf8(usize),
}

/// Render `data` against `build`. Without build info the bytes pass through
/// untouched.
pub fn process(data: &[u8], build: Option<&BuildInfo>) -> Result<Vec<u8>, TemplateError> {
    let Some(info) = build else {
        return Ok(data.to_vec());
    };
    let text = std::str::from_utf8(data).map_err(|e| TemplateError::NotUtf8(e.valid_up_to()))?;
    render(text, info).map(String::into_bytes)
}
