//! Mail body templates
//!
//! Templates are looked up in the override directory first (`<name>.hbs`)
//! and fall back to the copies compiled into the binary.

use std::path::PathBuf;
use std::sync::LazyLock;

use handlebars::Handlebars;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::NotifyError;

pub const CHANGES_MAIL: &str = include_str!("../../templates/changes_mail.hbs");
pub const CHANGES_MAIL_TEXT: &str = include_str!("../../templates/changes_mail_text.hbs");

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("blank line pattern is valid"));

/// Get the embedded template by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "changes_mail" => Some(CHANGES_MAIL),
        "changes_mail_text" => Some(CHANGES_MAIL_TEXT),
        _ => None,
    }
}

/// Squeeze the blank lines left behind by block helpers down to single ones
fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUNS.replace_all(text, "\n\n").trim().to_string() + "\n"
}

/// Renders the HTML and plain-text mail bodies
pub struct TemplateRenderer {
    html: Handlebars<'static>,
    text: Handlebars<'static>,
    override_dir: Option<PathBuf>,
}

impl TemplateRenderer {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        debug!(?override_dir, "TemplateRenderer::new: called");
        let mut text = Handlebars::new();
        text.register_escape_fn(handlebars::no_escape);

        Self {
            html: Handlebars::new(),
            text,
            override_dir,
        }
    }

    /// Renderer that only uses the compiled-in templates
    pub fn embedded_only() -> Self {
        Self::new(None)
    }

    fn load_template(&self, name: &str) -> Result<String, NotifyError> {
        debug!(%name, "TemplateRenderer::load_template: called");
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{}.hbs", name));
            if path.is_file() {
                debug!(?path, "TemplateRenderer::load_template: using override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| NotifyError::Template(format!("Failed to read {}: {}", path.display(), e)));
            }
        }

        get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| NotifyError::Template(format!("Template not found: {}", name)))
    }

    /// Render an HTML template; values are HTML-escaped
    pub fn render_html<T: Serialize>(&self, name: &str, context: &T) -> Result<String, NotifyError> {
        let template = self.load_template(name)?;
        self.html
            .render_template(&template, context)
            .map_err(|e| NotifyError::Template(format!("Failed to render {}: {}", name, e)))
    }

    /// Render a plain-text template without escaping
    pub fn render_text<T: Serialize>(&self, name: &str, context: &T) -> Result<String, NotifyError> {
        let template = self.load_template(name)?;
        let rendered = self
            .text
            .render_template(&template, context)
            .map_err(|e| NotifyError::Template(format!("Failed to render {}: {}", name, e)))?;
        Ok(collapse_blank_lines(&rendered))
    }
}
