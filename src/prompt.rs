//! Prompt templates.
//!
//! [`PromptRenderer`] owns a Handlebars registry filled once from the
//! template directory at startup; each `*.hbs` file is registered under its
//! file stem (`grounded_answer.hbs` → `"grounded_answer"`). The renderer is
//! read-only afterwards and shared across requests behind an `Arc`.
//!
//! Interpolated values are HTML-escaped (the Handlebars default). Use triple
//! braces in a template to opt out for a specific value.

use anyhow::{bail, Context, Result};
use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;

use crate::error::{RagError, RagResult};

/// Extension of template files picked up by [`PromptRenderer::load`].
pub const TEMPLATE_EXTENSION: &str = "hbs";

pub struct PromptRenderer {
    registry: Handlebars<'static>,
}

impl PromptRenderer {
    /// Register every `*.hbs` file directly inside `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Prompt template directory not found: {}", dir.display());
        }

        let mut registry = Handlebars::new();

        for entry in walkdir::WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some(TEMPLATE_EXTENSION)
            {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            registry
                .register_template_file(name, path)
                .with_context(|| format!("Failed to register template {}", path.display()))?;
            tracing::debug!(template = name, "registered prompt template");
        }

        Ok(Self { registry })
    }

    /// Names of all registered templates, sorted.
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.get_templates().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }

    /// Render a registered template with `context`.
    ///
    /// Fails with [`RagError::TemplateNotFound`] before rendering when the
    /// name is unknown.
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> RagResult<String> {
        if !self.registry.has_template(template_name) {
            return Err(RagError::TemplateNotFound(template_name.to_string()));
        }

        self.registry
            .render(template_name, context)
            .map_err(|e| RagError::TemplateRender(format!("{}: {}", template_name, e)))
    }
}

/// Newline-join chunk texts, preserving their order.
pub fn join_chunks<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    chunks.into_iter().collect::<Vec<_>>().join("\n")
}
