//! Template renderer collaborator.
//!
//! The pipeline hands a resolved prompt template plus its argument map to a
//! [`TemplateRenderer`]. The default [`PlaceholderRenderer`] substitutes
//! `{{name}}` placeholders and leaves unknown ones untouched so missing
//! arguments stay visible in the output.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::EngineError;

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, args: &HashMap<String, String>) -> Result<String, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct PlaceholderRenderer;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}")
            .unwrap_or_else(|e| panic!("invalid placeholder regex: {}", e))
    })
}

impl PlaceholderRenderer {
    /// Placeholder names referenced by a template, in order of appearance.
    pub fn placeholders(template: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in placeholder_regex().captures_iter(template) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, args: &HashMap<String, String>) -> Result<String, EngineError> {
        let rendered = placeholder_regex().replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            args.get(key)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        Ok(rendered.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let mut args = HashMap::new();
        args.insert("topic".to_string(), "ownership".to_string());
        let out = PlaceholderRenderer
            .render("Explain {{ topic }} then {{missing}}.", &args)
            .unwrap();
        assert_eq!(out, "Explain ownership then {{missing}}.");
    }

    #[test]
    fn test_placeholders_listed_once() {
        let names = PlaceholderRenderer::placeholders("{{a}} {{b}} {{a}}");
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
