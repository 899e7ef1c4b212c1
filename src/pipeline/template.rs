//! Template Renderer
//!
//! Turns a phase's prompt template plus resolved inputs into the final
//! prompt. Placeholders are `{{name}}`; whitespace inside the braces is
//! ignored.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::mapper::{Resolved, ResolvedInputs};
use crate::method::MethodConfig;

pub const UNSET_TEXT: &str = "(not available)";

/// Render `template`, substituting each placeholder from `inputs` and then
/// from `extra` (values computed by the executor, such as a complexity tier).
pub fn render(template: &str, inputs: &ResolvedInputs, extra: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated placeholder: keep the text as-is
            out.push_str(&rest[start..]);
            return out;
        };

        let name = after[..end].trim();
        match (inputs.get(name), extra.get(name)) {
            (Some(Resolved::Value(value)), _) => out.push_str(&format_value(value)),
            (_, Some(text)) => out.push_str(text),
            _ => {
                debug!(placeholder = %name, "Template placeholder has no value");
                out.push_str(UNSET_TEXT);
            }
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Strings verbatim, everything else as pretty JSON
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => UNSET_TEXT.to_string(),
        Value::Array(items) if items.is_empty() => "(none)".to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Method-level preamble and guidelines shared by every reasoning step
pub fn preamble(config: &MethodConfig) -> String {
    let mut text = config.reasoning_preamble.trim().to_string();
    if !config.guidelines.is_empty() {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str("GUIDELINES:\n");
        for guideline in &config.guidelines {
            text.push_str(&format!("- {}\n", guideline));
        }
    }
    text
}

/// Assemble the full prompt: preamble, rendered phase body and the JSON
/// response instruction built from the phase's output schema.
pub fn build_prompt(preamble: &str, body: &str, output_schema: &Value) -> String {
    let schema = serde_json::to_string_pretty(output_schema).unwrap_or_else(|_| output_schema.to_string());
    let mut prompt = String::new();
    if !preamble.is_empty() {
        prompt.push_str(preamble.trim_end());
        prompt.push_str("\n\n");
    }
    prompt.push_str(body.trim());
    prompt.push_str(&format!(
        "\n\nOUTPUT FORMAT (respond with ONLY valid JSON matching this schema):\n{}\n\nIMPORTANT:\n- Include a numeric \"confidence\" between 0 and 1\n- Respond with ONLY the JSON object",
        schema
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> ResolvedInputs {
        let mut inputs = ResolvedInputs::new();
        inputs.insert("query".to_string(), Resolved::Value(serde_json::json!("Is coffee healthy?")));
        inputs.insert("items".to_string(), Resolved::Value(serde_json::json!(["a", "b"])));
        inputs.insert("gone".to_string(), Resolved::Unset);
        inputs
    }

    #[test]
    fn test_render_substitutes_values() {
        let rendered = render("Q: {{query}}\nI: {{ items }}", &inputs(), &BTreeMap::new());
        assert!(rendered.starts_with("Q: Is coffee healthy?"));
        assert!(rendered.contains("\"a\""));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_render_unset_and_unknown() {
        let rendered = render("{{gone}} / {{never_declared}}", &inputs(), &BTreeMap::new());
        assert_eq!(rendered, format!("{} / {}", UNSET_TEXT, UNSET_TEXT));
    }

    #[test]
    fn test_render_uses_extra_values() {
        let mut extra = BTreeMap::new();
        extra.insert("complexity".to_string(), "complex".to_string());
        assert_eq!(render("tier={{complexity}}", &inputs(), &extra), "tier=complex");
    }

    #[test]
    fn test_render_keeps_unterminated_braces() {
        assert_eq!(render("a {{query", &inputs(), &BTreeMap::new()), "a {{query");
    }

    #[test]
    fn test_build_prompt_appends_schema() {
        let prompt = build_prompt("Be rigorous.", "Body", &serde_json::json!({ "type": "object" }));
        assert!(prompt.starts_with("Be rigorous."));
        assert!(prompt.contains("Body"));
        assert!(prompt.contains("\"type\": \"object\""));
    }

    #[test]
    fn test_preamble_lists_guidelines() {
        let config = MethodConfig::builtin().unwrap();
        let text = preamble(&config);
        assert!(text.contains("GUIDELINES:"));
        assert!(text.contains("- Cite the retrieved evidence"));
    }
}
