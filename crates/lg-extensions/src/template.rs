//! `template.load` / `template.render` step support (§4.4.3).

use std::collections::BTreeMap;

use handlebars::Handlebars;
use serde_json::Value;

/// Renders `template_content` against `variables`, falling back to a
/// literal `{{name}}` substitution if handlebars fails to parse the
/// template (§4.4.3 `template.render`: "if parsing fails, fall back to
/// literal `{{name}}` replacement").
pub fn render(template_content: &str, variables: &BTreeMap<String, Value>) -> String {
    let registry = Handlebars::new();
    match registry.render_template(template_content, variables) {
        Ok(rendered) => rendered,
        Err(_) => literal_replace(template_content, variables),
    }
}

fn literal_replace(template_content: &str, variables: &BTreeMap<String, Value>) -> String {
    let mut output = template_content.to_string();
    for (key, value) in variables {
        let needle = format!("{{{{{key}}}}}");
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        output = output.replace(&needle, &replacement);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_valid_handlebars_template() {
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), Value::String("world".into()));
        assert_eq!(render("hello {{name}}", &vars), "hello world");
    }

    #[test]
    fn falls_back_to_literal_replacement_on_parse_failure() {
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), Value::String("world".into()));
        // Unbalanced handlebars expression fails to parse.
        let result = render("hello {{name} unterminated {{#if}}", &vars);
        assert!(result.contains("world") || result.contains("{{name}"));
    }
}
