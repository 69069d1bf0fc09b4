use std::collections::HashMap;

/// Placeholder name for the workflow's initial input.
pub const INPUT_REF: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Ref(String),
}

/// A parsed step input template, e.g. `"Critique this:\n{{draft}}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    segments: Vec<Segment>,
}

impl InputBinding {
    /// Parse a template. Placeholders are `{{name}}`; whitespace inside the
    /// braces is ignored.
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| format!("unclosed placeholder at byte {}", template.len() - rest.len() + start))?;
            let name = after[..end].trim();
            if name.is_empty() {
                return Err("empty placeholder".to_string());
            }
            if name.contains("{{") {
                return Err(format!("nested placeholder in '{}'", name));
            }
            segments.push(Segment::Ref(name.to_string()));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Referenced names in order of appearance (may repeat).
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Ref(name) => Some(name.as_str()),
            Segment::Text(_) => None,
        })
    }

    /// Substitute placeholders. Returns the first name with no value.
    pub fn render(&self, input: &str, outputs: &HashMap<String, String>) -> Result<String, String> {
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Ref(name) if name == INPUT_REF => rendered.push_str(input),
                Segment::Ref(name) => match outputs.get(name) {
                    Some(value) => rendered.push_str(value),
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(rendered)
    }
}

/// Input for a step without a template: the workflow input for roots, the
/// single dependency's output, or all dependency outputs separated by blank lines.
pub fn default_input(workflow_input: &str, dependency_outputs: &[&str]) -> String {
    match dependency_outputs {
        [] => workflow_input.to_string(),
        [only] => only.to_string(),
        many => many.join("\n\n"),
    }
}
