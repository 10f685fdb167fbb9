//! Tool catalog entries and parameter checking

use super::{Params, ToolCall};
use serde_json::Value;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    /// Coerce a parsed value into this kind.
    ///
    /// Parameter values arrive either JSON-decoded or as raw text, so scalars
    /// written as text are converted and a bare string is accepted where an
    /// array is expected.
    fn normalize(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (ParamKind::String, Value::String(s)) => Some(Value::String(s)),
            (ParamKind::String, Value::Null) => Some(Value::String(String::new())),
            (ParamKind::String, other) => Some(Value::String(other.to_string())),

            (ParamKind::Number, Value::Number(n)) => Some(Value::Number(n)),
            (ParamKind::Number, Value::String(s)) => {
                let text = s.trim();
                match text.parse::<i64>() {
                    Ok(n) => Some(Value::from(n)),
                    Err(_) => text
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number),
                }
            }

            (ParamKind::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            (ParamKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(Value::Bool(true)),
                "false" | "no" => Some(Value::Bool(false)),
                _ => None,
            },

            (ParamKind::Array, Value::Array(items)) => Some(Value::Array(items)),
            (ParamKind::Array, Value::String(s)) => Some(Value::Array(vec![Value::String(s)])),

            (ParamKind::Object, Value::Object(map)) => Some(Value::Object(map)),

            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

impl ToolParameter {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Catalog entry shown to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub usage: String,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            usage: String::new(),
        }
    }

    pub fn param(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn usage(mut self, usage: &str) -> Self {
        self.usage = usage.to_string();
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Markdown block for the system prompt
    pub fn render(&self) -> String {
        let mut out = format!("## {}\nDescription: {}\n", self.name, self.description);
        if !self.parameters.is_empty() {
            out.push_str("Parameters:\n");
            for p in &self.parameters {
                let _ = writeln!(
                    out,
                    "- {}: ({}, {}) {}",
                    p.name,
                    if p.required { "required" } else { "optional" },
                    p.kind.as_str(),
                    p.description
                );
            }
        }
        if !self.usage.is_empty() {
            let _ = write!(out, "Usage:\n{}\n", self.usage.trim_end());
        }
        out
    }

    /// Check a parsed call against this definition and coerce its values.
    ///
    /// Parameters the definition does not name are passed through untouched.
    pub fn validate(&self, call: &ToolCall) -> Result<ToolCall, String> {
        let mut params: Params = call.params.clone();

        for p in &self.parameters {
            // `<limit></limit>` means "not given" for anything but text
            let value = params
                .remove(&p.name)
                .filter(|v| p.kind == ParamKind::String || v.as_str().map_or(true, |s| !s.trim().is_empty()));

            match value {
                Some(value) => {
                    let normalized = p.kind.normalize(value).ok_or_else(|| {
                        format!(
                            "Parameter '{}' of tool '{}' must be of type {}",
                            p.name,
                            self.name,
                            p.kind.as_str()
                        )
                    })?;
                    params.insert(p.name.clone(), normalized);
                }
                None if p.required => {
                    return Err(format!(
                        "Missing required parameter '{}' for tool '{}'",
                        p.name, self.name
                    ));
                }
                None => {}
            }
        }

        Ok(ToolCall {
            name: call.name.clone(),
            params,
            raw: call.raw.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> ToolDefinition {
        ToolDefinition::new("grep_search", "Search notes")
            .param(ToolParameter::required("query", ParamKind::String, "Text to find"))
            .param(ToolParameter::optional("limit", ParamKind::Number, "Max hits"))
            .param(ToolParameter::optional("regex", ParamKind::Boolean, "Treat query as regex"))
            .param(ToolParameter::optional("paths", ParamKind::Array, "Scope"))
            .usage("<grep_search>\n<query>todo</query>\n</grep_search>")
    }

    fn call(params: Value) -> ToolCall {
        ToolCall::new("grep_search", params.as_object().cloned().unwrap())
    }

    #[test]
    fn test_render_lists_parameters() {
        let text = definition().render();
        assert!(text.starts_with("## grep_search\n"));
        assert!(text.contains("- query: (required, string) Text to find"));
        assert!(text.contains("- limit: (optional, number) Max hits"));
        assert!(text.contains("Usage:\n<grep_search>"));
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = definition().validate(&call(json!({"limit": 3}))).unwrap_err();
        assert_eq!(err, "Missing required parameter 'query' for tool 'grep_search'");
    }

    #[test]
    fn test_scalars_are_normalized() {
        let checked = definition()
            .validate(&call(json!({
                "query": 42,
                "limit": "5",
                "regex": "TRUE",
                "paths": "daily"
            })))
            .unwrap();

        assert_eq!(checked.params["query"], json!("42"));
        assert_eq!(checked.params["limit"], json!(5));
        assert_eq!(checked.params["regex"], json!(true));
        assert_eq!(checked.params["paths"], json!(["daily"]));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let err = definition()
            .validate(&call(json!({"query": "x", "regex": "maybe"})))
            .unwrap_err();
        assert!(err.contains("'regex'"));
        assert!(err.contains("boolean"));
    }

    #[test]
    fn test_empty_optional_value_is_dropped() {
        let checked = definition()
            .validate(&call(json!({"query": "x", "limit": ""})))
            .unwrap();
        assert!(!checked.params.contains_key("limit"));
    }

    #[test]
    fn test_unknown_parameters_pass_through() {
        let checked = definition()
            .validate(&call(json!({"query": "x", "extra": [1, 2]})))
            .unwrap();
        assert_eq!(checked.params["extra"], json!([1, 2]));
        assert_eq!(checked.name, "grep_search");
    }
}
