//! Tool-namespace rendering into the textual form embedded in system and
//! developer messages.
//!
//! Namespaces render as TypeScript-flavoured declaration blocks; tool
//! parameter schemas are transliterated from JSON Schema. The output is
//! deterministic: object keys appear in schema source order (`serde_json`
//! is built with `preserve_order`), and nothing is sorted.

use indexmap::IndexMap;
use serde_json::Value;

use crate::chat::{ToolDescription, ToolNamespaceConfig};

/// Render the full `# Tools` section for a set of namespaces.
pub fn render_tools_section(tools: &IndexMap<String, ToolNamespaceConfig>) -> String {
    let mut out = String::from("# Tools");
    for ns_config in tools.values() {
        out.push_str("\n\n");
        out.push_str(&render_namespace(ns_config));
    }
    out
}

/// Render one namespace block.
fn render_namespace(ns: &ToolNamespaceConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!("## {}\n\n", ns.name));
    if let Some(description) = &ns.description {
        for line in description.lines() {
            out.push_str(&format!("// {line}\n"));
        }
    }
    out.push_str(&format!("namespace {} {{\n\n", ns.name));
    for tool in &ns.tools {
        out.push_str(&render_tool(tool));
        out.push_str("\n\n");
    }
    out.push_str(&format!("}} // namespace {}", ns.name));
    out
}

/// Render one tool declaration.
fn render_tool(tool: &ToolDescription) -> String {
    let mut out = String::new();
    for line in tool.description.lines() {
        out.push_str(&format!("// {line}\n"));
    }
    match &tool.parameters {
        Some(schema) => {
            let params = json_schema_to_typescript(schema, "");
            out.push_str(&format!("type {} = (_: {}) => any;", tool.name, params));
        }
        None => out.push_str(&format!("type {} = () => any;", tool.name)),
    }
    out
}

/// Transliterate a JSON Schema into a TypeScript-ish type string.
///
/// `indent` is the indentation of the surrounding context; nested object
/// fields indent one level further.
pub fn json_schema_to_typescript(schema: &Value, indent: &str) -> String {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        let variants: Vec<String> = values.iter().map(render_json_literal).collect();
        return variants.join(" | ");
    }

    match schema.get("type") {
        Some(Value::Array(types)) => {
            let variants: Vec<String> = types
                .iter()
                .map(|t| scalar_type_name(t.as_str().unwrap_or("any")).to_string())
                .collect();
            variants.join(" | ")
        }
        Some(Value::String(ty)) => match ty.as_str() {
            "object" => render_object(schema, indent),
            "array" => {
                let item_type = schema
                    .get("items")
                    .map(|items| json_schema_to_typescript(items, indent))
                    .unwrap_or_else(|| "any".to_string());
                format!("{item_type}[]")
            }
            other => scalar_type_name(other).to_string(),
        },
        _ => "any".to_string(),
    }
}

fn scalar_type_name(ty: &str) -> &str {
    match ty {
        "string" => "string",
        "number" | "integer" => "number",
        "boolean" => "boolean",
        "null" => "null",
        _ => "any",
    }
}

/// Render an `object` schema: one field per line, `?` for optional fields,
/// trailing `// default: …` comments.
fn render_object(schema: &Value, indent: &str) -> String {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return "object".to_string();
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let field_indent = format!("{indent}  ");
    let mut out = String::from("{\n");
    for (name, prop) in properties {
        if let Some(description) = prop.get("description").and_then(Value::as_str) {
            for line in description.lines() {
                out.push_str(&format!("{field_indent}// {line}\n"));
            }
        }
        let optional = if required.contains(&name.as_str()) {
            ""
        } else {
            "?"
        };
        let field_type = json_schema_to_typescript(prop, &field_indent);
        out.push_str(&format!("{field_indent}{name}{optional}: {field_type},"));
        if let Some(default) = prop.get("default") {
            out.push_str(&format!(" // default: {}", render_json_literal(default)));
        }
        out.push('\n');
    }
    out.push_str(&format!("{indent}}}"));
    out
}

fn render_json_literal(value: &Value) -> String {
    // serde_json renders strings quoted, which is exactly the enum form.
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_types() {
        assert_eq!(json_schema_to_typescript(&json!({"type": "string"}), ""), "string");
        assert_eq!(json_schema_to_typescript(&json!({"type": "integer"}), ""), "number");
        assert_eq!(json_schema_to_typescript(&json!({"type": "boolean"}), ""), "boolean");
    }

    #[test]
    fn test_enum_renders_quoted_union() {
        let schema = json!({"type": "string", "enum": ["celsius", "fahrenheit"]});
        assert_eq!(
            json_schema_to_typescript(&schema, ""),
            "\"celsius\" | \"fahrenheit\""
        );
    }

    #[test]
    fn test_type_union() {
        let schema = json!({"type": ["number", "string"]});
        assert_eq!(json_schema_to_typescript(&schema, ""), "number | string");
    }

    #[test]
    fn test_array_of_strings() {
        let schema = json!({"type": "array", "items": {"type": "string"}});
        assert_eq!(json_schema_to_typescript(&schema, ""), "string[]");
    }

    #[test]
    fn test_object_fields_keep_source_order() {
        let schema = json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "topn": {"type": "number", "default": 10},
                "source": {"type": "string"}
            },
            "required": ["query"]
        });
        let rendered = json_schema_to_typescript(&schema, "");
        assert_eq!(
            rendered,
            "{\n  query: string,\n  topn?: number, // default: 10\n  source?: string,\n}"
        );
    }

    #[test]
    fn test_field_descriptions_precede_fields() {
        let schema = json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city and state, e.g. San Francisco, CA"
                }
            },
            "required": ["location"]
        });
        let rendered = json_schema_to_typescript(&schema, "");
        assert_eq!(
            rendered,
            "{\n  // The city and state, e.g. San Francisco, CA\n  location: string,\n}"
        );
    }

    #[test]
    fn test_nested_object_indents() {
        let schema = json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": {
                        "kind": {"type": "string"}
                    }
                }
            }
        });
        let rendered = json_schema_to_typescript(&schema, "");
        assert_eq!(
            rendered,
            "{\n  filter?: {\n    kind?: string,\n  },\n}"
        );
    }

    #[test]
    fn test_tool_without_parameters() {
        let tool = ToolDescription::new("reset", "Clears all state.", None);
        assert_eq!(render_tool(&tool), "// Clears all state.\ntype reset = () => any;");
    }

    #[test]
    fn test_namespace_block_shape() {
        let ns = ToolNamespaceConfig::new(
            "functions",
            None,
            vec![ToolDescription::new(
                "get_weather",
                "Gets the current weather.",
                Some(json!({
                    "type": "object",
                    "properties": {"location": {"type": "string"}},
                    "required": ["location"]
                })),
            )],
        );
        let mut tools = IndexMap::new();
        tools.insert(ns.name.clone(), ns);
        let rendered = render_tools_section(&tools);
        let expected = "# Tools\n\n\
            ## functions\n\n\
            namespace functions {\n\n\
            // Gets the current weather.\n\
            type get_weather = (_: {\n  location: string,\n}) => any;\n\n\
            } // namespace functions";
        assert_eq!(rendered, expected);
    }
}
