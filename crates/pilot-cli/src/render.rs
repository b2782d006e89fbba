use console::style;
use pilot::models::content::ToolUse;
use pilot::models::tool::ToolResult;
use serde_json::Value;

pub const PROMPT: &str = "\x1b[1m\x1b[38;5;30m(o)> \x1b[0m";
const MAX_STRING_LENGTH: usize = 40;
const INDENT: &str = "    ";

pub fn print_text(text: &str) {
    println!("{}", text);
}

pub fn print_tool_use(tool_use: &ToolUse) {
    let action = tool_use
        .input
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("call");

    println!();
    println!(
        "─── {} | {} ──────────────────────────",
        style(action),
        style(&tool_use.name).magenta().dim(),
    );
    if let Value::Object(map) = &tool_use.input {
        let params: serde_json::Map<String, Value> = map
            .iter()
            .filter(|(key, _)| key.as_str() != "action")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        print_params(&Value::Object(params), 0);
    } else {
        print_params(&tool_use.input, 0);
    }
}

pub fn print_tool_result(result: &ToolResult) {
    if let Some(system) = &result.system {
        println!("{}", style(system).dim());
    }
    if let Some(output) = result.output.as_deref().filter(|o| !o.is_empty()) {
        println!("{}", output);
    }
    if let Some(error) = &result.error {
        println!("{}", style(error).red());
    }
    if result.base64_image.is_some() {
        println!("{}", style("[screenshot]").dim());
    }
}

pub fn print_warning(message: &str) {
    println!("{} {}", style("warning:").yellow().bold(), message);
}

/// Shorten long strings to their first characters
fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_STRING_LENGTH {
        let head: String = s.chars().take(MAX_STRING_LENGTH).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Format and print parameters recursively with proper indentation and colors
fn print_params(value: &Value, depth: usize) {
    let indent = INDENT.repeat(depth);

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) => {
                        println!("{}{}:", indent, style(key).dim());
                        print_params(val, depth + 1);
                    }
                    Value::Array(arr) if arr.iter().all(|v| v.is_number()) => {
                        let items: Vec<String> = arr.iter().map(|v| v.to_string()).collect();
                        println!(
                            "{}{}: {}",
                            indent,
                            style(key).dim(),
                            style(format!("[{}]", items.join(", "))).blue()
                        );
                    }
                    Value::Array(arr) => {
                        println!("{}{}:", indent, style(key).dim());
                        for item in arr.iter() {
                            println!("{}{}- ", indent, INDENT);
                            print_params(item, depth + 2);
                        }
                    }
                    Value::String(s) => {
                        println!("{}{}: {}", indent, style(key).dim(), style(truncate(s)).green());
                    }
                    Value::Number(n) => {
                        println!("{}{}: {}", indent, style(key).dim(), style(n).blue());
                    }
                    Value::Bool(b) => {
                        println!("{}{}: {}", indent, style(key).dim(), style(b).blue());
                    }
                    Value::Null => {
                        println!("{}{}: {}", indent, style(key).dim(), style("null").dim());
                    }
                }
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("{}{}.", indent, i + 1);
                print_params(item, depth + 1);
            }
        }
        Value::String(s) => println!("{}{}", indent, style(truncate(s)).green()),
        Value::Number(n) => println!("{}{}", indent, style(n).yellow()),
        Value::Bool(b) => println!("{}{}", indent, style(b).yellow()),
        Value::Null => println!("{}{}", indent, style("null").dim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short"), "short");
        let long = "a".repeat(50);
        assert_eq!(truncate(&long), format!("{}...", "a".repeat(40)));
    }
}
