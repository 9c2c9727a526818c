use uuid::Uuid;

use super::analysis::comment_prefixes;
use crate::models::code::{ CodeCompletion, CodeCompletionRequest };

pub const MAX_COMPLETIONS: usize = 10;
const DISPLAY_CHARS: usize = 50;

fn python_context(prefix: &str) -> Vec<String> {
    let mut imports = Vec::new();
    let mut current_class = None;
    let mut current_function = None;

    for line in prefix.lines() {
        let stripped = line.trim();
        if stripped.starts_with("import ") || stripped.starts_with("from ") {
            imports.push(stripped);
        } else if let Some(rest) = stripped.strip_prefix("class ") {
            let name = rest.split(|c: char| c == '(' || c == ':').next().unwrap_or("").trim();
            current_class = Some(name);
        } else if let Some(rest) = stripped.strip_prefix("def ") {
            current_function = rest.split('(').next().map(str::trim);
        }
    }

    let mut parts = Vec::new();
    if !imports.is_empty() {
        let shown: Vec<&str> = imports.into_iter().take(5).collect();
        parts.push(format!("Available imports: {}", shown.join(", ")));
    }
    if let Some(class) = current_class.filter(|c| !c.is_empty()) {
        parts.push(format!("Current class: {}", class));
    }
    if let Some(function) = current_function.filter(|f| !f.is_empty()) {
        parts.push(format!("Current function: {}", function));
    }
    parts
}

fn javascript_context(prefix: &str) -> Vec<String> {
    let mut parts = Vec::new();
    if prefix.contains("function") {
        parts.push("JavaScript function context".to_string());
    }
    if prefix.contains("class") {
        parts.push("JavaScript class context".to_string());
    }
    if prefix.contains("import") || prefix.contains("require") {
        parts.push("Module import context".to_string());
    }
    parts
}

fn typescript_context(prefix: &str) -> Vec<String> {
    let mut parts = Vec::new();
    if prefix.contains("interface") {
        parts.push("TypeScript interface context".to_string());
    }
    if prefix.contains("type") {
        parts.push("TypeScript type definition context".to_string());
    }
    parts.extend(javascript_context(prefix));
    parts
}

/// Language hints, file path and project info fed into the completion prompt.
pub fn build_completion_context(request: &CodeCompletionRequest) -> String {
    let mut parts = match request.language.to_lowercase().as_str() {
        "python" => python_context(&request.prefix),
        "javascript" => javascript_context(&request.prefix),
        "typescript" => typescript_context(&request.prefix),
        _ => Vec::new(),
    };

    if let Some(path) = request.file_path.as_deref().filter(|p| !p.is_empty()) {
        parts.push(format!("File: {}", path));
    }
    if let Some(ctx) = &request.context {
        if let Some(project_type) = ctx.project_type() {
            parts.push(format!("Project type: {}", project_type));
        }
        let deps = ctx.dependencies();
        if !deps.is_empty() {
            let shown: Vec<&str> = deps.into_iter().take(5).collect();
            parts.push(format!("Dependencies: {}", shown.join(", ")));
        }
    }
    parts.join("\n")
}

fn metadata_value(metadata: &str, key: &str) -> Option<String> {
    metadata
        .lines()
        .find_map(|line| line.split_once(key).map(|(_, v)| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

/// Parses `COMPLETION_START ... COMPLETION_END` blocks with their
/// `DESCRIPTION:` and `KIND:` lines. Earlier blocks score higher.
pub fn parse_completions(reply: &str, max_completions: usize) -> Vec<CodeCompletion> {
    let limit = max_completions.clamp(1, MAX_COMPLETIONS);
    let mut completions = Vec::new();

    for (i, block) in reply.split("COMPLETION_START").skip(1).enumerate() {
        let Some((body, metadata)) = block.split_once("COMPLETION_END") else {
            continue;
        };
        let text = body.trim();
        if text.is_empty() {
            continue;
        }

        let display_text = if text.chars().count() > DISPLAY_CHARS {
            format!("{}...", text.chars().take(DISPLAY_CHARS).collect::<String>())
        } else {
            text.to_string()
        };

        completions.push(CodeCompletion {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            display_text,
            description: metadata_value(metadata, "DESCRIPTION:").unwrap_or_default(),
            kind: metadata_value(metadata, "KIND:").unwrap_or_else(|| "snippet".to_string()),
            score: (1.0 - 0.15 * (i as f32)).max(0.1),
            insert_text: text.to_string(),
        });
        if completions.len() == limit {
            break;
        }
    }
    completions
}

/// Returned when the model's reply contained no usable completion.
pub fn placeholder_completion(language: &str) -> CodeCompletion {
    let prefix = comment_prefixes(language).first().copied().unwrap_or("//");
    let text = format!("{} AI completion unavailable", prefix);
    CodeCompletion {
        id: Uuid::new_v4().to_string(),
        text: text.clone(),
        display_text: "AI completion unavailable".to_string(),
        description: "Unable to generate completion".to_string(),
        kind: "comment".to_string(),
        score: 0.1,
        insert_text: text,
    }
}
