use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use log::info;

#[derive(Debug)]
pub enum PromptError {
    TemplateNotFound(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::TemplateNotFound(key) => write!(f, "Prompt template '{}' not found", key),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

pub const SYSTEM_PREAMBLE: &str = "system_preamble";
pub const COMPLETION_SYSTEM: &str = "completion_system";
pub const COMPLETION: &str = "completion";
pub const ANALYSIS_SYSTEM: &str = "analysis_system";
pub const ANALYSIS: &str = "analysis";
pub const EXPLAIN: &str = "explain";
pub const REFACTOR_IMPROVE: &str = "refactor_improve";
pub const REFACTOR_EXTRACT_METHOD: &str = "refactor_extract_method";
pub const REFACTOR_SIMPLIFY: &str = "refactor_simplify";
pub const REFACTOR_OPTIMIZE: &str = "refactor_optimize";
pub const FIND_BUGS: &str = "find_bugs";
pub const GENERATE_TESTS: &str = "generate_tests";

const REQUIRED: [&str; 12] = [
    SYSTEM_PREAMBLE,
    COMPLETION_SYSTEM,
    COMPLETION,
    ANALYSIS_SYSTEM,
    ANALYSIS,
    EXPLAIN,
    REFACTOR_IMPROVE,
    REFACTOR_EXTRACT_METHOD,
    REFACTOR_SIMPLIFY,
    REFACTOR_OPTIMIZE,
    FIND_BUGS,
    GENERATE_TESTS,
];

const BUILTIN: [(&str, &str); 12] = [
    (
        SYSTEM_PREAMBLE,
        "You are an AI assistant integrated into a code editor.\n\
         Help the user with coding tasks, explanations, and improvements.\n\
         Provide clear, concise, and helpful responses.\n\
         When discussing code, use proper formatting and explain your reasoning.",
    ),
    (COMPLETION_SYSTEM, "You are an expert {language} developer providing code completions."),
    (
        COMPLETION,
        "Complete the following {language} code. Provide {max_completions} different completion options.\n\n\
         Context:\n{context}\n\n\
         Code before cursor:\n```{language}\n{prefix}\n```\n\n\
         Code after cursor:\n```{language}\n{suffix}\n```\n\n\
         Provide completions that:\n\
         1. Are syntactically correct\n\
         2. Follow best practices for {language}\n\
         3. Are contextually appropriate\n\
         4. Vary in complexity and approach\n\n\
         Format each completion as:\n\
         COMPLETION_START\n[completion text]\nCOMPLETION_END\n\
         DESCRIPTION: [brief description]\n\
         KIND: [function|variable|class|method|keyword|snippet]",
    ),
    (
        ANALYSIS_SYSTEM,
        "You are a code analysis expert. Provide constructive feedback on code quality, performance, and best practices.",
    ),
    (
        ANALYSIS,
        "Analyze this {language} code and provide specific improvement suggestions:\n\n\
         ```{language}\n{code}\n```\n\n\
         Please provide:\n\
         1. A brief summary of what the code does\n\
         2. 3-5 specific improvement suggestions\n\
         3. Any potential bugs or issues you notice\n\n\
         Format your response as JSON with keys: summary, recommendations, issues",
    ),
    (EXPLAIN, "Please explain what this {language} code does:\n\n```{language}\n{code}\n```"),
    (
        REFACTOR_IMPROVE,
        "Please suggest improvements for this code, focusing on readability, performance, and best practices:\n\n\
         ```{language}\n{code}\n```",
    ),
    (
        REFACTOR_EXTRACT_METHOD,
        "Please suggest how to extract methods from this code to improve modularity:\n\n```{language}\n{code}\n```",
    ),
    (
        REFACTOR_SIMPLIFY,
        "Please suggest ways to simplify this code while maintaining functionality:\n\n```{language}\n{code}\n```",
    ),
    (
        REFACTOR_OPTIMIZE,
        "Please suggest optimizations for this code to improve performance:\n\n```{language}\n{code}\n```",
    ),
    (
        FIND_BUGS,
        "Please analyze this {language} code for potential bugs, errors, or issues:\n\n```{language}\n{code}\n```",
    ),
    (
        GENERATE_TESTS,
        "Please generate {test_framework} unit tests for this {language} code:\n\n```{language}\n{code}\n```",
    ),
];

#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    pub templates: HashMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            templates: BUILTIN.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        for key in REQUIRED {
            if !self.templates.contains_key(key) {
                return Err(PromptError::TemplateNotFound(key.to_string()));
            }
        }
        Ok(())
    }

    /// Built-in templates with any entries from `json` layered on top.
    pub fn from_json(json: &str) -> Result<Self, PromptError> {
        let overrides: PromptConfig = serde_json::from_str(json)?;
        let mut config = Self::default();
        config.templates.extend(overrides.templates);
        config.validate()?;
        Ok(config)
    }

    pub fn template(&self, key: &str) -> Result<&str, PromptError> {
        self.templates
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| PromptError::TemplateNotFound(key.to_string()))
    }

    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        Ok(render_template(self.template(key)?, vars))
    }
}

pub fn load_prompts(path: Option<&str>) -> Result<PromptConfig, PromptError> {
    match path {
        Some(path) => {
            let file_content = fs::read_to_string(path)?;
            let config = PromptConfig::from_json(&file_content)?;
            info!("Loaded {} prompt templates from {}", config.templates.len(), path);
            Ok(config)
        }
        None => Ok(PromptConfig::default()),
    }
}

/// Replaces `{name}` placeholders in one pass, so braces inside substituted
/// values (code snippets, JSON) are never expanded again. Unknown
/// placeholders are left untouched.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}');
        let name = close.map(|c| &after[..c]);

        match name.and_then(|n| vars.iter().find(|(k, _)| *k == n)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &after[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_single_pass() {
        let rendered = render_template("Explain {language}: {code} {missing}", &[
            ("language", "rust"),
            ("code", "fn f() -> {language} {}"),
        ]);
        assert_eq!(rendered, "Explain rust: fn f() -> {language} {} {missing}");
    }

    #[test]
    fn builtins_are_complete() {
        let config = PromptConfig::default();
        assert!(config.validate().is_ok());
        let prompt = config
            .render(GENERATE_TESTS, &[
                ("language", "python"),
                ("code", "def f(): pass"),
                ("test_framework", "pytest"),
            ])
            .unwrap();
        assert!(prompt.starts_with("Please generate pytest unit tests for this python code"));
    }

    #[test]
    fn json_overrides_builtins() {
        let config = PromptConfig::from_json(r#"{"templates":{"explain":"Explain {code}"}}"#).unwrap();
        assert_eq!(config.template(EXPLAIN).unwrap(), "Explain {code}");
        assert!(config.template(FIND_BUGS).unwrap().contains("potential bugs"));
        assert!(matches!(config.template("nope"), Err(PromptError::TemplateNotFound(_))));
    }
}
