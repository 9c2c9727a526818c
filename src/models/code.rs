use serde::{ Deserialize, Serialize };

use super::request::EditorContext;
use crate::llm::Provider;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodeIssue {
    pub id: String,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeMetrics {
    pub total_lines: usize,
    pub code_lines: usize,
    pub blank_lines: usize,
    pub comment_lines: usize,
    pub max_line_length: usize,
}

fn default_analysis_types() -> Vec<String> {
    ["syntax", "style", "complexity", "suggestions"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Clone, Debug, Deserialize)]
pub struct CodeAnalysisRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub context: Option<EditorContext>,
    #[serde(default = "default_analysis_types")]
    pub analysis_types: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl CodeAnalysisRequest {
    pub fn wants(&self, analysis: &str) -> bool {
        self.analysis_types.iter().any(|t| t.eq_ignore_ascii_case(analysis))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CodeAnalysisResponse {
    pub id: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub timestamp: i64,
    pub style_issues: Vec<CodeIssue>,
    pub suggestions: Vec<CodeIssue>,
    pub metrics: CodeMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub recommendations: Vec<String>,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

fn default_max_completions() -> usize {
    5
}

#[derive(Clone, Debug, Deserialize)]
pub struct CodeCompletionRequest {
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    pub language: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub context: Option<EditorContext>,
    #[serde(default = "default_max_completions")]
    pub max_completions: usize,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeCompletion {
    pub id: String,
    pub text: String,
    pub display_text: String,
    pub description: String,
    pub kind: String,
    pub score: f32,
    pub insert_text: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CodeCompletionResponse {
    pub id: String,
    pub completions: Vec<CodeCompletion>,
    pub timestamp: i64,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

fn default_language() -> String {
    "python".to_string()
}

/// Payload shared by explain, refactor, find-bugs and generate-tests.
#[derive(Clone, Debug, Deserialize)]
pub struct CodeActionRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub refactor_type: Option<String>,
    #[serde(default)]
    pub test_framework: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeAction {
    Explain,
    Refactor,
    FindBugs,
    GenerateTests,
}

#[derive(Clone, Debug, Serialize)]
pub struct CodeActionResponse {
    pub action: CodeAction,
    pub result: String,
    pub model_used: String,
    pub provider: Provider,
}
