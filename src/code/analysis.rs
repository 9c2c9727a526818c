use serde_json::Value;
use uuid::Uuid;

use crate::models::code::{ CodeIssue, CodeMetrics, Severity };

pub const MAX_LINE_LENGTH: usize = 120;

pub fn comment_prefixes(language: &str) -> &'static [&'static str] {
    match language.to_lowercase().as_str() {
        "python" | "ruby" | "shell" | "bash" | "yaml" | "toml" | "perl" | "r" => &["#"],
        "sql" | "lua" | "haskell" => &["--"],
        "html" | "xml" | "markdown" => &["<!--"],
        _ => &["//", "/*", "*/", "* "],
    }
}

fn is_comment(trimmed: &str, prefixes: &[&str]) -> bool {
    trimmed == "*" || prefixes.iter().any(|p| trimmed.starts_with(p))
}

pub fn compute_metrics(code: &str, language: &str) -> CodeMetrics {
    let prefixes = comment_prefixes(language);
    let mut metrics = CodeMetrics::default();

    for line in code.lines() {
        metrics.total_lines += 1;
        metrics.max_line_length = metrics.max_line_length.max(line.chars().count());
        let trimmed = line.trim();
        if trimmed.is_empty() {
            metrics.blank_lines += 1;
        } else if is_comment(trimmed, prefixes) {
            metrics.comment_lines += 1;
        } else {
            metrics.code_lines += 1;
        }
    }
    metrics
}

fn issue(line: usize, severity: Severity, rule: &str, message: String) -> CodeIssue {
    CodeIssue {
        id: Uuid::new_v4().to_string(),
        line,
        column: None,
        severity,
        message,
        rule: Some(rule.to_string()),
        category: Some("style".to_string()),
    }
}

pub fn style_issues(code: &str) -> Vec<CodeIssue> {
    let mut issues = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        let line_no = idx + 1;
        let len = line.chars().count();
        if len > MAX_LINE_LENGTH {
            issues.push(
                issue(line_no, Severity::Info, "line-length", format!("Line too long ({} characters)", len))
            );
        }
        if line.trim_end() != line {
            issues.push(issue(line_no, Severity::Info, "trailing-whitespace", "Trailing whitespace".into()));
        }
        for marker in ["TODO", "FIXME"] {
            if let Some(col) = line.find(marker) {
                let mut found = issue(line_no, Severity::Info, "todo-comment", format!("{} marker", marker));
                found.column = Some(line[..col].chars().count() + 1);
                issues.push(found);
            }
        }
        let indent: String = line
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect();
        if indent.contains(' ') && indent.contains('\t') {
            issues.push(
                issue(line_no, Severity::Warning, "mixed-indentation", "Tabs mixed with spaces in indentation".into())
            );
        }
    }
    issues
}

/// What the model returned for an analysis prompt.
#[derive(Debug, Default, PartialEq)]
pub struct AiInsights {
    pub summary: Option<String>,
    pub recommendations: Vec<String>,
    pub issues: Vec<String>,
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items|
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        )
        .unwrap_or_default()
}

/// Reads the `{summary, recommendations, issues}` object out of a model reply,
/// tolerating surrounding prose or code fences. Unstructured replies become the summary.
pub fn parse_ai_insights(reply: &str) -> AiInsights {
    let parsed = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if end > start => serde_json::from_str::<Value>(&reply[start..=end]).ok(),
        _ => None,
    };

    match parsed {
        Some(json) =>
            AiInsights {
                summary: json.get("summary").and_then(Value::as_str).map(str::to_string),
                recommendations: string_list(json.get("recommendations")),
                issues: string_list(json.get("issues")),
            },
        None => {
            let text = reply.trim();
            AiInsights {
                summary: if text.is_empty() { None } else { Some(text.to_string()) },
                ..Default::default()
            }
        }
    }
}

/// Turns the model's free-text issue list into [`CodeIssue`]s without line info.
pub fn insights_to_issues(issues: &[String]) -> Vec<CodeIssue> {
    issues
        .iter()
        .map(|message| CodeIssue {
            id: Uuid::new_v4().to_string(),
            line: 1,
            column: None,
            severity: Severity::Info,
            message: message.clone(),
            rule: None,
            category: Some("ai_suggestion".to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_line_kinds() {
        let code = "# header\nimport os\n\n    \nx = 1  # trailing\n";
        let metrics = compute_metrics(code, "python");
        assert_eq!(metrics, CodeMetrics {
            total_lines: 5,
            code_lines: 2,
            blank_lines: 2,
            comment_lines: 1,
            max_line_length: 17,
        });

        let rust = compute_metrics("// doc\n/* block\n * more\n */\nfn main() {}", "rust");
        assert_eq!(rust.comment_lines, 4);
        assert_eq!(rust.code_lines, 1);
    }

    #[test]
    fn flags_style_problems() {
        let long = "x".repeat(MAX_LINE_LENGTH + 1);
        let code = format!("ok\n{}\nvalue = 1 \n# TODO: fix\n \tmixed", long);
        let issues = style_issues(&code);
        let rules: Vec<(usize, &str)> = issues
            .iter()
            .map(|i| (i.line, i.rule.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(rules, vec![
            (2, "line-length"),
            (3, "trailing-whitespace"),
            (4, "todo-comment"),
            (5, "mixed-indentation")
        ]);
        assert_eq!(issues[2].column, Some(3));
        assert_eq!(issues[3].severity, Severity::Warning);
    }

    #[test]
    fn parses_fenced_json_insights() {
        let reply =
            "Here you go:\n```json\n{\"summary\":\"Adds numbers\",\"recommendations\":[\"Add types\"],\"issues\":[\"No overflow check\"]}\n```";
        let insights = parse_ai_insights(reply);
        assert_eq!(insights.summary.as_deref(), Some("Adds numbers"));
        assert_eq!(insights.recommendations, vec!["Add types"]);
        assert_eq!(insights_to_issues(&insights.issues)[0].message, "No overflow check");
    }

    #[test]
    fn prose_reply_becomes_summary() {
        let insights = parse_ai_insights("Looks fine overall.");
        assert_eq!(insights.summary.as_deref(), Some("Looks fine overall."));
        assert!(insights.recommendations.is_empty());
    }
}
