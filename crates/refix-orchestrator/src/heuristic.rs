//! Line-based static analyzer that needs no external tooling

use async_trait::async_trait;
use refix_core::{RefixError, Result};
use std::path::Path;

use crate::collaborators::{AnalyzerReport, StaticAnalyzer};

/// Files longer than this are flagged
const LONG_FILE_THRESHOLD_LINES: usize = 100;

/// Functions longer than this are flagged
const COMPLEX_FUNCTION_THRESHOLD_LINES: usize = 50;

/// In-process analyzer for Python sources
///
/// Flags bare `except:` clauses, `print()` without a logging import, TODO
/// comments, long functions and long files. The score starts at 10 and
/// drops by one per issue.
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze source text directly
    pub fn analyze_source(&self, source: &str) -> Result<AnalyzerReport> {
        if source.trim().is_empty() {
            return Err(RefixError::Analyzer("cannot analyze empty artifact".to_string()));
        }

        let lines: Vec<&str> = source.lines().collect();
        let mut messages = Vec::new();

        if lines.iter().any(|l| is_bare_except(l)) {
            messages.push(
                "Bare except clause found (bad practice - catches all exceptions)".to_string(),
            );
        }

        let uses_logging = lines.iter().any(|l| {
            let l = l.trim_start();
            l.starts_with("import logging") || l.starts_with("from logging")
        });
        let uses_print = lines.iter().any(|l| {
            let code = strip_comment(l);
            code.contains("print(") && !code.contains(".print(")
        });
        if uses_print && !uses_logging {
            messages.push("Using print() statements without logging module".to_string());
        }

        if lines.iter().any(|l| {
            let l = l.trim_start();
            l.starts_with('#') && l.to_uppercase().contains("TODO")
        }) {
            messages.push("TODO comments found - incomplete implementation".to_string());
        }

        for (name, length) in function_lengths(&lines) {
            if length > COMPLEX_FUNCTION_THRESHOLD_LINES {
                messages.push(format!(
                    "Complex function '{}' ({} lines) - consider refactoring",
                    name, length
                ));
            }
        }

        if lines.len() > LONG_FILE_THRESHOLD_LINES {
            messages.push(format!(
                "File is long ({} lines), consider splitting into modules",
                lines.len()
            ));
        }

        let score = (10.0 - messages.len() as f64).max(0.0);
        Ok(AnalyzerReport { score, messages })
    }
}

#[async_trait]
impl StaticAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, artifact: &Path) -> Result<AnalyzerReport> {
        let source = tokio::fs::read_to_string(artifact).await?;
        self.analyze_source(&source)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

fn is_bare_except(line: &str) -> bool {
    let code = strip_comment(line).trim();
    code == "except:" || code.starts_with("except:")
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// `(name, body lines)` for every `def`, nested ones included
fn function_lengths(lines: &[&str]) -> Vec<(String, usize)> {
    let mut functions = Vec::new();

    for (start, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed
            .strip_prefix("def ")
            .or_else(|| trimmed.strip_prefix("async def "))
        else {
            continue;
        };
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let indent = indent_of(line);

        let mut end = start + 1;
        while end < lines.len() {
            let next = lines[end];
            if !next.trim().is_empty() && indent_of(next) <= indent {
                break;
            }
            end += 1;
        }
        // Trailing blank lines belong to the gap, not the function
        while end > start + 1 && lines[end - 1].trim().is_empty() {
            end -= 1;
        }

        functions.push((name, end - start));
    }

    functions
}
