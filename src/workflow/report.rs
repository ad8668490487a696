//! Issue-comment formatting.
//!
//! Every comment carries the `[ADW-BOT] {workflow_id}_{agent}: ` prefix so
//! the poller can recognise and skip the bot's own messages.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::state::{WorkflowId, WorkflowState};

pub const BOT_IDENTIFIER: &str = "[ADW-BOT]";

pub fn format_issue_message(workflow_id: &WorkflowId, agent: &str, message: &str) -> String {
    format!("{} {}_{}: {}", BOT_IDENTIFIER, workflow_id, agent, message)
}

pub fn is_bot_comment(body: &str) -> bool {
    body.trim_start().starts_with(BOT_IDENTIFIER)
}

/// One entry of the test runner's JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    #[serde(default)]
    pub execution_command: String,
    #[serde(default)]
    pub test_purpose: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// `"2 of 5 tests failed: a, b"`.
pub fn summarize_test_failures(results: &[TestResult]) -> String {
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.test_name.as_str())
        .collect();
    format!(
        "{} of {} tests failed: {}",
        failed.len(),
        results.len(),
        failed.join(", ")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    Pass,
    PassWithComments,
    NeedsChanges,
    #[serde(other)]
    Unknown,
}

impl Assessment {
    fn emoji(&self) -> &'static str {
        match self {
            Assessment::Pass => "✅",
            Assessment::PassWithComments => "⚠️",
            Assessment::NeedsChanges => "❌",
            Assessment::Unknown => "❓",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Assessment::Pass => "PASS",
            Assessment::PassWithComments => "PASS WITH COMMENTS",
            Assessment::NeedsChanges => "NEEDS CHANGES",
            Assessment::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

impl Severity {
    const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::Major,
        Severity::Minor,
        Severity::Suggestion,
    ];

    fn heading(&self) -> &'static str {
        match self {
            Severity::Critical => "🚨 Critical Issues",
            Severity::Major => "⚠️ Major Issues",
            Severity::Minor => "ℹ️ Minor Issues",
            Severity::Suggestion => "💡 Suggestions",
        }
    }
}

fn default_unknown() -> String {
    "unknown".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: Severity,
    #[serde(default = "default_unknown")]
    pub file: String,
    #[serde(default)]
    pub line: Option<serde_json::Value>,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default = "default_category")]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub overall_assessment: Assessment,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ReviewReport {
    /// Report for reviewer output that was not valid JSON.
    pub fn unparsed(raw: &str) -> Self {
        Self {
            overall_assessment: Assessment::Unknown,
            summary: raw.trim().to_string(),
            strengths: Vec::new(),
            issues: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

fn line_label(line: &Option<serde_json::Value>) -> Option<String> {
    match line {
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

pub fn format_review_comment(report: &ReviewReport) -> String {
    let mut out = String::new();
    let assessment = report.overall_assessment;
    let summary = if report.summary.is_empty() {
        "No summary provided"
    } else {
        &report.summary
    };
    let _ = writeln!(out, "## {} Code Review Results\n", assessment.emoji());
    let _ = writeln!(out, "**Overall Assessment:** {}\n", assessment.label());
    let _ = writeln!(out, "### Summary\n{}\n", summary);

    if !report.strengths.is_empty() {
        let _ = writeln!(out, "### ✅ Strengths\n");
        for strength in &report.strengths {
            let _ = writeln!(out, "- {}", strength);
        }
        out.push('\n');
    }

    for severity in Severity::ALL {
        let issues: Vec<&ReviewIssue> = report
            .issues
            .iter()
            .filter(|i| i.severity == severity)
            .collect();
        if issues.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {}\n", severity.heading());
        for issue in issues {
            match line_label(&issue.line) {
                Some(line) => {
                    let _ = writeln!(out, "**{}:{}** ({})", issue.file, line, issue.category);
                }
                None => {
                    let _ = writeln!(out, "**{}** ({})", issue.file, issue.category);
                }
            }
            let desc = if issue.issue.is_empty() {
                "No description"
            } else {
                &issue.issue
            };
            let _ = writeln!(out, "- Issue: {}", desc);
            if !issue.suggestion.is_empty() {
                let _ = writeln!(out, "- Fix: {}", issue.suggestion);
            }
            out.push('\n');
        }
    }

    if !report.recommendations.is_empty() {
        let _ = writeln!(out, "### 📋 Recommendations\n");
        for rec in &report.recommendations {
            let _ = writeln!(out, "- {}", rec);
        }
        out.push('\n');
    }

    out.trim_end().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedFile {
    #[serde(default = "default_unknown")]
    pub file: String,
    #[serde(default)]
    pub changes: String,
    #[serde(default)]
    pub sections_added: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    #[serde(default = "default_unknown")]
    pub file: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationCoverage {
    #[serde(default)]
    pub functions_documented: u64,
    #[serde(default)]
    pub total_functions: u64,
    #[serde(default)]
    pub coverage_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationReport {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files_updated: Vec<UpdatedFile>,
    #[serde(default)]
    pub new_files_created: Vec<NewFile>,
    #[serde(default)]
    pub documentation_coverage: Option<DocumentationCoverage>,
}

impl DocumentationReport {
    pub fn unparsed(raw: &str) -> Self {
        Self {
            summary: raw.trim().to_string(),
            files_updated: Vec::new(),
            new_files_created: Vec::new(),
            documentation_coverage: None,
        }
    }
}

pub fn format_documentation_comment(report: &DocumentationReport) -> String {
    let mut out = String::new();
    let summary = if report.summary.is_empty() {
        "No summary provided"
    } else {
        &report.summary
    };
    let _ = writeln!(out, "## 📚 Documentation Results\n");
    let _ = writeln!(out, "### Summary\n{}\n", summary);

    if !report.files_updated.is_empty() {
        let _ = writeln!(out, "### 📝 Files Updated\n");
        for file in &report.files_updated {
            let changes = if file.changes.is_empty() {
                "No details"
            } else {
                &file.changes
            };
            let _ = writeln!(out, "**{}**\n- {}", file.file, changes);
            if !file.sections_added.is_empty() {
                let _ = writeln!(out, "- Sections added: {}", file.sections_added.join(", "));
            }
            out.push('\n');
        }
    }

    if !report.new_files_created.is_empty() {
        let _ = writeln!(out, "### ✨ New Files Created\n");
        for file in &report.new_files_created {
            let purpose = if file.purpose.is_empty() {
                "No description"
            } else {
                &file.purpose
            };
            let _ = writeln!(out, "**{}**\n- {}\n", file.file, purpose);
        }
    }

    if let Some(coverage) = &report.documentation_coverage {
        let _ = writeln!(out, "### 📊 Documentation Coverage\n");
        let _ = writeln!(
            out,
            "- Functions documented: {}/{}",
            coverage.functions_documented, coverage.total_functions
        );
        let _ = writeln!(out, "- Coverage: {}%", coverage.coverage_percentage);
    }

    out.trim_end().to_string()
}

/// Final comment for a workflow that reached DONE.
pub fn format_completion(state: &WorkflowState) -> String {
    let mut msg = format!(
        "🎉 Workflow complete for {} ({})",
        state.issue_reference, state.classification
    );
    if let Some(pr) = &state.pr_url {
        let _ = write!(msg, "\n\nPull request: {}", pr);
    }
    if state.retry_count > 0 {
        let _ = write!(msg, "\nTests passed after {} retries.", state.retry_count);
    }
    msg
}
