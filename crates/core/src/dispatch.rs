// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatch envelope: the contract a planner lane sends to kick off a
//! worker run, and the completion contract a worker lane sends back.

use crate::error::CoreError;
use crate::ids::{AgentSessionId, RunId};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn repo_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("static regex"))
}

fn branch_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^jarvis-[A-Za-z0-9._/-]+$").expect("static regex"))
}

fn session_id_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9._:-]{1,128}$").expect("static regex"))
}

/// Case-insensitive screenshot/image-analysis tool-capture directive. Planner
/// and worker text must never ask for or report one of these: browser
/// evidence is supposed to come from executing tools, not from screenshots.
fn screenshot_directive_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"(?i)\b(screenshot|screen[- ]?capture|image[- ]?analysis|analyz(e|ing)[- ]?image|capture[- ]?(the[- ]?)?screen)\b",
        )
        .expect("static regex")
    })
}

fn valid_id_shape(s: &str, max_len: usize) -> bool {
    !s.is_empty() && s.len() <= max_len && !s.chars().any(|c| c.is_whitespace())
}

/// Conservative "safe git ref" check for `base_branch`: no whitespace, no
/// `..`, no leading `-` or `/`, no trailing `/` or `.lock`, none of git's
/// reserved ref characters.
fn is_safe_git_ref(s: &str) -> bool {
    !s.is_empty()
        && !s.contains("..")
        && !s.starts_with('/')
        && !s.starts_with('-')
        && !s.ends_with('/')
        && !s.ends_with(".lock")
        && !s
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
}

/// What kind of work a dispatch envelope is asking a worker lane to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Analyze,
    Implement,
    Fix,
    Refactor,
    Test,
    Release,
    Research,
    Code,
}

/// Whether the worker should start a fresh agent session or continue an
/// existing one named by `session_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextIntent {
    Fresh,
    Continue,
}

/// Declares which fields the worker's completion message must carry, beyond
/// the contract's own mandatory fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputContract {
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub browser_evidence_required: bool,
}

/// The JSON payload a planner lane dispatches to a worker lane to start a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchEnvelope {
    pub run_id: RunId,
    pub task_type: TaskType,
    pub context_intent: ContextIntent,
    pub input: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub acceptance_tests: Vec<String>,
    #[serde(default)]
    pub output_contract: OutputContract,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<AgentSessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_impacting: Option<bool>,
}

const REQUIRED_OUTPUT_FIELDS: [&str; 6] =
    ["run_id", "branch", "commit_sha", "files_changed", "test_result", "risk"];

impl DispatchEnvelope {
    /// Structural validation only (regex shapes, required combinations).
    /// Session-routing validity (does `session_id` belong to a reachable
    /// worker, is the run_id actually unique) requires a persistence lookup
    /// and is deliberately not performed here.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !valid_id_shape(self.run_id.as_str(), 64) {
            return Err(CoreError::InvalidField {
                field: "run_id",
                reason: "must be non-empty, contain no whitespace, and be at most 64 chars"
                    .to_string(),
            });
        }

        if self.context_intent == ContextIntent::Fresh && self.session_id.is_some() {
            return Err(CoreError::InvalidField {
                field: "session_id",
                reason: "must be absent when context_intent is fresh".to_string(),
            });
        }
        if let Some(session_id) = &self.session_id {
            if !session_id_re().is_match(session_id.as_str()) {
                return Err(CoreError::InvalidField {
                    field: "session_id",
                    reason: format!("does not match {}", session_id_re().as_str()),
                });
            }
        }
        if let Some(parent_run_id) = &self.parent_run_id {
            if !valid_id_shape(parent_run_id.as_str(), 64) {
                return Err(CoreError::InvalidField {
                    field: "parent_run_id",
                    reason: "must be non-empty, contain no whitespace, and be at most 64 chars"
                        .to_string(),
                });
            }
        }

        if self.input.trim().is_empty() {
            return Err(CoreError::InvalidField {
                field: "input",
                reason: "must not be empty".to_string(),
            });
        }
        if screenshot_directive_re().is_match(&self.input) {
            return Err(CoreError::InvalidField {
                field: "input",
                reason: "must not contain a screenshot-capture directive".to_string(),
            });
        }

        if let Some(repo) = &self.repo {
            if !repo_re().is_match(repo) {
                return Err(CoreError::InvalidField {
                    field: "repo",
                    reason: format!("does not match {}", repo_re().as_str()),
                });
            }
        }

        if !branch_re().is_match(&self.branch) {
            return Err(CoreError::InvalidField {
                field: "branch",
                reason: format!("does not match {}", branch_re().as_str()),
            });
        }
        if let Some(base_branch) = &self.base_branch {
            if !is_safe_git_ref(base_branch) {
                return Err(CoreError::InvalidField {
                    field: "base_branch",
                    reason: "must be a safe git ref".to_string(),
                });
            }
        }

        if self.acceptance_tests.is_empty() {
            return Err(CoreError::InvalidField {
                field: "acceptance_tests",
                reason: "must not be empty".to_string(),
            });
        }
        for test in &self.acceptance_tests {
            if test.trim().is_empty() {
                return Err(CoreError::InvalidField {
                    field: "acceptance_tests",
                    reason: "entries must not be empty".to_string(),
                });
            }
            if screenshot_directive_re().is_match(test) {
                return Err(CoreError::InvalidField {
                    field: "acceptance_tests",
                    reason: "entries must not contain a screenshot-capture directive".to_string(),
                });
            }
        }

        let required = &self.output_contract.required_fields;
        if required.is_empty() {
            return Err(CoreError::InvalidField {
                field: "output_contract.required_fields",
                reason: "must not be empty".to_string(),
            });
        }
        for field in REQUIRED_OUTPUT_FIELDS {
            if !required.iter().any(|f| f == field) {
                return Err(CoreError::InvalidField {
                    field: "output_contract.required_fields",
                    reason: format!("must include {field}"),
                });
            }
        }
        if !required.iter().any(|f| f == "pr_url" || f == "pr_skipped_reason") {
            return Err(CoreError::InvalidField {
                field: "output_contract.required_fields",
                reason: "must include pr_url or pr_skipped_reason".to_string(),
            });
        }
        if self.context_intent == ContextIntent::Continue
            && !required.iter().any(|f| f == "session_id")
        {
            return Err(CoreError::InvalidField {
                field: "output_contract.required_fields",
                reason: "must include session_id when context_intent is continue".to_string(),
            });
        }

        Ok(())
    }
}

/// Evidence that a worker exercised its change against a locally running
/// preview server before reporting completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserEvidence {
    pub base_url: String,
    #[serde(default)]
    pub tools_listed: Vec<String>,
    #[serde(default)]
    pub execute_tool_evidence: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn base_url_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^https?://127\.0\.0\.1(:\d+)?(/|$)").expect("static regex")
    })
}

/// The JSON payload a worker lane sends back when a run finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionContract {
    pub run_id: RunId,
    pub branch: String,
    pub commit_sha: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    pub test_result: String,
    pub risk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_skipped_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<AgentSessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_evidence: Option<BrowserEvidence>,
}

/// Commit SHAs that stand in for "no commit was made" when
/// `allow_no_code_changes` is in effect for the originating run. Matched
/// case-insensitively; the empty string is also accepted.
pub const NO_CHANGE_COMMIT_PLACEHOLDERS: &[&str] = &["n/a", "na", "none", "no-commit"];

/// `run_id` prefixes that imply `allow_no_code_changes` on their own, even
/// when the caller didn't ask for it and no `pr_skipped_reason` is present.
pub const NO_CODE_RUN_ID_PREFIXES: &[&str] = &["ping-", "smoke-", "health-", "sync-"];

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Result of validating a worker's completion contract against the dispatch
/// that started the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionValidation {
    pub valid: bool,
    pub missing: Vec<String>,
}

impl CompletionContract {
    /// Validates this contract against the dispatch that started the run.
    /// `allow_no_code_changes` is the caller's own opt-in; it is OR'd with
    /// `pr_skipped_reason` being present and with `run_id` carrying one of
    /// [`NO_CODE_RUN_ID_PREFIXES`] to get the effective allowance.
    pub fn validate(
        &self,
        expected_run_id: &RunId,
        expected_branch: &str,
        required_fields: &[String],
        browser_evidence_required: bool,
        allow_no_code_changes: bool,
    ) -> CompletionValidation {
        let mut missing = Vec::new();

        if self.run_id != *expected_run_id {
            missing.push("run_id mismatch".to_string());
        }
        if self.branch != expected_branch {
            missing.push("branch mismatch".to_string());
        } else if !branch_re().is_match(&self.branch) {
            missing.push("branch format".to_string());
        }

        let allow_no_code_changes = allow_no_code_changes
            || self.pr_skipped_reason.is_some()
            || NO_CODE_RUN_ID_PREFIXES
                .iter()
                .any(|prefix| self.run_id.as_str().starts_with(prefix));

        let sha_lower = self.commit_sha.to_ascii_lowercase();
        let hex_ok = (6..=40).contains(&self.commit_sha.len()) && is_hex(&self.commit_sha);
        let placeholder_ok = allow_no_code_changes
            && (self.commit_sha.is_empty() || NO_CHANGE_COMMIT_PLACEHOLDERS.contains(&sha_lower.as_str()));
        if !hex_ok && !placeholder_ok {
            missing.push("commit_sha format".to_string());
        }

        if self.files_changed.is_empty() {
            if !allow_no_code_changes {
                missing.push("files_changed".to_string());
            }
        } else if self.files_changed.iter().any(|f| f.trim().is_empty()) {
            missing.push("files_changed format".to_string());
        }

        if self.test_result.trim().is_empty() {
            missing.push("test_result".to_string());
        }
        if self.risk.trim().is_empty() {
            missing.push("risk".to_string());
        }

        match (&self.pr_url, &self.pr_skipped_reason) {
            (Some(url), None) if !url.trim().is_empty() => {}
            (None, Some(reason)) if !reason.trim().is_empty() => {}
            _ => missing.push("pr_url/pr_skipped_reason".to_string()),
        }

        if required_fields.iter().any(|f| f == "session_id") {
            match &self.session_id {
                Some(session_id) if session_id_re().is_match(session_id.as_str()) => {}
                _ => missing.push("session_id".to_string()),
            }
        }

        if browser_evidence_required {
            match &self.browser_evidence {
                Some(evidence) => {
                    if !base_url_re().is_match(&evidence.base_url) {
                        missing.push("browser_evidence.base_url".to_string());
                    }
                    if evidence.tools_listed.is_empty()
                        || evidence.tools_listed.iter().any(|t| t.trim().is_empty())
                    {
                        missing.push("browser_evidence.tools_listed".to_string());
                    }
                    if evidence.execute_tool_evidence.is_empty()
                        || evidence
                            .execute_tool_evidence
                            .iter()
                            .any(|t| t.trim().is_empty())
                    {
                        missing.push("browser_evidence.execute_tool_evidence".to_string());
                    }
                    if evidence
                        .tools_listed
                        .iter()
                        .chain(evidence.execute_tool_evidence.iter())
                        .any(|t| screenshot_directive_re().is_match(t))
                    {
                        missing.push("browser_evidence.no_screenshots".to_string());
                    }
                }
                None => missing.push("browser_evidence".to_string()),
            }
        }

        CompletionValidation {
            valid: missing.is_empty(),
            missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> DispatchEnvelope {
        DispatchEnvelope {
            run_id: RunId::new("run-1"),
            task_type: TaskType::Implement,
            context_intent: ContextIntent::Fresh,
            input: "do the thing".to_string(),
            branch: "jarvis-run-1".to_string(),
            base_branch: None,
            acceptance_tests: vec!["cargo test".to_string()],
            output_contract: OutputContract {
                required_fields: vec![
                    "run_id".to_string(),
                    "branch".to_string(),
                    "commit_sha".to_string(),
                    "files_changed".to_string(),
                    "test_result".to_string(),
                    "risk".to_string(),
                    "pr_url".to_string(),
                ],
                browser_evidence_required: false,
            },
            session_id: None,
            parent_run_id: None,
            repo: Some("acme/widgets".to_string()),
            ui_impacting: None,
        }
    }

    #[test]
    fn fresh_envelope_without_session_id_is_valid() {
        assert!(envelope().validate().is_ok());
    }

    #[test]
    fn fresh_envelope_with_session_id_is_rejected() {
        let mut e = envelope();
        e.session_id = Some(AgentSessionId::new("S1"));
        assert!(e.validate().is_err());
    }

    #[test]
    fn continue_without_session_id_is_accepted_structurally() {
        let mut e = envelope();
        e.context_intent = ContextIntent::Continue;
        e.output_contract.required_fields.push("session_id".to_string());
        assert!(e.validate().is_ok());
    }

    #[test]
    fn continue_without_session_id_in_required_fields_is_rejected() {
        let mut e = envelope();
        e.context_intent = ContextIntent::Continue;
        assert!(e.validate().is_err());
    }

    #[test]
    fn malformed_repo_is_rejected() {
        let mut e = envelope();
        e.repo = Some("not a repo".to_string());
        assert!(e.validate().is_err());
    }

    #[test]
    fn branch_missing_jarvis_prefix_is_rejected() {
        let mut e = envelope();
        e.branch = "jarvis-".to_string();
        assert!(e.validate().is_err());
        e.branch = "jarvis-foo/bar.baz-1".to_string();
        assert!(e.validate().is_ok());
    }

    #[test]
    fn unsafe_base_branch_is_rejected() {
        let mut e = envelope();
        e.base_branch = Some("../etc/passwd".to_string());
        assert!(e.validate().is_err());
        e.base_branch = Some("release/2026.1".to_string());
        assert!(e.validate().is_ok());
    }

    #[test]
    fn screenshot_directive_in_input_is_rejected() {
        let mut e = envelope();
        e.input = "take a screenshot of the homepage".to_string();
        assert!(e.validate().is_err());
    }

    #[test]
    fn empty_acceptance_tests_is_rejected() {
        let mut e = envelope();
        e.acceptance_tests = vec![];
        assert!(e.validate().is_err());
    }

    #[test]
    fn screenshot_directive_in_acceptance_test_is_rejected() {
        let mut e = envelope();
        e.acceptance_tests = vec!["capture a screenshot of the page".to_string()];
        assert!(e.validate().is_err());
    }

    #[test]
    fn required_fields_missing_mandatory_entry_is_rejected() {
        let mut e = envelope();
        e.output_contract.required_fields.retain(|f| f != "risk");
        assert!(e.validate().is_err());
    }

    #[test]
    fn required_fields_missing_pr_entry_is_rejected() {
        let mut e = envelope();
        e.output_contract.required_fields.retain(|f| f != "pr_url");
        assert!(e.validate().is_err());
    }

    fn completion() -> CompletionContract {
        CompletionContract {
            run_id: RunId::new("run-1"),
            branch: "jarvis-run-1".to_string(),
            commit_sha: "abc123".to_string(),
            files_changed: vec!["src/lib.rs".to_string()],
            test_result: "3 passed".to_string(),
            risk: "low".to_string(),
            pr_url: Some("https://example.com/pr/1".to_string()),
            pr_skipped_reason: None,
            session_id: None,
            browser_evidence: None,
        }
    }

    fn run_id() -> RunId {
        RunId::new("run-1")
    }

    fn required() -> Vec<String> {
        vec![
            "run_id".to_string(),
            "branch".to_string(),
            "commit_sha".to_string(),
            "files_changed".to_string(),
            "test_result".to_string(),
            "risk".to_string(),
            "pr_url".to_string(),
        ]
    }

    #[test]
    fn valid_completion_passes() {
        let result = completion().validate(&run_id(), "jarvis-run-1", &required(), false, false);
        assert!(result.valid, "missing: {:?}", result.missing);
    }

    #[test]
    fn run_id_mismatch_is_rejected() {
        let c = completion();
        let result = c.validate(&RunId::new("run-2"), "jarvis-run-1", &required(), false, false);
        assert!(!result.valid);
        assert!(result.missing.contains(&"run_id mismatch".to_string()));
    }

    #[test]
    fn branch_mismatch_is_rejected() {
        let c = completion();
        let result = c.validate(&run_id(), "jarvis-other", &required(), false, false);
        assert!(!result.valid);
        assert!(result.missing.contains(&"branch mismatch".to_string()));
    }

    #[test]
    fn non_hex_commit_sha_without_allowance_is_rejected() {
        let mut c = completion();
        c.commit_sha = "not-a-sha".to_string();
        let result = c.validate(&run_id(), "jarvis-run-1", &required(), false, false);
        assert!(!result.valid);
        assert!(result.missing.contains(&"commit_sha format".to_string()));
    }

    #[test]
    fn placeholder_commit_sha_requires_allowance() {
        let mut c = completion();
        c.commit_sha = "none".to_string();
        c.files_changed = vec![];
        let result = c.validate(&run_id(), "jarvis-run-1", &required(), false, false);
        assert!(!result.valid);

        let result = c.validate(&run_id(), "jarvis-run-1", &required(), false, true);
        assert!(result.valid, "missing: {:?}", result.missing);
    }

    #[test]
    fn pr_skipped_reason_implies_no_code_allowance() {
        let mut c = completion();
        c.commit_sha = "n/a".to_string();
        c.files_changed = vec![];
        c.pr_url = None;
        c.pr_skipped_reason = Some("docs only".to_string());
        let result = c.validate(&run_id(), "jarvis-run-1", &required(), false, false);
        assert!(result.valid, "missing: {:?}", result.missing);
    }

    #[test]
    fn ping_run_id_prefix_implies_no_code_allowance() {
        let mut c = completion();
        c.run_id = RunId::new("ping-123");
        c.commit_sha = "".to_string();
        c.files_changed = vec![];
        let result = c.validate(&RunId::new("ping-123"), "jarvis-run-1", &required(), false, false);
        assert!(result.valid, "missing: {:?}", result.missing);
    }

    #[test]
    fn both_pr_url_and_skipped_reason_is_rejected() {
        let mut c = completion();
        c.pr_skipped_reason = Some("no PR needed".to_string());
        let result = c.validate(&run_id(), "jarvis-run-1", &required(), false, false);
        assert!(!result.valid);
        assert!(result
            .missing
            .contains(&"pr_url/pr_skipped_reason".to_string()));
    }

    #[test]
    fn neither_pr_url_nor_skipped_reason_is_rejected() {
        let mut c = completion();
        c.pr_url = None;
        let result = c.validate(&run_id(), "jarvis-run-1", &required(), false, false);
        assert!(!result.valid);
    }

    #[test]
    fn session_id_required_when_listed_in_required_fields() {
        let c = completion();
        let mut required = required();
        required.push("session_id".to_string());
        let result = c.validate(&run_id(), "jarvis-run-1", &required, false, false);
        assert!(!result.valid);
        assert!(result.missing.contains(&"session_id".to_string()));
    }

    #[test]
    fn browser_evidence_must_target_loopback() {
        let mut c = completion();
        c.browser_evidence = Some(BrowserEvidence {
            base_url: "https://example.com".to_string(),
            tools_listed: vec!["browser.navigate".to_string()],
            execute_tool_evidence: vec!["navigated to /dashboard".to_string()],
            notes: None,
        });
        let result = c.validate(&run_id(), "jarvis-run-1", &required(), true, false);
        assert!(!result.valid);
        assert!(result
            .missing
            .contains(&"browser_evidence.base_url".to_string()));

        c.browser_evidence = Some(BrowserEvidence {
            base_url: "http://127.0.0.1:4173/".to_string(),
            tools_listed: vec!["browser.navigate".to_string()],
            execute_tool_evidence: vec!["navigated to /dashboard".to_string()],
            notes: None,
        });
        let result = c.validate(&run_id(), "jarvis-run-1", &required(), true, false);
        assert!(result.valid, "missing: {:?}", result.missing);
    }

    #[test]
    fn browser_evidence_screenshots_are_rejected() {
        let mut c = completion();
        c.browser_evidence = Some(BrowserEvidence {
            base_url: "http://127.0.0.1:4173/".to_string(),
            tools_listed: vec!["took a screenshot of the page".to_string()],
            execute_tool_evidence: vec!["browser.click(#submit)".to_string()],
            notes: None,
        });
        let result = c.validate(&run_id(), "jarvis-run-1", &required(), true, false);
        assert!(!result.valid);
        assert!(result
            .missing
            .contains(&"browser_evidence.no_screenshots".to_string()));
    }
}
