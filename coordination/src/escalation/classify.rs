//! Failure classification
//!
//! Backends may report a category directly; otherwise the error message is
//! matched against a small set of patterns.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Output did not parse or compile
    Syntax,
    /// Output parsed but failed checks (tests, gate, criteria)
    Validation,
    /// The model is not capable of the task
    Capability,
    /// The call exceeded its time budget
    Timeout,
    Unknown,
}

impl FailureCategory {
    pub fn all() -> &'static [FailureCategory] {
        &[
            Self::Syntax,
            Self::Validation,
            Self::Capability,
            Self::Timeout,
            Self::Unknown,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Validation => "validation",
            Self::Capability => "capability",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Generic remediation advice attached to guardrails
    pub fn suggested_fix(&self) -> &'static str {
        match self {
            Self::Syntax => "Produce syntactically valid output and check it compiles before finishing",
            Self::Validation => "Run the acceptance checks locally and address every reported issue",
            Self::Capability => "Split the work into smaller steps or route to a stronger model",
            Self::Timeout => "Reduce the scope of each step so it completes within the time budget",
            Self::Unknown => "Review the error output and adjust the approach before retrying",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static TIMEOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(timed?\s*out|timeout|deadline exceeded|took too long)\b")
        .expect("TIMEOUT_RE regex should compile")
});

static SYNTAX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(syntax\s*error|parse\s*error|unexpected (token|eof|end of input)|expected `?[^`\s]+`?,? found|unterminated|invalid json|error\[E0\d{3}\])",
    )
    .expect("SYNTAX_RE regex should compile")
});

static CAPABILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(context (length|window)|too many tokens|maximum context|not (able|capable)|cannot (handle|complete)|unsupported|refus(ed|al)|beyond (my|the model'?s?) capabilit)",
    )
    .expect("CAPABILITY_RE regex should compile")
});

static VALIDATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(test(s)? failed|assertion|assert(ion)?_?(eq|ne)?! failed|validation|acceptance criteri|quality gate|lint(ing)? (error|failed)|check(s)? failed)",
    )
    .expect("VALIDATION_RE regex should compile")
});

/// Categorize an error message; first match wins, in severity order
pub fn classify_message(message: &str) -> FailureCategory {
    if TIMEOUT_RE.is_match(message) {
        FailureCategory::Timeout
    } else if SYNTAX_RE.is_match(message) {
        FailureCategory::Syntax
    } else if CAPABILITY_RE.is_match(message) {
        FailureCategory::Capability
    } else if VALIDATION_RE.is_match(message) {
        FailureCategory::Validation
    } else {
        FailureCategory::Unknown
    }
}

/// Prefer the backend-reported category, fall back to message matching
pub fn classify(reported: Option<FailureCategory>, message: Option<&str>) -> FailureCategory {
    match (reported, message) {
        (Some(category), _) => category,
        (None, Some(message)) => classify_message(message),
        (None, None) => FailureCategory::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_messages() {
        assert_eq!(classify_message("request timed out after 30s"), FailureCategory::Timeout);
        assert_eq!(classify_message("Deadline exceeded"), FailureCategory::Timeout);
        assert_eq!(
            classify_message("SyntaxError: unexpected token '}'"),
            FailureCategory::Syntax
        );
        assert_eq!(
            classify_message("error[E0308]: mismatched types"),
            FailureCategory::Syntax
        );
        assert_eq!(
            classify_message("prompt exceeds maximum context length"),
            FailureCategory::Capability
        );
        assert_eq!(
            classify_message("3 tests failed in auth::login"),
            FailureCategory::Validation
        );
        assert_eq!(classify_message("connection reset"), FailureCategory::Unknown);
    }

    #[test]
    fn test_reported_category_wins() {
        assert_eq!(
            classify(Some(FailureCategory::Capability), Some("timed out")),
            FailureCategory::Capability
        );
        assert_eq!(classify(None, None), FailureCategory::Unknown);
        assert_eq!(classify(None, Some("timeout")), FailureCategory::Timeout);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&FailureCategory::Validation).unwrap();
        assert_eq!(json, "\"validation\"");
    }
}
