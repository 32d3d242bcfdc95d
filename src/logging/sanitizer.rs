//! PII redaction for log messages, error records and client responses.
//!
//! Rules run in order and are reapplied until the text stops changing, so
//! `sanitize(sanitize(s)) == sanitize(s)` for every input. Replacement tokens contain
//! no digits and no `@`, which keeps later rules from matching them.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Upper bound on rule passes; real inputs settle after one or two.
const MAX_PASSES: usize = 8;

/// One ordered (pattern, replacement) redaction rule
pub struct SanitizerRule {
    pub name: &'static str,
    pattern: Regex,
    replacement: &'static str,
}

impl SanitizerRule {
    fn new(name: &'static str, pattern: &str, replacement: &'static str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid {name} pattern: {e}")),
            replacement,
        }
    }

    fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(input, self.replacement)
    }
}

static RULES: LazyLock<Vec<SanitizerRule>> = LazyLock::new(|| {
    vec![
        SanitizerRule::new("ssn", r"\b\d{3}-\d{2}-\d{4}\b", "[SSN]"),
        SanitizerRule::new(
            "email",
            r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}",
            "[EMAIL]",
        ),
        SanitizerRule::new("card", r"\b(?:\d{4}[ \-]?){3}\d{1,7}\b", "[CARD]"),
        SanitizerRule::new(
            "phone",
            r"(?:\+?\d{1,2}[ .\-]?)?(?:\(\d{3}\)|\b\d{3})[ .\-]?\d{3}[ .\-]\d{4}\b",
            "[PHONE]",
        ),
        SanitizerRule::new("bearer", r"(?i)\bBearer\s+[A-Za-z0-9._\-+/=]{8,}", "Bearer [REDACTED]"),
        SanitizerRule::new(
            "credential",
            concat!(
                r"(?i)\b(password|passwd|pwd|secret|token|api[_\-]?key",
                r"|access[_\-]?token|authorization)",
                r#"(\s*[:=]\s*)("?)[^\s,;"'}]+"#,
            ),
            "${1}${2}${3}[REDACTED]",
        ),
    ]
});

/// The ordered rule set
pub fn rules() -> &'static [SanitizerRule] {
    &RULES
}

/// Redact PII-shaped substrings
pub fn sanitize(input: &str) -> String {
    let mut current = input.to_string();
    for _ in 0..MAX_PASSES {
        let next = apply_rules(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn apply_rules(input: &str) -> String {
    let mut text = input.to_string();
    for rule in rules() {
        if let Cow::Owned(replaced) = rule.apply(&text) {
            text = replaced;
        }
    }
    text
}

/// Whether a context key names something that must never be stored verbatim
pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase().replace(['-', ' '], "_");
    [
        "password",
        "passwd",
        "secret",
        "token",
        "api_key",
        "apikey",
        "authorization",
        "cookie",
        "private_key",
        "ssn",
        "social_security",
        "card_number",
        "cvv",
    ]
    .iter()
    .any(|needle| normalized.contains(needle))
}

/// Redact every string inside a JSON value; values under sensitive keys are masked
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let val = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_value(val)
                    };
                    (key.clone(), val)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::String(s) => Value::String(sanitize(s)),
        other => other.clone(),
    }
}
