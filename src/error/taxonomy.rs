//! Error taxonomy for the platform
//!
//! This module defines the closed set of error categories and severities, and the single
//! table that maps each category to its default severity, response status, machine code,
//! audit category and security relevance. Every lookup in the crate reads that table, so
//! adding a category means adding exactly one row.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error category for taxonomic classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Errors related to authentication
    Authentication,
    /// Errors related to authorization
    Authorization,
    /// Errors related to validation of client input
    Validation,
    /// Errors related to missing resources
    NotFound,
    /// Errors related to database operations
    Database,
    /// Errors related to external services
    ExternalService,
    /// Errors related to network operations
    Network,
    /// Errors related to request throttling
    RateLimit,
    /// Errors related to encryption and key handling
    Encryption,
    /// Errors related to detected security threats
    Security,
    /// Errors related to unauthorized access to protected health or personal data
    PrivacyViolation,
    /// Errors related to system operations, and anything unrecognized
    System,
}

impl ErrorCategory {
    /// Every category, in table order
    pub const ALL: [ErrorCategory; 12] = [
        Self::Authentication,
        Self::Authorization,
        Self::Validation,
        Self::NotFound,
        Self::Database,
        Self::ExternalService,
        Self::Network,
        Self::RateLimit,
        Self::Encryption,
        Self::Security,
        Self::PrivacyViolation,
        Self::System,
    ];

    /// Parse a raw category name, tolerating case, `-`/` ` separators and common aliases
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let normalized = normalized.strip_suffix("_error").unwrap_or(&normalized);

        let category = match normalized {
            "authentication" | "auth" | "unauthenticated" => Self::Authentication,
            "authorization" | "forbidden" | "access_denied" => Self::Authorization,
            "validation" | "invalid_input" | "bad_request" => Self::Validation,
            "not_found" | "notfound" | "missing" => Self::NotFound,
            "database" | "db" | "storage" => Self::Database,
            "external_service" | "external" | "upstream" => Self::ExternalService,
            "network" | "connectivity" => Self::Network,
            "rate_limit" | "ratelimit" | "rate_limited" | "throttled" => Self::RateLimit,
            "encryption" | "crypto" | "decryption" => Self::Encryption,
            "security" | "security_violation" => Self::Security,
            "privacy_violation" | "privacy" | "hipaa_violation" => Self::PrivacyViolation,
            "system" | "internal" => Self::System,
            _ => return None,
        };
        Some(category)
    }

    /// The table row for this category
    pub fn profile(self) -> &'static CategoryProfile {
        &CATEGORY_PROFILES[self as usize]
    }

    /// Stable machine-readable code, e.g. `DATABASE_ERROR`
    pub fn code(self) -> &'static str {
        self.profile().code
    }

    /// Default severity when none is given
    pub fn default_severity(self) -> ErrorSeverity {
        self.profile().severity
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Database => "database",
            Self::ExternalService => "external_service",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Encryption => "encryption",
            Self::Security => "security",
            Self::PrivacyViolation => "privacy_violation",
            Self::System => "system",
        }
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown error category: {s}"))
    }
}

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected, client-fixable problems
    Low,
    /// Problems that should be looked at but do not threaten the service
    Medium,
    /// Failures of a request that should be fixed soon
    High,
    /// Failures that require immediate attention
    Critical,
}

impl ErrorSeverity {
    pub const ALL: [ErrorSeverity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "info" => Some(Self::Low),
            "medium" | "warning" | "warn" => Some(Self::Medium),
            "high" | "error" => Some(Self::High),
            "critical" | "fatal" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Display for ErrorSeverity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Audit-trail category an error is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Authentication,
    Authorization,
    DataAccess,
    RateLimiting,
    Encryption,
    SecurityIncident,
    PrivacyViolation,
    SystemEvent,
    /// Fallback bucket for anything without an explicit mapping
    Unclassified,
}

impl Display for AuditCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::DataAccess => "data_access",
            Self::RateLimiting => "rate_limiting",
            Self::Encryption => "encryption",
            Self::SecurityIncident => "security_incident",
            Self::PrivacyViolation => "privacy_violation",
            Self::SystemEvent => "system_event",
            Self::Unclassified => "unclassified",
        };
        f.write_str(name)
    }
}

/// Risk vocabulary of the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl Display for RiskLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One row of the category table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryProfile {
    pub category: ErrorCategory,
    pub code: &'static str,
    pub severity: ErrorSeverity,
    pub status_code: u16,
    pub audit_category: AuditCategory,
    pub security_relevant: bool,
    /// Message shown to clients when the real one must stay inside the process
    pub client_message: &'static str,
}

const fn row(
    category: ErrorCategory,
    code: &'static str,
    severity: ErrorSeverity,
    status_code: u16,
    audit_category: AuditCategory,
    security_relevant: bool,
    client_message: &'static str,
) -> CategoryProfile {
    CategoryProfile {
        category,
        code,
        severity,
        status_code,
        audit_category,
        security_relevant,
        client_message,
    }
}

/// Indexed by `ErrorCategory as usize`.
#[rustfmt::skip]
static CATEGORY_PROFILES: [CategoryProfile; 12] = [
    row(ErrorCategory::Authentication, "AUTHENTICATION_ERROR", ErrorSeverity::Medium, 401,
        AuditCategory::Authentication, false, "Authentication is required"),
    row(ErrorCategory::Authorization, "AUTHORIZATION_ERROR", ErrorSeverity::Medium, 403,
        AuditCategory::Authorization, false, "You do not have permission to perform this action"),
    row(ErrorCategory::Validation, "VALIDATION_ERROR", ErrorSeverity::Low, 400,
        AuditCategory::Unclassified, false, "The request contains invalid data"),
    row(ErrorCategory::NotFound, "NOT_FOUND", ErrorSeverity::Low, 404,
        AuditCategory::Unclassified, false, "The requested resource was not found"),
    row(ErrorCategory::Database, "DATABASE_ERROR", ErrorSeverity::High, 500,
        AuditCategory::DataAccess, false, "A data storage error occurred"),
    row(ErrorCategory::ExternalService, "EXTERNAL_SERVICE_ERROR", ErrorSeverity::Medium, 502,
        AuditCategory::SystemEvent, false, "An external service is currently unavailable"),
    row(ErrorCategory::Network, "NETWORK_ERROR", ErrorSeverity::Medium, 503,
        AuditCategory::SystemEvent, false, "A network error occurred"),
    row(ErrorCategory::RateLimit, "RATE_LIMIT_EXCEEDED", ErrorSeverity::Low, 429,
        AuditCategory::RateLimiting, false, "Too many requests, please try again later"),
    row(ErrorCategory::Encryption, "ENCRYPTION_ERROR", ErrorSeverity::Critical, 500,
        AuditCategory::Encryption, true, "A secure processing error occurred"),
    row(ErrorCategory::Security, "SECURITY_VIOLATION", ErrorSeverity::High, 403,
        AuditCategory::SecurityIncident, true, "The request was blocked for security reasons"),
    row(ErrorCategory::PrivacyViolation, "PRIVACY_VIOLATION", ErrorSeverity::Critical, 403,
        AuditCategory::PrivacyViolation, true, "Access to this information is not permitted"),
    row(ErrorCategory::System, "INTERNAL_ERROR", ErrorSeverity::High, 500,
        AuditCategory::SystemEvent, false, "An internal error occurred"),
];

/// Default classification of a raw category name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub status_code: u16,
}

/// Classify a raw category name; anything unrecognized is a system error
pub fn classify(raw_category: &str) -> Classification {
    let category = ErrorCategory::parse(raw_category).unwrap_or(ErrorCategory::System);
    let severity = category.default_severity();
    Classification {
        category,
        severity,
        status_code: status_code_for(category, severity),
    }
}

/// Whether errors of this category must reach the audit trail
pub fn is_security_relevant(category: ErrorCategory) -> bool {
    category.profile().security_relevant
}

/// Response status for a category at a given severity
pub fn status_code_for(category: ErrorCategory, severity: ErrorSeverity) -> u16 {
    match (category, severity) {
        (ErrorCategory::System, ErrorSeverity::Critical) => 503,
        _ => category.profile().status_code,
    }
}

/// Whether an error is an expected, locally recoverable condition
pub fn is_operational(category: ErrorCategory, severity: ErrorSeverity) -> bool {
    !(category.profile().security_relevant
        || (category == ErrorCategory::System && severity == ErrorSeverity::Critical))
}

/// Audit category for a taxonomy category
pub fn audit_category_for(category: ErrorCategory) -> AuditCategory {
    category.profile().audit_category
}

/// Audit category for a raw category name, `Unclassified` when unknown
pub fn audit_category_for_raw(raw_category: &str) -> AuditCategory {
    ErrorCategory::parse(raw_category)
        .map(audit_category_for)
        .unwrap_or(AuditCategory::Unclassified)
}

/// Risk level for a severity
pub fn risk_level_for(severity: ErrorSeverity) -> RiskLevel {
    match severity {
        ErrorSeverity::Low => RiskLevel::Low,
        ErrorSeverity::Medium => RiskLevel::Medium,
        ErrorSeverity::High => RiskLevel::High,
        ErrorSeverity::Critical => RiskLevel::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_profile_table_is_indexed_by_category() {
        for (index, category) in ErrorCategory::ALL.iter().enumerate() {
            assert_eq!(*category as usize, index);
            assert_eq!(category.profile().category, *category);
        }
    }

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<_> = ErrorCategory::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), ErrorCategory::ALL.len());
    }

    #[test]
    fn test_classify_accepts_spellings() {
        let spellings = [
            "privacy-violation",
            "privacy_violation",
            "PRIVACY_VIOLATION",
            "Privacy Violation",
        ];
        for raw in spellings {
            assert_eq!(classify(raw).category, ErrorCategory::PrivacyViolation);
        }
        assert_eq!(classify("DATABASE_ERROR").category, ErrorCategory::Database);
        assert_eq!(classify("rate-limit").status_code, 429);
    }

    #[test]
    fn test_classify_unknown_is_system() {
        let classification = classify("gremlins");
        assert_eq!(classification.category, ErrorCategory::System);
        assert_eq!(classification.severity, ErrorSeverity::High);
        assert_eq!(classification.status_code, 500);
    }

    #[test]
    fn test_security_relevance() {
        assert!(is_security_relevant(ErrorCategory::Security));
        assert!(is_security_relevant(ErrorCategory::PrivacyViolation));
        assert!(is_security_relevant(ErrorCategory::Encryption));
        assert!(!is_security_relevant(ErrorCategory::Validation));
        assert!(!is_security_relevant(ErrorCategory::Authentication));
    }

    #[test]
    fn test_operational_invariant() {
        for category in ErrorCategory::ALL {
            for severity in ErrorSeverity::ALL {
                let expected_non_operational = matches!(
                    category,
                    ErrorCategory::Security
                        | ErrorCategory::PrivacyViolation
                        | ErrorCategory::Encryption
                ) || (category == ErrorCategory::System
                    && severity == ErrorSeverity::Critical);
                assert_eq!(
                    !is_operational(category, severity),
                    expected_non_operational,
                    "{category}/{severity}"
                );
            }
        }
    }

    #[test]
    fn test_critical_system_fault_is_unavailable() {
        assert_eq!(status_code_for(ErrorCategory::System, ErrorSeverity::Critical), 503);
        assert_eq!(status_code_for(ErrorCategory::System, ErrorSeverity::High), 500);
        assert_eq!(status_code_for(ErrorCategory::Database, ErrorSeverity::Medium), 500);
    }

    #[test]
    fn test_audit_mapping_has_fallback() {
        assert_eq!(audit_category_for_raw("privacy-violation"), AuditCategory::PrivacyViolation);
        assert_eq!(audit_category_for_raw("no-such-thing"), AuditCategory::Unclassified);
        assert_eq!(audit_category_for(ErrorCategory::Validation), AuditCategory::Unclassified);
    }

    #[test]
    fn test_risk_level_is_one_to_one() {
        let levels: HashSet<_> = ErrorSeverity::ALL.iter().map(|s| risk_level_for(*s)).collect();
        assert_eq!(levels.len(), ErrorSeverity::ALL.len());
        assert_eq!(risk_level_for(ErrorSeverity::Critical), RiskLevel::Critical);
    }
}
