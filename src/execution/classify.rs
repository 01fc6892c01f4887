//! Error classification: which failures are worth retrying, and how loudly.
//!
//! [`ErrorClassifier`] maps a [`HuginnError`] to a [`Classification`]
//! (failure kind, severity, retryability). Structured variants whose outcome
//! cannot change on retry are classified from their type; everything else
//! falls through to message rules evaluated in a fixed priority order
//! against the lower-cased message:
//!
//! | # | message contains                                  | kind            | retry | severity |
//! |---|---------------------------------------------------|-----------------|-------|----------|
//! | 1 | timeout, connection refused, DNS failure, network | `Unreachable`   | yes   | high     |
//! | 2 | rpc, provider                                     | `Upstream`      | yes   | high     |
//! | 3 | persistence / database / connection pool          | `Resource`      | yes   | critical |
//! | 4 | unauthorized, authorization, oracle               | `Authorization` | no    | critical |
//! | 5 | rate limit, too many requests                     | `RateLimited`   | yes   | medium   |
//! | 6 | invalid, forbidden                                | `Rejected`      | no    | medium   |
//! | 7 | anything else                                     | `Unknown`       | yes   | medium   |

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::HuginnError;

/// How urgently a failure needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts, refused connections, DNS failures. Drives endpoint failover.
    Unreachable,
    /// The node or provider answered with an error of its own.
    Upstream,
    /// Persistence or connection-pool exhaustion.
    Resource,
    Authorization,
    RateLimited,
    /// The request itself was refused (bad input, forbidden).
    Rejected,
    CircuitOpen,
    Unknown,
}

/// Verdict for a single failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: FailureKind,
    pub severity: Severity,
    pub retryable: bool,
}

impl Classification {
    const fn new(kind: FailureKind, severity: Severity, retryable: bool) -> Self {
        Self {
            kind,
            severity,
            retryable,
        }
    }
}

const UNREACHABLE: &[&str] = &[
    "timeout",
    "timed out",
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "enotfound",
    "dns",
    "network",
];
const UPSTREAM: &[&str] = &["rpc", "provider"];
const RESOURCE: &[&str] = &[
    "persistence",
    "database",
    "prisma",
    "connection pool",
    "too many connections",
];
const AUTHORIZATION: &[&str] = &["unauthorized", "authorization", "oracle"];
const RATE_LIMITED: &[&str] = &["rate limit", "too many requests"];
const REJECTED: &[&str] = &["invalid", "forbidden"];

/// Stateless error classifier.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a failure.
    pub fn classify(err: &HuginnError) -> Classification {
        use FailureKind::*;
        use Severity::*;

        match err {
            HuginnError::InvalidInput(_) | HuginnError::Forbidden(_) => {
                Classification::new(Rejected, Medium, false)
            }
            HuginnError::Unauthorized(_) => Classification::new(Authorization, Critical, false),
            HuginnError::CircuitOpen { .. } => Classification::new(CircuitOpen, High, false),
            HuginnError::Configuration(_) => Classification::new(Rejected, Critical, false),
            HuginnError::QueueClosed => Classification::new(Unknown, High, false),
            HuginnError::Timeout { .. } | HuginnError::Network(_) => {
                Classification::new(Unreachable, High, true)
            }
            HuginnError::RateLimited { .. } => Classification::new(RateLimited, Medium, true),
            HuginnError::Persistence(_) => Classification::new(Resource, Critical, true),
            HuginnError::Api { status, .. } => match *status {
                408 => Classification::new(Unreachable, High, true),
                429 => Classification::new(RateLimited, Medium, true),
                401 => Classification::new(Authorization, Critical, false),
                400..=499 => Classification::new(Rejected, Medium, false),
                _ => Classification::new(Upstream, High, true),
            },
            other => Self::classify_message(&other.to_string()),
        }
    }

    /// Apply the message rules to an arbitrary error message.
    pub fn classify_message(message: &str) -> Classification {
        use FailureKind::*;
        use Severity::*;

        let msg = message.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

        if contains_any(UNREACHABLE) {
            Classification::new(Unreachable, High, true)
        } else if contains_any(UPSTREAM) {
            Classification::new(Upstream, High, true)
        } else if contains_any(RESOURCE) {
            Classification::new(Resource, Critical, true)
        } else if contains_any(AUTHORIZATION) {
            Classification::new(Authorization, Critical, false)
        } else if contains_any(RATE_LIMITED) {
            Classification::new(RateLimited, Medium, true)
        } else if contains_any(REJECTED) {
            Classification::new(Rejected, Medium, false)
        } else {
            Classification::new(Unknown, Medium, true)
        }
    }
}

/// Context attached to an execution, driving retry and escalation decisions.
///
/// The caller supplies a base context (operation name, whether retrying is
/// allowed at all, baseline severity). When an attempt fails,
/// [`for_failure`](Self::for_failure) folds in the classifier's verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub operation: String,
    pub severity: Severity,
    pub retryable: bool,
    pub metadata: Map<String, Value>,
}

impl ErrorContext {
    /// Base context: retryable, medium severity, no metadata.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            severity: Severity::Medium,
            retryable: true,
            metadata: Map::new(),
        }
    }

    /// Set the baseline severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Allow or forbid retries regardless of the error.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Context for a specific failure: the higher of the two severities,
    /// retryable only if both the caller and the classifier allow it.
    pub fn for_failure(&self, err: &HuginnError) -> (ErrorContext, Classification) {
        let class = ErrorClassifier::classify(err);
        let mut ctx = self.clone();
        ctx.severity = ctx.severity.max(class.severity);
        ctx.retryable = ctx.retryable && class.retryable;
        let kind = serde_json::to_value(class.kind).unwrap_or_default();
        ctx.metadata.insert("failure_kind".into(), kind);
        (ctx, class)
    }
}
