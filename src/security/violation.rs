use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// How serious a violation is
///
/// Any `High` violation blocks the request; lower severities are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        write!(f, "{}", s)
    }
}

/// Category of a security gate finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    PathTraversal,
    InvalidUrl,
    BlockedProtocol,
    BlockedHostname,
    BlockedPort,
    BlockedIp,
    DnsResolutionFailed,
    SuspiciousPath,
    UrlTooLong,
    EmbeddedCredentials,
}

impl ViolationKind {
    /// Severity this kind of finding always carries
    pub fn severity(&self) -> Severity {
        match self {
            Self::SuspiciousPath => Severity::Medium,
            Self::EmbeddedCredentials => Severity::Low,
            _ => Severity::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::InvalidUrl => "INVALID_URL",
            Self::BlockedProtocol => "BLOCKED_PROTOCOL",
            Self::BlockedHostname => "BLOCKED_HOSTNAME",
            Self::BlockedPort => "BLOCKED_PORT",
            Self::BlockedIp => "BLOCKED_IP",
            Self::DnsResolutionFailed => "DNS_RESOLUTION_FAILED",
            Self::SuspiciousPath => "SUSPICIOUS_PATH",
            Self::UrlTooLong => "URL_TOO_LONG",
            Self::EmbeddedCredentials => "EMBEDDED_CREDENTIALS",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single finding produced while validating a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    pub severity: Severity,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: kind.severity(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.message)
    }
}

/// Verdict for one URL or one redirect hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// True iff no violation is `High`
    pub allowed: bool,

    /// Parsed URL with credentials and fragment stripped, when parsing succeeded
    pub sanitized_url: Option<String>,

    pub violations: Vec<Violation>,

    /// Addresses the host resolved to (or the literal address)
    pub resolved_ips: Vec<IpAddr>,
}

impl ValidationResult {
    pub(crate) fn from_parts(
        sanitized_url: Option<String>,
        violations: Vec<Violation>,
        resolved_ips: Vec<IpAddr>,
    ) -> Self {
        let allowed = !violations.iter().any(|v| v.severity == Severity::High);
        Self {
            allowed,
            sanitized_url,
            violations,
            resolved_ips,
        }
    }

    /// Returns true if any violation has the given kind
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    /// The first blocking violation, if any
    pub fn blocking(&self) -> Option<&Violation> {
        self.violations
            .iter()
            .find(|v| v.severity == Severity::High)
    }

    /// One-line description of all violations
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Where in a fetch a URL is being validated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationContext {
    /// 0 for the original request, n for the n-th redirect target
    pub redirect_hop: u32,
}

impl ValidationContext {
    pub fn initial() -> Self {
        Self::default()
    }

    pub fn redirect(hop: u32) -> Self {
        Self { redirect_hop: hop }
    }
}
