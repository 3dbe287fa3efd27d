//! Outbound request validation
//!
//! Every URL the engine is about to contact, including each redirect target,
//! passes through [`SecurityGate::validate`] first. The gate rejects targets
//! that could reach internal networks, cloud metadata services, or sensitive
//! local services.
//!
//! # Example
//!
//! ```no_run
//! use sluice::config::SecurityConfig;
//! use sluice::security::{SecurityGate, ValidationContext};
//!
//! # async fn example() {
//! let gate = SecurityGate::new(&SecurityConfig::default());
//! let verdict = gate.validate("http://169.254.169.254/latest", ValidationContext::initial()).await;
//! assert!(!verdict.allowed);
//! # }
//! ```

mod dns;
mod ip_ranges;
mod violation;

pub use dns::{DnsCache, Resolver, StaticResolver, SystemResolver};
pub use ip_ranges::{blocked_range, is_blocked_ip};
pub use violation::{Severity, ValidationContext, ValidationResult, Violation, ViolationKind};

use crate::config::SecurityConfig;
use crate::url::matches_wildcard;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use url::{Host, Url};

/// Hostnames that are always blocked
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "0.0.0.0",
    "127.0.0.1",
    "::1",
    "169.254.169.254",
    "metadata.google.internal",
    "metadata.azure.com",
    "instance-data",
    "kubernetes.default.svc",
];

/// Hostname shapes that point at internal infrastructure
const SUSPICIOUS_HOST_PATTERNS: &[&str] = &[
    "metadata*",
    "*.internal",
    "*.local",
    "*.localhost",
    "*.localdomain",
    "*.intranet",
    "*.corp",
    "*.lan",
    "*.home.arpa",
];

/// SSH, telnet, SMTP, DNS, POP3, RPC, NetBIOS, IMAP, SMB, databases,
/// Docker, Consul, Elasticsearch, memcached
const DEFAULT_BLOCKED_PORTS: &[u16] = &[
    22, 23, 25, 53, 110, 135, 139, 143, 445, 1433, 1521, 2375, 2376, 3306, 3389, 5432, 5984, 6379,
    8500, 9200, 11211, 27017,
];

/// Path fragments that suggest probing for secrets or system files
const SUSPICIOUS_PATHS: &[&str] = &[
    "/etc/",
    "/proc/",
    "/var/log",
    "/.git",
    "/.env",
    "/.ssh",
    "/.aws",
    "/.htaccess",
    "/.htpasswd",
    "/server-status",
    "/wp-config",
];

/// Traversal sequences checked on the raw, un-parsed input
const TRAVERSAL_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e",
    "%252e%252e",
    "..%2f",
    "..%5c",
    "..%252f",
    "%c0%ae",
];

/// Validates URLs against SSRF-class targets before any network call
pub struct SecurityGate {
    allowed_protocols: HashSet<String>,
    blocked_hostnames: Vec<String>,
    blocked_ports: HashSet<u16>,
    allowed_hosts: HashSet<String>,
    max_url_length: usize,
    max_redirects: u32,
    resolver: Arc<dyn Resolver>,
    dns_cache: DnsCache,
}

impl SecurityGate {
    /// Creates a gate that resolves hostnames through the operating system
    pub fn new(config: &SecurityConfig) -> Self {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Creates a gate with a custom resolver
    pub fn with_resolver(config: &SecurityConfig, resolver: Arc<dyn Resolver>) -> Self {
        let blocked_ports = config
            .blocked_ports
            .clone()
            .unwrap_or_else(|| DEFAULT_BLOCKED_PORTS.to_vec());

        Self {
            allowed_protocols: config
                .allowed_protocols
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            blocked_hostnames: config
                .blocked_hostnames
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
            blocked_ports: blocked_ports.into_iter().collect(),
            allowed_hosts: config
                .allowed_hosts
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
            max_url_length: config.max_url_length,
            max_redirects: config.max_redirects,
            resolver,
            dns_cache: DnsCache::new(config.dns_cache_size, config.dns_cache_ttl()),
        }
    }

    /// Maximum number of redirect hops a fetch may follow
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// Validates one URL
    ///
    /// Checks run in a fixed order and stop at the first `High` violation:
    /// traversal on the raw string, parse and protocol, hostname block-list,
    /// port block-list, resolved addresses, suspicious path, length.
    ///
    /// # Arguments
    ///
    /// * `raw` - The URL exactly as discovered
    /// * `context` - Whether this is the original request or a redirect hop
    ///
    /// # Returns
    ///
    /// A [`ValidationResult`] that is `allowed` iff no violation is `High`
    pub async fn validate(&self, raw: &str, context: ValidationContext) -> ValidationResult {
        let mut violations = Vec::new();
        let mut resolved_ips = Vec::new();

        let verdict = self
            .run_checks(raw, &mut violations, &mut resolved_ips)
            .await;
        let result = ValidationResult::from_parts(verdict, violations, resolved_ips);

        if let Some(v) = result.blocking() {
            warn!(
                url = raw,
                hop = context.redirect_hop,
                kind = %v.kind,
                "Blocked outbound request: {}",
                v.message
            );
        } else {
            debug!(url = raw, hop = context.redirect_hop, "URL passed security gate");
        }

        result
    }

    /// Runs the checks in order, returning the sanitized URL when parsing succeeded
    async fn run_checks(
        &self,
        raw: &str,
        violations: &mut Vec<Violation>,
        resolved_ips: &mut Vec<IpAddr>,
    ) -> Option<String> {
        // 1. Traversal on the raw input; the parser would silently resolve it
        let lowered = raw.to_lowercase();
        if let Some(pattern) = TRAVERSAL_PATTERNS.iter().find(|p| lowered.contains(*p)) {
            violations.push(Violation::new(
                ViolationKind::PathTraversal,
                format!("URL contains traversal sequence '{}'", pattern),
            ));
            return None;
        }

        // 2. Parse and protocol
        let mut url = match Url::parse(raw.trim()) {
            Ok(url) => url,
            Err(e) => {
                violations.push(Violation::new(
                    ViolationKind::InvalidUrl,
                    format!("Failed to parse URL: {}", e),
                ));
                return None;
            }
        };

        if !self.allowed_protocols.contains(url.scheme()) {
            violations.push(Violation::new(
                ViolationKind::BlockedProtocol,
                format!("Protocol '{}' is not allowed", url.scheme()),
            ));
            return None;
        }

        if !url.username().is_empty() || url.password().is_some() {
            violations.push(Violation::new(
                ViolationKind::EmbeddedCredentials,
                "Credentials were stripped from the URL",
            ));
            let _ = url.set_username("");
            let _ = url.set_password(None);
        }
        url.set_fragment(None);
        let sanitized = Some(url.to_string());

        let host = match url.host() {
            Some(host) => host.to_owned(),
            None => {
                violations.push(Violation::new(
                    ViolationKind::InvalidUrl,
                    "URL has no host",
                ));
                return sanitized;
            }
        };
        let host_name = host_key(&host);
        let exempt = self.allowed_hosts.contains(&host_name);

        // 3. Hostname block-list
        if !exempt {
            if let Some(reason) = self.hostname_block_reason(&host_name) {
                violations.push(Violation::new(ViolationKind::BlockedHostname, reason));
                return sanitized;
            }
        }

        // 4. Port block-list
        if let Some(port) = url.port_or_known_default() {
            if self.blocked_ports.contains(&port) {
                violations.push(Violation::new(
                    ViolationKind::BlockedPort,
                    format!("Port {} is blocked", port),
                ));
                return sanitized;
            }
        }

        // 5. Resolved addresses
        let port = url.port_or_known_default().unwrap_or(80);
        match self.resolve(&host, &host_name, port, exempt).await {
            Ok(ips) => {
                resolved_ips.extend(ips.iter().copied());
                if !exempt {
                    for ip in &ips {
                        if let Some(range) = blocked_range(ip) {
                            violations.push(Violation::new(
                                ViolationKind::BlockedIp,
                                format!("{} resolves to {} ({} range)", host_name, ip, range),
                            ));
                            return sanitized;
                        }
                    }
                }
            }
            Err(e) => {
                violations.push(Violation::new(
                    ViolationKind::DnsResolutionFailed,
                    format!("Could not resolve {}: {}", host_name, e),
                ));
                return sanitized;
            }
        }

        // 6. Suspicious paths are advisory
        let path = url.path().to_lowercase();
        if let Some(fragment) = SUSPICIOUS_PATHS.iter().find(|p| path.contains(*p)) {
            violations.push(Violation::new(
                ViolationKind::SuspiciousPath,
                format!("Path contains '{}'", fragment),
            ));
        }

        // 7. Length
        if raw.len() > self.max_url_length {
            violations.push(Violation::new(
                ViolationKind::UrlTooLong,
                format!(
                    "URL is {} bytes, limit is {}",
                    raw.len(),
                    self.max_url_length
                ),
            ));
        }

        sanitized
    }

    fn hostname_block_reason(&self, host: &str) -> Option<String> {
        if BLOCKED_HOSTNAMES.contains(&host) {
            return Some(format!("Hostname '{}' is blocked", host));
        }

        SUSPICIOUS_HOST_PATTERNS
            .iter()
            .copied()
            .chain(self.blocked_hostnames.iter().map(String::as_str))
            .find(|pattern| matches_wildcard(pattern, host))
            .map(|pattern| format!("Hostname '{}' matches blocked pattern '{}'", host, pattern))
    }

    async fn resolve(
        &self,
        host: &Host<String>,
        host_name: &str,
        port: u16,
        exempt: bool,
    ) -> std::io::Result<Vec<IpAddr>> {
        match host {
            Host::Ipv4(ip) => Ok(vec![IpAddr::V4(*ip)]),
            Host::Ipv6(ip) => Ok(vec![IpAddr::V6(*ip)]),
            Host::Domain(_) if exempt => Ok(Vec::new()),
            Host::Domain(domain) => {
                // A cache hit still goes through the per-address check in the caller
                if let Some(ips) = self.dns_cache.get(host_name) {
                    return Ok(ips);
                }
                let ips = self.resolver.resolve(domain, port).await?;
                self.dns_cache.insert(host_name, ips.clone());
                Ok(ips)
            }
        }
    }
}

/// Lowercase host without brackets or a trailing root dot
fn host_key(host: &Host<String>) -> String {
    match host {
        Host::Domain(d) => d.trim_end_matches('.').to_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    }
}
