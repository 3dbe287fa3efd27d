//! Robots.txt rule evaluation
//!
//! Allow/Disallow matching is delegated to the robotstxt crate; only the
//! `Crawl-delay` extension is read here, since the crate does not expose it.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Rules served by one origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRules {
    /// Raw robots.txt body; `None` means everything is allowed
    body: Option<String>,
}

impl RobotsRules {
    pub fn from_body(body: &str) -> Self {
        Self {
            body: Some(body.to_string()),
        }
    }

    /// Rules used when an origin has no robots.txt or it cannot be read
    pub fn allow_all() -> Self {
        Self { body: None }
    }

    /// Checks a full URL for the given product token
    pub fn is_allowed(&self, url: &str, agent: &str) -> bool {
        match self.body.as_deref() {
            None => true,
            Some(body) if body.trim().is_empty() => true,
            Some(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, agent, url)
            }
        }
    }

    /// The `Crawl-delay` that applies to `agent`
    ///
    /// A group naming the agent wins over the `*` group. Consecutive
    /// `User-agent` lines form one group.
    pub fn crawl_delay(&self, agent: &str) -> Option<Duration> {
        let body = self.body.as_deref()?;
        let agent = agent.to_lowercase();

        let mut group: Vec<String> = Vec::new();
        let mut in_agent_lines = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                if !in_agent_lines {
                    group.clear();
                }
                group.push(value.to_lowercase());
                in_agent_lines = true;
                continue;
            }
            in_agent_lines = false;

            if key != "crawl-delay" {
                continue;
            }
            let Some(delay) = value
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(Duration::from_secs_f64)
            else {
                continue;
            };

            if group.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                specific.get_or_insert(delay);
            } else if group.iter().any(|ua| ua == "*") {
                wildcard.get_or_insert(delay);
            }
        }

        specific.or(wildcard)
    }
}
