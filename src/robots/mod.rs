//! Robots.txt handling module
//!
//! This module decides whether the crawler may dispatch a URL according to
//! the target origin's robots.txt.

mod cache;
mod rules;

pub use cache::{CachedRobots, RobotsCache};
pub use rules::RobotsRules;

use async_trait::async_trait;
use url::Url;

/// Decides whether a URL may be crawled
#[async_trait]
pub trait RobotsPolicy: Send + Sync {
    async fn is_allowed(&self, url: &Url) -> bool;
}

/// Policy that never disallows anything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl RobotsPolicy for AllowAll {
    async fn is_allowed(&self, _url: &Url) -> bool {
        true
    }
}
