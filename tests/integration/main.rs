//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and drive full
//! sessions end-to-end through the public API.

mod cache_tests;
mod common;
mod crawl_tests;
mod politeness_tests;
mod security_tests;
