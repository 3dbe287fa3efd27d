//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `SessionState`: Lifecycle of one crawl session (init, running, outcome, done)
//! - `OriginState`: Per-origin sliding request log used by the rate limiter

mod origin_state;
mod session_state;

// Re-export main types
pub use origin_state::OriginState;
pub use session_state::SessionState;
