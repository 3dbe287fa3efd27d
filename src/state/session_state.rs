/// Session state definitions for tracking one crawl from seed to summary
use std::fmt;

/// Represents the current state of a crawl session
///
/// ```text
/// Init -> Running -> Drained | LimitReached | Cancelled | TimedOut | Error -> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    // ===== Active States =====
    /// Seed accepted, nothing dispatched yet
    Init,

    /// Workers are dispatching frontier entries
    Running,

    // ===== Outcome States =====
    /// Frontier exhausted with nothing in flight
    Drained,

    /// Dispatched count reached `max_pages`
    LimitReached,

    /// The session's cancellation token fired
    Cancelled,

    /// The session-wide timeout elapsed
    TimedOut,

    /// An unrecoverable session-level failure
    Error,

    // ===== Final State =====
    /// Summary has been produced
    Done,
}

impl SessionState {
    /// Returns true if workers may still be dispatched
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Init | Self::Running)
    }

    /// Returns true if this is an outcome reached from `Running`
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            Self::Drained | Self::LimitReached | Self::Cancelled | Self::TimedOut | Self::Error
        )
    }

    /// Returns true if the session stopped before the frontier drained
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut | Self::Error)
    }

    /// Checks whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        match (self, next) {
            (Self::Init, Self::Running) => true,
            // Seed rejection or invalid setup ends a session before dispatch
            (Self::Init, Self::Error) => true,
            (Self::Running, n) => n.is_outcome(),
            (s, Self::Done) => s.is_outcome(),
            _ => false,
        }
    }

    /// Moves to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: SessionState) -> crate::Result<()> {
        if !self.can_transition_to(next) {
            return Err(crate::SluiceError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Drained => "drained",
            Self::LimitReached => "limit_reached",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
