//! Request-scoped context
//!
//! A [`Context`] travels with every call into the services. It carries the
//! request's cancellation token, an optional deadline and, when a caller has
//! already opened one, the [`Session`] every nested operation should join.

use std::fmt;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{GraphError, Result};
use crate::session::Session;

#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    session: Option<Session>,
}

impl Context {
    /// A fresh context with no deadline and no session
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            session: None,
        }
    }

    /// Derive a context whose token is cancelled along with this one
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            session: self.session.clone(),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline`, or earlier if this one does
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            session: self.session.clone(),
        }
    }

    /// Attach a session so that services join it instead of opening their own
    pub fn with_session(&self, session: Session) -> Self {
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            session: Some(session),
        }
    }

    /// Same cancellation and deadline, no attached session
    pub fn detached(&self) -> Self {
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast if the request was cancelled or has run out of time
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(GraphError::Canceled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(GraphError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_fresh_context_passes_check() {
        let ctx = Context::new();
        assert!(ctx.check().is_ok());
        assert!(ctx.session().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Context::new();
        let child = parent.with_cancel();
        let timed = parent.with_timeout(Duration::from_secs(60));

        parent.cancel();

        assert_eq!(child.check().unwrap_err().kind(), ErrorKind::Canceled);
        assert_eq!(timed.check().unwrap_err().kind(), ErrorKind::Canceled);
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = Context::new();
        let child = parent.with_cancel();
        child.cancel();

        assert!(parent.check().is_ok());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = Context::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(ctx.check().unwrap_err().kind(), ErrorKind::DeadlineExceeded);
    }

    #[test]
    fn test_deadline_only_tightens() {
        let soon = Instant::now() + Duration::from_secs(1);
        let ctx = Context::new().with_deadline(soon);
        let later = ctx.with_timeout(Duration::from_secs(3600));
        assert_eq!(later.deadline(), Some(soon));
    }
}
