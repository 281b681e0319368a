use thiserror::Error;

/// Connection lifecycle states. A connection owns at most one identity
/// binding at a time; a failed login returns it to `Anonymous` (retryable),
/// and any state can move to `Closed` on transport disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated(String),
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid session transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Anonymous,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated(_))
    }

    /// Anonymous -> Authenticating: a login or register request in flight.
    pub fn begin_auth(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            SessionState::Anonymous => {
                self.state = SessionState::Authenticating;
                Ok(())
            }
            _ => Err(self.invalid("Authenticating")),
        }
    }

    /// Authenticating -> Authenticated: throttle allowed AND credentials
    /// matched.
    pub fn complete_auth(&mut self, identity: String) -> Result<(), InvalidTransition> {
        match self.state {
            SessionState::Authenticating => {
                self.state = SessionState::Authenticated(identity);
                Ok(())
            }
            _ => Err(self.invalid("Authenticated")),
        }
    }

    /// Authenticating -> Anonymous: login rejected, connection stays open.
    pub fn fail_auth(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            SessionState::Authenticating => {
                self.state = SessionState::Anonymous;
                Ok(())
            }
            _ => Err(self.invalid("Anonymous")),
        }
    }

    /// Any state -> Closed on transport disconnect.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn invalid(&self, to: &'static str) -> InvalidTransition {
        InvalidTransition {
            from: self.state_name(),
            to,
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            SessionState::Anonymous => "Anonymous",
            SessionState::Authenticating => "Authenticating",
            SessionState::Authenticated(_) => "Authenticated",
            SessionState::Closed => "Closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut session = Session::new();
        assert_eq!(*session.state(), SessionState::Anonymous);

        session.begin_auth().unwrap();
        session.complete_auth("alice".into()).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.identity(), Some("alice"));

        session.close();
        assert_eq!(*session.state(), SessionState::Closed);
    }

    #[test]
    fn failed_login_is_retryable() {
        let mut session = Session::new();
        session.begin_auth().unwrap();
        session.fail_auth().unwrap();
        assert_eq!(*session.state(), SessionState::Anonymous);

        // Can try again.
        session.begin_auth().unwrap();
        session.complete_auth("alice".into()).unwrap();
    }

    #[test]
    fn cannot_authenticate_twice() {
        let mut session = Session::new();
        session.begin_auth().unwrap();
        session.complete_auth("alice".into()).unwrap();

        let err = session.begin_auth().unwrap_err();
        assert_eq!(err.from, "Authenticated");
    }

    #[test]
    fn cannot_complete_without_begin() {
        let mut session = Session::new();
        assert!(session.complete_auth("alice".into()).is_err());
    }

    #[test]
    fn close_wins_from_any_state() {
        let mut session = Session::new();
        session.begin_auth().unwrap();
        session.close();
        assert_eq!(*session.state(), SessionState::Closed);
        assert!(session.begin_auth().is_err());
    }
}
