//! Authentication and session lifecycle states.

/// Transmitter authentication states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthState {
    /// No receiver attached.
    H0,
    /// Receiver attached, low-value content only.
    H1,
    /// Determine receiver HDCP capability.
    A0,
    /// Exchange km.
    A1,
    /// Locality check.
    A2,
    /// Exchange ks.
    A3,
    /// Test for repeater.
    A4,
    /// Authenticated.
    A5,
    /// Wait for receiver ID list.
    A6,
    /// Verify receiver ID list.
    A7,
    /// Send receiver ID list acknowledgement.
    A8,
    /// Content stream management.
    A9,
}

impl AuthState {
    pub const ALL: [AuthState; 12] = [
        AuthState::H0,
        AuthState::H1,
        AuthState::A0,
        AuthState::A1,
        AuthState::A2,
        AuthState::A3,
        AuthState::A4,
        AuthState::A5,
        AuthState::A6,
        AuthState::A7,
        AuthState::A8,
        AuthState::A9,
    ];

    /// States reachable from this one in a single transition.
    ///
    /// Teardown to H0 is legal everywhere, and every state past H1 may
    /// fall back to H1.
    pub fn successors(self) -> &'static [AuthState] {
        use AuthState::*;
        match self {
            H0 => &[H1],
            H1 => &[A0, H0],
            A0 => &[A1, H1, H0],
            A1 => &[A2, H1, H0],
            A2 => &[A3, H1, H0],
            A3 => &[A4, H1, H0],
            A4 => &[A5, A6, H1, H0],
            A5 => &[A6, A9, H1, H0],
            A6 => &[A7, H1, H0],
            A7 => &[A8, H1, H0],
            A8 => &[A9, A5, H1, H0],
            A9 => &[A5, H1, H0],
        }
    }

    /// Whether `next` is a legal successor.
    pub fn can_transition_to(self, next: AuthState) -> bool {
        self.successors().contains(&next)
    }

    /// Whether content encryption may be enabled in this state.
    pub fn is_authenticated(self) -> bool {
        self == AuthState::A5
    }

    /// Whether this state belongs to the repeater-only branch.
    pub fn is_repeater_phase(self) -> bool {
        matches!(
            self,
            AuthState::A6 | AuthState::A7 | AuthState::A8 | AuthState::A9
        )
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthState::H0 => "H0 (no receiver)",
            AuthState::H1 => "H1 (low-value content)",
            AuthState::A0 => "A0 (determine rx capability)",
            AuthState::A1 => "A1 (exchange km)",
            AuthState::A2 => "A2 (locality check)",
            AuthState::A3 => "A3 (exchange ks)",
            AuthState::A4 => "A4 (test for repeater)",
            AuthState::A5 => "A5 (authenticated)",
            AuthState::A6 => "A6 (wait for receiver ID list)",
            AuthState::A7 => "A7 (verify receiver ID list)",
            AuthState::A8 => "A8 (send receiver ID list ack)",
            AuthState::A9 => "A9 (content stream management)",
        };
        f.write_str(name)
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    LinkSetup,
    Ended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_active_state_can_fall_back_to_h1() {
        for state in AuthState::ALL {
            if state == AuthState::H0 || state == AuthState::H1 {
                continue;
            }
            assert!(state.can_transition_to(AuthState::H1), "{state} has no H1 fallback");
        }
    }

    #[test]
    fn every_state_can_be_torn_down() {
        for state in AuthState::ALL {
            if state == AuthState::H0 {
                continue;
            }
            assert!(state.can_transition_to(AuthState::H0), "{state} cannot reach H0");
        }
    }

    #[test]
    fn happy_path_is_legal() {
        use AuthState::*;
        let receiver = [H0, H1, A0, A1, A2, A3, A4, A5];
        for pair in receiver.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        let repeater = [A4, A6, A7, A8, A9, A5];
        for pair in repeater.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_phases_is_illegal() {
        use AuthState::*;
        assert!(!H1.can_transition_to(A5));
        assert!(!A0.can_transition_to(A2));
        assert!(!A3.can_transition_to(A5));
        assert!(!A6.can_transition_to(A5));
        assert!(!H0.can_transition_to(A0));
    }

    #[test]
    fn every_successor_is_a_known_state() {
        for state in AuthState::ALL {
            for next in state.successors() {
                assert!(AuthState::ALL.contains(next));
            }
        }
    }

    #[test]
    fn only_a5_is_authenticated() {
        for state in AuthState::ALL {
            assert_eq!(state.is_authenticated(), state == AuthState::A5);
        }
    }
}
