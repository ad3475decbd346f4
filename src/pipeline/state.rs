//! Recording lifecycle state

/// Lifecycle of the encoder
///
/// `Stop` is both the initial and the terminal state of a session; starting
/// again begins a new session.
///
/// ```text
/// Stop → Wait → Start ⇄ Pause → Stop
///   └──────────↗
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderStatus {
    /// No session
    #[default]
    Stop,

    /// Session started, waiting for its scheduled start time
    Wait,

    /// Frames are consumed and encoded
    Start,

    /// Frames are consumed and discarded
    Pause,
}

impl EncoderStatus {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &EncoderStatus) -> bool {
        use EncoderStatus::*;

        match (self, target) {
            (Stop, Wait) | (Stop, Start) => true,
            (Wait, Start) => true,
            (Start, Pause) | (Pause, Start) => true,

            // every session state can stop
            (Wait, Stop) | (Start, Stop) | (Pause, Stop) => true,

            (a, b) => a == b,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            EncoderStatus::Stop => "Stopped",
            EncoderStatus::Wait => "Waiting",
            EncoderStatus::Start => "Recording",
            EncoderStatus::Pause => "Paused",
        }
    }

    /// A session exists and isn't paused (recording or waiting to record)
    pub fn is_started(&self) -> bool {
        matches!(self, EncoderStatus::Start | EncoderStatus::Wait)
    }

    /// Frames are currently being encoded
    pub fn is_started_with_encode(&self) -> bool {
        matches!(self, EncoderStatus::Start)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, EncoderStatus::Pause)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, EncoderStatus::Stop)
    }
}

impl std::fmt::Display for EncoderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EncoderStatus::*;

    #[test]
    fn test_valid_transitions() {
        assert!(Stop.can_transition_to(&Wait));
        assert!(Stop.can_transition_to(&Start));
        assert!(Wait.can_transition_to(&Start));
        assert!(Start.can_transition_to(&Pause));
        assert!(Pause.can_transition_to(&Start));
        assert!(Wait.can_transition_to(&Stop));
        assert!(Pause.can_transition_to(&Stop));

        // Self-transitions
        assert!(Stop.can_transition_to(&Stop));
        assert!(Start.can_transition_to(&Start));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!Stop.can_transition_to(&Pause));
        assert!(!Wait.can_transition_to(&Pause));
        assert!(!Pause.can_transition_to(&Wait));
        assert!(!Start.can_transition_to(&Wait));
    }

    #[test]
    fn test_state_checks() {
        assert!(Wait.is_started());
        assert!(Start.is_started());
        assert!(!Pause.is_started());

        assert!(Start.is_started_with_encode());
        assert!(!Wait.is_started_with_encode());

        assert!(Pause.is_paused());
        assert!(Stop.is_stopped());
        assert!(!Pause.is_stopped());
    }
}
