use std::fmt::Display;

/// Lifecycle state of a stream poller.
///
/// ```text
///   Created ──start──▶ Polling ◀──resume── Paused
///      │                  │ └──pause──────▶  │
///      └──────close───────┴──────close───────┴──▶ Closed
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PollerState {
    Created = 0,
    Polling = 1,
    Paused = 2,
    Closed = 3,
}

impl PollerState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a value produced by [`PollerState::as_u8()`].
    ///
    /// # Panics
    ///
    /// Panics if `v` was not produced by [`PollerState::as_u8()`].
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Polling,
            2 => Self::Paused,
            3 => Self::Closed,
            _ => unreachable!("invalid poller state discriminant {v}"),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Polling => "POLLING",
            Self::Paused => "PAUSED",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminant_round_trip() {
        for state in [
            PollerState::Created,
            PollerState::Polling,
            PollerState::Paused,
            PollerState::Closed,
        ] {
            assert_eq!(PollerState::from_u8(state.as_u8()), state);
        }
        assert!(PollerState::Closed.is_terminal());
        assert!(!PollerState::Paused.is_terminal());
    }
}
