//! Turn lifecycle: `Idle → Running → {Succeeded, Failed, Aborted} → Idle`.
//!
//! The transition functions here are the only gate on starting a turn. A
//! turn can only begin from `Idle`, so a second start while one is `Running`
//! is rejected rather than queued.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

/// Terminal phases a running turn may settle into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Succeeded,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: TurnPhase,
    pub to: TurnPhase,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid turn transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

impl TurnPhase {
    pub fn is_running(self) -> bool {
        self == TurnPhase::Running
    }

    /// `Idle → Running`.
    pub fn begin(self) -> Result<TurnPhase, InvalidTransition> {
        match self {
            TurnPhase::Idle => Ok(TurnPhase::Running),
            from => Err(InvalidTransition {
                from,
                to: TurnPhase::Running,
            }),
        }
    }

    /// `Running → Succeeded | Failed | Aborted`.
    pub fn settle(self, outcome: Settled) -> Result<TurnPhase, InvalidTransition> {
        let to = match outcome {
            Settled::Succeeded => TurnPhase::Succeeded,
            Settled::Failed => TurnPhase::Failed,
            Settled::Aborted => TurnPhase::Aborted,
        };
        match self {
            TurnPhase::Running => Ok(to),
            from => Err(InvalidTransition { from, to }),
        }
    }

    /// Terminal phase `→ Idle`.
    pub fn release(self) -> Result<TurnPhase, InvalidTransition> {
        match self {
            TurnPhase::Succeeded | TurnPhase::Failed | TurnPhase::Aborted => Ok(TurnPhase::Idle),
            from => Err(InvalidTransition {
                from,
                to: TurnPhase::Idle,
            }),
        }
    }
}
