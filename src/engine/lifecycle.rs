//! Engine lifecycle.
//!
//! Initializing -> WarmingUp -> Active, gated by a warm-up tick count.
//! Operator commands move the engine between Active, Paused, ClosingOnly
//! and Stopped. Stopped is final.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Initializing,
    WarmingUp,
    Active,
    Paused,
    /// Manage open positions, open nothing new
    ClosingOnly,
    Stopped,
}

impl LifecycleState {
    pub fn allows_entries(&self) -> bool {
        matches!(self, LifecycleState::Active)
    }

    pub fn allows_exits(&self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::ClosingOnly)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::WarmingUp => "WARMING_UP",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Paused => "PAUSED",
            LifecycleState::ClosingOnly => "CLOSING_ONLY",
            LifecycleState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Operator request, applied at the start of the next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    ClosingOnly,
    Stop,
}

pub type StateChange = (LifecycleState, LifecycleState);

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    warm_up_ticks: u32,
    ticks_seen: u32,
    warmed_up: bool,
}

impl Lifecycle {
    pub fn new(warm_up_ticks: u32) -> Self {
        Self {
            state: LifecycleState::Initializing,
            warm_up_ticks,
            ticks_seen: 0,
            warmed_up: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, to: LifecycleState) -> Option<StateChange> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some((from, to))
    }

    /// Count one tick and progress warm-up. Returns every transition taken.
    pub fn advance(&mut self) -> Vec<StateChange> {
        let mut changes = Vec::new();
        if !matches!(
            self.state,
            LifecycleState::Initializing | LifecycleState::WarmingUp
        ) {
            return changes;
        }

        self.ticks_seen = self.ticks_seen.saturating_add(1);
        if self.state == LifecycleState::Initializing {
            changes.extend(self.transition(LifecycleState::WarmingUp));
        }
        if self.ticks_seen > self.warm_up_ticks {
            self.warmed_up = true;
            changes.extend(self.transition(LifecycleState::Active));
        }
        changes
    }

    pub fn apply(&mut self, command: Command) -> Option<StateChange> {
        if self.state == LifecycleState::Stopped {
            return None;
        }
        match command {
            Command::Pause => self.transition(LifecycleState::Paused),
            Command::ClosingOnly => self.transition(LifecycleState::ClosingOnly),
            Command::Stop => self.transition(LifecycleState::Stopped),
            Command::Resume => match self.state {
                LifecycleState::Paused | LifecycleState::ClosingOnly => {
                    let to = if self.warmed_up {
                        LifecycleState::Active
                    } else {
                        LifecycleState::WarmingUp
                    };
                    self.transition(to)
                }
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn zero_warm_up_activates_on_first_tick() {
        let mut lc = Lifecycle::new(0);
        assert_eq!(lc.advance(), vec![(Initializing, WarmingUp), (WarmingUp, Active)]);
        assert!(lc.state().allows_entries());
        assert!(lc.advance().is_empty());
    }

    #[test]
    fn warm_up_blocks_trading() {
        let mut lc = Lifecycle::new(2);
        assert_eq!(lc.advance(), vec![(Initializing, WarmingUp)]);
        assert!(!lc.state().allows_entries());
        assert!(!lc.state().allows_exits());
        assert!(lc.advance().is_empty());
        assert_eq!(lc.advance(), vec![(WarmingUp, Active)]);
    }

    #[test]
    fn commands_move_between_operating_states() {
        let mut lc = Lifecycle::new(0);
        lc.advance();

        assert_eq!(lc.apply(Command::ClosingOnly), Some((Active, ClosingOnly)));
        assert!(lc.state().allows_exits());
        assert!(!lc.state().allows_entries());

        assert_eq!(lc.apply(Command::Pause), Some((ClosingOnly, Paused)));
        assert!(!lc.state().allows_exits());
        assert!(lc.advance().is_empty());

        assert_eq!(lc.apply(Command::Resume), Some((Paused, Active)));
        assert_eq!(lc.apply(Command::Resume), None);
    }

    #[test]
    fn resume_before_warm_up_returns_to_warming() {
        let mut lc = Lifecycle::new(5);
        lc.advance();
        lc.apply(Command::Pause);
        assert_eq!(lc.apply(Command::Resume), Some((Paused, WarmingUp)));
    }

    #[test]
    fn stopped_is_final() {
        let mut lc = Lifecycle::new(0);
        lc.advance();
        assert_eq!(lc.apply(Command::Stop), Some((Active, Stopped)));
        assert_eq!(lc.apply(Command::Resume), None);
        assert_eq!(lc.apply(Command::Pause), None);
        assert!(lc.advance().is_empty());
        assert_eq!(lc.state(), Stopped);
    }
}
