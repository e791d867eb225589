use crate::domain::model::{Command, PowerStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProjectorState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    PoweringOn,
    PoweringOff,
    ReadyForUse,
    Error,
}

impl fmt::Display for ProjectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProjectorState::Disconnected => "Disconnected",
            ProjectorState::Connecting => "Connecting",
            ProjectorState::Connected => "Connected",
            ProjectorState::PoweringOn => "PoweringOn",
            ProjectorState::PoweringOff => "PoweringOff",
            ProjectorState::ReadyForUse => "ReadyForUse",
            ProjectorState::Error => "Error",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ProjectorState,
    pub to: ProjectorState,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectorStateMachine {
    state: ProjectorState,
    error_message: String,
}

impl ProjectorStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProjectorState {
        self.state
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Returns the transition when the state actually changed.
    pub fn set_state(&mut self, new_state: ProjectorState) -> Option<StateTransition> {
        if self.state == new_state {
            return None;
        }

        let transition = StateTransition {
            from: self.state,
            to: new_state,
        };
        self.state = new_state;

        if new_state != ProjectorState::Error {
            self.error_message.clear();
        }

        tracing::debug!("State changed: {} -> {}", transition.from, transition.to);
        Some(transition)
    }

    pub fn can_perform(&self, command: Command) -> bool {
        match self.state {
            ProjectorState::Disconnected | ProjectorState::Connecting => false,
            ProjectorState::Connected => matches!(
                command,
                Command::Powr | Command::Name | Command::Inf1 | Command::Inf2 | Command::Clss
            ),
            ProjectorState::PoweringOn | ProjectorState::PoweringOff | ProjectorState::Error => {
                matches!(command, Command::Powr | Command::Erst)
            }
            ProjectorState::ReadyForUse => true,
        }
    }

    pub fn update_from_power_status(&mut self, power: PowerStatus) -> Option<StateTransition> {
        let next = match power {
            PowerStatus::PoweredOff => match self.state {
                ProjectorState::Disconnected | ProjectorState::Error => None,
                _ => Some(ProjectorState::Connected),
            },
            PowerStatus::PoweredOn => (self.state != ProjectorState::Error)
                .then_some(ProjectorState::ReadyForUse),
            PowerStatus::CoolingDown => (self.state != ProjectorState::Error)
                .then_some(ProjectorState::PoweringOff),
            PowerStatus::WarmingUp => (self.state != ProjectorState::Error)
                .then_some(ProjectorState::PoweringOn),
            PowerStatus::Unknown => None,
        };

        next.and_then(|state| self.set_state(state))
    }

    pub fn update_from_connection_status(&mut self, connected: bool) -> Option<StateTransition> {
        if connected {
            if self.state == ProjectorState::Disconnected {
                return self.set_state(ProjectorState::Connected);
            }
            None
        } else {
            self.set_state(ProjectorState::Disconnected)
        }
    }

    pub fn set_error_state(&mut self, message: impl Into<String>) -> Option<StateTransition> {
        self.error_message = message.into();
        self.set_state(ProjectorState::Error)
    }

    /// Leaves the error state for Connected; a following power query refines it.
    pub fn reset_error(&mut self) -> Option<StateTransition> {
        if self.state == ProjectorState::Error {
            self.set_state(ProjectorState::Connected)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_gating_by_state() {
        let mut machine = ProjectorStateMachine::new();
        assert!(!machine.can_perform(Command::Powr));

        machine.update_from_connection_status(true);
        assert_eq!(machine.state(), ProjectorState::Connected);
        assert!(machine.can_perform(Command::Powr));
        assert!(machine.can_perform(Command::Inf2));
        assert!(!machine.can_perform(Command::Inpt));
        assert!(!machine.can_perform(Command::Erst));

        machine.update_from_power_status(PowerStatus::WarmingUp);
        assert_eq!(machine.state(), ProjectorState::PoweringOn);
        assert!(machine.can_perform(Command::Erst));
        assert!(!machine.can_perform(Command::Name));

        machine.update_from_power_status(PowerStatus::PoweredOn);
        assert_eq!(machine.state(), ProjectorState::ReadyForUse);
        assert!(Command::ALL.iter().all(|c| machine.can_perform(*c)));
    }

    #[test]
    fn test_power_updates_respect_error_and_disconnected() {
        let mut machine = ProjectorStateMachine::new();
        assert!(machine
            .update_from_power_status(PowerStatus::PoweredOff)
            .is_none());
        assert_eq!(machine.state(), ProjectorState::Disconnected);

        machine.update_from_connection_status(true);
        machine.set_error_state("lamp failure");
        assert_eq!(machine.error_message(), "lamp failure");

        for power in [
            PowerStatus::PoweredOn,
            PowerStatus::PoweredOff,
            PowerStatus::CoolingDown,
            PowerStatus::WarmingUp,
            PowerStatus::Unknown,
        ] {
            assert!(machine.update_from_power_status(power).is_none());
        }
        assert_eq!(machine.state(), ProjectorState::Error);
    }

    #[test]
    fn test_set_state_clears_error_message() {
        let mut machine = ProjectorStateMachine::new();
        machine.set_error_state("socket error");
        assert!(machine.set_state(ProjectorState::Error).is_none());

        let transition = machine.reset_error().unwrap();
        assert_eq!(transition.from, ProjectorState::Error);
        assert_eq!(transition.to, ProjectorState::Connected);
        assert!(machine.error_message().is_empty());
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let mut machine = ProjectorStateMachine::new();
        machine.update_from_connection_status(true);
        machine.update_from_power_status(PowerStatus::PoweredOn);
        machine.update_from_connection_status(false);
        assert_eq!(machine.state(), ProjectorState::Disconnected);
        assert!(machine.update_from_connection_status(true).is_some());
        machine.update_from_power_status(PowerStatus::CoolingDown);
        assert_eq!(machine.state(), ProjectorState::PoweringOff);
    }
}
