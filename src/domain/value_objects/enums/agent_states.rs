use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Activation lifecycle of a registered delivery agent.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Installing,
    Waiting,
    Activated,
    Redundant,
}

impl Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            AgentState::Installing => "installing",
            AgentState::Waiting => "waiting",
            AgentState::Activated => "activated",
            AgentState::Redundant => "redundant",
        };
        write!(f, "{}", state)
    }
}
