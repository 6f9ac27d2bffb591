//! Runtime events consumed by the control loop

use crate::ContainerId;
use serde::{Deserialize, Serialize};

/// A container lifecycle change relevant to forwarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ContainerEvent {
    /// The container is now running
    Started(ContainerId),
    /// The container is no longer running
    Stopped(ContainerId),
}

impl ContainerEvent {
    /// Map a runtime container action to an event.
    ///
    /// `start` and `unpause` bring a container's ports up, `stop`, `pause` and
    /// `die` take them down. Every other action is ignored.
    pub fn from_action(action: &str, id: impl Into<ContainerId>) -> Option<Self> {
        match action {
            "start" | "unpause" => Some(ContainerEvent::Started(id.into())),
            "stop" | "pause" | "die" => Some(ContainerEvent::Stopped(id.into())),
            _ => None,
        }
    }

    pub fn container_id(&self) -> &str {
        match self {
            ContainerEvent::Started(id) | ContainerEvent::Stopped(id) => id,
        }
    }
}
