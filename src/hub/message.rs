//! Wire shape for events published on the [`super::Hub`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event published through the hub. `mode` is absent for events that
/// aren't mode-scoped (e.g. `watcher_enabled`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub kind: HubEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub payload: Value,
}

impl HubMessage {
    pub fn new(kind: HubEventKind, mode: Option<String>, payload: Value) -> Self {
        Self { kind, mode, payload }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubEventKind {
    LoadingStarted,
    LoadingProgress,
    LoadingComplete,
    LoadingError,
    ReloadStarted,
    PriorityChanged,
    WatcherEnabled,
    WatcherDisabled,
    LgsSessionsUpdate,
    SimulatorProgress,
}
