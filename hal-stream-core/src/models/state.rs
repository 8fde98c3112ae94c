use serde::{Deserialize, Serialize};

/// Stream session lifecycle.
///
/// State transitions:
/// ```text
/// created → configured → started ⇄ paused
///    ↑          ↓           ↓        ↓
///    └──────  standby  ←────┴────────┘
///               ↓
///             closed (drop only)
/// ```
///
/// A hardware session handle exists exactly in `Configured`, `Started`
/// and `Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Configured,
    Started,
    Paused,
    Standby,
    Closed,
}

impl LifecycleState {
    pub fn has_hardware(&self) -> bool {
        matches!(self, Self::Configured | Self::Started | Self::Paused)
    }

    /// Started or paused: the hardware has been started at least once since open.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Started | Self::Paused)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether `open` may create a hardware session from this state.
    pub fn accepts_open(&self) -> bool {
        matches!(self, Self::Created | Self::Standby)
    }
}
