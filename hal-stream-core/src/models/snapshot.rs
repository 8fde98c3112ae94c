use serde::{Deserialize, Serialize};

use super::audio_models::{AudioFormat, Direction};
use super::device::DeviceId;
use super::state::LifecycleState;
use super::stream_types::{HardwareStreamType, UseCase};

/// Point-in-time view of a session, for dumps and bug reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub io_handle: u32,
    pub created_at: String,
    pub direction: Direction,
    pub use_case: UseCase,
    pub stream_type: HardwareStreamType,
    pub state: LifecycleState,
    pub sample_rate: u32,
    pub channels: u32,
    pub format: AudioFormat,
    pub fragment_size: usize,
    pub fragment_count: usize,
    pub transferred_bytes: u64,
    pub route: Vec<DeviceId>,
    pub volume_cached: bool,
    pub gapless_pending: bool,
    pub trigger_session: bool,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
