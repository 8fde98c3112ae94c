use serde::{Deserialize, Serialize};

/// Named audio session category. Drives buffer policy and engine stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    LowLatencyPlayback,
    DeepBufferPlayback,
    CompressedOffloadPlayback,
    PcmOffloadPlayback,
    UltraLowLatencyPlayback,
    MmapPlayback,
    VoipPlayback,
    IncallMusicPlayback,
    Record,
    LowLatencyRecord,
    MmapRecord,
    VoipRecord,
    ProxyRecord,
    IncallRecord,
}

impl UseCase {
    pub fn is_mmap(self) -> bool {
        matches!(self, Self::MmapPlayback | Self::MmapRecord)
    }

    pub fn is_playback(self) -> bool {
        matches!(
            self,
            Self::LowLatencyPlayback
                | Self::DeepBufferPlayback
                | Self::CompressedOffloadPlayback
                | Self::PcmOffloadPlayback
                | Self::UltraLowLatencyPlayback
                | Self::MmapPlayback
                | Self::VoipPlayback
                | Self::IncallMusicPlayback
        )
    }
}

/// Transfer mode the engine instantiates for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareStreamType {
    LowLatency,
    DeepBuffer,
    Compressed,
    PcmOffload,
    UltraLowLatency,
    Raw,
    VoipRx,
    VoipTx,
    Proxy,
    VoiceCallRecord,
    VoiceCallMusic,
    Generic,
}

impl HardwareStreamType {
    /// Stream types that carry offload effect and visualizer hooks.
    pub fn uses_offload_effects(self) -> bool {
        matches!(self, Self::Compressed | Self::PcmOffload)
    }
}

/// Which leg of a voice call a call-record session taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordDirection {
    Uplink,
    Downlink,
    UplinkDownlink,
}

/// Result of classifying a stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub use_case: UseCase,
    pub stream_type: HardwareStreamType,
    pub record_direction: Option<RecordDirection>,
}
