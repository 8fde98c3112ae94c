use std::sync::Arc;

use thiserror::Error;

use crate::models::audio_models::{AudioFormat, ChannelInfo, ChannelMask, CodecConfig, Direction, GaplessMetadata, MediaFormatId, VolumeData};
use crate::models::device::{DeviceDescriptor, DeviceId, UsbAddress};
use crate::models::error::StreamError;
use crate::models::stream_types::{HardwareStreamType, RecordDirection};

/// Status returned by the audio engine. Negative values are errno-style.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("engine status {0}")]
pub struct EngineError(pub i32);

pub type EngineResult<T> = Result<T, EngineError>;

/// How the engine moves data for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Blocking,
    NonBlocking,
    Mmap,
    MmapNoIrq,
}

/// Optional flavour of a proxy capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyTxType {
    WifiDisplay,
}

/// Media format of the session as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    pub sample_rate: u32,
    pub bit_width: u32,
    pub format_id: MediaFormatId,
    pub channel_info: ChannelInfo,
}

/// Everything the engine needs to instantiate a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAttributes {
    pub direction: Direction,
    pub stream_type: HardwareStreamType,
    pub transfer_mode: TransferMode,
    pub media: MediaConfig,
    pub record_direction: Option<RecordDirection>,
    pub proxy_tx: Option<ProxyTxType>,
}

/// Buffer geometry handed to the engine after open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferConfig {
    pub input_size: usize,
    pub input_count: usize,
    pub output_size: usize,
    pub output_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    Full,
    Partial,
}

/// Session-level parameters pushed through `set_param`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionParam {
    CodecConfiguration(CodecConfig),
    GaplessMetadata(GaplessMetadata),
    /// Stop a detection session from buffering capture data.
    StopBuffering,
}

/// Capture pre-processing effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessEffect {
    EchoCancellation,
    NoiseSuppression,
    EchoCancellationNoiseSuppression,
}

/// Shared-memory region for mmap sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapBufferInfo {
    pub shared_memory_fd: i32,
    pub buffer_size_frames: u32,
    pub burst_size_frames: u32,
    pub application_shareable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapPosition {
    pub position_frames: i64,
    pub time_nanoseconds: i64,
}

/// Formats a device can run at, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapability {
    pub sample_rate: u32,
    pub channel_mask: ChannelMask,
    pub format: AudioFormat,
}

/// Platform-level queries that are not tied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformQuery {
    A2dpEncoderLatency,
    DeviceCapability {
        device: DeviceId,
        address: UsbAddress,
        playback: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformReply {
    LatencyMs(u32),
    Capability(DeviceCapability),
}

/// Asynchronous notifications raised by the engine on its own thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    WriteReady,
    DrainReady,
    PartialDrainReady,
    Error,
    /// Anything the engine sends that this layer does not understand.
    Unknown(u32),
}

/// Receiver for engine events of one session.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: HardwareEvent) -> Result<(), StreamError>;
}

/// Entry point of the audio engine.
pub trait HardwareEngine: Send + Sync {
    /// Create a session routed to `devices`. Events go to `events`.
    fn open(
        &self,
        attributes: &StreamAttributes,
        devices: &[DeviceDescriptor],
        events: Arc<dyn EventSink>,
    ) -> EngineResult<Box<dyn HardwareSession>>;

    fn get_parameter(&self, query: &PlatformQuery) -> EngineResult<PlatformReply>;
}

/// One open engine session.
///
/// Every call is synchronous; reads and writes return the number of bytes
/// the engine actually moved.
pub trait HardwareSession: Send {
    fn start(&mut self) -> EngineResult<()>;

    fn stop(&mut self) -> EngineResult<()>;

    fn pause(&mut self) -> EngineResult<()>;

    fn resume(&mut self) -> EngineResult<()>;

    fn flush(&mut self) -> EngineResult<()>;

    fn drain(&mut self, mode: DrainMode) -> EngineResult<()>;

    fn write(&mut self, data: &[u8]) -> EngineResult<usize>;

    /// Zero bytes means "no data yet".
    fn read(&mut self, buffer: &mut [u8]) -> EngineResult<usize>;

    fn set_devices(&mut self, devices: &[DeviceDescriptor]) -> EngineResult<()>;

    fn set_volume(&mut self, volume: &VolumeData) -> EngineResult<()>;

    fn set_param(&mut self, param: &SessionParam) -> EngineResult<()>;

    fn set_buffer_size(&mut self, config: &BufferConfig) -> EngineResult<()>;

    /// Microseconds rendered so far.
    fn get_timestamp(&mut self) -> EngineResult<u64> {
        Err(EngineError(-libc::ENOSYS))
    }

    fn create_mmap_buffer(&mut self, _min_size_frames: i32) -> EngineResult<MmapBufferInfo> {
        Err(EngineError(-libc::ENOSYS))
    }

    fn get_mmap_position(&mut self) -> EngineResult<MmapPosition> {
        Err(EngineError(-libc::ENOSYS))
    }

    fn add_remove_effect(&mut self, _effect: PreprocessEffect, _enable: bool) -> EngineResult<()> {
        Err(EngineError(-libc::ENOSYS))
    }

    /// Release the session. The handle is gone afterwards whatever the status.
    fn close(self: Box<Self>) -> EngineResult<()>;
}
