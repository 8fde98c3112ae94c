//! Fragment geometry per stream type and use-case.
//!
//! Everything here is a pure function of its request.

use crate::models::audio_models::{bytes_per_frame, AudioFormat, Direction};
use crate::models::stream_types::{HardwareStreamType, UseCase};
use crate::policy::constants::*;

/// Inputs of the sizing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingRequest {
    pub direction: Direction,
    pub stream_type: HardwareStreamType,
    pub use_case: UseCase,
    pub format: AudioFormat,
    pub channel_count: u32,
    pub sample_rate: u32,
    /// Caller frame count, only used for proxy capture.
    pub frame_count: u32,
}

impl SizingRequest {
    pub fn bytes_per_frame(&self) -> usize {
        bytes_per_frame(self.format, self.channel_count)
    }
}

/// One transfer unit and the number of units buffered by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentGeometry {
    pub fragment_size: usize,
    pub fragment_count: usize,
}

impl FragmentGeometry {
    pub fn total_bytes(&self) -> usize {
        self.fragment_size * self.fragment_count
    }
}

/// Geometry configured on the engine session at open.
pub fn fragment_geometry(request: &SizingRequest) -> FragmentGeometry {
    match request.direction {
        Direction::Output => playback_geometry(request),
        Direction::Input => capture_geometry(request),
    }
}

fn playback_geometry(request: &SizingRequest) -> FragmentGeometry {
    let bpf = request.bytes_per_frame();
    let (fragment_size, mut fragment_count) = match request.use_case {
        UseCase::MmapPlayback => (MMAP_PERIOD_SIZE * bpf, MMAP_PERIOD_COUNT_DEFAULT),
        UseCase::UltraLowLatencyPlayback => (ULL_PERIOD_SIZE * bpf, ULL_PERIOD_COUNT_DEFAULT),
        _ => (playback_buffer_size(request), NO_OF_BUF),
    };

    match request.use_case {
        UseCase::LowLatencyPlayback => fragment_count = LOW_LATENCY_PLAYBACK_PERIOD_COUNT,
        UseCase::PcmOffloadPlayback => fragment_count = PCM_OFFLOAD_PLAYBACK_PERIOD_COUNT,
        UseCase::DeepBufferPlayback => fragment_count = DEEP_BUFFER_PLAYBACK_PERIOD_COUNT,
        _ => {}
    }

    FragmentGeometry { fragment_size, fragment_count }
}

fn capture_geometry(request: &SizingRequest) -> FragmentGeometry {
    let bpf = request.bytes_per_frame();
    match request.use_case {
        UseCase::MmapRecord => FragmentGeometry {
            fragment_size: MMAP_PERIOD_SIZE * bpf,
            fragment_count: MMAP_PERIOD_COUNT_DEFAULT,
        },
        UseCase::LowLatencyRecord => FragmentGeometry {
            fragment_size: ULL_PERIOD_SIZE * bpf,
            fragment_count: ULL_PERIOD_COUNT_DEFAULT,
        },
        _ => FragmentGeometry {
            fragment_size: capture_buffer_size(request),
            fragment_count: NO_OF_BUF,
        },
    }
}

/// Framework-visible output buffer size, keyed on the stream type.
pub fn playback_buffer_size(request: &SizingRequest) -> usize {
    let bpf = request.bytes_per_frame();
    match request.stream_type {
        HardwareStreamType::VoipRx => voip_buffer_size(request.sample_rate),
        HardwareStreamType::Compressed => compressed_fragment_size(request.format),
        HardwareStreamType::PcmOffload | HardwareStreamType::DeepBuffer => {
            pcm_offload_fragment_size(request.format, request.channel_count, request.sample_rate)
        }
        HardwareStreamType::LowLatency => LOW_LATENCY_PLAYBACK_PERIOD_SIZE * bpf,
        HardwareStreamType::UltraLowLatency => ULL_PERIOD_SIZE * ULL_PERIOD_MULTIPLIER * bpf,
        _ => BUF_SIZE_PLAYBACK * NO_OF_BUF,
    }
}

/// Framework-visible input buffer size, keyed on the stream type.
pub fn capture_buffer_size(request: &SizingRequest) -> usize {
    let bpf = request.bytes_per_frame();
    match request.stream_type {
        HardwareStreamType::VoipTx => voip_buffer_size(request.sample_rate),
        HardwareStreamType::LowLatency => LOW_LATENCY_CAPTURE_PERIOD_SIZE * bpf,
        HardwareStreamType::UltraLowLatency => ULL_PERIOD_SIZE * ULL_PERIOD_MULTIPLIER * bpf,
        HardwareStreamType::DeepBuffer => {
            (request.sample_rate as usize * AUDIO_CAPTURE_PERIOD_DURATION_MS as usize / 1000) * bpf
        }
        HardwareStreamType::Proxy => request.frame_count as usize * bpf,
        _ => BUF_SIZE_CAPTURE * NO_OF_BUF,
    }
}

/// Compressed offload fragments do not depend on the sample rate.
pub fn compressed_fragment_size(format: AudioFormat) -> usize {
    match format {
        AudioFormat::Flac => FLAC_COMPRESS_OFFLOAD_FRAGMENT_SIZE,
        _ => COMPRESS_OFFLOAD_FRAGMENT_SIZE,
    }
}

/// 80 ms of audio, clamped to the PCM fragment bounds and aligned to 32 frames.
///
/// Alignment rounds up unless that would leave the maximum, in which case
/// the size steps down to the previous aligned value.
pub fn pcm_offload_fragment_size(format: AudioFormat, channels: u32, sample_rate: u32) -> usize {
    let bpf = bytes_per_frame(format, channels);
    let raw = PCM_OFFLOAD_OUTPUT_PERIOD_DURATION_MS as usize * sample_rate as usize * bpf / 1000;
    let clamped = raw.clamp(MIN_PCM_FRAGMENT_SIZE, MAX_PCM_FRAGMENT_SIZE);

    let step = bpf * PCM_FRAGMENT_ALIGN_FRAMES;
    let aligned = clamped.div_ceil(step) * step;
    if aligned > MAX_PCM_FRAGMENT_SIZE {
        aligned - step
    } else {
        aligned
    }
}

/// VoIP buffers come from a fixed table keyed on the exact rate.
pub fn voip_buffer_size(sample_rate: u32) -> usize {
    match sample_rate {
        48_000 => VOIP_BUFFER_SIZE_48K,
        32_000 => VOIP_BUFFER_SIZE_32K,
        16_000 => VOIP_BUFFER_SIZE_16K,
        _ => VOIP_BUFFER_SIZE_8K,
    }
}

/// Scratch size for format conversion: one PCM offload period in the hardware format.
pub fn conversion_buffer_size(hardware_format: AudioFormat, channels: u32, sample_rate: u32) -> usize {
    PCM_OFFLOAD_OUTPUT_PERIOD_DURATION_MS as usize * sample_rate as usize * bytes_per_frame(hardware_format, channels)
        / 1000
}
