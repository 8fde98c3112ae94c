use std::time::Instant;

use crate::models::stream_types::{HardwareStreamType, UseCase};
use crate::policy::constants::*;
use crate::policy::sizing::FragmentGeometry;

/// Frames handed to the listener, and when that count was valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationPosition {
    pub frames: u64,
    pub timestamp: Instant,
}

/// What the tracker needs to know about the stream to estimate downstream buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackGeometry {
    pub geometry: FragmentGeometry,
    pub bytes_per_frame: usize,
    pub sample_rate: u32,
    pub stream_type: HardwareStreamType,
}

/// Byte counter plus the instant of the last transfer.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    total_bytes: u64,
    last_transfer: Option<Instant>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transfer(&mut self, bytes: usize, at: Instant) {
        self.total_bytes += bytes as u64;
        self.last_transfer = Some(at);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn last_transfer(&self) -> Option<Instant> {
        self.last_transfer
    }

    pub fn reset(&mut self) {
        self.total_bytes = 0;
    }

    pub fn frames(&self, bytes_per_frame: usize) -> u64 {
        self.total_bytes / bytes_per_frame.max(1) as u64
    }

    /// Frames written minus what is still buffered in the kernel, the DSP
    /// and, when routed to A2DP, the Bluetooth encoder.
    ///
    /// A non-positive estimate reports zero frames stamped with `now`.
    pub fn presented(&self, playback: &PlaybackGeometry, bt_latency_ms: Option<u32>, now: Instant) -> PresentationPosition {
        let bpf = playback.bytes_per_frame.max(1) as u64;
        let written = self.total_bytes / bpf;
        let kernel = playback.geometry.total_bytes() as u64 / bpf;
        let dsp = render_latency_us(playback.stream_type) * u64::from(playback.sample_rate) / 1_000_000;
        let bt = bt_latency_ms.map_or(0, |ms| u64::from(ms) * u64::from(playback.sample_rate) / 1000);

        let frames = written.saturating_sub(kernel + dsp).saturating_sub(bt);
        let timestamp = match self.last_transfer {
            Some(at) if frames > 0 => at,
            _ => now,
        };
        PresentationPosition { frames, timestamp }
    }
}

/// Fixed DSP delay of a playback stream type, in microseconds.
pub fn render_latency_us(stream_type: HardwareStreamType) -> u64 {
    match stream_type {
        HardwareStreamType::DeepBuffer => DEEP_BUFFER_PLATFORM_DELAY_US,
        HardwareStreamType::LowLatency => LOW_LATENCY_PLATFORM_DELAY_US,
        HardwareStreamType::Compressed | HardwareStreamType::PcmOffload => PCM_OFFLOAD_PLATFORM_DELAY_US,
        HardwareStreamType::UltraLowLatency => ULL_PLATFORM_DELAY_US,
        _ => 0,
    }
}

/// Framework-reported playback latency in milliseconds.
pub fn playback_latency_ms(use_case: UseCase, stream_type: HardwareStreamType, bt_latency_ms: Option<u32>) -> u32 {
    let render_ms = (render_latency_us(stream_type) / 1000) as u32;
    let base = match use_case {
        UseCase::CompressedOffloadPlayback => COMPRESS_OFFLOAD_PLAYBACK_LATENCY_MS,
        UseCase::UltraLowLatencyPlayback | UseCase::MmapPlayback => {
            let period_ms = (ULL_PERIOD_MULTIPLIER * ULL_PERIOD_SIZE * 1000) as u32 / DEFAULT_OUTPUT_SAMPLING_RATE;
            period_ms + render_ms
        }
        UseCase::PcmOffloadPlayback => PCM_OFFLOAD_OUTPUT_PERIOD_DURATION_MS + render_ms,
        UseCase::DeepBufferPlayback => DEEP_BUFFER_OUTPUT_PERIOD_DURATION_MS + render_ms,
        UseCase::LowLatencyPlayback => LOW_LATENCY_OUTPUT_PERIOD_DURATION_MS + render_ms,
        UseCase::VoipPlayback => VOIP_PERIOD_COUNT_DEFAULT * DEFAULT_VOIP_BUF_DURATION_MS * DEFAULT_VOIP_BIT_DEPTH_BYTES / 2,
        _ => render_ms,
    };
    base + bt_latency_ms.unwrap_or(0)
}

/// Frames rendered according to an engine session timestamp.
pub fn frames_from_micros(micros: u64, sample_rate: u32) -> u64 {
    micros * u64::from(sample_rate) / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn low_latency_stereo() -> PlaybackGeometry {
        PlaybackGeometry {
            geometry: FragmentGeometry { fragment_size: 960, fragment_count: 8 },
            bytes_per_frame: 4,
            sample_rate: 48_000,
            stream_type: HardwareStreamType::LowLatency,
        }
    }

    #[test]
    fn subtracts_kernel_and_dsp() {
        let mut tracker = PositionTracker::new();
        let written_at = Instant::now();
        // one second of stereo 16-bit
        tracker.record_transfer(48_000 * 4, written_at);

        let later = written_at + Duration::from_millis(5);
        let pos = tracker.presented(&low_latency_stereo(), None, later);
        // kernel: 7680 / 4 = 1920 frames, dsp: 13 ms = 624 frames
        assert_eq!(pos.frames, 48_000 - 1920 - 624);
        assert_eq!(pos.timestamp, written_at);
    }

    #[test]
    fn a2dp_latency_is_subtracted() {
        let mut tracker = PositionTracker::new();
        let now = Instant::now();
        tracker.record_transfer(48_000 * 4, now);
        let pos = tracker.presented(&low_latency_stereo(), Some(100), now);
        assert_eq!(pos.frames, 48_000 - 1920 - 624 - 4800);
    }

    #[test]
    fn never_negative() {
        let mut tracker = PositionTracker::new();
        let written_at = Instant::now();
        tracker.record_transfer(100, written_at);
        let now = written_at + Duration::from_millis(1);
        let pos = tracker.presented(&low_latency_stereo(), Some(200), now);
        assert_eq!(pos.frames, 0);
        assert_eq!(pos.timestamp, now);
    }

    #[test]
    fn reset_clears_bytes_only() {
        let mut tracker = PositionTracker::new();
        let at = Instant::now();
        tracker.record_transfer(4096, at);
        tracker.reset();
        assert_eq!(tracker.total_bytes(), 0);
        assert_eq!(tracker.last_transfer(), Some(at));
    }

    #[test]
    fn render_latencies() {
        assert_eq!(render_latency_us(HardwareStreamType::DeepBuffer), 29_000);
        assert_eq!(render_latency_us(HardwareStreamType::LowLatency), 13_000);
        assert_eq!(render_latency_us(HardwareStreamType::Compressed), 30_000);
        assert_eq!(render_latency_us(HardwareStreamType::PcmOffload), 30_000);
        assert_eq!(render_latency_us(HardwareStreamType::UltraLowLatency), 4_000);
        assert_eq!(render_latency_us(HardwareStreamType::VoipRx), 0);
    }

    #[test]
    fn latency_per_use_case() {
        assert_eq!(
            playback_latency_ms(UseCase::CompressedOffloadPlayback, HardwareStreamType::Compressed, None),
            50
        );
        assert_eq!(playback_latency_ms(UseCase::LowLatencyPlayback, HardwareStreamType::LowLatency, None), 18);
        assert_eq!(playback_latency_ms(UseCase::DeepBufferPlayback, HardwareStreamType::DeepBuffer, None), 69);
        assert_eq!(playback_latency_ms(UseCase::PcmOffloadPlayback, HardwareStreamType::PcmOffload, None), 110);
        assert_eq!(playback_latency_ms(UseCase::MmapPlayback, HardwareStreamType::UltraLowLatency, None), 7);
        assert_eq!(playback_latency_ms(UseCase::VoipPlayback, HardwareStreamType::VoipRx, Some(150)), 190);
    }

    #[test]
    fn session_time_to_frames() {
        assert_eq!(frames_from_micros(1_500_000, 48_000), 72_000);
    }
}
