//! Maps a stream request onto a use-case and an engine stream type.
//!
//! The two directions deliberately follow different matching rules. Output
//! flags are compared by exact combination for several legacy entries,
//! input flags are always tested bit by bit. Buffer sizing depends on the
//! resulting stream type, so both rule sets must stay as they are.
//!
//! Classification never fails: unknown combinations fall back to a usable
//! default and are logged.

use crate::models::audio_models::{AudioSource, Direction, InputFlags, OutputFlags};
use crate::models::stream_types::{Classification, HardwareStreamType, RecordDirection, UseCase};
use crate::policy::constants::LOW_LATENCY_CAPTURE_SAMPLE_RATE;

/// Everything the classifier looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierInput {
    pub direction: Direction,
    pub output_flags: OutputFlags,
    pub input_flags: InputFlags,
    pub source: AudioSource,
    pub sample_rate: u32,
    /// Whether a proxy device is currently routed.
    pub proxy_routed: bool,
}

pub fn classify(input: &ClassifierInput) -> Classification {
    match input.direction {
        Direction::Output => Classification {
            use_case: output_use_case(input.output_flags),
            stream_type: output_stream_type(input.output_flags),
            record_direction: None,
        },
        Direction::Input => Classification {
            use_case: input_use_case(input.input_flags, input.source, input.sample_rate, input.proxy_routed),
            stream_type: input_stream_type(input.input_flags, input.source, input.sample_rate, input.proxy_routed),
            record_direction: record_direction(input.source),
        },
    }
}

pub fn output_stream_type(flags: OutputFlags) -> HardwareStreamType {
    if flags.contains(OutputFlags::VOIP_RX) {
        return HardwareStreamType::VoipRx;
    }

    if flags.contains(OutputFlags::RAW) {
        HardwareStreamType::UltraLowLatency
    } else if flags.contains(OutputFlags::FAST) {
        HardwareStreamType::LowLatency
    } else if flags == OutputFlags::DEEP_BUFFER {
        HardwareStreamType::DeepBuffer
    } else if flags == OutputFlags::DIRECT | OutputFlags::MMAP_NOIRQ || flags.contains(OutputFlags::MMAP_NOIRQ) {
        HardwareStreamType::UltraLowLatency
    } else if flags == OutputFlags::DIRECT | OutputFlags::COMPRESS_OFFLOAD | OutputFlags::NON_BLOCKING {
        HardwareStreamType::Compressed
    } else if flags == OutputFlags::DIRECT {
        HardwareStreamType::PcmOffload
    } else if flags.contains(OutputFlags::COMPRESS_OFFLOAD) {
        HardwareStreamType::Compressed
    } else if flags == OutputFlags::INCALL_MUSIC {
        HardwareStreamType::VoiceCallMusic
    } else if flags.is_empty() {
        HardwareStreamType::LowLatency
    } else {
        log::warn!("unrecognized output flags {:?}, using generic stream", flags);
        HardwareStreamType::Generic
    }
}

pub fn output_use_case(flags: OutputFlags) -> UseCase {
    if flags.contains(OutputFlags::VOIP_RX) {
        UseCase::VoipPlayback
    } else if flags == OutputFlags::INCALL_MUSIC {
        UseCase::IncallMusicPlayback
    } else if flags.contains(OutputFlags::COMPRESS_OFFLOAD) {
        UseCase::CompressedOffloadPlayback
    } else if flags == OutputFlags::DIRECT {
        UseCase::PcmOffloadPlayback
    } else if flags.contains(OutputFlags::RAW) {
        UseCase::UltraLowLatencyPlayback
    } else if flags.contains(OutputFlags::FAST) {
        UseCase::LowLatencyPlayback
    } else if flags.contains(OutputFlags::DEEP_BUFFER) {
        UseCase::DeepBufferPlayback
    } else if flags.contains(OutputFlags::MMAP_NOIRQ) {
        UseCase::MmapPlayback
    } else {
        UseCase::LowLatencyPlayback
    }
}

/// The fast capture path: FAST at the low-latency rate, neither timestamped nor compressed.
fn is_fast_capture(flags: InputFlags, sample_rate: u32) -> bool {
    sample_rate == LOW_LATENCY_CAPTURE_SAMPLE_RATE
        && flags.contains(InputFlags::FAST)
        && !flags.intersects(InputFlags::TIMESTAMP | InputFlags::COMPRESS)
}

pub fn input_stream_type(flags: InputFlags, source: AudioSource, sample_rate: u32, proxy_routed: bool) -> HardwareStreamType {
    if source.is_voice_call() {
        return HardwareStreamType::VoiceCallRecord;
    }
    if flags.contains(InputFlags::VOIP_TX) {
        return HardwareStreamType::VoipTx;
    }
    if is_fast_capture(flags, sample_rate) {
        return if proxy_routed {
            HardwareStreamType::Proxy
        } else {
            HardwareStreamType::UltraLowLatency
        };
    }

    if flags.contains(InputFlags::RAW) {
        HardwareStreamType::Raw
    } else if flags.contains(InputFlags::DIRECT) {
        HardwareStreamType::Raw
    } else if flags.contains(InputFlags::VOIP_TX) {
        HardwareStreamType::VoipTx
    } else if flags.contains(InputFlags::MMAP_NOIRQ) {
        HardwareStreamType::UltraLowLatency
    } else if flags.is_empty() {
        HardwareStreamType::DeepBuffer
    } else {
        let unsupported = flags.difference(InputFlags::FAST);
        if !unsupported.is_empty() {
            log::warn!("unsupported input flags {:?}, using low latency stream", unsupported);
        }
        HardwareStreamType::LowLatency
    }
}

pub fn input_use_case(flags: InputFlags, source: AudioSource, sample_rate: u32, proxy_routed: bool) -> UseCase {
    if source.is_voice_call() {
        UseCase::IncallRecord
    } else if flags.contains(InputFlags::MMAP_NOIRQ) {
        UseCase::MmapRecord
    } else if source == AudioSource::VoiceCommunication && flags.contains(InputFlags::VOIP_TX) {
        UseCase::VoipRecord
    } else if is_fast_capture(flags, sample_rate) {
        if proxy_routed {
            UseCase::ProxyRecord
        } else {
            UseCase::LowLatencyRecord
        }
    } else {
        UseCase::Record
    }
}

pub fn record_direction(source: AudioSource) -> Option<RecordDirection> {
    match source {
        AudioSource::VoiceUplink => Some(RecordDirection::Uplink),
        AudioSource::VoiceDownlink => Some(RecordDirection::Downlink),
        AudioSource::VoiceCall => Some(RecordDirection::UplinkDownlink),
        _ => None,
    }
}
