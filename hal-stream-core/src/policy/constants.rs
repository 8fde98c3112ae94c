//! Buffer and latency constants of the stream policy tables.

pub const DEFAULT_OUTPUT_SAMPLING_RATE: u32 = 48_000;
pub const LOW_LATENCY_CAPTURE_SAMPLE_RATE: u32 = 48_000;

pub const LOW_LATENCY_PLAYBACK_PERIOD_SIZE: usize = 240;
pub const LOW_LATENCY_PLAYBACK_PERIOD_COUNT: usize = 8;
pub const LOW_LATENCY_OUTPUT_PERIOD_DURATION_MS: u32 = 5;
pub const LOW_LATENCY_CAPTURE_PERIOD_SIZE: usize = 240;

pub const NO_OF_BUF: usize = 4;
pub const BUF_SIZE_PLAYBACK: usize = 960;
pub const BUF_SIZE_CAPTURE: usize = 960;

pub const PCM_OFFLOAD_OUTPUT_PERIOD_DURATION_MS: u32 = 80;
pub const PCM_OFFLOAD_PLAYBACK_PERIOD_COUNT: usize = 2;
pub const DEEP_BUFFER_OUTPUT_PERIOD_DURATION_MS: u32 = 40;
pub const DEEP_BUFFER_PLAYBACK_PERIOD_COUNT: usize = 2;
pub const MIN_PCM_FRAGMENT_SIZE: usize = 512;
pub const MAX_PCM_FRAGMENT_SIZE: usize = 240 * 1024;
/// Fragments are aligned to this many frames.
pub const PCM_FRAGMENT_ALIGN_FRAMES: usize = 32;

pub const ULL_PERIOD_SIZE: usize = DEFAULT_OUTPUT_SAMPLING_RATE as usize / 1000;
pub const ULL_PERIOD_MULTIPLIER: usize = 3;
pub const ULL_PERIOD_COUNT_DEFAULT: usize = 512;
pub const MMAP_PERIOD_SIZE: usize = DEFAULT_OUTPUT_SAMPLING_RATE as usize / 1000;
pub const MMAP_PERIOD_COUNT_DEFAULT: usize = 512;

pub const AUDIO_CAPTURE_PERIOD_DURATION_MS: u32 = 20;

pub const COMPRESS_OFFLOAD_FRAGMENT_SIZE: usize = 32 * 1024;
pub const FLAC_COMPRESS_OFFLOAD_FRAGMENT_SIZE: usize = 256 * 1024;
pub const COMPRESS_OFFLOAD_NUM_FRAGMENTS: usize = 4;
pub const COMPRESS_OFFLOAD_PLAYBACK_LATENCY_MS: u32 = 50;

pub const VOIP_BUFFER_SIZE_48K: usize = 1920;
pub const VOIP_BUFFER_SIZE_32K: usize = 1280;
pub const VOIP_BUFFER_SIZE_16K: usize = 640;
pub const VOIP_BUFFER_SIZE_8K: usize = 320;
pub const VOIP_PERIOD_COUNT_DEFAULT: u32 = 2;
pub const DEFAULT_VOIP_BUF_DURATION_MS: u32 = 20;
pub const DEFAULT_VOIP_BIT_DEPTH_BYTES: u32 = 2;

pub const DEEP_BUFFER_PLATFORM_DELAY_US: u64 = 29_000;
pub const LOW_LATENCY_PLATFORM_DELAY_US: u64 = 13_000;
pub const PCM_OFFLOAD_PLATFORM_DELAY_US: u64 = 30_000;
pub const ULL_PLATFORM_DELAY_US: u64 = 4_000;

pub const DEFAULT_CODEC_BIT_WIDTH: u32 = 16;
