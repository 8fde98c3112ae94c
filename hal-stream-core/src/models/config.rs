use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::audio_models::{AudioFormat, AudioSource, ChannelMask, CodecConfig, Direction, InputFlags, OutputFlags};
use super::device::{LogicalDevice, UsbAddress};
use super::error::StreamError;

const MAX_CHANNELS: u32 = 8;
const MAX_SAMPLE_RATE: u32 = 384_000;

/// Format and rate of the compressed payload of an offload stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadInfo {
    pub format: AudioFormat,
    pub sample_rate: u32,
}

/// Stream request as received from the framework.
///
/// Zero rate, empty channel mask or `AudioFormat::Default` are filled in
/// with platform defaults when the session is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub direction: Direction,

    /// Sample rate in Hz, 0 for "pick a default".
    pub sample_rate: u32,

    pub channel_mask: ChannelMask,

    pub format: AudioFormat,

    /// Only meaningful for output streams.
    pub output_flags: OutputFlags,

    /// Only meaningful for input streams.
    pub input_flags: InputFlags,

    /// Capture source (input only).
    pub source: AudioSource,

    /// Caller frame count, used by proxy capture sizing.
    pub frame_count: u32,

    /// Present for compressed offload playback.
    pub offload: Option<OffloadInfo>,
}

impl StreamConfig {
    pub fn output(sample_rate: u32, channel_mask: ChannelMask, format: AudioFormat, flags: OutputFlags) -> Self {
        Self {
            direction: Direction::Output,
            sample_rate,
            channel_mask,
            format,
            output_flags: flags,
            input_flags: InputFlags::NONE,
            source: AudioSource::Default,
            frame_count: 0,
            offload: None,
        }
    }

    pub fn input(
        sample_rate: u32,
        channel_mask: ChannelMask,
        format: AudioFormat,
        flags: InputFlags,
        source: AudioSource,
    ) -> Self {
        Self {
            direction: Direction::Input,
            sample_rate,
            channel_mask,
            format,
            output_flags: OutputFlags::NONE,
            input_flags: flags,
            source,
            frame_count: 0,
            offload: None,
        }
    }

    pub fn with_offload(mut self, offload: OffloadInfo) -> Self {
        self.offload = Some(offload);
        self
    }

    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_mask.channel_count()
    }

    /// Fill unspecified fields from platform defaults.
    ///
    /// Input streams default to 48 kHz mono 16-bit; HDMI output defaults to
    /// 48 kHz 5.1 16-bit.
    pub fn apply_defaults(&mut self, devices: &BTreeSet<LogicalDevice>) {
        match self.direction {
            Direction::Input => {
                if self.sample_rate == 0 {
                    self.sample_rate = 48_000;
                }
                if self.channel_mask.is_none() {
                    self.channel_mask = ChannelMask::IN_MONO;
                }
                if self.format == AudioFormat::Default {
                    self.format = AudioFormat::Pcm16;
                }
            }
            Direction::Output if devices.contains(&LogicalDevice::AuxDigital) => {
                if self.sample_rate == 0 {
                    self.sample_rate = 48_000;
                }
                if self.channel_mask.is_none() {
                    self.channel_mask = ChannelMask::OUT_5POINT1;
                }
                if self.format == AudioFormat::Default {
                    self.format = AudioFormat::Pcm16;
                }
            }
            Direction::Output => {}
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate > MAX_SAMPLE_RATE {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if self.channel_count() > MAX_CHANNELS {
            return Err(format!("unsupported channel count: {}", self.channel_count()));
        }
        if self.direction == Direction::Input && self.channel_count() == 0 {
            return Err("input stream needs at least one channel".into());
        }
        if self.direction == Direction::Output && self.output_flags.contains(OutputFlags::COMPRESS_OFFLOAD) {
            let payload = self.offload.map(|o| o.format).unwrap_or(self.format);
            if payload.is_pcm() {
                return Err(format!("compress offload requires a compressed format, got {:?}", payload));
            }
        }
        Ok(())
    }
}

/// Compressed-format metadata carried by a parameter update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressMetadata {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub codec: Option<CodecConfig>,
}

/// Already-parsed form of a stream `set_parameters` key-value string.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamParameters {
    pub routing: Option<BTreeSet<LogicalDevice>>,
    /// Card/device of a USB audio device announced with the update.
    pub usb_address: Option<UsbAddress>,
    pub compress: Option<CompressMetadata>,
    pub encoder_delay: Option<u32>,
    pub encoder_padding: Option<u32>,
}

impl StreamParameters {
    pub fn routing(devices: impl IntoIterator<Item = LogicalDevice>) -> Self {
        Self {
            routing: Some(devices.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn has_gapless(&self) -> bool {
        self.encoder_delay.is_some() || self.encoder_padding.is_some()
    }
}

/// Process-wide tunables shared by every session of a platform context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Read attempts for detection-session capture before giving up (default: 25).
    pub read_retry_count: u32,

    /// Sleep between detection-session read attempts (default: 20 ms).
    pub read_retry_interval_ms: u64,

    /// Silence regular capture while voice-activation sessions are active.
    pub va_concurrency_mute_enabled: bool,

    /// Rate used when an output request leaves it unspecified.
    pub default_output_sample_rate: u32,

    /// Codec backend bit width for PCM streams (default: 16).
    pub codec_backend_bit_width: u32,
}

impl PlatformConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.read_retry_count == 0 {
            return Err("read retry count must be positive".into());
        }
        if self.default_output_sample_rate == 0 || self.default_output_sample_rate > MAX_SAMPLE_RATE {
            return Err(format!(
                "unsupported default output sample rate: {}",
                self.default_output_sample_rate
            ));
        }
        if ![16, 24, 32].contains(&self.codec_backend_bit_width) {
            return Err(format!("unsupported codec bit width: {}", self.codec_backend_bit_width));
        }
        Ok(())
    }

    /// Parse and validate a JSON document. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StreamError::Configuration(format!("failed to parse platform config: {}", e)))?;
        config.validate().map_err(StreamError::Configuration)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, StreamError> {
        let json = fs::read_to_string(path)
            .map_err(|e| StreamError::Configuration(format!("failed to read platform config: {}", e)))?;
        Self::from_json(&json)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            read_retry_count: 25,
            read_retry_interval_ms: 20,
            va_concurrency_mute_enabled: false,
            default_output_sample_rate: 48_000,
            codec_backend_bit_width: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_defaults() {
        let mut config = StreamConfig::input(
            0,
            ChannelMask::NONE,
            AudioFormat::Default,
            InputFlags::NONE,
            AudioSource::Mic,
        );
        config.apply_defaults(&BTreeSet::new());
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channel_mask, ChannelMask::IN_MONO);
        assert_eq!(config.format, AudioFormat::Pcm16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn hdmi_output_defaults() {
        let mut config = StreamConfig::output(0, ChannelMask::NONE, AudioFormat::Default, OutputFlags::DIRECT);
        config.apply_defaults(&[LogicalDevice::AuxDigital].into_iter().collect());
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channel_count(), 6);
        assert_eq!(config.format, AudioFormat::Pcm16);
    }

    #[test]
    fn speaker_output_keeps_request() {
        let mut config = StreamConfig::output(0, ChannelMask::NONE, AudioFormat::Default, OutputFlags::NONE);
        config.apply_defaults(&[LogicalDevice::Speaker].into_iter().collect());
        assert_eq!(config.sample_rate, 0);
        assert!(config.channel_mask.is_none());
    }

    #[test]
    fn rejects_pcm_offload_payload() {
        let config = StreamConfig::output(
            48_000,
            ChannelMask::OUT_STEREO,
            AudioFormat::Pcm16,
            OutputFlags::DIRECT | OutputFlags::COMPRESS_OFFLOAD,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_too_many_channels() {
        let config = StreamConfig::output(48_000, ChannelMask(0x1FF), AudioFormat::Pcm16, OutputFlags::NONE);
        assert!(config.validate().is_err());
    }

    #[test]
    fn platform_config_defaults_from_partial_json() {
        let config = PlatformConfig::from_json(r#"{ "va_concurrency_mute_enabled": true }"#).unwrap();
        assert!(config.va_concurrency_mute_enabled);
        assert_eq!(config.read_retry_count, 25);
        assert_eq!(config.read_retry_interval_ms, 20);
        assert_eq!(config.codec_backend_bit_width, 16);
    }

    #[test]
    fn platform_config_rejects_zero_retries() {
        let err = PlatformConfig::from_json(r#"{ "read_retry_count": 0 }"#).unwrap_err();
        assert!(matches!(err, StreamError::Configuration(_)));
    }

    #[test]
    fn platform_config_rejects_garbage() {
        assert!(PlatformConfig::from_json("not json").is_err());
    }
}
