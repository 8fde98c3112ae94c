use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Direction of audio flow for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Output,
    Input,
}

/// Sample encoding requested by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioFormat {
    Default,
    Pcm8,
    Pcm16,
    /// 24 significant bits carried in a 32-bit little-endian container.
    Pcm8_24,
    Pcm24Packed,
    Pcm32,
    PcmFloat,
    Mp3,
    Aac,
    Flac,
    Alac,
    Ape,
    Vorbis,
    Wma,
    Opus,
}

impl AudioFormat {
    pub fn is_pcm(self) -> bool {
        matches!(
            self,
            Self::Pcm8 | Self::Pcm16 | Self::Pcm8_24 | Self::Pcm24Packed | Self::Pcm32 | Self::PcmFloat
        )
    }

    /// Container size of one sample. Compressed formats count as one byte.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm8 => 1,
            Self::Pcm16 | Self::Default => 2,
            Self::Pcm24Packed => 3,
            Self::Pcm8_24 | Self::Pcm32 | Self::PcmFloat => 4,
            _ => 1,
        }
    }

    /// Significant bits per sample, zero for compressed formats.
    pub fn bit_width(self) -> u32 {
        match self {
            Self::Pcm8 => 8,
            Self::Pcm16 | Self::Default => 16,
            Self::Pcm8_24 | Self::Pcm24Packed => 24,
            Self::Pcm32 | Self::PcmFloat => 32,
            _ => 0,
        }
    }

    /// The format the hardware path accepts in place of this one.
    ///
    /// 8-bit PCM widens to 16-bit and float narrows to 32-bit integer;
    /// everything else is passed through unchanged.
    pub fn hardware_format(self) -> Self {
        match self {
            Self::Pcm8 => Self::Pcm16,
            Self::PcmFloat => Self::Pcm32,
            other => other,
        }
    }

    /// Transfer format identifier handed to the engine.
    pub fn media_format_id(self) -> MediaFormatId {
        match self {
            Self::Mp3 => MediaFormatId::Mp3,
            Self::Aac => MediaFormatId::Aac,
            Self::Flac => MediaFormatId::Flac,
            Self::Alac => MediaFormatId::Alac,
            Self::Ape => MediaFormatId::Ape,
            Self::Vorbis => MediaFormatId::Vorbis,
            Self::Wma => MediaFormatId::Wma,
            Self::Opus => MediaFormatId::Opus,
            _ => MediaFormatId::DefaultPcm,
        }
    }
}

/// Engine-side media format identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaFormatId {
    DefaultPcm,
    Mp3,
    Aac,
    Flac,
    Alac,
    Ape,
    Vorbis,
    Wma,
    Opus,
}

/// Bytes in one frame of `format` with `channels` interleaved channels.
pub fn bytes_per_frame(format: AudioFormat, channels: u32) -> usize {
    if format.is_pcm() || format == AudioFormat::Default {
        format.bytes_per_sample() * channels.max(1) as usize
    } else {
        1
    }
}

/// Framework channel mask. Output and input masks use different bit layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelMask(pub u32);

impl ChannelMask {
    pub const NONE: Self = Self(0);
    pub const OUT_MONO: Self = Self(0x1);
    pub const OUT_STEREO: Self = Self(0x3);
    pub const OUT_5POINT1: Self = Self(0x3F);
    pub const OUT_7POINT1: Self = Self(0x63F);
    pub const IN_STEREO: Self = Self(0xC);
    pub const IN_MONO: Self = Self(0x10);

    pub fn channel_count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Speaker position of one channel in a channel map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelPosition {
    FrontLeft,
    FrontRight,
    FrontCenter,
    LowFrequency,
    RearLeft,
    RearRight,
    SideLeft,
    SideRight,
    Center,
}

/// Channel count plus per-channel positions, as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channels: u16,
    pub map: Vec<ChannelPosition>,
}

impl ChannelInfo {
    /// Standard layout for `channels` (1 to 8). Other counts get a front-left/right prefix.
    pub fn for_count(channels: u16) -> Self {
        use ChannelPosition::*;
        let map = match channels {
            1 => vec![Center],
            2 => vec![FrontLeft, FrontRight],
            3 => vec![FrontLeft, FrontRight, FrontCenter],
            4 => vec![FrontLeft, FrontRight, RearLeft, RearRight],
            5 => vec![FrontLeft, FrontRight, FrontCenter, RearLeft, RearRight],
            6 => vec![FrontLeft, FrontRight, FrontCenter, LowFrequency, RearLeft, RearRight],
            7 => vec![FrontLeft, FrontRight, FrontCenter, LowFrequency, RearLeft, RearRight, SideLeft],
            8 => vec![
                FrontLeft,
                FrontRight,
                FrontCenter,
                LowFrequency,
                RearLeft,
                RearRight,
                SideLeft,
                SideRight,
            ],
            n => [FrontLeft, FrontRight]
                .into_iter()
                .cycle()
                .take(n as usize)
                .collect(),
        };
        Self { channels, map }
    }

    pub fn stereo() -> Self {
        Self::for_count(2)
    }
}

bitflags! {
    /// Output stream flags requested by the framework.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OutputFlags: u32 {
        const NONE = 0x0;
        const DIRECT = 0x1;
        const PRIMARY = 0x2;
        const FAST = 0x4;
        const DEEP_BUFFER = 0x8;
        const COMPRESS_OFFLOAD = 0x10;
        const NON_BLOCKING = 0x20;
        const HW_AV_SYNC = 0x40;
        const TTS = 0x80;
        const RAW = 0x100;
        const SYNC = 0x200;
        const IEC958_NONAUDIO = 0x400;
        const DIRECT_PCM = 0x2000;
        const MMAP_NOIRQ = 0x4000;
        const VOIP_RX = 0x8000;
        const INCALL_MUSIC = 0x10000;
    }
}

bitflags! {
    /// Input stream flags requested by the framework.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InputFlags: u32 {
        const NONE = 0x0;
        const FAST = 0x1;
        const HW_HOTWORD = 0x2;
        const RAW = 0x4;
        const SYNC = 0x8;
        const MMAP_NOIRQ = 0x10;
        const VOIP_TX = 0x20;
        const HW_AV_SYNC = 0x40;
        const DIRECT = 0x80;
        const TIMESTAMP = 0x100;
        const COMPRESS = 0x200;
    }
}

/// Capture source requested for an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSource {
    #[default]
    Default,
    Mic,
    VoiceUplink,
    VoiceDownlink,
    VoiceCall,
    Camcorder,
    VoiceRecognition,
    VoiceCommunication,
    RemoteSubmix,
    Unprocessed,
    VoicePerformance,
    Hotword,
}

impl AudioSource {
    /// Sources that tap an active voice call.
    pub fn is_voice_call(self) -> bool {
        matches!(self, Self::VoiceUplink | Self::VoiceDownlink | Self::VoiceCall)
    }
}

/// Gain for the channels selected by `channel_mask`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelVolume {
    pub channel_mask: u32,
    pub volume: f32,
}

/// Volume payload handed to the engine: one or more channel/gain pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeData {
    pub pairs: Vec<ChannelVolume>,
}

impl VolumeData {
    /// Equal gains collapse into a single pair covering both channels.
    pub fn stereo(left: f32, right: f32) -> Self {
        let pairs = if left == right {
            vec![ChannelVolume { channel_mask: 0x03, volume: left }]
        } else {
            vec![
                ChannelVolume { channel_mask: 0x01, volume: left },
                ChannelVolume { channel_mask: 0x10, volume: right },
            ]
        };
        Self { pairs }
    }

    /// A single gain applied to every channel.
    pub fn uniform(gain: f32) -> Self {
        Self {
            pairs: vec![ChannelVolume { channel_mask: 0x03, volume: gain }],
        }
    }
}

/// Encoder delay and padding, in samples, used to trim track boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GaplessMetadata {
    pub encoder_delay: u32,
    pub encoder_padding: u32,
}

/// Decoder configuration for compressed offload streams.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodecConfig {
    pub average_bit_rate: u32,
    pub bits_per_sample: u16,
    pub min_block_size: u32,
    pub max_block_size: u32,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_format_mapping() {
        assert_eq!(AudioFormat::Pcm8.hardware_format(), AudioFormat::Pcm16);
        assert_eq!(AudioFormat::PcmFloat.hardware_format(), AudioFormat::Pcm32);
        assert_eq!(AudioFormat::Pcm24Packed.hardware_format(), AudioFormat::Pcm24Packed);
        assert_eq!(AudioFormat::Flac.hardware_format(), AudioFormat::Flac);
    }

    #[test]
    fn frame_sizes() {
        assert_eq!(bytes_per_frame(AudioFormat::Pcm16, 2), 4);
        assert_eq!(bytes_per_frame(AudioFormat::Pcm24Packed, 2), 6);
        assert_eq!(bytes_per_frame(AudioFormat::Pcm8_24, 6), 24);
        assert_eq!(bytes_per_frame(AudioFormat::Mp3, 2), 1);
    }

    #[test]
    fn flag_tests() {
        let flags = OutputFlags::DIRECT | OutputFlags::COMPRESS_OFFLOAD;
        assert!(flags.contains(OutputFlags::DIRECT));
        assert!(!flags.contains(OutputFlags::NON_BLOCKING));
        assert!(OutputFlags::NONE.is_empty());
        assert_eq!(OutputFlags::default(), OutputFlags::NONE);
        assert!(InputFlags::FAST.intersects(InputFlags::FAST | InputFlags::RAW));
    }

    #[test]
    fn flags_serialize_by_name() {
        let flags = OutputFlags::DIRECT | OutputFlags::NON_BLOCKING;
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, "\"DIRECT | NON_BLOCKING\"");
        assert_eq!(serde_json::from_str::<OutputFlags>(&json).unwrap(), flags);
    }

    #[test]
    fn channel_masks() {
        assert_eq!(ChannelMask::OUT_STEREO.channel_count(), 2);
        assert_eq!(ChannelMask::OUT_5POINT1.channel_count(), 6);
        assert_eq!(ChannelMask::IN_MONO.channel_count(), 1);
        assert_eq!(ChannelMask::IN_STEREO.channel_count(), 2);
    }

    #[test]
    fn eight_channel_map_has_side_pair() {
        let info = ChannelInfo::for_count(8);
        assert_eq!(info.map.len(), 8);
        assert_eq!(info.map[6], ChannelPosition::SideLeft);
        assert_eq!(info.map[7], ChannelPosition::SideRight);
    }

    #[test]
    fn stereo_volume_pairs() {
        assert_eq!(VolumeData::stereo(0.5, 0.5).pairs.len(), 1);
        let split = VolumeData::stereo(0.2, 0.8);
        assert_eq!(split.pairs.len(), 2);
        assert_eq!(split.pairs[0].channel_mask, 0x01);
        assert_eq!(split.pairs[1].channel_mask, 0x10);
    }
}
