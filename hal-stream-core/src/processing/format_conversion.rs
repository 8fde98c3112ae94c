use crate::models::audio_models::AudioFormat;
use crate::models::error::StreamError;

/// Converts caller PCM into the format the hardware path accepts.
///
/// Samples are decoded to left-justified 32-bit integers and re-encoded in
/// the target format. The scratch buffer is allocated once at open and grows
/// only when a caller hands in more data than one period.
#[derive(Debug)]
pub struct FormatConversionBuffer {
    source: AudioFormat,
    target: AudioFormat,
    scratch: Vec<u8>,
}

impl FormatConversionBuffer {
    /// Whether a stream in `source` format needs conversion at all.
    pub fn is_needed(source: AudioFormat) -> bool {
        source.hardware_format() != source
    }

    pub fn new(source: AudioFormat, target: AudioFormat, capacity: usize) -> Result<Self, StreamError> {
        if !source.is_pcm() || !target.is_pcm() {
            return Err(StreamError::Configuration(format!(
                "cannot convert {:?} to {:?}",
                source, target
            )));
        }
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(capacity).map_err(|e| {
            StreamError::ResourceExhausted(format!("conversion buffer of {} bytes: {}", capacity, e))
        })?;
        scratch.resize(capacity, 0);
        Ok(Self { source, target, scratch })
    }

    pub fn source_format(&self) -> AudioFormat {
        self.source
    }

    pub fn target_format(&self) -> AudioFormat {
        self.target
    }

    pub fn capacity(&self) -> usize {
        self.scratch.len()
    }

    /// Convert `input` and return the converted bytes.
    ///
    /// A trailing partial sample is dropped.
    pub fn convert(&mut self, input: &[u8]) -> Result<&[u8], StreamError> {
        let in_bps = self.source.bytes_per_sample();
        let out_bps = self.target.bytes_per_sample();
        let samples = input.len() / in_bps;
        let out_len = samples * out_bps;

        if out_len > self.scratch.len() {
            let extra = out_len - self.scratch.len();
            self.scratch.try_reserve(extra).map_err(|e| {
                StreamError::ResourceExhausted(format!("conversion buffer of {} bytes: {}", out_len, e))
            })?;
            self.scratch.resize(out_len, 0);
        }

        for (src, dst) in input
            .chunks_exact(in_bps)
            .zip(self.scratch[..out_len].chunks_exact_mut(out_bps))
        {
            encode_sample(self.target, decode_sample(self.source, src), dst);
        }
        Ok(&self.scratch[..out_len])
    }

    /// Caller bytes represented by `hardware_bytes` of converted output.
    pub fn source_bytes_for(&self, hardware_bytes: usize) -> usize {
        hardware_bytes * self.source.bytes_per_sample() / self.target.bytes_per_sample()
    }
}

/// Decode one sample into a left-justified i32.
fn decode_sample(format: AudioFormat, bytes: &[u8]) -> i32 {
    match format {
        AudioFormat::Pcm8 => (i32::from(bytes[0]) - 128) << 24,
        AudioFormat::Pcm24Packed => i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]),
        AudioFormat::Pcm8_24 => {
            let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            value.clamp(-(1 << 23), (1 << 23) - 1) << 8
        }
        AudioFormat::Pcm32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        AudioFormat::PcmFloat => {
            let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            // `as` saturates, so +1.0 lands on i32::MAX
            (value.clamp(-1.0, 1.0) as f64 * 2_147_483_648.0) as i32
        }
        _ => i32::from(i16::from_le_bytes([bytes[0], bytes[1]])) << 16,
    }
}

fn encode_sample(format: AudioFormat, value: i32, out: &mut [u8]) {
    match format {
        AudioFormat::Pcm8 => out[0] = ((value >> 24) + 128) as u8,
        AudioFormat::Pcm24Packed => out.copy_from_slice(&value.to_le_bytes()[1..4]),
        AudioFormat::Pcm8_24 => out.copy_from_slice(&(value >> 8).to_le_bytes()),
        AudioFormat::Pcm32 => out.copy_from_slice(&value.to_le_bytes()),
        AudioFormat::PcmFloat => out.copy_from_slice(&((value as f64 / 2_147_483_648.0) as f32).to_le_bytes()),
        _ => out.copy_from_slice(&((value >> 16) as i16).to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn float_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn only_pcm8_and_float_need_conversion() {
        assert!(FormatConversionBuffer::is_needed(AudioFormat::Pcm8));
        assert!(FormatConversionBuffer::is_needed(AudioFormat::PcmFloat));
        assert!(!FormatConversionBuffer::is_needed(AudioFormat::Pcm16));
        assert!(!FormatConversionBuffer::is_needed(AudioFormat::Pcm24Packed));
        assert!(!FormatConversionBuffer::is_needed(AudioFormat::Flac));
    }

    #[test]
    fn float_to_pcm32() {
        let mut conv = FormatConversionBuffer::new(AudioFormat::PcmFloat, AudioFormat::Pcm32, 64).unwrap();
        let out = conv.convert(&float_bytes(&[0.0, 1.0, -1.0, 0.5, 2.0])).unwrap().to_vec();
        let values: Vec<i32> = out
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![0, i32::MAX, i32::MIN, 1 << 30, i32::MAX]);
    }

    #[test]
    fn pcm8_to_pcm16() {
        let mut conv = FormatConversionBuffer::new(AudioFormat::Pcm8, AudioFormat::Pcm16, 4).unwrap();
        let out = conv.convert(&[128, 255, 0]).unwrap().to_vec();
        let values: Vec<i16> = out.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
        assert_eq!(values, vec![0, 127 << 8, i16::MIN]);
    }

    #[test]
    fn pcm32_back_to_float() {
        let mut conv = FormatConversionBuffer::new(AudioFormat::Pcm32, AudioFormat::PcmFloat, 8).unwrap();
        let out = conv.convert(&(1i32 << 30).to_le_bytes()).unwrap().to_vec();
        let value = f32::from_le_bytes([out[0], out[1], out[2], out[3]]);
        assert_relative_eq!(value, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn packed_24_roundtrip_through_8_24() {
        let mut widen = FormatConversionBuffer::new(AudioFormat::Pcm24Packed, AudioFormat::Pcm8_24, 8).unwrap();
        let wide = widen.convert(&[0xFF, 0xFF, 0xFF]).unwrap().to_vec();
        assert_eq!(i32::from_le_bytes([wide[0], wide[1], wide[2], wide[3]]), -1);

        let mut narrow = FormatConversionBuffer::new(AudioFormat::Pcm8_24, AudioFormat::Pcm24Packed, 3).unwrap();
        assert_eq!(narrow.convert(&wide).unwrap(), &[0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn grows_for_oversized_input() {
        let mut conv = FormatConversionBuffer::new(AudioFormat::PcmFloat, AudioFormat::Pcm32, 4).unwrap();
        let out_len = conv.convert(&float_bytes(&[0.1; 16])).unwrap().len();
        assert_eq!(out_len, 64);
        assert!(conv.capacity() >= 64);
    }

    #[test]
    fn consumed_bytes_map_back_to_source() {
        let conv = FormatConversionBuffer::new(AudioFormat::Pcm8, AudioFormat::Pcm16, 4).unwrap();
        assert_eq!(conv.source_bytes_for(200), 100);
        let conv = FormatConversionBuffer::new(AudioFormat::PcmFloat, AudioFormat::Pcm32, 4).unwrap();
        assert_eq!(conv.source_bytes_for(200), 200);
    }

    #[test]
    fn rejects_compressed() {
        let err = FormatConversionBuffer::new(AudioFormat::Mp3, AudioFormat::Pcm16, 4).unwrap_err();
        assert!(matches!(err, StreamError::Configuration(_)));
    }

    #[test]
    fn drops_trailing_partial_sample() {
        let mut conv = FormatConversionBuffer::new(AudioFormat::PcmFloat, AudioFormat::Pcm32, 16).unwrap();
        let mut input = float_bytes(&[0.25]);
        input.extend_from_slice(&[1, 2]);
        assert_eq!(conv.convert(&input).unwrap().len(), 4);
    }
}
