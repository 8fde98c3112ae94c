//! In-memory audio engine.
//!
//! Output sessions render into a shared tap the host can drain; capture
//! sessions read from a shared source the host feeds. Every engine call is
//! journaled, and any operation can be made to fail once.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use hal_stream_core::models::audio_models::{AudioFormat, ChannelMask, Direction, VolumeData};
use hal_stream_core::models::device::{DeviceDescriptor, DeviceId};
use hal_stream_core::traits::engine::{
    BufferConfig, DeviceCapability, DrainMode, EngineError, EngineResult, EventSink, HardwareEngine, HardwareEvent,
    HardwareSession, MmapBufferInfo, MmapPosition, PlatformQuery, PlatformReply, PreprocessEffect, SessionParam,
    StreamAttributes, TransferMode,
};

use crate::error::{LoopbackError, EINVAL, EIO, ENODEV, ENOSYS};
use crate::events::{EventPoster, EventPump};
use crate::ring_buffer::ByteRing;

/// Frames per mmap burst.
const MMAP_BURST_FRAMES: u32 = 48;

/// Engine entry points, for journaling and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Open,
    Start,
    Stop,
    Pause,
    Resume,
    Flush,
    Drain,
    Write,
    Read,
    SetDevices,
    SetVolume,
    SetParam,
    SetBufferSize,
    CreateMmapBuffer,
    AddRemoveEffect,
    Close,
}

/// Arguments of a journaled call that tests care about.
#[derive(Debug, Clone, PartialEq)]
pub enum Detail {
    None,
    Attributes(StreamAttributes),
    Bytes(usize),
    Devices(Vec<DeviceId>),
    Volume(VolumeData),
    Param(SessionParam),
    Buffers(BufferConfig),
    Drain(DrainMode),
    Effect(PreprocessEffect, bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub session: u32,
    pub op: EngineOp,
    pub detail: Detail,
}

/// Loopback engine settings.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Bytes kept in the render tap before the oldest are dropped.
    pub render_tap_bytes: usize,
    /// Bytes the capture source can hold.
    pub capture_bytes: usize,
    /// Reported A2DP encoder latency; `None` makes the query fail.
    pub a2dp_latency_ms: Option<u32>,
    /// Reported capability of any USB device; `None` makes the query fail.
    pub usb_capability: Option<DeviceCapability>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            render_tap_bytes: 1024 * 1024,
            capture_bytes: 256 * 1024,
            a2dp_latency_ms: None,
            usb_capability: Some(DeviceCapability {
                sample_rate: 48_000,
                channel_mask: ChannelMask::OUT_STEREO,
                format: AudioFormat::Pcm16,
            }),
        }
    }
}

struct EngineState {
    journal: Vec<JournalEntry>,
    fail_next: HashSet<EngineOp>,
    render_tap: ByteRing,
    capture: ByteRing,
    unplugged: BTreeSet<DeviceId>,
    next_session: u32,
    open_sessions: BTreeSet<u32>,
}

impl EngineState {
    /// Journal the call and consume a pending injected failure.
    fn enter(&mut self, session: u32, op: EngineOp, detail: Detail) -> EngineResult<()> {
        self.journal.push(JournalEntry { session, op, detail });
        if self.fail_next.remove(&op) {
            log::debug!("session {}: injected failure of {:?}", session, op);
            return Err(EngineError(EIO));
        }
        Ok(())
    }

    fn all_plugged(&self, devices: &[DeviceDescriptor]) -> bool {
        devices.iter().all(|d| !self.unplugged.contains(&d.id))
    }
}

/// Software [`HardwareEngine`] with an event thread.
pub struct LoopbackEngine {
    config: LoopbackConfig,
    shared: Arc<Mutex<EngineState>>,
    pump: EventPump,
}

impl LoopbackEngine {
    pub fn new(config: LoopbackConfig) -> Result<Self, LoopbackError> {
        let shared = EngineState {
            journal: Vec::new(),
            fail_next: HashSet::new(),
            render_tap: ByteRing::new(config.render_tap_bytes),
            capture: ByteRing::new(config.capture_bytes),
            unplugged: BTreeSet::new(),
            next_session: 1,
            open_sessions: BTreeSet::new(),
        };
        Ok(Self {
            config,
            shared: Arc::new(Mutex::new(shared)),
            pump: EventPump::start()?,
        })
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }

    /// Make the next call of `op`, on any session, fail with -EIO.
    pub fn fail_next(&self, op: EngineOp) {
        self.shared.lock().fail_next.insert(op);
    }

    /// Queue bytes for capture sessions to read.
    pub fn feed_capture(&self, data: &[u8]) {
        self.shared.lock().capture.push(data);
    }

    /// Drain everything output sessions rendered so far.
    pub fn take_rendered(&self) -> Vec<u8> {
        self.shared.lock().render_tap.take_all()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.shared.lock().journal.clone()
    }

    pub fn count(&self, op: EngineOp) -> usize {
        self.shared.lock().journal.iter().filter(|e| e.op == op).count()
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.shared.lock().open_sessions.len()
    }

    /// Make opens and routes that include `id` fail with -ENODEV.
    pub fn unplug(&self, id: DeviceId) {
        log::info!("loopback device {:?} unplugged", id);
        self.shared.lock().unplugged.insert(id);
    }

    pub fn plug(&self, id: DeviceId) {
        self.shared.lock().unplugged.remove(&id);
    }

    /// Stop the event thread. Later events are dropped.
    pub fn shutdown(&self) {
        self.pump.stop();
    }

    /// Open a session and keep its concrete type.
    pub fn open_session(
        &self,
        attributes: &StreamAttributes,
        devices: &[DeviceDescriptor],
        events: Arc<dyn EventSink>,
    ) -> EngineResult<LoopbackSession> {
        let mut state = self.shared.lock();
        let id = state.next_session;
        state.next_session += 1;
        state.enter(id, EngineOp::Open, Detail::Attributes(attributes.clone()))?;

        if devices.is_empty() {
            return Err(EngineError(EINVAL));
        }
        if !state.all_plugged(devices) {
            log::warn!("session {}: route {:?} includes an unplugged device", id, devices.iter().map(|d| d.id).collect::<Vec<_>>());
            return Err(EngineError(ENODEV));
        }
        if attributes.media.sample_rate == 0 {
            return Err(EngineError(EINVAL));
        }
        state.open_sessions.insert(id);
        drop(state);

        log::debug!(
            "session {}: opened {:?} {:?} {:?} at {} Hz",
            id,
            attributes.direction,
            attributes.stream_type,
            attributes.transfer_mode,
            attributes.media.sample_rate
        );
        Ok(LoopbackSession {
            id,
            attributes: attributes.clone(),
            devices: devices.to_vec(),
            sink: events,
            events: self.pump.poster(),
            shared: Arc::clone(&self.shared),
            phase: Phase::Idle,
            rendered_bytes: 0,
            started_at: None,
            buffering: true,
            volume: None,
            effect: None,
        })
    }
}

impl HardwareEngine for LoopbackEngine {
    fn open(
        &self,
        attributes: &StreamAttributes,
        devices: &[DeviceDescriptor],
        events: Arc<dyn EventSink>,
    ) -> EngineResult<Box<dyn HardwareSession>> {
        Ok(Box::new(self.open_session(attributes, devices, events)?))
    }

    fn get_parameter(&self, query: &PlatformQuery) -> EngineResult<PlatformReply> {
        match query {
            PlatformQuery::A2dpEncoderLatency => self
                .config
                .a2dp_latency_ms
                .map(PlatformReply::LatencyMs)
                .ok_or(EngineError(ENOSYS)),
            PlatformQuery::DeviceCapability { device, address, .. } => {
                if !device.is_usb() || !address.is_set() {
                    return Err(EngineError(ENODEV));
                }
                self.config
                    .usb_capability
                    .map(PlatformReply::Capability)
                    .ok_or(EngineError(ENODEV))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Paused,
}

/// One loopback engine session.
pub struct LoopbackSession {
    id: u32,
    attributes: StreamAttributes,
    devices: Vec<DeviceDescriptor>,
    sink: Arc<dyn EventSink>,
    events: EventPoster,
    shared: Arc<Mutex<EngineState>>,
    phase: Phase,
    rendered_bytes: u64,
    started_at: Option<Instant>,
    /// Detection sessions stop buffering capture on request.
    buffering: bool,
    volume: Option<VolumeData>,
    effect: Option<(PreprocessEffect, bool)>,
}

impl LoopbackSession {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn attributes(&self) -> &StreamAttributes {
        &self.attributes
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn volume(&self) -> Option<&VolumeData> {
        self.volume.as_ref()
    }

    pub fn effect(&self) -> Option<(PreprocessEffect, bool)> {
        self.effect
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    fn enter(&self, op: EngineOp, detail: Detail) -> EngineResult<()> {
        self.shared.lock().enter(self.id, op, detail)
    }

    /// Payload is treated as PCM at the session's media format.
    fn frame_bytes(&self) -> u64 {
        let media = &self.attributes.media;
        (u64::from(media.channel_info.channels) * u64::from(media.bit_width) / 8).max(1)
    }

    fn is_mmap(&self) -> bool {
        matches!(self.attributes.transfer_mode, TransferMode::Mmap | TransferMode::MmapNoIrq)
    }
}

impl HardwareSession for LoopbackSession {
    fn start(&mut self) -> EngineResult<()> {
        self.enter(EngineOp::Start, Detail::None)?;
        self.phase = Phase::Running;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.enter(EngineOp::Stop, Detail::None)?;
        self.phase = Phase::Idle;
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.enter(EngineOp::Pause, Detail::None)?;
        if self.phase != Phase::Running {
            return Err(EngineError(EINVAL));
        }
        self.phase = Phase::Paused;
        Ok(())
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.enter(EngineOp::Resume, Detail::None)?;
        if self.phase == Phase::Idle {
            return Err(EngineError(EINVAL));
        }
        self.phase = Phase::Running;
        Ok(())
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.enter(EngineOp::Flush, Detail::None)
    }

    fn drain(&mut self, mode: DrainMode) -> EngineResult<()> {
        self.enter(EngineOp::Drain, Detail::Drain(mode))?;
        if self.attributes.direction != Direction::Output {
            return Err(EngineError(EINVAL));
        }
        let event = match mode {
            DrainMode::Full => HardwareEvent::DrainReady,
            DrainMode::Partial => HardwareEvent::PartialDrainReady,
        };
        self.events.post(&self.sink, event);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> EngineResult<usize> {
        self.enter(EngineOp::Write, Detail::Bytes(data.len()))?;
        if self.attributes.direction != Direction::Output || self.phase != Phase::Running {
            return Err(EngineError(EINVAL));
        }
        self.shared.lock().render_tap.push(data);
        self.rendered_bytes += data.len() as u64;
        if self.attributes.transfer_mode == TransferMode::NonBlocking {
            self.events.post(&self.sink, HardwareEvent::WriteReady);
        }
        Ok(data.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> EngineResult<usize> {
        let mut state = self.shared.lock();
        state.enter(self.id, EngineOp::Read, Detail::Bytes(buffer.len()))?;
        if self.attributes.direction != Direction::Input || self.phase != Phase::Running {
            return Err(EngineError(EINVAL));
        }
        if !self.buffering {
            return Ok(0);
        }
        Ok(state.capture.pop_into(buffer))
    }

    fn set_devices(&mut self, devices: &[DeviceDescriptor]) -> EngineResult<()> {
        let mut state = self.shared.lock();
        state.enter(
            self.id,
            EngineOp::SetDevices,
            Detail::Devices(devices.iter().map(|d| d.id).collect()),
        )?;
        if devices.is_empty() {
            return Err(EngineError(EINVAL));
        }
        if !state.all_plugged(devices) {
            return Err(EngineError(ENODEV));
        }
        drop(state);
        self.devices = devices.to_vec();
        Ok(())
    }

    fn set_volume(&mut self, volume: &VolumeData) -> EngineResult<()> {
        self.enter(EngineOp::SetVolume, Detail::Volume(volume.clone()))?;
        self.volume = Some(volume.clone());
        Ok(())
    }

    fn set_param(&mut self, param: &SessionParam) -> EngineResult<()> {
        self.enter(EngineOp::SetParam, Detail::Param(param.clone()))?;
        if *param == SessionParam::StopBuffering {
            self.buffering = false;
        }
        Ok(())
    }

    fn set_buffer_size(&mut self, config: &BufferConfig) -> EngineResult<()> {
        self.enter(EngineOp::SetBufferSize, Detail::Buffers(*config))
    }

    fn get_timestamp(&mut self) -> EngineResult<u64> {
        let rate = u64::from(self.attributes.media.sample_rate);
        if rate == 0 {
            return Err(EngineError(EINVAL));
        }
        let frames = self.rendered_bytes / self.frame_bytes();
        Ok(frames * 1_000_000 / rate)
    }

    fn create_mmap_buffer(&mut self, min_size_frames: i32) -> EngineResult<MmapBufferInfo> {
        self.enter(EngineOp::CreateMmapBuffer, Detail::Bytes(min_size_frames.max(0) as usize))?;
        if !self.is_mmap() || min_size_frames <= 0 {
            return Err(EngineError(EINVAL));
        }
        let bursts = (min_size_frames as u32).div_ceil(MMAP_BURST_FRAMES);
        Ok(MmapBufferInfo {
            shared_memory_fd: 100 + self.id as i32,
            buffer_size_frames: bursts * MMAP_BURST_FRAMES,
            burst_size_frames: MMAP_BURST_FRAMES,
            application_shareable: self.attributes.transfer_mode == TransferMode::MmapNoIrq,
        })
    }

    fn get_mmap_position(&mut self) -> EngineResult<MmapPosition> {
        if !self.is_mmap() {
            return Err(EngineError(ENOSYS));
        }
        let elapsed = match (self.phase, self.started_at) {
            (Phase::Running, Some(at)) => at.elapsed(),
            _ => return Ok(MmapPosition { position_frames: 0, time_nanoseconds: 0 }),
        };
        let frames = elapsed.as_micros() * u128::from(self.attributes.media.sample_rate) / 1_000_000;
        Ok(MmapPosition {
            position_frames: frames as i64,
            time_nanoseconds: elapsed.as_nanos() as i64,
        })
    }

    fn add_remove_effect(&mut self, effect: PreprocessEffect, enable: bool) -> EngineResult<()> {
        self.enter(EngineOp::AddRemoveEffect, Detail::Effect(effect, enable))?;
        if self.attributes.direction != Direction::Input {
            return Err(EngineError(ENOSYS));
        }
        self.effect = Some((effect, enable));
        Ok(())
    }

    fn close(self: Box<Self>) -> EngineResult<()> {
        let mut state = self.shared.lock();
        state.open_sessions.remove(&self.id);
        log::debug!("session {}: closed after {} bytes", self.id, self.rendered_bytes);
        state.enter(self.id, EngineOp::Close, Detail::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_stream_core::models::audio_models::{ChannelInfo, MediaFormatId};
    use hal_stream_core::models::device::UsbAddress;
    use hal_stream_core::models::error::StreamError;
    use hal_stream_core::models::stream_types::HardwareStreamType;
    use hal_stream_core::traits::engine::MediaConfig;
    use std::time::Duration;

    struct Ignore;

    impl EventSink for Ignore {
        fn deliver(&self, _event: HardwareEvent) -> Result<(), StreamError> {
            Ok(())
        }
    }

    fn attributes(direction: Direction, transfer_mode: TransferMode) -> StreamAttributes {
        StreamAttributes {
            direction,
            stream_type: HardwareStreamType::LowLatency,
            transfer_mode,
            media: MediaConfig {
                sample_rate: 48_000,
                bit_width: 16,
                format_id: MediaFormatId::DefaultPcm,
                channel_info: ChannelInfo::stereo(),
            },
            record_direction: None,
            proxy_tx: None,
        }
    }

    fn speaker() -> Vec<DeviceDescriptor> {
        vec![DeviceDescriptor::new(DeviceId::OutSpeaker)]
    }

    fn engine() -> LoopbackEngine {
        LoopbackEngine::new(LoopbackConfig::default()).unwrap()
    }

    #[test]
    fn written_audio_reaches_render_tap() {
        let engine = engine();
        let mut session = engine
            .open(&attributes(Direction::Output, TransferMode::Blocking), &speaker(), Arc::new(Ignore))
            .unwrap();
        assert_eq!(session.write(&[1, 2, 3, 4]), Err(EngineError(EINVAL)));

        session.start().unwrap();
        assert_eq!(session.write(&[1, 2, 3, 4]).unwrap(), 4);
        assert_eq!(engine.take_rendered(), vec![1, 2, 3, 4]);

        session.close().unwrap();
        assert_eq!(engine.open_sessions(), 0);
    }

    #[test]
    fn timestamp_follows_rendered_frames() {
        let engine = engine();
        let mut session = engine
            .open(&attributes(Direction::Output, TransferMode::Blocking), &speaker(), Arc::new(Ignore))
            .unwrap();
        session.start().unwrap();
        session.write(&vec![0u8; 48_000 * 4]).unwrap();
        assert_eq!(session.get_timestamp().unwrap(), 1_000_000);
    }

    #[test]
    fn capture_reads_fed_bytes() {
        let engine = engine();
        let mut session = engine
            .open(
                &attributes(Direction::Input, TransferMode::Blocking),
                &[DeviceDescriptor::new(DeviceId::InHandsetMic)],
                Arc::new(Ignore),
            )
            .unwrap();
        session.start().unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(session.read(&mut buffer).unwrap(), 0);
        engine.feed_capture(&[7; 6]);
        assert_eq!(session.read(&mut buffer).unwrap(), 6);
        assert_eq!(&buffer[..6], &[7; 6]);
    }

    #[test]
    fn injected_failure_fires_once() {
        let engine = engine();
        engine.fail_next(EngineOp::Open);
        let attrs = attributes(Direction::Output, TransferMode::Blocking);
        assert_eq!(engine.open(&attrs, &speaker(), Arc::new(Ignore)).err(), Some(EngineError(EIO)));
        assert!(engine.open(&attrs, &speaker(), Arc::new(Ignore)).is_ok());
        assert_eq!(engine.count(EngineOp::Open), 2);
    }

    #[test]
    fn unplugged_device_rejects_open_and_route() {
        let engine = engine();
        let attrs = attributes(Direction::Output, TransferMode::Blocking);
        let mut session = engine.open(&attrs, &speaker(), Arc::new(Ignore)).unwrap();

        engine.unplug(DeviceId::OutWiredHeadphone);
        let headphone = vec![DeviceDescriptor::new(DeviceId::OutWiredHeadphone)];
        assert_eq!(session.set_devices(&headphone), Err(EngineError(ENODEV)));
        assert_eq!(engine.open(&attrs, &headphone, Arc::new(Ignore)).err(), Some(EngineError(ENODEV)));

        engine.plug(DeviceId::OutWiredHeadphone);
        session.set_devices(&headphone).unwrap();
    }

    #[test]
    fn mmap_buffer_rounds_to_bursts() {
        let engine = engine();
        let mut session = engine
            .open(&attributes(Direction::Output, TransferMode::MmapNoIrq), &speaker(), Arc::new(Ignore))
            .unwrap();
        let info = session.create_mmap_buffer(100).unwrap();
        assert_eq!(info.buffer_size_frames, 144);
        assert!(info.application_shareable);

        session.start().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(session.get_mmap_position().unwrap().position_frames > 0);
    }

    #[test]
    fn usb_capability_needs_address() {
        let engine = engine();
        let query = |address| PlatformQuery::DeviceCapability {
            device: DeviceId::OutUsbHeadset,
            address,
            playback: true,
        };
        assert_eq!(engine.get_parameter(&query(UsbAddress::UNSET)), Err(EngineError(ENODEV)));
        assert!(matches!(
            engine.get_parameter(&query(UsbAddress { card: 1, device: 0 })),
            Ok(PlatformReply::Capability(_))
        ));
        assert_eq!(engine.get_parameter(&PlatformQuery::A2dpEncoderLatency), Err(EngineError(ENOSYS)));
    }
}
