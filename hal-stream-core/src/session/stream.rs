use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::audio_models::{
    bytes_per_frame, AudioFormat, AudioSource, ChannelInfo, ChannelMask, CodecConfig, Direction, GaplessMetadata,
    OutputFlags, VolumeData,
};
use crate::models::config::{StreamConfig, StreamParameters};
use crate::models::device::{DeviceId, LogicalDevice};
use crate::models::error::StreamError;
use crate::models::snapshot::SessionSnapshot;
use crate::models::state::LifecycleState;
use crate::models::stream_types::{Classification, HardwareStreamType, UseCase};
use crate::policy::classifier::{classify, ClassifierInput};
use crate::policy::sizing::{self, FragmentGeometry, SizingRequest};
use crate::processing::format_conversion::FormatConversionBuffer;
use crate::processing::position::{self, PlaybackGeometry, PositionTracker, PresentationPosition};
use crate::routing::table::{RouteOutcome, RoutingTable};
use crate::session::context::PlatformContext;
use crate::session::effects::{EffectKind, PreprocessState};
use crate::session::event_bridge::{EventBridge, ReadyTicket};
use crate::traits::engine::{
    BufferConfig, DrainMode, EngineResult, HardwareSession, MediaConfig, MmapBufferInfo, MmapPosition, PlatformQuery,
    PlatformReply, ProxyTxType, SessionParam, StreamAttributes, TransferMode,
};
use crate::traits::offload_hooks::OffloadEffectHooks;
use crate::traits::stream_callback::{StreamCallback, StreamEvent};

/// Framework identifier of a stream.
pub type IoHandle = u32;

/// Drain requested by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainType {
    /// Play out everything that was written.
    All,
    /// Notify early so the next track can be queued gaplessly.
    EarlyNotify,
}

/// Engine session owned by (or lent to) a stream.
struct HardwareHandle {
    session: Box<dyn HardwareSession>,
    /// Lent by a detection session; never closed here.
    borrowed: bool,
}

impl HardwareHandle {
    fn release(self) -> EngineResult<()> {
        if self.borrowed {
            Ok(())
        } else {
            self.session.close()
        }
    }
}

struct OutputState {
    hooks: Option<Arc<dyn OffloadEffectHooks>>,
    gapless: GaplessMetadata,
    codec: CodecConfig,
    compress_sample_rate: Option<u32>,
    compress_channels: Option<u16>,
    converter: Option<FormatConversionBuffer>,
    tracker: PositionTracker,
}

struct InputState {
    source: AudioSource,
    effects: PreprocessState,
    trigger_session: bool,
    tracker: PositionTracker,
}

enum DirectionState {
    Output(OutputState),
    Input(InputState),
}

impl DirectionState {
    fn tracker(&self) -> &PositionTracker {
        match self {
            Self::Output(output) => &output.tracker,
            Self::Input(input) => &input.tracker,
        }
    }
}

/// Mutable session state, protected by the session mutex.
struct SessionInner {
    config: StreamConfig,
    classification: Classification,
    route: RoutingTable,
    handle: Option<HardwareHandle>,
    state: LifecycleState,
    geometry: FragmentGeometry,
    /// Sample rate the engine session was opened with.
    media_sample_rate: u32,
    volume: Option<VolumeData>,
    direction: DirectionState,
}

impl SessionInner {
    fn classifier_input(&self) -> ClassifierInput {
        ClassifierInput {
            direction: self.config.direction,
            output_flags: self.config.output_flags,
            input_flags: self.config.input_flags,
            source: self.config.source,
            sample_rate: self.config.sample_rate,
            proxy_routed: self.route.has_device(DeviceId::InProxy),
        }
    }

    fn sizing_request(&self) -> SizingRequest {
        SizingRequest {
            direction: self.config.direction,
            stream_type: self.classification.stream_type,
            use_case: self.classification.use_case,
            format: self.config.format,
            channel_count: self.config.channel_count(),
            sample_rate: self.config.sample_rate,
            frame_count: self.config.frame_count,
        }
    }

    fn bytes_per_frame(&self) -> usize {
        bytes_per_frame(self.config.format, self.config.channel_count())
    }

    fn playback_geometry(&self) -> PlaybackGeometry {
        PlaybackGeometry {
            geometry: self.geometry,
            bytes_per_frame: self.bytes_per_frame(),
            sample_rate: self.media_sample_rate,
            stream_type: self.classification.stream_type,
        }
    }
}

/// One audio stream between the framework and the engine.
///
/// Owns at most one engine session at a time. Every operation takes `&self`
/// and serializes on the session mutex, so handle swaps are atomic with
/// respect to reads and writes on other threads. Engine events arrive on the
/// engine's thread through the session's [`EventBridge`].
///
/// ```text
/// write/read ─→ [open: classify → size → route → engine.open] ─→ [start] ─→ transfer
///                                                                   ↑
/// engine thread ─→ EventBridge ─→ tickets / StreamCallback          │
/// standby ─────────────────────────────→ stop + close ──────────────┘ (reopens lazily)
/// ```
pub struct Session {
    id: Uuid,
    io_handle: IoHandle,
    created_at: DateTime<Utc>,
    ctx: Arc<PlatformContext>,
    events: Arc<EventBridge>,
    standby_epoch: AtomicU64,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Create a playback stream routed to `devices`. No engine session is opened yet.
    pub fn new_output(
        ctx: Arc<PlatformContext>,
        io_handle: IoHandle,
        devices: &BTreeSet<LogicalDevice>,
        config: StreamConfig,
        hooks: Option<Arc<dyn OffloadEffectHooks>>,
    ) -> Result<Self, StreamError> {
        if config.direction != Direction::Output {
            return Err(StreamError::Configuration("output session needs an output config".into()));
        }
        let direction = DirectionState::Output(OutputState {
            hooks,
            gapless: GaplessMetadata::default(),
            codec: CodecConfig::default(),
            compress_sample_rate: None,
            compress_channels: None,
            converter: None,
            tracker: PositionTracker::new(),
        });
        Self::build(ctx, io_handle, devices, config, direction)
    }

    /// Create a capture stream routed to `devices`. No engine session is opened yet.
    pub fn new_input(
        ctx: Arc<PlatformContext>,
        io_handle: IoHandle,
        devices: &BTreeSet<LogicalDevice>,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        if config.direction != Direction::Input {
            return Err(StreamError::Configuration("input session needs an input config".into()));
        }
        let direction = DirectionState::Input(InputState {
            source: config.source,
            effects: PreprocessState::default(),
            trigger_session: false,
            tracker: PositionTracker::new(),
        });
        Self::build(ctx, io_handle, devices, config, direction)
    }

    fn build(
        ctx: Arc<PlatformContext>,
        io_handle: IoHandle,
        devices: &BTreeSet<LogicalDevice>,
        mut config: StreamConfig,
        direction: DirectionState,
    ) -> Result<Self, StreamError> {
        query_usb_capability(&ctx, &mut config, devices);
        config.apply_defaults(devices);
        if config.direction == Direction::Output {
            if config.sample_rate == 0 {
                config.sample_rate = ctx.config().default_output_sample_rate;
            }
            if config.channel_mask.is_none() {
                config.channel_mask = ChannelMask::OUT_STEREO;
            }
            if config.format == AudioFormat::Default {
                config.format = AudioFormat::Pcm16;
            }
        }
        config.validate().map_err(StreamError::Configuration)?;

        let route = RoutingTable::new(
            config.direction,
            devices,
            ctx.resolver(),
            ctx.route_defaults(config.sample_rate),
        )?;

        let mut inner = SessionInner {
            media_sample_rate: config.sample_rate,
            config,
            classification: Classification {
                use_case: UseCase::Record,
                stream_type: HardwareStreamType::Generic,
                record_direction: None,
            },
            route,
            handle: None,
            state: LifecycleState::Created,
            geometry: FragmentGeometry::default(),
            volume: None,
            direction,
        };
        inner.classification = classify(&inner.classifier_input());
        inner.geometry = sizing::fragment_geometry(&inner.sizing_request());

        let session = Self {
            id: Uuid::new_v4(),
            io_handle,
            created_at: Utc::now(),
            ctx,
            events: Arc::new(EventBridge::new()),
            standby_epoch: AtomicU64::new(0),
            inner: Mutex::new(inner),
        };
        {
            let inner = session.inner.lock();
            log::debug!(
                "[{}] created {:?} stream {} as {:?}/{:?} on {:?}",
                session.id,
                inner.config.direction,
                io_handle,
                inner.classification.use_case,
                inner.classification.stream_type,
                inner.route.device_ids()
            );
        }
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn io_handle(&self) -> IoHandle {
        self.io_handle
    }

    pub fn direction(&self) -> Direction {
        self.inner.lock().config.direction
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn has_hardware(&self) -> bool {
        self.inner.lock().handle.is_some()
    }

    pub fn config(&self) -> StreamConfig {
        self.inner.lock().config.clone()
    }

    pub fn classification(&self) -> Classification {
        self.inner.lock().classification
    }

    pub fn geometry(&self) -> FragmentGeometry {
        self.inner.lock().geometry
    }

    pub fn route(&self) -> Vec<DeviceId> {
        self.inner.lock().route.device_ids()
    }

    /// Bytes written (output) or read (input) since the last open or flush.
    pub fn transferred_bytes(&self) -> u64 {
        self.inner.lock().direction.tracker().total_bytes()
    }

    pub fn is_gapless_pending(&self) -> bool {
        self.events.is_gapless_pending()
    }

    pub fn events(&self) -> &Arc<EventBridge> {
        &self.events
    }

    pub fn set_callback(&self, callback: Option<Arc<dyn StreamCallback>>) {
        self.events.set_callback(callback);
    }

    /// Arm a ticket completed by the next write-ready event.
    pub fn arm_write_ready(&self) -> ReadyTicket {
        self.events.arm_write_ready()
    }

    /// Direct PCM playback: a DIRECT stream that is not compress offload.
    pub fn is_direct_pcm_track(&self) -> bool {
        let inner = self.inner.lock();
        inner.config.direction == Direction::Output
            && inner.config.output_flags.contains(OutputFlags::DIRECT)
            && !inner.config.output_flags.contains(OutputFlags::COMPRESS_OFFLOAD)
    }

    /// Framework-visible buffer size in bytes.
    pub fn buffer_size(&self) -> usize {
        let inner = self.inner.lock();
        let request = inner.sizing_request();
        match inner.config.direction {
            Direction::Output => sizing::playback_buffer_size(&request),
            Direction::Input => sizing::capture_buffer_size(&request),
        }
    }

    fn check_direction(&self, inner: &SessionInner, expected: Direction, op: &str) -> Result<(), StreamError> {
        if inner.state.is_closed() {
            return Err(StreamError::InvalidState(format!("{} on closed stream", op)));
        }
        if inner.config.direction != expected {
            return Err(StreamError::InvalidState(format!(
                "{} on {:?} stream",
                op, inner.config.direction
            )));
        }
        Ok(())
    }

    /// Open the engine session. Valid from Created and Standby.
    pub fn open(&self) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        let _boost = self.ctx.perf_boost(true);
        self.open_locked(&mut guard)
    }

    fn open_locked(&self, inner: &mut SessionInner) -> Result<(), StreamError> {
        if inner.handle.is_some() || !inner.state.accepts_open() {
            return Err(StreamError::InvalidState(format!("open from {:?}", inner.state)));
        }

        inner.classification = classify(&inner.classifier_input());
        inner.geometry = sizing::fragment_geometry(&inner.sizing_request());

        if let DirectionState::Input(input) = &mut inner.direction {
            if let Some(lease) = self.ctx.take_trigger_session(self.io_handle) {
                log::debug!("[{}] capture reuses detection session", self.id);
                input.trigger_session = true;
                input.tracker.reset();
                inner.handle = Some(HardwareHandle { session: lease, borrowed: true });
                inner.state = LifecycleState::Configured;
                return Ok(());
            }
        }

        let (attributes, hardware_format) = self.build_attributes(inner);
        let events = Arc::clone(&self.events);
        let mut session = self
            .ctx
            .engine()
            .open(&attributes, inner.route.descriptors(), events)
            .map_err(|e| {
                log::error!("[{}] engine open failed: {}", self.id, e);
                StreamError::hardware("open", e)
            })?;

        let mut geometry = inner.geometry;
        match &mut inner.direction {
            DirectionState::Output(output) => {
                if inner.classification.stream_type == HardwareStreamType::Compressed {
                    if let Err(e) = session.set_param(&SessionParam::CodecConfiguration(output.codec.clone())) {
                        log::error!("[{}] codec configuration rejected: {}", self.id, e);
                    }
                }

                output.converter = None;
                if let Some(target) = hardware_format.filter(|f| *f != inner.config.format) {
                    let size = sizing::conversion_buffer_size(
                        target,
                        inner.config.channel_count(),
                        inner.config.sample_rate,
                    );
                    match FormatConversionBuffer::new(inner.config.format, target, size) {
                        Ok(converter) => {
                            log::debug!("[{}] converting {:?} -> {:?}, {} byte fragments", self.id, inner.config.format, target, size);
                            geometry.fragment_size = size;
                            output.converter = Some(converter);
                        }
                        Err(e) => {
                            if let Err(close_err) = session.close() {
                                log::error!("[{}] close after failed open: {}", self.id, close_err);
                            }
                            return Err(e);
                        }
                    }
                }

                let buffers = BufferConfig {
                    output_size: geometry.fragment_size,
                    output_count: geometry.fragment_count,
                    ..BufferConfig::default()
                };
                if let Err(e) = session.set_buffer_size(&buffers) {
                    log::error!("[{}] set buffer size failed: {}", self.id, e);
                }
            }
            DirectionState::Input(input) => {
                let buffers = BufferConfig {
                    input_size: geometry.fragment_size,
                    input_count: geometry.fragment_count,
                    ..BufferConfig::default()
                };
                if let Err(e) = session.set_buffer_size(&buffers) {
                    log::error!("[{}] set buffer size failed: {}", self.id, e);
                }
                input.trigger_session = false;
                input.tracker.reset();
            }
        }

        log::debug!(
            "[{}] opened {:?}/{:?} fragment {}x{}",
            self.id,
            inner.classification.use_case,
            inner.classification.stream_type,
            geometry.fragment_size,
            geometry.fragment_count
        );
        inner.geometry = geometry;
        inner.media_sample_rate = attributes.media.sample_rate;
        inner.handle = Some(HardwareHandle { session, borrowed: false });
        inner.state = LifecycleState::Configured;
        Ok(())
    }

    /// Engine attributes for the current classification, plus the hardware
    /// PCM format when the stream type converts.
    fn build_attributes(&self, inner: &SessionInner) -> (StreamAttributes, Option<AudioFormat>) {
        let config = &inner.config;
        let class = inner.classification;
        let channels = config.channel_count() as u16;
        let mut media = MediaConfig {
            sample_rate: config.sample_rate,
            bit_width: self.ctx.config().codec_backend_bit_width,
            format_id: AudioFormat::Pcm16.media_format_id(),
            channel_info: ChannelInfo::for_count(channels),
        };
        let mut transfer_mode = TransferMode::Blocking;
        let mut hardware_format = None;
        let mut proxy_tx = None;

        match &inner.direction {
            DirectionState::Output(output) => match class.stream_type {
                HardwareStreamType::Compressed => {
                    transfer_mode = TransferMode::NonBlocking;
                    let offload = config.offload;
                    let payload = offload.map_or(config.format, |o| o.format);
                    media.format_id = payload.media_format_id();
                    media.sample_rate = output
                        .compress_sample_rate
                        .or(offload.map(|o| o.sample_rate).filter(|r| *r != 0))
                        .unwrap_or(config.sample_rate);
                    if let Some(ch) = output.compress_channels {
                        media.channel_info = ChannelInfo::for_count(ch);
                    }
                }
                HardwareStreamType::PcmOffload | HardwareStreamType::DeepBuffer => {
                    let target = config.format.hardware_format();
                    media.bit_width = match target.bit_width() {
                        0 => 16,
                        width => width,
                    };
                    hardware_format = Some(target);
                }
                HardwareStreamType::UltraLowLatency if class.use_case == UseCase::MmapPlayback => {
                    transfer_mode = TransferMode::MmapNoIrq;
                }
                HardwareStreamType::UltraLowLatency if class.use_case == UseCase::UltraLowLatencyPlayback => {
                    transfer_mode = TransferMode::Mmap;
                }
                _ => {}
            },
            DirectionState::Input(_) => match class.stream_type {
                HardwareStreamType::UltraLowLatency if class.use_case == UseCase::MmapRecord => {
                    transfer_mode = TransferMode::MmapNoIrq;
                }
                HardwareStreamType::UltraLowLatency if class.use_case == UseCase::LowLatencyRecord => {
                    transfer_mode = TransferMode::Mmap;
                }
                HardwareStreamType::Proxy if inner.route.has_device(DeviceId::InProxy) => {
                    proxy_tx = Some(ProxyTxType::WifiDisplay);
                }
                _ => {}
            },
        }

        let attributes = StreamAttributes {
            direction: config.direction,
            stream_type: class.stream_type,
            transfer_mode,
            media,
            record_direction: class.record_direction,
            proxy_tx,
        };
        (attributes, hardware_format)
    }

    fn start_output_locked(&self, inner: &mut SessionInner) -> Result<(), StreamError> {
        let stream_type = inner.classification.stream_type;
        let SessionInner {
            handle,
            direction,
            volume,
            state,
            ..
        } = inner;
        let Some(hw) = handle.as_mut() else {
            return Err(StreamError::InvalidState("start without hardware session".into()));
        };

        if let Some(volume) = volume.as_ref() {
            if let Err(e) = hw.session.set_volume(volume) {
                log::error!("[{}] cached volume rejected: {}", self.id, e);
            }
        }
        if let Err(e) = hw.session.start() {
            log::error!("[{}] engine start failed: {}", self.id, e);
            if let Some(hw) = handle.take() {
                if let Err(close_err) = hw.release() {
                    log::error!("[{}] close after failed start: {}", self.id, close_err);
                }
            }
            *state = LifecycleState::Standby;
            return Err(StreamError::hardware("start", e));
        }
        *state = LifecycleState::Started;
        log::debug!("[{}] started", self.id);

        if let DirectionState::Output(output) = direction {
            if stream_type.uses_offload_effects() {
                match &output.hooks {
                    Some(hooks) => {
                        if let Err(status) = hooks.start_effects(self.io_handle) {
                            log::error!("[{}] offload effects start failed: {}", self.id, status);
                        }
                        if let Err(status) = hooks.start_visualizer(self.io_handle) {
                            log::error!("[{}] visualizer start failed: {}", self.id, status);
                        }
                    }
                    None => log::warn!("[{}] no offload effect hooks registered", self.id),
                }
            }
        }
        Ok(())
    }

    fn start_input_locked(&self, inner: &mut SessionInner) -> Result<(), StreamError> {
        let SessionInner { handle, volume, state, .. } = inner;
        let Some(hw) = handle.as_mut() else {
            return Err(StreamError::InvalidState("start without hardware session".into()));
        };
        if let Err(e) = hw.session.start() {
            log::error!("[{}] engine start failed: {}", self.id, e);
            if let Some(hw) = handle.take() {
                if let Err(close_err) = hw.release() {
                    log::error!("[{}] close after failed start: {}", self.id, close_err);
                }
            }
            *state = LifecycleState::Standby;
            return Err(StreamError::hardware("start", e));
        }
        *state = LifecycleState::Started;
        log::debug!("[{}] started", self.id);

        if let (Some(volume), Some(hw)) = (volume.as_ref(), handle.as_mut()) {
            if let Err(e) = hw.session.set_volume(volume) {
                log::error!("[{}] cached gain rejected: {}", self.id, e);
            }
        }
        Ok(())
    }

    /// Write PCM or compressed data, opening and starting the stream on demand.
    ///
    /// Returns the caller bytes the engine consumed.
    pub fn write(&self, buffer: &[u8]) -> Result<usize, StreamError> {
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Output, "write")?;
        let _boost = self.ctx.perf_boost(!guard.state.is_running());

        if guard.handle.is_none() {
            self.open_locked(&mut guard)?;
        }
        let inner = &mut *guard;
        if !inner.state.is_running() {
            self.start_output_locked(inner)?;
        }

        let stream_type = inner.classification.stream_type;
        let SessionInner { handle, direction, .. } = inner;
        let (Some(hw), DirectionState::Output(output)) = (handle.as_mut(), direction) else {
            return Err(StreamError::InvalidState("write without hardware session".into()));
        };

        if stream_type == HardwareStreamType::Compressed && self.events.take_gapless_pending() {
            match hw.session.set_param(&SessionParam::GaplessMetadata(output.gapless)) {
                Ok(()) => log::debug!("[{}] pushed gapless metadata {:?}", self.id, output.gapless),
                Err(e) => log::error!("[{}] gapless metadata rejected: {}", self.id, e),
            }
        }

        let written = match output.converter.as_mut() {
            Some(converter) => {
                let converted = converter.convert(buffer)?;
                let hardware_bytes = hw
                    .session
                    .write(converted)
                    .map_err(|e| StreamError::hardware("write", e))?;
                converter.source_bytes_for(hardware_bytes)
            }
            None => hw
                .session
                .write(buffer)
                .map_err(|e| StreamError::hardware("write", e))?,
        };
        output.tracker.record_transfer(written, Instant::now());
        Ok(written)
    }

    /// Read capture data, opening and starting the stream on demand.
    ///
    /// A hard engine read error yields a zero-filled buffer rather than an
    /// error. Streams lent a detection session retry "no data yet" answers
    /// a bounded number of times.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize, StreamError> {
        let epoch = self.standby_epoch.load(Ordering::SeqCst);
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Input, "read")?;
        let _boost = self.ctx.perf_boost(!guard.state.is_running());

        if guard.handle.is_none() {
            self.open_locked(&mut guard)?;
        }
        let trigger = matches!(&guard.direction, DirectionState::Input(input) if input.trigger_session);
        if trigger {
            return self.read_trigger(guard, buffer, epoch);
        }

        let inner = &mut *guard;
        if !inner.state.is_running() {
            self.start_input_locked(inner)?;
        }

        let SessionInner { handle, direction, .. } = inner;
        let (Some(hw), DirectionState::Input(input)) = (handle.as_mut(), direction) else {
            return Err(StreamError::InvalidState("read without hardware session".into()));
        };

        if input.source == AudioSource::VoiceCommunication && input.effects.needs_apply() {
            let (effect, enable) = input.effects.pending_action();
            match hw.session.add_remove_effect(effect, enable) {
                Ok(()) => input.effects.mark_applied(true),
                Err(e) => log::error!("[{}] capture effect {:?} rejected: {}", self.id, effect, e),
            }
        }

        let mut bytes = match hw.session.read(buffer) {
            Ok(n) => n,
            Err(e) => {
                log::error!("[{}] engine read failed, returning silence: {}", self.id, e);
                buffer.fill(0);
                buffer.len()
            }
        };
        if self.capture_muted(input.source) {
            buffer.fill(0);
            bytes = buffer.len();
        }
        input.tracker.record_transfer(bytes, Instant::now());
        Ok(bytes)
    }

    fn read_trigger(
        &self,
        mut guard: MutexGuard<'_, SessionInner>,
        buffer: &mut [u8],
        epoch: u64,
    ) -> Result<usize, StreamError> {
        if !guard.state.is_running() {
            self.ctx.trigger_session_started();
            guard.state = LifecycleState::Started;
        }

        let retries = self.ctx.config().read_retry_count;
        let interval = Duration::from_millis(self.ctx.config().read_retry_interval_ms);
        for attempt in 1..=retries {
            if self.standby_epoch.load(Ordering::SeqCst) != epoch {
                return Err(StreamError::Cancelled);
            }
            let inner = &mut *guard;
            let SessionInner { handle, direction, .. } = inner;
            let (Some(hw), DirectionState::Input(input)) = (handle.as_mut(), direction) else {
                return Err(StreamError::Cancelled);
            };

            match hw.session.read(buffer) {
                Ok(0) => {}
                Ok(n) => {
                    input.tracker.record_transfer(n, Instant::now());
                    return Ok(n);
                }
                Err(e) => {
                    log::error!("[{}] detection read failed, returning silence: {}", self.id, e);
                    buffer.fill(0);
                    input.tracker.record_transfer(buffer.len(), Instant::now());
                    return Ok(buffer.len());
                }
            }

            if attempt < retries {
                log::trace!("[{}] no detection data yet, attempt {}", self.id, attempt);
                MutexGuard::unlocked(&mut guard, || thread::sleep(interval));
            }
        }
        log::error!("[{}] no detection data after {} attempts", self.id, retries);
        Err(StreamError::TransientUnavailable { retries })
    }

    fn capture_muted(&self, source: AudioSource) -> bool {
        self.ctx.config().va_concurrency_mute_enabled
            && self.ctx.active_trigger_sessions() > 0
            && source != AudioSource::VoiceRecognition
    }

    /// Start an mmap stream. Other use-cases start implicitly on first transfer.
    pub fn start(&self) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.classification.use_case.is_mmap() {
            return Err(StreamError::NotSupported("explicit start outside mmap".into()));
        }
        if inner.state.is_running() {
            return Err(StreamError::InvalidState("mmap stream already started".into()));
        }
        let Some(hw) = inner.handle.as_mut() else {
            return Err(StreamError::InvalidState("start before mmap buffer creation".into()));
        };
        hw.session.start().map_err(|e| StreamError::hardware("start", e))?;
        inner.state = LifecycleState::Started;
        Ok(())
    }

    /// Stop a started mmap stream, keeping its engine session.
    pub fn stop(&self) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.classification.use_case.is_mmap() {
            return Err(StreamError::NotSupported("explicit stop outside mmap".into()));
        }
        if !inner.state.is_running() {
            return Err(StreamError::InvalidState("mmap stream not started".into()));
        }
        let Some(hw) = inner.handle.as_mut() else {
            return Err(StreamError::InvalidState("stop without hardware session".into()));
        };
        hw.session.stop().map_err(|e| StreamError::hardware("stop", e))?;
        inner.state = LifecycleState::Configured;
        Ok(())
    }

    pub fn pause(&self) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.state.is_running() {
            return Err(StreamError::InvalidState(format!("pause from {:?}", inner.state)));
        }
        let Some(hw) = inner.handle.as_mut() else {
            return Err(StreamError::InvalidState("pause without hardware session".into()));
        };
        hw.session.pause().map_err(|e| StreamError::hardware("pause", e))?;
        inner.state = LifecycleState::Paused;
        log::debug!("[{}] paused", self.id);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.state.is_running() {
            return Err(StreamError::InvalidState(format!("resume from {:?}", inner.state)));
        }
        let Some(hw) = inner.handle.as_mut() else {
            return Err(StreamError::InvalidState("resume without hardware session".into()));
        };
        hw.session.resume().map_err(|e| StreamError::hardware("resume", e))?;
        if inner.state.is_paused() {
            inner.state = LifecycleState::Started;
        }
        log::debug!("[{}] resumed", self.id);
        Ok(())
    }

    /// Drop queued data of a paused stream and resume it.
    ///
    /// The written-byte counter is reset whether or not the stream was paused.
    pub fn flush(&self) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Output, "flush")?;
        let inner = &mut *guard;

        let mut result = Ok(());
        match inner.handle.as_mut() {
            Some(hw) if inner.state.is_paused() => {
                result = hw
                    .session
                    .flush()
                    .map_err(|e| StreamError::hardware("flush", e))
                    .and_then(|()| hw.session.resume().map_err(|e| StreamError::hardware("resume", e)));
                if result.is_ok() {
                    inner.state = LifecycleState::Started;
                }
            }
            _ => log::info!("[{}] flush while not paused, nothing to drop", self.id),
        }

        if let DirectionState::Output(output) = &mut inner.direction {
            output.tracker.reset();
        }
        result
    }

    /// Ask the engine to drain. An early-notify drain arms the gapless push.
    pub fn drain(&self, kind: DrainType) -> Result<(), StreamError> {
        self.issue_drain(kind).map(|_| ())
    }

    /// Drain and block until the engine reports drain-ready, or `timeout` passes.
    pub fn drain_and_wait(&self, kind: DrainType, timeout: Duration) -> Result<StreamEvent, StreamError> {
        let ticket = self.events.arm_drain_ready();
        if !self.issue_drain(kind)? {
            return Ok(StreamEvent::DrainReady);
        }
        ticket.wait(timeout).ok_or(StreamError::Timeout("drain ready"))
    }

    /// Returns whether a drain reached the engine.
    fn issue_drain(&self, kind: DrainType) -> Result<bool, StreamError> {
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Output, "drain")?;
        let mode = match kind {
            DrainType::All => DrainMode::Full,
            DrainType::EarlyNotify => {
                self.events.mark_gapless_pending();
                DrainMode::Partial
            }
        };
        match guard.handle.as_mut() {
            Some(hw) => {
                hw.session.drain(mode).map_err(|e| StreamError::hardware("drain", e))?;
                Ok(true)
            }
            None => {
                log::debug!("[{}] drain without hardware session", self.id);
                Ok(false)
            }
        }
    }

    /// Release the engine session. Safe to call repeatedly.
    ///
    /// An in-flight detection read on another thread observes the standby
    /// between retries and fails with [`StreamError::Cancelled`].
    pub fn standby(&self) -> Result<(), StreamError> {
        self.standby_epoch.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.inner.lock();
        self.standby_locked(&mut guard)
    }

    fn standby_locked(&self, inner: &mut SessionInner) -> Result<(), StreamError> {
        let Some(mut hw) = inner.handle.take() else {
            return Ok(());
        };
        let stream_type = inner.classification.stream_type;
        let mut result = Ok(());

        match &mut inner.direction {
            DirectionState::Output(output) => {
                if let Err(e) = hw.session.stop() {
                    log::error!("[{}] engine stop failed: {}", self.id, e);
                    result = Err(StreamError::hardware("stop", e));
                }
                if stream_type.uses_offload_effects() {
                    if let Some(hooks) = &output.hooks {
                        if let Err(status) = hooks.stop_effects(self.io_handle) {
                            log::error!("[{}] offload effects stop failed: {}", self.id, status);
                        }
                        if let Err(status) = hooks.stop_visualizer(self.io_handle) {
                            log::error!("[{}] visualizer stop failed: {}", self.id, status);
                        }
                    }
                }
            }
            DirectionState::Input(input) => {
                if hw.borrowed {
                    if let Err(e) = hw.session.set_param(&SessionParam::StopBuffering) {
                        log::error!("[{}] stop buffering failed: {}", self.id, e);
                        result = Err(StreamError::hardware("stop_buffering", e));
                    }
                    if inner.state.is_running() {
                        self.ctx.trigger_session_stopped();
                    }
                    input.trigger_session = false;
                } else if let Err(e) = hw.session.stop() {
                    log::error!("[{}] engine stop failed: {}", self.id, e);
                    result = Err(StreamError::hardware("stop", e));
                }
                input.effects.mark_applied(false);
            }
        }

        if let Err(e) = hw.release() {
            log::error!("[{}] engine close failed: {}", self.id, e);
            if result.is_ok() {
                result = Err(StreamError::hardware("close", e));
            }
        }
        inner.state = LifecycleState::Standby;
        log::debug!("[{}] standby", self.id);
        result
    }

    /// Move the stream to `devices` without restarting it.
    pub fn route_stream(&self, devices: &BTreeSet<LogicalDevice>) -> Result<RouteOutcome, StreamError> {
        let mut guard = self.inner.lock();
        self.route_locked(&mut guard, devices)
    }

    fn route_locked(&self, inner: &mut SessionInner, devices: &BTreeSet<LogicalDevice>) -> Result<RouteOutcome, StreamError> {
        if inner.state.is_closed() {
            return Err(StreamError::InvalidState("route on closed stream".into()));
        }
        let defaults = self.ctx.route_defaults(inner.config.sample_rate);
        let SessionInner { route, handle, .. } = inner;
        let outcome = route.set_route(devices, self.ctx.resolver(), defaults, |descriptors| match handle.as_mut() {
            Some(hw) => hw.session.set_devices(descriptors).map_err(|e| {
                log::error!("[{}] set devices failed: {}", self.id, e);
                StreamError::hardware("set_devices", e)
            }),
            None => Ok(()),
        })?;
        if outcome == RouteOutcome::Applied {
            log::debug!("[{}] routed to {:?}", self.id, route.device_ids());
        }
        Ok(outcome)
    }

    /// Cache and apply playback volume. Equal gains collapse into one pair.
    pub fn set_volume(&self, left: f32, right: f32) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Output, "set_volume")?;
        self.apply_volume(&mut guard, VolumeData::stereo(left, right), [left, right])
    }

    /// Cache and apply capture gain.
    pub fn set_gain(&self, gain: f32) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Input, "set_gain")?;
        self.apply_volume(&mut guard, VolumeData::uniform(gain), [gain, gain])
    }

    fn apply_volume(&self, inner: &mut SessionInner, volume: VolumeData, gains: [f32; 2]) -> Result<(), StreamError> {
        if gains.iter().any(|g| !g.is_finite() || *g < 0.0) {
            return Err(StreamError::Configuration(format!("invalid gain {:?}", gains)));
        }
        inner.volume = Some(volume);
        if let (Some(hw), Some(volume)) = (inner.handle.as_mut(), inner.volume.as_ref()) {
            hw.session
                .set_volume(volume)
                .map_err(|e| StreamError::hardware("set_volume", e))?;
        }
        Ok(())
    }

    /// Apply an already-parsed parameter update.
    pub fn set_parameters(&self, params: &StreamParameters) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let DirectionState::Output(output) = &mut inner.direction {
            if let Some(compress) = &params.compress {
                if compress.sample_rate.is_some() {
                    output.compress_sample_rate = compress.sample_rate;
                }
                if compress.channels.is_some() {
                    output.compress_channels = compress.channels;
                }
                if let Some(codec) = &compress.codec {
                    output.codec = codec.clone();
                }
            }
            if let Some(delay) = params.encoder_delay {
                output.gapless.encoder_delay = delay;
            }
            if let Some(padding) = params.encoder_padding {
                output.gapless.encoder_padding = padding;
            }
            if params.has_gapless() {
                log::debug!("[{}] gapless metadata now {:?}", self.id, output.gapless);
            }
        }

        if let Some(address) = params.usb_address {
            self.ctx.set_usb_address(address);
        }
        if let Some(devices) = &params.routing {
            self.route_locked(inner, devices)?;
        }
        Ok(())
    }

    /// Toggle echo cancellation or noise suppression on a voice-communication capture.
    ///
    /// Applied immediately when an engine session exists, otherwise on the next read.
    pub fn set_preprocessing(&self, kind: EffectKind, enable: bool) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Input, "set_preprocessing")?;
        let inner = &mut *guard;
        let SessionInner { handle, direction, .. } = inner;
        let DirectionState::Input(input) = direction else {
            return Ok(());
        };
        if input.source != AudioSource::VoiceCommunication {
            log::debug!("[{}] ignoring {:?} for {:?} capture", self.id, kind, input.source);
            return Ok(());
        }

        if let (Some((effect, on)), Some(hw)) = (input.effects.toggle(kind, enable), handle.as_mut()) {
            match hw.session.add_remove_effect(effect, on) {
                Ok(()) => input.effects.mark_applied(true),
                Err(e) => log::error!("[{}] capture effect {:?} rejected: {}", self.id, effect, e),
            }
        }
        Ok(())
    }

    /// Open an mmap stream and map its shared buffer.
    pub fn create_mmap_buffer(&self, min_size_frames: i32) -> Result<MmapBufferInfo, StreamError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.classification.use_case.is_mmap() {
            return Err(StreamError::NotSupported("mmap buffer outside mmap use-case".into()));
        }
        if min_size_frames <= 0 {
            return Err(StreamError::Configuration(format!("invalid mmap size {}", min_size_frames)));
        }
        if inner.handle.is_some() {
            return Err(StreamError::InvalidState("mmap buffer already created".into()));
        }

        self.open_locked(inner)?;
        let created = match inner.handle.as_mut() {
            Some(hw) => hw.session.create_mmap_buffer(min_size_frames),
            None => return Err(StreamError::InvalidState("mmap open lent a detection session".into())),
        };
        match created {
            Ok(info) => Ok(info),
            Err(e) => {
                log::error!("[{}] mmap buffer creation failed: {}", self.id, e);
                if let Err(standby_err) = self.standby_locked(inner) {
                    log::error!("[{}] standby after mmap failure: {}", self.id, standby_err);
                }
                Err(StreamError::hardware("create_mmap_buffer", e))
            }
        }
    }

    pub fn get_mmap_position(&self) -> Result<MmapPosition, StreamError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.classification.use_case.is_mmap() {
            return Err(StreamError::NotSupported("mmap position outside mmap use-case".into()));
        }
        let Some(hw) = inner.handle.as_mut() else {
            return Err(StreamError::InvalidState("mmap position without hardware session".into()));
        };
        hw.session
            .get_mmap_position()
            .map_err(|e| StreamError::hardware("get_mmap_position", e))
    }

    /// Frames presented to the listener and when.
    ///
    /// Compressed streams ask the engine for rendered time; PCM streams
    /// estimate from the written-byte counter.
    pub fn presentation_position(&self) -> Result<PresentationPosition, StreamError> {
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Output, "presentation_position")?;
        let inner = &mut *guard;
        let now = Instant::now();

        if inner.classification.stream_type == HardwareStreamType::Compressed {
            let frames = match inner.handle.as_mut() {
                Some(hw) => {
                    let micros = hw
                        .session
                        .get_timestamp()
                        .map_err(|e| StreamError::hardware("get_timestamp", e))?;
                    position::frames_from_micros(micros, inner.media_sample_rate)
                }
                None => 0,
            };
            return Ok(PresentationPosition { frames, timestamp: now });
        }

        let bt_latency = self.a2dp_latency(inner);
        Ok(inner.direction.tracker().presented(&inner.playback_geometry(), bt_latency, now))
    }

    /// DSP frames rendered, compressed streams only.
    pub fn render_position(&self) -> Result<u32, StreamError> {
        let mut guard = self.inner.lock();
        self.check_direction(&guard, Direction::Output, "render_position")?;
        let inner = &mut *guard;
        if inner.classification.stream_type != HardwareStreamType::Compressed {
            return Err(StreamError::NotSupported("render position of pcm stream".into()));
        }
        let Some(hw) = inner.handle.as_mut() else {
            return Ok(0);
        };
        let micros = hw
            .session
            .get_timestamp()
            .map_err(|e| StreamError::hardware("get_timestamp", e))?;
        Ok(position::frames_from_micros(micros, inner.media_sample_rate) as u32)
    }

    /// Frames read so far and when the last read happened.
    pub fn capture_position(&self) -> Result<PresentationPosition, StreamError> {
        let guard = self.inner.lock();
        self.check_direction(&guard, Direction::Input, "capture_position")?;
        let tracker = guard.direction.tracker();
        Ok(PresentationPosition {
            frames: tracker.frames(guard.bytes_per_frame()),
            timestamp: tracker.last_transfer().unwrap_or_else(Instant::now),
        })
    }

    /// Playback latency in milliseconds, A2DP encoder latency included.
    pub fn latency_ms(&self) -> Result<u32, StreamError> {
        let guard = self.inner.lock();
        self.check_direction(&guard, Direction::Output, "latency")?;
        let bt_latency = self.a2dp_latency(&guard);
        Ok(position::playback_latency_ms(
            guard.classification.use_case,
            guard.classification.stream_type,
            bt_latency,
        ))
    }

    fn a2dp_latency(&self, inner: &SessionInner) -> Option<u32> {
        if inner.route.has_device(DeviceId::OutBluetoothA2dp) {
            self.ctx.a2dp_latency_ms()
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        let trigger_session = matches!(&inner.direction, DirectionState::Input(input) if input.trigger_session);
        SessionSnapshot {
            id: self.id.to_string(),
            io_handle: self.io_handle,
            created_at: self.created_at.to_rfc3339(),
            direction: inner.config.direction,
            use_case: inner.classification.use_case,
            stream_type: inner.classification.stream_type,
            state: inner.state,
            sample_rate: inner.config.sample_rate,
            channels: inner.config.channel_count(),
            format: inner.config.format,
            fragment_size: inner.geometry.fragment_size,
            fragment_count: inner.geometry.fragment_count,
            transferred_bytes: inner.direction.tracker().total_bytes(),
            route: inner.route.device_ids(),
            volume_cached: inner.volume.is_some(),
            gapless_pending: self.events.is_gapless_pending(),
            trigger_session,
        }
    }

    pub fn dump_json(&self) -> Result<String, StreamError> {
        self.snapshot()
            .to_json()
            .map_err(|e| StreamError::Configuration(format!("failed to serialize session: {}", e)))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut guard = self.inner.lock();
        if let Err(e) = self.standby_locked(&mut guard) {
            log::error!("[{}] teardown failed: {}", self.id, e);
        }
        guard.state = LifecycleState::Closed;
        log::debug!("[{}] closed", self.id);
    }
}

/// Fill an unspecified rate (and mask/format) from the capability of the
/// routed USB device.
fn query_usb_capability(ctx: &PlatformContext, config: &mut StreamConfig, devices: &BTreeSet<LogicalDevice>) {
    if config.sample_rate != 0 {
        return;
    }
    let usb: BTreeSet<LogicalDevice> = devices.iter().copied().filter(|d| d.is_usb()).collect();
    if usb.is_empty() {
        return;
    }
    let Some(device) = ctx.resolve_device_ids(&usb).into_iter().next() else {
        return;
    };
    let query = PlatformQuery::DeviceCapability {
        device,
        address: ctx.usb_address(),
        playback: config.direction == Direction::Output,
    };
    match ctx.engine().get_parameter(&query) {
        Ok(PlatformReply::Capability(capability)) => {
            log::debug!("usb capability {:?}", capability);
            config.sample_rate = capability.sample_rate;
            if config.channel_mask.is_none() {
                config.channel_mask = capability.channel_mask;
            }
            if config.format == AudioFormat::Default {
                config.format = capability.format;
            }
        }
        Ok(other) => log::warn!("unexpected reply to usb capability query: {:?}", other),
        Err(e) => log::warn!("usb capability query failed: {}", e),
    }
}
