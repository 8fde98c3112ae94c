//! Voice-activation detection sessions lent to capture streams.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use hal_stream_core::models::audio_models::{ChannelInfo, Direction, MediaFormatId, VolumeData};
use hal_stream_core::models::device::{DeviceDescriptor, DeviceId};
use hal_stream_core::models::error::StreamError;
use hal_stream_core::models::stream_types::HardwareStreamType;
use hal_stream_core::traits::engine::{
    BufferConfig, DrainMode, EngineError, EngineResult, EventSink, HardwareEvent, HardwareSession, MediaConfig,
    MmapBufferInfo, MmapPosition, PreprocessEffect, SessionParam, StreamAttributes, TransferMode,
};
use hal_stream_core::traits::trigger_broker::TriggerSessionBroker;

use crate::engine::{LoopbackEngine, LoopbackSession};
use crate::error::{LoopbackError, ENODEV};

type Slot = Arc<Mutex<Option<LoopbackSession>>>;

/// Detection sessions receive no stream events.
struct DetectionSink;

impl EventSink for DetectionSink {
    fn deliver(&self, event: HardwareEvent) -> Result<(), StreamError> {
        log::trace!("detection session ignores {:?}", event);
        Ok(())
    }
}

/// Keeps running detection sessions and lends them to capture streams
/// opened on the same io handle.
///
/// The broker owns each session; a lease only borrows it, and the session
/// is closed by [`LoopbackTriggerBroker::disarm`].
pub struct LoopbackTriggerBroker {
    engine: Arc<LoopbackEngine>,
    armed: Mutex<HashMap<u32, Slot>>,
}

impl LoopbackTriggerBroker {
    pub fn new(engine: Arc<LoopbackEngine>) -> Self {
        Self {
            engine,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Open and start a detection session buffering mono 16-bit capture.
    pub fn arm(&self, io_handle: u32, sample_rate: u32) -> Result<(), LoopbackError> {
        let attributes = StreamAttributes {
            direction: Direction::Input,
            stream_type: HardwareStreamType::Generic,
            transfer_mode: TransferMode::Blocking,
            media: MediaConfig {
                sample_rate,
                bit_width: 16,
                format_id: MediaFormatId::DefaultPcm,
                channel_info: ChannelInfo::for_count(1),
            },
            record_direction: None,
            proxy_tx: None,
        };
        let mic = [DeviceDescriptor::new(DeviceId::InHandsetMic)];
        let mut session = self.engine.open_session(&attributes, &mic, Arc::new(DetectionSink))?;
        session.start()?;

        log::debug!("detection session {} armed on io handle {}", session.id(), io_handle);
        let previous = self
            .armed
            .lock()
            .insert(io_handle, Arc::new(Mutex::new(Some(session))));
        if let Some(previous) = previous {
            close_slot(&previous)?;
        }
        Ok(())
    }

    /// Close the detection session on `io_handle`. Outstanding leases fail afterwards.
    pub fn disarm(&self, io_handle: u32) -> Result<(), LoopbackError> {
        let slot = self
            .armed
            .lock()
            .remove(&io_handle)
            .ok_or(LoopbackError::NotArmed(io_handle))?;
        close_slot(&slot)
    }

    pub fn is_armed(&self, io_handle: u32) -> bool {
        self.armed.lock().contains_key(&io_handle)
    }
}

fn close_slot(slot: &Slot) -> Result<(), LoopbackError> {
    match slot.lock().take() {
        Some(session) => Ok(Box::new(session).close()?),
        None => Ok(()),
    }
}

impl TriggerSessionBroker for LoopbackTriggerBroker {
    fn take_capture_session(&self, io_handle: u32) -> Option<Box<dyn HardwareSession>> {
        let slot = self.armed.lock().get(&io_handle).cloned()?;
        Some(Box::new(DetectionLease { slot }))
    }
}

/// Borrowed view of a detection session. Closing a lease releases nothing.
struct DetectionLease {
    slot: Slot,
}

impl DetectionLease {
    fn with<T>(&self, f: impl FnOnce(&mut LoopbackSession) -> EngineResult<T>) -> EngineResult<T> {
        match self.slot.lock().as_mut() {
            Some(session) => f(session),
            None => Err(EngineError(ENODEV)),
        }
    }
}

impl HardwareSession for DetectionLease {
    fn start(&mut self) -> EngineResult<()> {
        self.with(|s| s.start())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.with(|s| s.stop())
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.with(|s| s.pause())
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.with(|s| s.resume())
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.with(|s| s.flush())
    }

    fn drain(&mut self, mode: DrainMode) -> EngineResult<()> {
        self.with(|s| s.drain(mode))
    }

    fn write(&mut self, data: &[u8]) -> EngineResult<usize> {
        self.with(|s| s.write(data))
    }

    fn read(&mut self, buffer: &mut [u8]) -> EngineResult<usize> {
        self.with(|s| s.read(buffer))
    }

    fn set_devices(&mut self, devices: &[DeviceDescriptor]) -> EngineResult<()> {
        self.with(|s| s.set_devices(devices))
    }

    fn set_volume(&mut self, volume: &VolumeData) -> EngineResult<()> {
        self.with(|s| s.set_volume(volume))
    }

    fn set_param(&mut self, param: &SessionParam) -> EngineResult<()> {
        self.with(|s| s.set_param(param))
    }

    fn set_buffer_size(&mut self, config: &BufferConfig) -> EngineResult<()> {
        self.with(|s| s.set_buffer_size(config))
    }

    fn get_timestamp(&mut self) -> EngineResult<u64> {
        self.with(|s| s.get_timestamp())
    }

    fn create_mmap_buffer(&mut self, min_size_frames: i32) -> EngineResult<MmapBufferInfo> {
        self.with(|s| s.create_mmap_buffer(min_size_frames))
    }

    fn get_mmap_position(&mut self) -> EngineResult<MmapPosition> {
        self.with(|s| s.get_mmap_position())
    }

    fn add_remove_effect(&mut self, effect: PreprocessEffect, enable: bool) -> EngineResult<()> {
        self.with(|s| s.add_remove_effect(effect, enable))
    }

    fn close(self: Box<Self>) -> EngineResult<()> {
        Ok(())
    }
}
