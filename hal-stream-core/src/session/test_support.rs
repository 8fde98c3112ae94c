//! Scriptable engine used by the session tests.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::VolumeData;
use crate::models::device::{DeviceDescriptor, DeviceId, LogicalDevice};
use crate::traits::device_resolver::DeviceResolver;
use crate::traits::engine::{
    BufferConfig, DeviceCapability, DrainMode, EngineError, EngineResult, EventSink, HardwareEngine,
    HardwareEvent, HardwareSession, MmapBufferInfo, MmapPosition, PlatformQuery, PlatformReply, PreprocessEffect,
    SessionParam, StreamAttributes,
};
use crate::traits::offload_hooks::OffloadEffectHooks;
use crate::traits::perf_boost::PerformanceBoost;
use crate::traits::trigger_broker::TriggerSessionBroker;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(StreamAttributes),
    Start,
    Stop,
    Pause,
    Resume,
    Flush,
    Drain(DrainMode),
    Write(usize),
    Read(usize),
    SetDevices(Vec<DeviceId>),
    SetVolume(VolumeData),
    SetParam(SessionParam),
    SetBufferSize(BufferConfig),
    Effect(PreprocessEffect, bool),
    CreateMmap(i32),
    Close,
}

#[derive(Default)]
pub struct FakeState {
    pub calls: Vec<Call>,
    /// Operations that fail with -EIO.
    pub failing: HashSet<&'static str>,
    /// Bytes returned by successive reads; empty means "fill the buffer".
    pub reads: VecDeque<usize>,
    pub a2dp_latency: Option<u32>,
    pub capability: Option<DeviceCapability>,
    pub timestamp_us: u64,
    pub sink: Option<Arc<dyn EventSink>>,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn fail(&self, op: &'static str) {
        self.state.lock().failing.insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.state.lock().failing.remove(op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| matches(c)).count()
    }

    pub fn opened(&self) -> Vec<StreamAttributes> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Open(attributes) => Some(attributes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn emit(&self, event: HardwareEvent) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.deliver(event).unwrap();
        }
    }

    pub fn session(&self) -> Box<dyn HardwareSession> {
        Box::new(FakeSession {
            state: Arc::clone(&self.state),
        })
    }
}

impl HardwareEngine for FakeEngine {
    fn open(
        &self,
        attributes: &StreamAttributes,
        _devices: &[DeviceDescriptor],
        events: Arc<dyn EventSink>,
    ) -> EngineResult<Box<dyn HardwareSession>> {
        let mut state = self.state.lock();
        state.calls.push(Call::Open(attributes.clone()));
        if state.failing.contains("open") {
            return Err(EngineError(-libc::EIO));
        }
        state.sink = Some(events);
        drop(state);
        Ok(self.session())
    }

    fn get_parameter(&self, query: &PlatformQuery) -> EngineResult<PlatformReply> {
        let state = self.state.lock();
        match query {
            PlatformQuery::A2dpEncoderLatency => state.a2dp_latency.map(PlatformReply::LatencyMs),
            PlatformQuery::DeviceCapability { .. } => state.capability.map(PlatformReply::Capability),
        }
        .ok_or(EngineError(-libc::EINVAL))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSession {
    fn record(&self, op: &'static str, call: Call) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.failing.contains(op) {
            Err(EngineError(-libc::EIO))
        } else {
            Ok(())
        }
    }
}

impl HardwareSession for FakeSession {
    fn start(&mut self) -> EngineResult<()> {
        self.record("start", Call::Start)
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.record("stop", Call::Stop)
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.record("pause", Call::Pause)
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.record("resume", Call::Resume)
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.record("flush", Call::Flush)
    }

    fn drain(&mut self, mode: DrainMode) -> EngineResult<()> {
        self.record("drain", Call::Drain(mode))
    }

    fn write(&mut self, data: &[u8]) -> EngineResult<usize> {
        self.record("write", Call::Write(data.len()))?;
        Ok(data.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> EngineResult<usize> {
        self.record("read", Call::Read(buffer.len()))?;
        let n = self.state.lock().reads.pop_front().unwrap_or(buffer.len()).min(buffer.len());
        buffer[..n].fill(0x11);
        Ok(n)
    }

    fn set_devices(&mut self, devices: &[DeviceDescriptor]) -> EngineResult<()> {
        self.record("set_devices", Call::SetDevices(devices.iter().map(|d| d.id).collect()))
    }

    fn set_volume(&mut self, volume: &VolumeData) -> EngineResult<()> {
        self.record("set_volume", Call::SetVolume(volume.clone()))
    }

    fn set_param(&mut self, param: &SessionParam) -> EngineResult<()> {
        self.record("set_param", Call::SetParam(param.clone()))
    }

    fn set_buffer_size(&mut self, config: &BufferConfig) -> EngineResult<()> {
        self.record("set_buffer_size", Call::SetBufferSize(*config))
    }

    fn get_timestamp(&mut self) -> EngineResult<u64> {
        Ok(self.state.lock().timestamp_us)
    }

    fn create_mmap_buffer(&mut self, min_size_frames: i32) -> EngineResult<MmapBufferInfo> {
        self.record("create_mmap_buffer", Call::CreateMmap(min_size_frames))?;
        Ok(MmapBufferInfo {
            shared_memory_fd: 7,
            buffer_size_frames: min_size_frames as u32,
            burst_size_frames: 48,
            application_shareable: false,
        })
    }

    fn get_mmap_position(&mut self) -> EngineResult<MmapPosition> {
        Ok(MmapPosition {
            position_frames: 480,
            time_nanoseconds: 10_000_000,
        })
    }

    fn add_remove_effect(&mut self, effect: PreprocessEffect, enable: bool) -> EngineResult<()> {
        self.record("effect", Call::Effect(effect, enable))
    }

    fn close(self: Box<Self>) -> EngineResult<()> {
        self.record("close", Call::Close)
    }
}

/// One engine id per logical device.
pub struct FakeResolver;

impl DeviceResolver for FakeResolver {
    fn resolve_device_ids(&self, devices: &BTreeSet<LogicalDevice>) -> Vec<DeviceId> {
        devices
            .iter()
            .map(|d| match d {
                LogicalDevice::Earpiece => DeviceId::OutHandset,
                LogicalDevice::Speaker | LogicalDevice::DefaultOut => DeviceId::OutSpeaker,
                LogicalDevice::WiredHeadset => DeviceId::OutWiredHeadset,
                LogicalDevice::WiredHeadphone => DeviceId::OutWiredHeadphone,
                LogicalDevice::BluetoothSco => DeviceId::OutBluetoothSco,
                LogicalDevice::BluetoothA2dp => DeviceId::OutBluetoothA2dp,
                LogicalDevice::AuxDigital => DeviceId::OutAuxDigital,
                LogicalDevice::UsbAccessory | LogicalDevice::UsbDevice => DeviceId::OutUsbDevice,
                LogicalDevice::UsbHeadset => DeviceId::OutUsbHeadset,
                LogicalDevice::Proxy => DeviceId::OutProxy,
                LogicalDevice::BuiltinMic | LogicalDevice::DefaultIn => DeviceId::InHandsetMic,
                LogicalDevice::BackMic => DeviceId::InSpeakerMic,
                LogicalDevice::WiredHeadsetMic => DeviceId::InWiredHeadset,
                LogicalDevice::BluetoothScoHeadsetMic => DeviceId::InBluetoothScoHeadset,
                LogicalDevice::UsbDeviceIn => DeviceId::InUsbDevice,
                LogicalDevice::UsbHeadsetIn => DeviceId::InUsbHeadset,
                LogicalDevice::ProxyIn | LogicalDevice::RemoteSubmixIn => DeviceId::InProxy,
            })
            .collect()
    }
}

#[derive(Default)]
pub struct CountingBoost {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl PerformanceBoost for CountingBoost {
    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingHooks {
    pub calls: Mutex<Vec<&'static str>>,
}

impl OffloadEffectHooks for RecordingHooks {
    fn start_effects(&self, _io_handle: u32) -> Result<(), i32> {
        self.calls.lock().push("start_effects");
        Ok(())
    }

    fn stop_effects(&self, _io_handle: u32) -> Result<(), i32> {
        self.calls.lock().push("stop_effects");
        Ok(())
    }

    fn start_visualizer(&self, _io_handle: u32) -> Result<(), i32> {
        self.calls.lock().push("start_visualizer");
        Ok(())
    }

    fn stop_visualizer(&self, _io_handle: u32) -> Result<(), i32> {
        self.calls.lock().push("stop_visualizer");
        Ok(())
    }
}

/// Lends one detection session on any io handle.
pub struct SingleLeaseBroker {
    pub lease: Mutex<Option<Box<dyn HardwareSession>>>,
}

impl TriggerSessionBroker for SingleLeaseBroker {
    fn take_capture_session(&self, _io_handle: u32) -> Option<Box<dyn HardwareSession>> {
        self.lease.lock().take()
    }
}
