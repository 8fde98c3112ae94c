use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::config::PlatformConfig;
use crate::models::device::{DeviceId, LogicalDevice, UsbAddress};
use crate::routing::table::RouteDefaults;
use crate::traits::device_resolver::DeviceResolver;
use crate::traits::engine::{HardwareEngine, HardwareSession, PlatformQuery, PlatformReply};
use crate::traits::perf_boost::PerformanceBoost;
use crate::traits::trigger_broker::TriggerSessionBroker;

/// Process-wide state shared by every session of one audio device.
///
/// Sessions receive it at construction instead of looking up a global.
pub struct PlatformContext {
    config: PlatformConfig,
    engine: Arc<dyn HardwareEngine>,
    resolver: Arc<dyn DeviceResolver>,
    perf_boost: Option<Arc<dyn PerformanceBoost>>,
    trigger_broker: Option<Arc<dyn TriggerSessionBroker>>,
    usb_address: RwLock<UsbAddress>,
    active_trigger_sessions: AtomicU32,
}

impl PlatformContext {
    pub fn new(engine: Arc<dyn HardwareEngine>, resolver: Arc<dyn DeviceResolver>) -> Self {
        Self {
            config: PlatformConfig::default(),
            engine,
            resolver,
            perf_boost: None,
            trigger_broker: None,
            usb_address: RwLock::new(UsbAddress::UNSET),
            active_trigger_sessions: AtomicU32::new(0),
        }
    }

    pub fn with_config(mut self, config: PlatformConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_perf_boost(mut self, boost: Arc<dyn PerformanceBoost>) -> Self {
        self.perf_boost = Some(boost);
        self
    }

    pub fn with_trigger_broker(mut self, broker: Arc<dyn TriggerSessionBroker>) -> Self {
        self.trigger_broker = Some(broker);
        self
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn HardwareEngine {
        self.engine.as_ref()
    }

    pub fn resolver(&self) -> &dyn DeviceResolver {
        self.resolver.as_ref()
    }

    pub fn resolve_device_ids(&self, devices: &BTreeSet<LogicalDevice>) -> Vec<DeviceId> {
        self.resolver.resolve_device_ids(devices)
    }

    pub fn usb_address(&self) -> UsbAddress {
        *self.usb_address.read()
    }

    /// Record the card/device of a newly connected USB audio device.
    pub fn set_usb_address(&self, address: UsbAddress) {
        log::debug!("usb audio at card {} device {}", address.card, address.device);
        *self.usb_address.write() = address;
    }

    pub(crate) fn route_defaults(&self, sample_rate: u32) -> RouteDefaults {
        RouteDefaults {
            sample_rate,
            bit_width: self.config.codec_backend_bit_width,
            usb_address: self.usb_address(),
        }
    }

    /// A2DP encoder latency, if the engine reports one.
    pub fn a2dp_latency_ms(&self) -> Option<u32> {
        match self.engine.get_parameter(&PlatformQuery::A2dpEncoderLatency) {
            Ok(PlatformReply::LatencyMs(ms)) => Some(ms),
            Ok(other) => {
                log::warn!("unexpected reply to a2dp latency query: {:?}", other);
                None
            }
            Err(e) => {
                log::debug!("a2dp latency unavailable: {}", e);
                None
            }
        }
    }

    /// Boost CPU for the lifetime of the returned guard when `wanted`.
    pub fn perf_boost(&self, wanted: bool) -> PerfBoostGuard {
        let boost = self.perf_boost.as_ref().filter(|_| wanted).cloned();
        if let Some(boost) = &boost {
            boost.acquire();
        }
        PerfBoostGuard { boost }
    }

    pub fn take_trigger_session(&self, io_handle: u32) -> Option<Box<dyn HardwareSession>> {
        self.trigger_broker.as_ref()?.take_capture_session(io_handle)
    }

    pub fn active_trigger_sessions(&self) -> u32 {
        self.active_trigger_sessions.load(Ordering::SeqCst)
    }

    pub(crate) fn trigger_session_started(&self) {
        self.active_trigger_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn trigger_session_stopped(&self) {
        let _ = self
            .active_trigger_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Releases the performance boost when dropped.
#[must_use]
pub struct PerfBoostGuard {
    boost: Option<Arc<dyn PerformanceBoost>>,
}

impl PerfBoostGuard {
    pub fn is_held(&self) -> bool {
        self.boost.is_some()
    }
}

impl Drop for PerfBoostGuard {
    fn drop(&mut self) {
        if let Some(boost) = self.boost.take() {
            boost.release();
        }
    }
}
