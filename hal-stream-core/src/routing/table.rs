use std::collections::BTreeSet;

use crate::models::audio_models::{ChannelInfo, Direction, MediaFormatId};
use crate::models::device::{DeviceDescriptor, DeviceId, LogicalDevice, UsbAddress};
use crate::models::error::StreamError;
use crate::traits::device_resolver::DeviceResolver;

/// Result of a route request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Empty or identical request; nothing was touched.
    Unchanged,
    /// New route stored (and pushed, if a hardware session exists).
    Applied,
}

/// Shared fields stamped on every descriptor of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDefaults {
    pub sample_rate: u32,
    pub bit_width: u32,
    pub usb_address: UsbAddress,
}

/// A session's current route: the requested framework devices and the
/// engine descriptors they resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTable {
    direction: Direction,
    devices: BTreeSet<LogicalDevice>,
    descriptors: Vec<DeviceDescriptor>,
}

impl RoutingTable {
    /// Resolve the initial route. An empty request routes to the direction's default device.
    pub fn new(
        direction: Direction,
        devices: &BTreeSet<LogicalDevice>,
        resolver: &dyn DeviceResolver,
        defaults: RouteDefaults,
    ) -> Result<Self, StreamError> {
        let mut devices = devices.clone();
        if devices.is_empty() {
            devices.insert(match direction {
                Direction::Output => LogicalDevice::DefaultOut,
                Direction::Input => LogicalDevice::DefaultIn,
            });
        }
        let descriptors = build_descriptors(direction, &devices, resolver, defaults)?;
        Ok(Self {
            direction,
            devices,
            descriptors,
        })
    }

    pub fn devices(&self) -> &BTreeSet<LogicalDevice> {
        &self.devices
    }

    pub fn descriptors(&self) -> &[DeviceDescriptor] {
        &self.descriptors
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.descriptors.iter().map(|d| d.id).collect()
    }

    pub fn has_device(&self, id: DeviceId) -> bool {
        self.descriptors.iter().any(|d| d.id == id)
    }

    pub fn has_logical(&self, device: LogicalDevice) -> bool {
        self.devices.contains(&device)
    }

    /// Sample rate carried by the first descriptor; new routes inherit it.
    pub fn sample_rate(&self) -> u32 {
        self.descriptors.first().map_or(0, |d| d.sample_rate)
    }

    /// Move the route to `requested`.
    ///
    /// `push` hands the new descriptors to the hardware session when one
    /// exists. The stored route is replaced only once resolution and the
    /// push have both succeeded; any error leaves the previous route intact.
    pub fn set_route<F>(
        &mut self,
        requested: &BTreeSet<LogicalDevice>,
        resolver: &dyn DeviceResolver,
        defaults: RouteDefaults,
        push: F,
    ) -> Result<RouteOutcome, StreamError>
    where
        F: FnOnce(&[DeviceDescriptor]) -> Result<(), StreamError>,
    {
        if requested.is_empty() || *requested == self.devices {
            return Ok(RouteOutcome::Unchanged);
        }
        if self.direction == Direction::Input && requested.iter().any(|d| !d.is_input()) {
            log::info!("ignoring non-input devices {:?} for capture route", requested);
            return Ok(RouteOutcome::Unchanged);
        }

        let defaults = RouteDefaults {
            sample_rate: self.sample_rate(),
            ..defaults
        };
        let descriptors = build_descriptors(self.direction, requested, resolver, defaults)?;

        push(&descriptors)?;

        log::debug!(
            "route {:?} -> {:?}",
            self.device_ids(),
            descriptors.iter().map(|d| d.id).collect::<Vec<_>>()
        );
        self.devices = requested.clone();
        self.descriptors = descriptors;
        Ok(RouteOutcome::Applied)
    }
}

fn build_descriptors(
    direction: Direction,
    devices: &BTreeSet<LogicalDevice>,
    resolver: &dyn DeviceResolver,
    defaults: RouteDefaults,
) -> Result<Vec<DeviceDescriptor>, StreamError> {
    let ids = resolver.resolve_device_ids(devices);
    if ids.len() != devices.len() {
        log::error!(
            "device count mismatch: requested {:?}, resolved {:?}",
            devices,
            ids
        );
        return Err(StreamError::Routing {
            expected: devices.len(),
            resolved: ids.len(),
        });
    }

    let channel_info = match direction {
        Direction::Output => ChannelInfo::for_count(0),
        Direction::Input => ChannelInfo::stereo(),
    };
    Ok(ids
        .into_iter()
        .map(|id| DeviceDescriptor {
            id,
            sample_rate: defaults.sample_rate,
            bit_width: defaults.bit_width,
            channel_info: channel_info.clone(),
            format_id: MediaFormatId::DefaultPcm,
            usb_address: id.is_usb().then_some(defaults.usb_address),
        })
        .collect())
}
