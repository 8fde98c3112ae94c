use std::collections::{BTreeMap, BTreeSet};

use hal_stream_core::models::device::{DeviceId, LogicalDevice};
use hal_stream_core::traits::device_resolver::DeviceResolver;

/// Fixed logical → engine device table.
///
/// Devices missing from the table are left out of the answer, which the
/// core reports as a routing error.
#[derive(Debug, Clone)]
pub struct StaticDeviceResolver {
    table: BTreeMap<LogicalDevice, DeviceId>,
}

impl StaticDeviceResolver {
    pub fn empty() -> Self {
        Self { table: BTreeMap::new() }
    }

    pub fn with_mapping(mut self, device: LogicalDevice, id: DeviceId) -> Self {
        self.table.insert(device, id);
        self
    }

    pub fn without(mut self, device: LogicalDevice) -> Self {
        self.table.remove(&device);
        self
    }

    pub fn lookup(&self, device: LogicalDevice) -> Option<DeviceId> {
        self.table.get(&device).copied()
    }
}

impl Default for StaticDeviceResolver {
    fn default() -> Self {
        use LogicalDevice as L;
        [
            (L::Earpiece, DeviceId::OutHandset),
            (L::Speaker, DeviceId::OutSpeaker),
            (L::WiredHeadset, DeviceId::OutWiredHeadset),
            (L::WiredHeadphone, DeviceId::OutWiredHeadphone),
            (L::BluetoothSco, DeviceId::OutBluetoothSco),
            (L::BluetoothA2dp, DeviceId::OutBluetoothA2dp),
            (L::AuxDigital, DeviceId::OutAuxDigital),
            (L::UsbAccessory, DeviceId::OutUsbDevice),
            (L::UsbDevice, DeviceId::OutUsbDevice),
            (L::UsbHeadset, DeviceId::OutUsbHeadset),
            (L::Proxy, DeviceId::OutProxy),
            (L::DefaultOut, DeviceId::OutSpeaker),
            (L::BuiltinMic, DeviceId::InHandsetMic),
            (L::BackMic, DeviceId::InSpeakerMic),
            (L::WiredHeadsetMic, DeviceId::InWiredHeadset),
            (L::BluetoothScoHeadsetMic, DeviceId::InBluetoothScoHeadset),
            (L::UsbDeviceIn, DeviceId::InUsbDevice),
            (L::UsbHeadsetIn, DeviceId::InUsbHeadset),
            (L::ProxyIn, DeviceId::InProxy),
            (L::RemoteSubmixIn, DeviceId::InProxy),
            (L::DefaultIn, DeviceId::InHandsetMic),
        ]
        .into_iter()
        .fold(Self::empty(), |resolver, (device, id)| resolver.with_mapping(device, id))
    }
}

impl DeviceResolver for StaticDeviceResolver {
    fn resolve_device_ids(&self, devices: &BTreeSet<LogicalDevice>) -> Vec<DeviceId> {
        devices
            .iter()
            .filter_map(|d| {
                let id = self.lookup(*d);
                if id.is_none() {
                    log::warn!("no engine device for {:?}", d);
                }
                id
            })
            .collect()
    }
}
