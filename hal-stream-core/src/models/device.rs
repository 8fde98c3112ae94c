use serde::{Deserialize, Serialize};

use super::audio_models::{ChannelInfo, MediaFormatId};

/// Framework-level device a stream may be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalDevice {
    Earpiece,
    Speaker,
    WiredHeadset,
    WiredHeadphone,
    BluetoothSco,
    BluetoothA2dp,
    AuxDigital,
    UsbAccessory,
    UsbDevice,
    UsbHeadset,
    Proxy,
    DefaultOut,
    BuiltinMic,
    BackMic,
    WiredHeadsetMic,
    BluetoothScoHeadsetMic,
    UsbDeviceIn,
    UsbHeadsetIn,
    ProxyIn,
    RemoteSubmixIn,
    DefaultIn,
}

impl LogicalDevice {
    pub fn is_input(self) -> bool {
        matches!(
            self,
            Self::BuiltinMic
                | Self::BackMic
                | Self::WiredHeadsetMic
                | Self::BluetoothScoHeadsetMic
                | Self::UsbDeviceIn
                | Self::UsbHeadsetIn
                | Self::ProxyIn
                | Self::RemoteSubmixIn
                | Self::DefaultIn
        )
    }

    pub fn is_usb(self) -> bool {
        matches!(
            self,
            Self::UsbAccessory | Self::UsbDevice | Self::UsbHeadset | Self::UsbDeviceIn | Self::UsbHeadsetIn
        )
    }

    pub fn is_proxy(self) -> bool {
        matches!(self, Self::Proxy | Self::ProxyIn)
    }
}

/// Physical device identifier understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceId {
    OutHandset,
    OutSpeaker,
    OutWiredHeadset,
    OutWiredHeadphone,
    OutBluetoothSco,
    OutBluetoothA2dp,
    OutAuxDigital,
    OutUsbDevice,
    OutUsbHeadset,
    OutProxy,
    InHandsetMic,
    InSpeakerMic,
    InWiredHeadset,
    InBluetoothScoHeadset,
    InUsbDevice,
    InUsbHeadset,
    InProxy,
}

impl DeviceId {
    pub fn is_usb(self) -> bool {
        matches!(
            self,
            Self::OutUsbDevice | Self::OutUsbHeadset | Self::InUsbDevice | Self::InUsbHeadset
        )
    }
}

/// ALSA card/device pair of an attached USB audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UsbAddress {
    pub card: i32,
    pub device: i32,
}

impl UsbAddress {
    pub const UNSET: Self = Self { card: -1, device: -1 };

    pub fn is_set(&self) -> bool {
        self.card >= 0 && self.device >= 0
    }
}

/// One entry of a session's route, as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub sample_rate: u32,
    pub bit_width: u32,
    pub channel_info: ChannelInfo,
    pub format_id: MediaFormatId,
    pub usb_address: Option<UsbAddress>,
}

impl DeviceDescriptor {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            sample_rate: 0,
            bit_width: 0,
            channel_info: ChannelInfo::for_count(0),
            format_id: MediaFormatId::DefaultPcm,
            usb_address: None,
        }
    }
}
