use super::engine::HardwareSession;

/// Hands capture streams the engine session of a voice-activation detection.
///
/// Capture opened on an io handle with a pending detection reuses that
/// session to read the buffered look-back audio instead of opening a new one.
pub trait TriggerSessionBroker: Send + Sync {
    fn take_capture_session(&self, io_handle: u32) -> Option<Box<dyn HardwareSession>>;
}
