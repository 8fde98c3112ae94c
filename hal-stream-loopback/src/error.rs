use thiserror::Error;

use hal_stream_core::traits::engine::EngineError;

/// Errno-style statuses the loopback engine reports.
pub(crate) const EINVAL: i32 = -libc::EINVAL;
pub(crate) const EIO: i32 = -libc::EIO;
pub(crate) const ENODEV: i32 = -libc::ENODEV;
pub(crate) const ENOSYS: i32 = -libc::ENOSYS;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoopbackError {
    #[error("failed to spawn loopback thread: {0}")]
    Spawn(String),

    #[error("no detection session armed on io handle {0}")]
    NotArmed(u32),

    #[error("engine rejected detection session: {0}")]
    Engine(#[from] EngineError),
}
