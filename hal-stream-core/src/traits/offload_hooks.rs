/// Effect and visualizer plugins attached to offload playback.
///
/// Invoked at start and standby of compressed and PCM-offload sessions
/// only. Errors are logged by the caller and never fail the stream.
pub trait OffloadEffectHooks: Send + Sync {
    fn start_effects(&self, io_handle: u32) -> Result<(), i32>;

    fn stop_effects(&self, io_handle: u32) -> Result<(), i32>;

    fn start_visualizer(&self, io_handle: u32) -> Result<(), i32>;

    fn stop_visualizer(&self, io_handle: u32) -> Result<(), i32>;
}
