/// Normalized event codes delivered to the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    WriteReady,
    DrainReady,
    Error,
}

/// Client callback for asynchronous stream events.
///
/// Called on the engine's event thread; the implementor carries whatever
/// context (cookie) it needs.
pub trait StreamCallback: Send + Sync {
    fn on_stream_event(&self, event: StreamEvent);
}
