pub mod device_resolver;
pub mod engine;
pub mod offload_hooks;
pub mod perf_boost;
pub mod stream_callback;
pub mod trigger_broker;
