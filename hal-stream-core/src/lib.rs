//! # hal-stream-core
//!
//! Platform-agnostic stream layer of an audio hardware abstraction.
//!
//! Maps framework stream requests onto audio-engine sessions: classifies
//! each stream into a use-case and engine stream type, sizes its buffers,
//! keeps its device route, and drives the session lifecycle (lazy open,
//! implicit start, standby, drain, pause/resume, mmap). Engine backends
//! implement the `HardwareEngine` trait and plug into `Session`.
//!
//! ## Architecture
//!
//! ```text
//! hal-stream-core (this crate)
//! ├── traits/       ← HardwareEngine, HardwareSession, EventSink, DeviceResolver, hooks
//! ├── models/       ← StreamError, LifecycleState, StreamConfig, flags, devices, snapshots
//! ├── policy/       ← classifier, buffer sizing, platform constants
//! ├── processing/   ← PCM format conversion, position and latency estimation
//! ├── routing/      ← RoutingTable (requested devices → engine descriptors)
//! └── session/      ← Session (lifecycle), EventBridge, PlatformContext, capture effects
//! ```

pub mod models;
pub mod policy;
pub mod processing;
pub mod routing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioFormat, AudioSource, ChannelMask, Direction, InputFlags, OutputFlags, VolumeData};
pub use models::config::{PlatformConfig, StreamConfig, StreamParameters};
pub use models::device::{DeviceDescriptor, DeviceId, LogicalDevice, UsbAddress};
pub use models::error::StreamError;
pub use models::snapshot::SessionSnapshot;
pub use models::state::LifecycleState;
pub use models::stream_types::{Classification, HardwareStreamType, UseCase};
pub use policy::sizing::FragmentGeometry;
pub use routing::table::{RouteOutcome, RoutingTable};
pub use session::context::PlatformContext;
pub use session::effects::EffectKind;
pub use session::event_bridge::{EventBridge, ReadyTicket};
pub use session::stream::{DrainType, IoHandle, Session};
pub use traits::device_resolver::DeviceResolver;
pub use traits::engine::{EngineError, EventSink, HardwareEngine, HardwareEvent, HardwareSession};
pub use traits::stream_callback::{StreamCallback, StreamEvent};
