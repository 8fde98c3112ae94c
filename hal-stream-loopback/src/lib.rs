//! # hal-stream-loopback
//!
//! In-memory audio engine backend for hal-stream-core.
//!
//! Provides:
//! - `LoopbackEngine` — `HardwareEngine` whose output sessions render into a
//!   host-readable tap and whose capture sessions read host-fed bytes
//! - `LoopbackTriggerBroker` — detection sessions lent to capture streams
//! - `StaticDeviceResolver` — fixed logical → engine device table
//! - `RefCountedBoost` — reference-counted performance boost
//!
//! Write-ready and drain-ready events are raised on a dedicated event
//! thread, as a hardware engine would.
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use hal_stream_core::{PlatformContext, Session, StreamConfig};
//! use hal_stream_loopback::{LoopbackConfig, LoopbackEngine, StaticDeviceResolver};
//!
//! let engine = Arc::new(LoopbackEngine::new(LoopbackConfig::default())?);
//! let ctx = Arc::new(PlatformContext::new(engine.clone(), Arc::new(StaticDeviceResolver::default())));
//! let session = Session::new_output(ctx, 1, &devices, config, None)?;
//! session.write(&pcm)?;
//! let rendered = engine.take_rendered();
//! ```

pub mod boost;
pub mod engine;
pub mod error;
pub mod events;
pub mod resolver;
pub mod ring_buffer;
pub mod trigger;


pub use boost::RefCountedBoost;
pub use engine::{Detail, EngineOp, JournalEntry, LoopbackConfig, LoopbackEngine, LoopbackSession};
pub use error::LoopbackError;
pub use resolver::StaticDeviceResolver;
pub use ring_buffer::ByteRing;
pub use trigger::LoopbackTriggerBroker;
