pub mod audio_models;
pub mod config;
pub mod device;
pub mod error;
pub mod snapshot;
pub mod state;
pub mod stream_types;
