//! Gated audio buffering and streaming to a speech recognition server
//!
//! Fixed-size PCM blocks from an external audio graph are routed by a gate:
//! while closed they fill a lookback ring buffer, while open they are encoded
//! into WAVE chunks and streamed over a WebSocket session. Recognition results
//! come back as `WorkerEvent`s in the configured vocabulary.

pub mod audio;
pub mod cli;
pub mod events;
pub mod settings;
pub mod state_machine;
pub mod streaming;
pub mod worker;

pub use audio::{AudioBlock, SampleKind, Samples};
pub use events::{MessageFormat, RecognitionEvent, WorkerEvent};
pub use settings::WorkerSettings;
pub use worker::{spawn_worker, GateController, WorkerHandle, WorkerInput};
