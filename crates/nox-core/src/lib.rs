//! nox-core: policy layers of the local inference runner.
//!
//! Everything here is written against the [`nox_abi::ModelBackend`] seam and
//! carries no native code: the generation loop, the KV window policy, the
//! coalescing stream writer, chat wrapping, configuration resolution, and
//! the serve session loop.

pub mod chat;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod serve;
pub mod stats;
pub mod stream;
pub mod window;

pub use engine::{Engine, EngineError, EngineOptions, StateSave};
pub use serve::{serve_loop, ServeOptions};
pub use stream::StreamWriter;
