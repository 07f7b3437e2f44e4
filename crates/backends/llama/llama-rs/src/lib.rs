//! Safe wrappers over llama.cpp plus the [`nox_abi::ModelBackend`]
//! implementation the runner binary links against. All `unsafe` stays in
//! this crate; upstream crates only see the capability trait.

pub mod backend;
pub mod batch;
pub mod context;
pub mod model;
pub mod sampler;

pub use backend::LlamaBackend;
pub use model::supports_mlock;
