//! Signal engine: turns the active expression into a stream of samples.
//!
//! The same generator runs inside the browser worklet (through the WASM
//! bindings), behind the lock-free session queues on native audio threads,
//! and in the offline WAV renderer.

pub mod generator;
pub mod message;
pub mod renderer;
pub mod session;

pub use generator::{Encoding, Generator, GeneratorConfig, Mode, TimeMode};
pub use message::{Command, ErrorReport, ErrorSink};
