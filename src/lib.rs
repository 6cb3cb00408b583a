// wa-gateway — multi-session WhatsApp gateway.
//
// Layers:
//   atoms/  — constants, shared types, error enum (no I/O)
//   engine/ — session lifecycle, credential store, Evolution client, HTTP API

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{SendOutcome, SessionSnapshot, SessionState};
