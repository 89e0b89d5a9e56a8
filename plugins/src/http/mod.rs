//! Engine session over HTTP with server-sent event streams.

mod engine;
mod sse;
mod wire;

pub use engine::HttpEngine;
