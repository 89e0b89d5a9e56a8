//! Client runtime for driving tool scripts on a script engine.
//!
//! A [`client::Client`] submits tools (or a script file) to an [`engine::Engine`]
//! and hands back a [`run::Run`] that tracks the execution: streamed progress,
//! confirmation and prompt requests, chat continuation and cancellation.

pub mod api;
pub mod chat;
pub mod client;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod events_out;
pub mod frame;
pub mod options;
pub mod run;
pub mod tool;

mod router;
