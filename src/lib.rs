//! deepchat is a single-user terminal client for chat-completions APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`api`] defines the request and streaming-response payloads.
//! - [`core`] owns the runtime pieces: profile loading, token estimation,
//!   window trimming, the streaming client, persistence, and the per-turn
//!   [`core::session::ChatSession`] orchestrator.
//! - [`cli`] parses arguments, sets up logging, and drives the session from a
//!   line-oriented terminal loop.
//!
//! The binary (`src/main.rs`) only calls [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
