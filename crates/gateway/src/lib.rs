//! swarmgate — a multi-agent orchestration gateway.
//!
//! On receipt of a task the gateway plans a cast of specialist roles,
//! runs one LLM-backed worker per role concurrently, relays their
//! intermediate findings through a per-session coordinator, and streams
//! the whole run (plus the integrated final report) to any number of
//! subscribers. Human operators can inject, adjust, pause, resume, or
//! cancel workers mid-flight.

pub mod api;
pub mod auth;
pub mod config;
pub mod runtime;
pub mod state;
