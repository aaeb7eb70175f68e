//! Shared domain types for the swarmgate workspace.
//!
//! Everything that crosses a crate boundary lives here: the error enum,
//! provider-agnostic chat messages and tool types, the provider stream
//! events, the wire event model consumed by SSE subscribers, and the core
//! swarm data model (roles, plans, relay messages, stations, interventions,
//! worker state).

pub mod error;
pub mod event;
pub mod model;
pub mod stream;
pub mod tool;
