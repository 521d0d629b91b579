//! # Mudcore - Multi-User World Execution Core
//!
//! The execution substrate of a multi-user persistent virtual-world
//! server:
//! - Cooperative process scheduler with a fixed worker thread pool
//! - Process resources: abstract waitable endpoints with scheduler-driven
//!   lifecycle
//! - Typed, flow-controlled channels between processes and transport
//!   sessions
//! - The user agent state machine, plus puppet agents multiplexed onto a
//!   player's session
//!
//! ## Architecture
//!
//! ```text
//!  transport ──> input channel ──┐
//!                                v
//!   ┌──────────────────────────────────────────┐
//!   │  Scheduler: table · ready queue · timers │<── events, messages
//!   └──────────────┬───────────────────────────┘
//!                  v
//!        worker pool (N threads) ──> process callbacks
//!                  │                      │
//!                  v                      v
//!        output channels ──> session / document sink
//! ```
//!
//! The world model, softcode interpreters, event matching, security
//! policy, and wire transport are external collaborators reached through
//! the traits in [`world`] and [`events`].

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod agent;
pub mod channels;
pub mod events;
pub mod executor;
pub mod types;
pub mod world;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
