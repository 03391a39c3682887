//! Session persistence and trace sinks for Flowline.
//!
//! The coordinator consumes both interfaces fail-soft: a lost session
//! affects only that conversation's continuity, and a broken sink never
//! affects a request. These in-memory implementations are the defaults
//! for single-process deployments and tests; a Redis-backed store or a
//! hosted trace sink plugs in behind the same traits.

pub mod store;
pub mod trace;

pub use store::InMemorySessionStore;
pub use trace::{LogTraceSink, NoopTraceSink, TraceEvent};
