//! Common types and trait seams shared across Flowline crates.
//!
//! This crate provides the foundational abstractions the router core and
//! concrete backend adapters use to communicate: the data model (flows,
//! sessions, execution outcomes), the error taxonomy, and the
//! [`WorkflowBackend`] contract every adapter implements.

pub mod backend;
pub mod error;
pub mod flow;
pub mod outcome;
pub mod session;
pub mod traits;

pub use backend::{BackendConfig, BackendKind, HealthStatus};
pub use error::{FlowlineError, Result};
pub use flow::{Flow, FlowCapability, FlowPerformance};
pub use outcome::ExecutionOutput;
pub use session::{Session, SessionTurn};
pub use traits::{BackendFactory, SessionStore, TraceSink, WorkflowBackend};
