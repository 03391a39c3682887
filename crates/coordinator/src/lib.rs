//! Routing core for Flowline.
//!
//! The coordinator is the decision center that:
//! 1. Classifies a natural-language question into an intent
//! 2. Scores all healthy backends and picks the best flow
//! 3. Executes it, falling back to the next candidate on failure
//! 4. Records every attempt's latency and outcome
//!
//! # Architecture
//!
//! ```text
//! execute_query(question)
//!        │
//!        ▼
//! ┌──────────────────┐   classify    ┌──────────────────┐
//! │   Coordinator    │──────────────▶│ IntentClassifier │
//! │   (this crate)   │               └──────────────────┘
//! └────────┬─────────┘
//!          │ select_backend
//!          ▼
//! ┌──────────────────┐   health/flows   ┌─────────────────┐
//! │  UniversalRouter │─────────────────▶│ BackendRegistry │
//! └────────┬─────────┘                  └────────┬────────┘
//!          │ ranked candidates                   │ adapter calls
//!          ▼                                     ▼
//!   execute + fallback                  [n8n] [langflow] [flowise]
//! ```
//!
//! One shared registry/tracker instance serves many concurrent requests;
//! pure computation (classification, scoring) never suspends.

pub mod config;
pub mod executor;
pub mod intent;
pub mod registry;
pub mod router;
pub mod tracker;

pub use config::CoordinatorConfig;
pub use executor::{FlowlineCoordinator, QueryMetadata, QueryRequest, QueryResponse};
pub use intent::{IntentClassifier, IntentMatch, DEFAULT_INTENT};
pub use registry::{BackendRegistry, RegisteredBackend};
pub use router::{
    RoutingCandidate, RoutingDecision, RoutingWeights, ScoreBreakdown, SelectionMethod,
    UniversalRouter,
};
pub use tracker::{PerformanceConfig, PerformanceRecord, PerformanceTracker};
