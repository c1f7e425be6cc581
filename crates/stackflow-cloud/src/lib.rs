//! StackFlow Cloud Engine
//!
//! This crate plans and applies declared resources against a cloud
//! provider, keeping a durable record of what has been applied.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  StackFlow CLI                   │
//! │            (stack plan/apply/destroy)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                stackflow-cloud                   │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────────┐   │
//! │  │   Diff   │─▶│ Executor │─▶│  State Store │   │
//! │  └──────────┘  └────┬─────┘  └──────────────┘   │
//! │                     │ retry / timeout            │
//! │  ┌──────────────────▼───────────────────────┐   │
//! │  │  trait CloudProvider { create, ... }     │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────────┬───────────────────────────┘
//!                       │
//!               ┌───────▼───────┐
//!               │ local / vendor│
//!               │   provider    │
//!               └───────────────┘
//! ```

pub mod action;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod provider;
pub mod retry;
pub mod state;

// Re-exports
pub use action::{ActionType, ApplyResult, Plan, PlanStep, PlanSummary, StepResult};
pub use engine::{Engine, EngineConfig};
pub use error::{ApplyError, CloudError, Result, StepFailure};
pub use executor::{DEFAULT_CONCURRENCY, Executor};
pub use provider::{AuthStatus, CloudProvider, Created, Outputs, RetryConfig};
pub use retry::CallPolicy;
pub use state::{GlobalState, MemoryStateStore, StateLock, StateManager, StateRecord, StateStore};
pub use tokio_util::sync::CancellationToken;
