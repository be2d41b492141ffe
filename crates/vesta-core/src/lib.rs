//! Execution orchestration core for Vesta notebooks.
//!
//! This crate provides:
//! - Notebook and cell identity types
//! - The kernel capability and the registry/trust/command contracts it is resolved through
//! - Per-cell execution records with an atomic admission check
//! - The `ExecutionOrchestrator` that ties trust, kernel resolution, dispatch and
//!   reconciliation together

pub mod command;
pub mod error;
pub mod kernel;
pub mod notebook;
pub mod orchestrator;
pub mod state;
pub mod trust;

pub use command::{CommandService, SELECT_KERNEL_COMMAND};
pub use error::{Error, Result};
pub use kernel::{
    InMemoryKernelRegistry, Kernel, KernelMatch, KernelRef, KernelRegistry, SourceAction,
    SourceActionRef,
};
pub use notebook::{Cell, CellHandle, CellKind, CellUri, Notebook, NotebookUri};
pub use orchestrator::{ExecutionOrchestrator, OrchestratorConfig};
pub use state::{
    CellExecution, CellExecutionResult, ExecutionEvent, ExecutionState, ExecutionStateService,
};
pub use trust::{StaticTrustGate, TrustGate};
