//! Per-cell execution records.
//!
//! One live record may exist per cell at a time. A record starts out
//! `Unconfirmed`, moves to `Confirmed` once the kernel reports that the cell
//! started, and is removed from the live set when it is completed.
//!
//! ```text
//! Unconfirmed ──confirm──> Confirmed ──complete──> Completed
//!      │                                               ▲
//!      └───────────────────complete────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::broadcast;

use crate::notebook::{CellHandle, CellUri, NotebookUri};

/// Capacity for the execution event channel.
/// Slow subscribers lose the oldest events rather than blocking kernels.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    /// Created by the orchestrator; the kernel has not reported a start yet.
    Unconfirmed,
    /// The kernel reported that the cell started executing.
    Confirmed,
    /// Terminal.
    Completed,
}

/// Result attached to a completed execution.
///
/// The default value is the empty result used when a record is force-completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellExecutionResult {
    /// Whether the cell ran successfully, if the kernel said so.
    pub success: Option<bool>,
    /// Wall-clock run time reported by the kernel.
    pub duration: Option<Duration>,
}

impl CellExecutionResult {
    pub fn success(duration: Duration) -> Self {
        Self {
            success: Some(true),
            duration: Some(duration),
        }
    }

    pub fn failure(duration: Duration) -> Self {
        Self {
            success: Some(false),
            duration: Some(duration),
        }
    }

    /// True for the result carried by a force-completed record.
    pub fn is_empty(&self) -> bool {
        self.success.is_none() && self.duration.is_none()
    }
}

/// Record transition broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Created { cell: CellUri, kernel_id: String },
    Confirmed { cell: CellUri },
    Completed { cell: CellUri, result: CellExecutionResult },
}

impl ExecutionEvent {
    pub fn cell(&self) -> &CellUri {
        match self {
            Self::Created { cell, .. } | Self::Confirmed { cell } | Self::Completed { cell, .. } => {
                cell
            }
        }
    }
}

/// A live record as stored by the service.
#[derive(Debug, Clone)]
struct RecordSlot {
    id: u64,
    kernel_id: String,
    state: ExecutionState,
}

struct Inner {
    records: Mutex<FxHashMap<CellUri, RecordSlot>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<ExecutionEvent>,
}

/// Tracks execution records for every notebook cell.
///
/// Cheap to clone; all clones share the same records. Kernels receive a clone
/// so they can confirm and complete the records the orchestrator created.
#[derive(Clone)]
pub struct ExecutionStateService {
    inner: Arc<Inner>,
}

impl Default for ExecutionStateService {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStateService {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(FxHashMap::default()),
                next_id: AtomicU64::new(1),
                tx,
            }),
        }
    }

    /// Subscribe to record transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.tx.subscribe()
    }

    fn records(&self) -> MutexGuard<'_, FxHashMap<CellUri, RecordSlot>> {
        // Every critical section leaves the map consistent, so a poisoned lock is still usable.
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ExecutionEvent) {
        let _ = self.inner.tx.send(event);
    }

    /// Get the live execution for a cell, if any.
    pub fn get_execution(&self, cell: &CellUri) -> Option<CellExecution> {
        let records = self.records();
        records
            .get(cell)
            .map(|slot| CellExecution::from_slot(self.clone(), cell.clone(), slot))
    }

    /// Create an execution record, replacing any live record for the cell.
    ///
    /// A replaced record is completed with an empty result first.
    pub fn create_execution(
        &self,
        kernel_id: &str,
        notebook: &NotebookUri,
        handle: CellHandle,
    ) -> CellExecution {
        let cell = CellUri::new(notebook.clone(), handle);
        let (execution, replaced) = {
            let mut records = self.records();
            let replaced = records.remove(&cell);
            let execution = self.insert_locked(&mut records, kernel_id, cell.clone());
            (execution, replaced)
        };

        if replaced.is_some() {
            tracing::debug!("Replaced live execution record for {}", cell);
            self.emit(ExecutionEvent::Completed {
                cell: cell.clone(),
                result: CellExecutionResult::default(),
            });
        }
        self.emit(ExecutionEvent::Created {
            cell,
            kernel_id: kernel_id.to_string(),
        });
        execution
    }

    /// Create an execution record only if the cell has no live record.
    ///
    /// The check and the insert happen under one lock, so two concurrent
    /// requests can never both claim the same cell.
    pub fn try_create_execution(
        &self,
        kernel_id: &str,
        notebook: &NotebookUri,
        handle: CellHandle,
    ) -> Option<CellExecution> {
        let cell = CellUri::new(notebook.clone(), handle);
        let execution = {
            let mut records = self.records();
            if records.contains_key(&cell) {
                return None;
            }
            self.insert_locked(&mut records, kernel_id, cell.clone())
        };

        self.emit(ExecutionEvent::Created {
            cell,
            kernel_id: kernel_id.to_string(),
        });
        Some(execution)
    }

    fn insert_locked(
        &self,
        records: &mut FxHashMap<CellUri, RecordSlot>,
        kernel_id: &str,
        cell: CellUri,
    ) -> CellExecution {
        let slot = RecordSlot {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            kernel_id: kernel_id.to_string(),
            state: ExecutionState::Unconfirmed,
        };
        let execution = CellExecution::from_slot(self.clone(), cell.clone(), &slot);
        records.insert(cell, slot);
        execution
    }

    /// All live records of a notebook, ordered by cell handle.
    pub fn live_executions(&self, notebook: &NotebookUri) -> Vec<CellExecution> {
        let records = self.records();
        let mut executions: Vec<_> = records
            .iter()
            .filter(|(cell, _)| &cell.notebook == notebook)
            .map(|(cell, slot)| CellExecution::from_slot(self.clone(), cell.clone(), slot))
            .collect();
        executions.sort_by_key(|e| e.cell.handle);
        executions
    }

    fn state_of(&self, cell: &CellUri, id: u64) -> ExecutionState {
        match self.records().get(cell) {
            Some(slot) if slot.id == id => slot.state,
            _ => ExecutionState::Completed,
        }
    }

    fn confirm(&self, cell: &CellUri, id: u64) -> bool {
        let confirmed = match self.records().get_mut(cell) {
            Some(slot) if slot.id == id && slot.state == ExecutionState::Unconfirmed => {
                slot.state = ExecutionState::Confirmed;
                true
            }
            _ => false,
        };

        if confirmed {
            self.emit(ExecutionEvent::Confirmed { cell: cell.clone() });
        }
        confirmed
    }

    fn complete(
        &self,
        cell: &CellUri,
        id: u64,
        result: CellExecutionResult,
        only_unconfirmed: bool,
    ) -> bool {
        let completed = {
            let mut records = self.records();
            let current = records.get(cell).is_some_and(|slot| {
                slot.id == id && (!only_unconfirmed || slot.state == ExecutionState::Unconfirmed)
            });
            if current {
                records.remove(cell);
            }
            current
        };

        if completed {
            self.emit(ExecutionEvent::Completed {
                cell: cell.clone(),
                result,
            });
        }
        completed
    }
}

/// Handle to one execution record.
///
/// Handles stay valid after the record completes; they then report
/// `ExecutionState::Completed` and further transitions are no-ops.
#[derive(Clone)]
pub struct CellExecution {
    service: ExecutionStateService,
    cell: CellUri,
    id: u64,
    kernel_id: String,
}

impl std::fmt::Debug for CellExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellExecution")
            .field("cell", &self.cell)
            .field("kernel_id", &self.kernel_id)
            .field("state", &self.state())
            .finish()
    }
}

impl CellExecution {
    fn from_slot(service: ExecutionStateService, cell: CellUri, slot: &RecordSlot) -> Self {
        Self {
            service,
            cell,
            id: slot.id,
            kernel_id: slot.kernel_id.clone(),
        }
    }

    pub fn cell(&self) -> &CellUri {
        &self.cell
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    /// Current state of this record.
    pub fn state(&self) -> ExecutionState {
        self.service.state_of(&self.cell, self.id)
    }

    /// Mark the record as started. Returns false unless it was `Unconfirmed`.
    pub fn confirm(&self) -> bool {
        self.service.confirm(&self.cell, self.id)
    }

    /// Complete the record. Returns false if it was already completed.
    pub fn complete(&self, result: CellExecutionResult) -> bool {
        self.service.complete(&self.cell, self.id, result, false)
    }

    /// Complete the record with an empty result if the kernel never confirmed it.
    ///
    /// The state check and the completion are atomic with respect to `confirm`.
    pub fn complete_if_unconfirmed(&self) -> bool {
        self.service
            .complete(&self.cell, self.id, CellExecutionResult::default(), true)
    }
}
