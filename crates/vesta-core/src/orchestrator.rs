//! Cell execution orchestration.
//!
//! The orchestrator turns a "run these cells" request into a kernel dispatch:
//!
//! ```text
//! execute_cells
//!     │
//!     ├── TrustGate::request_trust        (declined → stop)
//!     ├── resolve_kernel                  (none → stop)
//!     │       ├── selected or suggested kernel
//!     │       ├── single source action, when no kernel matches at all
//!     │       └── kernel picker command
//!     ├── filter: code cells, supported language, no live record
//!     ├── KernelRegistry::select_kernel_for_notebook
//!     ├── claim one execution record per cell
//!     ├── Kernel::execute_cells
//!     └── complete records the kernel never confirmed
//! ```
//!
//! Cancellation only forwards to the already selected kernel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::command::{CommandService, SELECT_KERNEL_COMMAND};
use crate::error::{Error, Result};
use crate::kernel::{KernelRef, KernelRegistry, SourceActionRef};
use crate::notebook::{Cell, CellHandle, Notebook, NotebookUri};
use crate::state::{CellExecution, ExecutionStateService};
use crate::trust::TrustGate;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Message shown by the trust gate before code runs.
    pub trust_message: String,
    /// Command invoked to let the user pick a kernel.
    pub picker_command: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            trust_message: "Running notebook cells requires a trusted workspace.".to_string(),
            picker_command: SELECT_KERNEL_COMMAND.to_string(),
        }
    }
}

/// Cancellation scope for discovery work started by the orchestrator.
///
/// Tagged with a generation so a finished run only clears its own token.
type DiscoveryScope = Option<(u64, CancellationToken)>;

/// Coordinates trust, kernel resolution, dispatch and reconciliation.
pub struct ExecutionOrchestrator {
    kernels: Arc<dyn KernelRegistry>,
    trust: Arc<dyn TrustGate>,
    commands: Arc<dyn CommandService>,
    executions: ExecutionStateService,
    config: OrchestratorConfig,
    /// At most one in-flight source action run.
    discovery: Mutex<DiscoveryScope>,
    discovery_generation: AtomicU64,
    disposed: AtomicBool,
}

impl ExecutionOrchestrator {
    /// Create an orchestrator with the default configuration.
    pub fn new(
        kernels: Arc<dyn KernelRegistry>,
        trust: Arc<dyn TrustGate>,
        commands: Arc<dyn CommandService>,
        executions: ExecutionStateService,
    ) -> Self {
        Self::with_config(kernels, trust, commands, executions, OrchestratorConfig::default())
    }

    pub fn with_config(
        kernels: Arc<dyn KernelRegistry>,
        trust: Arc<dyn TrustGate>,
        commands: Arc<dyn CommandService>,
        executions: ExecutionStateService,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            kernels,
            trust,
            commands,
            executions,
            config,
            discovery: Mutex::new(None),
            discovery_generation: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// The execution records this orchestrator writes to.
    pub fn executions(&self) -> &ExecutionStateService {
        &self.executions
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn discovery_slot(&self) -> MutexGuard<'_, DiscoveryScope> {
        self.discovery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the kernel that should run cells of `notebook`.
    ///
    /// Returns `None` when the user declined to pick one; that is not an error.
    pub async fn resolve_kernel(&self, notebook: &Notebook) -> Option<KernelRef> {
        if let Some(kernel) = self.kernels.selected_or_suggested(notebook) {
            return Some(kernel);
        }

        let matches = self.kernels.matching_kernels(notebook);
        if matches.all.is_empty() {
            let actions = self.kernels.source_actions(notebook);
            if let [action] = actions.as_slice() {
                tracing::debug!(
                    "No kernel matches {}, running source action '{}'",
                    notebook.uri,
                    action.label()
                );
                self.run_source_action(action).await;

                if let Some(kernel) = self.kernels.selected_or_suggested(notebook) {
                    return Some(kernel);
                }
            } else {
                tracing::debug!(
                    "No kernel matches {} and {} source actions are available",
                    notebook.uri,
                    actions.len()
                );
            }
        }

        if self.is_disposed() {
            return None;
        }

        tracing::debug!("Asking user to pick a kernel for {}", notebook.uri);
        if let Err(e) = self
            .commands
            .execute_command(&self.config.picker_command, notebook)
            .await
        {
            tracing::warn!("Kernel picker failed for {}: {}", notebook.uri, e);
        }

        self.kernels.selected_or_suggested(notebook)
    }

    /// Run a source action inside the orchestrator's discovery scope.
    ///
    /// Failures are logged; the caller re-checks the registry either way.
    async fn run_source_action(&self, action: &SourceActionRef) {
        if self.is_disposed() {
            return;
        }

        let token = CancellationToken::new();
        let generation = self.discovery_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((_, previous)) = self.discovery_slot().replace((generation, token.clone())) {
            previous.cancel();
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => Err(Error::SourceAction(format!("'{}' cancelled", action.label()))),
            result = action.run(token.clone()) => result,
        };

        {
            let mut slot = self.discovery_slot();
            if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
                *slot = None;
            }
        }

        if let Err(e) = outcome {
            tracing::warn!("Source action '{}' did not complete: {}", action.label(), e);
        }
    }

    /// Execute `cells` of `notebook`.
    ///
    /// Declined trust, an unresolvable kernel and an empty eligible batch all
    /// return `Ok(())` without dispatching anything. A kernel failure is
    /// returned to the caller after unconfirmed records have been completed.
    pub async fn execute_cells<'a>(
        &self,
        notebook: &Notebook,
        cells: impl IntoIterator<Item = &'a Cell>,
    ) -> Result<()> {
        let code_cells: Vec<&Cell> = cells.into_iter().filter(|c| c.is_code()).collect();

        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if code_cells.is_empty() {
            tracing::debug!("No code cells requested for {}", notebook.uri);
            return Ok(());
        }

        if !self.trust.request_trust(&self.config.trust_message).await {
            tracing::debug!("Workspace trust declined, not executing {}", notebook.uri);
            return Ok(());
        }

        let Some(kernel) = self.resolve_kernel(notebook).await else {
            tracing::debug!("No kernel resolved for {}", notebook.uri);
            return Ok(());
        };

        let eligible: Vec<CellHandle> = code_cells
            .iter()
            .filter(|cell| kernel.supports_language(&cell.language))
            .filter(|cell| {
                self.executions
                    .get_execution(&notebook.cell_uri(cell.handle))
                    .is_none()
            })
            .map(|cell| cell.handle)
            .collect();

        if eligible.is_empty() {
            tracing::debug!(
                "No eligible cells for kernel {} in {}",
                kernel.id(),
                notebook.uri
            );
            return Ok(());
        }

        self.kernels.select_kernel_for_notebook(&kernel, notebook);

        let mut pending =
            PendingExecutions::claim(&self.executions, kernel.id(), &notebook.uri, &eligible);
        if pending.is_empty() {
            tracing::debug!("Every eligible cell of {} is already executing", notebook.uri);
            return Ok(());
        }

        let handles = pending.handles();
        tracing::info!(
            "Executing {} cell(s) of {} on kernel {}",
            handles.len(),
            notebook.uri,
            kernel.id()
        );

        let result = kernel.execute_cells(&notebook.uri, &handles).await;
        if let Err(ref e) = result {
            tracing::warn!("Kernel {} failed to execute cells: {}", kernel.id(), e);
        }

        pending.reconcile();
        result
    }

    /// Cancel execution of `cells`.
    pub async fn cancel_cells<'a>(
        &self,
        notebook: &Notebook,
        cells: impl IntoIterator<Item = &'a Cell>,
    ) -> Result<()> {
        let handles: Vec<CellHandle> = cells.into_iter().map(|c| c.handle).collect();
        self.cancel_cell_handles(notebook, handles).await
    }

    /// Cancel execution of the cells with the given handles.
    ///
    /// Forwards to the selected kernel only: no discovery, no trust prompt.
    /// Without a selected kernel this is a no-op.
    pub async fn cancel_cell_handles(
        &self,
        notebook: &Notebook,
        handles: impl IntoIterator<Item = CellHandle>,
    ) -> Result<()> {
        let handles: Vec<CellHandle> = handles.into_iter().collect();
        if handles.is_empty() {
            return Ok(());
        }

        let Some(kernel) = self.kernels.selected_or_suggested(notebook) else {
            tracing::debug!("No kernel selected for {}, nothing to cancel", notebook.uri);
            return Ok(());
        };

        tracing::debug!(
            "Cancelling {} cell(s) of {} on kernel {}",
            handles.len(),
            notebook.uri,
            kernel.id()
        );
        kernel.cancel_cells(&notebook.uri, &handles).await
    }

    /// Release the discovery scope, cancelling any in-flight source action.
    ///
    /// Further `execute_cells` calls fail with [`Error::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some((_, token)) = self.discovery_slot().take() {
            tracing::debug!("Cancelling in-flight kernel discovery");
            token.cancel();
        }
    }
}

impl Drop for ExecutionOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Execution records claimed for one dispatch.
///
/// Records the kernel never confirmed are completed with an empty result by
/// [`PendingExecutions::reconcile`], or on drop if the request future is
/// abandoned before the kernel call settles.
struct PendingExecutions {
    records: Vec<CellExecution>,
    reconciled: bool,
}

impl PendingExecutions {
    /// Claim a record for each handle that has no live record.
    fn claim(
        executions: &ExecutionStateService,
        kernel_id: &str,
        notebook: &NotebookUri,
        handles: &[CellHandle],
    ) -> Self {
        let records = handles
            .iter()
            .filter_map(|&handle| executions.try_create_execution(kernel_id, notebook, handle))
            .collect();

        Self {
            records,
            reconciled: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn handles(&self) -> Vec<CellHandle> {
        self.records.iter().map(|r| r.cell().handle).collect()
    }

    /// Complete every record still unconfirmed. Returns how many were completed.
    fn reconcile(&mut self) -> usize {
        self.reconciled = true;

        let mut completed = 0;
        for record in &self.records {
            if record.complete_if_unconfirmed() {
                tracing::warn!(
                    "Kernel {} never confirmed {}, completing it",
                    record.kernel_id(),
                    record.cell()
                );
                completed += 1;
            }
        }
        completed
    }
}

impl Drop for PendingExecutions {
    fn drop(&mut self) {
        if !self.reconciled {
            self.reconcile();
        }
    }
}
