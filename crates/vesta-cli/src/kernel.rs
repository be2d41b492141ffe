//! Process-backed kernels.
//!
//! Each code cell runs in a fresh child process: the kernel's command followed
//! by the cell source. Cancelling a cell kills its process.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use vesta_core::{
    CellExecution, CellExecutionResult, CellHandle, Error, ExecutionStateService, Kernel,
    Notebook, NotebookUri, Result,
};

use crate::document::KernelSpec;

/// Captured output of one cell run.
#[derive(Debug, Clone, Default)]
pub struct CellOutput {
    pub stdout: String,
    pub stderr: String,
    pub result: CellExecutionResult,
}

/// Kernel that runs cells as child processes.
pub struct ProcessKernel {
    spec: KernelSpec,
    languages: FxHashSet<String>,
    notebook: Arc<Notebook>,
    executions: ExecutionStateService,
    /// Cancellation tokens of the current batch, by cell.
    running: Mutex<FxHashMap<CellHandle, CancellationToken>>,
    outputs: Mutex<FxHashMap<CellHandle, CellOutput>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessKernel {
    pub fn new(spec: KernelSpec, notebook: Arc<Notebook>, executions: ExecutionStateService) -> Self {
        let languages = spec.languages.iter().cloned().collect();
        Self {
            spec,
            languages,
            notebook,
            executions,
            running: Mutex::new(FxHashMap::default()),
            outputs: Mutex::new(FxHashMap::default()),
        }
    }

    /// Output of the last run of a cell.
    pub fn output(&self, handle: CellHandle) -> Option<CellOutput> {
        lock(&self.outputs).get(&handle).cloned()
    }

    /// Run one cell to completion (or cancellation) and complete its record.
    async fn run_cell(&self, execution: &CellExecution, source: &str, token: &CancellationToken) {
        let handle = execution.cell().handle;
        if token.is_cancelled() {
            execution.complete(CellExecutionResult::default());
            return;
        }

        let (program, args) = match self.spec.command.split_first() {
            Some(split) => split,
            None => {
                execution.complete(CellExecutionResult::failure(Duration::ZERO));
                return;
            }
        };

        let child = Command::new(program)
            .args(args)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Kernel {} could not start '{}': {}", self.spec.id, program, e);
                let result = CellExecutionResult::failure(Duration::ZERO);
                execution.complete(result.clone());
                lock(&self.outputs).insert(
                    handle,
                    CellOutput {
                        stderr: e.to_string(),
                        result,
                        ..Default::default()
                    },
                );
                return;
            }
        };

        execution.confirm();
        let start = Instant::now();

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => Some(output),
            _ = token.cancelled() => None,
        };

        let elapsed = start.elapsed();
        let cell_output = match output {
            Some(Ok(output)) => CellOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                result: if output.status.success() {
                    CellExecutionResult::success(elapsed)
                } else {
                    CellExecutionResult::failure(elapsed)
                },
            },
            Some(Err(e)) => CellOutput {
                stderr: e.to_string(),
                result: CellExecutionResult::failure(elapsed),
                ..Default::default()
            },
            None => {
                tracing::debug!("Cell {} cancelled after {:?}", handle, elapsed);
                CellOutput {
                    stderr: "cancelled".to_string(),
                    result: CellExecutionResult::failure(elapsed),
                    ..Default::default()
                }
            }
        };

        execution.complete(cell_output.result.clone());
        lock(&self.outputs).insert(handle, cell_output);
    }
}

#[async_trait]
impl Kernel for ProcessKernel {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn label(&self) -> &str {
        self.spec.label.as_deref().unwrap_or(&self.spec.id)
    }

    fn supported_languages(&self) -> &FxHashSet<String> {
        &self.languages
    }

    async fn execute_cells(&self, notebook: &NotebookUri, handles: &[CellHandle]) -> Result<()> {
        if notebook != &self.notebook.uri {
            return Err(Error::kernel(&self.spec.id, format!("unknown notebook {}", notebook)));
        }

        // Register every token up front so cells queued behind a running one can be cancelled.
        let tokens: Vec<(CellHandle, CancellationToken)> = {
            let mut running = lock(&self.running);
            handles
                .iter()
                .map(|&handle| {
                    let token = CancellationToken::new();
                    running.insert(handle, token.clone());
                    (handle, token)
                })
                .collect()
        };

        for (handle, token) in tokens {
            let execution = self
                .executions
                .get_execution(&self.notebook.cell_uri(handle))
                .filter(|e| e.kernel_id() == self.spec.id);
            let cell = self.notebook.cell(handle);

            match (execution, cell) {
                (Some(execution), Some(cell)) => self.run_cell(&execution, &cell.source, &token).await,
                _ => tracing::debug!("Kernel {} has no record or cell for handle {}", self.spec.id, handle),
            }

            lock(&self.running).remove(&handle);
        }

        Ok(())
    }

    async fn cancel_cells(&self, notebook: &NotebookUri, handles: &[CellHandle]) -> Result<()> {
        if notebook != &self.notebook.uri {
            return Ok(());
        }

        let running = lock(&self.running);
        for handle in handles {
            if let Some(token) = running.get(handle) {
                tracing::debug!("Kernel {} cancelling cell {}", self.spec.id, handle);
                token.cancel();
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use vesta_core::{Cell, ExecutionState};

    fn shell_spec() -> KernelSpec {
        KernelSpec {
            id: "sh".to_string(),
            label: Some("POSIX shell".to_string()),
            languages: vec!["shellscript".to_string()],
            command: vec!["sh".to_string(), "-c".to_string()],
        }
    }

    fn setup(cells: Vec<Cell>) -> (Arc<ProcessKernel>, Arc<Notebook>, ExecutionStateService) {
        let notebook = Arc::new(Notebook::new(NotebookUri::new("file:///tmp/shell.json"), cells));
        let executions = ExecutionStateService::new();
        let kernel = Arc::new(ProcessKernel::new(shell_spec(), notebook.clone(), executions.clone()));
        (kernel, notebook, executions)
    }

    #[tokio::test]
    async fn test_runs_cells_and_captures_output() {
        let (kernel, notebook, executions) = setup(vec![
            Cell::code(1, "shellscript", "echo hello"),
            Cell::code(2, "shellscript", "echo oops >&2; exit 3"),
        ]);
        let first = executions.create_execution("sh", &notebook.uri, CellHandle::new(1));
        let second = executions.create_execution("sh", &notebook.uri, CellHandle::new(2));

        kernel
            .execute_cells(&notebook.uri, &[CellHandle::new(1), CellHandle::new(2)])
            .await
            .unwrap();

        assert_eq!(first.state(), ExecutionState::Completed);
        assert_eq!(second.state(), ExecutionState::Completed);

        let out = kernel.output(CellHandle::new(1)).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.result.success, Some(true));

        let err = kernel.output(CellHandle::new(2)).unwrap();
        assert_eq!(err.stderr.trim(), "oops");
        assert_eq!(err.result.success, Some(false));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_cell() {
        let (kernel, notebook, executions) = setup(vec![Cell::code(1, "shellscript", "sleep 30")]);
        let execution = executions.create_execution("sh", &notebook.uri, CellHandle::new(1));

        let task = {
            let kernel = kernel.clone();
            let uri = notebook.uri.clone();
            tokio::spawn(async move { kernel.execute_cells(&uri, &[CellHandle::new(1)]).await })
        };

        while execution.state() == ExecutionState::Unconfirmed {
            tokio::task::yield_now().await;
        }

        let start = Instant::now();
        kernel
            .cancel_cells(&notebook.uri, &[CellHandle::new(1)])
            .await
            .unwrap();
        task.await.unwrap().unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(execution.state(), ExecutionState::Completed);
        assert_eq!(kernel.output(CellHandle::new(1)).unwrap().stderr, "cancelled");
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_the_cell() {
        let notebook = Arc::new(Notebook::new(
            NotebookUri::new("file:///tmp/missing.json"),
            vec![Cell::code(1, "python", "print(1)")],
        ));
        let executions = ExecutionStateService::new();
        let spec = KernelSpec {
            id: "ghost".to_string(),
            label: None,
            languages: vec!["python".to_string()],
            command: vec!["/nonexistent/interpreter".to_string()],
        };
        let kernel = ProcessKernel::new(spec, notebook.clone(), executions.clone());
        let execution = executions.create_execution("ghost", &notebook.uri, CellHandle::new(1));

        kernel
            .execute_cells(&notebook.uri, &[CellHandle::new(1)])
            .await
            .unwrap();

        assert_eq!(execution.state(), ExecutionState::Completed);
        assert_eq!(kernel.label(), "ghost");
        assert_eq!(
            kernel.output(CellHandle::new(1)).unwrap().result.success,
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_rejects_foreign_notebook() {
        let (kernel, _notebook, _executions) = setup(vec![]);
        let result = kernel
            .execute_cells(&NotebookUri::new("file:///other.json"), &[CellHandle::new(1)])
            .await;
        assert!(result.is_err());
    }
}
