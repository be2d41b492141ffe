//! Run command implementation for Vesta CLI.
//!
//! Loads a notebook document, registers its kernels and executes the
//! requested cells through the orchestrator. Ctrl+C cancels running cells.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use vesta_core::{
    Cell, CellExecutionResult, CellHandle, CellKind, ExecutionEvent, ExecutionOrchestrator,
    ExecutionStateService, InMemoryKernelRegistry, StaticTrustGate, TrustGate,
};

use crate::colors;
use crate::document::NotebookDocument;
use crate::kernel::ProcessKernel;
use crate::prompt::{Prompter, TerminalCommands, TerminalTrustGate};

/// Options for `vesta run`.
#[derive(Debug, Default)]
pub struct RunOptions {
    /// Skip the trust prompt.
    pub trust: bool,
    /// Kernel to bind before running.
    pub kernel: Option<String>,
    /// Handles to run; empty runs every cell.
    pub cells: Vec<u32>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Stopped by Ctrl+C.
    Interrupted,
}

/// Execute a notebook document.
pub async fn execute(path: &Path, options: RunOptions) -> anyhow::Result<RunStatus> {
    let start = Instant::now();
    let document = NotebookDocument::load(path)?;
    let notebook = Arc::new(document.notebook);

    let executions = ExecutionStateService::new();
    let registry = Arc::new(InMemoryKernelRegistry::new());
    let kernels: Vec<Arc<ProcessKernel>> = document
        .kernels
        .into_iter()
        .map(|spec| Arc::new(ProcessKernel::new(spec, notebook.clone(), executions.clone())))
        .collect();
    for kernel in &kernels {
        registry.register_kernel(kernel.clone());
    }

    if let Some(ref kernel_id) = options.kernel {
        if !registry.select_by_id(kernel_id, &notebook.uri) {
            anyhow::bail!("Unknown kernel: {}", kernel_id);
        }
    }

    let selected = select_cells(&notebook.cells, &options.cells)?;

    let prompter = Arc::new(Prompter::stdin());
    let trust: Arc<dyn TrustGate> = if options.trust {
        Arc::new(StaticTrustGate::trusted())
    } else {
        Arc::new(TerminalTrustGate::new(prompter.clone()))
    };
    let orchestrator = ExecutionOrchestrator::new(
        registry.clone(),
        trust,
        Arc::new(TerminalCommands::new(registry.clone(), prompter)),
        executions.clone(),
    );

    println!(
        "\n{}Vesta{} - {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        path.display(),
        colors::RESET
    );
    println!("{}", "─".repeat(50));

    let mut events = executions.subscribe();

    let mut run = Box::pin(orchestrator.execute_cells(&notebook, selected.iter().copied()));

    // The interrupt handler is installed before the run can reach a prompt.
    let finished = tokio::select! {
        biased;
        Ok(()) = tokio::signal::ctrl_c() => None,
        result = &mut run => Some(result),
    };
    let interrupted = finished.is_none();
    let result = match finished {
        Some(result) => result,
        None => {
            let handles: Vec<CellHandle> = executions
                .live_executions(&notebook.uri)
                .iter()
                .map(|e| e.cell().handle)
                .collect();

            if handles.is_empty() {
                // Still prompting or resolving a kernel: nothing to wait for.
                println!("{}Interrupted{}", colors::YELLOW, colors::RESET);
                Ok(())
            } else {
                println!(
                    "{}Interrupted, cancelling running cells...{}",
                    colors::YELLOW,
                    colors::RESET
                );
                orchestrator.cancel_cell_handles(&notebook, handles).await?;
                tokio::select! {
                    result = &mut run => result,
                    Ok(()) = tokio::signal::ctrl_c() => {
                        println!(
                            "{}Interrupted again, abandoning the run{}",
                            colors::YELLOW,
                            colors::RESET
                        );
                        Ok(())
                    }
                }
            }
        }
    };
    // Dropping an unfinished run kills its child processes.
    drop(run);

    let results = completed_results(&mut events);
    print_summary(&selected, &results, &kernels);

    println!("\n{}", "─".repeat(50));
    println!(
        "{}Finished{} {} of {} cell(s) in {:.2}s",
        colors::GREEN,
        colors::RESET,
        results.values().filter(|r| !r.is_empty()).count(),
        selected.iter().filter(|c| c.is_code()).count(),
        start.elapsed().as_secs_f64()
    );

    orchestrator.dispose();
    result?;

    Ok(if interrupted {
        RunStatus::Interrupted
    } else {
        RunStatus::Completed
    })
}

/// Resolve `--cell` handles against the notebook, keeping notebook order.
fn select_cells<'a>(cells: &'a [Cell], handles: &[u32]) -> anyhow::Result<Vec<&'a Cell>> {
    if handles.is_empty() {
        return Ok(cells.iter().collect());
    }

    for &handle in handles {
        if !cells.iter().any(|c| c.handle.as_u32() == handle) {
            anyhow::bail!("Cell not found: {}", handle);
        }
    }

    Ok(cells
        .iter()
        .filter(|c| handles.contains(&c.handle.as_u32()))
        .collect())
}

/// Final result of every cell completed during the run.
fn completed_results(
    events: &mut broadcast::Receiver<ExecutionEvent>,
) -> FxHashMap<CellHandle, CellExecutionResult> {
    let mut results = FxHashMap::default();
    loop {
        match events.try_recv() {
            Ok(ExecutionEvent::Completed { cell, result }) => {
                results.insert(cell.handle, result);
            }
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {} execution events", skipped);
            }
            Err(_) => break,
        }
    }
    results
}

fn print_summary(
    cells: &[&Cell],
    results: &FxHashMap<CellHandle, CellExecutionResult>,
    kernels: &[Arc<ProcessKernel>],
) {
    for cell in cells {
        if cell.kind == CellKind::Markup {
            println!("{}[{}] markup, skipped{}", colors::DIM, cell.handle, colors::RESET);
            continue;
        }

        let Some(result) = results.get(&cell.handle) else {
            println!(
                "[{}] {} {}not executed{}",
                cell.handle,
                cell.language,
                colors::YELLOW,
                colors::RESET
            );
            continue;
        };

        println!("[{}] {} {}", cell.handle, cell.language, colors::result_label(result));

        if let Some(output) = kernels.iter().find_map(|k| k.output(cell.handle)) {
            for line in output.stdout.lines() {
                println!("    {}", line);
            }
            for line in output.stderr.lines() {
                println!("    {}{}{}", colors::RED, line, colors::RESET);
            }
        }
    }
}

/// Print the kernels a notebook document declares.
pub fn list_kernels(path: &Path) -> anyhow::Result<()> {
    let document = NotebookDocument::load(path)?;

    if document.kernels.is_empty() {
        println!("{}No kernels declared.{}", colors::YELLOW, colors::RESET);
        return Ok(());
    }

    for spec in &document.kernels {
        println!(
            "{}{}{} {} {}[{}]{}",
            colors::BOLD,
            spec.id,
            colors::RESET,
            spec.label.as_deref().unwrap_or(""),
            colors::DIM,
            spec.languages.join(", "),
            colors::RESET
        );
    }
    Ok(())
}
