//! Kernel capability and kernel discovery contracts.
//!
//! A kernel is anything that can run cells of one or more languages: an
//! in-process interpreter, a child process, a remote proxy. The orchestrator
//! only sees the [`Kernel`] trait. Which kernel serves a notebook is owned by a
//! [`KernelRegistry`].

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::notebook::{CellHandle, Notebook, NotebookUri};

/// Shared reference to a kernel.
pub type KernelRef = Arc<dyn Kernel>;

/// Shared reference to a source action.
pub type SourceActionRef = Arc<dyn SourceAction>;

/// A compute capability that executes notebook cells.
///
/// Implementations report progress through the `ExecutionStateService`
/// records created for the handles they are given: `confirm` when a cell
/// starts and `complete` when it finishes.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Stable kernel identifier.
    fn id(&self) -> &str;

    /// Human-readable name shown in pickers.
    fn label(&self) -> &str {
        self.id()
    }

    /// Language ids this kernel can execute.
    fn supported_languages(&self) -> &FxHashSet<String>;

    fn supports_language(&self, language: &str) -> bool {
        self.supported_languages().contains(language)
    }

    /// Execute a batch of cells. Resolves once the kernel is done with the batch.
    async fn execute_cells(&self, notebook: &NotebookUri, handles: &[CellHandle]) -> Result<()>;

    /// Ask the kernel to stop executing the given cells.
    ///
    /// Advisory: handles that are not running must be ignored.
    async fn cancel_cells(&self, notebook: &NotebookUri, handles: &[CellHandle]) -> Result<()>;
}

/// A discovery routine that may make a kernel selectable when run
/// (e.g. installing a kernel provider).
#[async_trait]
pub trait SourceAction: Send + Sync {
    fn label(&self) -> &str;

    /// Run the action. Implementations should stop early once `token` is cancelled.
    async fn run(&self, token: CancellationToken) -> Result<()>;
}

/// Kernels that can serve a notebook.
#[derive(Clone, Default)]
pub struct KernelMatch {
    /// Every candidate kernel.
    pub all: Vec<KernelRef>,
    /// The kernel bound to the notebook, if any.
    pub selected: Option<KernelRef>,
    /// Kernels worth proposing when nothing is selected.
    pub suggestions: Vec<KernelRef>,
}

impl std::fmt::Debug for KernelMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = |kernels: &[KernelRef]| kernels.iter().map(|k| k.id().to_string()).collect::<Vec<_>>();
        f.debug_struct("KernelMatch")
            .field("all", &ids(&self.all))
            .field("selected", &self.selected.as_ref().map(|k| k.id().to_string()))
            .field("suggestions", &ids(&self.suggestions))
            .finish()
    }
}

/// Owner of the notebook-to-kernel binding.
pub trait KernelRegistry: Send + Sync {
    /// The selected kernel, or the single suggestion when nothing is selected.
    fn selected_or_suggested(&self, notebook: &Notebook) -> Option<KernelRef>;

    /// Candidate kernels for the notebook.
    fn matching_kernels(&self, notebook: &Notebook) -> KernelMatch;

    /// Discovery actions available for the notebook.
    fn source_actions(&self, notebook: &Notebook) -> Vec<SourceActionRef>;

    /// Bind `kernel` to `notebook`.
    fn select_kernel_for_notebook(&self, kernel: &KernelRef, notebook: &Notebook);
}

#[derive(Default)]
struct RegistryState {
    kernels: Vec<KernelRef>,
    selections: FxHashMap<NotebookUri, String>,
    source_actions: Vec<SourceActionRef>,
}

/// Kernel registry backed by in-memory tables.
///
/// A kernel matches a notebook when it supports the language of at least one
/// code cell; notebooks without code cells match every kernel. When a notebook
/// has no selection and exactly one kernel matches, that kernel is suggested.
#[derive(Default)]
pub struct InMemoryKernelRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryKernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a kernel, replacing any kernel with the same id.
    pub fn register_kernel(&self, kernel: KernelRef) {
        let mut state = self.write();
        state.kernels.retain(|k| k.id() != kernel.id());
        tracing::debug!("Registered kernel {}", kernel.id());
        state.kernels.push(kernel);
    }

    /// Remove a kernel and every selection that points at it.
    pub fn unregister_kernel(&self, kernel_id: &str) -> Option<KernelRef> {
        let mut state = self.write();
        let index = state.kernels.iter().position(|k| k.id() == kernel_id)?;
        state.selections.retain(|_, selected| selected != kernel_id);
        Some(state.kernels.remove(index))
    }

    pub fn kernels(&self) -> Vec<KernelRef> {
        self.read().kernels.clone()
    }

    pub fn kernel(&self, kernel_id: &str) -> Option<KernelRef> {
        self.read().kernels.iter().find(|k| k.id() == kernel_id).cloned()
    }

    pub fn add_source_action(&self, action: SourceActionRef) {
        self.write().source_actions.push(action);
    }

    /// Bind a kernel to a notebook by id. Returns false for an unknown kernel.
    pub fn select_by_id(&self, kernel_id: &str, notebook: &NotebookUri) -> bool {
        let mut state = self.write();
        if !state.kernels.iter().any(|k| k.id() == kernel_id) {
            return false;
        }
        state
            .selections
            .insert(notebook.clone(), kernel_id.to_string());
        true
    }

    /// The kernel explicitly bound to a notebook.
    pub fn selected_kernel(&self, notebook: &NotebookUri) -> Option<KernelRef> {
        let state = self.read();
        Self::selected_locked(&state, notebook)
    }

    fn selected_locked(state: &RegistryState, notebook: &NotebookUri) -> Option<KernelRef> {
        let kernel_id = state.selections.get(notebook)?;
        state.kernels.iter().find(|k| k.id() == kernel_id).cloned()
    }

    fn matching_locked(state: &RegistryState, notebook: &Notebook) -> Vec<KernelRef> {
        let languages: FxHashSet<&str> = notebook
            .cells
            .iter()
            .filter(|c| c.is_code())
            .map(|c| c.language.as_str())
            .collect();

        state
            .kernels
            .iter()
            .filter(|k| languages.is_empty() || languages.iter().any(|l| k.supports_language(l)))
            .cloned()
            .collect()
    }
}

impl KernelRegistry for InMemoryKernelRegistry {
    fn selected_or_suggested(&self, notebook: &Notebook) -> Option<KernelRef> {
        let state = self.read();
        if let Some(selected) = Self::selected_locked(&state, &notebook.uri) {
            return Some(selected);
        }

        let mut all = Self::matching_locked(&state, notebook);
        if all.len() == 1 { all.pop() } else { None }
    }

    fn matching_kernels(&self, notebook: &Notebook) -> KernelMatch {
        let state = self.read();
        let all = Self::matching_locked(&state, notebook);
        let selected = Self::selected_locked(&state, &notebook.uri);
        let suggestions = if selected.is_none() && all.len() == 1 {
            all.clone()
        } else {
            Vec::new()
        };

        KernelMatch {
            all,
            selected,
            suggestions,
        }
    }

    fn source_actions(&self, _notebook: &Notebook) -> Vec<SourceActionRef> {
        self.read().source_actions.clone()
    }

    fn select_kernel_for_notebook(&self, kernel: &KernelRef, notebook: &Notebook) {
        let mut state = self.write();
        if !state.kernels.iter().any(|k| k.id() == kernel.id()) {
            state.kernels.push(Arc::clone(kernel));
        }
        state
            .selections
            .insert(notebook.uri.clone(), kernel.id().to_string());
    }
}
