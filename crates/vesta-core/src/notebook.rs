//! Notebook and cell identity.
//!
//! The document model owns notebooks and their cells. This crate only reads a
//! cell's handle, kind and language, so these types carry little more than that.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Stable identifier of a notebook document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotebookUri(String);

impl NotebookUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Build a `file://` URI for a notebook on disk.
    pub fn from_path(path: &Path) -> Self {
        Self(format!("file://{}", path.display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NotebookUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a cell within its notebook.
///
/// Handles persist across edits and reorderings of the notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellHandle(u32);

impl CellHandle {
    pub fn new(handle: u32) -> Self {
        Self(handle)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for CellHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified cell identity: notebook plus handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellUri {
    pub notebook: NotebookUri,
    pub handle: CellHandle,
}

impl CellUri {
    pub fn new(notebook: NotebookUri, handle: CellHandle) -> Self {
        Self { notebook, handle }
    }
}

impl std::fmt::Display for CellUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#cell={}", self.notebook, self.handle)
    }
}

/// Kind of a notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    /// Executable code.
    Code,
    /// Prose; never executed.
    Markup,
}

/// A single cell of a notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub handle: CellHandle,
    pub kind: CellKind,
    /// Language identifier (e.g. `python`, `shellscript`).
    pub language: String,
    /// Cell text. Read by kernels, never by the orchestrator.
    #[serde(default)]
    pub source: String,
}

impl Cell {
    /// Create a code cell.
    pub fn code(handle: u32, language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            handle: CellHandle::new(handle),
            kind: CellKind::Code,
            language: language.into(),
            source: source.into(),
        }
    }

    /// Create a markup cell.
    pub fn markup(handle: u32, source: impl Into<String>) -> Self {
        Self {
            handle: CellHandle::new(handle),
            kind: CellKind::Markup,
            language: "markdown".to_string(),
            source: source.into(),
        }
    }

    pub fn is_code(&self) -> bool {
        self.kind == CellKind::Code
    }
}

/// A notebook document: a URI and its ordered cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub uri: NotebookUri,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Notebook {
    pub fn new(uri: NotebookUri, cells: Vec<Cell>) -> Self {
        Self { uri, cells }
    }

    /// Look up a cell by handle.
    pub fn cell(&self, handle: CellHandle) -> Option<&Cell> {
        self.cells.iter().find(|c| c.handle == handle)
    }

    /// URI of one of this notebook's cells.
    pub fn cell_uri(&self, handle: CellHandle) -> CellUri {
        CellUri::new(self.uri.clone(), handle)
    }
}
