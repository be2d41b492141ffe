//! Notebook documents read by the CLI.
//!
//! A document is a JSON file holding the notebook's cells and the kernels it
//! may run on:
//!
//! ```json
//! {
//!   "cells": [
//!     { "handle": 0, "kind": "markup", "language": "markdown", "source": "# Setup" },
//!     { "handle": 1, "kind": "code", "language": "python", "source": "print(40 + 2)" }
//!   ],
//!   "kernels": [
//!     { "id": "python3", "label": "Python 3", "languages": ["python"], "command": ["python3", "-c"] }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use vesta_core::{Cell, Notebook, NotebookUri};

/// A kernel declared by a document: an interpreter command that receives the
/// cell source as its last argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub languages: Vec<String>,
    /// Program and leading arguments.
    pub command: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentFile {
    #[serde(default)]
    cells: Vec<Cell>,
    #[serde(default)]
    kernels: Vec<KernelSpec>,
}

/// A loaded notebook document.
#[derive(Debug, Clone)]
pub struct NotebookDocument {
    pub notebook: Notebook,
    pub kernels: Vec<KernelSpec>,
}

impl NotebookDocument {
    /// Load a document from disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("Notebook not found: {}", path.display());
        }

        let path = path.canonicalize()?;
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: DocumentFile = serde_json::from_str(&source)
            .with_context(|| format!("Invalid notebook document {}", path.display()))?;

        for spec in &file.kernels {
            if spec.command.is_empty() {
                anyhow::bail!("Kernel '{}' has an empty command", spec.id);
            }
        }

        let mut handles: Vec<_> = file.cells.iter().map(|c| c.handle).collect();
        handles.sort();
        if handles.windows(2).any(|pair| pair[0] == pair[1]) {
            anyhow::bail!("Duplicate cell handle in {}", path.display());
        }

        Ok(Self {
            notebook: Notebook::new(NotebookUri::from_path(&path), file.cells),
            kernels: file.kernels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesta_core::CellKind;

    fn write(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("notebook.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(
            &dir,
            r##"{
                "cells": [
                    { "handle": 0, "kind": "markup", "language": "markdown", "source": "# Title" },
                    { "handle": 1, "kind": "code", "language": "shellscript", "source": "echo hi" }
                ],
                "kernels": [
                    { "id": "sh", "languages": ["shellscript"], "command": ["sh", "-c"] }
                ]
            }"##,
        );

        let document = NotebookDocument::load(&path).unwrap();
        assert_eq!(document.notebook.cells.len(), 2);
        assert_eq!(document.notebook.cells[0].kind, CellKind::Markup);
        assert_eq!(document.kernels[0].label, None);
        assert!(document.notebook.uri.as_str().starts_with("file://"));
    }

    #[test]
    fn test_missing_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = NotebookDocument::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Notebook not found"));
    }

    #[test]
    fn test_rejects_empty_kernel_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{ "kernels": [ { "id": "bad", "languages": ["python"], "command": [] } ] }"#,
        );

        assert!(NotebookDocument::load(&path).is_err());
    }

    #[test]
    fn test_rejects_duplicate_handles() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{ "cells": [
                { "handle": 3, "kind": "code", "language": "python" },
                { "handle": 3, "kind": "code", "language": "python" }
            ] }"#,
        );

        assert!(NotebookDocument::load(&path).is_err());
    }
}
