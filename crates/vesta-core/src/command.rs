//! Named commands the orchestrator can invoke.
//!
//! Only the side effects of a command matter to the orchestrator; the kernel
//! picker, for instance, is expected to bind a kernel to the notebook.

use async_trait::async_trait;

use crate::error::Result;
use crate::notebook::Notebook;

/// Command that lets the user pick a kernel for a notebook.
pub const SELECT_KERNEL_COMMAND: &str = "notebook.selectKernel";

/// Executes named commands on behalf of the orchestrator.
#[async_trait]
pub trait CommandService: Send + Sync {
    async fn execute_command(&self, command: &str, notebook: &Notebook) -> Result<()>;
}
