//! Interactive prompts: workspace trust and the kernel picker.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;
use vesta_core::{
    CommandService, Error, InMemoryKernelRegistry, Notebook, Result, TrustGate,
    SELECT_KERNEL_COMMAND,
};

use crate::colors;

type Input = Box<dyn AsyncBufRead + Send + Unpin>;

/// Line reader shared by every prompt of the process.
///
/// A single buffered reader owns stdin, so answers piped in ahead of time
/// reach the prompts in order.
pub struct Prompter {
    lines: Mutex<Lines<Input>>,
}

impl Prompter {
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    fn from_reader(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        let input: Input = Box::new(reader);
        Self {
            lines: Mutex::new(input.lines()),
        }
    }

    /// Print `question` and read one line.
    ///
    /// Returns `None` on end of input.
    async fn ask(&self, question: &str) -> std::io::Result<Option<String>> {
        let mut lines = self.lines.lock().await;

        let mut stdout = tokio::io::stdout();
        stdout.write_all(question.as_bytes()).await?;
        stdout.flush().await?;

        Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
    }
}

/// Interpret a yes/no answer. Anything but an explicit yes declines.
fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Trust gate that asks on the terminal.
pub struct TerminalTrustGate {
    prompter: Arc<Prompter>,
}

impl TerminalTrustGate {
    pub fn new(prompter: Arc<Prompter>) -> Self {
        Self { prompter }
    }
}

#[async_trait]
impl TrustGate for TerminalTrustGate {
    async fn request_trust(&self, message: &str) -> bool {
        let question = format!(
            "{}{}{}\nTrust this workspace and run code? [y/N] ",
            colors::BOLD,
            message,
            colors::RESET
        );

        match self.prompter.ask(&question).await {
            Ok(Some(answer)) => is_yes(&answer),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Failed to read trust answer: {}", e);
                false
            }
        }
    }
}

/// Command service exposing the terminal kernel picker.
pub struct TerminalCommands {
    registry: Arc<InMemoryKernelRegistry>,
    prompter: Arc<Prompter>,
}

impl TerminalCommands {
    pub fn new(registry: Arc<InMemoryKernelRegistry>, prompter: Arc<Prompter>) -> Self {
        Self { registry, prompter }
    }

    async fn pick_kernel(&self, notebook: &Notebook) -> Result<()> {
        let kernels = self.registry.kernels();
        if kernels.is_empty() {
            println!("{}No kernels declared for this notebook.{}", colors::YELLOW, colors::RESET);
            return Ok(());
        }

        println!("{}Select a kernel:{}", colors::BOLD, colors::RESET);
        for (i, kernel) in kernels.iter().enumerate() {
            let mut languages: Vec<_> = kernel.supported_languages().iter().cloned().collect();
            languages.sort();
            println!(
                "  {}{}{}) {} {}[{}]{}",
                colors::CYAN,
                i + 1,
                colors::RESET,
                kernel.label(),
                colors::DIM,
                languages.join(", "),
                colors::RESET
            );
        }

        let answer = self
            .prompter
            .ask("Kernel number (empty to cancel): ")
            .await
            .map_err(|e| Error::Command {
                command: SELECT_KERNEL_COMMAND.to_string(),
                message: e.to_string(),
            })?;

        let choice = answer
            .as_deref()
            .and_then(|a| a.parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| kernels.get(i));

        match choice {
            Some(kernel) => {
                self.registry.select_by_id(kernel.id(), &notebook.uri);
            }
            None => tracing::debug!("No kernel picked for {}", notebook.uri),
        }
        Ok(())
    }
}

#[async_trait]
impl CommandService for TerminalCommands {
    async fn execute_command(&self, command: &str, notebook: &Notebook) -> Result<()> {
        match command {
            SELECT_KERNEL_COMMAND => self.pick_kernel(notebook).await,
            other => Err(Error::Command {
                command: other.to_string(),
                message: "unknown command".to_string(),
            }),
        }
    }
}
