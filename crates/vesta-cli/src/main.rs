//! Vesta CLI - run notebook cells against process-backed kernels.

mod colors;
mod document;
mod kernel;
mod prompt;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vesta")]
#[command(about = "Run notebook cells against local kernels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the cells of a notebook document
    Run {
        /// Path to the notebook document (.json)
        notebook: PathBuf,

        /// Trust the workspace without prompting
        #[arg(long)]
        trust: bool,

        /// Kernel id to bind to the notebook (skips the picker)
        #[arg(short, long)]
        kernel: Option<String>,

        /// Run only the cells with these handles
        #[arg(long = "cell")]
        cells: Vec<u32>,
    },

    /// List the kernels declared by a notebook document
    Kernels {
        /// Path to the notebook document (.json)
        notebook: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            notebook,
            trust,
            kernel,
            cells,
        } => {
            let options = run::RunOptions {
                trust,
                kernel,
                cells,
            };
            if run::execute(&notebook, options).await? == run::RunStatus::Interrupted {
                // A prompt may still be blocked reading stdin; leave without waiting on it.
                std::process::exit(130);
            }
        }

        Commands::Kernels { notebook } => run::list_kernels(&notebook)?,
    }

    Ok(())
}
