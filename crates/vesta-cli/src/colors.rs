//! Terminal colors and status labels for CLI output.

use vesta_core::CellExecutionResult;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RED: &str = "\x1b[31m";

/// Colored label for a finished cell.
pub fn result_label(result: &CellExecutionResult) -> String {
    let time = result
        .duration
        .map(|d| format!(" {}({:.2}s){}", DIM, d.as_secs_f64(), RESET))
        .unwrap_or_default();

    match result.success {
        Some(true) => format!("{}ok{}{}", GREEN, RESET, time),
        Some(false) => format!("{}failed{}{}", RED, RESET, time),
        None => format!("{}not run{}", YELLOW, RESET),
    }
}
