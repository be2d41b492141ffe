//! End-to-end tests for the vesta CLI.
//!
//! These run the binary against notebook documents whose kernels are POSIX
//! shell commands.

#![cfg(unix)]
#![allow(deprecated)] // Command::cargo_bin

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

struct TestDocument {
    _temp_dir: TempDir,
    path: PathBuf,
}

impl TestDocument {
    fn new(source: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("notebook.json");
        fs::write(&path, source).expect("Failed to write notebook");

        Self {
            _temp_dir: temp_dir,
            path,
        }
    }
}

/// Markup, a shell cell and a python cell, with only a shell kernel.
fn shell_document() -> String {
    r##"{
        "cells": [
            { "handle": 0, "kind": "markup", "language": "markdown", "source": "# Shell" },
            { "handle": 1, "kind": "code", "language": "shellscript", "source": "echo from-cell-one" },
            { "handle": 2, "kind": "code", "language": "python", "source": "print(2)" },
            { "handle": 3, "kind": "code", "language": "shellscript", "source": "echo broken >&2; exit 1" }
        ],
        "kernels": [
            { "id": "sh", "label": "POSIX shell", "languages": ["shellscript"], "command": ["sh", "-c"] }
        ]
    }"##
    .to_string()
}

/// One shell cell and two kernels that both run it, so the picker must ask.
fn two_kernel_document() -> String {
    r#"{
        "cells": [
            { "handle": 0, "kind": "code", "language": "shellscript", "source": "echo picked-kernel-ran" }
        ],
        "kernels": [
            { "id": "dash", "label": "Dash", "languages": ["shellscript"], "command": ["sh", "-c"] },
            { "id": "posix", "label": "POSIX", "languages": ["shellscript"], "command": ["sh", "-c"] }
        ]
    }"#
    .to_string()
}

fn vesta() -> Command {
    Command::cargo_bin("vesta").expect("binary builds")
}

// =============================================================================
// run
// =============================================================================

#[test]
fn test_run_trusted_executes_supported_cells() {
    let doc = TestDocument::new(&shell_document());

    vesta()
        .arg("run")
        .arg(&doc.path)
        .arg("--trust")
        .assert()
        .success()
        .stdout(predicate::str::contains("from-cell-one"))
        .stdout(predicate::str::contains("[0] markup, skipped"))
        .stdout(predicate::str::contains("[2] python"))
        .stdout(predicate::str::contains("not executed"))
        .stdout(predicate::str::contains("broken"))
        .stdout(predicate::str::contains("Finished"))
        // Markup never runs, so only the three code cells are counted.
        .stdout(predicate::str::contains("2 of 3 cell(s)"));
}

#[test]
fn test_run_single_cell() {
    let doc = TestDocument::new(&shell_document());

    vesta()
        .args(["run", "--trust", "--cell", "1"])
        .arg(&doc.path)
        .assert()
        .success()
        .stdout(predicate::str::contains("from-cell-one"))
        .stdout(predicate::str::contains("broken").not());
}

#[test]
fn test_declined_trust_runs_nothing() {
    let doc = TestDocument::new(&shell_document());

    vesta()
        .arg("run")
        .arg(&doc.path)
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Trust this workspace"))
        .stdout(predicate::str::contains("from-cell-one").not());
}

#[test]
fn test_piped_answers_reach_trust_and_picker() {
    let doc = TestDocument::new(&two_kernel_document());

    vesta()
        .arg("run")
        .arg(&doc.path)
        .write_stdin("y\n1\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Select a kernel"))
        .stdout(predicate::str::contains("picked-kernel-ran"))
        .stdout(predicate::str::contains("1 of 1 cell(s)"));
}

#[test]
fn test_interrupt_at_trust_prompt_exits() {
    let doc = TestDocument::new(&shell_document());

    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("vesta"))
        .arg("run")
        .arg(&doc.path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start vesta");
    // Keep stdin open so the prompt blocks.
    let _stdin = child.stdin.take();

    let mut stdout = child.stdout.take().expect("stdout is piped");
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = [0u8; 1024];
        while let Ok(n) = stdout.read(&mut buf) {
            if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
                break;
            }
        }
    });

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut output = String::new();
    while !output.contains("Trust this workspace") {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let chunk = rx.recv_timeout(remaining).expect("trust prompt shown");
        output.push_str(&String::from_utf8_lossy(&chunk));
    }

    let status = std::process::Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("Failed to send SIGINT");
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let exit = loop {
        if let Some(exit) = child.try_wait().expect("Failed to poll vesta") {
            break exit;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("vesta kept waiting on the trust prompt after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(exit.code(), Some(130));

    while let Ok(chunk) = rx.recv_timeout(Duration::from_secs(1)) {
        output.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(output.contains("Interrupted"));
    assert!(!output.contains("from-cell-one"));
}

#[test]
fn test_unknown_kernel_fails() {
    let doc = TestDocument::new(&shell_document());

    vesta()
        .args(["run", "--trust", "--kernel", "ruby"])
        .arg(&doc.path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown kernel: ruby"));
}

#[test]
fn test_missing_notebook_fails() {
    vesta()
        .args(["run", "--trust", "/nonexistent/notebook.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Notebook not found"));
}

// =============================================================================
// kernels
// =============================================================================

#[test]
fn test_list_kernels() {
    let doc = TestDocument::new(&shell_document());

    vesta()
        .arg("kernels")
        .arg(&doc.path)
        .assert()
        .success()
        .stdout(predicate::str::contains("POSIX shell"))
        .stdout(predicate::str::contains("shellscript"));
}
