//! Terminal input shared by the REPL and the confirmer.
//!
//! A single thread owns stdin and forwards lines over a channel; whoever
//! needs the next line (the prompt loop, or a permission prompt in the
//! middle of a turn) locks the receiver.

use std::io::{BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use codeloop_core::event::{ConfirmationRequest, Confirmer};
use tokio::sync::{Mutex, mpsc};

pub type Lines = Arc<Mutex<mpsc::Receiver<String>>>;

/// Start reading stdin. The channel closes on EOF (Ctrl+D).
///
/// Reads on a plain thread so a pending read never holds up runtime shutdown.
pub fn spawn_stdin_lines() -> Lines {
    let (tx, rx) = mpsc::channel(32);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    });
    Arc::new(Mutex::new(rx))
}

pub async fn read_line(lines: &Lines) -> Option<String> {
    lines.lock().await.recv().await
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// One-line description of what a tool call would do.
pub fn describe(request: &ConfirmationRequest) -> String {
    let input = &request.input;
    if let Some(command) = input["command"].as_str() {
        return command.to_string();
    }
    if let Some(path) = input["file_path"].as_str().or(input["path"].as_str()) {
        return path.to_string();
    }
    let mut text = input.to_string();
    if text.len() > 200 {
        let mut cut = 200;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}

/// Asks on the terminal before a tool call runs.
pub struct StdinConfirmer {
    lines: Lines,
}

impl StdinConfirmer {
    pub fn new(lines: Lines) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        eprint!(
            "\n  Allow {} [{}]: {} ? [y/N] ",
            request.tool_name,
            request.level,
            describe(request)
        );
        let _ = std::io::stderr().flush();
        match read_line(&self.lines).await {
            Some(answer) => is_yes(&answer),
            None => false,
        }
    }
}
