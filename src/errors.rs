//! Error mapping guide:
//! - Exit code 127 only for a missing runtime binary; everything else exits 1.
//! - Every failure is surfaced immediately; nothing in this crate retries.
//! - NotFound and Conflict carry enough context (known names/paths, existing box) for the
//!   user to act without a second command.
use std::io;
use std::path::PathBuf;

pub type Result<T, E = ProboxError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ProboxError {
    /// Operator-fixable setup problem (missing provisioning label, ambiguous image, bad name).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no box found for '{token}' (known: {})", render_known(.known))]
    NotFound { token: String, known: Vec<String> },

    #[error("path {} is already bound to box '{existing}'", .path.display())]
    Conflict { path: PathBuf, existing: String },

    #[error("{command} failed{}{}", render_code(.code), render_stderr(.stderr))]
    ExternalTool {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// The podman/docker binary could not be found or executed.
    #[error("container runtime unavailable: {0}")]
    RuntimeNotFound(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProboxError {
    pub fn config(msg: impl Into<String>) -> Self {
        ProboxError::Configuration(msg.into())
    }
}

fn render_known(known: &[String]) -> String {
    if known.is_empty() {
        "none".to_string()
    } else {
        known.join(", ")
    }
}

fn render_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" with exit code {c}"),
        None => " (terminated by signal)".to_string(),
    }
}

fn render_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// Process exit code: 127 when the runtime binary is missing (command not found), else 1.
pub fn exit_code_for_error(e: &ProboxError) -> u8 {
    match e {
        ProboxError::RuntimeNotFound(_) => 127,
        _ => 1,
    }
}
