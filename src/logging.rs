//! Diagnostic logging via `tracing`.
//!
//! User-facing progress lines go through the color helpers in `color`; `tracing` events are
//! for diagnostics and stay quiet unless PROBOX_LOG / RUST_LOG (or --verbose) ask for them.

use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

fn filter_directives(verbose: bool) -> String {
    env::var("PROBOX_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| env::var("RUST_LOG").ok().filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| {
            if verbose {
                "probox=debug".to_string()
            } else {
                "warn".to_string()
            }
        })
}

/// Install the stderr subscriber once; later calls (and an already-set global) are no-ops.
pub fn init(verbose: bool) {
    if INIT.get().is_some() {
        return;
    }
    let directives = filter_directives(verbose);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        crate::warn_print(&format!("ignoring invalid log filter '{directives}': {e}"));
        EnvFilter::new("warn")
    });
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(crate::color_enabled_stderr())
        .try_init();
    if result.is_err() {
        tracing::debug!("log init skipped (global subscriber already set)");
    }
    let _ = INIT.set(());
}
