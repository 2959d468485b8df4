use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Filter directive: `--verbose` wins, then STACKYARD_LOG, then RUST_LOG, then `info`.
pub fn filter_directive(verbose: bool) -> String {
    if verbose {
        return "debug".to_string();
    }
    ["STACKYARD_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|k| env::var(k).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Install the stderr fmt subscriber once per process. Returns false if one was already set.
pub fn init_logging(verbose: bool) -> bool {
    if INIT.get().is_some() {
        return false;
    }
    let directive = filter_directive(verbose);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("stackyard: invalid log filter {directive:?} ({e}); using info");
        EnvFilter::new("info")
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        return false;
    }
    let _ = INIT.set(());
    true
}
