//! Structured logging using tracing
//!
//! Console output goes to stderr; when a log file path is given, an append-only
//! file layer without ANSI colors is added.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ellipse a string for display: first half + "..." + last half.
/// If `s` has ≤ `max_len` chars, returns `s` unchanged.
pub fn ellipse(s: &str, max_len: usize) -> String {
    const SEP: &str = "...";
    let sep_len = 3;
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    if n <= max_len || max_len <= sep_len {
        return s.to_string();
    }
    let first_count = (max_len - sep_len) / 2;
    let last_count = (max_len - sep_len) - first_count;
    let first: String = chars[..first_count].iter().collect();
    let last: String = chars[n - last_count..].iter().collect();
    format!("{}{}{}", first, SEP, last)
}

/// Map `-v` count to a filter level.
/// No flag: info. -v: debug. -vv and above: trace.
fn filter_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize tracing with console and optional file output.
///
/// Verbosity always comes from the command line; RUST_LOG is ignored.
pub fn init_tracing(verbosity: u8, log_file_path: Option<PathBuf>) {
    let filter = EnvFilter::new(format!("alert_relay={}", filter_level(verbosity)));

    let registry = tracing_subscriber::registry().with(filter);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file = log_file_path.and_then(|log_path| {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
    });

    if let Some(file) = file {
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(false);

        registry.with(console_layer).with(file_layer).init();
    } else {
        registry.with(console_layer).init();
    }
}
