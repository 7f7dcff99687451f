//! Structured logging setup shared by every `herdwatch` subcommand.
use std::env;

use is_terminal::IsTerminal;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Noisy HTTP client crates are held at `info` unless `RUST_LOG` says otherwise.
const QUIET_DEPENDENCIES: &str = "reqwest=info,hyper=info,hyper_util=info";

// ---

/// Install the process-wide compact subscriber. Call once, before the first
/// log line; every record carries its target and source location.
///
/// Environment:
/// - `RUST_LOG` wins outright when set. Otherwise `HERDWATCH_LOG_LEVEL`
///   (`trace`..`error`, default `debug`) sets our level while the HTTP
///   client stack stays at `info`.
/// - `HERDWATCH_SPAN_EVENTS=full` logs span enter, exit and close;
///   `enter_exit` drops the close record. Anything else logs closes only.
/// - `FORCE_COLOR` accepts `1`/`true`/`yes` or `0`/`false`/`no`; without it,
///   ANSI colour follows whether stdout is a terminal.
pub fn init_tracing() {
    // ---
    let use_color = color_override(env::var("FORCE_COLOR").ok().as_deref())
        .unwrap_or_else(|| std::io::stdout().is_terminal());

    let env_filter = match env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(format!(
            "{},{}",
            level_from_env(env::var("HERDWATCH_LOG_LEVEL").ok().as_deref()),
            QUIET_DEPENDENCIES
        )),
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events(env::var("HERDWATCH_SPAN_EVENTS").ok().as_deref()))
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

fn span_events(value: Option<&str>) -> FmtSpan {
    match value {
        Some("full") => FmtSpan::FULL,
        Some("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    }
}

/// `None` means "decide from the terminal".
fn color_override(value: Option<&str>) -> Option<bool> {
    match value {
        Some("1" | "true" | "yes") => Some(true),
        Some("0" | "false" | "no") => Some(false),
        _ => None,
    }
}

fn level_from_env(value: Option<&str>) -> &'static str {
    match value {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => "debug",
    }
}
