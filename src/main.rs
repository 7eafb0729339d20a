mod config;
mod db;
mod error;
mod gateway;
mod grade;
mod ipc;
mod lifecycle;
mod marksheet;
mod model;
mod storage;

use serde_json::json;
use std::io::{self, BufRead, Write};
use tracing::{info, warn};

const LOG_ENV: &str = "MARKSHEETD_LOG";

/// Logs go to stderr; stdout carries only protocol lines.
fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!(version = env!("CARGO_PKG_VERSION"), "marksheetd started");

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                writeln!(stdout, "{resp}")?;
                stdout.flush()?;
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        writeln!(stdout, "{resp}")?;
        stdout.flush()?;
    }

    Ok(())
}
