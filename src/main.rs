mod config;
mod db;
mod ipc;
mod query;
mod render;

use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = match config::Config::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("STARTUP_ERROR {}", err);
            std::process::exit(1);
        }
    };

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        page_size: config.page_size,
    };

    if let Some(path) = config.workspace.as_ref() {
        match db::open_db(path) {
            Ok(conn) => {
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            Err(e) => {
                eprintln!("STARTUP_ERROR ERR_DB_OPEN {e:#}");
                std::process::exit(1);
            }
        }
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        page_size = state.page_size,
        "schoold ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparsable request line");
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let span = tracing::info_span!("request", id = %req.id, method = %req.method);
        let resp = span.in_scope(|| ipc::handle_request(&mut state, req));
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
