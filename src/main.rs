mod config;
mod db;
mod fees;
mod ipc;
mod registration;
mod selection;

use std::io::{self, BufRead, Write};

fn main() {
    let cfg = config::Config::from_env();
    config::init_tracing(&cfg);

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = cfg.workspace.as_ref() {
        match db::open_db(path) {
            Ok(conn) => {
                tracing::info!(workspace = %path.display(), "opened workspace from environment");
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            Err(e) => tracing::warn!(workspace = %path.display(), "workspace open failed: {e:#}"),
        }
    }

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
                // Can't reply without id.
                tracing::warn!("dropping malformed request line: {e}");
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
