use std::path::PathBuf;

const LOG_ENV: &str = "CAMPUSD_LOG";
const WORKSPACE_ENV: &str = "CAMPUSD_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings read once at start-up. Per-workspace behaviour lives
/// in the `setup.*` sections instead.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            workspace: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        apply_overrides(&mut cfg, |key| std::env::var(key).ok());
        cfg
    }
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(filter) = lookup(LOG_ENV) {
        let filter = filter.trim();
        if !filter.is_empty() {
            cfg.log_filter = filter.to_string();
        }
    }
    if let Some(path) = lookup(WORKSPACE_ENV) {
        let path = path.trim();
        if !path.is_empty() {
            cfg.workspace = Some(PathBuf::from(path));
        }
    }
}

pub fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&cfg.log_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    // stdout carries the protocol; logs must go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
