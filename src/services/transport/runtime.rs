use once_cell::sync::Lazy;
use std::env;
use std::path::Path;
use std::time::Duration;

use super::TimeoutStrategy;

/// Host environment the bridge runs in, probed once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRuntime {
    /// Plain process, configured through `config.env`
    Standalone,
    /// Qinglong task panel, configured through panel env vars
    Qinglong,
}

static CURRENT: Lazy<HostRuntime> = Lazy::new(|| {
    HostRuntime::detect(|key| env::var(key).ok(), Path::new("/ql").exists())
});

impl HostRuntime {
    /// Runtime of this process
    pub fn current() -> HostRuntime {
        *CURRENT
    }

    pub fn detect<F>(lookup: F, ql_dir_exists: bool) -> HostRuntime
    where
        F: Fn(&str) -> Option<String>,
    {
        let panel_env = ["QL_DIR", "QL_BRANCH"]
            .iter()
            .any(|key| lookup(key).map(|v| !v.is_empty()).unwrap_or(false));

        if panel_env || ql_dir_exists {
            HostRuntime::Qinglong
        } else {
            HostRuntime::Standalone
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostRuntime::Standalone => "standalone",
            HostRuntime::Qinglong => "qinglong",
        }
    }

    /// The panel injects env vars itself, only standalone reads `config.env`
    pub fn loads_env_file(&self) -> bool {
        matches!(self, HostRuntime::Standalone)
    }

    /// Panel tasks race each request against a timer
    pub fn timeout_strategy(&self, timeout: Duration) -> TimeoutStrategy {
        match self {
            HostRuntime::Standalone => TimeoutStrategy::Native(timeout),
            HostRuntime::Qinglong => TimeoutStrategy::Race(timeout),
        }
    }
}
