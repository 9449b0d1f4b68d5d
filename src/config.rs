use crate::store::Backend;
use anyhow::anyhow;
use std::path::PathBuf;

pub const ENV_WORKSPACE: &str = "POINTSD_WORKSPACE";
pub const ENV_BACKEND: &str = "POINTSD_BACKEND";
pub const ENV_LOG: &str = "POINTSD_LOG";

const DEFAULT_LOG_FILTER: &str = "warn";

/// Process-level settings read once at startup. Per-workspace settings live in
/// the workspace itself (see the `setup.*` methods).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub workspace: Option<PathBuf>,
    pub backend: Backend,
    pub log_filter: String,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let workspace = lookup(ENV_WORKSPACE)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let backend = match lookup(ENV_BACKEND) {
            Some(raw) if !raw.trim().is_empty() => Backend::parse(&raw)
                .ok_or_else(|| anyhow!("{} must be sqlite or sheet, got {:?}", ENV_BACKEND, raw))?,
            _ => Backend::Sqlite,
        };
        let log_filter = lookup(ENV_LOG)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Ok(Self {
            workspace,
            backend,
            log_filter,
        })
    }
}
