//! 配置加载
//!
//! 优先级（低 → 高）：
//! 1. 默认值（根目录 `~/.teamwork`）
//! 2. 配置文件 `~/.config/teamwork/config.json`
//! 3. 环境变量 `TEAMWORK_ROOT` / `TEAMWORK_LOCK_STRATEGY` / `TEAMWORK_LOCK_TIMEOUT_MS`
//! 4. CLI 的 `--root` 参数（由调用方覆盖 `root`）

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::storage::{read_json_opt, LockOptions, Storage};

pub const ENV_ROOT: &str = "TEAMWORK_ROOT";
pub const ENV_LOCK_STRATEGY: &str = "TEAMWORK_LOCK_STRATEGY";
pub const ENV_LOCK_TIMEOUT_MS: &str = "TEAMWORK_LOCK_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordConfig {
    /// 所有 team 数据的根目录
    pub root: PathBuf,
    pub lock: LockOptions,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            lock: LockOptions::default(),
        }
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".teamwork")
}

impl CoordConfig {
    /// 默认配置文件路径
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".config").join("teamwork").join("config.json"))
    }

    /// 从配置文件和环境变量自动加载
    pub fn auto_load() -> Self {
        let mut config = Self::config_path()
            .and_then(|path| Self::load_from_file(&path))
            .unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// 读取配置文件；文件缺失或损坏时返回 `None`
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let config = read_json_opt::<Self>(path)?;
        debug!(path = %path.display(), "Loaded config file");
        Some(config)
    }

    /// 用环境变量覆盖配置（`lookup` 便于测试注入）
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.is_empty()) {
            self.root = PathBuf::from(root);
        }

        if let Some(strategy) = lookup(ENV_LOCK_STRATEGY) {
            match strategy.parse() {
                Ok(strategy) => self.lock.strategy = strategy,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_LOCK_STRATEGY),
            }
        }

        if let Some(timeout) = lookup(ENV_LOCK_TIMEOUT_MS) {
            match timeout.parse::<u64>() {
                Ok(ms) => self.lock.timeout_ms = ms,
                Err(e) => warn!(value = %timeout, error = %e, "Ignoring {}", ENV_LOCK_TIMEOUT_MS),
            }
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn storage(&self) -> Storage {
        Storage::with_lock_options(self.root.clone(), self.lock.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LockStrategy;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = CoordConfig::default();
        assert!(config.root.ends_with(".teamwork"));
        assert_eq!(config.lock.stale_after_ms, 5_000);
        assert_eq!(config.lock.strategy, LockStrategy::Native);
    }

    #[test]
    fn test_load_partial_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"root": "/srv/teams", "lock": {"strategy": "marker", "timeout_ms": 2500}}"#,
        )
        .unwrap();

        let config = CoordConfig::load_from_file(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/teams"));
        assert_eq!(config.lock.strategy, LockStrategy::Marker);
        assert_eq!(config.lock.timeout_ms, 2500);
        assert_eq!(config.lock.stale_after_ms, 5_000);
    }

    #[test]
    fn test_load_corrupt_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "root = nope").unwrap();
        assert!(CoordConfig::load_from_file(&path).is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_ROOT, "/tmp/tw"),
            (ENV_LOCK_STRATEGY, "marker"),
            (ENV_LOCK_TIMEOUT_MS, "not-a-number"),
        ]);

        let mut config = CoordConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.root, PathBuf::from("/tmp/tw"));
        assert_eq!(config.lock.strategy, LockStrategy::Marker);
        assert_eq!(config.lock.timeout_ms, 10_000);
    }
}
