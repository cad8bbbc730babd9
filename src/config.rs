//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__PARALLEL__MAX_CONCURRENCY=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub parallel: ParallelSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 数据目录，SQLite 存储未指定路径时放在这里
    pub data_dir: Option<PathBuf>,
}

/// [orchestrator] 段：委派窗口大小、支持的模式、默认 Agent
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 单 Agent 委派时只转发最近 N 条消息
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_supported_mode")]
    pub supported_mode: String,
    pub default_agent: Option<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            supported_mode: default_supported_mode(),
            default_agent: None,
        }
    }
}

fn default_context_window() -> usize {
    4
}

fn default_supported_mode() -> String {
    "agent".to_string()
}

/// [parallel] 段：并行扇出的并发上限
#[derive(Debug, Clone, Deserialize)]
pub struct ParallelSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ParallelSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    3
}

/// [cache] 段：读缓存 TTL（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

/// 记录存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// [store] 段：后端与 SQLite 文件路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    pub path: Option<PathBuf>,
}

impl StoreSection {
    /// SQLite 文件路径：显式 path > data_dir/hive.db > ./data/hive.db
    pub fn sqlite_path(&self, app: &AppSection) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            app.data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("data"))
                .join("hive.db")
        })
    }
}

/// [tools] 段：工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时回退到默认配置并记录警告
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.context_window, 4);
        assert_eq!(cfg.orchestrator.supported_mode, "agent");
        assert_eq!(cfg.parallel.max_concurrency, 3);
        assert_eq!(cfg.cache.ttl_secs, 300);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[parallel]\nmax_concurrency = 7\n\n[cache]\nttl_secs = 10\n\n[store]\nbackend = \"sqlite\"\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.parallel.max_concurrency, 7);
        assert_eq!(cfg.cache.ttl_secs, 10);
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.orchestrator.context_window, 4);
    }

    #[test]
    fn test_sqlite_path_fallbacks() {
        let store = StoreSection::default();
        let app = AppSection {
            name: None,
            data_dir: Some(PathBuf::from("/tmp/hive")),
        };
        assert_eq!(store.sqlite_path(&app), PathBuf::from("/tmp/hive/hive.db"));
        assert_eq!(
            store.sqlite_path(&AppSection::default()),
            PathBuf::from("data/hive.db")
        );
    }
}
