//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CODEFLOW__*` 覆盖（双下划线表示嵌套，如 `CODEFLOW__ORCHESTRATOR__MAX_DEBUG_RETRIES=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [orchestrator] 段：全局超时、调试重试上限、终态任务淘汰宽限期
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 单个任务从 Planning 开始的最长执行时间（秒）
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_max_debug_retries")]
    pub max_debug_retries: u32,
    /// 终态任务保留多久后从注册表移除（秒）
    #[serde(default = "default_eviction_grace_secs")]
    pub eviction_grace_secs: u64,
    /// await_feedback 的默认等待时间（秒）
    #[serde(default = "default_feedback_wait_secs")]
    pub feedback_wait_secs: u64,
}

fn default_execution_timeout_secs() -> u64 {
    30 * 60
}

fn default_max_debug_retries() -> u32 {
    3
}

fn default_eviction_grace_secs() -> u64 {
    60
}

fn default_feedback_wait_secs() -> u64 {
    300
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            execution_timeout_secs: default_execution_timeout_secs(),
            max_debug_retries: default_max_debug_retries(),
            eviction_grace_secs: default_eviction_grace_secs(),
            feedback_wait_secs: default_feedback_wait_secs(),
        }
    }
}

/// 编排器运行时参数（测试中可直接构造毫秒级时长）
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub execution_timeout: Duration,
    pub max_debug_retries: u32,
    pub eviction_grace: Duration,
    pub feedback_wait: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&OrchestratorSection::default())
    }
}

impl From<&OrchestratorSection> for OrchestratorConfig {
    fn from(section: &OrchestratorSection) -> Self {
        Self {
            execution_timeout: Duration::from_secs(section.execution_timeout_secs),
            max_debug_retries: section.max_debug_retries,
            eviction_grace: Duration::from_secs(section.eviction_grace_secs),
            feedback_wait: Duration::from_secs(section.feedback_wait_secs),
        }
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::from(&cfg.orchestrator)
    }
}

/// 从 config 目录加载配置，环境变量 CODEFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CODEFLOW__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("CODEFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
