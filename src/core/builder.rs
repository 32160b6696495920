//! AgentCore 构建器：统一的编排器初始化逻辑
//!
//! 演示程序、测试与上层服务共用同一套组装方式；四个必需协作者缺一即返回配置错误。

use std::sync::Arc;

use crate::agents::{Coder, Debugger, Planner, RepositoryExecutor, Tester};
use crate::config::{AppConfig, OrchestratorConfig};
use crate::core::{AgentCore, CoreError, FeedbackRouter, ProgressHub, TaskRegistry};

/// 编排器构建器
#[derive(Default)]
pub struct AgentCoreBuilder {
    config: OrchestratorConfig,
    planner: Option<Arc<dyn Planner>>,
    coder: Option<Arc<dyn Coder>>,
    tester: Option<Arc<dyn Tester>>,
    debugger: Option<Arc<dyn Debugger>>,
    repository: Option<Arc<dyn RepositoryExecutor>>,
}

impl AgentCoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从应用配置创建
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new().with_config(OrchestratorConfig::from(config))
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_coder(mut self, coder: Arc<dyn Coder>) -> Self {
        self.coder = Some(coder);
        self
    }

    pub fn with_tester(mut self, tester: Arc<dyn Tester>) -> Self {
        self.tester = Some(tester);
        self
    }

    pub fn with_debugger(mut self, debugger: Arc<dyn Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    /// 可选：支持仓库任务
    pub fn with_repository_executor(mut self, executor: Arc<dyn RepositoryExecutor>) -> Self {
        self.repository = Some(executor);
        self
    }

    pub fn build(self) -> Result<AgentCore, CoreError> {
        let missing = |name: &str| CoreError::Config(format!("{name} is required"));
        let planner = self.planner.ok_or_else(|| missing("planner"))?;
        let coder = self.coder.ok_or_else(|| missing("coder"))?;
        let tester = self.tester.ok_or_else(|| missing("tester"))?;
        let debugger = self.debugger.ok_or_else(|| missing("debugger"))?;

        let registry = Arc::new(TaskRegistry::new());
        let progress = Arc::new(ProgressHub::new());
        let router = FeedbackRouter::new(Arc::clone(&registry), Arc::clone(&progress));

        tracing::info!(
            timeout_secs = self.config.execution_timeout.as_secs(),
            max_debug_retries = self.config.max_debug_retries,
            repository_tasks = self.repository.is_some(),
            "AgentCore initialized"
        );

        Ok(AgentCore {
            config: self.config,
            registry,
            progress,
            router,
            planner,
            coder,
            tester,
            debugger,
            repository: self.repository,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{MockCoder, MockDebugger, MockPlanner, MockTester};

    #[test]
    fn test_build_requires_collaborators() {
        let err = AgentCoreBuilder::new()
            .with_planner(Arc::new(MockPlanner::new(["a.rs"])))
            .build()
            .err()
            .unwrap();
        assert_eq!(err, CoreError::Config("coder is required".into()));
    }

    #[test]
    fn test_build_with_mocks() {
        let mut config = OrchestratorConfig::default();
        config.max_debug_retries = 1;
        let core = AgentCoreBuilder::new()
            .with_config(config)
            .with_planner(Arc::new(MockPlanner::new(["a.rs"])))
            .with_coder(Arc::new(MockCoder::new()))
            .with_tester(Arc::new(MockTester::always(true)))
            .with_debugger(Arc::new(MockDebugger::new()))
            .build()
            .unwrap();
        assert_eq!(core.config().max_debug_retries, 1);
        assert!(core.repository.is_none());
    }
}
