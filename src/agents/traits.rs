//! 协作者抽象
//!
//! 编排器只依赖这些 trait，不依赖具体实现；生产实现（调用大模型、执行命令、操作 Git）与测试替身可自由替换。
//! 每个调用都会收到任务的 CancellationToken：超时或用户取消时 token 被触发，实现应尽快放弃当前工作。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::CollaboratorError;
use crate::task::{ErrorRecord, FileTask, Plan, Task};

/// 测试运行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub success: bool,
    pub output: String,
}

impl TestOutcome {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// 规划：根据需求生成计划，或把反馈并入现有计划
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Plan, CollaboratorError>;

    /// 把 instructions 合入当前计划后重新规划
    async fn refactor(
        &self,
        task: &Task,
        instructions: &str,
        cancel: &CancellationToken,
    ) -> Result<Plan, CollaboratorError>;
}

/// 编码：逐个生成文件，全部生成后安装依赖
#[async_trait]
pub trait Coder: Send + Sync {
    /// 返回生成的文件内容
    async fn generate_file(
        &self,
        task: &Task,
        file: &FileTask,
        cancel: &CancellationToken,
    ) -> Result<String, CollaboratorError>;

    async fn install_dependencies(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Tester: Send + Sync {
    async fn run_tests(&self, task: &Task, cancel: &CancellationToken) -> TestOutcome;
}

/// 调试：针对一条错误记录尝试修复，返回是否应用了修改
#[async_trait]
pub trait Debugger: Send + Sync {
    async fn fix_error(&self, task: &Task, error: &ErrorRecord, cancel: &CancellationToken) -> bool;
}

/// 仓库任务执行器：clone / branch / commit / push / PR，返回 Pull Request 地址
#[async_trait]
pub trait RepositoryExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<String, CollaboratorError>;
}
