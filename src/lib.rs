//! CodeFlow - 代码生成任务编排核心
//!
//! 模块划分：
//! - **agents**: 协作者抽象（Planner / Coder / Tester / Debugger / RepositoryExecutor）与 Mock 实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、任务注册表、反馈路由与检查点、编排器、进度通知、优雅关闭
//! - **observability**: 日志初始化
//! - **task**: 任务数据模型（Task、反馈队列、错误日志）

pub mod agents;
pub mod config;
pub mod core;
pub mod observability;
pub mod task;

pub use crate::core::{AgentCore, AgentCoreBuilder, CoreError, FeedbackRequest, TaskStatus};
pub use crate::task::{Task, TaskSpec};
