//! 控制面错误与协作者错误
//!
//! CoreError 由任务/反馈等控制面操作同步返回，不会改动任务状态；
//! CollaboratorError 由 Planner / Coder 等外部协作者返回，编排器将其记入任务的 ErrorLog。

use thiserror::Error;

use crate::core::TaskStatus;

/// 控制面操作失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0} does not own the task")]
    Unauthorized(String),

    /// 任务已到终态，不再接受反馈或运行请求
    #[error("Task already finished: {0}")]
    TaskFinished(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Config error: {0}")]
    Config(String),
}

/// 协作者（Planner / Coder / Tester / Debugger / RepositoryExecutor）调用失败
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
    pub stack_trace: Option<String>,
    /// 出错的文件（若能定位）
    pub file_path: Option<String>,
    pub line: Option<u32>,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, file_path: impl Into<String>, line: Option<u32>) -> Self {
        self.file_path = Some(file_path.into());
        self.line = line;
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

impl From<String> for CollaboratorError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for CollaboratorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
