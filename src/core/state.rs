//! 任务阶段与状态机
//!
//! Pending → Planning → Coding → Testing → {Debugging ⇄ Testing} → Completed；
//! Failed / Cancelled 可从任意非终态进入。Testing → Coding 仅用于关键反馈触发的重新编码。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 任务状态（即当前阶段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 已创建，尚未运行
    Pending,
    Planning,
    Coding,
    Testing,
    Debugging,
    /// 终态：成功完成
    Completed,
    /// 终态：失败（规划失败 / 调试耗尽 / 超时）
    Failed,
    /// 终态：用户取消
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// 状态机允许的迁移
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Planning)
                | (Planning, Coding)
                | (Coding, Testing)
                | (Testing, Debugging)
                | (Testing, Completed)
                | (Testing, Coding)
                | (Debugging, Testing)
        )
    }

    /// 反馈记录里使用的小写阶段名（appliedPhase）
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Coding => "coding",
            Self::Testing => "testing",
            Self::Debugging => "debugging",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
