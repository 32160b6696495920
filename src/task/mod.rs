//! 任务数据模型：Task 聚合、反馈队列、错误日志

pub mod error_log;
pub mod feedback;
pub mod model;

pub use error_log::{ErrorKind, ErrorLog, ErrorRecord};
pub use feedback::{
    FeedbackId, FeedbackItem, FeedbackKind, FeedbackPriority, FeedbackQueue, FeedbackStatus,
    FeedbackUrgency,
};
pub use model::{FileTask, Plan, Step, Task, TaskId, TaskSpec, WorkStatus};
