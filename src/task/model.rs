//! 任务聚合：标识、需求、阶段、计划、反馈队列、错误日志与时间戳

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, TaskStatus};
use crate::task::{ErrorLog, FeedbackQueue};

/// 任务 ID
pub type TaskId = String;

/// 任务需求：自由文本，或指向某个代码仓库的改动请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskSpec {
    Freeform(String),
    Repository {
        /// 仓库地址（如 owner/name 或 URL）
        repository: String,
        description: String,
    },
}

impl TaskSpec {
    /// 需求的文字描述
    pub fn description(&self) -> &str {
        match self {
            Self::Freeform(text) => text,
            Self::Repository { description, .. } => description,
        }
    }

    pub fn is_repository(&self) -> bool {
        matches!(self, Self::Repository { .. })
    }
}

impl From<&str> for TaskSpec {
    fn from(text: &str) -> Self {
        Self::Freeform(text.to_string())
    }
}

impl From<String> for TaskSpec {
    fn from(text: String) -> Self {
        Self::Freeform(text)
    }
}

/// 文件 / 步骤的生成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WorkStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Error,
}

/// 计划中的单个文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTask {
    pub path: String,
    pub description: String,
    pub content: Option<String>,
    pub status: WorkStatus,
    pub dependencies: Vec<String>,
    /// 重新规划后需要再次生成
    pub needs_update: bool,
}

impl FileTask {
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
            content: None,
            status: WorkStatus::Pending,
            dependencies: Vec::new(),
            needs_update: false,
        }
    }

    /// 本轮 Coding 是否需要（重新）生成
    pub fn needs_generation(&self) -> bool {
        self.needs_update || self.status != WorkStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    pub status: WorkStatus,
}

impl Step {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: WorkStatus::Pending,
        }
    }
}

/// Planner 产出的结构化计划
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub description: String,
    pub technologies: Vec<String>,
    pub dependencies: Vec<String>,
    pub dev_dependencies: Vec<String>,
    pub files: Vec<FileTask>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, file: FileTask) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn file(&self, path: &str) -> Option<&FileTask> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn file_mut(&mut self, path: &str) -> Option<&mut FileTask> {
        self.files.iter_mut().find(|f| f.path == path)
    }

    /// 将下一个未完成的步骤标记为完成
    pub fn complete_next_step(&mut self) -> Option<&Step> {
        let step = self.steps.iter_mut().find(|s| s.status != WorkStatus::Completed)?;
        step.status = WorkStatus::Completed;
        Some(step)
    }

    /// 合并重新规划的结果：沿用旧计划中已生成的内容，新增或改动的文件标记为需要生成
    pub fn merge_refactored(&mut self, refactored: Plan) {
        let mut files = Vec::with_capacity(refactored.files.len());
        for mut file in refactored.files {
            if let Some(old) = self.file(&file.path) {
                if file.content.is_none() && !file.needs_update {
                    file.content = old.content.clone();
                    file.status = old.status;
                }
            }
            files.push(file);
        }
        self.description = refactored.description;
        self.technologies = refactored.technologies;
        self.dependencies = refactored.dependencies;
        self.dev_dependencies = refactored.dev_dependencies;
        self.files = files;
        if !refactored.steps.is_empty() {
            self.steps = refactored.steps;
        }
    }
}

/// 一次端到端的生成请求及其可变生命周期状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// 创建者；只有创建者可以提交反馈
    pub owner: String,
    pub status: TaskStatus,
    pub spec: TaskSpec,
    pub plan: Option<Plan>,
    pub errors: ErrorLog,
    pub feedback: FeedbackQueue,
    /// 紧急反馈已到达但尚未能应用
    pub has_critical_feedback: bool,
    /// 正在并入当前生成步骤的反馈文本
    pub contextual_feedback: Vec<String>,
    /// 测试期间的紧急反馈要求完成前重新编码
    pub requires_recoding: bool,
    /// 仓库任务产出的 Pull Request 地址
    pub pull_request_url: Option<String>,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub last_progress_at: Option<i64>,
}

impl Task {
    pub fn new(owner: impl Into<String>, spec: TaskSpec) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            owner: owner.into(),
            status: TaskStatus::Pending,
            spec,
            plan: None,
            errors: ErrorLog::new(),
            feedback: FeedbackQueue::new(),
            has_critical_feedback: false,
            contextual_feedback: Vec::new(),
            requires_recoding: false,
            pull_request_url: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            started_at: None,
            ended_at: None,
            last_progress_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// 按状态机迁移；进入 Planning 记录 started_at，进入终态记录 ended_at（仅一次）
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = chrono::Utc::now().timestamp_millis();
        if next == TaskStatus::Planning && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// 执行耗时（毫秒），未开始时为 None
    pub fn elapsed_ms(&self) -> Option<i64> {
        let start = self.started_at?;
        let end = self
            .ended_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        Some(end - start)
    }
}
