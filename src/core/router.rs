//! 反馈路由
//!
//! 校验提交者、把已分类的反馈按优先级放入对应任务的队列、发出受理通知，
//! 并唤醒正在 await_feedback 的等待者。每个任务同一时间最多一个等待者。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::core::{CoreError, ProgressHub, TaskRegistry, TaskStatus};
use crate::task::{
    FeedbackId, FeedbackItem, FeedbackKind, FeedbackPriority, FeedbackUrgency, TaskId,
};

/// 一次反馈提交（分类字段由接入层解析好）
#[derive(Debug, Clone)]
pub struct FeedbackRequest {
    pub author_id: String,
    pub content: String,
    pub priority: FeedbackPriority,
    pub urgency: FeedbackUrgency,
    pub kind: FeedbackKind,
    pub target_file: Option<String>,
}

impl FeedbackRequest {
    pub fn new(author_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            content: content.into(),
            priority: FeedbackPriority::Normal,
            urgency: FeedbackUrgency::Normal,
            kind: FeedbackKind::General,
            target_file: None,
        }
    }

    pub fn priority(mut self, priority: FeedbackPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn urgency(mut self, urgency: FeedbackUrgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn kind(mut self, kind: FeedbackKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn target_file(mut self, path: impl Into<String>) -> Self {
        self.target_file = Some(path.into());
        self
    }
}

/// 受理通知的文案，按当前阶段区分（仅供展示）
fn acceptance_message(phase: TaskStatus, urgency: FeedbackUrgency, target: Option<&str>) -> String {
    let critical = urgency == FeedbackUrgency::Critical;
    let scope = target.map(|t| format!(" for {t}")).unwrap_or_default();
    match phase {
        TaskStatus::Pending | TaskStatus::Planning => {
            format!("Feedback{scope} received; it will be considered once the plan is ready")
        }
        TaskStatus::Coding if critical => {
            format!("Critical feedback{scope} received; applying it before the next file")
        }
        TaskStatus::Coding => format!("Feedback{scope} received; it will shape the next generated file"),
        TaskStatus::Testing if critical => {
            format!("Critical feedback{scope} received; the plan will be revised after the current test run")
        }
        TaskStatus::Testing => format!(
            "Feedback{scope} received; it will be used if another coding or debugging pass follows the tests"
        ),
        TaskStatus::Debugging => format!("Feedback{scope} received; it will inform the next fix attempt"),
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
            format!("Feedback{scope} received")
        }
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Option<String>>,
}

/// 反馈路由器
pub struct FeedbackRouter {
    registry: Arc<TaskRegistry>,
    progress: Arc<ProgressHub>,
    waiters: Mutex<HashMap<TaskId, Waiter>>,
    next_waiter: AtomicU64,
}

impl FeedbackRouter {
    pub fn new(registry: Arc<TaskRegistry>, progress: Arc<ProgressHub>) -> Self {
        Self {
            registry,
            progress,
            waiters: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(0),
        }
    }

    /// 提交反馈；任务不存在、提交者不是任务创建者或任务已结束时返回错误且不改动任何状态
    pub async fn try_submit(&self, task_id: &str, request: FeedbackRequest) -> Result<FeedbackId, CoreError> {
        let handle = self
            .registry
            .get(task_id)
            .await
            .ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        if handle.owner() != request.author_id {
            tracing::warn!(task_id = %task_id, author = %request.author_id, "Feedback rejected: not the task owner");
            return Err(CoreError::Unauthorized(request.author_id));
        }

        let content = request.content.clone();
        let feedback_id = {
            let mut task = handle.write().await;
            if task.is_finished() {
                return Err(CoreError::TaskFinished(task_id.to_string()));
            }
            let item = FeedbackItem::new(task_id, request.content)
                .with_priority(request.priority)
                .with_urgency(request.urgency)
                .with_kind(request.kind)
                .with_target_file(request.target_file.clone());
            let feedback_id = item.id.clone();
            let position = task.feedback.push(item);
            if request.urgency == FeedbackUrgency::Critical {
                task.has_critical_feedback = true;
            }
            tracing::info!(
                task_id = %task_id,
                phase = %task.status,
                position,
                urgency = ?request.urgency,
                "Feedback queued"
            );

            let message = acceptance_message(task.status, request.urgency, request.target_file.as_deref());
            task.last_progress_at = Some(chrono::Utc::now().timestamp_millis());
            self.progress.emit(&task, &message, true);
            feedback_id
        };

        self.resolve_waiter(task_id, Some(content));
        Ok(feedback_id)
    }

    /// 布尔形式的提交
    pub async fn submit(&self, task_id: &str, request: FeedbackRequest) -> bool {
        self.try_submit(task_id, request).await.is_ok()
    }

    /// 等待该任务的下一条反馈；超时、任务结束或被新的等待者替换时返回 None
    pub async fn await_feedback(&self, task_id: &str, timeout: Duration) -> Option<String> {
        let handle = self.registry.get(task_id).await?;
        if handle.status().await.is_terminal() {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = self.lock_waiters().insert(task_id.to_string(), Waiter { id: waiter_id, tx }) {
            let _ = previous.tx.send(None);
        }
        // 插入期间任务可能刚被取消
        if handle.status().await.is_terminal() {
            self.release_own_waiter(task_id, waiter_id);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(content)) => content,
            Ok(Err(_)) => None,
            Err(_) => {
                self.release_own_waiter(task_id, waiter_id);
                tracing::debug!(task_id = %task_id, "Feedback wait timed out");
                None
            }
        }
    }

    /// 以 None 立即结束该任务的等待（任务取消 / 结束时调用）
    pub fn release_waiter(&self, task_id: &str) -> bool {
        match self.lock_waiters().remove(task_id) {
            Some(waiter) => {
                let _ = waiter.tx.send(None);
                true
            }
            None => false,
        }
    }

    /// 该任务的等待者仍是 waiter_id 时才以 None 结束它
    fn release_own_waiter(&self, task_id: &str, waiter_id: u64) -> bool {
        let mut waiters = self.lock_waiters();
        if waiters.get(task_id).map(|w| w.id) != Some(waiter_id) {
            return false;
        }
        match waiters.remove(task_id) {
            Some(waiter) => {
                let _ = waiter.tx.send(None);
                true
            }
            None => false,
        }
    }

    pub fn has_waiter(&self, task_id: &str) -> bool {
        self.lock_waiters().contains_key(task_id)
    }

    fn resolve_waiter(&self, task_id: &str, content: Option<String>) {
        if let Some(waiter) = self.lock_waiters().remove(task_id) {
            let _ = waiter.tx.send(content);
        }
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Waiter>> {
        match self.waiters.lock() {
            Ok(waiters) => waiters,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn setup() -> (Arc<TaskRegistry>, FeedbackRouter, String) {
        let registry = Arc::new(TaskRegistry::new());
        let router = FeedbackRouter::new(registry.clone(), Arc::new(ProgressHub::new()));
        let handle = registry.create("todo app".into(), "alice").await;
        let id = handle.id().to_string();
        (registry, router, id)
    }

    #[tokio::test]
    async fn test_submit_unknown_task_fails() {
        let (registry, router, _) = setup().await;
        let err = router
            .try_submit("task_missing", FeedbackRequest::new("alice", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_submit_wrong_owner_does_not_mutate() {
        let (registry, router, id) = setup().await;
        assert!(!router.submit(&id, FeedbackRequest::new("mallory", "hi")).await);
        let task = registry.get(&id).await.unwrap().snapshot().await;
        assert!(task.feedback.is_empty());
        assert!(task.last_progress_at.is_none());
    }

    #[tokio::test]
    async fn test_critical_submission_sets_flag() {
        let (registry, router, id) = setup().await;
        let request = FeedbackRequest::new("alice", "use postgres")
            .urgency(FeedbackUrgency::Critical)
            .kind(FeedbackKind::Plan);
        assert!(router.submit(&id, request).await);
        let task = registry.get(&id).await.unwrap().snapshot().await;
        assert!(task.has_critical_feedback);
        assert_eq!(task.feedback.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejected_once_terminal() {
        let (registry, router, id) = setup().await;
        let handle = registry.get(&id).await.unwrap();
        handle.write().await.transition_to(TaskStatus::Cancelled).unwrap();
        let err = router.try_submit(&id, FeedbackRequest::new("alice", "hi")).await.unwrap_err();
        assert!(matches!(err, CoreError::TaskFinished(_)));
    }

    #[tokio::test]
    async fn test_await_feedback_times_out() {
        let (_registry, router, id) = setup().await;
        let start = Instant::now();
        let result = router.await_feedback(&id, Duration::from_millis(50)).await;
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!router.has_waiter(&id));
    }

    #[tokio::test]
    async fn test_await_feedback_resolved_by_submission() {
        let (_registry, router, id) = setup().await;
        let router = Arc::new(router);
        let waiter = {
            let router = router.clone();
            let id = id.clone();
            tokio::spawn(async move { router.await_feedback(&id, Duration::from_secs(5)).await })
        };
        while !router.has_waiter(&id) {
            tokio::task::yield_now().await;
        }
        assert!(router.submit(&id, FeedbackRequest::new("alice", "make it blue")).await);
        assert_eq!(waiter.await.unwrap().as_deref(), Some("make it blue"));
    }

    #[tokio::test]
    async fn test_second_waiter_replaces_first() {
        let (_registry, router, id) = setup().await;
        let router = Arc::new(router);
        let first = {
            let router = router.clone();
            let id = id.clone();
            tokio::spawn(async move { router.await_feedback(&id, Duration::from_secs(5)).await })
        };
        while !router.has_waiter(&id) {
            tokio::task::yield_now().await;
        }
        let second = {
            let router = router.clone();
            let id = id.clone();
            tokio::spawn(async move { router.await_feedback(&id, Duration::from_secs(5)).await })
        };
        assert_eq!(first.await.unwrap(), None);
        while !router.has_waiter(&id) {
            tokio::task::yield_now().await;
        }
        router.submit(&id, FeedbackRequest::new("alice", "second")).await;
        assert_eq!(second.await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_stale_waiter_cannot_release_its_replacement() {
        let (_registry, router, id) = setup().await;
        let router = Arc::new(router);
        let first = {
            let router = router.clone();
            let id = id.clone();
            tokio::spawn(async move { router.await_feedback(&id, Duration::from_secs(5)).await })
        };
        while !router.has_waiter(&id) {
            tokio::task::yield_now().await;
        }
        let second = {
            let router = router.clone();
            let id = id.clone();
            tokio::spawn(async move { router.await_feedback(&id, Duration::from_secs(5)).await })
        };
        assert_eq!(first.await.unwrap(), None);
        while !router.has_waiter(&id) {
            tokio::task::yield_now().await;
        }

        // 第一个等待者的 ID 为 0，已被替换
        assert!(!router.release_own_waiter(&id, 0));
        assert!(router.has_waiter(&id));
        router.submit(&id, FeedbackRequest::new("alice", "still listening")).await;
        assert_eq!(second.await.unwrap().as_deref(), Some("still listening"));
    }

    #[test]
    fn test_testing_acknowledgement_does_not_promise_application() {
        let message = acceptance_message(TaskStatus::Testing, FeedbackUrgency::Normal, None);
        assert!(!message.contains("will be applied"));
        assert!(message.contains("another coding or debugging pass"));
    }

    #[tokio::test]
    async fn test_release_waiter_resolves_none() {
        let (_registry, router, id) = setup().await;
        let router = Arc::new(router);
        let waiter = {
            let router = router.clone();
            let id = id.clone();
            tokio::spawn(async move { router.await_feedback(&id, Duration::from_secs(5)).await })
        };
        while !router.has_waiter(&id) {
            tokio::task::yield_now().await;
        }
        assert!(router.release_waiter(&id));
        assert_eq!(waiter.await.unwrap(), None);
    }
}
