//! 任务注册表
//!
//! 活跃任务的并发安全映射，是任务生命周期（创建 / 淘汰）的唯一权威。
//! 终态任务在宽限期后被淘汰：淘汰是注册表登记在案的定时事件，可被查询、覆盖或统一中止。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::TaskStatus;
use crate::task::{Task, TaskId, TaskSpec};

/// 注册表中的单个任务：一把锁保护任务全部可变状态，外加取消令牌
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    owner: String,
    state: RwLock<Task>,
    cancel: CancellationToken,
}

impl TaskHandle {
    fn new(task: Task) -> Self {
        Self {
            id: task.id.clone(),
            owner: task.owner.clone(),
            state: RwLock::new(task),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 任务级取消令牌：超时或取消时触发，传给协作者
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Task> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Task> {
        self.state.write().await
    }

    /// 一致性快照
    pub async fn snapshot(&self) -> Task {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> TaskStatus {
        self.state.read().await.status
    }
}

/// 任务注册表
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<TaskHandle>>>,
    /// 已登记的淘汰定时器
    evictions: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建 Pending 状态的任务并登记
    pub async fn create(&self, spec: TaskSpec, owner: &str) -> Arc<TaskHandle> {
        let handle = Arc::new(TaskHandle::new(Task::new(owner, spec)));
        self.tasks
            .write()
            .await
            .insert(handle.id.clone(), Arc::clone(&handle));
        tracing::info!(task_id = %handle.id, owner = %owner, "Task created");
        handle
    }

    pub async fn get(&self, id: &str) -> Option<Arc<TaskHandle>> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.tasks.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// 所有任务句柄
    pub async fn handles(&self) -> Vec<Arc<TaskHandle>> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// 某用户的全部任务快照（按创建时间排序）
    pub async fn list_by_owner(&self, owner: &str) -> Vec<Task> {
        let handles: Vec<_> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|h| h.owner == owner)
            .cloned()
            .collect();
        let mut tasks = Vec::with_capacity(handles.len());
        for handle in handles {
            tasks.push(handle.snapshot().await);
        }
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// 移除终态任务；任务不存在或仍在运行时返回 false
    pub async fn evict(&self, id: &str) -> bool {
        if let Some(timer) = self.take_eviction(id) {
            timer.abort();
        }
        self.remove_if_terminal(id).await
    }

    async fn remove_if_terminal(&self, id: &str) -> bool {
        let Some(handle) = self.get(id).await else {
            return false;
        };
        if !handle.status().await.is_terminal() {
            tracing::warn!(task_id = %id, "Refusing to evict a running task");
            return false;
        }
        let removed = self.tasks.write().await.remove(id).is_some();
        if removed {
            tracing::info!(task_id = %id, "Task evicted");
        }
        removed
    }

    fn take_eviction(&self, id: &str) -> Option<JoinHandle<()>> {
        match self.evictions.lock() {
            Ok(mut timers) => timers.remove(id),
            Err(poisoned) => poisoned.into_inner().remove(id),
        }
    }

    /// 登记宽限期后的淘汰；同一任务重复登记时替换旧定时器
    pub fn schedule_eviction(self: &Arc<Self>, id: &str, grace: Duration) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let task_id = id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(registry) = registry.upgrade() {
                registry.take_eviction(&task_id);
                registry.remove_if_terminal(&task_id).await;
            }
        });
        let previous = match self.evictions.lock() {
            Ok(mut timers) => timers.insert(id.to_string(), timer),
            Err(poisoned) => poisoned.into_inner().insert(id.to_string(), timer),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::debug!(task_id = %id, grace_ms = grace.as_millis() as u64, "Eviction scheduled");
    }

    /// 待执行的淘汰数量
    pub fn pending_evictions(&self) -> usize {
        match self.evictions.lock() {
            Ok(timers) => timers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// 中止全部淘汰定时器（关闭时调用）
    pub fn abort_evictions(&self) {
        let timers: Vec<_> = match self.evictions.lock() {
            Ok(mut timers) => timers.drain().map(|(_, t)| t).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, t)| t).collect(),
        };
        for timer in timers {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn finish(handle: &TaskHandle) {
        let mut task = handle.write().await;
        task.transition_to(TaskStatus::Cancelled).unwrap();
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = TaskRegistry::new();
        let handle = registry.create("todo app".into(), "alice").await;
        assert_eq!(handle.owner(), "alice");
        let found = registry.get(handle.id()).await.unwrap();
        assert_eq!(found.status().await, TaskStatus::Pending);
        assert!(registry.get("task_missing").await.is_none());
    }

    #[tokio::test]
    async fn test_evict_refuses_running_tasks() {
        let registry = TaskRegistry::new();
        let handle = registry.create("x".into(), "alice").await;
        assert!(!registry.evict(handle.id()).await);
        assert!(registry.contains(handle.id()).await);

        finish(&handle).await;
        assert!(registry.evict(handle.id()).await);
        assert!(!registry.evict(handle.id()).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_scheduled_eviction_after_grace() {
        let registry = Arc::new(TaskRegistry::new());
        let handle = registry.create("x".into(), "alice").await;
        finish(&handle).await;

        registry.schedule_eviction(handle.id(), Duration::from_millis(50));
        assert_eq!(registry.pending_evictions(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.get(handle.id()).await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(registry.get(handle.id()).await.is_none());
        assert_eq!(registry.pending_evictions(), 0);
    }

    #[tokio::test]
    async fn test_list_by_owner() {
        let registry = TaskRegistry::new();
        registry.create("a".into(), "alice").await;
        registry.create("b".into(), "bob").await;
        registry.create("c".into(), "alice").await;
        let tasks = registry.list_by_owner("alice").await;
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.owner == "alice"));
    }
}
