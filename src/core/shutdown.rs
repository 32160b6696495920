//! 优雅关闭处理
//!
//! 收到 Ctrl+C / SIGTERM 后：取消所有运行中的任务（各自发出 Cancelled 终态通知）、中止淘汰定时器，
//! 清理任务按注册顺序执行，每个都有超时。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::AgentCore;

/// 关闭信号管理器
#[derive(Default)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
}

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        tracing::info!(reason = ?reason, "Shutdown requested");
        self.shutdown_token.cancel();
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：管理多个清理任务
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 单个清理任务的超时（秒）
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {}s", name, self.timeout_secs);
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 取消全部运行中任务并中止淘汰定时器
pub struct TaskCleanup {
    core: Arc<AgentCore>,
}

impl TaskCleanup {
    pub fn new(core: Arc<AgentCore>) -> Self {
        Self { core }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for TaskCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let cancelled = self.core.cancel_all().await;
        self.core.registry().abort_evictions();
        tracing::info!(cancelled, "Running tasks cancelled");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Tasks"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{MockCoder, MockDebugger, MockPlanner, MockTester};
    use crate::core::{AgentCoreBuilder, TaskStatus};

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_after_signal() {
        let manager = Arc::new(ShutdownManager::new());
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.wait_for_shutdown().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        manager.shutdown(ShutdownReason::Signal);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_task_cleanup_cancels_running_tasks() {
        let core = Arc::new(
            AgentCoreBuilder::new()
                .with_planner(Arc::new(MockPlanner::new(["a.rs"])))
                .with_coder(Arc::new(MockCoder::new()))
                .with_tester(Arc::new(MockTester::always(true)))
                .with_debugger(Arc::new(MockDebugger::new()))
                .build()
                .unwrap(),
        );
        let task = core.create_task("alice", "x".into()).await;

        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(TaskCleanup::new(core.clone()));
        coordinator.run_cleanup().await;

        let task = core.get_task(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(core.registry().pending_evictions(), 0);
    }
}
