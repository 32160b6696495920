//! 任务编排器（AgentCore）：驱动单个任务走完阶段状态机
//!
//! Planning → Coding → Testing → {Debugging ⇄ Testing} → Completed。
//! 阶段之间与每个文件生成前检查反馈队列；整个运行包在全局超时里，超时或取消时丢弃正在进行的协作者调用，
//! 并通过任务的 CancellationToken 通知协作者。终态通知在持有任务写锁时发出，查询方看到终态前通知已送达。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agents::{Coder, Debugger, Planner, RepositoryExecutor, Tester};
use crate::config::OrchestratorConfig;
use crate::core::checkpoint::{self, ReplanRequest};
use crate::core::{
    CoreError, FeedbackRequest, FeedbackRouter, ListenerId, ProgressHub, ProgressListener,
    TaskHandle, TaskRegistry, TaskStatus,
};
use crate::task::{
    ErrorKind, ErrorRecord, FeedbackId, FeedbackStatus, Task, TaskSpec, WorkStatus,
};

/// 一次运行的结局
enum Outcome {
    Completed,
    Failed { record: ErrorRecord, summary: String },
    /// 已由 cancel_task 落为终态
    Cancelled,
}

/// 测试 / 调试循环的结局
enum TestCycle {
    Passed,
    /// 紧急反馈要求重新编码
    Recode,
    Stop(Outcome),
}

/// 编排核心：任务注册表、反馈路由、进度扇出与协作者的组合
pub struct AgentCore {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) progress: Arc<ProgressHub>,
    pub(crate) router: FeedbackRouter,
    pub(crate) planner: Arc<dyn Planner>,
    pub(crate) coder: Arc<dyn Coder>,
    pub(crate) tester: Arc<dyn Tester>,
    pub(crate) debugger: Arc<dyn Debugger>,
    pub(crate) repository: Option<Arc<dyn RepositoryExecutor>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl AgentCore {
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &FeedbackRouter {
        &self.router
    }

    // ---- 控制面 ----

    /// 创建 Pending 任务，返回其快照
    pub async fn create_task(&self, owner: &str, spec: TaskSpec) -> Task {
        self.registry.create(spec, owner).await.snapshot().await
    }

    pub async fn get_task(&self, id: &str) -> Option<Task> {
        Some(self.registry.get(id).await?.snapshot().await)
    }

    /// 在 tokio 运行时上后台运行任务
    pub fn spawn_task(self: &Arc<Self>, id: &str) -> JoinHandle<Result<TaskStatus, CoreError>> {
        let core = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move { core.run_task(&id).await })
    }

    /// 取消任务；任务不存在或已结束时返回 false
    pub async fn cancel_task(&self, id: &str) -> bool {
        let Some(handle) = self.registry.get(id).await else {
            return false;
        };
        {
            let mut task = handle.write().await;
            if task.transition_to(TaskStatus::Cancelled).is_err() {
                return false;
            }
            task.errors
                .record(ErrorRecord::new(ErrorKind::Cancelled, "Task cancelled by user"));
            task.feedback.reject_unsettled();
            task.last_progress_at = Some(now_ms());
            tracing::info!(task_id = %id, "Task cancelled");
            self.progress.emit(&task, "Task cancelled", false);
        }
        handle.cancel_token().cancel();
        self.router.release_waiter(id);
        self.registry.schedule_eviction(id, self.config.eviction_grace);
        true
    }

    /// 取消所有未结束的任务（关闭时调用），返回取消数量
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for handle in self.registry.handles().await {
            if self.cancel_task(handle.id()).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn try_submit_feedback(&self, id: &str, request: FeedbackRequest) -> Result<FeedbackId, CoreError> {
        self.router.try_submit(id, request).await
    }

    pub async fn submit_feedback(&self, id: &str, request: FeedbackRequest) -> bool {
        self.router.submit(id, request).await
    }

    /// 等待下一条反馈；timeout 为 None 时使用配置的默认时长
    pub async fn await_feedback(&self, id: &str, timeout: Option<std::time::Duration>) -> Option<String> {
        self.router
            .await_feedback(id, timeout.unwrap_or(self.config.feedback_wait))
            .await
    }

    pub fn add_progress_listener<L: ProgressListener + 'static>(&self, listener: L) -> ListenerId {
        self.progress.add(listener)
    }

    pub fn remove_progress_listener(&self, id: ListenerId) -> bool {
        self.progress.remove(id)
    }

    /// 人类可读的状态摘要
    pub async fn status_report(&self, id: &str) -> Option<String> {
        let task = self.get_task(id).await?;
        let mut report = format!("Task {} [{}]", task.id, task.status);
        if let Some(plan) = &task.plan {
            let done = plan
                .files
                .iter()
                .filter(|f| f.status == WorkStatus::Completed)
                .count();
            report.push_str(&format!(", {}/{} files generated", done, plan.files.len()));
        }
        let pending = task
            .feedback
            .items()
            .iter()
            .filter(|it| it.status == FeedbackStatus::Pending)
            .count();
        report.push_str(&format!(
            ", {} errors, {} feedback ({} pending)",
            task.errors.len(),
            task.feedback.len(),
            pending
        ));
        if let Some(url) = &task.pull_request_url {
            report.push_str(&format!(", PR: {url}"));
        }
        if let Some(elapsed) = task.elapsed_ms() {
            report.push_str(&format!(", {:.1}s elapsed", elapsed as f64 / 1000.0));
        }
        Some(report)
    }

    // ---- 运行 ----

    /// 运行任务直到终态，返回终态
    pub async fn run_task(&self, id: &str) -> Result<TaskStatus, CoreError> {
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        {
            let task = handle.read().await;
            if task.is_finished() {
                return Err(CoreError::TaskFinished(id.to_string()));
            }
            if task.status != TaskStatus::Pending {
                return Err(CoreError::InvalidTransition {
                    from: task.status,
                    to: TaskStatus::Planning,
                });
            }
        }

        let cancel = handle.cancel_token();
        if !self.enter_phase(&handle, TaskStatus::Planning, "Planning project").await {
            return Ok(handle.status().await);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            result = tokio::time::timeout(self.config.execution_timeout, self.drive(&handle, &cancel)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        cancel.cancel();
                        let secs = self.config.execution_timeout.as_secs_f64();
                        Outcome::Failed {
                            record: ErrorRecord::new(
                                ErrorKind::Timeout,
                                format!("Execution exceeded {secs:.1}s"),
                            ),
                            summary: format!("Task timed out after {secs:.1}s"),
                        }
                    }
                }
            }
        };

        match outcome {
            Outcome::Completed => {
                self.finish(&handle, TaskStatus::Completed, None, "Task completed").await;
            }
            Outcome::Failed { record, summary } => {
                self.finish(&handle, TaskStatus::Failed, Some(record), &summary).await;
            }
            Outcome::Cancelled => {}
        }
        Ok(handle.status().await)
    }

    async fn drive(&self, handle: &TaskHandle, cancel: &CancellationToken) -> Outcome {
        if let Err(outcome) = self.plan_phase(handle, cancel).await {
            return outcome;
        }
        if !self.enter_phase(handle, TaskStatus::Coding, "Generating code").await {
            return Outcome::Cancelled;
        }

        loop {
            if let Err(outcome) = self.code_phase(handle, cancel).await {
                return outcome;
            }
            if !self.enter_phase(handle, TaskStatus::Testing, "Running tests").await {
                return Outcome::Cancelled;
            }
            match self.test_cycle(handle, cancel).await {
                TestCycle::Passed => {
                    // 完成前检查：测试期间的紧急反馈要求重新编码
                    if !self.take_recoding(handle).await {
                        return Outcome::Completed;
                    }
                }
                TestCycle::Recode => {
                    self.take_recoding(handle).await;
                }
                TestCycle::Stop(outcome) => return outcome,
            }
            if !self
                .enter_phase(handle, TaskStatus::Coding, "Re-generating files affected by feedback")
                .await
            {
                return Outcome::Cancelled;
            }
        }
    }

    async fn plan_phase(&self, handle: &TaskHandle, cancel: &CancellationToken) -> Result<(), Outcome> {
        let snapshot = self
            .checkpoint_snapshot(handle, TaskStatus::Planning, None)
            .await
            .ok_or(Outcome::Cancelled)?;

        if let TaskSpec::Repository { repository, .. } = &snapshot.spec {
            self.notify(handle, &format!("Preparing repository {repository}")).await;
            return Ok(());
        }

        match self.planner.create_plan(&snapshot, cancel).await {
            Ok(mut plan) => {
                plan.complete_next_step();
                let files = plan.files.len();
                {
                    let mut task = handle.write().await;
                    task.plan = Some(plan);
                    task.feedback.settle_processing(TaskStatus::Planning);
                }
                self.notify(handle, &format!("Plan ready with {files} files")).await;
                Ok(())
            }
            Err(e) => Err(Outcome::Failed {
                summary: format!("Planning failed: {}", e.message),
                record: ErrorRecord::from_collaborator(ErrorKind::PlanningFailure, &e),
            }),
        }
    }

    async fn code_phase(&self, handle: &TaskHandle, cancel: &CancellationToken) -> Result<(), Outcome> {
        let spec = handle.read().await.spec.clone();
        if spec.is_repository() {
            return self.repository_phase(handle, cancel).await;
        }

        let targets: Vec<String> = handle
            .read()
            .await
            .plan
            .as_ref()
            .map(|plan| {
                plan.files
                    .iter()
                    .filter(|f| f.needs_generation())
                    .map(|f| f.path.clone())
                    .collect()
            })
            .unwrap_or_default();
        let total = targets.len();

        for (i, path) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Outcome::Cancelled);
            }
            let snapshot = self
                .checkpoint_snapshot(handle, TaskStatus::Coding, Some(path))
                .await
                .ok_or(Outcome::Cancelled)?;
            let Some(file) = snapshot.plan.as_ref().and_then(|p| p.file(path)).cloned() else {
                continue;
            };
            self.notify(handle, &format!("Generating {} ({}/{})", path, i + 1, total)).await;

            let result = self.coder.generate_file(&snapshot, &file, cancel).await;
            let mut task = handle.write().await;
            if task.is_finished() {
                return Err(Outcome::Cancelled);
            }
            match result {
                Ok(content) => {
                    if let Some(f) = task.plan.as_mut().and_then(|p| p.file_mut(path)) {
                        f.content = Some(content);
                        f.status = WorkStatus::Completed;
                        f.needs_update = false;
                    }
                    task.feedback.settle_processing(TaskStatus::Coding);
                }
                Err(e) => {
                    tracing::warn!(task_id = %task.id, file = %path, "File generation failed: {}", e);
                    if let Some(f) = task.plan.as_mut().and_then(|p| p.file_mut(path)) {
                        f.status = WorkStatus::Error;
                    }
                    let mut record = ErrorRecord::from_collaborator(ErrorKind::GenerationFailure, &e);
                    if record.file_path.is_none() {
                        record = record.with_file(path.clone());
                    }
                    task.errors.record(record);
                    task.last_progress_at = Some(now_ms());
                    self.progress
                        .emit(&task, &format!("Failed to generate {path}: {}", e.message), true);
                }
            }
        }

        let snapshot = self.call_snapshot(handle).await.ok_or(Outcome::Cancelled)?;
        if let Err(e) = self.coder.install_dependencies(&snapshot, cancel).await {
            tracing::warn!(task_id = %snapshot.id, "Dependency installation failed: {}", e);
            let mut task = handle.write().await;
            task.errors
                .record(ErrorRecord::from_collaborator(ErrorKind::GenerationFailure, &e));
        }
        let mut task = handle.write().await;
        if let Some(plan) = task.plan.as_mut() {
            plan.complete_next_step();
        }
        Ok(())
    }

    /// 仓库任务：由 RepositoryExecutor 完成 clone / branch / commit / push / PR
    async fn repository_phase(&self, handle: &TaskHandle, cancel: &CancellationToken) -> Result<(), Outcome> {
        let Some(executor) = self.repository.clone() else {
            return Err(Outcome::Failed {
                record: ErrorRecord::new(ErrorKind::GenerationFailure, "No repository executor configured"),
                summary: "Repository tasks are not supported by this deployment".to_string(),
            });
        };
        let snapshot = self
            .checkpoint_snapshot(handle, TaskStatus::Coding, None)
            .await
            .ok_or(Outcome::Cancelled)?;
        match executor.execute(&snapshot, cancel).await {
            Ok(url) => {
                {
                    let mut task = handle.write().await;
                    task.pull_request_url = Some(url.clone());
                    task.feedback.settle_processing(TaskStatus::Coding);
                }
                self.notify(handle, &format!("Pull request opened: {url}")).await;
                Ok(())
            }
            Err(e) => Err(Outcome::Failed {
                summary: format!("Repository update failed: {}", e.message),
                record: ErrorRecord::from_collaborator(ErrorKind::GenerationFailure, &e),
            }),
        }
    }

    /// 测试，失败则进入有界的调试循环
    async fn test_cycle(&self, handle: &TaskHandle, cancel: &CancellationToken) -> TestCycle {
        let mut failure: Option<usize> = None;
        let mut attempts = 0u32;

        loop {
            let Some(snapshot) = self.call_snapshot(handle).await else {
                return TestCycle::Stop(Outcome::Cancelled);
            };
            let result = self.tester.run_tests(&snapshot, cancel).await;

            // 测试结束后的阶段边界：处理测试期间到达的反馈
            if let Err(outcome) = self.post_test_checkpoint(handle, cancel).await {
                return TestCycle::Stop(outcome);
            }

            if result.success {
                let mut task = handle.write().await;
                if let Some(plan) = task.plan.as_mut() {
                    plan.complete_next_step();
                }
                drop(task);
                self.notify(handle, "Tests passed").await;
                return TestCycle::Passed;
            }

            let (index, recode) = {
                let mut task = handle.write().await;
                if task.is_finished() {
                    return TestCycle::Stop(Outcome::Cancelled);
                }
                let index = match failure {
                    Some(index) => {
                        task.errors.refresh_message(index, result.output.clone());
                        index
                    }
                    None => task
                        .errors
                        .record(ErrorRecord::new(ErrorKind::TestFailure, result.output.clone())),
                };
                (index, task.requires_recoding)
            };
            failure = Some(index);

            if recode {
                return TestCycle::Recode;
            }
            if attempts >= self.config.max_debug_retries {
                return TestCycle::Stop(Outcome::Failed {
                    record: ErrorRecord::new(
                        ErrorKind::DebugExhausted,
                        format!("Tests still failing after {attempts} debug attempts: {}", result.output),
                    ),
                    summary: format!("Debugging gave up after {attempts} attempts: {}", result.output),
                });
            }

            if !self
                .enter_phase(handle, TaskStatus::Debugging, &format!("Tests failed, debugging: {}", result.output))
                .await
            {
                return TestCycle::Stop(Outcome::Cancelled);
            }
            let Some(snapshot) = self.checkpoint_snapshot(handle, TaskStatus::Debugging, None).await else {
                return TestCycle::Stop(Outcome::Cancelled);
            };
            let mut record = match snapshot.errors.get(index) {
                Some(record) => record.clone(),
                None => ErrorRecord::new(ErrorKind::TestFailure, result.output.clone()),
            };
            {
                let mut task = handle.write().await;
                if let Some(count) = task.errors.increment_attempts(index) {
                    record.attempts = count;
                }
            }
            attempts += 1;

            let applied = self.debugger.fix_error(&snapshot, &record, cancel).await;
            {
                let mut task = handle.write().await;
                task.feedback.settle_processing(TaskStatus::Debugging);
            }
            self.notify(
                handle,
                &format!(
                    "Debug attempt {}/{} {}",
                    attempts,
                    self.config.max_debug_retries,
                    if applied { "applied a fix" } else { "found no fix" }
                ),
            )
            .await;

            if !self.enter_phase(handle, TaskStatus::Testing, "Re-running tests").await {
                return TestCycle::Stop(Outcome::Cancelled);
            }
        }
    }

    /// Testing 边界检查点；紧急反馈触发重新规划
    async fn post_test_checkpoint(&self, handle: &TaskHandle, cancel: &CancellationToken) -> Result<(), Outcome> {
        let replan = {
            let mut task = handle.write().await;
            if task.is_finished() {
                return Err(Outcome::Cancelled);
            }
            checkpoint::evaluate(&mut task, TaskStatus::Testing, None).replan
        };
        if let Some(request) = replan {
            self.replan(handle, request, cancel).await?;
        }
        Ok(())
    }

    async fn replan(&self, handle: &TaskHandle, request: ReplanRequest, cancel: &CancellationToken) -> Result<(), Outcome> {
        let snapshot = self.call_snapshot(handle).await.ok_or(Outcome::Cancelled)?;
        let result = self
            .planner
            .refactor(&snapshot, &request.instructions, cancel)
            .await;

        let mut task = handle.write().await;
        if task.is_finished() {
            return Err(Outcome::Cancelled);
        }
        match result {
            Ok(plan) => {
                match task.plan.as_mut() {
                    Some(current) => current.merge_refactored(plan),
                    None => task.plan = Some(plan),
                }
                task.requires_recoding = true;
                for id in &request.feedback_ids {
                    if let Some(index) = task.feedback.position(id) {
                        task.feedback.mark_applied(index, TaskStatus::Testing);
                    }
                }
                task.last_progress_at = Some(now_ms());
                tracing::info!(task_id = %task.id, "Plan revised from critical feedback");
                self.progress
                    .emit(&task, "Plan revised from critical feedback; affected files will be regenerated", true);
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, "Re-planning failed: {}", e);
                for id in &request.feedback_ids {
                    if let Some(index) = task.feedback.position(id) {
                        task.feedback.mark_rejected(index);
                    }
                }
                task.errors
                    .record(ErrorRecord::from_collaborator(ErrorKind::PlanningFailure, &e));
            }
        }
        task.feedback.advance_cursor();
        Ok(())
    }

    /// 取走 requires_recoding 标记
    async fn take_recoding(&self, handle: &TaskHandle) -> bool {
        let mut task = handle.write().await;
        std::mem::replace(&mut task.requires_recoding, false)
    }

    // ---- 辅助 ----

    /// 迁移阶段并发出进度通知；任务已是终态（被取消）时返回 false
    async fn enter_phase(&self, handle: &TaskHandle, next: TaskStatus, message: &str) -> bool {
        let mut task = handle.write().await;
        if let Err(e) = task.transition_to(next) {
            tracing::debug!(task_id = %task.id, "Phase change skipped: {}", e);
            return false;
        }
        task.last_progress_at = Some(now_ms());
        tracing::info!(task_id = %task.id, phase = %next, "Phase entered");
        self.progress.emit(&task, message, true);
        true
    }

    /// 落入终态并发出最终通知，随后登记淘汰
    async fn finish(&self, handle: &TaskHandle, status: TaskStatus, record: Option<ErrorRecord>, summary: &str) -> bool {
        {
            let mut task = handle.write().await;
            if task.is_finished() {
                return false;
            }
            if let Some(record) = record {
                task.errors.record(record);
            }
            if task.transition_to(status).is_err() {
                return false;
            }
            if status == TaskStatus::Completed {
                if let Some(plan) = task.plan.as_mut() {
                    while plan.complete_next_step().is_some() {}
                }
            }
            // 之后不再有协作者调用，未落定的反馈不会被应用
            let rejected = task.feedback.reject_unsettled();
            if rejected > 0 {
                tracing::info!(task_id = %task.id, rejected, "Unapplied feedback rejected at finish");
            }
            task.last_progress_at = Some(now_ms());
            match status {
                TaskStatus::Completed => tracing::info!(task_id = %task.id, "Task completed"),
                _ => tracing::warn!(task_id = %task.id, status = %status, "Task ended: {}", summary),
            }
            self.progress.emit(&task, summary, false);
        }
        self.router.release_waiter(handle.id());
        self.registry
            .schedule_eviction(handle.id(), self.config.eviction_grace);
        true
    }

    /// 发出一条中间进度通知
    async fn notify(&self, handle: &TaskHandle, message: &str) {
        let mut task = handle.write().await;
        if task.is_finished() {
            return;
        }
        task.last_progress_at = Some(now_ms());
        self.progress.emit(&task, message, true);
    }

    /// 运行检查点后取快照，供下一次协作者调用；任务已结束时返回 None
    async fn checkpoint_snapshot(&self, handle: &TaskHandle, phase: TaskStatus, file: Option<&str>) -> Option<Task> {
        let mut task = handle.write().await;
        if task.is_finished() {
            return None;
        }
        checkpoint::evaluate(&mut task, phase, file);
        if let Some(path) = file {
            if let Some(f) = task.plan.as_mut().and_then(|p| p.file_mut(path)) {
                f.status = WorkStatus::InProgress;
            }
        }
        Some(task.clone())
    }

    async fn call_snapshot(&self, handle: &TaskHandle) -> Option<Task> {
        let task = handle.read().await;
        if task.is_finished() {
            None
        } else {
            Some(task.clone())
        }
    }
}
