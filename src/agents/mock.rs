//! Mock 协作者（用于测试与离线演示，无需模型 API）
//!
//! 行为可脚本化：指定计划中的文件、失败的文件、测试结果序列，并记录每次调用便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::{Coder, Debugger, Planner, RepositoryExecutor, TestOutcome, Tester};
use crate::core::CollaboratorError;
use crate::task::{ErrorRecord, FileTask, Plan, Step, Task};

/// 模拟耗时；取消时提前返回 false
async fn simulate_work(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn cancelled() -> CollaboratorError {
    CollaboratorError::new("cancelled")
}

/// 固定文件列表的 Planner；refactor 把指令中提到的文件（未提到则全部）标记为需要更新
#[derive(Debug, Default)]
pub struct MockPlanner {
    files: Vec<String>,
    fail: bool,
    refactors: Mutex<Vec<String>>,
}

impl MockPlanner {
    pub fn new<S: Into<String>>(files: impl IntoIterator<Item = S>) -> Self {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            fail: false,
            refactors: Mutex::new(Vec::new()),
        }
    }

    /// create_plan 总是失败
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// 收到过的 refactor 指令
    pub fn refactor_calls(&self) -> Vec<String> {
        self.refactors.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn create_plan(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Plan, CollaboratorError> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if self.fail {
            return Err(CollaboratorError::new("planner could not parse the request"));
        }
        let mut plan = Plan::new(task.spec.description())
            .with_step(Step::new("plan project"))
            .with_step(Step::new("generate files"))
            .with_step(Step::new("run tests"));
        for path in &self.files {
            plan = plan.with_file(FileTask::new(path, format!("implement {path}")));
        }
        Ok(plan)
    }

    async fn refactor(
        &self,
        task: &Task,
        instructions: &str,
        cancel: &CancellationToken,
    ) -> Result<Plan, CollaboratorError> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if let Ok(mut calls) = self.refactors.lock() {
            calls.push(instructions.to_string());
        }
        let mut plan = task.plan.clone().unwrap_or_default();
        let mentioned = plan.files.iter().any(|f| instructions.contains(&f.path));
        for file in plan.files.iter_mut() {
            if !mentioned || instructions.contains(&file.path) {
                file.needs_update = true;
            }
        }
        Ok(plan)
    }
}

/// 记录调用的 Coder，可指定失败文件与单文件耗时
#[derive(Debug, Default)]
pub struct MockCoder {
    fail_on: Vec<String>,
    delay: Duration,
    /// (文件路径, 调用时的 contextual_feedback)
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockCoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on<S: Into<String>>(mut self, paths: impl IntoIterator<Item = S>) -> Self {
        self.fail_on = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Coder for MockCoder {
    async fn generate_file(
        &self,
        task: &Task,
        file: &FileTask,
        cancel: &CancellationToken,
    ) -> Result<String, CollaboratorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((file.path.clone(), task.contextual_feedback.clone()));
        }
        if !simulate_work(self.delay, cancel).await {
            return Err(cancelled());
        }
        if self.fail_on.contains(&file.path) {
            return Err(CollaboratorError::new("model returned no code block")
                .with_location(file.path.clone(), None));
        }
        Ok(format!("// {}\n// {}\n", file.path, file.description))
    }

    async fn install_dependencies(
        &self,
        _task: &Task,
        cancel: &CancellationToken,
    ) -> Result<(), CollaboratorError> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        Ok(())
    }
}

/// 按脚本返回测试结果，脚本耗尽后返回 fallback
#[derive(Debug)]
pub struct MockTester {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    delay: Duration,
    runs: Mutex<usize>,
}

impl MockTester {
    pub fn always(success: bool) -> Self {
        Self::scripted([], success)
    }

    pub fn scripted(script: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            delay: Duration::ZERO,
            runs: Mutex::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.lock().map(|r| *r).unwrap_or(0)
    }
}

#[async_trait]
impl Tester for MockTester {
    async fn run_tests(&self, _task: &Task, cancel: &CancellationToken) -> TestOutcome {
        if let Ok(mut runs) = self.runs.lock() {
            *runs += 1;
        }
        if !simulate_work(self.delay, cancel).await {
            return TestOutcome::failed("cancelled");
        }
        let success = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(self.fallback);
        if success {
            TestOutcome::passed("all tests passed")
        } else {
            TestOutcome::failed("1 test failed: expected 200, got 500")
        }
    }
}

/// 记录每次收到的错误重试计数
#[derive(Debug, Default)]
pub struct MockDebugger {
    attempts_seen: Mutex<Vec<u32>>,
}

impl MockDebugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts_seen(&self) -> Vec<u32> {
        self.attempts_seen.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Debugger for MockDebugger {
    async fn fix_error(&self, _task: &Task, error: &ErrorRecord, cancel: &CancellationToken) -> bool {
        if let Ok(mut seen) = self.attempts_seen.lock() {
            seen.push(error.attempts);
        }
        !cancel.is_cancelled()
    }
}

/// 直接返回固定 PR 地址的仓库执行器
#[derive(Debug)]
pub struct MockRepositoryExecutor {
    base_url: String,
}

impl MockRepositoryExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RepositoryExecutor for MockRepositoryExecutor {
    async fn execute(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<String, CollaboratorError> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        match &task.spec {
            crate::task::TaskSpec::Repository { repository, .. } => {
                Ok(format!("{}/{}/pull/1", self.base_url.trim_end_matches('/'), repository))
            }
            crate::task::TaskSpec::Freeform(_) => {
                Err(CollaboratorError::new("task does not target a repository"))
            }
        }
    }
}
