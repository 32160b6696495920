//! CodeFlow 演示入口
//!
//! 使用 Mock 协作者离线跑完一个任务：初始化日志与配置、打印进度通知，Ctrl+C 时取消运行中的任务。
//! 用法：`codeflow [需求描述]`，或 `codeflow --repo owner/name [需求描述]` 走仓库流程。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use codeflow::agents::{MockCoder, MockDebugger, MockPlanner, MockRepositoryExecutor, MockTester};
use codeflow::config::load_config;
use codeflow::core::{ShutdownCoordinator, ShutdownManager, TaskCleanup};
use codeflow::{observability, AgentCoreBuilder, FeedbackRequest, Task, TaskSpec};

const OWNER: &str = "cli";

fn parse_spec(args: &[String]) -> TaskSpec {
    match args {
        [flag, repository, rest @ ..] if flag == "--repo" => TaskSpec::Repository {
            repository: repository.clone(),
            description: if rest.is_empty() {
                "apply requested change".to_string()
            } else {
                rest.join(" ")
            },
        },
        [] => TaskSpec::from("a small todo web app"),
        words => TaskSpec::from(words.join(" ")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Default::default()
    });

    let core = Arc::new(
        AgentCoreBuilder::from_app_config(&config)
            .with_planner(Arc::new(MockPlanner::new(["index.html", "app.js", "style.css"])))
            .with_coder(Arc::new(MockCoder::new().with_delay(Duration::from_millis(200))))
            .with_tester(Arc::new(MockTester::scripted([false], true)))
            .with_debugger(Arc::new(MockDebugger::new()))
            .with_repository_executor(Arc::new(MockRepositoryExecutor::new("https://github.com")))
            .build()
            .context("Failed to build orchestrator")?,
    );

    core.add_progress_listener(|task: &Task, message: &str, is_partial: bool| -> Result<(), String> {
        let marker = if is_partial { "…" } else { "✔" };
        println!("[{}] {} {}", task.status, marker, message);
        Ok(())
    });

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(TaskCleanup::new(Arc::clone(&core)));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let task = core.create_task(OWNER, parse_spec(&args)).await;
    let run = core.spawn_task(&task.id);

    // 规划期间提交一条普通反馈，演示检查点合并
    core.submit_feedback(&task.id, FeedbackRequest::new(OWNER, "keep the styling minimal"))
        .await;

    tokio::select! {
        result = run => {
            let status = result.context("Task runner panicked")??;
            tracing::info!(status = %status, "Task finished");
        }
        _ = shutdown.wait_for_shutdown() => {
            coordinator.run_cleanup().await;
        }
    }

    if let Some(report) = core.status_report(&task.id).await {
        println!("{report}");
    }
    if let Some(task) = core.get_task(&task.id).await {
        println!("{}", serde_json::to_string_pretty(&task)?);
    }
    Ok(())
}
