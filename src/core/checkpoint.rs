//! 反馈检查点
//!
//! 反馈只在检查点被读取：每个文件生成前（Coding）以及阶段边界。规则按以下顺序执行：
//! 1. 指向计划外文件的条目标记为 Rejected；
//! 2. Critical 条目：Coding 中立即并入 contextual_feedback；Testing 中交给调用方做重新规划；
//!    其它阶段保持 Pending 并置位 has_critical_feedback，等到下一个阶段边界；
//! 3. 其余 Pending 条目合并为一段建议文本并入上下文，标记为 Processing，下次协作者调用成功后结算为 Applied。
//!
//! 这里只做同步的队列变换，调用方持有任务写锁；重新规划（调用 Planner）由编排器在释放锁后完成。

use crate::core::TaskStatus;
use crate::task::{FeedbackId, Task};

/// Testing 阶段收到的紧急反馈，需要调用 Planner.refactor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplanRequest {
    pub feedback_ids: Vec<FeedbackId>,
    pub instructions: String,
}

/// 一次检查点的处理结果
#[derive(Debug, Clone, Default)]
pub struct CheckpointOutcome {
    /// 立即并入上下文的紧急反馈条数
    pub applied_critical: usize,
    /// 仍在等待阶段边界的紧急反馈条数
    pub deferred_critical: usize,
    /// 合并为建议文本的普通反馈条数
    pub batched: usize,
    pub rejected: usize,
    pub replan: Option<ReplanRequest>,
}

impl CheckpointOutcome {
    pub fn is_empty(&self) -> bool {
        self.applied_critical == 0
            && self.deferred_critical == 0
            && self.batched == 0
            && self.rejected == 0
            && self.replan.is_none()
    }
}

/// 在 phase 阶段处理任务的反馈队列；current_file 为即将生成的文件
pub fn evaluate(task: &mut Task, phase: TaskStatus, current_file: Option<&str>) -> CheckpointOutcome {
    let mut outcome = CheckpointOutcome::default();

    if let Some(plan) = &task.plan {
        for index in task.feedback.pending_indices() {
            let unknown = task
                .feedback
                .item_at(index)
                .and_then(|it| it.target_file.as_deref())
                .map(|path| plan.file(path).is_none())
                .unwrap_or(false);
            if unknown && task.feedback.mark_rejected(index) {
                outcome.rejected += 1;
            }
        }
    }

    let mut replan_ids = Vec::new();
    let mut replan_text = Vec::new();
    for index in task.feedback.pending_indices() {
        let Some(item) = task.feedback.item_at(index) else {
            continue;
        };
        if !item.is_critical() {
            continue;
        }
        let content = item.content.clone();
        let id = item.id.clone();
        match phase {
            TaskStatus::Coding => {
                task.contextual_feedback.push(content);
                task.feedback.mark_applied(index, TaskStatus::Coding);
                outcome.applied_critical += 1;
            }
            TaskStatus::Testing => {
                task.feedback.mark_processing(index);
                replan_ids.push(id);
                replan_text.push(content);
            }
            _ => outcome.deferred_critical += 1,
        }
    }
    if !replan_ids.is_empty() {
        outcome.replan = Some(ReplanRequest {
            feedback_ids: replan_ids,
            instructions: replan_text.join("\n"),
        });
    }

    let mut advisory = Vec::new();
    for index in task.feedback.pending_indices() {
        let Some(item) = task.feedback.item_at(index) else {
            continue;
        };
        if item.is_critical() {
            continue;
        }
        // 指向尚未轮到的文件的反馈留到该文件的检查点
        let waiting_for_file = phase == TaskStatus::Coding
            && item.target_file.as_deref().is_some_and(|path| {
                Some(path) != current_file
                    && task
                        .plan
                        .as_ref()
                        .and_then(|plan| plan.file(path))
                        .is_some_and(|file| file.needs_generation())
            });
        if waiting_for_file {
            continue;
        }
        advisory.push(match &item.target_file {
            Some(path) => format!("- [{path}] {}", item.content),
            None => format!("- {}", item.content),
        });
        task.feedback.mark_processing(index);
    }
    if !advisory.is_empty() {
        outcome.batched = advisory.len();
        task.contextual_feedback.push(format!(
            "User feedback to take into account:\n{}",
            advisory.join("\n")
        ));
    }

    task.has_critical_feedback = task.feedback.has_pending_critical();
    task.feedback.advance_cursor();

    if !outcome.is_empty() {
        tracing::debug!(
            task_id = %task.id,
            phase = %phase,
            applied_critical = outcome.applied_critical,
            deferred_critical = outcome.deferred_critical,
            batched = outcome.batched,
            rejected = outcome.rejected,
            "Feedback checkpoint"
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{FeedbackItem, FeedbackStatus, FeedbackUrgency, FileTask, Plan, WorkStatus};

    fn task_with_plan() -> Task {
        let mut task = Task::new("alice", "todo app".into());
        let mut done = FileTask::new("index.html", "page");
        done.status = WorkStatus::Completed;
        task.plan = Some(
            Plan::new("todo")
                .with_file(done)
                .with_file(FileTask::new("app.js", "logic"))
                .with_file(FileTask::new("style.css", "styles")),
        );
        task
    }

    fn critical(task: &Task, content: &str) -> FeedbackItem {
        FeedbackItem::new(&task.id, content).with_urgency(FeedbackUrgency::Critical)
    }

    #[test]
    fn test_critical_applied_immediately_in_coding() {
        let mut task = task_with_plan();
        let item = critical(&task, "use tabs");
        task.feedback.push(item);

        let outcome = evaluate(&mut task, TaskStatus::Coding, Some("app.js"));
        assert_eq!(outcome.applied_critical, 1);
        assert_eq!(task.contextual_feedback, vec!["use tabs".to_string()]);
        let item = task.feedback.item_at(0).unwrap();
        assert_eq!(item.status, FeedbackStatus::Applied);
        assert_eq!(item.applied_phase, Some(TaskStatus::Coding));
        assert_eq!(task.feedback.cursor(), 1);
        assert!(!task.has_critical_feedback);
    }

    #[test]
    fn test_critical_in_testing_requests_replan() {
        let mut task = task_with_plan();
        let item = critical(&task, "switch to react");
        let id = item.id.clone();
        task.feedback.push(item);

        let outcome = evaluate(&mut task, TaskStatus::Testing, None);
        let replan = outcome.replan.unwrap();
        assert_eq!(replan.feedback_ids, vec![id]);
        assert_eq!(replan.instructions, "switch to react");
        assert_eq!(task.feedback.item_at(0).unwrap().status, FeedbackStatus::Processing);
        assert!(task.contextual_feedback.is_empty());
    }

    #[test]
    fn test_critical_deferred_in_other_phases() {
        let mut task = Task::new("alice", "todo app".into());
        let item = critical(&task, "stop using jquery");
        task.feedback.push(item);

        let outcome = evaluate(&mut task, TaskStatus::Debugging, None);
        assert_eq!(outcome.deferred_critical, 1);
        assert!(task.has_critical_feedback);
        assert_eq!(task.feedback.item_at(0).unwrap().status, FeedbackStatus::Pending);
        assert_eq!(task.feedback.cursor(), 0);
    }

    #[test]
    fn test_non_critical_items_are_batched() {
        let mut task = task_with_plan();
        let id = task.id.clone();
        task.feedback.push(FeedbackItem::new(&id, "dark theme"));
        task.feedback.push(FeedbackItem::new(&id, "larger font"));

        let outcome = evaluate(&mut task, TaskStatus::Coding, Some("app.js"));
        assert_eq!(outcome.batched, 2);
        assert_eq!(task.contextual_feedback.len(), 1);
        assert!(task.contextual_feedback[0].contains("- dark theme\n- larger font"));
        assert_eq!(task.feedback.cursor(), 2);
        assert_eq!(task.feedback.settle_processing(TaskStatus::Coding), 2);
    }

    #[test]
    fn test_unknown_target_file_is_rejected() {
        let mut task = task_with_plan();
        let item = FeedbackItem::new(&task.id, "fix it").with_target_file(Some("missing.py".into()));
        task.feedback.push(item);

        let outcome = evaluate(&mut task, TaskStatus::Coding, Some("app.js"));
        assert_eq!(outcome.rejected, 1);
        assert_eq!(task.feedback.item_at(0).unwrap().status, FeedbackStatus::Rejected);
        assert!(task.contextual_feedback.is_empty());
    }

    #[test]
    fn test_targeted_feedback_waits_for_its_file() {
        let mut task = task_with_plan();
        let id = task.id.clone();
        task.feedback
            .push(FeedbackItem::new(&id, "use grid").with_target_file(Some("style.css".into())));
        task.feedback.push(FeedbackItem::new(&id, "add comments"));

        let outcome = evaluate(&mut task, TaskStatus::Coding, Some("app.js"));
        assert_eq!(outcome.batched, 1);
        assert_eq!(task.feedback.cursor(), 0);
        assert_eq!(task.feedback.pending_indices(), vec![0]);

        let outcome = evaluate(&mut task, TaskStatus::Coding, Some("style.css"));
        assert_eq!(outcome.batched, 1);
        assert!(task.contextual_feedback[1].contains("[style.css] use grid"));
        assert_eq!(task.feedback.cursor(), 2);
    }

    #[test]
    fn test_planning_without_plan_batches_everything() {
        let mut task = Task::new("alice", "todo app".into());
        let item = FeedbackItem::new(&task.id, "python please").with_target_file(Some("main.py".into()));
        task.feedback.push(item);

        let outcome = evaluate(&mut task, TaskStatus::Planning, None);
        assert_eq!(outcome.batched, 1);
        assert_eq!(outcome.rejected, 0);
    }
}
