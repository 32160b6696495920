//! 用户反馈条目与反馈队列
//!
//! 队列排序：High 优先级插入「未处理区」最前（同为 High 的保持 FIFO），其余追加到队尾。
//! cursor 指向第一个未处理条目，只增不减；cursor 之前的条目都已离开 Pending。

use serde::{Deserialize, Serialize};

use crate::core::TaskStatus;

/// 反馈 ID
pub type FeedbackId = String;

/// 优先级：决定在队列中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum FeedbackPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// 紧急程度：决定是否抢占当前阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum FeedbackUrgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FeedbackKind {
    #[default]
    General,
    Plan,
    Code,
    Feature,
    Fix,
}

/// 条目状态只前进：Pending → Processing → Applied | Rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackStatus {
    Pending,
    Processing,
    Applied,
    Rejected,
}

impl FeedbackStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Applied | Self::Rejected => 2,
        }
    }
}

/// 一条用户反馈
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: FeedbackId,
    pub task_id: String,
    pub content: String,
    /// 接收时间（毫秒时间戳）
    pub received_at: i64,
    pub priority: FeedbackPriority,
    pub urgency: FeedbackUrgency,
    pub kind: FeedbackKind,
    /// 限定到某个文件的反馈
    pub target_file: Option<String>,
    pub status: FeedbackStatus,
    pub applied_phase: Option<TaskStatus>,
}

impl FeedbackItem {
    pub fn new(task_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("fb_{}", uuid::Uuid::new_v4()),
            task_id: task_id.into(),
            content: content.into(),
            received_at: chrono::Utc::now().timestamp_millis(),
            priority: FeedbackPriority::Normal,
            urgency: FeedbackUrgency::Normal,
            kind: FeedbackKind::General,
            target_file: None,
            status: FeedbackStatus::Pending,
            applied_phase: None,
        }
    }

    pub fn with_priority(mut self, priority: FeedbackPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_urgency(mut self, urgency: FeedbackUrgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_kind(mut self, kind: FeedbackKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_target_file(mut self, target_file: Option<String>) -> Self {
        self.target_file = target_file;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.urgency == FeedbackUrgency::Critical
    }

    pub fn is_pending(&self) -> bool {
        self.status == FeedbackStatus::Pending
    }

    /// 推进状态；回退请求被忽略并返回 false
    fn advance(&mut self, next: FeedbackStatus) -> bool {
        if next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }
}

/// 单个任务的反馈队列
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackQueue {
    items: Vec<FeedbackItem>,
    cursor: usize,
}

impl FeedbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按优先级插入，返回插入位置
    pub fn push(&mut self, item: FeedbackItem) -> usize {
        let pos = if item.priority == FeedbackPriority::High {
            // 排在第一个未处理的非 High 条目之前；已有 High 无论状态都在它之前
            self.items[self.cursor..]
                .iter()
                .position(|it| it.priority != FeedbackPriority::High && it.is_pending())
                .map(|offset| self.cursor + offset)
                .unwrap_or(self.items.len())
        } else {
            self.items.len()
        };
        self.items.insert(pos, item);
        pos
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[FeedbackItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&FeedbackItem> {
        self.items.iter().find(|it| it.id == id)
    }

    /// 条目当前下标（High 插入会使后面的条目后移，跨 await 请用 ID 重新定位）
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|it| it.id == id)
    }

    /// 未处理区内所有仍为 Pending 的条目下标（按队列顺序）
    pub fn pending_indices(&self) -> Vec<usize> {
        (self.cursor..self.items.len())
            .filter(|&i| self.items[i].is_pending())
            .collect()
    }

    pub fn has_pending_critical(&self) -> bool {
        self.items[self.cursor..]
            .iter()
            .any(|it| it.is_pending() && it.is_critical())
    }

    pub fn item_at(&self, index: usize) -> Option<&FeedbackItem> {
        self.items.get(index)
    }

    pub fn mark_processing(&mut self, index: usize) -> bool {
        self.items
            .get_mut(index)
            .map(|it| it.advance(FeedbackStatus::Processing))
            .unwrap_or(false)
    }

    /// 标记为已应用（若仍为 Pending 则先经过 Processing）
    pub fn mark_applied(&mut self, index: usize, phase: TaskStatus) -> bool {
        let Some(item) = self.items.get_mut(index) else {
            return false;
        };
        item.advance(FeedbackStatus::Processing);
        if item.advance(FeedbackStatus::Applied) {
            item.applied_phase = Some(phase);
            true
        } else {
            false
        }
    }

    pub fn mark_rejected(&mut self, index: usize) -> bool {
        let Some(item) = self.items.get_mut(index) else {
            return false;
        };
        item.advance(FeedbackStatus::Processing);
        item.advance(FeedbackStatus::Rejected)
    }

    /// 将所有 Processing 条目标记为在 phase 中已应用，返回数量
    pub fn settle_processing(&mut self, phase: TaskStatus) -> usize {
        let mut settled = 0;
        for item in self.items.iter_mut() {
            if item.status == FeedbackStatus::Processing && item.advance(FeedbackStatus::Applied) {
                item.applied_phase = Some(phase);
                settled += 1;
            }
        }
        settled
    }

    /// 任务结束时把仍未落定（Pending / Processing）的条目标记为 Rejected，返回数量
    pub fn reject_unsettled(&mut self) -> usize {
        let mut rejected = 0;
        for item in self.items.iter_mut() {
            if matches!(item.status, FeedbackStatus::Pending | FeedbackStatus::Processing) {
                item.advance(FeedbackStatus::Processing);
                if item.advance(FeedbackStatus::Rejected) {
                    rejected += 1;
                }
            }
        }
        self.advance_cursor();
        rejected
    }

    /// 越过已离开 Pending 的前缀推进 cursor
    pub fn advance_cursor(&mut self) -> usize {
        while self.cursor < self.items.len() && !self.items[self.cursor].is_pending() {
            self.cursor += 1;
        }
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(content: &str, priority: FeedbackPriority) -> FeedbackItem {
        FeedbackItem::new("task_1", content).with_priority(priority)
    }

    fn contents(queue: &FeedbackQueue) -> Vec<&str> {
        queue.items().iter().map(|it| it.content.as_str()).collect()
    }

    #[test]
    fn test_high_priority_goes_first_and_keeps_fifo() {
        let mut queue = FeedbackQueue::new();
        queue.push(item("n1", FeedbackPriority::Normal));
        queue.push(item("l1", FeedbackPriority::Low));
        queue.push(item("h1", FeedbackPriority::High));
        queue.push(item("n2", FeedbackPriority::Normal));
        queue.push(item("h2", FeedbackPriority::High));

        assert_eq!(contents(&queue), vec!["h1", "h2", "n1", "l1", "n2"]);
    }

    #[test]
    fn test_high_priority_never_lands_before_cursor() {
        let mut queue = FeedbackQueue::new();
        queue.push(item("n1", FeedbackPriority::Normal));
        queue.push(item("n2", FeedbackPriority::Normal));
        queue.mark_processing(0);
        assert_eq!(queue.advance_cursor(), 1);

        let pos = queue.push(item("h1", FeedbackPriority::High));
        assert_eq!(pos, 1);
        assert_eq!(contents(&queue), vec!["n1", "h1", "n2"]);
        assert!(queue.cursor() <= queue.len());
    }

    #[test]
    fn test_high_priority_stays_behind_batched_high_items() {
        let mut queue = FeedbackQueue::new();
        queue.push(
            item("ch", FeedbackPriority::High).with_urgency(FeedbackUrgency::Critical),
        );
        queue.push(item("h2", FeedbackPriority::High));
        queue.push(item("h3", FeedbackPriority::High));
        queue.push(item("n1", FeedbackPriority::Normal));
        // 检查点扣住紧急条目，其余 High 进入 Processing
        queue.mark_processing(1);
        queue.mark_processing(2);
        assert_eq!(queue.advance_cursor(), 0);

        let pos = queue.push(item("h4", FeedbackPriority::High));
        assert_eq!(pos, 3);
        assert_eq!(contents(&queue), vec!["ch", "h2", "h3", "h4", "n1"]);
    }

    #[test]
    fn test_reject_unsettled_on_finish() {
        let mut queue = FeedbackQueue::new();
        queue.push(item("a", FeedbackPriority::Normal));
        queue.push(item("b", FeedbackPriority::Normal));
        queue.push(item("c", FeedbackPriority::Normal));
        queue.mark_applied(0, TaskStatus::Coding);
        queue.mark_processing(1);

        assert_eq!(queue.reject_unsettled(), 2);
        assert_eq!(queue.item_at(0).unwrap().status, FeedbackStatus::Applied);
        assert_eq!(queue.item_at(1).unwrap().status, FeedbackStatus::Rejected);
        assert_eq!(queue.item_at(2).unwrap().status, FeedbackStatus::Rejected);
        assert_eq!(queue.cursor(), 3);
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut queue = FeedbackQueue::new();
        queue.push(item("a", FeedbackPriority::Normal));
        assert!(queue.mark_applied(0, TaskStatus::Coding));
        assert!(!queue.mark_processing(0));
        assert!(!queue.mark_rejected(0));
        let it = queue.item_at(0).unwrap();
        assert_eq!(it.status, FeedbackStatus::Applied);
        assert_eq!(it.applied_phase, Some(TaskStatus::Coding));
    }

    #[test]
    fn test_cursor_skips_only_non_pending_prefix() {
        let mut queue = FeedbackQueue::new();
        queue.push(item("a", FeedbackPriority::Normal));
        queue.push(item("b", FeedbackPriority::Normal));
        queue.push(item("c", FeedbackPriority::Normal));
        queue.mark_processing(0);
        queue.mark_processing(2);

        assert_eq!(queue.advance_cursor(), 1);
        assert_eq!(queue.pending_indices(), vec![1]);

        queue.mark_rejected(1);
        assert_eq!(queue.advance_cursor(), 3);
        assert_eq!(queue.settle_processing(TaskStatus::Testing), 2);
        assert_eq!(queue.item_at(1).unwrap().status, FeedbackStatus::Rejected);
    }

    #[test]
    fn test_pending_critical_detection() {
        let mut queue = FeedbackQueue::new();
        queue.push(item("a", FeedbackPriority::Normal));
        assert!(!queue.has_pending_critical());
        queue.push(FeedbackItem::new("task_1", "stop").with_urgency(FeedbackUrgency::Critical));
        assert!(queue.has_pending_critical());
        queue.mark_applied(1, TaskStatus::Coding);
        assert!(!queue.has_pending_critical());
    }
}
