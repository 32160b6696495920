//! 任务错误日志：只追加，每条记录带有重试计数

use serde::{Deserialize, Serialize};

use crate::core::CollaboratorError;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    PlanningFailure,
    /// 单文件生成失败，不中断 Coding 阶段
    GenerationFailure,
    /// 测试失败，触发 Debugging
    TestFailure,
    DebugExhausted,
    Timeout,
    Cancelled,
}

/// 一次失败的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub stack_trace: Option<String>,
    pub file_path: Option<String>,
    pub line: Option<u32>,
    /// 发生时间（毫秒时间戳）
    pub occurred_at: i64,
    /// 已针对该错误进行的修复尝试次数
    pub attempts: u32,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack_trace: None,
            file_path: None,
            line: None,
            occurred_at: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
        }
    }

    /// 由协作者错误构造，保留其定位信息
    pub fn from_collaborator(kind: ErrorKind, err: &CollaboratorError) -> Self {
        Self {
            stack_trace: err.stack_trace.clone(),
            file_path: err.file_path.clone(),
            line: err.line,
            ..Self::new(kind, err.message.clone())
        }
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

/// 只追加的错误序列
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorLog {
    records: Vec<ErrorRecord>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条记录，返回其下标
    pub fn record(&mut self, record: ErrorRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn latest(&self) -> Option<&ErrorRecord> {
        self.records.last()
    }

    /// 最近一条指定类型的记录
    pub fn latest_of(&self, kind: ErrorKind) -> Option<&ErrorRecord> {
        self.records.iter().rev().find(|r| r.kind == kind)
    }

    /// 对指定记录的重试计数加一，返回新的计数
    pub fn increment_attempts(&mut self, index: usize) -> Option<u32> {
        let record = self.records.get_mut(index)?;
        record.attempts += 1;
        Some(record.attempts)
    }

    /// 用新一轮测试输出刷新记录内容（计数保留）
    pub fn refresh_message(&mut self, index: usize, message: impl Into<String>) {
        if let Some(record) = self.records.get_mut(index) {
            record.message = message.into();
            record.occurred_at = chrono::Utc::now().timestamp_millis();
        }
    }

    pub fn get(&self, index: usize) -> Option<&ErrorRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_increment() {
        let mut log = ErrorLog::new();
        log.record(ErrorRecord::new(ErrorKind::GenerationFailure, "boom").with_file("a.js"));
        let idx = log.record(ErrorRecord::new(ErrorKind::TestFailure, "1 failed"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.increment_attempts(idx), Some(1));
        assert_eq!(log.increment_attempts(idx), Some(2));
        assert_eq!(log.latest().unwrap().attempts, 2);
        assert_eq!(log.latest_of(ErrorKind::GenerationFailure).unwrap().file_path.as_deref(), Some("a.js"));
        assert_eq!(log.increment_attempts(9), None);
    }

    #[test]
    fn test_from_collaborator_keeps_location() {
        let err = CollaboratorError::new("bad").with_location("index.html", Some(3));
        let record = ErrorRecord::from_collaborator(ErrorKind::GenerationFailure, &err);
        assert_eq!(record.message, "bad");
        assert_eq!(record.file_path.as_deref(), Some("index.html"));
        assert_eq!(record.line, Some(3));
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn test_refresh_keeps_attempts() {
        let mut log = ErrorLog::new();
        let idx = log.record(ErrorRecord::new(ErrorKind::TestFailure, "first"));
        log.increment_attempts(idx);
        log.refresh_message(idx, "second");
        let record = log.get(idx).unwrap();
        assert_eq!(record.message, "second");
        assert_eq!(record.attempts, 1);
    }
}
