//! 进度通知扇出
//!
//! 监听器按注册顺序逐个同步调用；单个监听器返回错误或 panic 只记录日志，不影响其余监听器与编排流程。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::task::Task;

/// 进度监听器：收到 (任务快照, 消息, 是否为中间进度)
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, task: &Task, message: &str, is_partial: bool) -> Result<(), String>;
}

impl<F> ProgressListener for F
where
    F: Fn(&Task, &str, bool) -> Result<(), String> + Send + Sync,
{
    fn on_progress(&self, task: &Task, message: &str, is_partial: bool) -> Result<(), String> {
        self(task, message, is_partial)
    }
}

/// 注册监听器时返回的句柄，用于移除
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(u64);

/// 有序的监听器列表
#[derive(Default)]
pub struct ProgressHub {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ProgressListener>)>>,
    next_id: AtomicU64,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<L: ProgressListener + 'static>(&self, listener: L) -> ListenerId {
        self.add_arc(Arc::new(listener))
    }

    pub fn add_arc(&self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.listeners.write() {
            Ok(mut list) => list.push((id, listener)),
            Err(poisoned) => poisoned.into_inner().push((id, listener)),
        }
        id
    }

    /// 移除监听器；不存在时返回 false
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut list = match self.listeners.write() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn ProgressListener>)> {
        match self.listeners.read() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 依次通知所有监听器，返回成功送达的数量
    pub fn emit(&self, task: &Task, message: &str, is_partial: bool) -> usize {
        let mut delivered = 0;
        for (id, listener) in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| listener.on_progress(task, message, is_partial))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(task_id = %task.id, listener = ?id, "Progress listener failed: {}", e);
                }
                Err(_) => {
                    tracing::warn!(task_id = %task.id, listener = ?id, "Progress listener panicked");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_in_registration_order() {
        let hub = ProgressHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let log = log.clone();
            hub.add(move |_: &Task, msg: &str, _: bool| -> Result<(), String> {
                log.lock().unwrap().push(format!("{name}:{msg}"));
                Ok(())
            });
        }
        let task = Task::new("u", "x".into());
        assert_eq!(hub.emit(&task, "hello", true), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a:hello", "b:hello", "c:hello"]);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let hub = ProgressHub::new();
        let hits = Arc::new(Mutex::new(0));
        hub.add(|_: &Task, _: &str, _: bool| -> Result<(), String> { Err("broken pipe".to_string()) });
        hub.add(|_: &Task, _: &str, _: bool| -> Result<(), String> { panic!("listener bug") });
        let counter = hits.clone();
        hub.add(move |_: &Task, _: &str, _: bool| -> Result<(), String> {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let task = Task::new("u", "x".into());
        assert_eq!(hub.emit(&task, "progress", false), 1);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_remove_listener() {
        let hub = ProgressHub::new();
        let id = hub.add(|_: &Task, _: &str, _: bool| -> Result<(), String> { Ok(()) });
        assert_eq!(hub.len(), 1);
        assert!(hub.remove(id));
        assert!(!hub.remove(id));
        assert!(hub.is_empty());
    }
}
