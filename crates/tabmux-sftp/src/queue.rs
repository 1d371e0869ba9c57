//! Per-tab SFTP operation queue: three FIFO sub-queues drained high-first,
//! preserving submission order within a class. A `VecDeque` per priority
//! class rather than one sorted structure, so same-priority ties never
//! need re-sorting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Notify;

use crate::types::Priority;

struct Queues<T> {
    high: VecDeque<T>,
    normal: VecDeque<T>,
    low: VecDeque<T>,
}

pub struct PriorityQueue<T> {
    queues: StdMutex<Queues<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T: Send> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            queues: StdMutex::new(Queues { high: VecDeque::new(), normal: VecDeque::new(), low: VecDeque::new() }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, priority: Priority, item: T) {
        let mut queues = self.queues.lock().expect("sftp queue mutex poisoned");
        match priority {
            Priority::High => queues.high.push_back(item),
            Priority::Normal => queues.normal.push_back(item),
            Priority::Low => queues.low.push_back(item),
        }
        drop(queues);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<T> {
        let mut queues = self.queues.lock().expect("sftp queue mutex poisoned");
        queues.high.pop_front().or_else(|| queues.normal.pop_front()).or_else(|| queues.low.pop_front())
    }

    /// Waits for the next job, or returns `None` once [`Self::close`] has
    /// been called and the queue has drained.
    pub async fn pop_or_wait(&self) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        let queues = self.queues.lock().expect("sftp queue mutex poisoned");
        queues.high.len() + queues.normal.len() + queues.low.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn high_priority_drains_before_normal() {
        let queue: PriorityQueue<i32> = PriorityQueue::new();
        queue.push(Priority::Normal, 1);
        queue.push(Priority::Normal, 2);
        queue.push(Priority::High, 99);

        assert_eq!(queue.pop_or_wait().await, Some(99));
        assert_eq!(queue.pop_or_wait().await, Some(1));
        assert_eq!(queue.pop_or_wait().await, Some(2));
    }

    #[tokio::test]
    async fn close_after_drain_returns_none() {
        let queue: PriorityQueue<i32> = PriorityQueue::new();
        queue.push(Priority::Normal, 1);
        queue.close();
        assert_eq!(queue.pop_or_wait().await, Some(1));
        assert_eq!(queue.pop_or_wait().await, None);
    }
}
