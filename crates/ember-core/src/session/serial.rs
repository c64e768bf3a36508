use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// “单活跃排空者”队列。
///
/// # 教案式说明
/// - **意图（Why）**：同一会话的事件可能同时来自读任务、写任务与应用线程，
///   必须串行投递且不能嵌套；
/// - **逻辑（How）**：任意线程都可以 [`push`](Self::push)，返回 `true` 的那一个成为排空者，
///   循环 [`pop`](Self::pop) 直到为空，再调用 [`release`](Self::release)；若释放时又有新元素，
///   `release` 会重新取得排空权并返回 `true`；
/// - **契约（What）**：任一时刻至多一个排空者；排空期间提交的元素（包括排空者自身
///   回调中提交的）排在队尾，不会丢失也不会被并发处理。
pub(crate) struct SerialQueue<T> {
    items: Mutex<VecDeque<T>>,
    active: AtomicBool,
}

impl<T> SerialQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            active: AtomicBool::new(false),
        }
    }

    /// 入队；返回 `true` 表示调用方成为排空者。
    pub(crate) fn push(&self, item: T) -> bool {
        self.items.lock().push_back(item);
        self.try_acquire()
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// 放弃排空权；返回 `true` 表示释放瞬间仍有积压且调用方重新成为排空者。
    pub(crate) fn release(&self) -> bool {
        self.active.store(false, Ordering::Release);
        !self.items.lock().is_empty() && self.try_acquire()
    }

    fn try_acquire(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn only_first_pusher_drains() {
        let queue = SerialQueue::new();
        assert!(queue.push(1));
        assert!(!queue.push(2), "排空者未释放前其他提交者不得获得排空权");
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        assert!(!queue.release());
        assert!(queue.push(3), "释放后下一个提交者成为排空者");
    }

    #[test]
    fn release_reacquires_when_backlog_remains() {
        let queue = SerialQueue::new();
        assert!(queue.push("a"));
        assert_eq!(queue.pop(), Some("a"));
        assert!(!queue.push("b"));
        assert!(queue.release(), "积压元素必须由原排空者继续处理");
        assert_eq!(queue.pop(), Some("b"));
        assert!(!queue.release());
    }

    #[test]
    fn concurrent_pushers_never_overlap_and_lose_nothing() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;
        let queue = Arc::new(SerialQueue::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let in_flight = Arc::clone(&in_flight);
                let processed = Arc::clone(&processed);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        if !queue.push(i) {
                            continue;
                        }
                        loop {
                            while queue.pop().is_some() {
                                assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                                processed.fetch_add(1, Ordering::SeqCst);
                                in_flight.fetch_sub(1, Ordering::SeqCst);
                            }
                            if !queue.release() {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("工作线程不应 panic");
        }
        assert_eq!(processed.load(Ordering::SeqCst), THREADS * PER_THREAD);
    }
}
