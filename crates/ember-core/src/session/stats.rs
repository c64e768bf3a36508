use std::sync::atomic::{AtomicU64, Ordering};

/// 会话收发计数，只增不减。
#[derive(Debug, Default)]
pub struct SessionStats {
    read_bytes: AtomicU64,
    read_messages: AtomicU64,
    written_bytes: AtomicU64,
    written_messages: AtomicU64,
}

impl SessionStats {
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    /// `data_read` 事件次数；数据报会话即收到的数据报数。
    pub fn read_messages(&self) -> u64 {
        self.read_messages.load(Ordering::Relaxed)
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::Relaxed)
    }

    /// 已完成的写请求数。
    pub fn written_messages(&self) -> u64 {
        self.written_messages.load(Ordering::Relaxed)
    }

    pub(crate) fn record_read(&self, bytes: usize) {
        self.read_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.read_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, bytes: usize) {
        self.written_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.written_messages.fetch_add(1, Ordering::Relaxed);
    }
}
