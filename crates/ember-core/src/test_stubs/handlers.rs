use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::buffer::ByteBuffer;
use crate::error::CoreError;
use crate::handler::SessionHandler;
use crate::marker::Marker;
use crate::session::Session;

/// 录制到的事件。
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    Opened,
    Read(Vec<u8>),
    Written(Marker),
    Exception(&'static str),
    Closed,
}

/// 按到达顺序记录全部事件的 Handler。
///
/// 每个回调进入时递增在途计数，若发现已有回调在途则记为一次重叠；
/// 可选的 `delay` 让回调停留一段时间，放大潜在的并发窗口。
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<RecordedEvent>>,
    changed: Notify,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 每个回调阻塞 `delay` 后再返回。
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// 全部 `data_read` 字节按序拼接。
    pub fn received(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Read(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    /// `data_read` 事件的负载列表，数据报场景下即消息边界。
    pub fn reads(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Read(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn markers(&self) -> Vec<Marker> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Written(marker) => Some(marker.clone()),
                _ => None,
            })
            .collect()
    }

    /// 把每个写完成标记还原为 `T`；缺省标记或类型不符为 `None`。
    pub fn marker_values<T: Any + Clone>(&self) -> Vec<Option<T>> {
        self.markers()
            .iter()
            .map(|marker| marker.downcast_ref::<T>().cloned())
            .collect()
    }

    pub fn exceptions(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Exception(code) => Some(*code),
                _ => None,
            })
            .collect()
    }

    pub fn opened_count(&self) -> usize {
        self.count(|event| matches!(event, RecordedEvent::Opened))
    }

    pub fn closed_count(&self) -> usize {
        self.count(|event| matches!(event, RecordedEvent::Closed))
    }

    pub fn written_count(&self) -> usize {
        self.count(|event| matches!(event, RecordedEvent::Written(_)))
    }

    /// 观测到的回调重叠次数；串行投递时恒为 0。
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn count(&self, predicate: impl Fn(&RecordedEvent) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| predicate(event))
            .count()
    }

    /// 等待事件序列满足条件，超时返回 `false`。
    pub async fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl Fn(&[RecordedEvent]) -> bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if predicate(&self.events.lock()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(&self.events.lock());
            }
        }
    }

    /// 等待 `session_closed`。
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |events| {
            events
                .iter()
                .any(|event| matches!(event, RecordedEvent::Closed))
        })
        .await
    }

    fn record(&self, event: RecordedEvent) {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.events.lock().push(event);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }
}

impl SessionHandler for RecordingHandler {
    fn session_opened(&self, _session: &Session) {
        self.record(RecordedEvent::Opened);
    }

    fn data_read(&self, _session: &Session, buffer: ByteBuffer) {
        self.record(RecordedEvent::Read(buffer.to_vec()));
    }

    fn data_written(&self, _session: &Session, marker: Marker) {
        self.record(RecordedEvent::Written(marker));
    }

    fn exception_caught(&self, _session: &Session, error: CoreError) {
        self.record(RecordedEvent::Exception(error.code()));
    }

    fn session_closed(&self, _session: &Session) {
        self.record(RecordedEvent::Closed);
    }
}

/// 把读到的数据原样写回对端。
#[derive(Debug, Default)]
pub struct EchoHandler;

impl SessionHandler for EchoHandler {
    fn data_read(&self, session: &Session, buffer: ByteBuffer) {
        if let Err(error) = session.write(buffer, Marker::none()) {
            debug!(session = %session.id(), error = %error, "echo write rejected");
        }
    }
}
