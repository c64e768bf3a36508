//! 会话：一条逻辑连接的全部状态。
//!
//! # 教案式说明
//!
//! ## 意图（Why）
//! - 对上层屏蔽流式与数据报传输的差异，提供统一的写入、关闭、属性与统计接口；
//! - 作为事件的串行点：读任务、写任务与应用线程产生的入站事件全部经由
//!   会话内部的 [`SerialQueue`] 投递，保证同一会话的事件单一全序、互不并发。
//!
//! ## 契约（What）
//! - 状态机 `Connecting → Open → Closing → Closed`，只前进不回退；
//! - `write` 在 `Closing`/`Closed` 状态下同步返回 `ember.session.closed`；
//! - `close` 幂等，已入队的写请求先被排空，随后进入 `Closed` 并恰好触发一次 `session_closed`；
//! - 过滤器或 Handler 在回调中 panic 时，错误被记录，事件队列继续运转。

mod config;
mod serial;
mod stats;

pub use config::{DEFAULT_READ_BUFFER_SIZE, MAX_DATAGRAM_SIZE, SessionConfig};
pub(crate) use serial::SerialQueue;
pub use stats::SessionStats;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, error, trace};

use crate::buffer::ByteBuffer;
use crate::error::{CoreError, Result, codes};
use crate::filter::{FilterChain, SessionEvent, WriteRequest};
use crate::handler::SessionHandler;
use crate::io::{WriteCommand, WriteQueue};
use crate::marker::Marker;
use crate::service::TransportKind;

/// 进程内唯一的会话标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 会话生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

type Attribute = Arc<dyn Any + Send + Sync>;

struct SessionInner {
    id: SessionId,
    kind: TransportKind,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    chain: FilterChain,
    handler: Arc<dyn SessionHandler>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    writes: mpsc::UnboundedSender<WriteCommand>,
    events: SerialQueue<SessionEvent>,
    closed_delivered: AtomicBool,
    attributes: Mutex<HashMap<String, Attribute>>,
    stats: SessionStats,
    reader_stop: Notify,
    writer_stop: Notify,
}

/// 一条逻辑连接：流式传输的一条 TCP 连接，或数据报传输中的一个对端。
///
/// `Session` 是共享句柄，克隆代价为一次引用计数。
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// 会话自己的过滤器链，创建时由连接器/接收器的模板链复制而来。
    pub fn filter_chain(&self) -> &FilterChain {
        &self.inner.chain
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.inner.stats
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// 是否处于 `Open` 状态。
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// 是否已开始关闭（`Closing` 或 `Closed`）。
    pub fn is_closing(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Closing | SessionState::Closed
        )
    }

    /// 提交一次写请求并立即返回。
    ///
    /// # 契约（What）
    /// - 请求原子地追加到写队列尾部，经出站过滤器后交给传输层；
    /// - 写完成后触发 `data_written(marker)`，完成顺序与提交顺序一致；
    /// - `Closing`/`Closed` 状态下返回 `ember.session.closed`，请求不入队。
    pub fn write(&self, buffer: ByteBuffer, marker: Marker) -> Result<()> {
        if self.is_closing() {
            return Err(CoreError::session_closed());
        }
        self.inner
            .chain
            .fire_write(self, WriteRequest::new(buffer, marker));
        Ok(())
    }

    /// 发起关闭并立即返回；重复调用无副作用。
    ///
    /// 已入队的写请求会先被发送并回报完成，随后会话进入 `Closed` 并触发 `session_closed`。
    pub fn close(&self) {
        let started = self.inner.state.send_if_modified(|state| match state {
            SessionState::Connecting | SessionState::Open => {
                *state = SessionState::Closing;
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        });
        if started {
            debug!(session = %self.id(), remote = %self.remote_addr(), "closing session");
            self.inner.chain.fire_close(self);
        }
    }

    /// 等待会话进入 `Closed`。
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        // 发送端由会话自身持有，等待期间不会被关闭
        let _ = state
            .wait_for(|state| *state == SessionState::Closed)
            .await;
    }

    /// 设置会话属性，返回被替换的旧值。
    pub fn set_attribute<T>(&self, key: impl Into<String>, value: T) -> Option<Attribute>
    where
        T: Any + Send + Sync,
    {
        self.inner
            .attributes
            .lock()
            .insert(key.into(), Arc::new(value))
    }

    /// 读取属性；键不存在或类型不符时返回 `None`。
    pub fn attribute<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.inner.attributes.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Attribute> {
        self.inner.attributes.lock().remove(key)
    }

    pub fn contains_attribute(&self, key: &str) -> bool {
        self.inner.attributes.lock().contains_key(key)
    }

    /// 通过会话串行点投递入站事件。`session_closed` 之后到达的事件被丢弃。
    pub(crate) fn dispatch(&self, event: SessionEvent) {
        let events = &self.inner.events;
        if !events.push(event) {
            return;
        }
        loop {
            while let Some(event) = events.pop() {
                self.deliver(event);
            }
            if !events.release() {
                break;
            }
        }
    }

    fn deliver(&self, event: SessionEvent) {
        let name = event.name();
        if self.inner.closed_delivered.load(Ordering::Acquire) {
            trace!(session = %self.id(), event = name, "event dropped after session_closed");
            return;
        }
        if matches!(event, SessionEvent::Closed) {
            self.inner.closed_delivered.store(true, Ordering::Release);
        }
        trace!(session = %self.id(), event = name, "dispatching event");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.chain.fire_inbound(self, event);
        }));
        if outcome.is_err() {
            error!(
                session = %self.id(),
                event = name,
                code = codes::HANDLER_PANICKED,
                "filter or handler panicked while handling event"
            );
        }
    }

    /// 入站链的终点。
    pub(crate) fn deliver_to_handler(&self, event: SessionEvent) {
        let handler = &self.inner.handler;
        match event {
            SessionEvent::Opened => handler.session_opened(self),
            SessionEvent::DataRead(buffer) => handler.data_read(self, buffer),
            SessionEvent::DataWritten(marker) => handler.data_written(self, marker),
            SessionEvent::Exception(error) => handler.exception_caught(self, error),
            SessionEvent::Closed => handler.session_closed(self),
        }
    }

    /// 出站链的终点：写请求进入传输写队列。
    pub(crate) fn enqueue_write(&self, request: WriteRequest) {
        if self.inner.writes.send(WriteCommand::Write(request)).is_err() {
            debug!(session = %self.id(), "write discarded, transport writer has stopped");
        }
    }

    pub(crate) fn enqueue_close(&self) {
        if self.inner.writes.send(WriteCommand::Close).is_err() {
            self.finish_close();
        }
    }

    /// `Connecting → Open`；若初始化期间会话已被关闭则返回 `false`。
    pub(crate) fn mark_open(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Open;
                true
            } else {
                false
            }
        })
    }

    /// 进入 `Closed`，停止读写任务并恰好投递一次 `session_closed`。
    pub(crate) fn finish_close(&self) {
        if self.transition_closed() {
            debug!(session = %self.id(), remote = %self.remote_addr(), "session closed");
            self.dispatch(SessionEvent::Closed);
        }
    }

    /// 初始化失败时静默作废：不投递任何事件。
    pub(crate) fn abandon(&self) {
        self.transition_closed();
    }

    fn transition_closed(&self) -> bool {
        let closed = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        if closed {
            self.inner.reader_stop.notify_one();
            self.inner.writer_stop.notify_one();
        }
        closed
    }

    pub(crate) fn reader_stop(&self) -> &Notify {
        &self.inner.reader_stop
    }

    pub(crate) fn writer_stop(&self) -> &Notify {
        &self.inner.writer_stop
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("local_addr", &self.inner.local_addr)
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

/// 组装尚未激活的会话，由传输实现调用。
///
/// ```ignore
/// let pending = SessionBuilder::new(TransportKind::Stream, local, remote, handler)
///     .chain(connector.filter_chain().duplicate())
///     .build();
/// let session = pending.activate(reader, writer, initializer)?;
/// ```
pub struct SessionBuilder {
    kind: TransportKind,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    handler: Arc<dyn SessionHandler>,
    chain: FilterChain,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(
        kind: TransportKind,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        Self {
            kind,
            local_addr,
            remote_addr,
            handler,
            chain: FilterChain::new(),
            config: SessionConfig::default(),
        }
    }

    /// 使用给定的链；调用方负责在需要时先 [`FilterChain::duplicate`]。
    pub fn chain(mut self, chain: FilterChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> PendingSession {
        let (writes, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Connecting);
        let session = Session {
            inner: Arc::new(SessionInner {
                id: SessionId::next(),
                kind: self.kind,
                local_addr: self.local_addr,
                remote_addr: self.remote_addr,
                chain: self.chain,
                handler: self.handler,
                config: self.config,
                state,
                writes,
                events: SerialQueue::new(),
                closed_delivered: AtomicBool::new(false),
                attributes: Mutex::new(HashMap::new()),
                stats: SessionStats::default(),
                reader_stop: Notify::new(),
                writer_stop: Notify::new(),
            }),
        };
        PendingSession {
            session,
            queue: WriteQueue::new(receiver),
        }
    }
}

/// 已创建、尚未激活的会话：状态为 `Connecting`，不会产生任何事件。
///
/// 通过 [`PendingSession::activate`](crate::io) 运行初始化器并启动读写任务；
/// 直接丢弃则会话作废。
pub struct PendingSession {
    pub(crate) session: Session,
    pub(crate) queue: WriteQueue,
}

impl PendingSession {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl fmt::Debug for PendingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingSession").field(&self.session).finish()
    }
}
